use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::archive::Archive;
use crate::config::Config;
use crate::error::{with_retry, SyncError};
use crate::models::{Stage, StageResult, Tenant};
use crate::probe;
use crate::registry;
use crate::sftp::SftpClient;
use crate::stages::{run_stage, StageContext};
use crate::storage::ObjectStore;
use crate::tunnel::TunnelManager;

/// How often the tenant set is reloaded from the archive.
const TENANT_REFRESH: Duration = Duration::from_secs(60);
/// Idle poll granularity inside a tenant loop (bounds trigger latency).
const POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Backoff after a failed tick starts here and doubles.
const BACKOFF_BASE: Duration = Duration::from_secs(30);
/// Backoff ceiling.
const BACKOFF_MAX: Duration = Duration::from_secs(600);

/// Aggregate outcome of one tick (or one-shot run) across its stages.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub stages_run: u32,
    pub stages_failed: u32,
    pub synced: u64,
    pub skipped: u64,
    pub record_errors: u64,
}

impl TickSummary {
    fn absorb(&mut self, result: &StageResult) {
        self.stages_run += 1;
        self.synced += result.synced;
        self.skipped += result.skipped;
        self.record_errors += result.errors.len() as u64;
    }
}

/// Drives every active tenant on its own ticking loop: parallel across
/// tenants (bounded by a semaphore), sequential across stages within one.
#[derive(Clone)]
pub struct Scheduler {
    config: Config,
    archive: Archive,
    store: ObjectStore,
    tunnels: Arc<TunnelManager>,
    tick_permits: Arc<Semaphore>,
    cancel: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(config: Config, archive: Archive, store: ObjectStore) -> Self {
        let permits = config.max_concurrent_tenants;
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            archive,
            store,
            tunnels: Arc::new(TunnelManager::new()),
            tick_permits: Arc::new(Semaphore::new(permits)),
            cancel,
        }
    }

    /// Signal every loop and in-flight stage to stop, then close the tunnels.
    pub async fn shutdown(&self) {
        let _ = self.cancel.send(true);
        self.tunnels.shutdown().await;
    }

    fn cancelled(&self) -> bool {
        *self.cancel.subscribe().borrow()
    }

    /// Main loop: keep one task per active tenant alive until shutdown.
    /// Deactivated tenants get their task stopped and their tunnel closed.
    pub async fn run(&self) -> Result<(), SyncError> {
        let mut workers: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut cancel_rx = self.cancel.subscribe();

        loop {
            match registry::list_active_tenants(self.archive.pool()).await {
                Ok(tenants) => {
                    let active: Vec<String> = tenants.iter().map(|t| t.id.clone()).collect();

                    workers.retain(|tenant_id, handle| {
                        if !active.contains(tenant_id) {
                            tracing::info!(tenant = %tenant_id, "tenant deactivated, stopping worker");
                            handle.abort();
                            let tunnels = self.tunnels.clone();
                            let tenant_id = tenant_id.clone();
                            tokio::spawn(async move { tunnels.release(&tenant_id).await });
                            return false;
                        }
                        !handle.is_finished()
                    });

                    for tenant in tenants {
                        if !workers.contains_key(&tenant.id) {
                            tracing::info!(tenant = %tenant.id, name = %tenant.name, "starting tenant worker");
                            let scheduler = self.clone();
                            let tenant_id = tenant.id.clone();
                            workers.insert(
                                tenant_id.clone(),
                                tokio::spawn(async move {
                                    scheduler.tenant_loop(tenant_id).await;
                                }),
                            );
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to load tenants"),
            }

            tokio::select! {
                _ = tokio::time::sleep(TENANT_REFRESH) => {}
                _ = cancel_rx.changed() => {
                    tracing::info!("scheduler stopping");
                    for handle in workers.values() {
                        handle.abort();
                    }
                    return Ok(());
                }
            }
        }
    }

    /// One tenant's ticking loop: sleep until due (interval elapsed or a
    /// manual trigger), tick, back off exponentially on fatal errors.
    async fn tenant_loop(&self, tenant_id: String) {
        let mut consecutive_failures: u32 = 0;

        loop {
            if self.cancelled() {
                return;
            }

            let tenant = match registry::get_tenant(self.archive.pool(), &tenant_id).await {
                Ok(Some(t)) if t.active => t,
                Ok(_) => {
                    tracing::info!(tenant = %tenant_id, "tenant gone or inactive, worker exiting");
                    self.tunnels.release(&tenant_id).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(tenant = %tenant_id, error = %e, "tenant reload failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

            if !self.is_due(&tenant).await {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let summary = {
                let _permit = match self.tick_permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                self.run_tick(&tenant, None).await
            };

            match summary {
                Ok(summary) => {
                    consecutive_failures = 0;
                    if summary.stages_failed > 0 {
                        tracing::warn!(
                            tenant = %tenant.id,
                            failed = summary.stages_failed,
                            "tick finished with stage errors"
                        );
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let backoff = backoff_delay(consecutive_failures);
                    tracing::error!(
                        tenant = %tenant.id,
                        error = %e,
                        failures = consecutive_failures,
                        backoff_secs = backoff.as_secs(),
                        "tick failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn is_due(&self, tenant: &Tenant) -> bool {
        let interval = chrono::Duration::seconds(tenant.sync_interval_secs.max(30));
        let due_by_interval = match tenant.last_sync_at {
            Some(last) => Utc::now() - last >= interval,
            None => true,
        };
        if due_by_interval {
            return true;
        }
        match self.archive.has_pending_trigger(&tenant.id).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(tenant = %tenant.id, error = %e, "trigger check failed");
                false
            }
        }
    }

    /// Run one tick for a tenant: tunnel, probe, enabled stages in order,
    /// guarded SFTP teardown, `last_sync_at` touch. `only` restricts the run
    /// to a single stage (the CLI's one-shot path).
    pub async fn run_tick(
        &self,
        tenant: &Tenant,
        only: Option<Stage>,
    ) -> Result<TickSummary, SyncError> {
        let paths = registry::paths_for(tenant);
        let cancel_rx = self.cancel.subscribe();
        let mut summary = TickSummary::default();

        let stages: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| only.map_or_else(|| s.enabled_for(tenant), |o| o == *s))
            .collect();
        if stages.is_empty() {
            return Ok(summary);
        }

        // All derived state is computed here, before any stage runs.
        if registry::db_config_for(tenant).is_none() {
            for stage in stages {
                let result = StageResult::empty_with_note(
                    "disabled: SSH or database credentials missing for tenant",
                );
                self.archive
                    .finish_stage(&tenant.id, stage, &result, None)
                    .await?;
            }
            self.archive.touch_tenant_last_sync(&tenant.id).await?;
            return Ok(summary);
        }

        let pool = with_retry("tunnel acquire", || self.tunnels.acquire_pool(tenant)).await?;
        let schema = with_retry("schema probe", || async {
            probe::probe(&pool).await
        })
        .await?;

        let needs_sftp = stages.iter().any(|s| s.needs_sftp());
        let sftp = if needs_sftp {
            match registry::sftp_config_for(tenant) {
                Some(cfg) => match SftpClient::connect(&cfg).await {
                    Ok(client) => Some(client),
                    Err(e) => {
                        tracing::warn!(tenant = %tenant.id, error = %e, "sftp unavailable for this tick");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        for stage in stages {
            let ctx = StageContext {
                tenant,
                paths: &paths,
                pbx: &pool,
                schema: &schema,
                archive: &self.archive,
                store: &self.store,
                sftp: sftp.as_ref(),
                config: &self.config,
                cancel: &cancel_rx,
            };
            match run_stage(&ctx, stage).await {
                Ok(result) => summary.absorb(&result),
                Err(SyncError::Cancelled) => {
                    summary.stages_failed += 1;
                    break;
                }
                Err(_) => {
                    // Already recorded in sync_status/sync_logs by the driver;
                    // the remaining stages still get their chance.
                    summary.stages_failed += 1;
                }
            }
        }

        // Guarded teardown: the session closes on every exit path above.
        if let Some(sftp) = sftp {
            sftp.close().await;
        }

        self.archive.touch_tenant_last_sync(&tenant.id).await?;

        if summary.stages_failed > 0 && summary.stages_run == 0 {
            return Err(SyncError::Schema(format!(
                "all {} stages failed for tenant {}",
                summary.stages_failed, tenant.id
            )));
        }
        Ok(summary)
    }
}

/// Exponential backoff after `consecutive_failures` failed ticks: 30s base,
/// doubling, capped at 10 minutes.
pub fn backoff_delay(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(6);
    BACKOFF_MAX.min(BACKOFF_BASE * 2u32.saturating_pow(exp))
}
