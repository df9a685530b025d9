//! The pipeline stages. Each stage is a free async function over a shared
//! [`StageContext`]; [`run_stage`] wraps it with the status/heartbeat/logging
//! bookkeeping so the stage bodies only deal with records.

pub mod call_logs;
pub mod extensions;
pub mod faxes;
pub mod meetings;
pub mod messages;
pub mod recordings;
pub mod voicemails;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tokio::sync::watch;

use crate::archive::Archive;
use crate::config::Config;
use crate::error::SyncError;
use crate::models::{Stage, StageResult, Tenant};
use crate::probe::ProbeReport;
use crate::registry::TenantPaths;
use crate::sftp::SftpClient;
use crate::storage::{keys, Category, ObjectStore};
use crate::transcode;

/// Everything a stage needs for one run. Built once per tick per tenant;
/// stages never re-read configuration inside their loops.
pub struct StageContext<'a> {
    pub tenant: &'a Tenant,
    pub paths: &'a TenantPaths,
    pub pbx: &'a PgPool,
    pub schema: &'a ProbeReport,
    pub archive: &'a Archive,
    pub store: &'a ObjectStore,
    pub sftp: Option<&'a SftpClient>,
    pub config: &'a Config,
    pub cancel: &'a watch::Receiver<bool>,
}

impl StageContext<'_> {
    pub fn check_cancelled(&self) -> Result<(), SyncError> {
        if *self.cancel.borrow() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run one stage with full bookkeeping: heartbeat at entry, `sync_status`
/// update and a `sync_logs` row at exit, per-record errors logged at warn.
pub async fn run_stage(ctx: &StageContext<'_>, stage: Stage) -> Result<StageResult, SyncError> {
    let started = std::time::Instant::now();
    ctx.archive
        .mark_stage_running(&ctx.tenant.id, stage)
        .await?;

    let outcome = dispatch(ctx, stage).await;
    let duration_ms = started.elapsed().as_millis() as i64;

    match outcome {
        Ok(result) => {
            for err in &result.errors {
                tracing::warn!(
                    tenant = %ctx.tenant.id,
                    stage = %stage,
                    record = %err.record_id,
                    "record failed: {}",
                    err.message
                );
            }
            ctx.archive
                .finish_stage(&ctx.tenant.id, stage, &result, None)
                .await?;
            ctx.archive
                .append_sync_log(
                    &ctx.tenant.id,
                    stage,
                    "success",
                    &result.summary(),
                    serde_json::json!({
                        "synced": result.synced,
                        "skipped": result.skipped,
                        "errors": result.errors,
                    }),
                    (result.synced + result.skipped) as i64,
                    result.errors.len() as i64,
                    duration_ms,
                )
                .await?;
            tracing::info!(
                tenant = %ctx.tenant.id,
                stage = %stage,
                synced = result.synced,
                skipped = result.skipped,
                failed = result.errors.len(),
                duration_ms,
                "stage finished"
            );
            Ok(result)
        }
        Err(e) => {
            let mut result = StageResult::default();
            if matches!(e, SyncError::Cancelled) {
                result.notes = Some("cancelled".to_string());
            }
            let message = e.to_string();
            // Status writes after a fatal error are best-effort; the original
            // error is what the scheduler needs to see.
            if let Err(status_err) = ctx
                .archive
                .finish_stage(&ctx.tenant.id, stage, &result, Some(&message))
                .await
            {
                tracing::error!(tenant = %ctx.tenant.id, stage = %stage, error = %status_err, "failed to record stage error");
            }
            if let Err(log_err) = ctx
                .archive
                .append_sync_log(
                    &ctx.tenant.id,
                    stage,
                    "error",
                    &message,
                    serde_json::json!({ "error": message }),
                    0,
                    0,
                    duration_ms,
                )
                .await
            {
                tracing::error!(tenant = %ctx.tenant.id, stage = %stage, error = %log_err, "failed to append sync log");
            }
            tracing::error!(tenant = %ctx.tenant.id, stage = %stage, error = %message, "stage failed");
            Err(e)
        }
    }
}

async fn dispatch(ctx: &StageContext<'_>, stage: Stage) -> Result<StageResult, SyncError> {
    match stage {
        Stage::Extensions => extensions::run(ctx).await,
        Stage::Messages => messages::run(ctx).await,
        Stage::Recordings => recordings::run(ctx).await,
        Stage::Voicemails => voicemails::run(ctx).await,
        Stage::Faxes => faxes::run(ctx).await,
        Stage::CallLogs => call_logs::run(ctx).await,
        Stage::Meetings => meetings::run(ctx).await,
    }
}

/// What happened to one remote file on its way into the object store.
pub enum StoreOutcome {
    Stored(StoredObject),
    /// Beyond the streamed-upload ceiling; counted as skipped by callers.
    Oversize(u64),
}

pub struct StoredObject {
    pub storage_key: String,
    pub mime_type: String,
    pub file_size: u64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub thumbnail_key: Option<String>,
    pub was_compressed: bool,
}

/// The size-adaptive transfer path shared by every media-bearing stage:
/// buffered download + transcode below the buffer ceiling, streamed multipart
/// between the ceilings, skip with a warning beyond the streamed ceiling.
pub async fn archive_remote_file(
    ctx: &StageContext<'_>,
    sftp: &SftpClient,
    remote_path: &str,
    category: Category,
    happened_at: DateTime<Utc>,
    basename: &str,
) -> Result<StoreOutcome, SyncError> {
    let size = sftp.size(remote_path).await?;

    if size > ctx.config.max_streamed_bytes {
        tracing::warn!(
            tenant = %ctx.tenant.id,
            path = remote_path,
            size,
            "file exceeds streamed-upload ceiling, skipping"
        );
        return Ok(StoreOutcome::Oversize(size));
    }

    let key = keys::media_key(&ctx.tenant.id, category, happened_at, basename);

    if size > ctx.config.max_buffered_bytes {
        // Too big to buffer: stream straight into the multipart upload. MIME
        // comes from the name alone since the bytes never sit in memory.
        let (mime, ext) = crate::storage::sniff::detect(&[], basename);
        let key = keys::with_extension(&key, &ext);
        let reader = sftp.open_stream(remote_path).await?;
        let uploaded = ctx.store.put_stream(&key, reader, &mime).await?;
        return Ok(StoreOutcome::Stored(StoredObject {
            storage_key: key,
            mime_type: mime,
            file_size: uploaded,
            width: None,
            height: None,
            thumbnail_key: None,
            was_compressed: false,
        }));
    }

    let bytes = sftp
        .download_buffer(remote_path, crate::sftp::DOWNLOAD_TIMEOUT)
        .await?;
    let outcome = transcode::process_blocking(bytes, basename.to_string()).await;
    let key = keys::with_extension(&key, &outcome.extension);

    let thumbnail_key = match &outcome.thumbnail_jpeg {
        Some(thumb) => {
            let tkey = keys::with_extension(&keys::thumbnail_key(&key), "jpg");
            ctx.store
                .put_buffer(&tkey, thumb.clone(), "image/jpeg")
                .await?;
            Some(tkey)
        }
        None => None,
    };

    if outcome.was_compressed {
        tracing::debug!(
            tenant = %ctx.tenant.id,
            path = remote_path,
            original = outcome.original_size,
            compressed = outcome.new_size(),
            ratio = outcome.ratio(),
            "image recompressed"
        );
    }

    let size = outcome.new_size();
    let mime = outcome.mime.clone();
    ctx.store.put_buffer(&key, outcome.bytes, &mime).await?;

    Ok(StoreOutcome::Stored(StoredObject {
        storage_key: key,
        mime_type: mime,
        file_size: size,
        width: outcome.width,
        height: outcome.height,
        thumbnail_key,
        was_compressed: outcome.was_compressed,
    }))
}

/// Whether an error inside a record walk should abort the whole stage.
/// Object store and archive failures poison everything after them; a single
/// file that fails to download or decode only poisons its record. On the
/// database side only constraint violations and row-decode failures are
/// record-scoped — permission denied, protocol and connection errors all
/// fail the stage so the scheduler backs off.
pub fn is_stage_fatal(e: &SyncError) -> bool {
    match e {
        SyncError::Sftp(_) | SyncError::Media(_) => false,
        SyncError::Db(inner) => match inner {
            sqlx::Error::Database(db) => !matches!(
                db.kind(),
                sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation
            ),
            sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_) => false,
            _ => true,
        },
        _ => true,
    }
}

/// Probe a list of candidate remote paths, returning the first that exists.
pub async fn first_existing_path(
    sftp: &SftpClient,
    candidates: &[String],
) -> Result<Option<String>, SyncError> {
    for candidate in candidates {
        if sftp.exists(candidate).await? {
            return Ok(Some(candidate.clone()));
        }
    }
    Ok(None)
}
