use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::ssh_key;
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::models::Tenant;
use crate::registry::{self, DbConfig, SftpConfig};

/// SSH connect timeout, also used as the channel-ready ceiling.
const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bounded per-tenant pool, per the resource model.
const POOL_MAX_CONNECTIONS: u32 = 5;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept-everything host key policy. Tenant PBX hosts are customer boxes
/// whose keys change on reinstall; trust is anchored in the password instead.
pub struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Open an authenticated SSH session to the given endpoint. Shared by the
/// tunnel below and the SFTP session manager.
pub async fn ssh_connect(cfg: &SftpConfig) -> Result<client::Handle<SshHandler>, SyncError> {
    let config = Arc::new(client::Config {
        inactivity_timeout: Some(Duration::from_secs(600)),
        keepalive_interval: Some(Duration::from_secs(30)),
        ..Default::default()
    });

    let connect = client::connect(config, (cfg.host.as_str(), cfg.port), SshHandler);
    let mut handle = tokio::time::timeout(SSH_CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| {
            SyncError::TunnelUnavailable(format!(
                "ssh connect to {}:{} timed out",
                cfg.host, cfg.port
            ))
        })?
        .map_err(|e| SyncError::TunnelUnavailable(format!("ssh connect failed: {e}")))?;

    let auth = handle
        .authenticate_password(cfg.username.clone(), cfg.password.clone())
        .await
        .map_err(|e| SyncError::TunnelUnavailable(format!("ssh auth error: {e}")))?;
    if !auth.success() {
        return Err(SyncError::TunnelUnavailable(format!(
            "ssh password rejected for {}@{}",
            cfg.username, cfg.host
        )));
    }

    Ok(handle)
}

/// A live port forward: a loopback listener whose accepted connections are
/// proxied over `direct-tcpip` channels to the PBX-side Postgres.
pub struct Tunnel {
    handle: Arc<client::Handle<SshHandler>>,
    accept_task: JoinHandle<()>,
    pub local_port: u16,
}

impl Tunnel {
    pub async fn open(cfg: &SftpConfig) -> Result<Self, SyncError> {
        let handle = Arc::new(ssh_connect(cfg).await?);

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| SyncError::TunnelUnavailable(format!("local bind failed: {e}")))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| SyncError::TunnelUnavailable(e.to_string()))?
            .port();

        let forward_handle = Arc::clone(&handle);
        let host = cfg.host.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (mut sock, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::debug!(error = %e, "tunnel listener closed");
                        break;
                    }
                };
                let handle = forward_handle.clone();
                let host = host.clone();
                tokio::spawn(async move {
                    match handle
                        .channel_open_direct_tcpip(
                            "127.0.0.1",
                            u32::from(registry::PBX_DB_PORT),
                            &peer.ip().to_string(),
                            u32::from(peer.port()),
                        )
                        .await
                    {
                        Ok(channel) => {
                            let mut stream = channel.into_stream();
                            let _ = tokio::io::copy_bidirectional(&mut sock, &mut stream).await;
                        }
                        Err(e) => {
                            tracing::warn!(host = %host, error = %e, "direct-tcpip open failed");
                        }
                    }
                });
            }
        });

        Ok(Self {
            handle,
            accept_task,
            local_port,
        })
    }

    pub async fn close(mut self) {
        self.accept_task.abort();
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}

struct TenantConn {
    pool: PgPool,
    tunnel: Tunnel,
    fingerprint: String,
}

/// Caches one tunnel + bounded pool per tenant across ticks. Pools are torn
/// down when credentials rotate, the tenant deactivates, or on shutdown.
pub struct TunnelManager {
    conns: tokio::sync::Mutex<HashMap<String, TenantConn>>,
}

impl Default for TunnelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelManager {
    pub fn new() -> Self {
        Self {
            conns: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// A pooled connection to this tenant's PBX database, tunneled over SSH.
    /// Cached across ticks; rebuilt when the credential fingerprint changes.
    pub async fn acquire_pool(&self, tenant: &Tenant) -> Result<PgPool, SyncError> {
        let db_cfg = registry::db_config_for(tenant).ok_or_else(|| {
            SyncError::Config(format!(
                "tenant {} has incomplete SSH or database credentials",
                tenant.id
            ))
        })?;
        let fingerprint = credential_fingerprint(&db_cfg);

        let mut conns = self.conns.lock().await;
        if let Some(conn) = conns.get(&tenant.id) {
            if conn.fingerprint == fingerprint && !conn.pool.is_closed() {
                return Ok(conn.pool.clone());
            }
            let stale = conns.remove(&tenant.id).unwrap();
            tracing::info!(tenant = %tenant.id, "rebuilding tunnel (credentials rotated or pool closed)");
            stale.pool.close().await;
            stale.tunnel.close().await;
        }

        let tunnel = Tunnel::open(&db_cfg.ssh).await?;
        let pool = connect_pbx_pool(tunnel.local_port, &db_cfg).await?;

        conns.insert(
            tenant.id.clone(),
            TenantConn {
                pool: pool.clone(),
                tunnel,
                fingerprint,
            },
        );
        Ok(pool)
    }

    /// Drop the cached tunnel and pool for one tenant, if any.
    pub async fn release(&self, tenant_id: &str) {
        let conn = self.conns.lock().await.remove(tenant_id);
        if let Some(conn) = conn {
            conn.pool.close().await;
            conn.tunnel.close().await;
        }
    }

    /// Close everything. Called once on scheduler shutdown.
    pub async fn shutdown(&self) {
        let mut conns = self.conns.lock().await;
        for (tenant_id, conn) in conns.drain() {
            tracing::debug!(tenant = %tenant_id, "closing tenant tunnel");
            conn.pool.close().await;
            conn.tunnel.close().await;
        }
    }
}

async fn connect_pbx_pool(local_port: u16, cfg: &DbConfig) -> Result<PgPool, SyncError> {
    let options = PgConnectOptions::new()
        .host("127.0.0.1")
        .port(local_port)
        .username(registry::PBX_DB_USER)
        .password(&cfg.db_password)
        .database(registry::PBX_DB_NAME)
        .ssl_mode(PgSslMode::Disable);

    PgPoolOptions::new()
        .max_connections(POOL_MAX_CONNECTIONS)
        .idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|e| SyncError::DbUnavailable(format!("tunneled connect failed: {e}")))
}

fn credential_fingerprint(cfg: &DbConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cfg.ssh.host.as_bytes());
    hasher.update([0]);
    hasher.update(cfg.ssh.port.to_be_bytes());
    hasher.update(cfg.ssh.username.as_bytes());
    hasher.update([0]);
    hasher.update(cfg.ssh.password.as_bytes());
    hasher.update([0]);
    hasher.update(cfg.db_password.as_bytes());
    hex::encode(hasher.finalize())
}
