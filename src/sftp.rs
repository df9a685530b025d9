use std::time::Duration;

use russh::client;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncReadExt;

use crate::error::SyncError;
use crate::registry::SftpConfig;
use crate::tunnel::{self, SshHandler};

/// Ceiling for the SFTP subsystem to come up after the SSH session is open.
const SFTP_READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default per-file download timeout.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
/// Recursive listings stop descending past this depth.
const MAX_WALK_DEPTH: usize = 6;

/// One directory listing row.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// One file found by a recursive walk.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub filename: String,
    pub relative_path: String,
    pub absolute_path: String,
    pub size: u64,
}

/// An SFTP session scoped to one sync pass for one tenant. Opened at tick
/// start, closed in the guarded teardown path on every exit.
pub struct SftpClient {
    ssh: client::Handle<SshHandler>,
    session: SftpSession,
    host: String,
}

impl SftpClient {
    /// Connect and open the SFTP channel, retrying the whole handshake up to
    /// two more times on transient failures.
    pub async fn connect(cfg: &SftpConfig) -> Result<Self, SyncError> {
        let mut last_err = None;
        for attempt in 0..3 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2)).await;
                tracing::warn!(host = %cfg.host, attempt, "sftp reconnect attempt");
            }
            match Self::connect_once(cfg).await {
                Ok(client) => return Ok(client),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| SyncError::Sftp("sftp connect failed".to_string())))
    }

    async fn connect_once(cfg: &SftpConfig) -> Result<Self, SyncError> {
        let ssh = tunnel::ssh_connect(cfg).await?;

        let ready = async {
            let channel = ssh
                .channel_open_session()
                .await
                .map_err(|e| SyncError::Sftp(format!("channel open failed: {e}")))?;
            channel
                .request_subsystem(true, "sftp")
                .await
                .map_err(|e| SyncError::Sftp(format!("sftp subsystem rejected: {e}")))?;
            SftpSession::new(channel.into_stream())
                .await
                .map_err(|e| SyncError::Sftp(format!("sftp init failed: {e}")))
        };

        let session = tokio::time::timeout(SFTP_READY_TIMEOUT, ready)
            .await
            .map_err(|_| SyncError::Sftp(format!("sftp not ready within 10s on {}", cfg.host)))??;

        Ok(Self {
            ssh,
            session,
            host: cfg.host.clone(),
        })
    }

    pub async fn exists(&self, path: &str) -> Result<bool, SyncError> {
        self.session
            .try_exists(path)
            .await
            .map_err(|e| SyncError::Sftp(format!("exists({path}): {e}")))
    }

    /// Remote file size in bytes.
    pub async fn size(&self, path: &str) -> Result<u64, SyncError> {
        let meta = self
            .session
            .metadata(path)
            .await
            .map_err(|e| SyncError::Sftp(format!("stat({path}): {e}")))?;
        Ok(meta.size.unwrap_or(0))
    }

    pub async fn list(&self, path: &str) -> Result<Vec<ListEntry>, SyncError> {
        let dir = self
            .session
            .read_dir(path)
            .await
            .map_err(|e| SyncError::Sftp(format!("list({path}): {e}")))?;

        let mut entries = Vec::new();
        for entry in dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let meta = entry.metadata();
            entries.push(ListEntry {
                is_dir: entry.file_type().is_dir(),
                size: meta.size.unwrap_or(0),
                name,
            });
        }
        Ok(entries)
    }

    /// Walk `base` depth-first, returning every regular file. Handles both
    /// flat and extension-partitioned layouts; depth capped to keep runaway
    /// symlinked trees from stalling a tick.
    pub async fn list_recursive(&self, base: &str) -> Result<Vec<RemoteEntry>, SyncError> {
        let base = base.trim_end_matches('/');
        let mut files = Vec::new();
        let mut stack: Vec<(String, usize)> = vec![(String::new(), 0)];

        while let Some((rel_dir, depth)) = stack.pop() {
            let abs_dir = if rel_dir.is_empty() {
                base.to_string()
            } else {
                format!("{base}/{rel_dir}")
            };
            let entries = match self.list(&abs_dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(dir = %abs_dir, error = %e, "skipping unreadable directory");
                    continue;
                }
            };
            for entry in entries {
                let rel = if rel_dir.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{rel_dir}/{}", entry.name)
                };
                if entry.is_dir {
                    if depth + 1 < MAX_WALK_DEPTH {
                        stack.push((rel, depth + 1));
                    }
                } else {
                    files.push(RemoteEntry {
                        filename: entry.name,
                        absolute_path: format!("{base}/{rel}"),
                        relative_path: rel,
                        size: entry.size,
                    });
                }
            }
        }
        Ok(files)
    }

    /// Read a whole remote file into memory, bounded by a per-file timeout.
    pub async fn download_buffer(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, SyncError> {
        let read = async {
            let mut file = self
                .session
                .open(path)
                .await
                .map_err(|e| SyncError::Sftp(format!("open({path}): {e}")))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .await
                .map_err(|e| SyncError::Sftp(format!("read({path}): {e}")))?;
            Ok::<_, SyncError>(buf)
        };
        tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| SyncError::Sftp(format!("download of {path} timed out")))?
    }

    /// Open a remote file for streaming reads (large files go straight into
    /// the multipart upload without touching memory as a whole).
    pub async fn open_stream(
        &self,
        path: &str,
    ) -> Result<russh_sftp::client::fs::File, SyncError> {
        self.session
            .open(path)
            .await
            .map_err(|e| SyncError::Sftp(format!("open({path}): {e}")))
    }

    /// End the session. Dropping without calling this leaks the channel until
    /// the SSH inactivity timeout fires; callers log when they hit that path.
    pub async fn close(mut self) {
        let _ = self
            .ssh
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
        tracing::debug!(host = %self.host, "sftp session closed");
    }
}
