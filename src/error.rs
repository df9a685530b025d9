use std::time::Duration;

/// Error taxonomy for the sync engine.
///
/// Variants map to how the scheduler reacts: `Config` disables the affected
/// stage, `Record` is counted and the stage continues, everything else fails
/// the stage for this tick and triggers scheduler backoff.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("ssh tunnel unavailable: {0}")]
    TunnelUnavailable(String),

    #[error("pbx database unavailable: {0}")]
    DbUnavailable(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("sftp error: {0}")]
    Sftp(String),

    #[error("object store error: {0}")]
    Storage(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether an in-line retry is worth attempting (transient network-ish
    /// failures). Config, schema and cancellation errors never retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TunnelUnavailable(_)
            | SyncError::DbUnavailable(_)
            | SyncError::Sftp(_)
            | SyncError::Storage(_) => true,
            SyncError::Db(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// Run `op` with up to two in-line retries (2s, then 4s) on retryable errors.
/// Non-retryable errors and the third failure propagate to the caller.
pub async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut delay = Duration::from_secs(2);
    for attempt in 0..3 {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < 2 && e.is_retryable() => {
                tracing::warn!(error = %e, attempt = attempt + 1, "{what} failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop always returns")
}
