use std::env;

/// Buffered-download ceiling: files up to this size are pulled into memory.
pub const DEFAULT_MAX_BUFFERED_BYTES: u64 = 25 * 1024 * 1024;

/// Streamed-upload ceiling: files beyond this are skipped with a warning.
pub const DEFAULT_MAX_STREAMED_BYTES: u64 = 500 * 1024 * 1024;

/// Process-wide configuration. All read from environment variables once at
/// startup with sensible defaults.
///
/// Environment variables:
/// - `ARCHIVE_DATABASE_URL` — Postgres DSN for the central archive (required)
/// - `S3_ENDPOINT`, `S3_REGION`, `S3_BUCKET`, `S3_ACCESS_KEY`, `S3_SECRET_KEY` — object store
/// - `SYNC_MAX_CONCURRENT_TENANTS` — parallel tenant ticks (default: min(cores, 8))
/// - `SYNC_MAX_BUFFERED_BYTES` — in-memory download ceiling (default: 25 MiB)
/// - `SYNC_MAX_STREAMED_BYTES` — streamed upload ceiling (default: 500 MiB)
/// - `SYNC_CHAT_FALLBACK_SUBDIRS` — comma-separated subdirs probed for chat media (default: "Chats,Files,Data")
/// - `SYNC_WATERMARK_PER_RECORD` — advance the message cursor per record instead of per batch
#[derive(Debug, Clone)]
pub struct Config {
    pub archive_database_url: String,
    pub s3: S3Config,
    pub max_concurrent_tenants: usize,
    pub max_buffered_bytes: u64,
    pub max_streamed_bytes: u64,
    pub chat_fallback_subdirs: Vec<String>,
    pub watermark_per_record: bool,
}

/// Object store connection parameters.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

impl S3Config {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            endpoint: env::var("S3_ENDPOINT").ok()?,
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").ok()?,
            access_key: env::var("S3_ACCESS_KEY").ok()?,
            secret_key: env::var("S3_SECRET_KEY").ok()?,
        })
    }
}

impl Config {
    /// Build the config from the environment. Missing archive DSN or object
    /// store credentials are startup-fatal per the error design.
    pub fn from_env() -> Result<Self, crate::error::SyncError> {
        let archive_database_url = env::var("ARCHIVE_DATABASE_URL").map_err(|_| {
            crate::error::SyncError::Config("ARCHIVE_DATABASE_URL is not set".to_string())
        })?;
        let s3 = S3Config::from_env().ok_or_else(|| {
            crate::error::SyncError::Config(
                "object store credentials missing (S3_ENDPOINT/S3_BUCKET/S3_ACCESS_KEY/S3_SECRET_KEY)"
                    .to_string(),
            )
        })?;

        let mut config = Self {
            archive_database_url,
            s3,
            max_concurrent_tenants: default_concurrency(),
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
            max_streamed_bytes: DEFAULT_MAX_STREAMED_BYTES,
            chat_fallback_subdirs: default_chat_subdirs(),
            watermark_per_record: false,
        };

        if let Ok(val) = env::var("SYNC_MAX_CONCURRENT_TENANTS")
            && let Ok(n) = val.parse::<usize>()
            && n > 0
        {
            config.max_concurrent_tenants = n;
        }
        if let Ok(val) = env::var("SYNC_MAX_BUFFERED_BYTES")
            && let Ok(n) = val.parse::<u64>()
        {
            config.max_buffered_bytes = n;
        }
        if let Ok(val) = env::var("SYNC_MAX_STREAMED_BYTES")
            && let Ok(n) = val.parse::<u64>()
        {
            config.max_streamed_bytes = n;
        }
        if let Ok(val) = env::var("SYNC_CHAT_FALLBACK_SUBDIRS") {
            config.chat_fallback_subdirs = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("SYNC_WATERMARK_PER_RECORD") {
            config.watermark_per_record = val != "0" && val.to_lowercase() != "false";
        }

        Ok(config)
    }
}

/// Parallel tenant ticks: min(cores, 8).
pub fn default_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores.min(8)
}

fn default_chat_subdirs() -> Vec<String> {
    vec!["Chats".to_string(), "Files".to_string(), "Data".to_string()]
}
