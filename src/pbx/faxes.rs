use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::SyncError;
use crate::models::CallDirection;

/// One fax row from a dedicated fax table, where the install has one.
#[derive(Debug, Clone)]
pub struct PbxFax {
    pub source_id: String,
    pub remote_number: Option<String>,
    pub is_inbound: Option<bool>,
    pub filename: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Metadata recovered from a fax filename when only the file system is
/// available. 3CX writes names like `in_20240131123045_15551234567.pdf`,
/// with the direction sometimes only visible in the parent directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaxFileMeta {
    pub direction: Option<CallDirection>,
    pub received_at: Option<DateTime<Utc>>,
    pub remote_number: Option<String>,
}

/// Faxes from the probed table, oldest first.
pub async fn fetch_faxes(
    pool: &PgPool,
    table: &str,
    since: Option<DateTime<Utc>>,
    batch: i64,
) -> Result<Vec<PbxFax>, SyncError> {
    let sql = format!(
        "SELECT id::text AS source_id,
                remote_number,
                is_inbound,
                filename,
                created_at::timestamptz AS created_at
         FROM {table}
         WHERE ($1::timestamptz IS NULL OR created_at > $1)
         ORDER BY created_at ASC
         LIMIT $2"
    );
    let rows = sqlx::query(&sql)
        .bind(since)
        .bind(batch)
        .fetch_all(pool)
        .await?;

    let mut faxes = Vec::with_capacity(rows.len());
    for row in rows {
        let file: Option<String> = row.try_get("filename")?;
        let Some(filename) = file.filter(|f| !f.trim().is_empty()) else {
            continue;
        };
        faxes.push(PbxFax {
            source_id: row.try_get("source_id")?,
            remote_number: row.try_get("remote_number")?,
            is_inbound: row.try_get("is_inbound")?,
            filename,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(faxes)
}

/// Compact timestamps as they appear in PBX media filenames:
/// `YYYYMMDDHHMMSS`, `YYYYMMDDTHHMMSS` or bare `YYYYMMDD`.
pub fn parse_compact_timestamp(token: &str) -> Option<DateTime<Utc>> {
    let cleaned: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
    match cleaned.len() {
        14 => NaiveDateTime::parse_from_str(&cleaned, "%Y%m%d%H%M%S")
            .ok()
            .map(|n| n.and_utc()),
        12 => NaiveDateTime::parse_from_str(&cleaned, "%Y%m%d%H%M")
            .ok()
            .map(|n| n.and_utc()),
        8 => NaiveDate::parse_from_str(&cleaned, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|n| n.and_utc()),
        _ => None,
    }
}

/// Parse direction, timestamp and remote number out of a fax file's path
/// relative to the fax base. Any part may be missing.
pub fn parse_fax_entry(relative_path: &str) -> FaxFileMeta {
    let mut meta = FaxFileMeta::default();

    let lower = relative_path.to_ascii_lowercase();
    if lower.contains("incoming") || lower.contains("received") || lower.contains("/in/") {
        meta.direction = Some(CallDirection::Inbound);
    } else if lower.contains("outgoing") || lower.contains("sent") || lower.contains("/out/") {
        meta.direction = Some(CallDirection::Outbound);
    }

    let filename = relative_path.rsplit('/').next().unwrap_or(relative_path);
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);

    for token in stem.split(['_', '-']) {
        let lower_token = token.to_ascii_lowercase();
        match lower_token.as_str() {
            "in" | "incoming" | "recv" | "received" => {
                meta.direction = Some(CallDirection::Inbound);
                continue;
            }
            "out" | "outgoing" | "sent" => {
                meta.direction = Some(CallDirection::Outbound);
                continue;
            }
            _ => {}
        }
        if meta.received_at.is_none()
            && let Some(ts) = parse_compact_timestamp(token)
        {
            meta.received_at = Some(ts);
            continue;
        }
        // A run of 6-15 digits that is not a timestamp reads as the remote
        // caller id.
        if meta.remote_number.is_none()
            && (6..=15).contains(&token.len())
            && token.bytes().all(|b| b.is_ascii_digit() || b == b'+')
        {
            meta.remote_number = Some(token.to_string());
        }
    }

    meta
}
