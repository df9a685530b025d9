use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::SyncError;
use crate::pbx::faxes::parse_compact_timestamp;
use crate::pbx::is_extension_number;

/// One meeting recording row from a dedicated table, where present.
#[derive(Debug, Clone)]
pub struct PbxMeeting {
    pub source_id: String,
    pub organizer_extension: Option<String>,
    pub recording_path: String,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
}

/// Metadata recovered from a meeting recording filename. Names encode the
/// organizer extension and start time, e.g. `wm_104_20240131123045.mp4`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeetingFileMeta {
    pub organizer_extension: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Meeting recordings from the probed table, oldest first.
pub async fn fetch_meetings(
    pool: &PgPool,
    table: &str,
    since: Option<DateTime<Utc>>,
    batch: i64,
) -> Result<Vec<PbxMeeting>, SyncError> {
    let sql = format!(
        "SELECT id::text AS source_id,
                organizer_dn,
                recording_path,
                start_time::timestamptz AS start_time,
                duration AS duration_secs
         FROM {table}
         WHERE recording_path IS NOT NULL
           AND ($1::timestamptz IS NULL OR start_time > $1)
         ORDER BY start_time ASC
         LIMIT $2"
    );
    let rows = sqlx::query(&sql)
        .bind(since)
        .bind(batch)
        .fetch_all(pool)
        .await?;

    let mut meetings = Vec::with_capacity(rows.len());
    for row in rows {
        let path: Option<String> = row.try_get("recording_path")?;
        let Some(recording_path) = path.filter(|p| !p.trim().is_empty()) else {
            continue;
        };
        meetings.push(PbxMeeting {
            source_id: row.try_get("source_id")?,
            organizer_extension: row.try_get("organizer_dn")?,
            recording_path,
            start_time: row.try_get("start_time")?,
            duration_secs: row
                .try_get::<Option<i32>, _>("duration_secs")?
                .map(f64::from),
        });
    }
    Ok(meetings)
}

/// Parse organizer extension and start time out of a meeting recording
/// filename. Either part may be missing.
pub fn parse_meeting_entry(filename: &str) -> MeetingFileMeta {
    let mut meta = MeetingFileMeta::default();
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);

    for token in stem.split(['_', '-']) {
        if meta.started_at.is_none()
            && let Some(ts) = parse_compact_timestamp(token)
        {
            meta.started_at = Some(ts);
            continue;
        }
        if meta.organizer_extension.is_none() && is_extension_number(token) {
            meta.organizer_extension = Some(token.to_string());
        }
    }
    meta
}
