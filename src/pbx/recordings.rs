use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::SyncError;
use crate::pbx::is_extension_number;
use crate::probe::{ProbeReport, RecordingColumns};

/// One call recording row. Optional columns come back as None on installs
/// whose `recordings` table predates them.
#[derive(Debug, Clone)]
pub struct PbxRecording {
    pub source_id: String,
    pub recording_url: String,
    pub caller_number: Option<String>,
    pub caller_name: Option<String>,
    pub callee_number: Option<String>,
    pub callee_name: Option<String>,
    pub extension_number: Option<String>,
    pub is_inbound: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub transcription: Option<String>,
}

impl PbxRecording {
    /// Duration in seconds when both endpoints are known.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end > start => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }
}

fn build_select(cols: &RecordingColumns) -> String {
    let start = if cols.has_start_time {
        "start_time::timestamptz"
    } else {
        "NULL::timestamptz"
    };
    let end = if cols.has_end_time {
        "end_time::timestamptz"
    } else {
        "NULL::timestamptz"
    };
    let transcription = if cols.has_transcription {
        "transcription"
    } else {
        "NULL::text"
    };
    // Installs without start_time cannot be watermarked; the id ordering plus
    // idempotent upserts keep re-reads harmless there.
    let filter = if cols.has_start_time {
        "WHERE ($1::timestamptz IS NULL OR start_time > $1)"
    } else {
        "WHERE $1::timestamptz IS NULL OR $1 IS NOT NULL"
    };
    let order = if cols.has_start_time {
        "ORDER BY start_time ASC NULLS LAST"
    } else {
        "ORDER BY idrecording ASC"
    };

    format!(
        "SELECT idrecording::text AS source_id,
                recording_url,
                from_no AS caller_number,
                from_display_name AS caller_name,
                to_no AS callee_number,
                to_display_name AS callee_name,
                dn AS extension_number,
                is_inbound,
                {start} AS start_time,
                {end} AS end_time,
                {transcription} AS transcription
         FROM recordings
         {filter}
         {order}
         LIMIT $2"
    )
}

/// Recordings after the watermark, oldest first.
pub async fn fetch_recordings(
    pool: &PgPool,
    report: &ProbeReport,
    since: Option<DateTime<Utc>>,
    batch: i64,
) -> Result<Vec<PbxRecording>, SyncError> {
    let Some(cols) = report.recordings else {
        return Ok(Vec::new());
    };

    let sql = build_select(&cols);
    let rows = sqlx::query(&sql)
        .bind(since)
        .bind(batch)
        .fetch_all(pool)
        .await?;

    let mut recordings = Vec::with_capacity(rows.len());
    for row in rows {
        let url: Option<String> = row.try_get("recording_url")?;
        let Some(recording_url) = url.filter(|u| !u.trim().is_empty()) else {
            continue;
        };
        recordings.push(PbxRecording {
            source_id: row.try_get("source_id")?,
            recording_url,
            caller_number: row.try_get("caller_number")?,
            caller_name: row.try_get("caller_name")?,
            callee_number: row.try_get("callee_number")?,
            callee_name: row.try_get("callee_name")?,
            extension_number: row.try_get("extension_number")?,
            is_inbound: row.try_get("is_inbound")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            transcription: row.try_get("transcription")?,
        });
    }
    Ok(recordings)
}

/// Convert a recording URL (or raw path) into candidate filesystem paths
/// under the configured recordings base. The PBX stores URLs of the form
/// `https://host/recordings/104/rec_104_xxx.wav`; the on-disk tree is either
/// extension-partitioned or flat depending on version, so several candidates
/// are probed in order.
pub fn recording_path_candidates(recording_url: &str, base: &str) -> Vec<String> {
    let base = base.trim_end_matches('/');
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |c: String| {
        if !candidates.contains(&c) {
            candidates.push(c);
        }
    };

    // Strip scheme and host when present.
    let path = match recording_url.find("://") {
        Some(idx) => {
            let rest = &recording_url[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "",
            }
        }
        None => recording_url,
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some(filename) = segments.last().copied() else {
        return candidates;
    };

    // Everything from the extension-number segment onward, re-rooted at base.
    if let Some(ext_idx) = segments.iter().position(|s| is_extension_number(s)) {
        push(format!("{base}/{}", segments[ext_idx..].join("/")));
        push(format!("{base}/{}/{filename}", segments[ext_idx]));
    }
    push(format!("{base}/{filename}"));

    // A raw absolute path may already point into the data directory.
    if recording_url.starts_with('/') {
        push(recording_url.to_string());
    }

    candidates
}
