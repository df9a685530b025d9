use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::SyncError;
use crate::probe::ProbeReport;

/// One voicemail row from `s_voicemail`. `created_raw` is the source's text
/// timestamp; rows whose timestamp fails to parse surface as record errors.
#[derive(Debug, Clone)]
pub struct PbxVoicemail {
    pub source_id: String,
    pub extension_number: Option<String>,
    pub caller_number: Option<String>,
    pub caller_name: Option<String>,
    pub wav_file: String,
    pub duration_secs: Option<f64>,
    pub created_raw: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Parse the PBX voicemail timestamp, stored as text in
/// `YYYYMMDDHH24MISS.FF` form (the fractional part is optional and dropped).
pub fn parse_vm_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let digits = raw.trim();
    let head = digits.split('.').next()?;
    if head.len() != 14 || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(head, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format a cursor back into the source's text form for the SQL comparison.
/// The fixed-width digit layout makes lexicographic order chronological.
pub fn format_vm_cursor(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d%H%M%S").to_string()
}

/// Voicemails after the cursor, oldest first, tombstoned rows excluded.
pub async fn fetch_voicemails(
    pool: &PgPool,
    report: &ProbeReport,
    since: Option<DateTime<Utc>>,
    batch: i64,
) -> Result<Vec<PbxVoicemail>, SyncError> {
    if !report.voicemail {
        return Ok(Vec::new());
    }

    let cursor = since.map(format_vm_cursor).unwrap_or_default();
    let rows = sqlx::query(
        "SELECT id::text AS source_id,
                dn AS extension_number,
                callerid AS caller_number,
                callername AS caller_name,
                filename AS wav_file,
                duration AS duration_secs,
                created AS created_raw
         FROM s_voicemail
         WHERE removed IS NULL
           AND ($1 = '' OR created > $1)
         ORDER BY created ASC
         LIMIT $2",
    )
    .bind(&cursor)
    .bind(batch)
    .fetch_all(pool)
    .await?;

    let mut voicemails = Vec::with_capacity(rows.len());
    for row in rows {
        let file: Option<String> = row.try_get("wav_file")?;
        let Some(wav_file) = file.filter(|f| !f.trim().is_empty()) else {
            continue;
        };
        let created_raw: String = row
            .try_get::<Option<String>, _>("created_raw")?
            .unwrap_or_default();
        voicemails.push(PbxVoicemail {
            source_id: row.try_get("source_id")?,
            extension_number: row.try_get("extension_number")?,
            caller_number: row.try_get("caller_number")?,
            caller_name: row.try_get("caller_name")?,
            wav_file,
            duration_secs: row
                .try_get::<Option<i32>, _>("duration_secs")?
                .map(f64::from),
            created_at: parse_vm_timestamp(&created_raw),
            created_raw,
        });
    }
    Ok(voicemails)
}

/// Candidate remote locations for a voicemail wav, probed in order. The
/// layout moved across PBX versions; first match wins.
pub fn voicemail_path_candidates(base: &str, extension: &str, wav_file: &str) -> Vec<String> {
    let base = base.trim_end_matches('/');
    let with_ext = if wav_file.to_ascii_lowercase().ends_with(".wav") {
        wav_file.to_string()
    } else {
        format!("{wav_file}.wav")
    };
    let mut candidates = vec![
        format!("{base}/Extensions/{extension}/{with_ext}"),
        format!("{base}/Extensions/{extension}/{wav_file}"),
        format!("{base}/Data/{extension}/{with_ext}"),
        format!("{base}/{extension}/{with_ext}"),
        format!("{base}/{with_ext}"),
    ];
    candidates.dedup();
    candidates
}
