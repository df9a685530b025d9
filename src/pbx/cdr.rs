use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::error::SyncError;
use crate::models::{CallDirection, CallStatus, NewCallLog};
use crate::pbx::is_extension_number;
use crate::probe::CallLogSource;

/// Derive direction from the endpoints, honoring an explicit inbound flag
/// when the source carries one. Two internal extensions mean an internal
/// call regardless of the flag.
pub fn derive_direction(
    from_no: Option<&str>,
    to_no: Option<&str>,
    is_inbound: Option<bool>,
) -> CallDirection {
    let from_ext = from_no.is_some_and(is_extension_number);
    let to_ext = to_no.is_some_and(is_extension_number);
    match (from_ext, to_ext) {
        (true, true) => CallDirection::Internal,
        _ => match is_inbound {
            Some(true) => CallDirection::Inbound,
            Some(false) => CallDirection::Outbound,
            None if from_ext => CallDirection::Outbound,
            None if to_ext => CallDirection::Inbound,
            None => CallDirection::Inbound,
        },
    }
}

/// Status from the answered flag: an unanswered call that never rang at the
/// destination counts as failed rather than missed.
pub fn derive_status(answered: bool, rang: bool) -> CallStatus {
    if answered {
        CallStatus::Answered
    } else if rang {
        CallStatus::Missed
    } else {
        CallStatus::Failed
    }
}

/// Direction from the generic fallback's text column.
pub fn parse_direction_text(raw: &str) -> Option<CallDirection> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "inbound" | "in" | "incoming" => Some(CallDirection::Inbound),
        "outbound" | "out" | "outgoing" => Some(CallDirection::Outbound),
        "internal" | "local" => Some(CallDirection::Internal),
        _ => None,
    }
}

/// Status from the generic fallback's text column.
pub fn parse_status_text(raw: &str) -> Option<CallStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "answered" | "talking" | "completed" => Some(CallStatus::Answered),
        "missed" | "unanswered" | "noanswer" | "no_answer" => Some(CallStatus::Missed),
        "failed" | "busy" | "error" => Some(CallStatus::Failed),
        _ => None,
    }
}

/// Ring/talk/total in seconds from the three timestamps, for variants that
/// carry no explicit duration columns.
pub fn durations_from_times(
    started: Option<DateTime<Utc>>,
    answered: Option<DateTime<Utc>>,
    ended: Option<DateTime<Utc>>,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let secs = |a: DateTime<Utc>, b: DateTime<Utc>| {
        (b > a).then(|| (b - a).num_milliseconds() as f64 / 1000.0)
    };
    let ring = match (started, answered, ended) {
        (Some(s), Some(a), _) => secs(s, a),
        (Some(s), None, Some(e)) => secs(s, e),
        _ => None,
    };
    let talk = match (answered, ended) {
        (Some(a), Some(e)) => secs(a, e),
        _ => None,
    };
    let total = match (started, ended) {
        (Some(s), Some(e)) => secs(s, e),
        _ => None,
    };
    (ring, talk, total)
}

const MYPHONE_V14_SELECT: &str = "SELECT call_id::text AS source_id,
            from_no, from_display_name, to_no, to_display_name, dn,
            is_inbound, is_answered,
            start_time::timestamptz AS start_time,
            answer_time::timestamptz AS answer_time,
            end_time::timestamptz AS end_time,
            EXTRACT(EPOCH FROM ringing_dur)::float8 AS ring_secs,
            EXTRACT(EPOCH FROM talking_dur)::float8 AS talk_secs,
            (recording_url IS NOT NULL AND recording_url <> '') AS has_recording
     FROM myphone_callhistory_v14
     WHERE ($1::timestamptz IS NULL OR start_time > $1)
     ORDER BY start_time ASC
     LIMIT $2";

const CL_SELECT: &str = "SELECT cl.idcl::text AS source_id,
            src.caller_number AS from_no,
            src.display_name AS from_display_name,
            dst.caller_number AS to_no,
            dst.display_name AS to_display_name,
            COALESCE(dst.dn, src.dn) AS dn,
            cl.is_answered,
            cl.start_time::timestamptz AS start_time,
            cl.answer_time::timestamptz AS answer_time,
            cl.end_time::timestamptz AS end_time,
            (cl.recording_url IS NOT NULL AND cl.recording_url <> '') AS has_recording
     FROM cl
     LEFT JOIN cl_participants src ON src.fkidcl = cl.idcl AND src.role = 'source'
     LEFT JOIN cl_participants dst ON dst.fkidcl = cl.idcl AND dst.role = 'destination'
     WHERE ($1::timestamptz IS NULL OR cl.start_time > $1)
     ORDER BY cl.start_time ASC
     LIMIT $2";

const CALLHISTORY3_SELECT: &str = "SELECT idcallhistory3::text AS source_id,
            from_no,
            from_callerid AS from_display_name,
            to_no,
            to_callerid AS to_display_name,
            is_fromoutside,
            is_answ AS is_answered,
            starttime::timestamptz AS start_time,
            answertime::timestamptz AS answer_time,
            endtime::timestamptz AS end_time,
            (recid IS NOT NULL) AS has_recording
     FROM callhistory3
     WHERE ($1::timestamptz IS NULL OR starttime > $1)
     ORDER BY starttime ASC
     LIMIT $2";

fn generic_select(table: &str) -> String {
    format!(
        "SELECT id::text AS source_id,
                caller AS from_no,
                caller_name AS from_display_name,
                callee AS to_no,
                callee_name AS to_display_name,
                extension AS dn,
                direction AS direction_text,
                status AS status_text,
                start_time::timestamptz AS start_time,
                answer_time::timestamptz AS answer_time,
                end_time::timestamptz AS end_time,
                COALESCE(has_recording, FALSE) AS has_recording
         FROM {table}
         WHERE ($1::timestamptz IS NULL OR start_time > $1)
         ORDER BY start_time ASC
         LIMIT $2"
    )
}

/// Call-detail-records from the highest-priority available source,
/// normalized to the archive's call-log shape.
pub async fn fetch_call_records(
    pool: &PgPool,
    source: CallLogSource,
    since: Option<DateTime<Utc>>,
    batch: i64,
) -> Result<Vec<NewCallLog>, SyncError> {
    let sql = match source {
        CallLogSource::MyphoneV14 => MYPHONE_V14_SELECT.to_string(),
        CallLogSource::Cl => CL_SELECT.to_string(),
        CallLogSource::Callhistory3 => CALLHISTORY3_SELECT.to_string(),
        CallLogSource::Cdr | CallLogSource::Callhistory | CallLogSource::CallHistory => {
            generic_select(source.table())
        }
    };

    let rows = sqlx::query(&sql)
        .bind(since)
        .bind(batch)
        .fetch_all(pool)
        .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let record = match source {
            CallLogSource::MyphoneV14 => map_myphone_v14(&row)?,
            CallLogSource::Cl => map_cl(&row)?,
            CallLogSource::Callhistory3 => map_callhistory3(&row)?,
            _ => map_generic(&row)?,
        };
        records.push(record);
    }
    Ok(records)
}

fn map_myphone_v14(row: &PgRow) -> Result<NewCallLog, SyncError> {
    let from_no: Option<String> = row.try_get("from_no")?;
    let to_no: Option<String> = row.try_get("to_no")?;
    let is_inbound: Option<bool> = row.try_get("is_inbound")?;
    let answered = row
        .try_get::<Option<bool>, _>("is_answered")?
        .unwrap_or(false);
    let started_at = row.try_get("start_time")?;
    let answered_at = row.try_get("answer_time")?;
    let ended_at = row.try_get("end_time")?;

    let ring_secs: Option<f64> = row.try_get("ring_secs")?;
    let talk_secs: Option<f64> = row.try_get("talk_secs")?;
    let (_, _, total) = durations_from_times(started_at, answered_at, ended_at);
    let rang = ring_secs.is_some_and(|r| r > 0.0) || answered_at.is_some();

    Ok(NewCallLog {
        source_id: row.try_get("source_id")?,
        direction: derive_direction(from_no.as_deref(), to_no.as_deref(), is_inbound),
        status: derive_status(answered, rang),
        caller_number: from_no,
        caller_name: row.try_get("from_display_name")?,
        callee_number: to_no,
        callee_name: row.try_get("to_display_name")?,
        extension_number: row.try_get("dn")?,
        ring_secs,
        talk_secs,
        total_secs: total,
        started_at,
        answered_at,
        ended_at,
        has_recording: row.try_get("has_recording")?,
    })
}

fn map_cl(row: &PgRow) -> Result<NewCallLog, SyncError> {
    let from_no: Option<String> = row.try_get("from_no")?;
    let to_no: Option<String> = row.try_get("to_no")?;
    let answered = row
        .try_get::<Option<bool>, _>("is_answered")?
        .unwrap_or(false);
    let started_at = row.try_get("start_time")?;
    let answered_at = row.try_get("answer_time")?;
    let ended_at = row.try_get("end_time")?;
    let (ring, talk, total) = durations_from_times(started_at, answered_at, ended_at);

    Ok(NewCallLog {
        source_id: row.try_get("source_id")?,
        direction: derive_direction(from_no.as_deref(), to_no.as_deref(), None),
        status: derive_status(answered, ring.is_some_and(|r| r > 0.0)),
        caller_number: from_no,
        caller_name: row.try_get("from_display_name")?,
        callee_number: to_no,
        callee_name: row.try_get("to_display_name")?,
        extension_number: row.try_get("dn")?,
        ring_secs: ring,
        talk_secs: talk,
        total_secs: total,
        started_at,
        answered_at,
        ended_at,
        has_recording: row.try_get("has_recording")?,
    })
}

fn map_callhistory3(row: &PgRow) -> Result<NewCallLog, SyncError> {
    let from_no: Option<String> = row.try_get("from_no")?;
    let to_no: Option<String> = row.try_get("to_no")?;
    let from_outside = row
        .try_get::<Option<bool>, _>("is_fromoutside")?
        .unwrap_or(false);
    let answered = row
        .try_get::<Option<bool>, _>("is_answered")?
        .unwrap_or(false);
    let started_at = row.try_get("start_time")?;
    let answered_at = row.try_get("answer_time")?;
    let ended_at = row.try_get("end_time")?;
    let (ring, talk, total) = durations_from_times(started_at, answered_at, ended_at);

    // The legacy table has no dn column; the internal endpoint stands in.
    let extension_number = if from_outside {
        to_no.clone().filter(|n| is_extension_number(n))
    } else {
        from_no.clone().filter(|n| is_extension_number(n))
    };

    Ok(NewCallLog {
        source_id: row.try_get("source_id")?,
        direction: derive_direction(from_no.as_deref(), to_no.as_deref(), Some(from_outside)),
        status: derive_status(answered, answered_at.is_some() || ring.is_some_and(|r| r > 0.0)),
        caller_number: from_no,
        caller_name: row.try_get("from_display_name")?,
        callee_number: to_no,
        callee_name: row.try_get("to_display_name")?,
        extension_number,
        ring_secs: ring,
        talk_secs: talk,
        total_secs: total,
        started_at,
        answered_at,
        ended_at,
        has_recording: row.try_get("has_recording")?,
    })
}

fn map_generic(row: &PgRow) -> Result<NewCallLog, SyncError> {
    let from_no: Option<String> = row.try_get("from_no")?;
    let to_no: Option<String> = row.try_get("to_no")?;
    let direction_text: Option<String> = row.try_get("direction_text")?;
    let status_text: Option<String> = row.try_get("status_text")?;
    let started_at = row.try_get("start_time")?;
    let answered_at = row.try_get("answer_time")?;
    let ended_at = row.try_get("end_time")?;
    let (ring, talk, total) = durations_from_times(started_at, answered_at, ended_at);

    let direction = direction_text
        .as_deref()
        .and_then(parse_direction_text)
        .unwrap_or_else(|| derive_direction(from_no.as_deref(), to_no.as_deref(), None));
    let status = status_text
        .as_deref()
        .and_then(parse_status_text)
        .unwrap_or_else(|| derive_status(answered_at.is_some(), ring.is_some_and(|r| r > 0.0)));

    Ok(NewCallLog {
        source_id: row.try_get("source_id")?,
        direction,
        status,
        caller_number: from_no,
        caller_name: row.try_get("from_display_name")?,
        callee_number: to_no,
        callee_name: row.try_get("to_display_name")?,
        extension_number: row.try_get("dn")?,
        ring_secs: ring,
        talk_secs: talk,
        total_secs: total,
        started_at,
        answered_at,
        ended_at,
        has_recording: row.try_get("has_recording")?,
    })
}
