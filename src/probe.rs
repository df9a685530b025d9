use std::collections::HashSet;

use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::SyncError;

// Candidate relation names across 3CX versions. The prober records which of
// these the tenant's database actually exposes; the query layer swaps in the
// matching prebuilt template and nothing else.
pub const ACTIVE_CHAT_TABLE: &str = "chat";
pub const ACTIVE_MESSAGES_TABLE: &str = "chatmessage";
pub const CHAT_PARTICIPANTS_TABLE: &str = "chatparticipant";
pub const CHAT_FILES_TABLE: &str = "chatfile";
pub const HISTORY_CHAT_VIEW: &str = "chathistory_view";
pub const HISTORY_MESSAGES_VIEW: &str = "chatmessagehistory_view";
pub const RECORDINGS_TABLE: &str = "recordings";
pub const VOICEMAIL_TABLE: &str = "s_voicemail";
pub const USERS_VIEW: &str = "users_view";
pub const USERS_TABLE: &str = "users";
pub const DN_TABLE: &str = "dn";

const FAX_CANDIDATES: [&str; 2] = ["faxmessages", "fax"];
const MEETING_CANDIDATES: [&str; 2] = ["webmeetings", "webmeeting"];

/// Call-log source variants, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLogSource {
    MyphoneV14,
    Cl,
    Callhistory3,
    Cdr,
    Callhistory,
    CallHistory,
}

impl CallLogSource {
    pub const PRIORITY: [CallLogSource; 6] = [
        CallLogSource::MyphoneV14,
        CallLogSource::Cl,
        CallLogSource::Callhistory3,
        CallLogSource::Cdr,
        CallLogSource::Callhistory,
        CallLogSource::CallHistory,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            CallLogSource::MyphoneV14 => "myphone_callhistory_v14",
            CallLogSource::Cl => "cl",
            CallLogSource::Callhistory3 => "callhistory3",
            CallLogSource::Cdr => "cdr",
            CallLogSource::Callhistory => "callhistory",
            CallLogSource::CallHistory => "call_history",
        }
    }
}

/// Which optional columns the `recordings` table carries on this install.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingColumns {
    pub has_start_time: bool,
    pub has_end_time: bool,
    pub has_transcription: bool,
}

/// What the tenant's PBX schema exposes this tick. Probed fresh each tick;
/// a PBX upgrade mid-flight changes the answer.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub active_chat: bool,
    pub active_messages: bool,
    pub chat_participants: bool,
    pub chat_files: bool,
    pub history_chat: bool,
    pub history_messages: bool,
    pub call_log: Option<CallLogSource>,
    pub recordings: Option<RecordingColumns>,
    pub voicemail: bool,
    pub users_view: bool,
    pub users_table: bool,
    pub dn_table: bool,
    pub fax_table: Option<String>,
    pub meeting_table: Option<String>,
}

impl ProbeReport {
    /// Build a report from the set of relation names present plus the
    /// recordings column set. Split out from the queries for testability.
    pub fn from_relations(relations: &HashSet<String>, recording_columns: &HashSet<String>) -> Self {
        let has = |name: &str| relations.contains(name);

        let call_log = CallLogSource::PRIORITY
            .iter()
            .copied()
            .find(|s| has(s.table()));

        let recordings = has(RECORDINGS_TABLE).then(|| RecordingColumns {
            has_start_time: recording_columns.contains("start_time"),
            has_end_time: recording_columns.contains("end_time"),
            has_transcription: recording_columns.contains("transcription"),
        });

        Self {
            active_chat: has(ACTIVE_CHAT_TABLE),
            active_messages: has(ACTIVE_MESSAGES_TABLE),
            chat_participants: has(CHAT_PARTICIPANTS_TABLE),
            chat_files: has(CHAT_FILES_TABLE),
            history_chat: has(HISTORY_CHAT_VIEW),
            history_messages: has(HISTORY_MESSAGES_VIEW),
            call_log,
            recordings,
            voicemail: has(VOICEMAIL_TABLE),
            users_view: has(USERS_VIEW),
            users_table: has(USERS_TABLE),
            dn_table: has(DN_TABLE),
            fax_table: FAX_CANDIDATES
                .iter()
                .find(|t| has(t))
                .map(|t| t.to_string()),
            meeting_table: MEETING_CANDIDATES
                .iter()
                .find(|t| has(t))
                .map(|t| t.to_string()),
        }
    }

    pub fn has_any_message_source(&self) -> bool {
        self.history_messages || self.active_messages
    }

    pub fn has_any_extension_source(&self) -> bool {
        (self.users_view && self.users_table) || self.dn_table
    }

    /// One line per finding, for the `diag` CLI output.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let onoff = |b: bool| if b { "present" } else { "absent" };
        lines.push(format!("active chat tables: {}", onoff(self.active_chat && self.active_messages)));
        lines.push(format!("history chat views: {}", onoff(self.history_chat && self.history_messages)));
        lines.push(format!("chat file mappings: {}", onoff(self.chat_files)));
        lines.push(match self.call_log {
            Some(src) => format!("call log source: {}", src.table()),
            None => "call log source: none".to_string(),
        });
        lines.push(match self.recordings {
            Some(cols) => format!(
                "recordings table: present (start_time={}, end_time={}, transcription={})",
                cols.has_start_time, cols.has_end_time, cols.has_transcription
            ),
            None => "recordings table: absent".to_string(),
        });
        lines.push(format!("voicemail table: {}", onoff(self.voicemail)));
        lines.push(format!(
            "extension source: {}",
            if self.users_view && self.users_table {
                "users_view"
            } else if self.dn_table {
                "dn fallback"
            } else {
                "none"
            }
        ));
        lines.push(match &self.fax_table {
            Some(t) => format!("fax table: {t}"),
            None => "fax table: none (sftp fallback)".to_string(),
        });
        lines.push(match &self.meeting_table {
            Some(t) => format!("meeting table: {t}"),
            None => "meeting table: none (sftp fallback)".to_string(),
        });
        lines
    }
}

/// Inspect information_schema for the known candidate set.
pub async fn probe(pool: &PgPool) -> Result<ProbeReport, SyncError> {
    let rows = sqlx::query(
        "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'
         UNION
         SELECT table_name FROM information_schema.views WHERE table_schema = 'public'",
    )
    .fetch_all(pool)
    .await?;

    let mut relations = HashSet::new();
    for row in rows {
        relations.insert(row.try_get::<String, _>("table_name")?);
    }

    let mut recording_columns = HashSet::new();
    if relations.contains(RECORDINGS_TABLE) {
        let rows = sqlx::query(
            "SELECT column_name FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1",
        )
        .bind(RECORDINGS_TABLE)
        .fetch_all(pool)
        .await?;
        for row in rows {
            recording_columns.insert(row.try_get::<String, _>("column_name")?);
        }
    }

    Ok(ProbeReport::from_relations(&relations, &recording_columns))
}
