use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant row from the central archive. Created by the dashboard; the sync
/// core only reads it and touches `last_sync_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub pbx_host: String,
    pub ssh_port: i32,
    #[serde(skip_serializing)]
    pub ssh_username: Option<String>,
    #[serde(skip_serializing)]
    pub ssh_password: Option<String>,
    #[serde(skip_serializing)]
    pub db_password: Option<String>,
    pub chat_files_path: Option<String>,
    pub recordings_path: Option<String>,
    pub voicemails_path: Option<String>,
    pub faxes_path: Option<String>,
    pub meetings_path: Option<String>,
    pub backup_extensions: bool,
    pub backup_chats: bool,
    pub backup_recordings: bool,
    pub backup_voicemails: bool,
    pub backup_faxes: bool,
    pub backup_call_logs: bool,
    pub backup_meetings: bool,
    pub sync_interval_secs: i64,
    pub active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// The pipeline steps, in the order a tick runs them. Media is folded into
/// the messages stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extensions,
    Messages,
    Recordings,
    Voicemails,
    Faxes,
    CallLogs,
    Meetings,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Extensions,
        Stage::Messages,
        Stage::Recordings,
        Stage::Voicemails,
        Stage::Faxes,
        Stage::CallLogs,
        Stage::Meetings,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Extensions => "extensions",
            Stage::Messages => "messages",
            Stage::Recordings => "recordings",
            Stage::Voicemails => "voicemails",
            Stage::Faxes => "faxes",
            Stage::CallLogs => "call_logs",
            Stage::Meetings => "meetings",
        }
    }

    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Whether this stage moves media and therefore needs an SFTP session.
    pub fn needs_sftp(&self) -> bool {
        !matches!(self, Stage::Extensions | Stage::CallLogs)
    }

    /// Whether the tenant has this stage enabled.
    pub fn enabled_for(&self, tenant: &Tenant) -> bool {
        match self {
            Stage::Extensions => tenant.backup_extensions,
            Stage::Messages => tenant.backup_chats,
            Stage::Recordings => tenant.backup_recordings,
            Stage::Voicemails => tenant.backup_voicemails,
            Stage::Faxes => tenant.backup_faxes,
            Stage::CallLogs => tenant.backup_call_logs,
            Stage::Meetings => tenant.backup_meetings,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A record-level failure captured during a stage run. Never aborts the stage.
#[derive(Debug, Clone, Serialize)]
pub struct RecordError {
    pub record_id: String,
    pub message: String,
}

/// Outcome of one stage run. `synced + skipped + errors.len()` always equals
/// the number of records walked.
#[derive(Debug, Default, Serialize)]
pub struct StageResult {
    pub synced: u64,
    pub skipped: u64,
    pub errors: Vec<RecordError>,
    /// Human-readable context (empty source, disabled stage, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// New cursor to persist, when the stage is watermarked.
    #[serde(skip)]
    pub watermark: Option<DateTime<Utc>>,
}

impl StageResult {
    pub fn empty_with_note(note: impl Into<String>) -> Self {
        Self {
            notes: Some(note.into()),
            ..Default::default()
        }
    }

    pub fn record_error(&mut self, record_id: impl Into<String>, message: impl ToString) {
        self.errors.push(RecordError {
            record_id: record_id.into(),
            message: message.to_string(),
        });
    }

    /// Summary line written into `sync_status.notes`.
    pub fn summary(&self) -> String {
        match &self.notes {
            Some(n) => n.clone(),
            None => format!(
                "Synced {}, skipped {}, {} failed",
                self.synced,
                self.skipped,
                self.errors.len()
            ),
        }
    }
}

/// Per `(tenant, stage)` bookkeeping row.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub tenant_id: String,
    pub stage: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_requested_at: Option<DateTime<Utc>>,
    pub items_synced: i64,
    pub items_failed: i64,
    /// High-water-mark cursor for incremental stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_message_at: Option<DateTime<Utc>>,
}

/// Normalized call direction across CDR schema variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
    Internal,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
            CallDirection::Internal => "internal",
        }
    }
}

/// Normalized call outcome across CDR schema variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Answered,
    Missed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Answered => "answered",
            CallStatus::Missed => "missed",
            CallStatus::Failed => "failed",
        }
    }
}

// Archive row shapes. Stages build these from PBX records; the writer upserts
// them keyed on (tenant_id, source_id).

#[derive(Debug, Clone)]
pub struct NewExtension {
    pub number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl NewExtension {
    pub fn display_name(&self) -> String {
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let full = full.trim();
        if full.is_empty() {
            self.number.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub source_id: String,
    pub name: Option<String>,
    pub is_external: bool,
    pub is_group_chat: bool,
    pub participant_count: i32,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub source_id: String,
    pub conversation_source_id: String,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub message_type: String,
    pub body: Option<String>,
    pub has_media: bool,
    pub media_count: i32,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewMediaFile {
    pub message_source_id: Option<String>,
    pub conversation_source_id: Option<String>,
    pub filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub storage_key: String,
    pub thumbnail_key: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_secs: Option<f64>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewRecording {
    pub source_id: String,
    pub caller_number: Option<String>,
    pub caller_name: Option<String>,
    pub callee_number: Option<String>,
    pub callee_name: Option<String>,
    pub extension_number: Option<String>,
    pub direction: Option<CallDirection>,
    pub storage_key: String,
    pub mime_type: String,
    pub file_size: i64,
    pub duration_secs: Option<f64>,
    pub call_started_at: Option<DateTime<Utc>>,
    pub call_ended_at: Option<DateTime<Utc>>,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewVoicemail {
    pub source_id: String,
    pub extension_number: Option<String>,
    pub caller_number: Option<String>,
    pub caller_name: Option<String>,
    pub storage_key: String,
    pub mime_type: String,
    pub file_size: i64,
    pub duration_secs: Option<f64>,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewFax {
    pub source_id: String,
    pub direction: Option<CallDirection>,
    pub remote_number: Option<String>,
    pub storage_key: String,
    pub mime_type: String,
    pub file_size: i64,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewCallLog {
    pub source_id: String,
    pub caller_number: Option<String>,
    pub caller_name: Option<String>,
    pub callee_number: Option<String>,
    pub callee_name: Option<String>,
    pub extension_number: Option<String>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub ring_secs: Option<f64>,
    pub talk_secs: Option<f64>,
    pub total_secs: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub has_recording: bool,
}

#[derive(Debug, Clone)]
pub struct NewMeetingRecording {
    pub source_id: String,
    pub organizer_extension: Option<String>,
    pub storage_key: String,
    pub mime_type: String,
    pub file_size: i64,
    pub duration_secs: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
}
