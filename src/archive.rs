use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

use crate::error::SyncError;
use crate::models::{
    NewCallLog, NewConversation, NewExtension, NewFax, NewMediaFile, NewMeetingRecording,
    NewMessage, NewRecording, NewVoicemail, Stage, StageResult, SyncStatus,
};

/// Interval between sync-log retention sweeps.
const LOG_RETENTION_INTERVAL: Duration = Duration::from_secs(3600);
/// Sync logs older than this are pruned.
const LOG_RETENTION_DAYS: i64 = 30;

/// Result of an idempotent insert: a conflict on `(tenant_id, source_id)`
/// is swallowed and reported as a skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Skipped,
}

/// The central archive. One process-wide pool shared by all tenants; every
/// record writes in its own implicit transaction so partial failure never
/// leaves a stage half-committed.
#[derive(Clone)]
pub struct Archive {
    pool: PgPool,
}

impl Archive {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(dsn: &str) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(dsn)
            .await
            .map_err(|e| SyncError::Config(format!("archive connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create or evolve the archive schema. Every statement is idempotent so
    /// this runs unconditionally at startup.
    pub async fn migrate(&self) -> Result<(), SyncError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                pbx_host TEXT NOT NULL DEFAULT '',
                ssh_port INTEGER DEFAULT 22,
                ssh_username TEXT,
                ssh_password TEXT,
                db_password TEXT,
                chat_files_path TEXT,
                recordings_path TEXT,
                voicemails_path TEXT,
                faxes_path TEXT,
                meetings_path TEXT,
                backup_extensions BOOLEAN NOT NULL DEFAULT TRUE,
                backup_chats BOOLEAN NOT NULL DEFAULT TRUE,
                backup_recordings BOOLEAN NOT NULL DEFAULT TRUE,
                backup_voicemails BOOLEAN NOT NULL DEFAULT TRUE,
                backup_faxes BOOLEAN NOT NULL DEFAULT TRUE,
                backup_call_logs BOOLEAN NOT NULL DEFAULT TRUE,
                backup_meetings BOOLEAN NOT NULL DEFAULT FALSE,
                sync_interval_secs BIGINT NOT NULL DEFAULT 300,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                last_sync_at TIMESTAMPTZ
            );

            CREATE TABLE IF NOT EXISTS extensions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                extension_number TEXT NOT NULL,
                first_name TEXT,
                last_name TEXT,
                display_name TEXT,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                last_synced_at TIMESTAMPTZ,
                UNIQUE (tenant_id, extension_number)
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                source_id TEXT NOT NULL,
                display_name TEXT,
                is_external BOOLEAN NOT NULL DEFAULT FALSE,
                is_group_chat BOOLEAN NOT NULL DEFAULT FALSE,
                participant_count INTEGER NOT NULL DEFAULT 0,
                first_message_at TIMESTAMPTZ,
                last_message_at TIMESTAMPTZ,
                message_count BIGINT NOT NULL DEFAULT 0,
                UNIQUE (tenant_id, source_id)
            );

            CREATE TABLE IF NOT EXISTS participants (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                identifier TEXT NOT NULL,
                display_name TEXT,
                extension_id TEXT REFERENCES extensions(id) ON DELETE SET NULL,
                UNIQUE (conversation_id, identifier)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                source_id TEXT NOT NULL,
                sender_id TEXT,
                sender_name TEXT,
                message_type TEXT NOT NULL DEFAULT 'text',
                body TEXT,
                has_media BOOLEAN NOT NULL DEFAULT FALSE,
                media_count INTEGER NOT NULL DEFAULT 0,
                sent_at TIMESTAMPTZ NOT NULL,
                delivered_at TIMESTAMPTZ,
                read_at TIMESTAMPTZ,
                UNIQUE (tenant_id, source_id)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation_sent
                ON messages(conversation_id, sent_at);

            CREATE TABLE IF NOT EXISTS media_files (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                message_id TEXT REFERENCES messages(id) ON DELETE SET NULL,
                conversation_id TEXT REFERENCES conversations(id) ON DELETE SET NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size BIGINT NOT NULL,
                storage_key TEXT NOT NULL,
                thumbnail_key TEXT,
                width INTEGER,
                height INTEGER,
                duration_secs DOUBLE PRECISION,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (tenant_id, storage_key)
            );

            CREATE TABLE IF NOT EXISTS call_recordings (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                source_id TEXT NOT NULL,
                caller_number TEXT,
                caller_name TEXT,
                callee_number TEXT,
                callee_name TEXT,
                extension_number TEXT,
                extension_id TEXT REFERENCES extensions(id) ON DELETE SET NULL,
                direction TEXT,
                storage_key TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size BIGINT NOT NULL,
                duration_secs DOUBLE PRECISION,
                call_started_at TIMESTAMPTZ,
                call_ended_at TIMESTAMPTZ,
                recorded_at TIMESTAMPTZ,
                UNIQUE (tenant_id, source_id)
            );

            CREATE TABLE IF NOT EXISTS voicemails (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                source_id TEXT NOT NULL,
                extension_number TEXT,
                extension_id TEXT REFERENCES extensions(id) ON DELETE SET NULL,
                caller_number TEXT,
                caller_name TEXT,
                storage_key TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size BIGINT NOT NULL,
                duration_secs DOUBLE PRECISION,
                received_at TIMESTAMPTZ,
                UNIQUE (tenant_id, source_id)
            );

            CREATE TABLE IF NOT EXISTS faxes (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                source_id TEXT NOT NULL,
                direction TEXT,
                remote_number TEXT,
                storage_key TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size BIGINT NOT NULL,
                received_at TIMESTAMPTZ,
                UNIQUE (tenant_id, source_id)
            );

            CREATE TABLE IF NOT EXISTS call_logs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                source_id TEXT NOT NULL,
                caller_number TEXT,
                caller_name TEXT,
                callee_number TEXT,
                callee_name TEXT,
                extension_number TEXT,
                extension_id TEXT REFERENCES extensions(id) ON DELETE SET NULL,
                direction TEXT NOT NULL,
                status TEXT NOT NULL,
                ring_secs DOUBLE PRECISION,
                talk_secs DOUBLE PRECISION,
                total_secs DOUBLE PRECISION,
                started_at TIMESTAMPTZ,
                answered_at TIMESTAMPTZ,
                ended_at TIMESTAMPTZ,
                has_recording BOOLEAN NOT NULL DEFAULT FALSE,
                recording_id TEXT REFERENCES call_recordings(id) ON DELETE SET NULL,
                UNIQUE (tenant_id, source_id)
            );
            CREATE INDEX IF NOT EXISTS idx_call_logs_tenant_started
                ON call_logs(tenant_id, started_at);

            CREATE TABLE IF NOT EXISTS meeting_recordings (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                source_id TEXT NOT NULL,
                organizer_extension TEXT,
                extension_id TEXT REFERENCES extensions(id) ON DELETE SET NULL,
                storage_key TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_size BIGINT NOT NULL,
                duration_secs DOUBLE PRECISION,
                started_at TIMESTAMPTZ,
                UNIQUE (tenant_id, source_id)
            );

            CREATE TABLE IF NOT EXISTS sync_status (
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                stage TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'idle',
                last_sync_at TIMESTAMPTZ,
                last_success_at TIMESTAMPTZ,
                last_error_at TIMESTAMPTZ,
                last_error TEXT,
                notes TEXT,
                trigger_requested_at TIMESTAMPTZ,
                items_synced BIGINT NOT NULL DEFAULT 0,
                items_failed BIGINT NOT NULL DEFAULT 0,
                last_synced_message_at TIMESTAMPTZ,
                PRIMARY KEY (tenant_id, stage)
            );

            CREATE TABLE IF NOT EXISTS sync_logs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                details JSONB NOT NULL DEFAULT '{}',
                processed BIGINT NOT NULL DEFAULT 0,
                failed BIGINT NOT NULL DEFAULT 0,
                duration_ms BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_sync_logs_tenant_created
                ON sync_logs(tenant_id, created_at);

            -- Later additions, idempotent.
            ALTER TABLE media_files ADD COLUMN IF NOT EXISTS duration_secs DOUBLE PRECISION;
            ALTER TABLE call_recordings ADD COLUMN IF NOT EXISTS transcription TEXT;
            ALTER TABLE tenants ADD COLUMN IF NOT EXISTS backup_meetings BOOLEAN NOT NULL DEFAULT FALSE;",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- tenants ---

    pub async fn touch_tenant_last_sync(&self, tenant_id: &str) -> Result<(), SyncError> {
        sqlx::query("UPDATE tenants SET last_sync_at = now() WHERE id = $1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- extensions ---

    pub async fn upsert_extension(
        &self,
        tenant_id: &str,
        ext: &NewExtension,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO extensions (id, tenant_id, extension_number, first_name, last_name,
                                     display_name, active, last_synced_at)
             VALUES ($1, $2, $3, $4, $5, $6, TRUE, now())
             ON CONFLICT (tenant_id, extension_number) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                display_name = EXCLUDED.display_name,
                active = TRUE,
                last_synced_at = now()",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&ext.number)
        .bind(&ext.first_name)
        .bind(&ext.last_name)
        .bind(ext.display_name())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- conversations and messages ---

    /// Upsert a conversation, returning its archive id.
    pub async fn upsert_conversation(
        &self,
        tenant_id: &str,
        conv: &NewConversation,
    ) -> Result<String, SyncError> {
        let row = sqlx::query(
            "INSERT INTO conversations (id, tenant_id, source_id, display_name, is_external,
                                        is_group_chat, participant_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tenant_id, source_id) DO UPDATE SET
                display_name = COALESCE(EXCLUDED.display_name, conversations.display_name),
                is_external = EXCLUDED.is_external,
                is_group_chat = EXCLUDED.is_group_chat,
                participant_count = GREATEST(EXCLUDED.participant_count, conversations.participant_count)
             RETURNING id",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&conv.source_id)
        .bind(&conv.name)
        .bind(conv.is_external)
        .bind(conv.is_group_chat)
        .bind(conv.participant_count)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn upsert_participant(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        identifier: &str,
        display_name: Option<&str>,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO participants (id, tenant_id, conversation_id, identifier, display_name, extension_id)
             VALUES ($1, $2, $3, $4, $5,
                     (SELECT id FROM extensions WHERE tenant_id = $2 AND extension_number = $4))
             ON CONFLICT (conversation_id, identifier) DO UPDATE SET
                display_name = COALESCE(EXCLUDED.display_name, participants.display_name),
                extension_id = COALESCE(EXCLUDED.extension_id, participants.extension_id)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(identifier)
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a message. Returns `(archive_id, outcome)`; an already-archived
    /// message is a skip but its id still comes back for media linking.
    pub async fn upsert_message(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        msg: &NewMessage,
    ) -> Result<(String, Upsert), SyncError> {
        let inserted = sqlx::query(
            "INSERT INTO messages (id, tenant_id, conversation_id, source_id, sender_id,
                                   sender_name, message_type, body, has_media, media_count,
                                   sent_at, delivered_at, read_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (tenant_id, source_id) DO NOTHING
             RETURNING id",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(&msg.source_id)
        .bind(&msg.sender_id)
        .bind(&msg.sender_name)
        .bind(&msg.message_type)
        .bind(&msg.body)
        .bind(msg.has_media)
        .bind(msg.media_count)
        .bind(msg.sent_at)
        .bind(msg.delivered_at)
        .bind(msg.read_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.try_get("id")?, Upsert::Inserted));
        }
        let row = sqlx::query("SELECT id FROM messages WHERE tenant_id = $1 AND source_id = $2")
            .bind(tenant_id)
            .bind(&msg.source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok((row.try_get("id")?, Upsert::Skipped))
    }

    pub async fn insert_media_file(
        &self,
        tenant_id: &str,
        message_id: Option<&str>,
        conversation_id: Option<&str>,
        media: &NewMediaFile,
    ) -> Result<Upsert, SyncError> {
        let result = sqlx::query(
            "INSERT INTO media_files (id, tenant_id, message_id, conversation_id, filename,
                                      mime_type, file_size, storage_key, thumbnail_key,
                                      width, height, duration_secs, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (tenant_id, storage_key) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(message_id)
        .bind(conversation_id)
        .bind(&media.filename)
        .bind(&media.mime_type)
        .bind(media.file_size)
        .bind(&media.storage_key)
        .bind(&media.thumbnail_key)
        .bind(media.width)
        .bind(media.height)
        .bind(media.duration_secs)
        .bind(&media.metadata)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    /// Recompute the counters a conversation carries after a messages batch.
    pub async fn update_conversation_stats(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE conversations c SET
                message_count = stats.message_count,
                first_message_at = stats.first_message_at,
                last_message_at = stats.last_message_at
             FROM (SELECT COUNT(*) AS message_count,
                          MIN(sent_at) AS first_message_at,
                          MAX(sent_at) AS last_message_at
                   FROM messages
                   WHERE tenant_id = $1 AND conversation_id = $2) AS stats
             WHERE c.id = $2",
        )
        .bind(tenant_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- media-bearing artifacts ---

    pub async fn upsert_recording(
        &self,
        tenant_id: &str,
        rec: &NewRecording,
    ) -> Result<Upsert, SyncError> {
        let result = sqlx::query(
            "INSERT INTO call_recordings (id, tenant_id, source_id, caller_number, caller_name,
                                          callee_number, callee_name, extension_number, extension_id,
                                          direction, storage_key, mime_type, file_size, duration_secs,
                                          call_started_at, call_ended_at, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8,
                     (SELECT id FROM extensions WHERE tenant_id = $2 AND extension_number = $8),
                     $9, $10, $11, $12, $13, $14, $15, $16)
             ON CONFLICT (tenant_id, source_id) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&rec.source_id)
        .bind(&rec.caller_number)
        .bind(&rec.caller_name)
        .bind(&rec.callee_number)
        .bind(&rec.callee_name)
        .bind(&rec.extension_number)
        .bind(rec.direction.map(|d| d.as_str()))
        .bind(&rec.storage_key)
        .bind(&rec.mime_type)
        .bind(rec.file_size)
        .bind(rec.duration_secs)
        .bind(rec.call_started_at)
        .bind(rec.call_ended_at)
        .bind(rec.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    pub async fn upsert_voicemail(
        &self,
        tenant_id: &str,
        vm: &NewVoicemail,
    ) -> Result<Upsert, SyncError> {
        let result = sqlx::query(
            "INSERT INTO voicemails (id, tenant_id, source_id, extension_number, extension_id,
                                     caller_number, caller_name, storage_key, mime_type,
                                     file_size, duration_secs, received_at)
             VALUES ($1, $2, $3, $4,
                     (SELECT id FROM extensions WHERE tenant_id = $2 AND extension_number = $4),
                     $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (tenant_id, source_id) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&vm.source_id)
        .bind(&vm.extension_number)
        .bind(&vm.caller_number)
        .bind(&vm.caller_name)
        .bind(&vm.storage_key)
        .bind(&vm.mime_type)
        .bind(vm.file_size)
        .bind(vm.duration_secs)
        .bind(vm.received_at)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    pub async fn upsert_fax(&self, tenant_id: &str, fax: &NewFax) -> Result<Upsert, SyncError> {
        let result = sqlx::query(
            "INSERT INTO faxes (id, tenant_id, source_id, direction, remote_number,
                                storage_key, mime_type, file_size, received_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (tenant_id, source_id) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&fax.source_id)
        .bind(fax.direction.map(|d| d.as_str()))
        .bind(&fax.remote_number)
        .bind(&fax.storage_key)
        .bind(&fax.mime_type)
        .bind(fax.file_size)
        .bind(fax.received_at)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    pub async fn upsert_call_log(
        &self,
        tenant_id: &str,
        log: &NewCallLog,
        recording_id: Option<&str>,
    ) -> Result<Upsert, SyncError> {
        let result = sqlx::query(
            "INSERT INTO call_logs (id, tenant_id, source_id, caller_number, caller_name,
                                    callee_number, callee_name, extension_number, extension_id,
                                    direction, status, ring_secs, talk_secs, total_secs,
                                    started_at, answered_at, ended_at, has_recording, recording_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8,
                     (SELECT id FROM extensions WHERE tenant_id = $2 AND extension_number = $8),
                     $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
             ON CONFLICT (tenant_id, source_id) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&log.source_id)
        .bind(&log.caller_number)
        .bind(&log.caller_name)
        .bind(&log.callee_number)
        .bind(&log.callee_name)
        .bind(&log.extension_number)
        .bind(log.direction.as_str())
        .bind(log.status.as_str())
        .bind(log.ring_secs)
        .bind(log.talk_secs)
        .bind(log.total_secs)
        .bind(log.started_at)
        .bind(log.answered_at)
        .bind(log.ended_at)
        .bind(log.has_recording)
        .bind(recording_id)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    pub async fn upsert_meeting(
        &self,
        tenant_id: &str,
        meeting: &NewMeetingRecording,
    ) -> Result<Upsert, SyncError> {
        let result = sqlx::query(
            "INSERT INTO meeting_recordings (id, tenant_id, source_id, organizer_extension,
                                             extension_id, storage_key, mime_type, file_size,
                                             duration_secs, started_at)
             VALUES ($1, $2, $3, $4,
                     (SELECT id FROM extensions WHERE tenant_id = $2 AND extension_number = $4),
                     $5, $6, $7, $8, $9)
             ON CONFLICT (tenant_id, source_id) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&meeting.source_id)
        .bind(&meeting.organizer_extension)
        .bind(&meeting.storage_key)
        .bind(&meeting.mime_type)
        .bind(meeting.file_size)
        .bind(meeting.duration_secs)
        .bind(meeting.started_at)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    /// Whether a fax with this source id is already archived. Used by the
    /// SFTP fallback to avoid re-downloading files it has already moved.
    pub async fn fax_exists(&self, tenant_id: &str, source_id: &str) -> Result<bool, SyncError> {
        let row = sqlx::query("SELECT 1 AS one FROM faxes WHERE tenant_id = $1 AND source_id = $2")
            .bind(tenant_id)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Same as [`Self::fax_exists`], for meeting recordings.
    pub async fn meeting_exists(&self, tenant_id: &str, source_id: &str) -> Result<bool, SyncError> {
        let row = sqlx::query(
            "SELECT 1 AS one FROM meeting_recordings WHERE tenant_id = $1 AND source_id = $2",
        )
        .bind(tenant_id)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Opportunistic recording match for a CDR row: same tenant and
    /// extension, started within a minute of the call. No retroactive
    /// backfill — a recording archived later leaves the link null.
    pub async fn find_recording_for_call(
        &self,
        tenant_id: &str,
        extension_number: Option<&str>,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Option<String>, SyncError> {
        let (Some(extension), Some(started)) = (extension_number, started_at) else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT id FROM call_recordings
             WHERE tenant_id = $1
               AND extension_number = $2
               AND call_started_at BETWEEN $3::timestamptz - INTERVAL '60 seconds'
                                       AND $3::timestamptz + INTERVAL '60 seconds'
             ORDER BY ABS(EXTRACT(EPOCH FROM (call_started_at - $3::timestamptz)))
             LIMIT 1",
        )
        .bind(tenant_id)
        .bind(extension)
        .bind(started)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.try_get("id").map_err(SyncError::from)).transpose()
    }

    // --- sync status and logs ---

    pub async fn get_sync_status(
        &self,
        tenant_id: &str,
        stage: Stage,
    ) -> Result<Option<SyncStatus>, SyncError> {
        let row = sqlx::query(
            "SELECT tenant_id, stage, status, last_sync_at, last_success_at, last_error_at,
                    last_error, notes, trigger_requested_at, items_synced, items_failed,
                    last_synced_message_at
             FROM sync_status WHERE tenant_id = $1 AND stage = $2",
        )
        .bind(tenant_id)
        .bind(stage.name())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(SyncStatus {
                tenant_id: r.try_get("tenant_id")?,
                stage: r.try_get("stage")?,
                status: r.try_get("status")?,
                last_sync_at: r.try_get("last_sync_at")?,
                last_success_at: r.try_get("last_success_at")?,
                last_error_at: r.try_get("last_error_at")?,
                last_error: r.try_get("last_error")?,
                notes: r.try_get("notes")?,
                trigger_requested_at: r.try_get("trigger_requested_at")?,
                items_synced: r.try_get("items_synced")?,
                items_failed: r.try_get("items_failed")?,
                last_synced_message_at: r.try_get("last_synced_message_at")?,
            })
        })
        .transpose()
    }

    /// The stage's incremental cursor, if one has been persisted.
    pub async fn get_watermark(
        &self,
        tenant_id: &str,
        stage: Stage,
    ) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(self
            .get_sync_status(tenant_id, stage)
            .await?
            .and_then(|s| s.last_synced_message_at))
    }

    /// Heartbeat: mark the stage running and stamp `last_sync_at` before any
    /// work happens.
    pub async fn mark_stage_running(&self, tenant_id: &str, stage: Stage) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO sync_status (tenant_id, stage, status, last_sync_at)
             VALUES ($1, $2, 'running', now())
             ON CONFLICT (tenant_id, stage) DO UPDATE SET
                status = 'running',
                last_sync_at = now()",
        )
        .bind(tenant_id)
        .bind(stage.name())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advance the cursor without finishing the stage (per-record mode).
    /// GREATEST keeps it monotonically non-decreasing.
    pub async fn advance_watermark(
        &self,
        tenant_id: &str,
        stage: Stage,
        watermark: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE sync_status
             SET last_synced_message_at = GREATEST(last_synced_message_at, $3)
             WHERE tenant_id = $1 AND stage = $2",
        )
        .bind(tenant_id)
        .bind(stage.name())
        .bind(watermark)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the outcome of a stage run in `sync_status`.
    pub async fn finish_stage(
        &self,
        tenant_id: &str,
        stage: Stage,
        result: &StageResult,
        error: Option<&str>,
    ) -> Result<(), SyncError> {
        let status = if error.is_some() { "error" } else { "success" };
        sqlx::query(
            "INSERT INTO sync_status (tenant_id, stage, status, last_sync_at, last_success_at,
                                      last_error_at, last_error, notes, items_synced,
                                      items_failed, last_synced_message_at)
             VALUES ($1, $2, $3, now(),
                     CASE WHEN $4::text IS NULL THEN now() END,
                     CASE WHEN $4::text IS NOT NULL THEN now() END,
                     $4, $5, $6, $7, $8)
             ON CONFLICT (tenant_id, stage) DO UPDATE SET
                status = EXCLUDED.status,
                last_sync_at = now(),
                last_success_at = COALESCE(EXCLUDED.last_success_at, sync_status.last_success_at),
                last_error_at = COALESCE(EXCLUDED.last_error_at, sync_status.last_error_at),
                last_error = COALESCE(EXCLUDED.last_error, sync_status.last_error),
                notes = EXCLUDED.notes,
                items_synced = EXCLUDED.items_synced,
                items_failed = EXCLUDED.items_failed,
                last_synced_message_at = GREATEST(EXCLUDED.last_synced_message_at,
                                                  sync_status.last_synced_message_at)",
        )
        .bind(tenant_id)
        .bind(stage.name())
        .bind(status)
        .bind(error)
        .bind(result.summary())
        .bind(result.synced as i64)
        .bind(result.errors.len() as i64)
        .bind(if error.is_none() { result.watermark } else { None })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether the dashboard has requested a manual run for any stage of
    /// this tenant since the last tick.
    pub async fn has_pending_trigger(&self, tenant_id: &str) -> Result<bool, SyncError> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM sync_status
                WHERE tenant_id = $1
                  AND trigger_requested_at IS NOT NULL
                  AND (last_sync_at IS NULL OR trigger_requested_at > last_sync_at)
             ) AS pending",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("pending")?)
    }

    pub async fn append_sync_log(
        &self,
        tenant_id: &str,
        stage: Stage,
        status: &str,
        message: &str,
        details: serde_json::Value,
        processed: i64,
        failed: i64,
        duration_ms: i64,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO sync_logs (id, tenant_id, stage, status, message, details,
                                    processed, failed, duration_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(stage.name())
        .bind(status)
        .bind(message)
        .bind(details)
        .bind(processed)
        .bind(failed)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete sync logs older than the retention window. Returns rows pruned.
    pub async fn prune_sync_logs(&self, older_than_days: i64) -> Result<u64, SyncError> {
        let result = sqlx::query(
            "DELETE FROM sync_logs WHERE created_at < now() - make_interval(days => $1::int)",
        )
        .bind(older_than_days as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn outcome(rows_affected: u64) -> Upsert {
    if rows_affected > 0 {
        Upsert::Inserted
    } else {
        Upsert::Skipped
    }
}

/// Spawns a background task that periodically prunes old sync_logs rows.
/// Keeps the bookkeeping table from growing without bound; the archived
/// artifacts themselves are never touched.
pub fn spawn_log_retention(archive: Archive) {
    tokio::spawn(async move {
        // Initial delay: let the scheduler start up before the first sweep.
        tokio::time::sleep(Duration::from_secs(60)).await;
        loop {
            match archive.prune_sync_logs(LOG_RETENTION_DAYS).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(pruned = n, "sync log retention sweep"),
                Err(e) => tracing::warn!(error = %e, "sync log retention sweep failed"),
            }
            tokio::time::sleep(LOG_RETENTION_INTERVAL).await;
        }
    });
}
