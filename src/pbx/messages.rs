use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::SyncError;
use crate::probe::ProbeReport;

/// One chat message row, normalized across active tables and history views.
#[derive(Debug, Clone)]
pub struct PbxMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub is_external: bool,
    pub queue_number: Option<String>,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub body: Option<String>,
    pub time_sent: DateTime<Utc>,
}

/// Conversation metadata, normalized. Name derivation happens in
/// [`derive_chat_name`] after the most recent row per conversation wins.
#[derive(Debug, Clone)]
pub struct ConversationMeta {
    pub conversation_id: String,
    pub public_name: Option<String>,
    pub generated_name: Option<String>,
    pub participants: Vec<String>,
    pub is_external: bool,
}

/// A live conversation from the LEFT-JOIN projection, including empty ones.
#[derive(Debug, Clone)]
pub struct LiveConversation {
    pub conversation_id: String,
    pub name: Option<String>,
    pub is_external: bool,
    pub message_count: i64,
    pub participant_count: i32,
    pub is_group_chat: bool,
}

/// One attachment mapping for a message. `internal_name` is the hashed
/// on-disk filename under the chat-files base; `public_name` the original.
#[derive(Debug, Clone)]
pub struct FileMapping {
    pub message_id: String,
    pub internal_name: String,
    pub public_name: String,
    pub file_info: Option<serde_json::Value>,
}

const HISTORY_MESSAGES_SELECT: &str = "SELECT idmessage::text AS message_id,
            idconversation::text AS conversation_id,
            COALESCE(is_external, FALSE) AS is_external,
            queue_number AS queue_number,
            sender_id::text AS sender_id,
            sender_display_name AS sender_name,
            message AS body,
            time_sent::timestamptz AS time_sent
     FROM chatmessagehistory_view";

const ACTIVE_MESSAGES_SELECT: &str = "SELECT cm.idchatmessage::text AS message_id,
            cm.fkidchat::text AS conversation_id,
            COALESCE(c.is_external, FALSE) AS is_external,
            c.queue_no AS queue_number,
            cm.sender_participant_id::text AS sender_id,
            cm.sender_participant_name AS sender_name,
            cm.message AS body,
            cm.time_sent::timestamptz AS time_sent
     FROM chatmessage cm
     JOIN chat c ON c.idchat = cm.fkidchat";

/// New messages after `since`, oldest first, capped at `batch`. History and
/// active sources are unioned and deduplicated by message id.
pub async fn fetch_messages(
    pool: &PgPool,
    report: &ProbeReport,
    since: Option<DateTime<Utc>>,
    batch: i64,
) -> Result<Vec<PbxMessage>, SyncError> {
    let mut sources = Vec::new();
    if report.history_messages {
        sources.push(HISTORY_MESSAGES_SELECT);
    }
    if report.active_messages && report.active_chat {
        sources.push(ACTIVE_MESSAGES_SELECT);
    }
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM (
            SELECT DISTINCT ON (message_id) *
            FROM ({union}) AS m
            WHERE ($1::timestamptz IS NULL OR m.time_sent > $1)
            ORDER BY message_id, time_sent DESC
         ) AS deduped
         ORDER BY time_sent ASC
         LIMIT $2",
        union = sources.join("\n     UNION ALL\n")
    );

    let rows = sqlx::query(&sql)
        .bind(since)
        .bind(batch)
        .fetch_all(pool)
        .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        messages.push(PbxMessage {
            message_id: row.try_get("message_id")?,
            conversation_id: row.try_get("conversation_id")?,
            is_external: row.try_get("is_external")?,
            queue_number: row.try_get("queue_number")?,
            sender_id: row.try_get("sender_id")?,
            sender_name: row.try_get("sender_name")?,
            body: row.try_get("body")?,
            time_sent: row.try_get("time_sent")?,
        });
    }
    Ok(messages)
}

const HISTORY_CHAT_SELECT: &str = "SELECT idconversation::text AS conversation_id,
            public_name AS public_name,
            generated_name AS generated_name,
            string_to_array(NULLIF(COALESCE(participants, ''), ''), ',') AS participants,
            COALESCE(is_external, FALSE) AS is_external,
            time_of_last_message::timestamptz AS last_seen
     FROM chathistory_view
     WHERE idconversation::text = ANY($1)";

const ACTIVE_CHAT_SELECT_WITH_PARTICIPANTS: &str = "SELECT c.idchat::text AS conversation_id,
            c.public_name AS public_name,
            NULL::text AS generated_name,
            array_agg(cp.participant_ident) FILTER (WHERE cp.participant_ident IS NOT NULL) AS participants,
            COALESCE(c.is_external, FALSE) AS is_external,
            COALESCE(c.time_of_last_message, now())::timestamptz AS last_seen
     FROM chat c
     LEFT JOIN chatparticipant cp ON cp.fkidchat = c.idchat
     WHERE c.idchat::text = ANY($1)
     GROUP BY c.idchat, c.public_name, c.is_external, c.time_of_last_message";

const ACTIVE_CHAT_SELECT_BARE: &str = "SELECT c.idchat::text AS conversation_id,
            c.public_name AS public_name,
            NULL::text AS generated_name,
            NULL::text[] AS participants,
            COALESCE(c.is_external, FALSE) AS is_external,
            COALESCE(c.time_of_last_message, now())::timestamptz AS last_seen
     FROM chat c
     WHERE c.idchat::text = ANY($1)";

/// Metadata for the given conversation ids, most recent row winning when a
/// conversation appears in both the history view and the active table.
pub async fn fetch_conversation_meta(
    pool: &PgPool,
    report: &ProbeReport,
    conversation_ids: &[String],
) -> Result<Vec<ConversationMeta>, SyncError> {
    if conversation_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut sources = Vec::new();
    if report.history_chat {
        sources.push(HISTORY_CHAT_SELECT);
    }
    if report.active_chat {
        sources.push(if report.chat_participants {
            ACTIVE_CHAT_SELECT_WITH_PARTICIPANTS
        } else {
            ACTIVE_CHAT_SELECT_BARE
        });
    }
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT DISTINCT ON (conversation_id) *
         FROM ({union}) AS c
         ORDER BY conversation_id, last_seen DESC",
        union = sources.join("\n     UNION ALL\n")
    );

    let ids: Vec<String> = conversation_ids.to_vec();
    let rows = sqlx::query(&sql).bind(&ids).fetch_all(pool).await?;

    let mut metas = Vec::with_capacity(rows.len());
    for row in rows {
        metas.push(ConversationMeta {
            conversation_id: row.try_get("conversation_id")?,
            public_name: row.try_get("public_name")?,
            generated_name: row.try_get("generated_name")?,
            participants: row
                .try_get::<Option<Vec<String>>, _>("participants")?
                .unwrap_or_default()
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            is_external: row.try_get("is_external")?,
        });
    }
    Ok(metas)
}

/// All live conversations, including ones with no messages yet.
pub async fn fetch_all_conversations(
    pool: &PgPool,
    report: &ProbeReport,
) -> Result<Vec<LiveConversation>, SyncError> {
    if !report.active_chat {
        return Ok(Vec::new());
    }

    let sql = if report.active_messages && report.chat_participants {
        "SELECT c.idchat::text AS conversation_id,
                c.public_name AS name,
                COALESCE(c.is_external, FALSE) AS is_external,
                COUNT(DISTINCT cm.idchatmessage) AS message_count,
                COUNT(DISTINCT cp.idchatparticipant)::int AS participant_count
         FROM chat c
         LEFT JOIN chatmessage cm ON cm.fkidchat = c.idchat
         LEFT JOIN chatparticipant cp ON cp.fkidchat = c.idchat
         GROUP BY c.idchat, c.public_name, c.is_external"
    } else if report.active_messages {
        "SELECT c.idchat::text AS conversation_id,
                c.public_name AS name,
                COALESCE(c.is_external, FALSE) AS is_external,
                COUNT(cm.idchatmessage) AS message_count,
                0::int AS participant_count
         FROM chat c
         LEFT JOIN chatmessage cm ON cm.fkidchat = c.idchat
         GROUP BY c.idchat, c.public_name, c.is_external"
    } else {
        "SELECT c.idchat::text AS conversation_id,
                c.public_name AS name,
                COALESCE(c.is_external, FALSE) AS is_external,
                0::bigint AS message_count,
                0::int AS participant_count
         FROM chat c"
    };

    let rows = sqlx::query(sql).fetch_all(pool).await?;
    let mut conversations = Vec::with_capacity(rows.len());
    for row in rows {
        let name: Option<String> = row.try_get("name")?;
        let participant_count: i32 = row.try_get("participant_count")?;
        conversations.push(LiveConversation {
            conversation_id: row.try_get("conversation_id")?,
            is_external: row.try_get("is_external")?,
            message_count: row.try_get("message_count")?,
            is_group_chat: name.is_some() || participant_count > 2,
            participant_count,
            name,
        });
    }
    Ok(conversations)
}

/// Attachment mappings for a batch of message ids.
pub async fn fetch_file_mappings(
    pool: &PgPool,
    report: &ProbeReport,
    message_ids: &[String],
) -> Result<Vec<FileMapping>, SyncError> {
    if !report.chat_files || message_ids.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = message_ids.to_vec();
    let rows = sqlx::query(
        "SELECT fkidchatmessage::text AS message_id,
                filename AS internal_name,
                originalfilename AS public_name,
                fileinfo AS file_info
         FROM chatfile
         WHERE fkidchatmessage::text = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut mappings = Vec::with_capacity(rows.len());
    for row in rows {
        let internal: Option<String> = row.try_get("internal_name")?;
        let Some(internal_name) = internal.filter(|f| !f.trim().is_empty()) else {
            continue;
        };
        let public: Option<String> = row.try_get("public_name")?;
        // fileinfo is stored as text on some versions and json on others;
        // parse leniently and drop anything unreadable.
        let file_info = row
            .try_get::<Option<String>, _>("file_info")
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        mappings.push(FileMapping {
            message_id: row.try_get("message_id")?,
            public_name: public
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| internal_name.clone()),
            internal_name,
            file_info,
        });
    }
    Ok(mappings)
}

/// Chat display name: the public name if set, else the history-view generated
/// name, else a synthesis from the participant list.
pub fn derive_chat_name(meta: &ConversationMeta) -> Option<String> {
    if let Some(name) = meta.public_name.as_deref().map(str::trim)
        && !name.is_empty()
    {
        return Some(name.to_string());
    }
    if let Some(name) = meta.generated_name.as_deref().map(str::trim)
        && !name.is_empty()
    {
        return Some(name.to_string());
    }
    if meta.participants.is_empty() {
        return None;
    }
    Some(meta.participants.join(", "))
}

/// Group when a public name exists or more than two parties participate.
pub fn is_group_chat(meta: &ConversationMeta) -> bool {
    meta.public_name
        .as_deref()
        .map(str::trim)
        .is_some_and(|n| !n.is_empty())
        || meta.participants.len() > 2
}
