use std::collections::{HashMap, HashSet};

use crate::error::SyncError;
use crate::models::{NewConversation, NewMediaFile, NewMessage, Stage, StageResult};
use crate::pbx::{self, messages::FileMapping};
use crate::stages::{
    archive_remote_file, first_existing_path, is_stage_fatal, StageContext, StoreOutcome,
};
use crate::storage::Category;

/// Conversations, messages and chat media share one stage and one watermark
/// (`last_synced_message_at`).
///
/// Walk order matters: messages arrive sorted by `time_sent` so the cursor
/// only ever moves forward. The cursor is written per batch by default; with
/// `SYNC_WATERMARK_PER_RECORD` it advances after every record instead.
pub async fn run(ctx: &StageContext<'_>) -> Result<StageResult, SyncError> {
    if !ctx.schema.has_any_message_source() {
        return Ok(StageResult::empty_with_note(
            "no chat message source in PBX schema (active and history views both absent)",
        ));
    }

    let since = ctx.archive.get_watermark(&ctx.tenant.id, Stage::Messages).await?;
    let batch = pbx::DEFAULT_BATCH_SIZE;
    let msgs = pbx::messages::fetch_messages(ctx.pbx, ctx.schema, since, batch).await?;
    if msgs.is_empty() {
        return Ok(StageResult::empty_with_note(match since {
            Some(_) => "no new messages since last cursor",
            None => "chat source is empty",
        }));
    }

    // Conversation metadata for everything in this batch, upserted first so
    // the message rows have parents.
    let conversation_ids: Vec<String> = {
        let mut seen = HashSet::new();
        msgs.iter()
            .filter(|m| seen.insert(m.conversation_id.clone()))
            .map(|m| m.conversation_id.clone())
            .collect()
    };
    let metas = pbx::messages::fetch_conversation_meta(ctx.pbx, ctx.schema, &conversation_ids).await?;
    let meta_by_id: HashMap<&str, &pbx::messages::ConversationMeta> = metas
        .iter()
        .map(|m| (m.conversation_id.as_str(), m))
        .collect();

    let mut conv_archive_ids: HashMap<String, String> = HashMap::new();
    for source_id in &conversation_ids {
        ctx.check_cancelled()?;
        let conv = match meta_by_id.get(source_id.as_str()) {
            Some(meta) => NewConversation {
                source_id: source_id.clone(),
                name: pbx::messages::derive_chat_name(meta),
                is_external: meta.is_external,
                is_group_chat: pbx::messages::is_group_chat(meta),
                participant_count: meta.participants.len() as i32,
            },
            // A message can outlive its conversation metadata (purged chat);
            // a bare conversation row keeps the foreign keys satisfied.
            None => NewConversation {
                source_id: source_id.clone(),
                name: None,
                is_external: msgs
                    .iter()
                    .find(|m| &m.conversation_id == source_id)
                    .map(|m| m.is_external)
                    .unwrap_or(false),
                is_group_chat: false,
                participant_count: 0,
            },
        };
        let archive_id = ctx.archive.upsert_conversation(&ctx.tenant.id, &conv).await?;

        if let Some(meta) = meta_by_id.get(source_id.as_str()) {
            for participant in &meta.participants {
                ctx.archive
                    .upsert_participant(&ctx.tenant.id, &archive_id, participant, None)
                    .await?;
            }
        }
        conv_archive_ids.insert(source_id.clone(), archive_id);
    }

    let message_ids: Vec<String> = msgs.iter().map(|m| m.message_id.clone()).collect();
    let mappings = pbx::messages::fetch_file_mappings(ctx.pbx, ctx.schema, &message_ids).await?;
    let mut mappings_by_message: HashMap<&str, Vec<&FileMapping>> = HashMap::new();
    for mapping in &mappings {
        mappings_by_message
            .entry(mapping.message_id.as_str())
            .or_default()
            .push(mapping);
    }

    let mut result = StageResult::default();
    let mut touched_conversations: HashSet<String> = HashSet::new();

    for msg in &msgs {
        ctx.check_cancelled()?;
        let Some(conversation_id) = conv_archive_ids.get(&msg.conversation_id) else {
            result.record_error(&msg.message_id, "conversation upsert missing");
            continue;
        };

        let files = mappings_by_message
            .get(msg.message_id.as_str())
            .cloned()
            .unwrap_or_default();

        let row = NewMessage {
            source_id: msg.message_id.clone(),
            conversation_source_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id.clone(),
            sender_name: msg.sender_name.clone(),
            message_type: if files.is_empty() { "text" } else { "file" }.to_string(),
            body: msg.body.clone(),
            has_media: !files.is_empty(),
            media_count: files.len() as i32,
            sent_at: msg.time_sent,
            delivered_at: None,
            read_at: None,
        };

        let (message_archive_id, outcome) = match ctx
            .archive
            .upsert_message(&ctx.tenant.id, conversation_id, &row)
            .await
        {
            Ok(pair) => pair,
            Err(e) if is_stage_fatal(&e) => return Err(e),
            Err(e) => {
                result.record_error(&msg.message_id, e);
                continue;
            }
        };
        match outcome {
            crate::archive::Upsert::Inserted => result.synced += 1,
            crate::archive::Upsert::Skipped => result.skipped += 1,
        }
        touched_conversations.insert(conversation_id.clone());

        for mapping in files {
            if let Err(e) = sync_attachment(ctx, msg, &message_archive_id, conversation_id, mapping, &mut result).await {
                if is_stage_fatal(&e) {
                    return Err(e);
                }
                result.record_error(format!("{}:{}", msg.message_id, mapping.internal_name), e);
            }
        }

        if ctx.config.watermark_per_record {
            ctx.archive
                .advance_watermark(&ctx.tenant.id, Stage::Messages, msg.time_sent)
                .await?;
        }
    }

    for conversation_id in &touched_conversations {
        ctx.archive
            .update_conversation_stats(&ctx.tenant.id, conversation_id)
            .await?;
    }

    // Per-batch advance: failures in this batch are final; the cursor moves
    // to the newest message observed either way.
    result.watermark = msgs.iter().map(|m| m.time_sent).max();
    Ok(result)
}

/// Locate, transfer and record one attachment. The hashed internal filename
/// is probed at the chat-files root first, then under the configured
/// fallback subdirectories.
async fn sync_attachment(
    ctx: &StageContext<'_>,
    msg: &pbx::messages::PbxMessage,
    message_archive_id: &str,
    conversation_archive_id: &str,
    mapping: &FileMapping,
    result: &mut StageResult,
) -> Result<(), SyncError> {
    let Some(sftp) = ctx.sftp else {
        return Err(SyncError::Sftp("no sftp session for media transfer".to_string()));
    };

    let base = &ctx.paths.chat_files;
    let mut candidates = vec![format!("{base}/{}", mapping.internal_name)];
    for subdir in &ctx.config.chat_fallback_subdirs {
        candidates.push(format!("{base}/{subdir}/{}", mapping.internal_name));
    }

    let Some(remote_path) = first_existing_path(sftp, &candidates).await? else {
        return Err(SyncError::Sftp(format!(
            "attachment {} not found under {base}",
            mapping.internal_name
        )));
    };

    let stored = match archive_remote_file(
        ctx,
        sftp,
        &remote_path,
        Category::ChatMedia,
        msg.time_sent,
        &mapping.public_name,
    )
    .await?
    {
        StoreOutcome::Stored(stored) => stored,
        StoreOutcome::Oversize(_) => {
            result.skipped += 1;
            return Ok(());
        }
    };

    let media = NewMediaFile {
        message_source_id: Some(msg.message_id.clone()),
        conversation_source_id: Some(msg.conversation_id.clone()),
        filename: mapping.public_name.clone(),
        mime_type: stored.mime_type.clone(),
        file_size: stored.file_size as i64,
        storage_key: stored.storage_key.clone(),
        thumbnail_key: stored.thumbnail_key.clone(),
        width: stored.width,
        height: stored.height,
        duration_secs: None,
        metadata: mapping
            .file_info
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
    };
    ctx.archive
        .insert_media_file(
            &ctx.tenant.id,
            Some(message_archive_id),
            Some(conversation_archive_id),
            &media,
        )
        .await?;
    Ok(())
}
