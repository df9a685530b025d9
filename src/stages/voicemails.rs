use crate::error::SyncError;
use crate::models::{NewVoicemail, Stage, StageResult};
use crate::pbx;
use crate::stages::{
    archive_remote_file, first_existing_path, is_stage_fatal, StageContext, StoreOutcome,
};
use crate::storage::Category;

/// Voicemails, watermarked by the parsed `created` timestamp. Rows whose
/// text timestamp cannot be parsed are record errors; the cursor never
/// advances past a failed record.
pub async fn run(ctx: &StageContext<'_>) -> Result<StageResult, SyncError> {
    if !ctx.schema.voicemail {
        return Ok(StageResult::empty_with_note(
            "s_voicemail table absent from PBX schema",
        ));
    }
    let Some(sftp) = ctx.sftp else {
        return Ok(StageResult::empty_with_note(
            "voicemails disabled: no SFTP session (missing SSH credentials)",
        ));
    };

    let since = ctx
        .archive
        .get_watermark(&ctx.tenant.id, Stage::Voicemails)
        .await?;
    let rows =
        pbx::voicemails::fetch_voicemails(ctx.pbx, ctx.schema, since, pbx::DEFAULT_BATCH_SIZE)
            .await?;
    if rows.is_empty() {
        return Ok(StageResult::empty_with_note(match since {
            Some(_) => "no new voicemails since last cursor",
            None => "voicemail table is empty",
        }));
    }

    let mut result = StageResult::default();
    let mut halted = false;

    for vm in &rows {
        ctx.check_cancelled()?;

        let Some(created_at) = vm.created_at else {
            result.record_error(
                &vm.source_id,
                format!("unparseable voicemail timestamp {:?}", vm.created_raw),
            );
            halted = true;
            continue;
        };

        match sync_voicemail(ctx, sftp, vm, created_at).await {
            Ok(synced) => {
                if synced {
                    result.synced += 1;
                } else {
                    result.skipped += 1;
                }
                if !halted {
                    result.watermark = Some(created_at);
                }
            }
            Err(e) if is_stage_fatal(&e) => return Err(e),
            Err(e) => {
                result.record_error(&vm.source_id, e);
                halted = true;
            }
        }
    }
    Ok(result)
}

async fn sync_voicemail(
    ctx: &StageContext<'_>,
    sftp: &crate::sftp::SftpClient,
    vm: &pbx::voicemails::PbxVoicemail,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Result<bool, SyncError> {
    let extension = vm.extension_number.as_deref().unwrap_or("");
    let candidates =
        pbx::voicemails::voicemail_path_candidates(&ctx.paths.voicemails, extension, &vm.wav_file);
    let Some(remote_path) = first_existing_path(sftp, &candidates).await? else {
        return Err(SyncError::Sftp(format!(
            "voicemail file {} not found for extension {extension}",
            vm.wav_file
        )));
    };

    let basename = remote_path.rsplit('/').next().unwrap_or(&remote_path);
    let stored = match archive_remote_file(
        ctx,
        sftp,
        &remote_path,
        Category::Voicemails,
        created_at,
        basename,
    )
    .await?
    {
        StoreOutcome::Stored(stored) => stored,
        StoreOutcome::Oversize(_) => return Ok(false),
    };

    let row = NewVoicemail {
        source_id: vm.source_id.clone(),
        extension_number: vm.extension_number.clone(),
        caller_number: vm.caller_number.clone(),
        caller_name: vm.caller_name.clone(),
        storage_key: stored.storage_key,
        mime_type: stored.mime_type,
        file_size: stored.file_size as i64,
        duration_secs: vm.duration_secs,
        received_at: Some(created_at),
    };
    match ctx.archive.upsert_voicemail(&ctx.tenant.id, &row).await? {
        crate::archive::Upsert::Inserted => Ok(true),
        crate::archive::Upsert::Skipped => Ok(false),
    }
}
