use crate::error::SyncError;
use crate::models::{CallDirection, NewRecording, Stage, StageResult};
use crate::pbx;
use crate::stages::{
    archive_remote_file, first_existing_path, is_stage_fatal, StageContext, StoreOutcome,
};
use crate::storage::Category;

/// Call recordings, watermarked by `start_time`.
///
/// The cursor trails the walk: it stops just before the first failed record
/// so that record is re-attempted next tick, while oversize skips advance it
/// (they will never shrink).
pub async fn run(ctx: &StageContext<'_>) -> Result<StageResult, SyncError> {
    if ctx.schema.recordings.is_none() {
        return Ok(StageResult::empty_with_note(
            "recordings table absent from PBX schema",
        ));
    }
    let Some(sftp) = ctx.sftp else {
        return Ok(StageResult::empty_with_note(
            "recordings disabled: no SFTP session (missing SSH credentials)",
        ));
    };

    let since = ctx
        .archive
        .get_watermark(&ctx.tenant.id, Stage::Recordings)
        .await?;
    let rows =
        pbx::recordings::fetch_recordings(ctx.pbx, ctx.schema, since, pbx::DEFAULT_BATCH_SIZE)
            .await?;
    if rows.is_empty() {
        return Ok(StageResult::empty_with_note(match since {
            Some(_) => "no new recordings since last cursor",
            None => "recordings table is empty",
        }));
    }

    let mut result = StageResult::default();
    let mut halted = false;

    for rec in &rows {
        ctx.check_cancelled()?;
        match sync_recording(ctx, sftp, rec).await {
            Ok(synced) => {
                if synced {
                    result.synced += 1;
                } else {
                    result.skipped += 1;
                }
                if !halted && let Some(start) = rec.start_time {
                    result.watermark = Some(start);
                }
            }
            Err(e) if is_stage_fatal(&e) => return Err(e),
            Err(e) => {
                result.record_error(&rec.source_id, e);
                halted = true;
            }
        }
    }
    Ok(result)
}

async fn sync_recording(
    ctx: &StageContext<'_>,
    sftp: &crate::sftp::SftpClient,
    rec: &pbx::recordings::PbxRecording,
) -> Result<bool, SyncError> {
    let candidates =
        pbx::recordings::recording_path_candidates(&rec.recording_url, &ctx.paths.recordings);
    let Some(remote_path) = first_existing_path(sftp, &candidates).await? else {
        return Err(SyncError::Sftp(format!(
            "no candidate path exists for {}",
            rec.recording_url
        )));
    };

    let happened = rec.start_time.unwrap_or_else(chrono::Utc::now);
    let basename = remote_path.rsplit('/').next().unwrap_or(&remote_path);
    let stored = match archive_remote_file(
        ctx,
        sftp,
        &remote_path,
        Category::Recordings,
        happened,
        basename,
    )
    .await?
    {
        StoreOutcome::Stored(stored) => stored,
        StoreOutcome::Oversize(_) => return Ok(false),
    };

    let row = NewRecording {
        source_id: rec.source_id.clone(),
        caller_number: rec.caller_number.clone(),
        caller_name: rec.caller_name.clone(),
        callee_number: rec.callee_number.clone(),
        callee_name: rec.callee_name.clone(),
        extension_number: rec.extension_number.clone(),
        direction: rec.is_inbound.map(|inbound| {
            if inbound {
                CallDirection::Inbound
            } else {
                CallDirection::Outbound
            }
        }),
        storage_key: stored.storage_key,
        mime_type: stored.mime_type,
        file_size: stored.file_size as i64,
        duration_secs: rec.duration_secs(),
        call_started_at: rec.start_time,
        call_ended_at: rec.end_time,
        recorded_at: rec.start_time,
    };
    match ctx.archive.upsert_recording(&ctx.tenant.id, &row).await? {
        crate::archive::Upsert::Inserted => Ok(true),
        crate::archive::Upsert::Skipped => Ok(false),
    }
}
