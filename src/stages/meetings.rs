use crate::error::SyncError;
use crate::models::{NewMeetingRecording, Stage, StageResult};
use crate::pbx;
use crate::sftp::SftpClient;
use crate::stages::{archive_remote_file, is_stage_fatal, StageContext, StoreOutcome};
use crate::storage::Category;

const MEETING_EXTENSIONS: [&str; 4] = ["mp4", "webm", "mkv", "avi"];

/// Meeting recordings. Table-driven when the install has one; otherwise a
/// recursive listing of the meetings directory, with organizer extension and
/// start time parsed out of the filenames.
pub async fn run(ctx: &StageContext<'_>) -> Result<StageResult, SyncError> {
    let Some(sftp) = ctx.sftp else {
        return Ok(StageResult::empty_with_note(
            "meetings disabled: no SFTP session (missing SSH credentials)",
        ));
    };

    match ctx.schema.meeting_table.clone() {
        Some(table) => run_from_table(ctx, sftp, &table).await,
        None => run_from_listing(ctx, sftp).await,
    }
}

async fn run_from_table(
    ctx: &StageContext<'_>,
    sftp: &SftpClient,
    table: &str,
) -> Result<StageResult, SyncError> {
    let since = ctx
        .archive
        .get_watermark(&ctx.tenant.id, Stage::Meetings)
        .await?;
    let rows = pbx::meetings::fetch_meetings(ctx.pbx, table, since, pbx::DEFAULT_BATCH_SIZE).await?;
    if rows.is_empty() {
        return Ok(StageResult::empty_with_note(match since {
            Some(_) => "no new meeting recordings since last cursor",
            None => "meeting table is empty",
        }));
    }

    let mut result = StageResult::default();
    let mut halted = false;

    for meeting in &rows {
        ctx.check_cancelled()?;
        let remote_path = if meeting.recording_path.starts_with('/') {
            meeting.recording_path.clone()
        } else {
            format!("{}/{}", ctx.paths.meetings, meeting.recording_path)
        };
        let filename = remote_path
            .rsplit('/')
            .next()
            .unwrap_or(&meeting.recording_path)
            .to_string();
        let sync = sync_meeting_file(
            ctx,
            sftp,
            &remote_path,
            &meeting.source_id,
            &filename,
            meeting.organizer_extension.clone(),
            meeting.start_time,
            meeting.duration_secs,
        )
        .await;
        match sync {
            Ok(synced) => {
                if synced {
                    result.synced += 1;
                } else {
                    result.skipped += 1;
                }
                if !halted && let Some(start) = meeting.start_time {
                    result.watermark = Some(start);
                }
            }
            Err(e) if is_stage_fatal(&e) => return Err(e),
            Err(e) => {
                result.record_error(&meeting.source_id, e);
                halted = true;
            }
        }
    }
    Ok(result)
}

async fn run_from_listing(
    ctx: &StageContext<'_>,
    sftp: &SftpClient,
) -> Result<StageResult, SyncError> {
    let entries = sftp.list_recursive(&ctx.paths.meetings).await?;
    let meetings: Vec<_> = entries
        .into_iter()
        .filter(|e| {
            e.filename.rsplit_once('.').is_some_and(|(_, ext)| {
                MEETING_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
            })
        })
        .collect();
    if meetings.is_empty() {
        return Ok(StageResult::empty_with_note(
            "no meeting table in PBX schema and meetings directory is empty",
        ));
    }

    let mut result = StageResult::default();
    for entry in &meetings {
        ctx.check_cancelled()?;
        let source_id = entry.relative_path.clone();
        match ctx.archive.meeting_exists(&ctx.tenant.id, &source_id).await {
            Ok(true) => {
                result.skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => return Err(e),
        }

        let meta = pbx::meetings::parse_meeting_entry(&entry.filename);
        let sync = sync_meeting_file(
            ctx,
            sftp,
            &entry.absolute_path,
            &source_id,
            &entry.filename,
            meta.organizer_extension,
            meta.started_at,
            None,
        )
        .await;
        match sync {
            Ok(true) => result.synced += 1,
            Ok(false) => result.skipped += 1,
            Err(e) if is_stage_fatal(&e) => return Err(e),
            Err(e) => result.record_error(&source_id, e),
        }
    }
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
async fn sync_meeting_file(
    ctx: &StageContext<'_>,
    sftp: &SftpClient,
    remote_path: &str,
    source_id: &str,
    filename: &str,
    organizer_extension: Option<String>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    duration_secs: Option<f64>,
) -> Result<bool, SyncError> {
    if !sftp.exists(remote_path).await? {
        return Err(SyncError::Sftp(format!(
            "meeting recording {remote_path} missing"
        )));
    }

    let happened = started_at.unwrap_or_else(chrono::Utc::now);
    let stored = match archive_remote_file(
        ctx,
        sftp,
        remote_path,
        Category::Meetings,
        happened,
        filename,
    )
    .await?
    {
        StoreOutcome::Stored(stored) => stored,
        StoreOutcome::Oversize(_) => return Ok(false),
    };

    let row = NewMeetingRecording {
        source_id: source_id.to_string(),
        organizer_extension,
        storage_key: stored.storage_key,
        mime_type: stored.mime_type,
        file_size: stored.file_size as i64,
        duration_secs,
        started_at,
    };
    match ctx.archive.upsert_meeting(&ctx.tenant.id, &row).await? {
        crate::archive::Upsert::Inserted => Ok(true),
        crate::archive::Upsert::Skipped => Ok(false),
    }
}
