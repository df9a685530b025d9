use crate::error::SyncError;
use crate::models::{CallDirection, NewFax, Stage, StageResult};
use crate::pbx;
use crate::sftp::SftpClient;
use crate::stages::{archive_remote_file, is_stage_fatal, StageContext, StoreOutcome};
use crate::storage::Category;

const FAX_EXTENSIONS: [&str; 3] = ["pdf", "tiff", "tif"];

/// Faxes. Uses the dedicated fax table when the install has one; otherwise
/// falls back to a recursive listing of the fax directory and recovers
/// direction/timestamp/remote-number from the filenames.
pub async fn run(ctx: &StageContext<'_>) -> Result<StageResult, SyncError> {
    let Some(sftp) = ctx.sftp else {
        return Ok(StageResult::empty_with_note(
            "faxes disabled: no SFTP session (missing SSH credentials)",
        ));
    };

    match ctx.schema.fax_table.clone() {
        Some(table) => run_from_table(ctx, sftp, &table).await,
        None => run_from_listing(ctx, sftp).await,
    }
}

async fn run_from_table(
    ctx: &StageContext<'_>,
    sftp: &SftpClient,
    table: &str,
) -> Result<StageResult, SyncError> {
    let since = ctx.archive.get_watermark(&ctx.tenant.id, Stage::Faxes).await?;
    let rows = pbx::faxes::fetch_faxes(ctx.pbx, table, since, pbx::DEFAULT_BATCH_SIZE).await?;
    if rows.is_empty() {
        return Ok(StageResult::empty_with_note(match since {
            Some(_) => "no new faxes since last cursor",
            None => "fax table is empty",
        }));
    }

    let mut result = StageResult::default();
    let mut halted = false;

    for fax in &rows {
        ctx.check_cancelled()?;
        let direction = fax.is_inbound.map(|inbound| {
            if inbound {
                CallDirection::Inbound
            } else {
                CallDirection::Outbound
            }
        });
        let sync = sync_fax_file(
            ctx,
            sftp,
            &format!("{}/{}", ctx.paths.faxes, fax.filename),
            &fax.source_id,
            &fax.filename,
            direction,
            fax.remote_number.clone(),
            fax.created_at,
        )
        .await;
        match sync {
            Ok(synced) => {
                if synced {
                    result.synced += 1;
                } else {
                    result.skipped += 1;
                }
                if !halted && let Some(created) = fax.created_at {
                    result.watermark = Some(created);
                }
            }
            Err(e) if is_stage_fatal(&e) => return Err(e),
            Err(e) => {
                result.record_error(&fax.source_id, e);
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
    let entries = sftp.list_recursive(&ctx.paths.faxes).await?;
    let faxes: Vec<_> = entries
        .into_iter()
        .filter(|e| {
            e.filename
                .rsplit_once('.')
                .is_some_and(|(_, ext)| FAX_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    if faxes.is_empty() {
        return Ok(StageResult::empty_with_note(
            "no fax table in PBX schema and fax directory is empty",
        ));
    }

    let mut result = StageResult::default();
    for entry in &faxes {
        ctx.check_cancelled()?;
        // The relative path is the only stable identity the file system has.
        let source_id = entry.relative_path.clone();
        match ctx.archive.fax_exists(&ctx.tenant.id, &source_id).await {
            Ok(true) => {
                result.skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => return Err(e),
        }

        let meta = pbx::faxes::parse_fax_entry(&entry.relative_path);
        let sync = sync_fax_file(
            ctx,
            sftp,
            &entry.absolute_path,
            &source_id,
            &entry.filename,
            meta.direction,
            meta.remote_number,
            meta.received_at,
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
async fn sync_fax_file(
    ctx: &StageContext<'_>,
    sftp: &SftpClient,
    remote_path: &str,
    source_id: &str,
    filename: &str,
    direction: Option<CallDirection>,
    remote_number: Option<String>,
    received_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<bool, SyncError> {
    if !sftp.exists(remote_path).await? {
        return Err(SyncError::Sftp(format!("fax file {remote_path} missing")));
    }

    let happened = received_at.unwrap_or_else(chrono::Utc::now);
    let stored = match archive_remote_file(ctx, sftp, remote_path, Category::Faxes, happened, filename)
        .await?
    {
        StoreOutcome::Stored(stored) => stored,
        StoreOutcome::Oversize(_) => return Ok(false),
    };

    let row = NewFax {
        source_id: source_id.to_string(),
        direction,
        remote_number,
        storage_key: stored.storage_key,
        mime_type: stored.mime_type,
        file_size: stored.file_size as i64,
        received_at,
    };
    match ctx.archive.upsert_fax(&ctx.tenant.id, &row).await? {
        crate::archive::Upsert::Inserted => Ok(true),
        crate::archive::Upsert::Skipped => Ok(false),
    }
}
