use crate::error::SyncError;
use crate::models::{Stage, StageResult};
use crate::pbx;
use crate::stages::{is_stage_fatal, StageContext};

/// Call-detail-records, watermarked by `started_at`. Queries whichever CDR
/// source the prober ranked highest and links recordings opportunistically —
/// a recording archived after its call log stays unlinked.
pub async fn run(ctx: &StageContext<'_>) -> Result<StageResult, SyncError> {
    let Some(source) = ctx.schema.call_log else {
        return Ok(StageResult::empty_with_note(
            "no call history source in PBX schema",
        ));
    };

    let since = ctx
        .archive
        .get_watermark(&ctx.tenant.id, Stage::CallLogs)
        .await?;
    let records =
        pbx::cdr::fetch_call_records(ctx.pbx, source, since, pbx::DEFAULT_BATCH_SIZE).await?;
    if records.is_empty() {
        return Ok(StageResult::empty_with_note(match since {
            Some(_) => "no new call records since last cursor",
            None => "call history is empty",
        }));
    }

    let mut result = StageResult::default();
    let mut halted = false;

    for record in &records {
        ctx.check_cancelled()?;

        let recording_id = if record.has_recording {
            ctx.archive
                .find_recording_for_call(
                    &ctx.tenant.id,
                    record.extension_number.as_deref(),
                    record.started_at,
                )
                .await?
        } else {
            None
        };

        match ctx
            .archive
            .upsert_call_log(&ctx.tenant.id, record, recording_id.as_deref())
            .await
        {
            Ok(crate::archive::Upsert::Inserted) => {
                result.synced += 1;
                if !halted && let Some(started) = record.started_at {
                    result.watermark = Some(started);
                }
            }
            Ok(crate::archive::Upsert::Skipped) => {
                result.skipped += 1;
                if !halted && let Some(started) = record.started_at {
                    result.watermark = Some(started);
                }
            }
            Err(e) if is_stage_fatal(&e) => return Err(e),
            Err(e) => {
                result.record_error(&record.source_id, e);
                halted = true;
            }
        }
    }
    Ok(result)
}
