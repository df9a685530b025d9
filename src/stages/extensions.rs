use crate::error::SyncError;
use crate::models::{NewExtension, StageResult};
use crate::pbx;
use crate::stages::{is_stage_fatal, StageContext};

/// Mirror the PBX extension directory into the archive. No media.
pub async fn run(ctx: &StageContext<'_>) -> Result<StageResult, SyncError> {
    if !ctx.schema.has_any_extension_source() {
        return Ok(StageResult::empty_with_note(
            "no extension source in PBX schema (users_view and dn both absent)",
        ));
    }

    let extensions = pbx::extensions::fetch_extensions(ctx.pbx, ctx.schema).await?;
    if extensions.is_empty() {
        return Ok(StageResult::empty_with_note("PBX reports no extensions"));
    }

    let mut result = StageResult::default();
    for ext in extensions {
        ctx.check_cancelled()?;
        let row = NewExtension {
            number: ext.number.clone(),
            first_name: ext.first_name,
            last_name: ext.last_name,
        };
        match ctx.archive.upsert_extension(&ctx.tenant.id, &row).await {
            Ok(()) => result.synced += 1,
            Err(e) if is_stage_fatal(&e) => return Err(e),
            Err(e) => result.record_error(ext.number, e),
        }
    }
    Ok(result)
}
