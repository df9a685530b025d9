use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::SyncError;
use crate::probe::ProbeReport;

/// One extension as read from the PBX directory.
#[derive(Debug, Clone)]
pub struct PbxExtension {
    pub source_id: String,
    pub number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

// Primary projection: the users view joined back to the users table so
// disabled accounts can be filtered out.
const USERS_VIEW_SELECT: &str = "SELECT u.iduser::text AS source_id,
            uv.dn AS extension,
            uv.firstname AS first_name,
            uv.lastname AS last_name
     FROM users_view uv
     JOIN users u ON u.iduser = uv.iduser
     WHERE u.enabled IS DISTINCT FROM FALSE
     ORDER BY uv.dn ASC";

// Fallback: the dn table filtered to voice-capable entries (type 0/1 are
// extensions and virtual extensions on every 3CX version seen so far).
const DN_FALLBACK_SELECT: &str = "SELECT iddn::text AS source_id,
            value AS extension,
            firstname AS first_name,
            lastname AS last_name
     FROM dn
     WHERE type IN (0, 1)
     ORDER BY value ASC";

/// Read the tenant's extension directory, preferring the users view.
pub async fn fetch_extensions(
    pool: &PgPool,
    report: &ProbeReport,
) -> Result<Vec<PbxExtension>, SyncError> {
    let sql = if report.users_view && report.users_table {
        USERS_VIEW_SELECT
    } else if report.dn_table {
        DN_FALLBACK_SELECT
    } else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(sql).fetch_all(pool).await?;
    let mut extensions = Vec::with_capacity(rows.len());
    for row in rows {
        let number: Option<String> = row.try_get("extension")?;
        let Some(number) = number.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
            continue;
        };
        extensions.push(PbxExtension {
            source_id: row.try_get("source_id")?,
            number,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
        });
    }
    Ok(extensions)
}
