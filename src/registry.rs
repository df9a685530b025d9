use crate::error::SyncError;
use crate::models::Tenant;
use sqlx::postgres::PgPool;
use sqlx::Row;

/// Default 3CX data roots, used when the tenant row leaves a path null.
pub const DEFAULT_CHAT_FILES_PATH: &str = "/var/lib/3cxpbx/Instance1/Data/Fs";
pub const DEFAULT_RECORDINGS_PATH: &str = "/var/lib/3cxpbx/Instance1/Data/Recordings";
pub const DEFAULT_VOICEMAILS_PATH: &str = "/var/lib/3cxpbx/Instance1/Data/Voicemails";
pub const DEFAULT_FAXES_PATH: &str = "/var/lib/3cxpbx/Instance1/Data/Fax";
pub const DEFAULT_MEETINGS_PATH: &str = "/var/lib/3cxpbx/Instance1/Data/Wmrecords";

/// The 3CX database role the tunneled connection always uses.
pub const PBX_DB_USER: &str = "phonesystem";
/// Database name on the PBX side.
pub const PBX_DB_NAME: &str = "database_single";
/// Postgres port on the PBX loopback, reached through the tunnel.
pub const PBX_DB_PORT: u16 = 5432;

/// Connection parameters for the tenant's SFTP (and SSH tunnel) endpoint.
#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Connection parameters for the tenant's PBX database, reached through the
/// SSH tunnel. `host`/`port`/`username`/`password` here describe the SSH hop;
/// the database role is fixed.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub ssh: SftpConfig,
    pub db_password: String,
}

/// Resolved per-tenant media roots with defaults substituted.
#[derive(Debug, Clone)]
pub struct TenantPaths {
    pub chat_files: String,
    pub recordings: String,
    pub voicemails: String,
    pub faxes: String,
    pub meetings: String,
}

/// Load all active tenants from the archive. The core never mutates tenant
/// configuration; `last_sync_at` is the only column it writes.
pub async fn list_active_tenants(pool: &PgPool) -> Result<Vec<Tenant>, SyncError> {
    let rows = sqlx::query(
        "SELECT id, name, pbx_host, ssh_port, ssh_username, ssh_password, db_password,
                chat_files_path, recordings_path, voicemails_path, faxes_path, meetings_path,
                backup_extensions, backup_chats, backup_recordings, backup_voicemails,
                backup_faxes, backup_call_logs, backup_meetings,
                sync_interval_secs, active, last_sync_at
         FROM tenants
         WHERE active = TRUE
         ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut tenants = Vec::with_capacity(rows.len());
    for row in rows {
        tenants.push(tenant_from_row(&row)?);
    }
    Ok(tenants)
}

/// Load one tenant by id regardless of the active flag (used by the one-shot
/// CLI paths).
pub async fn get_tenant(pool: &PgPool, tenant_id: &str) -> Result<Option<Tenant>, SyncError> {
    let row = sqlx::query(
        "SELECT id, name, pbx_host, ssh_port, ssh_username, ssh_password, db_password,
                chat_files_path, recordings_path, voicemails_path, faxes_path, meetings_path,
                backup_extensions, backup_chats, backup_recordings, backup_voicemails,
                backup_faxes, backup_call_logs, backup_meetings,
                sync_interval_secs, active, last_sync_at
         FROM tenants WHERE id = $1",
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| tenant_from_row(&r)).transpose()
}

fn tenant_from_row(row: &sqlx::postgres::PgRow) -> Result<Tenant, SyncError> {
    Ok(Tenant {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        pbx_host: row.try_get("pbx_host")?,
        ssh_port: row.try_get::<Option<i32>, _>("ssh_port")?.unwrap_or(22),
        ssh_username: row.try_get("ssh_username")?,
        ssh_password: row.try_get("ssh_password")?,
        db_password: row.try_get("db_password")?,
        chat_files_path: row.try_get("chat_files_path")?,
        recordings_path: row.try_get("recordings_path")?,
        voicemails_path: row.try_get("voicemails_path")?,
        faxes_path: row.try_get("faxes_path")?,
        meetings_path: row.try_get("meetings_path")?,
        backup_extensions: row.try_get::<Option<bool>, _>("backup_extensions")?.unwrap_or(true),
        backup_chats: row.try_get::<Option<bool>, _>("backup_chats")?.unwrap_or(true),
        backup_recordings: row.try_get::<Option<bool>, _>("backup_recordings")?.unwrap_or(true),
        backup_voicemails: row.try_get::<Option<bool>, _>("backup_voicemails")?.unwrap_or(true),
        backup_faxes: row.try_get::<Option<bool>, _>("backup_faxes")?.unwrap_or(true),
        backup_call_logs: row.try_get::<Option<bool>, _>("backup_call_logs")?.unwrap_or(true),
        backup_meetings: row.try_get::<Option<bool>, _>("backup_meetings")?.unwrap_or(false),
        sync_interval_secs: row
            .try_get::<Option<i64>, _>("sync_interval_secs")?
            .unwrap_or(300),
        active: row.try_get("active")?,
        last_sync_at: row.try_get("last_sync_at")?,
    })
}

/// SFTP/SSH access for a tenant, or None when credentials are incomplete.
/// Callers must treat media-requiring stages as disabled in that case.
pub fn sftp_config_for(tenant: &Tenant) -> Option<SftpConfig> {
    let username = tenant.ssh_username.as_deref()?.trim();
    let password = tenant.ssh_password.as_deref()?.trim();
    if username.is_empty() || password.is_empty() || tenant.pbx_host.trim().is_empty() {
        return None;
    }
    Some(SftpConfig {
        host: tenant.pbx_host.clone(),
        port: u16::try_from(tenant.ssh_port).unwrap_or(22),
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Tunneled database access for a tenant, or None when either the SSH hop or
/// the database password is missing.
pub fn db_config_for(tenant: &Tenant) -> Option<DbConfig> {
    let ssh = sftp_config_for(tenant)?;
    let db_password = tenant.db_password.as_deref()?.trim();
    if db_password.is_empty() {
        return None;
    }
    Some(DbConfig {
        ssh,
        db_password: db_password.to_string(),
    })
}

/// Media roots with defaults substituted for null tenant columns.
pub fn paths_for(tenant: &Tenant) -> TenantPaths {
    fn pick(value: &Option<String>, default: &str) -> String {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v.trim_end_matches('/').to_string(),
            _ => default.to_string(),
        }
    }
    TenantPaths {
        chat_files: pick(&tenant.chat_files_path, DEFAULT_CHAT_FILES_PATH),
        recordings: pick(&tenant.recordings_path, DEFAULT_RECORDINGS_PATH),
        voicemails: pick(&tenant.voicemails_path, DEFAULT_VOICEMAILS_PATH),
        faxes: pick(&tenant.faxes_path, DEFAULT_FAXES_PATH),
        meetings: pick(&tenant.meetings_path, DEFAULT_MEETINGS_PATH),
    }
}
