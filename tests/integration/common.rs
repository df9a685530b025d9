use pbx_archive_sync::models::Tenant;

/// A fully-populated tenant row for tests. Tweak fields per test.
pub fn test_tenant() -> Tenant {
    Tenant {
        id: uuid::Uuid::new_v4().to_string(),
        name: "acme".to_string(),
        pbx_host: "pbx.acme.example".to_string(),
        ssh_port: 22,
        ssh_username: Some("backup".to_string()),
        ssh_password: Some("hunter2".to_string()),
        db_password: Some("dbpass".to_string()),
        chat_files_path: None,
        recordings_path: None,
        voicemails_path: None,
        faxes_path: None,
        meetings_path: None,
        backup_extensions: true,
        backup_chats: true,
        backup_recordings: true,
        backup_voicemails: true,
        backup_faxes: true,
        backup_call_logs: true,
        backup_meetings: false,
        sync_interval_secs: 300,
        active: true,
        last_sync_at: None,
    }
}
