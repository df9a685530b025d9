use crate::common::test_tenant;
use pbx_archive_sync::registry::{
    db_config_for, paths_for, sftp_config_for, DEFAULT_CHAT_FILES_PATH, DEFAULT_RECORDINGS_PATH,
};

#[test]
fn test_sftp_config_complete_credentials() {
    let tenant = test_tenant();
    let cfg = sftp_config_for(&tenant).unwrap();
    assert_eq!(cfg.host, "pbx.acme.example");
    assert_eq!(cfg.port, 22);
    assert_eq!(cfg.username, "backup");
}

#[test]
fn test_sftp_config_missing_user_yields_none() {
    let mut tenant = test_tenant();
    tenant.ssh_username = None;
    assert!(sftp_config_for(&tenant).is_none());

    let mut tenant = test_tenant();
    tenant.ssh_password = Some("   ".to_string());
    assert!(sftp_config_for(&tenant).is_none());
}

#[test]
fn test_db_config_requires_db_password() {
    let mut tenant = test_tenant();
    tenant.db_password = None;
    assert!(sftp_config_for(&tenant).is_some());
    assert!(db_config_for(&tenant).is_none());
}

#[test]
fn test_db_config_requires_ssh_too() {
    let mut tenant = test_tenant();
    tenant.ssh_password = None;
    assert!(db_config_for(&tenant).is_none());
}

#[test]
fn test_nonstandard_ssh_port() {
    let mut tenant = test_tenant();
    tenant.ssh_port = 2222;
    assert_eq!(sftp_config_for(&tenant).unwrap().port, 2222);
}

#[test]
fn test_paths_default_to_3cx_layout() {
    let tenant = test_tenant();
    let paths = paths_for(&tenant);
    assert_eq!(paths.chat_files, DEFAULT_CHAT_FILES_PATH);
    assert_eq!(paths.recordings, DEFAULT_RECORDINGS_PATH);
}

#[test]
fn test_path_overrides_and_trailing_slash() {
    let mut tenant = test_tenant();
    tenant.recordings_path = Some("/srv/recordings/".to_string());
    tenant.faxes_path = Some("   ".to_string());
    let paths = paths_for(&tenant);
    assert_eq!(paths.recordings, "/srv/recordings");
    // Blank overrides fall back to the default.
    assert!(paths.faxes.starts_with("/var/lib/3cxpbx"));
}
