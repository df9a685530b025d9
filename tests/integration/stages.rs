use crate::common::test_tenant;
use pbx_archive_sync::models::{NewExtension, Stage, StageResult};

#[test]
fn test_stage_order_is_fixed() {
    let names: Vec<&str> = Stage::ALL.iter().map(|s| s.name()).collect();
    assert_eq!(
        names,
        vec![
            "extensions",
            "messages",
            "recordings",
            "voicemails",
            "faxes",
            "call_logs",
            "meetings"
        ]
    );
}

#[test]
fn test_stage_from_name_round_trips() {
    for stage in Stage::ALL {
        assert_eq!(Stage::from_name(stage.name()), Some(stage));
    }
    assert_eq!(Stage::from_name("thumbnails"), None);
}

#[test]
fn test_sftp_requirements() {
    assert!(!Stage::Extensions.needs_sftp());
    assert!(!Stage::CallLogs.needs_sftp());
    assert!(Stage::Messages.needs_sftp());
    assert!(Stage::Recordings.needs_sftp());
    assert!(Stage::Meetings.needs_sftp());
}

#[test]
fn test_backup_toggles_gate_stages() {
    let mut tenant = test_tenant();
    tenant.backup_chats = false;
    tenant.backup_meetings = true;
    assert!(!Stage::Messages.enabled_for(&tenant));
    assert!(Stage::Meetings.enabled_for(&tenant));
    assert!(Stage::Extensions.enabled_for(&tenant));
}

#[test]
fn test_result_summary_counts() {
    let mut result = StageResult::default();
    result.synced = 128;
    result.skipped = 4;
    result.record_error("rec-1", "file missing");
    result.record_error("rec-2", "file missing");
    assert_eq!(result.summary(), "Synced 128, skipped 4, 2 failed");
}

#[test]
fn test_result_note_overrides_summary() {
    let result = StageResult::empty_with_note("recordings table absent from PBX schema");
    assert_eq!(result.summary(), "recordings table absent from PBX schema");
    assert_eq!(result.synced, 0);
    assert!(result.errors.is_empty());
}

#[test]
fn test_accounting_identity() {
    // synced + skipped + errors always equals the records walked.
    let batch = 10u64;
    let mut result = StageResult::default();
    for i in 0..batch {
        match i % 3 {
            0 => result.synced += 1,
            1 => result.skipped += 1,
            _ => result.record_error(format!("r{i}"), "boom"),
        }
    }
    assert_eq!(result.synced + result.skipped + result.errors.len() as u64, batch);
}

#[test]
fn test_extension_display_name() {
    let ext = NewExtension {
        number: "104".to_string(),
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
    };
    assert_eq!(ext.display_name(), "Ada Lovelace");

    let bare = NewExtension {
        number: "104".to_string(),
        first_name: None,
        last_name: None,
    };
    assert_eq!(bare.display_name(), "104");

    let first_only = NewExtension {
        number: "104".to_string(),
        first_name: Some("Ada".to_string()),
        last_name: None,
    };
    assert_eq!(first_only.display_name(), "Ada");
}
