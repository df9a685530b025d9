use std::collections::HashSet;

use pbx_archive_sync::probe::{CallLogSource, ProbeReport};

fn relations(names: &[&str]) -> HashSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn test_call_log_priority_order() {
    let report = ProbeReport::from_relations(
        &relations(&["cl", "callhistory3", "myphone_callhistory_v14", "cdr"]),
        &HashSet::new(),
    );
    assert_eq!(report.call_log, Some(CallLogSource::MyphoneV14));

    let report = ProbeReport::from_relations(&relations(&["callhistory3", "cl"]), &HashSet::new());
    assert_eq!(report.call_log, Some(CallLogSource::Cl));

    let report = ProbeReport::from_relations(&relations(&["call_history"]), &HashSet::new());
    assert_eq!(report.call_log, Some(CallLogSource::CallHistory));

    let report = ProbeReport::from_relations(&relations(&[]), &HashSet::new());
    assert_eq!(report.call_log, None);
}

#[test]
fn test_recording_columns_probed() {
    let mut columns = HashSet::new();
    columns.insert("start_time".to_string());
    columns.insert("recording_url".to_string());

    let report = ProbeReport::from_relations(&relations(&["recordings"]), &columns);
    let cols = report.recordings.unwrap();
    assert!(cols.has_start_time);
    assert!(!cols.has_end_time);
    assert!(!cols.has_transcription);
}

#[test]
fn test_recordings_absent() {
    let report = ProbeReport::from_relations(&relations(&["cl"]), &HashSet::new());
    assert!(report.recordings.is_none());
}

#[test]
fn test_message_sources() {
    let report = ProbeReport::from_relations(
        &relations(&["chatmessagehistory_view", "chathistory_view"]),
        &HashSet::new(),
    );
    assert!(report.has_any_message_source());
    assert!(report.history_messages);
    assert!(!report.active_messages);

    let report = ProbeReport::from_relations(&relations(&["chat", "chatmessage"]), &HashSet::new());
    assert!(report.has_any_message_source());

    let report = ProbeReport::from_relations(&relations(&["dn"]), &HashSet::new());
    assert!(!report.has_any_message_source());
}

#[test]
fn test_extension_sources() {
    let report =
        ProbeReport::from_relations(&relations(&["users_view", "users"]), &HashSet::new());
    assert!(report.has_any_extension_source());

    // The view alone is not enough; the fallback needs dn.
    let report = ProbeReport::from_relations(&relations(&["users_view"]), &HashSet::new());
    assert!(!report.has_any_extension_source());

    let report = ProbeReport::from_relations(&relations(&["dn"]), &HashSet::new());
    assert!(report.has_any_extension_source());
}

#[test]
fn test_fax_and_meeting_candidates() {
    let report = ProbeReport::from_relations(&relations(&["faxmessages", "fax"]), &HashSet::new());
    assert_eq!(report.fax_table.as_deref(), Some("faxmessages"));

    let report = ProbeReport::from_relations(&relations(&["webmeeting"]), &HashSet::new());
    assert_eq!(report.meeting_table.as_deref(), Some("webmeeting"));

    let report = ProbeReport::from_relations(&relations(&[]), &HashSet::new());
    assert!(report.fax_table.is_none());
    assert!(report.meeting_table.is_none());
}

#[test]
fn test_describe_names_the_selected_source() {
    let report = ProbeReport::from_relations(&relations(&["cl", "s_voicemail"]), &HashSet::new());
    let lines = report.describe().join("\n");
    assert!(lines.contains("call log source: cl"));
    assert!(lines.contains("voicemail table: present"));
}
