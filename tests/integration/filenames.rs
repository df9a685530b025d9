use chrono::{Datelike, Timelike};
use pbx_archive_sync::models::CallDirection;
use pbx_archive_sync::pbx::faxes::{parse_compact_timestamp, parse_fax_entry};
use pbx_archive_sync::pbx::meetings::parse_meeting_entry;

#[test]
fn test_compact_timestamp_forms() {
    let full = parse_compact_timestamp("20240131123045").unwrap();
    assert_eq!((full.hour(), full.minute(), full.second()), (12, 30, 45));

    let minutes = parse_compact_timestamp("20240131T1230").unwrap();
    assert_eq!((minutes.hour(), minutes.minute()), (12, 30));

    let date_only = parse_compact_timestamp("20240131").unwrap();
    assert_eq!((date_only.year(), date_only.month(), date_only.day()), (2024, 1, 31));

    assert!(parse_compact_timestamp("123").is_none());
    assert!(parse_compact_timestamp("hello").is_none());
}

#[test]
fn test_fax_filename_full_form() {
    let meta = parse_fax_entry("in_20240131123045_15551234567.pdf");
    assert_eq!(meta.direction, Some(CallDirection::Inbound));
    assert_eq!(meta.remote_number.as_deref(), Some("15551234567"));
    let ts = meta.received_at.unwrap();
    assert_eq!((ts.year(), ts.hour()), (2024, 12));
}

#[test]
fn test_fax_direction_from_parent_directory() {
    let meta = parse_fax_entry("Incoming/fax_20240131123045.tif");
    assert_eq!(meta.direction, Some(CallDirection::Inbound));

    let meta = parse_fax_entry("Outgoing/fax_20240131123045.tif");
    assert_eq!(meta.direction, Some(CallDirection::Outbound));
}

#[test]
fn test_fax_sent_keyword() {
    let meta = parse_fax_entry("sent_20240201090000_442071234567.pdf");
    assert_eq!(meta.direction, Some(CallDirection::Outbound));
    assert_eq!(meta.remote_number.as_deref(), Some("442071234567"));
}

#[test]
fn test_fax_bare_filename_has_no_metadata() {
    let meta = parse_fax_entry("scan.pdf");
    assert_eq!(meta.direction, None);
    assert_eq!(meta.received_at, None);
    assert_eq!(meta.remote_number, None);
}

#[test]
fn test_meeting_filename() {
    let meta = parse_meeting_entry("wm_104_20240131123045.mp4");
    assert_eq!(meta.organizer_extension.as_deref(), Some("104"));
    let ts = meta.started_at.unwrap();
    assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 1, 31));
}

#[test]
fn test_meeting_filename_extension_after_timestamp() {
    let meta = parse_meeting_entry("20240131123045-204.webm");
    assert_eq!(meta.organizer_extension.as_deref(), Some("204"));
    assert!(meta.started_at.is_some());
}

#[test]
fn test_meeting_filename_without_metadata() {
    let meta = parse_meeting_entry("recording.mp4");
    assert_eq!(meta.organizer_extension, None);
    assert_eq!(meta.started_at, None);
}
