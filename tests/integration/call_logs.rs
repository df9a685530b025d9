use chrono::{TimeZone, Utc};
use pbx_archive_sync::models::{CallDirection, CallStatus};
use pbx_archive_sync::pbx::cdr::{
    derive_direction, derive_status, durations_from_times, parse_direction_text,
    parse_status_text,
};
use pbx_archive_sync::pbx::is_extension_number;

#[test]
fn test_extension_number_heuristic() {
    assert!(is_extension_number("104"));
    assert!(is_extension_number("9001"));
    assert!(is_extension_number(" 42 "));
    assert!(!is_extension_number("5"));
    assert!(!is_extension_number("15551234567"));
    assert!(!is_extension_number("10a"));
    assert!(!is_extension_number(""));
}

#[test]
fn test_direction_internal_when_both_extensions() {
    // Two internal endpoints outrank any inbound flag.
    assert_eq!(
        derive_direction(Some("104"), Some("105"), Some(true)),
        CallDirection::Internal
    );
}

#[test]
fn test_direction_honors_inbound_flag() {
    assert_eq!(
        derive_direction(Some("15551234567"), Some("104"), Some(true)),
        CallDirection::Inbound
    );
    assert_eq!(
        derive_direction(Some("104"), Some("15551234567"), Some(false)),
        CallDirection::Outbound
    );
}

#[test]
fn test_direction_inferred_from_endpoints() {
    assert_eq!(
        derive_direction(Some("104"), Some("15551234567"), None),
        CallDirection::Outbound
    );
    assert_eq!(
        derive_direction(Some("15551234567"), Some("104"), None),
        CallDirection::Inbound
    );
    // Neither side looks internal: default to inbound.
    assert_eq!(
        derive_direction(Some("15551234567"), Some("15559876543"), None),
        CallDirection::Inbound
    );
}

#[test]
fn test_status_derivation() {
    assert_eq!(derive_status(true, true), CallStatus::Answered);
    assert_eq!(derive_status(true, false), CallStatus::Answered);
    assert_eq!(derive_status(false, true), CallStatus::Missed);
    assert_eq!(derive_status(false, false), CallStatus::Failed);
}

#[test]
fn test_text_direction_parsing() {
    assert_eq!(parse_direction_text("Inbound"), Some(CallDirection::Inbound));
    assert_eq!(parse_direction_text(" out "), Some(CallDirection::Outbound));
    assert_eq!(parse_direction_text("internal"), Some(CallDirection::Internal));
    assert_eq!(parse_direction_text("sideways"), None);
}

#[test]
fn test_text_status_parsing() {
    assert_eq!(parse_status_text("ANSWERED"), Some(CallStatus::Answered));
    assert_eq!(parse_status_text("no_answer"), Some(CallStatus::Missed));
    assert_eq!(parse_status_text("busy"), Some(CallStatus::Failed));
    assert_eq!(parse_status_text("??"), None);
}

#[test]
fn test_durations_from_times() {
    let start = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
    let answer = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 8).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 31, 12, 3, 8).unwrap();

    let (ring, talk, total) = durations_from_times(Some(start), Some(answer), Some(end));
    assert_eq!(ring, Some(8.0));
    assert_eq!(talk, Some(180.0));
    assert_eq!(total, Some(188.0));
}

#[test]
fn test_durations_unanswered_call() {
    let start = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 30).unwrap();

    // No answer: ringing ran until the call ended.
    let (ring, talk, total) = durations_from_times(Some(start), None, Some(end));
    assert_eq!(ring, Some(30.0));
    assert_eq!(talk, None);
    assert_eq!(total, Some(30.0));
}

#[test]
fn test_durations_missing_times() {
    let (ring, talk, total) = durations_from_times(None, None, None);
    assert_eq!((ring, talk, total), (None, None, None));
}
