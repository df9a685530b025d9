use chrono::{Datelike, Timelike};
use pbx_archive_sync::pbx::voicemails::{
    format_vm_cursor, parse_vm_timestamp, voicemail_path_candidates,
};

#[test]
fn test_parse_vm_timestamp() {
    let ts = parse_vm_timestamp("20240131123045.123").unwrap();
    assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 1, 31));
    assert_eq!((ts.hour(), ts.minute(), ts.second()), (12, 30, 45));
}

#[test]
fn test_parse_vm_timestamp_without_fraction() {
    assert!(parse_vm_timestamp("20240131123045").is_some());
    assert!(parse_vm_timestamp(" 20240131123045 ").is_some());
}

#[test]
fn test_parse_vm_timestamp_rejects_garbage() {
    assert!(parse_vm_timestamp("").is_none());
    assert!(parse_vm_timestamp("2024-01-31").is_none());
    assert!(parse_vm_timestamp("202401311230").is_none());
    assert!(parse_vm_timestamp("20241331123045").is_none()); // month 13
    assert!(parse_vm_timestamp("notadate123456").is_none());
}

#[test]
fn test_cursor_round_trip_preserves_ordering() {
    // The cursor is compared lexicographically against the source's text
    // column; the fixed-width form must order chronologically.
    let early = parse_vm_timestamp("20240131123045").unwrap();
    let late = parse_vm_timestamp("20240201000000").unwrap();
    assert!(format_vm_cursor(early) < format_vm_cursor(late));
    assert_eq!(format_vm_cursor(early), "20240131123045");
}

#[test]
fn test_path_candidates_order() {
    let candidates = voicemail_path_candidates("/data/Voicemails", "104", "msg0001");
    assert_eq!(
        candidates,
        vec![
            "/data/Voicemails/Extensions/104/msg0001.wav".to_string(),
            "/data/Voicemails/Extensions/104/msg0001".to_string(),
            "/data/Voicemails/Data/104/msg0001.wav".to_string(),
            "/data/Voicemails/104/msg0001.wav".to_string(),
            "/data/Voicemails/msg0001.wav".to_string(),
        ]
    );
}

#[test]
fn test_path_candidates_with_existing_wav_suffix() {
    let candidates = voicemail_path_candidates("/data/Voicemails", "104", "msg0001.wav");
    // `{file}.wav` and `{file}` collapse when the name already has a suffix.
    assert_eq!(candidates[0], "/data/Voicemails/Extensions/104/msg0001.wav");
    let mut deduped = candidates.clone();
    deduped.dedup();
    assert_eq!(candidates, deduped);
}
