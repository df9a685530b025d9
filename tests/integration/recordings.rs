use chrono::{TimeZone, Utc};
use pbx_archive_sync::pbx::recordings::{recording_path_candidates, PbxRecording};

fn recording(url: &str) -> PbxRecording {
    PbxRecording {
        source_id: "1".to_string(),
        recording_url: url.to_string(),
        caller_number: None,
        caller_name: None,
        callee_number: None,
        callee_name: None,
        extension_number: Some("104".to_string()),
        is_inbound: Some(true),
        start_time: None,
        end_time: None,
        transcription: None,
    }
}

#[test]
fn test_url_rerooted_at_extension_segment() {
    let candidates = recording_path_candidates(
        "https://pbx.acme.example/recordings/104/rec_104_20240131.wav",
        "/var/lib/3cxpbx/Instance1/Data/Recordings",
    );
    assert_eq!(
        candidates[0],
        "/var/lib/3cxpbx/Instance1/Data/Recordings/104/rec_104_20240131.wav"
    );
    // Flat layout fallback comes later in the list.
    assert!(candidates
        .contains(&"/var/lib/3cxpbx/Instance1/Data/Recordings/rec_104_20240131.wav".to_string()));
}

#[test]
fn test_url_without_extension_segment_falls_flat() {
    let candidates = recording_path_candidates(
        "http://host/files/recording.wav",
        "/data/Recordings",
    );
    assert_eq!(candidates[0], "/data/Recordings/recording.wav");
}

#[test]
fn test_raw_absolute_path_is_probed_as_is() {
    let candidates =
        recording_path_candidates("/var/lib/3cxpbx/Instance1/Data/Recordings/104/a.wav", "/data/Recordings");
    assert!(candidates.contains(&"/var/lib/3cxpbx/Instance1/Data/Recordings/104/a.wav".to_string()));
    assert_eq!(candidates[0], "/data/Recordings/104/a.wav");
}

#[test]
fn test_no_duplicate_candidates() {
    let candidates = recording_path_candidates("https://host/104/a.wav", "/base");
    let mut deduped = candidates.clone();
    deduped.dedup();
    assert_eq!(candidates, deduped);
}

#[test]
fn test_empty_url_yields_no_candidates() {
    assert!(recording_path_candidates("https://host", "/base").is_empty());
}

#[test]
fn test_duration_from_endpoints() {
    let mut rec = recording("https://host/104/a.wav");
    rec.start_time = Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    rec.end_time = Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 30).unwrap());
    assert_eq!(rec.duration_secs(), Some(150.0));
}

#[test]
fn test_duration_requires_both_endpoints() {
    let mut rec = recording("https://host/104/a.wav");
    rec.start_time = Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    assert_eq!(rec.duration_secs(), None);

    // Inverted endpoints are schema noise, not a negative duration.
    rec.end_time = Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
    assert_eq!(rec.duration_secs(), None);
}
