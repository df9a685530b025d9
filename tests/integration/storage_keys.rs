use chrono::{TimeZone, Utc};
use pbx_archive_sync::storage::keys::{
    media_key, sanitize_basename, thumbnail_key, with_extension,
};
use pbx_archive_sync::storage::Category;

#[test]
fn test_media_key_layout() {
    let ts = Utc.with_ymd_and_hms(2024, 3, 7, 12, 30, 0).unwrap();
    let key = media_key("tenant-1", Category::ChatMedia, ts, "invoice.pdf");
    assert_eq!(key, "tenant-1/chat-media/2024/03/invoice.pdf");
}

#[test]
fn test_media_key_categories() {
    let ts = Utc.with_ymd_and_hms(2023, 11, 2, 0, 0, 0).unwrap();
    assert!(media_key("t", Category::Recordings, ts, "a.wav").contains("/recordings/"));
    assert!(media_key("t", Category::Voicemails, ts, "a.wav").contains("/voicemails/"));
    assert!(media_key("t", Category::Faxes, ts, "a.pdf").contains("/faxes/"));
    assert!(media_key("t", Category::Meetings, ts, "a.mp4").contains("/meetings/"));
}

#[test]
fn test_sanitize_replaces_reserved_characters() {
    assert_eq!(sanitize_basename("my file (1).pdf"), "my_file_1_.pdf");
    assert_eq!(sanitize_basename("a//b\\c.txt"), "c.txt");
    assert_eq!(sanitize_basename("résumé.doc"), "r_sum_.doc");
}

#[test]
fn test_sanitize_collapses_repeats() {
    // A run of reserved characters becomes one underscore, not several.
    assert_eq!(sanitize_basename("a   b.txt"), "a_b.txt");
    assert_eq!(sanitize_basename("a!!!b"), "a_b");
}

#[test]
fn test_sanitize_trims_and_defaults() {
    assert_eq!(sanitize_basename("...hidden"), "hidden");
    assert_eq!(sanitize_basename("???"), "file");
    assert_eq!(sanitize_basename(""), "file");
}

#[test]
fn test_sanitize_caps_length_keeping_extension() {
    let long = format!("{}.pdf", "x".repeat(300));
    let out = sanitize_basename(&long);
    assert!(out.len() <= 120);
    assert!(out.ends_with(".pdf"));
}

#[test]
fn test_with_extension_rewrites_only_the_final_segment() {
    assert_eq!(
        with_extension("t/chat-media/2024/03/photo.png", "jpg"),
        "t/chat-media/2024/03/photo.jpg"
    );
    assert_eq!(with_extension("noext", "bin"), "noext.bin");
}

#[test]
fn test_thumbnail_key_is_a_sibling() {
    assert_eq!(
        thumbnail_key("t/chat-media/2024/03/photo.jpg"),
        "t/chat-media/2024/03/thumb_photo.jpg"
    );
}
