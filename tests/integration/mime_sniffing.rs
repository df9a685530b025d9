use pbx_archive_sync::storage::sniff::{detect, mime_for_extension, sniff_mime};

#[test]
fn test_sniff_jpeg() {
    let head = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01];
    assert_eq!(sniff_mime(&head), Some(("image/jpeg", "jpg")));
}

#[test]
fn test_sniff_png() {
    let head = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    assert_eq!(sniff_mime(&head), Some(("image/png", "png")));
}

#[test]
fn test_sniff_gif() {
    assert_eq!(sniff_mime(b"GIF89a\x00\x00\x00\x00\x00\x00"), Some(("image/gif", "gif")));
}

#[test]
fn test_sniff_mp4_and_quicktime() {
    let mut mp4 = Vec::from(&[0, 0, 0, 0x20][..]);
    mp4.extend_from_slice(b"ftypisom");
    assert_eq!(sniff_mime(&mp4), Some(("video/mp4", "mp4")));

    let mut mov = Vec::from(&[0, 0, 0, 0x14][..]);
    mov.extend_from_slice(b"ftypqt  ");
    assert_eq!(sniff_mime(&mov), Some(("video/quicktime", "mov")));
}

#[test]
fn test_sniff_wav() {
    let mut head = Vec::from(&b"RIFF"[..]);
    head.extend_from_slice(&[0x24, 0x08, 0x00, 0x00]);
    head.extend_from_slice(b"WAVE");
    assert_eq!(sniff_mime(&head), Some(("audio/wav", "wav")));
}

#[test]
fn test_sniff_mp3() {
    assert_eq!(sniff_mime(b"ID3\x04\x00\x00\x00\x00\x00\x00\x00\x00"), Some(("audio/mpeg", "mp3")));
    // Raw frame sync without an ID3 tag.
    assert_eq!(sniff_mime(&[0xFF, 0xFB, 0x90, 0x00]), Some(("audio/mpeg", "mp3")));
}

#[test]
fn test_sniff_pdf_and_tiff() {
    assert_eq!(sniff_mime(b"%PDF-1.7\n%\xE2\xE3"), Some(("application/pdf", "pdf")));
    assert_eq!(sniff_mime(&[0x49, 0x49, 0x2A, 0x00]), Some(("image/tiff", "tif")));
    assert_eq!(sniff_mime(&[0x4D, 0x4D, 0x00, 0x2A]), Some(("image/tiff", "tif")));
}

#[test]
fn test_sniff_beats_extension() {
    // A PDF mislabeled as .wav comes out as a PDF with a corrected extension.
    let (mime, ext) = detect(b"%PDF-1.4 something", "voicemail.wav");
    assert_eq!(mime, "application/pdf");
    assert_eq!(ext, "pdf");
}

#[test]
fn test_extension_fallback() {
    let (mime, ext) = detect(b"no magic here", "notes.txt");
    assert_eq!(mime, "text/plain");
    assert_eq!(ext, "txt");
}

#[test]
fn test_unknown_defaults_to_octet_stream() {
    let (mime, ext) = detect(&[0x00, 0x01, 0x02], "mystery.xyz12");
    assert_eq!(mime, "application/octet-stream");
    assert_eq!(ext, "bin");

    let (mime, ext) = detect(&[0x00], "data.dat");
    assert_eq!(mime, "application/octet-stream");
    assert_eq!(ext, "dat");
}

#[test]
fn test_extension_table_covers_media_types() {
    assert_eq!(mime_for_extension("JPEG"), Some("image/jpeg"));
    assert_eq!(mime_for_extension("tiff"), Some("image/tiff"));
    assert_eq!(mime_for_extension("opus"), Some("audio/ogg"));
    assert_eq!(mime_for_extension("nope"), None);
}
