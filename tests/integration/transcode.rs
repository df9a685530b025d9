use pbx_archive_sync::transcode::process;

#[test]
fn test_non_image_passes_through_unchanged() {
    let bytes = b"%PDF-1.4 tiny document".to_vec();
    let outcome = process(bytes.clone(), "invoice.pdf");
    assert_eq!(outcome.bytes, bytes);
    assert_eq!(outcome.mime, "application/pdf");
    assert_eq!(outcome.extension, "pdf");
    assert!(!outcome.was_compressed);
    assert_eq!(outcome.ratio(), 1.0);
    assert!(outcome.thumbnail_jpeg.is_none());
    assert_eq!(outcome.width, None);
}

#[test]
fn test_mislabeled_audio_gets_corrected_extension() {
    let mut bytes = b"RIFF".to_vec();
    bytes.extend_from_slice(&[0x24, 0x08, 0x00, 0x00]);
    bytes.extend_from_slice(b"WAVEfmt ");
    let outcome = process(bytes, "voicemail.dat");
    assert_eq!(outcome.mime, "audio/wav");
    assert_eq!(outcome.extension, "wav");
    assert!(!outcome.was_compressed);
}

#[test]
fn test_corrupt_image_passes_through() {
    // Claims to be a JPEG, decodes as garbage: the bytes survive untouched.
    let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0x02, 0x03];
    let outcome = process(bytes.clone(), "photo.jpg");
    assert_eq!(outcome.bytes, bytes);
    assert_eq!(outcome.mime, "image/jpeg");
    assert!(!outcome.was_compressed);
    assert!(outcome.thumbnail_jpeg.is_none());
}

#[test]
fn test_original_size_recorded() {
    let bytes = vec![0u8; 1024];
    let outcome = process(bytes, "blob.bin");
    assert_eq!(outcome.original_size, 1024);
    assert_eq!(outcome.new_size(), 1024);
}
