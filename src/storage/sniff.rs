//! Magic-byte MIME detection. Only the first 12 bytes are examined; the
//! result drives both the stored content type and the final key extension.

/// Sniff the container from leading magic bytes. Returns `(mime, extension)`.
pub fn sniff_mime(head: &[u8]) -> Option<(&'static str, &'static str)> {
    if head.len() >= 3 && head[0] == 0xFF && head[1] == 0xD8 && head[2] == 0xFF {
        return Some(("image/jpeg", "jpg"));
    }
    if head.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(("image/png", "png"));
    }
    if head.starts_with(b"GIF8") {
        return Some(("image/gif", "gif"));
    }
    // MP4/MOV family: the brand box sits at offset 4.
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return if &head[8..11] == b"qt " || &head[8..10] == b"qt" {
            Some(("video/quicktime", "mov"))
        } else if &head[8..12] == b"M4A " {
            Some(("audio/mp4", "m4a"))
        } else {
            Some(("video/mp4", "mp4"))
        };
    }
    if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WAVE" {
        return Some(("audio/wav", "wav"));
    }
    if head.starts_with(b"ID3") {
        return Some(("audio/mpeg", "mp3"));
    }
    // Raw MPEG audio frame sync: 11 set bits.
    if head.len() >= 2 && head[0] == 0xFF && (head[1] & 0xE0) == 0xE0 {
        return Some(("audio/mpeg", "mp3"));
    }
    if head.starts_with(b"%PDF") {
        return Some(("application/pdf", "pdf"));
    }
    if head.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || head.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
        return Some(("image/tiff", "tif"));
    }
    None
}

/// Extension-derived fallback table.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "ogg" | "opus" => "audio/ogg",
        "amr" => "audio/amr",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "vcf" => "text/vcard",
        _ => return None,
    })
}

fn extension_of(filename: &str) -> Option<&str> {
    let name = filename.rsplit('/').next()?;
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 4 => Some(ext),
        _ => None,
    }
}

/// Detection precedence: sniffed magic bytes, then the filename extension,
/// then octet-stream. Returns `(mime, extension)` — the extension is what
/// the storage key ends with.
pub fn detect(head: &[u8], filename: &str) -> (String, String) {
    if let Some((mime, ext)) = sniff_mime(head) {
        return (mime.to_string(), ext.to_string());
    }
    if let Some(ext) = extension_of(filename)
        && let Some(mime) = mime_for_extension(ext)
    {
        return (mime.to_string(), ext.to_ascii_lowercase());
    }
    let ext = extension_of(filename)
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string());
    ("application/octet-stream".to_string(), ext)
}
