//! Media transcoding between download and upload. Images get dimension
//! extraction, an optional JPEG re-encode when it actually saves space, and
//! a thumbnail. Audio, video and documents pass through untouched — this is
//! the seam where a real codec would slot in.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType};

use crate::error::SyncError;
use crate::storage::sniff;

/// Re-encode only when the source image is bigger than this.
const RECODE_THRESHOLD_BYTES: usize = 512 * 1024;
/// ...and only keep the result when it saves at least 15%.
const RECODE_KEEP_RATIO: f64 = 0.85;
const RECODE_QUALITY: u8 = 80;
const THUMBNAIL_MAX_EDGE: u32 = 320;
const THUMBNAIL_QUALITY: u8 = 75;

/// What came out of the transcoder. `extension`/`mime` are final: the
/// storage key must be rewritten to match.
#[derive(Debug)]
pub struct TranscodeOutcome {
    pub bytes: Vec<u8>,
    pub extension: String,
    pub mime: String,
    pub was_compressed: bool,
    pub original_size: u64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub thumbnail_jpeg: Option<Vec<u8>>,
}

impl TranscodeOutcome {
    pub fn new_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.new_size() as f64 / self.original_size as f64
        }
    }

    fn passthrough(bytes: Vec<u8>, mime: String, extension: String) -> Self {
        Self {
            original_size: bytes.len() as u64,
            bytes,
            extension,
            mime,
            was_compressed: false,
            width: None,
            height: None,
            thumbnail_jpeg: None,
        }
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, SyncError> {
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| SyncError::Media(format!("jpeg encode: {e}")))?;
    Ok(out)
}

/// Synchronous transcode pass. Sniffs the real container first so a
/// mislabeled file comes out with a corrected extension and MIME even when
/// nothing is re-encoded.
pub fn process(bytes: Vec<u8>, filename: &str) -> TranscodeOutcome {
    let (mime, extension) = sniff::detect(&bytes, filename);

    if !matches!(mime.as_str(), "image/jpeg" | "image/png" | "image/gif") {
        return TranscodeOutcome::passthrough(bytes, mime, extension);
    }

    let img = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(filename, error = %e, "undecodable image, passing through");
            return TranscodeOutcome::passthrough(bytes, mime, extension);
        }
    };

    let mut outcome = TranscodeOutcome::passthrough(bytes, mime, extension);
    outcome.width = i32::try_from(img.width()).ok();
    outcome.height = i32::try_from(img.height()).ok();
    outcome.thumbnail_jpeg = encode_jpeg(&img.thumbnail(THUMBNAIL_MAX_EDGE, THUMBNAIL_MAX_EDGE), THUMBNAIL_QUALITY).ok();

    // GIFs stay as-is (re-encoding drops animation frames).
    if outcome.mime == "image/gif" {
        return outcome;
    }

    if outcome.bytes.len() > RECODE_THRESHOLD_BYTES
        && let Ok(recoded) = encode_jpeg(&img, RECODE_QUALITY)
        && (recoded.len() as f64) < outcome.bytes.len() as f64 * RECODE_KEEP_RATIO
    {
        outcome.bytes = recoded;
        outcome.extension = "jpg".to_string();
        outcome.mime = "image/jpeg".to_string();
        outcome.was_compressed = true;
    }

    outcome
}

/// Transcode on the blocking pool so image work never stalls the I/O loop.
pub async fn process_blocking(bytes: Vec<u8>, filename: String) -> TranscodeOutcome {
    match tokio::task::spawn_blocking(move || process(bytes, &filename)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // A panic in the decoder should not kill the stage; the caller
            // gets an empty passthrough and records the error.
            tracing::error!(error = %e, "transcode task panicked");
            TranscodeOutcome::passthrough(Vec::new(), "application/octet-stream".into(), "bin".into())
        }
    }
}
