//! Deterministic object key layout:
//! `{tenant}/{category}/{YYYY}/{MM}/{sanitized-basename}.{ext}`.

use chrono::{DateTime, Datelike, Utc};

/// Top-level media categories in the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    ChatMedia,
    Recordings,
    Voicemails,
    Faxes,
    Meetings,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ChatMedia => "chat-media",
            Category::Recordings => "recordings",
            Category::Voicemails => "voicemails",
            Category::Faxes => "faxes",
            Category::Meetings => "meetings",
        }
    }
}

const MAX_BASENAME_LEN: usize = 120;

/// Strip reserved characters out of a basename, collapse repeats, and cap
/// the length while keeping the extension intact.
pub fn sanitize_basename(name: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let mut out = String::with_capacity(name.len());
    let mut last_was_sub = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            out.push(c);
            last_was_sub = false;
        } else if !last_was_sub {
            out.push('_');
            last_was_sub = true;
        }
    }
    let out = out.trim_matches(|c| matches!(c, '.' | '_' | '-')).to_string();
    if out.is_empty() {
        return "file".to_string();
    }
    if out.len() <= MAX_BASENAME_LEN {
        return out;
    }

    // Truncate the stem, not the extension.
    match out.rsplit_once('.') {
        Some((stem, ext)) if ext.len() < 12 => {
            let keep = MAX_BASENAME_LEN.saturating_sub(ext.len() + 1).max(1);
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        _ => out.chars().take(MAX_BASENAME_LEN).collect(),
    }
}

/// Build the full storage key for a media file, dating the folder by when
/// the artifact happened on the PBX (not when it synced).
pub fn media_key(
    tenant_id: &str,
    category: Category,
    happened_at: DateTime<Utc>,
    basename: &str,
) -> String {
    format!(
        "{}/{}/{:04}/{:02}/{}",
        tenant_id,
        category.as_str(),
        happened_at.year(),
        happened_at.month(),
        sanitize_basename(basename)
    )
}

/// Rewrite a key's final extension after transcoding changed the container.
pub fn with_extension(key: &str, new_ext: &str) -> String {
    let (dir, name) = match key.rsplit_once('/') {
        Some((d, n)) => (Some(d), n),
        None => (None, key),
    };
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    match dir {
        Some(dir) => format!("{dir}/{stem}.{new_ext}"),
        None => format!("{stem}.{new_ext}"),
    }
}

/// Sibling key used for an image thumbnail.
pub fn thumbnail_key(key: &str) -> String {
    match key.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/thumb_{name}"),
        None => format!("thumb_{key}"),
    }
}
