//! Typed extractors over the tenant's PBX database. Every function takes the
//! tunneled pool plus the probe report and returns closed record shapes; the
//! version-specific projections never leak past this layer.

pub mod cdr;
pub mod extensions;
pub mod faxes;
pub mod meetings;
pub mod messages;
pub mod recordings;
pub mod voicemails;

/// Default batch size for incremental queries.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Heuristic for "this participant identifier is an internal extension":
/// all digits, 2 to 5 of them. Used for direction derivation and for linking
/// participants to archived extensions.
pub fn is_extension_number(value: &str) -> bool {
    let v = value.trim();
    (2..=5).contains(&v.len()) && v.bytes().all(|b| b.is_ascii_digit())
}
