//! AWS Signature V4 for the S3-compatible client. Header signing for normal
//! requests, query signing for presigned URLs.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // Hmac<Sha256> accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac key");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode one path segment or query component the way SigV4 wants
/// (RFC 3986 unreserved set, uppercase hex).
pub fn encode_component(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// Encode an object key for the canonical URI: segments encoded, slashes kept.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("/")
}

/// Sorted, encoded canonical query string. Also the literal query the request
/// must send — the two have to match byte for byte.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode_component(k), encode_component(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub struct SignContext<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub host: &'a str,
    pub method: &'a str,
    /// Already-encoded path, starting with `/`.
    pub canonical_uri: &'a str,
    /// Raw query pairs; encoded and sorted here.
    pub query: &'a [(String, String)],
    pub payload_hash: &'a str,
    pub now: DateTime<Utc>,
}

pub struct Signed {
    pub amz_date: String,
    pub authorization: String,
}

fn signing_key(secret_key: &str, date: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// Produce the `Authorization` header and `x-amz-date` value for a request
/// signed through headers.
pub fn sign(ctx: &SignContext) -> Signed {
    let amz_date = ctx.now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = ctx.now.format("%Y%m%d").to_string();
    let scope = format!("{date}/{}/s3/aws4_request", ctx.region);

    let canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        ctx.host, ctx.payload_hash, amz_date
    );
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        ctx.method,
        ctx.canonical_uri,
        canonical_query(ctx.query),
        canonical_headers,
        SIGNED_HEADERS,
        ctx.payload_hash
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );
    let signature = hex::encode(hmac_sha256(
        &signing_key(ctx.secret_key, &date, ctx.region),
        string_to_sign.as_bytes(),
    ));

    Signed {
        authorization: format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            ctx.access_key
        ),
        amz_date,
    }
}

/// Build a presigned URL query (signature in the query string, only `host`
/// signed, unsigned payload). Returns the final encoded query string.
pub fn presign_query(
    access_key: &str,
    secret_key: &str,
    region: &str,
    host: &str,
    method: &str,
    canonical_uri: &str,
    expires_secs: u64,
    now: DateTime<Utc>,
) -> String {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{date}/{region}/s3/aws4_request");

    let params: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{access_key}/{scope}"),
        ),
        ("X-Amz-Date".to_string(), amz_date.clone()),
        ("X-Amz-Expires".to_string(), expires_secs.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    let query = canonical_query(&params);

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{query}\nhost:{host}\n\nhost\n{UNSIGNED_PAYLOAD}"
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );
    let signature = hex::encode(hmac_sha256(
        &signing_key(secret_key, &date, region),
        string_to_sign.as_bytes(),
    ));

    format!("{query}&X-Amz-Signature={signature}")
}
