use chrono::{TimeZone, Utc};
use pbx_archive_sync::storage::sign::{
    canonical_query, encode_component, encode_key, presign_query, sha256_hex, sign, SignContext,
};

#[test]
fn test_encode_component_unreserved_set() {
    assert_eq!(encode_component("abc-123_~."), "abc-123_~.");
    assert_eq!(encode_component("a b"), "a%20b");
    assert_eq!(encode_component("a/b"), "a%2Fb");
}

#[test]
fn test_encode_key_keeps_slashes() {
    assert_eq!(
        encode_key("tenant/chat-media/2024/03/my file.pdf"),
        "tenant/chat-media/2024/03/my%20file.pdf"
    );
}

#[test]
fn test_canonical_query_sorted_and_encoded() {
    let params = vec![
        ("uploadId".to_string(), "abc/def".to_string()),
        ("partNumber".to_string(), "2".to_string()),
    ];
    assert_eq!(canonical_query(&params), "partNumber=2&uploadId=abc%2Fdef");
    assert_eq!(canonical_query(&[]), "");
}

#[test]
fn test_sha256_hex_of_empty_body() {
    // The well-known SHA-256 of the empty string.
    assert_eq!(
        sha256_hex(b""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn test_sign_produces_scoped_authorization() {
    let now = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
    let query = Vec::new();
    let signed = sign(&SignContext {
        access_key: "AKIAEXAMPLE",
        secret_key: "secret",
        region: "us-east-1",
        host: "minio.local:9000",
        method: "PUT",
        canonical_uri: "/bucket/tenant/key.wav",
        query: &query,
        payload_hash: &sha256_hex(b"hello"),
        now,
    });

    assert_eq!(signed.amz_date, "20240307T120000Z");
    assert!(signed
        .authorization
        .starts_with("AWS4-HMAC-SHA256 Credential=AKIAEXAMPLE/20240307/us-east-1/s3/aws4_request"));
    assert!(signed
        .authorization
        .contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
    let signature = signed.authorization.rsplit("Signature=").next().unwrap();
    assert_eq!(signature.len(), 64);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_sign_is_deterministic() {
    let now = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
    let query = vec![("uploads".to_string(), String::new())];
    let make = || {
        sign(&SignContext {
            access_key: "AK",
            secret_key: "SK",
            region: "eu-west-1",
            host: "s3.example",
            method: "POST",
            canonical_uri: "/b/k",
            query: &query,
            payload_hash: "UNSIGNED-PAYLOAD",
            now,
        })
        .authorization
    };
    assert_eq!(make(), make());
}

#[test]
fn test_presign_query_shape() {
    let now = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
    let query = presign_query(
        "AKIAEXAMPLE",
        "secret",
        "us-east-1",
        "s3.example",
        "GET",
        "/bucket/tenant/rec.wav",
        3600,
        now,
    );
    assert!(query.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
    assert!(query.contains("X-Amz-Expires=3600"));
    assert!(query.contains("X-Amz-SignedHeaders=host"));
    // Credential slashes are percent-encoded in the query.
    assert!(query.contains("X-Amz-Credential=AKIAEXAMPLE%2F20240307%2Fus-east-1%2Fs3%2Faws4_request"));
    assert!(query.contains("&X-Amz-Signature="));
}
