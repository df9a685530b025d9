//! S3-compatible object store client. Plain HTTP via reqwest with AWS
//! Signature V4 — no SDK. Path-style addressing so MinIO and friends work
//! out of the box.

pub mod keys;
pub mod sign;
pub mod sniff;

pub use keys::Category;

use std::time::Duration;

use chrono::Utc;
use futures_util::{stream, TryStreamExt};
use reqwest::Method;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::S3Config;
use crate::error::SyncError;

/// Multipart part size.
const PART_SIZE: usize = 5 * 1024 * 1024;
/// Concurrent part uploads per file.
const MAX_PARTS_IN_FLIGHT: usize = 4;

#[derive(Clone)]
pub struct ObjectStore {
    client: reqwest::Client,
    endpoint: String,
    host: String,
    region: String,
    bucket: String,
    access_key: String,
    secret_key: String,
}

impl ObjectStore {
    pub fn new(cfg: &S3Config) -> Result<Self, SyncError> {
        let endpoint = cfg.endpoint.trim_end_matches('/').to_string();
        let host = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&endpoint)
            .split('/')
            .next()
            .unwrap_or("")
            .to_string();
        if host.is_empty() {
            return Err(SyncError::Config(format!(
                "invalid S3 endpoint: {}",
                cfg.endpoint
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            host,
            region: cfg.region.clone(),
            bucket: cfg.bucket.clone(),
            access_key: cfg.access_key.clone(),
            secret_key: cfg.secret_key.clone(),
        })
    }

    fn canonical_uri(&self, key: &str) -> String {
        format!("/{}/{}", self.bucket, sign::encode_key(key))
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, SyncError> {
        let canonical_uri = self.canonical_uri(key);
        let payload_hash = sign::sha256_hex(&body);
        let signed = sign::sign(&sign::SignContext {
            access_key: &self.access_key,
            secret_key: &self.secret_key,
            region: &self.region,
            host: &self.host,
            method: method.as_str(),
            canonical_uri: &canonical_uri,
            query,
            payload_hash: &payload_hash,
            now: Utc::now(),
        });

        let query_string = sign::canonical_query(query);
        let url = if query_string.is_empty() {
            format!("{}{}", self.endpoint, canonical_uri)
        } else {
            format!("{}{}?{}", self.endpoint, canonical_uri, query_string)
        };

        let mut request = self
            .client
            .request(method, &url)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &payload_hash)
            .header("authorization", &signed.authorization);
        if let Some(ct) = content_type {
            request = request.header("content-type", ct);
        }

        request
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::Storage(format!("request to {url} failed: {e}")))
    }

    async fn expect_success(
        resp: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(300).collect();
        Err(SyncError::Storage(format!("{what}: HTTP {status} {snippet}")))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, SyncError> {
        let resp = self.send(Method::HEAD, key, &[], Vec::new(), None).await?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(SyncError::Storage(format!("head {key}: HTTP {status}"))),
        }
    }

    pub async fn put_buffer(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), SyncError> {
        let resp = self
            .send(Method::PUT, key, &[], bytes, Some(content_type))
            .await?;
        Self::expect_success(resp, &format!("put {key}")).await?;
        Ok(())
    }

    /// Upload a local file, streaming it when it is too big to buffer.
    pub async fn put_file(
        &self,
        key: &str,
        local_path: &std::path::Path,
        content_type: &str,
    ) -> Result<u64, SyncError> {
        let meta = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| SyncError::Storage(format!("stat {}: {e}", local_path.display())))?;
        if meta.len() > PART_SIZE as u64 {
            let file = tokio::fs::File::open(local_path)
                .await
                .map_err(|e| SyncError::Storage(format!("open {}: {e}", local_path.display())))?;
            return self.put_stream(key, file, content_type).await;
        }
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| SyncError::Storage(format!("read {}: {e}", local_path.display())))?;
        let len = bytes.len() as u64;
        self.put_buffer(key, bytes, content_type).await?;
        Ok(len)
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        let resp = self.send(Method::GET, key, &[], Vec::new(), None).await?;
        let resp = Self::expect_success(resp, &format!("get {key}")).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SyncError::Storage(format!("get {key}: {e}")))?;
        Ok(bytes.to_vec())
    }

    pub async fn delete(&self, key: &str) -> Result<(), SyncError> {
        let resp = self
            .send(Method::DELETE, key, &[], Vec::new(), None)
            .await?;
        // Deleting a missing key is a success on every S3 implementation.
        if resp.status().is_success() || resp.status().as_u16() == 404 {
            return Ok(());
        }
        Err(SyncError::Storage(format!(
            "delete {key}: HTTP {}",
            resp.status()
        )))
    }

    /// All keys under a prefix, following continuation tokens.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }
            let resp = self.send(Method::GET, "", &query, Vec::new(), None).await?;
            let resp = Self::expect_success(resp, &format!("list {prefix}")).await?;
            let body = resp
                .text()
                .await
                .map_err(|e| SyncError::Storage(format!("list {prefix}: {e}")))?;

            keys.extend(extract_all_tags(&body, "Key"));
            match extract_tag(&body, "NextContinuationToken") {
                Some(token) if !token.is_empty() => continuation = Some(token),
                _ => break,
            }
        }
        Ok(keys)
    }

    /// Time-limited download URL for external consumers.
    pub fn signed_url(&self, key: &str, ttl: Duration) -> String {
        let canonical_uri = self.canonical_uri(key);
        let query = sign::presign_query(
            &self.access_key,
            &self.secret_key,
            &self.region,
            &self.host,
            "GET",
            &canonical_uri,
            ttl.as_secs(),
            Utc::now(),
        );
        format!("{}{}?{}", self.endpoint, canonical_uri, query)
    }

    /// Stream a reader into a multipart upload: 5 MiB parts, up to four in
    /// flight. Returns the byte count uploaded. The upload is aborted
    /// server-side on any failure so no orphaned parts accrue charges.
    pub async fn put_stream<R>(
        &self,
        key: &str,
        reader: R,
        content_type: &str,
    ) -> Result<u64, SyncError>
    where
        R: AsyncRead + Unpin,
    {
        let upload_id = self.initiate_multipart(key, content_type).await?;
        match self.upload_parts(key, &upload_id, reader).await {
            Ok(total) => Ok(total),
            Err(e) => {
                if let Err(abort_err) = self.abort_multipart(key, &upload_id).await {
                    tracing::warn!(key, error = %abort_err, "multipart abort failed");
                }
                Err(e)
            }
        }
    }

    async fn initiate_multipart(&self, key: &str, content_type: &str) -> Result<String, SyncError> {
        let query = vec![("uploads".to_string(), String::new())];
        let resp = self
            .send(Method::POST, key, &query, Vec::new(), Some(content_type))
            .await?;
        let resp = Self::expect_success(resp, &format!("initiate multipart {key}")).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        extract_tag(&body, "UploadId")
            .ok_or_else(|| SyncError::Storage(format!("no UploadId in response for {key}")))
    }

    async fn upload_parts<R>(
        &self,
        key: &str,
        upload_id: &str,
        reader: R,
    ) -> Result<u64, SyncError>
    where
        R: AsyncRead + Unpin,
    {
        // Chunk the reader into numbered parts, then keep up to four part
        // uploads in flight at once. Completion order does not matter; the
        // part numbers are sorted before the complete call.
        let parts = stream::try_unfold((reader, 1i32), |(mut reader, part_number)| async move {
            let chunk = read_chunk(&mut reader, PART_SIZE).await?;
            if chunk.is_empty() {
                Ok(None)
            } else {
                Ok(Some(((part_number, chunk), (reader, part_number + 1))))
            }
        });

        let mut etags: Vec<(i32, String, u64)> = parts
            .map_ok(|(part_number, chunk)| {
                let len = chunk.len() as u64;
                async move {
                    self.upload_part(key, upload_id, part_number, chunk)
                        .await
                        .map(|(n, etag)| (n, etag, len))
                }
            })
            .try_buffer_unordered(MAX_PARTS_IN_FLIGHT)
            .try_collect()
            .await?;

        if etags.is_empty() {
            // Zero-length file: multipart cannot complete with no parts.
            self.abort_multipart(key, upload_id).await?;
            self.put_buffer(key, Vec::new(), "application/octet-stream")
                .await?;
            return Ok(0);
        }

        let total: u64 = etags.iter().map(|(_, _, len)| *len).sum();
        etags.sort_by_key(|(n, _, _)| *n);
        let mut xml = String::from("<CompleteMultipartUpload>");
        for (n, etag, _) in &etags {
            xml.push_str(&format!(
                "<Part><PartNumber>{n}</PartNumber><ETag>{etag}</ETag></Part>"
            ));
        }
        xml.push_str("</CompleteMultipartUpload>");

        let query = vec![("uploadId".to_string(), upload_id.to_string())];
        let resp = self
            .send(
                Method::POST,
                key,
                &query,
                xml.into_bytes(),
                Some("application/xml"),
            )
            .await?;
        Self::expect_success(resp, &format!("complete multipart {key}")).await?;
        Ok(total)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        chunk: Vec<u8>,
    ) -> Result<(i32, String), SyncError> {
        let query = vec![
            ("partNumber".to_string(), part_number.to_string()),
            ("uploadId".to_string(), upload_id.to_string()),
        ];
        let resp = self.send(Method::PUT, key, &query, chunk, None).await?;
        let resp = Self::expect_success(resp, &format!("part {part_number} of {key}")).await?;
        let etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SyncError::Storage(format!("no ETag on part {part_number} of {key}")))?
            .to_string();
        Ok((part_number, etag))
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), SyncError> {
        let query = vec![("uploadId".to_string(), upload_id.to_string())];
        let resp = self
            .send(Method::DELETE, key, &query, Vec::new(), None)
            .await?;
        Self::expect_success(resp, &format!("abort multipart {key}")).await?;
        Ok(())
    }
}

/// Read up to `limit` bytes, returning a short (or empty) buffer at EOF.
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> Result<Vec<u8>, SyncError> {
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| SyncError::Storage(format!("stream read: {e}")))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// First occurrence of `<tag>...</tag>` in a small XML body. The S3 list and
/// multipart responses are flat enough that a scanner beats an XML crate.
fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].to_string())
}

fn extract_all_tags(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(idx) = body[cursor..].find(&open) {
        let start = cursor + idx + open.len();
        let Some(end_rel) = body[start..].find(&close) else {
            break;
        };
        out.push(body[start..start + end_rel].to_string());
        cursor = start + end_rel + close.len();
    }
    out
}
