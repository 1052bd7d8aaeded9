//! Amazon S3 archive backend.
//!
//! Puts, lists, and downloads archived uploads using the S3 REST API with
//! AWS Signature V4 authentication. Listing follows `ListObjectsV2`
//! continuation tokens, so large prefixes are handled.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for AWS signing, with no
//! C library dependencies like `aws-lc-sys`.
//!
//! # Configuration
//!
//! ```toml
//! [archive]
//! backend = "s3"
//! bucket = "retail-uploads"
//! region = "eu-west-2"
//! key_prefix = "weekly/stock_data_"
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style
//! ```
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables on every request:
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::archive::ArchiveStore;
use crate::config::ArchiveConfig;
use crate::error::ArchiveError;

type HmacSha256 = Hmac<Sha256>;

/// An S3 bucket used as the upload archive.
pub struct S3Archive {
    bucket: String,
    region: String,
    /// Custom endpoint (MinIO, LocalStack). Switches to path-style URLs.
    endpoint_url: Option<String>,
    client: reqwest::Client,
}

impl S3Archive {
    pub fn new(bucket: String, region: String, endpoint_url: Option<String>) -> Self {
        Self {
            bucket,
            region,
            endpoint_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ArchiveConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("archive.bucket must be set when backend is 's3'")?;
        let region = config
            .region
            .clone()
            .context("archive.region must be set when backend is 's3'")?;
        Ok(Self::new(bucket, region, config.endpoint_url.clone()))
    }

    /// `(scheme, host, base path)` for requests against this bucket.
    ///
    /// Virtual-hosted style on AWS (`<bucket>.s3.<region>.amazonaws.com`),
    /// path-style (`<endpoint>/<bucket>`) with a custom endpoint.
    fn endpoint(&self) -> (&'static str, String, String) {
        match self.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint_host(endpoint).to_string();
                (scheme, host, format!("/{}", uri_encode(&self.bucket)))
            }
            None => (
                "https",
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                String::new(),
            ),
        }
    }

    fn object_uri(&self, key: &str) -> String {
        let (_, _, base) = self.endpoint();
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("{}/{}", base, encoded_key)
    }

    fn bucket_uri(&self) -> String {
        let (_, _, base) = self.endpoint();
        if base.is_empty() {
            "/".to_string()
        } else {
            base
        }
    }

    /// Send a signed request and return the successful response.
    async fn send(
        &self,
        method: reqwest::Method,
        canonical_uri: &str,
        canonical_query: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, ArchiveError> {
        let creds = AwsCredentials::from_env()?;
        let (scheme, host, _) = self.endpoint();
        let payload_hash = hex_sha256(body.as_deref().unwrap_or(b""));

        let headers = sign_request(
            &creds,
            &self.region,
            method.as_str(),
            &host,
            canonical_uri,
            canonical_query,
            &payload_hash,
            Utc::now(),
        );

        let mut url = format!("{}://{}{}", scheme, host, canonical_uri);
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(canonical_query);
        }

        let mut req_builder = self.client.request(method.clone(), &url);
        for (name, value) in &headers {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }
        if let Some(bytes) = body {
            req_builder = req_builder.body(bytes);
        }

        let resp = req_builder.send().await.map_err(|e| {
            ArchiveError::Request(format!("{} s3://{}: {}", method, self.bucket, e))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ArchiveError::Request(format!(
                "S3 {} {} failed (HTTP {}): {}",
                method,
                canonical_uri,
                status,
                text.chars().take(500).collect::<String>()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ArchiveStore for S3Archive {
    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let uri = self.object_uri(key);
        self.send(reqwest::Method::PUT, &uri, "", Some(bytes.to_vec()))
            .await?;
        Ok(())
    }

    /// Uses `ListObjectsV2` with `max-keys=1000` per page, following
    /// `NextContinuationToken` until the listing is complete.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArchiveError> {
        let uri = self.bucket_uri();
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query_params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !prefix.is_empty() {
                query_params.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(ref token) = continuation_token {
                query_params.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self
                .send(
                    reqwest::Method::GET,
                    &uri,
                    &canonical_query(query_params),
                    None,
                )
                .await?;
            let xml_body = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml_body);
            keys.extend(batch);

            match (is_truncated, next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ArchiveError> {
        let uri = self.object_uri(key);
        let resp = self.send(reqwest::Method::GET, &uri, "", None).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

/// `host[:port]` of an endpoint URL, without scheme or path.
fn endpoint_host(endpoint: &str) -> &str {
    let rest = endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    rest.split('/').next().unwrap_or(rest)
}

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self, ArchiveError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            ArchiveError::Credentials("AWS_ACCESS_KEY_ID environment variable not set".into())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            ArchiveError::Credentials("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ AWS SigV4 Helpers ============

/// Sorted, URI-encoded query string.
fn canonical_query(mut params: Vec<(String, String)>) -> String {
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Headers to attach to a request, including `Authorization`.
#[allow(clippy::too_many_arguments)]
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    method: &str,
    host: &str,
    canonical_uri: &str,
    canonical_query: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    // reqwest sets Host itself
    let mut out: Vec<(String, String)> = headers.into_iter().filter(|(k, _)| k != "host").collect();
    out.push(("authorization".to_string(), authorization));
    out
}

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing (minimal) ============

/// Keys from a `ListObjectsV2` response, plus the truncation flag and next
/// continuation token.
fn parse_list_objects_response(xml: &str) -> (Vec<String>, bool, Option<String>) {
    let mut keys = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            let key = unescape_xml(&key);
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key);
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    (keys, is_truncated, next_token)
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn signing_key_matches_aws_reference_vector() {
        // From the AWS SigV4 documentation ("deriving the signing key").
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn uri_encode_escapes_reserved_bytes() {
        assert_eq!(uri_encode("stock_data_2024.xlsx"), "stock_data_2024.xlsx");
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
        assert_eq!(uri_encode("£"), "%C2%A3");
    }

    #[test]
    fn canonical_query_is_sorted_and_encoded() {
        let q = canonical_query(vec![
            ("prefix".to_string(), "weekly/stock data_".to_string()),
            ("list-type".to_string(), "2".to_string()),
        ]);
        assert_eq!(q, "list-type=2&prefix=weekly%2Fstock%20data_");
    }

    #[test]
    fn aws_urls_are_virtual_hosted_and_custom_endpoints_path_style() {
        let aws = S3Archive::new("uploads".into(), "eu-west-2".into(), None);
        let (scheme, host, _) = aws.endpoint();
        assert_eq!(scheme, "https");
        assert_eq!(host, "uploads.s3.eu-west-2.amazonaws.com");
        assert_eq!(aws.bucket_uri(), "/");
        assert_eq!(
            aws.object_uri("weekly/stock_data_20240101_000000.xlsx"),
            "/weekly/stock_data_20240101_000000.xlsx"
        );

        let minio = S3Archive::new(
            "uploads".into(),
            "us-east-1".into(),
            Some("http://localhost:9000/".into()),
        );
        let (scheme, host, _) = minio.endpoint();
        assert_eq!(scheme, "http");
        assert_eq!(host, "localhost:9000");
        assert_eq!(minio.bucket_uri(), "/uploads");
        assert_eq!(minio.object_uri("a b.xlsx"), "/uploads/a%20b.xlsx");
    }

    #[test]
    fn endpoint_path_is_not_part_of_the_signed_host() {
        assert_eq!(endpoint_host("http://minio.local:9000/minio/"), "minio.local:9000");
        assert_eq!(endpoint_host("https://s3.example.com"), "s3.example.com");

        let archive = S3Archive::new(
            "uploads".into(),
            "us-east-1".into(),
            Some("http://minio.local:9000/minio".into()),
        );
        let (_, host, base) = archive.endpoint();
        assert_eq!(host, "minio.local:9000");
        assert_eq!(base, "/uploads");
    }

    #[test]
    fn signed_headers_carry_scope_and_token() {
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("token".to_string()),
        };
        let now = Utc.with_ymd_and_hms(2024, 10, 14, 9, 15, 0).unwrap();
        let headers = sign_request(
            &creds,
            "eu-west-2",
            "PUT",
            "uploads.s3.eu-west-2.amazonaws.com",
            "/stock_data_20241014_091500.xlsx",
            "",
            &hex_sha256(b"body"),
            now,
        );
        let get = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("x-amz-date"), "20241014T091500Z");
        assert_eq!(get("x-amz-security-token"), "token");
        let auth = get("authorization");
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20241014/eu-west-2/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token, Signature="
        ));
        assert!(headers.iter().all(|(k, _)| k != "host"));
    }

    #[test]
    fn list_response_parsing_skips_folders_and_unescapes_keys() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc==</NextContinuationToken>
  <Contents><Key>weekly/</Key><Size>0</Size></Contents>
  <Contents><Key>weekly/stock_data_20240101_000000.xlsx</Key><Size>10</Size></Contents>
  <Contents><Key>weekly/R&amp;D.xlsx</Key><Size>10</Size></Contents>
</ListBucketResult>"#;
        let (keys, truncated, token) = parse_list_objects_response(xml);
        assert_eq!(
            keys,
            vec!["weekly/stock_data_20240101_000000.xlsx", "weekly/R&D.xlsx"]
        );
        assert!(truncated);
        assert_eq!(token.as_deref(), Some("abc=="));
    }
}
