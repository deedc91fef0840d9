//! AWS Signature Version 4 request signing.
//!
//! Only header-based signing of JSON requests is supported; presigned URLs
//! and chunked payload signing are not needed by any caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// RFC 3986 unreserved characters are left as-is, everything else is encoded.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

/// A request reduced to the parts that participate in the signature.
///
/// `headers` keys must already be lowercase and must include `host` and
/// `x-amz-date`.
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub headers: &'a BTreeMap<String, String>,
    pub payload: &'a [u8],
}

/// Credential scope for one signature.
pub struct Scope<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

pub fn amz_date(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

fn short_date(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%d").to_string()
}

/// Percent-encode one path segment or query component.
pub fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Encode every segment of a raw path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    if path.is_empty() {
        return "/".into();
    }
    path.split('/').map(encode).collect::<Vec<_>>().join("/")
}

/// Canonical, sorted and encoded query string.
pub fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("hmac accepts keys of any length"));
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Returns the canonical request and the signed-headers list.
///
/// `req.path` is the path as sent on the wire (already segment-encoded);
/// non-S3 services expect it encoded a second time here.
pub fn canonical_request(req: &SignableRequest<'_>) -> (String, String) {
    let canonical_uri = encode_path(req.path);

    let canonical_headers: String = req
        .headers
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect();
    let signed_headers = req
        .headers
        .keys()
        .cloned()
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        canonical_uri,
        canonical_query(req.query),
        canonical_headers,
        signed_headers,
        sha256_hex(req.payload),
    );

    (canonical, signed_headers)
}

pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// Compute the `Authorization` header value for a request.
pub fn authorization(req: &SignableRequest<'_>, scope: &Scope<'_>) -> String {
    let date = short_date(&scope.time);
    let credential_scope = format!("{date}/{}/{}/aws4_request", scope.region, scope.service);

    let (canonical, signed_headers) = canonical_request(req);
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{credential_scope}\n{}",
        amz_date(&scope.time),
        sha256_hex(canonical.as_bytes()),
    );

    let key = signing_key(scope.secret_access_key, &date, scope.region, scope.service);
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        scope.access_key_id,
    )
}
