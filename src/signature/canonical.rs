//! SigV4 canonicalisation: URI, query string, headers, and the canonical request
//!
//! Every helper here has to reproduce the client's construction byte for byte,
//! otherwise the signatures diverge.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Algorithm identifier for SigV4 (`X-Amz-Algorithm` and the Authorization header).
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload hash used by presigned URLs.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// `YYYYMMDDTHHMMSSZ`
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// `<date>/<region>/<service>/aws4_request`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub date: String,
    pub region: String,
    pub service: String,
}

impl CredentialScope {
    pub fn new(date: &str, region: &str, service: &str) -> Self {
        Self {
            date: date.to_string(),
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    /// Parse the part of a credential after the access key id.
    pub fn parse(scope: &str) -> Option<Self> {
        let mut parts = scope.split('/');
        let date = parts.next()?;
        let region = parts.next()?;
        let service = parts.next()?;
        if parts.next()? != "aws4_request" || parts.next().is_some() {
            return None;
        }
        if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self::new(date, region, service))
    }

    /// Split `AKID/date/region/service/aws4_request` into access key and scope.
    pub fn parse_credential(credential: &str) -> Option<(String, Self)> {
        let (access_key, scope) = credential.split_once('/')?;
        if access_key.is_empty() {
            return None;
        }
        Some((access_key.to_string(), Self::parse(scope)?))
    }

    pub fn as_string(&self) -> String {
        format!("{}/{}/{}/aws4_request", self.date, self.region, self.service)
    }
}

/// Everything that goes into a SigV4 signature for one request.
///
/// Derived per request and never persisted.
#[derive(Debug, Clone)]
pub struct SignedRequestContext {
    pub method: String,
    pub canonical_uri: String,
    pub canonical_query: String,
    /// `name:value\n` for every signed header, sorted by name
    pub canonical_headers: String,
    /// `;`-joined sorted header names
    pub signed_headers: String,
    pub payload_hash: String,
    /// `X-Amz-Date` value
    pub timestamp: String,
    pub scope: CredentialScope,
}

impl SignedRequestContext {
    pub fn canonical_request(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.canonical_uri,
            self.canonical_query,
            self.canonical_headers,
            self.signed_headers,
            self.payload_hash
        )
    }

    pub fn string_to_sign(&self) -> String {
        let hashed = hex::encode(Sha256::digest(self.canonical_request().as_bytes()));
        format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            self.timestamp,
            self.scope.as_string(),
            hashed
        )
    }
}

/// Percent-decode a URI component (e.g. `%2F` → `/`).
///
/// `+` is left alone: S3 clients encode spaces as `%20`.
pub fn percent_decode(input: &str) -> String {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                result.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&result).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// URI-encode a string per RFC 3986. Unreserved: `A-Z a-z 0-9 - _ . ~`
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Canonical URI for a raw request path: decode once, then re-encode each
/// segment so `%20` and a literal space canonicalise identically.
pub fn canonical_uri(raw_path: &str) -> String {
    if raw_path.is_empty() {
        return "/".to_string();
    }
    uri_encode(&percent_decode(raw_path), false)
}

/// Split a raw query string into decoded `(name, value)` pairs, in order.
pub fn parse_query(raw_query: &str) -> Vec<(String, String)> {
    raw_query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

/// First value for `name` in decoded query pairs.
pub fn query_param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Canonical query string from decoded pairs, omitting `exclude` if given.
///
/// Pairs are encoded then sorted by name, ties broken by encoded value.
pub fn canonical_query_string(pairs: &[(String, String)], exclude: Option<&str>) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .filter(|(k, _)| Some(k.as_str()) != exclude)
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Normalise a signed-headers list: lower-case, sorted, de-duplicated.
pub fn normalize_signed_headers(signed_headers: &str) -> Vec<String> {
    let mut names: Vec<String> = signed_headers
        .split(';')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Build the canonical headers block for `signed` (already normalised).
///
/// Returns the name of the first signed header missing from the request.
pub fn canonical_headers(headers: &HeaderMap, signed: &[String]) -> Result<String, String> {
    let mut block = String::new();
    for name in signed {
        let values: Vec<String> = headers
            .get_all(name.as_str())
            .iter()
            .map(|v| {
                String::from_utf8_lossy(v.as_bytes())
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        if values.is_empty() {
            return Err(name.clone());
        }
        block.push_str(name);
        block.push(':');
        block.push_str(&values.join(","));
        block.push('\n');
    }
    Ok(block)
}
