//! AWS Signature Version 4 primitives and `Authorization` header parsing

use super::canonical::{SignedRequestContext, ALGORITHM};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Standard 4-step HMAC chain:
/// `HMAC(HMAC(HMAC(HMAC("AWS4"+secret, date), region), service), "aws4_request")`
pub fn derive_signing_key(secret_access_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_secret = format!("AWS4{}", secret_access_key);
    let k_date = hmac_sha256(k_secret.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Hex-encoded V4 signature of `ctx` under `secret_access_key`.
///
/// Pure: identical inputs always produce the same 64-character output.
pub fn calculate_signature_v4(secret_access_key: &str, ctx: &SignedRequestContext) -> String {
    let key = derive_signing_key(
        secret_access_key,
        &ctx.scope.date,
        &ctx.scope.region,
        &ctx.scope.service,
    );
    hex::encode(hmac_sha256(&key, ctx.string_to_sign().as_bytes()))
}

/// Parsed components of an `Authorization: AWS4-HMAC-SHA256 ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthHeader {
    pub access_key: String,
    /// `date/region/service/aws4_request`
    pub credential_scope: String,
    pub signed_headers: String,
    pub signature: String,
}

/// Parse the Authorization header value.
///
/// Format: `AWS4-HMAC-SHA256 Credential=AKID/20260101/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=abcdef...`
pub fn parse_auth_header(header: &str) -> Option<ParsedAuthHeader> {
    let parts = header.trim().strip_prefix(ALGORITHM)?.trim();

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in parts.split(',') {
        let part = part.trim();
        if let Some(val) = part.strip_prefix("Credential=") {
            credential = Some(val.trim().to_string());
        } else if let Some(val) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(val.trim().to_string());
        } else if let Some(val) = part.strip_prefix("Signature=") {
            signature = Some(val.trim().to_string());
        }
    }

    let credential = credential?;
    let (access_key, credential_scope) = credential.split_once('/')?;

    Some(ParsedAuthHeader {
        access_key: access_key.to_string(),
        credential_scope: credential_scope.to_string(),
        signed_headers: signed_headers?,
        signature: signature?,
    })
}
