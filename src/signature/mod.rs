//! Request signing and verification (AWS Signature V2 and V4)
//!
//! The [`SignatureEngine`] mints presigned V4 URLs and authenticates inbound
//! requests, either from an `Authorization: AWS4-HMAC-SHA256` header or from
//! presigned query parameters (V4 or legacy V2).

pub mod canonical;
pub mod sigv2;
pub mod sigv4;

use crate::context::{AuthMethod, Principal};
use crate::identity::{IdentityError, IdentityProvider};
use axum::http::HeaderMap;
use canonical::{
    canonical_headers, canonical_query_string, canonical_uri, normalize_signed_headers,
    parse_query, query_param, uri_encode, CredentialScope, SignedRequestContext, ALGORITHM,
    AMZ_DATE_FORMAT, UNSIGNED_PAYLOAD,
};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

pub use sigv2::calculate_signature_v2;
pub use sigv4::calculate_signature_v4;

pub const PARAM_ALGORITHM: &str = "X-Amz-Algorithm";
pub const PARAM_CREDENTIAL: &str = "X-Amz-Credential";
pub const PARAM_DATE: &str = "X-Amz-Date";
pub const PARAM_EXPIRES: &str = "X-Amz-Expires";
pub const PARAM_SIGNED_HEADERS: &str = "X-Amz-SignedHeaders";
pub const PARAM_SIGNATURE: &str = "X-Amz-Signature";

/// Service name in every credential scope this server signs or accepts.
pub const SERVICE: &str = "s3";

/// Presigned URLs may live at most 7 days.
pub const MAX_PRESIGN_EXPIRY: Duration = crate::config::MAX_PRESIGN_EXPIRY;

/// Header-signed requests must be within this many seconds of the server clock.
pub const MAX_CLOCK_SKEW_SECS: i64 = 15 * 60;

/// Signature verification and generation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("not a presigned URL request")]
    NotPresigned,

    #[error("missing required presigned URL parameters")]
    MissingPresignParams,

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed credential")]
    MalformedCredential,

    #[error("invalid request date: {0}")]
    InvalidDate(String),

    #[error("invalid expiration: {0}")]
    InvalidExpires(String),

    #[error("presigned URL expiration must not exceed 7 days")]
    ExpirationTooLong,

    #[error("request has expired")]
    Expired,

    #[error("request time too skewed")]
    RequestTimeTooSkewed,

    #[error("access key not found")]
    AccessKeyNotFound,

    #[error("access key is inactive")]
    AccessKeyInactive,

    #[error("signature does not match")]
    SignatureMismatch,

    #[error("signed header missing from request: {0}")]
    MissingHeader(String),

    #[error("invalid Authorization header")]
    InvalidAuthorizationHeader,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<IdentityError> for SignatureError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::AccessKeyInactive => SignatureError::AccessKeyInactive,
            _ => SignatureError::AccessKeyNotFound,
        }
    }
}

impl SignatureError {
    /// Short label for the auth-failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            SignatureError::Expired => "expired",
            SignatureError::RequestTimeTooSkewed => "skewed",
            SignatureError::AccessKeyNotFound => "unknown_key",
            SignatureError::AccessKeyInactive => "inactive_key",
            SignatureError::SignatureMismatch => "signature_mismatch",
            _ => "malformed",
        }
    }
}

/// What the engine needs to see of an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub method: &'a str,
    /// Raw path as sent, still percent-encoded
    pub path: &'a str,
    /// Raw query string without the leading `?`
    pub query: &'a str,
    pub headers: &'a HeaderMap,
}

/// A successfully authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub principal: Principal,
    pub method: AuthMethod,
}

/// Inputs for minting one presigned URL. The secret is looked up, never passed in.
#[derive(Debug, Clone)]
pub struct PresignedUrlConfig {
    pub access_key_id: String,
    pub bucket: String,
    pub key: String,
    pub method: String,
    pub expires: Duration,
}

/// A minted presigned URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

fn signatures_match(provided: &str, expected: &str) -> bool {
    provided
        .to_ascii_lowercase()
        .as_bytes()
        .ct_eq(expected.as_bytes())
        .into()
}

fn parse_amz_date(value: &str) -> Result<DateTime<Utc>, SignatureError> {
    NaiveDateTime::parse_from_str(value, AMZ_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| SignatureError::InvalidDate(value.to_string()))
}

/// Host part of an endpoint like `http://localhost:9000`.
fn endpoint_host(endpoint: &str) -> Result<(&str, &str), SignatureError> {
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| SignatureError::InvalidEndpoint(endpoint.to_string()))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || !(scheme == "http" || scheme == "https") {
        return Err(SignatureError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok((scheme, host))
}

/// Computes and verifies AWS signatures against the identity directory.
pub struct SignatureEngine {
    identity: Arc<dyn IdentityProvider>,
    region: String,
}

impl SignatureEngine {
    pub fn new(identity: Arc<dyn IdentityProvider>, region: impl Into<String>) -> Self {
        Self {
            identity,
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Mint a V4 presigned URL for `config` against `endpoint` (`scheme://host[:port]`).
    ///
    /// Lifetimes above 7 days are rejected before any signing work.
    pub fn presign(
        &self,
        endpoint: &str,
        config: &PresignedUrlConfig,
        now: DateTime<Utc>,
    ) -> Result<PresignedUrl, SignatureError> {
        if config.expires > MAX_PRESIGN_EXPIRY {
            return Err(SignatureError::ExpirationTooLong);
        }
        if config.expires.is_zero() {
            return Err(SignatureError::InvalidExpires("0".to_string()));
        }
        let (scheme, host) = endpoint_host(endpoint)?;
        let record = self.identity.active_access_key(&config.access_key_id)?;

        let timestamp = now.format(AMZ_DATE_FORMAT).to_string();
        let scope = CredentialScope::new(&now.format("%Y%m%d").to_string(), &self.region, SERVICE);
        let path = format!("/{}/{}", config.bucket, uri_encode(&config.key, false));
        let method = config.method.to_ascii_uppercase();

        let pairs = vec![
            (PARAM_ALGORITHM.to_string(), ALGORITHM.to_string()),
            (
                PARAM_CREDENTIAL.to_string(),
                format!("{}/{}", config.access_key_id, scope.as_string()),
            ),
            (PARAM_DATE.to_string(), timestamp.clone()),
            (PARAM_EXPIRES.to_string(), config.expires.as_secs().to_string()),
            (PARAM_SIGNED_HEADERS.to_string(), "host".to_string()),
        ];
        let query = canonical_query_string(&pairs, None);

        let ctx = SignedRequestContext {
            method,
            canonical_uri: canonical_uri(&path),
            canonical_query: query.clone(),
            canonical_headers: format!("host:{}\n", host),
            signed_headers: "host".to_string(),
            payload_hash: UNSIGNED_PAYLOAD.to_string(),
            timestamp,
            scope,
        };
        let signature = calculate_signature_v4(record.secret.expose(), &ctx);

        let expires = TimeDelta::from_std(config.expires)
            .map_err(|e| SignatureError::InvalidExpires(e.to_string()))?;

        debug!(
            "Presigned {} {} for {} ({}s)",
            ctx.method,
            path,
            config.access_key_id,
            config.expires.as_secs()
        );

        Ok(PresignedUrl {
            url: format!(
                "{}://{}{}?{}&{}={}",
                scheme, host, path, query, PARAM_SIGNATURE, signature
            ),
            expires_at: now + expires,
        })
    }

    /// Authenticate a request. `Ok(None)` means no credentials were presented.
    pub fn authenticate(
        &self,
        req: &RequestView<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<Authenticated>, SignatureError> {
        if req.headers.contains_key("authorization") {
            return self.verify_header(req, now).map(Some);
        }
        match self.verify_presigned(req, now) {
            Err(SignatureError::NotPresigned) => Ok(None),
            other => other.map(Some),
        }
    }

    /// Validate presigned query parameters, routing to V4 or V2.
    pub fn verify_presigned(
        &self,
        req: &RequestView<'_>,
        now: DateTime<Utc>,
    ) -> Result<Authenticated, SignatureError> {
        let pairs = parse_query(req.query);
        if query_param(&pairs, PARAM_ALGORITHM).is_some() {
            self.verify_presigned_v4(req, &pairs, now)
        } else if query_param(&pairs, sigv2::PARAM_ACCESS_KEY).is_some() {
            self.verify_presigned_v2(req, &pairs, now)
        } else {
            Err(SignatureError::NotPresigned)
        }
    }

    fn verify_presigned_v4(
        &self,
        req: &RequestView<'_>,
        pairs: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<Authenticated, SignatureError> {
        let algorithm = query_param(pairs, PARAM_ALGORITHM).unwrap_or_default();
        if algorithm != ALGORITHM {
            return Err(SignatureError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        let (
            Some(credential),
            Some(timestamp),
            Some(expires),
            Some(signed_headers),
            Some(signature),
        ) = (
            query_param(pairs, PARAM_CREDENTIAL),
            query_param(pairs, PARAM_DATE),
            query_param(pairs, PARAM_EXPIRES),
            query_param(pairs, PARAM_SIGNED_HEADERS),
            query_param(pairs, PARAM_SIGNATURE),
        )
        else {
            return Err(SignatureError::MissingPresignParams);
        };

        let (access_key_id, scope) =
            CredentialScope::parse_credential(credential).ok_or(SignatureError::MalformedCredential)?;
        let signed_at = parse_amz_date(timestamp)?;
        let expires_secs: i64 = expires
            .parse()
            .ok()
            .filter(|secs| *secs >= 0)
            .ok_or_else(|| SignatureError::InvalidExpires(expires.to_string()))?;

        let deadline = TimeDelta::try_seconds(expires_secs)
            .and_then(|d| signed_at.checked_add_signed(d))
            .ok_or_else(|| SignatureError::InvalidExpires(expires.to_string()))?;
        if now > deadline {
            debug!("Presigned V4 URL for {} expired", access_key_id);
            return Err(SignatureError::Expired);
        }

        let record = self.identity.active_access_key(&access_key_id)?;

        let signed = normalize_signed_headers(signed_headers);
        let headers_block =
            canonical_headers(req.headers, &signed).map_err(SignatureError::MissingHeader)?;

        let ctx = SignedRequestContext {
            method: req.method.to_string(),
            canonical_uri: canonical_uri(req.path),
            canonical_query: canonical_query_string(pairs, Some(PARAM_SIGNATURE)),
            canonical_headers: headers_block,
            signed_headers: signed.join(";"),
            payload_hash: UNSIGNED_PAYLOAD.to_string(),
            timestamp: timestamp.to_string(),
            scope,
        };
        let expected = calculate_signature_v4(record.secret.expose(), &ctx);

        if !signatures_match(signature, &expected) {
            warn!("Presigned V4 signature mismatch for {}", access_key_id);
            debug!("Canonical request:\n{}", ctx.canonical_request());
            return Err(SignatureError::SignatureMismatch);
        }

        debug!("Presigned V4 URL verified for {}", access_key_id);
        Ok(Authenticated {
            principal: record.principal(),
            method: AuthMethod::PresignedV4,
        })
    }

    fn verify_presigned_v2(
        &self,
        req: &RequestView<'_>,
        pairs: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<Authenticated, SignatureError> {
        let (Some(access_key_id), Some(expires), Some(signature)) = (
            query_param(pairs, sigv2::PARAM_ACCESS_KEY),
            query_param(pairs, sigv2::PARAM_EXPIRES),
            query_param(pairs, sigv2::PARAM_SIGNATURE),
        ) else {
            return Err(SignatureError::MissingPresignParams);
        };

        let expires_at: i64 = expires
            .parse()
            .map_err(|_| SignatureError::InvalidExpires(expires.to_string()))?;
        if now.timestamp() > expires_at {
            debug!("Presigned V2 URL for {} expired", access_key_id);
            return Err(SignatureError::Expired);
        }

        let record = self.identity.active_access_key(access_key_id)?;
        let expected =
            calculate_signature_v2(record.secret.expose(), req.method, expires_at, req.path);

        if !signatures_match(signature, &expected) {
            warn!("Presigned V2 signature mismatch for {}", access_key_id);
            return Err(SignatureError::SignatureMismatch);
        }

        debug!("Presigned V2 URL verified for {}", access_key_id);
        Ok(Authenticated {
            principal: record.principal(),
            method: AuthMethod::PresignedV2,
        })
    }

    /// Verify an `Authorization: AWS4-HMAC-SHA256 ...` header.
    ///
    /// The payload hash is taken verbatim from `x-amz-content-sha256`; the
    /// body itself is checked downstream (Content-MD5, decoded length).
    pub fn verify_header(
        &self,
        req: &RequestView<'_>,
        now: DateTime<Utc>,
    ) -> Result<Authenticated, SignatureError> {
        let header = req
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(SignatureError::InvalidAuthorizationHeader)?;
        let parsed =
            sigv4::parse_auth_header(header).ok_or(SignatureError::InvalidAuthorizationHeader)?;
        let scope =
            CredentialScope::parse(&parsed.credential_scope).ok_or(SignatureError::MalformedCredential)?;

        let timestamp = req
            .headers
            .get("x-amz-date")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SignatureError::MissingHeader("x-amz-date".to_string()))?;
        let signed_at = parse_amz_date(timestamp)?;
        if (now - signed_at).num_seconds().abs() > MAX_CLOCK_SKEW_SECS {
            debug!("SigV4: request time {} too far from server clock", timestamp);
            return Err(SignatureError::RequestTimeTooSkewed);
        }

        let record = self.identity.active_access_key(&parsed.access_key)?;

        let signed = normalize_signed_headers(&parsed.signed_headers);
        let headers_block =
            canonical_headers(req.headers, &signed).map_err(SignatureError::MissingHeader)?;
        let payload_hash = req
            .headers
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(UNSIGNED_PAYLOAD);

        let ctx = SignedRequestContext {
            method: req.method.to_string(),
            canonical_uri: canonical_uri(req.path),
            canonical_query: canonical_query_string(&parse_query(req.query), None),
            canonical_headers: headers_block,
            signed_headers: signed.join(";"),
            payload_hash: payload_hash.to_string(),
            timestamp: timestamp.to_string(),
            scope,
        };
        let expected = calculate_signature_v4(record.secret.expose(), &ctx);

        if !signatures_match(&parsed.signature, &expected) {
            warn!("SigV4: signature mismatch for {}", parsed.access_key);
            debug!("SigV4 canonical request:\n{}", ctx.canonical_request());
            return Err(SignatureError::SignatureMismatch);
        }

        debug!("SigV4: signature verified for {}", parsed.access_key);
        Ok(Authenticated {
            principal: record.principal(),
            method: AuthMethod::HeaderSigV4,
        })
    }
}
