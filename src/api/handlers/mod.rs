//! S3 API request handlers
//!
//! Split into submodules by domain:
//! - `object`: GET, HEAD, PUT, DELETE and COPY for individual objects
//! - `bucket`: Bucket CRUD, listing and batch delete
//! - `multipart`: Multipart upload lifecycle
//! - `acl`: ACL and bucket policy sub-resources
//! - `status`: Health check and the presign endpoint

mod acl;
mod bucket;
mod multipart;
mod object;
mod status;

use super::errors::S3Error;
use super::extractors::S3Query;
use crate::acl::{AclStore, CannedAcl, MemoryAclStore};
use crate::chunked::{decode_aws_chunked, get_decoded_content_length, is_aws_chunked, ChunkedDecodeError};
use crate::config::{Config, ConfigError};
use crate::context::RequestContext;
use crate::identity::{IdentityProvider, StaticIdentityProvider};
use crate::metrics::Metrics;
use crate::multipart::MultipartUploadCoordinator;
use crate::permission::PermissionResolver;
use crate::policy::{MemoryPolicyStore, PolicyStore, S3Action};
use crate::signature::SignatureEngine;
use crate::storage::{MemoryStorage, ObjectStorage};
use crate::types::{BucketInfo, BucketPath, ObjectMetadata};
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use bucket::{bucket_delete_handler, bucket_get_handler, bucket_post_handler, bucket_put_handler, head_bucket, list_buckets};
pub use multipart::post_object;
pub use object::{delete_object, get_object, head_object, put_object_or_copy};
pub use status::{head_root, health_check, presign, HealthResponse, PresignRequest, PresignResponse};

/// Sub-resources recognised but not served by this layer
const UNSUPPORTED_SUBRESOURCES: &[&str] = &[
    "versioning",
    "versions",
    "tagging",
    "retention",
    "legal-hold",
    "object-lock",
];

/// Prefix used by S3 for user metadata headers
const AMZ_META_PREFIX: &str = "x-amz-meta-";

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn ObjectStorage>,
    pub acls: Arc<dyn AclStore>,
    pub policies: Arc<dyn PolicyStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub signer: SignatureEngine,
    pub permissions: PermissionResolver,
    pub multipart: MultipartUploadCoordinator,
    pub metrics: Metrics,
    pub presign_default_expiry: Duration,
}

impl AppState {
    /// Wire the protocol layer to its collaborators.
    pub fn new(
        config: Config,
        storage: Arc<dyn ObjectStorage>,
        acls: Arc<dyn AclStore>,
        policies: Arc<dyn PolicyStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let presign_default_expiry = config.presign_expiry()?;
        Ok(Self {
            signer: SignatureEngine::new(identity.clone(), config.region.clone()),
            permissions: PermissionResolver::new(acls.clone(), policies.clone()),
            multipart: MultipartUploadCoordinator::new(storage.clone()),
            metrics: Metrics::new(),
            presign_default_expiry,
            config,
            storage,
            acls,
            policies,
            identity,
        })
    }

    /// State backed by the in-memory reference collaborators.
    pub fn in_memory(config: Config) -> Result<Self, ConfigError> {
        let identity =
            StaticIdentityProvider::from_config(&config.credentials, config.max_buckets_per_tenant);
        Self::new(
            config.clone(),
            Arc::new(MemoryStorage::new(config.max_object_size)),
            Arc::new(MemoryAclStore::new()),
            Arc::new(MemoryPolicyStore::new()),
            Arc::new(identity),
        )
    }

    /// Map a bare bucket name to its tenant-qualified path and owner.
    async fn resolve_bucket(&self, name: &str) -> Result<BucketInfo, S3Error> {
        Ok(self.storage.resolve_bucket(name).await?)
    }

    /// Run the permission cascade; any denial is a plain AccessDenied.
    async fn authorize(
        &self,
        ctx: &RequestContext,
        action: S3Action,
        bucket: &BucketPath,
        key: Option<&str>,
    ) -> Result<(), S3Error> {
        if self
            .permissions
            .check(ctx, action, bucket, key)
            .await
            .is_allowed()
        {
            Ok(())
        } else {
            Err(S3Error::access_denied())
        }
    }

    /// Two-phase read check: bucket-level first, then (only once the object
    /// is known to exist) object-level. Returns the object's metadata when
    /// the second phase had to fetch it.
    async fn authorize_read(
        &self,
        ctx: &RequestContext,
        action: S3Action,
        bucket: &BucketPath,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, S3Error> {
        if self
            .permissions
            .check_bucket_read(ctx, action, bucket)
            .await
            .is_allowed()
        {
            return Ok(None);
        }

        let meta = match self.storage.get_object_metadata(bucket, key).await {
            Ok(meta) => meta,
            // Existence is not revealed to callers without bucket-level read
            Err(_) => return Err(S3Error::access_denied()),
        };
        self.authorize(ctx, action, bucket, Some(key)).await?;
        Ok(Some(meta))
    }

    /// Owner recorded on ACLs this caller creates.
    fn acl_owner(ctx: &RequestContext, bucket_owner: &str) -> String {
        ctx.caller
            .principal()
            .map(|p| p.user_id.clone())
            .unwrap_or_else(|| bucket_owner.to_string())
    }
}

// ---------------------------------------------------------------------------
// Shared utility functions used across handler submodules
// ---------------------------------------------------------------------------

/// Answer sub-resources and headers this layer does not serve.
fn reject_unsupported(query: &S3Query, headers: &HeaderMap) -> Result<(), S3Error> {
    if let Some(sub) = UNSUPPORTED_SUBRESOURCES.iter().find(|s| query.has(s)) {
        return Err(S3Error::NotImplemented(format!(
            "The ?{} sub-resource is not implemented",
            sub
        )));
    }
    if let Some(name) = headers.keys().find(|name| {
        name.as_str().starts_with("x-amz-object-lock-")
            || name.as_str() == "x-amz-bypass-governance-retention"
    }) {
        return Err(S3Error::NotImplemented(format!(
            "The {} header is not implemented",
            name
        )));
    }
    Ok(())
}

/// Build response headers for an object.
fn build_object_headers(metadata: &ObjectMetadata) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("ETag", hval(&metadata.etag));
    headers.insert("Content-Type", hval(metadata.content_type_or_default()));
    headers.insert("Last-Modified", hval(&metadata.http_last_modified()));
    headers.insert("Content-Length", HeaderValue::from(metadata.size));
    headers.insert("Accept-Ranges", HeaderValue::from_static("bytes"));

    // User-provided custom metadata (x-amz-meta-*)
    for (key, value) in &metadata.user_metadata {
        let header_name = format!("{}{}", AMZ_META_PREFIX, key);
        if let Ok(name) = axum::http::header::HeaderName::from_bytes(header_name.as_bytes()) {
            headers.insert(name, hval(value));
        }
    }

    headers
}

fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Build an XML response with correct Content-Type header.
fn xml_response(xml: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml.into(),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Extract Content-Type header as an owned String.
fn extract_content_type(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "content-type").map(|s| s.to_string())
}

/// Extract user-provided x-amz-meta-* headers.
fn extract_user_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let suffix = name.as_str().strip_prefix(AMZ_META_PREFIX)?;
            value
                .to_str()
                .ok()
                .map(|v| (suffix.to_string(), v.to_string()))
        })
        .collect()
}

/// Canned ACL from `x-amz-acl`, if present.
fn extract_canned_acl(headers: &HeaderMap) -> Result<Option<CannedAcl>, S3Error> {
    header_str(headers, "x-amz-acl")
        .map(|v| {
            v.parse::<CannedAcl>()
                .map_err(|e| S3Error::InvalidArgument(e.to_string()))
        })
        .transpose()
}

/// Parse request body as UTF-8 string, mapping errors to MalformedXML.
fn body_to_utf8(body: &Bytes) -> Result<&str, S3Error> {
    std::str::from_utf8(body).map_err(|_| S3Error::MalformedXML)
}

/// Decode base64 string to bytes (for Content-MD5 validation)
fn base64_decode(input: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(input.trim())
        .ok()
}

/// Strip aws-chunked framing (if any) and verify the decoded length and
/// Content-MD5 against the headers.
fn decode_request_body(headers: &HeaderMap, body: Bytes) -> Result<Bytes, S3Error> {
    let decoded = if is_aws_chunked(headers) {
        let expected_len = get_decoded_content_length(headers);
        debug!(
            "Decoding AWS chunked payload: {} bytes, expected decoded: {:?}",
            body.len(),
            expected_len
        );
        let decoded = decode_aws_chunked(&body).map_err(|e| {
            warn!("Failed to decode AWS chunked payload: {}", e);
            match e {
                ChunkedDecodeError::ChunkData { .. } => S3Error::IncompleteBody(e.to_string()),
                other => S3Error::InvalidRequest(other.to_string()),
            }
        })?;
        if let Some(expected) = expected_len {
            if decoded.len() as u64 != expected {
                return Err(S3Error::IncompleteBody(format!(
                    "Decoded body is {} bytes, X-Amz-Decoded-Content-Length says {}",
                    decoded.len(),
                    expected
                )));
            }
        }
        decoded
    } else {
        body
    };

    // Validate Content-MD5 header if present
    if let Some(content_md5) = header_str(headers, "content-md5") {
        let expected = base64_decode(content_md5).ok_or(S3Error::BadDigest)?;
        if Md5::digest(&decoded).as_slice() != expected.as_slice() {
            return Err(S3Error::BadDigest);
        }
    }

    Ok(decoded)
}
