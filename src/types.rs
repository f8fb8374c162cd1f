//! Core types shared by the protocol layer and its storage collaborators

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Maximum S3 object key length in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$").expect("bucket name regex is valid")
});

static IPV4_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("ipv4 regex is valid")
});

/// Errors that can occur when validating user-provided bucket/key inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError(String);

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for KeyValidationError {}

/// Validate a bucket name against the S3 naming rules.
pub fn validate_bucket_name(name: &str) -> Result<(), KeyValidationError> {
    if !BUCKET_NAME.is_match(name) {
        return Err(KeyValidationError(format!(
            "Bucket name '{}' must be 3-63 characters of lowercase letters, digits, '.' or '-'",
            name
        )));
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return Err(KeyValidationError(
            "Bucket name must not contain adjacent periods or dashes next to periods".to_string(),
        ));
    }
    if IPV4_LIKE.is_match(name) {
        return Err(KeyValidationError(
            "Bucket name must not be formatted as an IP address".to_string(),
        ));
    }
    Ok(())
}

/// Validate an object key for object operations (PUT/GET/HEAD/DELETE).
pub fn validate_object_key(key: &str) -> Result<(), KeyValidationError> {
    if key.is_empty() {
        return Err(KeyValidationError(
            "Object key must not be empty".to_string(),
        ));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(KeyValidationError(format!(
            "Object key exceeds {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if key.contains('\0') {
        return Err(KeyValidationError(
            "Key must not contain NUL bytes".to_string(),
        ));
    }
    Ok(())
}

/// Tenant-qualified bucket path.
///
/// Tenanted buckets live at `<tenantId>/<bucketName>`, untenanted ones at
/// the bare `<bucketName>`. Bucket names are globally unique, so the name
/// alone identifies the bucket; the tenant says who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketPath {
    pub tenant_id: Option<String>,
    pub name: String,
}

impl BucketPath {
    pub fn new(tenant_id: Option<&str>, name: &str) -> Self {
        Self {
            tenant_id: tenant_id.filter(|t| !t.is_empty()).map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Parse a storage path (`tenant/bucket` or `bucket`).
    pub fn parse(path: &str) -> Self {
        match path.split_once('/') {
            Some((tenant, name)) => Self::new(Some(tenant), name),
            None => Self::new(None, path),
        }
    }

    /// The storage-collaborator key for this bucket.
    pub fn as_storage_path(&self) -> String {
        match &self.tenant_id {
            Some(tenant) => format!("{}/{}", tenant, self.name),
            None => self.name.clone(),
        }
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

impl fmt::Display for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_storage_path())
    }
}

/// A bucket as known to the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub path: BucketPath,
    /// Canonical user id of the creator
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Object metadata as recorded by the storage collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    /// Quoted ETag, e.g. `"d41d8cd98f00b204e9800998ecf8427e"`
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }

    /// Last-Modified in RFC 7231 form.
    pub fn http_last_modified(&self) -> String {
        self.last_modified
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectMetadata>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Last key (or common prefix) returned when truncated
    pub next_marker: Option<String>,
}

/// A part of an in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: u32,
    /// Quoted MD5 ETag returned by UploadPart
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// An in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

/// Strip surrounding quotes (and a weak-validator prefix) from an ETag.
pub fn normalize_etag(etag: &str) -> &str {
    let etag = etag.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    etag.trim_matches('"')
}
