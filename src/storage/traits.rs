//! Storage collaborator trait definitions

use crate::types::{BucketInfo, BucketPath, ListObjectsPage, ObjectMetadata, PartInfo, UploadInfo};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

/// Sentinel errors the protocol layer maps to S3 error codes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("Bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload not found: {0}")]
    UploadNotFound(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Object too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Storage error: {0}")]
    Other(String),
}

/// Arguments of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub prefix: String,
    pub delimiter: Option<String>,
    /// Only keys strictly after this one are returned
    pub start_after: Option<String>,
    pub max_keys: usize,
}

/// Content type and user metadata carried from the request to the stored object
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

/// Abstract bucket/object storage engine.
///
/// Every call is keyed by a tenant-qualified [`BucketPath`]. Bucket names are
/// globally unique; [`resolve_bucket`](Self::resolve_bucket) maps a bare name
/// to its owner.
///
/// This trait is object-safe and can be used as `Arc<dyn ObjectStorage>`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    // === Buckets ===

    async fn create_bucket(&self, bucket: &BucketPath, owner_id: &str) -> Result<BucketInfo, StorageError>;

    /// Fails with `BucketNotEmpty` while objects or uploads remain.
    async fn delete_bucket(&self, bucket: &BucketPath) -> Result<(), StorageError>;

    async fn resolve_bucket(&self, name: &str) -> Result<BucketInfo, StorageError>;

    async fn bucket_exists(&self, bucket: &BucketPath) -> Result<bool, StorageError>;

    /// Buckets owned by `tenant`, sorted by name
    async fn list_buckets(&self, tenant: Option<&str>) -> Result<Vec<BucketInfo>, StorageError>;

    // === Objects ===

    async fn put_object(
        &self,
        bucket: &BucketPath,
        key: &str,
        data: Bytes,
        options: PutOptions,
    ) -> Result<ObjectMetadata, StorageError>;

    async fn get_object(&self, bucket: &BucketPath, key: &str) -> Result<(ObjectMetadata, Bytes), StorageError>;

    async fn get_object_metadata(&self, bucket: &BucketPath, key: &str) -> Result<ObjectMetadata, StorageError>;

    /// Fails with `NotFound` if the key does not exist.
    async fn delete_object(&self, bucket: &BucketPath, key: &str) -> Result<(), StorageError>;

    async fn list_objects(&self, bucket: &BucketPath, query: &ListQuery) -> Result<ListObjectsPage, StorageError>;

    // === Multipart ===

    /// Generates an unpredictable upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &BucketPath,
        key: &str,
        options: PutOptions,
    ) -> Result<UploadInfo, StorageError>;

    /// Re-uploading a part number replaces the earlier part.
    async fn upload_part(
        &self,
        bucket: &BucketPath,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartInfo, StorageError>;

    /// Every uploaded part, in no particular order.
    async fn list_parts(&self, bucket: &BucketPath, key: &str, upload_id: &str) -> Result<Vec<PartInfo>, StorageError>;

    /// Concatenate the listed parts into one object and drop the upload.
    async fn complete_multipart_upload(
        &self,
        bucket: &BucketPath,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<ObjectMetadata, StorageError>;

    async fn abort_multipart_upload(&self, bucket: &BucketPath, key: &str, upload_id: &str) -> Result<(), StorageError>;

    /// Every in-progress upload in the bucket, in no particular order.
    async fn list_multipart_uploads(&self, bucket: &BucketPath) -> Result<Vec<UploadInfo>, StorageError>;
}
