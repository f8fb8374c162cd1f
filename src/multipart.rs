//! Multipart upload lifecycle
//!
//! Validation and pagination live here; part bytes and upload records belong
//! to the storage collaborator. An upload is `Created` until its first part,
//! then `Uploading`, and ends `Completed` or `Aborted`. The collaborator
//! reports a terminal upload id as not found.

use crate::api::S3Error;
use crate::storage::{ObjectStorage, PutOptions};
use crate::types::{normalize_etag, BucketPath, ObjectMetadata, PartInfo, UploadInfo};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

pub const MIN_PART_NUMBER: u32 = 1;
pub const MAX_PART_NUMBER: u32 = 10_000;
pub const MAX_LIST_PARTS: usize = 1000;
pub const MAX_LIST_UPLOADS: usize = 1000;

/// Reject part numbers outside `1..=10000`.
pub fn validate_part_number(part_number: u32) -> Result<(), S3Error> {
    if !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
        return Err(S3Error::InvalidArgument(
            "Part number must be between 1 and 10000".to_string(),
        ));
    }
    Ok(())
}

/// A part as named in a CompleteMultipartUpload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// One page of ListParts
#[derive(Debug, Clone, Default)]
pub struct PartsPage {
    pub parts: Vec<PartInfo>,
    pub part_number_marker: u32,
    pub next_part_number_marker: Option<u32>,
    pub max_parts: usize,
    pub is_truncated: bool,
}

/// Pagination inputs of ListMultipartUploads
#[derive(Debug, Clone, Default)]
pub struct UploadsQuery {
    pub prefix: Option<String>,
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
    pub max_uploads: usize,
}

/// One page of ListMultipartUploads
#[derive(Debug, Clone, Default)]
pub struct UploadsPage {
    pub uploads: Vec<UploadInfo>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Drives the multipart state machine against the storage collaborator.
pub struct MultipartUploadCoordinator {
    storage: Arc<dyn ObjectStorage>,
}

impl MultipartUploadCoordinator {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    pub async fn create(
        &self,
        bucket: &BucketPath,
        key: &str,
        options: PutOptions,
    ) -> Result<UploadInfo, S3Error> {
        let upload = self
            .storage
            .create_multipart_upload(bucket, key, options)
            .await?;
        info!(
            "Created multipart upload {} for {}/{}",
            upload.upload_id, bucket, key
        );
        Ok(upload)
    }

    /// Store one (already decoded) part. Re-uploading a part number replaces it.
    pub async fn upload_part(
        &self,
        bucket: &BucketPath,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartInfo, S3Error> {
        validate_part_number(part_number)?;
        let part = self
            .storage
            .upload_part(bucket, key, upload_id, part_number, data)
            .await?;
        debug!(
            "Upload {}: part {} stored ({} bytes, etag {})",
            upload_id, part_number, part.size, part.etag
        );
        Ok(part)
    }

    /// Parts in ascending order, strictly after `part_number_marker`.
    pub async fn list_parts(
        &self,
        bucket: &BucketPath,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
    ) -> Result<PartsPage, S3Error> {
        let max_parts = max_parts.clamp(1, MAX_LIST_PARTS);
        let mut parts = self.storage.list_parts(bucket, key, upload_id).await?;
        parts.sort_by_key(|p| p.part_number);

        let mut remaining = parts
            .into_iter()
            .filter(|p| p.part_number > part_number_marker)
            .peekable();
        let page: Vec<PartInfo> = remaining.by_ref().take(max_parts).collect();
        let is_truncated = remaining.peek().is_some();

        Ok(PartsPage {
            next_part_number_marker: page
                .last()
                .filter(|_| is_truncated)
                .map(|p| p.part_number),
            parts: page,
            part_number_marker,
            max_parts,
            is_truncated,
        })
    }

    /// Validate the requested part list and assemble the object.
    pub async fn complete(
        &self,
        bucket: &BucketPath,
        key: &str,
        upload_id: &str,
        requested: &[CompletedPart],
    ) -> Result<ObjectMetadata, S3Error> {
        if requested.is_empty() {
            return Err(S3Error::InvalidPart(
                "You must specify at least one part".to_string(),
            ));
        }

        // Validate ascending order
        for window in requested.windows(2) {
            if window[0].part_number >= window[1].part_number {
                return Err(S3Error::InvalidPartOrder);
            }
        }

        let uploaded = self.storage.list_parts(bucket, key, upload_id).await?;
        for req in requested {
            let part = uploaded
                .iter()
                .find(|p| p.part_number == req.part_number)
                .ok_or_else(|| {
                    S3Error::InvalidPart(format!(
                        "Part {} has not been uploaded",
                        req.part_number
                    ))
                })?;

            let expected = normalize_etag(&part.etag);
            let provided = normalize_etag(&req.etag);
            if expected != provided {
                return Err(S3Error::InvalidPart(format!(
                    "ETag mismatch for part {}: expected \"{}\", got \"{}\"",
                    req.part_number, expected, provided
                )));
            }
        }

        let numbers: Vec<u32> = requested.iter().map(|p| p.part_number).collect();
        let meta = self
            .storage
            .complete_multipart_upload(bucket, key, upload_id, &numbers)
            .await?;
        info!(
            "Completed multipart upload {} for {}/{} ({} parts, {} bytes)",
            upload_id,
            bucket,
            key,
            numbers.len(),
            meta.size
        );
        Ok(meta)
    }

    pub async fn abort(&self, bucket: &BucketPath, key: &str, upload_id: &str) -> Result<(), S3Error> {
        self.storage
            .abort_multipart_upload(bucket, key, upload_id)
            .await?;
        info!("Aborted multipart upload {} for {}/{}", upload_id, bucket, key);
        Ok(())
    }

    /// In-progress uploads sorted by (key, upload id), after the markers.
    pub async fn list_uploads(
        &self,
        bucket: &BucketPath,
        query: &UploadsQuery,
    ) -> Result<UploadsPage, S3Error> {
        let max_uploads = query.max_uploads.clamp(1, MAX_LIST_UPLOADS);
        let mut uploads = self.storage.list_multipart_uploads(bucket).await?;
        uploads.sort_by(|a, b| a.key.cmp(&b.key).then(a.upload_id.cmp(&b.upload_id)));

        let key_marker = query.key_marker.as_deref().filter(|m| !m.is_empty());
        let id_marker = query.upload_id_marker.as_deref().filter(|m| !m.is_empty());

        let mut remaining = uploads
            .into_iter()
            .filter(|u| {
                query
                    .prefix
                    .as_deref()
                    .map_or(true, |p| u.key.starts_with(p))
            })
            .filter(|u| match (key_marker, id_marker) {
                (Some(km), Some(im)) => {
                    u.key.as_str() > km || (u.key == km && u.upload_id.as_str() > im)
                }
                (Some(km), None) => u.key.as_str() > km,
                _ => true,
            })
            .peekable();
        let page: Vec<UploadInfo> = remaining.by_ref().take(max_uploads).collect();
        let is_truncated = remaining.peek().is_some();

        let last = page.last().filter(|_| is_truncated);
        Ok(UploadsPage {
            next_key_marker: last.map(|u| u.key.clone()),
            next_upload_id_marker: last.map(|u| u.upload_id.clone()),
            uploads: page,
            is_truncated,
        })
    }
}
