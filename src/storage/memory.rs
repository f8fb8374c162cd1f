//! In-memory storage collaborator
//!
//! Everything lives behind `parking_lot` locks and is lost on restart.

use super::traits::{ListQuery, ObjectStorage, PutOptions, StorageError};
use crate::types::{BucketInfo, BucketPath, ListObjectsPage, ObjectMetadata, PartInfo, UploadInfo};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tracing::debug;

struct StoredObject {
    meta: ObjectMetadata,
    data: Bytes,
}

struct BucketState {
    info: BucketInfo,
    objects: BTreeMap<String, StoredObject>,
}

/// Data for a single uploaded part
struct PartData {
    data: Bytes,
    md5_raw: [u8; 16],
    uploaded_at: DateTime<Utc>,
}

/// State for an in-progress multipart upload
struct MultipartUpload {
    bucket: String,
    key: String,
    created_at: DateTime<Utc>,
    options: PutOptions,
    parts: HashMap<u32, PartData>,
}

impl PartData {
    fn info(&self, part_number: u32) -> PartInfo {
        PartInfo {
            part_number,
            etag: format!("\"{}\"", hex::encode(self.md5_raw)),
            size: self.data.len() as u64,
            last_modified: self.uploaded_at,
        }
    }
}

/// Thread-safe in-memory bucket, object and multipart store
pub struct MemoryStorage {
    /// Keyed by bare bucket name; names are globally unique
    buckets: RwLock<HashMap<String, BucketState>>,
    uploads: RwLock<HashMap<String, MultipartUpload>>,
    max_object_size: u64,
}

/// 32 hex chars from the thread-local CSPRNG.
fn generate_upload_id() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

fn quoted_md5(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(data)))
}

impl MemoryStorage {
    pub fn new(max_object_size: u64) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            uploads: RwLock::new(HashMap::new()),
            max_object_size,
        }
    }

    fn check_size(&self, size: u64) -> Result<(), StorageError> {
        if size > self.max_object_size {
            return Err(StorageError::TooLarge {
                size,
                max: self.max_object_size,
            });
        }
        Ok(())
    }

    fn store(&self, bucket: &BucketPath, meta: ObjectMetadata, data: Bytes) -> Result<ObjectMetadata, StorageError> {
        let mut buckets = self.buckets.write();
        let state = lookup_mut(&mut buckets, bucket)?;
        state.objects.insert(
            meta.key.clone(),
            StoredObject {
                meta: meta.clone(),
                data,
            },
        );
        Ok(meta)
    }

    fn with_upload<T>(
        &self,
        bucket: &BucketPath,
        key: &str,
        upload_id: &str,
        f: impl FnOnce(&MultipartUpload) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let uploads = self.uploads.read();
        let upload = uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket.as_storage_path() && u.key == key)
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;
        f(upload)
    }
}

fn lookup<'a>(
    buckets: &'a HashMap<String, BucketState>,
    bucket: &BucketPath,
) -> Result<&'a BucketState, StorageError> {
    buckets
        .get(&bucket.name)
        .filter(|b| b.info.path == *bucket)
        .ok_or_else(|| StorageError::BucketNotFound(bucket.name.clone()))
}

fn lookup_mut<'a>(
    buckets: &'a mut HashMap<String, BucketState>,
    bucket: &BucketPath,
) -> Result<&'a mut BucketState, StorageError> {
    buckets
        .get_mut(&bucket.name)
        .filter(|b| b.info.path == *bucket)
        .ok_or_else(|| StorageError::BucketNotFound(bucket.name.clone()))
}

/// The common prefix `key` rolls up into, if any.
fn rollup(key: &str, prefix: &str, delimiter: Option<&str>) -> Option<String> {
    let delimiter = delimiter.filter(|d| !d.is_empty())?;
    let rest = &key[prefix.len()..];
    rest.find(delimiter)
        .map(|i| key[..prefix.len() + i + delimiter.len()].to_string())
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn create_bucket(&self, bucket: &BucketPath, owner_id: &str) -> Result<BucketInfo, StorageError> {
        let mut buckets = self.buckets.write();
        if buckets.contains_key(&bucket.name) {
            return Err(StorageError::BucketAlreadyExists(bucket.name.clone()));
        }
        let info = BucketInfo {
            path: bucket.clone(),
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
        };
        buckets.insert(
            bucket.name.clone(),
            BucketState {
                info: info.clone(),
                objects: BTreeMap::new(),
            },
        );
        debug!("Created bucket {}", bucket);
        Ok(info)
    }

    async fn delete_bucket(&self, bucket: &BucketPath) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write();
        let state = lookup(&buckets, bucket)?;
        let path = bucket.as_storage_path();
        if !state.objects.is_empty() || self.uploads.read().values().any(|u| u.bucket == path) {
            return Err(StorageError::BucketNotEmpty(bucket.name.clone()));
        }
        buckets.remove(&bucket.name);
        debug!("Deleted bucket {}", bucket);
        Ok(())
    }

    async fn resolve_bucket(&self, name: &str) -> Result<BucketInfo, StorageError> {
        self.buckets
            .read()
            .get(name)
            .map(|b| b.info.clone())
            .ok_or_else(|| StorageError::BucketNotFound(name.to_string()))
    }

    async fn bucket_exists(&self, bucket: &BucketPath) -> Result<bool, StorageError> {
        Ok(lookup(&self.buckets.read(), bucket).is_ok())
    }

    async fn list_buckets(&self, tenant: Option<&str>) -> Result<Vec<BucketInfo>, StorageError> {
        let mut result: Vec<BucketInfo> = self
            .buckets
            .read()
            .values()
            .filter(|b| b.info.path.tenant() == tenant)
            .map(|b| b.info.clone())
            .collect();
        result.sort_by(|a, b| a.path.name.cmp(&b.path.name));
        Ok(result)
    }

    async fn put_object(
        &self,
        bucket: &BucketPath,
        key: &str,
        data: Bytes,
        options: PutOptions,
    ) -> Result<ObjectMetadata, StorageError> {
        self.check_size(data.len() as u64)?;
        let meta = ObjectMetadata {
            key: key.to_string(),
            size: data.len() as u64,
            etag: quoted_md5(&data),
            last_modified: Utc::now(),
            content_type: options.content_type,
            user_metadata: options.user_metadata,
        };
        self.store(bucket, meta, data)
    }

    async fn get_object(&self, bucket: &BucketPath, key: &str) -> Result<(ObjectMetadata, Bytes), StorageError> {
        let buckets = self.buckets.read();
        let state = lookup(&buckets, bucket)?;
        state
            .objects
            .get(key)
            .map(|o| (o.meta.clone(), o.data.clone()))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_object_metadata(&self, bucket: &BucketPath, key: &str) -> Result<ObjectMetadata, StorageError> {
        let buckets = self.buckets.read();
        let state = lookup(&buckets, bucket)?;
        state
            .objects
            .get(key)
            .map(|o| o.meta.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, bucket: &BucketPath, key: &str) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write();
        let state = lookup_mut(&mut buckets, bucket)?;
        state
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list_objects(&self, bucket: &BucketPath, query: &ListQuery) -> Result<ListObjectsPage, StorageError> {
        let buckets = self.buckets.read();
        let state = lookup(&buckets, bucket)?;

        let mut page = ListObjectsPage::default();
        if query.max_keys == 0 {
            return Ok(page);
        }

        let start = match &query.start_after {
            Some(marker) => Bound::Excluded(marker.clone()),
            None => Bound::Unbounded,
        };
        let mut count = 0;
        let mut last_prefix: Option<String> = None;

        for (key, obj) in state.objects.range((start, Bound::Unbounded)) {
            if !key.starts_with(&query.prefix) {
                continue;
            }
            let common = rollup(key, &query.prefix, query.delimiter.as_deref());
            if let Some(cp) = &common {
                if last_prefix.as_ref() == Some(cp) {
                    continue;
                }
                // The marker itself was a common prefix on the previous page
                if query
                    .start_after
                    .as_deref()
                    .is_some_and(|m| m.starts_with(cp.as_str()))
                {
                    continue;
                }
            }
            if count == query.max_keys {
                page.is_truncated = true;
                break;
            }
            match common {
                Some(cp) => {
                    page.next_marker = Some(cp.clone());
                    page.common_prefixes.push(cp.clone());
                    last_prefix = Some(cp);
                }
                None => {
                    page.next_marker = Some(key.clone());
                    page.objects.push(obj.meta.clone());
                }
            }
            count += 1;
        }

        if !page.is_truncated {
            page.next_marker = None;
        }
        Ok(page)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &BucketPath,
        key: &str,
        options: PutOptions,
    ) -> Result<UploadInfo, StorageError> {
        lookup(&self.buckets.read(), bucket)?;

        let upload_id = generate_upload_id();
        let now = Utc::now();
        self.uploads.write().insert(
            upload_id.clone(),
            MultipartUpload {
                bucket: bucket.as_storage_path(),
                key: key.to_string(),
                created_at: now,
                options,
                parts: HashMap::new(),
            },
        );
        Ok(UploadInfo {
            key: key.to_string(),
            upload_id,
            initiated: now,
        })
    }

    async fn upload_part(
        &self,
        bucket: &BucketPath,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartInfo, StorageError> {
        self.check_size(data.len() as u64)?;
        let md5_raw: [u8; 16] = Md5::digest(&data).into();

        let mut uploads = self.uploads.write();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket.as_storage_path() && u.key == key)
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;

        // Overwrite semantics: re-uploading same part_number replaces previous data
        let part = PartData {
            data,
            md5_raw,
            uploaded_at: Utc::now(),
        };
        let info = part.info(part_number);
        upload.parts.insert(part_number, part);
        Ok(info)
    }

    async fn list_parts(&self, bucket: &BucketPath, key: &str, upload_id: &str) -> Result<Vec<PartInfo>, StorageError> {
        self.with_upload(bucket, key, upload_id, |upload| {
            Ok(upload
                .parts
                .iter()
                .map(|(&num, part)| part.info(num))
                .collect())
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &BucketPath,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<ObjectMetadata, StorageError> {
        let (data, etag, options) = self.with_upload(bucket, key, upload_id, |upload| {
            let mut md5_concat = Vec::with_capacity(part_numbers.len() * 16);
            let mut assembled = BytesMut::new();
            for number in part_numbers {
                let part = upload.parts.get(number).ok_or_else(|| {
                    StorageError::InvalidPart(format!("Part {} has not been uploaded", number))
                })?;
                md5_concat.extend_from_slice(&part.md5_raw);
                assembled.extend_from_slice(&part.data);
                self.check_size(assembled.len() as u64)?;
            }
            // S3-compatible multipart ETag: MD5(concat of part MD5 raw bytes)-N
            let etag = format!(
                "\"{}-{}\"",
                hex::encode(Md5::digest(&md5_concat)),
                part_numbers.len()
            );
            Ok((assembled.freeze(), etag, upload.options.clone()))
        })?;

        let meta = ObjectMetadata {
            key: key.to_string(),
            size: data.len() as u64,
            etag,
            last_modified: Utc::now(),
            content_type: options.content_type,
            user_metadata: options.user_metadata,
        };
        let meta = self.store(bucket, meta, data)?;
        self.uploads.write().remove(upload_id);
        Ok(meta)
    }

    async fn abort_multipart_upload(&self, bucket: &BucketPath, key: &str, upload_id: &str) -> Result<(), StorageError> {
        let mut uploads = self.uploads.write();
        uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket.as_storage_path() && u.key == key)
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;
        uploads.remove(upload_id);
        Ok(())
    }

    async fn list_multipart_uploads(&self, bucket: &BucketPath) -> Result<Vec<UploadInfo>, StorageError> {
        lookup(&self.buckets.read(), bucket)?;
        let path = bucket.as_storage_path();
        Ok(self
            .uploads
            .read()
            .iter()
            .filter(|(_, u)| u.bucket == path)
            .map(|(id, u)| UploadInfo {
                key: u.key.clone(),
                upload_id: id.clone(),
                initiated: u.created_at,
            })
            .collect())
    }
}
