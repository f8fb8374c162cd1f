//! Multi-object delete (`POST /{bucket}?delete`)
//!
//! Per-key deletions fan out with bounded concurrency. A key the caller may
//! not delete, or whose deletion fails, is reported in `Errors[]` without
//! failing the batch. Missing keys count as deleted.
//!
//! The object ACL is dropped before the object itself. If that fails the key
//! is reported as an error and the object stays in place.

use crate::acl::AclStore;
use crate::api::xml::{DeleteError, DeleteObjectIdentifier, DeleteResult, DeletedObject};
use crate::api::S3Error;
use crate::context::RequestContext;
use crate::permission::PermissionResolver;
use crate::policy::S3Action;
use crate::storage::{ObjectStorage, StorageError};
use crate::types::BucketPath;
use futures::StreamExt;
use tracing::{debug, warn};

/// Keys accepted in one request
pub const MAX_BATCH_DELETE_KEYS: usize = 1000;

/// Reject empty and oversized batches before anything is deleted.
pub fn validate_batch(objects: &[DeleteObjectIdentifier]) -> Result<(), S3Error> {
    if objects.is_empty() || objects.len() > MAX_BATCH_DELETE_KEYS {
        warn!(
            "Rejecting batch delete of {} keys (allowed 1..={})",
            objects.len(),
            MAX_BATCH_DELETE_KEYS
        );
        return Err(S3Error::MalformedXML);
    }
    Ok(())
}

enum KeyOutcome {
    Deleted(DeletedObject),
    Failed(DeleteError),
}

/// Delete every named key, at most `concurrency` at a time.
pub async fn delete_objects(
    storage: &dyn ObjectStorage,
    acls: &dyn AclStore,
    permissions: &PermissionResolver,
    ctx: &RequestContext,
    bucket: &BucketPath,
    objects: Vec<DeleteObjectIdentifier>,
    concurrency: usize,
) -> Result<DeleteResult, S3Error> {
    validate_batch(&objects)?;

    let futs: Vec<_> = objects
        .into_iter()
        .map(|obj| async move { delete_one(storage, acls, permissions, ctx, bucket, obj).await })
        .collect();

    let outcomes: Vec<KeyOutcome> = futures::stream::iter(futs)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut result = DeleteResult::default();
    for outcome in outcomes {
        match outcome {
            KeyOutcome::Deleted(d) => result.deleted.push(d),
            KeyOutcome::Failed(e) => result.errors.push(e),
        }
    }
    debug!(
        "[{}] batch delete in {}: {} deleted, {} errors",
        ctx,
        bucket,
        result.deleted.len(),
        result.errors.len()
    );
    Ok(result)
}

async fn delete_one(
    storage: &dyn ObjectStorage,
    acls: &dyn AclStore,
    permissions: &PermissionResolver,
    ctx: &RequestContext,
    bucket: &BucketPath,
    obj: DeleteObjectIdentifier,
) -> KeyOutcome {
    let failed = |err: S3Error| {
        KeyOutcome::Failed(DeleteError {
            key: obj.key.clone(),
            version_id: obj.version_id.clone(),
            code: err.code().to_string(),
            message: err.message(),
        })
    };

    if !permissions
        .check(ctx, S3Action::DeleteObject, bucket, Some(&obj.key))
        .await
        .is_allowed()
    {
        return failed(S3Error::access_denied());
    }

    if let Err(e) = acls.delete_object_acl(bucket, &obj.key).await {
        warn!("Failed to drop ACL of {}/{}: {}", bucket, obj.key, e);
        return failed(S3Error::from(e));
    }

    match storage.delete_object(bucket, &obj.key).await {
        // S3 treats NoSuchKey as success in batch delete
        Ok(()) | Err(StorageError::NotFound(_)) => KeyOutcome::Deleted(DeletedObject {
            key: obj.key.clone(),
            version_id: obj.version_id.clone(),
        }),
        Err(e) => {
            warn!("Failed to delete {}/{}: {}", bucket, obj.key, e);
            failed(S3Error::from(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{AccessControlList, AclError, MemoryAclStore};
    use crate::context::{AuthMethod, Caller, Principal, RequestIds};
    use crate::policy::MemoryPolicyStore;
    use crate::storage::{MemoryStorage, PutOptions};
    use bytes::Bytes;
    use std::sync::Arc;

    fn bucket() -> BucketPath {
        BucketPath::new(Some("acme"), "photos")
    }

    fn ctx(tenant: &str) -> RequestContext {
        RequestContext::new(
            RequestIds::generate(),
            Caller::Authenticated(Principal {
                user_id: format!("{}-user", tenant),
                tenant_id: Some(tenant.to_string()),
                access_key_id: "AK".to_string(),
            }),
            AuthMethod::HeaderSigV4,
        )
    }

    fn ids(keys: &[&str]) -> Vec<DeleteObjectIdentifier> {
        keys.iter()
            .map(|k| DeleteObjectIdentifier {
                key: k.to_string(),
                version_id: None,
            })
            .collect()
    }

    /// ACL store that refuses to drop the ACL of one key.
    struct StuckAclStore {
        inner: MemoryAclStore,
        stuck_key: &'static str,
    }

    #[async_trait::async_trait]
    impl AclStore for StuckAclStore {
        async fn get_bucket_acl(
            &self,
            bucket: &BucketPath,
        ) -> Result<Option<AccessControlList>, AclError> {
            self.inner.get_bucket_acl(bucket).await
        }

        async fn set_bucket_acl(
            &self,
            bucket: &BucketPath,
            acl: AccessControlList,
        ) -> Result<(), AclError> {
            self.inner.set_bucket_acl(bucket, acl).await
        }

        async fn get_object_acl(
            &self,
            bucket: &BucketPath,
            key: &str,
        ) -> Result<Option<AccessControlList>, AclError> {
            self.inner.get_object_acl(bucket, key).await
        }

        async fn set_object_acl(
            &self,
            bucket: &BucketPath,
            key: &str,
            acl: AccessControlList,
        ) -> Result<(), AclError> {
            self.inner.set_object_acl(bucket, key, acl).await
        }

        async fn delete_object_acl(&self, bucket: &BucketPath, key: &str) -> Result<(), AclError> {
            if key == self.stuck_key {
                return Err(AclError::Backend("acl store unavailable".to_string()));
            }
            self.inner.delete_object_acl(bucket, key).await
        }

        async fn delete_bucket_acls(&self, bucket: &BucketPath) -> Result<(), AclError> {
            self.inner.delete_bucket_acls(bucket).await
        }
    }

    async fn setup() -> (MemoryStorage, PermissionResolver) {
        let storage = MemoryStorage::new(1024);
        storage.create_bucket(&bucket(), "acme-user").await.unwrap();
        for key in ["a", "b"] {
            storage
                .put_object(&bucket(), key, Bytes::from_static(b"x"), PutOptions::default())
                .await
                .unwrap();
        }
        let resolver = PermissionResolver::new(
            Arc::new(MemoryAclStore::new()),
            Arc::new(MemoryPolicyStore::new()),
        );
        (storage, resolver)
    }

    #[test]
    fn test_batch_size_limits() {
        assert_eq!(validate_batch(&[]), Err(S3Error::MalformedXML));
        let keys: Vec<String> = (0..1001).map(|i| format!("k{}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        assert_eq!(validate_batch(&ids(&refs)), Err(S3Error::MalformedXML));
        assert!(validate_batch(&ids(&refs[..1000])).is_ok());
    }

    #[tokio::test]
    async fn test_oversized_batch_deletes_nothing() {
        let (storage, resolver) = setup().await;
        let mut keys = vec!["a".to_string()];
        keys.extend((0..1000).map(|i| format!("k{}", i)));
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();

        let err = delete_objects(
            &storage,
            &MemoryAclStore::new(),
            &resolver,
            &ctx("acme"),
            &bucket(),
            ids(&refs),
            8,
        )
        .await
        .unwrap_err();
        assert_eq!(err, S3Error::MalformedXML);
        assert!(storage.get_object_metadata(&bucket(), "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_keys_count_as_deleted() {
        let (storage, resolver) = setup().await;
        let result = delete_objects(
            &storage,
            &MemoryAclStore::new(),
            &resolver,
            &ctx("acme"),
            &bucket(),
            ids(&["a", "ghost", "b"]),
            2,
        )
        .await
        .unwrap();
        let keys: Vec<&str> = result.deleted.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "ghost", "b"]);
        assert!(result.errors.is_empty());
        assert!(storage.get_object_metadata(&bucket(), "a").await.is_err());
    }

    #[tokio::test]
    async fn test_cross_tenant_keys_reported_per_key() {
        let (storage, resolver) = setup().await;
        let result = delete_objects(
            &storage,
            &MemoryAclStore::new(),
            &resolver,
            &ctx("globex"),
            &bucket(),
            ids(&["a"]),
            4,
        )
        .await
        .unwrap();
        assert!(result.deleted.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "AccessDenied");
        assert!(storage.get_object_metadata(&bucket(), "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_acl_failure_reported_per_key() {
        let (storage, resolver) = setup().await;
        let acls = StuckAclStore {
            inner: MemoryAclStore::new(),
            stuck_key: "a",
        };
        let result = delete_objects(
            &storage,
            &acls,
            &resolver,
            &ctx("acme"),
            &bucket(),
            ids(&["a", "b"]),
            2,
        )
        .await
        .unwrap();

        let deleted: Vec<&str> = result.deleted.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(deleted, vec!["b"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].key, "a");
        assert_eq!(result.errors[0].code, "InternalError");
        assert!(storage.get_object_metadata(&bucket(), "a").await.is_ok());
        assert!(storage.get_object_metadata(&bucket(), "b").await.is_err());
    }
}
