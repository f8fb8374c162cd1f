//! Permission resolution: same tenant → object ACL → bucket ACL → bucket policy → deny
//!
//! Each step is a `try_*` returning `Some(layer)` when it grants. The first
//! grant wins. Collaborator errors fail closed, and every denial looks the
//! same to the caller.

use crate::acl::AclStore;
use crate::context::RequestContext;
use crate::policy::{PolicyStore, S3Action};
use crate::types::BucketPath;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which layer granted access. Logged, never returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantLayer {
    SameTenant,
    ObjectAcl,
    BucketAcl,
    BucketPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(GrantLayer),
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Walks the permission cascade against the ACL and policy collaborators.
pub struct PermissionResolver {
    acls: Arc<dyn AclStore>,
    policies: Arc<dyn PolicyStore>,
}

impl PermissionResolver {
    pub fn new(acls: Arc<dyn AclStore>, policies: Arc<dyn PolicyStore>) -> Self {
        Self { acls, policies }
    }

    /// Decide whether `ctx` may perform `action` on `bucket` (and `key`, for
    /// object-scoped checks).
    pub async fn check(
        &self,
        ctx: &RequestContext,
        action: S3Action,
        bucket: &BucketPath,
        key: Option<&str>,
    ) -> Decision {
        let mut layer = self.try_same_tenant(ctx, bucket);
        if layer.is_none() {
            layer = self.try_object_acl(ctx, action, bucket, key).await;
        }
        if layer.is_none() {
            layer = self.try_bucket_acl(ctx, action, bucket).await;
        }
        if layer.is_none() {
            layer = self.try_bucket_policy(ctx, action, bucket, key).await;
        }
        let decision = layer.map_or(Decision::Deny, Decision::Allow);

        match decision {
            Decision::Allow(layer) => debug!(
                "[{}] {} on {}/{} allowed by {:?}",
                ctx,
                action.as_str(),
                bucket,
                key.unwrap_or(""),
                layer
            ),
            Decision::Deny => debug!(
                "[{}] {} on {}/{} denied",
                ctx,
                action.as_str(),
                bucket,
                key.unwrap_or("")
            ),
        }
        decision
    }

    /// Bucket-level pre-check for reads, run before the object is fetched.
    ///
    /// Looking at the object ACL of a key that might not exist would leak
    /// existence. Callers that fail this step must confirm the object exists
    /// and then run [`check`](Self::check) with the key.
    pub async fn check_bucket_read(&self, ctx: &RequestContext, action: S3Action, bucket: &BucketPath) -> Decision {
        if let Some(layer) = self.try_same_tenant(ctx, bucket) {
            return Decision::Allow(layer);
        }
        if let Some(layer) = self.try_bucket_acl(ctx, action, bucket).await {
            return Decision::Allow(layer);
        }
        Decision::Deny
    }

    fn try_same_tenant(&self, ctx: &RequestContext, bucket: &BucketPath) -> Option<GrantLayer> {
        ctx.is_same_tenant(bucket.tenant())
            .then_some(GrantLayer::SameTenant)
    }

    async fn try_object_acl(
        &self,
        ctx: &RequestContext,
        action: S3Action,
        bucket: &BucketPath,
        key: Option<&str>,
    ) -> Option<GrantLayer> {
        let key = key?;
        match self.acls.get_object_acl(bucket, key).await {
            Ok(Some(acl)) => acl
                .evaluate(&ctx.caller, action.permission())
                .then_some(GrantLayer::ObjectAcl),
            Ok(None) => None,
            Err(e) => {
                warn!("[{}] object ACL lookup failed for {}/{}: {}", ctx, bucket, key, e);
                None
            }
        }
    }

    async fn try_bucket_acl(
        &self,
        ctx: &RequestContext,
        action: S3Action,
        bucket: &BucketPath,
    ) -> Option<GrantLayer> {
        match self.acls.get_bucket_acl(bucket).await {
            Ok(Some(acl)) => acl
                .evaluate(&ctx.caller, action.permission())
                .then_some(GrantLayer::BucketAcl),
            Ok(None) => None,
            Err(e) => {
                warn!("[{}] bucket ACL lookup failed for {}: {}", ctx, bucket, e);
                None
            }
        }
    }

    async fn try_bucket_policy(
        &self,
        ctx: &RequestContext,
        action: S3Action,
        bucket: &BucketPath,
        key: Option<&str>,
    ) -> Option<GrantLayer> {
        match self.policies.get_policy(bucket).await {
            Ok(Some(policy)) => policy
                .allows(&ctx.caller, action, &bucket.name, key)
                .then_some(GrantLayer::BucketPolicy),
            Ok(None) => None,
            Err(e) => {
                warn!("[{}] bucket policy lookup failed for {}: {}", ctx, bucket, e);
                None
            }
        }
    }
}
