//! Access control lists for buckets and objects
//!
//! ACLs only mediate cross-tenant and public access; callers from the owning
//! tenant never consult them.

use crate::context::Caller;
use crate::types::BucketPath;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
pub const AUTHENTICATED_USERS_URI: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// A permission that can be granted to a grantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    /// Implies every other permission
    FullControl,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "READ",
            Permission::Write => "WRITE",
            Permission::FullControl => "FULL_CONTROL",
        }
    }

    /// Whether holding `self` satisfies a request for `requested`.
    pub fn satisfies(&self, requested: Permission) -> bool {
        *self == Permission::FullControl || *self == requested
    }
}

impl FromStr for Permission {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(Permission::Read),
            "WRITE" => Ok(Permission::Write),
            "FULL_CONTROL" => Ok(Permission::FullControl),
            other => Err(AclError::Invalid(format!("unsupported permission {}", other))),
        }
    }
}

/// Who a grant applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Grantee {
    CanonicalUser(String),
    /// Any authenticated caller, from any tenant
    AuthenticatedUsers,
    /// Everyone, including anonymous callers
    AllUsers,
}

impl Grantee {
    /// Parse a group grantee URI.
    pub fn from_group_uri(uri: &str) -> Option<Self> {
        match uri {
            ALL_USERS_URI => Some(Grantee::AllUsers),
            AUTHENTICATED_USERS_URI => Some(Grantee::AuthenticatedUsers),
            _ => None,
        }
    }

    pub fn group_uri(&self) -> Option<&'static str> {
        match self {
            Grantee::AllUsers => Some(ALL_USERS_URI),
            Grantee::AuthenticatedUsers => Some(AUTHENTICATED_USERS_URI),
            Grantee::CanonicalUser(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: Permission,
}

impl Grant {
    pub fn new(grantee: Grantee, permission: Permission) -> Self {
        Self {
            grantee,
            permission,
        }
    }
}

/// Owner plus an ordered list of grants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControlList {
    pub owner_id: String,
    pub grants: Vec<Grant>,
}

impl AccessControlList {
    pub fn new(owner_id: &str, grants: Vec<Grant>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            grants,
        }
    }

    /// `private`: the owner holds FULL_CONTROL and nobody else holds anything.
    pub fn private(owner_id: &str) -> Self {
        CannedAcl::Private.to_acl(owner_id)
    }

    /// Three-tier grant check: explicit grantee id, then the
    /// AuthenticatedUsers group (authenticated callers only), then AllUsers.
    pub fn check(&self, grantee_id: Option<&str>, authenticated: bool, requested: Permission) -> bool {
        let grants_for = |who: &Grantee| {
            self.grants
                .iter()
                .any(|g| &g.grantee == who && g.permission.satisfies(requested))
        };

        if let Some(id) = grantee_id {
            if grants_for(&Grantee::CanonicalUser(id.to_string())) {
                return true;
            }
        }
        if authenticated && grants_for(&Grantee::AuthenticatedUsers) {
            return true;
        }
        grants_for(&Grantee::AllUsers)
    }

    /// Evaluate this ACL for a caller.
    pub fn evaluate(&self, caller: &Caller, requested: Permission) -> bool {
        match caller.principal() {
            Some(p) => self.check(Some(&p.user_id), true, requested),
            None => self.check(None, false, requested),
        }
    }
}

/// Predefined ACLs selectable through `x-amz-acl`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CannedAcl {
    /// Owner gets FULL_CONTROL. No one else has access.
    #[default]
    Private,
    /// Owner gets FULL_CONTROL. AllUsers get READ.
    PublicRead,
    /// Owner gets FULL_CONTROL. AllUsers get READ and WRITE.
    PublicReadWrite,
    /// Owner gets FULL_CONTROL. AuthenticatedUsers get READ.
    AuthenticatedRead,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
        }
    }

    pub fn to_acl(&self, owner_id: &str) -> AccessControlList {
        let mut grants = vec![Grant::new(
            Grantee::CanonicalUser(owner_id.to_string()),
            Permission::FullControl,
        )];
        match self {
            CannedAcl::Private => {}
            CannedAcl::PublicRead => {
                grants.push(Grant::new(Grantee::AllUsers, Permission::Read));
            }
            CannedAcl::PublicReadWrite => {
                grants.push(Grant::new(Grantee::AllUsers, Permission::Read));
                grants.push(Grant::new(Grantee::AllUsers, Permission::Write));
            }
            CannedAcl::AuthenticatedRead => {
                grants.push(Grant::new(Grantee::AuthenticatedUsers, Permission::Read));
            }
        }
        AccessControlList::new(owner_id, grants)
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CannedAcl {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(CannedAcl::Private),
            "public-read" => Ok(CannedAcl::PublicRead),
            "public-read-write" => Ok(CannedAcl::PublicReadWrite),
            "authenticated-read" => Ok(CannedAcl::AuthenticatedRead),
            other => Err(AclError::Invalid(format!("unknown canned ACL: {}", other))),
        }
    }
}

/// ACL collaborator errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    #[error("invalid ACL: {0}")]
    Invalid(String),

    #[error("ACL backend error: {0}")]
    Backend(String),
}

/// Storage of bucket and object ACLs, keyed by tenant-qualified bucket path.
#[async_trait]
pub trait AclStore: Send + Sync {
    async fn get_bucket_acl(&self, bucket: &BucketPath) -> Result<Option<AccessControlList>, AclError>;

    async fn set_bucket_acl(&self, bucket: &BucketPath, acl: AccessControlList) -> Result<(), AclError>;

    async fn get_object_acl(
        &self,
        bucket: &BucketPath,
        key: &str,
    ) -> Result<Option<AccessControlList>, AclError>;

    async fn set_object_acl(
        &self,
        bucket: &BucketPath,
        key: &str,
        acl: AccessControlList,
    ) -> Result<(), AclError>;

    async fn delete_object_acl(&self, bucket: &BucketPath, key: &str) -> Result<(), AclError>;

    /// Drop the bucket ACL and every object ACL under it.
    async fn delete_bucket_acls(&self, bucket: &BucketPath) -> Result<(), AclError>;
}

/// In-memory ACL store
#[derive(Default)]
pub struct MemoryAclStore {
    buckets: RwLock<HashMap<String, AccessControlList>>,
    objects: RwLock<HashMap<(String, String), AccessControlList>>,
}

impl MemoryAclStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AclStore for MemoryAclStore {
    async fn get_bucket_acl(&self, bucket: &BucketPath) -> Result<Option<AccessControlList>, AclError> {
        Ok(self.buckets.read().get(&bucket.as_storage_path()).cloned())
    }

    async fn set_bucket_acl(&self, bucket: &BucketPath, acl: AccessControlList) -> Result<(), AclError> {
        self.buckets.write().insert(bucket.as_storage_path(), acl);
        Ok(())
    }

    async fn get_object_acl(
        &self,
        bucket: &BucketPath,
        key: &str,
    ) -> Result<Option<AccessControlList>, AclError> {
        Ok(self
            .objects
            .read()
            .get(&(bucket.as_storage_path(), key.to_string()))
            .cloned())
    }

    async fn set_object_acl(
        &self,
        bucket: &BucketPath,
        key: &str,
        acl: AccessControlList,
    ) -> Result<(), AclError> {
        self.objects
            .write()
            .insert((bucket.as_storage_path(), key.to_string()), acl);
        Ok(())
    }

    async fn delete_object_acl(&self, bucket: &BucketPath, key: &str) -> Result<(), AclError> {
        self.objects
            .write()
            .remove(&(bucket.as_storage_path(), key.to_string()));
        Ok(())
    }

    async fn delete_bucket_acls(&self, bucket: &BucketPath) -> Result<(), AclError> {
        let path = bucket.as_storage_path();
        self.buckets.write().remove(&path);
        self.objects.write().retain(|(b, _), _| b != &path);
        Ok(())
    }
}
