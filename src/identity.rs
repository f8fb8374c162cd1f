//! Identity collaborator: access key directory and tenant quotas

use crate::config::CredentialConfig;
use crate::context::Principal;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors surfaced by the identity directory
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("access key not found")]
    AccessKeyNotFound,

    #[error("access key is inactive")]
    AccessKeyInactive,

    #[error("tenant {tenant} has reached its limit of {limit} buckets")]
    QuotaExceeded { tenant: String, limit: usize },
}

/// A secret access key, wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<String>);

impl SecretKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// One entry of the access key directory
#[derive(Debug, Clone)]
pub struct AccessKeyRecord {
    pub access_key_id: String,
    pub secret: SecretKey,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub active: bool,
}

impl AccessKeyRecord {
    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            access_key_id: self.access_key_id.clone(),
        }
    }
}

/// Access key → secret resolution and tenant bookkeeping.
pub trait IdentityProvider: Send + Sync {
    /// Look up an access key, active or not.
    fn lookup_access_key(&self, access_key_id: &str) -> Result<AccessKeyRecord, IdentityError>;

    /// Look up an access key that may be used for signing.
    fn active_access_key(&self, access_key_id: &str) -> Result<AccessKeyRecord, IdentityError> {
        let record = self.lookup_access_key(access_key_id)?;
        if !record.active {
            return Err(IdentityError::AccessKeyInactive);
        }
        Ok(record)
    }

    /// Whether `principal` may create one more bucket given `owned` existing ones.
    fn check_bucket_quota(&self, principal: &Principal, owned: usize) -> Result<(), IdentityError>;
}

/// Identity directory built from configuration.
pub struct StaticIdentityProvider {
    keys: HashMap<String, AccessKeyRecord>,
    max_buckets_per_tenant: usize,
}

impl StaticIdentityProvider {
    pub fn new(records: Vec<AccessKeyRecord>, max_buckets_per_tenant: usize) -> Self {
        Self {
            keys: records
                .into_iter()
                .map(|r| (r.access_key_id.clone(), r))
                .collect(),
            max_buckets_per_tenant,
        }
    }

    pub fn from_config(credentials: &[CredentialConfig], max_buckets_per_tenant: usize) -> Self {
        let records = credentials
            .iter()
            .map(|c| AccessKeyRecord {
                access_key_id: c.access_key_id.clone(),
                secret: SecretKey::new(c.secret_access_key.clone()),
                user_id: c.user_id.clone(),
                tenant_id: c.tenant_id.clone().filter(|t| !t.is_empty()),
                active: c.active,
            })
            .collect();
        Self::new(records, max_buckets_per_tenant)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn lookup_access_key(&self, access_key_id: &str) -> Result<AccessKeyRecord, IdentityError> {
        self.keys
            .get(access_key_id)
            .cloned()
            .ok_or(IdentityError::AccessKeyNotFound)
    }

    fn check_bucket_quota(&self, principal: &Principal, owned: usize) -> Result<(), IdentityError> {
        if owned >= self.max_buckets_per_tenant {
            return Err(IdentityError::QuotaExceeded {
                tenant: principal
                    .tenant_id
                    .clone()
                    .unwrap_or_else(|| principal.user_id.clone()),
                limit: self.max_buckets_per_tenant,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticIdentityProvider {
        StaticIdentityProvider::new(
            vec![
                AccessKeyRecord {
                    access_key_id: "AKACTIVE".to_string(),
                    secret: SecretKey::new("s1"),
                    user_id: "alice".to_string(),
                    tenant_id: Some("acme".to_string()),
                    active: true,
                },
                AccessKeyRecord {
                    access_key_id: "AKOLD".to_string(),
                    secret: SecretKey::new("s2"),
                    user_id: "bob".to_string(),
                    tenant_id: None,
                    active: false,
                },
            ],
            2,
        )
    }

    #[test]
    fn test_lookup() {
        let p = provider();
        assert_eq!(p.len(), 2);
        let rec = p.active_access_key("AKACTIVE").unwrap();
        assert_eq!(rec.secret.expose(), "s1");
        assert_eq!(rec.principal().tenant_id.as_deref(), Some("acme"));
        assert_eq!(
            p.active_access_key("AKNOPE").unwrap_err(),
            IdentityError::AccessKeyNotFound
        );
        assert_eq!(
            p.active_access_key("AKOLD").unwrap_err(),
            IdentityError::AccessKeyInactive
        );
        // Plain lookup still sees the inactive key
        assert!(p.lookup_access_key("AKOLD").is_ok());
    }

    #[test]
    fn test_bucket_quota() {
        let p = provider();
        let principal = p.lookup_access_key("AKACTIVE").unwrap().principal();
        assert!(p.check_bucket_quota(&principal, 1).is_ok());
        assert!(matches!(
            p.check_bucket_quota(&principal, 2),
            Err(IdentityError::QuotaExceeded { limit: 2, .. })
        ));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let rendered = format!("{:?}", SecretKey::new("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
