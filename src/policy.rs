//! Bucket policies: JSON documents of Allow statements
//!
//! A statement grants when its principal, action and resource all match.
//! Any matching Allow statement grants; order does not matter. Deny
//! statements are accepted for compatibility but never consulted.

use crate::context::Caller;
use crate::types::BucketPath;
use async_trait::async_trait;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

const S3_ARN_PREFIX: &str = "arn:aws:s3:::";

/// Policy errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("{0}")]
    Malformed(String),

    #[error("policy backend error: {0}")]
    Backend(String),
}

/// S3 actions the permission cascade asks about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S3Action {
    GetObject,
    PutObject,
    DeleteObject,
    GetObjectAcl,
    PutObjectAcl,
    ListBucket,
    ListBucketMultipartUploads,
    ListMultipartUploadParts,
    AbortMultipartUpload,
    GetBucketAcl,
    PutBucketAcl,
    GetBucketPolicy,
    PutBucketPolicy,
    DeleteBucketPolicy,
    DeleteBucket,
}

impl S3Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            S3Action::GetObject => "s3:GetObject",
            S3Action::PutObject => "s3:PutObject",
            S3Action::DeleteObject => "s3:DeleteObject",
            S3Action::GetObjectAcl => "s3:GetObjectAcl",
            S3Action::PutObjectAcl => "s3:PutObjectAcl",
            S3Action::ListBucket => "s3:ListBucket",
            S3Action::ListBucketMultipartUploads => "s3:ListBucketMultipartUploads",
            S3Action::ListMultipartUploadParts => "s3:ListMultipartUploadParts",
            S3Action::AbortMultipartUpload => "s3:AbortMultipartUpload",
            S3Action::GetBucketAcl => "s3:GetBucketAcl",
            S3Action::PutBucketAcl => "s3:PutBucketAcl",
            S3Action::GetBucketPolicy => "s3:GetBucketPolicy",
            S3Action::PutBucketPolicy => "s3:PutBucketPolicy",
            S3Action::DeleteBucketPolicy => "s3:DeleteBucketPolicy",
            S3Action::DeleteBucket => "s3:DeleteBucket",
        }
    }

    /// Object-scoped actions are matched against `arn:aws:s3:::bucket/key`.
    pub fn is_object_scoped(&self) -> bool {
        self.as_str().contains("Object")
    }

    /// The ACL permission equivalent to this action.
    pub fn permission(&self) -> crate::acl::Permission {
        use crate::acl::Permission;
        match self {
            S3Action::GetObject
            | S3Action::ListBucket
            | S3Action::ListBucketMultipartUploads
            | S3Action::ListMultipartUploadParts => Permission::Read,
            S3Action::PutObject | S3Action::DeleteObject | S3Action::AbortMultipartUpload => {
                Permission::Write
            }
            S3Action::GetObjectAcl
            | S3Action::PutObjectAcl
            | S3Action::GetBucketAcl
            | S3Action::PutBucketAcl
            | S3Action::GetBucketPolicy
            | S3Action::PutBucketPolicy
            | S3Action::DeleteBucketPolicy
            | S3Action::DeleteBucket => Permission::FullControl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PrincipalDoc {
    Wildcard(String),
    Aws {
        #[serde(rename = "AWS")]
        aws: OneOrMany,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StatementsDoc {
    One(Box<StatementDoc>),
    Many(Vec<StatementDoc>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatementDoc {
    #[serde(default)]
    sid: Option<String>,
    effect: String,
    principal: PrincipalDoc,
    action: OneOrMany,
    resource: OneOrMany,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyDoc {
    #[serde(default)]
    version: Option<String>,
    statement: StatementsDoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PrincipalMatch {
    Anyone,
    Ids(Vec<String>),
}

impl PrincipalMatch {
    fn matches(&self, caller: &Caller) -> bool {
        match self {
            PrincipalMatch::Anyone => true,
            PrincipalMatch::Ids(ids) => match caller.principal() {
                Some(p) => ids
                    .iter()
                    .any(|id| id == "*" || *id == p.user_id || *id == p.access_key_id),
                None => ids.iter().any(|id| id == "*"),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Statement {
    sid: Option<String>,
    allow: bool,
    principal: PrincipalMatch,
    actions: GlobSet,
    resources: GlobSet,
}

/// Escape glob metacharacters other than `*` and `?`.
fn wildcard_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn compile(patterns: &[String], case_insensitive: bool) -> Result<GlobSet, PolicyError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(&wildcard_glob(pattern))
            .literal_separator(false)
            .backslash_escape(true)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| PolicyError::Malformed(format!("Invalid pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PolicyError::Malformed(e.to_string()))
}

/// A validated, compiled bucket policy
#[derive(Debug, Clone)]
pub struct BucketPolicy {
    raw: String,
    statements: Vec<Statement>,
}

impl BucketPolicy {
    /// Parse and validate a policy document for `bucket`.
    pub fn parse(bucket: &str, json: &str) -> Result<Self, PolicyError> {
        let doc: PolicyDoc = serde_json::from_str(json)
            .map_err(|e| PolicyError::Malformed(format!("Policies must be valid JSON: {}", e)))?;

        if let Some(version) = &doc.version {
            if version != "2012-10-17" && version != "2008-10-17" {
                return Err(PolicyError::Malformed(format!(
                    "Unsupported policy version {}",
                    version
                )));
            }
        }

        let docs = match doc.statement {
            StatementsDoc::One(s) => vec![*s],
            StatementsDoc::Many(v) => v,
        };
        if docs.is_empty() {
            return Err(PolicyError::Malformed(
                "Policy must contain at least one statement".to_string(),
            ));
        }

        let statements = docs
            .into_iter()
            .map(|s| Self::compile_statement(bucket, s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: json.to_string(),
            statements,
        })
    }

    fn compile_statement(bucket: &str, doc: StatementDoc) -> Result<Statement, PolicyError> {
        let allow = match doc.effect.as_str() {
            "Allow" => true,
            "Deny" => false,
            other => {
                return Err(PolicyError::Malformed(format!("Invalid effect: {}", other)));
            }
        };

        let principal = match doc.principal {
            PrincipalDoc::Wildcard(s) if s == "*" => PrincipalMatch::Anyone,
            PrincipalDoc::Wildcard(s) => {
                return Err(PolicyError::Malformed(format!("Invalid principal: {}", s)));
            }
            PrincipalDoc::Aws { aws } => PrincipalMatch::Ids(aws.into_vec()),
        };

        let actions = doc.action.into_vec();
        if actions.is_empty() {
            return Err(PolicyError::Malformed("Missing required field Action".to_string()));
        }
        for action in &actions {
            if action != "*" && !action.to_ascii_lowercase().starts_with("s3:") {
                return Err(PolicyError::Malformed(format!(
                    "Policy has invalid action: {}",
                    action
                )));
            }
        }

        let resources = doc.resource.into_vec();
        if resources.is_empty() {
            return Err(PolicyError::Malformed(
                "Missing required field Resource".to_string(),
            ));
        }
        for resource in &resources {
            let target = resource
                .strip_prefix(S3_ARN_PREFIX)
                .map(|r| r.split('/').next().unwrap_or_default());
            match target {
                Some(b) if b == bucket || b.contains('*') || b.contains('?') => {}
                _ if resource == "*" => {}
                _ => {
                    return Err(PolicyError::Malformed(format!(
                        "Policy has invalid resource: {}",
                        resource
                    )));
                }
            }
        }

        Ok(Statement {
            sid: doc.sid,
            allow,
            principal,
            actions: compile(&actions, true)?,
            resources: compile(&resources, false)?,
        })
    }

    /// The document as uploaded.
    pub fn as_json(&self) -> &str {
        &self.raw
    }

    /// Sid of the first Allow statement granting `action` to `caller`.
    pub fn matching_statement(
        &self,
        caller: &Caller,
        action: S3Action,
        bucket: &str,
        key: Option<&str>,
    ) -> Option<&str> {
        let resource = match key {
            Some(key) if action.is_object_scoped() => {
                format!("{}{}/{}", S3_ARN_PREFIX, bucket, key)
            }
            _ => format!("{}{}", S3_ARN_PREFIX, bucket),
        };
        self.statements
            .iter()
            .find(|s| {
                s.allow
                    && s.principal.matches(caller)
                    && s.actions.is_match(action.as_str())
                    && s.resources.is_match(&resource)
            })
            .map(|s| s.sid.as_deref().unwrap_or("-"))
    }

    /// Whether any Allow statement grants `action` to `caller`.
    pub fn allows(&self, caller: &Caller, action: S3Action, bucket: &str, key: Option<&str>) -> bool {
        self.matching_statement(caller, action, bucket, key).is_some()
    }
}

/// Storage of bucket policies
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(&self, bucket: &BucketPath) -> Result<Option<BucketPolicy>, PolicyError>;

    async fn put_policy(&self, bucket: &BucketPath, policy: BucketPolicy) -> Result<(), PolicyError>;

    /// Returns whether a policy existed.
    async fn delete_policy(&self, bucket: &BucketPath) -> Result<bool, PolicyError>;
}

/// In-memory policy store
#[derive(Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<HashMap<String, BucketPolicy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get_policy(&self, bucket: &BucketPath) -> Result<Option<BucketPolicy>, PolicyError> {
        Ok(self.policies.read().get(&bucket.as_storage_path()).cloned())
    }

    async fn put_policy(&self, bucket: &BucketPath, policy: BucketPolicy) -> Result<(), PolicyError> {
        self.policies
            .write()
            .insert(bucket.as_storage_path(), policy);
        Ok(())
    }

    async fn delete_policy(&self, bucket: &BucketPath) -> Result<bool, PolicyError> {
        Ok(self
            .policies
            .write()
            .remove(&bucket.as_storage_path())
            .is_some())
    }
}
