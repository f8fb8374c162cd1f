//! Custom Axum extractors for S3 API validation
//!
//! These extractors provide automatic validation of S3 request parameters,
//! eliminating repetitive validation code from handlers.

use super::errors::S3Error;
use crate::context::{RequestContext, RequestIds};
use crate::signature::canonical::parse_query;
use crate::types::{validate_bucket_name, validate_object_key};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use std::convert::Infallible;

/// Validated bucket extractor
///
/// Checks the bucket name against the S3 naming rules. Returns
/// `S3Error::InvalidBucketName` if validation fails.
///
/// # Example
/// ```ignore
/// async fn head_bucket(
///     State(state): State<Arc<AppState>>,
///     ValidatedBucket(bucket): ValidatedBucket,
/// ) -> Result<Response, S3Error> {
///     // bucket is guaranteed to be a well-formed name here
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ValidatedBucket(pub String);

impl std::ops::Deref for ValidatedBucket {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedBucket
where
    S: Send + Sync,
{
    type Rejection = S3Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(bucket): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| S3Error::InvalidArgument("Invalid bucket path".to_string()))?;

        validate_bucket_name(&bucket).map_err(|e| S3Error::InvalidBucketName(e.to_string()))?;

        Ok(ValidatedBucket(bucket))
    }
}

/// Validated bucket and key extractor
///
/// Validates the bucket name and the key. The key is taken verbatim from the
/// decoded path, without the separator slash.
#[derive(Debug, Clone)]
pub struct ValidatedPath {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedPath
where
    S: Send + Sync,
{
    type Rejection = S3Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((bucket, key)): Path<(String, String)> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| S3Error::InvalidArgument("Invalid bucket/key path".to_string()))?;

        validate_bucket_name(&bucket).map_err(|e| S3Error::InvalidBucketName(e.to_string()))?;

        // The catch-all segment may still carry the separator
        let key = key.strip_prefix('/').unwrap_or(&key).to_string();
        validate_object_key(&key).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;

        Ok(ValidatedPath { bucket, key })
    }
}

/// Decoded query parameters, in request order.
///
/// S3 sub-resources (`?acl`, `?uploads`) are value-less flags, which a typed
/// `Query<T>` handles poorly; lookups here treat them as present with an
/// empty value.
#[derive(Debug, Clone, Default)]
pub struct S3Query(pub Vec<(String, String)>);

impl S3Query {
    pub fn parse(raw: &str) -> Self {
        S3Query(parse_query(raw))
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// A numeric parameter; absent means `None`, unparsable is an error.
    pub fn parse_num<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, S3Error> {
        self.get(name)
            .map(|v| {
                v.parse().map_err(|_| {
                    S3Error::InvalidArgument(format!("{} must be an integer, got '{}'", name, v))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for S3Query
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(S3Query::parse(parts.uri.query().unwrap_or("")))
    }
}

/// The context the authentication layer attached to the request; anonymous
/// with fresh identifiers if none was attached.
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::anonymous(RequestIds::generate())))
    }
}
