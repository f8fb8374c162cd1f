//! ACL and bucket policy sub-resources (`?acl`, `?policy`).

use super::{body_to_utf8, extract_canned_acl, xml_response, AppState, S3Error};
use crate::acl::{AccessControlList, CannedAcl};
use crate::api::xml::{acl_from_xml, acl_to_xml};
use crate::context::RequestContext;
use crate::policy::{BucketPolicy, S3Action};
use crate::types::{BucketInfo, BucketPath};
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::info;

/// New ACL from either `x-amz-acl` or an `AccessControlPolicy` body.
fn acl_from_request(
    headers: &HeaderMap,
    body: &Bytes,
    owner: &str,
) -> Result<AccessControlList, S3Error> {
    if let Some(canned) = extract_canned_acl(headers)? {
        return Ok(canned.to_acl(owner));
    }
    if body.is_empty() {
        return Err(S3Error::MalformedXML);
    }
    Ok(acl_from_xml(body_to_utf8(body)?, owner)?)
}

pub(super) async fn get_bucket_acl(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::GetBucketAcl, &bucket.path, None)
        .await?;
    let acl = state
        .acls
        .get_bucket_acl(&bucket.path)
        .await?
        .unwrap_or_else(|| AccessControlList::private(&bucket.owner_id));
    Ok(xml_response(acl_to_xml(&acl)))
}

pub(super) async fn put_bucket_acl(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::PutBucketAcl, &bucket.path, None)
        .await?;
    let acl = acl_from_request(headers, body, &bucket.owner_id)?;
    state.acls.set_bucket_acl(&bucket.path, acl).await?;
    info!("[{}] PUT bucket acl {}", ctx, bucket.path);
    Ok(StatusCode::OK.into_response())
}

pub(super) async fn get_object_acl(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    key: &str,
) -> Result<Response, S3Error> {
    // Missing objects surface as NoSuchKey only to callers who may read the bucket
    let prechecked = state
        .authorize_read(ctx, S3Action::GetObjectAcl, &bucket.path, key)
        .await?;
    if prechecked.is_none() {
        state.storage.get_object_metadata(&bucket.path, key).await?;
    }
    let acl = state
        .acls
        .get_object_acl(&bucket.path, key)
        .await?
        .unwrap_or_else(|| AccessControlList::private(&bucket.owner_id));
    Ok(xml_response(acl_to_xml(&acl)))
}

pub(super) async fn put_object_acl(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    key: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::PutObjectAcl, &bucket.path, Some(key))
        .await?;
    state.storage.get_object_metadata(&bucket.path, key).await?;

    let owner = match state.acls.get_object_acl(&bucket.path, key).await? {
        Some(existing) => existing.owner_id,
        None => bucket.owner_id.clone(),
    };
    let acl = acl_from_request(headers, body, &owner)?;
    state.acls.set_object_acl(&bucket.path, key, acl).await?;
    info!("[{}] PUT object acl {}/{}", ctx, bucket.path, key);
    Ok(StatusCode::OK.into_response())
}

/// ACL recorded for an object the caller just wrote.
pub(super) async fn apply_object_acl(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    key: &str,
    canned: Option<CannedAcl>,
) -> Result<(), S3Error> {
    let canned = canned.unwrap_or(CannedAcl::Private);
    let owner = AppState::acl_owner(ctx, &bucket.owner_id);
    state
        .acls
        .set_object_acl(&bucket.path, key, canned.to_acl(&owner))
        .await?;
    Ok(())
}

pub(super) async fn get_bucket_policy(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketPath,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::GetBucketPolicy, bucket, None)
        .await?;
    let policy = state
        .policies
        .get_policy(bucket)
        .await?
        .ok_or_else(|| S3Error::NoSuchBucketPolicy(bucket.name.clone()))?;
    Ok((
        StatusCode::OK,
        [("Content-Type", "application/json")],
        policy.as_json().to_string(),
    )
        .into_response())
}

pub(super) async fn put_bucket_policy(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketPath,
    body: &Bytes,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::PutBucketPolicy, bucket, None)
        .await?;
    let json = std::str::from_utf8(body)
        .map_err(|_| S3Error::MalformedPolicy("Policy is not valid UTF-8".to_string()))?;
    let policy = BucketPolicy::parse(&bucket.name, json)?;
    state.policies.put_policy(bucket, policy).await?;
    info!("[{}] PUT bucket policy {}", ctx, bucket);
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(super) async fn delete_bucket_policy(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketPath,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::DeleteBucketPolicy, bucket, None)
        .await?;
    if !state.policies.delete_policy(bucket).await? {
        return Err(S3Error::NoSuchBucketPolicy(bucket.name.clone()));
    }
    info!("[{}] DELETE bucket policy {}", ctx, bucket);
    Ok(StatusCode::NO_CONTENT.into_response())
}
