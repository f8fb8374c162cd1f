//! Multipart upload S3 handlers: CreateMultipartUpload, CompleteMultipartUpload.

use super::acl::apply_object_acl;
use super::{
    body_to_utf8, decode_request_body, extract_canned_acl, extract_content_type,
    extract_user_metadata, hval, reject_unsupported, xml_response, AppState, S3Error,
};
use crate::api::extractors::{S3Query, ValidatedPath};
use crate::api::xml::{
    CompleteMultipartUploadRequest, CompleteMultipartUploadResult, InitiateMultipartUploadResult,
};
use crate::context::RequestContext;
use crate::multipart::CompletedPart;
use crate::policy::S3Action;
use crate::storage::PutOptions;
use crate::types::BucketInfo;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// POST object handler, dispatches multipart upload operations by query param.
#[instrument(skip(state, ctx, headers, body), fields(request_id = %ctx.ids.request_id))]
pub async fn post_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;
    let info = state.resolve_bucket(&bucket).await?;

    if query.has("uploads") {
        initiate_multipart_upload(&state, &ctx, &info, &key, &headers).await
    } else if let Some(upload_id) = query.get("uploadId") {
        complete_multipart_upload(&state, &ctx, &info, &key, upload_id, &headers, body).await
    } else {
        Err(S3Error::InvalidRequest(
            "POST on object requires ?uploads or ?uploadId parameter".to_string(),
        ))
    }
}

/// POST /{bucket}/{key}?uploads: CreateMultipartUpload
async fn initiate_multipart_upload(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::PutObject, &bucket.path, Some(key))
        .await?;
    // Reject a bad canned ACL now rather than at completion
    extract_canned_acl(headers)?;

    let options = PutOptions {
        content_type: extract_content_type(headers),
        user_metadata: extract_user_metadata(headers),
    };
    let upload = state.multipart.create(&bucket.path, key, options).await?;
    info!(
        "[{}] CreateMultipartUpload {}/{} uploadId={}",
        ctx, bucket.path, key, upload.upload_id
    );

    let xml = InitiateMultipartUploadResult {
        bucket: bucket.path.name.clone(),
        key: key.to_string(),
        upload_id: upload.upload_id,
    }
    .to_xml();
    Ok(xml_response(xml))
}

/// POST /{bucket}/{key}?uploadId=X: CompleteMultipartUpload
async fn complete_multipart_upload(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    key: &str,
    upload_id: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::PutObject, &bucket.path, Some(key))
        .await?;
    let canned = extract_canned_acl(headers)?;

    let body = decode_request_body(headers, body)?;
    let complete_req = CompleteMultipartUploadRequest::from_xml(body_to_utf8(&body)?)
        .map_err(|e| {
            warn!("Failed to parse CompleteMultipartUpload XML: {}", e);
            S3Error::MalformedXML
        })?;

    let parts: Vec<CompletedPart> = complete_req
        .parts
        .into_iter()
        .map(|p| CompletedPart {
            part_number: p.part_number,
            etag: p.etag,
        })
        .collect();

    let meta = state
        .multipart
        .complete(&bucket.path, key, upload_id, &parts)
        .await?;
    apply_object_acl(state, ctx, bucket, key, canned).await?;
    info!(
        "[{}] CompleteMultipartUpload {}/{} uploadId={} etag={}",
        ctx, bucket.path, key, upload_id, meta.etag
    );

    let xml = CompleteMultipartUploadResult {
        location: format!("/{}/{}", bucket.path.name, key),
        bucket: bucket.path.name.clone(),
        key: key.to_string(),
        etag: meta.etag.clone(),
    }
    .to_xml();
    Ok((
        StatusCode::OK,
        [("Content-Type", hval("application/xml")), ("ETag", hval(&meta.etag))],
        xml,
    )
        .into_response())
}
