//! Object-level S3 handlers: GET, HEAD, PUT, DELETE, COPY, plus the
//! object-scoped multipart calls that share these verbs (UploadPart,
//! ListParts, AbortMultipartUpload).

use super::acl::{apply_object_acl, get_object_acl, put_object_acl};
use super::{
    build_object_headers, decode_request_body, extract_canned_acl, extract_content_type,
    extract_user_metadata, header_str, hval, reject_unsupported, xml_response, AppState, S3Error,
};
use crate::api::extractors::{S3Query, ValidatedPath};
use crate::api::xml::{CopyObjectResult, ListPartsResult};
use crate::context::RequestContext;
use crate::multipart::MAX_LIST_PARTS;
use crate::policy::S3Action;
use crate::range::{evaluate_preconditions, resolve_range, Precondition};
use crate::storage::{PutOptions, StorageError};
use crate::types::{validate_bucket_name, validate_object_key, BucketInfo, ObjectMetadata};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// PUT object handler with copy detection and multipart upload support
/// PUT /{bucket}/{key}?acl                    -> PutObjectAcl
/// PUT /{bucket}/{key}?partNumber&uploadId    -> UploadPart
/// PUT /{bucket}/{key} + x-amz-copy-source    -> CopyObject
/// PUT /{bucket}/{key}                        -> PutObject
#[instrument(skip(state, ctx, headers, body), fields(request_id = %ctx.ids.request_id))]
pub async fn put_object_or_copy(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;
    let info = state.resolve_bucket(&bucket).await?;

    if query.has("acl") {
        return put_object_acl(&state, &ctx, &info, &key, &headers, &body).await;
    }

    match (query.parse_num::<u32>("partNumber")?, query.get("uploadId")) {
        (Some(part_number), Some(upload_id)) => {
            return upload_part(&state, &ctx, &info, &key, upload_id, part_number, &headers, body)
                .await;
        }
        (None, None) => {}
        _ => {
            return Err(S3Error::InvalidArgument(
                "partNumber and uploadId must be supplied together".to_string(),
            ));
        }
    }

    if headers.contains_key("x-amz-copy-source") {
        copy_object(&state, &ctx, &info, &key, &headers).await
    } else {
        put_object(&state, &ctx, &info, &key, &headers, body).await
    }
}

async fn put_object(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    key: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::PutObject, &bucket.path, Some(key))
        .await?;
    let canned = extract_canned_acl(headers)?;

    let data = decode_request_body(headers, body)?;
    let options = PutOptions {
        content_type: extract_content_type(headers),
        user_metadata: extract_user_metadata(headers),
    };
    let meta = state
        .storage
        .put_object(&bucket.path, key, data, options)
        .await?;
    apply_object_acl(state, ctx, bucket, key, canned).await?;
    info!("[{}] PUT {}/{} ({} bytes)", ctx, bucket.path, key, meta.size);

    Ok((StatusCode::OK, [("ETag", hval(&meta.etag))]).into_response())
}

#[allow(clippy::too_many_arguments)]
async fn upload_part(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    key: &str,
    upload_id: &str,
    part_number: u32,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::PutObject, &bucket.path, Some(key))
        .await?;
    crate::multipart::validate_part_number(part_number)?;

    let data = decode_request_body(headers, body)?;
    let part = state
        .multipart
        .upload_part(&bucket.path, key, upload_id, part_number, data)
        .await?;
    debug!(
        "[{}] UploadPart {}/{} part={} uploadId={}",
        ctx, bucket.path, key, part_number, upload_id
    );

    Ok((StatusCode::OK, [("ETag", hval(&part.etag))]).into_response())
}

/// Split `x-amz-copy-source` (`/bucket/key` or `bucket/key`, URL-encoded).
fn parse_copy_source(raw: &str) -> Result<(String, String), S3Error> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| S3Error::InvalidArgument("Invalid copy source encoding".to_string()))?;
    let source = decoded.trim_start_matches('/');
    // Versioned sources are not supported; drop the qualifier
    let source = source.split_once("?versionId=").map_or(source, |(s, _)| s);

    let (bucket, key) = source
        .split_once('/')
        .filter(|(_, k)| !k.is_empty())
        .ok_or_else(|| S3Error::InvalidArgument("Copy source must be bucket/key".to_string()))?;
    validate_bucket_name(bucket).map_err(|e| S3Error::InvalidBucketName(e.to_string()))?;
    validate_object_key(key).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
    Ok((bucket.to_string(), key.to_string()))
}

async fn copy_object(
    state: &AppState,
    ctx: &RequestContext,
    dest: &BucketInfo,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let raw = header_str(headers, "x-amz-copy-source").unwrap_or_default();
    let (source_bucket, source_key) = parse_copy_source(raw)?;
    let source = state.resolve_bucket(&source_bucket).await?;

    state
        .authorize_read(ctx, S3Action::GetObject, &source.path, &source_key)
        .await?;
    state
        .authorize(ctx, S3Action::PutObject, &dest.path, Some(key))
        .await?;
    let canned = extract_canned_acl(headers)?;

    let (source_meta, data) = state.storage.get_object(&source.path, &source_key).await?;

    let options = if header_str(headers, "x-amz-metadata-directive") == Some("REPLACE") {
        PutOptions {
            content_type: extract_content_type(headers),
            user_metadata: extract_user_metadata(headers),
        }
    } else {
        PutOptions {
            content_type: source_meta.content_type.clone(),
            user_metadata: source_meta.user_metadata.clone(),
        }
    };

    let meta = state
        .storage
        .put_object(&dest.path, key, data, options)
        .await?;
    apply_object_acl(state, ctx, dest, key, canned).await?;
    info!(
        "[{}] COPY {}/{} -> {}/{} ({} bytes)",
        ctx, source.path, source_key, dest.path, key, meta.size
    );

    let result = CopyObjectResult {
        etag: meta.etag,
        last_modified: meta.last_modified,
    };
    Ok(xml_response(result.to_xml()))
}

/// Apply `If-Match` / `If-None-Match`; `Some` is the response to send instead.
fn check_preconditions(
    headers: &HeaderMap,
    metadata: &ObjectMetadata,
) -> Result<Option<Response>, S3Error> {
    match evaluate_preconditions(
        header_str(headers, "if-match"),
        header_str(headers, "if-none-match"),
        &metadata.etag,
    ) {
        Precondition::Proceed => Ok(None),
        Precondition::Failed => Err(S3Error::PreconditionFailed),
        Precondition::NotModified => Ok(Some(
            (StatusCode::NOT_MODIFIED, [("ETag", hval(&metadata.etag))]).into_response(),
        )),
    }
}

/// GET object handler
/// GET /{bucket}/{key}?acl         -> GetObjectAcl
/// GET /{bucket}/{key}?uploadId=X  -> ListParts
/// GET /{bucket}/{key}             -> GetObject (conditionals, then Range)
#[instrument(skip(state, ctx, headers), fields(request_id = %ctx.ids.request_id))]
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;
    let info = state.resolve_bucket(&bucket).await?;

    if query.has("acl") {
        return get_object_acl(&state, &ctx, &info, &key).await;
    }
    if let Some(upload_id) = query.get("uploadId") {
        return list_parts(&state, &ctx, &info, &key, upload_id, &query).await;
    }

    state
        .authorize_read(&ctx, S3Action::GetObject, &info.path, &key)
        .await?;
    let (metadata, data) = state.storage.get_object(&info.path, &key).await?;

    if let Some(response) = check_preconditions(&headers, &metadata)? {
        return Ok(response);
    }

    let mut response_headers = build_object_headers(&metadata);
    match resolve_range(header_str(&headers, "range"), metadata.size)? {
        Some(range) => {
            debug!(
                "[{}] GET {}/{} range {}",
                ctx,
                info.path,
                key,
                range.content_range(metadata.size)
            );
            response_headers.insert("Content-Length", HeaderValue::from(range.len()));
            response_headers.insert(
                "Content-Range",
                hval(&range.content_range(metadata.size)),
            );
            let slice = data.slice(range.as_slice_range());
            Ok((StatusCode::PARTIAL_CONTENT, response_headers, slice).into_response())
        }
        None => {
            debug!("[{}] GET {}/{} ({} bytes)", ctx, info.path, key, data.len());
            Ok((StatusCode::OK, response_headers, data).into_response())
        }
    }
}

async fn list_parts(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketInfo,
    key: &str,
    upload_id: &str,
    query: &S3Query,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::ListMultipartUploadParts, &bucket.path, Some(key))
        .await?;

    let marker = query.parse_num::<u32>("part-number-marker")?.unwrap_or(0);
    let max_parts = query
        .parse_num::<usize>("max-parts")?
        .unwrap_or(MAX_LIST_PARTS);
    let page = state
        .multipart
        .list_parts(&bucket.path, key, upload_id, marker, max_parts)
        .await?;

    let result = ListPartsResult {
        bucket: bucket.path.name.clone(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        part_number_marker: page.part_number_marker,
        next_part_number_marker: page.next_part_number_marker,
        max_parts: page.max_parts,
        is_truncated: page.is_truncated,
        parts: page.parts,
    };
    Ok(xml_response(result.to_xml()))
}

/// HEAD object handler
/// HEAD /{bucket}/{key}
#[instrument(skip(state, ctx, headers), fields(request_id = %ctx.ids.request_id))]
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;
    let info = state.resolve_bucket(&bucket).await?;

    let metadata = match state
        .authorize_read(&ctx, S3Action::GetObject, &info.path, &key)
        .await?
    {
        Some(metadata) => metadata,
        None => state.storage.get_object_metadata(&info.path, &key).await?,
    };

    if let Some(response) = check_preconditions(&headers, &metadata)? {
        return Ok(response);
    }

    let mut response_headers = build_object_headers(&metadata);
    if let Some(range) = resolve_range(header_str(&headers, "range"), metadata.size)? {
        response_headers.insert("Content-Length", HeaderValue::from(range.len()));
        response_headers.insert(
            "Content-Range",
            hval(&range.content_range(metadata.size)),
        );
        return Ok((StatusCode::PARTIAL_CONTENT, response_headers).into_response());
    }
    Ok((StatusCode::OK, response_headers).into_response())
}

/// DELETE object handler
/// DELETE /{bucket}/{key}?uploadId=X -> AbortMultipartUpload
/// DELETE /{bucket}/{key}            -> DeleteObject (idempotent)
#[instrument(skip(state, ctx, headers), fields(request_id = %ctx.ids.request_id))]
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;
    let info = state.resolve_bucket(&bucket).await?;

    if let Some(upload_id) = query.get("uploadId") {
        state
            .authorize(&ctx, S3Action::AbortMultipartUpload, &info.path, Some(&key))
            .await?;
        state.multipart.abort(&info.path, &key, upload_id).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    state
        .authorize(&ctx, S3Action::DeleteObject, &info.path, Some(&key))
        .await?;
    // ACL first: a failure here leaves the object untouched
    state.acls.delete_object_acl(&info.path, &key).await?;
    match state.storage.delete_object(&info.path, &key).await {
        Ok(()) | Err(StorageError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    info!("[{}] DELETE {}/{}", ctx, info.path, key);

    // S3 returns 204 No Content on successful delete
    Ok(StatusCode::NO_CONTENT.into_response())
}
