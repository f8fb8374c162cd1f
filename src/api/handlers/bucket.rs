//! Bucket-level S3 handlers: CREATE, DELETE, HEAD, LIST, batch delete, and
//! the bucket sub-resources (ACL, policy, ListMultipartUploads).

use super::acl::{delete_bucket_policy, get_bucket_acl, get_bucket_policy, put_bucket_acl, put_bucket_policy};
use super::{
    body_to_utf8, decode_request_body, extract_canned_acl, reject_unsupported, xml_response,
    AppState, S3Error,
};
use crate::acl::CannedAcl;
use crate::api::extractors::{S3Query, ValidatedBucket};
use crate::api::xml::{
    BucketEntry, DeleteRequest, ListBucketResult, ListBucketsResult, ListMultipartUploadsResult,
    ListPagination,
};
use crate::batch;
use crate::context::RequestContext;
use crate::multipart::{UploadsQuery, MAX_LIST_UPLOADS};
use crate::policy::S3Action;
use crate::storage::{ListQuery, StorageError};
use crate::types::BucketPath;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Keys returned by a listing when `max-keys` is absent, and the ceiling when present.
const DEFAULT_MAX_KEYS: usize = 1000;

/// GET / - list the caller's own buckets.
#[instrument(skip(state, ctx), fields(request_id = %ctx.ids.request_id))]
pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Response, S3Error> {
    let principal = ctx.caller.principal().ok_or_else(S3Error::access_denied)?;

    let buckets = state
        .storage
        .list_buckets(principal.tenant_id.as_deref())
        .await?;
    debug!("[{}] LIST buckets: {} found", ctx, buckets.len());

    let result = ListBucketsResult {
        owner_id: principal.user_id.clone(),
        owner_display_name: principal.user_id.clone(),
        buckets: buckets
            .into_iter()
            .map(|b| BucketEntry {
                name: b.path.name,
                creation_date: b.created_at,
            })
            .collect(),
    };
    Ok(xml_response(result.to_xml()))
}

/// Bucket-level PUT handler
/// PUT /{bucket}?acl    -> PutBucketAcl
/// PUT /{bucket}?policy -> PutBucketPolicy
/// PUT /{bucket}        -> CreateBucket
#[instrument(skip(state, ctx, headers, body), fields(request_id = %ctx.ids.request_id))]
pub async fn bucket_put_handler(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;

    if query.has("acl") {
        let info = state.resolve_bucket(&bucket).await?;
        return put_bucket_acl(&state, &ctx, &info, &headers, &body).await;
    }
    if query.has("policy") {
        let info = state.resolve_bucket(&bucket).await?;
        return put_bucket_policy(&state, &ctx, &info.path, &body).await;
    }

    create_bucket(&state, &ctx, &bucket, &headers).await
}

async fn create_bucket(
    state: &AppState,
    ctx: &RequestContext,
    name: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let principal = ctx.caller.principal().ok_or_else(S3Error::access_denied)?;
    let canned = extract_canned_acl(headers)?.unwrap_or(CannedAcl::Private);

    match state.storage.resolve_bucket(name).await {
        Ok(existing) if ctx.is_same_tenant(existing.path.tenant()) => {
            return Err(S3Error::BucketAlreadyOwnedByYou(name.to_string()));
        }
        Ok(_) => return Err(S3Error::BucketAlreadyExists(name.to_string())),
        Err(StorageError::BucketNotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let owned = state
        .storage
        .list_buckets(principal.tenant_id.as_deref())
        .await?
        .len();
    state.identity.check_bucket_quota(principal, owned)?;

    let path = BucketPath::new(principal.tenant_id.as_deref(), name);
    let info = state.storage.create_bucket(&path, &principal.user_id).await?;
    state
        .acls
        .set_bucket_acl(&info.path, canned.to_acl(&principal.user_id))
        .await?;
    info!("[{}] CREATE bucket {} ({})", ctx, info.path, canned);

    Ok((StatusCode::OK, [("Location", format!("/{}", name))]).into_response())
}

/// Bucket-level GET handler - dispatches on query params
/// GET /{bucket}?acl              -> GetBucketAcl
/// GET /{bucket}?policy           -> GetBucketPolicy
/// GET /{bucket}?uploads          -> ListMultipartUploads
/// GET /{bucket}?list-type=2      -> ListObjectsV2
/// GET /{bucket}                  -> ListObjects
#[instrument(skip(state, ctx, headers), fields(request_id = %ctx.ids.request_id))]
pub async fn bucket_get_handler(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;
    let info = state.resolve_bucket(&bucket).await?;

    if query.has("acl") {
        return get_bucket_acl(&state, &ctx, &info).await;
    }
    if query.has("policy") {
        return get_bucket_policy(&state, &ctx, &info.path).await;
    }
    if query.has("uploads") {
        return list_multipart_uploads(&state, &ctx, &info.path, &query).await;
    }

    list_objects(&state, &ctx, &info.path, &query).await
}

fn encode_continuation_token(key: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(key)
}

fn decode_continuation_token(token: &str) -> Result<String, S3Error> {
    base64::engine::general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| {
            S3Error::InvalidArgument("The continuation token provided is incorrect".to_string())
        })
}

async fn list_objects(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketPath,
    query: &S3Query,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::ListBucket, bucket, None)
        .await?;

    let is_v2 = query.get("list-type") == Some("2");
    let prefix = query.get("prefix").unwrap_or_default().to_string();
    let delimiter = query
        .get("delimiter")
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    let max_keys = query
        .parse_num::<usize>("max-keys")?
        .unwrap_or(DEFAULT_MAX_KEYS)
        .min(DEFAULT_MAX_KEYS);

    // v1 uses `marker`, v2 uses `continuation-token` (or `start-after`); all
    // three mean "start after this key"
    let continuation_token = query.get("continuation-token").map(str::to_string);
    let start_after_param = query.get("start-after").map(str::to_string);
    let start_after = if is_v2 {
        match continuation_token.as_deref() {
            Some(token) => Some(decode_continuation_token(token)?),
            None => start_after_param.clone(),
        }
    } else {
        query.get("marker").map(str::to_string)
    };

    let page = state
        .storage
        .list_objects(
            bucket,
            &ListQuery {
                prefix: prefix.clone(),
                delimiter: delimiter.clone(),
                start_after: start_after.filter(|s| !s.is_empty()),
                max_keys,
            },
        )
        .await?;
    debug!(
        "[{}] LIST {} prefix={:?}: {} objects, {} prefixes, truncated={}",
        ctx,
        bucket,
        prefix,
        page.objects.len(),
        page.common_prefixes.len(),
        page.is_truncated
    );

    let pagination = if is_v2 {
        ListPagination::V2 {
            continuation_token,
            next_continuation_token: page.next_marker.as_deref().map(encode_continuation_token),
            start_after: start_after_param,
        }
    } else {
        ListPagination::V1 {
            marker: query.get("marker").unwrap_or_default().to_string(),
            // NextMarker is only meaningful with a delimiter, but clients accept it always
            next_marker: page.next_marker.clone(),
        }
    };

    let result = ListBucketResult {
        name: bucket.name.clone(),
        prefix,
        delimiter,
        max_keys,
        is_truncated: page.is_truncated,
        contents: page.objects,
        common_prefixes: page.common_prefixes,
        pagination,
    };
    Ok(xml_response(result.to_xml()))
}

async fn list_multipart_uploads(
    state: &AppState,
    ctx: &RequestContext,
    bucket: &BucketPath,
    query: &S3Query,
) -> Result<Response, S3Error> {
    state
        .authorize(ctx, S3Action::ListBucketMultipartUploads, bucket, None)
        .await?;

    let uploads_query = UploadsQuery {
        prefix: query.get("prefix").map(str::to_string),
        key_marker: query.get("key-marker").map(str::to_string),
        upload_id_marker: query.get("upload-id-marker").map(str::to_string),
        max_uploads: query
            .parse_num::<usize>("max-uploads")?
            .unwrap_or(MAX_LIST_UPLOADS),
    };
    let page = state.multipart.list_uploads(bucket, &uploads_query).await?;

    let result = ListMultipartUploadsResult {
        bucket: bucket.name.clone(),
        prefix: uploads_query.prefix,
        key_marker: uploads_query.key_marker,
        upload_id_marker: uploads_query.upload_id_marker,
        next_key_marker: page.next_key_marker,
        next_upload_id_marker: page.next_upload_id_marker,
        max_uploads: uploads_query.max_uploads.clamp(1, MAX_LIST_UPLOADS),
        is_truncated: page.is_truncated,
        uploads: page.uploads,
    };
    Ok(xml_response(result.to_xml()))
}

/// Bucket-level DELETE handler
/// DELETE /{bucket}?policy -> DeleteBucketPolicy
/// DELETE /{bucket}        -> DeleteBucket (must be empty)
#[instrument(skip(state, ctx, headers), fields(request_id = %ctx.ids.request_id))]
pub async fn bucket_delete_handler(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;
    let info = state.resolve_bucket(&bucket).await?;

    if query.has("policy") {
        return delete_bucket_policy(&state, &ctx, &info.path).await;
    }

    state
        .authorize(&ctx, S3Action::DeleteBucket, &info.path, None)
        .await?;
    state.storage.delete_bucket(&info.path).await?;
    state.acls.delete_bucket_acls(&info.path).await?;
    state.policies.delete_policy(&info.path).await?;
    info!("[{}] DELETE bucket {}", ctx, info.path);

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// HEAD /{bucket}
#[instrument(skip(state, ctx), fields(request_id = %ctx.ids.request_id))]
pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    ctx: RequestContext,
) -> Result<Response, S3Error> {
    let info = state.resolve_bucket(&bucket).await?;
    state
        .authorize(&ctx, S3Action::ListBucket, &info.path, None)
        .await?;
    Ok((
        StatusCode::OK,
        [("x-amz-bucket-region", state.config.region.clone())],
    )
        .into_response())
}

/// Bucket-level POST handler
/// POST /{bucket}?delete -> DeleteObjects
#[instrument(skip(state, ctx, headers, body), fields(request_id = %ctx.ids.request_id))]
pub async fn bucket_post_handler(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    query: S3Query,
    ctx: RequestContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    reject_unsupported(&query, &headers)?;
    if !query.has("delete") {
        return Err(S3Error::InvalidRequest(
            "POST on a bucket requires the ?delete sub-resource".to_string(),
        ));
    }

    let info = state.resolve_bucket(&bucket).await?;
    let body = decode_request_body(&headers, body)?;
    let request = DeleteRequest::from_xml(body_to_utf8(&body)?).map_err(|e| {
        debug!("[{}] malformed delete request: {}", ctx, e);
        S3Error::MalformedXML
    })?;
    let quiet = request.quiet.unwrap_or(false);

    let result = batch::delete_objects(
        state.storage.as_ref(),
        state.acls.as_ref(),
        &state.permissions,
        &ctx,
        &info.path,
        request.objects,
        state.config.batch_delete_concurrency,
    )
    .await?;

    info!(
        "[{}] DELETE objects in {}: {} deleted, {} errors",
        ctx,
        info.path,
        result.deleted.len(),
        result.errors.len()
    );

    Ok(xml_response(result.to_xml(quiet)))
}
