//! S3 API implementation

mod auth;
mod errors;
mod extractors;
pub mod handlers;
pub mod xml;

pub use auth::{auth_middleware, stamp_response, HEADER_HOST_ID, HEADER_REQUEST_ID};
pub use errors::{S3Error, S3ErrorDetails};
pub use extractors::{S3Query, ValidatedBucket, ValidatedPath};

use crate::metrics::{http_metrics_middleware, metrics_handler};
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use handlers::{
    bucket_delete_handler, bucket_get_handler, bucket_post_handler, bucket_put_handler,
    delete_object, get_object, head_bucket, head_object, head_root, health_check, list_buckets,
    post_object, presign, put_object_or_copy, AppState,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the S3 router.
///
/// S3 API paths:
///   GET    /                          - list buckets
///   PUT    /{bucket}[?acl|?policy]    - create bucket / put sub-resource
///   GET    /{bucket}[?acl|?policy|?uploads|?list-type=2]
///   DELETE /{bucket}[?policy]         - delete bucket / policy
///   HEAD   /{bucket}                  - head bucket
///   POST   /{bucket}?delete           - delete multiple objects
///   PUT    /{bucket}/{key...}         - upload object, part, copy, or ?acl
///   GET    /{bucket}/{key...}         - download object, ?acl, ?uploadId
///   HEAD   /{bucket}/{key...}         - object metadata
///   DELETE /{bucket}/{key...}         - delete object / abort upload
///   POST   /{bucket}/{key...}         - ?uploads / ?uploadId
///
/// Layers, outermost first: body limit, tracing, metrics, authentication.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_object_size as usize;

    Router::new()
        // Monitoring and custom endpoints
        .route("/_s3gate/health", get(health_check))
        .route("/_s3gate/metrics", get(metrics_handler))
        .route("/_s3gate/presign", post(presign))
        // Root: list buckets
        .route("/", get(list_buckets).head(head_root))
        // Object operations (wildcard routes first - more specific)
        .route(
            "/:bucket/*key",
            get(get_object)
                .put(put_object_or_copy)
                .delete(delete_object)
                .head(head_object)
                .post(post_object),
        )
        // Bucket operations (without trailing slash)
        .route(
            "/:bucket",
            get(bucket_get_handler)
                .put(bucket_put_handler)
                .delete(bucket_delete_handler)
                .head(head_bucket)
                .post(bucket_post_handler),
        )
        // Bucket operations (with trailing slash)
        .route(
            "/:bucket/",
            get(bucket_get_handler)
                .put(bucket_put_handler)
                .delete(bucket_delete_handler)
                .head(head_bucket)
                .post(bucket_post_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http_metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
