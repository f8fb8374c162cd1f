//! Health-check, root probe and presigned URL minting.

use super::{header_str, AppState, S3Error};
use crate::context::RequestContext;
use crate::signature::PresignedUrlConfig;
use crate::types::{validate_bucket_name, validate_object_key};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// S3 root HEAD handler, a connection probe used by Cyberduck and other S3 clients
/// HEAD /
pub async fn head_root() -> Response {
    (StatusCode::OK, [("server", "s3gate")]).into_response()
}

/// Health check handler
/// GET /_s3gate/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Body of `POST /_s3gate/presign`
#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    pub bucket: String,
    pub key: String,
    pub method: String,
    #[serde(default)]
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresignResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

const PRESIGNABLE_METHODS: &[&str] = &["GET", "PUT", "HEAD", "DELETE"];

/// Mint a V4 presigned URL with the caller's own access key.
/// POST /_s3gate/presign
#[instrument(skip(state, ctx, headers, body), fields(request_id = %ctx.ids.request_id))]
pub async fn presign(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let principal = ctx.caller.principal().ok_or_else(S3Error::access_denied)?;

    let request: PresignRequest = serde_json::from_slice(&body)
        .map_err(|e| S3Error::InvalidArgument(format!("Invalid presign request: {}", e)))?;
    validate_bucket_name(&request.bucket)
        .map_err(|e| S3Error::InvalidBucketName(e.to_string()))?;
    validate_object_key(&request.key).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;

    let method = request.method.to_ascii_uppercase();
    if !PRESIGNABLE_METHODS.contains(&method.as_str()) {
        return Err(S3Error::InvalidArgument(format!(
            "Cannot presign method {}",
            request.method
        )));
    }

    let expires = match request.expires_in_secs {
        Some(0) => {
            return Err(S3Error::InvalidArgument(
                "expires_in_secs must be at least 1".to_string(),
            ))
        }
        Some(secs) => Duration::from_secs(secs),
        None => state.presign_default_expiry,
    };

    let host = header_str(&headers, "host")
        .ok_or_else(|| S3Error::InvalidRequest("Missing Host header".to_string()))?;
    let scheme = header_str(&headers, "x-forwarded-proto").unwrap_or("http");
    let endpoint = format!("{}://{}", scheme, host);

    let presigned = state.signer.presign(
        &endpoint,
        &PresignedUrlConfig {
            access_key_id: principal.access_key_id.clone(),
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            method,
            expires,
        },
        Utc::now(),
    )?;
    info!(
        "[{}] presigned {} {}/{} until {}",
        ctx, request.method, request.bucket, request.key, presigned.expires_at
    );

    Ok(Json(PresignResponse {
        url: presigned.url,
        expires_at: presigned.expires_at,
    })
    .into_response())
}
