//! Authentication middleware
//!
//! Every request gets fresh response identifiers and a [`RequestContext`].
//! Requests carrying an `Authorization: AWS4-HMAC-SHA256 ...` header or
//! presigned query parameters are verified by the [`SignatureEngine`];
//! requests carrying neither run as anonymous callers, who only get as far
//! as public grants allow.
//!
//! The same layer stamps `X-Amz-Request-Id` / `X-Amz-Id-2` on the way out and
//! renders error bodies with those identifiers.
//!
//! [`SignatureEngine`]: crate::signature::SignatureEngine

use super::errors::{S3Error, S3ErrorDetails};
use super::handlers::AppState;
use crate::context::{Caller, RequestContext, RequestIds};
use crate::signature::RequestView;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub const HEADER_REQUEST_ID: &str = "x-amz-request-id";
pub const HEADER_HOST_ID: &str = "x-amz-id-2";

/// Paths that stay reachable without credentials even when anonymous access is off.
fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/_s3gate/health" | "/_s3gate/metrics")
}

/// Attach identifiers to a finished response and re-render an error body
/// so its `RequestId`/`HostId` match the headers.
pub fn stamp_response(mut response: Response, ids: &RequestIds) -> Response {
    if let Some(details) = response.extensions().get::<S3ErrorDetails>().cloned() {
        *response.body_mut() = Body::from(details.to_xml(&ids.request_id, &ids.host_id));
        response.headers_mut().remove(header::CONTENT_LENGTH);
    }
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&ids.request_id) {
        headers.insert(HEADER_REQUEST_ID, v);
    }
    if let Ok(v) = HeaderValue::from_str(&ids.host_id) {
        headers.insert(HEADER_HOST_ID, v);
    }
    response
}

/// Axum middleware that authenticates the caller and builds the request context.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ids = RequestIds::generate();

    // Let CORS preflight requests through, browsers send OPTIONS without credentials
    if request.method() == Method::OPTIONS {
        request
            .extensions_mut()
            .insert(RequestContext::anonymous(ids.clone()));
        return stamp_response(next.run(request).await, &ids);
    }

    let outcome = {
        let view = RequestView {
            method: request.method().as_str(),
            path: request.uri().path(),
            query: request.uri().query().unwrap_or(""),
            headers: request.headers(),
        };
        state.signer.authenticate(&view, Utc::now())
    };

    let ctx = match outcome {
        Ok(Some(auth)) => {
            state
                .metrics
                .auth_attempts_total
                .with_label_values(&[auth.method.label()])
                .inc();
            RequestContext::new(ids.clone(), Caller::Authenticated(auth.principal), auth.method)
        }
        Ok(None) => {
            if !state.config.allow_anonymous && !is_public_endpoint(request.uri().path()) {
                debug!("{}: anonymous access disabled, rejecting", ids.request_id);
                return stamp_response(S3Error::access_denied().into_response(), &ids);
            }
            RequestContext::anonymous(ids.clone())
        }
        Err(e) => {
            warn!(
                "{}: authentication failed for {} {}: {}",
                ids.request_id,
                request.method(),
                request.uri().path(),
                e
            );
            state
                .metrics
                .auth_failures_total
                .with_label_values(&[e.reason()])
                .inc();
            return stamp_response(S3Error::from(e).into_response(), &ids);
        }
    };

    debug!("{} {} {}", ctx, request.method(), request.uri().path());
    request.extensions_mut().insert(ctx);
    stamp_response(next.run(request).await, &ids)
}
