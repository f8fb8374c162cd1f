//! Authentication tests: presigned URLs (V4 and legacy V2) and header signing

mod common;

use axum::http::{Method, StatusCode};
use chrono::{TimeDelta, Utc};
use common::{TestCredential, TestGateway, TestRequest, ACME, GLOBEX};
use s3gate::api::handlers::PresignResponse;
use s3gate::config::CredentialConfig;
use s3gate::signature::calculate_signature_v2;
use std::time::Duration;

const MALLORY: TestCredential = TestCredential {
    access_key_id: "AKIDUNKNOWN0000000",
    secret: "not-a-real-secret",
    user_id: "mallory",
    tenant_id: "nowhere",
};

async fn gateway_with_object() -> TestGateway {
    let gw = TestGateway::new();
    gw.create_bucket(&ACME, "shared").await;
    gw.put(&ACME, "shared", "report.pdf", b"quarterly numbers").await;
    gw
}

// ============================================================================
// Presigned V4
// ============================================================================

#[tokio::test]
async fn test_presigned_get_succeeds_without_headers() {
    let gw = gateway_with_object().await;
    let uri = gw.presign(
        &ACME,
        "GET",
        "shared",
        "report.pdf",
        Duration::from_secs(300),
        Utc::now(),
    );

    let resp = gw.send(TestRequest::new(Method::GET, &uri)).await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    assert_eq!(resp.body, b"quarterly numbers");
}

#[tokio::test]
async fn test_presigned_put_uploads_object() {
    let gw = gateway_with_object().await;
    let uri = gw.presign(
        &ACME,
        "PUT",
        "shared",
        "upload.bin",
        Duration::from_secs(300),
        Utc::now(),
    );

    let resp = gw
        .send(TestRequest::new(Method::PUT, &uri).body(b"via presign".to_vec()))
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());

    let get = gw.call(&ACME, Method::GET, "/shared/upload.bin", "").await;
    assert_eq!(get.body, b"via presign");
}

#[tokio::test]
async fn test_presigned_url_bound_to_method() {
    let gw = gateway_with_object().await;
    let uri = gw.presign(
        &ACME,
        "GET",
        "shared",
        "report.pdf",
        Duration::from_secs(300),
        Utc::now(),
    );

    let resp = gw.send(TestRequest::new(Method::DELETE, &uri)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code().as_deref(), Some("SignatureDoesNotMatch"));
}

#[tokio::test]
async fn test_tampered_expires_rejected() {
    let gw = gateway_with_object().await;
    let uri = gw.presign(
        &ACME,
        "GET",
        "shared",
        "report.pdf",
        Duration::from_secs(60),
        Utc::now(),
    );
    let tampered = uri.replace("X-Amz-Expires=60", "X-Amz-Expires=3600");
    assert_ne!(tampered, uri);

    let resp = gw.send(TestRequest::new(Method::GET, &tampered)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code().as_deref(), Some("SignatureDoesNotMatch"));
}

#[tokio::test]
async fn test_tampered_key_rejected() {
    let gw = gateway_with_object().await;
    gw.put(&ACME, "shared", "other.pdf", b"other").await;
    let uri = gw.presign(
        &ACME,
        "GET",
        "shared",
        "report.pdf",
        Duration::from_secs(60),
        Utc::now(),
    );

    let resp = gw
        .send(TestRequest::new(
            Method::GET,
            &uri.replace("report.pdf", "other.pdf"),
        ))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code().as_deref(), Some("SignatureDoesNotMatch"));
}

#[tokio::test]
async fn test_expired_presigned_url() {
    let gw = gateway_with_object().await;
    let issued = Utc::now() - TimeDelta::try_minutes(10).unwrap();
    let uri = gw.presign(
        &ACME,
        "GET",
        "shared",
        "report.pdf",
        Duration::from_secs(60),
        issued,
    );

    let resp = gw.send(TestRequest::new(Method::GET, &uri)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code().as_deref(), Some("AccessDenied"));
    assert!(resp.text().contains("expired"));
}

#[tokio::test]
async fn test_presigned_by_foreign_tenant_still_needs_permission() {
    let gw = gateway_with_object().await;
    let uri = gw.presign(
        &GLOBEX,
        "GET",
        "shared",
        "report.pdf",
        Duration::from_secs(300),
        Utc::now(),
    );

    // Valid signature, but globex has no grant on acme's bucket
    let resp = gw.send(TestRequest::new(Method::GET, &uri)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code().as_deref(), Some("AccessDenied"));
}

// ============================================================================
// Presign endpoint
// ============================================================================

#[tokio::test]
async fn test_presign_endpoint_round_trip() {
    let gw = gateway_with_object().await;

    let resp = gw
        .send(
            TestRequest::new(Method::POST, "/_s3gate/presign")
                .header("content-type", "application/json")
                .body(
                    r#"{"bucket":"shared","key":"report.pdf","method":"get","expires_in_secs":120}"#,
                )
                .signed(&ACME),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());

    let minted: PresignResponse = serde_json::from_slice(&resp.body).unwrap();
    let remaining = minted.expires_at - Utc::now();
    assert!(remaining <= TimeDelta::try_seconds(120).unwrap());
    assert!(remaining > TimeDelta::try_seconds(100).unwrap());

    let uri = minted
        .url
        .strip_prefix(&format!("http://{}", common::HOST))
        .expect("url on request host")
        .to_string();
    let get = gw.send(TestRequest::new(Method::GET, &uri)).await;
    assert_eq!(get.status, StatusCode::OK);
    assert_eq!(get.body, b"quarterly numbers");
}

#[tokio::test]
async fn test_presign_endpoint_default_expiry() {
    let gw = gateway_with_object().await;
    let resp = gw
        .call(
            &ACME,
            Method::POST,
            "/_s3gate/presign",
            r#"{"bucket":"shared","key":"report.pdf","method":"GET"}"#,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    let url = resp.json()["url"].as_str().unwrap().to_string();
    let default_secs = gw.state.presign_default_expiry.as_secs();
    assert!(url.contains(&format!("X-Amz-Expires={}", default_secs)));
}

#[tokio::test]
async fn test_presign_endpoint_rejects_long_expiry() {
    let gw = gateway_with_object().await;
    let eight_days = 8 * 24 * 3600;
    let body = format!(
        r#"{{"bucket":"shared","key":"report.pdf","method":"GET","expires_in_secs":{}}}"#,
        eight_days
    );
    let resp = gw
        .call(&ACME, Method::POST, "/_s3gate/presign", body)
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_code().as_deref(), Some("InvalidArgument"));
}

#[tokio::test]
async fn test_presign_endpoint_rejects_bad_input() {
    let gw = gateway_with_object().await;

    let zero = gw
        .call(
            &ACME,
            Method::POST,
            "/_s3gate/presign",
            r#"{"bucket":"shared","key":"report.pdf","method":"GET","expires_in_secs":0}"#,
        )
        .await;
    assert_eq!(zero.error_code().as_deref(), Some("InvalidArgument"));

    let post = gw
        .call(
            &ACME,
            Method::POST,
            "/_s3gate/presign",
            r#"{"bucket":"shared","key":"report.pdf","method":"POST"}"#,
        )
        .await;
    assert_eq!(post.error_code().as_deref(), Some("InvalidArgument"));

    let anonymous = gw
        .send(
            TestRequest::new(Method::POST, "/_s3gate/presign")
                .body(r#"{"bucket":"shared","key":"report.pdf","method":"GET"}"#),
        )
        .await;
    assert_eq!(anonymous.status, StatusCode::FORBIDDEN);
    assert_eq!(anonymous.error_code().as_deref(), Some("AccessDenied"));
}

// ============================================================================
// Presigned V2
// ============================================================================

#[tokio::test]
async fn test_presigned_v2_get() {
    let gw = gateway_with_object().await;
    let expires = Utc::now().timestamp() + 300;
    let signature = calculate_signature_v2(ACME.secret, "GET", expires, "/shared/report.pdf");
    let uri = format!(
        "/shared/report.pdf?AWSAccessKeyId={}&Expires={}&Signature={}",
        ACME.access_key_id, expires, signature
    );

    let resp = gw.send(TestRequest::new(Method::GET, &uri)).await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    assert_eq!(resp.body, b"quarterly numbers");
}

#[tokio::test]
async fn test_presigned_v2_expired_and_tampered() {
    let gw = gateway_with_object().await;

    let past = Utc::now().timestamp() - 10;
    let signature = calculate_signature_v2(ACME.secret, "GET", past, "/shared/report.pdf");
    let expired = gw
        .send(TestRequest::new(
            Method::GET,
            &format!(
                "/shared/report.pdf?AWSAccessKeyId={}&Expires={}&Signature={}",
                ACME.access_key_id, past, signature
            ),
        ))
        .await;
    assert_eq!(expired.error_code().as_deref(), Some("AccessDenied"));

    let future = Utc::now().timestamp() + 300;
    let signature = calculate_signature_v2(ACME.secret, "GET", future, "/shared/report.pdf");
    let extended = gw
        .send(TestRequest::new(
            Method::GET,
            &format!(
                "/shared/report.pdf?AWSAccessKeyId={}&Expires={}&Signature={}",
                ACME.access_key_id,
                future + 3600,
                signature
            ),
        ))
        .await;
    assert_eq!(extended.error_code().as_deref(), Some("SignatureDoesNotMatch"));
}

// ============================================================================
// Header signing
// ============================================================================

#[tokio::test]
async fn test_unknown_access_key() {
    let gw = gateway_with_object().await;
    let resp = gw
        .call(&MALLORY, Method::GET, "/shared/report.pdf", "")
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code().as_deref(), Some("InvalidAccessKeyId"));
}

#[tokio::test]
async fn test_wrong_secret() {
    let gw = gateway_with_object().await;
    let impostor = TestCredential {
        secret: "guessed-secret",
        ..ACME
    };
    let resp = gw
        .call(&impostor, Method::GET, "/shared/report.pdf", "")
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code().as_deref(), Some("SignatureDoesNotMatch"));
}

#[tokio::test]
async fn test_skewed_request_date() {
    let gw = gateway_with_object().await;
    let an_hour_ago = Utc::now() - TimeDelta::try_hours(1).unwrap();
    let resp = gw
        .send(TestRequest::new(Method::GET, "/shared/report.pdf").signed_at(&ACME, an_hour_ago))
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_code().as_deref(), Some("RequestTimeTooSkewed"));

    let slightly_off = Utc::now() - TimeDelta::try_minutes(5).unwrap();
    let ok = gw
        .send(TestRequest::new(Method::GET, "/shared/report.pdf").signed_at(&ACME, slightly_off))
        .await;
    assert_eq!(ok.status, StatusCode::OK);
}

#[tokio::test]
async fn test_inactive_access_key() {
    let mut config = common::test_config();
    let retired = TestCredential {
        access_key_id: "AKIDRETIRED0000004",
        secret: "retired-secret",
        user_id: "carol",
        tenant_id: "acme",
    };
    config.credentials.push(CredentialConfig {
        access_key_id: retired.access_key_id.to_string(),
        secret_access_key: retired.secret.to_string(),
        user_id: retired.user_id.to_string(),
        tenant_id: Some(retired.tenant_id.to_string()),
        active: false,
    });
    let gw = TestGateway::with_config(config);

    let resp = gw.call(&retired, Method::GET, "/", "").await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_auth_failures_are_counted() {
    let gw = gateway_with_object().await;
    gw.call(&MALLORY, Method::GET, "/shared", "").await;

    let metrics = gw
        .send(TestRequest::new(Method::GET, "/_s3gate/metrics"))
        .await;
    assert!(metrics.text().contains("s3gate_auth_failures_total"));
}
