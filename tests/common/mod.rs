//! Shared test infrastructure for integration tests
//!
//! Provides an in-process gateway (router + in-memory collaborators) with
//! two tenants' credentials, a SigV4 header signer, and response helpers.
//! Requests go through `tower::ServiceExt::oneshot`, no sockets needed.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use async_trait::async_trait;
use s3gate::acl::{AccessControlList, AclError, AclStore, MemoryAclStore};
use s3gate::api::handlers::AppState;
use s3gate::api::router;
use s3gate::config::{Config, CredentialConfig};
use s3gate::identity::StaticIdentityProvider;
use s3gate::policy::MemoryPolicyStore;
use s3gate::signature::calculate_signature_v4;
use s3gate::signature::canonical::{
    canonical_query_string, canonical_uri, parse_query, CredentialScope, SignedRequestContext,
    AMZ_DATE_FORMAT, UNSIGNED_PAYLOAD,
};
use s3gate::signature::{PresignedUrlConfig, SERVICE};
use s3gate::storage::MemoryStorage;
use s3gate::types::BucketPath;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const HOST: &str = "localhost:9000";
pub const REGION: &str = "us-east-1";

/// An access key known to the test gateway
#[derive(Debug, Clone, Copy)]
pub struct TestCredential {
    pub access_key_id: &'static str,
    pub secret: &'static str,
    pub user_id: &'static str,
    pub tenant_id: &'static str,
}

pub const ACME: TestCredential = TestCredential {
    access_key_id: "AKIDACME0000000001",
    secret: "acme-secret-key/K7MDENG/bPxRfiCYEXAMPLE",
    user_id: "alice",
    tenant_id: "acme",
};

pub const GLOBEX: TestCredential = TestCredential {
    access_key_id: "AKIDGLOBEX00000002",
    secret: "globex-secret-key/K7MDENG/bPxRfiCYEXAMP",
    user_id: "hank",
    tenant_id: "globex",
};

/// Second user inside the acme tenant
pub const ACME_BOB: TestCredential = TestCredential {
    access_key_id: "AKIDACME0000000003",
    secret: "acme-bob-secret/K7MDENG/bPxRfiCYEXAMPLE",
    user_id: "bob",
    tenant_id: "acme",
};

fn credential_config(c: &TestCredential) -> CredentialConfig {
    CredentialConfig {
        access_key_id: c.access_key_id.to_string(),
        secret_access_key: c.secret.to_string(),
        user_id: c.user_id.to_string(),
        tenant_id: Some(c.tenant_id.to_string()),
        active: true,
    }
}

pub fn test_config() -> Config {
    Config {
        region: REGION.to_string(),
        max_object_size: 1024 * 1024,
        credentials: vec![
            credential_config(&ACME),
            credential_config(&GLOBEX),
            credential_config(&ACME_BOB),
        ],
        ..Config::default()
    }
}

/// A finished response with its body collected
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `<Code>` of an S3 error body
    pub fn error_code(&self) -> Option<String> {
        let text = self.text();
        let start = text.find("<Code>")? + "<Code>".len();
        let end = text[start..].find("</Code>")? + start;
        Some(text[start..end].to_string())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }
}

/// A request under construction
pub struct TestRequest {
    method: Method,
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl TestRequest {
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));
        Self {
            method,
            path: path.to_string(),
            query: query.to_string(),
            headers: vec![("host".to_string(), HOST.to_string())],
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sign with an `Authorization: AWS4-HMAC-SHA256` header at `now`.
    pub fn signed_at(mut self, cred: &TestCredential, now: DateTime<Utc>) -> Self {
        let timestamp = now.format(AMZ_DATE_FORMAT).to_string();
        self.headers.push(("x-amz-date".to_string(), timestamp.clone()));
        self.headers
            .push(("x-amz-content-sha256".to_string(), UNSIGNED_PAYLOAD.to_string()));

        let mut signed: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| {
                name == "host" || name.starts_with("x-amz-") || name == "content-md5"
            })
            .cloned()
            .collect();
        signed.sort_by(|a, b| a.0.cmp(&b.0));

        let scope = CredentialScope::new(&now.format("%Y%m%d").to_string(), REGION, SERVICE);
        let ctx = SignedRequestContext {
            method: self.method.as_str().to_string(),
            canonical_uri: canonical_uri(&self.path),
            canonical_query: canonical_query_string(&parse_query(&self.query), None),
            canonical_headers: signed
                .iter()
                .map(|(n, v)| format!("{}:{}\n", n, v.trim()))
                .collect(),
            signed_headers: signed
                .iter()
                .map(|(n, _)| n.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            payload_hash: UNSIGNED_PAYLOAD.to_string(),
            timestamp,
            scope: scope.clone(),
        };
        let signature = calculate_signature_v4(cred.secret, &ctx);
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            cred.access_key_id,
            scope.as_string(),
            ctx.signed_headers,
            signature
        );
        self.headers.push(("authorization".to_string(), authorization));
        self
    }

    pub fn signed(self, cred: &TestCredential) -> Self {
        self.signed_at(cred, Utc::now())
    }

    pub fn build(self) -> Request<Body> {
        let uri = if self.query.is_empty() {
            self.path
        } else {
            format!("{}?{}", self.path, self.query)
        };
        let mut builder = Request::builder().method(self.method).uri(uri);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(Body::from(self.body)).expect("valid request")
    }
}

/// In-process gateway
pub struct TestGateway {
    pub state: Arc<AppState>,
    router: Router,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let state = Arc::new(AppState::in_memory(config).expect("valid test config"));
        let router = router(state.clone());
        Self { state, router }
    }

    /// Gateway over a custom ACL store, everything else in memory.
    pub fn with_acls(acls: Arc<dyn AclStore>) -> Self {
        let config = test_config();
        let identity =
            StaticIdentityProvider::from_config(&config.credentials, config.max_buckets_per_tenant);
        let state = AppState::new(
            config.clone(),
            Arc::new(MemoryStorage::new(config.max_object_size)),
            acls,
            Arc::new(MemoryPolicyStore::new()),
            Arc::new(identity),
        )
        .expect("valid test config");
        let state = Arc::new(state);
        let router = router(state.clone());
        Self { state, router }
    }

    pub async fn send(&self, request: TestRequest) -> TestResponse {
        self.send_raw(request.build()).await
    }

    pub async fn send_raw(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body collects")
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Signed request shortcut
    pub async fn call(
        &self,
        cred: &TestCredential,
        method: Method,
        path_and_query: &str,
        body: impl Into<Vec<u8>>,
    ) -> TestResponse {
        self.send(TestRequest::new(method, path_and_query).body(body).signed(cred))
            .await
    }

    pub async fn create_bucket(&self, cred: &TestCredential, bucket: &str) {
        let resp = self.call(cred, Method::PUT, &format!("/{}", bucket), "").await;
        assert_eq!(resp.status, StatusCode::OK, "create bucket: {}", resp.text());
    }

    pub async fn put(&self, cred: &TestCredential, bucket: &str, key: &str, data: &[u8]) -> TestResponse {
        let resp = self
            .call(cred, Method::PUT, &format!("/{}/{}", bucket, key), data.to_vec())
            .await;
        assert_eq!(resp.status, StatusCode::OK, "put object: {}", resp.text());
        resp
    }

    /// Presign through the gateway's own engine; returns path+query.
    pub fn presign(
        &self,
        cred: &TestCredential,
        method: &str,
        bucket: &str,
        key: &str,
        expires: Duration,
        now: DateTime<Utc>,
    ) -> String {
        let url = self
            .state
            .signer
            .presign(
                &format!("http://{}", HOST),
                &PresignedUrlConfig {
                    access_key_id: cred.access_key_id.to_string(),
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    method: method.to_string(),
                    expires,
                },
                now,
            )
            .expect("presign succeeds")
            .url;
        url.strip_prefix(&format!("http://{}", HOST))
            .expect("url on test host")
            .to_string()
    }
}

/// Extract the text of the first `<tag>` in an XML body.
pub fn xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

/// Every `<tag>` value in an XML body, in order.
pub fn xml_values(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                out.push(after[..end].to_string());
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    out
}

/// ACL store whose object-ACL removal fails for keys starting with `prefix`
pub struct BrokenAclDeletes {
    inner: MemoryAclStore,
    prefix: &'static str,
}

impl BrokenAclDeletes {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            inner: MemoryAclStore::new(),
            prefix,
        }
    }
}

#[async_trait]
impl AclStore for BrokenAclDeletes {
    async fn get_bucket_acl(
        &self,
        bucket: &BucketPath,
    ) -> Result<Option<AccessControlList>, AclError> {
        self.inner.get_bucket_acl(bucket).await
    }

    async fn set_bucket_acl(
        &self,
        bucket: &BucketPath,
        acl: AccessControlList,
    ) -> Result<(), AclError> {
        self.inner.set_bucket_acl(bucket, acl).await
    }

    async fn get_object_acl(
        &self,
        bucket: &BucketPath,
        key: &str,
    ) -> Result<Option<AccessControlList>, AclError> {
        self.inner.get_object_acl(bucket, key).await
    }

    async fn set_object_acl(
        &self,
        bucket: &BucketPath,
        key: &str,
        acl: AccessControlList,
    ) -> Result<(), AclError> {
        self.inner.set_object_acl(bucket, key, acl).await
    }

    async fn delete_object_acl(&self, bucket: &BucketPath, key: &str) -> Result<(), AclError> {
        if key.starts_with(self.prefix) {
            return Err(AclError::Backend("acl store unavailable".to_string()));
        }
        self.inner.delete_object_acl(bucket, key).await
    }

    async fn delete_bucket_acls(&self, bucket: &BucketPath) -> Result<(), AclError> {
        self.inner.delete_bucket_acls(bucket).await
    }
}
