//! Multi-tenant access control tests
//!
//! Exercises the grant cascade end to end: tenant ownership, object and
//! bucket ACLs, bucket policies, and existence hiding for denied readers.

mod common;

use axum::http::{Method, StatusCode};
use common::{xml_value, xml_values, TestGateway, TestRequest, ACME, ACME_BOB, GLOBEX};

const ALL_USERS: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

fn grant_read_to(user: &str) -> String {
    format!(
        r#"<AccessControlPolicy>
  <Owner><ID>alice</ID></Owner>
  <AccessControlList>
    <Grant><Grantee><ID>alice</ID></Grantee><Permission>FULL_CONTROL</Permission></Grant>
    <Grant><Grantee><ID>{}</ID></Grantee><Permission>READ</Permission></Grant>
  </AccessControlList>
</AccessControlPolicy>"#,
        user
    )
}

async fn acme_with_secret() -> TestGateway {
    let gw = TestGateway::new();
    gw.create_bucket(&ACME, "acme-data").await;
    gw.put(&ACME, "acme-data", "secret.txt", b"acme only").await;
    gw
}

// ============================================================================
// Tenant isolation
// ============================================================================

#[tokio::test]
async fn test_cross_tenant_access_denied() {
    let gw = acme_with_secret().await;

    for (method, uri) in [
        (Method::GET, "/acme-data/secret.txt"),
        (Method::HEAD, "/acme-data/secret.txt"),
        (Method::GET, "/acme-data"),
        (Method::PUT, "/acme-data/intruder.txt"),
        (Method::DELETE, "/acme-data/secret.txt"),
        (Method::DELETE, "/acme-data"),
        (Method::GET, "/acme-data?acl"),
    ] {
        let resp = gw.call(&GLOBEX, method.clone(), uri, "").await;
        assert_eq!(resp.status, StatusCode::FORBIDDEN, "{} {}", method, uri);
    }

    let still_there = gw.call(&ACME, Method::GET, "/acme-data/secret.txt", "").await;
    assert_eq!(still_there.body, b"acme only");
}

#[tokio::test]
async fn test_same_tenant_users_share_buckets() {
    let gw = acme_with_secret().await;

    let read = gw
        .call(&ACME_BOB, Method::GET, "/acme-data/secret.txt", "")
        .await;
    assert_eq!(read.status, StatusCode::OK);

    let write = gw
        .call(&ACME_BOB, Method::PUT, "/acme-data/bob.txt", "from bob")
        .await;
    assert_eq!(write.status, StatusCode::OK);
}

#[tokio::test]
async fn test_list_buckets_scoped_to_tenant() {
    let gw = acme_with_secret().await;
    gw.create_bucket(&GLOBEX, "globex-data").await;

    let acme = gw.call(&ACME_BOB, Method::GET, "/", "").await;
    assert_eq!(xml_values(&acme.text(), "Name"), vec!["acme-data"]);

    let globex = gw.call(&GLOBEX, Method::GET, "/", "").await;
    assert_eq!(xml_values(&globex.text(), "Name"), vec!["globex-data"]);
}

#[tokio::test]
async fn test_denied_reader_cannot_probe_existence() {
    let gw = acme_with_secret().await;

    let existing = gw
        .call(&GLOBEX, Method::GET, "/acme-data/secret.txt", "")
        .await;
    let missing = gw
        .call(&GLOBEX, Method::GET, "/acme-data/no-such-key.txt", "")
        .await;
    assert_eq!(existing.status, StatusCode::FORBIDDEN);
    assert_eq!(missing.status, StatusCode::FORBIDDEN);
    assert_eq!(existing.error_code().as_deref(), Some("AccessDenied"));
    assert_eq!(missing.error_code().as_deref(), Some("AccessDenied"));
}

// ============================================================================
// ACLs
// ============================================================================

#[tokio::test]
async fn test_public_read_bucket_allows_anonymous_reads() {
    let gw = TestGateway::new();
    let created = gw
        .send(
            TestRequest::new(Method::PUT, "/public-site")
                .header("x-amz-acl", "public-read")
                .signed(&ACME),
        )
        .await;
    assert_eq!(created.status, StatusCode::OK);
    gw.put(&ACME, "public-site", "index.html", b"<h1>hi</h1>").await;

    let get = gw
        .send(TestRequest::new(Method::GET, "/public-site/index.html"))
        .await;
    assert_eq!(get.status, StatusCode::OK);
    assert_eq!(get.body, b"<h1>hi</h1>");

    let list = gw.send(TestRequest::new(Method::GET, "/public-site")).await;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(xml_values(&list.text(), "Key"), vec!["index.html"]);

    // Read does not imply write
    let put = gw
        .send(TestRequest::new(Method::PUT, "/public-site/defaced.html").body(b"x".to_vec()))
        .await;
    assert_eq!(put.status, StatusCode::FORBIDDEN);

    let cross = gw
        .call(&GLOBEX, Method::GET, "/public-site/index.html", "")
        .await;
    assert_eq!(cross.status, StatusCode::OK);
}

#[tokio::test]
async fn test_public_read_object_acl() {
    let gw = acme_with_secret().await;
    let resp = gw
        .send(
            TestRequest::new(Method::PUT, "/acme-data/press.txt")
                .header("x-amz-acl", "public-read")
                .body(b"announcement".to_vec())
                .signed(&ACME),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let anon = gw
        .send(TestRequest::new(Method::GET, "/acme-data/press.txt"))
        .await;
    assert_eq!(anon.status, StatusCode::OK);
    assert_eq!(anon.body, b"announcement");

    // Other objects in the bucket stay private
    let other = gw
        .send(TestRequest::new(Method::GET, "/acme-data/secret.txt"))
        .await;
    assert_eq!(other.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_object_acl_grant_to_foreign_user() {
    let gw = acme_with_secret().await;
    gw.put(&ACME, "acme-data", "shared.txt", b"for hank").await;

    let put_acl = gw
        .call(
            &ACME,
            Method::PUT,
            "/acme-data/shared.txt?acl",
            grant_read_to(GLOBEX.user_id),
        )
        .await;
    assert_eq!(put_acl.status, StatusCode::OK, "{}", put_acl.text());

    let granted = gw
        .call(&GLOBEX, Method::GET, "/acme-data/shared.txt", "")
        .await;
    assert_eq!(granted.status, StatusCode::OK);
    assert_eq!(granted.body, b"for hank");

    let head = gw
        .call(&GLOBEX, Method::HEAD, "/acme-data/shared.txt", "")
        .await;
    assert_eq!(head.status, StatusCode::OK);

    let other = gw
        .call(&GLOBEX, Method::GET, "/acme-data/secret.txt", "")
        .await;
    assert_eq!(other.status, StatusCode::FORBIDDEN);

    // READ does not allow overwriting
    let overwrite = gw
        .call(&GLOBEX, Method::PUT, "/acme-data/shared.txt", "hijacked")
        .await;
    assert_eq!(overwrite.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_object_acl_removed_with_object() {
    let gw = acme_with_secret().await;
    gw.put(&ACME, "acme-data", "temp.txt", b"v1").await;
    gw.call(
        &ACME,
        Method::PUT,
        "/acme-data/temp.txt?acl",
        grant_read_to(GLOBEX.user_id),
    )
    .await;

    gw.call(&ACME, Method::DELETE, "/acme-data/temp.txt", "").await;
    gw.put(&ACME, "acme-data", "temp.txt", b"v2").await;

    let resp = gw
        .call(&GLOBEX, Method::GET, "/acme-data/temp.txt", "")
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_get_acl_documents() {
    let gw = acme_with_secret().await;

    let bucket_acl = gw.call(&ACME, Method::GET, "/acme-data?acl", "").await;
    assert_eq!(bucket_acl.status, StatusCode::OK);
    let xml = bucket_acl.text();
    assert!(xml.contains("<AccessControlPolicy"));
    assert_eq!(xml_value(&xml, "ID").as_deref(), Some("alice"));
    assert_eq!(xml_values(&xml, "Permission"), vec!["FULL_CONTROL"]);

    let canned = gw
        .send(
            TestRequest::new(Method::PUT, "/acme-data/secret.txt?acl")
                .header("x-amz-acl", "public-read")
                .signed(&ACME),
        )
        .await;
    assert_eq!(canned.status, StatusCode::OK);

    let object_acl = gw
        .call(&ACME, Method::GET, "/acme-data/secret.txt?acl", "")
        .await;
    let xml = object_acl.text();
    assert!(xml.contains(&format!("<URI>{}</URI>", ALL_USERS)));
    assert_eq!(xml_values(&xml, "Permission"), vec!["FULL_CONTROL", "READ"]);

    let missing = gw
        .call(&ACME, Method::GET, "/acme-data/ghost.txt?acl", "")
        .await;
    assert_eq!(missing.error_code().as_deref(), Some("NoSuchKey"));
}

#[tokio::test]
async fn test_invalid_acl_requests() {
    let gw = acme_with_secret().await;

    let empty = gw.call(&ACME, Method::PUT, "/acme-data?acl", "").await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.error_code().as_deref(), Some("MalformedXML"));

    let bogus_canned = gw
        .send(
            TestRequest::new(Method::PUT, "/acme-data/secret.txt")
                .header("x-amz-acl", "world-writable")
                .body(b"x".to_vec())
                .signed(&ACME),
        )
        .await;
    assert_eq!(bogus_canned.status, StatusCode::BAD_REQUEST);
    assert_eq!(bogus_canned.error_code().as_deref(), Some("InvalidArgument"));

    let foreign = gw
        .call(
            &GLOBEX,
            Method::PUT,
            "/acme-data/secret.txt?acl",
            grant_read_to(GLOBEX.user_id),
        )
        .await;
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);
}

// ============================================================================
// Bucket policies
// ============================================================================

fn read_prefix_policy(bucket: &str, prefix: &str, principal: &str) -> String {
    format!(
        r#"{{
  "Version": "2012-10-17",
  "Statement": [{{
    "Effect": "Allow",
    "Principal": {{"AWS": ["{}"]}},
    "Action": ["s3:GetObject"],
    "Resource": "arn:aws:s3:::{}/{}*"
  }}]
}}"#,
        principal, bucket, prefix
    )
}

#[tokio::test]
async fn test_bucket_policy_grants_prefix() {
    let gw = acme_with_secret().await;
    gw.put(&ACME, "acme-data", "public/report.csv", b"a,b,c").await;

    let policy = read_prefix_policy("acme-data", "public/", GLOBEX.user_id);
    let put = gw
        .call(&ACME, Method::PUT, "/acme-data?policy", policy.clone())
        .await;
    assert_eq!(put.status, StatusCode::NO_CONTENT, "{}", put.text());

    let allowed = gw
        .call(&GLOBEX, Method::GET, "/acme-data/public/report.csv", "")
        .await;
    assert_eq!(allowed.status, StatusCode::OK);
    assert_eq!(allowed.body, b"a,b,c");

    let outside = gw
        .call(&GLOBEX, Method::GET, "/acme-data/secret.txt", "")
        .await;
    assert_eq!(outside.status, StatusCode::FORBIDDEN);

    // Only GetObject was granted
    let write = gw
        .call(&GLOBEX, Method::PUT, "/acme-data/public/new.csv", "x")
        .await;
    assert_eq!(write.status, StatusCode::FORBIDDEN);

    let fetched = gw.call(&ACME, Method::GET, "/acme-data?policy", "").await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.json()["Statement"][0]["Effect"], "Allow");
}

#[tokio::test]
async fn test_bucket_policy_lifecycle() {
    let gw = acme_with_secret().await;

    let none = gw.call(&ACME, Method::GET, "/acme-data?policy", "").await;
    assert_eq!(none.status, StatusCode::NOT_FOUND);
    assert_eq!(none.error_code().as_deref(), Some("NoSuchBucketPolicy"));

    let malformed = gw
        .call(&ACME, Method::PUT, "/acme-data?policy", "{not json")
        .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert_eq!(malformed.error_code().as_deref(), Some("MalformedPolicy"));

    let other_bucket = read_prefix_policy("someone-else", "", GLOBEX.user_id);
    let rejected = gw
        .call(&ACME, Method::PUT, "/acme-data?policy", other_bucket)
        .await;
    assert_eq!(rejected.error_code().as_deref(), Some("MalformedPolicy"));

    let policy = read_prefix_policy("acme-data", "", GLOBEX.user_id);
    gw.call(&ACME, Method::PUT, "/acme-data?policy", policy).await;
    let granted = gw
        .call(&GLOBEX, Method::GET, "/acme-data/secret.txt", "")
        .await;
    assert_eq!(granted.status, StatusCode::OK);

    let deleted = gw.call(&ACME, Method::DELETE, "/acme-data?policy", "").await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let revoked = gw
        .call(&GLOBEX, Method::GET, "/acme-data/secret.txt", "")
        .await;
    assert_eq!(revoked.status, StatusCode::FORBIDDEN);

    let again = gw.call(&ACME, Method::DELETE, "/acme-data?policy", "").await;
    assert_eq!(again.error_code().as_deref(), Some("NoSuchBucketPolicy"));
}

#[tokio::test]
async fn test_foreign_tenant_cannot_set_policy() {
    let gw = acme_with_secret().await;
    let policy = read_prefix_policy("acme-data", "", GLOBEX.user_id);
    let resp = gw
        .call(&GLOBEX, Method::PUT, "/acme-data?policy", policy)
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

// ============================================================================
// Batch delete honours per-key permissions
// ============================================================================

#[tokio::test]
async fn test_batch_delete_reports_denied_keys() {
    let gw = acme_with_secret().await;
    let policy = r#"{
  "Statement": [{
    "Effect": "Allow",
    "Principal": {"AWS": "hank"},
    "Action": ["s3:DeleteObject"],
    "Resource": "arn:aws:s3:::acme-data/scratch/*"
  }]
}"#;
    gw.call(&ACME, Method::PUT, "/acme-data?policy", policy).await;
    gw.put(&ACME, "acme-data", "scratch/tmp", b"tmp").await;

    let body = "<Delete><Object><Key>scratch/tmp</Key></Object><Object><Key>secret.txt</Key></Object></Delete>";
    let resp = gw
        .call(&GLOBEX, Method::POST, "/acme-data?delete", body)
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    let xml = resp.text();
    assert!(xml.contains("<Deleted>\n    <Key>scratch/tmp</Key>"));
    assert_eq!(xml_value(&xml, "Code").as_deref(), Some("AccessDenied"));

    let gone = gw.call(&ACME, Method::GET, "/acme-data/scratch/tmp", "").await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);

    let survived = gw.call(&ACME, Method::GET, "/acme-data/secret.txt", "").await;
    assert_eq!(survived.status, StatusCode::OK);
}
