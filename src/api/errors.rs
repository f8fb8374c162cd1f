//! S3 error types and XML responses

use super::xml::escape_xml;
use crate::acl::AclError;
use crate::identity::IdentityError;
use crate::policy::PolicyError;
use crate::range::{unsatisfiable_content_range, RangeError};
use crate::signature::SignatureError;
use crate::storage::StorageError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// S3 API errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum S3Error {
    #[error("NoSuchKey: The specified key does not exist.")]
    NoSuchKey(String),

    #[error("NoSuchBucket: The specified bucket does not exist.")]
    NoSuchBucket(String),

    #[error("NoSuchUpload: The specified multipart upload does not exist.")]
    NoSuchUpload(String),

    #[error("NoSuchBucketPolicy: The bucket policy does not exist.")]
    NoSuchBucketPolicy(String),

    #[error("BucketNotEmpty: The bucket you tried to delete is not empty.")]
    BucketNotEmpty(String),

    #[error("BucketAlreadyExists: The requested bucket name is not available.")]
    BucketAlreadyExists(String),

    #[error("BucketAlreadyOwnedByYou: Your previous request to create the named bucket succeeded and you already own it.")]
    BucketAlreadyOwnedByYou(String),

    #[error("TooManyBuckets: {0}")]
    TooManyBuckets(String),

    #[error("EntityTooLarge: Your proposed upload exceeds the maximum allowed size.")]
    EntityTooLarge { size: u64, max: u64 },

    #[error("InternalError: We encountered an internal error. Please try again.")]
    InternalError(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("InvalidBucketName: {0}")]
    InvalidBucketName(String),

    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    #[error("MalformedXML: The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    #[error("MalformedPolicy: {0}")]
    MalformedPolicy(String),

    #[error("InvalidPart: {0}")]
    InvalidPart(String),

    #[error("InvalidPartOrder: The list of parts was not in ascending order.")]
    InvalidPartOrder,

    #[error("BadDigest: The Content-MD5 you specified did not match what we received.")]
    BadDigest,

    #[error("IncompleteBody: {0}")]
    IncompleteBody(String),

    #[error("InvalidRange: The requested range is not satisfiable")]
    InvalidRange { size: u64 },

    #[error("PreconditionFailed: At least one of the pre-conditions you specified did not hold")]
    PreconditionFailed,

    #[error("NotModified")]
    NotModified,

    #[error("NotImplemented: {0}")]
    NotImplemented(String),

    #[error("AccessDenied: {0}")]
    AccessDenied(String),

    #[error("InvalidAccessKeyId: The AWS Access Key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    #[error("SignatureDoesNotMatch: The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    #[error("RequestTimeTooSkewed: The difference between the request time and the server's time is too large.")]
    RequestTimeTooSkewed,
}

/// Code, message and resource of an error response, left in the response
/// extensions so the response-id layer can render the final XML body.
#[derive(Debug, Clone)]
pub struct S3ErrorDetails {
    pub code: &'static str,
    pub message: String,
    pub resource: String,
}

impl S3ErrorDetails {
    /// Render the `<Error>` document with this response's identifiers.
    pub fn to_xml(&self, request_id: &str, host_id: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
    <RequestId>{}</RequestId>
    <HostId>{}</HostId>
</Error>"#,
            self.code,
            escape_xml(&self.message),
            escape_xml(&self.resource),
            request_id,
            host_id
        )
    }
}

impl S3Error {
    /// Plain access denial; never says which check failed.
    pub fn access_denied() -> Self {
        S3Error::AccessDenied("Access Denied".to_string())
    }

    /// Get the S3 error code
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::NoSuchBucketPolicy(_) => "NoSuchBucketPolicy",
            S3Error::BucketNotEmpty(_) => "BucketNotEmpty",
            S3Error::BucketAlreadyExists(_) => "BucketAlreadyExists",
            S3Error::BucketAlreadyOwnedByYou(_) => "BucketAlreadyOwnedByYou",
            S3Error::TooManyBuckets(_) => "TooManyBuckets",
            S3Error::EntityTooLarge { .. } => "EntityTooLarge",
            S3Error::InternalError(_) => "InternalError",
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::InvalidBucketName(_) => "InvalidBucketName",
            S3Error::InvalidRequest(_) => "InvalidRequest",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::MalformedPolicy(_) => "MalformedPolicy",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::BadDigest => "BadDigest",
            S3Error::IncompleteBody(_) => "IncompleteBody",
            S3Error::InvalidRange { .. } => "InvalidRange",
            S3Error::PreconditionFailed => "PreconditionFailed",
            S3Error::NotModified => "NotModified",
            S3Error::NotImplemented(_) => "NotImplemented",
            S3Error::AccessDenied(_) => "AccessDenied",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchKey(_)
            | S3Error::NoSuchBucket(_)
            | S3Error::NoSuchUpload(_)
            | S3Error::NoSuchBucketPolicy(_) => StatusCode::NOT_FOUND,
            S3Error::BucketNotEmpty(_)
            | S3Error::BucketAlreadyExists(_)
            | S3Error::BucketAlreadyOwnedByYou(_) => StatusCode::CONFLICT,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            S3Error::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            S3Error::NotModified => StatusCode::NOT_MODIFIED,
            S3Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            S3Error::AccessDenied(_)
            | S3Error::InvalidAccessKeyId
            | S3Error::SignatureDoesNotMatch
            | S3Error::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            S3Error::TooManyBuckets(_)
            | S3Error::EntityTooLarge { .. }
            | S3Error::InvalidArgument(_)
            | S3Error::InvalidBucketName(_)
            | S3Error::InvalidRequest(_)
            | S3Error::MalformedXML
            | S3Error::MalformedPolicy(_)
            | S3Error::InvalidPart(_)
            | S3Error::InvalidPartOrder
            | S3Error::BadDigest
            | S3Error::IncompleteBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Human-readable message, without the code prefix.
    pub fn message(&self) -> String {
        let full = self.to_string();
        match full.split_once(": ") {
            Some((code, message)) if code == self.code() => message.to_string(),
            _ => full,
        }
    }

    fn resource(&self) -> String {
        match self {
            S3Error::NoSuchKey(r)
            | S3Error::NoSuchBucket(r)
            | S3Error::NoSuchUpload(r)
            | S3Error::NoSuchBucketPolicy(r)
            | S3Error::BucketNotEmpty(r)
            | S3Error::BucketAlreadyExists(r)
            | S3Error::BucketAlreadyOwnedByYou(r) => r.clone(),
            _ => String::new(),
        }
    }

    pub fn details(&self) -> S3ErrorDetails {
        S3ErrorDetails {
            code: self.code(),
            message: self.message(),
            resource: self.resource(),
        }
    }

    /// Generate XML error response
    pub fn to_xml(&self, request_id: &str, host_id: &str) -> String {
        self.details().to_xml(request_id, host_id)
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let S3Error::NotModified = self {
            return status.into_response();
        }

        let details = self.details();
        let mut response = (
            status,
            [(header::CONTENT_TYPE, "application/xml")],
            details.to_xml("", ""),
        )
            .into_response();

        if let S3Error::InvalidRange { size } = self {
            if let Ok(value) = HeaderValue::from_str(&unsatisfiable_content_range(size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response.extensions_mut().insert(details);
        response
    }
}

impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => S3Error::NoSuchKey(key),
            StorageError::BucketNotFound(b) => S3Error::NoSuchBucket(b),
            StorageError::BucketNotEmpty(b) => S3Error::BucketNotEmpty(b),
            StorageError::BucketAlreadyExists(b) => S3Error::BucketAlreadyExists(b),
            StorageError::UploadNotFound(id) => S3Error::NoSuchUpload(id),
            StorageError::InvalidPart(msg) => S3Error::InvalidPart(msg),
            StorageError::TooLarge { size, max } => S3Error::EntityTooLarge { size, max },
            StorageError::Other(msg) => S3Error::InternalError(msg),
        }
    }
}

impl From<SignatureError> for S3Error {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::SignatureMismatch => S3Error::SignatureDoesNotMatch,
            SignatureError::AccessKeyNotFound => S3Error::InvalidAccessKeyId,
            SignatureError::AccessKeyInactive => {
                S3Error::AccessDenied("The access key is inactive".to_string())
            }
            SignatureError::Expired => S3Error::AccessDenied("Request has expired".to_string()),
            SignatureError::RequestTimeTooSkewed => S3Error::RequestTimeTooSkewed,
            SignatureError::ExpirationTooLong => S3Error::InvalidArgument(
                "Presigned URL expiration must not exceed 7 days".to_string(),
            ),
            SignatureError::UnsupportedAlgorithm(_)
            | SignatureError::MissingPresignParams
            | SignatureError::MissingHeader(_)
            | SignatureError::MalformedCredential
            | SignatureError::InvalidDate(_)
            | SignatureError::InvalidExpires(_)
            | SignatureError::InvalidEndpoint(_)
            | SignatureError::InvalidAuthorizationHeader => S3Error::AccessDenied(err.to_string()),
            SignatureError::NotPresigned => S3Error::access_denied(),
        }
    }
}

impl From<RangeError> for S3Error {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::NotSatisfiable { size } => S3Error::InvalidRange { size },
            other => S3Error::InvalidArgument(other.to_string()),
        }
    }
}

impl From<AclError> for S3Error {
    fn from(err: AclError) -> Self {
        match err {
            AclError::Invalid(_) => S3Error::MalformedXML,
            AclError::Backend(msg) => S3Error::InternalError(msg),
        }
    }
}

impl From<PolicyError> for S3Error {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Malformed(msg) => S3Error::MalformedPolicy(msg),
            PolicyError::Backend(msg) => S3Error::InternalError(msg),
        }
    }
}

impl From<IdentityError> for S3Error {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::QuotaExceeded { .. } => S3Error::TooManyBuckets(err.to_string()),
            IdentityError::AccessKeyNotFound => S3Error::InvalidAccessKeyId,
            IdentityError::AccessKeyInactive => S3Error::access_denied(),
        }
    }
}
