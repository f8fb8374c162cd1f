//! s3gate - S3 wire-protocol compatibility layer
//!
//! Request signing (SigV4 / presigned V4 / presigned V2), aws-chunked body
//! decoding, ACL and bucket-policy permission resolution, multipart upload
//! orchestration and byte-range handling, served over axum with in-memory
//! reference collaborators.

pub mod acl;
pub mod api;
pub mod batch;
pub mod chunked;
pub mod config;
pub mod context;
pub mod identity;
pub mod metrics;
pub mod multipart;
pub mod permission;
pub mod policy;
pub mod range;
pub mod signature;
pub mod storage;
pub mod types;
