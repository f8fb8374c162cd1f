//! S3 XML response builders and parsers

use crate::acl::{AccessControlList, AclError, Grant, Grantee, Permission};
use crate::types::{ObjectMetadata, PartInfo, UploadInfo};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const S3_NS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

fn header(root: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{} xmlns=\"{}\">\n",
        root, S3_NS
    )
}

fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Escape special XML characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ============================================================================
// ListObjects (v1 and v2)
// ============================================================================

/// Version-specific pagination fields of a listing
#[derive(Debug, Clone)]
pub enum ListPagination {
    V1 {
        marker: String,
        next_marker: Option<String>,
    },
    V2 {
        continuation_token: Option<String>,
        next_continuation_token: Option<String>,
        start_after: Option<String>,
    },
}

/// ListObjects / ListObjectsV2 response
#[derive(Debug, Clone)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub is_truncated: bool,
    pub contents: Vec<ObjectMetadata>,
    pub common_prefixes: Vec<String>,
    pub pagination: ListPagination,
}

impl ListBucketResult {
    /// Convert to S3 XML format
    pub fn to_xml(&self) -> String {
        let mut xml = header("ListBucketResult");

        xml.push_str(&format!("  <Name>{}</Name>\n", escape_xml(&self.name)));
        xml.push_str(&format!(
            "  <Prefix>{}</Prefix>\n",
            escape_xml(&self.prefix)
        ));
        if let Some(ref delimiter) = self.delimiter {
            xml.push_str(&format!(
                "  <Delimiter>{}</Delimiter>\n",
                escape_xml(delimiter)
            ));
        }
        xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", self.max_keys));

        match &self.pagination {
            ListPagination::V1 {
                marker,
                next_marker,
            } => {
                xml.push_str(&format!("  <Marker>{}</Marker>\n", escape_xml(marker)));
                if let Some(next) = next_marker {
                    xml.push_str(&format!(
                        "  <NextMarker>{}</NextMarker>\n",
                        escape_xml(next)
                    ));
                }
            }
            ListPagination::V2 {
                continuation_token,
                next_continuation_token,
                start_after,
            } => {
                xml.push_str(&format!(
                    "  <KeyCount>{}</KeyCount>\n",
                    self.contents.len() + self.common_prefixes.len()
                ));
                if let Some(token) = continuation_token {
                    xml.push_str(&format!(
                        "  <ContinuationToken>{}</ContinuationToken>\n",
                        escape_xml(token)
                    ));
                }
                if let Some(token) = next_continuation_token {
                    xml.push_str(&format!(
                        "  <NextContinuationToken>{}</NextContinuationToken>\n",
                        escape_xml(token)
                    ));
                }
                if let Some(start) = start_after {
                    xml.push_str(&format!(
                        "  <StartAfter>{}</StartAfter>\n",
                        escape_xml(start)
                    ));
                }
            }
        }
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));

        for obj in &self.contents {
            xml.push_str("  <Contents>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&obj.key)));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                iso8601(&obj.last_modified)
            ));
            xml.push_str(&format!("    <ETag>{}</ETag>\n", escape_xml(&obj.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", obj.size));
            xml.push_str("    <StorageClass>STANDARD</StorageClass>\n");
            xml.push_str("  </Contents>\n");
        }
        for prefix in &self.common_prefixes {
            xml.push_str(&format!(
                "  <CommonPrefixes>\n    <Prefix>{}</Prefix>\n  </CommonPrefixes>\n",
                escape_xml(prefix)
            ));
        }

        xml.push_str("</ListBucketResult>");
        xml
    }
}

// ============================================================================
// DeleteObjects Request/Response
// ============================================================================

/// Delete request object
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId")]
    pub version_id: Option<String>,
}

/// Delete request body
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "Quiet")]
    pub quiet: Option<bool>,
    #[serde(rename = "Object", default)]
    pub objects: Vec<DeleteObjectIdentifier>,
}

impl DeleteRequest {
    /// Parse from XML body
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// Result of deleting a single object
#[derive(Debug, Clone)]
pub struct DeletedObject {
    pub key: String,
    pub version_id: Option<String>,
}

/// Error deleting a single object
#[derive(Debug, Clone)]
pub struct DeleteError {
    pub key: String,
    pub version_id: Option<String>,
    pub code: String,
    pub message: String,
}

/// DeleteObjects response
#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    pub deleted: Vec<DeletedObject>,
    pub errors: Vec<DeleteError>,
}

impl DeleteResult {
    pub fn to_xml(&self, quiet: bool) -> String {
        let mut xml = header("DeleteResult");

        // Only include Deleted elements if not quiet
        if !quiet {
            for deleted in &self.deleted {
                xml.push_str("  <Deleted>\n");
                xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&deleted.key)));
                if let Some(ref vid) = deleted.version_id {
                    xml.push_str(&format!("    <VersionId>{}</VersionId>\n", escape_xml(vid)));
                }
                xml.push_str("  </Deleted>\n");
            }
        }

        // Always include errors
        for error in &self.errors {
            xml.push_str("  <Error>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&error.key)));
            if let Some(ref vid) = error.version_id {
                xml.push_str(&format!("    <VersionId>{}</VersionId>\n", escape_xml(vid)));
            }
            xml.push_str(&format!("    <Code>{}</Code>\n", escape_xml(&error.code)));
            xml.push_str(&format!(
                "    <Message>{}</Message>\n",
                escape_xml(&error.message)
            ));
            xml.push_str("  </Error>\n");
        }

        xml.push_str("</DeleteResult>");
        xml
    }
}

// ============================================================================
// CopyObject Response
// ============================================================================

/// CopyObject response
#[derive(Debug, Clone)]
pub struct CopyObjectResult {
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl CopyObjectResult {
    pub fn to_xml(&self) -> String {
        let mut xml = header("CopyObjectResult");
        xml.push_str(&format!("  <ETag>{}</ETag>\n", escape_xml(&self.etag)));
        xml.push_str(&format!(
            "  <LastModified>{}</LastModified>\n",
            iso8601(&self.last_modified)
        ));
        xml.push_str("</CopyObjectResult>");
        xml
    }
}

// ============================================================================
// ListBuckets Response
// ============================================================================

/// Bucket entry for ListBuckets
#[derive(Debug, Clone)]
pub struct BucketEntry {
    pub name: String,
    pub creation_date: DateTime<Utc>,
}

/// ListBuckets response
#[derive(Debug, Clone)]
pub struct ListBucketsResult {
    pub owner_id: String,
    pub owner_display_name: String,
    pub buckets: Vec<BucketEntry>,
}

impl ListBucketsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = header("ListAllMyBucketsResult");

        xml.push_str("  <Owner>\n");
        xml.push_str(&format!("    <ID>{}</ID>\n", escape_xml(&self.owner_id)));
        xml.push_str(&format!(
            "    <DisplayName>{}</DisplayName>\n",
            escape_xml(&self.owner_display_name)
        ));
        xml.push_str("  </Owner>\n");

        xml.push_str("  <Buckets>\n");
        for bucket in &self.buckets {
            xml.push_str("    <Bucket>\n");
            xml.push_str(&format!(
                "      <Name>{}</Name>\n",
                escape_xml(&bucket.name)
            ));
            xml.push_str(&format!(
                "      <CreationDate>{}</CreationDate>\n",
                iso8601(&bucket.creation_date)
            ));
            xml.push_str("    </Bucket>\n");
        }
        xml.push_str("  </Buckets>\n");

        xml.push_str("</ListAllMyBucketsResult>");
        xml
    }
}

// ============================================================================
// Multipart
// ============================================================================

/// CreateMultipartUpload response
#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

impl InitiateMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        let mut xml = header("InitiateMultipartUploadResult");
        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(&self.key)));
        xml.push_str(&format!(
            "  <UploadId>{}</UploadId>\n",
            escape_xml(&self.upload_id)
        ));
        xml.push_str("</InitiateMultipartUploadResult>");
        xml
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletePartEntry {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// CompleteMultipartUpload request body
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteMultipartUploadRequest {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePartEntry>,
}

impl CompleteMultipartUploadRequest {
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// CompleteMultipartUpload response
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadResult {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

impl CompleteMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        let mut xml = header("CompleteMultipartUploadResult");
        xml.push_str(&format!(
            "  <Location>{}</Location>\n",
            escape_xml(&self.location)
        ));
        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(&self.key)));
        xml.push_str(&format!("  <ETag>{}</ETag>\n", escape_xml(&self.etag)));
        xml.push_str("</CompleteMultipartUploadResult>");
        xml
    }
}

/// ListParts response
#[derive(Debug, Clone)]
pub struct ListPartsResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number_marker: u32,
    pub next_part_number_marker: Option<u32>,
    pub max_parts: usize,
    pub is_truncated: bool,
    pub parts: Vec<PartInfo>,
}

impl ListPartsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = header("ListPartsResult");
        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(&self.key)));
        xml.push_str(&format!(
            "  <UploadId>{}</UploadId>\n",
            escape_xml(&self.upload_id)
        ));
        xml.push_str(&format!(
            "  <PartNumberMarker>{}</PartNumberMarker>\n",
            self.part_number_marker
        ));
        if let Some(next) = self.next_part_number_marker {
            xml.push_str(&format!(
                "  <NextPartNumberMarker>{}</NextPartNumberMarker>\n",
                next
            ));
        }
        xml.push_str(&format!("  <MaxParts>{}</MaxParts>\n", self.max_parts));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));
        for part in &self.parts {
            xml.push_str("  <Part>\n");
            xml.push_str(&format!(
                "    <PartNumber>{}</PartNumber>\n",
                part.part_number
            ));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                iso8601(&part.last_modified)
            ));
            xml.push_str(&format!("    <ETag>{}</ETag>\n", escape_xml(&part.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", part.size));
            xml.push_str("  </Part>\n");
        }
        xml.push_str("</ListPartsResult>");
        xml
    }
}

/// ListMultipartUploads response
#[derive(Debug, Clone)]
pub struct ListMultipartUploadsResult {
    pub bucket: String,
    pub prefix: Option<String>,
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
    pub max_uploads: usize,
    pub is_truncated: bool,
    pub uploads: Vec<UploadInfo>,
}

impl ListMultipartUploadsResult {
    pub fn to_xml(&self) -> String {
        let opt = |v: &Option<String>| escape_xml(v.as_deref().unwrap_or(""));

        let mut xml = header("ListMultipartUploadsResult");
        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!("  <KeyMarker>{}</KeyMarker>\n", opt(&self.key_marker)));
        xml.push_str(&format!(
            "  <UploadIdMarker>{}</UploadIdMarker>\n",
            opt(&self.upload_id_marker)
        ));
        if self.is_truncated {
            xml.push_str(&format!(
                "  <NextKeyMarker>{}</NextKeyMarker>\n",
                opt(&self.next_key_marker)
            ));
            xml.push_str(&format!(
                "  <NextUploadIdMarker>{}</NextUploadIdMarker>\n",
                opt(&self.next_upload_id_marker)
            ));
        }
        if self.prefix.is_some() {
            xml.push_str(&format!("  <Prefix>{}</Prefix>\n", opt(&self.prefix)));
        }
        xml.push_str(&format!("  <MaxUploads>{}</MaxUploads>\n", self.max_uploads));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));
        for upload in &self.uploads {
            xml.push_str("  <Upload>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&upload.key)));
            xml.push_str(&format!(
                "    <UploadId>{}</UploadId>\n",
                escape_xml(&upload.upload_id)
            ));
            xml.push_str(&format!(
                "    <Initiated>{}</Initiated>\n",
                iso8601(&upload.initiated)
            ));
            xml.push_str("  </Upload>\n");
        }
        xml.push_str("</ListMultipartUploadsResult>");
        xml
    }
}

// ============================================================================
// AccessControlPolicy
// ============================================================================

/// Render an ACL as an `AccessControlPolicy` document.
pub fn acl_to_xml(acl: &AccessControlList) -> String {
    let mut xml = header("AccessControlPolicy");
    xml.push_str(&format!(
        "  <Owner>\n    <ID>{}</ID>\n  </Owner>\n",
        escape_xml(&acl.owner_id)
    ));
    xml.push_str("  <AccessControlList>\n");
    for grant in &acl.grants {
        xml.push_str("    <Grant>\n");
        match &grant.grantee {
            Grantee::CanonicalUser(id) => xml.push_str(&format!(
                "      <Grantee xmlns:xsi=\"{}\" xsi:type=\"CanonicalUser\"><ID>{}</ID></Grantee>\n",
                XSI_NS,
                escape_xml(id)
            )),
            group => xml.push_str(&format!(
                "      <Grantee xmlns:xsi=\"{}\" xsi:type=\"Group\"><URI>{}</URI></Grantee>\n",
                XSI_NS,
                group.group_uri().unwrap_or_default()
            )),
        }
        xml.push_str(&format!(
            "      <Permission>{}</Permission>\n",
            grant.permission.as_str()
        ));
        xml.push_str("    </Grant>\n");
    }
    xml.push_str("  </AccessControlList>\n");
    xml.push_str("</AccessControlPolicy>");
    xml
}

#[derive(Debug, Deserialize)]
struct OwnerDoc {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct GranteeDoc {
    #[serde(rename = "ID")]
    id: Option<String>,
    #[serde(rename = "URI")]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GrantDoc {
    #[serde(rename = "Grantee")]
    grantee: GranteeDoc,
    #[serde(rename = "Permission")]
    permission: String,
}

#[derive(Debug, Default, Deserialize)]
struct GrantListDoc {
    #[serde(rename = "Grant", default)]
    grants: Vec<GrantDoc>,
}

#[derive(Debug, Deserialize)]
struct AccessControlPolicyDoc {
    #[serde(rename = "Owner")]
    owner: Option<OwnerDoc>,
    #[serde(rename = "AccessControlList", default)]
    list: GrantListDoc,
}

/// Parse an `AccessControlPolicy` document. A missing owner falls back to
/// `default_owner`.
pub fn acl_from_xml(xml: &str, default_owner: &str) -> Result<AccessControlList, AclError> {
    let doc: AccessControlPolicyDoc =
        quick_xml::de::from_str(xml).map_err(|e| AclError::Invalid(e.to_string()))?;

    let grants = doc
        .list
        .grants
        .into_iter()
        .map(|g| {
            let grantee = match (g.grantee.id, g.grantee.uri) {
                (Some(id), _) => Grantee::CanonicalUser(id),
                (None, Some(uri)) => Grantee::from_group_uri(&uri)
                    .ok_or_else(|| AclError::Invalid(format!("unknown group {}", uri)))?,
                (None, None) => {
                    return Err(AclError::Invalid("grantee without ID or URI".to_string()))
                }
            };
            let permission: Permission = g.permission.parse()?;
            Ok(Grant::new(grantee, permission))
        })
        .collect::<Result<Vec<_>, AclError>>()?;

    let owner = doc.owner.map(|o| o.id);
    Ok(AccessControlList::new(
        owner.as_deref().unwrap_or(default_owner),
        grants,
    ))
}
