//! Byte-range parsing and conditional-request evaluation
//!
//! Accepted `Range` forms (single range only):
//!
//! - `bytes=0-499` -- explicit start and end (end is clamped to the object)
//! - `bytes=500-` -- from byte 500 to the end
//! - `bytes=-500` -- the last 500 bytes (clamped to the whole object)
//!
//! Conditionals are evaluated before the range is applied.

use crate::types::normalize_etag;
use thiserror::Error;

/// Range header failures. All of them answer `416 Range Not Satisfiable`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("invalid range header: {0}")]
    Malformed(String),

    #[error("multiple ranges not supported")]
    MultipleRanges,

    #[error("range not satisfiable for object of {size} bytes")]
    NotSatisfiable { size: u64 },
}

/// A parsed, not yet validated, range request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-end`
    Bounded { start: u64, end: u64 },
    /// `bytes=start-`
    From { start: u64 },
    /// `bytes=-n`
    Suffix { len: u64 },
}

/// A validated inclusive byte range within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value, e.g. `bytes 0-9/62`.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }

    /// Slice bounds for in-memory bodies.
    pub fn as_slice_range(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.end + 1) as usize
    }
}

/// `Content-Range` value sent alongside a 416 response.
pub fn unsatisfiable_content_range(size: u64) -> String {
    format!("bytes */{}", size)
}

fn parse_bound(value: &str, header: &str) -> Result<u64, RangeError> {
    value
        .trim()
        .parse()
        .map_err(|_| RangeError::Malformed(header.to_string()))
}

/// Parse a `Range` header value without looking at the object size.
pub fn parse_range_header(header: &str) -> Result<RangeSpec, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| RangeError::Malformed(header.to_string()))?
        .trim();

    if spec.contains(',') {
        return Err(RangeError::MultipleRanges);
    }

    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| RangeError::Malformed(header.to_string()))?;

    match (start.trim().is_empty(), end.trim().is_empty()) {
        (true, true) => Err(RangeError::Malformed(header.to_string())),
        (true, false) => Ok(RangeSpec::Suffix {
            len: parse_bound(end, header)?,
        }),
        (false, true) => Ok(RangeSpec::From {
            start: parse_bound(start, header)?,
        }),
        (false, false) => Ok(RangeSpec::Bounded {
            start: parse_bound(start, header)?,
            end: parse_bound(end, header)?,
        }),
    }
}

impl RangeSpec {
    /// Validate against the object size: `start` must lie in `[0, size)`,
    /// `end` is clamped to `size - 1`, and `start > end` is rejected.
    pub fn resolve(self, size: u64) -> Result<ByteRange, RangeError> {
        let not_satisfiable = RangeError::NotSatisfiable { size };
        if size == 0 {
            return Err(not_satisfiable);
        }
        let last = size - 1;
        let (start, end) = match self {
            RangeSpec::Bounded { start, end } => (start, end.min(last)),
            RangeSpec::From { start } => (start, last),
            RangeSpec::Suffix { len } => (size.saturating_sub(len), last),
        };
        if start >= size || start > end {
            return Err(not_satisfiable);
        }
        Ok(ByteRange { start, end })
    }
}

/// Resolve an optional `Range` header. `Ok(None)` means the full object.
///
/// Every failure, including a header that does not parse, comes back as
/// `NotSatisfiable` so the caller can answer with `bytes */size`.
pub fn resolve_range(header: Option<&str>, size: u64) -> Result<Option<ByteRange>, RangeError> {
    let Some(h) = header else {
        return Ok(None);
    };
    let spec = parse_range_header(h).map_err(|err| {
        tracing::debug!(header = %h, error = %err, "Rejecting unparseable range");
        RangeError::NotSatisfiable { size }
    })?;
    spec.resolve(size).map(Some)
}

/// Outcome of `If-Match` / `If-None-Match` evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    /// 304
    NotModified,
    /// 412
    Failed,
}

fn etag_list_matches(header: &str, current: &str) -> bool {
    let current = normalize_etag(current);
    header.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || normalize_etag(candidate) == current
    })
}

/// Evaluate conditional headers against the resource's current ETag.
pub fn evaluate_preconditions(
    if_match: Option<&str>,
    if_none_match: Option<&str>,
    current_etag: &str,
) -> Precondition {
    if let Some(if_match) = if_match {
        if !etag_list_matches(if_match, current_etag) {
            return Precondition::Failed;
        }
    }
    if let Some(if_none_match) = if_none_match {
        if etag_list_matches(if_none_match, current_etag) {
            return Precondition::NotModified;
        }
    }
    Precondition::Proceed
}
