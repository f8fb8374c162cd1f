//! Streaming decoder for the `aws-chunked` content encoding
//!
//! When an SDK uploads with `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` (or one of
//! the unsigned/trailer variants) the body is framed like this:
//!
//! ```text
//! <hex-chunk-size>;chunk-signature=<signature>\r\n
//! <chunk-data>\r\n
//! ...
//! 0;chunk-signature=<signature>\r\n
//! <trailer-name>:<trailer-value>\r\n
//! \r\n
//! ```
//!
//! [`AwsChunkedDecoder`] wraps any [`BufRead`] and exposes the plain payload
//! through [`Read`], one frame at a time, so callers may use any buffer size.
//!
//! The `chunk-signature` extension is stripped and not verified.

use axum::http::HeaderMap;
use bytes::Bytes;
use std::io::{self, BufRead, Read};
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on a single size or trailer line.
const MAX_LINE_LEN: u64 = 8 * 1024;

/// Errors produced while decoding an aws-chunked stream
#[derive(Debug, Error)]
pub enum ChunkedDecodeError {
    #[error("invalid chunk size: {0:?}")]
    InvalidChunkSize(String),

    #[error("failed to read chunk data: expected {expected} bytes, got {actual}")]
    ChunkData { expected: u64, actual: u64 },

    #[error("chunk header line exceeds {MAX_LINE_LEN} bytes")]
    LineTooLong,

    #[error("I/O error while decoding chunked body: {0}")]
    Io(#[from] io::Error),
}

impl From<ChunkedDecodeError> for io::Error {
    fn from(err: ChunkedDecodeError) -> Self {
        match err {
            ChunkedDecodeError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Check if the request body uses aws-chunked framing
pub fn is_aws_chunked(headers: &HeaderMap) -> bool {
    let content_encoding = headers
        .get_all("content-encoding")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|enc| enc.trim() == "aws-chunked"));

    content_encoding
        || headers
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("STREAMING-"))
            .unwrap_or(false)
}

/// Get the decoded content length from headers
pub fn get_decoded_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("x-amz-decoded-content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Streaming aws-chunked reader
pub struct AwsChunkedDecoder<R> {
    inner: R,
    /// Decoded bytes of the current frame not yet handed to the caller
    buf: Vec<u8>,
    pos: usize,
    finished: bool,
    chunks: u64,
    trailers: Vec<(String, String)>,
}

impl<R: BufRead> AwsChunkedDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            finished: false,
            chunks: 0,
            trailers: Vec::new(),
        }
    }

    /// Trailer headers seen after the terminal frame.
    pub fn trailers(&self) -> &[(String, String)] {
        &self.trailers
    }

    /// Number of data frames decoded so far.
    pub fn chunks_decoded(&self) -> u64 {
        self.chunks
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read one `\n`-terminated line. Returns `None` at a clean end of stream.
    fn read_line(&mut self) -> Result<Option<String>, ChunkedDecodeError> {
        let mut line = Vec::new();
        let n = (&mut self.inner)
            .take(MAX_LINE_LEN + 1)
            .read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') && n as u64 > MAX_LINE_LEN {
            return Err(ChunkedDecodeError::LineTooLong);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Parse the next frame into `buf`, or mark the stream finished.
    fn next_frame(&mut self) -> Result<(), ChunkedDecodeError> {
        let Some(line) = self.read_line()? else {
            warn!("aws-chunked: stream ended without a terminal chunk");
            self.finished = true;
            return Ok(());
        };

        let header = line.trim();
        let size_str = match header.find(';') {
            Some(idx) => header[..idx].trim(),
            None => header,
        };
        let size = u64::from_str_radix(size_str, 16)
            .map_err(|_| ChunkedDecodeError::InvalidChunkSize(size_str.to_string()))?;

        if size == 0 {
            self.read_trailers()?;
            self.finished = true;
            debug!(
                chunks = self.chunks,
                trailers = self.trailers.len(),
                "aws-chunked: reached terminal chunk"
            );
            return Ok(());
        }

        self.buf.clear();
        self.pos = 0;
        let actual = (&mut self.inner).take(size).read_to_end(&mut self.buf)? as u64;
        if actual != size {
            return Err(ChunkedDecodeError::ChunkData {
                expected: size,
                actual,
            });
        }
        self.chunks += 1;

        // Trailing CRLF after chunk data; permissive clients get a warning only.
        if let Some(rest) = self.read_line()? {
            if !rest.trim().is_empty() {
                warn!(
                    "aws-chunked: unexpected bytes after chunk {} data: {:?}",
                    self.chunks,
                    rest.trim()
                );
            }
        }
        Ok(())
    }

    fn read_trailers(&mut self) -> Result<(), ChunkedDecodeError> {
        while let Some(line) = self.read_line()? {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                self.trailers
                    .push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }
        Ok(())
    }
}

impl<R: BufRead> Read for AwsChunkedDecoder<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.buf.len() {
                let n = (self.buf.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.next_frame()?;
        }
    }
}

/// Decode a fully buffered aws-chunked body.
pub fn decode_aws_chunked(body: &[u8]) -> Result<Bytes, ChunkedDecodeError> {
    let mut decoder = AwsChunkedDecoder::new(io::Cursor::new(body));
    let mut decoded = Vec::with_capacity(body.len());
    decoder
        .read_to_end(&mut decoded)
        .map_err(recover_decode_error)?;

    debug!(
        "aws-chunked: decoded {} bytes from {} byte body in {} chunks",
        decoded.len(),
        body.len(),
        decoder.chunks_decoded()
    );
    Ok(Bytes::from(decoded))
}

/// Unwrap a decoder error that travelled through `io::Error`.
fn recover_decode_error(err: io::Error) -> ChunkedDecodeError {
    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<ChunkedDecodeError>() {
            Ok(decode_err) => *decode_err,
            Err(other) => ChunkedDecodeError::Io(io::Error::new(kind, other)),
        },
        None => ChunkedDecodeError::Io(io::Error::from(kind)),
    }
}
