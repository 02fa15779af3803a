//! GZIP compression/decompression of in-memory byte buffers.
//!
//! No streaming API at this layer: buffers are bounded by the
//! `max_content_length` guard before they ever reach here (spec.md §4.2).

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to gzip-compress data: {0}")]
    Compress(#[source] std::io::Error),

    #[error("failed to gzip-decompress data: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Compresses `data` with gzip at the default compression level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

/// Decompresses a gzip buffer. Truncated or malformed input surfaces as
/// [`CodecError::Decompress`], which handlers map to
/// `404 Unable to uncompress data` (spec.md §7).
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(CodecError::Decompress)?;
    Ok(out)
}
