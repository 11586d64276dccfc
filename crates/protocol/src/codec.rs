//! Payload codec for the JSON text channel.
//!
//! Payload bytes are gzip-compressed and base64-encoded before they enter
//! an envelope, and the inverse on the way out. Raw bytes are not legal
//! inside a JSON text frame.

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Errors from payload encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}

/// Encodes payload bytes for transport: gzip, then base64.
pub fn wrap(data: &[u8]) -> Result<String, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}

/// Decodes a transported payload: base64, then gunzip.
pub fn unwrap(text: &str) -> Result<Vec<u8>, CodecError> {
    let compressed = BASE64.decode(text)?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;
    Ok(data)
}
