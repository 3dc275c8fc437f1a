//! Gzip codec shared by the response cache and the search mirror.
//!
//! Cache entries are stored as gzip-compressed JSON. Decompression is bounded so a
//! corrupted or hostile entry cannot balloon memory.

use std::io::{Read, Write};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Upper bound on the size of a decompressed payload.
pub const MAX_DECOMPRESSED_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("gzip stream error: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("payload exceeds {limit} bytes once decompressed")]
    TooLarge { limit: u64 },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Gzip-compress `bytes` with the default compression level.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress`].
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(bytes).take(MAX_DECOMPRESSED_BYTES + 1);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    if out.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(CodecError::TooLarge {
            limit: MAX_DECOMPRESSED_BYTES,
        });
    }
    Ok(out)
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(value)?;
    compress(&json)
}

pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let json = decompress(bytes)?;
    Ok(serde_json::from_slice(&json)?)
}
