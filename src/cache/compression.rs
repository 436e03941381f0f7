//! LZ4 payload compression for the persistent tier.
//!
//! Compressed blobs carry their uncompressed length as a 4-byte prefix
//! (`lz4_flex` size-prepended format) so decompression needs no side
//! channel beyond the `compressed` flag stored next to the blob.

use serde_json::Value;

use crate::{GatewayError, Result};

/// Compress a byte payload.
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Reverse [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| GatewayError::Cache(format!("lz4 decompression failed: {e}")))
}

/// Serialize a value for storage, compressing when it pays off.
///
/// Returns the stored bytes and whether they are compressed. Payloads
/// under `threshold`, or that do not shrink, are stored as plain JSON.
pub(crate) fn encode(value: &Value, enabled: bool, threshold: usize) -> Result<(Vec<u8>, bool)> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| GatewayError::Cache(format!("serialize cache value: {e}")))?;
    if !enabled || raw.len() < threshold {
        return Ok((raw, false));
    }
    let packed = compress(&raw);
    if packed.len() < raw.len() {
        Ok((packed, true))
    } else {
        Ok((raw, false))
    }
}

/// Inverse of [`encode`].
pub(crate) fn decode(data: &[u8], compressed: bool) -> Result<Value> {
    let value = if compressed {
        let raw = decompress(data)?;
        serde_json::from_slice(&raw)
    } else {
        serde_json::from_slice(data)
    };
    value.map_err(|e| GatewayError::Cache(format!("deserialize cache value: {e}")))
}
