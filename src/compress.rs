//! Body compression stage.
//!
//! Application payloads are run through zstd before framing. The zstd frame
//! magic makes compressed output self-identifying, so the receiver decides
//! between "decompress" and "pass through" by prefix inspection alone and
//! never attempts to decompress a raw body.
//!
//! Policy: compression is always attempted; if it does not shrink the
//! payload the raw bytes are sent instead. Zero-length bodies are never
//! compressed. The one exception is a raw payload that itself begins with
//! the zstd magic: it is wrapped in a zstd frame even when that costs a few
//! bytes, so the prefix test stays unambiguous.

use std::io::Read;

use tracing::warn;

use crate::core::{CompressError, DEFAULT_COMPRESSION_LEVEL, MAX_DECOMPRESSED_LEN, ZSTD_MAGIC};

/// Returns whether a body is a compression frame.
pub fn is_compressed(body: &[u8]) -> bool {
    body.len() >= ZSTD_MAGIC.len() && body[..ZSTD_MAGIC.len()] == ZSTD_MAGIC
}

/// Per-connection compression context.
#[derive(Debug, Clone)]
pub struct Compressor {
    level: i32,
    max_decompressed: usize,
}

impl Compressor {
    /// Create a compressor with default settings.
    pub fn new() -> Self {
        Self {
            level: DEFAULT_COMPRESSION_LEVEL,
            max_decompressed: MAX_DECOMPRESSED_LEN,
        }
    }

    /// Create a compressor with a specific zstd level (clamped to 1..=22).
    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
            ..Self::new()
        }
    }

    /// Produce the body to put on the wire for `data`.
    ///
    /// The result is either a zstd frame or the raw input, per the module
    /// policy; [`decode_body`](Self::decode_body) inverts it.
    pub fn encode_body(&self, data: &[u8]) -> Vec<u8> {
        if data.is_empty() {
            return Vec::new();
        }

        let compressed = match zstd::encode_all(data, self.level) {
            Ok(out) => out,
            Err(e) => {
                warn!("compression failed, sending raw body: {e}");
                return data.to_vec();
            }
        };

        if compressed.len() < data.len() || is_compressed(data) {
            compressed
        } else {
            data.to_vec()
        }
    }

    /// Recover the application payload from a received body.
    ///
    /// Raw bodies pass through; zstd frames are decompressed with a size cap.
    pub fn decode_body(&self, body: &[u8]) -> Result<Vec<u8>, CompressError> {
        if !is_compressed(body) {
            return Ok(body.to_vec());
        }

        let decoder = zstd::Decoder::new(body)
            .map_err(|e| CompressError::DecompressFailed(e.to_string()))?;

        let mut output = Vec::new();
        decoder
            .take(self.max_decompressed as u64 + 1)
            .read_to_end(&mut output)
            .map_err(|e| CompressError::DecompressFailed(e.to_string()))?;

        if output.len() > self.max_decompressed {
            return Err(CompressError::SizeExceeded {
                size: output.len(),
                limit: self.max_decompressed,
            });
        }

        Ok(output)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_compressible() {
        let ctx = Compressor::new();
        let data: Vec<u8> = std::iter::repeat(b"squall ".iter().copied())
            .flatten()
            .take(700)
            .collect();

        let body = ctx.encode_body(&data);
        assert!(is_compressed(&body));
        assert!(body.len() < data.len());
        assert_eq!(ctx.decode_body(&body).unwrap(), data);
    }

    #[test]
    fn incompressible_passes_through_raw() {
        let ctx = Compressor::new();
        // High-entropy-ish bytes that zstd cannot shrink.
        let data: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(167) >> 3) as u8).collect();

        let body = ctx.encode_body(&data);
        if !is_compressed(&body) {
            assert_eq!(body, data);
        }
        assert_eq!(ctx.decode_body(&body).unwrap(), data);
    }

    #[test]
    fn empty_body_never_compressed() {
        let ctx = Compressor::new();
        let body = ctx.encode_body(&[]);
        assert!(body.is_empty());
        assert_eq!(ctx.decode_body(&body).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn raw_body_colliding_with_magic_gets_wrapped() {
        let ctx = Compressor::new();
        let mut data = ZSTD_MAGIC.to_vec();
        data.extend_from_slice(&[0x11, 0x22, 0x33]);

        let body = ctx.encode_body(&data);
        assert!(is_compressed(&body));
        assert_eq!(ctx.decode_body(&body).unwrap(), data);
    }

    #[test]
    fn malformed_frame_rejected() {
        let ctx = Compressor::new();
        let mut body = ZSTD_MAGIC.to_vec();
        body.extend_from_slice(&[0xFF; 16]);
        assert!(matches!(
            ctx.decode_body(&body),
            Err(CompressError::DecompressFailed(_))
        ));
    }

    #[test]
    fn oversized_output_rejected() {
        let ctx = Compressor {
            level: DEFAULT_COMPRESSION_LEVEL,
            max_decompressed: 100,
        };
        let data = vec![0u8; 400];
        let body = ctx.encode_body(&data);
        assert!(is_compressed(&body));
        assert!(matches!(
            ctx.decode_body(&body),
            Err(CompressError::SizeExceeded { .. })
        ));
    }
}
