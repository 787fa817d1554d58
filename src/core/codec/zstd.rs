// src/core/codec/zstd.rs

//! Bounded zstd compression and decompression.
//!
//! Decompression sizes its single destination buffer from the frame-header
//! content size. Frames that do not declare a content size are decoded
//! through a streaming reader into a small initial buffer; frames declaring
//! a size beyond the platform integer maximum are refused.

use std::io::Read;

use bytes::Bytes;

use super::pool::{PooledBuffer, decompression_pool};
use crate::core::Error;

/// The assumed destination capacity when a frame omits its content size.
const UNKNOWN_FRAME_CAPACITY: usize = 256;

/// Compresses `input` into a single zstd frame at the given level.
pub fn compress(input: &[u8], level: i32) -> Result<Bytes, Error> {
    let out = zstd::stream::encode_all(input, level)
        .map_err(|e| Error::InvalidFormat(format!("zstd compression failed: {e}")))?;
    Ok(Bytes::from(out))
}

/// Decompresses a single zstd frame into a pooled buffer.
///
/// The buffer is released back to the pool on every exit path, including
/// errors, via the guard's drop.
pub fn decompress(input: &[u8]) -> Result<PooledBuffer, Error> {
    let content_size = zstd::zstd_safe::get_frame_content_size(input)
        .map_err(|_| Error::InvalidFormat("invalid zstd frame header".to_string()))?;

    match content_size {
        Some(size) => {
            let capacity = usize::try_from(size).map_err(|_| {
                Error::InvalidFormat(format!(
                    "declared frame content size {size} exceeds platform maximum"
                ))
            })?;
            let mut buf = decompression_pool().acquire(capacity);
            let mut decompressor = zstd::bulk::Decompressor::new()
                .map_err(|e| Error::InvalidFormat(format!("zstd init failed: {e}")))?;
            decompressor
                .decompress_to_buffer(input, &mut *buf)
                .map_err(|e| Error::InvalidFormat(format!("zstd decompression failed: {e}")))?;
            Ok(buf)
        }
        None => {
            // The header carries no content size; start small and let the
            // streaming decoder grow the buffer.
            let mut buf = decompression_pool().acquire(UNKNOWN_FRAME_CAPACITY);
            let mut decoder = zstd::stream::read::Decoder::new(input)
                .map_err(|e| Error::InvalidFormat(format!("invalid zstd frame: {e}")))?;
            decoder
                .read_to_end(&mut buf)
                .map_err(|e| Error::InvalidFormat(format!("zstd decompression failed: {e}")))?;
            Ok(buf)
        }
    }
}
