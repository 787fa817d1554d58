// src/core/codec/mod.rs

//! The compression codec for large text fields.
//!
//! Machine configs, config patches, and rendered manifests share one wire
//! and storage contract: the logical value is stored either plain or as a
//! zstd frame, never both. `MaybeCompressed` is the field carrier;
//! `set_uncompressed` applies the threshold policy and `get_uncompressed`
//! restores the logical value byte-for-byte.

pub mod pool;
pub mod zstd;

use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

pub use pool::{BufferPool, PooledBuffer, decompression_pool};

use crate::core::Error;

/// The default minimum input size, in bytes, at which compression kicks in.
pub const DEFAULT_MIN_THRESHOLD: usize = 2048;

/// The default zstd compression level.
pub const DEFAULT_LEVEL: i32 = 3;

/// Process-wide compression policy.
///
/// Controllers read the policy once per reconcile through
/// [`compression_config`]; dynamic reconfiguration goes through
/// [`set_compression_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// When false, every value is stored plain.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Inputs shorter than this are stored plain even when enabled.
    #[serde(default = "default_min_threshold")]
    pub min_threshold: usize,
    /// The zstd compression level.
    #[serde(default = "default_level")]
    pub level: i32,
}

fn default_enabled() -> bool {
    true
}
fn default_min_threshold() -> usize {
    DEFAULT_MIN_THRESHOLD
}
fn default_level() -> i32 {
    DEFAULT_LEVEL
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_threshold: DEFAULT_MIN_THRESHOLD,
            level: DEFAULT_LEVEL,
        }
    }
}

static COMPRESSION_CONFIG: Lazy<RwLock<CompressionConfig>> =
    Lazy::new(|| RwLock::new(CompressionConfig::default()));

/// Returns a copy of the process-wide compression policy.
pub fn compression_config() -> CompressionConfig {
    *COMPRESSION_CONFIG.read()
}

/// Replaces the process-wide compression policy.
pub fn set_compression_config(config: CompressionConfig) {
    *COMPRESSION_CONFIG.write() = config;
}

/// A large text field stored either plain or zstd-compressed.
///
/// Invariant: at most one of `{plain, compressed}` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaybeCompressed {
    plain: Bytes,
    compressed: Bytes,
}

impl MaybeCompressed {
    pub fn new() -> Self {
        Default::default()
    }

    /// Builds a carrier from a logical value, applying `config`'s policy.
    pub fn from_uncompressed(data: &[u8], config: &CompressionConfig) -> Result<Self, Error> {
        let mut field = Self::new();
        field.set_uncompressed(data, config)?;
        Ok(field)
    }

    /// Stores the logical value, choosing the representation:
    /// plain when compression is disabled or the input is below the
    /// threshold, a zstd frame otherwise. The other field is cleared.
    pub fn set_uncompressed(&mut self, data: &[u8], config: &CompressionConfig) -> Result<(), Error> {
        if !config.enabled || data.len() < config.min_threshold {
            self.plain = Bytes::copy_from_slice(data);
            self.compressed = Bytes::new();
        } else {
            self.compressed = zstd::compress(data, config.level)?;
            self.plain = Bytes::new();
        }
        Ok(())
    }

    /// Returns the logical value, decompressing on demand.
    pub fn get_uncompressed(&self) -> Result<Bytes, Error> {
        if self.compressed.is_empty() {
            return Ok(self.plain.clone());
        }
        let buf = zstd::decompress(&self.compressed)?;
        Ok(buf.into_bytes())
    }

    /// True when the stored representation is a zstd frame.
    pub fn is_compressed(&self) -> bool {
        !self.compressed.is_empty()
    }

    /// True when the logical value is empty.
    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.compressed.is_empty()
    }

    /// The stored plain bytes; empty when the value is compressed.
    pub fn plain(&self) -> &Bytes {
        &self.plain
    }

    /// The stored zstd frame; empty when the value is plain.
    pub fn compressed(&self) -> &Bytes {
        &self.compressed
    }

    /// Rebuilds a carrier from a wire representation, enforcing the
    /// exactly-one-populated contract.
    pub fn from_wire(plain: Bytes, compressed: Bytes) -> Result<Self, Error> {
        if !plain.is_empty() && !compressed.is_empty() {
            return Err(Error::InvalidFormat(
                "both plain and compressed fields are populated".to_string(),
            ));
        }
        Ok(Self { plain, compressed })
    }
}

// Human-readable serialization (JSON/YAML) always emits the uncompressed
// view; the binary storage path keeps the on-disk representation.
impl Serialize for MaybeCompressed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            let data = self.get_uncompressed().map_err(serde::ser::Error::custom)?;
            match std::str::from_utf8(&data) {
                Ok(text) => serializer.serialize_str(text),
                Err(_) => serializer.serialize_bytes(&data),
            }
        } else {
            let mut st = serializer.serialize_struct("MaybeCompressed", 2)?;
            st.serialize_field("data", &self.plain)?;
            st.serialize_field("compressed_data", &self.compressed)?;
            st.end()
        }
    }
}

impl<'de> Deserialize<'de> for MaybeCompressed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            struct UncompressedVisitor;

            impl<'de> Visitor<'de> for UncompressedVisitor {
                type Value = Vec<u8>;

                fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str("a string or byte array")
                }

                fn visit_str<E: de::Error>(self, v: &str) -> Result<Vec<u8>, E> {
                    Ok(v.as_bytes().to_vec())
                }

                fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
                    Ok(v.to_vec())
                }

                fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
                    let mut out = Vec::new();
                    while let Some(b) = seq.next_element::<u8>()? {
                        out.push(b);
                    }
                    Ok(out)
                }
            }

            let data = deserializer.deserialize_any(UncompressedVisitor)?;
            // Deserialization re-applies the threshold policy.
            MaybeCompressed::from_uncompressed(&data, &compression_config())
                .map_err(de::Error::custom)
        } else {
            #[derive(Deserialize)]
            struct Wire {
                data: Bytes,
                compressed_data: Bytes,
            }

            let wire = Wire::deserialize(deserializer)?;
            MaybeCompressed::from_wire(wire.data, wire.compressed_data).map_err(de::Error::custom)
        }
    }
}
