// src/core/store/persistence.rs

//! Snapshot persistence for the store.
//!
//! Persistent namespaces are serialized into a single snapshot file:
//! a magic header, a format version, a zstd-compressed bincode payload, and
//! a trailing CRC-64 checksum. Saves go through a temp file and an atomic
//! rename. Non-persistent namespaces are recomputed on restart and never
//! appear in the file.

use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use crc::{CRC_64_REDIS, Crc};
use tokio::fs;
use tracing::{info, warn};

use super::Store;
use crate::core::Error;
use crate::core::codec;
use crate::core::resource::Resource;

const SNAPSHOT_MAGIC: &[u8] = b"OMNISNAP";
const SNAPSHOT_VERSION: &[u8] = b"0001";

/// Snapshot payloads compress well; the level is fixed rather than tied to
/// the field-compression policy.
const SNAPSHOT_ZSTD_LEVEL: i32 = 3;

const CHECKSUM_ALGO: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

/// Serializes the persistent namespaces of `store` to `path`.
pub async fn save_snapshot(store: &Store, path: &Path) -> Result<(), Error> {
    let resources = store.snapshot_persistent();
    let count = resources.len();

    let encoded = bincode::serde::encode_to_vec(&resources, bincode::config::standard())
        .map_err(|e| Error::Internal(format!("snapshot encoding failed: {e}")))?;
    let compressed = codec::zstd::compress(&encoded, SNAPSHOT_ZSTD_LEVEL)?;

    let mut out = BytesMut::with_capacity(SNAPSHOT_MAGIC.len() + SNAPSHOT_VERSION.len() + compressed.len() + 16);
    out.put_slice(SNAPSHOT_MAGIC);
    out.put_slice(SNAPSHOT_VERSION);
    out.put_u64_le(compressed.len() as u64);
    out.put_slice(&compressed);
    out.put_u64_le(CHECKSUM_ALGO.checksum(&compressed));

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, &out).await?;
    fs::rename(&tmp_path, path).await?;

    info!(resources = count, path = %path.display(), "store snapshot saved");
    Ok(())
}

/// Loads a snapshot from `path` into `store`. A missing file is not an
/// error; a corrupt one is.
pub async fn load_snapshot(store: &Store, path: &Path) -> Result<usize, Error> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no store snapshot found, starting empty");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut buf = &raw[..];
    if buf.len() < SNAPSHOT_MAGIC.len() + SNAPSHOT_VERSION.len() + 16 {
        return Err(Error::InvalidFormat("snapshot file truncated".to_string()));
    }
    if &buf[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
        return Err(Error::InvalidFormat("bad snapshot magic".to_string()));
    }
    buf.advance(SNAPSHOT_MAGIC.len());
    if &buf[..SNAPSHOT_VERSION.len()] != SNAPSHOT_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported snapshot version {:?}",
            &buf[..SNAPSHOT_VERSION.len()]
        )));
    }
    buf.advance(SNAPSHOT_VERSION.len());

    let payload_len = buf.get_u64_le() as usize;
    if buf.len() < payload_len + 8 {
        return Err(Error::InvalidFormat("snapshot payload truncated".to_string()));
    }
    let payload = &buf[..payload_len];
    let expected_crc = (&buf[payload_len..]).get_u64_le();
    if CHECKSUM_ALGO.checksum(payload) != expected_crc {
        return Err(Error::InvalidFormat("snapshot checksum mismatch".to_string()));
    }

    let decompressed = codec::zstd::decompress(payload)?;
    let (resources, _): (Vec<Resource>, usize) =
        bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())
            .map_err(|e| Error::InvalidFormat(format!("snapshot decoding failed: {e}")))?;
    decompressed.release();

    let count = resources.len();
    store.restore(resources);
    if count > 0 {
        info!(resources = count, path = %path.display(), "store snapshot loaded");
    } else {
        warn!(path = %path.display(), "store snapshot was empty");
    }
    Ok(count)
}
