// src/core/codec/pool.rs

//! A reference-counted pool of reusable decompression buffers.
//!
//! Decompression allocates a single destination buffer per frame. Buffers are
//! returned to the pool on release; release happens on every exit path,
//! including error paths, because the `PooledBuffer` guard returns its
//! storage when dropped. Debug builds track outstanding buffers so leaks can
//! be asserted on at shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// The maximum number of idle buffers kept for reuse.
const MAX_POOLED_BUFFERS: usize = 64;

/// Idle buffers above this capacity are dropped instead of pooled, so a
/// single oversized frame does not pin memory forever.
const MAX_POOLED_CAPACITY: usize = 4 * 1024 * 1024;

/// The process-wide pool used by the decompression path.
static DECOMPRESSION_POOL: Lazy<BufferPool> = Lazy::new(BufferPool::new);

/// Returns the shared decompression buffer pool.
pub fn decompression_pool() -> &'static BufferPool {
    &DECOMPRESSION_POOL
}

#[derive(Debug, Default)]
struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
}

/// A pool of reusable byte buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Default::default()
    }

    /// Acquires a cleared buffer with at least `capacity` bytes reserved.
    ///
    /// The returned guard returns its storage to the pool when released or
    /// dropped.
    pub fn acquire(&self, capacity: usize) -> PooledBuffer {
        let mut buf = self.inner.free.lock().pop().unwrap_or_default();
        buf.clear();
        if buf.capacity() < capacity {
            buf.reserve(capacity - buf.capacity());
        }
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
            released: false,
        }
    }

    /// The number of buffers currently held by callers.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }

    /// The number of idle buffers available for reuse.
    pub fn idle(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Asserts in debug builds that no buffers are still checked out.
    /// Called by the shutdown path as a leak sweep.
    pub fn debug_leak_check(&self) {
        debug_assert_eq!(
            self.outstanding(),
            0,
            "decompression buffers leaked: {} still outstanding",
            self.outstanding()
        );
    }
}

/// A buffer checked out from a `BufferPool`.
///
/// Dereferences to `Vec<u8>`; the storage goes back to the pool exactly once,
/// on `release`, `into_bytes`, or drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
    released: bool,
}

impl PooledBuffer {
    /// Explicitly releases the buffer back to the pool.
    pub fn release(mut self) {
        self.give_back();
    }

    /// Copies the contents into an immutable `Bytes` and releases the
    /// backing storage back to the pool.
    pub fn into_bytes(mut self) -> Bytes {
        let out = Bytes::copy_from_slice(&self.buf);
        self.give_back();
        out
    }

    fn give_back(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.pool.outstanding.fetch_sub(1, Ordering::Relaxed);
        if self.buf.capacity() <= MAX_POOLED_CAPACITY {
            let mut free = self.pool.free.lock();
            if free.len() < MAX_POOLED_BUFFERS {
                free.push(std::mem::take(&mut self.buf));
            }
        }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.give_back();
    }
}
