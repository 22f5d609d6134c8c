//! Fixed-size pool of zeroed I/O buffers.
//!
//! Buffers are zeroed when they come back, so a buffer handed out never
//! carries bytes from an earlier request. Buffers of the wrong size are
//! dropped instead of pooled.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

use smbmux_domain::{Result, SmbError};

use crate::config::MAX_BUFFER_SIZE;

// ---------------------------------------------------------------------------
// BufferCache
// ---------------------------------------------------------------------------

pub struct BufferCache {
    // ---
    buffer_size: usize,
    slots: Mutex<Vec<Option<Box<[u8]>>>>,
}

// ---

impl BufferCache {
    // ---
    /// `capacity` pooled slots of `buffer_size` bytes each.
    pub fn new(capacity: usize, buffer_size: usize) -> Result<Self> {
        // ---
        if capacity == 0 {
            return Err(SmbError::InvalidArgument("buffer cache capacity must be at least 1".into()));
        }
        if buffer_size == 0 || buffer_size > MAX_BUFFER_SIZE {
            return Err(SmbError::InvalidArgument(format!(
                "buffer size must be between 1 and {MAX_BUFFER_SIZE}, got {buffer_size}"
            )));
        }

        Ok(Self {
            buffer_size,
            slots: Mutex::new(vec![None; capacity]),
        })
    }

    // ---

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Box<[u8]>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.slots().len()
    }

    /// Number of buffers currently parked in the pool.
    pub fn pooled(&self) -> usize {
        self.slots().iter().filter(|s| s.is_some()).count()
    }

    // ---

    /// A zeroed buffer of `buffer_size` bytes, pooled if one is available.
    pub fn get_buffer(&self) -> Box<[u8]> {
        // ---
        let pooled = self.slots().iter_mut().find_map(Option::take);
        pooled.unwrap_or_else(|| vec![0u8; self.buffer_size].into_boxed_slice())
    }

    // ---

    /// Return `buffer` to the pool.
    ///
    /// Zeroed before it is parked. Dropped if it has the wrong size or
    /// every slot is taken.
    pub fn release_buffer(&self, mut buffer: Box<[u8]>) {
        // ---
        if buffer.len() != self.buffer_size {
            tracing::trace!(
                len = buffer.len(),
                expected = self.buffer_size,
                "ignoring buffer of foreign size"
            );
            return;
        }

        buffer.fill(0);

        let mut slots = self.slots();
        if let Some(free) = slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(buffer);
        }
    }

    // ---

    /// Borrow a buffer that goes back to the pool when dropped.
    pub fn checkout(&self) -> CachedBuffer<'_> {
        CachedBuffer {
            cache: self,
            buffer: Some(self.get_buffer()),
        }
    }
}

// ---------------------------------------------------------------------------
// CachedBuffer
// ---------------------------------------------------------------------------

/// RAII guard from [`BufferCache::checkout`].
pub struct CachedBuffer<'a> {
    // ---
    cache: &'a BufferCache,
    buffer: Option<Box<[u8]>>,
}

// ---

impl Deref for CachedBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for CachedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for CachedBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.cache.release_buffer(buffer);
        }
    }
}

// ---
