//! Linear memory shared by every call on one execution context.
//!
//! One region exists per context. Calls on the same context reuse it in
//! sequence; the mutex inside [`SharedMemory`] is what serializes them.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::error::MemoryError;

/// Bytes per page.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Largest page count a 32-bit memory can address.
pub const MAX_PAGES: u32 = 65536;

/// A growable byte region measured in pages.
#[derive(Debug)]
pub struct LinearMemory {
    bytes: Vec<u8>,
    max_pages: u32,
}

impl LinearMemory {
    /// Create a zeroed memory of `initial` pages that may grow to `max`.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::Limits` if `initial > max` or `max` exceeds
    /// [`MAX_PAGES`].
    pub fn new(initial: u32, max: u32) -> Result<Self, MemoryError> {
        if initial > max || max > MAX_PAGES {
            return Err(MemoryError::Limits { initial, max });
        }
        Ok(Self {
            bytes: vec![0; initial as usize * PAGE_SIZE],
            max_pages: max,
        })
    }

    /// Current size in pages.
    pub fn pages(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE) as u32
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Current size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Grow by `delta` pages, returning the previous page count.
    pub fn grow(&mut self, delta: u32) -> Result<u32, MemoryError> {
        let old = self.pages();
        let requested = u64::from(old) + u64::from(delta);
        if requested > u64::from(self.max_pages) {
            return Err(MemoryError::Grow {
                requested,
                max: self.max_pages,
            });
        }
        self.bytes.resize(requested as usize * PAGE_SIZE, 0);
        trace!("memory grown from {} to {} pages", old, requested);
        Ok(old)
    }

    /// Grow until at least `len` bytes are addressable.
    pub fn ensure(&mut self, len: usize) -> Result<(), MemoryError> {
        if len <= self.bytes.len() {
            return Ok(());
        }
        let needed = len.div_ceil(PAGE_SIZE);
        let delta = needed.saturating_sub(self.pages() as usize);
        let delta = u32::try_from(delta).map_err(|_| MemoryError::Grow {
            requested: needed as u64,
            max: self.max_pages,
        })?;
        self.grow(delta).map(|_| ())
    }

    fn range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(offset..end),
            _ => Err(MemoryError::OutOfBounds {
                offset,
                len,
                size: self.bytes.len(),
            }),
        }
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.range(offset, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(offset, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, MemoryError> {
        let b = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<(), MemoryError> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) -> Result<(), MemoryError> {
        self.write(offset, &value.to_le_bytes())
    }
}

/// Handle to a context's memory. Clones refer to the same region.
#[derive(Debug, Clone)]
pub struct SharedMemory {
    inner: Arc<Mutex<LinearMemory>>,
    shared: bool,
    max_pages: u32,
}

impl SharedMemory {
    /// Create a memory region.
    ///
    /// `shared` mirrors the module-level shared flag the engine's memory
    /// import must declare.
    pub fn new(initial: u32, max: u32, shared: bool) -> Result<Self, MemoryError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(LinearMemory::new(initial, max)?)),
            shared,
            max_pages: max,
        })
    }

    /// Exclusive access for the duration of one call.
    pub fn lock(&self) -> Result<MutexGuard<'_, LinearMemory>, MemoryError> {
        Ok(self.inner.lock()?)
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Whether both handles refer to the same region.
    pub fn ptr_eq(&self, other: &SharedMemory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
