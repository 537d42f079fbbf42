//! Anonymous memory mappings with address hints.
//!
//! A heap that must stay contiguous in address space grows by requesting
//! fresh pages at the exact end of its current range; a mapping that lands
//! anywhere else is unusable. This crate wraps the raw `mmap` plumbing in a
//! small options builder with an optional *strict* mode that turns "the
//! kernel picked a different address" into an error instead of a silently
//! relocated mapping.
//!
//! Unix only: the grow-in-place model is `mmap`-shaped and there is no
//! backend for other platforms.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

pub use os::page_size;

/// A handle to an anonymous memory mapping.
///
/// The mapping is released when the handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the mapping.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

// SAFETY: the handle is a pointer/length pair over process-private memory;
// nothing in it is tied to the creating thread.
unsafe impl Send for Mmap {}
// SAFETY: see Send impl.
unsafe impl Sync for Mmap {}

/// Configuration for creating an anonymous mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    hint_addr: usize,
    strict: bool,
}

impl MmapOptions {
    /// Creates a new `MmapOptions` with length 0 and no address hint.
    /// A length must be set before mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            hint_addr: 0,
            strict: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Requests that the mapping be placed at `addr`.
    ///
    /// The kernel is free to ignore the request unless [`strict`] is also
    /// set. For the best chance of success, `addr` should be page-aligned
    /// and the range `[addr, addr + len)` should be free.
    ///
    /// [`strict`]: Self::strict
    #[must_use]
    pub const fn hint(mut self, addr: usize) -> Self {
        self.hint_addr = addr;
        self
    }

    /// Makes the address hint binding.
    ///
    /// With `strict` set, [`map_anon`] returns an error whenever the kernel
    /// places the mapping anywhere other than the hinted address; the
    /// misplaced mapping is released before returning.
    ///
    /// [`map_anon`]: Self::map_anon
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Creates an anonymous read/write mapping.
    ///
    /// # Errors
    ///
    /// Returns the `mmap` error, an `InvalidInput` error when no length was
    /// set, or `AddrNotAvailable` when a strict hint was not honored.
    ///
    /// # Safety
    ///
    /// Creating the mapping is itself sound, but the returned pointer range
    /// is raw memory: the caller is responsible for every access through
    /// [`Mmap::ptr`] and for not using the range after the handle is
    /// dropped.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        let inner = unsafe { os::MmapInner::map_anon(self.hint_addr, self.len)? };

        if self.strict && self.hint_addr != 0 {
            let got = inner.ptr() as usize;
            if got != self.hint_addr {
                // inner's drop releases the misplaced mapping
                return Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!(
                        "requested mapping at {:#x}, kernel placed it at {got:#x}",
                        self.hint_addr
                    ),
                ));
            }
        }

        Ok(Mmap { inner })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}
