//! # Texture Memory Platform Layer
//!
//! Maps the large, GPU-visible memory region that backs the texture heap.
//! The heap only ever sees the [`MemoryMapper`] trait, so the same allocator
//! code runs against every backend:
//! - **Mock Mode** (default): fabricated page-aligned addresses, no backing
//!   memory. Fast unit testing on any host.
//! - **Host Mode**: real zeroed memory from the global allocator.
//!
//! ## Build Modes
//!
//! ```bash
//! # Mock (default)
//! cargo build
//!
//! # Host memory
//! cargo build --features host
//! ```
//!
//! Addresses handed out by a mapper are opaque to the heap except for
//! arithmetic comparison and offset computation.

#![no_std]

#[cfg(feature = "host")]
extern crate alloc;

#[cfg(test)]
extern crate std;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "host")]
pub mod host;

#[cfg(feature = "mock")]
pub use mock::MockMapper;

#[cfg(feature = "host")]
pub use host::HostMapper;

use thiserror::Error;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Mapping granularity of device-local memory (256KB)
pub const DEVICE_LOCAL_GRANULARITY: usize = 256 * 1024;

/// Platform mapping errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Invalid mapping size (must be > 0)")]
    InvalidSize,

    #[error("Out of {kind:?} memory (requested: {requested} bytes)")]
    OutOfMemory { kind: MemoryKind, requested: usize },

    #[error("Mapping table full ({max} live mappings)")]
    TooManyMappings { max: usize },

    #[error("Unknown mapping handle {0:?}")]
    UnknownHandle(MappingHandle),
}

pub type Result<T> = core::result::Result<T, PlatformError>;

/// Physical memory kind a region is carved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Accelerator-local memory (fastest for texture sampling)
    DeviceLocal,
    /// Cached system memory
    HostCached,
    /// Uncached system memory
    HostUncached,
}

impl MemoryKind {
    /// Check if this is accelerator-local memory
    pub const fn is_device_local(&self) -> bool {
        matches!(self, MemoryKind::DeviceLocal)
    }

    /// Mapping granularity in bytes; mapped sizes are rounded up to this
    pub const fn granularity(&self) -> usize {
        match self {
            MemoryKind::DeviceLocal => DEVICE_LOCAL_GRANULARITY,
            MemoryKind::HostCached | MemoryKind::HostUncached => PAGE_SIZE,
        }
    }

    /// Round `size` up to this kind's mapping granularity
    ///
    /// Returns `None` if the rounded size does not fit in `usize`.
    pub const fn round_size(&self, size: usize) -> Option<usize> {
        let granule = self.granularity();
        match size.checked_add(granule - 1) {
            Some(padded) => Some(padded & !(granule - 1)),
            None => None,
        }
    }
}

bitflags::bitflags! {
    /// GPU access attributes requested for a mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// GPU may read the region
        const READ = 1 << 0;
        /// GPU may write the region
        const WRITE = 1 << 1;
    }
}

/// Opaque platform handle identifying a live mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingHandle(pub u32);

/// A mapped memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Address where the region is mapped
    pub addr: usize,

    /// Mapped length in bytes (rounded to the kind's granularity)
    pub size: usize,

    /// Handle to pass back to [`MemoryMapper::unmap`]
    pub handle: MappingHandle,
}

/// Platform memory-mapping provider
pub trait MemoryMapper {
    /// Map a region of at least `size` bytes of `kind` memory
    ///
    /// # Errors
    /// Returns error if `size` is zero, the platform is out of memory of
    /// that kind, or no more mappings can be tracked
    fn map(&mut self, kind: MemoryKind, flags: MapFlags, size: usize) -> Result<Mapping>;

    /// Release a mapping previously returned by [`MemoryMapper::map`]
    ///
    /// # Errors
    /// Returns error if the handle is not live
    fn unmap(&mut self, handle: MappingHandle) -> Result<()>;
}

impl<M: MemoryMapper + ?Sized> MemoryMapper for &mut M {
    fn map(&mut self, kind: MemoryKind, flags: MapFlags, size: usize) -> Result<Mapping> {
        (**self).map(kind, flags, size)
    }

    fn unmap(&mut self, handle: MappingHandle) -> Result<()> {
        (**self).unmap(handle)
    }
}
