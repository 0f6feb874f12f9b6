//! Texture Memory Heap - Aligned sub-allocation of one GPU-mapped region
//!
//! # Purpose
//! Manages a single large, platform-mapped memory pool and hands out aligned
//! sub-allocations to texture and resource objects.
//!
//! # Integration Points
//! - Depends on: texmem-platform (region mapping/unmapping)
//! - Provides to: Texture management code (alloc/free/memory used)
//! - Capabilities required: One mappable region of the requested memory kind
//!
//! # Architecture
//! - Block metadata arena: fixed-capacity record storage, allocated once
//! - Free list: address-ordered, coalescing on insert
//! - Allocation engine: first-fit with alignment padding and block splitting
//! - Region manager: owns the mapping and the primary/secondary domain tags
//!
//! Block records are addressed by index into the arena, never by pointer,
//! and no bookkeeping allocation happens after the heap is constructed.
//!
//! # Concurrency
//! None. Every operation takes `&mut self`; callers serialize access.
//!
//! # Testing Strategy
//! - Unit tests: arena slots, list coalescing, split/merge arithmetic
//! - Integration tests: conservation, overlap, alignment, exhaustion scenarios
//! - Benchmarks: alloc/free latency under fragmentation

#![no_std]

#[cfg(test)]
extern crate std;

extern crate alloc;

mod arena;
pub mod config;
mod engine;
mod heap;
mod list;

pub use arena::{Block, BlockArena, BlockId};
pub use config::{FreePolicy, HeapConfig, ALIGNMENT, DEFAULT_MAX_BLOCKS};
pub use engine::{BlockHeap, BlockView, HeapStats};
pub use heap::{Region, TextureHeap};
pub use list::{AllocList, BlockList, FreeList, Iter as BlockIter};

pub use texmem_platform::{
    MapFlags, Mapping, MappingHandle, MemoryKind, MemoryMapper, PlatformError,
};

#[cfg(feature = "mock")]
pub use texmem_platform::MockMapper;

#[cfg(feature = "host")]
pub use texmem_platform::HostMapper;

use thiserror::Error;

/// Texture heap errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    #[error("Invalid size (must be > 0)")]
    InvalidSize,

    #[error("Invalid alignment (must be power of 2): {alignment}")]
    InvalidAlignment { alignment: usize },

    #[error("Out of memory (requested: {size} bytes, alignment {alignment})")]
    OutOfMemory { size: usize, alignment: usize },

    #[error("Block metadata arena exhausted ({capacity} records)")]
    ArenaExhausted { capacity: usize },

    #[error("Block metadata arena too large ({max_blocks} records)")]
    ArenaTooLarge { max_blocks: usize },

    #[error("Address {addr:#x} is not a live allocation")]
    UnknownAddress { addr: usize },

    #[error("Heap is not initialized")]
    NotInitialized,

    #[error("Heap is already initialized")]
    AlreadyInitialized,

    #[error("Region mapping failed: {0}")]
    MapFailed(#[from] PlatformError),

    #[error("Heap structure corrupted: {0}")]
    Corrupted(&'static str),
}

impl HeapError {
    /// Check if this is a recoverable exhaustion condition
    ///
    /// Callers react to these by retrying in another domain or evicting
    /// other allocations.
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            HeapError::OutOfMemory { .. } | HeapError::ArenaExhausted { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, HeapError>;

/// Memory domain a block belongs to
///
/// Allocations only ever match free blocks of the same domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryDomain {
    /// Accelerator-local memory
    Device,
    /// General system memory
    System,
}

impl MemoryDomain {
    /// Domain that a region of `kind` memory physically is
    pub const fn of_kind(kind: MemoryKind) -> Self {
        if kind.is_device_local() {
            MemoryDomain::Device
        } else {
            MemoryDomain::System
        }
    }

    /// The other domain
    pub const fn complement(self) -> Self {
        match self {
            MemoryDomain::Device => MemoryDomain::System,
            MemoryDomain::System => MemoryDomain::Device,
        }
    }
}

/// Align `value` up to `align` (must be a power of 2)
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Check if `value` is a multiple of `align` (must be a power of 2)
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}
