//! Region/Domain Manager
//!
//! Owns the platform-mapped region backing the heap and exposes the
//! alloc/free/memory-used surface texture management code consumes.

use crate::config::HeapConfig;
use crate::engine::{BlockHeap, BlockView, HeapStats};
use crate::{HeapError, MappingHandle, MemoryDomain, MemoryKind, MemoryMapper, Result};

/// The mapped region backing an initialized heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Address where the region is mapped
    pub addr: usize,
    /// Usable length in bytes
    pub size: usize,
    /// Memory kind the region was mapped from
    pub kind: MemoryKind,
    /// Platform handle for unmapping
    pub handle: MappingHandle,
}

impl Region {
    /// Domain the region physically is
    pub const fn primary_domain(&self) -> MemoryDomain {
        MemoryDomain::of_kind(self.kind)
    }

    /// The complementary domain, for allocations logically tagged as the
    /// other kind
    pub const fn secondary_domain(&self) -> MemoryDomain {
        self.primary_domain().complement()
    }
}

/// Texture memory heap over a single mapped region
///
/// # Lifecycle
/// `new` builds the metadata arena, `init` maps the region and seeds the free
/// list, `destroy` resets every block and unmaps the region. A destroyed heap
/// can be initialized again. Dropping an initialized heap destroys it.
pub struct TextureHeap<M: MemoryMapper> {
    mapper: M,
    config: HeapConfig,
    blocks: BlockHeap,
    region: Option<Region>,
}

impl<M: MemoryMapper> TextureHeap<M> {
    /// Create an uninitialized heap
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(mapper: M, config: HeapConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            mapper,
            config,
            blocks: BlockHeap::new(config.max_blocks, config.free_policy),
            region: None,
        })
    }

    /// Map `total_size` bytes of `kind` memory and make it allocatable
    ///
    /// A mapping failure is fatal for the renderer, which cannot draw
    /// anything without its texture pool; callers are expected to abort
    /// startup on [`HeapError::MapFailed`].
    ///
    /// # Errors
    /// Returns error if the heap is already initialized, `total_size` is
    /// zero, or the platform cannot map the region
    pub fn init(&mut self, kind: MemoryKind, total_size: usize) -> Result<()> {
        if self.region.is_some() {
            return Err(HeapError::AlreadyInitialized);
        }

        if total_size == 0 {
            return Err(HeapError::InvalidSize);
        }

        let mapping = self
            .mapper
            .map(kind, self.config.map_flags, total_size)
            .inspect_err(|err| {
                log::error!("failed to map {} bytes of {:?}: {}", total_size, kind, err)
            })?;

        let region = Region {
            addr: mapping.addr,
            size: total_size,
            kind,
            handle: mapping.handle,
        };

        self.blocks.reset();
        if let Err(err) = self
            .blocks
            .extend(region.primary_domain(), region.addr, 0, region.size)
        {
            self.release_mapping(region.handle);
            return Err(err);
        }
        self.region = Some(region);

        log::info!(
            "texture heap: {} bytes of {:?} at {:#x} (primary {:?}, secondary {:?})",
            region.size,
            kind,
            region.addr,
            region.primary_domain(),
            region.secondary_domain()
        );
        Ok(())
    }

    /// Reset every block and counter and unmap the region
    ///
    /// Safe to call repeatedly and before a later `init`.
    pub fn destroy(&mut self) {
        let Some(region) = self.region.take() else {
            return;
        };

        let leaked = self.blocks.stats().allocated_blocks;
        if leaked > 0 {
            log::debug!("destroying texture heap with {} live allocations", leaked);
        }

        self.blocks.reset();
        self.release_mapping(region.handle);
        log::info!("texture heap at {:#x} destroyed", region.addr);
    }

    fn release_mapping(&mut self, handle: MappingHandle) {
        if let Err(err) = self.mapper.unmap(handle) {
            log::warn!("failed to unmap texture region {:?}: {}", handle, err);
        }
    }

    /// Allocate `size` bytes from the primary domain
    ///
    /// # Returns
    /// Address aligned to the configured alignment, or `None` when `size` is
    /// zero, the heap is not initialized, or memory is exhausted
    pub fn alloc(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            return None;
        }

        let domain = self.primary_domain()?;
        let size = size.max(self.config.alignment);

        match self.blocks.allocate(domain, size, self.config.alignment) {
            Ok(addr) => Some(addr),
            Err(err) => {
                log::debug!("texture alloc of {} bytes failed: {}", size, err);
                None
            }
        }
    }

    /// Allocate `size` bytes of `domain` memory aligned to `alignment`
    ///
    /// Unlike [`TextureHeap::alloc`], no minimum size is applied and every
    /// failure is reported.
    ///
    /// # Errors
    /// Returns error if the heap is not initialized, the request is invalid,
    /// or the domain is exhausted (see [`HeapError::is_exhaustion`])
    pub fn try_alloc_in(
        &mut self,
        domain: MemoryDomain,
        size: usize,
        alignment: usize,
    ) -> Result<usize> {
        if self.region.is_none() {
            return Err(HeapError::NotInitialized);
        }

        self.blocks.allocate(domain, size, alignment)
    }

    /// Free an allocation
    ///
    /// `None` and the null address are ignored. Addresses that are not live
    /// allocations are handled by the configured free policy.
    ///
    /// # Errors
    /// Only under [`crate::FreePolicy::Strict`], for unknown addresses
    pub fn free(&mut self, addr: impl Into<Option<usize>>) -> Result<()> {
        match addr.into() {
            None | Some(0) => Ok(()),
            Some(addr) => self.blocks.deallocate(addr),
        }
    }

    /// Bytes currently allocated
    pub fn memory_used(&self) -> usize {
        self.blocks.used()
    }

    /// Size of the live allocation at `addr`
    pub fn allocation_size(&self, addr: usize) -> Option<usize> {
        self.blocks.allocation_size(addr)
    }

    /// Snapshot of heap statistics
    pub fn stats(&self) -> HeapStats {
        self.blocks.stats()
    }

    /// Free blocks in address order
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockView> + '_ {
        self.blocks.free_blocks()
    }

    /// Verify the heap's structural invariants
    ///
    /// # Errors
    /// Returns [`HeapError::Corrupted`] on the first violation
    pub fn check_invariants(&self) -> Result<()> {
        self.blocks.check_invariants()
    }

    /// Domain of the mapped region
    pub fn primary_domain(&self) -> Option<MemoryDomain> {
        self.region.as_ref().map(Region::primary_domain)
    }

    /// Complement of the primary domain
    pub fn secondary_domain(&self) -> Option<MemoryDomain> {
        self.region.as_ref().map(Region::secondary_domain)
    }

    /// The mapped region, if initialized
    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    /// Check if a region is mapped
    pub fn is_initialized(&self) -> bool {
        self.region.is_some()
    }

    /// Heap configuration
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Mapping provider
    pub fn mapper(&self) -> &M {
        &self.mapper
    }
}

impl<M: MemoryMapper> Drop for TextureHeap<M> {
    fn drop(&mut self) {
        self.destroy();
    }
}
