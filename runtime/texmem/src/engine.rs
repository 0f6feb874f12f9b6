//! Allocation Engine
//!
//! First-fit allocation over the free list with alignment padding and block
//! splitting, and deallocation back through the coalescing free list.

use crate::arena::{Block, BlockArena};
use crate::config::FreePolicy;
use crate::list::{AllocList, FreeList};
use crate::{align_up, HeapError, MemoryDomain, Result};

/// Read-only view of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockView {
    /// Domain of the extent
    pub domain: MemoryDomain,
    /// Absolute address
    pub base: usize,
    /// Region-relative offset
    pub offset: usize,
    /// Length in bytes
    pub size: usize,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            domain: block.domain,
            base: block.base,
            offset: block.offset,
            size: block.size,
        }
    }
}

/// Heap statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes ever added through region extension
    pub total: usize,
    /// Bytes currently allocated
    pub used: usize,
    /// Bytes currently free
    pub available: usize,
    /// Number of free blocks
    pub free_blocks: usize,
    /// Number of allocated blocks
    pub allocated_blocks: usize,
    /// Size of the largest free block
    pub largest_free: usize,
    /// Metadata records in use
    pub metadata_in_use: usize,
    /// Metadata arena capacity
    pub metadata_capacity: usize,
}

/// Block heap: metadata arena plus free and allocated lists
#[derive(Debug)]
pub struct BlockHeap {
    arena: BlockArena,
    free: FreeList,
    allocated: AllocList,
    /// Bytes currently allocated
    used: usize,
    /// Bytes added through extension
    total: usize,
    policy: FreePolicy,
}

impl BlockHeap {
    /// Create an empty heap with room for `max_blocks` block records
    pub fn new(max_blocks: usize, policy: FreePolicy) -> Self {
        Self {
            arena: BlockArena::with_capacity(max_blocks),
            free: FreeList::new(),
            allocated: AllocList::new(),
            used: 0,
            total: 0,
            policy,
        }
    }

    /// Drop every block and counter
    pub fn reset(&mut self) {
        self.arena.reset();
        self.free.clear();
        self.allocated.clear();
        self.used = 0;
        self.total = 0;
    }

    /// Add a free extent to the heap
    ///
    /// # Errors
    /// Returns error if `size` is zero or no metadata record is available
    pub fn extend(
        &mut self,
        domain: MemoryDomain,
        base: usize,
        offset: usize,
        size: usize,
    ) -> Result<()> {
        if size == 0 {
            return Err(HeapError::InvalidSize);
        }

        let id = self.arena.claim(Block::new(domain, base, offset, size))?;
        self.free.insert(&mut self.arena, id);
        self.total += size;

        log::debug!(
            "extended {:?} heap: {:#x}..{:#x}",
            domain,
            base,
            base + size
        );
        Ok(())
    }

    /// Allocate `size` bytes of `domain` memory aligned to `alignment`
    ///
    /// # Returns
    /// Base address of the allocation
    ///
    /// # Errors
    /// Returns error if no free block fits or the metadata records needed to
    /// split the chosen block cannot be claimed. The heap is unchanged on
    /// failure.
    pub fn allocate(&mut self, domain: MemoryDomain, size: usize, alignment: usize) -> Result<usize> {
        if size == 0 {
            return Err(HeapError::InvalidSize);
        }

        if !alignment.is_power_of_two() {
            return Err(HeapError::InvalidAlignment { alignment });
        }

        // First fit: the earliest same-domain block that holds the padded request
        let (mut prev, curr) = self
            .free
            .find(&self.arena, |b| {
                let skip = align_up(b.base, alignment) - b.base;
                b.domain == domain && skip.checked_add(size).is_some_and(|need| need <= b.size)
            })
            .ok_or(HeapError::OutOfMemory { size, alignment })?;

        let found = self.arena[curr];
        let skip = align_up(found.base, alignment) - found.base;
        let need = skip + size;

        // Claim every record up front so a failed claim leaves the lists untouched
        let skip_id = if skip > 0 {
            Some(
                self.arena
                    .claim(Block::new(domain, found.base, found.offset, skip))?,
            )
        } else {
            None
        };

        let tail_id = if need < found.size {
            let tail = Block::new(
                domain,
                found.base + need,
                found.offset + need,
                found.size - need,
            );
            match self.arena.claim(tail) {
                Ok(id) => Some(id),
                Err(err) => {
                    if let Some(id) = skip_id {
                        self.arena.release(id);
                    }
                    log::debug!("no metadata record for split of {:#x}", found.base);
                    return Err(err);
                }
            }
        } else {
            None
        };

        // Unaligned prefix stays free in curr's former position
        if let Some(id) = skip_id {
            self.free.link_after(&mut self.arena, prev, id);
            let block = &mut self.arena[curr];
            block.base += skip;
            block.offset += skip;
            block.size -= skip;
            prev = Some(id);
        }

        // Trailing remainder stays free after curr
        if let Some(id) = tail_id {
            self.free.link_after(&mut self.arena, Some(curr), id);
            self.arena[curr].size = size;
        }

        self.free.unlink_after(&mut self.arena, prev, curr);
        self.allocated.push_front(&mut self.arena, curr);
        self.used += size;

        let base = self.arena[curr].base;
        log::trace!(
            "allocated {} bytes of {:?} at {:#x} (skip {})",
            size,
            domain,
            base,
            skip
        );
        Ok(base)
    }

    /// Return the allocation at `base` to the free list
    ///
    /// # Errors
    /// Unknown addresses go through the configured [`FreePolicy`]; only
    /// [`FreePolicy::Strict`] reports them.
    pub fn deallocate(&mut self, base: usize) -> Result<()> {
        let Some(id) = self.allocated.take(&mut self.arena, base) else {
            return self.unknown_free(base);
        };

        let size = self.arena[id].size;
        self.used -= size;
        self.free.insert(&mut self.arena, id);

        log::trace!("freed {} bytes at {:#x}", size, base);
        Ok(())
    }

    /// Single decision point for frees of addresses that are not live
    fn unknown_free(&self, base: usize) -> Result<()> {
        match self.policy {
            FreePolicy::Permissive => {
                log::trace!("ignoring free of unknown address {:#x}", base);
                Ok(())
            }
            FreePolicy::Strict => Err(HeapError::UnknownAddress { addr: base }),
        }
    }

    /// Bytes currently allocated
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes added through extension
    pub fn total(&self) -> usize {
        self.total
    }

    /// Bytes currently free
    pub fn available(&self) -> usize {
        self.total - self.used
    }

    /// Free blocks in address order
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockView> + '_ {
        self.free.iter(&self.arena).map(|(_, b)| BlockView::from(b))
    }

    /// Allocated blocks, most recent first
    pub fn allocated_blocks(&self) -> impl Iterator<Item = BlockView> + '_ {
        self.allocated.iter(&self.arena).map(|(_, b)| BlockView::from(b))
    }

    /// Size of the live allocation at `base`
    pub fn allocation_size(&self, base: usize) -> Option<usize> {
        self.allocated
            .find(&self.arena, |b| b.base == base)
            .map(|(_, id)| self.arena[id].size)
    }

    /// Snapshot of heap statistics
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            total: self.total,
            used: self.used,
            available: self.available(),
            metadata_in_use: self.arena.len(),
            metadata_capacity: self.arena.capacity(),
            ..HeapStats::default()
        };

        for block in self.free_blocks() {
            stats.free_blocks += 1;
            stats.largest_free = stats.largest_free.max(block.size);
        }
        stats.allocated_blocks = self.allocated.iter(&self.arena).count();

        stats
    }

    /// Verify every structural invariant of the heap
    ///
    /// # Errors
    /// Returns [`HeapError::Corrupted`] naming the first violated invariant
    pub fn check_invariants(&self) -> Result<()> {
        let mut free_bytes = 0;
        let mut free_count = 0;
        let mut last: Option<&Block> = None;

        for (_, block) in self.free.iter(&self.arena) {
            if block.size == 0 {
                return Err(HeapError::Corrupted("empty free block"));
            }
            if let Some(prev) = last {
                if prev.base >= block.base {
                    return Err(HeapError::Corrupted("free list out of order"));
                }
                if prev.mergeable(block) {
                    return Err(HeapError::Corrupted("adjacent free blocks not coalesced"));
                }
            }
            free_bytes += block.size;
            free_count += 1;
            last = Some(block);
        }

        let mut used_bytes = 0;
        let mut used_count = 0;
        for (_, block) in self.allocated.iter(&self.arena) {
            if block.size == 0 {
                return Err(HeapError::Corrupted("empty allocated block"));
            }
            used_bytes += block.size;
            used_count += 1;
        }

        if used_bytes != self.used {
            return Err(HeapError::Corrupted("used counter out of sync"));
        }
        if free_bytes + used_bytes != self.total {
            return Err(HeapError::Corrupted("bytes not conserved"));
        }
        if free_count + used_count != self.arena.len() {
            return Err(HeapError::Corrupted("leaked metadata record"));
        }

        // Pairwise disjointness across both lists
        let all = || {
            self.free
                .iter(&self.arena)
                .chain(self.allocated.iter(&self.arena))
        };
        for (a_id, a) in all() {
            for (b_id, b) in all() {
                if a_id < b_id && a.base < b.end() && b.base < a.end() {
                    return Err(HeapError::Corrupted("overlapping blocks"));
                }
            }
        }

        Ok(())
    }

    /// Metadata arena
    pub fn arena(&self) -> &BlockArena {
        &self.arena
    }
}
