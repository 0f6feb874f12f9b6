//! Block Metadata Arena
//!
//! Fixed-capacity storage for block records. The slot array is allocated once
//! when the heap is built; claiming and releasing records afterwards never
//! allocates. Records are addressed by [`BlockId`] and linked to each other by
//! index, so list surgery cannot alias or dangle.

use alloc::boxed::Box;
use alloc::vec;
use core::ops::{Index, IndexMut};

use crate::{HeapError, MemoryDomain, Result};

/// Stable index of a record in a [`BlockArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Slot index in the arena
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A contiguous memory extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Domain this extent belongs to
    pub domain: MemoryDomain,

    /// Absolute address of the extent
    pub base: usize,

    /// Region-relative offset of the extent
    pub offset: usize,

    /// Length in bytes
    pub size: usize,

    /// Next record in whichever list owns this block
    pub next: Option<BlockId>,
}

impl Block {
    /// Create an unlinked block
    pub const fn new(domain: MemoryDomain, base: usize, offset: usize, size: usize) -> Self {
        Self {
            domain,
            base,
            offset,
            size,
            next: None,
        }
    }

    /// One past the last address
    pub const fn end(&self) -> usize {
        self.base + self.size
    }

    /// Check if `next` directly follows this block in both coordinate spaces
    /// and the two can become one extent
    pub fn mergeable(&self, next: &Block) -> bool {
        self.domain == next.domain
            && self.base + self.size == next.base
            && self.offset + self.size == next.offset
    }
}

/// Fixed-capacity block record pool
#[derive(Debug)]
pub struct BlockArena {
    /// Record slots; `None` marks unused metadata
    slots: Box<[Option<Block>]>,

    /// Number of occupied slots
    live: usize,
}

impl BlockArena {
    /// Create an arena holding at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            live: 0,
        }
    }

    /// Store `block` in an unused slot
    ///
    /// # Errors
    /// Returns error if every slot is occupied
    pub fn claim(&mut self, block: Block) -> Result<BlockId> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(HeapError::ArenaExhausted {
                capacity: self.slots.len(),
            })?;

        let id = u32::try_from(index).map_err(|_| HeapError::ArenaExhausted {
            capacity: self.slots.len(),
        })?;

        self.slots[index] = Some(block);
        self.live += 1;
        Ok(BlockId(id))
    }

    /// Return a slot to the unused pool
    pub fn release(&mut self, id: BlockId) {
        let slot = &mut self.slots[id.index()];
        debug_assert!(slot.is_some(), "double release of {:?}", id);
        if slot.take().is_some() {
            self.live -= 1;
        }
    }

    /// Mark every slot unused
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.live = 0;
    }

    /// Get a record if the slot is occupied
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Check if a claim would fail
    pub fn is_full(&self) -> bool {
        self.live == self.slots.len()
    }
}

impl Index<BlockId> for BlockArena {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        match &self.slots[id.index()] {
            Some(block) => block,
            None => panic!("block {:?} used after release", id),
        }
    }
}

impl IndexMut<BlockId> for BlockArena {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        match &mut self.slots[id.index()] {
            Some(block) => block,
            None => panic!("block {:?} used after release", id),
        }
    }
}
