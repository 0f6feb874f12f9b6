//! Free-List Manager
//!
//! Singly-linked lists threaded through arena records by index:
//! - [`FreeList`]: every block not handed to a caller, ascending by base,
//!   coalescing on insert
//! - [`AllocList`]: every block handed to a caller, unordered
//!
//! A block is on exactly one list at a time.

use core::ops::{Deref, DerefMut};

use crate::arena::{Block, BlockArena, BlockId};

/// Head of a singly-linked list of arena records
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockList {
    head: Option<BlockId>,
}

impl BlockList {
    /// Create an empty list
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// First record
    pub fn head(&self) -> Option<BlockId> {
        self.head
    }

    /// Check if the list has no records
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Forget every record (the arena is reset separately)
    pub fn clear(&mut self) {
        self.head = None;
    }

    /// Link `id` at the head
    pub fn push_front(&mut self, arena: &mut BlockArena, id: BlockId) {
        arena[id].next = self.head;
        self.head = Some(id);
    }

    /// Link `id` directly after `prev`, or at the head when `prev` is `None`
    pub fn link_after(&mut self, arena: &mut BlockArena, prev: Option<BlockId>, id: BlockId) {
        match prev {
            Some(p) => {
                arena[id].next = arena[p].next;
                arena[p].next = Some(id);
            }
            None => self.push_front(arena, id),
        }
    }

    /// Unlink `id`, whose predecessor is `prev` (`None` when `id` is the head)
    pub fn unlink_after(&mut self, arena: &mut BlockArena, prev: Option<BlockId>, id: BlockId) {
        let next = arena[id].next.take();
        match prev {
            Some(p) => arena[p].next = next,
            None => self.head = next,
        }
    }

    /// Find the first record matching `pred`, returning it with its predecessor
    pub fn find<F>(&self, arena: &BlockArena, mut pred: F) -> Option<(Option<BlockId>, BlockId)>
    where
        F: FnMut(&Block) -> bool,
    {
        let mut prev = None;
        let mut curr = self.head;
        while let Some(id) = curr {
            if pred(&arena[id]) {
                return Some((prev, id));
            }
            prev = curr;
            curr = arena[id].next;
        }
        None
    }

    /// Iterate over records in list order
    pub fn iter<'a>(&self, arena: &'a BlockArena) -> Iter<'a> {
        Iter {
            arena,
            next: self.head,
        }
    }
}

/// Iterator over a [`BlockList`]
pub struct Iter<'a> {
    arena: &'a BlockArena,
    next: Option<BlockId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (BlockId, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let block = &self.arena[id];
        self.next = block.next;
        Some((id, block))
    }
}

/// Address-ordered, coalescing list of free blocks
///
/// No two list-adjacent entries are ever mergeable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreeList(BlockList);

impl FreeList {
    /// Create an empty free list
    pub const fn new() -> Self {
        Self(BlockList::new())
    }

    /// Insert an unlinked block in address order and coalesce it with its
    /// neighbours
    ///
    /// The following neighbour is merged first: absorbing it grows `id`,
    /// which changes whether the preceding neighbour can absorb `id`.
    pub fn insert(&mut self, arena: &mut BlockArena, id: BlockId) {
        let base = arena[id].base;

        // Advance until prev.base < base <= curr.base
        let mut prev = None;
        let mut curr = self.0.head;
        while let Some(c) = curr {
            if arena[c].base >= base {
                break;
            }
            prev = curr;
            curr = arena[c].next;
        }

        self.0.link_after(arena, prev, id);

        if let Some(c) = curr {
            if arena[id].mergeable(&arena[c]) {
                let absorbed = arena[c];
                arena[id].size += absorbed.size;
                arena[id].next = absorbed.next;
                arena.release(c);
                log::trace!("coalesced {:#x} into {:#x}", absorbed.base, base);
            }
        }

        if let Some(p) = prev {
            if arena[p].mergeable(&arena[id]) {
                let absorbed = arena[id];
                arena[p].size += absorbed.size;
                arena[p].next = absorbed.next;
                arena.release(id);
                log::trace!("coalesced {:#x} into {:#x}", absorbed.base, arena[p].base);
            }
        }
    }
}

impl Deref for FreeList {
    type Target = BlockList;

    fn deref(&self) -> &BlockList {
        &self.0
    }
}

impl DerefMut for FreeList {
    fn deref_mut(&mut self) -> &mut BlockList {
        &mut self.0
    }
}

/// Unordered list of blocks handed out to callers
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocList(BlockList);

impl AllocList {
    /// Create an empty allocated list
    pub const fn new() -> Self {
        Self(BlockList::new())
    }

    /// Unlink and return the block whose base is `base`
    pub fn take(&mut self, arena: &mut BlockArena, base: usize) -> Option<BlockId> {
        let (prev, id) = self.0.find(arena, |b| b.base == base)?;
        self.0.unlink_after(arena, prev, id);
        Some(id)
    }
}

impl Deref for AllocList {
    type Target = BlockList;

    fn deref(&self) -> &BlockList {
        &self.0
    }
}

impl DerefMut for AllocList {
    fn deref_mut(&mut self) -> &mut BlockList {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDomain;
    use std::vec::Vec;

    const BASE: usize = 0x8000_0000;

    fn free_block(arena: &mut BlockArena, domain: MemoryDomain, offset: usize, size: usize) -> BlockId {
        arena
            .claim(Block::new(domain, BASE + offset, offset, size))
            .unwrap()
    }

    fn extents(list: &BlockList, arena: &BlockArena) -> Vec<(usize, usize)> {
        list.iter(arena).map(|(_, b)| (b.offset, b.size)).collect()
    }

    #[test]
    fn test_insert_keeps_address_order() {
        let mut arena = BlockArena::with_capacity(8);
        let mut free = FreeList::new();

        for offset in [0x300, 0x100, 0x500] {
            let id = free_block(&mut arena, MemoryDomain::Device, offset, 0x10);
            free.insert(&mut arena, id);
        }

        assert_eq!(
            extents(&free, &arena),
            [(0x100, 0x10), (0x300, 0x10), (0x500, 0x10)]
        );
    }

    #[test]
    fn test_insert_merges_with_next() {
        let mut arena = BlockArena::with_capacity(8);
        let mut free = FreeList::new();

        let upper = free_block(&mut arena, MemoryDomain::Device, 0x100, 0x100);
        free.insert(&mut arena, upper);
        let lower = free_block(&mut arena, MemoryDomain::Device, 0x0, 0x100);
        free.insert(&mut arena, lower);

        assert_eq!(extents(&free, &arena), [(0x0, 0x200)]);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_insert_merges_with_prev() {
        let mut arena = BlockArena::with_capacity(8);
        let mut free = FreeList::new();

        let lower = free_block(&mut arena, MemoryDomain::Device, 0x0, 0x100);
        free.insert(&mut arena, lower);
        let upper = free_block(&mut arena, MemoryDomain::Device, 0x100, 0x100);
        free.insert(&mut arena, upper);

        assert_eq!(extents(&free, &arena), [(0x0, 0x200)]);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_insert_bridges_gap() {
        let mut arena = BlockArena::with_capacity(8);
        let mut free = FreeList::new();

        let lower = free_block(&mut arena, MemoryDomain::Device, 0x0, 0x100);
        free.insert(&mut arena, lower);
        let upper = free_block(&mut arena, MemoryDomain::Device, 0x200, 0x100);
        free.insert(&mut arena, upper);
        assert_eq!(arena.len(), 2);

        let middle = free_block(&mut arena, MemoryDomain::Device, 0x100, 0x100);
        free.insert(&mut arena, middle);

        assert_eq!(extents(&free, &arena), [(0x0, 0x300)]);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_no_merge_across_domains() {
        let mut arena = BlockArena::with_capacity(8);
        let mut free = FreeList::new();

        let device = free_block(&mut arena, MemoryDomain::Device, 0x0, 0x100);
        free.insert(&mut arena, device);
        let system = free_block(&mut arena, MemoryDomain::System, 0x100, 0x100);
        free.insert(&mut arena, system);

        assert_eq!(extents(&free, &arena), [(0x0, 0x100), (0x100, 0x100)]);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_no_merge_when_offsets_disagree() {
        let mut arena = BlockArena::with_capacity(8);
        let mut free = FreeList::new();

        // Address-contiguous, but each starts its own offset space
        let a = arena
            .claim(Block::new(MemoryDomain::Device, BASE, 0, 0x100))
            .unwrap();
        free.insert(&mut arena, a);
        let b = arena
            .claim(Block::new(MemoryDomain::Device, BASE + 0x100, 0, 0x100))
            .unwrap();
        free.insert(&mut arena, b);

        assert_eq!(free.iter(&arena).count(), 2);
    }

    #[test]
    fn test_alloc_list_take() {
        let mut arena = BlockArena::with_capacity(8);
        let mut allocated = AllocList::new();

        for offset in [0x0, 0x100, 0x200] {
            let id = free_block(&mut arena, MemoryDomain::Device, offset, 0x100);
            allocated.push_front(&mut arena, id);
        }

        let id = allocated.take(&mut arena, BASE + 0x100).unwrap();
        assert_eq!(arena[id].offset, 0x100);
        assert_eq!(arena[id].next, None);
        assert_eq!(allocated.iter(&arena).count(), 2);

        // Already taken
        assert!(allocated.take(&mut arena, BASE + 0x100).is_none());
        assert!(allocated.take(&mut arena, 0xDEAD).is_none());
    }

    #[test]
    fn test_link_and_unlink() {
        let mut arena = BlockArena::with_capacity(4);
        let mut list = BlockList::new();

        let a = free_block(&mut arena, MemoryDomain::Device, 0x0, 0x10);
        let b = free_block(&mut arena, MemoryDomain::Device, 0x10, 0x10);
        let c = free_block(&mut arena, MemoryDomain::Device, 0x20, 0x10);

        list.link_after(&mut arena, None, a);
        list.link_after(&mut arena, Some(a), c);
        list.link_after(&mut arena, Some(a), b);
        assert_eq!(extents(&list, &arena), [(0x0, 0x10), (0x10, 0x10), (0x20, 0x10)]);

        list.unlink_after(&mut arena, Some(a), b);
        assert_eq!(extents(&list, &arena), [(0x0, 0x10), (0x20, 0x10)]);

        list.unlink_after(&mut arena, None, a);
        assert_eq!(list.head(), Some(c));

        list.clear();
        assert!(list.is_empty());
    }
}
