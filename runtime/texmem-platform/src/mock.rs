//! Mock mapping backend
//!
//! Hands out fabricated, granularity-aligned addresses from a bump cursor and
//! tracks live handles in a fixed table. Nothing is ever dereferenced, so no
//! memory backs the returned addresses.

use crate::{MapFlags, Mapping, MappingHandle, MemoryKind, MemoryMapper, PlatformError, Result};

/// Maximum number of simultaneously live mock mappings
pub const MAX_MAPPINGS: usize = 16;

/// Default base address for fabricated mappings
pub const MOCK_BASE: usize = 0x6000_0000;

/// Default mappable budget (256MB)
pub const MOCK_BUDGET: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
struct LiveMapping {
    handle: MappingHandle,
    size: usize,
}

/// Mock memory mapper
#[derive(Debug)]
pub struct MockMapper {
    /// Next address to hand out
    next_addr: usize,

    /// Bytes still mappable
    budget: usize,

    /// Next handle value
    next_handle: u32,

    /// Live mappings
    live: [Option<LiveMapping>; MAX_MAPPINGS],

    /// Number of successful unmaps
    unmapped: usize,
}

impl MockMapper {
    /// Create a mock mapper handing out addresses from `base` with `budget`
    /// bytes available in total
    pub const fn new(base: usize, budget: usize) -> Self {
        Self {
            next_addr: base,
            budget,
            next_handle: 1,
            live: [None; MAX_MAPPINGS],
            unmapped: 0,
        }
    }

    /// Number of live mappings
    pub fn live_mappings(&self) -> usize {
        self.live.iter().filter(|m| m.is_some()).count()
    }

    /// Number of successful unmaps so far
    pub fn unmapped_count(&self) -> usize {
        self.unmapped
    }

    /// Remaining mappable bytes
    pub fn budget(&self) -> usize {
        self.budget
    }
}

impl Default for MockMapper {
    fn default() -> Self {
        Self::new(MOCK_BASE, MOCK_BUDGET)
    }
}

impl MemoryMapper for MockMapper {
    fn map(&mut self, kind: MemoryKind, _flags: MapFlags, size: usize) -> Result<Mapping> {
        if size == 0 {
            return Err(PlatformError::InvalidSize);
        }

        let out_of_memory = PlatformError::OutOfMemory {
            kind,
            requested: size,
        };

        let mapped_size = kind.round_size(size).ok_or(out_of_memory)?;
        if mapped_size > self.budget {
            return Err(out_of_memory);
        }

        // Place the mapping before touching any state so failures leave none
        let granule = kind.granularity();
        let addr = self
            .next_addr
            .checked_add(granule - 1)
            .map(|padded| padded & !(granule - 1))
            .ok_or(out_of_memory)?;
        let end = addr.checked_add(mapped_size).ok_or(out_of_memory)?;

        let slot = self
            .live
            .iter_mut()
            .find(|m| m.is_none())
            .ok_or(PlatformError::TooManyMappings { max: MAX_MAPPINGS })?;

        let handle = MappingHandle(self.next_handle);
        self.next_handle += 1;
        *slot = Some(LiveMapping {
            handle,
            size: mapped_size,
        });

        self.next_addr = end;
        self.budget -= mapped_size;

        log::trace!(
            "mock map {:?}: {:#x}..{:#x} ({:?})",
            kind,
            addr,
            end,
            handle
        );

        Ok(Mapping {
            addr,
            size: mapped_size,
            handle,
        })
    }

    fn unmap(&mut self, handle: MappingHandle) -> Result<()> {
        let slot = self
            .live
            .iter_mut()
            .find(|m| matches!(m, Some(live) if live.handle == handle))
            .ok_or(PlatformError::UnknownHandle(handle))?;

        if let Some(live) = slot.take() {
            // Address space is not reused; only the byte budget comes back
            self.budget += live.size;
        }
        self.unmapped += 1;

        log::trace!("mock unmap {:?}", handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: MapFlags = MapFlags::READ.union(MapFlags::WRITE);

    #[test]
    fn test_map_and_unmap() {
        let mut mapper = MockMapper::default();

        let mapping = mapper.map(MemoryKind::HostCached, RW, 8192).unwrap();
        assert_eq!(mapping.addr % crate::PAGE_SIZE, 0);
        assert_eq!(mapping.size, 8192);
        assert_eq!(mapper.live_mappings(), 1);

        mapper.unmap(mapping.handle).unwrap();
        assert_eq!(mapper.live_mappings(), 0);
        assert_eq!(mapper.unmapped_count(), 1);
        assert_eq!(mapper.budget(), MOCK_BUDGET);
    }

    #[test]
    fn test_device_local_alignment() {
        let mut mapper = MockMapper::new(0x1000, MOCK_BUDGET);

        let mapping = mapper.map(MemoryKind::DeviceLocal, RW, 100).unwrap();
        assert_eq!(mapping.addr % crate::DEVICE_LOCAL_GRANULARITY, 0);
        assert_eq!(mapping.size, crate::DEVICE_LOCAL_GRANULARITY);
    }

    #[test]
    fn test_mappings_do_not_overlap() {
        let mut mapper = MockMapper::default();

        let m1 = mapper.map(MemoryKind::HostCached, RW, 5000).unwrap();
        let m2 = mapper.map(MemoryKind::HostCached, RW, 4096).unwrap();

        assert!(m1.addr + m1.size <= m2.addr);
        assert_ne!(m1.handle, m2.handle);
    }

    #[test]
    fn test_out_of_budget() {
        let mut mapper = MockMapper::new(MOCK_BASE, 4096);

        let result = mapper.map(MemoryKind::HostCached, RW, 8192);
        assert!(matches!(
            result,
            Err(PlatformError::OutOfMemory { requested: 8192, .. })
        ));
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut mapper = MockMapper::default();
        assert_eq!(
            mapper.map(MemoryKind::HostCached, RW, 0),
            Err(PlatformError::InvalidSize)
        );
    }

    #[test]
    fn test_unknown_handle() {
        let mut mapper = MockMapper::default();
        let result = mapper.unmap(MappingHandle(42));
        assert_eq!(result, Err(PlatformError::UnknownHandle(MappingHandle(42))));
    }

    #[test]
    fn test_mapping_table_full() {
        let mut mapper = MockMapper::default();
        for _ in 0..MAX_MAPPINGS {
            mapper.map(MemoryKind::HostCached, RW, 4096).unwrap();
        }

        let result = mapper.map(MemoryKind::HostCached, RW, 4096);
        assert!(matches!(result, Err(PlatformError::TooManyMappings { .. })));
    }

    #[test]
    fn test_huge_size_is_out_of_memory() {
        let mut mapper = MockMapper::new(MOCK_BASE, usize::MAX);

        let result = mapper.map(MemoryKind::HostCached, RW, usize::MAX);
        assert_eq!(
            result,
            Err(PlatformError::OutOfMemory {
                kind: MemoryKind::HostCached,
                requested: usize::MAX,
            })
        );
        assert_eq!(mapper.live_mappings(), 0);
        assert_eq!(mapper.budget(), usize::MAX);
    }

    #[test]
    fn test_address_space_exhaustion() {
        let base = usize::MAX - crate::PAGE_SIZE + 1;
        let mut mapper = MockMapper::new(base, MOCK_BUDGET);

        // A page at the top would end one past usize::MAX
        let result = mapper.map(MemoryKind::HostCached, RW, crate::PAGE_SIZE);
        assert!(matches!(result, Err(PlatformError::OutOfMemory { .. })));

        // Alignment padding past the top of the address space
        let mut mapper = MockMapper::new(usize::MAX - 16, MOCK_BUDGET);
        let result = mapper.map(MemoryKind::DeviceLocal, RW, 4096);
        assert!(matches!(result, Err(PlatformError::OutOfMemory { .. })));

        // Nothing was recorded for the failed attempts
        assert_eq!(mapper.live_mappings(), 0);
        assert_eq!(mapper.budget(), MOCK_BUDGET);
    }
}
