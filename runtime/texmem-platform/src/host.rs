//! Host memory backend
//!
//! Backs each mapping with zeroed, granularity-aligned memory from the global
//! allocator. Used when the heap runs in a hosted process (tools, tests that
//! need to touch the bytes).

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::vec::Vec;

use crate::{MapFlags, Mapping, MappingHandle, MemoryKind, MemoryMapper, PlatformError, Result};

struct HostRegion {
    handle: MappingHandle,
    ptr: *mut u8,
    layout: Layout,
}

/// Host memory mapper
pub struct HostMapper {
    regions: Vec<HostRegion>,
    next_handle: u32,
}

impl HostMapper {
    /// Create a host mapper with no live mappings
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            next_handle: 1,
        }
    }

    /// Number of live mappings
    pub fn live_mappings(&self) -> usize {
        self.regions.len()
    }
}

impl Default for HostMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMapper for HostMapper {
    fn map(&mut self, kind: MemoryKind, _flags: MapFlags, size: usize) -> Result<Mapping> {
        if size == 0 {
            return Err(PlatformError::InvalidSize);
        }

        let out_of_memory = PlatformError::OutOfMemory {
            kind,
            requested: size,
        };
        let mapped_size = kind.round_size(size).ok_or(out_of_memory)?;
        let layout = Layout::from_size_align(mapped_size, kind.granularity())
            .map_err(|_| out_of_memory)?;

        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(PlatformError::OutOfMemory {
                kind,
                requested: size,
            });
        }

        let handle = MappingHandle(self.next_handle);
        self.next_handle += 1;
        self.regions.push(HostRegion {
            handle,
            ptr,
            layout,
        });

        log::trace!("host map {:?}: {:p} ({} bytes)", kind, ptr, mapped_size);

        Ok(Mapping {
            addr: ptr as usize,
            size: mapped_size,
            handle,
        })
    }

    fn unmap(&mut self, handle: MappingHandle) -> Result<()> {
        let index = self
            .regions
            .iter()
            .position(|r| r.handle == handle)
            .ok_or(PlatformError::UnknownHandle(handle))?;

        let region = self.regions.swap_remove(index);
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout and
        // is released exactly once because the entry was just removed
        unsafe { dealloc(region.ptr, region.layout) };
        Ok(())
    }
}

impl Drop for HostMapper {
    fn drop(&mut self) {
        for region in self.regions.drain(..) {
            // SAFETY: every live entry owns its allocation
            unsafe { dealloc(region.ptr, region.layout) };
        }
    }
}
