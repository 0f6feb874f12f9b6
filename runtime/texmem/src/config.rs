//! Heap configuration
//!
//! Defaults match what texture management code expects: 8-byte alignment and
//! enough metadata records for every texture slot plus split fragments.

use static_assertions::const_assert;

use crate::{HeapError, MapFlags, Result};

/// Fixed allocation alignment (also the minimum allocation size)
pub const ALIGNMENT: usize = 8;

/// Default number of block metadata records
pub const DEFAULT_MAX_BLOCKS: usize = 2048;

/// Maximum number of live textures the renderer tracks
pub const MAX_TEXTURES: usize = 1024;

const_assert!(ALIGNMENT.is_power_of_two());
// Every texture needs its own record, and the region seed needs one more
const_assert!(DEFAULT_MAX_BLOCKS > MAX_TEXTURES);

/// What to do when asked to free an address that is not a live allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreePolicy {
    /// Ignore the request (already-freed or foreign pointers are tolerated)
    #[default]
    Permissive,
    /// Report [`HeapError::UnknownAddress`]
    Strict,
}

/// Texture heap configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Capacity of the block metadata arena
    pub max_blocks: usize,
    /// Alignment of every `alloc` result; also the minimum allocation size
    pub alignment: usize,
    /// GPU access attributes requested for the backing region
    pub map_flags: MapFlags,
    /// Unknown-free handling
    pub free_policy: FreePolicy,
}

impl HeapConfig {
    /// Default configuration
    pub const fn new() -> Self {
        Self {
            max_blocks: DEFAULT_MAX_BLOCKS,
            alignment: ALIGNMENT,
            map_flags: MapFlags::READ.union(MapFlags::WRITE),
            free_policy: FreePolicy::Permissive,
        }
    }

    /// Set the metadata arena capacity
    pub const fn with_max_blocks(mut self, max_blocks: usize) -> Self {
        self.max_blocks = max_blocks;
        self
    }

    /// Set the allocation alignment
    pub const fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the region mapping flags
    pub const fn with_map_flags(mut self, map_flags: MapFlags) -> Self {
        self.map_flags = map_flags;
        self
    }

    /// Set the unknown-free policy
    pub const fn with_free_policy(mut self, free_policy: FreePolicy) -> Self {
        self.free_policy = free_policy;
        self
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// Returns error if the alignment is not a power of 2, or the arena
    /// cannot hold even the region's seed block or is too large for
    /// [`crate::BlockId`] to address
    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(HeapError::InvalidAlignment {
                alignment: self.alignment,
            });
        }

        if self.max_blocks == 0 {
            return Err(HeapError::ArenaExhausted { capacity: 0 });
        }

        if u32::try_from(self.max_blocks).is_err() {
            return Err(HeapError::ArenaTooLarge {
                max_blocks: self.max_blocks,
            });
        }

        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HeapConfig::default();
        assert_eq!(config.max_blocks, DEFAULT_MAX_BLOCKS);
        assert_eq!(config.alignment, ALIGNMENT);
        assert_eq!(config.map_flags, MapFlags::READ | MapFlags::WRITE);
        assert_eq!(config.free_policy, FreePolicy::Permissive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = HeapConfig::new()
            .with_max_blocks(16)
            .with_alignment(256)
            .with_map_flags(MapFlags::READ)
            .with_free_policy(FreePolicy::Strict);

        assert_eq!(config.max_blocks, 16);
        assert_eq!(config.alignment, 256);
        assert_eq!(config.map_flags, MapFlags::READ);
        assert_eq!(config.free_policy, FreePolicy::Strict);
    }

    #[test]
    fn test_invalid_config() {
        let config = HeapConfig::new().with_alignment(12);
        assert!(matches!(
            config.validate(),
            Err(HeapError::InvalidAlignment { alignment: 12 })
        ));

        let config = HeapConfig::new().with_alignment(0);
        assert!(matches!(
            config.validate(),
            Err(HeapError::InvalidAlignment { alignment: 0 })
        ));

        let config = HeapConfig::new().with_max_blocks(0);
        assert!(matches!(
            config.validate(),
            Err(HeapError::ArenaExhausted { capacity: 0 })
        ));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_max_blocks_bounded_by_block_id() {
        let limit = u32::MAX as usize;
        assert!(HeapConfig::new().with_max_blocks(limit).validate().is_ok());

        let config = HeapConfig::new().with_max_blocks(limit + 1);
        assert_eq!(
            config.validate(),
            Err(HeapError::ArenaTooLarge {
                max_blocks: limit + 1
            })
        );
    }
}
