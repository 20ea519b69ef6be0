//! Choosing and constructing an allocator at runtime.

use alloc::vec::Vec;
use core::{fmt, str::FromStr};

use derive_more::{Display, IsVariant};

use crate::{
    Allocator, ArenaPtr,
    boundary_tag::BoundaryTagFreeList,
    diagnostics::{BlockInfo, Diagnostics, Stats},
    error::{CorruptionError, CreateError, InitError, ParseStrategyError, ParseStrategySnafu},
    fixed_block_pool::FixedBlockPool,
};

/// Allocation strategy names accepted on the command line.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, IsVariant)]
pub enum Strategy {
    #[display("pool")]
    Pool,
    #[default]
    #[display("free-list")]
    FreeList,
}

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pool" | "fixed" => Ok(Self::Pool),
            "free-list" | "boundary-tag" => Ok(Self::FreeList),
            _ => ParseStrategySnafu { name: s }.fail(),
        }
    }
}

/// Construction parameters for either allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorConfig {
    Pool { slot_size: usize, slot_count: usize },
    FreeList { arena_size: usize },
}

impl AllocatorConfig {
    /// Picks the parameters `strategy` needs out of a full set of options.
    #[must_use]
    pub fn new(strategy: Strategy, arena_size: usize, slot_size: usize, slot_count: usize) -> Self {
        match strategy {
            Strategy::Pool => Self::Pool {
                slot_size,
                slot_count,
            },
            Strategy::FreeList => Self::FreeList { arena_size },
        }
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Pool { .. } => Strategy::Pool,
            Self::FreeList { .. } => Strategy::FreeList,
        }
    }

    /// Constructs the allocator. The result still has to be initialized.
    pub fn build(&self) -> Result<AnyAllocator, CreateError> {
        let allocator = match *self {
            Self::Pool {
                slot_size,
                slot_count,
            } => AnyAllocator::Pool(FixedBlockPool::new(slot_size, slot_count)?),
            Self::FreeList { arena_size } => {
                AnyAllocator::FreeList(BoundaryTagFreeList::new(arena_size)?)
            }
        };
        Ok(allocator)
    }
}

impl fmt::Display for AllocatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool {
                slot_size,
                slot_count,
            } => write!(f, "pool of {slot_count} x {slot_size} bytes"),
            Self::FreeList { arena_size } => write!(f, "free list over {arena_size} bytes"),
        }
    }
}

/// Either allocator, chosen at runtime.
pub enum AnyAllocator {
    Pool(FixedBlockPool),
    FreeList(BoundaryTagFreeList),
}

impl AnyAllocator {
    #[must_use]
    pub fn as_free_list(&self) -> Option<&BoundaryTagFreeList> {
        match self {
            Self::Pool(_) => None,
            Self::FreeList(allocator) => Some(allocator),
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $allocator:ident => $body:expr) => {
        match $self {
            AnyAllocator::Pool($allocator) => $body,
            AnyAllocator::FreeList($allocator) => $body,
        }
    };
}

impl Allocator for AnyAllocator {
    fn init(&mut self) -> Result<(), InitError> {
        dispatch!(self, allocator => allocator.init())
    }

    fn destroy(&mut self) {
        dispatch!(self, allocator => allocator.destroy());
    }

    fn is_initialized(&self) -> bool {
        dispatch!(self, allocator => allocator.is_initialized())
    }

    fn alloc(&mut self, size: usize) -> Option<ArenaPtr> {
        dispatch!(self, allocator => allocator.alloc(size))
    }

    fn free(&mut self, ptr: ArenaPtr) {
        dispatch!(self, allocator => allocator.free(ptr));
    }

    fn payload(&self, ptr: ArenaPtr) -> Option<&[u8]> {
        dispatch!(self, allocator => allocator.payload(ptr))
    }

    fn payload_mut(&mut self, ptr: ArenaPtr) -> Option<&mut [u8]> {
        dispatch!(self, allocator => allocator.payload_mut(ptr))
    }
}

impl Diagnostics for AnyAllocator {
    fn stats(&self) -> Stats {
        dispatch!(self, allocator => allocator.stats())
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        dispatch!(self, allocator => allocator.blocks())
    }

    fn check_consistency(&self) -> Result<(), CorruptionError> {
        dispatch!(self, allocator => allocator.check_consistency())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_tag::{HEADER_SIZE, OVERHEAD};

    #[test]
    fn test_parse_strategy() {
        assert_eq!("pool".parse::<Strategy>().unwrap(), Strategy::Pool);
        assert_eq!("fixed".parse::<Strategy>().unwrap(), Strategy::Pool);
        assert_eq!("free-list".parse::<Strategy>().unwrap(), Strategy::FreeList);
        assert_eq!(
            "boundary-tag".parse::<Strategy>().unwrap(),
            Strategy::FreeList
        );

        let err = "buddy".parse::<Strategy>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown allocation strategy \"buddy\", expected `pool` or `free-list`"
        );
    }

    #[test]
    fn test_strategy_round_trips_through_display() {
        for strategy in [Strategy::Pool, Strategy::FreeList] {
            assert_eq!(strategy.to_string().parse::<Strategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn test_config_selects_parameters() {
        let config = AllocatorConfig::new(Strategy::Pool, 1024, 256, 5);
        assert_eq!(
            config,
            AllocatorConfig::Pool {
                slot_size: 256,
                slot_count: 5
            }
        );
        assert!(config.strategy().is_pool());
        assert_eq!(config.to_string(), "pool of 5 x 256 bytes");

        let config = AllocatorConfig::new(Strategy::FreeList, 1024, 256, 5);
        assert_eq!(config, AllocatorConfig::FreeList { arena_size: 1024 });
        assert_eq!(config.to_string(), "free list over 1024 bytes");
    }

    #[test]
    fn test_build_and_dispatch() {
        let mut allocator = AllocatorConfig::FreeList { arena_size: 1024 }
            .build()
            .unwrap();
        allocator.init().unwrap();
        let ptr = allocator.alloc(100).unwrap();
        assert_eq!(ptr.offset(), HEADER_SIZE);
        assert!(allocator.as_free_list().is_some());
        allocator.free(ptr);
        assert_eq!(allocator.stats().free_bytes, 1024 - OVERHEAD);
        allocator.check_consistency().unwrap();

        let mut allocator = AllocatorConfig::Pool {
            slot_size: 256,
            slot_count: 5,
        }
        .build()
        .unwrap();
        allocator.init().unwrap();
        assert_eq!(allocator.alloc(10).unwrap().offset(), 0);
        assert!(allocator.alloc(257).is_none());
        assert!(allocator.as_free_list().is_none());
        assert_eq!(allocator.blocks().len(), 5);
        allocator.destroy();
        assert!(!allocator.is_initialized());
    }

    #[test]
    fn test_build_rejects_invalid_parameters() {
        assert!(matches!(
            AllocatorConfig::FreeList { arena_size: 8 }.build(),
            Err(CreateError::ArenaTooSmall { .. })
        ));
        assert!(matches!(
            AllocatorConfig::Pool {
                slot_size: 8,
                slot_count: 0
            }
            .build(),
            Err(CreateError::ZeroSlotCount { .. })
        ));
    }
}
