//! Read-only observability for allocators.
//!
//! Nothing here is needed for `alloc` or `free` to work. The views are built
//! by walking the in-arena bookkeeping on demand, so an allocator carries no
//! extra state to support them beyond two call counters.

use alloc::vec::Vec;
use core::fmt;

use derive_more::{Display, IsVariant};

use crate::{arena::ArenaPtr, error::CorruptionError};

/// Whether a block or slot is currently handed out.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, IsVariant)]
pub enum BlockState {
    #[display("free")]
    Free,
    #[display("allocated")]
    Allocated,
}

/// One block (or slot) of an arena, as reported by
/// [`Diagnostics::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the start of the block, including any header.
    pub offset: usize,
    /// Offset the allocator hands out (or would hand out) for this block.
    pub payload: ArenaPtr,
    /// Usable payload bytes.
    pub size: usize,
    pub state: BlockState,
    /// Sequence number of the allocation that produced the block, if the
    /// strategy records one.
    pub id: Option<usize>,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            offset, size, id, ..
        } = self;
        let mark = match self.state {
            BlockState::Free => "---",
            BlockState::Allocated => "+++",
        };
        write!(f, "{mark} |--{size}--| @{offset:#x}")?;
        if let (BlockState::Allocated, Some(id)) = (self.state, id) {
            write!(f, " id: {id}")?;
        }
        Ok(())
    }
}

/// Aggregate counters for an allocator.
///
/// For a live allocator `free_bytes + allocated_bytes + overhead_bytes`
/// always equals `arena_size`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub arena_size: usize,
    /// Number of successful `alloc` calls.
    pub alloc_count: usize,
    /// Number of `free` calls.
    pub free_count: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
    pub free_bytes: usize,
    pub allocated_bytes: usize,
    /// Bytes spent on boundary tags.
    pub overhead_bytes: usize,
}

impl Stats {
    /// Sums up `blocks`, each of which costs `overhead` bytes of tags.
    pub(crate) fn tally(arena_size: usize, blocks: &[BlockInfo], overhead: usize) -> Self {
        let mut stats = Self {
            arena_size,
            ..Self::default()
        };
        for block in blocks {
            match block.state {
                BlockState::Free => {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size;
                }
                BlockState::Allocated => {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += block.size;
                }
            }
            stats.overhead_bytes += overhead;
        }
        stats
    }
}

/// Optional inspection surface shared by both allocators.
pub trait Diagnostics {
    fn stats(&self) -> Stats;

    /// Lists every block or slot in address order. Empty if the allocator
    /// has no live arena.
    fn blocks(&self) -> Vec<BlockInfo>;

    /// Walks the whole arena and verifies the allocator's structural
    /// invariants.
    ///
    /// This is a debugging aid. It is O(arena) and is never run implicitly.
    fn check_consistency(&self) -> Result<(), CorruptionError>;

    /// Prints the free, allocated and overhead totals.
    ///
    /// Only totals are printed. The per-block listing is
    /// [`dump_blocks`](Self::dump_blocks).
    fn dump_stat(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let stats = self.stats();
        writeln!(
            out,
            "dump stats after {} alloc, {} free",
            stats.alloc_count, stats.free_count
        )?;
        writeln!(
            out,
            "  free:      {} blocks, {} bytes",
            stats.free_blocks, stats.free_bytes
        )?;
        writeln!(
            out,
            "  allocated: {} blocks, {} bytes",
            stats.allocated_blocks, stats.allocated_bytes
        )?;
        writeln!(
            out,
            "  overhead:  {} bytes of {}",
            stats.overhead_bytes, stats.arena_size
        )
    }

    /// Prints every block in address order, one line each.
    fn dump_blocks(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let stats = self.stats();
        writeln!(
            out,
            "dump blocks after {} alloc, {} free",
            stats.alloc_count, stats.free_count
        )?;
        for block in self.blocks() {
            writeln!(out, "{block}")?;
        }
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn block(offset: usize, size: usize, state: BlockState, id: Option<usize>) -> BlockInfo {
        BlockInfo {
            offset,
            payload: ArenaPtr::new(offset + 8),
            size,
            state,
            id,
        }
    }

    #[test]
    fn test_block_display() {
        assert_eq!(
            block(0x20, 100, BlockState::Free, None).to_string(),
            "--- |--100--| @0x20"
        );
        assert_eq!(
            block(0, 64, BlockState::Allocated, Some(3)).to_string(),
            "+++ |--64--| @0x0 id: 3"
        );
        assert_eq!(
            block(0, 64, BlockState::Allocated, None).to_string(),
            "+++ |--64--| @0x0"
        );
    }

    #[test]
    fn test_tally() {
        let blocks = [
            block(0, 104, BlockState::Allocated, Some(0)),
            block(112, 64, BlockState::Free, None),
            block(184, 32, BlockState::Allocated, Some(1)),
        ];
        let stats = Stats::tally(224, &blocks, 8);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.allocated_blocks, 2);
        assert_eq!(stats.free_bytes, 64);
        assert_eq!(stats.allocated_bytes, 136);
        assert_eq!(stats.overhead_bytes, 24);
        assert_eq!(stats.arena_size, 224);
    }

    #[test]
    fn test_state_variants() {
        assert!(BlockState::Free.is_free());
        assert!(BlockState::Allocated.is_allocated());
        assert_eq!(BlockState::Allocated.to_string(), "allocated");
    }
}
