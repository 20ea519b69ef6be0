//! Fixed-size block pool implementation.
//!
//! This module provides an allocator that divides its arena into a fixed
//! number of equally sized slots. Unused slots are threaded onto a
//! singly-linked free chain whose links live in the first word of each free
//! slot, so the pool needs no bookkeeping outside the arena.
//!
//! ```text
//! Arena (slot_count = 4):
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │ slot 0   │ slot 1   │ slot 2   │ slot 3   │
//! │ next: 2  │ (in use) │ next: 3  │ next: -  │
//! └──────────┴──────────┴──────────┴──────────┘
//!      ▲
//!      └── next_free
//! ```

use alloc::vec::Vec;

use snafu::{OptionExt as _, ensure};

use crate::{
    Allocator,
    arena::{ArenaPtr, ArenaState, NIL, WORD_SIZE},
    diagnostics::{BlockInfo, BlockState, Diagnostics, Stats},
    error::{
        ArenaSizeOverflowSnafu, CorruptionError, CreateError, InitError, NotInitializedSnafu,
        SlotChainLengthSnafu, SlotChainSnafu, ZeroSlotCountSnafu,
    },
};

/// An allocator handing out `slot_count` slots of `slot_size` bytes each.
///
/// # Performance Characteristics
///
/// - O(1) allocation and deallocation
/// - No external fragmentation; a request smaller than a slot wastes the
///   difference
pub struct FixedBlockPool {
    slot_size: usize,
    slot_count: usize,
    arena: ArenaState,
    /// Index of the first free slot, or `NIL` if every slot is in use.
    next_free: usize,
    used: usize,
    alloc_count: usize,
    free_count: usize,
}

impl FixedBlockPool {
    /// Creates a pool of `slot_count` slots of `slot_size` bytes.
    ///
    /// `slot_size` is raised to at least [`WORD_SIZE`] so that a free slot
    /// can hold its chain link. No memory is reserved until
    /// [`init`](Allocator::init) is called.
    ///
    /// # Examples
    ///
    /// ```
    /// # use arena_alloc::fixed_block_pool::FixedBlockPool;
    /// let pool = FixedBlockPool::new(256, 5).unwrap();
    /// assert_eq!(pool.arena_size(), 1280);
    /// ```
    pub fn new(slot_size: usize, slot_count: usize) -> Result<Self, CreateError> {
        ensure!(slot_count > 0, ZeroSlotCountSnafu);
        let slot_size = slot_size.max(WORD_SIZE);
        slot_size
            .checked_mul(slot_count)
            .context(ArenaSizeOverflowSnafu {
                slot_size,
                slot_count,
            })?;

        Ok(Self {
            slot_size,
            slot_count,
            arena: ArenaState::default(),
            next_free: NIL,
            used: 0,
            alloc_count: 0,
            free_count: 0,
        })
    }

    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[must_use]
    pub fn arena_size(&self) -> usize {
        self.slot_size * self.slot_count
    }

    /// Number of slots currently handed out.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    fn slot_offset(&self, index: usize) -> usize {
        assert!(index < self.slot_count, "slot index out of range: {index}");
        index * self.slot_size
    }

    fn slot_index(&self, ptr: ArenaPtr) -> usize {
        let offset = ptr.offset();
        debug_assert!(
            offset.is_multiple_of(self.slot_size),
            "pointer {ptr} is not at a slot boundary"
        );
        offset / self.slot_size
    }

    /// Collects the free chain, following at most `slot_count` links.
    fn free_chain(&self) -> Result<Vec<usize>, CorruptionError> {
        let arena = self.arena.get().context(NotInitializedSnafu)?;
        let mut seen = alloc::vec![false; self.slot_count];
        let mut chain = Vec::new();
        let mut index = self.next_free;
        while index != NIL {
            ensure!(
                index < self.slot_count && !seen[index],
                SlotChainSnafu { index }
            );
            seen[index] = true;
            chain.push(index);
            index = arena.read_word(self.slot_offset(index));
        }
        Ok(chain)
    }
}

impl Allocator for FixedBlockPool {
    fn init(&mut self) -> Result<(), InitError> {
        let (slot_size, slot_count) = (self.slot_size, self.slot_count);
        self.arena.acquire(self.arena_size(), |arena| {
            // Chain every slot to its successor in address order.
            for index in 0..slot_count {
                let next = if index + 1 < slot_count { index + 1 } else { NIL };
                arena.write_word(index * slot_size, next);
            }
        })?;
        self.next_free = 0;
        self.used = 0;
        log::debug!(
            "fixed block pool initialized, slot_size={slot_size}, slot_count={slot_count}"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        if self.arena.release() {
            log::debug!(
                "fixed block pool destroyed with {} slots still in use",
                self.used
            );
        }
        self.next_free = NIL;
        self.used = 0;
    }

    fn is_initialized(&self) -> bool {
        self.arena.get().is_some()
    }

    fn alloc(&mut self, size: usize) -> Option<ArenaPtr> {
        let Some(arena) = self.arena.get() else {
            log::warn!("alloc({size}) on a fixed block pool without a live arena");
            return None;
        };
        if size > self.slot_size {
            log::trace!("alloc({size}) exceeds slot size {}", self.slot_size);
            return None;
        }
        if self.used >= self.slot_count {
            log::trace!("alloc({size}) failed, all {} slots in use", self.slot_count);
            return None;
        }

        let index = self.next_free;
        let offset = self.slot_offset(index);
        self.next_free = arena.read_word(offset);
        self.used += 1;
        self.alloc_count += 1;
        log::trace!("alloc({size}) -> slot {index}");
        Some(ArenaPtr::new(offset))
    }

    fn free(&mut self, ptr: ArenaPtr) {
        if !self.is_initialized() {
            log::warn!("free({ptr}) on a fixed block pool without a live arena");
            return;
        }
        let index = self.slot_index(ptr);
        let offset = self.slot_offset(index);
        let next_free = self.next_free;
        if let Some(arena) = self.arena.get_mut() {
            // Push: the freed slot links to the old head, then becomes the head.
            arena.write_word(offset, next_free);
        }
        self.next_free = index;
        self.used = self.used.saturating_sub(1);
        self.free_count += 1;
        log::trace!("free({ptr}) -> slot {index}");
    }

    fn payload(&self, ptr: ArenaPtr) -> Option<&[u8]> {
        self.arena.get()?.bytes(ptr.offset(), self.slot_size)
    }

    fn payload_mut(&mut self, ptr: ArenaPtr) -> Option<&mut [u8]> {
        self.arena.get_mut()?.bytes_mut(ptr.offset(), self.slot_size)
    }
}

impl Diagnostics for FixedBlockPool {
    fn stats(&self) -> Stats {
        let mut stats = Stats::tally(self.arena_size(), &self.blocks(), 0);
        stats.alloc_count = self.alloc_count;
        stats.free_count = self.free_count;
        stats
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        let Ok(chain) = self.free_chain() else {
            return Vec::new();
        };
        let mut free = alloc::vec![false; self.slot_count];
        for index in chain {
            free[index] = true;
        }

        free.iter()
            .enumerate()
            .map(|(index, &is_free)| {
                let offset = self.slot_offset(index);
                BlockInfo {
                    offset,
                    payload: ArenaPtr::new(offset),
                    size: self.slot_size,
                    state: if is_free {
                        BlockState::Free
                    } else {
                        BlockState::Allocated
                    },
                    id: None,
                }
            })
            .collect()
    }

    fn check_consistency(&self) -> Result<(), CorruptionError> {
        let chain = self.free_chain()?;
        let expected = self.slot_count - self.used;
        ensure!(
            chain.len() == expected,
            SlotChainLengthSnafu {
                chain: chain.len(),
                expected,
            }
        );
        Ok(())
    }
}

impl Drop for FixedBlockPool {
    fn drop(&mut self) {
        self.destroy();
    }
}
