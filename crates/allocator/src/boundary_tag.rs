//! Boundary-tag free-list allocator implementation.
//!
//! This module provides a general-purpose allocator for variable-size
//! requests. The arena is tiled by blocks, each bracketed by a header and a
//! footer. Free blocks are kept on a circular doubly-linked list whose links
//! live in the blocks' own headers.
//!
//! # Algorithm
//!
//! - **Allocation**: first fit, starting from the *cursor* (the free block
//!   touched most recently) instead of the lowest address. A block that is
//!   larger than the request by more than one block's worth of tags is split,
//!   and the tail goes back on the free list.
//! - **Deallocation**: the freed block is merged with its left and right
//!   neighbors if they are free. The footer lets a block find out whether its
//!   left neighbor is free by looking at the word just below its own header,
//!   so both merges are O(1).
//!
//! Two free blocks are never adjacent once `free` returns.
//!
//! # Memory Layout
//!
//! ```text
//! Block Layout (64-bit):
//! ┌──────────────────────────────────┬───────────────┬──────────────┐
//! │ Header (32 bytes)                │ Payload       │ Footer (8)   │
//! │ ┌──────┬──────┬────────┬────────┐│ (size bytes)  │ header offset│
//! │ │ id   │ size │ prev   │ next   ││               │ if free,     │
//! │ └──────┴──────┴────────┴────────┘│               │ NIL if used  │
//! └──────────────────────────────────┴───────────────┴──────────────┘
//!                                    ▲
//!                                    └── ArenaPtr returned to the caller
//! ```
//!
//! `prev` and `next` are only meaningful while the block is free. Payload
//! sizes are not rounded, so tags may sit at any byte offset. The arena has no
//! sentinel blocks at either end, so every neighbor lookup is bounds-checked
//! first.

use alloc::vec::Vec;

use snafu::{OptionExt as _, ensure};

use crate::{
    Allocator,
    arena::{Arena, ArenaPtr, ArenaState, NIL, WORD_SIZE},
    diagnostics::{BlockInfo, BlockState, Diagnostics, Stats},
    error::{
        AdjacentFreeSnafu, ArenaTooSmallSnafu, BlockOverrunSnafu, CorruptionError, CreateError,
        FreeListCountSnafu, FreeListLinkSnafu, FreeListMemberSnafu, InitError,
        NotInitializedSnafu,
    },
};

const ID: usize = 0;
const SIZE: usize = WORD_SIZE;
const PREV: usize = 2 * WORD_SIZE;
const NEXT: usize = 3 * WORD_SIZE;

/// Bytes of tag placed before each payload.
pub const HEADER_SIZE: usize = 4 * WORD_SIZE;
/// Bytes of tag placed after each payload.
pub const FOOTER_SIZE: usize = WORD_SIZE;
/// Bytes of tags each block costs on top of its payload.
pub const OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// A block, identified by the arena offset of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Block(usize);

impl Block {
    fn from_payload(ptr: ArenaPtr) -> Self {
        debug_assert!(ptr.offset() >= HEADER_SIZE, "{ptr} is not a payload pointer");
        Self(ptr.offset().wrapping_sub(HEADER_SIZE))
    }

    fn payload(self) -> ArenaPtr {
        ArenaPtr::new(self.0 + HEADER_SIZE)
    }

    fn size(self, arena: &Arena) -> usize {
        arena.read_word(self.0 + SIZE)
    }

    fn set_size(self, arena: &mut Arena, size: usize) {
        arena.write_word(self.0 + SIZE, size);
    }

    fn id(self, arena: &Arena) -> usize {
        arena.read_word(self.0 + ID)
    }

    fn prev(self, arena: &Arena) -> Self {
        Self(arena.read_word(self.0 + PREV))
    }

    fn next(self, arena: &Arena) -> Self {
        Self(arena.read_word(self.0 + NEXT))
    }

    fn set_prev(self, arena: &mut Arena, prev: Self) {
        arena.write_word(self.0 + PREV, prev.0);
    }

    fn set_next(self, arena: &mut Arena, next: Self) {
        arena.write_word(self.0 + NEXT, next.0);
    }

    fn footer(self, arena: &Arena) -> usize {
        self.0 + HEADER_SIZE + self.size(arena)
    }

    /// Offset one past the block's footer, where the right neighbor starts.
    fn end(self, arena: &Arena) -> usize {
        self.footer(arena) + FOOTER_SIZE
    }

    /// Returns `true` if the block's tags fit inside the arena.
    fn fits(self, arena: &Arena) -> bool {
        arena.contains(self.0, HEADER_SIZE)
            && self
                .size(arena)
                .checked_add(self.0 + OVERHEAD)
                .is_some_and(|end| end <= arena.len())
    }

    /// A block is free iff its footer refers back to its own header.
    fn is_free(self, arena: &Arena) -> bool {
        arena.read_word(self.footer(arena)) == self.0
    }

    fn mark_free(self, arena: &mut Arena) {
        arena.write_word(self.footer(arena), self.0);
    }

    fn mark_allocated(self, arena: &mut Arena, id: usize) {
        arena.write_word(self.footer(arena), NIL);
        arena.write_word(self.0 + ID, id);
    }

    /// Makes `self` the only member of a new free list.
    fn link_alone(self, arena: &mut Arena) {
        self.set_prev(arena, self);
        self.set_next(arena, self);
    }

    /// Links `self` into the free list right after `after`.
    fn link_after(self, arena: &mut Arena, after: Self) {
        let next = after.next(arena);
        next.set_prev(arena, self);
        self.set_next(arena, next);
        after.set_next(arena, self);
        self.set_prev(arena, after);
    }

    /// Unlinks `self` from the free list.
    ///
    /// Returns the block that preceded it, or `None` if `self` was the only
    /// member.
    fn unlink(self, arena: &mut Arena) -> Option<Self> {
        let prev = self.prev(arena);
        if prev == self {
            debug_assert_eq!(self.next(arena), self);
            return None;
        }
        let next = self.next(arena);
        prev.set_next(arena, next);
        next.set_prev(arena, prev);
        Some(prev)
    }

    /// Returns the free block ending right before `self`, if any.
    ///
    /// The word below the header is the left neighbor's footer. It only counts
    /// as a back-reference if it names a header whose footer is exactly that
    /// word.
    fn left_free_neighbor(self, arena: &Arena) -> Option<Self> {
        let footer = self.0.checked_sub(FOOTER_SIZE)?;
        let left = arena.read_word(footer);
        if left == NIL || left >= self.0 {
            return None;
        }
        let left = Self(left);
        (left.fits(arena) && left.footer(arena) == footer).then_some(left)
    }

    /// Returns the free block starting right after `self`, if any.
    fn right_free_neighbor(self, arena: &Arena) -> Option<Self> {
        let right = Self(self.end(arena));
        (right.fits(arena) && right.is_free(arena)).then_some(right)
    }
}

/// A variable-size allocator over one arena with boundary-tagged blocks.
///
/// # Performance Characteristics
///
/// - O(free blocks) allocation, O(1) deallocation
/// - [`OVERHEAD`] bytes of tags per block
/// - A block is only split if the remainder can hold its own tags, so an
///   allocation may get up to `OVERHEAD` more bytes than it asked for
pub struct BoundaryTagFreeList {
    arena_size: usize,
    arena: ArenaState,
    /// The free block the next search starts from; `None` if none is free.
    cursor: Option<Block>,
    alloc_count: usize,
    free_count: usize,
}

impl BoundaryTagFreeList {
    /// Creates an allocator managing an arena of `arena_size` bytes.
    ///
    /// The arena must be able to hold at least one block's tags. No memory is
    /// reserved until [`init`](Allocator::init) is called.
    ///
    /// # Examples
    ///
    /// ```
    /// # use arena_alloc::boundary_tag::{BoundaryTagFreeList, OVERHEAD};
    /// assert!(BoundaryTagFreeList::new(1024).is_ok());
    /// assert!(BoundaryTagFreeList::new(OVERHEAD - 1).is_err());
    /// ```
    pub fn new(arena_size: usize) -> Result<Self, CreateError> {
        ensure!(
            arena_size >= OVERHEAD,
            ArenaTooSmallSnafu {
                size: arena_size,
                min: OVERHEAD,
            }
        );
        Ok(Self {
            arena_size,
            arena: ArenaState::default(),
            cursor: None,
            alloc_count: 0,
            free_count: 0,
        })
    }

    #[must_use]
    pub fn arena_size(&self) -> usize {
        self.arena_size
    }

    /// Lists the free list starting at the cursor, or sorted by offset if
    /// `sort_by_offset` is set.
    #[must_use]
    pub fn free_list(&self, sort_by_offset: bool) -> Vec<BlockInfo> {
        let Some(arena) = self.arena.get() else {
            return Vec::new();
        };
        let mut blocks = Vec::new();
        if let Some(start) = self.cursor {
            let mut block = start;
            loop {
                blocks.push(block_info(arena, block, BlockState::Free));
                block = block.next(arena);
                if block == start || blocks.len() > arena.len() / OVERHEAD {
                    break;
                }
            }
        }
        if sort_by_offset {
            blocks.sort_unstable_by_key(|block| block.offset);
        }
        blocks
    }

    pub fn dump_free_list(
        &self,
        out: &mut dyn core::fmt::Write,
        sort_by_offset: bool,
    ) -> core::fmt::Result {
        writeln!(
            out,
            "dump free list after {} alloc, {} free",
            self.alloc_count, self.free_count
        )?;
        let blocks = self.free_list(sort_by_offset);
        if blocks.is_empty() {
            return writeln!(out, "free list is empty");
        }
        for block in blocks {
            writeln!(out, " {{ offset: {}, size: {} }}", block.offset, block.size)?;
        }
        Ok(())
    }
}

fn block_info(arena: &Arena, block: Block, state: BlockState) -> BlockInfo {
    BlockInfo {
        offset: block.0,
        payload: block.payload(),
        size: block.size(arena),
        state,
        id: state.is_allocated().then(|| block.id(arena)),
    }
}

impl Allocator for BoundaryTagFreeList {
    fn init(&mut self) -> Result<(), InitError> {
        let arena_size = self.arena_size;
        self.arena.acquire(arena_size, |arena| {
            let block = Block(0);
            block.set_size(arena, arena_size - OVERHEAD);
            block.link_alone(arena);
            block.mark_free(arena);
        })?;
        self.cursor = Some(Block(0));
        log::debug!("boundary tag free list initialized, arena_size={arena_size}");
        Ok(())
    }

    fn destroy(&mut self) {
        if self.arena.release() {
            log::debug!(
                "boundary tag free list destroyed after {} alloc, {} free",
                self.alloc_count,
                self.free_count
            );
        }
        self.cursor = None;
    }

    fn is_initialized(&self) -> bool {
        self.arena.get().is_some()
    }

    fn alloc(&mut self, size: usize) -> Option<ArenaPtr> {
        let Some(arena) = self.arena.get_mut() else {
            log::warn!("alloc({size}) on a boundary tag free list without a live arena");
            return None;
        };
        if size > arena.len() {
            log::trace!("alloc({size}) can never fit in {} bytes", arena.len());
            return None;
        }
        let Some(start) = self.cursor else {
            log::trace!("alloc({size}) failed, free list is empty");
            return None;
        };

        let mut block = start;
        while block.size(arena) < size {
            block = block.next(arena);
            if block == start {
                log::trace!("alloc({size}) failed, no free block is large enough");
                return None;
            }
        }

        self.cursor = block.unlink(arena);

        let block_size = block.size(arena);
        if block_size > size + OVERHEAD {
            // Carve the tail into a new free block.
            let remainder = Block(block.0 + OVERHEAD + size);
            remainder.set_size(arena, block_size - OVERHEAD - size);
            remainder.mark_free(arena);
            block.set_size(arena, size);
            match self.cursor {
                Some(cursor) => remainder.link_after(arena, cursor),
                None => {
                    remainder.link_alone(arena);
                    self.cursor = Some(remainder);
                }
            }
            log::trace!(
                "split block at {:#x}, remainder at {:#x} with {} bytes",
                block.0,
                remainder.0,
                remainder.size(arena)
            );
        }

        block.mark_allocated(arena, self.alloc_count);
        self.alloc_count += 1;
        log::trace!("alloc({size}) -> {}", block.payload());
        Some(block.payload())
    }

    fn free(&mut self, ptr: ArenaPtr) {
        let Some(arena) = self.arena.get_mut() else {
            log::warn!("free({ptr}) on a boundary tag free list without a live arena");
            return;
        };
        let block = Block::from_payload(ptr);
        self.free_count += 1;

        let merged = if let Some(left) = block.left_free_neighbor(arena) {
            let size = left.size(arena) + OVERHEAD + block.size(arena);
            left.set_size(arena, size);
            log::trace!("merged {:#x} into left neighbor {:#x}", block.0, left.0);
            left
        } else {
            match self.cursor {
                Some(cursor) => block.link_after(arena, cursor),
                None => block.link_alone(arena),
            }
            block
        };
        self.cursor = Some(merged);

        if let Some(right) = merged.right_free_neighbor(arena) {
            // `merged` is on the list too, so `right` is never the sole member.
            right.unlink(arena);
            let size = merged.size(arena) + OVERHEAD + right.size(arena);
            merged.set_size(arena, size);
            log::trace!("merged right neighbor {:#x} into {:#x}", right.0, merged.0);
        }

        merged.mark_free(arena);
        log::trace!("free({ptr}) -> free block at {:#x}", merged.0);
    }

    fn payload(&self, ptr: ArenaPtr) -> Option<&[u8]> {
        let arena = self.arena.get()?;
        let block = Block(ptr.offset().checked_sub(HEADER_SIZE)?);
        if !block.fits(arena) {
            return None;
        }
        arena.bytes(ptr.offset(), block.size(arena))
    }

    fn payload_mut(&mut self, ptr: ArenaPtr) -> Option<&mut [u8]> {
        let arena = self.arena.get_mut()?;
        let block = Block(ptr.offset().checked_sub(HEADER_SIZE)?);
        if !block.fits(arena) {
            return None;
        }
        let size = block.size(arena);
        arena.bytes_mut(ptr.offset(), size)
    }
}

impl Diagnostics for BoundaryTagFreeList {
    fn stats(&self) -> Stats {
        let mut stats = Stats::tally(self.arena_size, &self.blocks(), OVERHEAD);
        stats.alloc_count = self.alloc_count;
        stats.free_count = self.free_count;
        stats
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        let Some(arena) = self.arena.get() else {
            return Vec::new();
        };
        let mut blocks = Vec::new();
        let mut block = Block(0);
        while block.0 < arena.len() && block.fits(arena) {
            let state = if block.is_free(arena) {
                BlockState::Free
            } else {
                BlockState::Allocated
            };
            blocks.push(block_info(arena, block, state));
            block = Block(block.end(arena));
        }
        blocks
    }

    fn check_consistency(&self) -> Result<(), CorruptionError> {
        let arena = self.arena.get().context(NotInitializedSnafu)?;

        // Blocks tile the arena, and no two free blocks touch.
        let mut free_blocks = 0_usize;
        let mut prev_free: Option<Block> = None;
        let mut block = Block(0);
        while block.0 < arena.len() {
            ensure!(
                block.fits(arena),
                BlockOverrunSnafu {
                    offset: block.0,
                    size: if arena.contains(block.0, HEADER_SIZE) {
                        block.size(arena)
                    } else {
                        0
                    },
                }
            );
            let is_free = block.is_free(arena);
            if is_free {
                free_blocks += 1;
                if let Some(left) = prev_free {
                    return AdjacentFreeSnafu {
                        left: left.0,
                        right: block.0,
                    }
                    .fail();
                }
            }
            prev_free = is_free.then_some(block);
            block = Block(block.end(arena));
        }

        // The free list is a symmetric ring of exactly the free blocks.
        let mut listed = 0_usize;
        if let Some(start) = self.cursor {
            let mut block = start;
            loop {
                ensure!(
                    block.fits(arena) && block.is_free(arena),
                    FreeListMemberSnafu { offset: block.0 }
                );
                let next = block.next(arena);
                ensure!(
                    next.fits(arena) && next.prev(arena) == block,
                    FreeListLinkSnafu { offset: block.0 }
                );
                listed += 1;
                ensure!(
                    listed <= free_blocks,
                    FreeListCountSnafu {
                        listed,
                        free: free_blocks,
                    }
                );
                block = next;
                if block == start {
                    break;
                }
            }
        }
        ensure!(
            listed == free_blocks,
            FreeListCountSnafu {
                listed,
                free: free_blocks,
            }
        );
        Ok(())
    }
}

impl Drop for BoundaryTagFreeList {
    fn drop(&mut self) {
        self.destroy();
    }
}
