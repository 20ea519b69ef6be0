//! Arena-backed memory allocators.
//!
//! Each allocator owns one pre-reserved byte buffer (its *arena*) and carves
//! allocations out of it without touching the global allocator afterwards.
//! All bookkeeping is stored inside the arena itself, and allocations are
//! identified by [`ArenaPtr`] offsets rather than raw pointers.
//!
//! # Available Allocators
//!
//! ## [`FixedBlockPool`](fixed_block_pool::FixedBlockPool)
//!
//! Divides the arena into `n` equal slots threaded onto a singly-linked free
//! chain. Best suited for:
//!
//! - Many objects of one bounded size
//! - Hot paths that need O(1) allocation and deallocation
//!
//! ## [`BoundaryTagFreeList`](boundary_tag::BoundaryTagFreeList)
//!
//! Divides the arena into variable-size blocks bracketed by header and footer
//! tags, kept on a circular doubly-linked free list. Allocation is a
//! cursor-based first fit that splits oversized blocks; deallocation merges
//! with free neighbors in O(1) using the tags.
//!
//! | Allocator | Allocation | Deallocation | Overhead | Best Use Case |
//! |-----------|------------|--------------|----------|---------------|
//! | `FixedBlockPool` | O(1) | O(1) | none (internal fragmentation only) | Uniform objects |
//! | `BoundaryTagFreeList` | O(free blocks) | O(1) | header + footer per block | Variable sizes |
//!
//! # Usage Examples
//!
//! ```rust
//! use arena_alloc::{Allocator as _, boundary_tag::BoundaryTagFreeList};
//!
//! let mut allocator = BoundaryTagFreeList::new(1024).unwrap();
//! allocator.init().unwrap();
//!
//! let ptr = allocator.alloc(100).unwrap();
//! allocator.payload_mut(ptr).unwrap().fill(0xAB);
//! allocator.free(ptr);
//!
//! // The arena is released on `destroy` or when the allocator is dropped.
//! allocator.destroy();
//! ```
//!
//! # Contract
//!
//! - `init` must succeed before `alloc` returns anything.
//! - `alloc` signals both "out of space" and "request can never fit" with
//!   `None`.
//! - `free` must only be given a live pointer obtained from the same
//!   allocator. Double frees and foreign pointers are **not detected**; they
//!   corrupt the allocator's bookkeeping (or panic on an out-of-arena access)
//!   rather than being reported.
//!
//! # Thread Safety
//!
//! The allocators are `Send` but every operation takes `&mut self`. Wrap one
//! in a [`LockedAllocator`] to share it between threads.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub mod arena;
pub mod boundary_tag;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fixed_block_pool;
mod locked;

#[cfg(test)]
mod tests;

pub use self::{
    arena::{ArenaPtr, WORD_SIZE},
    locked::LockedAllocator,
};
use self::error::InitError;

/// The capability shared by every allocation strategy in this crate.
pub trait Allocator {
    /// Acquires the arena and lays out the initial free space.
    ///
    /// Must be called exactly once before any allocation.
    fn init(&mut self) -> Result<(), InitError>;

    /// Releases the arena. Outstanding allocations become invalid.
    ///
    /// The allocator cannot be initialized again afterwards. Calling this
    /// more than once is harmless, and dropping the allocator does it
    /// implicitly.
    fn destroy(&mut self);

    fn is_initialized(&self) -> bool;

    /// Allocates a region of at least `size` bytes.
    ///
    /// Returns `None` if no free region is large enough, if `size` exceeds
    /// what the strategy can ever provide, or if the allocator is not
    /// initialized.
    fn alloc(&mut self, size: usize) -> Option<ArenaPtr>;

    /// Returns a region to the allocator.
    ///
    /// `ptr` must have been returned by [`alloc`](Self::alloc) on this
    /// allocator and not freed since. This is not checked.
    fn free(&mut self, ptr: ArenaPtr);

    /// Returns the usable bytes of the live allocation at `ptr`.
    fn payload(&self, ptr: ArenaPtr) -> Option<&[u8]>;

    /// Returns the usable bytes of the live allocation at `ptr` for writing.
    fn payload_mut(&mut self, ptr: ArenaPtr) -> Option<&mut [u8]>;
}
