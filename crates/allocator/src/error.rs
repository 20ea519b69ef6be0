//! Errors reported by constructors, lifecycle calls and consistency checks.
//!
//! `alloc` and `free` have no error type: running out of space or asking for
//! more than a strategy can ever hand out is reported as `None`, and misuse of
//! `free` is a caller obligation that is not detected.

use alloc::collections::TryReserveError;

use snafu::Snafu;
use snafu_utils::Location;

/// Errors from constructing an allocator with invalid parameters.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CreateError {
    #[snafu(display(
        "arena of {size} bytes cannot hold the {min} bytes of boundary tags of a single block"
    ))]
    ArenaTooSmall {
        size: usize,
        min: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("fixed block pool needs at least one slot"))]
    ZeroSlotCount {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "pool arena size overflows usize, slot_size={slot_size}, slot_count={slot_count}"
    ))]
    ArenaSizeOverflow {
        slot_size: usize,
        slot_count: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors from [`Allocator::init`](crate::Allocator::init).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display("allocator is already initialized"))]
    AlreadyInitialized {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("allocator has been destroyed"))]
    Released {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to reserve an arena of {len} bytes"))]
    ReserveArena {
        len: usize,
        #[snafu(source)]
        source: TryReserveError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Inconsistencies found by
/// [`Diagnostics::check_consistency`](crate::diagnostics::Diagnostics::check_consistency).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CorruptionError {
    #[snafu(display("allocator has no live arena"))]
    NotInitialized {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {offset:#x} with size {size} runs past the end of the arena"))]
    BlockOverrun {
        offset: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free blocks at {left:#x} and {right:#x} are adjacent"))]
    AdjacentFree {
        left: usize,
        right: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list links around block at {offset:#x} are not symmetric"))]
    FreeListLink {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {offset:#x} is on the free list but is not tagged free"))]
    FreeListMember {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list holds {listed} blocks, but the arena has {free} free blocks"))]
    FreeListCount {
        listed: usize,
        free: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free slot chain reaches invalid or repeated slot {index}"))]
    SlotChain {
        index: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free slot chain has {chain} slots, expected {expected}"))]
    SlotChainLength {
        chain: usize,
        expected: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Error from parsing a [`Strategy`](crate::config::Strategy) name.
#[derive(Debug, Snafu)]
#[snafu(
    visibility(pub(crate)),
    display("unknown allocation strategy {name:?}, expected `pool` or `free-list`")
)]
pub struct ParseStrategyError {
    name: alloc::string::String,
    #[snafu(implicit)]
    location: Location,
}
