//! Randomized tests replaying byte-code programs against both allocators.

use std::{collections::BTreeMap, ops::Range, vec::Vec};

use quickcheck_macros::quickcheck;

use crate::{
    Allocator, ArenaPtr,
    boundary_tag::{BoundaryTagFreeList, OVERHEAD},
    diagnostics::Diagnostics,
    fixed_block_pool::FixedBlockPool,
};

/// Live regions handed out by an allocator, keyed by start offset.
struct ShadowAllocator {
    regions: BTreeMap<usize, Range<usize>>,
}

impl ShadowAllocator {
    fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    fn allocate(&mut self, region: Range<usize>) {
        log::trace!("sa: allocating {region:?}");
        if let Some((_, prev)) = self.regions.range(..=region.start).next_back() {
            assert!(
                prev.end <= region.start,
                "{region:?} overlaps live region {prev:?}"
            );
        }
        if let Some((_, next)) = self.regions.range(region.start..).next() {
            assert!(
                region.end <= next.start || region.is_empty(),
                "{region:?} overlaps live region {next:?}"
            );
        }
        assert!(
            self.regions.insert(region.start, region.clone()).is_none(),
            "{region:?} handed out twice"
        );
    }

    fn deallocate(&mut self, start: usize) {
        log::trace!("sa: deallocating {start:#x}");
        assert!(self.regions.remove(&start).is_some());
    }
}

#[derive(Debug)]
struct Alloc {
    ptr: ArenaPtr,
    size: usize,
    tag: u8,
}

/// Checks the invariants that hold after every operation.
fn check<A>(allocator: &A, arena_size: usize)
where
    A: Diagnostics,
{
    allocator.check_consistency().unwrap();
    let stats = allocator.stats();
    assert_eq!(
        stats.free_bytes + stats.allocated_bytes + stats.overhead_bytes,
        arena_size,
        "{stats:?}"
    );
}

fn largest_free_block(allocator: &impl Diagnostics) -> Option<usize> {
    allocator
        .blocks()
        .iter()
        .filter(|block| block.state.is_free())
        .map(|block| block.size)
        .max()
}

fn fill(allocator: &mut impl Allocator, alloc: &Alloc) {
    let payload = allocator.payload_mut(alloc.ptr).unwrap();
    assert!(payload.len() >= alloc.size);
    payload[..alloc.size].fill(alloc.tag);
}

fn verify(allocator: &impl Allocator, alloc: &Alloc) {
    let payload = allocator.payload(alloc.ptr).unwrap();
    assert!(
        payload[..alloc.size].iter().all(|&b| b == alloc.tag),
        "payload of {alloc:?} was overwritten"
    );
}

/// Replays `bytecode` until it runs out.
///
/// Sizes are scaled to `max_size`, and a few of them deliberately exceed it.
fn run_bytecode<A>(
    allocator: &mut A,
    arena_size: usize,
    max_size: usize,
    bytecode: &[u8],
) -> Option<()>
where
    A: Allocator + Diagnostics,
{
    let mut sa = ShadowAllocator::new();
    let mut allocs = Vec::<Alloc>::new();
    let mut next_tag = 0_u8;

    let mut it = bytecode.iter().copied();
    loop {
        match it.next()? % 8 {
            0..=2 => {
                let len = u16::from_le_bytes([it.next()?, it.next()?]);
                let size = if len % 4 == 0 {
                    // Ask for exactly the largest free block, which must fit.
                    let largest = largest_free_block(&*allocator);
                    log::trace!("alloc {largest:?} (largest free block)");
                    let Some(size) = largest else {
                        continue;
                    };
                    size.min(max_size)
                } else {
                    usize::from(len) * (max_size + 16) / usize::from(u16::MAX)
                };
                log::trace!("alloc {size}");

                let Some(ptr) = allocator.alloc(size) else {
                    log::trace!(" -> fail");
                    assert!(
                        len % 4 != 0 || largest_free_block(&*allocator).is_none(),
                        "alloc({size}) failed although a block that large is free"
                    );
                    continue;
                };
                log::trace!(" -> {ptr}");
                assert!(size <= max_size, "alloc({size}) beyond {max_size} succeeded");

                let alloc = Alloc {
                    ptr,
                    size,
                    tag: next_tag,
                };
                next_tag = next_tag.wrapping_add(1);
                sa.allocate(ptr.offset()..ptr.offset() + size);
                fill(allocator, &alloc);
                allocs.push(alloc);
            }
            3..=5 => {
                let alloc_i = it.next()?;
                if !allocs.is_empty() {
                    let alloc = allocs.swap_remove(usize::from(alloc_i) % allocs.len());
                    log::trace!("free {alloc:?}");

                    verify(&*allocator, &alloc);
                    allocator.free(alloc.ptr);
                    sa.deallocate(alloc.ptr.offset());
                }
            }
            6..=7 => {
                // Allocating and immediately freeing leaves the free space
                // as it was.
                let len = u16::from_le_bytes([it.next()?, it.next()?]);
                let size = usize::from(len) * max_size / usize::from(u16::MAX);
                let before = allocator.stats().free_bytes;
                if let Some(ptr) = allocator.alloc(size) {
                    log::trace!("alloc-free {size} -> {ptr}");
                    allocator.free(ptr);
                    assert_eq!(allocator.stats().free_bytes, before);
                }
            }
            _ => unreachable!(),
        }

        check(&*allocator, arena_size);
        for alloc in &allocs {
            verify(&*allocator, alloc);
        }
    }
}

#[quickcheck]
fn random_free_list(arena_size: u16, bytecode: Vec<u8>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena_size = OVERHEAD + usize::from(arena_size) % 8192;
    let mut allocator = BoundaryTagFreeList::new(arena_size).unwrap();
    allocator.init().unwrap();
    check(&allocator, arena_size);

    run_bytecode(&mut allocator, arena_size, arena_size - OVERHEAD, &bytecode);
}

#[quickcheck]
fn random_pool(slot_size: u16, slot_count: u8, bytecode: Vec<u8>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let slot_size = 1 + usize::from(slot_size) % 512;
    let slot_count = 1 + usize::from(slot_count) % 64;
    let mut allocator = FixedBlockPool::new(slot_size, slot_count).unwrap();
    allocator.init().unwrap();
    let arena_size = allocator.arena_size();
    let max_size = allocator.slot_size();
    check(&allocator, arena_size);

    run_bytecode(&mut allocator, arena_size, max_size, &bytecode);
    assert!(allocator.used() <= slot_count);
}

#[test]
fn pool_exhaustion_bound() {
    let _ = env_logger::builder().is_test(true).try_init();

    for slot_count in 1..=8 {
        let mut allocator = FixedBlockPool::new(32, slot_count).unwrap();
        allocator.init().unwrap();
        let ptrs = (0..slot_count)
            .map(|_| allocator.alloc(32).unwrap())
            .collect::<Vec<_>>();
        assert!(allocator.alloc(1).is_none());
        assert_eq!(allocator.used(), slot_count);

        for ptr in ptrs {
            allocator.free(ptr);
        }
        check(&allocator, allocator.arena_size());
        assert_eq!(allocator.used(), 0);
    }
}

#[test]
fn free_list_round_trip_restores_free_bytes() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut allocator = BoundaryTagFreeList::new(1024).unwrap();
    allocator.init().unwrap();
    let ptrs = [24, 100, 8, 300].map(|size| allocator.alloc(size).unwrap());
    allocator.free(ptrs[1]);
    allocator.free(ptrs[3]);

    let before = allocator.stats();
    for size in [0, 1, 64, 100, 104, 200, 400] {
        if let Some(ptr) = allocator.alloc(size) {
            allocator.free(ptr);
        }
        let after = allocator.stats();
        assert_eq!(after.free_bytes, before.free_bytes);
        assert_eq!(after.free_blocks, before.free_blocks);
    }
    check(&allocator, 1024);
}
