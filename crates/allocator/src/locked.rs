use spin::{Mutex, MutexGuard};

use crate::{Allocator, ArenaPtr};

/// An allocator shared through `&self`, serialized by a spin lock.
///
/// The allocators themselves assume exclusive access. This wrapper is the
/// external lock that makes one instance usable from several threads.
///
/// ```
/// # use arena_alloc::{Allocator as _, LockedAllocator, fixed_block_pool::FixedBlockPool};
/// let pool = LockedAllocator::new(FixedBlockPool::new(64, 4).unwrap());
/// pool.lock().init().unwrap();
///
/// let ptr = pool.alloc(16).unwrap();
/// pool.free(ptr);
/// ```
#[derive(Debug, Default)]
pub struct LockedAllocator<A> {
    inner: Mutex<A>,
}

impl<A> LockedAllocator<A> {
    #[must_use]
    pub const fn new(allocator: A) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    /// Locks the allocator for a sequence of operations, such as filling a
    /// payload right after allocating it.
    pub fn lock(&self) -> MutexGuard<'_, A> {
        self.inner.lock()
    }

    #[must_use]
    pub fn into_inner(self) -> A {
        self.inner.into_inner()
    }
}

impl<A> LockedAllocator<A>
where
    A: Allocator,
{
    pub fn alloc(&self, size: usize) -> Option<ArenaPtr> {
        self.lock().alloc(size)
    }

    pub fn free(&self, ptr: ArenaPtr) {
        self.lock().free(ptr);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{boundary_tag::BoundaryTagFreeList, diagnostics::Diagnostics as _};

    #[test]
    fn test_shared_between_threads() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut allocator = BoundaryTagFreeList::new(64 * 1024).unwrap();
        allocator.init().unwrap();
        let allocator = LockedAllocator::new(allocator);

        thread::scope(|s| {
            for tag in 0..4_u8 {
                let allocator = &allocator;
                s.spawn(move || {
                    let mut ptrs = Vec::new();
                    for round in 0..50 {
                        let size = 16 + usize::from(tag) * 8 + round % 5;
                        let ptr = allocator.alloc(size).unwrap();
                        allocator.lock().payload_mut(ptr).unwrap()[..size].fill(tag);
                        ptrs.push((ptr, size));
                    }
                    for (ptr, size) in ptrs {
                        let guard = allocator.lock();
                        assert!(guard.payload(ptr).unwrap()[..size].iter().all(|&b| b == tag));
                        drop(guard);
                        allocator.free(ptr);
                    }
                });
            }
        });

        let allocator = allocator.into_inner();
        allocator.check_consistency().unwrap();
        let stats = allocator.stats();
        assert_eq!(stats.alloc_count, 200);
        assert_eq!(stats.free_count, 200);
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
    }
}
