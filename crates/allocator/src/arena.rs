//! Backing storage shared by both allocators.
//!
//! An [`Arena`] is one contiguous, zero-initialized byte buffer. Allocators
//! keep their bookkeeping inside it as native-endian `usize` words and hand
//! out [`ArenaPtr`] offsets instead of raw addresses, so every access to the
//! arena goes through a bounds check.

use alloc::{boxed::Box, collections::TryReserveError, vec::Vec};
use core::mem;

use derive_more::Display;
use snafu::ResultExt as _;

use crate::error::{AlreadyInitializedSnafu, InitError, ReleasedSnafu, ReserveArenaSnafu};

/// Size of one bookkeeping word stored in the arena.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Word value meaning "no link" / "no back-reference".
///
/// Offset 0 is a valid block or slot position, so the sentinel has to live at
/// the other end of the range.
pub(crate) const NIL: usize = usize::MAX;

/// A location inside an allocator's arena, measured in bytes from its base.
///
/// This is what [`Allocator::alloc`](crate::Allocator::alloc) returns in
/// place of a raw pointer. It is only meaningful for the allocator that
/// produced it.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{_0:#x}")]
pub struct ArenaPtr(usize);

impl ArenaPtr {
    pub(crate) const fn new(offset: usize) -> Self {
        Self(offset)
    }

    /// Returns the byte offset from the start of the arena.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0
    }
}

pub(crate) struct Arena {
    bytes: Box<[u8]>,
}

impl Arena {
    fn try_new(len: usize) -> Result<Self, TryReserveError> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len)?;
        bytes.resize(len, 0);
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if `offset..offset + len` lies inside the arena.
    pub(crate) fn contains(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.bytes.len())
    }

    /// Reads the bookkeeping word at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the word does not lie entirely inside the arena.
    #[track_caller]
    pub(crate) fn read_word(&self, offset: usize) -> usize {
        assert!(
            self.contains(offset, WORD_SIZE),
            "word read out of arena bounds, offset={offset}, len={}",
            self.len()
        );
        let mut word = [0; WORD_SIZE];
        word.copy_from_slice(&self.bytes[offset..offset + WORD_SIZE]);
        usize::from_ne_bytes(word)
    }

    /// Writes the bookkeeping word at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the word does not lie entirely inside the arena.
    #[track_caller]
    pub(crate) fn write_word(&mut self, offset: usize, value: usize) {
        assert!(
            self.contains(offset, WORD_SIZE),
            "word write out of arena bounds, offset={offset}, len={}",
            self.len()
        );
        self.bytes[offset..offset + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        self.bytes.get_mut(offset..offset.checked_add(len)?)
    }
}

/// Where an allocator is in its `init` / `destroy` lifecycle.
#[derive(Default)]
pub(crate) enum ArenaState {
    #[default]
    Unacquired,
    Live(Arena),
    Released,
}

impl ArenaState {
    /// Reserves a zeroed arena of `len` bytes, lets `format` lay out the
    /// initial bookkeeping in it, and makes it live.
    pub(crate) fn acquire<F>(&mut self, len: usize, format: F) -> Result<(), InitError>
    where
        F: FnOnce(&mut Arena),
    {
        match self {
            Self::Unacquired => {}
            Self::Live(_) => return AlreadyInitializedSnafu.fail(),
            Self::Released => return ReleasedSnafu.fail(),
        }

        let mut arena = Arena::try_new(len).context(ReserveArenaSnafu { len })?;
        format(&mut arena);
        *self = Self::Live(arena);
        Ok(())
    }

    /// Drops the arena, if any. Returns `true` if a live arena was released.
    pub(crate) fn release(&mut self) -> bool {
        matches!(mem::replace(self, Self::Released), Self::Live(_))
    }

    pub(crate) fn get(&self) -> Option<&Arena> {
        match self {
            Self::Live(arena) => Some(arena),
            Self::Unacquired | Self::Released => None,
        }
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut Arena> {
        match self {
            Self::Live(arena) => Some(arena),
            Self::Unacquired | Self::Released => None,
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_access() {
        let mut arena = Arena::try_new(4 * WORD_SIZE).unwrap();
        assert_eq!(arena.read_word(0), 0);

        arena.write_word(WORD_SIZE, NIL);
        arena.write_word(3 * WORD_SIZE, 0x1234);
        assert_eq!(arena.read_word(WORD_SIZE), NIL);
        assert_eq!(arena.read_word(3 * WORD_SIZE), 0x1234);

        // Unaligned offsets are fine: words are copied byte-wise.
        arena.write_word(1, 7);
        assert_eq!(arena.read_word(1), 7);
    }

    #[test]
    #[should_panic(expected = "word read out of arena bounds")]
    fn test_read_past_end() {
        let arena = Arena::try_new(WORD_SIZE).unwrap();
        arena.read_word(1);
    }

    #[test]
    fn test_contains() {
        let arena = Arena::try_new(64).unwrap();
        assert!(arena.contains(0, 64));
        assert!(arena.contains(64, 0));
        assert!(!arena.contains(60, 8));
        assert!(!arena.contains(usize::MAX, 2));
        assert!(arena.bytes(60, 8).is_none());
        assert_eq!(arena.bytes(56, 8).map(<[u8]>::len), Some(8));
    }

    #[test]
    fn test_lifecycle() {
        let mut state = ArenaState::default();
        assert!(state.get().is_none());

        state.acquire(32, |arena| arena.write_word(0, 5)).unwrap();
        assert_eq!(state.get().map(|arena| arena.read_word(0)), Some(5));
        assert!(matches!(
            state.acquire(32, |_| {}),
            Err(InitError::AlreadyInitialized { .. })
        ));

        assert!(state.release());
        assert!(!state.release());
        assert!(state.get_mut().is_none());
        assert!(matches!(
            state.acquire(32, |_| {}),
            Err(InitError::Released { .. })
        ));
    }

    #[test]
    fn test_arena_ptr_display() {
        assert_eq!(ArenaPtr::new(32).to_string(), "0x20");
        assert_eq!(ArenaPtr::new(32).offset(), 32);
    }
}
