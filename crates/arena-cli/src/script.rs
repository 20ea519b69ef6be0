//! Operations given on the command line and the session that runs them.

use std::{fmt, num::ParseIntError, str::FromStr};

use arena_alloc::{
    Allocator as _, ArenaPtr,
    config::AnyAllocator,
    diagnostics::Diagnostics as _,
    error::CorruptionError,
};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use snafu_utils::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Alloc(usize),
    Free(usize),
    Blocks,
    Stat,
    FreeList,
    Check,
}

#[derive(Debug, Snafu)]
pub enum ParseOpError {
    #[snafu(display(
        "unknown operation {op:?}, expected alloc:<size>, free:<handle>, blocks, stat, free-list or check"
    ))]
    UnknownOp {
        op: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid number in {op:?}"))]
    ParseNumber {
        op: String,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: ParseIntError,
    },
}

impl FromStr for Op {
    type Err = ParseOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = |value: &str| -> Result<usize, ParseOpError> {
            value.parse().context(ParseNumberSnafu { op: s })
        };
        match s.split_once(':') {
            Some(("alloc", size)) => Ok(Self::Alloc(number(size)?)),
            Some(("free", handle)) => {
                let handle = handle.strip_prefix('#').unwrap_or(handle);
                Ok(Self::Free(number(handle)?))
            }
            Some(_) => UnknownOpSnafu { op: s }.fail(),
            None => match s {
                "blocks" => Ok(Self::Blocks),
                "stat" => Ok(Self::Stat),
                "free-list" => Ok(Self::FreeList),
                "check" => Ok(Self::Check),
                _ => UnknownOpSnafu { op: s }.fail(),
            },
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc(size) => write!(f, "alloc:{size}"),
            Self::Free(handle) => write!(f, "free:#{handle}"),
            Self::Blocks => write!(f, "blocks"),
            Self::Stat => write!(f, "stat"),
            Self::FreeList => write!(f, "free-list"),
            Self::Check => write!(f, "check"),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum RunError {
    #[snafu(display("handle #{handle} was never allocated"))]
    UnknownHandle {
        handle: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("handle #{handle} is already freed"))]
    AlreadyFreed {
        handle: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("the pool strategy has no free list"))]
    NoFreeList {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("allocator is inconsistent"))]
    Inconsistent {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: CorruptionError,
    },
    #[snafu(display("failed to write output"))]
    Write {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: fmt::Error,
    },
}

/// An initialized allocator plus the handles it has given out.
///
/// Handles are numbered in allocation order. A failed `alloc` takes no
/// handle. The session refuses to free a handle twice, which the allocators
/// themselves would not notice.
pub struct Session {
    allocator: AnyAllocator,
    handles: Vec<Option<ArenaPtr>>,
}

impl Session {
    pub fn new(allocator: AnyAllocator) -> Self {
        Self {
            allocator,
            handles: Vec::new(),
        }
    }

    pub fn run(&mut self, op: Op, out: &mut dyn fmt::Write) -> Result<(), RunError> {
        match op {
            Op::Alloc(size) => {
                if let Some(ptr) = self.allocator.alloc(size) {
                    let handle = self.handles.len();
                    self.handles.push(Some(ptr));
                    writeln!(out, "#{handle} = alloc({size}) @{ptr}").context(WriteSnafu)?;
                } else {
                    writeln!(out, "alloc({size}) failed").context(WriteSnafu)?;
                }
            }
            Op::Free(handle) => {
                let slot = self
                    .handles
                    .get_mut(handle)
                    .context(UnknownHandleSnafu { handle })?;
                let ptr = slot.take().context(AlreadyFreedSnafu { handle })?;
                self.allocator.free(ptr);
                writeln!(out, "free(#{handle}) @{ptr}").context(WriteSnafu)?;
            }
            Op::Blocks => self.allocator.dump_blocks(out).context(WriteSnafu)?,
            Op::Stat => self.allocator.dump_stat(out).context(WriteSnafu)?,
            Op::FreeList => {
                let free_list = self.allocator.as_free_list().context(NoFreeListSnafu)?;
                free_list.dump_free_list(out, true).context(WriteSnafu)?;
            }
            Op::Check => {
                self.allocator
                    .check_consistency()
                    .context(InconsistentSnafu)?;
                writeln!(out, "consistent").context(WriteSnafu)?;
            }
        }
        Ok(())
    }

    /// Number of handles that have not been freed.
    pub fn live_handles(&self) -> usize {
        self.handles.iter().flatten().count()
    }

    pub fn finish(mut self) {
        let live = self.live_handles();
        if live > 0 {
            log::info!("releasing arena with {live} live allocations");
        }
        self.allocator.destroy();
    }
}
