// This module provides the arena that owns every AST node produced while parsing one
// compilation unit. It wraps two bumpalo chunk chains: the main chain serves ordinary
// requests by bump allocation, and a second chain receives oversized requests (size or
// alignment above a quarter of the configured chunk capacity) so large payloads never
// fragment the main chunks. bumpalo sizes the chunks of a chain itself, starting at the
// configured capacity and doubling as the chain grows, so the chain is ordered but not
// fixed-capacity. Nothing is freed individually; the whole arena is released on drop or
// rewound with reset(). Every request, including each growth of an ArenaVec, is charged
// against the optional allocation limit before it reaches bumpalo, and bumpalo is only
// called through its fallible try_* entry points. Hitting the limit or a refusal from the
// backing allocator both surface as an ArenaError that the parser propagates with `?`,
// aborting the unit cleanly instead of the process. Allocation statistics mirror the
// session statistics kept by the compiler driver.

//! Arena allocation for AST nodes and their variable-length payloads.
//!
//! Every allocation handed out by [`Arena`] stays valid and unmodified for the
//! lifetime of the arena borrow; values are never dropped individually.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::ptr::NonNull;
use thiserror::Error;

/// Default capacity of one chunk in the main chain.
pub const DEFAULT_CHUNK_CAPACITY: usize = 4096;

/// Chunks smaller than this are rounded up.
const MIN_CHUNK_CAPACITY: usize = 64;

/// Capacity of an [`ArenaVec`] after its first growth.
const MIN_LIST_CAPACITY: usize = 4;

/// Arena configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Capacity of a chunk in the main chain (bytes).
    pub chunk_capacity: usize,

    /// Upper bound on the total bytes requested, if any.
    pub allocation_limit: Option<usize>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            allocation_limit: None,
        }
    }
}

/// Arena allocation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("Arena exhausted: {requested} bytes requested with {used} of {limit} bytes in use")]
    Exhausted {
        requested: usize,
        used: usize,
        limit: usize,
    },

    #[error("Backing allocator refused a request for {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Invalid allocation layout: {size} bytes aligned to {align}")]
    InvalidLayout { size: usize, align: usize },
}

fn array_layout<T>(len: usize) -> ArenaResult<Layout> {
    Layout::array::<T>(len).map_err(|_| ArenaError::InvalidLayout {
        size: len.saturating_mul(mem::size_of::<T>()),
        align: mem::align_of::<T>(),
    })
}

fn out_of_memory(layout: Layout) -> ArenaError {
    ArenaError::OutOfMemory {
        requested: layout.size(),
    }
}

/// Result type alias for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;

/// Allocation statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Number of allocation requests served.
    pub allocations: usize,

    /// Requests routed to the oversized chain.
    pub oversized_allocations: usize,

    /// Total bytes requested by callers.
    pub bytes_requested: usize,
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} allocations ({} oversized), {} bytes",
            self.allocations, self.oversized_allocations, self.bytes_requested
        )
    }
}

/// Single-owner bump arena for one compilation unit.
///
/// The arena is not `Sync`; each compilation uses its own instance.
#[derive(Debug)]
pub struct Arena {
    config: ArenaConfig,
    bump: Bump,
    oversized: Bump,
    stats: Cell<ArenaStats>,
}

impl Arena {
    /// Create an arena with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    /// Create an arena with the given configuration.
    pub fn with_config(config: ArenaConfig) -> Self {
        let chunk_capacity = config.chunk_capacity.max(MIN_CHUNK_CAPACITY);
        Self {
            config: ArenaConfig {
                chunk_capacity,
                ..config
            },
            bump: Bump::with_capacity(chunk_capacity),
            oversized: Bump::new(),
            stats: Cell::new(ArenaStats::default()),
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> ArenaConfig {
        self.config
    }

    /// Whether a request with this layout gets a dedicated oversized buffer.
    pub fn is_oversized(&self, layout: Layout) -> bool {
        let threshold = self.config.chunk_capacity / 4;
        layout.size() > threshold || layout.align() > threshold
    }

    /// Check the limit and account for a request of `layout`.
    fn reserve(&self, layout: Layout) -> ArenaResult<()> {
        let mut stats = self.stats.get();
        if let Some(limit) = self.config.allocation_limit {
            if stats.bytes_requested + layout.size() > limit {
                return Err(ArenaError::Exhausted {
                    requested: layout.size(),
                    used: stats.bytes_requested,
                    limit,
                });
            }
        }
        stats.allocations += 1;
        stats.bytes_requested += layout.size();
        self.stats.set(stats);
        Ok(())
    }

    /// Pick the chain that serves `layout`.
    fn chain_for(&self, layout: Layout) -> &Bump {
        if self.is_oversized(layout) {
            let mut stats = self.stats.get();
            stats.oversized_allocations += 1;
            self.stats.set(stats);
            log::trace!("oversized arena request: {} bytes", layout.size());
            &self.oversized
        } else {
            &self.bump
        }
    }

    /// Allocate a raw region of `size` bytes aligned to `align`.
    pub fn allocate(&self, size: usize, align: usize) -> ArenaResult<NonNull<u8>> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| ArenaError::InvalidLayout { size, align })?;
        self.reserve(layout)?;
        self.chain_for(layout)
            .try_alloc_layout(layout)
            .map_err(|_| out_of_memory(layout))
    }

    /// Move `value` into the arena and return a reference to it.
    ///
    /// The value's destructor never runs.
    pub fn alloc<T>(&self, value: T) -> ArenaResult<&mut T> {
        let layout = Layout::new::<T>();
        self.reserve(layout)?;
        self.chain_for(layout)
            .try_alloc(value)
            .map_err(|_| out_of_memory(layout))
    }

    /// Copy a string into the arena.
    pub fn alloc_str(&self, text: &str) -> ArenaResult<&str> {
        let layout = Layout::for_value(text);
        self.reserve(layout)?;
        match self.chain_for(layout).try_alloc_str(text) {
            Ok(copy) => Ok(&*copy),
            Err(_) => Err(out_of_memory(layout)),
        }
    }

    /// Copy a slice into the arena.
    pub fn alloc_slice<T: Copy>(&self, items: &[T]) -> ArenaResult<&[T]> {
        let layout = Layout::for_value(items);
        self.reserve(layout)?;
        match self.chain_for(layout).try_alloc_slice_copy(items) {
            Ok(copy) => Ok(&*copy),
            Err(_) => Err(out_of_memory(layout)),
        }
    }

    /// Start a growable list whose storage lives in the main chain.
    pub fn vec<T>(&self) -> ArenaVec<'_, T> {
        ArenaVec {
            arena: self,
            items: BumpVec::new_in(&self.bump),
        }
    }

    /// Cap the bytes each chain may hold from the global allocator. Requests
    /// that would need a chunk past the cap fail with
    /// [`ArenaError::OutOfMemory`]; `None` lifts the cap.
    pub fn set_backing_limit(&self, limit: Option<usize>) {
        self.bump.set_allocation_limit(limit);
        self.oversized.set_allocation_limit(limit);
    }

    /// Rewind the arena for reuse by another compilation unit.
    ///
    /// Requires exclusive access, so no reference into the arena survives it.
    pub fn reset(&mut self) {
        self.bump.reset();
        self.oversized.reset();
        self.stats.set(ArenaStats::default());
    }

    /// Bytes currently held by both chains, including unused chunk tails.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes() + self.oversized.allocated_bytes()
    }

    /// Allocation statistics since creation or the last reset.
    pub fn stats(&self) -> ArenaStats {
        self.stats.get()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

/// Growable list in the main chain of an [`Arena`].
///
/// Each growth is charged against the arena's allocation limit before the
/// storage moves.
pub struct ArenaVec<'a, T> {
    arena: &'a Arena,
    items: BumpVec<'a, T>,
}

impl<'a, T> ArenaVec<'a, T> {
    pub fn push(&mut self, value: T) -> ArenaResult<()> {
        if self.items.len() == self.items.capacity() {
            self.grow()?;
        }
        self.items.push(value);
        Ok(())
    }

    fn grow(&mut self) -> ArenaResult<()> {
        let capacity = self
            .items
            .capacity()
            .saturating_mul(2)
            .max(MIN_LIST_CAPACITY);
        let layout = array_layout::<T>(capacity)?;
        self.arena.reserve(layout)?;
        self.items
            .try_reserve_exact(capacity - self.items.len())
            .map_err(|_| out_of_memory(layout))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Freeze the list into an arena slice.
    pub fn into_slice(self) -> &'a [T] {
        self.items.into_bump_slice()
    }
}
