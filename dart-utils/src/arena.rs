//! A scoped bump allocator (spec §4.4) used by the graph builder's front end for short-lived
//! AST/IR nodes when no heap-managed, ref-counted graph is needed yet. It is never used for
//! device memory -- that's `dart_mempool::MemoryPool`'s job.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::ptr::NonNull;

/// A contiguous byte pool with a bump cursor. `alloc` carves interior pointers out of the pool;
/// there is no way to free an individual allocation, only the whole arena on drop.
pub struct BumpArena {
    base: NonNull<u8>,
    capacity: usize,
    used: Cell<usize>,
    layout: Layout,
}

/// Raised when a request would overflow the arena's remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaExhausted {
    pub requested: usize,
    pub remaining: usize,
}

impl std::fmt::Display for ArenaExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bump arena exhausted: requested {} bytes, {} remaining",
            self.requested, self.remaining
        )
    }
}

impl std::error::Error for ArenaExhausted {}

impl BumpArena {
    /// Creates a new arena with the given byte capacity.
    pub fn new(capacity: usize) -> Self {
        let layout = Layout::from_size_align(capacity.max(1), align_of::<usize>()).expect("valid arena layout");
        let base = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(base).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self {
            base,
            capacity,
            used: Cell::new(0),
            layout,
        }
    }

    /// Bytes already handed out.
    pub fn used(&self) -> usize {
        self.used.get()
    }

    /// Total byte capacity of the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bumps the cursor by `size` bytes (aligned to `align`) and returns a pointer to the start
    /// of the carved region. Fails if the arena doesn't have `size` bytes left.
    pub fn alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, ArenaExhausted> {
        let used = self.used.get();
        let aligned = align_up(used, align);
        let end = aligned.checked_add(size).expect("arena offset overflow");
        if end > self.capacity {
            return Err(ArenaExhausted {
                requested: size,
                remaining: self.capacity.saturating_sub(used),
            });
        }
        self.used.set(end);
        // SAFETY: `aligned..end` lies within `[0, capacity)`, which is the region backing `base`.
        let ptr = unsafe { self.base.as_ptr().add(aligned) };
        Ok(NonNull::new(ptr).expect("offset of a non-null base is non-null"))
    }

    /// Typed convenience wrapper around `alloc` for `T`.
    pub fn alloc_typed<T>(&self) -> Result<NonNull<T>, ArenaExhausted> {
        let ptr = self.alloc(size_of::<T>(), align_of::<T>())?;
        Ok(ptr.cast())
    }
}

fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

impl Drop for BumpArena {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated with `layout` in `new` and nothing outlives the arena.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

fn size_of<T>() -> usize {
    std::mem::size_of::<T>()
}

fn align_of<T>() -> usize {
    std::mem::align_of::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumps_cursor_and_returns_distinct_regions() {
        let arena = BumpArena::new(64);
        let a = arena.alloc(16, 8).unwrap();
        let b = arena.alloc(16, 8).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert_eq!(arena.used(), 32);
    }

    #[test]
    fn fails_when_capacity_exceeded() {
        let arena = BumpArena::new(8);
        assert!(arena.alloc(4, 1).is_ok());
        let err = arena.alloc(8, 1).unwrap_err();
        assert_eq!(err.requested, 8);
        assert_eq!(err.remaining, 4);
    }

    #[test]
    fn respects_alignment() {
        let arena = BumpArena::new(32);
        let _ = arena.alloc(1, 1).unwrap();
        let aligned = arena.alloc(8, 8).unwrap();
        assert_eq!(aligned.as_ptr() as usize % 8, 0);
    }
}
