use std::collections::BTreeSet;

use crate::block::BlockId;

/// Selects one `MemBufAllocator` out of the pool: each distinct stream/persistence-class pair
/// gets its own block list and free sets (spec §4.5). `small` is carried for parity with the
/// source design's small-object pool even though this implementation doesn't special-case it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocatorKey {
    pub stream_id: u64,
    pub from_persistent: bool,
    pub small: bool,
}

/// Per-`(stream, persistence, size-class)` allocator state: the blocks it owns, and its
/// `Idle`/`EagerFree` bufs sorted by `(size, addr)` for best-fit lookup.
#[derive(Default)]
pub struct MemBufAllocator {
    pub blocks: Vec<BlockId>,
    pub free_set: BTreeSet<(usize, usize)>,
    pub eager_free_set: BTreeSet<(usize, usize)>,
}

impl MemBufAllocator {
    /// Smallest `(size, addr)` entry with `size >= request`.
    pub fn best_fit_free(&self, request: usize) -> Option<(usize, usize)> {
        self.free_set.range((request, 0)..).next().copied()
    }

    pub fn best_fit_eager_free(&self, request: usize) -> Option<(usize, usize)> {
        self.eager_free_set.range((request, 0)..).next().copied()
    }

    pub fn insert_free(&mut self, size: usize, addr: usize) {
        self.free_set.insert((size, addr));
    }

    pub fn remove_free(&mut self, size: usize, addr: usize) {
        self.free_set.remove(&(size, addr));
    }

    pub fn insert_eager_free(&mut self, size: usize, addr: usize) {
        self.eager_free_set.insert((size, addr));
    }

    pub fn remove_eager_free(&mut self, size: usize, addr: usize) {
        self.eager_free_set.remove(&(size, addr));
    }

    /// The buf immediately preceding `addr` in address order among `Idle`/`EagerFree` candidates
    /// of a given size class, scanning backwards for a VMM-style adjacent-merge candidate.
    pub fn largest_below(&self, addr: usize, set: &BTreeSet<(usize, usize)>) -> Option<(usize, usize)> {
        set.iter().rev().find(|&&(_, a)| a < addr).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_fit_prefers_smallest_sufficient_entry() {
        let mut allocator = MemBufAllocator::default();
        allocator.insert_free(2048, 100);
        allocator.insert_free(1024, 50);
        allocator.insert_free(4096, 200);
        assert_eq!(allocator.best_fit_free(1000), Some((1024, 50)));
        assert_eq!(allocator.best_fit_free(1500), Some((2048, 100)));
        assert_eq!(allocator.best_fit_free(5000), None);
    }
}
