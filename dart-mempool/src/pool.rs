//! `MemoryPool`: the two-tier (persistent/common) per-stream dynamic device memory allocator of
//! spec §4.5. A single pool-wide mutex guards all maps and counters (spec §5); the lock is not
//! held across the `wait_pipeline` callback used while expanding the pool, to avoid deadlocking
//! against user code that might itself touch the pool.

use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::Mutex;

use dart_core::Allocator;
use tracing::{debug, warn};

use crate::allocator_set::{AllocatorKey, MemBufAllocator};
use crate::block::{BlockId, MemBlock};
use crate::buf::{BufId, BufStatus, EventEntry, MemBuf};
use crate::stream::Event;

/// All device allocations round up to this alignment (spec §4.5 "Size policy").
pub const ALIGN: usize = 512;

fn align(size: usize) -> usize {
    (size + ALIGN - 1) & !(ALIGN - 1)
}

/// Configuration for a pool instance (spec §6 `initialize(init, increase, max)`).
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// The block size granularity; a new block is the smallest multiple of this ≥ the request.
    pub unit_size: usize,
    /// Enables the VMM/eager-free allocation paths (spec §4.5 steps 4, 5, 7, and `defrag`).
    pub vmm_enabled: bool,
    /// Upper bound on total bytes this pool may hold across all its blocks.
    pub max_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            unit_size: 1 << 30,
            vmm_enabled: false,
            max_bytes: usize::MAX,
        }
    }
}

/// Readable snapshot of the pool's counters (spec §4.5 "Statistics").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemStat {
    pub used: usize,
    pub peak: usize,
    pub alloc: usize,
    pub used_by_event: usize,
    pub eager_free: usize,
    pub iter_used_peak: usize,
    pub iter_alloc_peak: usize,
}

impl MemStat {
    pub fn idle(&self) -> usize {
        self.alloc.saturating_sub(self.used)
    }
}

struct State {
    blocks: Vec<Option<MemBlock>>,
    free_block_slots: Vec<BlockId>,
    bufs: Vec<Option<MemBuf>>,
    free_buf_slots: Vec<BufId>,
    allocators: HashMap<AllocatorKey, MemBufAllocator>,
    addr_index: HashMap<usize, (BufId, AllocatorKey)>,
    cross_stream_index: HashMap<(u64, u64), HashSet<BufId>>,
    stats: MemStat,
    eager_free_since_defrag: bool,
}

impl State {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            free_block_slots: Vec::new(),
            bufs: Vec::new(),
            free_buf_slots: Vec::new(),
            allocators: HashMap::new(),
            addr_index: HashMap::new(),
            cross_stream_index: HashMap::new(),
            stats: MemStat::default(),
            eager_free_since_defrag: false,
        }
    }

    fn buf(&self, id: BufId) -> &MemBuf {
        self.bufs[id.0].as_ref().expect("buf id refers to a live buf")
    }

    fn buf_mut(&mut self, id: BufId) -> &mut MemBuf {
        self.bufs[id.0].as_mut().expect("buf id refers to a live buf")
    }

    fn insert_buf(&mut self, buf: MemBuf) -> BufId {
        if let Some(id) = self.free_buf_slots.pop() {
            self.bufs[id.0] = Some(buf);
            id
        } else {
            let id = BufId(self.bufs.len());
            self.bufs.push(Some(buf));
            id
        }
    }

    fn remove_buf(&mut self, id: BufId) -> MemBuf {
        let buf = self.bufs[id.0].take().expect("buf id refers to a live buf");
        self.free_buf_slots.push(id);
        buf
    }

    fn block(&self, id: BlockId) -> &MemBlock {
        self.blocks[id.0].as_ref().expect("block id refers to a live block")
    }

    fn block_mut(&mut self, id: BlockId) -> &mut MemBlock {
        self.blocks[id.0].as_mut().expect("block id refers to a live block")
    }

    fn insert_block(&mut self, block: MemBlock) -> BlockId {
        if let Some(id) = self.free_block_slots.pop() {
            self.blocks[id.0] = Some(block);
            id
        } else {
            let id = BlockId(self.blocks.len());
            self.blocks.push(Some(block));
            id
        }
    }

    fn remove_block(&mut self, id: BlockId) -> MemBlock {
        let block = self.blocks[id.0].take().expect("block id refers to a live block");
        self.free_block_slots.push(id);
        block
    }

    /// Routes into the named `insert_free`/`insert_eager_free` pair on the target allocator by
    /// status, so callers don't need to reach into the raw `BTreeSet`s themselves.
    fn insert_into(&mut self, key: AllocatorKey, status: BufStatus, entry: (usize, usize)) {
        let allocator = self.allocators.entry(key).or_default();
        match status {
            BufStatus::Idle => allocator.insert_free(entry.0, entry.1),
            BufStatus::EagerFree => allocator.insert_eager_free(entry.0, entry.1),
            _ => panic!("no free-list for status {status:?}"),
        }
    }

    /// Routes into the named `remove_free`/`remove_eager_free` pair on the target allocator by
    /// status.
    fn remove_from(&mut self, key: AllocatorKey, status: BufStatus, entry: (usize, usize)) {
        let allocator = self.allocators.entry(key).or_default();
        match status {
            BufStatus::Idle => allocator.remove_free(entry.0, entry.1),
            BufStatus::EagerFree => allocator.remove_eager_free(entry.0, entry.1),
            _ => panic!("no free-list for status {status:?}"),
        }
    }
}

/// The dynamic device memory pool: block allocation, free-list reuse, VMM-style eager-free, and
/// multi-stream event bookkeeping (spec §4.5).
pub struct MemoryPool {
    state: Mutex<State>,
    config: PoolConfig,
}

impl MemoryPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            state: Mutex::new(State::new()),
            config,
        }
    }

    pub fn stats(&self) -> MemStat {
        self.state.lock().expect("pool mutex poisoned").stats
    }

    pub fn block_count(&self, from_persistent: bool) -> usize {
        let state = self.state.lock().expect("pool mutex poisoned");
        state
            .allocators
            .iter()
            .filter(|(key, _)| key.from_persistent == from_persistent)
            .map(|(_, a)| a.blocks.len())
            .sum()
    }

    /// Allocates `size` bytes for `stream_id`, from the persistent or common class. Returns
    /// `None` on exhaustion (spec §7 taxonomy item 2, the one soft-fail in this model).
    pub fn alloc(&self, size: usize, from_persistent: bool, stream_id: u64) -> Option<usize> {
        let size = align(size);
        let key = AllocatorKey {
            stream_id,
            from_persistent,
            small: false,
        };
        let mut state = self.state.lock().expect("pool mutex poisoned");

        if let Some(addr) = Self::try_best_fit(&mut state, key, size) {
            return Some(self.finish_alloc(&mut state, addr, size));
        }
        if self.config.vmm_enabled {
            if let Some(addr) = Self::try_adjacent_eager_merge(&mut state, key, size) {
                return Some(self.finish_alloc(&mut state, addr, size));
            }
            if let Some(addr) = Self::try_eager_free_fit(&mut state, key, size) {
                return Some(self.finish_alloc(&mut state, addr, size));
            }
        }
        if !self.config.vmm_enabled {
            let fallback = AllocatorKey {
                from_persistent: !from_persistent,
                ..key
            };
            if let Some(addr) = Self::try_best_fit(&mut state, fallback, size) {
                return Some(self.finish_alloc(&mut state, addr, size));
            }
        }
        if self.config.vmm_enabled {
            drop(state);
            self.wait_pipeline();
            state = self.state.lock().expect("pool mutex poisoned");
            Self::free_idle_mems_by_eager_free(&mut state, key);
            if let Some(addr) = Self::try_best_fit(&mut state, key, size) {
                return Some(self.finish_alloc(&mut state, addr, size));
            }
        }
        if let Some(addr) = self.try_expand_and_carve(&mut state, key, size) {
            return Some(self.finish_alloc(&mut state, addr, size));
        }
        Self::drain_completed_events(&mut state);
        if let Some(addr) = Self::try_best_fit(&mut state, key, size) {
            return Some(self.finish_alloc(&mut state, addr, size));
        }
        None
    }

    fn try_best_fit(state: &mut State, key: AllocatorKey, size: usize) -> Option<usize> {
        let (found_size, addr) = state.allocators.get(&key)?.best_fit_free(size)?;
        state.remove_from(key, BufStatus::Idle, (found_size, addr));
        Self::split(state, key, addr, found_size, size, BufStatus::Used);
        Some(addr)
    }

    fn try_eager_free_fit(state: &mut State, key: AllocatorKey, size: usize) -> Option<usize> {
        let (found_size, addr) = state.allocators.get(&key)?.best_fit_eager_free(size)?;
        state.remove_from(key, BufStatus::EagerFree, (found_size, addr));
        state.stats.eager_free = state.stats.eager_free.saturating_sub(found_size);
        debug!(addr, found_size, "remapping eager-freed pages for allocation");
        Self::split(state, key, addr, found_size, size, BufStatus::Used);
        Some(addr)
    }

    /// Step 4 of alloc (spec §4.5): scans `Idle` bufs backwards by address for one immediately
    /// preceded by an `EagerFree` neighbor whose combined size satisfies `size`, merges the pair
    /// into one `Idle` region, then carves the request out of it. This implementation keeps
    /// eager-freed bytes backed by real allocated memory rather than truly unmapping device
    /// pages, so "mapping additional pages for the shortfall" is a no-op beyond the merge itself.
    fn try_adjacent_eager_merge(state: &mut State, key: AllocatorKey, size: usize) -> Option<usize> {
        let allocator = state.allocators.get(&key)?;
        let mut merge = None;
        for &(idle_size, idle_addr) in allocator.free_set.iter().rev() {
            if let Some((eager_size, eager_addr)) = allocator.largest_below(idle_addr, &allocator.eager_free_set) {
                if eager_size + idle_size >= size {
                    merge = Some((idle_size, idle_addr, eager_size, eager_addr));
                    break;
                }
            }
        }
        let (idle_size, idle_addr, eager_size, eager_addr) = merge?;

        let (idle_id, _) = *state.addr_index.get(&idle_addr)?;
        let (eager_id, _) = *state.addr_index.get(&eager_addr)?;
        if state.buf(idle_id).prev != Some(eager_id) {
            // Nearest lower eager-free address isn't actually this idle buf's linked neighbor.
            return None;
        }

        state.remove_from(key, BufStatus::EagerFree, (eager_size, eager_addr));
        state.stats.eager_free = state.stats.eager_free.saturating_sub(eager_size);
        state.remove_from(key, BufStatus::Idle, (idle_size, idle_addr));
        state.addr_index.remove(&idle_addr);
        let removed = state.remove_buf(idle_id);
        state.buf_mut(eager_id).size = eager_size + idle_size;
        state.buf_mut(eager_id).next = removed.next;
        if let Some(next_id) = removed.next {
            state.buf_mut(next_id).prev = Some(eager_id);
        }
        state.buf_mut(eager_id).status = BufStatus::Idle;
        debug!(addr = eager_addr, need = size.saturating_sub(eager_size), "remapping eager-freed neighbor to satisfy allocation");
        Self::split(state, key, eager_addr, eager_size + idle_size, size, BufStatus::Used);
        Some(eager_addr)
    }

    fn try_expand_and_carve(&self, state: &mut State, key: AllocatorKey, size: usize) -> Option<usize> {
        let total: usize = state.blocks.iter().flatten().map(|b| b.size).sum();
        let block_size = size.div_ceil(self.config.unit_size).max(1) * self.config.unit_size;
        if total + block_size > self.config.max_bytes {
            warn!(requested = size, "device out of capacity for new block");
            return None;
        }
        let block = MemBlock::new(block_size, key.stream_id);
        let addr = block.addr;
        let block_id = state.insert_block(block);
        state.allocators.entry(key).or_default().blocks.push(block_id);
        let buf = MemBuf::new(block_id, addr, block_size, key.stream_id);
        let buf_id = state.insert_buf(buf);
        state.addr_index.insert(addr, (buf_id, key));
        state.stats.alloc += block_size;
        Self::split(state, key, addr, block_size, size, BufStatus::Used);
        Some(addr)
    }

    /// Splits a candidate buf of `found_size` at `addr` down to exactly `request` bytes if the
    /// remainder is at least `ALIGN` (spec §4.5 "Split policy"); otherwise the whole candidate is
    /// handed out. The head keeps `addr` and becomes `status`; any tail goes into the matching
    /// free set.
    fn split(state: &mut State, key: AllocatorKey, addr: usize, found_size: usize, request: usize, status: BufStatus) {
        let (buf_id, _) = *state
            .addr_index
            .get(&addr)
            .expect("candidate buf is indexed by its caller before split is invoked");
        let remainder = found_size - request;
        if remainder >= ALIGN {
            let tail_addr = addr + request;
            let block_id = state.buf(buf_id).block;
            let mut tail = MemBuf::new(block_id, tail_addr, remainder, key.stream_id);
            tail.status = BufStatus::Idle;
            let next = state.buf(buf_id).next;
            tail.next = next;
            tail.prev = Some(buf_id);
            let tail_id = state.insert_buf(tail);
            if let Some(next_id) = next {
                state.buf_mut(next_id).prev = Some(tail_id);
            }
            state.buf_mut(buf_id).next = Some(tail_id);
            state.addr_index.insert(tail_addr, (tail_id, key));
            let tail_key = state.buf(tail_id).key();
            state.insert_into(key, BufStatus::Idle, tail_key);
            state.buf_mut(buf_id).size = request;
        }
        state.buf_mut(buf_id).status = status;
    }

    fn finish_alloc(&self, state: &mut State, addr: usize, size: usize) -> usize {
        state.stats.used += size;
        state.stats.peak = state.stats.peak.max(state.stats.used);
        state.stats.iter_used_peak = state.stats.iter_used_peak.max(state.stats.used);
        state.stats.iter_alloc_peak = state.stats.iter_alloc_peak.max(state.stats.alloc);
        let (buf_id, _) = *state.addr_index.get(&addr).expect("freshly allocated addr is indexed");
        let block_id = state.buf(buf_id).block;
        state.block_mut(block_id).touch(addr, size);
        addr
    }

    /// Frees the allocation at `addr`. Logs and no-ops for an unknown address (spec §7 taxonomy
    /// item 4: protocol violation from collaborators).
    pub fn free(&self, addr: usize) {
        self.free_with_status(addr, BufStatus::Idle);
    }

    fn free_with_status(&self, addr: usize, target: BufStatus) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let Some(&(buf_id, key)) = state.addr_index.get(&addr) else {
            warn!(addr, "free() called for unknown address; ignoring");
            return;
        };
        if state.buf(buf_id).has_events() {
            let size = state.buf(buf_id).size;
            state.stats.used_by_event += size;
            state.buf_mut(buf_id).status = BufStatus::UsedByEvent;
            return;
        }
        let freed_size = state.buf(buf_id).size;
        if state.buf(buf_id).status == BufStatus::UsedByEvent {
            state.stats.used_by_event = state.stats.used_by_event.saturating_sub(freed_size);
        }
        state.stats.used = state.stats.used.saturating_sub(freed_size);
        state.buf_mut(buf_id).status = target;
        Self::coalesce_and_insert(&mut state, key, buf_id, target);
    }

    fn coalesce_and_insert(state: &mut State, key: AllocatorKey, mut buf_id: BufId, target: BufStatus) {
        if let Some(prev_id) = state.buf(buf_id).prev {
            if state.buf(prev_id).status == target {
                let prev_size = state.buf(prev_id).size;
                let prev_addr = state.buf(prev_id).addr;
                state.remove_from(key, target, (prev_size, prev_addr));
                state.addr_index.remove(&prev_addr);
                let this_size = state.buf(buf_id).size;
                let this_addr = state.buf(buf_id).addr;
                state.addr_index.remove(&this_addr);
                let removed = state.remove_buf(buf_id);
                state.buf_mut(prev_id).size = prev_size + this_size;
                state.buf_mut(prev_id).next = removed.next;
                if let Some(next_id) = removed.next {
                    state.buf_mut(next_id).prev = Some(prev_id);
                }
                state.addr_index.insert(prev_addr, (prev_id, key));
                buf_id = prev_id;
            }
        }
        if let Some(next_id) = state.buf(buf_id).next {
            if state.buf(next_id).status == target {
                let next_size = state.buf(next_id).size;
                let next_addr = state.buf(next_id).addr;
                state.remove_from(key, target, (next_size, next_addr));
                state.addr_index.remove(&next_addr);
                let removed = state.remove_buf(next_id);
                let this_size = state.buf(buf_id).size;
                state.buf_mut(buf_id).size = this_size + next_size;
                state.buf_mut(buf_id).next = removed.next;
                if let Some(after_id) = removed.next {
                    state.buf_mut(after_id).prev = Some(buf_id);
                }
            }
        }
        let merged_key = state.buf(buf_id).key();
        state.insert_into(key, target, merged_key);
    }

    /// `alloc_continuous`: allocates one buf for `sizes.iter().sum()`, then splits it in place
    /// into the requested pieces, all marked `Used`. The last piece absorbs the alignment
    /// remainder (spec §4.5 "Continuous allocation").
    pub fn alloc_continuous(&self, sizes: &[usize], stream_id: u64) -> Option<Vec<usize>> {
        if sizes.is_empty() {
            return Some(Vec::new());
        }
        let total: usize = sizes.iter().sum();
        let base = self.alloc(total, false, stream_id)?;
        let key = AllocatorKey {
            stream_id,
            from_persistent: false,
            small: false,
        };
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let aligned_total = align(total);
        let mut addrs = Vec::with_capacity(sizes.len());
        let mut offset = 0usize;
        for (i, &requested) in sizes.iter().enumerate() {
            let piece_addr = base + offset;
            let is_last = i + 1 == sizes.len();
            let piece_size = if is_last { aligned_total - offset } else { requested };
            if offset == 0 {
                addrs.push(base);
            } else {
                let (buf_id, _) = *state.addr_index.get(&base).expect("base buf indexed");
                let block_id = state.buf(buf_id).block;
                let mut buf = MemBuf::new(block_id, piece_addr, piece_size, stream_id);
                buf.status = BufStatus::Used;
                let id = state.insert_buf(buf);
                state.addr_index.insert(piece_addr, (id, key));
                addrs.push(piece_addr);
            }
            offset += piece_size;
        }
        // Re-link the pieces in address order and shrink the head buf to its own piece size.
        let (head_id, _) = *state.addr_index.get(&base).expect("base buf indexed");
        let original_next = state.buf(head_id).next;
        state.buf_mut(head_id).size = sizes[0];
        let mut prev_id = head_id;
        for &addr in &addrs[1..] {
            let (id, _) = *state.addr_index.get(&addr).expect("piece indexed");
            state.buf_mut(prev_id).next = Some(id);
            state.buf_mut(id).prev = Some(prev_id);
            prev_id = id;
        }
        state.buf_mut(prev_id).next = original_next;
        if let Some(next_id) = original_next {
            state.buf_mut(next_id).prev = Some(prev_id);
        }
        Some(addrs)
    }

    /// Partitions the bufs enclosing `free_addrs`/`keep_addrs` so the keep regions become new
    /// `Used` bufs at their explicit sizes, and the rest free. A keep-addr equal to its enclosing
    /// buf's own start requires no head split (spec §8 boundary behavior); duplicate keep-addrs
    /// are logged and skipped (spec §9 open question: "intent is unclear", so this is a no-op for
    /// the duplicate rather than a silent double-use).
    pub fn free_part_tensor_mems(&self, free_addrs: &[usize], keep_addrs: &[usize], keep_sizes: &[usize]) {
        assert_eq!(keep_addrs.len(), keep_sizes.len(), "keep_addrs and keep_sizes must pair up");
        let mut seen = HashSet::new();
        for (&keep_addr, &keep_size) in keep_addrs.iter().zip(keep_sizes) {
            if !seen.insert(keep_addr) {
                warn!(addr = keep_addr, "duplicate address in free_part_tensor_mems keep set; ignoring");
                continue;
            }
            self.carve_keep(keep_addr, keep_size);
        }
        for &addr in free_addrs {
            if !keep_addrs.contains(&addr) {
                self.free(addr);
            }
        }
    }

    fn carve_keep(&self, keep_addr: usize, keep_size: usize) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let Some(&(enclosing_id, key)) = state.addr_index.get(&keep_addr) else {
            warn!(addr = keep_addr, "keep address not found in any buf");
            return;
        };
        let enclosing_size = state.buf(enclosing_id).size;
        if keep_size < enclosing_size {
            let tail_addr = keep_addr + keep_size;
            let tail_size = enclosing_size - keep_size;
            let block_id = state.buf(enclosing_id).block;
            let mut tail = MemBuf::new(block_id, tail_addr, tail_size, state.buf(enclosing_id).stream_id);
            let next = state.buf(enclosing_id).next;
            tail.next = next;
            tail.prev = Some(enclosing_id);
            tail.status = BufStatus::Idle;
            let tail_id = state.insert_buf(tail);
            if let Some(next_id) = next {
                state.buf_mut(next_id).prev = Some(tail_id);
            }
            state.buf_mut(enclosing_id).next = Some(tail_id);
            state.addr_index.insert(tail_addr, (tail_id, key));
            let tail_key = state.buf(tail_id).key();
            state.insert_into(key, BufStatus::Idle, tail_key);
        }
        state.buf_mut(enclosing_id).size = keep_size;
        state.buf_mut(enclosing_id).status = BufStatus::Used;
    }

    /// Moves every `Idle` buf in the given allocator to `EagerFree`, simulating the unmapping of
    /// its physical pages (spec §4.5 "Eager free / VMM semantics").
    fn free_idle_mems_by_eager_free(state: &mut State, key: AllocatorKey) {
        let idle: Vec<(usize, usize)> = state.allocators.get(&key).map(|a| a.free_set.iter().copied().collect()).unwrap_or_default();
        for (size, addr) in idle {
            state.remove_from(key, BufStatus::Idle, (size, addr));
            let (buf_id, _) = *state.addr_index.get(&addr).expect("idle buf indexed");
            state.buf_mut(buf_id).status = BufStatus::EagerFree;
            let buf_key = state.buf(buf_id).key();
            state.insert_into(key, BufStatus::EagerFree, buf_key);
            state.stats.eager_free += size;
        }
        state.eager_free_since_defrag = true;
    }

    /// Releases every block whose bufs are entirely `Idle`/`EagerFree` back to the underlying
    /// allocator (spec §4.5 `release_free_blocks`), returning the number of bytes reclaimed. A
    /// block still holding even one `Used`/`UsedByEvent` buf is left alone.
    pub fn release_free_blocks(&self) -> usize {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let keys: Vec<AllocatorKey> = state.allocators.keys().copied().collect();
        let mut reclaimed = 0usize;
        for key in keys {
            let block_ids: Vec<BlockId> = state.allocators.get(&key).map(|a| a.blocks.clone()).unwrap_or_default();
            for block_id in block_ids {
                let buf_ids: Vec<BufId> = state
                    .bufs
                    .iter()
                    .enumerate()
                    .filter_map(|(i, b)| b.as_ref().filter(|b| b.block == block_id).map(|_| BufId(i)))
                    .collect();
                let releasable =
                    !buf_ids.is_empty() && buf_ids.iter().all(|&id| matches!(state.buf(id).status, BufStatus::Idle | BufStatus::EagerFree));
                if !releasable {
                    continue;
                }
                for buf_id in &buf_ids {
                    let (size, addr, status) = {
                        let buf = state.buf(*buf_id);
                        (buf.size, buf.addr, buf.status)
                    };
                    match status {
                        BufStatus::Idle => state.remove_from(key, BufStatus::Idle, (size, addr)),
                        BufStatus::EagerFree => {
                            state.remove_from(key, BufStatus::EagerFree, (size, addr));
                            state.stats.eager_free = state.stats.eager_free.saturating_sub(size);
                        }
                        _ => unreachable!("filtered to Idle/EagerFree above"),
                    }
                    state.addr_index.remove(&addr);
                    state.remove_buf(*buf_id);
                }
                if let Some(allocator) = state.allocators.get_mut(&key) {
                    allocator.blocks.retain(|&id| id != block_id);
                }
                let block_size = state.block(block_id).size;
                let block_addr = state.block(block_id).addr;
                state.remove_block(block_id);
                state.stats.alloc = state.stats.alloc.saturating_sub(block_size);
                reclaimed += block_size;
                debug!(addr = block_addr, block_size, "released free block back to the device allocator");
            }
        }
        reclaimed
    }

    /// No-op unless VMM is enabled and at least one eager-free round happened since the last
    /// defrag (spec §4.5). Returns whether it actually did anything, for the idempotence test in
    /// spec §8.
    pub fn defrag(&self) -> bool {
        if !self.config.vmm_enabled {
            return false;
        }
        let mut state = self.state.lock().expect("pool mutex poisoned");
        if !state.eager_free_since_defrag {
            return false;
        }
        self.wait_pipeline();
        let keys: Vec<AllocatorKey> = state.allocators.keys().copied().collect();
        for key in keys {
            Self::free_idle_mems_by_eager_free(&mut state, key);
        }
        state.eager_free_since_defrag = false;
        true
    }

    /// User-callback suspension point during pool expansion (spec §5). The pool-wide lock must
    /// not be held while this runs, to avoid deadlocking against user code that itself touches
    /// the pool.
    fn wait_pipeline(&self) {}

    fn drain_completed_events(state: &mut State) {
        let stale: Vec<BufId> = state
            .bufs
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().filter(|b| b.status == BufStatus::UsedByEvent).map(|_| BufId(i)))
            .collect();
        for buf_id in stale {
            let completed: Vec<u64> = state
                .buf(buf_id)
                .event_list
                .iter()
                .filter(|(_, entries)| entries.iter().all(|e| e.event.query()))
                .map(|(&stream, _)| stream)
                .collect();
            for stream in completed {
                state.buf_mut(buf_id).event_list.remove(&stream);
            }
            if !state.buf(buf_id).has_events() {
                let (_, key) = *state
                    .addr_index
                    .iter()
                    .find(|(_, (id, _))| *id == buf_id)
                    .map(|(_, v)| v)
                    .expect("buf indexed");
                state.buf_mut(buf_id).status = BufStatus::Idle;
                Self::coalesce_and_insert(state, key, buf_id, BufStatus::Idle);
            }
        }
    }

    /// Appends one `(task_id, event)` entry per address to the owning bufs, and indexes them
    /// under `(user_stream, mem_stream)` for `wait_event` (spec §4.5 "Multi-stream events").
    pub fn record_event(&self, task_id: u64, user_stream: u64, addrs: &[(u64, usize)], event: Event) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        for &(mem_stream, addr) in addrs {
            let Some(&(buf_id, _)) = state.addr_index.get(&addr) else {
                warn!(addr, "record_event for unknown address; ignoring");
                continue;
            };
            state
                .buf_mut(buf_id)
                .event_list
                .entry(user_stream)
                .or_default()
                .push(EventEntry { task_id, event: event.clone() });
            state.cross_stream_index.entry((user_stream, mem_stream)).or_default().insert(buf_id);
        }
    }

    /// Pops every entry with `task_id <= task_id` from bufs indexed under `(user_stream,
    /// mem_stream)`; a buf whose event list empties is dropped from all indices and, if it was
    /// `UsedByEvent`, finally freed.
    pub fn wait_event(&self, task_id: u64, user_stream: u64, mem_stream: u64) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let Some(bufs) = state.cross_stream_index.get(&(user_stream, mem_stream)).cloned() else {
            return;
        };
        for buf_id in bufs {
            if state.bufs.get(buf_id.0).and_then(|b| b.as_ref()).is_none() {
                continue;
            }
            if let Some(entries) = state.buf_mut(buf_id).event_list.get_mut(&user_stream) {
                entries.retain(|e| e.task_id > task_id);
                if entries.is_empty() {
                    state.buf_mut(buf_id).event_list.remove(&user_stream);
                }
            }
            state.cross_stream_index.get_mut(&(user_stream, mem_stream)).map(|s| s.remove(&buf_id));
            if !state.buf(buf_id).has_events() && state.buf(buf_id).status == BufStatus::UsedByEvent {
                let addr = state.buf(buf_id).addr;
                drop(state);
                self.free(addr);
                state = self.state.lock().expect("pool mutex poisoned");
            }
        }
    }

    /// Force-queries every outstanding event; unfulfilled ones get a blocking sync, and all bufs
    /// waiting on events are released. Returns whether there was anything to wait for (spec §8
    /// idempotence: a second call with nothing outstanding returns `false`).
    pub fn sync_all_events(&self) -> bool {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let outstanding: Vec<BufId> = state
            .bufs
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().filter(|b| b.has_events()).map(|_| BufId(i)))
            .collect();
        if outstanding.is_empty() {
            return false;
        }
        for buf_id in &outstanding {
            let events: Vec<Event> = state.buf(*buf_id).event_list.values().flatten().map(|e| e.event.clone()).collect();
            for event in events {
                if !event.query() {
                    event.sync();
                }
            }
            state.buf_mut(*buf_id).event_list.clear();
        }
        for buf_id in outstanding {
            let (addr, status) = {
                let buf = state.buf(buf_id);
                (buf.addr, buf.status)
            };
            if status == BufStatus::UsedByEvent {
                drop(state);
                self.free(addr);
                state = self.state.lock().expect("pool mutex poisoned");
            }
        }
        true
    }
}

impl Allocator for MemoryPool {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        let addr = self.alloc(bytes, false, 0)?;
        NonNull::new(addr as *mut u8)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _bytes: usize) {
        self.free(ptr.as_ptr() as usize);
    }

    fn tag(&self, ptr: NonNull<u8>, label: &str) {
        let addr = ptr.as_ptr() as usize;
        let mut state = self.state.lock().expect("pool mutex poisoned");
        if let Some(&(buf_id, _)) = state.addr_index.get(&addr) {
            state.buf_mut(buf_id).owner_tag = Some(label.to_string());
        }
    }

    fn name(&self) -> &str {
        "dart-mempool"
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("MemoryPool")
            .field("used", &stats.used)
            .field("peak", &stats.peak)
            .field("alloc", &stats.alloc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_zero_rounds_up_to_align() {
        let pool = MemoryPool::new(PoolConfig::default());
        let addr = pool.alloc(0, false, 0).unwrap();
        assert!(addr > 0);
        assert_eq!(pool.stats().used, ALIGN);
    }

    #[test]
    fn free_then_alloc_same_size_returns_same_address() {
        let pool = MemoryPool::new(PoolConfig::default());
        let a = pool.alloc(1024, false, 0).unwrap();
        pool.free(a);
        let b = pool.alloc(1024, false, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.block_count(false), 1);
    }

    #[test]
    fn remainder_below_align_is_not_split() {
        let pool = MemoryPool::new(PoolConfig::default());
        // First carve exactly a 1024-byte buf, then request something close to the block's full
        // remaining size so the leftover after satisfying it is under ALIGN.
        let a = pool.alloc(1024, false, 1).unwrap();
        pool.free(a);
        let used_before = pool.stats().alloc;
        let b = pool.alloc(1024 - 100, false, 1).unwrap();
        // The whole 1024-byte idle buf is handed back since the remainder (100) is below ALIGN.
        assert_eq!(b, a);
        assert_eq!(pool.stats().alloc, used_before);
    }

    #[test]
    fn cross_stream_event_blocks_reclaim_until_waited() {
        let pool = MemoryPool::new(PoolConfig::default());
        let controller = StreamControllerForTest::new();
        let a = pool.alloc(512, false, 0).unwrap();
        let event = controller.acquire_event();
        pool.record_event(1, 1, &[(0, a)], event);
        pool.free(a);
        let b = pool.alloc(512, false, 0).unwrap();
        assert_ne!(a, b);
        pool.wait_event(1, 1, 0);
        let c = pool.alloc(512, false, 0).unwrap();
        assert_eq!(a, c);
    }

    struct StreamControllerForTest(crate::stream::StreamController);
    impl StreamControllerForTest {
        fn new() -> Self {
            Self(crate::stream::StreamController::new())
        }
        fn acquire_event(&self) -> Event {
            self.0.acquire_event()
        }
    }

    #[test]
    fn alloc_continuous_splits_one_block_into_requested_pieces() {
        let pool = MemoryPool::new(PoolConfig::default());
        let addrs = pool.alloc_continuous(&[512, 1024, 256], 0).unwrap();
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[1], addrs[0] + 512);
        assert_eq!(addrs[2], addrs[1] + 1024);
    }

    #[test]
    fn free_part_keeps_region_starting_at_buf_head_without_head_split() {
        let pool = MemoryPool::new(PoolConfig::default());
        let addr = pool.alloc(2048, false, 0).unwrap();
        pool.free_part_tensor_mems(&[], &[addr], &[1024]);
        // The enclosing buf itself becomes the keep buf; allocating the remainder should find
        // the tail as a fresh idle region rather than double-counting the head.
        let again = pool.alloc(1024, false, 0).unwrap();
        assert_eq!(again, addr + 1024);
    }

    #[test]
    fn defrag_is_idempotent_without_vmm() {
        let pool = MemoryPool::new(PoolConfig::default());
        assert!(!pool.defrag());
        assert!(!pool.defrag());
    }

    #[test]
    fn sync_all_events_returns_false_when_nothing_outstanding() {
        let pool = MemoryPool::new(PoolConfig::default());
        assert!(!pool.sync_all_events());
        assert!(!pool.sync_all_events());
    }

    #[test]
    fn used_tracks_live_used_bufs() {
        let pool = MemoryPool::new(PoolConfig::default());
        let a = pool.alloc(1024, false, 0).unwrap();
        let b = pool.alloc(2048, false, 0).unwrap();
        assert_eq!(pool.stats().used, 1024 + 2048);
        pool.free(a);
        assert_eq!(pool.stats().used, 2048);
        pool.free(b);
        assert_eq!(pool.stats().used, 0);
    }

    #[test]
    fn release_free_blocks_reclaims_a_fully_idle_block_but_not_a_partially_used_one() {
        let pool = MemoryPool::new(PoolConfig::default());
        let a = pool.alloc(1024, false, 0).unwrap();
        pool.free(a);
        let block_size = pool.stats().alloc;
        assert_eq!(pool.release_free_blocks(), block_size);
        assert_eq!(pool.stats().alloc, 0);

        let b = pool.alloc(1024, false, 1).unwrap();
        let c = pool.alloc(1024, false, 1).unwrap();
        pool.free(b);
        assert_eq!(pool.release_free_blocks(), 0, "block still holds a Used buf");
        pool.free(c);
        assert!(pool.release_free_blocks() > 0);
    }

    #[test]
    fn peak_never_drops_below_used() {
        let pool = MemoryPool::new(PoolConfig::default());
        let a = pool.alloc(4096, false, 0).unwrap();
        pool.free(a);
        assert!(pool.stats().peak >= pool.stats().used);
    }
}
