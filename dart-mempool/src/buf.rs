use std::collections::HashMap;

use crate::block::BlockId;
use crate::stream::Event;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufStatus {
    Idle,
    Used,
    EagerFree,
    UsedByEvent,
}

/// One `(task_id, event)` recorded for a buf on some user stream.
#[derive(Clone)]
pub struct EventEntry {
    pub task_id: u64,
    pub event: Event,
}

/// A contiguous, aligned range of device memory carved from a block -- the unit of allocation.
/// Bufs are doubly-linked in address order within their owning block via `prev`/`next`.
pub struct MemBuf {
    pub prev: Option<BufId>,
    pub next: Option<BufId>,
    pub block: BlockId,
    pub addr: usize,
    pub size: usize,
    pub stream_id: u64,
    pub status: BufStatus,
    pub owner_tag: Option<String>,
    /// Per user-stream ordered list of outstanding `(task_id, event)` pairs (spec §4.5 "Each buf
    /// carries, per user_stream_id, an ordered list").
    pub event_list: HashMap<u64, Vec<EventEntry>>,
}

impl MemBuf {
    pub fn new(block: BlockId, addr: usize, size: usize, stream_id: u64) -> Self {
        Self {
            prev: None,
            next: None,
            block,
            addr,
            size,
            stream_id,
            status: BufStatus::Used,
            owner_tag: None,
            event_list: HashMap::new(),
        }
    }

    pub fn has_events(&self) -> bool {
        self.event_list.values().any(|v| !v.is_empty())
    }

    pub fn key(&self) -> (usize, usize) {
        (self.size, self.addr)
    }
}
