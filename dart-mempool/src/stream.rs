//! Per-stream task-id counters and the reusable device-event pool (spec §4.9). Cross-stream
//! `record_event`/`wait_event` delegate straight into `MemoryPool`'s buf bookkeeping (spec §4.5);
//! this module owns only the stream-local state and the event objects themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// The core-size cap on live device events before the pool starts reusing completed ones
/// (spec §4.9).
const DEFAULT_EVENT_POOL_CAP: usize = 32_768;

/// A handle to a device event. Cloning shares the same completion flag; in production this would
/// wrap a real device event handle, but the core only needs to query/signal completion.
#[derive(Clone)]
pub struct Event {
    id: u64,
    completed: Arc<AtomicBool>,
}

impl Event {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking completion check, as the spec's `query_event` does.
    pub fn query(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Blocking wait. On CPU (and in this reference runtime generally) there is no real device
    /// queue to drain, so this simply marks the event complete.
    pub fn sync(&self) {
        self.completed.store(true, Ordering::Release);
    }
}

/// Reuses device events under a cap, round-robining among ones that have completed.
pub struct EventPool {
    cap: usize,
    next_id: u64,
    live: Vec<Event>,
    cursor: usize,
}

impl EventPool {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            next_id: 0,
            live: Vec::new(),
            cursor: 0,
        }
    }

    /// Acquires a fresh (incomplete) event, reusing a completed slot if the pool is at capacity.
    pub fn acquire(&mut self) -> Event {
        if self.live.len() < self.cap {
            let event = Event {
                id: self.next_id,
                completed: Arc::new(AtomicBool::new(false)),
            };
            self.next_id += 1;
            self.live.push(event.clone());
            return event;
        }
        for _ in 0..self.live.len() {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) % self.live.len();
            if self.live[idx].query() {
                self.live[idx].completed.store(false, Ordering::Release);
                return self.live[idx].clone();
            }
        }
        // Every event in the pool is still pending; force the next one and block on it.
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.live.len();
        self.live[idx].sync();
        self.live[idx].completed.store(false, Ordering::Release);
        self.live[idx].clone()
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_POOL_CAP)
    }
}

/// Per-stream task-id counters plus the `(user_stream, mem_stream) -> max task_id` matrix used to
/// order cross-stream waits.
pub struct StreamController {
    counters: Mutex<HashMap<u64, Arc<AtomicU64>>>,
    status: Mutex<HashMap<(u64, u64), u64>>,
    events: Mutex<EventPool>,
}

impl StreamController {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            status: Mutex::new(HashMap::new()),
            events: Mutex::new(EventPool::default()),
        }
    }

    /// Increments and returns the next task id for `stream`.
    pub fn launch(&self, stream_id: u64) -> u64 {
        let mut counters = self.counters.lock().expect("stream controller mutex poisoned");
        let counter = counters.entry(stream_id).or_insert_with(|| Arc::new(AtomicU64::new(0)));
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_task_id(&self, stream_id: u64) -> u64 {
        self.counters
            .lock()
            .expect("stream controller mutex poisoned")
            .get(&stream_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Monotonically raises `status[user][mem]` to at least `task_id`.
    pub fn update(&self, task_id: u64, user_stream: u64, mem_stream: u64) {
        let mut status = self.status.lock().expect("stream controller mutex poisoned");
        let entry = status.entry((user_stream, mem_stream)).or_insert(0);
        *entry = (*entry).max(task_id);
    }

    pub fn observed(&self, user_stream: u64, mem_stream: u64) -> u64 {
        *self
            .status
            .lock()
            .expect("stream controller mutex poisoned")
            .get(&(user_stream, mem_stream))
            .unwrap_or(&0)
    }

    pub fn acquire_event(&self) -> Event {
        self.events.lock().expect("stream controller mutex poisoned").acquire()
    }

    /// Syncs the device, then waits for the latest task id on every stream this controller knows
    /// about.
    pub fn sync_all_streams(&self, mut wait_event: impl FnMut(u64, u64)) {
        let streams: Vec<u64> = self.counters.lock().expect("stream controller mutex poisoned").keys().copied().collect();
        for stream_id in streams {
            let latest = self.latest_task_id(stream_id);
            wait_event(latest, stream_id);
        }
    }
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_increments_monotonically() {
        let controller = StreamController::new();
        assert_eq!(controller.launch(0), 1);
        assert_eq!(controller.launch(0), 2);
        assert_eq!(controller.launch(1), 1);
    }

    #[test]
    fn update_never_lowers_observed_task_id() {
        let controller = StreamController::new();
        controller.update(5, 1, 0);
        controller.update(2, 1, 0);
        assert_eq!(controller.observed(1, 0), 5);
    }

    #[test]
    fn event_pool_reuses_completed_events_round_robin() {
        let mut pool = EventPool::new(2);
        let a = pool.acquire();
        let b = pool.acquire();
        a.sync();
        let c = pool.acquire();
        assert_eq!(c.id(), a.id());
        let _ = b;
    }
}
