//! The dynamic device memory pool (spec §4.5) -- the hardest subsystem in the runtime -- plus the
//! stream/event controller (spec §4.9) that delegates its cross-stream bookkeeping into it.
//!
//! # Modules
//!
//! - `block`: `MemBlock`, the large contiguous region obtained once from the device and carved
//!   into bufs.
//! - `buf`: `MemBuf`, the unit of allocation, and its event-list bookkeeping.
//! - `allocator_set`: `MemBufAllocator`, the per-`(stream, persistence)` free/eager-free sets
//!   used for best-fit lookup.
//! - `pool`: `MemoryPool`, tying the above into the alloc/free/defrag algorithms of spec §4.5,
//!   and implementing `dart_core::Allocator` so `Storage` can allocate through it directly.
//! - `stream`: `StreamController`, per-stream task-id counters and the reusable event pool of
//!   spec §4.9.
//! - `error`: the crate's `Error`/`Result`.

mod allocator_set;
mod block;
mod buf;
mod error;
mod pool;
mod stream;

pub use buf::BufStatus;
pub use error::{Error, Result};
pub use pool::{MemStat, MemoryPool, PoolConfig};
pub use stream::{Event, StreamController};
