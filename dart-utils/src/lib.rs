//! Small helpers shared across the runtime crates that don't deserve a home of their own.
//!
//! - `label`: short random debug names, used when a node or tensor isn't given an explicit one.
//! - `arena`: the scoped bump allocator used by the graph builder for short-lived IR nodes
//!   (spec §4.4). Not used for device memory.

mod arena;
mod label;

pub use arena::BumpArena;
pub use label::Label;
