//! Graph IR, pass manager, executor, tensor recycler, and the `Runtime` façade that ties graph
//! construction to execution (spec §4.3, §4.6-§4.9).
//!
//! # Modules
//!
//! - `node`/`graph`: the arena-indexed IR (`NodeId`, `Node`, `Graph`) and its doubly-linked node
//!   order, grounded on `tengu-graph::node`/`tengu-graph::graph`.
//! - `pass`: the `NodePass` trait and the fixed-point `PassManager`, grounded on
//!   `tengu-graph`'s rewrite-pass plumbing.
//! - `executor`: `ExecutorBuilder`'s last-consumer analysis and `Executor`'s serial/DAG-parallel
//!   dispatch, grounded on `tengu-graph::graph::executor`.
//! - `recycler`: the alternative ref-count tensor recycler named in spec §4.9.
//! - `runtime`: `Runtime`, the user-facing façade (`begin_graph`/`optimize`/`run`, ...).
//! - `config`: the `DART_THREAD_POOL_SIZE` singleton.
//! - `error`: the crate's `Error`/`Result`.

mod config;
mod error;
mod executor;
mod graph;
mod node;
mod pass;
mod recycler;
mod runtime;

pub use error::{Error, Result};
pub use executor::{Executor, ExecutorBuilder, OpRunner};
pub use graph::Graph;
pub use node::{Node, NodeId};
pub use pass::{register, NodePass, PassManager};
pub use recycler::TensorRecycler;
pub use runtime::Runtime;
