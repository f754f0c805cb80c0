//! The opcode catalog and kernel-library interface (spec §4.10): the seam between the graph
//! executor and whatever device-specific compute code backs it.
//!
//! # Modules
//!
//! - `opcode`: the closed `Opcode` enum shared by the IR and the executor.
//! - `kernel`: the `Kernel` trait, the per-node compute object a library hands back.
//! - `kernel_lib`: the `KernelLib` trait, a loadable collection of kernel factories.
//! - `registry`: the process-wide name -> library registry and `DART_KERNEL_LIB_NAME` lookup.
//! - `dummy`: the built-in no-op library used when no real one is registered.
//! - `error`: the crate's `Error`/`Result`.

mod dummy;
mod error;
mod kernel;
mod kernel_lib;
mod opcode;
mod registry;

pub use dummy::DummyLib;
pub use error::{Error, Result};
pub use kernel::Kernel;
pub use kernel_lib::KernelLib;
pub use opcode::Opcode;
pub use registry::{active, lookup, register, KERNEL_LIB_NAME_VAR, KERNEL_LIB_PATH_VAR};
