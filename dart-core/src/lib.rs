//! Core data model of the dart inference runtime: the tagged `Value` sum type, device `Storage`
//! and the `Allocator` trait it allocates/frees through, and the `Tensor` handle built on top of
//! it. Everything in this crate is allocation-and-layout bookkeeping; no kernel ever launches
//! from here.
//!
//! # Modules
//!
//! - `allocator`: the `Allocator` trait the core calls into for device bytes. Concrete pools
//!   (e.g. `dart_mempool::MemoryPool`) implement it; the core never allocates directly.
//! - `device`: the `Device` identifier tensors and storages are pinned to.
//! - `dtype`: the element type enum and its byte size.
//! - `format`: the memory layout tag (`ND`, `FRACTAL_NZ`, ...).
//! - `storage`: ref-counted owned/borrowed device buffers.
//! - `tensor`: shape/strides/dtype/format/storage handle.
//! - `value`: the tagged `Int`/`Float`/`Bool`/`String`/`Tensor`/`Tuple`/`None` sum type nodes
//!   carry as their output.
//! - `error`: the crate's `Error`/`Result`.

mod allocator;
mod device;
mod dtype;
mod error;
mod format;
mod storage;
mod tensor;
mod value;

pub use allocator::Allocator;
pub use device::Device;
pub use dtype::Dtype;
pub use error::{Error, Result};
pub use format::MemoryFormat;
pub use storage::Storage;
pub use tensor::{resolve_reshape_shape, Tensor};
pub use value::Value;
