//! Reference CPU kernel library (spec §4.10): a `KernelLib` that actually computes rather than
//! the no-op fallback in `dart_kernel::DummyLib`. Operates on contiguous row-major tensors only;
//! broadcasting, non-contiguous views, and multi-device collectives are out of scope -- this
//! library exists to make single-device graphs numerically meaningful, not to be a production
//! accelerator backend.
//!
//! # Modules
//!
//! - `elementwise`: `Add`/`Sub`/`Mul`/`Div` over same-shape F32 tensors.
//! - `matmul`: 2-D `MatMul`.
//! - `copy`: `Copy` and single-rank `AllGather`/`WaitTensor` (all a memcpy with one participant).
//! - `shape`: materializes a tensor's shape as an I64 tensor.
//! - `error`: this crate's `Error`/`Result`, convertible into `dart_kernel::Error`.

mod copy;
mod elementwise;
mod error;
mod matmul;
mod shape;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

use dart_kernel::{Kernel, KernelLib, Opcode};

/// The CPU reference library. Register it and select it with
/// `DART_KERNEL_LIB_NAME=Cpu` (or call [`dart_kernel::register`] directly) to run graphs with
/// real arithmetic instead of `dart_kernel::DummyLib`'s no-ops.
pub struct CpuLib;

impl KernelLib for CpuLib {
    fn name(&self) -> &str {
        "Cpu"
    }

    fn create_kernel(&self, op: Opcode) -> Option<Box<dyn Kernel>> {
        match op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                Some(Box::new(elementwise::ElementwiseKernel::new(op)))
            }
            Opcode::MatMul => Some(Box::new(matmul::MatMulKernel::default())),
            Opcode::Copy | Opcode::AllGather | Opcode::WaitTensor => Some(Box::new(copy::CopyKernel::new(op))),
            Opcode::Shape => Some(Box::new(shape::ShapeKernel::default())),
            // FlashAttention and PagedAttention are force-resize ops this reference library
            // does not implement; returning `None` lets the caller report `UnsupportedOpcode`
            // rather than silently computing nothing.
            Opcode::FlashAttention | Opcode::PagedAttention => None,
            // Dummy ops never reach a kernel library; the executor resolves them itself.
            Opcode::Reshape
            | Opcode::ExpandDims
            | Opcode::MakeTuple
            | Opcode::TupleGetItem
            | Opcode::Depend
            | Opcode::Load
            | Opcode::UpdateState
            | Opcode::Return
            | Opcode::End => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_every_real_compute_opcode() {
        let lib = CpuLib;
        for op in [Opcode::Add, Opcode::Sub, Opcode::Mul, Opcode::Div, Opcode::MatMul, Opcode::Copy, Opcode::Shape] {
            assert!(lib.create_kernel(op).is_some(), "{op} should have a cpu kernel");
        }
    }

    #[test]
    fn declines_dummy_ops_and_unimplemented_attention_kernels() {
        let lib = CpuLib;
        for op in [Opcode::Reshape, Opcode::Return, Opcode::Load, Opcode::End, Opcode::FlashAttention, Opcode::PagedAttention] {
            assert!(lib.create_kernel(op).is_none(), "{op} should not have a cpu kernel");
        }
    }

    #[test]
    fn name_is_cpu() {
        assert_eq!(CpuLib.name(), "Cpu");
    }
}
