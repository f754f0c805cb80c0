use dart_core::Tensor;

use crate::{Kernel, KernelLib, Opcode, Result};

/// The fallback kernel library: every compute opcode resolves to a kernel that infers shapes the
/// obvious way (first input's shape, or `[]` with no inputs) but launches nothing. The core must
/// function with no real kernel library present (spec §4.10), and tests that only care about
/// graph/memory-pool behavior build kernels against this library.
pub struct DummyLib;

impl KernelLib for DummyLib {
    fn name(&self) -> &str {
        "Dummy"
    }

    fn create_kernel(&self, op: Opcode) -> Option<Box<dyn Kernel>> {
        Some(Box::new(DummyKernel { op }))
    }
}

struct DummyKernel {
    op: Opcode,
}

impl Kernel for DummyKernel {
    fn init(&mut self, op: Opcode, _inputs: &[Tensor]) -> Result<()> {
        self.op = op;
        Ok(())
    }

    fn infer_shape(&self, inputs: &[Tensor]) -> Result<Vec<i64>> {
        Ok(inputs.first().map(|t| t.shape()).unwrap_or_default())
    }

    fn resize(&mut self, _inputs: &[Tensor], _output: &Tensor) -> Result<usize> {
        Ok(0)
    }

    fn launch(&self, _inputs: &[Tensor], _output: &Tensor, _workspace: Option<&Tensor>) -> Result<()> {
        tracing::trace!(op = self.op.name(), "dummy kernel launch is a no-op");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_lib_answers_every_opcode() {
        let lib = DummyLib;
        for op in [Opcode::Add, Opcode::MatMul, Opcode::FlashAttention, Opcode::Copy] {
            assert!(lib.create_kernel(op).is_some());
        }
    }
}
