//! `Copy` and `AllGather` on a single CPU device: both reduce to a byte-for-byte memcpy since
//! there is only one rank to gather from.

use dart_core::Tensor;
use dart_kernel::{Kernel, Opcode, Result as KernelResult};

use crate::error::{Error, Result};

pub struct CopyKernel {
    op: Opcode,
}

impl CopyKernel {
    pub fn new(op: Opcode) -> Self {
        Self { op }
    }

    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn source<'a>(&self, inputs: &'a [Tensor]) -> Result<&'a Tensor> {
        inputs.first().ok_or(Error::Arity { op: self.name(), expected: 1, got: 0 })
    }
}

impl Kernel for CopyKernel {
    fn init(&mut self, op: Opcode, _inputs: &[Tensor]) -> KernelResult<()> {
        self.op = op;
        Ok(())
    }

    fn infer_shape(&self, inputs: &[Tensor]) -> KernelResult<Vec<i64>> {
        Ok(self.source(inputs)?.shape())
    }

    fn resize(&mut self, inputs: &[Tensor], output: &Tensor) -> KernelResult<usize> {
        let src = self.source(inputs)?;
        output.set_dtype(src.dtype());
        output.resize_storage().map_err(Error::Core)?;
        Ok(0)
    }

    fn launch(&self, inputs: &[Tensor], output: &Tensor, _workspace: Option<&Tensor>) -> KernelResult<()> {
        let src = self.source(inputs)?;
        let bytes = src.numel() as usize * src.dtype().size();
        let from = src.data_ptr().ok_or(Error::UnallocatedOutput { op: self.name() })?.as_ptr();
        let to = output.data_ptr().ok_or(Error::UnallocatedOutput { op: self.name() })?.as_ptr();
        // SAFETY: `resize` sized `output`'s storage to `src`'s byte count before `launch` runs,
        // and both pointers come from live, non-overlapping tensor allocations.
        unsafe { std::ptr::copy_nonoverlapping(from, to, bytes) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cpu_allocator, f32_tensor, read_f32};
    use dart_core::{Device, Dtype};

    #[test]
    fn copy_duplicates_bytes_into_a_fresh_storage() {
        let allocator = cpu_allocator();
        let device = Device::cpu();
        let src = f32_tensor(&[1.0, 2.0, 3.0], &[3], &allocator, &device);
        let mut kernel = CopyKernel::new(Opcode::Copy);
        let shape = kernel.infer_shape(&[src.clone()]).unwrap();
        let output = Tensor::new_owned(shape, Dtype::F32, device, allocator);
        kernel.resize(&[src.clone()], &output).unwrap();
        kernel.launch(&[src], &output, None).unwrap();
        assert_eq!(read_f32(&output), vec![1.0, 2.0, 3.0]);
    }
}
