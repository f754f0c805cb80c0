//! Elementwise binary arithmetic over contiguous F32 tensors.

use dart_core::{Dtype, Tensor};
use dart_kernel::{Kernel, Opcode, Result as KernelResult};

use crate::error::{Error, Result};

pub struct ElementwiseKernel {
    op: Opcode,
}

impl ElementwiseKernel {
    pub fn new(op: Opcode) -> Self {
        Self { op }
    }

    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn apply(&self, a: f32, b: f32) -> f32 {
        match self.op {
            Opcode::Add => a + b,
            Opcode::Sub => a - b,
            Opcode::Mul => a * b,
            Opcode::Div => a / b,
            other => unreachable!("{other} is not an elementwise opcode"),
        }
    }

    fn check(&self, inputs: &[Tensor]) -> Result<()> {
        let [lhs, rhs] = inputs else {
            return Err(Error::Arity { op: self.name(), expected: 2, got: inputs.len() });
        };
        if lhs.dtype() != Dtype::F32 {
            return Err(Error::DtypeMismatch { op: self.name(), expected: Dtype::F32, got: lhs.dtype() });
        }
        if rhs.dtype() != Dtype::F32 {
            return Err(Error::DtypeMismatch { op: self.name(), expected: Dtype::F32, got: rhs.dtype() });
        }
        if lhs.shape() != rhs.shape() {
            return Err(Error::ShapeMismatch { op: self.name(), lhs: lhs.shape(), rhs: rhs.shape() });
        }
        Ok(())
    }
}

impl Kernel for ElementwiseKernel {
    fn init(&mut self, op: Opcode, _inputs: &[Tensor]) -> KernelResult<()> {
        self.op = op;
        Ok(())
    }

    fn infer_shape(&self, inputs: &[Tensor]) -> KernelResult<Vec<i64>> {
        self.check(inputs)?;
        Ok(inputs[0].shape())
    }

    fn resize(&mut self, inputs: &[Tensor], output: &Tensor) -> KernelResult<usize> {
        self.check(inputs)?;
        output.set_dtype(Dtype::F32);
        output.resize_storage().map_err(Error::Core)?;
        Ok(0)
    }

    fn launch(&self, inputs: &[Tensor], output: &Tensor, _workspace: Option<&Tensor>) -> KernelResult<()> {
        self.check(inputs)?;
        let lhs = inputs[0].data_ptr().ok_or(Error::UnallocatedOutput { op: self.name() })?.as_ptr() as *const f32;
        let rhs = inputs[1].data_ptr().ok_or(Error::UnallocatedOutput { op: self.name() })?.as_ptr() as *const f32;
        let out = output.data_ptr().ok_or(Error::UnallocatedOutput { op: self.name() })?.as_ptr() as *mut f32;
        let n = inputs[0].numel() as usize;
        // SAFETY: `check` verified matching F32 dtype and shape for both operands, and `resize`
        // sized `output`'s storage to the same element count before `launch` runs.
        unsafe {
            for i in 0..n {
                *out.add(i) = self.apply(*lhs.add(i), *rhs.add(i));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cpu_allocator, f32_tensor, read_f32};
    use dart_core::Device;

    #[test]
    fn add_produces_elementwise_sum() {
        let allocator = cpu_allocator();
        let device = Device::cpu();
        let a = f32_tensor(&[1.0, 2.0, 3.0, 4.0], &[2, 2], &allocator, &device);
        let b = f32_tensor(&[10.0, 20.0, 30.0, 40.0], &[2, 2], &allocator, &device);
        let mut kernel = ElementwiseKernel::new(Opcode::Add);
        kernel.init(Opcode::Add, &[a.clone(), b.clone()]).unwrap();
        let shape = kernel.infer_shape(&[a.clone(), b.clone()]).unwrap();
        let output = Tensor::new_owned(shape, Dtype::F32, device, allocator);
        kernel.resize(&[a.clone(), b.clone()], &output).unwrap();
        kernel.launch(&[a, b], &output, None).unwrap();
        assert_eq!(read_f32(&output), vec![11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    fn mismatched_shapes_are_rejected_before_launch() {
        let allocator = cpu_allocator();
        let device = Device::cpu();
        let a = f32_tensor(&[1.0, 2.0], &[2], &allocator, &device);
        let b = f32_tensor(&[1.0, 2.0, 3.0], &[3], &allocator, &device);
        let kernel = ElementwiseKernel::new(Opcode::Add);
        assert!(matches!(kernel.infer_shape(&[a, b]), Err(_)));
    }
}
