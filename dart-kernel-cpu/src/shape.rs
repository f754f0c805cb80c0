//! `Shape`: materializes an input tensor's shape as an I64 tensor, one element per dimension.

use dart_core::{Dtype, Tensor};
use dart_kernel::{Kernel, Opcode, Result as KernelResult};

use crate::error::{Error, Result};

#[derive(Default)]
pub struct ShapeKernel;

impl ShapeKernel {
    fn source<'a>(&self, inputs: &'a [Tensor]) -> Result<&'a Tensor> {
        inputs.first().ok_or(Error::Arity { op: "shape", expected: 1, got: 0 })
    }
}

impl Kernel for ShapeKernel {
    fn init(&mut self, _op: Opcode, _inputs: &[Tensor]) -> KernelResult<()> {
        Ok(())
    }

    fn infer_shape(&self, inputs: &[Tensor]) -> KernelResult<Vec<i64>> {
        Ok(vec![self.source(inputs)?.dim() as i64])
    }

    fn resize(&mut self, inputs: &[Tensor], output: &Tensor) -> KernelResult<usize> {
        self.source(inputs)?;
        output.set_dtype(Dtype::I64);
        output.resize_storage().map_err(Error::Core)?;
        Ok(0)
    }

    fn launch(&self, inputs: &[Tensor], output: &Tensor, _workspace: Option<&Tensor>) -> KernelResult<()> {
        let shape = self.source(inputs)?.shape();
        let out = output.data_ptr().ok_or(Error::UnallocatedOutput { op: "shape" })?.as_ptr() as *mut i64;
        // SAFETY: `resize` sized `output`'s storage to `shape.len()` I64 elements.
        unsafe {
            for (i, &dim) in shape.iter().enumerate() {
                *out.add(i) = dim;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cpu_allocator, f32_tensor};
    use dart_core::Device;

    #[test]
    fn shape_materializes_dims_as_i64() {
        let allocator = cpu_allocator();
        let device = Device::cpu();
        let src = f32_tensor(&[0.0; 6], &[2, 3], &allocator, &device);
        let mut kernel = ShapeKernel::default();
        let shape = kernel.infer_shape(&[src.clone()]).unwrap();
        assert_eq!(shape, vec![2]);
        let output = Tensor::new_owned(shape, Dtype::I64, device, allocator);
        kernel.resize(&[src.clone()], &output).unwrap();
        kernel.launch(&[src], &output, None).unwrap();
        let ptr = output.data_ptr().unwrap().as_ptr() as *const i64;
        let dims: Vec<i64> = unsafe { (0..2).map(|i| *ptr.add(i)).collect() };
        assert_eq!(dims, vec![2, 3]);
    }
}
