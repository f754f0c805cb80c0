//! Reference 2-D matrix multiply over contiguous row-major F32 tensors.

use dart_core::{Dtype, Tensor};
use dart_kernel::{Kernel, Opcode, Result as KernelResult};

use crate::error::{Error, Result};

#[derive(Default)]
pub struct MatMulKernel;

impl MatMulKernel {
    fn check(&self, inputs: &[Tensor]) -> Result<(i64, i64, i64)> {
        let [lhs, rhs] = inputs else {
            return Err(Error::Arity { op: "mat_mul", expected: 2, got: inputs.len() });
        };
        if lhs.dtype() != Dtype::F32 {
            return Err(Error::DtypeMismatch { op: "mat_mul", expected: Dtype::F32, got: lhs.dtype() });
        }
        if rhs.dtype() != Dtype::F32 {
            return Err(Error::DtypeMismatch { op: "mat_mul", expected: Dtype::F32, got: rhs.dtype() });
        }
        let (lshape, rshape) = (lhs.shape(), rhs.shape());
        if lshape.len() != 2 {
            return Err(Error::NotMatrix(lshape));
        }
        if rshape.len() != 2 {
            return Err(Error::NotMatrix(rshape));
        }
        if lshape[1] != rshape[0] {
            return Err(Error::InnerDimMismatch(lshape, rshape));
        }
        Ok((lshape[0], lshape[1], rshape[1]))
    }
}

impl Kernel for MatMulKernel {
    fn init(&mut self, _op: Opcode, _inputs: &[Tensor]) -> KernelResult<()> {
        Ok(())
    }

    fn infer_shape(&self, inputs: &[Tensor]) -> KernelResult<Vec<i64>> {
        let (m, _k, n) = self.check(inputs)?;
        Ok(vec![m, n])
    }

    fn resize(&mut self, inputs: &[Tensor], output: &Tensor) -> KernelResult<usize> {
        self.check(inputs)?;
        output.set_dtype(Dtype::F32);
        output.resize_storage().map_err(Error::Core)?;
        Ok(0)
    }

    fn launch(&self, inputs: &[Tensor], output: &Tensor, _workspace: Option<&Tensor>) -> KernelResult<()> {
        let (m, k, n) = self.check(inputs)?;
        let (m, k, n) = (m as usize, k as usize, n as usize);
        let lhs = inputs[0].data_ptr().ok_or(Error::UnallocatedOutput { op: "mat_mul" })?.as_ptr() as *const f32;
        let rhs = inputs[1].data_ptr().ok_or(Error::UnallocatedOutput { op: "mat_mul" })?.as_ptr() as *const f32;
        let out = output.data_ptr().ok_or(Error::UnallocatedOutput { op: "mat_mul" })?.as_ptr() as *mut f32;
        // SAFETY: `check` sized `m`/`k`/`n` from the operands' own shapes, and `resize` sized
        // `output`'s storage to `m * n` elements before `launch` runs.
        unsafe {
            for row in 0..m {
                for col in 0..n {
                    let mut acc = 0.0f32;
                    for inner in 0..k {
                        acc += *lhs.add(row * k + inner) * *rhs.add(inner * n + col);
                    }
                    *out.add(row * n + col) = acc;
                }
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
    fn matmul_computes_standard_product() {
        let allocator = cpu_allocator();
        let device = Device::cpu();
        let a = f32_tensor(&[1.0, 2.0, 3.0, 4.0], &[2, 2], &allocator, &device);
        let b = f32_tensor(&[5.0, 6.0, 7.0, 8.0], &[2, 2], &allocator, &device);
        let mut kernel = MatMulKernel::default();
        let shape = kernel.infer_shape(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(shape, vec![2, 2]);
        let output = Tensor::new_owned(shape, Dtype::F32, device, allocator);
        kernel.resize(&[a.clone(), b.clone()], &output).unwrap();
        kernel.launch(&[a, b], &output, None).unwrap();
        assert_eq!(read_f32(&output), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn inner_dimension_mismatch_is_rejected() {
        let allocator = cpu_allocator();
        let device = Device::cpu();
        let a = f32_tensor(&[1.0, 2.0, 3.0], &[1, 3], &allocator, &device);
        let b = f32_tensor(&[1.0, 2.0], &[2, 1], &allocator, &device);
        let kernel = MatMulKernel::default();
        assert!(matches!(kernel.infer_shape(&[a, b]), Err(_)));
    }
}
