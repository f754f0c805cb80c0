//! Test-only heap allocator and tensor builders shared across this crate's kernel tests.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

use dart_core::{Allocator, Device, Dtype, Tensor};

#[derive(Debug)]
pub struct HeapAllocator;

impl Allocator for HeapAllocator {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(bytes.max(1), 16).ok()?;
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, bytes: usize) {
        let layout = Layout::from_size_align(bytes.max(1), 16).unwrap();
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }

    fn name(&self) -> &str {
        "test-heap"
    }
}

pub fn cpu_allocator() -> Arc<dyn Allocator> {
    Arc::new(HeapAllocator)
}

pub fn f32_tensor(data: &[f32], shape: &[i64], allocator: &Arc<dyn Allocator>, device: &Device) -> Tensor {
    let tensor = Tensor::new_owned(shape.to_vec(), Dtype::F32, device.clone(), Arc::clone(allocator));
    tensor.storage().allocate_memory(&tensor.label());
    let ptr = tensor.data_ptr().unwrap().as_ptr() as *mut f32;
    unsafe {
        for (i, &v) in data.iter().enumerate() {
            *ptr.add(i) = v;
        }
    }
    tensor
}

pub fn read_f32(tensor: &Tensor) -> Vec<f32> {
    let ptr = tensor.data_ptr().unwrap().as_ptr() as *const f32;
    let n = tensor.numel() as usize;
    unsafe { (0..n).map(|i| *ptr.add(i)).collect() }
}
