//! Tensor handle: shape, strides, dtype, memory format, and a `Storage` it views into (spec
//! §3, §4.1).

use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use dart_utils::Label;

use crate::allocator::Allocator;
use crate::device::Device;
use crate::dtype::Dtype;
use crate::error::{Error, Result};
use crate::format::MemoryFormat;
use crate::storage::Storage;

struct Inner {
    label: Label,
    shape: Vec<i64>,
    strides: Vec<i64>,
    dtype: Dtype,
    format: MemoryFormat,
    storage: Storage,
    /// Element offset (not bytes) into `storage`.
    offset: usize,
}

/// A tensor is a shared handle (spec §3: "Tensor and Tuple are shared handles") viewing a
/// `Storage`. Cloning duplicates the view cheaply; the underlying bytes are only duplicated if
/// you explicitly copy them.
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<Mutex<Inner>>,
}

impl Tensor {
    /// Builds a tensor with freshly computed row-major strides and an unallocated owned storage
    /// sized for `shape`/`dtype`. Call `Storage::allocate_memory` (via `storage()`) before use.
    pub fn new_owned(shape: impl Into<Vec<i64>>, dtype: Dtype, device: Device, allocator: Arc<dyn Allocator>) -> Self {
        let shape = shape.into();
        let strides = row_major_strides(&shape);
        let byte_size = numel_of(&shape) as usize * dtype.size();
        let storage = Storage::new_owned(byte_size, device, allocator);
        Self::from_parts(Label::new(), shape, strides, dtype, storage, 0)
    }

    /// Builds a tensor over an externally managed buffer.
    pub fn new_borrowed(
        ptr: NonNull<u8>,
        shape: impl Into<Vec<i64>>,
        dtype: Dtype,
        device: Device,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        let shape = shape.into();
        let strides = row_major_strides(&shape);
        let byte_size = numel_of(&shape) as usize * dtype.size();
        let storage = Storage::new_borrowed(ptr, byte_size, device, allocator);
        Self::from_parts(Label::new(), shape, strides, dtype, storage, 0)
    }

    /// Builds a tensor view directly from its parts, e.g. when aliasing another tensor's storage
    /// (reshape, expand_dims -- spec §4.8 "same storage as the input").
    pub fn from_parts(label: Label, shape: Vec<i64>, strides: Vec<i64>, dtype: Dtype, storage: Storage, offset: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                label,
                shape,
                strides,
                dtype,
                format: MemoryFormat::default(),
                storage,
                offset,
            })),
        }
    }

    /// A placeholder output tensor for an op-node before shape/dtype inference has run.
    pub fn empty_placeholder(allocator: Arc<dyn Allocator>, device: Device) -> Self {
        let storage = Storage::new_owned(0, device, allocator);
        Self::from_parts(Label::new(), Vec::new(), Vec::new(), Dtype::Unknown, storage, 0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("tensor mutex poisoned")
    }

    pub fn label(&self) -> String {
        self.lock().label.to_string()
    }

    pub fn shape(&self) -> Vec<i64> {
        self.lock().shape.clone()
    }

    pub fn strides(&self) -> Vec<i64> {
        self.lock().strides.clone()
    }

    pub fn dim(&self) -> usize {
        self.lock().shape.len()
    }

    /// Product of the shape. Panics if any dim is the reshape placeholder `-1` -- by the time a
    /// tensor is used outside of shape inference it must be fully resolved (spec §3 invariant).
    pub fn numel(&self) -> i64 {
        numel_of(&self.lock().shape)
    }

    pub fn dtype(&self) -> Dtype {
        self.lock().dtype
    }

    pub fn format(&self) -> MemoryFormat {
        self.lock().format
    }

    pub fn set_format(&self, format: MemoryFormat) {
        self.lock().format = format;
    }

    pub fn offset(&self) -> usize {
        self.lock().offset
    }

    pub fn storage(&self) -> Storage {
        self.lock().storage.clone()
    }

    /// Nominal equality for `Value::Tensor` (spec §4.1 "equality"): same underlying allocation,
    /// same view into it.
    pub fn same_storage_and_view(&self, other: &Tensor) -> bool {
        let a = self.lock();
        let b = other.lock();
        a.storage.same_allocation(&b.storage) && a.offset == b.offset && a.shape == b.shape
    }

    /// Pointer to this tensor's first element, i.e. the storage base plus `offset` elements.
    pub fn data_ptr(&self) -> Option<NonNull<u8>> {
        let inner = self.lock();
        let base = inner.storage.data_ptr()?;
        let byte_offset = inner.offset * inner.dtype.size();
        // SAFETY: `offset * dtype.size() + byte_size <= storage.size_bytes` is the class
        // invariant (spec §3); `base` is valid for `storage.size_bytes()` bytes.
        Some(unsafe { NonNull::new_unchecked(base.as_ptr().add(byte_offset)) })
    }

    /// Replaces the shape. Unless `strides` is provided, strides are recomputed row-major.
    pub fn set_shape(&self, shape: impl Into<Vec<i64>>, strides: Option<Vec<i64>>) {
        let shape = shape.into();
        let strides = strides.unwrap_or_else(|| row_major_strides(&shape));
        assert_eq!(shape.len(), strides.len(), "shape and strides must have the same arity");
        let mut inner = self.lock();
        inner.shape = shape;
        inner.strides = strides;
    }

    pub fn set_dtype(&self, dtype: Dtype) {
        self.lock().dtype = dtype;
    }

    /// Recomputes byte size from the current shape/dtype. If the storage owns its data and the
    /// existing allocation is too small, reallocates -- but only if there is no live allocation
    /// to replace (spec §4.1, mirroring the double-allocate guard in §3/§4.2).
    pub fn resize_storage(&self) -> Result<()> {
        let inner = self.lock();
        let required = (numel_of(&inner.shape) as usize + inner.offset) * inner.dtype.size();
        let storage = inner.storage.clone();
        let label = inner.label.to_string();
        drop(inner);
        if storage.size_bytes() >= required {
            return Ok(());
        }
        if !storage.owns_data() {
            return Err(Error::StorageTooSmall {
                label,
                numel: required,
                offset: self.offset(),
                available: storage.size_bytes(),
            });
        }
        if storage.data_ptr().is_some() {
            return Err(Error::ResizeWouldReallocate {
                current: storage.size_bytes(),
                requested: required,
            });
        }
        tracing::debug!(required, "growing unallocated storage for resize");
        let fresh = Storage::new_owned(required, storage.device(), storage.allocator());
        self.lock().storage = fresh;
        Ok(())
    }
}

/// Computes element numel for a fully-resolved shape (scalars, i.e. an empty shape, have numel
/// 1). Panics if a `-1` reshape placeholder remains (spec §3: never valid outside inference).
fn numel_of(shape: &[i64]) -> i64 {
    assert!(
        shape.iter().all(|&d| d >= 0),
        "shape {shape:?} still contains an unresolved -1 placeholder"
    );
    shape.iter().product()
}

fn row_major_strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1].max(0);
    }
    strides
}

/// Resolves a single `-1` placeholder dimension against the element count of the tensor being
/// reshaped (spec §3: "-1 permitted only as a placeholder during reshape inference"). Used by
/// the `Reshape` kernel before constructing the aliased output tensor.
pub fn resolve_reshape_shape(old_numel: i64, shape: &[i64]) -> Vec<i64> {
    let placeholders = shape.iter().filter(|&&d| d == -1).count();
    assert!(placeholders <= 1, "reshape target {shape:?} has more than one -1 placeholder");
    if placeholders == 0 {
        assert_eq!(
            shape.iter().product::<i64>(),
            old_numel,
            "reshape target {shape:?} does not preserve numel {old_numel}"
        );
        return shape.to_vec();
    }
    let known: i64 = shape.iter().filter(|&&d| d != -1).product();
    assert!(known != 0 && old_numel % known == 0, "reshape target {shape:?} cannot resolve -1 for numel {old_numel}");
    let resolved = old_numel / known;
    shape.iter().map(|&d| if d == -1 { resolved } else { d }).collect()
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Tensor")
            .field("label", &inner.label)
            .field("shape", &inner.shape)
            .field("strides", &inner.strides)
            .field("dtype", &inner.dtype)
            .field("format", &inner.format)
            .field("offset", &inner.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::Layout;

    #[derive(Debug)]
    struct TestAllocator;

    impl Allocator for TestAllocator {
        fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
            let layout = Layout::from_size_align(bytes.max(1), 8).unwrap();
            NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
        }

        unsafe fn free(&self, ptr: NonNull<u8>, bytes: usize) {
            let layout = Layout::from_size_align(bytes.max(1), 8).unwrap();
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    #[test]
    fn row_major_strides_are_contiguous() {
        let tensor = Tensor::new_owned([2, 3, 4], Dtype::F32, Device::cpu(), Arc::new(TestAllocator));
        assert_eq!(tensor.strides(), vec![12, 4, 1]);
    }

    #[test]
    fn numel_is_product_of_shape() {
        let tensor = Tensor::new_owned([2, 2], Dtype::F32, Device::cpu(), Arc::new(TestAllocator));
        assert_eq!(tensor.numel(), 4);
    }

    #[test]
    fn set_shape_recomputes_strides() {
        let tensor = Tensor::new_owned([4], Dtype::F32, Device::cpu(), Arc::new(TestAllocator));
        tensor.set_shape([2, 2], None);
        assert_eq!(tensor.shape(), vec![2, 2]);
        assert_eq!(tensor.strides(), vec![2, 1]);
    }

    #[test]
    fn resolve_reshape_shape_fills_placeholder() {
        assert_eq!(resolve_reshape_shape(12, &[-1, 3]), vec![4, 3]);
        assert_eq!(resolve_reshape_shape(12, &[2, 6]), vec![2, 6]);
    }

    #[test]
    #[should_panic(expected = "more than one -1")]
    fn resolve_reshape_shape_rejects_multiple_placeholders() {
        resolve_reshape_shape(12, &[-1, -1]);
    }
}
