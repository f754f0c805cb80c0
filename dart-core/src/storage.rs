//! Ref-counted device buffer (spec §3, §4.2).
//!
//! `Storage` is the shared owner of a device allocation. Tensors hold a `Storage` handle and a
//! byte offset into it; many tensors (views, reshape aliases) can share one storage. Whether a
//! storage actually owns its bytes -- and therefore must free them -- or merely borrows an
//! externally managed buffer is tracked by `owns_data`.

use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::allocator::Allocator;
use crate::device::Device;

/// Wraps a raw device pointer so it can cross thread boundaries inside `Storage`'s shared state.
/// Device memory is, by construction, a resource meant to be shared across the worker threads of
/// the DAG executor; the pointer itself carries no thread-affinity.
#[derive(Clone, Copy)]
struct DevicePtr(NonNull<u8>);

unsafe impl Send for DevicePtr {}
unsafe impl Sync for DevicePtr {}

struct Inner {
    data: Option<DevicePtr>,
    size_bytes: usize,
    device: Device,
    allocator: Arc<dyn Allocator>,
    owns_data: bool,
}

/// A ref-counted handle to a device buffer. Cloning a `Storage` is cheap (it bumps an `Arc`); the
/// underlying bytes are freed when the last clone is dropped, provided `owns_data` is set.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<Mutex<Inner>>,
}

impl Storage {
    /// Records intent to own `size_bytes` of device memory without allocating yet. Call
    /// `allocate_memory` to materialize the bytes.
    pub fn new_owned(size_bytes: usize, device: Device, allocator: Arc<dyn Allocator>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: None,
                size_bytes,
                device,
                allocator,
                owns_data: true,
            })),
        }
    }

    /// Wraps an externally managed buffer. This storage will never allocate or free through its
    /// allocator; `allocator` is kept only so device/allocator queries stay uniform.
    pub fn new_borrowed(ptr: NonNull<u8>, size_bytes: usize, device: Device, allocator: Arc<dyn Allocator>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: Some(DevicePtr(ptr)),
                size_bytes,
                device,
                allocator,
                owns_data: false,
            })),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.lock().expect("storage mutex poisoned").size_bytes
    }

    pub fn device(&self) -> Device {
        self.inner.lock().expect("storage mutex poisoned").device.clone()
    }

    pub fn owns_data(&self) -> bool {
        self.inner.lock().expect("storage mutex poisoned").owns_data
    }

    pub fn data_ptr(&self) -> Option<NonNull<u8>> {
        self.inner.lock().expect("storage mutex poisoned").data.map(|p| p.0)
    }

    /// The allocator backing this storage, so callers (e.g. `Tensor::resize_storage`) can build
    /// a fresh, larger storage through the same pool without reaching around the abstraction.
    pub fn allocator(&self) -> Arc<dyn Allocator> {
        Arc::clone(&self.inner.lock().expect("storage mutex poisoned").allocator)
    }

    /// Whether this storage's identity (not contents) is the same allocation as `other`'s.
    pub fn same_allocation(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Allocates device bytes through the allocator, tagging the allocation with `label` (the
    /// owning tensor's label) for allocators that track per-buf ownership.
    ///
    /// # Panics
    /// This is a programmer-error surface (spec §7 taxonomy item 1): panics if this storage
    /// borrows external memory, or if it already holds an allocation.
    pub fn allocate_memory(&self, label: &str) {
        let mut inner = self.inner.lock().expect("storage mutex poisoned");
        assert!(inner.owns_data, "cannot allocate_memory on a borrowed storage");
        assert!(inner.data.is_none(), "storage already holds an allocation");
        let ptr = inner
            .allocator
            .allocate(inner.size_bytes)
            .unwrap_or_else(|| panic!("allocator {} exhausted for {} bytes", inner.allocator.name(), inner.size_bytes));
        inner.allocator.tag(ptr, label);
        inner.data = Some(DevicePtr(ptr));
    }

    /// Frees the held allocation through the allocator, setting the pointer back to null.
    ///
    /// # Panics
    /// Panics if this storage borrows external memory (spec §4.2: "freeing a borrowed storage is
    /// an error").
    pub fn free_memory(&self) {
        let mut inner = self.inner.lock().expect("storage mutex poisoned");
        assert!(inner.owns_data, "cannot free_memory on a borrowed storage");
        if let Some(DevicePtr(ptr)) = inner.data.take() {
            let size = inner.size_bytes;
            let allocator = Arc::clone(&inner.allocator);
            drop(inner);
            // SAFETY: `ptr` was produced by this same allocator in `allocate_memory` and hasn't
            // been freed since (we just took it out of `data`).
            unsafe { allocator.free(ptr, size) };
        } else {
            warn!("free_memory called on storage with no live allocation; ignoring");
        }
    }

    /// Yields the pointer and clears it from this storage, transferring ownership of the
    /// allocation to the caller. Only legal when `owns_data` is true.
    ///
    /// # Panics
    /// Panics if this storage borrows external memory.
    pub fn release(&self) -> Option<NonNull<u8>> {
        let mut inner = self.inner.lock().expect("storage mutex poisoned");
        assert!(inner.owns_data, "cannot release a borrowed storage");
        inner.data.take().map(|p| p.0)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().expect("storage mutex poisoned");
        f.debug_struct("Storage")
            .field("size_bytes", &inner.size_bytes)
            .field("device", &inner.device)
            .field("owns_data", &inner.owns_data)
            .field("allocated", &inner.data.is_some())
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.owns_data {
            if let Some(DevicePtr(ptr)) = self.data.take() {
                // SAFETY: same contract as `free_memory`; this is the last owner.
                unsafe { self.allocator.free(ptr, self.size_bytes) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingAllocator {
        frees: AtomicUsize,
    }

    impl Allocator for CountingAllocator {
        fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
            let layout = std::alloc::Layout::from_size_align(bytes.max(1), 8).unwrap();
            NonNull::new(unsafe { std::alloc::alloc(layout) })
        }

        unsafe fn free(&self, ptr: NonNull<u8>, bytes: usize) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            let layout = std::alloc::Layout::from_size_align(bytes.max(1), 8).unwrap();
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn owned_storage_allocates_and_frees_exactly_once() {
        let allocator: Arc<dyn Allocator> = Arc::new(CountingAllocator::default());
        let storage = Storage::new_owned(256, Device::cpu(), Arc::clone(&allocator));
        storage.allocate_memory("test");
        assert!(storage.data_ptr().is_some());
        storage.free_memory();
        assert!(storage.data_ptr().is_none());
    }

    #[test]
    #[should_panic(expected = "already holds an allocation")]
    fn double_allocate_panics() {
        let allocator: Arc<dyn Allocator> = Arc::new(CountingAllocator::default());
        let storage = Storage::new_owned(64, Device::cpu(), allocator);
        storage.allocate_memory("test");
        storage.allocate_memory("test");
    }

    #[test]
    #[should_panic(expected = "borrowed storage")]
    fn freeing_borrowed_storage_panics() {
        let allocator: Arc<dyn Allocator> = Arc::new(CountingAllocator::default());
        let ptr = allocator.allocate(16).unwrap();
        let storage = Storage::new_borrowed(ptr, 16, Device::cpu(), Arc::clone(&allocator));
        storage.free_memory();
    }

    #[test]
    fn release_transfers_ownership_and_prevents_double_free() {
        let allocator: Arc<dyn Allocator> = Arc::new(CountingAllocator::default());
        let storage = Storage::new_owned(32, Device::cpu(), Arc::clone(&allocator));
        storage.allocate_memory("test");
        let ptr = storage.release().unwrap();
        drop(storage);
        // SAFETY: test-only manual cleanup of the transferred allocation.
        unsafe { allocator.free(ptr, 32) };
    }

    #[test]
    fn cloning_storage_shares_one_allocation() {
        let allocator: Arc<dyn Allocator> = Arc::new(CountingAllocator::default());
        let storage = Storage::new_owned(32, Device::cpu(), allocator);
        storage.allocate_memory("test");
        let clone = storage.clone();
        assert!(storage.same_allocation(&clone));
        drop(storage);
        assert!(clone.data_ptr().is_some());
    }
}
