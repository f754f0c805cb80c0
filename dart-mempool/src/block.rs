use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// A large contiguous region obtained once from the device and carved into many `MemBuf`s.
/// `min_addr`/`max_addr` track the "high-water" sub-region ever touched inside the block, used
/// for the pool's peak statistics.
pub struct MemBlock {
    pub addr: usize,
    pub size: usize,
    pub stream_id: u64,
    pub min_addr: usize,
    pub max_addr: usize,
    layout: Layout,
    base: NonNull<u8>,
}

unsafe impl Send for MemBlock {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl MemBlock {
    /// Allocates `size` real bytes from the process heap and registers them as one block. This
    /// is the reference-allocator role the spec assigns to the device driver: in production a
    /// kernel library's allocator would back this with a real device mapping.
    pub fn new(size: usize, stream_id: u64) -> Self {
        let layout = Layout::from_size_align(size.max(1), 512).expect("valid block layout");
        let base = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(base).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        let addr = base.as_ptr() as usize;
        Self {
            addr,
            size,
            stream_id,
            min_addr: addr,
            max_addr: addr,
            layout,
            base,
        }
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.addr && addr < self.addr + self.size
    }

    pub fn touch(&mut self, addr: usize, size: usize) {
        self.min_addr = self.min_addr.min(addr);
        self.max_addr = self.max_addr.max(addr + size);
    }

    pub fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }
}

impl Drop for MemBlock {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base_ptr().as_ptr(), self.layout) };
    }
}
