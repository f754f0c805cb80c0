use crate::{Kernel, Opcode};

/// A loadable collection of [`Kernel`] factories, one per opcode it supports. Libraries are
/// registered process-wide by name (spec §4.10) and selected by `DART_KERNEL_LIB_NAME`.
pub trait KernelLib: Send + Sync {
    /// The name this library is registered and selected under.
    fn name(&self) -> &str;

    /// Builds a fresh kernel for `op`, or `None` if this library doesn't implement it -- the
    /// executor falls back to the `Dummy` library's kernel in that case.
    fn create_kernel(&self, op: Opcode) -> Option<Box<dyn Kernel>>;
}
