use dart_core::Tensor;

use crate::{Opcode, Result};

/// The per-node compute object a [`KernelLib`](crate::KernelLib) hands back to the executor.
///
/// The four-phase contract mirrors the executor's own build/run split (spec §4.10): `init` and
/// `infer_shape` run once while the graph is being compiled, `resize` runs once per launch (every
/// iteration for [`Opcode::is_force_resize`](crate::Opcode::is_force_resize) ops), and `launch`
/// performs the actual device dispatch.
pub trait Kernel: Send + Sync {
    /// One-time setup from the node's static inputs; called during `build_kernels`.
    fn init(&mut self, op: Opcode, inputs: &[Tensor]) -> Result<()>;

    /// Computes the output shape from the input shapes, without touching device memory.
    fn infer_shape(&self, inputs: &[Tensor]) -> Result<Vec<i64>>;

    /// Returns the workspace byte count this launch needs, and resizes the output tensor's
    /// storage if its shape changed since the last call.
    fn resize(&mut self, inputs: &[Tensor], output: &Tensor) -> Result<usize>;

    /// Dispatches the operation. `workspace`, if non-empty, is scratch space sized by the prior
    /// `resize` call.
    fn launch(&self, inputs: &[Tensor], output: &Tensor, workspace: Option<&Tensor>) -> Result<()>;
}
