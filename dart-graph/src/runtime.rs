//! The user-facing façade tying graph construction, optimization, kernel resolution and
//! execution together (spec §6 "Graph builder API"), playing the role the teacher's top-level
//! `Tengu` struct plays over its own backend/graph/tensor crates.

use std::sync::Arc;

use dart_core::{Allocator, Device, Value};
use dart_kernel::{KernelLib, Opcode};

use crate::executor::{Executor, ExecutorBuilder};
use crate::graph::Graph;
use crate::node::NodeId;
use crate::pass::PassManager;
use crate::{Error, Result};

/// One graph's worth of builder/run state. `begin_graph` starts one, `run` executes the
/// finished, optimized graph and returns the value captured by its `Return` node.
pub struct Runtime {
    device: Device,
    allocator: Arc<dyn Allocator>,
    lib: Arc<dyn KernelLib>,
    graph: Option<Graph>,
}

impl Runtime {
    pub fn new(device: Device, allocator: Arc<dyn Allocator>) -> Self {
        Self { device, allocator, lib: dart_kernel::active(), graph: None }
    }

    /// Convenience constructor backing the CPU device with a fresh [`dart_mempool::MemoryPool`]
    /// under its default configuration -- the common case for single-process embedding.
    pub fn with_cpu_pool() -> Self {
        let pool: Arc<dyn Allocator> = Arc::new(dart_mempool::MemoryPool::new(dart_mempool::PoolConfig::default()));
        Self::new(Device::cpu(), pool)
    }

    /// Overrides the kernel library resolved from `DART_KERNEL_LIB_NAME` (spec §4.10) with an
    /// explicit one, for embedders that select a library programmatically instead of by env var.
    pub fn with_library(mut self, lib: Arc<dyn KernelLib>) -> Self {
        self.lib = lib;
        self
    }

    pub fn begin_graph(&mut self, name: impl Into<String>) {
        self.graph = Some(Graph::new(name));
    }

    fn graph_mut(&mut self) -> Result<&mut Graph> {
        self.graph.as_mut().ok_or(Error::MissingReturn)
    }

    pub fn add_parameter(&mut self) -> Result<NodeId> {
        Ok(self.graph_mut()?.add_parameter())
    }

    pub fn bind_parameter(&mut self, node: NodeId, value: Value) -> Result<()> {
        self.graph_mut()?.bind_parameter(node, value)
    }

    pub fn add_value_node(&mut self, value: Value) -> Result<NodeId> {
        Ok(self.graph_mut()?.add_value_node(value))
    }

    pub fn add_op_node(&mut self, op: Opcode, inputs: &[NodeId]) -> Result<NodeId> {
        self.graph_mut()?.add_op_node(op, inputs)
    }

    pub fn add_return(&mut self, node: NodeId) -> Result<NodeId> {
        self.graph_mut()?.add_return(node)
    }

    /// Finalizes graph construction; no further `add_*` calls are valid until the next
    /// `begin_graph`.
    pub fn end_graph(&mut self) -> Result<()> {
        self.graph_mut()?.end_graph()
    }

    /// Runs every registered pass to a fixed point (spec §4.6).
    pub fn optimize(&mut self) -> Result<()> {
        PassManager::optimize(self.graph_mut()?)
    }

    /// Verifies every non-dummy op node in the graph has a kernel available from the active
    /// library, failing fast instead of discovering a missing kernel mid-run.
    pub fn build_kernels(&self) -> Result<()> {
        let graph = self.graph.as_ref().ok_or(Error::MissingReturn)?;
        for id in graph.order() {
            let node = graph.node(id)?;
            if node.opcode.is_dummy() {
                continue;
            }
            if self.lib.create_kernel(node.opcode).is_none() {
                return Err(Error::KernelFailed {
                    node: id,
                    op: node.opcode.name(),
                    source: dart_kernel::Error::UnsupportedOpcode {
                        lib: self.lib.name().to_string(),
                        op: node.opcode.name(),
                    },
                });
            }
        }
        Ok(())
    }

    /// Executes the finished graph, serially if `DART_THREAD_POOL_SIZE` resolves to 1 and across
    /// a worker pool otherwise, and returns the value captured by the `Return` node.
    pub fn run(&self, dynamic_shape: bool) -> Result<Value> {
        let graph = self.graph.as_ref().ok_or(Error::MissingReturn)?;
        if !graph.finished() {
            return Err(Error::MissingReturn);
        }
        for &param in graph.parameters() {
            if graph.node(param)?.try_output().is_none() {
                return Err(Error::UnboundParameter(param));
            }
        }

        let plan = ExecutorBuilder::build(graph)?;
        let executor = Executor::new(self.lib.as_ref(), Arc::clone(&self.allocator), self.device.clone(), dynamic_shape);
        if crate::config::thread_pool_size() > 1 {
            executor.run_parallel(graph, &plan)?;
        } else {
            executor.run_serial(graph, &plan)?;
        }

        let ret = graph.return_node().ok_or(Error::MissingReturn)?;
        graph.node(ret)?.inputs.first().map(|&id| graph.node(id).map(|n| n.output())).unwrap_or(Ok(Value::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dart_core::{Dtype, Tensor};
    use dart_mempool::{MemoryPool, PoolConfig};

    fn cpu_allocator() -> Arc<dyn Allocator> {
        Arc::new(MemoryPool::new(PoolConfig::default()))
    }

    fn sample_tensor(data: &[f32], shape: &[i64], allocator: &Arc<dyn Allocator>, device: &Device) -> Tensor {
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

    #[test]
    fn single_add_runs_end_to_end_on_the_cpu_reference_library() {
        let allocator = cpu_allocator();
        let device = Device::cpu();
        let mut runtime = Runtime::new(device.clone(), Arc::clone(&allocator)).with_library(Arc::new(dart_kernel_cpu::CpuLib));

        runtime.begin_graph("add");
        let p0 = runtime.add_parameter().unwrap();
        let p1 = runtime.add_parameter().unwrap();
        let add = runtime.add_op_node(Opcode::Add, &[p0, p1]).unwrap();
        runtime.add_return(add).unwrap();
        runtime.end_graph().unwrap();

        runtime.bind_parameter(p0, Value::Tensor(sample_tensor(&[1.0, 2.0, 3.0, 4.0], &[2, 2], &allocator, &device))).unwrap();
        runtime
            .bind_parameter(p1, Value::Tensor(sample_tensor(&[10.0, 20.0, 30.0, 40.0], &[2, 2], &allocator, &device)))
            .unwrap();

        runtime.build_kernels().unwrap();
        let result = runtime.run(true).unwrap().to_tensor();
        let ptr = result.data_ptr().unwrap().as_ptr() as *const f32;
        let out: Vec<f32> = unsafe { (0..4).map(|i| *ptr.add(i)).collect() };
        assert_eq!(out, vec![11.0, 22.0, 33.0, 44.0]);
        assert_eq!(result.shape(), vec![2, 2]);
    }

    #[test]
    fn running_before_end_graph_is_rejected() {
        let allocator = cpu_allocator();
        let mut runtime = Runtime::new(Device::cpu(), allocator);
        runtime.begin_graph("incomplete");
        let p0 = runtime.add_parameter().unwrap();
        runtime.add_return(p0).unwrap();
        assert!(matches!(runtime.run(false), Err(Error::MissingReturn)));
    }
}
