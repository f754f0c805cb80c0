//! Builds and runs an ordered schedule over an optimized [`Graph`] (spec §4.7/§4.8).
//!
//! [`ExecutorBuilder::build`] walks the graph once, in reverse, to compute each node's
//! last-consumer free list; [`Executor`] then walks it forward, either node-by-node (serial) or
//! across a worker pool gated by a ready queue (DAG-parallel).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use dart_core::{Allocator, Device, Dtype, Tensor, Value};
use dart_kernel::{KernelLib, Opcode};

use crate::graph::Graph;
use crate::node::NodeId;
use crate::{Error, Result};

/// One scheduled step: a node plus the producer nodes whose output storage becomes reclaimable
/// once it has run. Recorded by `NodeId` rather than `Storage` handle: at plan-build time no op
/// node has executed yet, so there is nothing to hold a `Storage` handle to -- the executor
/// resolves each entry's actual storage from the now-executed producer right before freeing it.
pub struct OpRunner {
    pub node: NodeId,
    pub storages_to_free: Vec<NodeId>,
}

/// Computes each node's `storages_to_free` list by walking the graph in reverse execution order
/// (spec §4.7). Graph parameters are never auto-freed -- they belong to the caller -- and
/// neither is the value reachable from the `Return` node, since that is the value handed back to
/// the caller. `Reshape`/`ExpandDims`/`Load`/`Depend`/`UpdateState`/`Return` all alias a prior
/// node's storage rather than owning their own, so every input is tracked by its aliasing root
/// producer: the node that actually owns the storage, found by following alias chains back
/// through `root`.
pub struct ExecutorBuilder;

impl ExecutorBuilder {
    pub fn build(graph: &Graph) -> Result<Vec<OpRunner>> {
        let order = graph.order();
        let mut protected: HashSet<NodeId> = graph.parameters().iter().copied().collect();
        if let Some(ret) = graph.return_node() {
            if let Some(&input) = graph.node(ret)?.inputs.first() {
                protected.insert(Self::root(graph, input)?);
            }
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut to_free: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for &id in order.iter().rev() {
            let node = graph.node(id)?;
            if node.opcode.is_dummy() {
                continue;
            }
            for &input in &node.inputs {
                let root = Self::root(graph, input)?;
                if protected.contains(&root) {
                    continue;
                }
                if seen.insert(root) {
                    to_free.entry(id).or_default().push(root);
                }
            }
        }

        Ok(order
            .into_iter()
            .map(|node| OpRunner { storages_to_free: to_free.remove(&node).unwrap_or_default(), node })
            .collect())
    }

    /// Follows alias chains (`Reshape`, `ExpandDims`, `Load`, `Depend`, `UpdateState`, `Return`)
    /// back to the node that actually owns the storage being viewed.
    fn root(graph: &Graph, mut id: NodeId) -> Result<NodeId> {
        loop {
            let node = graph.node(id)?;
            match node.opcode {
                Opcode::Reshape | Opcode::ExpandDims | Opcode::Load | Opcode::Depend | Opcode::UpdateState | Opcode::Return => {
                    id = *node.inputs.first().ok_or(Error::ArityMismatch {
                        op: node.opcode.name(),
                        expected: 1,
                        got: 0,
                    })?;
                }
                _ => return Ok(id),
            }
        }
    }
}

/// Runs a built schedule over a graph, dispatching non-dummy ops to a kernel library and
/// resolving dummy ops (`Reshape`, `ExpandDims`, tuple/alias ops) directly (spec §4.8).
pub struct Executor<'a> {
    lib: &'a dyn KernelLib,
    allocator: Arc<dyn Allocator>,
    device: Device,
    dynamic_shape: bool,
}

impl<'a> Executor<'a> {
    pub fn new(lib: &'a dyn KernelLib, allocator: Arc<dyn Allocator>, device: Device, dynamic_shape: bool) -> Self {
        Self { lib, allocator, device, dynamic_shape }
    }

    /// Runs every scheduled node in order, on the calling thread.
    pub fn run_serial(&self, graph: &Graph, plan: &[OpRunner]) -> Result<()> {
        for runner in plan {
            self.execute(graph, runner)?;
        }
        Ok(())
    }

    /// Runs the schedule across a pool of worker threads gated by a ready queue (spec §4.8
    /// "DAG-parallel scheduling"). Pool size comes from `DART_THREAD_POOL_SIZE` (default 1).
    pub fn run_parallel(&self, graph: &Graph, plan: &[OpRunner]) -> Result<()> {
        let pool_size = crate::config::thread_pool_size();
        if pool_size <= 1 {
            return self.run_serial(graph, plan);
        }

        let index_of: HashMap<NodeId, usize> = plan.iter().enumerate().map(|(i, r)| (r.node, i)).collect();
        let mut waiting: Vec<usize> = Vec::with_capacity(plan.len());
        let mut users: Vec<Vec<usize>> = vec![Vec::new(); plan.len()];
        for (i, runner) in plan.iter().enumerate() {
            let node = graph.node(runner.node)?;
            waiting.push(node.inputs.len());
            for &input in &node.inputs {
                if let Some(&producer) = index_of.get(&input) {
                    users[producer].push(i);
                }
            }
        }

        let ready: VecDeque<usize> = (0..plan.len()).filter(|&i| waiting[i] == 0).collect();
        let state = Arc::new(Mutex::new(Scheduler { waiting, ready, running: 0, finished: 0, error: None }));
        let cv = Arc::new(Condvar::new());
        let total = plan.len();

        std::thread::scope(|scope| {
            for _ in 0..pool_size {
                let state = Arc::clone(&state);
                let cv = Arc::clone(&cv);
                let users = &users;
                scope.spawn(move || {
                    let mut guard = state.lock().expect("executor scheduler mutex poisoned");
                    loop {
                        if guard.error.is_some() || guard.finished == total {
                            return;
                        }
                        let Some(i) = guard.ready.pop_front() else {
                            if guard.running == 0 {
                                return;
                            }
                            guard = cv.wait(guard).expect("executor scheduler mutex poisoned");
                            continue;
                        };
                        guard.running += 1;
                        drop(guard);
                        let result = self.execute(graph, &plan[i]);
                        guard = state.lock().expect("executor scheduler mutex poisoned");
                        match result {
                            Ok(()) => {
                                guard.finished += 1;
                                for &user in &users[i] {
                                    guard.waiting[user] -= 1;
                                    if guard.waiting[user] == 0 {
                                        guard.ready.push_back(user);
                                    }
                                }
                            }
                            Err(err) => guard.error = Some(err.to_string()),
                        }
                        guard.running -= 1;
                        cv.notify_all();
                    }
                });
            }
        });

        let state = state.lock().expect("executor scheduler mutex poisoned");
        match &state.error {
            Some(message) => Err(Error::Aborted(message.clone())),
            None => Ok(()),
        }
    }

    fn execute(&self, graph: &Graph, runner: &OpRunner) -> Result<()> {
        let node_id = runner.node;
        let (opcode, inputs) = {
            let node = graph.node(node_id)?;
            (node.opcode, node.inputs.clone())
        };

        let output = match opcode {
            // `End` nodes are parameters and compile-time constants (`Graph::add_parameter`,
            // `add_value_node`); their output is already bound by the builder, so running one is
            // a no-op leaf rather than an alias of a (nonexistent) input.
            Opcode::End => return Ok(()),
            Opcode::UpdateState | Opcode::Return | Opcode::Depend | Opcode::Load => self.alias(graph, inputs.first().copied())?,
            Opcode::MakeTuple => {
                let values = inputs.iter().map(|&id| graph.node(id).map(|n| n.output())).collect::<Result<Vec<_>>>()?;
                Value::tuple(values)
            }
            Opcode::TupleGetItem => self.tuple_get(graph, &inputs, opcode)?,
            Opcode::Reshape | Opcode::ExpandDims => self.alias_reshaped(graph, &inputs, opcode)?,
            _ => self.launch(graph, node_id, opcode, &inputs)?,
        };

        graph.node(node_id)?.set_output(output);
        for &freed in &runner.storages_to_free {
            if let Value::Tensor(tensor) = graph.node(freed)?.output() {
                if tensor.storage().owns_data() {
                    tensor.storage().free_memory();
                }
            }
        }
        Ok(())
    }

    fn alias(&self, graph: &Graph, input: Option<NodeId>) -> Result<Value> {
        let id = input.ok_or(Error::ArityMismatch { op: "alias", expected: 1, got: 0 })?;
        Ok(graph.node(id)?.output())
    }

    fn tuple_get(&self, graph: &Graph, inputs: &[NodeId], opcode: Opcode) -> Result<Value> {
        let id = *inputs.first().ok_or(Error::ArityMismatch { op: opcode.name(), expected: 2, got: inputs.len() })?;
        let index_id = *inputs.get(1).ok_or(Error::ArityMismatch { op: opcode.name(), expected: 2, got: inputs.len() })?;
        let tuple = graph.node(id)?.output().to_tuple();
        let index = graph.node(index_id)?.output().to_int() as usize;
        tuple.get(index).cloned().ok_or(Error::TupleIndexOutOfRange { index, len: tuple.len() })
    }

    fn alias_reshaped(&self, graph: &Graph, inputs: &[NodeId], opcode: Opcode) -> Result<Value> {
        let id = *inputs.first().ok_or(Error::ArityMismatch { op: opcode.name(), expected: 1, got: inputs.len() })?;
        let source = graph.node(id)?.output().to_tensor();
        let new_shape = match opcode {
            // `Reshape`'s target shape travels as a second graph input: a `Value::Tuple` of
            // `Value::Int`s built with `Graph::add_value_node`, the same way a literal shape
            // tensor is threaded through other graph IRs.
            Opcode::Reshape => {
                let shape_id = *inputs
                    .get(1)
                    .ok_or(Error::ArityMismatch { op: opcode.name(), expected: 2, got: inputs.len() })?;
                let dims: Vec<i64> = graph.node(shape_id)?.output().to_tuple().iter().map(Value::to_int).collect();
                dart_core::resolve_reshape_shape(source.numel(), &dims)
            }
            Opcode::ExpandDims => {
                let mut shape = source.shape();
                shape.push(1);
                shape
            }
            other => unreachable!("{other} is not an aliasing reshape op"),
        };
        let aliased = Tensor::from_parts(dart_utils::Label::new(), new_shape.clone(), row_major(&new_shape), source.dtype(), source.storage(), source.offset());
        Ok(Value::Tensor(aliased))
    }

    fn launch(&self, graph: &Graph, node_id: NodeId, opcode: Opcode, inputs: &[NodeId]) -> Result<Value> {
        let input_tensors: Vec<Tensor> =
            inputs.iter().map(|&id| graph.node(id).map(|n| n.output().to_tensor())).collect::<Result<_>>()?;

        let mut kernel = self
            .lib
            .create_kernel(opcode)
            .ok_or_else(|| dart_kernel::Error::UnsupportedOpcode { lib: self.lib.name().to_string(), op: opcode.name() })
            .map_err(|source| Error::KernelFailed { node: node_id, op: opcode.name(), source })?;

        let as_kernel_error = |source: dart_kernel::Error| Error::KernelFailed { node: node_id, op: opcode.name(), source };
        kernel.init(opcode, &input_tensors).map_err(as_kernel_error)?;

        // `dynamic_shape` and "force-resize" ops (spec §4.8) both demand per-run shape inference;
        // this implementation always infers per run rather than caching a static shape from
        // `build_kernels`, which is a safe superset of both cases at the cost of re-inferring
        // shapes that a static-shape graph could have resolved once.
        tracing::trace!(
            op = opcode.name(),
            dynamic_shape = self.dynamic_shape,
            force_resize = opcode.is_force_resize(),
            "inferring shape for this run"
        );
        let shape = kernel.infer_shape(&input_tensors).map_err(as_kernel_error)?;
        let output = Tensor::new_owned(shape, Dtype::Unknown, self.device.clone(), Arc::clone(&self.allocator));
        let workspace_bytes = kernel.resize(&input_tensors, &output).map_err(as_kernel_error)?;
        let workspace = if workspace_bytes > 0 {
            let ws = Tensor::new_owned(vec![workspace_bytes as i64], Dtype::U8, self.device.clone(), Arc::clone(&self.allocator));
            ws.storage().allocate_memory(&format!("{}:workspace", opcode.name()));
            Some(ws)
        } else {
            None
        };

        output.storage().allocate_memory(&output.label());
        kernel.launch(&input_tensors, &output, workspace.as_ref()).map_err(as_kernel_error)?;
        if let Some(ws) = &workspace {
            ws.storage().free_memory();
        }
        Ok(Value::Tensor(output))
    }
}

struct Scheduler {
    waiting: Vec<usize>,
    ready: VecDeque<usize>,
    running: usize,
    finished: usize,
    error: Option<String>,
}

fn row_major(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1].max(0);
    }
    strides
}
