//! The ref-count tensor recycler (spec §4.9 "simpler, logical-reference variant"): an
//! alternative to [`crate::executor::ExecutorBuilder`]'s static last-consumer free list, freeing
//! a producer's output as soon as its last live consumer finishes rather than precomputing the
//! whole schedule up front. `Executor::run_serial`/`run_parallel` use the static free list by
//! default (it is what spec §8 scenario 6 asserts against); this is offered as the alternative
//! the spec names, for callers that want to recycle storage as execution proceeds instead of
//! planning it ahead of time.

use std::collections::HashMap;

use dart_core::Value;

use crate::graph::Graph;
use crate::node::NodeId;
use crate::Result;

pub struct TensorRecycler {
    ref_counts: HashMap<NodeId, usize>,
}

impl TensorRecycler {
    /// Builds `ref_counts[node]` from the graph's use-def edges, skipping dummy producers
    /// (`Reshape`, `MakeTuple`, `TupleGetItem`, `Depend`, ...) on both sides: a dummy node's
    /// output shares storage with one of its own inputs, so recycling it independently would
    /// double-free that storage.
    pub fn new(graph: &Graph) -> Result<Self> {
        let use_def = graph.use_def();
        let mut ref_counts = HashMap::new();
        for id in graph.order() {
            let node = graph.node(id)?;
            if node.opcode.is_dummy() {
                continue;
            }
            let live_consumers = use_def.get(&id).map(|users| users.len()).unwrap_or(0);
            ref_counts.insert(id, live_consumers);
        }
        Ok(Self { ref_counts })
    }

    /// Call after `node` has produced its output: decrements the ref count of each of its
    /// non-dummy input producers, invoking `free` for any predecessor whose count reaches zero.
    pub fn after_execute(&mut self, graph: &Graph, node: NodeId, mut free: impl FnMut(NodeId)) -> Result<()> {
        let current = graph.node(node)?;
        if current.opcode.is_dummy() {
            return Ok(());
        }
        for &input in &current.inputs {
            let Some(count) = self.ref_counts.get_mut(&input) else { continue };
            *count = count.saturating_sub(1);
            if *count == 0 {
                if let Some(Value::Tensor(tensor)) = graph.node(input)?.try_output() {
                    if tensor.storage().owns_data() {
                        free(input);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dart_kernel::Opcode;

    #[test]
    fn ref_count_starts_at_live_consumer_count() {
        let mut graph = Graph::new("g");
        let a = graph.add_value_node(Value::Int(1));
        let b = graph.add_value_node(Value::Int(2));
        let c = graph.add_op_node(Opcode::Add, &[a, b]).unwrap();
        let d = graph.add_op_node(Opcode::Mul, &[c, a]).unwrap();
        graph.add_return(d).unwrap();
        let recycler = TensorRecycler::new(&graph).unwrap();
        assert_eq!(recycler.ref_counts[&a], 2);
        assert_eq!(recycler.ref_counts[&c], 1);
    }

    #[test]
    fn predecessor_is_freed_once_every_consumer_has_run() {
        let mut graph = Graph::new("g");
        let a = graph.add_value_node(Value::Int(1));
        let b = graph.add_value_node(Value::Int(2));
        let c = graph.add_op_node(Opcode::Add, &[a, b]).unwrap();
        graph.add_return(c).unwrap();
        let mut recycler = TensorRecycler::new(&graph).unwrap();
        let mut freed = Vec::new();
        recycler.after_execute(&graph, c, |id| freed.push(id)).unwrap();
        // `a` and `b` are Int values, not tensors, so nothing is freed through the allocator --
        // but their ref counts still drop to zero without panicking.
        assert!(freed.is_empty());
        assert_eq!(recycler.ref_counts[&a], 0);
        assert_eq!(recycler.ref_counts[&b], 0);
    }
}
