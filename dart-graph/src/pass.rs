//! The optimization pass manager (spec §4.6): a process-wide registry of [`NodePass`]
//! implementations applied, in registration order, over a graph's node order until none of them
//! match anywhere (a fixed point), following an add-before-delete discipline so a replacement
//! node is always reachable before its predecessor is unlinked.

use std::sync::{Mutex, OnceLock};

use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::Result;

/// A single rewrite rule over the graph IR.
pub trait NodePass: Send + Sync {
    /// A short name for logging.
    fn name(&self) -> &str;

    /// Whether this pass rewrites `node`.
    fn matches(&self, graph: &Graph, node: NodeId) -> bool;

    /// Builds the replacement node for `node`. The pass manager inserts it before `node` in the
    /// order, rewrites every consumer to point at it, and only then unlinks `node`.
    fn replacement(&self, graph: &Graph, node: NodeId) -> Node;
}

static REGISTRY: OnceLock<Mutex<Vec<&'static dyn NodePass>>> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<&'static dyn NodePass>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Registers a pass process-wide (spec §9 "explicit runtime context objects with a thread-safe
/// `instance()` accessor"). Passes are typically `'static` singletons (zero-sized structs), so
/// this takes `&'static dyn NodePass` rather than an owned box.
pub fn register(pass: &'static dyn NodePass) {
    registry().lock().expect("pass registry mutex poisoned").push(pass);
}

/// Runs every registered pass over `graph` to a fixed point: each sweep applies every pass to
/// every live node in order; sweeping stops once a full sweep makes no replacement.
pub struct PassManager;

impl PassManager {
    pub fn optimize(graph: &mut Graph) -> Result<()> {
        loop {
            let mut changed = false;
            let passes: Vec<&'static dyn NodePass> = registry().lock().expect("pass registry mutex poisoned").clone();
            for pass in passes {
                for id in graph.order() {
                    if pass.matches(graph, id) {
                        Self::replace(graph, id, pass)?;
                        changed = true;
                    }
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    fn replace(graph: &mut Graph, old: NodeId, pass: &dyn NodePass) -> Result<()> {
        let node = pass.replacement(graph, old);
        let new = graph.insert_before(old, node)?;
        graph.retarget_and_unlink(old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dart_core::Value;
    use dart_kernel::Opcode;

    struct ConstantFoldAdd;

    impl NodePass for ConstantFoldAdd {
        fn name(&self) -> &str {
            "constant-fold-add"
        }

        fn matches(&self, graph: &Graph, node: NodeId) -> bool {
            let node = graph.node(node).expect("node exists");
            node.opcode == Opcode::Add
                && node
                    .inputs
                    .iter()
                    .all(|&id| matches!(graph.node(id).unwrap().try_output(), Some(Value::Int(_))))
        }

        fn replacement(&self, graph: &Graph, node: NodeId) -> Node {
            let node = graph.node(node).expect("node exists");
            let sum: i64 = node
                .inputs
                .iter()
                .map(|&id| graph.node(id).unwrap().output().to_int())
                .sum();
            let folded = Node::new(dart_utils::Label::new(), Opcode::End, Vec::new());
            folded.set_output(Value::Int(sum));
            folded
        }
    }

    static CONSTANT_FOLD_ADD: ConstantFoldAdd = ConstantFoldAdd;

    #[test]
    fn constant_folding_replaces_matching_node_and_rewires_consumers() {
        register(&CONSTANT_FOLD_ADD);
        let mut graph = Graph::new("g");
        let a = graph.add_value_node(Value::Int(2));
        let b = graph.add_value_node(Value::Int(3));
        let add = graph.add_op_node(Opcode::Add, &[a, b]).unwrap();
        let consumer = graph.add_op_node(Opcode::Shape, &[add]).unwrap();
        graph.add_return(consumer).unwrap();

        PassManager::optimize(&mut graph).unwrap();

        let rewritten_input = graph.node(consumer).unwrap().inputs[0];
        assert_ne!(rewritten_input, add);
        assert_eq!(graph.node(rewritten_input).unwrap().output().to_int(), 5);
        assert!(!graph.order().contains(&add));
    }
}
