use std::sync::Mutex;

use dart_core::Value;
use dart_kernel::Opcode;
use dart_utils::Label;

/// An index into [`Graph`](crate::Graph)'s node arena. Indices, not raw pointers, back the IR's
/// owner graph so the doubly-linked ordering and use/def maps can be rewritten by a pass without
/// touching real memory addresses (spec §9 "arena-backed indices").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// One instruction in the graph: an opcode applied to a fixed list of input nodes, producing one
/// output [`Value`]. Parameters and constant-value nodes use [`Opcode::End`] with no inputs;
/// [`Opcode::Load`] is the aliasing op that re-derefs an already-bound input's storage.
pub struct Node {
    pub label: Label,
    pub opcode: Opcode,
    pub inputs: Vec<NodeId>,
    output: Mutex<Option<Value>>,
    /// Links in the graph's node order (spec §9 "doubly-linked lists implemented via indices").
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

impl Node {
    pub fn new(label: Label, opcode: Opcode, inputs: Vec<NodeId>) -> Self {
        Self {
            label,
            opcode,
            inputs,
            output: Mutex::new(None),
            prev: None,
            next: None,
        }
    }

    pub fn set_output(&self, value: Value) {
        *self.output.lock().expect("node output mutex poisoned") = Some(value);
    }

    /// The node's produced value.
    ///
    /// # Panics
    /// Panics if the node hasn't run yet; the executor guarantees producers run before consumers
    /// read their output; any other caller sequencing is a programmer error.
    pub fn output(&self) -> Value {
        self.output
            .lock()
            .expect("node output mutex poisoned")
            .clone()
            .unwrap_or_else(|| panic!("node {} ({}) read before it was executed", self.label, self.opcode))
    }

    pub fn try_output(&self) -> Option<Value> {
        self.output.lock().expect("node output mutex poisoned").clone()
    }

    pub fn clear_output(&self) {
        *self.output.lock().expect("node output mutex poisoned") = None;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("label", &self.label)
            .field("opcode", &self.opcode)
            .field("inputs", &self.inputs)
            .finish()
    }
}
