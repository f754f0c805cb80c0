//! The graph IR: an arena of [`Node`]s plus the doubly-linked order passes rewrite (spec §9).

use std::collections::HashMap;

use dart_core::Value;
use dart_kernel::Opcode;
use dart_utils::Label;

use crate::node::{Node, NodeId};
use crate::{Error, Result};

/// A single computation graph under construction or already built (spec §6 "Graph builder API").
pub struct Graph {
    name: Label,
    nodes: Vec<Node>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    parameters: Vec<NodeId>,
    return_node: Option<NodeId>,
    finished: bool,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Label::from(name.into()),
            nodes: Vec::new(),
            head: None,
            tail: None,
            parameters: Vec::new(),
            return_node: None,
            finished: false,
        }
    }

    pub fn name(&self) -> &Label {
        &self.name
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Declares a graph input. Parameters are bound to an actual [`Value`] with
    /// [`Graph::bind_parameter`] before `run`.
    pub fn add_parameter(&mut self) -> NodeId {
        let id = self.push(Node::new(Label::new(), Opcode::End, Vec::new()));
        self.parameters.push(id);
        id
    }

    pub fn bind_parameter(&mut self, id: NodeId, value: Value) -> Result<()> {
        self.node(id)?;
        if !self.parameters.contains(&id) {
            return Err(Error::NodeNotFound(id));
        }
        self.nodes[id.0].set_output(value);
        Ok(())
    }

    /// Adds a node whose output is a compile-time-known constant.
    pub fn add_value_node(&mut self, value: Value) -> NodeId {
        let id = self.push(Node::new(Label::new(), Opcode::End, Vec::new()));
        self.nodes[id.0].set_output(value);
        id
    }

    pub fn add_op_node(&mut self, op: Opcode, inputs: &[NodeId]) -> Result<NodeId> {
        for &input in inputs {
            self.node(input)?;
        }
        Ok(self.push(Node::new(Label::new(), op, inputs.to_vec())))
    }

    pub fn add_return(&mut self, input: NodeId) -> Result<NodeId> {
        self.node(input)?;
        let id = self.push(Node::new(Label::new(), Opcode::Return, vec![input]));
        self.return_node = Some(id);
        Ok(id)
    }

    pub fn end_graph(&mut self) -> Result<()> {
        if self.return_node.is_none() {
            return Err(Error::MissingReturn);
        }
        self.finished = true;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(Error::NodeNotFound(id))
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn return_node(&self) -> Option<NodeId> {
        self.return_node
    }

    /// Live node ids in graph order, following the doubly-linked list rather than arena index
    /// order (a pass's `insert_before` appends to the arena but splices into the middle of the
    /// order).
    pub fn order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            order.push(id);
            cursor = self.nodes[id.0].next;
        }
        order
    }

    /// Maps each live node to the nodes that consume it, recomputed from the current node order
    /// (spec §9 "UseDef map").
    pub fn use_def(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut map: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for id in self.order() {
            for &input in &self.nodes[id.0].inputs {
                map.entry(input).or_default().push(id);
            }
        }
        map
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.link_tail(id);
        id
    }

    fn link_tail(&mut self, id: NodeId) {
        if let Some(tail) = self.tail {
            self.nodes[tail.0].next = Some(id);
            self.nodes[id.0].prev = Some(tail);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
    }

    /// Splices a freshly-pushed `node` into the order immediately before `anchor`, returning its
    /// id. Used by [`crate::pass::PassManager::replace`]'s add-before-delete discipline: the
    /// replacement must exist in the order before its predecessor is unlinked.
    pub(crate) fn insert_before(&mut self, anchor: NodeId, mut node: Node) -> Result<NodeId> {
        self.node(anchor)?;
        let id = NodeId(self.nodes.len());
        let prev = self.nodes[anchor.0].prev;
        node.prev = prev;
        node.next = Some(anchor);
        self.nodes.push(node);
        if let Some(prev_id) = prev {
            self.nodes[prev_id.0].next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.nodes[anchor.0].prev = Some(id);
        Ok(id)
    }

    /// Rewrites every input reference (and the return node, if it points at `old`) from `old` to
    /// `new`, then unlinks `old` from the order. `old`'s arena slot is kept as a tombstone so
    /// existing `NodeId`s elsewhere stay valid.
    pub(crate) fn retarget_and_unlink(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        self.node(old)?;
        self.node(new)?;
        for node in &mut self.nodes {
            for input in &mut node.inputs {
                if *input == old {
                    *input = new;
                }
            }
        }
        if self.return_node == Some(old) {
            self.return_node = Some(new);
        }
        let prev = self.nodes[old.0].prev;
        let next = self.nodes[old.0].next;
        match prev {
            Some(prev_id) => self.nodes[prev_id.0].next = next,
            None => self.head = next,
        }
        match next {
            Some(next_id) => self.nodes[next_id.0].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[old.0].prev = None;
        self.nodes[old.0].next = None;
        Ok(())
    }
}
