use std::fmt;

/// The closed operator catalog shared between the graph IR and the executor.
///
/// Some opcodes never reach a [`Kernel`](crate::Kernel): the executor resolves them by aliasing
/// or recomposing an input's storage instead of dispatching a launch (spec §4.8 "dummy ops").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    MatMul,
    Reshape,
    ExpandDims,
    MakeTuple,
    TupleGetItem,
    Depend,
    Load,
    UpdateState,
    Return,
    End,
    AllGather,
    Copy,
    WaitTensor,
    Shape,
    FlashAttention,
    PagedAttention,
}

impl Opcode {
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Add => "Add",
            Opcode::Sub => "Sub",
            Opcode::Mul => "Mul",
            Opcode::Div => "Div",
            Opcode::MatMul => "MatMul",
            Opcode::Reshape => "Reshape",
            Opcode::ExpandDims => "ExpandDims",
            Opcode::MakeTuple => "MakeTuple",
            Opcode::TupleGetItem => "TupleGetItem",
            Opcode::Depend => "Depend",
            Opcode::Load => "Load",
            Opcode::UpdateState => "UpdateState",
            Opcode::Return => "Return",
            Opcode::End => "End",
            Opcode::AllGather => "AllGather",
            Opcode::Copy => "Copy",
            Opcode::WaitTensor => "WaitTensor",
            Opcode::Shape => "Shape",
            Opcode::FlashAttention => "FlashAttention",
            Opcode::PagedAttention => "PagedAttention",
        }
    }

    /// True for ops the executor resolves without a kernel launch (spec §4.8, GLOSSARY "Dummy
    /// op"): they alias an input's storage, compose/decompose a tuple, or (for `End`) terminate a
    /// leaf with no input at all.
    pub const fn is_dummy(self) -> bool {
        matches!(
            self,
            Opcode::Reshape
                | Opcode::ExpandDims
                | Opcode::MakeTuple
                | Opcode::TupleGetItem
                | Opcode::Depend
                | Opcode::Load
                | Opcode::UpdateState
                | Opcode::Return
                | Opcode::End
        )
    }

    /// True for ops whose workspace must be recomputed every run even when shapes look static
    /// (GLOSSARY "Force-resize op"): kernel selection for attention variants depends on runtime
    /// metadata the shape alone doesn't capture.
    pub const fn is_force_resize(self) -> bool {
        matches!(self, Opcode::FlashAttention | Opcode::PagedAttention)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_ops_never_require_force_resize() {
        for op in [Opcode::Reshape, Opcode::ExpandDims, Opcode::MakeTuple, Opcode::TupleGetItem, Opcode::Load, Opcode::End] {
            assert!(op.is_dummy());
            assert!(!op.is_force_resize());
        }
    }

    #[test]
    fn compute_ops_are_not_dummy() {
        for op in [Opcode::Add, Opcode::MatMul, Opcode::FlashAttention] {
            assert!(!op.is_dummy());
        }
    }
}
