use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("node {0:?} does not exist in this graph")]
    NodeNotFound(crate::node::NodeId),
    #[error("parameter {0:?} was never bound to a value before run()")]
    UnboundParameter(crate::node::NodeId),
    #[error("graph has no Return node; build add_return() before running")]
    MissingReturn,
    #[error("kernel launch failed for node {node:?} ({op}): {source}")]
    KernelFailed {
        node: crate::node::NodeId,
        op: &'static str,
        #[source]
        source: dart_kernel::Error,
    },
    #[error("device out of memory while allocating {bytes} bytes for node {node:?}")]
    OutOfMemory { node: crate::node::NodeId, bytes: usize },
    #[error("tuple_getitem index {index} out of range for tuple of length {len}")]
    TupleIndexOutOfRange { index: usize, len: usize },
    #[error("wrong number of inputs for {op}: expected {expected}, got {got}")]
    ArityMismatch { op: &'static str, expected: usize, got: usize },
    #[error("dag executor aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Core(#[from] dart_core::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;
