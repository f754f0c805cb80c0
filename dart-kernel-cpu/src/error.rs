use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} requires operands of dtype {expected:?}, got {got:?}")]
    DtypeMismatch { op: &'static str, expected: dart_core::Dtype, got: dart_core::Dtype },
    #[error("{op} requires matching shapes, got {lhs:?} and {rhs:?} (broadcasting is not implemented)")]
    ShapeMismatch { op: &'static str, lhs: Vec<i64>, rhs: Vec<i64> },
    #[error("matmul requires 2-D operands, got {0:?}")]
    NotMatrix(Vec<i64>),
    #[error("matmul inner dimensions disagree: {0:?} x {1:?}")]
    InnerDimMismatch(Vec<i64>, Vec<i64>),
    #[error("{op} has no output storage allocated")]
    UnallocatedOutput { op: &'static str },
    #[error("{op} expects {expected} operand(s), got {got}")]
    Arity { op: &'static str, expected: usize, got: usize },
    #[error(transparent)]
    Core(#[from] dart_core::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;

impl From<Error> for dart_kernel::Error {
    fn from(err: Error) -> Self {
        dart_kernel::Error::LaunchFailed {
            op: "cpu-kernel",
            source: anyhow::Error::new(err),
        }
    }
}
