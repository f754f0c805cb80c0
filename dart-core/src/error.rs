use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("tensor {label} has numel {numel} but storage only holds {available} bytes at offset {offset}")]
    StorageTooSmall {
        label: String,
        numel: usize,
        offset: usize,
        available: usize,
    },
    #[error("cannot resize storage: current allocation of {current} bytes would need to grow to {requested}, but resize requires a fresh allocation")]
    ResizeWouldReallocate { current: usize, requested: usize },
    #[error("device allocator returned null for a request of {0} bytes")]
    AllocationFailed(usize),
}

pub type Result<T> = std::result::Result<T, self::Error>;
