use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("device has no more address space for a block of {0} bytes")]
    OutOfCapacity(usize),
}

pub type Result<T> = std::result::Result<T, self::Error>;
