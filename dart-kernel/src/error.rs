use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kernel launch failed for {op}: {0}", op = .op)]
    LaunchFailed { op: &'static str, source: anyhow::Error },
    #[error("no kernel library registered under name {0:?}")]
    LibraryNotFound(String),
    #[error("library {lib} has no kernel for opcode {op}")]
    UnsupportedOpcode { lib: String, op: &'static str },
}

pub type Result<T> = std::result::Result<T, self::Error>;
