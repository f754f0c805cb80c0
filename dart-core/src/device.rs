use std::fmt::Display;
use std::sync::Arc;

/// Identifies the physical device a `Storage` or `Tensor` is pinned to. Cheap to clone: the name
/// is interned behind an `Arc<str>` since it's compared and hashed constantly by the memory pool
/// and the kernel-library registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Device(Arc<str>);

impl Device {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// The device every example in this crate and its tests run on absent a real accelerator.
    pub fn cpu() -> Self {
        Self::new("cpu")
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Device {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Device {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}
