use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::warn;

use crate::{DummyLib, KernelLib};

/// Environment variable naming the kernel library to select (spec §6). Unset or unknown names
/// fall back to the built-in `Dummy` library rather than failing the run.
pub const KERNEL_LIB_NAME_VAR: &str = "DART_KERNEL_LIB_NAME";

/// Comma-separated paths to dynamic kernel libraries to load before resolving the active one.
/// Recorded for parity with the external interface; this reference runtime never dlopens
/// anything, so the paths are accepted but unused.
pub const KERNEL_LIB_PATH_VAR: &str = "DART_KERNEL_LIB_PATH";

static REGISTRY: Lazy<Mutex<HashMap<String, Arc<dyn KernelLib>>>> = Lazy::new(|| {
    let mut map = HashMap::new();
    let dummy: Arc<dyn KernelLib> = Arc::new(DummyLib);
    map.insert(dummy.name().to_string(), dummy);
    Mutex::new(map)
});

/// Registers a kernel library under its own name, replacing any previous registrant with the same
/// name (spec §9 "explicit runtime context objects with a thread-safe `instance()` accessor").
pub fn register(lib: Arc<dyn KernelLib>) {
    REGISTRY.lock().expect("kernel registry mutex poisoned").insert(lib.name().to_string(), lib);
}

pub fn lookup(name: &str) -> Option<Arc<dyn KernelLib>> {
    REGISTRY.lock().expect("kernel registry mutex poisoned").get(name).cloned()
}

/// The library selected by `DART_KERNEL_LIB_NAME`, or `Dummy` if unset or not registered.
pub fn active() -> Arc<dyn KernelLib> {
    let requested = std::env::var(KERNEL_LIB_NAME_VAR).unwrap_or_else(|_| "Dummy".to_string());
    lookup(&requested).unwrap_or_else(|| {
        if requested != "Dummy" {
            warn!(requested, "kernel library not registered; falling back to Dummy");
        }
        lookup("Dummy").expect("Dummy library is always registered")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoLib;
    impl KernelLib for EchoLib {
        fn name(&self) -> &str {
            "Echo"
        }
        fn create_kernel(&self, _op: crate::Opcode) -> Option<Box<dyn crate::Kernel>> {
            None
        }
    }

    #[test]
    fn unregistered_name_falls_back_to_dummy() {
        std::env::remove_var(KERNEL_LIB_NAME_VAR);
        assert_eq!(active().name(), "Dummy");
    }

    #[test]
    fn registered_library_is_found_by_name() {
        register(Arc::new(EchoLib));
        assert_eq!(lookup("Echo").unwrap().name(), "Echo");
    }
}
