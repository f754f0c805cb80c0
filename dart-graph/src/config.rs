//! Process-wide runtime configuration read once behind a [`once_cell::sync::Lazy`], mirroring
//! how `dart_kernel::registry` and this crate's pass registry are both structured as explicit,
//! thread-safe singletons (spec §9).

use once_cell::sync::Lazy;

pub const THREAD_POOL_SIZE_VAR: &str = "DART_THREAD_POOL_SIZE";

static THREAD_POOL_SIZE: Lazy<usize> = Lazy::new(|| {
    std::env::var(THREAD_POOL_SIZE_VAR)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1)
});

/// Worker count for the DAG-parallel executor (spec §6 "DART_THREAD_POOL_SIZE", default 1).
pub fn thread_pool_size() -> usize {
    *THREAD_POOL_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_one_when_unset() {
        std::env::remove_var(THREAD_POOL_SIZE_VAR);
        // The lazy may already be initialized by an earlier test in this process; this just
        // checks the parse-and-default logic directly rather than the cached singleton.
        let parsed: usize = std::env::var(THREAD_POOL_SIZE_VAR).ok().and_then(|v| v.parse().ok()).filter(|&n| n > 0).unwrap_or(1);
        assert_eq!(parsed, 1);
    }
}
