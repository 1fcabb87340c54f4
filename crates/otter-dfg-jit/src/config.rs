//! Compiler configuration

/// What a slow-put array-storage write does when it lands on a hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlowPutHoleWrites {
    /// Call the generic put helper, which honours prototype-chain interception.
    #[default]
    SlowPath,
    /// Store in place, like plain array storage.
    Store,
}

/// Knobs for the speculative code generator.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Hole-write policy for slow-put array storage.
    pub slow_put_hole_writes: SlowPutHoleWrites,
    /// Replace checks with watchpoints when the oracle allows it.
    pub use_watchpoints: bool,
    /// Emit the direct-call fast path at call sites.
    pub link_direct_calls: bool,
    /// Log the Cranelift IR of every compiled unit at `trace` level.
    pub dump_ir: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            slow_put_hole_writes: SlowPutHoleWrites::default(),
            use_watchpoints: true,
            link_direct_calls: true,
            dump_ir: false,
        }
    }
}

impl JitConfig {
    /// Read overrides from `OTTER_DFG_*` environment variables.
    ///
    /// - `OTTER_DFG_SLOW_PUT_HOLE_STORE`: store slow-put hole writes in place
    /// - `OTTER_DFG_NO_WATCHPOINTS`: always emit explicit checks
    /// - `OTTER_DFG_NO_CALL_LINKING`: always take the slow call path
    /// - `OTTER_DFG_DUMP_IR`: log generated IR
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if env_flag("OTTER_DFG_SLOW_PUT_HOLE_STORE") {
            config.slow_put_hole_writes = SlowPutHoleWrites::Store;
        }
        if env_flag("OTTER_DFG_NO_WATCHPOINTS") {
            config.use_watchpoints = false;
        }
        if env_flag("OTTER_DFG_NO_CALL_LINKING") {
            config.link_direct_calls = false;
        }
        config.dump_ir = env_flag("OTTER_DFG_DUMP_IR");
        config
    }
}

/// Whether an environment value means "enabled".
pub fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

/// Read a boolean flag from the environment.
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .is_some_and(|v| parse_env_truthy(&v))
}

/// Read a `u32` from the environment.
pub fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(parse_env_truthy("1"));
        assert!(parse_env_truthy("yes"));
        assert!(!parse_env_truthy("0"));
        assert!(!parse_env_truthy(" Off "));
        assert!(!parse_env_truthy(""));
    }

    #[test]
    fn defaults() {
        let config = JitConfig::default();
        assert_eq!(config.slow_put_hole_writes, SlowPutHoleWrites::SlowPath);
        assert!(config.use_watchpoints);
        assert!(config.link_direct_calls);
    }
}
