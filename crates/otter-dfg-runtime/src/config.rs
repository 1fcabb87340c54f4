//! VM configuration

use otter_dfg_jit::JitConfig;
use otter_dfg_jit::config::{env_flag, env_u32};
use otter_dfg_jit::osr_exit::DEFAULT_DEOPT_THRESHOLD;

/// Default heap arena size (64 MiB).
pub const DEFAULT_HEAP_SIZE: usize = 64 * 1024 * 1024;

/// Default register file size in slots.
pub const DEFAULT_REGISTER_FILE_SLOTS: usize = 64 * 1024;

/// Default number of global variable slots.
pub const DEFAULT_GLOBAL_COUNT: u32 = 64;

/// Default bound on nested calls that go through the runtime.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 256;

/// Knobs for one VM instance.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Heap arena size in bytes; cells must stay addressable by a 32-bit offset.
    pub heap_size: usize,
    /// Slots in the register file all frames live in.
    pub register_file_slots: usize,
    /// Number of global variable slots.
    pub global_count: u32,
    /// OSR exits of one unit before it is jettisoned.
    pub deopt_threshold: u32,
    /// Keep a log of every OSR exit with its reconstructed frame.
    pub record_exits: bool,
    /// Compile graph functions; when off everything runs in the baseline tier.
    pub jit_enabled: bool,
    /// Calls a function takes in the baseline tier before it is compiled.
    pub hot_call_threshold: u32,
    /// Nested calls through the runtime before a stack overflow is raised.
    pub max_call_depth: u32,
    /// Code generator settings.
    pub jit: JitConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            register_file_slots: DEFAULT_REGISTER_FILE_SLOTS,
            global_count: DEFAULT_GLOBAL_COUNT,
            deopt_threshold: DEFAULT_DEOPT_THRESHOLD,
            record_exits: false,
            jit_enabled: true,
            hot_call_threshold: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            jit: JitConfig::default(),
        }
    }
}

impl VmConfig {
    /// Read overrides from `OTTER_DFG_*` environment variables.
    ///
    /// - `OTTER_DFG_HEAP_MB`: heap arena size in MiB
    /// - `OTTER_DFG_REGISTER_FILE`: register file slots
    /// - `OTTER_DFG_DEOPT_THRESHOLD`: exits before a unit is jettisoned
    /// - `OTTER_DFG_HOT_THRESHOLD`: baseline calls before compiling
    /// - `OTTER_DFG_MAX_CALL_DEPTH`: nested runtime calls before overflow
    /// - `OTTER_DFG_RECORD_EXITS`: keep the exit log
    /// - `OTTER_DFG_DISABLE_JIT`: run everything in the baseline tier
    ///
    /// Code generator variables are read by [`JitConfig::from_env`].
    pub fn from_env() -> Self {
        let mut config = Self {
            jit: JitConfig::from_env(),
            ..Self::default()
        };
        if let Some(mb) = env_u32("OTTER_DFG_HEAP_MB").filter(|mb| (1..=4096).contains(mb)) {
            config.heap_size = mb as usize * 1024 * 1024;
        }
        if let Some(slots) = env_u32("OTTER_DFG_REGISTER_FILE").filter(|s| *s >= 1024) {
            config.register_file_slots = slots as usize;
        }
        if let Some(threshold) = env_u32("OTTER_DFG_DEOPT_THRESHOLD").filter(|t| *t > 0) {
            config.deopt_threshold = threshold;
        }
        if let Some(threshold) = env_u32("OTTER_DFG_HOT_THRESHOLD") {
            config.hot_call_threshold = threshold;
        }
        if let Some(depth) = env_u32("OTTER_DFG_MAX_CALL_DEPTH").filter(|d| *d > 0) {
            config.max_call_depth = depth;
        }
        config.record_exits = env_flag("OTTER_DFG_RECORD_EXITS");
        config.jit_enabled = !env_flag("OTTER_DFG_DISABLE_JIT");
        config
    }

    /// Configuration that never compiles.
    pub fn baseline_only() -> Self {
        Self {
            jit_enabled: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VmConfig::default();
        assert!(config.jit_enabled);
        assert_eq!(config.deopt_threshold, DEFAULT_DEOPT_THRESHOLD);
        assert_eq!(config.hot_call_threshold, 0);
        assert!(!VmConfig::baseline_only().jit_enabled);
    }
}
