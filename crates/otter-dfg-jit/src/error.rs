//! Code generation errors
//!
//! Any error aborts the compiled unit: nothing is installed and execution
//! continues in the tier that was already running.

use cranelift_module::ModuleError;
use otter_dfg_graph::{GraphError, NodeIndex};

use crate::generation_info::DataFormat;
use crate::runtime_helpers::HelperKind;

/// Errors produced by the speculative code generator.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// Cranelift module-level error.
    #[error("cranelift module error: {0}")]
    Module(Box<ModuleError>),

    /// Failed to create the JIT builder.
    #[error("jit builder initialization failed: {0}")]
    Builder(String),

    /// The input graph is malformed.
    #[error("invalid graph: {0}")]
    Graph(#[from] GraphError),

    /// A runtime helper needed by a node is not registered.
    #[error("runtime helper {helper:?} is not available (node {node:?})")]
    MissingHelper {
        /// Node being compiled.
        node: NodeIndex,
        /// Missing helper.
        helper: HelperKind,
    },

    /// A node reached code generation in a form upstream passes should have rewritten.
    #[error("node {node:?} ({op}) is not supported here: {reason}")]
    UnsupportedNode {
        /// Offending node.
        node: NodeIndex,
        /// Operation name.
        op: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A value's tracked format cannot produce the requested format.
    #[error("node {node:?}: cannot produce {requested:?} from {current:?}")]
    FormatConversion {
        /// The value being filled.
        node: NodeIndex,
        /// Tracked format.
        current: DataFormat,
        /// Requested format.
        requested: DataFormat,
    },

    /// A use refers to a value that has no generation state.
    #[error("node {node:?} has no live value")]
    DeadValue {
        /// The value.
        node: NodeIndex,
    },

    /// Every register of a bank is locked.
    #[error("register bank exhausted while compiling node {node:?}")]
    RegisterExhausted {
        /// Node being compiled.
        node: NodeIndex,
    },
}

impl From<ModuleError> for JitError {
    fn from(value: ModuleError) -> Self {
        Self::Module(Box::new(value))
    }
}

/// Result type for code generation
pub type Result<T> = std::result::Result<T, JitError>;
