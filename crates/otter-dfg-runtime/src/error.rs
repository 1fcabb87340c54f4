//! VM error types

use otter_dfg_graph::GraphError;
use otter_dfg_jit::JitError;
use thiserror::Error;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g., calling a non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Range error (e.g., invalid array length)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Stack overflow
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// The heap arena is exhausted
    #[error("OutOfMemory: heap arena exhausted ({requested} bytes requested)")]
    OutOfMemory {
        /// Size of the failed allocation.
        requested: usize,
    },

    /// A graph failed validation
    #[error("invalid graph: {0}")]
    Graph(#[from] GraphError),

    /// Compilation was aborted; surfaced for diagnostics only
    #[error("compilation aborted: {0}")]
    Compile(#[from] JitError),

    /// Internal error
    #[error("InternalError: {0}")]
    Internal(String),
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error is a language-level exception rather than an engine failure.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Self::TypeError(_) | Self::RangeError(_) | Self::StackOverflow
        )
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;
