//! Graph validation errors

use thiserror::Error;

use crate::operand::{BlockIndex, NodeIndex};

/// Errors reported when a graph violates the shape the code generator relies on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The graph has no basic blocks.
    #[error("graph has no basic blocks")]
    Empty,

    /// A node index is outside the node table.
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeIndex),

    /// A block index is outside the block table.
    #[error("block {0:?} does not exist")]
    UnknownBlock(BlockIndex),

    /// A node is scheduled in more than one block position.
    #[error("node {0:?} is scheduled more than once")]
    ScheduledTwice(NodeIndex),

    /// A child edge refers to a node that is not computed earlier in the same block.
    #[error("node {node:?} uses {child:?}, which is not available in block {block:?}")]
    ChildNotAvailable {
        /// The consuming node.
        node: NodeIndex,
        /// The operand that is not available.
        child: NodeIndex,
        /// The block containing the consumer.
        block: BlockIndex,
    },

    /// Wrong number of operands for the operation.
    #[error("node {node:?} ({op}) expects {expected} operands, found {found}")]
    Arity {
        /// The offending node.
        node: NodeIndex,
        /// Operation name.
        op: &'static str,
        /// Expected operand count (minimum for variadic nodes).
        expected: usize,
        /// Actual operand count.
        found: usize,
    },

    /// A child that must produce a value does not.
    #[error("node {node:?} uses {child:?}, which produces no value")]
    ChildHasNoResult {
        /// The consuming node.
        node: NodeIndex,
        /// The operand without a result.
        child: NodeIndex,
    },

    /// A block does not end with a terminal node.
    #[error("block {0:?} does not end with a terminal")]
    MissingTerminal(BlockIndex),

    /// A terminal appears before the end of a block.
    #[error("terminal {node:?} is not the last node of block {block:?}")]
    TerminalNotLast {
        /// The terminal node.
        node: NodeIndex,
        /// Its block.
        block: BlockIndex,
    },

    /// A local or argument operand is outside the frame declared by the graph.
    #[error("operand {0} is outside the declared frame")]
    OperandOutOfRange(String),
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
