//! Graph operands and identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a node in [`crate::Graph::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    /// Create a new node index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a basic block in [`crate::Graph::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockIndex(pub u32);

impl BlockIndex {
    /// Create a new block index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Spill slot of a node result.
///
/// Every node that produces a value owns one virtual register; its frame slot
/// is where the value lives when it is not in a machine register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct VirtualRegister(pub u32);

impl VirtualRegister {
    /// Get index value
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An interpreter-visible frame variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Argument slot; `Argument(0)` is `this`.
    Argument(u32),
    /// Local variable slot.
    Local(u32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument(0) => write!(f, "this"),
            Self::Argument(i) => write!(f, "arg{i}"),
            Self::Local(i) => write!(f, "loc{i}"),
        }
    }
}

/// Interned property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Identifier(pub u32);

/// Object layout descriptor id. Zero is reserved for "no structure".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StructureId(pub u32);

impl StructureId {
    /// The reserved "unset" id used by unresolved inline caches.
    pub const NONE: Self = Self(0);
}

/// Property slot number within an object.
///
/// Offsets below the inline capacity address inline slots; the rest address
/// out-of-line slots in the butterfly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PropertyOffset(pub u32);

/// Position in the source program a node was generated for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeOrigin {
    /// Bytecode index of the originating instruction.
    pub bytecode_index: u32,
}
