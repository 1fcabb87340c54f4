//! Graph nodes and operand edges

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::array_mode::{ArrayMode, ArrayType};
use crate::operand::{
    BlockIndex, CodeOrigin, Identifier, NodeIndex, Operand, PropertyOffset, StructureId,
    VirtualRegister,
};
use crate::speculated_type::SpeculatedType;
use crate::structure_set::StructureSet;
use crate::use_kind::UseKind;
use crate::value::JsValue;

/// A typed reference from a node to one of its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// The operand.
    pub node: NodeIndex,
    /// What this use speculates about the operand.
    pub use_kind: UseKind,
}

impl Edge {
    /// Edge with an explicit use kind.
    pub const fn new(node: NodeIndex, use_kind: UseKind) -> Self {
        Self { node, use_kind }
    }

    /// Boxed use with no speculation.
    pub const fn untyped(node: NodeIndex) -> Self {
        Self::new(node, UseKind::Untyped)
    }

    /// Speculated int32 use.
    pub const fn int32(node: NodeIndex) -> Self {
        Self::new(node, UseKind::Int32)
    }

    /// Speculated number use.
    pub const fn number(node: NodeIndex) -> Self {
        Self::new(node, UseKind::Number)
    }

    /// Speculated cell use.
    pub const fn cell(node: NodeIndex) -> Self {
        Self::new(node, UseKind::Cell)
    }

    /// Speculated object use.
    pub const fn object(node: NodeIndex) -> Self {
        Self::new(node, UseKind::Object)
    }

    /// Speculated boolean use.
    pub const fn boolean(node: NodeIndex) -> Self {
        Self::new(node, UseKind::Boolean)
    }
}

/// Overflow and negative-zero checks required by an arithmetic node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArithMode {
    /// Results wrap (bit operations, or uses that truncate to int32 anyway).
    Unchecked,
    /// Int32 overflow exits.
    #[default]
    CheckOverflow,
    /// Int32 overflow and a `-0` result both exit.
    CheckOverflowAndNegativeZero,
}

impl ArithMode {
    /// Whether overflow must be detected.
    pub fn checks_overflow(self) -> bool {
        !matches!(self, Self::Unchecked)
    }

    /// Whether a `-0` result must be detected.
    pub fn checks_negative_zero(self) -> bool {
        matches!(self, Self::CheckOverflowAndNegativeZero)
    }
}

/// Operation performed by a node, with its operation-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeOp {
    /// Compile-time constant.
    JsConstant(JsValue),
    /// Read a frame variable.
    GetLocal(Operand),
    /// Write a frame variable. `[value]`
    SetLocal(Operand),
    /// Record that a frame variable now holds a value, without storing it. `[value]`
    MovHint(Operand),
    /// Keep operands alive and type-checked. `[any...]`
    Phantom,
    /// ToInt32 conversion. `[value]`
    ValueToInt32,
    /// Reinterpret an int32 as uint32. `[int32]`
    UInt32ToNumber(ArithMode),
    /// `a + b` on numbers. `[a, b]`
    ArithAdd(ArithMode),
    /// `a - b`. `[a, b]`
    ArithSub(ArithMode),
    /// `a * b`. `[a, b]`
    ArithMul(ArithMode),
    /// `a / b`. `[a, b]`
    ArithDiv(ArithMode),
    /// `a % b`. `[a, b]`
    ArithMod(ArithMode),
    /// `-a`. `[a]`
    ArithNegate(ArithMode),
    /// `Math.abs(a)`. `[a]`
    ArithAbs(ArithMode),
    /// `Math.min(a, b)`. `[a, b]`
    ArithMin,
    /// `Math.max(a, b)`. `[a, b]`
    ArithMax,
    /// `Math.sqrt(a)`. `[a]`
    ArithSqrt,
    /// Generic `+` (numbers or string concatenation). `[a, b]`
    ValueAdd,
    /// `a & b`. `[a, b]`
    BitAnd,
    /// `a | b`. `[a, b]`
    BitOr,
    /// `a ^ b`. `[a, b]`
    BitXor,
    /// `a << b`. `[a, b]`
    BitLShift,
    /// `a >> b`. `[a, b]`
    BitRShift,
    /// `a >>> b`. `[a, b]`
    BitURShift,
    /// `a < b`. `[a, b]`
    CompareLess,
    /// `a <= b`. `[a, b]`
    CompareLessEq,
    /// `a > b`. `[a, b]`
    CompareGreater,
    /// `a >= b`. `[a, b]`
    CompareGreaterEq,
    /// `a == b`. `[a, b]`
    CompareEq,
    /// `a === b`. `[a, b]`
    CompareStrictEq,
    /// `!a`. `[a]`
    LogicalNot,
    /// Exit unless the cell's structure is in the set. `[cell]`
    CheckStructure(StructureSet),
    /// Assume the cell keeps this structure; watch for transitions. `[cell]`
    StructureTransitionWatchpoint(StructureId),
    /// Exit unless the cell has the storage the mode expects. `[cell]`
    CheckArray(ArrayMode),
    /// Exit unless the value is this exact cell. `[value]`
    CheckFunction(JsValue),
    /// Unconditional exit: the profile never reached this point.
    ForceOsrExit,
    /// Load the out-of-line storage pointer. `[cell]`
    GetButterfly,
    /// Load a property at a known offset. `[storage, base]`
    GetByOffset {
        /// Property name (used by the non-speculative tier).
        identifier: Identifier,
        /// Slot number.
        offset: PropertyOffset,
    },
    /// Store a property at a known offset. `[storage, base, value]`
    PutByOffset {
        /// Property name (used by the non-speculative tier).
        identifier: Identifier,
        /// Slot number.
        offset: PropertyOffset,
    },
    /// Cached named property read. `[base]`
    GetById(Identifier),
    /// Cached named property write honouring the prototype chain. `[base, value]`
    PutById(Identifier),
    /// Cached named property definition on the base itself. `[base, value]`
    PutByIdDirect(Identifier),
    /// Indexed read. `[base, index]`
    GetByVal(ArrayMode),
    /// Indexed write. `[base, index, value]`
    PutByVal(ArrayMode),
    /// Length of an indexed base. `[base]`
    GetArrayLength(ArrayMode),
    /// `s.charCodeAt(i)` with the result as int32. `[string, index]`
    StringCharCodeAt,
    /// Read a global variable.
    GetGlobalVar(u32),
    /// Write a global variable. `[value]`
    PutGlobalVar(u32),
    /// Assume a global variable is never written; watch for writes.
    GlobalVarWatchpoint(u32),
    /// Allocate an empty object with this structure.
    NewObject(StructureId),
    /// Allocate an array with this indexing shape from the operands. `[values...]`
    NewArray(ArrayType),
    /// Allocate the receiver of a constructor from the callee's `prototype`.
    CreateThis,
    /// Materialise an arguments object for the current frame.
    CreateArguments,
    /// Call. `[callee, this, arguments...]`
    Call,
    /// Construct. `[callee, arguments...]`
    Construct,
    /// Unconditional branch.
    Jump(BlockIndex),
    /// Two-way branch on truthiness. `[condition]`
    Branch {
        /// Successor when the condition is truthy.
        taken: BlockIndex,
        /// Successor when the condition is falsy.
        not_taken: BlockIndex,
    },
    /// Return from the function. `[value]`
    Return,
}

/// Expected operand count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many operands.
    Fixed(usize),
    /// At least this many operands.
    AtLeast(usize),
}

impl NodeOp {
    /// Operation name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JsConstant(_) => "JSConstant",
            Self::GetLocal(_) => "GetLocal",
            Self::SetLocal(_) => "SetLocal",
            Self::MovHint(_) => "MovHint",
            Self::Phantom => "Phantom",
            Self::ValueToInt32 => "ValueToInt32",
            Self::UInt32ToNumber(_) => "UInt32ToNumber",
            Self::ArithAdd(_) => "ArithAdd",
            Self::ArithSub(_) => "ArithSub",
            Self::ArithMul(_) => "ArithMul",
            Self::ArithDiv(_) => "ArithDiv",
            Self::ArithMod(_) => "ArithMod",
            Self::ArithNegate(_) => "ArithNegate",
            Self::ArithAbs(_) => "ArithAbs",
            Self::ArithMin => "ArithMin",
            Self::ArithMax => "ArithMax",
            Self::ArithSqrt => "ArithSqrt",
            Self::ValueAdd => "ValueAdd",
            Self::BitAnd => "BitAnd",
            Self::BitOr => "BitOr",
            Self::BitXor => "BitXor",
            Self::BitLShift => "BitLShift",
            Self::BitRShift => "BitRShift",
            Self::BitURShift => "BitURShift",
            Self::CompareLess => "CompareLess",
            Self::CompareLessEq => "CompareLessEq",
            Self::CompareGreater => "CompareGreater",
            Self::CompareGreaterEq => "CompareGreaterEq",
            Self::CompareEq => "CompareEq",
            Self::CompareStrictEq => "CompareStrictEq",
            Self::LogicalNot => "LogicalNot",
            Self::CheckStructure(_) => "CheckStructure",
            Self::StructureTransitionWatchpoint(_) => "StructureTransitionWatchpoint",
            Self::CheckArray(_) => "CheckArray",
            Self::CheckFunction(_) => "CheckFunction",
            Self::ForceOsrExit => "ForceOSRExit",
            Self::GetButterfly => "GetButterfly",
            Self::GetByOffset { .. } => "GetByOffset",
            Self::PutByOffset { .. } => "PutByOffset",
            Self::GetById(_) => "GetById",
            Self::PutById(_) => "PutById",
            Self::PutByIdDirect(_) => "PutByIdDirect",
            Self::GetByVal(_) => "GetByVal",
            Self::PutByVal(_) => "PutByVal",
            Self::GetArrayLength(_) => "GetArrayLength",
            Self::StringCharCodeAt => "StringCharCodeAt",
            Self::GetGlobalVar(_) => "GetGlobalVar",
            Self::PutGlobalVar(_) => "PutGlobalVar",
            Self::GlobalVarWatchpoint(_) => "GlobalVarWatchpoint",
            Self::NewObject(_) => "NewObject",
            Self::NewArray(_) => "NewArray",
            Self::CreateThis => "CreateThis",
            Self::CreateArguments => "CreateArguments",
            Self::Call => "Call",
            Self::Construct => "Construct",
            Self::Jump(_) => "Jump",
            Self::Branch { .. } => "Branch",
            Self::Return => "Return",
        }
    }

    /// Operand count the operation expects.
    pub fn arity(&self) -> Arity {
        use Arity::{AtLeast, Fixed};
        match self {
            Self::JsConstant(_)
            | Self::GetLocal(_)
            | Self::ForceOsrExit
            | Self::GetGlobalVar(_)
            | Self::GlobalVarWatchpoint(_)
            | Self::NewObject(_)
            | Self::CreateThis
            | Self::CreateArguments
            | Self::Jump(_) => Fixed(0),
            Self::SetLocal(_)
            | Self::MovHint(_)
            | Self::ValueToInt32
            | Self::UInt32ToNumber(_)
            | Self::ArithNegate(_)
            | Self::ArithAbs(_)
            | Self::ArithSqrt
            | Self::LogicalNot
            | Self::CheckStructure(_)
            | Self::StructureTransitionWatchpoint(_)
            | Self::CheckArray(_)
            | Self::CheckFunction(_)
            | Self::GetButterfly
            | Self::GetById(_)
            | Self::GetArrayLength(_)
            | Self::PutGlobalVar(_)
            | Self::Branch { .. }
            | Self::Return => Fixed(1),
            Self::ArithAdd(_)
            | Self::ArithSub(_)
            | Self::ArithMul(_)
            | Self::ArithDiv(_)
            | Self::ArithMod(_)
            | Self::ArithMin
            | Self::ArithMax
            | Self::ValueAdd
            | Self::BitAnd
            | Self::BitOr
            | Self::BitXor
            | Self::BitLShift
            | Self::BitRShift
            | Self::BitURShift
            | Self::CompareLess
            | Self::CompareLessEq
            | Self::CompareGreater
            | Self::CompareGreaterEq
            | Self::CompareEq
            | Self::CompareStrictEq
            | Self::GetByOffset { .. }
            | Self::PutById(_)
            | Self::PutByIdDirect(_)
            | Self::GetByVal(_)
            | Self::StringCharCodeAt => Fixed(2),
            Self::PutByOffset { .. } | Self::PutByVal(_) => Fixed(3),
            Self::Phantom | Self::NewArray(_) => AtLeast(0),
            Self::Construct => AtLeast(1),
            Self::Call => AtLeast(2),
        }
    }

    /// Whether the node produces a value (and therefore owns a virtual register).
    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            Self::SetLocal(_)
                | Self::MovHint(_)
                | Self::Phantom
                | Self::CheckStructure(_)
                | Self::StructureTransitionWatchpoint(_)
                | Self::CheckArray(_)
                | Self::CheckFunction(_)
                | Self::ForceOsrExit
                | Self::PutByOffset { .. }
                | Self::PutById(_)
                | Self::PutByIdDirect(_)
                | Self::PutByVal(_)
                | Self::PutGlobalVar(_)
                | Self::GlobalVarWatchpoint(_)
                | Self::Jump(_)
                | Self::Branch { .. }
                | Self::Return
        )
    }

    /// Whether the node must be generated even when nothing uses its result.
    pub fn must_generate(&self) -> bool {
        !self.has_result()
            || matches!(
                self,
                Self::GetById(_)
                    | Self::GetByVal(_)
                    | Self::CreateThis
                    | Self::Call
                    | Self::Construct
            )
    }

    /// Whether the node ends a basic block.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Jump(_) | Self::Branch { .. } | Self::Return)
    }

    /// Successor blocks of a terminal.
    pub fn successors(&self) -> SmallVec<[BlockIndex; 2]> {
        match self {
            Self::Jump(target) => SmallVec::from_slice(&[*target]),
            Self::Branch { taken, not_taken } => SmallVec::from_slice(&[*taken, *not_taken]),
            _ => SmallVec::new(),
        }
    }
}

/// One operation in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Operation and its parameters.
    pub op: NodeOp,
    /// Operand edges, in operation order.
    pub children: SmallVec<[Edge; 3]>,
    /// Profile-predicted type of the result.
    pub prediction: SpeculatedType,
    /// Number of edges that use this node.
    pub ref_count: u32,
    /// Spill slot of the result, for nodes that produce one.
    pub virtual_register: Option<VirtualRegister>,
    /// Source position.
    pub origin: CodeOrigin,
}

impl Node {
    /// Operand edge `index`.
    ///
    /// # Panics
    ///
    /// Panics if the node has fewer operands; graphs are validated before
    /// code generation.
    pub fn child(&self, index: usize) -> Edge {
        self.children[index]
    }

    /// First operand.
    pub fn child1(&self) -> Edge {
        self.child(0)
    }

    /// Second operand.
    pub fn child2(&self) -> Edge {
        self.child(1)
    }

    /// Third operand.
    pub fn child3(&self) -> Edge {
        self.child(2)
    }

    /// Compile-time constant, for constant nodes.
    pub fn constant(&self) -> Option<JsValue> {
        match self.op {
            NodeOp::JsConstant(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the node has to be generated.
    pub fn should_generate(&self) -> bool {
        self.ref_count > 0 || self.op.must_generate()
    }

    /// Whether the node produces a value.
    pub fn has_result(&self) -> bool {
        self.op.has_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arith_modes() {
        assert!(!ArithMode::Unchecked.checks_overflow());
        assert!(ArithMode::CheckOverflow.checks_overflow());
        assert!(!ArithMode::CheckOverflow.checks_negative_zero());
        assert!(ArithMode::CheckOverflowAndNegativeZero.checks_negative_zero());
    }

    #[test]
    fn op_classification() {
        assert!(NodeOp::Return.is_terminal());
        assert!(!NodeOp::Return.has_result());
        assert!(NodeOp::Call.has_result());
        assert!(NodeOp::Call.must_generate());
        assert!(!NodeOp::ArithAdd(ArithMode::CheckOverflow).must_generate());
        assert_eq!(NodeOp::Call.arity(), Arity::AtLeast(2));
        let branch = NodeOp::Branch {
            taken: BlockIndex(1),
            not_taken: BlockIndex(2),
        };
        assert_eq!(branch.successors().as_slice(), &[BlockIndex(1), BlockIndex(2)]);
    }
}
