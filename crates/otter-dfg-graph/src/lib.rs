//! # Otter DFG Graph
//!
//! The typed, profile-guided data-flow graph that the speculative tier lowers
//! to native code.
//!
//! The graph is produced upstream (bytecode parsing, prediction propagation and
//! abstract interpretation) and is immutable while a unit is being generated.
//! Every node carries its operation, operand edges annotated with a [`UseKind`],
//! a predicted [`SpeculatedType`], and a reference count. The per-node
//! [`AbstractValue`] table supplies facts already proven by the upstream passes.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod array_mode;
pub mod builder;
pub mod error;
pub mod graph;
pub mod node;
pub mod operand;
pub mod speculated_type;
pub mod structure_set;
pub mod use_kind;
pub mod value;

pub use array_mode::{ArrayClass, ArrayMode, ArraySpeculation, ArrayType, TypedArrayDescriptor, TypedArrayKind};
pub use builder::GraphBuilder;
pub use error::GraphError;
pub use graph::{AbstractValue, BasicBlock, Graph};
pub use node::{ArithMode, Edge, Node, NodeOp};
pub use operand::{
    BlockIndex, CodeOrigin, Identifier, NodeIndex, Operand, PropertyOffset, StructureId,
    VirtualRegister,
};
pub use speculated_type::SpeculatedType;
pub use structure_set::StructureSet;
pub use use_kind::UseKind;
pub use value::JsValue;
