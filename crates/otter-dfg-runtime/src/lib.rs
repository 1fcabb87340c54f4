//! # Otter DFG Runtime
//!
//! The VM the speculative code generator runs against: a bump-allocated heap
//! with a card table, structures and butterflies laid out the way emitted
//! code reads them, the `extern "C"` helpers behind every slow path, and a
//! baseline tier that walks the graph on the same frames.
//!
//! A [`Vm`] owns one compiler. Graph functions are interpreted until hot,
//! then compiled; failed speculations exit back into the baseline tier, and
//! watchpoints invalidate units whose assumptions stopped holding.
//!
//! ```no_run
//! use otter_dfg_graph::{Edge, GraphBuilder, JsValue, NodeOp, Operand};
//! use otter_dfg_runtime::{Vm, VmConfig};
//!
//! let mut b = GraphBuilder::new("add").parameters(2);
//! let x = b.get_local(Operand::Argument(1));
//! let y = b.get_local(Operand::Argument(2));
//! let sum = b.add(NodeOp::ValueAdd, &[Edge::untyped(x), Edge::untyped(y)]);
//! b.ret(sum);
//! let graph = b.build().expect("graph should build");
//!
//! let mut vm: Vm = Vm::new(VmConfig::default()).expect("vm should start");
//! let add = vm.define_function(graph).expect("graph should validate");
//! let result = vm
//!     .call(add, JsValue::Undefined, &[JsValue::Int32(2), JsValue::Int32(3)])
//!     .expect("call should succeed");
//! assert_eq!(result, JsValue::Int32(5));
//! ```

#![warn(clippy::all)]

mod array;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod heap;
pub mod helpers;
mod interpreter;
mod object;
pub mod operations;
mod string;
pub mod structure;
pub mod vm;
pub mod watchpoint;

pub use config::VmConfig;
pub use context::JitContext;
pub use error::{VmError, VmResult};
pub use heap::Heap;
pub use helpers::runtime_helpers;
pub use operations::Relation;
pub use structure::{Identifiers, PropertySlot, Structure, StructureTable};
pub use vm::{ExitRecord, FunctionId, HostFunction, Vm, VmStats};
pub use watchpoint::WatchpointSet;

pub use otter_dfg_jit::layout::IndexingShape;
