//! # Otter DFG JIT
//!
//! Speculative node-by-node code generator for the optimizing tier.
//!
//! A [`JitCompiler`] lowers a typed [`otter_dfg_graph::Graph`] to native code
//! through Cranelift. Each node's fast path is emitted inline and assumes the
//! node's predicted types; failed assumptions leave through OSR exits that
//! rebuild the baseline frame. Generic operations call runtime helpers out of
//! line. The compiled unit carries three side tables: deoptimization points,
//! property inline caches and call-site link cells.
//!
//! Boxed values use one of two encodings behind [`ValueRepresentation`]: a
//! single NaN-boxed word ([`Unified`]) or a tag/payload register pair
//! ([`Split`]).

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod assembler;
pub mod call_link;
pub mod compiler;
pub mod config;
pub mod encoding;
pub mod error;
pub mod generation_info;
pub mod inline_cache;
pub mod layout;
pub mod osr_exit;
pub mod platform;
pub mod registers;
pub mod runtime_helpers;
mod speculative_jit;
pub mod watchpoint;

pub use call_link::{CallLinkInfo, CallSiteRecord, CallType};
pub use compiler::{CompiledUnit, JitCompiler, UnitEntry};
pub use config::{JitConfig, SlowPutHoleWrites};
pub use encoding::{ActiveEncoding, Split, Unified, ValueRepresentation, purify_nan};
pub use error::{JitError, Result};
pub use inline_cache::{AccessKind, CachedAccess, InlineCacheRecord, PropertyCacheEntry};
pub use osr_exit::{ExitKind, OsrExitRecord, SlotRecovery, ValueRecovery};
pub use platform::{HostPlatform, Platform};
pub use runtime_helpers::{HelperKind, RuntimeHelpers};
pub use watchpoint::{NoWatchpoints, WatchedFact, WatchpointOracle};
