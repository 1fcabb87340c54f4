//! Compile-time watchpoint queries
//!
//! A watchpoint replaces a per-access check with a one-shot invalidation
//! trigger. The compiler asks a [`WatchpointOracle`] whether a fact can be
//! watched; every fact it relies on is recorded in the compiled unit so the
//! runtime can invalidate the unit when the fact stops holding.

use otter_dfg_graph::StructureId;

/// A fact a compiled unit depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedFact {
    /// The structure is never transitioned away from.
    StructureTransition(StructureId),
    /// The global variable is never written.
    GlobalVar(u32),
    /// Array and object prototypes have no indexed properties.
    SaneArrayChain,
}

/// Which facts are still watchable at compile time.
pub trait WatchpointOracle: Send + Sync {
    /// Whether transitions away from `structure` can still be watched.
    fn is_structure_watchable(&self, structure: StructureId) -> bool;

    /// Whether writes to global `index` can still be watched.
    fn is_global_watchable(&self, index: u32) -> bool;

    /// Whether the prototype chain of arrays is still free of indexed properties.
    fn is_array_chain_sane(&self) -> bool;
}

/// Oracle that allows no watchpoints; every fact gets an explicit check.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWatchpoints;

impl WatchpointOracle for NoWatchpoints {
    fn is_structure_watchable(&self, _structure: StructureId) -> bool {
        false
    }

    fn is_global_watchable(&self, _index: u32) -> bool {
        false
    }

    fn is_array_chain_sane(&self) -> bool {
        false
    }
}
