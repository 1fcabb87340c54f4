//! Watchpoint sets and the compile-time oracle
//!
//! A [`WatchpointSet`] is a one-shot trigger: once fired it stays invalid and
//! hands back the units that depended on it so the VM can invalidate them.

use smallvec::SmallVec;

use otter_dfg_graph::StructureId;
use otter_dfg_jit::WatchpointOracle;
use otter_dfg_jit::layout::GLOBAL_INVALIDATED;

use crate::structure::StructureTable;

/// Units depending on a fact.
pub type Dependents = SmallVec<[u64; 2]>;

/// One watchable fact and the compiled units relying on it.
#[derive(Debug, Clone)]
pub struct WatchpointSet {
    valid: bool,
    dependents: Dependents,
}

impl Default for WatchpointSet {
    fn default() -> Self {
        Self {
            valid: true,
            dependents: SmallVec::new(),
        }
    }
}

impl WatchpointSet {
    /// Whether the fact still holds.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Record a unit relying on the fact.
    pub fn add(&mut self, unit: u64) {
        if self.valid && !self.dependents.contains(&unit) {
            self.dependents.push(unit);
        }
    }

    /// Number of dependent units.
    pub fn dependent_count(&self) -> usize {
        self.dependents.len()
    }

    /// Invalidate the fact; returns the units to invalidate, once.
    pub fn fire(&mut self) -> Dependents {
        if !self.valid {
            return SmallVec::new();
        }
        self.valid = false;
        std::mem::take(&mut self.dependents)
    }
}

/// Snapshot of the VM's watchable facts, handed to the compiler.
pub struct VmOracle<'a> {
    pub(crate) structures: &'a StructureTable,
    pub(crate) global_states: &'a [u8],
    pub(crate) array_chain_sane: bool,
}

impl WatchpointOracle for VmOracle<'_> {
    fn is_structure_watchable(&self, structure: StructureId) -> bool {
        self.structures
            .get(structure)
            .is_some_and(|s| s.transition_set().is_valid())
    }

    fn is_global_watchable(&self, index: u32) -> bool {
        self.global_states
            .get(index as usize)
            .is_some_and(|state| *state != GLOBAL_INVALIDATED)
    }

    fn is_array_chain_sane(&self) -> bool {
        self.array_chain_sane
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once() {
        let mut set = WatchpointSet::default();
        set.add(1);
        set.add(2);
        set.add(1);
        assert_eq!(set.dependent_count(), 2);
        assert_eq!(set.fire().as_slice(), &[1, 2]);
        assert!(!set.is_valid());
        assert!(set.fire().is_empty());
        set.add(3);
        assert_eq!(set.dependent_count(), 0);
    }
}
