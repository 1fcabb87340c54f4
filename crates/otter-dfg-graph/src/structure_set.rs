//! Sets of object layout descriptors

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::operand::StructureId;

/// Immutable, sorted set of structures a value is checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructureSet {
    structures: SmallVec<[StructureId; 4]>,
}

impl StructureSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding exactly one structure.
    pub fn singleton(structure: StructureId) -> Self {
        let mut structures = SmallVec::new();
        structures.push(structure);
        Self { structures }
    }

    /// Add a structure, keeping the set sorted and duplicate free.
    pub fn add(&mut self, structure: StructureId) {
        if let Err(pos) = self.structures.binary_search(&structure) {
            self.structures.insert(pos, structure);
        }
    }

    /// Membership test.
    pub fn contains(&self, structure: StructureId) -> bool {
        self.structures.binary_search(&structure).is_ok()
    }

    /// Whether every structure in `self` is in `other`.
    pub fn is_subset_of(&self, other: &StructureSet) -> bool {
        self.structures.iter().all(|s| other.contains(*s))
    }

    /// Structures present in both sets.
    pub fn intersection(&self, other: &StructureSet) -> StructureSet {
        Self {
            structures: self
                .structures
                .iter()
                .copied()
                .filter(|s| other.contains(*s))
                .collect(),
        }
    }

    /// The single member, if the set has exactly one.
    pub fn only_structure(&self) -> Option<StructureId> {
        match self.structures.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Number of structures.
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Iterate in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = StructureId> + '_ {
        self.structures.iter().copied()
    }
}

impl FromIterator<StructureId> for StructureSet {
    fn from_iter<T: IntoIterator<Item = StructureId>>(iter: T) -> Self {
        let mut set = Self::new();
        for structure in iter {
            set.add(structure);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_and_deduplicated() {
        let set: StructureSet = [StructureId(7), StructureId(3), StructureId(7)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![StructureId(3), StructureId(7)]
        );
        assert!(set.only_structure().is_none());
    }

    #[test]
    fn subset_and_intersection() {
        let small = StructureSet::singleton(StructureId(3));
        let large: StructureSet = [StructureId(3), StructureId(4)].into_iter().collect();
        assert!(small.is_subset_of(&large));
        assert!(!large.is_subset_of(&small));
        assert_eq!(large.intersection(&small).only_structure(), Some(StructureId(3)));
    }
}
