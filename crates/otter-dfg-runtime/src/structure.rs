//! Structures (hidden classes) and property names
//!
//! A structure fixes an object's cell type, prototype and property layout.
//! Objects with the same history of property additions share a structure
//! through the transition tree, so emitted code can check one 32-bit id
//! instead of looking a name up. Structure ids start at 1; 0 means "none".

use rustc_hash::FxHashMap;

use otter_dfg_graph::{Identifier, PropertyOffset, StructureId};
use otter_dfg_jit::layout::{CellType, object};

use crate::watchpoint::WatchpointSet;

/// Interned property names.
#[derive(Debug, Default)]
pub struct Identifiers {
    names: Vec<Box<str>>,
    ids: FxHashMap<Box<str>, Identifier>,
}

impl Identifiers {
    /// Id of `name`, interning it on first use.
    pub fn intern(&mut self, name: &str) -> Identifier {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = Identifier(self.names.len() as u32);
        self.names.push(name.into());
        self.ids.insert(name.into(), id);
        id
    }

    /// Id of `name` if it was interned.
    pub fn lookup(&self, name: &str) -> Option<Identifier> {
        self.ids.get(name).copied()
    }

    /// Name of an interned id.
    pub fn name(&self, id: Identifier) -> Option<&str> {
        self.names.get(id.0 as usize).map(|name| &**name)
    }
}

/// Slot and attributes of a named property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySlot {
    /// Slot number within the object.
    pub offset: PropertyOffset,
    /// Writes through [`crate::Vm::put_property`] are ignored.
    pub read_only: bool,
}

/// Layout of a family of objects.
#[derive(Debug)]
pub struct Structure {
    id: StructureId,
    cell_type: CellType,
    prototype: usize,
    properties: FxHashMap<Identifier, PropertySlot>,
    keys_ordered: Vec<Identifier>,
    first_offset: u32,
    transitions: FxHashMap<(Identifier, bool), StructureId>,
    transition_set: WatchpointSet,
}

impl Structure {
    /// Id stored in the cell header.
    pub fn id(&self) -> StructureId {
        self.id
    }

    /// Cell type of objects with this structure.
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// Prototype cell, or 0 for `null`.
    pub fn prototype(&self) -> usize {
        self.prototype
    }

    /// Own property by name.
    pub fn get(&self, id: Identifier) -> Option<PropertySlot> {
        self.properties.get(&id).copied()
    }

    /// Own property names in insertion order.
    pub fn own_keys(&self) -> &[Identifier] {
        &self.keys_ordered
    }

    /// Number of own named properties.
    pub fn property_count(&self) -> u32 {
        self.keys_ordered.len() as u32
    }

    /// Offset the next added property gets.
    pub fn next_offset(&self) -> PropertyOffset {
        PropertyOffset(self.first_offset + self.property_count())
    }

    /// Properties stored in the butterfly.
    pub fn out_of_line_count(&self) -> u32 {
        self.next_offset().0.saturating_sub(object::INLINE_CAPACITY)
    }

    /// Set fired by the first transition away from this structure.
    pub fn transition_set(&self) -> &WatchpointSet {
        &self.transition_set
    }

    /// Mutable transition set.
    pub fn transition_set_mut(&mut self) -> &mut WatchpointSet {
        &mut self.transition_set
    }
}

/// Every structure of a VM, indexed by id.
#[derive(Debug, Default)]
pub struct StructureTable {
    structures: Vec<Structure>,
    roots: FxHashMap<(CellType, usize), StructureId>,
}

impl StructureTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Structure by id.
    pub fn get(&self, id: StructureId) -> Option<&Structure> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.structures.get(index))
    }

    /// Mutable structure by id.
    pub fn get_mut(&mut self, id: StructureId) -> Option<&mut Structure> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.structures.get_mut(index))
    }

    /// Number of structures.
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    /// Whether no structure exists yet.
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Empty structure for `cell_type` objects inheriting from `prototype`.
    ///
    /// Cells without inline slots (arguments, typed arrays, strings) start
    /// their properties out of line.
    pub fn root(&mut self, cell_type: CellType, prototype: usize) -> StructureId {
        if let Some(id) = self.roots.get(&(cell_type, prototype)) {
            return *id;
        }
        let first_offset = match cell_type {
            CellType::Object | CellType::Array | CellType::Function => 0,
            _ => object::INLINE_CAPACITY,
        };
        let id = self.push(Structure {
            id: StructureId::NONE,
            cell_type,
            prototype,
            properties: FxHashMap::default(),
            keys_ordered: Vec::new(),
            first_offset,
            transitions: FxHashMap::default(),
            transition_set: WatchpointSet::default(),
        });
        self.roots.insert((cell_type, prototype), id);
        id
    }

    /// Structure reached from `from` by adding `name`, creating it on first use.
    ///
    /// Returns `None` for an unknown `from`.
    pub fn add_property_transition(
        &mut self,
        from: StructureId,
        name: Identifier,
        read_only: bool,
    ) -> Option<StructureId> {
        let parent = self.get(from)?;
        if let Some(id) = parent.transitions.get(&(name, read_only)) {
            return Some(*id);
        }
        let slot = PropertySlot {
            offset: parent.next_offset(),
            read_only,
        };
        let mut properties = parent.properties.clone();
        properties.insert(name, slot);
        let mut keys_ordered = parent.keys_ordered.clone();
        keys_ordered.push(name);
        let child = Structure {
            id: StructureId::NONE,
            cell_type: parent.cell_type,
            prototype: parent.prototype,
            properties,
            keys_ordered,
            first_offset: parent.first_offset,
            transitions: FxHashMap::default(),
            transition_set: WatchpointSet::default(),
        };
        let id = self.push(child);
        self.get_mut(from)?.transitions.insert((name, read_only), id);
        Some(id)
    }

    fn push(&mut self, mut structure: Structure) -> StructureId {
        let id = StructureId(self.structures.len() as u32 + 1);
        structure.id = id;
        self.structures.push(structure);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_shared() {
        let mut names = Identifiers::default();
        let x = names.intern("x");
        let y = names.intern("y");
        assert_eq!(names.intern("x"), x);
        assert_eq!(names.name(y), Some("y"));

        let mut table = StructureTable::new();
        let root = table.root(CellType::Object, 0);
        assert_eq!(table.root(CellType::Object, 0), root);
        let with_x = table
            .add_property_transition(root, x, false)
            .expect("transition should succeed");
        let again = table
            .add_property_transition(root, x, false)
            .expect("transition should succeed");
        assert_eq!(with_x, again);
        let with_xy = table
            .add_property_transition(with_x, y, false)
            .expect("transition should succeed");
        let structure = table.get(with_xy).expect("structure should exist");
        assert_eq!(structure.get(y).map(|s| s.offset), Some(PropertyOffset(1)));
        assert_eq!(structure.own_keys(), &[x, y]);
        assert_eq!(structure.out_of_line_count(), 0);
        assert!(table.get(StructureId::NONE).is_none());
    }

    #[test]
    fn cells_without_inline_slots_start_out_of_line() {
        let mut names = Identifiers::default();
        let tag = names.intern("tag");
        let mut table = StructureTable::new();
        let root = table.root(CellType::Float64Array, 0);
        let tagged = table
            .add_property_transition(root, tag, true)
            .expect("transition should succeed");
        let structure = table.get(tagged).expect("structure should exist");
        assert_eq!(
            structure.get(tag),
            Some(PropertySlot {
                offset: PropertyOffset(object::INLINE_CAPACITY),
                read_only: true,
            })
        );
        assert_eq!(structure.out_of_line_count(), 1);
    }
}
