//! Object cells and named properties
//!
//! ```text
//! object:   [structure u32][type u8][indexing u8][flags u8][pad][butterfly][inline x4]
//! function: object + [function id][call entry][construct entry]
//! ```
//!
//! The first four properties live inline; the rest live below the
//! butterfly pointer, growing downwards. Adding a property transitions the
//! object's structure, which fires the old structure's transition set.

use otter_dfg_graph::{Identifier, JsValue, PropertyOffset, StructureId};
use otter_dfg_jit::layout::{
    CellType, IndexingShape, PropertyStorage, butterfly, cell, function, object,
    property_location,
};
use otter_dfg_jit::{AccessKind, CachedAccess, PropertyCacheEntry, ValueRepresentation};
use tracing::debug;

use crate::error::{VmError, VmResult};
use crate::heap;
use crate::vm::{FunctionId, Vm};

/// Out-of-line property slots reserved for `count` properties.
pub(crate) fn out_of_line_capacity(count: u32) -> u32 {
    if count == 0 { 0 } else { count.max(4).next_power_of_two() }
}

impl<R: ValueRepresentation> Vm<R> {
    // -- cells -----------------------------------------------------------------

    pub(crate) fn allocate_cell(
        &mut self,
        size: usize,
        structure: StructureId,
        cell_type: CellType,
    ) -> VmResult<usize> {
        let address = self.heap.allocate(size)?;
        // SAFETY: freshly allocated, at least a header long.
        unsafe {
            heap::write_u32(address, cell::STRUCTURE_ID, structure.0);
            heap::write_u8(address, cell::TYPE, cell_type as u8);
        }
        Ok(address)
    }

    /// Root structure for `cell_type` cells inheriting from `prototype`,
    /// flagging the prototype so indexed writes to it are noticed.
    pub(crate) fn root_structure(&mut self, cell_type: CellType, prototype: usize) -> StructureId {
        if prototype != 0 {
            self.mark_prototype(prototype);
        }
        self.structures.root(cell_type, prototype)
    }

    /// Flag `address` as some structure's prototype.
    pub(crate) fn mark_prototype(&mut self, address: usize) {
        // SAFETY: prototypes are live object cells.
        unsafe {
            let flags = heap::read_u8(address, cell::FLAGS);
            heap::write_u8(address, cell::FLAGS, flags | cell::FLAG_PROTOTYPE);
        }
    }

    pub(crate) fn new_object_cell(&mut self, prototype: usize) -> VmResult<usize> {
        let structure = self.root_structure(CellType::Object, prototype);
        self.allocate_cell(object::SIZE, structure, CellType::Object)
    }

    /// Allocate an object with an existing structure.
    pub(crate) fn new_object_with_structure(&mut self, structure: StructureId) -> VmResult<usize> {
        let (cell_type, out_of_line) = self
            .structures
            .get(structure)
            .map(|s| (s.cell_type(), s.out_of_line_count()))
            .ok_or_else(|| VmError::internal(format!("unknown structure {}", structure.0)))?;
        if cell_type != CellType::Object {
            return Err(VmError::internal(format!(
                "structure {} is not a plain object structure",
                structure.0
            )));
        }
        let cell = self.allocate_cell(object::SIZE, structure, CellType::Object)?;
        let capacity = out_of_line_capacity(out_of_line);
        if capacity > 0 {
            self.reallocate_butterfly(cell, 0, capacity, 0, 0)?;
        }
        Ok(cell)
    }

    pub(crate) fn new_function_cell(&mut self, id: FunctionId) -> VmResult<usize> {
        let structure = self.root_structure(CellType::Function, self.object_prototype);
        let address = self.allocate_cell(function::SIZE, structure, CellType::Function)?;
        // SAFETY: function cells are `function::SIZE` bytes.
        unsafe { heap::write_u64(address, function::FUNCTION_ID, id.0 as u64) };
        Ok(address)
    }

    /// A new empty object inheriting from the object prototype.
    pub fn new_object(&mut self) -> VmResult<JsValue> {
        self.new_object_cell(self.object_prototype).map(JsValue::Cell)
    }

    /// A new empty object inheriting from `prototype` (`null` for none).
    pub fn new_object_with_prototype(&mut self, prototype: JsValue) -> VmResult<JsValue> {
        let prototype = match prototype {
            JsValue::Null => 0,
            value if self.is_object(value) => value.as_cell().unwrap_or(0),
            other => {
                return Err(VmError::type_error(format!(
                    "Object prototype may only be an Object or null: {}",
                    self.type_name(other)
                )));
            }
        };
        self.new_object_cell(prototype).map(JsValue::Cell)
    }

    /// Receiver of a constructor call, from the callee's `prototype`.
    pub(crate) fn create_this(&mut self, callee: JsValue) -> VmResult<JsValue> {
        let prototype = match self.get_property(callee, self.names.prototype)? {
            value if self.is_object(value) => value.as_cell().unwrap_or(self.object_prototype),
            _ => self.object_prototype,
        };
        self.new_object_cell(prototype).map(JsValue::Cell)
    }

    /// Cell type of a heap cell.
    pub(crate) fn cell_type(&self, address: usize) -> Option<CellType> {
        if !self.heap.contains(address) {
            return None;
        }
        // SAFETY: `address` is inside the arena, which only holds cells we wrote.
        CellType::from_byte(unsafe { heap::read_u8(address, cell::TYPE) })
    }

    /// Whether `value` is an object (any cell but a string).
    pub fn is_object(&self, value: JsValue) -> bool {
        value
            .as_cell()
            .and_then(|c| self.cell_type(c))
            .is_some_and(CellType::is_object)
    }

    /// Whether `value` is a string.
    pub fn is_string(&self, value: JsValue) -> bool {
        value.as_cell().and_then(|c| self.cell_type(c)) == Some(CellType::String)
    }

    pub(crate) fn structure_of(&self, address: usize) -> StructureId {
        // SAFETY: callers pass live cells.
        StructureId(unsafe { heap::read_u32(address, cell::STRUCTURE_ID) })
    }

    fn set_structure(&mut self, address: usize, structure: StructureId) {
        // SAFETY: callers pass live cells.
        unsafe { heap::write_u32(address, cell::STRUCTURE_ID, structure.0) }
    }

    /// Structure id of an object value.
    pub fn structure_id(&self, value: JsValue) -> Option<StructureId> {
        let address = value.as_cell().filter(|c| self.cell_type(*c).is_some())?;
        Some(self.structure_of(address))
    }

    pub(crate) fn prototype_of(&self, address: usize) -> usize {
        self.structures
            .get(self.structure_of(address))
            .map_or(0, |s| s.prototype())
    }

    pub(crate) fn has_prototype_flag(&self, address: usize) -> bool {
        // SAFETY: callers pass live cells.
        unsafe { heap::read_u8(address, cell::FLAGS) & cell::FLAG_PROTOTYPE != 0 }
    }

    pub(crate) fn butterfly(&self, address: usize) -> usize {
        // SAFETY: every object cell has a butterfly word.
        unsafe { heap::read_u64(address, object::BUTTERFLY) as usize }
    }

    pub(crate) fn set_butterfly(&mut self, address: usize, butterfly: usize) {
        // SAFETY: every object cell has a butterfly word.
        unsafe { heap::write_u64(address, object::BUTTERFLY, butterfly as u64) }
    }

    pub(crate) fn indexing_shape(&self, address: usize) -> IndexingShape {
        // SAFETY: callers pass live cells.
        IndexingShape::from_byte(unsafe { heap::read_u8(address, cell::INDEXING) })
    }

    pub(crate) fn set_indexing_shape(&mut self, address: usize, shape: IndexingShape) {
        // SAFETY: callers pass live cells.
        unsafe { heap::write_u8(address, cell::INDEXING, shape as u8) }
    }

    /// Out-of-line property slots currently reserved below the butterfly.
    pub(crate) fn property_capacity(&self, address: usize) -> u32 {
        self.structures
            .get(self.structure_of(address))
            .map_or(0, |s| out_of_line_capacity(s.out_of_line_count()))
    }

    /// Replace the butterfly with one holding `property_capacity` property
    /// slots and `element_bytes` bytes above the header.
    ///
    /// Properties, the header and the first `copy_bytes` element bytes are
    /// copied; the rest is zeroed. The old butterfly is abandoned.
    pub(crate) fn reallocate_butterfly(
        &mut self,
        address: usize,
        old_property_capacity: u32,
        property_capacity: u32,
        copy_bytes: usize,
        element_bytes: usize,
    ) -> VmResult<usize> {
        let old = self.butterfly(address);
        let below = property_capacity as usize * 8 + butterfly::HEADER_SIZE;
        let base = self.heap.allocate(below + element_bytes)?;
        let new = base + below;
        if old != 0 {
            let properties = old_property_capacity.min(property_capacity) as usize * 8;
            let header = butterfly::HEADER_SIZE;
            // SAFETY: both butterflies are arena memory sized as described;
            // the new one does not overlap the old.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    (old - header - properties) as *const u8,
                    (new - header - properties) as *mut u8,
                    properties + header,
                );
                std::ptr::copy_nonoverlapping(
                    old as *const u8,
                    new as *mut u8,
                    copy_bytes.min(element_bytes),
                );
            }
        }
        self.set_butterfly(address, new);
        Ok(new)
    }

    // -- property slots ----------------------------------------------------------

    fn slot_address(&self, address: usize, offset: PropertyOffset) -> usize {
        match property_location(offset) {
            (PropertyStorage::Inline, byte_offset) => address + byte_offset as usize,
            (PropertyStorage::OutOfLine, byte_offset) => {
                (self.butterfly(address) as isize + byte_offset as isize) as usize
            }
        }
    }

    pub(crate) fn read_slot(&self, address: usize, offset: PropertyOffset) -> JsValue {
        // SAFETY: the structure reserved the slot.
        self.decode(unsafe { heap::read_u64(self.slot_address(address, offset), 0) })
    }

    pub(crate) fn write_slot(&mut self, address: usize, offset: PropertyOffset, value: JsValue) {
        let bits = self.encode(value);
        // SAFETY: the structure reserved the slot.
        unsafe { heap::write_u64(self.slot_address(address, offset), 0, bits) };
        if value.as_cell().is_some() {
            self.heap.write_barrier(address);
        }
    }

    // -- named properties --------------------------------------------------------

    /// Read a named property, walking the prototype chain.
    pub fn get_property(&mut self, base: JsValue, name: Identifier) -> VmResult<JsValue> {
        let address = match base {
            JsValue::Cell(address) if self.cell_type(address).is_some() => address,
            JsValue::Undefined | JsValue::Null | JsValue::Empty => {
                return Err(VmError::type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    self.type_name(base),
                    self.identifiers.name(name).unwrap_or("?")
                )));
            }
            _ => return Ok(JsValue::Undefined),
        };
        if name == self.names.length {
            if let Some(length) = self.intrinsic_length(address) {
                return Ok(JsValue::number(length as f64));
            }
        }
        if self.cell_type(address) == Some(CellType::String) {
            return Ok(JsValue::Undefined);
        }
        Ok(self.lookup(address, name).unwrap_or(JsValue::Undefined))
    }

    fn lookup(&self, mut address: usize, name: Identifier) -> Option<JsValue> {
        while address != 0 {
            let structure = self.structures.get(self.structure_of(address))?;
            if let Some(slot) = structure.get(name) {
                return Some(self.read_slot(address, slot.offset));
            }
            address = structure.prototype();
        }
        None
    }

    /// Length every indexed cell reports without a `length` property.
    fn intrinsic_length(&self, address: usize) -> Option<u32> {
        match self.cell_type(address)? {
            CellType::Array => Some(self.array_length_of(address)),
            CellType::String => Some(self.string_length(address)),
            CellType::Arguments => Some(self.arguments_length(address)),
            ty if ty.is_typed_array() => Some(self.typed_array_length(address)),
            _ => None,
        }
    }

    /// Write a named property with assignment semantics.
    ///
    /// A read-only property, own or inherited, makes the write a no-op.
    pub fn put_property(&mut self, base: JsValue, name: Identifier, value: JsValue) -> VmResult<()> {
        let address = match base {
            JsValue::Cell(address) if self.is_object(base) => address,
            JsValue::Undefined | JsValue::Null | JsValue::Empty => {
                return Err(VmError::type_error(format!(
                    "Cannot set properties of {} (setting '{}')",
                    self.type_name(base),
                    self.identifiers.name(name).unwrap_or("?")
                )));
            }
            _ => return Ok(()),
        };
        if name == self.names.length && self.intrinsic_length(address).is_some() {
            return Ok(());
        }
        let structure = self
            .structures
            .get(self.structure_of(address))
            .ok_or_else(|| VmError::internal("cell without a structure"))?;
        if let Some(slot) = structure.get(name) {
            if !slot.read_only {
                self.write_slot(address, slot.offset, value);
            }
            return Ok(());
        }
        let mut prototype = structure.prototype();
        while prototype != 0 {
            let Some(structure) = self.structures.get(self.structure_of(prototype)) else {
                break;
            };
            if structure.get(name).is_some_and(|slot| slot.read_only) {
                return Ok(());
            }
            prototype = structure.prototype();
        }
        self.add_property(address, name, value, false)
    }

    /// Define or overwrite an own property, ignoring the prototype chain.
    pub fn put_property_direct(
        &mut self,
        address: usize,
        name: Identifier,
        value: JsValue,
    ) -> VmResult<()> {
        match self.structures.get(self.structure_of(address)).and_then(|s| s.get(name)) {
            Some(slot) => {
                self.write_slot(address, slot.offset, value);
                Ok(())
            }
            None => self.add_property(address, name, value, false),
        }
    }

    fn add_property(
        &mut self,
        address: usize,
        name: Identifier,
        value: JsValue,
        read_only: bool,
    ) -> VmResult<()> {
        let from = self.structure_of(address);
        let old_capacity = self.property_capacity(address);
        let to = self
            .structures
            .add_property_transition(from, name, read_only)
            .ok_or_else(|| VmError::internal("cell without a structure"))?;
        let fired = self
            .structures
            .get_mut(from)
            .map(|s| s.transition_set_mut().fire())
            .unwrap_or_default();
        if !fired.is_empty() {
            debug!(structure = from.0, units = fired.len(), "transition watchpoint fired");
        }
        self.invalidate_units(fired);

        let (slot, out_of_line) = self
            .structures
            .get(to)
            .and_then(|s| Some((s.get(name)?, s.out_of_line_count())))
            .ok_or_else(|| VmError::internal("transition lost its property"))?;
        let capacity = out_of_line_capacity(out_of_line);
        if capacity > old_capacity {
            let element_bytes = self.element_bytes(address);
            self.reallocate_butterfly(address, old_capacity, capacity, element_bytes, element_bytes)?;
        }
        self.set_structure(address, to);
        self.write_slot(address, slot.offset, value);
        Ok(())
    }

    /// Define a property by name, optionally read-only.
    pub fn define_property(
        &mut self,
        object: JsValue,
        name: &str,
        value: JsValue,
        read_only: bool,
    ) -> VmResult<()> {
        let address = object
            .as_cell()
            .filter(|_| self.is_object(object))
            .ok_or_else(|| VmError::type_error("Object.defineProperty called on non-object"))?;
        let name = self.identifiers.intern(name);
        match self.structures.get(self.structure_of(address)).and_then(|s| s.get(name)) {
            Some(slot) if slot.read_only == read_only => {
                self.write_slot(address, slot.offset, value);
                Ok(())
            }
            Some(_) => Err(VmError::type_error("Cannot redefine property attributes")),
            None => self.add_property(address, name, value, read_only),
        }
    }

    /// Read a property by name.
    pub fn get(&mut self, object: JsValue, name: &str) -> VmResult<JsValue> {
        let name = self.identifiers.intern(name);
        self.get_property(object, name)
    }

    /// Write a property by name.
    pub fn set(&mut self, object: JsValue, name: &str, value: JsValue) -> VmResult<()> {
        let name = self.identifiers.intern(name);
        self.put_property(object, name, value)
    }

    // -- inline caches -----------------------------------------------------------

    /// Slow-path bookkeeping of a cache site after a generic access on
    /// `address`, which had structure `before`.
    pub(crate) fn update_cache(&mut self, entry: &PropertyCacheEntry, address: usize, before: StructureId) {
        if entry.is_megamorphic() || self.cell_type(address).is_none() {
            return;
        }
        if entry.record_miss() {
            entry.make_megamorphic();
            self.stats.megamorphic_sites += 1;
            debug!(
                name = self.identifiers.name(entry.identifier()).unwrap_or("?"),
                misses = entry.miss_count(),
                "cache site went megamorphic"
            );
            return;
        }
        let after = self.structure_of(address);
        let name = entry.identifier();
        let Some(slot) = self.structures.get(after).and_then(|s| s.get(name)) else {
            return;
        };
        let (storage, byte_offset) = property_location(slot.offset);
        let access = match entry.kind() {
            AccessKind::Get if before == after => Some(CachedAccess {
                structure: after,
                new_structure: None,
                storage,
                byte_offset,
            }),
            AccessKind::Put | AccessKind::PutDirect if before == after && !slot.read_only => {
                Some(CachedAccess {
                    structure: after,
                    new_structure: None,
                    storage,
                    byte_offset,
                })
            }
            // a transition is only cached when it needs no new storage
            AccessKind::PutDirect
                if before != after
                    && storage == PropertyStorage::Inline
                    && self.structures.get(before).map(|s| s.next_offset()) == Some(slot.offset) =>
            {
                Some(CachedAccess {
                    structure: before,
                    new_structure: Some(after),
                    storage,
                    byte_offset,
                })
            }
            _ => None,
        };
        if let Some(access) = access {
            entry.repatch(access);
            self.stats.ic_repatches += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::VmConfig;
    use crate::vm::Vm;
    use otter_dfg_graph::JsValue;
    use otter_dfg_jit::ActiveEncoding;

    fn vm() -> Vm<ActiveEncoding> {
        Vm::new(VmConfig {
            heap_size: 1 << 20,
            register_file_slots: 4096,
            ..VmConfig::baseline_only()
        })
        .expect("vm should be created")
    }

    #[test]
    fn properties_spill_out_of_line() {
        let mut vm = vm();
        let object = vm.new_object().expect("allocation should succeed");
        for i in 0..10 {
            vm.set(object, &format!("p{i}"), JsValue::Int32(i))
                .expect("put should succeed");
        }
        for i in 0..10 {
            assert_eq!(
                vm.get(object, &format!("p{i}")).expect("get should succeed"),
                JsValue::Int32(i)
            );
        }
        assert_eq!(vm.get(object, "missing").expect("get should succeed"), JsValue::Undefined);
    }

    #[test]
    fn read_only_inherited_property_blocks_assignment() {
        let mut vm = vm();
        let prototype = vm.new_object().expect("allocation should succeed");
        vm.define_property(prototype, "fixed", JsValue::Int32(1), true)
            .expect("define should succeed");
        let object = vm
            .new_object_with_prototype(prototype)
            .expect("allocation should succeed");
        vm.set(object, "fixed", JsValue::Int32(2)).expect("put should succeed");
        assert_eq!(vm.get(object, "fixed").expect("get should succeed"), JsValue::Int32(1));
        let structure = vm.structure_id(object);
        vm.set(object, "other", JsValue::Int32(3)).expect("put should succeed");
        assert_ne!(vm.structure_id(object), structure);
    }

    #[test]
    fn reading_from_undefined_is_a_type_error() {
        let mut vm = vm();
        let err = vm
            .get(JsValue::Undefined, "x")
            .expect_err("read from undefined should fail");
        assert!(err.is_exception());
        assert!(err.to_string().contains("reading 'x'"));
    }
}
