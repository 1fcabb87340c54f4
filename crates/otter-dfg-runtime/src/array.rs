//! Indexed storage: arrays, typed arrays and arguments objects
//!
//! Butterfly-backed elements sit above the butterfly header:
//!
//! ```text
//! Int32 / Double / Contiguous:   [props..][length][capacity] | e0 e1 ..
//! ArrayStorage / SlowPut:        [props..][length][capacity] | sparse nvalues | e0 e1 ..
//! ```
//!
//! Int32 and contiguous vectors hold boxed values with the empty value as the
//! hole; double vectors hold raw `f64` bits with NaN as the hole, so NaN itself
//! forces a contiguous vector. Writes far past the length move the object to
//! array storage and keep the stray indices in a sparse map.

use std::collections::BTreeMap;

use otter_dfg_graph::{ArrayMode, ArrayType, Identifier, JsValue, TypedArrayDescriptor, TypedArrayKind};
use otter_dfg_jit::ValueRepresentation;
use otter_dfg_jit::layout::{
    ARGUMENT_COUNT_SLOT, CALLEE_SLOT, CellType, DOUBLE_HOLE_BITS, IndexingShape, THIS_SLOT, arguments, array_storage, butterfly,
    object, typed_array,
};

use crate::error::{VmError, VmResult};
use crate::heap;
use crate::operations::{clamp_to_byte, to_int32};
use crate::vm::{FunctionKind, Vm};

/// Smallest vector a butterfly gets.
const MIN_VECTOR_CAPACITY: u32 = 4;

/// Writes at most this far past the length grow the vector; farther ones go sparse.
const MAX_VECTOR_GAP: u32 = 64;

/// Key of a by-value access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropertyKey {
    Index(u32),
    Named(Identifier),
}

fn typed_descriptor(cell_type: CellType) -> Option<TypedArrayDescriptor> {
    cell_type
        .typed_array_type()
        .and_then(|ty| ArrayMode::new(ty).typed_array_descriptor())
}

/// Narrowest butterfly shape that can hold `values`.
fn shape_for(values: &[JsValue]) -> IndexingShape {
    let present = || values.iter().filter(|v| **v != JsValue::Empty);
    if present().all(|v| matches!(v, JsValue::Int32(_))) {
        IndexingShape::Int32
    } else if present().all(|v| v.as_number().is_some_and(|n| !n.is_nan())) {
        IndexingShape::Double
    } else {
        IndexingShape::Contiguous
    }
}

/// Whether a vector of `shape` can hold `value` without conversion.
fn shape_accepts(shape: IndexingShape, value: JsValue) -> bool {
    if value == JsValue::Empty {
        return true;
    }
    match shape {
        IndexingShape::Int32 => matches!(value, JsValue::Int32(_)),
        IndexingShape::Double => value.as_number().is_some_and(|n| !n.is_nan()),
        _ => true,
    }
}

impl<R: ValueRepresentation> Vm<R> {
    // -- butterfly vectors -------------------------------------------------------

    pub(crate) fn public_length(&self, address: usize) -> u32 {
        match self.butterfly(address) {
            0 => 0,
            // SAFETY: a non-null butterfly has a header.
            b => unsafe { heap::read_u32(b, butterfly::PUBLIC_LENGTH) },
        }
    }

    fn set_public_length(&mut self, address: usize, length: u32) {
        let b = self.butterfly(address);
        // SAFETY: callers only set lengths of objects with a vector.
        unsafe { heap::write_u32(b, butterfly::PUBLIC_LENGTH, length) }
    }

    fn vector_length(&self, address: usize) -> u32 {
        match self.butterfly(address) {
            0 => 0,
            // SAFETY: a non-null butterfly has a header.
            b => unsafe { heap::read_u32(b, butterfly::VECTOR_LENGTH) },
        }
    }

    /// Bytes above the butterfly header.
    pub(crate) fn element_bytes(&self, address: usize) -> usize {
        let shape = self.indexing_shape(address);
        let vector = self.vector_length(address) as usize * 8;
        match shape {
            IndexingShape::None => 0,
            s if s.is_array_storage() => array_storage::VECTOR as usize + vector,
            _ => vector,
        }
    }

    fn element_address(&self, address: usize, shape: IndexingShape, index: u32) -> usize {
        let base = if shape.is_array_storage() {
            self.butterfly(address) + array_storage::VECTOR as usize
        } else {
            self.butterfly(address)
        };
        base + index as usize * 8
    }

    fn hole_bits(shape: IndexingShape) -> u64 {
        match shape {
            IndexingShape::Double => DOUBLE_HOLE_BITS,
            _ => R::EMPTY,
        }
    }

    /// Element `index` of the vector; `None` for a hole. `index` must be
    /// below the vector length.
    fn read_vector(&self, address: usize, shape: IndexingShape, index: u32) -> Option<JsValue> {
        // SAFETY: the index is within the vector.
        let bits = unsafe { heap::read_u64(self.element_address(address, shape, index), 0) };
        match shape {
            IndexingShape::Double => {
                let value = f64::from_bits(bits);
                (!value.is_nan()).then_some(JsValue::Double(value))
            }
            _ if bits == R::EMPTY => None,
            _ => Some(self.decode(bits)),
        }
    }

    fn write_vector(&mut self, address: usize, shape: IndexingShape, index: u32, value: Option<JsValue>) {
        let bits = match (shape, value) {
            (_, None) => Self::hole_bits(shape),
            (IndexingShape::Double, Some(v)) => v.as_number().unwrap_or(f64::NAN).to_bits(),
            (_, Some(v)) => self.encode(v),
        };
        // SAFETY: the index is within the vector.
        unsafe { heap::write_u64(self.element_address(address, shape, index), 0, bits) };
        if value.and_then(JsValue::as_cell).is_some() {
            self.heap.write_barrier(address);
        }
    }

    fn collect_vector(&self, address: usize) -> Vec<Option<JsValue>> {
        let shape = self.indexing_shape(address);
        if shape == IndexingShape::None {
            return Vec::new();
        }
        (0..self.vector_length(address))
            .map(|i| self.read_vector(address, shape, i))
            .collect()
    }

    /// Give the object a fresh vector of `shape` and `capacity` holding
    /// `elements`, keeping its properties, length and sparse map.
    fn rebuild_vector(
        &mut self,
        address: usize,
        shape: IndexingShape,
        capacity: u32,
        elements: &[Option<JsValue>],
        length: u32,
    ) -> VmResult<()> {
        let old_shape = self.indexing_shape(address);
        let sparse = if old_shape.is_array_storage() {
            // SAFETY: array storage has a sparse-map word.
            unsafe { heap::read_u64(self.butterfly(address), array_storage::SPARSE_MAP) }
        } else {
            0
        };
        let properties = self.property_capacity(address);
        let bytes = capacity as usize * 8
            + if shape.is_array_storage() {
                array_storage::VECTOR as usize
            } else {
                0
            };
        let b = self.reallocate_butterfly(address, properties, properties, 0, bytes)?;
        // SAFETY: the new butterfly has a header and `bytes` of elements.
        unsafe {
            heap::write_u32(b, butterfly::VECTOR_LENGTH, capacity);
            heap::write_u32(b, butterfly::PUBLIC_LENGTH, length);
        }
        self.set_indexing_shape(address, shape);
        let mut values = 0u64;
        for index in 0..capacity {
            let value = elements.get(index as usize).copied().flatten();
            values += value.is_some() as u64;
            self.write_vector(address, shape, index, value);
        }
        if shape.is_array_storage() {
            // SAFETY: array storage has its two header words.
            unsafe {
                heap::write_u64(b, array_storage::SPARSE_MAP, sparse);
                heap::write_u64(b, array_storage::NUM_VALUES_IN_VECTOR, values);
            }
        }
        Ok(())
    }

    fn convert_shape(&mut self, address: usize, shape: IndexingShape) -> VmResult<()> {
        let elements = self.collect_vector(address);
        let capacity = self.vector_length(address).max(MIN_VECTOR_CAPACITY);
        let length = self.public_length(address);
        self.rebuild_vector(address, shape, capacity, &elements, length)
    }

    fn array_storage_shape(&self) -> IndexingShape {
        if self.array_chain.is_valid() {
            IndexingShape::ArrayStorage
        } else {
            IndexingShape::SlowPutArrayStorage
        }
    }

    fn sparse_map(&self, address: usize) -> Option<usize> {
        // SAFETY: only called on array storage.
        let handle = unsafe { heap::read_u64(self.butterfly(address), array_storage::SPARSE_MAP) };
        (handle as usize).checked_sub(1)
    }

    fn sparse_insert(&mut self, address: usize, index: u32, value: JsValue) {
        let map = match self.sparse_map(address) {
            Some(map) => map,
            None => {
                self.sparse_maps.push(BTreeMap::new());
                let handle = self.sparse_maps.len();
                // SAFETY: only called on array storage.
                unsafe {
                    heap::write_u64(self.butterfly(address), array_storage::SPARSE_MAP, handle as u64)
                };
                handle - 1
            }
        };
        self.sparse_maps[map].insert(index, value);
    }

    /// Own element of a butterfly-backed object.
    fn own_element(&self, address: usize, index: u32) -> Option<JsValue> {
        let shape = self.indexing_shape(address);
        if shape == IndexingShape::None {
            return None;
        }
        if shape.is_array_storage() {
            if index < self.vector_length(address) {
                return self.read_vector(address, shape, index);
            }
            let map = self.sparse_map(address)?;
            return self.sparse_maps.get(map)?.get(&index).copied();
        }
        if index < self.public_length(address) {
            self.read_vector(address, shape, index)
        } else {
            None
        }
    }

    /// Store into butterfly storage, converting, growing or going sparse.
    fn store_element(&mut self, address: usize, index: u32, value: JsValue) -> VmResult<()> {
        let mut shape = self.indexing_shape(address);
        if shape == IndexingShape::None {
            let initial = if self.cell_type(address) == Some(CellType::Array) {
                shape_for(&[value])
            } else {
                IndexingShape::Contiguous
            };
            self.rebuild_vector(address, initial, MIN_VECTOR_CAPACITY, &[], 0)?;
            shape = initial;
        }
        if !shape_accepts(shape, value) {
            let wider = if shape == IndexingShape::Int32
                && value.as_number().is_some_and(|n| !n.is_nan())
            {
                IndexingShape::Double
            } else {
                IndexingShape::Contiguous
            };
            self.convert_shape(address, wider)?;
            shape = wider;
        }

        let capacity = self.vector_length(address);
        let length = self.public_length(address);
        if index >= capacity {
            if index - length.min(index) <= MAX_VECTOR_GAP {
                let grown = (index + 1).max(capacity.saturating_mul(2)).max(MIN_VECTOR_CAPACITY);
                let elements = self.collect_vector(address);
                self.rebuild_vector(address, shape, grown, &elements, length)?;
            } else {
                if !shape.is_array_storage() {
                    let storage = self.array_storage_shape();
                    self.convert_shape(address, storage)?;
                }
                self.sparse_insert(address, index, value);
                if index >= length {
                    self.set_public_length(address, index + 1);
                }
                return Ok(());
            }
        }

        let was_hole = self.read_vector(address, shape, index).is_none();
        self.write_vector(address, shape, index, Some(value));
        if shape.is_array_storage() && was_hole {
            let b = self.butterfly(address);
            // SAFETY: array storage has a value count.
            unsafe {
                let count = heap::read_u64(b, array_storage::NUM_VALUES_IN_VECTOR);
                heap::write_u64(b, array_storage::NUM_VALUES_IN_VECTOR, count + 1);
            }
        }
        if index >= length {
            self.set_public_length(address, index + 1);
        }
        Ok(())
    }

    // -- arrays ------------------------------------------------------------------

    /// Allocate an array with the narrowest shape holding `values`.
    pub fn new_array(&mut self, values: &[JsValue]) -> VmResult<JsValue> {
        let shape = shape_for(values);
        self.new_array_with_shape(shape, values).map(JsValue::Cell)
    }

    /// Allocate an array with `shape`, widened if a value does not fit.
    pub fn new_array_of_shape(&mut self, shape: IndexingShape, values: &[JsValue]) -> VmResult<JsValue> {
        self.new_array_with_shape(shape, values).map(JsValue::Cell)
    }

    pub(crate) fn new_array_with_shape(&mut self, shape: IndexingShape, values: &[JsValue]) -> VmResult<usize> {
        let shape = match shape {
            IndexingShape::None => shape_for(values),
            s if values.iter().all(|v| shape_accepts(s, *v)) => s,
            IndexingShape::Int32 if shape_for(values) == IndexingShape::Double => IndexingShape::Double,
            _ => IndexingShape::Contiguous,
        };
        let structure = self.root_structure(CellType::Array, self.array_prototype);
        let address = self.allocate_cell(object::SIZE, structure, CellType::Array)?;
        let capacity = (values.len() as u32).max(MIN_VECTOR_CAPACITY);
        let elements: Vec<Option<JsValue>> = values
            .iter()
            .map(|v| (*v != JsValue::Empty).then_some(*v))
            .collect();
        self.rebuild_vector(address, shape, capacity, &elements, values.len() as u32)?;
        Ok(address)
    }

    pub(crate) fn array_length_of(&self, address: usize) -> u32 {
        self.public_length(address)
    }

    /// Length of an array-like value.
    pub fn array_length(&self, value: JsValue) -> Option<u32> {
        let address = value.as_cell()?;
        match self.cell_type(address)? {
            CellType::Array => Some(self.public_length(address)),
            CellType::String => Some(self.string_length(address)),
            CellType::Arguments => Some(self.arguments_length(address)),
            ty if ty.is_typed_array() => Some(self.typed_array_length(address)),
            _ => None,
        }
    }

    /// Indexing shape of an object value.
    pub fn indexing_type(&self, value: JsValue) -> Option<IndexingShape> {
        let address = value.as_cell().filter(|c| self.is_object(JsValue::Cell(*c)))?;
        Some(self.indexing_shape(address))
    }

    /// Elements in the vector of an array-storage object.
    pub fn array_storage_value_count(&self, value: JsValue) -> Option<u64> {
        let address = value.as_cell().filter(|c| self.is_object(JsValue::Cell(*c)))?;
        self.indexing_shape(address)
            .is_array_storage()
            // SAFETY: array storage has a value count.
            .then(|| unsafe { heap::read_u64(self.butterfly(address), array_storage::NUM_VALUES_IN_VECTOR) })
    }

    // -- typed arrays ------------------------------------------------------------

    /// Allocate a zero-filled typed array.
    pub fn new_typed_array(&mut self, array_type: ArrayType, length: u32) -> VmResult<JsValue> {
        let cell_type = CellType::for_typed_array(array_type)
            .ok_or_else(|| VmError::type_error(format!("{array_type:?} is not a typed array type")))?;
        let descriptor = typed_descriptor(cell_type)
            .ok_or_else(|| VmError::internal("typed array without a descriptor"))?;
        let bytes = length as usize * descriptor.element_size as usize;
        let vector = self.heap.allocate(bytes)?;
        let structure = self.root_structure(cell_type, self.object_prototype);
        let address = self.allocate_cell(typed_array::SIZE, structure, cell_type)?;
        // SAFETY: typed-array cells are `typed_array::SIZE` bytes.
        unsafe {
            heap::write_u64(address, typed_array::VECTOR, vector as u64);
            heap::write_u32(address, typed_array::LENGTH, length);
        }
        Ok(JsValue::Cell(address))
    }

    pub(crate) fn typed_array_length(&self, address: usize) -> u32 {
        // SAFETY: callers pass typed-array cells.
        unsafe { heap::read_u32(address, typed_array::LENGTH) }
    }

    fn typed_element(&self, address: usize, index: u32) -> Option<(usize, TypedArrayDescriptor)> {
        let descriptor = typed_descriptor(self.cell_type(address)?)?;
        if index >= self.typed_array_length(address) {
            return None;
        }
        // SAFETY: callers pass typed-array cells.
        let vector = unsafe { heap::read_u64(address, typed_array::VECTOR) } as usize;
        Some((vector + index as usize * descriptor.element_size as usize, descriptor))
    }

    fn read_typed(&self, address: usize, index: u32) -> Option<JsValue> {
        let (element, descriptor) = self.typed_element(address, index)?;
        // SAFETY: the element lies inside the typed array's vector, which is
        // aligned to its element size.
        let value = unsafe {
            match (descriptor.kind, descriptor.element_size) {
                (TypedArrayKind::Signed, 1) => JsValue::Int32((element as *const i8).read() as i32),
                (TypedArrayKind::Signed, 2) => JsValue::Int32((element as *const i16).read() as i32),
                (TypedArrayKind::Signed, _) => JsValue::Int32((element as *const i32).read()),
                (TypedArrayKind::Unsigned, 1) => JsValue::Int32((element as *const u8).read() as i32),
                (TypedArrayKind::Unsigned, 2) => JsValue::Int32((element as *const u16).read() as i32),
                (TypedArrayKind::Unsigned, _) => JsValue::number((element as *const u32).read() as f64),
                (TypedArrayKind::Float, 4) => JsValue::Double((element as *const f32).read() as f64),
                (TypedArrayKind::Float, _) => JsValue::Double((element as *const f64).read()),
            }
        };
        Some(value)
    }

    fn write_typed(&mut self, address: usize, index: u32, value: JsValue) {
        let number = self.to_number(value);
        let Some((element, descriptor)) = self.typed_element(address, index) else {
            return;
        };
        // SAFETY: as in `read_typed`.
        unsafe {
            match (descriptor.kind, descriptor.element_size) {
                (TypedArrayKind::Float, 4) => (element as *mut f32).write(number as f32),
                (TypedArrayKind::Float, _) => (element as *mut f64).write(number),
                (_, 1) if descriptor.clamped => (element as *mut u8).write(clamp_to_byte(number)),
                (_, 1) => (element as *mut u8).write(to_int32(number) as u8),
                (_, 2) => (element as *mut u16).write(to_int32(number) as u16),
                (_, _) => (element as *mut u32).write(to_int32(number) as u32),
            }
        }
    }

    // -- arguments ---------------------------------------------------------------

    /// Arguments object of the frame at `fp`.
    ///
    /// It captures `this`-less arguments up to the callee's declared
    /// parameter count; extra arguments are not kept by the frame.
    pub(crate) fn create_arguments(&mut self, fp: usize) -> VmResult<JsValue> {
        let callee = self.slot_value(fp + CALLEE_SLOT as usize);
        let parameters = self
            .function_id(callee)
            .map_or(0, |id| match &self.functions[id.0 as usize].kind {
                FunctionKind::Graph { graph, .. } => graph.parameter_count,
                FunctionKind::Host(_) => 0,
            });
        let argc = self.register_file.get(fp + ARGUMENT_COUNT_SLOT as usize) as u32;
        let values: Vec<JsValue> = (0..argc.saturating_sub(1).min(parameters))
            .map(|i| self.slot_value(fp + THIS_SLOT as usize + 1 + i as usize))
            .collect();
        self.new_arguments(&values)
    }

    /// Allocate an arguments object holding `values`.
    pub fn new_arguments(&mut self, values: &[JsValue]) -> VmResult<JsValue> {
        let registers = self.heap.allocate(values.len() * 8)?;
        for (i, value) in values.iter().enumerate() {
            let bits = self.encode(*value);
            // SAFETY: `registers` holds `values.len()` words.
            unsafe { heap::write_u64(registers + i * 8, 0, bits) };
        }
        let structure = self.root_structure(CellType::Arguments, self.object_prototype);
        let address = self.allocate_cell(arguments::SIZE, structure, CellType::Arguments)?;
        // SAFETY: arguments cells are `arguments::SIZE` bytes.
        unsafe {
            heap::write_u32(address, arguments::LENGTH, values.len() as u32);
            heap::write_u64(address, arguments::REGISTERS, registers as u64);
        }
        Ok(JsValue::Cell(address))
    }

    fn arguments_overridden(&self, address: usize) -> bool {
        // SAFETY: callers pass arguments cells.
        unsafe { heap::read_u8(address, arguments::OVERRIDDEN) != 0 }
    }

    pub(crate) fn arguments_length(&self, address: usize) -> u32 {
        if self.arguments_overridden(address) {
            self.public_length(address)
        } else {
            // SAFETY: callers pass arguments cells.
            unsafe { heap::read_u32(address, arguments::LENGTH) }
        }
    }

    fn argument_register(&self, address: usize, index: u32) -> usize {
        // SAFETY: callers pass arguments cells.
        unsafe { heap::read_u64(address, arguments::REGISTERS) as usize + index as usize * 8 }
    }

    /// Move the arguments into ordinary indexed storage.
    fn override_arguments(&mut self, address: usize) -> VmResult<()> {
        let length = self.arguments_length(address);
        let elements: Vec<Option<JsValue>> = (0..length)
            // SAFETY: registers hold `length` words.
            .map(|i| Some(self.decode(unsafe { heap::read_u64(self.argument_register(address, i), 0) })))
            .collect();
        let capacity = length.max(MIN_VECTOR_CAPACITY);
        self.rebuild_vector(address, IndexingShape::Contiguous, capacity, &elements, length)?;
        // SAFETY: arguments cells are `arguments::SIZE` bytes.
        unsafe { heap::write_u8(address, arguments::OVERRIDDEN, 1) };
        Ok(())
    }

    // -- generic element access ----------------------------------------------------

    /// Read element `index`, walking the prototype chain past holes.
    pub(crate) fn get_element(&mut self, address: usize, index: u32) -> VmResult<JsValue> {
        match self.cell_type(address) {
            Some(CellType::String) => {
                return match self.char_code_at(address, index) {
                    Some(unit) => self.single_character_string(unit).map(JsValue::Cell),
                    None => Ok(JsValue::Undefined),
                };
            }
            Some(ty) if ty.is_typed_array() => {
                return Ok(self.read_typed(address, index).unwrap_or(JsValue::Undefined));
            }
            Some(CellType::Arguments) if !self.arguments_overridden(address) => {
                if index < self.arguments_length(address) {
                    // SAFETY: the index is below the register count.
                    let bits = unsafe { heap::read_u64(self.argument_register(address, index), 0) };
                    return Ok(self.decode(bits));
                }
            }
            None => return Ok(JsValue::Undefined),
            _ => {}
        }
        let mut current = address;
        while current != 0 {
            if let Some(value) = self.own_element(current, index) {
                return Ok(value);
            }
            current = self.prototype_of(current);
        }
        Ok(JsValue::Undefined)
    }

    /// Write element `index` with assignment semantics.
    pub(crate) fn put_element(&mut self, address: usize, index: u32, value: JsValue) -> VmResult<()> {
        match self.cell_type(address) {
            Some(CellType::String) | None => return Ok(()),
            Some(ty) if ty.is_typed_array() => {
                self.write_typed(address, index, value);
                return Ok(());
            }
            Some(CellType::Arguments) if !self.arguments_overridden(address) => {
                if index < self.arguments_length(address) {
                    let bits = self.encode(value);
                    // SAFETY: the index is below the register count.
                    unsafe { heap::write_u64(self.argument_register(address, index), 0, bits) };
                    if value.as_cell().is_some() {
                        self.heap.write_barrier(address);
                    }
                    return Ok(());
                }
                self.override_arguments(address)?;
            }
            _ => {}
        }
        if self.has_prototype_flag(address) {
            self.break_array_chain();
        }
        self.store_element(address, index, value)
    }

    /// Classify a by-value key.
    pub(crate) fn property_key(&mut self, key: JsValue) -> VmResult<PropertyKey> {
        match key {
            JsValue::Int32(i) if i >= 0 => return Ok(PropertyKey::Index(i as u32)),
            JsValue::Double(d) if d >= 0.0 && d < u32::MAX as f64 && d.fract() == 0.0 => {
                return Ok(PropertyKey::Index(d as u32));
            }
            _ => {}
        }
        let name = self.to_string(key)?;
        if let Some(index) = canonical_index(&name) {
            return Ok(PropertyKey::Index(index));
        }
        Ok(PropertyKey::Named(self.identifiers.intern(&name)))
    }

    /// `base[key]`
    pub fn get_by_value(&mut self, base: JsValue, key: JsValue) -> VmResult<JsValue> {
        let address = match base {
            JsValue::Cell(address) => address,
            JsValue::Undefined | JsValue::Null | JsValue::Empty => {
                return Err(VmError::type_error(format!(
                    "Cannot read properties of {}",
                    self.type_name(base)
                )));
            }
            _ => return Ok(JsValue::Undefined),
        };
        match self.property_key(key)? {
            PropertyKey::Index(index) => self.get_element(address, index),
            PropertyKey::Named(name) => self.get_property(base, name),
        }
    }

    /// `base[key] = value`
    pub fn put_by_value(&mut self, base: JsValue, key: JsValue, value: JsValue) -> VmResult<()> {
        let address = match base {
            JsValue::Cell(address) if self.is_object(base) => address,
            JsValue::Undefined | JsValue::Null | JsValue::Empty => {
                return Err(VmError::type_error(format!(
                    "Cannot set properties of {}",
                    self.type_name(base)
                )));
            }
            _ => return Ok(()),
        };
        match self.property_key(key)? {
            PropertyKey::Index(index) => self.put_element(address, index, value),
            PropertyKey::Named(name) => self.put_property(base, name, value),
        }
    }

    /// Read element `index` of an object.
    pub fn get_index(&mut self, object: JsValue, index: u32) -> VmResult<JsValue> {
        self.get_by_value(object, JsValue::number(index as f64))
    }

    /// Write element `index` of an object.
    pub fn set_index(&mut self, object: JsValue, index: u32, value: JsValue) -> VmResult<()> {
        self.put_by_value(object, JsValue::number(index as f64), value)
    }
}

/// Array index spelled canonically (`"7"`, not `"07"` or `"7.0"`).
fn canonical_index(name: &str) -> Option<u32> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    name.parse::<u32>().ok().filter(|i| *i != u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use otter_dfg_jit::ActiveEncoding;

    fn vm() -> Vm<ActiveEncoding> {
        Vm::new(VmConfig {
            heap_size: 1 << 22,
            register_file_slots: 4096,
            ..VmConfig::baseline_only()
        })
        .expect("vm should be created")
    }

    #[test]
    fn int32_array_widens_on_double_then_object() {
        let mut vm = vm();
        let array = vm
            .new_array(&[JsValue::Int32(1), JsValue::Int32(2)])
            .expect("allocation should succeed");
        assert_eq!(vm.indexing_type(array), Some(IndexingShape::Int32));
        vm.set_index(array, 1, JsValue::Double(2.5)).expect("put should succeed");
        assert_eq!(vm.indexing_type(array), Some(IndexingShape::Double));
        vm.set_index(array, 2, JsValue::Double(f64::NAN)).expect("put should succeed");
        assert_eq!(vm.indexing_type(array), Some(IndexingShape::Contiguous));
        assert_eq!(vm.get_index(array, 0).expect("get should succeed"), JsValue::Double(1.0));
        assert!(matches!(vm.get_index(array, 2), Ok(JsValue::Double(d)) if d.is_nan()));
        assert_eq!(vm.array_length(array), Some(3));
    }

    #[test]
    fn holes_and_out_of_bounds_read_undefined() {
        let mut vm = vm();
        let array = vm
            .new_array(&[JsValue::Int32(1), JsValue::Int32(2), JsValue::Int32(3)])
            .expect("allocation should succeed");
        assert_eq!(vm.get_index(array, 3).expect("get should succeed"), JsValue::Undefined);
        assert_eq!(vm.get_index(array, 1_000_000).expect("get should succeed"), JsValue::Undefined);
        vm.set_index(array, 6, JsValue::Int32(7)).expect("put should succeed");
        assert_eq!(vm.array_length(array), Some(7));
        assert_eq!(vm.get_index(array, 4).expect("get should succeed"), JsValue::Undefined);
    }

    #[test]
    fn far_writes_go_sparse() {
        let mut vm = vm();
        let array = vm.new_array(&[JsValue::Int32(1)]).expect("allocation should succeed");
        vm.set_index(array, 1_000_000, JsValue::Int32(9)).expect("put should succeed");
        assert_eq!(vm.indexing_type(array), Some(IndexingShape::ArrayStorage));
        assert_eq!(vm.array_length(array), Some(1_000_001));
        assert_eq!(vm.get_index(array, 1_000_000).expect("get should succeed"), JsValue::Int32(9));
        assert_eq!(vm.get_index(array, 0).expect("get should succeed"), JsValue::Int32(1));
        assert_eq!(vm.array_storage_value_count(array), Some(1));
    }

    #[test]
    fn indexed_prototype_writes_break_the_chain() {
        let mut vm = vm();
        assert!(vm.array_chain.is_valid());
        let prototype = vm.array_prototype();
        vm.set_index(prototype, 0, JsValue::Int32(5)).expect("put should succeed");
        assert!(!vm.array_chain.is_valid());
        let array = vm
            .new_array_of_shape(IndexingShape::Contiguous, &[JsValue::Empty, JsValue::Int32(2)])
            .expect("allocation should succeed");
        assert_eq!(vm.get_index(array, 0).expect("get should succeed"), JsValue::Int32(5));

        let mut vm = self::vm();
        let prototype = vm.object_prototype();
        vm.set_index(prototype, 3, JsValue::Int32(1)).expect("put should succeed");
        assert!(!vm.array_chain.is_valid());
    }

    #[test]
    fn ordinary_object_writes_keep_the_chain() {
        let mut vm = vm();
        let object = vm.new_object().expect("allocation should succeed");
        vm.set_index(object, 0, JsValue::Int32(1)).expect("put should succeed");
        assert!(vm.array_chain.is_valid());
    }

    #[test]
    fn typed_arrays_convert_on_store() {
        let mut vm = vm();
        let bytes = vm
            .new_typed_array(ArrayType::Uint8ClampedArray, 4)
            .expect("allocation should succeed");
        vm.set_index(bytes, 0, JsValue::Double(2.5)).expect("put should succeed");
        vm.set_index(bytes, 1, JsValue::Int32(300)).expect("put should succeed");
        vm.set_index(bytes, 9, JsValue::Int32(1)).expect("put should succeed");
        assert_eq!(vm.get_index(bytes, 0).expect("get should succeed"), JsValue::Int32(2));
        assert_eq!(vm.get_index(bytes, 1).expect("get should succeed"), JsValue::Int32(255));
        assert_eq!(vm.get_index(bytes, 9).expect("get should succeed"), JsValue::Undefined);

        let words = vm
            .new_typed_array(ArrayType::Int16Array, 2)
            .expect("allocation should succeed");
        vm.set_index(words, 0, JsValue::Int32(40000)).expect("put should succeed");
        assert_eq!(vm.get_index(words, 0).expect("get should succeed"), JsValue::Int32(-25536));
    }

    #[test]
    fn arguments_override_keeps_values() {
        let mut vm = vm();
        let args = vm
            .new_arguments(&[JsValue::Int32(1), JsValue::Int32(2)])
            .expect("allocation should succeed");
        assert_eq!(vm.array_length(args), Some(2));
        vm.set_index(args, 5, JsValue::Int32(6)).expect("put should succeed");
        assert_eq!(vm.array_length(args), Some(6));
        assert_eq!(vm.get_index(args, 1).expect("get should succeed"), JsValue::Int32(2));
        assert_eq!(vm.get_index(args, 5).expect("get should succeed"), JsValue::Int32(6));
    }

    #[test]
    fn only_canonical_index_strings_are_indices() {
        assert_eq!(canonical_index("07"), None);
        assert_eq!(canonical_index("4294967295"), None);
        assert_eq!(canonical_index("12"), Some(12));
    }
}
