//! Memory-layout contracts shared by emitted code and the runtime
//!
//! Every offset here is an external contract: the runtime builds its cells,
//! butterflies and execution context to match, and checks the context
//! offsets with `offset_of!` at compile time.

use otter_dfg_graph::{ArrayType, Operand, PropertyOffset};

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Slot holding the callee.
pub const CALLEE_SLOT: u32 = 0;
/// Slot holding the raw argument count, including `this`.
pub const ARGUMENT_COUNT_SLOT: u32 = 1;
/// Slot holding `this` (`Argument(0)`).
pub const THIS_SLOT: u32 = 2;
/// Size in bytes of one frame slot.
pub const SLOT_SIZE: i32 = 8;

/// Frame shape of one compiled function.
///
/// ```text
/// [callee][argc][this][arg1..argN][loc0..locM][vreg0..vregK] | outgoing frame
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Declared parameters, excluding `this`.
    pub parameter_count: u32,
    /// Interpreter-visible locals.
    pub local_count: u32,
    /// Spill slots for node results.
    pub virtual_register_count: u32,
}

impl FrameLayout {
    /// Frame layout of a graph.
    pub fn of(graph: &otter_dfg_graph::Graph) -> Self {
        Self {
            parameter_count: graph.parameter_count,
            local_count: graph.local_count,
            virtual_register_count: graph.virtual_register_count,
        }
    }

    /// Slot of an argument or local.
    pub fn operand_slot(&self, operand: Operand) -> u32 {
        match operand {
            Operand::Argument(i) => THIS_SLOT + i,
            Operand::Local(i) => THIS_SLOT + 1 + self.parameter_count + i,
        }
    }

    /// Slot of a virtual register.
    pub fn vreg_slot(&self, vreg: otter_dfg_graph::VirtualRegister) -> u32 {
        THIS_SLOT + 1 + self.parameter_count + self.local_count + vreg.0
    }

    /// First local slot.
    pub fn first_local_slot(&self) -> u32 {
        THIS_SLOT + 1 + self.parameter_count
    }

    /// Number of slots owned by the frame; the outgoing frame starts here.
    pub fn register_count(&self) -> u32 {
        THIS_SLOT + 1 + self.parameter_count + self.local_count + self.virtual_register_count
    }

    /// Byte offset of a slot from the frame pointer.
    pub fn slot_offset(slot: u32) -> i32 {
        slot as i32 * SLOT_SIZE
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Byte offsets of the runtime's `#[repr(C)]` execution context.
pub mod context {
    /// Heap arena base address.
    pub const HEAP_BASE: i32 = 0;
    /// Card table base address.
    pub const CARD_TABLE: i32 = 8;
    /// Number of cards.
    pub const CARD_COUNT: i32 = 16;
    /// Highest usable frame address.
    pub const STACK_LIMIT: i32 = 24;
    /// Non-zero while an exception is pending.
    pub const EXCEPTION_PENDING: i32 = 32;
    /// The pending exception value.
    pub const EXCEPTION_VALUE: i32 = 40;
    /// Pointer to 256 single-character string cells.
    pub const SINGLE_CHARACTER_STRINGS: i32 = 48;
    /// Pointer to the boxed global variable slots.
    pub const GLOBALS: i32 = 56;
    /// Pointer to one watch-state byte per global variable.
    pub const GLOBAL_WATCH_STATES: i32 = 64;
    /// Owning VM.
    pub const VM: i32 = 72;
    /// Size of the context.
    pub const SIZE: usize = 80;
}

/// Watch state of a global that nobody is watching.
pub const GLOBAL_UNWATCHED: u8 = 0;
/// Watch state of a global with compiled code depending on it; writes must notify.
pub const GLOBAL_WATCHED: u8 = 1;
/// Watch state of a global whose watchpoint already fired.
pub const GLOBAL_INVALIDATED: u8 = 2;

// ---------------------------------------------------------------------------
// Heap cells
// ---------------------------------------------------------------------------

/// Common cell header.
pub mod cell {
    /// `u32` structure id.
    pub const STRUCTURE_ID: i32 = 0;
    /// `u8` [`super::CellType`].
    pub const TYPE: i32 = 4;
    /// `u8` [`super::IndexingShape`].
    pub const INDEXING: i32 = 5;
    /// `u8` flags.
    pub const FLAGS: i32 = 6;
    /// The object is the prototype of some structure.
    pub const FLAG_PROTOTYPE: u8 = 1;
    /// Header size.
    pub const HEADER_SIZE: usize = 8;
}

/// Plain objects and arrays.
pub mod object {
    /// Butterfly pointer (0 when the object has no out-of-line storage).
    pub const BUTTERFLY: i32 = 8;
    /// First inline property slot.
    pub const INLINE_STORAGE: i32 = 16;
    /// Number of inline property slots.
    pub const INLINE_CAPACITY: u32 = 4;
    /// Cell size.
    pub const SIZE: usize = 48;
}

/// Function objects (objects without inline slots).
pub mod function {
    /// `u32` function id.
    pub const FUNCTION_ID: i32 = 48;
    /// Compiled call entry, or 0.
    pub const CALL_ENTRY: i32 = 56;
    /// Compiled construct entry, or 0.
    pub const CONSTRUCT_ENTRY: i32 = 64;
    /// Cell size.
    pub const SIZE: usize = 72;
}

/// Butterfly header, relative to the butterfly pointer.
pub mod butterfly {
    /// `u32` public length.
    pub const PUBLIC_LENGTH: i32 = -8;
    /// `u32` vector length (capacity).
    pub const VECTOR_LENGTH: i32 = -4;
    /// Bytes of header below the elements.
    pub const HEADER_SIZE: usize = 8;

    /// Byte offset of out-of-line property `index`.
    pub const fn out_of_line_offset(index: u32) -> i32 {
        -16 - 8 * index as i32
    }
}

/// Array-storage layout, relative to the butterfly pointer.
pub mod array_storage {
    /// Sparse map pointer.
    pub const SPARSE_MAP: i32 = 0;
    /// `u32` number of non-hole values in the vector.
    pub const NUM_VALUES_IN_VECTOR: i32 = 8;
    /// First vector element.
    pub const VECTOR: i32 = 16;
}

/// Typed arrays.
pub mod typed_array {
    /// Element vector pointer.
    pub const VECTOR: i32 = 16;
    /// `u32` element count.
    pub const LENGTH: i32 = 24;
    /// Cell size.
    pub const SIZE: usize = 32;
}

/// Flat strings.
pub mod string {
    /// `u32` length in code units.
    pub const LENGTH: i32 = 8;
    /// `u32` flags.
    pub const FLAGS: i32 = 12;
    /// Pointer to the first code unit.
    pub const CHARACTERS: i32 = 16;
    /// Code units are bytes.
    pub const FLAG_8BIT: u32 = 1;
}

/// Arguments objects.
pub mod arguments {
    /// `u32` length.
    pub const LENGTH: i32 = 16;
    /// `u32` non-zero once the object stopped behaving like plain arguments.
    pub const OVERRIDDEN: i32 = 20;
    /// Pointer to the captured argument values.
    pub const REGISTERS: i32 = 24;
    /// Cell size.
    pub const SIZE: usize = 32;
}

/// log2 of the write-barrier card size.
pub const CARD_SHIFT: i64 = 9;

/// Bit pattern marking a hole in a double vector (the canonical NaN).
pub const DOUBLE_HOLE_BITS: u64 = 0x7FF8_0000_0000_0000;

// ---------------------------------------------------------------------------
// Type bytes
// ---------------------------------------------------------------------------

/// Cell type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellType {
    /// Plain object.
    Object = 1,
    /// Array object.
    Array = 2,
    /// Function object.
    Function = 3,
    /// Arguments object.
    Arguments = 4,
    /// String.
    String = 5,
    /// `Int8Array`
    Int8Array = 8,
    /// `Int16Array`
    Int16Array = 9,
    /// `Int32Array`
    Int32Array = 10,
    /// `Uint8Array`
    Uint8Array = 11,
    /// `Uint8ClampedArray`
    Uint8ClampedArray = 12,
    /// `Uint16Array`
    Uint16Array = 13,
    /// `Uint32Array`
    Uint32Array = 14,
    /// `Float32Array`
    Float32Array = 15,
    /// `Float64Array`
    Float64Array = 16,
}

impl CellType {
    /// Decode a type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Object,
            2 => Self::Array,
            3 => Self::Function,
            4 => Self::Arguments,
            5 => Self::String,
            8 => Self::Int8Array,
            9 => Self::Int16Array,
            10 => Self::Int32Array,
            11 => Self::Uint8Array,
            12 => Self::Uint8ClampedArray,
            13 => Self::Uint16Array,
            14 => Self::Uint32Array,
            15 => Self::Float32Array,
            16 => Self::Float64Array,
            _ => return None,
        })
    }

    /// Every type except strings is an object.
    pub fn is_object(self) -> bool {
        self != Self::String
    }

    /// Whether this is one of the typed array types.
    pub fn is_typed_array(self) -> bool {
        self as u8 >= Self::Int8Array as u8
    }

    /// Cell type of the typed array an array type speculates on.
    pub fn for_typed_array(array_type: ArrayType) -> Option<Self> {
        Some(match array_type {
            ArrayType::Int8Array => Self::Int8Array,
            ArrayType::Int16Array => Self::Int16Array,
            ArrayType::Int32Array => Self::Int32Array,
            ArrayType::Uint8Array => Self::Uint8Array,
            ArrayType::Uint8ClampedArray => Self::Uint8ClampedArray,
            ArrayType::Uint16Array => Self::Uint16Array,
            ArrayType::Uint32Array => Self::Uint32Array,
            ArrayType::Float32Array => Self::Float32Array,
            ArrayType::Float64Array => Self::Float64Array,
            _ => return None,
        })
    }

    /// Array type matching a typed array cell type.
    pub fn typed_array_type(self) -> Option<ArrayType> {
        Some(match self {
            Self::Int8Array => ArrayType::Int8Array,
            Self::Int16Array => ArrayType::Int16Array,
            Self::Int32Array => ArrayType::Int32Array,
            Self::Uint8Array => ArrayType::Uint8Array,
            Self::Uint8ClampedArray => ArrayType::Uint8ClampedArray,
            Self::Uint16Array => ArrayType::Uint16Array,
            Self::Uint32Array => ArrayType::Uint32Array,
            Self::Float32Array => ArrayType::Float32Array,
            Self::Float64Array => ArrayType::Float64Array,
            _ => return None,
        })
    }
}

/// Indexing shape byte of objects and arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum IndexingShape {
    /// No indexed storage.
    None = 0,
    /// Boxed int32 elements.
    Int32 = 1,
    /// Unboxed double elements.
    Double = 2,
    /// Boxed values.
    Contiguous = 3,
    /// Vector plus sparse map.
    ArrayStorage = 4,
    /// Array storage whose hole writes must consult the prototype chain.
    SlowPutArrayStorage = 5,
}

impl IndexingShape {
    /// Decode an indexing byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Int32,
            2 => Self::Double,
            3 => Self::Contiguous,
            4 => Self::ArrayStorage,
            5 => Self::SlowPutArrayStorage,
            _ => Self::None,
        }
    }

    /// Shape an array type speculates on.
    pub fn for_array_type(array_type: ArrayType) -> Option<Self> {
        Some(match array_type {
            ArrayType::Int32 => Self::Int32,
            ArrayType::Double => Self::Double,
            ArrayType::Contiguous => Self::Contiguous,
            ArrayType::ArrayStorage => Self::ArrayStorage,
            ArrayType::SlowPutArrayStorage => Self::SlowPutArrayStorage,
            _ => return None,
        })
    }

    /// Whether elements live after an array-storage header.
    pub fn is_array_storage(self) -> bool {
        matches!(self, Self::ArrayStorage | Self::SlowPutArrayStorage)
    }
}

// ---------------------------------------------------------------------------
// Property storage
// ---------------------------------------------------------------------------

/// Where a property slot lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyStorage {
    /// In the cell, relative to the cell pointer.
    Inline,
    /// In the butterfly, relative to the butterfly pointer.
    OutOfLine,
}

/// Storage kind and byte offset of a property slot.
pub fn property_location(offset: PropertyOffset) -> (PropertyStorage, i32) {
    if offset.0 < object::INLINE_CAPACITY {
        (
            PropertyStorage::Inline,
            object::INLINE_STORAGE + offset.0 as i32 * SLOT_SIZE,
        )
    } else {
        (
            PropertyStorage::OutOfLine,
            butterfly::out_of_line_offset(offset.0 - object::INLINE_CAPACITY),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_dfg_graph::VirtualRegister;

    #[test]
    fn frame_slots() {
        let layout = FrameLayout {
            parameter_count: 2,
            local_count: 3,
            virtual_register_count: 4,
        };
        assert_eq!(layout.operand_slot(Operand::Argument(0)), THIS_SLOT);
        assert_eq!(layout.operand_slot(Operand::Argument(2)), 4);
        assert_eq!(layout.operand_slot(Operand::Local(0)), 5);
        assert_eq!(layout.vreg_slot(VirtualRegister(0)), 8);
        assert_eq!(layout.register_count(), 12);
    }

    #[test]
    fn property_locations() {
        assert_eq!(
            property_location(PropertyOffset(0)),
            (PropertyStorage::Inline, 16)
        );
        assert_eq!(
            property_location(PropertyOffset(3)),
            (PropertyStorage::Inline, 40)
        );
        assert_eq!(
            property_location(PropertyOffset(4)),
            (PropertyStorage::OutOfLine, -16)
        );
        assert_eq!(
            property_location(PropertyOffset(6)),
            (PropertyStorage::OutOfLine, -32)
        );
    }

    #[test]
    fn cell_type_bytes() {
        for byte in 0..=20u8 {
            if let Some(ty) = CellType::from_byte(byte) {
                assert_eq!(ty as u8, byte);
            }
        }
        assert!(CellType::Float32Array.is_typed_array());
        assert!(!CellType::String.is_object());
        assert_eq!(
            CellType::for_typed_array(ArrayType::Uint8ClampedArray),
            Some(CellType::Uint8ClampedArray)
        );
    }
}
