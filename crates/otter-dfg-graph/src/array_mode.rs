//! Indexed storage modes decided upstream for each indexed access

use serde::{Deserialize, Serialize};

/// Storage the access speculates it will find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayType {
    /// No speculation; every access calls the generic runtime helper.
    Generic,
    /// Packed or holey int32 elements.
    Int32,
    /// Packed or holey unboxed doubles.
    Double,
    /// Packed or holey boxed values.
    Contiguous,
    /// Vector plus sparse map.
    ArrayStorage,
    /// [`ArrayType::ArrayStorage`] whose prototype chain may intercept hole writes.
    SlowPutArrayStorage,
    /// Character access on a string.
    String,
    /// Arguments object.
    Arguments,
    /// `Int8Array`
    Int8Array,
    /// `Int16Array`
    Int16Array,
    /// `Int32Array`
    Int32Array,
    /// `Uint8Array`
    Uint8Array,
    /// `Uint8ClampedArray`
    Uint8ClampedArray,
    /// `Uint16Array`
    Uint16Array,
    /// `Uint32Array`
    Uint32Array,
    /// `Float32Array`
    Float32Array,
    /// `Float64Array`
    Float64Array,
}

impl ArrayType {
    /// One of the typed array views.
    pub fn is_typed_array(self) -> bool {
        ArrayMode::new(self).is_typed_array()
    }
}

/// Whether the base is speculated to be an array object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArrayClass {
    /// Array object.
    Array,
    /// Non-array object with indexed storage.
    NonArray,
    /// Either.
    #[default]
    PossiblyArray,
}

/// What the access expects about the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArraySpeculation {
    /// Index in bounds and not a hole; anything else exits.
    #[default]
    InBounds,
    /// In bounds; holes read as `undefined` because the prototype chain has
    /// no indexed properties.
    SaneChain,
    /// Stores may fill holes or append within capacity.
    ToHole,
    /// Out-of-bounds accesses are expected and go through the slow path.
    OutOfBounds,
}

/// Element encoding of a typed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypedArrayKind {
    /// Two's complement integers.
    Signed,
    /// Unsigned integers.
    Unsigned,
    /// IEEE floats.
    Float,
}

/// Element layout of a typed array mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypedArrayDescriptor {
    /// Bytes per element.
    pub element_size: u8,
    /// Element encoding.
    pub kind: TypedArrayKind,
    /// Stores saturate to 0..=255 instead of wrapping.
    pub clamped: bool,
}

impl TypedArrayDescriptor {
    const fn new(element_size: u8, kind: TypedArrayKind, clamped: bool) -> Self {
        Self {
            element_size,
            kind,
            clamped,
        }
    }
}

/// Storage mode of one indexed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayMode {
    /// Speculated storage.
    pub array_type: ArrayType,
    /// Speculated class of the base.
    pub class: ArrayClass,
    /// Speculated index behaviour.
    pub speculation: ArraySpeculation,
}

impl ArrayMode {
    /// In-bounds mode for `array_type`.
    pub const fn new(array_type: ArrayType) -> Self {
        Self {
            array_type,
            class: ArrayClass::PossiblyArray,
            speculation: ArraySpeculation::InBounds,
        }
    }

    /// The generic mode.
    pub const fn generic() -> Self {
        Self::new(ArrayType::Generic)
    }

    /// Same mode with a different index speculation.
    pub const fn with_speculation(mut self, speculation: ArraySpeculation) -> Self {
        self.speculation = speculation;
        self
    }

    /// Same mode with a different base class.
    pub const fn with_class(mut self, class: ArrayClass) -> Self {
        self.class = class;
        self
    }

    /// Shorthand for [`ArraySpeculation::OutOfBounds`].
    pub const fn out_of_bounds(self) -> Self {
        self.with_speculation(ArraySpeculation::OutOfBounds)
    }

    /// Shorthand for [`ArraySpeculation::SaneChain`].
    pub const fn sane_chain(self) -> Self {
        self.with_speculation(ArraySpeculation::SaneChain)
    }

    /// Shorthand for [`ArraySpeculation::ToHole`].
    pub const fn to_hole(self) -> Self {
        self.with_speculation(ArraySpeculation::ToHole)
    }

    /// Out-of-bounds or hole accesses exit instead of taking a slow path.
    pub fn is_in_bounds(self) -> bool {
        matches!(
            self.speculation,
            ArraySpeculation::InBounds | ArraySpeculation::SaneChain
        )
    }

    /// Holes read as `undefined`.
    pub fn is_sane_chain(self) -> bool {
        self.speculation == ArraySpeculation::SaneChain
    }

    /// Out-of-bounds reads take the slow path.
    pub fn is_out_of_bounds(self) -> bool {
        self.speculation == ArraySpeculation::OutOfBounds
    }

    /// Stores may write holes or append within capacity.
    pub fn may_store_to_hole(self) -> bool {
        matches!(
            self.speculation,
            ArraySpeculation::ToHole | ArraySpeculation::OutOfBounds
        )
    }

    /// Hole writes may be intercepted by the prototype chain.
    pub fn is_slow_put(self) -> bool {
        self.array_type == ArrayType::SlowPutArrayStorage
    }

    /// Elements live in a butterfly.
    pub fn uses_butterfly(self) -> bool {
        matches!(
            self.array_type,
            ArrayType::Int32
                | ArrayType::Double
                | ArrayType::Contiguous
                | ArrayType::ArrayStorage
                | ArrayType::SlowPutArrayStorage
        )
    }

    /// Either ArrayStorage flavour.
    pub fn is_array_storage(self) -> bool {
        matches!(
            self.array_type,
            ArrayType::ArrayStorage | ArrayType::SlowPutArrayStorage
        )
    }

    /// Element layout for typed array modes.
    pub fn typed_array_descriptor(self) -> Option<TypedArrayDescriptor> {
        use TypedArrayKind::{Float, Signed, Unsigned};
        Some(match self.array_type {
            ArrayType::Int8Array => TypedArrayDescriptor::new(1, Signed, false),
            ArrayType::Int16Array => TypedArrayDescriptor::new(2, Signed, false),
            ArrayType::Int32Array => TypedArrayDescriptor::new(4, Signed, false),
            ArrayType::Uint8Array => TypedArrayDescriptor::new(1, Unsigned, false),
            ArrayType::Uint8ClampedArray => TypedArrayDescriptor::new(1, Unsigned, true),
            ArrayType::Uint16Array => TypedArrayDescriptor::new(2, Unsigned, false),
            ArrayType::Uint32Array => TypedArrayDescriptor::new(4, Unsigned, false),
            ArrayType::Float32Array => TypedArrayDescriptor::new(4, Float, false),
            ArrayType::Float64Array => TypedArrayDescriptor::new(8, Float, false),
            _ => return None,
        })
    }

    /// Whether the mode names a typed array.
    pub fn is_typed_array(self) -> bool {
        self.typed_array_descriptor().is_some()
    }
}
