//! Predicted and proven type sets
//!
//! A [`SpeculatedType`] is a set of primitive type classes. Predictions come
//! from value profiling; abstract interpretation narrows them into proofs.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of type classes a value may belong to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SpeculatedType: u32 {
        /// Plain object.
        const FINAL_OBJECT = 1 << 0;
        /// Array object.
        const ARRAY = 1 << 1;
        /// Function object.
        const FUNCTION = 1 << 2;
        /// Any typed array.
        const TYPED_ARRAY = 1 << 3;
        /// Arguments object.
        const ARGUMENTS = 1 << 4;
        /// Any other object.
        const OBJECT_OTHER = 1 << 5;
        /// String cell.
        const STRING = 1 << 6;
        /// Non-object, non-string cell.
        const CELL_OTHER = 1 << 7;
        /// 32-bit integer.
        const INT32 = 1 << 8;
        /// Non-NaN double that is not representable as int32.
        const DOUBLE_REAL = 1 << 9;
        /// NaN.
        const DOUBLE_NAN = 1 << 10;
        /// Boolean.
        const BOOLEAN = 1 << 11;
        /// `undefined` or `null`.
        const OTHER = 1 << 12;
        /// The empty value.
        const EMPTY = 1 << 13;

        /// Every object class.
        const OBJECT = Self::FINAL_OBJECT.bits()
            | Self::ARRAY.bits()
            | Self::FUNCTION.bits()
            | Self::TYPED_ARRAY.bits()
            | Self::ARGUMENTS.bits()
            | Self::OBJECT_OTHER.bits();
        /// Every cell class.
        const CELL = Self::OBJECT.bits() | Self::STRING.bits() | Self::CELL_OTHER.bits();
        /// Any double.
        const DOUBLE = Self::DOUBLE_REAL.bits() | Self::DOUBLE_NAN.bits();
        /// Numbers that are never NaN.
        const REAL_NUMBER = Self::INT32.bits() | Self::DOUBLE_REAL.bits();
        /// Any number.
        const NUMBER = Self::INT32.bits() | Self::DOUBLE.bits();
        /// Anything but a cell.
        const NOT_CELL = Self::NUMBER.bits() | Self::BOOLEAN.bits() | Self::OTHER.bits();
        /// Any non-empty value.
        const TOP = Self::CELL.bits() | Self::NOT_CELL.bits();
    }
}

impl SpeculatedType {
    /// Nothing is known to be possible (unreachable or not yet profiled).
    pub const NONE: Self = Self::empty();

    /// Whether every class in `self` is also in `other`.
    #[inline]
    pub fn is_subset_of(self, other: Self) -> bool {
        other.contains(self)
    }

    /// Whether `self` is non-empty and entirely int32.
    #[inline]
    pub fn is_int32(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::INT32)
    }

    /// Whether `self` is non-empty and entirely numbers.
    #[inline]
    pub fn is_number(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::NUMBER)
    }

    /// Whether `self` is non-empty and entirely cells.
    #[inline]
    pub fn is_cell(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::CELL)
    }

    /// Whether `self` is non-empty and entirely objects.
    #[inline]
    pub fn is_object(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::OBJECT)
    }

    /// Whether `self` is non-empty and entirely strings.
    #[inline]
    pub fn is_string(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::STRING)
    }

    /// Whether `self` is non-empty and entirely booleans.
    #[inline]
    pub fn is_boolean(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::BOOLEAN)
    }
}

impl Default for SpeculatedType {
    fn default() -> Self {
        Self::TOP
    }
}

impl fmt::Display for SpeculatedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        if *self == Self::TOP {
            return write!(f, "Top");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{name}")?;
            first = false;
        }
        Ok(())
    }
}
