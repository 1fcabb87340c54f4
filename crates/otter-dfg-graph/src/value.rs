//! Encoding-independent JavaScript values

use serde::{Deserialize, Serialize};

use crate::speculated_type::SpeculatedType;

/// A decoded value: what a boxed word means, independent of its encoding.
///
/// Cells are identified by their host address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JsValue {
    /// The empty value: array holes and not-yet-initialised slots.
    Empty,
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean.
    Boolean(bool),
    /// A 32-bit integer.
    Int32(i32),
    /// A double that is not stored as an int32.
    Double(f64),
    /// A heap cell (object, string, function...).
    Cell(usize),
}

impl JsValue {
    /// Number value, if this is a number.
    pub fn as_number(self) -> Option<f64> {
        match self {
            Self::Int32(i) => Some(i as f64),
            Self::Double(d) => Some(d),
            _ => None,
        }
    }

    /// Whether this is an int32 or a double.
    pub fn is_number(self) -> bool {
        matches!(self, Self::Int32(_) | Self::Double(_))
    }

    /// Cell address, if this is a cell.
    pub fn as_cell(self) -> Option<usize> {
        match self {
            Self::Cell(c) => Some(c),
            _ => None,
        }
    }

    /// Build a number, preferring the int32 form when the value is integral.
    pub fn number(value: f64) -> Self {
        let truncated = value as i32;
        if truncated as f64 == value && !(value == 0.0 && value.is_sign_negative()) {
            Self::Int32(truncated)
        } else {
            Self::Double(value)
        }
    }

    /// Speculated type of a non-cell value; cells map to the whole cell lattice.
    pub fn speculated_type(self) -> SpeculatedType {
        match self {
            Self::Empty => SpeculatedType::EMPTY,
            Self::Undefined | Self::Null => SpeculatedType::OTHER,
            Self::Boolean(_) => SpeculatedType::BOOLEAN,
            Self::Int32(_) => SpeculatedType::INT32,
            Self::Double(d) if d.is_nan() => SpeculatedType::DOUBLE_NAN,
            Self::Double(_) => SpeculatedType::DOUBLE_REAL,
            Self::Cell(_) => SpeculatedType::CELL,
        }
    }

    /// Observational equality: numbers compare by value (so `Int32(1)` equals
    /// `Double(1.0)`), NaN equals NaN, and `-0` differs from `+0`.
    pub fn same_value(self, other: Self) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => {
                (a.is_nan() && b.is_nan())
                    || (a == b && a.is_sign_negative() == b.is_sign_negative())
            }
            _ => self == other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_prefers_int32() {
        assert_eq!(JsValue::number(3.0), JsValue::Int32(3));
        assert_eq!(JsValue::number(-0.0), JsValue::Double(-0.0));
        assert_eq!(JsValue::number(0.5), JsValue::Double(0.5));
        assert_eq!(JsValue::number(4294967296.0), JsValue::Double(4294967296.0));
    }

    #[test]
    fn same_value_semantics() {
        assert!(JsValue::Int32(1).same_value(JsValue::Double(1.0)));
        assert!(JsValue::Double(f64::NAN).same_value(JsValue::Double(f64::NAN)));
        assert!(!JsValue::Double(-0.0).same_value(JsValue::Int32(0)));
        assert!(!JsValue::Null.same_value(JsValue::Undefined));
    }
}
