//! Per-edge speculation kinds

use serde::{Deserialize, Serialize};

use crate::speculated_type::SpeculatedType;

/// The type an operand is speculated to have at one particular use.
///
/// `Known*` kinds mean the upstream passes already proved the type, so no
/// check is emitted. The other typed kinds require a check unless the
/// abstract state proves the type at code generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UseKind {
    /// Any value, boxed.
    #[default]
    Untyped,
    /// Speculated int32.
    Int32,
    /// Proven int32.
    KnownInt32,
    /// Speculated number, used as a double.
    Number,
    /// Speculated number that is never NaN.
    RealNumber,
    /// Proven number.
    KnownNumber,
    /// Speculated boolean.
    Boolean,
    /// Speculated cell.
    Cell,
    /// Proven cell.
    KnownCell,
    /// Speculated object.
    Object,
    /// Speculated object, `undefined` or `null`.
    ObjectOrOther,
    /// Speculated string.
    String,
    /// Proven string.
    KnownString,
    /// Speculated `undefined` or `null`.
    Other,
}

impl UseKind {
    /// The set of types a value may have after this use's check passes.
    pub fn type_filter(self) -> SpeculatedType {
        match self {
            Self::Untyped => SpeculatedType::TOP,
            Self::Int32 | Self::KnownInt32 => SpeculatedType::INT32,
            Self::Number | Self::KnownNumber => SpeculatedType::NUMBER,
            Self::RealNumber => SpeculatedType::REAL_NUMBER,
            Self::Boolean => SpeculatedType::BOOLEAN,
            Self::Cell | Self::KnownCell => SpeculatedType::CELL,
            Self::Object => SpeculatedType::OBJECT,
            Self::ObjectOrOther => SpeculatedType::OBJECT | SpeculatedType::OTHER,
            Self::String | Self::KnownString => SpeculatedType::STRING,
            Self::Other => SpeculatedType::OTHER,
        }
    }

    /// Whether the upstream passes guarantee this use without a check.
    pub fn is_known(self) -> bool {
        matches!(
            self,
            Self::KnownInt32 | Self::KnownNumber | Self::KnownCell | Self::KnownString
        )
    }

    /// Whether the operand is consumed as an unboxed int32.
    pub fn is_int32(self) -> bool {
        matches!(self, Self::Int32 | Self::KnownInt32)
    }

    /// Whether the operand is consumed as an unboxed double.
    pub fn is_double(self) -> bool {
        matches!(self, Self::Number | Self::RealNumber | Self::KnownNumber)
    }

    /// Whether the operand is consumed as a cell pointer.
    pub fn is_cell(self) -> bool {
        matches!(
            self,
            Self::Cell | Self::KnownCell | Self::Object | Self::String | Self::KnownString
        )
    }

    /// Short name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Untyped => "Untyped",
            Self::Int32 => "Int32",
            Self::KnownInt32 => "KnownInt32",
            Self::Number => "Number",
            Self::RealNumber => "RealNumber",
            Self::KnownNumber => "KnownNumber",
            Self::Boolean => "Boolean",
            Self::Cell => "Cell",
            Self::KnownCell => "KnownCell",
            Self::Object => "Object",
            Self::ObjectOrOther => "ObjectOrOther",
            Self::String => "String",
            Self::KnownString => "KnownString",
            Self::Other => "Other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_share_filters_with_checked_kinds() {
        assert_eq!(UseKind::KnownInt32.type_filter(), UseKind::Int32.type_filter());
        assert_eq!(UseKind::KnownCell.type_filter(), UseKind::Cell.type_filter());
        assert!(UseKind::KnownNumber.is_known());
        assert!(!UseKind::Number.is_known());
    }

    #[test]
    fn real_number_excludes_nan() {
        let filter = UseKind::RealNumber.type_filter();
        assert!(!filter.intersects(SpeculatedType::DOUBLE_NAN));
        assert!(SpeculatedType::INT32.is_subset_of(filter));
    }
}
