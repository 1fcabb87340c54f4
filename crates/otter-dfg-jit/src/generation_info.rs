//! Per-value location tracking
//!
//! Every virtual register has one [`GenerationInfo`] while its block is being
//! generated. It records where the value currently lives (registers, spill
//! slot, or a rematerializable constant), in which [`DataFormat`], and how
//! many uses remain.

use otter_dfg_graph::{JsValue, NodeIndex};
use smallvec::SmallVec;

use crate::registers::{
    Fpr, Gpr, JsRegs, SPILL_ORDER_BOOLEAN, SPILL_ORDER_CELL, SPILL_ORDER_CONSTANT,
    SPILL_ORDER_DOUBLE, SPILL_ORDER_INTEGER, SPILL_ORDER_JS, SPILL_ORDER_NONE,
    SPILL_ORDER_SPILLED, SPILL_ORDER_STORAGE, SpillOrder,
};

/// Physical form of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataFormat {
    /// Nowhere.
    #[default]
    None,
    /// Unboxed int32.
    Integer,
    /// Unboxed double.
    Double,
    /// Unboxed boolean (0 or 1).
    Boolean,
    /// Cell pointer.
    Cell,
    /// Butterfly pointer.
    Storage,
    /// Boxed, type unknown.
    Js,
    /// Boxed int32.
    JsInteger,
    /// Boxed double.
    JsDouble,
    /// Boxed cell.
    JsCell,
    /// Boxed boolean.
    JsBoolean,
}

impl DataFormat {
    /// Whether the value is in boxed form.
    pub fn is_js(self) -> bool {
        matches!(
            self,
            Self::Js | Self::JsInteger | Self::JsDouble | Self::JsCell | Self::JsBoolean
        )
    }

    /// Whether the value is known to be an int32.
    pub fn is_int32(self) -> bool {
        matches!(self, Self::Integer | Self::JsInteger)
    }

    /// Whether the value is known to be a cell.
    pub fn is_cell(self) -> bool {
        matches!(self, Self::Cell | Self::JsCell)
    }

    /// Whether the value is known to be a boolean.
    pub fn is_boolean(self) -> bool {
        matches!(self, Self::Boolean | Self::JsBoolean)
    }

    /// Boxed counterpart of an unboxed format.
    pub fn boxed(self) -> Self {
        match self {
            Self::Integer => Self::JsInteger,
            Self::Double => Self::JsDouble,
            Self::Cell => Self::JsCell,
            Self::Boolean => Self::JsBoolean,
            other => other,
        }
    }

    /// Eviction cost of a register holding this format.
    pub fn spill_order(self) -> SpillOrder {
        match self {
            Self::None => SPILL_ORDER_NONE,
            Self::Integer => SPILL_ORDER_INTEGER,
            Self::Double => SPILL_ORDER_DOUBLE,
            Self::Boolean => SPILL_ORDER_BOOLEAN,
            Self::Cell => SPILL_ORDER_CELL,
            Self::Storage => SPILL_ORDER_STORAGE,
            _ => SPILL_ORDER_JS,
        }
    }
}

/// Registers a value currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterLocation {
    /// No register.
    #[default]
    None,
    /// One general-purpose register.
    Gpr(Gpr),
    /// A boxed value in the split encoding.
    Pair {
        /// Tag half.
        tag: Gpr,
        /// Payload half.
        payload: Gpr,
    },
    /// One floating-point register.
    Fpr(Fpr),
}

/// Generation state of one virtual register.
#[derive(Debug, Clone, Default)]
pub struct GenerationInfo {
    node: Option<NodeIndex>,
    use_count: u32,
    register_format: DataFormat,
    spill_format: DataFormat,
    location: RegisterLocation,
    constant: Option<JsValue>,
}

impl GenerationInfo {
    /// A rematerializable constant, not yet in any register.
    pub fn constant(node: NodeIndex, use_count: u32, value: JsValue) -> Self {
        Self {
            node: Some(node),
            use_count,
            constant: Some(value),
            ..Self::default()
        }
    }

    /// A value produced in a general-purpose register.
    pub fn in_gpr(node: NodeIndex, use_count: u32, gpr: Gpr, format: DataFormat) -> Self {
        debug_assert!(!format.is_js() && format != DataFormat::Double);
        Self {
            node: Some(node),
            use_count,
            register_format: format,
            location: RegisterLocation::Gpr(gpr),
            ..Self::default()
        }
    }

    /// A boxed value produced in one or two registers.
    pub fn in_js_regs(node: NodeIndex, use_count: u32, regs: JsRegs, format: DataFormat) -> Self {
        debug_assert!(format.is_js());
        Self {
            node: Some(node),
            use_count,
            register_format: format,
            location: location_of(regs),
            ..Self::default()
        }
    }

    /// A double produced in a floating-point register.
    pub fn in_fpr(node: NodeIndex, use_count: u32, fpr: Fpr) -> Self {
        Self {
            node: Some(node),
            use_count,
            register_format: DataFormat::Double,
            location: RegisterLocation::Fpr(fpr),
            ..Self::default()
        }
    }

    /// Node that produced the value.
    pub fn node(&self) -> Option<NodeIndex> {
        self.node
    }

    /// Remaining uses.
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    /// Whether the value is still needed.
    pub fn is_alive(&self) -> bool {
        self.node.is_some() && self.use_count > 0
    }

    /// Consume one use; returns `true` when it was the last.
    pub fn use_once(&mut self) -> bool {
        self.use_count = self.use_count.saturating_sub(1);
        self.use_count == 0
    }

    /// Format while in registers, or [`DataFormat::None`].
    pub fn register_format(&self) -> DataFormat {
        self.register_format
    }

    /// Format of the spill slot, or [`DataFormat::None`] when never spilled.
    pub fn spill_format(&self) -> DataFormat {
        self.spill_format
    }

    /// Whether the spill slot holds the value.
    pub fn is_spilled(&self) -> bool {
        self.spill_format != DataFormat::None
    }

    /// Constant value, for constant nodes.
    pub fn constant_value(&self) -> Option<JsValue> {
        self.constant
    }

    /// Current registers.
    pub fn location(&self) -> RegisterLocation {
        self.location
    }

    /// Whether the value occupies any register.
    pub fn in_register(&self) -> bool {
        self.location != RegisterLocation::None
    }

    /// The general-purpose register of an unboxed value or unified boxed value.
    pub fn gpr(&self) -> Option<Gpr> {
        match self.location {
            RegisterLocation::Gpr(gpr) => Some(gpr),
            _ => None,
        }
    }

    /// Registers of a boxed value.
    pub fn js_regs(&self) -> Option<JsRegs> {
        if !self.register_format.is_js() {
            return None;
        }
        match self.location {
            RegisterLocation::Gpr(gpr) => Some(JsRegs::single(gpr)),
            RegisterLocation::Pair { tag, payload } => Some(JsRegs::pair(tag, payload)),
            _ => None,
        }
    }

    /// Floating-point register of a double.
    pub fn fpr(&self) -> Option<Fpr> {
        match self.location {
            RegisterLocation::Fpr(fpr) => Some(fpr),
            _ => None,
        }
    }

    /// General-purpose registers occupied.
    pub fn gprs(&self) -> SmallVec<[Gpr; 2]> {
        match self.location {
            RegisterLocation::Gpr(gpr) => SmallVec::from_slice(&[gpr]),
            RegisterLocation::Pair { tag, payload } => SmallVec::from_slice(&[tag, payload]),
            _ => SmallVec::new(),
        }
    }

    /// Eviction cost of the registers holding this value.
    pub fn spill_order(&self) -> SpillOrder {
        if self.constant.is_some() {
            SPILL_ORDER_CONSTANT
        } else if self.is_spilled() {
            SPILL_ORDER_SPILLED
        } else {
            self.register_format.spill_order()
        }
    }

    /// Whether evicting the value requires a store.
    pub fn needs_spill(&self) -> bool {
        self.constant.is_none() && !self.is_spilled() && self.in_register()
    }

    /// The value now lives in its spill slot in `format`; registers are released.
    pub fn spill(&mut self, format: DataFormat) {
        self.spill_format = format;
        self.release_registers();
    }

    /// The spill slot now also holds the value in `format`; registers are kept.
    pub fn record_spill(&mut self, format: DataFormat) {
        self.spill_format = format;
    }

    /// Forget the registers, keeping the spill slot and constant.
    pub fn release_registers(&mut self) {
        self.location = RegisterLocation::None;
        self.register_format = DataFormat::None;
    }

    /// Refilled into a general-purpose register.
    pub fn fill_gpr(&mut self, gpr: Gpr, format: DataFormat) {
        self.location = RegisterLocation::Gpr(gpr);
        self.register_format = format;
    }

    /// Refilled as a boxed value.
    pub fn fill_js(&mut self, regs: JsRegs, format: DataFormat) {
        self.location = location_of(regs);
        self.register_format = format;
    }

    /// Refilled into a floating-point register.
    pub fn fill_fpr(&mut self, fpr: Fpr) {
        self.location = RegisterLocation::Fpr(fpr);
        self.register_format = DataFormat::Double;
    }

    /// Narrow the format after a speculation check on the boxed value.
    pub fn narrow_js_format(&mut self, format: DataFormat) {
        if self.register_format.is_js() {
            self.register_format = format;
        }
        if self.spill_format == DataFormat::Js {
            self.spill_format = format;
        }
    }
}

fn location_of(regs: JsRegs) -> RegisterLocation {
    match regs.tag {
        Some(tag) => RegisterLocation::Pair {
            tag,
            payload: regs.payload,
        },
        None => RegisterLocation::Gpr(regs.payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spill_keeps_slot_format() {
        let mut info = GenerationInfo::in_gpr(NodeIndex(1), 2, Gpr(3), DataFormat::Integer);
        assert!(info.needs_spill());
        assert_eq!(info.spill_order(), SPILL_ORDER_INTEGER);

        info.spill(DataFormat::Integer);
        assert!(!info.in_register());
        assert!(info.is_spilled());

        info.fill_gpr(Gpr(5), DataFormat::Integer);
        assert_eq!(info.gpr(), Some(Gpr(5)));
        assert!(!info.needs_spill());
        assert_eq!(info.spill_order(), SPILL_ORDER_SPILLED);
    }

    #[test]
    fn constants_never_need_a_store() {
        let mut info = GenerationInfo::constant(NodeIndex(0), 1, JsValue::Int32(4));
        info.fill_gpr(Gpr(0), DataFormat::Integer);
        assert!(!info.needs_spill());
        assert_eq!(info.spill_order(), SPILL_ORDER_CONSTANT);
    }

    #[test]
    fn use_counts() {
        let mut info = GenerationInfo::in_fpr(NodeIndex(2), 2, Fpr(0));
        assert!(!info.use_once());
        assert!(info.use_once());
        assert!(!info.is_alive());
    }

    #[test]
    fn boxed_pairs_report_both_registers() {
        let info = GenerationInfo::in_js_regs(
            NodeIndex(4),
            1,
            JsRegs::pair(Gpr(1), Gpr(2)),
            DataFormat::Js,
        );
        assert_eq!(info.js_regs(), Some(JsRegs::pair(Gpr(1), Gpr(2))));
        assert_eq!(info.gprs().as_slice(), &[Gpr(1), Gpr(2)]);
        assert_eq!(info.gpr(), None);
    }

    #[test]
    fn narrowing_only_touches_boxed_formats() {
        let mut info = GenerationInfo::in_js_regs(NodeIndex(4), 1, JsRegs::single(Gpr(1)), DataFormat::Js);
        info.narrow_js_format(DataFormat::JsInteger);
        assert_eq!(info.register_format(), DataFormat::JsInteger);
        assert!(DataFormat::JsInteger.is_int32());
        assert_eq!(DataFormat::Cell.boxed(), DataFormat::JsCell);
    }
}
