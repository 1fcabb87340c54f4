//! Deoptimization points
//!
//! Every speculation check that can fail records an [`OsrExitRecord`]: which
//! node to resume at and how to rebuild each frame slot the baseline tier
//! will read. The exit stub boxes every recovered value into its slot and
//! calls the `OsrExit` helper, which resumes the baseline tier by
//! re-executing the exiting node.

use std::fmt;

use otter_dfg_graph::{BlockIndex, JsValue, NodeIndex};

use crate::generation_info::DataFormat;
use crate::registers::{Fpr, Gpr};

/// Exits of one unit before the unit is jettisoned.
pub const DEFAULT_DEOPT_THRESHOLD: u32 = 10;

/// Why a speculation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitKind {
    /// A value did not have the speculated type.
    BadType,
    /// An object did not have the expected structure.
    BadCache,
    /// An object did not have the expected indexed storage.
    BadIndexingType,
    /// A callee was not the expected function.
    BadFunction,
    /// Int32 arithmetic overflowed.
    Overflow,
    /// Int32 arithmetic produced `-0`.
    NegativeZero,
    /// An index was out of bounds.
    OutOfBounds,
    /// A read found a hole.
    LoadFromHole,
    /// A write targeted a hole.
    StoreToHole,
    /// A write targeted a hole or was out of bounds.
    StoreToHoleOrOutOfBounds,
    /// Something the profile cannot describe.
    Uncountable,
    /// The profile never reached this point.
    InadequateCoverage,
    /// A watched fact stopped holding.
    WatchpointFired,
}

impl ExitKind {
    /// Decode from the byte stored in exit records.
    pub fn from_u8(byte: u8) -> Option<Self> {
        use ExitKind::*;
        Some(match byte {
            0 => BadType,
            1 => BadCache,
            2 => BadIndexingType,
            3 => BadFunction,
            4 => Overflow,
            5 => NegativeZero,
            6 => OutOfBounds,
            7 => LoadFromHole,
            8 => StoreToHole,
            9 => StoreToHoleOrOutOfBounds,
            10 => Uncountable,
            11 => InadequateCoverage,
            12 => WatchpointFired,
            _ => return None,
        })
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where the baseline tier's value for a frame slot comes from at an exit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRecovery {
    /// A compile-time constant.
    Constant(JsValue),
    /// An unboxed or unified boxed value in a register.
    InGpr {
        /// The register.
        gpr: Gpr,
        /// Its format.
        format: DataFormat,
    },
    /// A boxed value in a tag/payload register pair.
    InPair {
        /// Tag half.
        tag: Gpr,
        /// Payload half.
        payload: Gpr,
    },
    /// A double in a floating-point register.
    InFpr(Fpr),
    /// Another frame slot, stored in `format`.
    Displaced {
        /// Source slot.
        slot: u32,
        /// Format of the stored word.
        format: DataFormat,
    },
    /// The slot already holds the boxed value.
    AlreadyInFrame,
    /// Nobody reads the slot.
    Dead,
}

/// Recovery of one frame slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotRecovery {
    /// Frame slot to write.
    pub slot: u32,
    /// Where its value comes from.
    pub recovery: ValueRecovery,
}

/// One entry of the deoptimization-point table.
#[derive(Debug, Clone, PartialEq)]
pub struct OsrExitRecord {
    /// Position in the table; passed to the exit helper.
    pub index: u32,
    /// Why the exit was taken.
    pub kind: ExitKind,
    /// Node that is re-executed by the baseline tier.
    pub node: NodeIndex,
    /// Block of that node.
    pub block: BlockIndex,
    /// Position of the node within its block.
    pub position: u32,
    /// Frame reconstruction recipe. Locals come before virtual registers.
    pub recoveries: Vec<SlotRecovery>,
}

impl OsrExitRecord {
    /// Recovery for a slot, if one was recorded.
    pub fn recovery_for(&self, slot: u32) -> Option<ValueRecovery> {
        self.recoveries
            .iter()
            .find(|r| r.slot == slot)
            .map(|r| r.recovery)
    }

    /// Number of slots the stub writes.
    pub fn written_slots(&self) -> usize {
        self.recoveries
            .iter()
            .filter(|r| !matches!(r.recovery, ValueRecovery::AlreadyInFrame | ValueRecovery::Dead))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_kind_bytes_roundtrip() {
        for byte in 0..=12u8 {
            let kind = ExitKind::from_u8(byte).expect("kind byte should decode");
            assert_eq!(kind as u8, byte);
        }
        assert!(ExitKind::from_u8(13).is_none());
    }

    #[test]
    fn recovery_lookup() {
        let record = OsrExitRecord {
            index: 0,
            kind: ExitKind::Overflow,
            node: NodeIndex(3),
            block: BlockIndex(0),
            position: 3,
            recoveries: vec![
                SlotRecovery {
                    slot: 5,
                    recovery: ValueRecovery::Constant(JsValue::Int32(1)),
                },
                SlotRecovery {
                    slot: 6,
                    recovery: ValueRecovery::AlreadyInFrame,
                },
            ],
        };
        assert_eq!(
            record.recovery_for(5),
            Some(ValueRecovery::Constant(JsValue::Int32(1)))
        );
        assert_eq!(record.recovery_for(9), None);
        assert_eq!(record.written_slots(), 1);
    }
}
