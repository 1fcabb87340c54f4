//! Single-word NaN-boxing

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value, types};
use otter_dfg_graph::JsValue;

use super::{PURE_NAN_BITS, ValueRepresentation, purify_nan};
use crate::assembler::MacroAssembler;
use crate::registers::JsRegs;

/// High 16 bits set: int32. Any of them set: number.
pub const TAG_TYPE_NUMBER: u64 = 0xFFFF_0000_0000_0000;
/// Offset added to double bit patterns.
pub const DOUBLE_ENCODE_OFFSET: u64 = 1 << 48;
/// Bit set in every non-cell immediate.
pub const TAG_BIT_OTHER: u64 = 0x2;
/// Set in booleans.
pub const TAG_BIT_BOOL: u64 = 0x4;
/// Set in `undefined`.
pub const TAG_BIT_UNDEFINED: u64 = 0x8;
/// Cells have none of these bits.
pub const TAG_MASK: u64 = TAG_TYPE_NUMBER | TAG_BIT_OTHER;

/// NaN-boxed values in one register ("JSVALUE64").
#[derive(Debug, Clone, Copy, Default)]
pub struct Unified;

impl ValueRepresentation for Unified {
    type Boxed = Value;

    const NAME: &'static str = "unified";
    const TWO_REGISTER: bool = false;

    const EMPTY: u64 = 0;
    const NULL: u64 = TAG_BIT_OTHER;
    const FALSE: u64 = TAG_BIT_OTHER | TAG_BIT_BOOL;
    const TRUE: u64 = TAG_BIT_OTHER | TAG_BIT_BOOL | 1;
    const UNDEFINED: u64 = TAG_BIT_OTHER | TAG_BIT_UNDEFINED;

    fn encode(value: JsValue, _heap_base: usize) -> u64 {
        match value {
            JsValue::Empty => Self::EMPTY,
            JsValue::Undefined => Self::UNDEFINED,
            JsValue::Null => Self::NULL,
            JsValue::Boolean(true) => Self::TRUE,
            JsValue::Boolean(false) => Self::FALSE,
            JsValue::Int32(i) => TAG_TYPE_NUMBER | i as u32 as u64,
            JsValue::Double(d) => purify_nan(d).to_bits().wrapping_add(DOUBLE_ENCODE_OFFSET),
            JsValue::Cell(pointer) => pointer as u64,
        }
    }

    fn decode(bits: u64, _heap_base: usize) -> JsValue {
        match bits {
            Self::EMPTY => JsValue::Empty,
            Self::UNDEFINED => JsValue::Undefined,
            Self::NULL => JsValue::Null,
            Self::TRUE => JsValue::Boolean(true),
            Self::FALSE => JsValue::Boolean(false),
            _ if bits >= TAG_TYPE_NUMBER => JsValue::Int32(bits as u32 as i32),
            _ if bits & TAG_TYPE_NUMBER != 0 => {
                JsValue::Double(f64::from_bits(bits.wrapping_sub(DOUBLE_ENCODE_OFFSET)))
            }
            _ => JsValue::Cell(bits as usize),
        }
    }

    fn regs_get(asm: &mut MacroAssembler<'_>, regs: JsRegs) -> Value {
        asm.gpr(regs.payload)
    }

    fn regs_set(asm: &mut MacroAssembler<'_>, regs: JsRegs, value: Value) {
        asm.set_gpr(regs.payload, value);
    }

    fn constant(asm: &mut MacroAssembler<'_>, bits: u64) -> Value {
        asm.iconst(bits as i64)
    }

    fn from_word(_asm: &mut MacroAssembler<'_>, word: Value) -> Value {
        word
    }

    fn to_word(_asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        value
    }

    fn box_int32(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        let wide = asm.builder.ins().uextend(types::I64, value);
        asm.builder.ins().bor_imm(wide, TAG_TYPE_NUMBER as i64)
    }

    fn box_double(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        let is_nan = asm.builder.ins().fcmp(FloatCC::Unordered, value, value);
        let bits = asm.builder.ins().bitcast(types::I64, MemFlags::new(), value);
        let pure = asm.iconst(PURE_NAN_BITS as i64);
        let bits = asm.builder.ins().select(is_nan, pure, bits);
        asm.builder.ins().iadd_imm(bits, DOUBLE_ENCODE_OFFSET as i64)
    }

    fn box_cell(_asm: &mut MacroAssembler<'_>, pointer: Value) -> Value {
        pointer
    }

    fn box_boolean(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        asm.builder.ins().bor_imm(value, Self::FALSE as i64)
    }

    fn unbox_int32(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        asm.builder.ins().ireduce(types::I32, value)
    }

    fn unbox_double(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        let bits = asm
            .builder
            .ins()
            .iadd_imm(value, DOUBLE_ENCODE_OFFSET.wrapping_neg() as i64);
        asm.builder.ins().bitcast(types::F64, MemFlags::new(), bits)
    }

    fn unbox_cell(_asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        value
    }

    fn unbox_boolean(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        asm.builder.ins().band_imm(value, 1)
    }

    fn is_int32(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        asm.builder
            .ins()
            .icmp_imm(IntCC::UnsignedGreaterThanOrEqual, value, TAG_TYPE_NUMBER as i64)
    }

    fn is_number(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        let tag = asm.builder.ins().band_imm(value, TAG_TYPE_NUMBER as i64);
        asm.builder.ins().icmp_imm(IntCC::NotEqual, tag, 0)
    }

    fn is_cell(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        let tag = asm.builder.ins().band_imm(value, TAG_MASK as i64);
        asm.builder.ins().icmp_imm(IntCC::Equal, tag, 0)
    }

    fn is_boolean(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        let flipped = asm.builder.ins().bxor_imm(value, Self::FALSE as i64);
        let rest = asm.builder.ins().band_imm(flipped, !1);
        asm.builder.ins().icmp_imm(IntCC::Equal, rest, 0)
    }

    fn is_other(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        let masked = asm.builder.ins().band_imm(value, !(TAG_BIT_UNDEFINED as i64));
        asm.builder
            .ins()
            .icmp_imm(IntCC::Equal, masked, Self::NULL as i64)
    }

    fn is_empty(asm: &mut MacroAssembler<'_>, value: Value) -> Value {
        asm.builder.ins().icmp_imm(IntCC::Equal, value, 0)
    }
}
