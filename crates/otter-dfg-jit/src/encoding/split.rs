//! Tag/payload encoding

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value, types};
use otter_dfg_graph::JsValue;

use super::{PURE_NAN_BITS, ValueRepresentation, purify_nan};
use crate::assembler::MacroAssembler;
use crate::registers::JsRegs;

/// Int32 tag.
pub const INT32_TAG: u32 = 0xFFFF_FFFF;
/// Boolean tag.
pub const BOOLEAN_TAG: u32 = 0xFFFF_FFFE;
/// `null` tag.
pub const NULL_TAG: u32 = 0xFFFF_FFFD;
/// `undefined` tag.
pub const UNDEFINED_TAG: u32 = 0xFFFF_FFFC;
/// Cell tag.
pub const CELL_TAG: u32 = 0xFFFF_FFFB;
/// Empty-value tag.
pub const EMPTY_VALUE_TAG: u32 = 0xFFFF_FFFA;
/// Deleted-value tag.
pub const DELETED_VALUE_TAG: u32 = 0xFFFF_FFF9;
/// Tags below this one are the high half of a double.
pub const LOWEST_TAG: u32 = DELETED_VALUE_TAG;

const fn word(tag: u32, payload: u32) -> u64 {
    ((tag as u64) << 32) | payload as u64
}

/// A boxed value as two `I64` halves, each zero-extended from 32 bits.
#[derive(Debug, Clone, Copy)]
pub struct TagPayload {
    /// High half.
    pub tag: Value,
    /// Low half.
    pub payload: Value,
}

/// Tag/payload values in two registers ("JSVALUE32_64").
#[derive(Debug, Clone, Copy, Default)]
pub struct Split;

impl Split {
    fn tag_is(asm: &mut MacroAssembler<'_>, value: TagPayload, tag: u32) -> Value {
        asm.builder
            .ins()
            .icmp_imm(IntCC::Equal, value.tag, tag as i64)
    }
}

impl ValueRepresentation for Split {
    type Boxed = TagPayload;

    const NAME: &'static str = "split";
    const TWO_REGISTER: bool = true;

    const EMPTY: u64 = word(EMPTY_VALUE_TAG, 0);
    const UNDEFINED: u64 = word(UNDEFINED_TAG, 0);
    const NULL: u64 = word(NULL_TAG, 0);
    const TRUE: u64 = word(BOOLEAN_TAG, 1);
    const FALSE: u64 = word(BOOLEAN_TAG, 0);

    fn encode(value: JsValue, heap_base: usize) -> u64 {
        match value {
            JsValue::Empty => Self::EMPTY,
            JsValue::Undefined => Self::UNDEFINED,
            JsValue::Null => Self::NULL,
            JsValue::Boolean(b) => word(BOOLEAN_TAG, b as u32),
            JsValue::Int32(i) => word(INT32_TAG, i as u32),
            JsValue::Double(d) => purify_nan(d).to_bits(),
            JsValue::Cell(pointer) => word(CELL_TAG, pointer.wrapping_sub(heap_base) as u32),
        }
    }

    fn decode(bits: u64, heap_base: usize) -> JsValue {
        let tag = (bits >> 32) as u32;
        let payload = bits as u32;
        if tag < LOWEST_TAG {
            return JsValue::Double(f64::from_bits(bits));
        }
        match tag {
            INT32_TAG => JsValue::Int32(payload as i32),
            BOOLEAN_TAG => JsValue::Boolean(payload != 0),
            NULL_TAG => JsValue::Null,
            UNDEFINED_TAG => JsValue::Undefined,
            CELL_TAG => JsValue::Cell(heap_base + payload as usize),
            _ => JsValue::Empty,
        }
    }

    fn regs_get(asm: &mut MacroAssembler<'_>, regs: JsRegs) -> TagPayload {
        let payload = asm.gpr(regs.payload);
        let tag = match regs.tag {
            Some(tag) => asm.gpr(tag),
            None => asm.iconst(i64::from(INT32_TAG)),
        };
        TagPayload { tag, payload }
    }

    fn regs_set(asm: &mut MacroAssembler<'_>, regs: JsRegs, value: TagPayload) {
        asm.set_gpr(regs.payload, value.payload);
        if let Some(tag) = regs.tag {
            asm.set_gpr(tag, value.tag);
        }
    }

    fn constant(asm: &mut MacroAssembler<'_>, bits: u64) -> TagPayload {
        TagPayload {
            tag: asm.iconst((bits >> 32) as i64),
            payload: asm.iconst(bits as u32 as i64),
        }
    }

    fn from_word(asm: &mut MacroAssembler<'_>, word: Value) -> TagPayload {
        let tag = asm.builder.ins().ushr_imm(word, 32);
        let payload = asm.builder.ins().band_imm(word, 0xFFFF_FFFF);
        TagPayload { tag, payload }
    }

    fn to_word(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        let high = asm.builder.ins().ishl_imm(value.tag, 32);
        asm.builder.ins().bor(high, value.payload)
    }

    fn box_int32(asm: &mut MacroAssembler<'_>, value: Value) -> TagPayload {
        let payload = asm.builder.ins().uextend(types::I64, value);
        let tag = asm.iconst(i64::from(INT32_TAG));
        TagPayload { tag, payload }
    }

    fn box_double(asm: &mut MacroAssembler<'_>, value: Value) -> TagPayload {
        let is_nan = asm.builder.ins().fcmp(FloatCC::Unordered, value, value);
        let bits = asm.builder.ins().bitcast(types::I64, MemFlags::new(), value);
        let pure = asm.iconst(PURE_NAN_BITS as i64);
        let bits = asm.builder.ins().select(is_nan, pure, bits);
        Self::from_word(asm, bits)
    }

    fn box_cell(asm: &mut MacroAssembler<'_>, pointer: Value) -> TagPayload {
        let heap_base = asm.heap_base();
        let offset = asm.builder.ins().isub(pointer, heap_base);
        let payload = asm.builder.ins().band_imm(offset, 0xFFFF_FFFF);
        let tag = asm.iconst(i64::from(CELL_TAG));
        TagPayload { tag, payload }
    }

    fn box_boolean(asm: &mut MacroAssembler<'_>, value: Value) -> TagPayload {
        let tag = asm.iconst(i64::from(BOOLEAN_TAG));
        TagPayload {
            tag,
            payload: value,
        }
    }

    fn unbox_int32(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        asm.builder.ins().ireduce(types::I32, value.payload)
    }

    fn unbox_double(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        let bits = Self::to_word(asm, value);
        asm.builder.ins().bitcast(types::F64, MemFlags::new(), bits)
    }

    fn unbox_cell(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        let heap_base = asm.heap_base();
        asm.builder.ins().iadd(heap_base, value.payload)
    }

    fn unbox_boolean(_asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        value.payload
    }

    fn is_int32(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        Self::tag_is(asm, value, INT32_TAG)
    }

    fn is_number(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        let is_int = Self::is_int32(asm, value);
        let is_double = asm
            .builder
            .ins()
            .icmp_imm(IntCC::UnsignedLessThan, value.tag, i64::from(LOWEST_TAG));
        asm.builder.ins().bor(is_int, is_double)
    }

    fn is_cell(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        Self::tag_is(asm, value, CELL_TAG)
    }

    fn is_boolean(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        Self::tag_is(asm, value, BOOLEAN_TAG)
    }

    fn is_other(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        let folded = asm.builder.ins().bor_imm(value.tag, 1);
        asm.builder
            .ins()
            .icmp_imm(IntCC::Equal, folded, i64::from(NULL_TAG))
    }

    fn is_empty(asm: &mut MacroAssembler<'_>, value: TagPayload) -> Value {
        Self::tag_is(asm, value, EMPTY_VALUE_TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_sit_above_every_double() {
        let highest_double = Split::encode(JsValue::Double(f64::NEG_INFINITY), 0);
        assert!(((highest_double >> 32) as u32) < LOWEST_TAG);
        let nan = Split::encode(JsValue::Double(f64::from_bits(u64::MAX)), 0);
        assert_eq!(nan, PURE_NAN_BITS);
    }

    #[test]
    fn cells_are_heap_relative() {
        let heap_base = 0x10_0000;
        let bits = Split::encode(JsValue::Cell(heap_base + 0x40), heap_base);
        assert_eq!(bits, word(CELL_TAG, 0x40));
        assert_eq!(Split::decode(bits, heap_base), JsValue::Cell(heap_base + 0x40));
    }

    #[test]
    fn null_and_undefined_fold_to_one_tag() {
        assert_eq!(NULL_TAG | 1, NULL_TAG);
        assert_eq!(UNDEFINED_TAG | 1, NULL_TAG);
        assert_ne!(BOOLEAN_TAG | 1, NULL_TAG);
        assert_ne!(CELL_TAG | 1, NULL_TAG);
    }
}
