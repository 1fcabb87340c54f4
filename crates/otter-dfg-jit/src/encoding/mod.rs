//! Value representation layer
//!
//! A boxed value is one 64-bit word in memory and in the helper ABI. How the
//! word is laid out, and how many registers it needs while live, depends on
//! the encoding:
//!
//! | Encoding | Registers | Numbers | Cells |
//! |----------|-----------|---------|-------|
//! | [`Unified`] | 1 | NaN-boxed | raw pointer |
//! | [`Split`] | 2 (tag, payload) | tag below the lowest tag | offset from the heap base |
//!
//! Everything above this layer is written once against [`ValueRepresentation`].
//! The `split-encoding` feature picks [`ActiveEncoding`].

mod split;
mod unified;

use cranelift_codegen::ir::{InstBuilder, Value};
use otter_dfg_graph::JsValue;

use crate::assembler::MacroAssembler;
use crate::registers::JsRegs;

pub use split::Split;
pub use unified::Unified;

/// The canonical quiet NaN every boxed double is purified to.
pub const PURE_NAN_BITS: u64 = 0x7FF8_0000_0000_0000;

/// A NaN pattern no boxed value may ever carry.
pub const IMPURE_NAN_BITS: u64 = 0x7FFC_0000_0000_0000;

/// Encoding selected at build time.
#[cfg(not(feature = "split-encoding"))]
pub type ActiveEncoding = Unified;

/// Encoding selected at build time.
#[cfg(feature = "split-encoding")]
pub type ActiveEncoding = Split;

/// Purify a double: every NaN becomes [`PURE_NAN_BITS`].
#[inline]
pub fn purify_nan(value: f64) -> f64 {
    if value.is_nan() {
        f64::from_bits(PURE_NAN_BITS)
    } else {
        value
    }
}

/// One physical encoding of boxed values.
///
/// Host-side `encode`/`decode` and the IR operations must agree bit for bit:
/// the runtime boxes with the former, emitted code with the latter.
///
/// IR conventions: int32 payloads are `I32` values, doubles are `F64`, cell
/// pointers and booleans (0 or 1) are `I64`. Predicates return `I8` truth values.
pub trait ValueRepresentation: Copy + Send + Sync + 'static {
    /// A boxed value while it lives in SSA form.
    type Boxed: Copy;

    /// Encoding name for diagnostics.
    const NAME: &'static str;
    /// Whether a boxed value needs a tag register and a payload register.
    const TWO_REGISTER: bool;

    /// The empty value (array holes).
    const EMPTY: u64;
    /// `undefined`
    const UNDEFINED: u64;
    /// `null`
    const NULL: u64;
    /// `true`
    const TRUE: u64;
    /// `false`
    const FALSE: u64;

    // -- host side ----------------------------------------------------------

    /// Box a host value. `heap_base` is the arena base cells are relative to.
    fn encode(value: JsValue, heap_base: usize) -> u64;

    /// Decode a boxed word.
    fn decode(bits: u64, heap_base: usize) -> JsValue;

    // -- moving boxed values ------------------------------------------------

    /// Read a boxed value out of its registers.
    fn regs_get(asm: &mut MacroAssembler<'_>, regs: JsRegs) -> Self::Boxed;

    /// Write a boxed value into registers.
    fn regs_set(asm: &mut MacroAssembler<'_>, regs: JsRegs, value: Self::Boxed);

    /// Materialize a constant word.
    fn constant(asm: &mut MacroAssembler<'_>, bits: u64) -> Self::Boxed;

    /// Split a memory word into its boxed form.
    fn from_word(asm: &mut MacroAssembler<'_>, word: Value) -> Self::Boxed;

    /// Join a boxed value into one memory word.
    fn to_word(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Load a boxed value from `base + offset`.
    fn load(asm: &mut MacroAssembler<'_>, base: Value, offset: i32) -> Self::Boxed {
        let word = asm.load_i64(base, offset);
        Self::from_word(asm, word)
    }

    /// Store a boxed value to `base + offset`.
    fn store(asm: &mut MacroAssembler<'_>, value: Self::Boxed, base: Value, offset: i32) {
        let word = Self::to_word(asm, value);
        asm.store_i64(word, base, offset);
    }

    // -- boxing -------------------------------------------------------------

    /// Box an `I32`.
    fn box_int32(asm: &mut MacroAssembler<'_>, value: Value) -> Self::Boxed;

    /// Box an `F64`, purifying NaN.
    fn box_double(asm: &mut MacroAssembler<'_>, value: Value) -> Self::Boxed;

    /// Box a cell pointer.
    fn box_cell(asm: &mut MacroAssembler<'_>, pointer: Value) -> Self::Boxed;

    /// Box an `I64` holding 0 or 1.
    fn box_boolean(asm: &mut MacroAssembler<'_>, value: Value) -> Self::Boxed;

    // -- unboxing (no checks) -----------------------------------------------

    /// Int32 payload as `I32`.
    fn unbox_int32(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Double payload as `F64`; the value must not be an int32.
    fn unbox_double(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Cell pointer.
    fn unbox_cell(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Boolean payload as `I64` 0 or 1.
    fn unbox_boolean(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    // -- predicates ---------------------------------------------------------

    /// Int32 test.
    fn is_int32(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Int32-or-double test.
    fn is_number(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Cell test.
    fn is_cell(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Boolean test.
    fn is_boolean(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// `undefined`-or-`null` test.
    fn is_other(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Empty-value test.
    fn is_empty(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value;

    /// Convert a value known to be a number to `F64`.
    fn number_to_double(asm: &mut MacroAssembler<'_>, value: Self::Boxed) -> Value {
        let is_int = Self::is_int32(asm, value);
        let int = Self::unbox_int32(asm, value);
        let from_int = asm.builder.ins().fcvt_from_sint(cranelift_codegen::ir::types::F64, int);
        let from_double = Self::unbox_double(asm, value);
        asm.builder.ins().select(is_int, from_int, from_double)
    }

    /// Word equality with a constant.
    fn equals_constant(asm: &mut MacroAssembler<'_>, value: Self::Boxed, bits: u64) -> Value {
        let word = Self::to_word(asm, value);
        asm.builder.ins().icmp_imm(
            cranelift_codegen::ir::condcodes::IntCC::Equal,
            word,
            bits as i64,
        )
    }
}
