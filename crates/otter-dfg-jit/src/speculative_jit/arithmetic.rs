//! Arithmetic, bit operations, comparisons and truthiness
//!
//! Int32 operands live sign-extended in 64-bit registers, so an int32 add,
//! subtract or multiply cannot overflow the register and overflow is a
//! comparison of the result with its own 32-bit truncation.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value, types};
use otter_dfg_graph::{ArithMode, Edge, Node, NodeOp, UseKind};

use super::SpeculativeJit;
use super::slow_path::{SlowPathArg, SlowPathResult};
use crate::assembler::JumpList;
use crate::encoding::ValueRepresentation;
use crate::error::{JitError, Result};
use crate::generation_info::DataFormat;
use crate::layout::string;
use crate::osr_exit::ExitKind;
use crate::platform::{IntegerDivision, Platform};
use crate::registers::Gpr;
use crate::runtime_helpers::HelperKind;

/// Largest magnitude a saturating 64-bit conversion truncates exactly.
const TWO_TO_THE_63: f64 = 9_223_372_036_854_775_808.0;

fn both_int32(a: Edge, b: Edge) -> bool {
    a.use_kind.is_int32() && b.use_kind.is_int32()
}

fn both_number(a: Edge, b: Edge) -> bool {
    let numeric = |edge: Edge| edge.use_kind.is_int32() || edge.use_kind.is_double();
    numeric(a) && numeric(b)
}

impl<R: ValueRepresentation, P: Platform> SpeculativeJit<'_, '_, R, P> {
    pub(super) fn unsupported(&self, node: &Node, reason: &'static str) -> JitError {
        JitError::UnsupportedNode {
            node: self.current_node,
            op: node.op.name(),
            reason,
        }
    }

    /// Normalise a 64-bit result to int32, exiting on overflow when `mode` checks it.
    fn int32_overflow_check(&mut self, wide: Value, mode: ArithMode) -> Value {
        let narrow = self.asm.builder.ins().ireduce(types::I32, wide);
        let value = self.asm.builder.ins().sextend(types::I64, narrow);
        if mode.checks_overflow() {
            let overflowed = self.asm.branch_icmp(IntCC::NotEqual, value, wide);
            self.speculation_check(ExitKind::Overflow, overflowed);
        }
        value
    }

    fn int32_operands(&mut self, node: &Node) -> Result<(Value, Value)> {
        let a = self.fill_speculate_int32(node.child1())?;
        let b = self.fill_speculate_int32(node.child2())?;
        Ok((self.asm.gpr(a), self.asm.gpr(b)))
    }

    fn double_operands(&mut self, node: &Node) -> Result<(Value, Value)> {
        let a = self.fill_speculate_double(node.child1())?;
        let b = self.fill_speculate_double(node.child2())?;
        Ok((self.asm.fpr(a), self.asm.fpr(b)))
    }

    pub(super) fn compile_add_sub(&mut self, node: &Node, mode: ArithMode, subtract: bool) -> Result<()> {
        let (a, b) = (node.child1(), node.child2());
        if both_int32(a, b) {
            let (x, y) = self.int32_operands(node)?;
            let wide = if subtract {
                self.asm.builder.ins().isub(x, y)
            } else {
                self.asm.builder.ins().iadd(x, y)
            };
            let result = self.int32_overflow_check(wide, mode);
            return self.int32_result(result);
        }
        if both_number(a, b) {
            let (x, y) = self.double_operands(node)?;
            let result = if subtract {
                self.asm.builder.ins().fsub(x, y)
            } else {
                self.asm.builder.ins().fadd(x, y)
            };
            return self.double_result(result);
        }
        Err(self.unsupported(node, "operands are not numeric uses"))
    }

    pub(super) fn compile_arith_mul(&mut self, node: &Node, mode: ArithMode) -> Result<()> {
        let (a, b) = (node.child1(), node.child2());
        if both_int32(a, b) {
            let (x, y) = self.int32_operands(node)?;
            let wide = self.asm.builder.ins().imul(x, y);
            let result = self.int32_overflow_check(wide, mode);
            if mode.checks_negative_zero() {
                // 0 with a negative operand is -0
                let signs = self.asm.builder.ins().bor(x, y);
                let zero = self.asm.builder.ins().icmp_imm(IntCC::Equal, result, 0);
                let negative = self.asm.builder.ins().icmp_imm(IntCC::SignedLessThan, signs, 0);
                let both = self.asm.builder.ins().band(zero, negative);
                let jump = self.asm.branch(both);
                self.speculation_check(ExitKind::NegativeZero, jump);
            }
            return self.int32_result(result);
        }
        if both_number(a, b) {
            let (x, y) = self.double_operands(node)?;
            let result = self.asm.builder.ins().fmul(x, y);
            return self.double_result(result);
        }
        Err(self.unsupported(node, "operands are not numeric uses"))
    }

    /// Truncating `a / b` for a non-zero divisor.
    fn int_divide(&mut self, a: Value, b: Value) -> Result<Value> {
        Ok(match P::INTEGER_DIVISION {
            IntegerDivision::Hardware => self.asm.builder.ins().sdiv(a, b),
            IntegerDivision::Helper => {
                let helper = self.helpers.require(HelperKind::Int32Divide, self.current_node)?;
                let ctx = self.asm.ctx();
                self.asm.call(helper, &[ctx, a, b])
            }
        })
    }

    /// `a % b` with the sign of `a`, for a non-zero divisor.
    fn int_remainder(&mut self, a: Value, b: Value) -> Result<Value> {
        Ok(match P::INTEGER_DIVISION {
            IntegerDivision::Hardware => self.asm.builder.ins().srem(a, b),
            IntegerDivision::Helper => {
                let helper = self.helpers.require(HelperKind::Int32Modulo, self.current_node)?;
                let ctx = self.asm.ctx();
                self.asm.call(helper, &[ctx, a, b])
            }
        })
    }

    /// A divisor that is never zero; `is_zero` says where it was replaced.
    fn nonzero_divisor(&mut self, b: Value) -> (Value, Value) {
        let is_zero = self.asm.builder.ins().icmp_imm(IntCC::Equal, b, 0);
        let one = self.asm.iconst(1);
        let safe = self.asm.builder.ins().select(is_zero, one, b);
        (safe, is_zero)
    }

    pub(super) fn compile_arith_div(&mut self, node: &Node, mode: ArithMode) -> Result<()> {
        let (a, b) = (node.child1(), node.child2());
        if both_int32(a, b) {
            let (x, y) = self.int32_operands(node)?;
            if mode.checks_overflow() {
                let by_zero = self.asm.branch_icmp_imm(IntCC::Equal, y, 0);
                self.speculation_check(ExitKind::Overflow, by_zero);
                if mode.checks_negative_zero() {
                    let x_zero = self.asm.builder.ins().icmp_imm(IntCC::Equal, x, 0);
                    let y_negative = self.asm.builder.ins().icmp_imm(IntCC::SignedLessThan, y, 0);
                    let negative_zero = self.asm.builder.ins().band(x_zero, y_negative);
                    let jump = self.asm.branch(negative_zero);
                    self.speculation_check(ExitKind::NegativeZero, jump);
                }
                let quotient = self.int_divide(x, y)?;
                // i32::MIN / -1 lands outside int32; an inexact quotient is a double
                let result = self.int32_overflow_check(quotient, mode);
                let product = self.asm.builder.ins().imul(result, y);
                let inexact = self.asm.branch_icmp(IntCC::NotEqual, product, x);
                self.speculation_check(ExitKind::Overflow, inexact);
                return self.int32_result(result);
            }
            let (divisor, is_zero) = self.nonzero_divisor(y);
            let quotient = self.int_divide(x, divisor)?;
            let zero = self.asm.iconst(0);
            let quotient = self.asm.builder.ins().select(is_zero, zero, quotient);
            let result = self.int32_overflow_check(quotient, ArithMode::Unchecked);
            return self.int32_result(result);
        }
        if both_number(a, b) {
            let (x, y) = self.double_operands(node)?;
            let result = self.asm.builder.ins().fdiv(x, y);
            return self.double_result(result);
        }
        Err(self.unsupported(node, "operands are not numeric uses"))
    }

    pub(super) fn compile_arith_mod(&mut self, node: &Node, mode: ArithMode) -> Result<()> {
        let (a, b) = (node.child1(), node.child2());
        if both_int32(a, b) {
            let (x, y) = self.int32_operands(node)?;
            if mode.checks_overflow() {
                let by_zero = self.asm.branch_icmp_imm(IntCC::Equal, y, 0);
                self.speculation_check(ExitKind::Overflow, by_zero);
                let result = self.int_remainder(x, y)?;
                if mode.checks_negative_zero() {
                    let result_zero = self.asm.builder.ins().icmp_imm(IntCC::Equal, result, 0);
                    let x_negative = self.asm.builder.ins().icmp_imm(IntCC::SignedLessThan, x, 0);
                    let negative_zero = self.asm.builder.ins().band(result_zero, x_negative);
                    let jump = self.asm.branch(negative_zero);
                    self.speculation_check(ExitKind::NegativeZero, jump);
                }
                return self.int32_result(result);
            }
            let (divisor, is_zero) = self.nonzero_divisor(y);
            let remainder = self.int_remainder(x, divisor)?;
            let zero = self.asm.iconst(0);
            let result = self.asm.builder.ins().select(is_zero, zero, remainder);
            return self.int32_result(result);
        }
        if both_number(a, b) {
            let (x, y) = self.double_operands(node)?;
            let helper = self.helpers.require(HelperKind::FMod, self.current_node)?;
            let x_bits = self.asm.builder.ins().bitcast(types::I64, MemFlags::new(), x);
            let y_bits = self.asm.builder.ins().bitcast(types::I64, MemFlags::new(), y);
            let ctx = self.asm.ctx();
            let bits = self.asm.call(helper, &[ctx, x_bits, y_bits]);
            let result = self.asm.builder.ins().bitcast(types::F64, MemFlags::new(), bits);
            return self.double_result(result);
        }
        Err(self.unsupported(node, "operands are not numeric uses"))
    }

    pub(super) fn compile_arith_negate(&mut self, node: &Node, mode: ArithMode) -> Result<()> {
        let a = node.child1();
        if a.use_kind.is_int32() {
            let gpr = self.fill_speculate_int32(a)?;
            let x = self.asm.gpr(gpr);
            if mode.checks_negative_zero() {
                let zero = self.asm.branch_icmp_imm(IntCC::Equal, x, 0);
                self.speculation_check(ExitKind::NegativeZero, zero);
            }
            let wide = self.asm.builder.ins().ineg(x);
            let result = self.int32_overflow_check(wide, mode);
            return self.int32_result(result);
        }
        if a.use_kind.is_double() {
            let fpr = self.fill_speculate_double(a)?;
            let x = self.asm.fpr(fpr);
            let result = self.asm.builder.ins().fneg(x);
            return self.double_result(result);
        }
        Err(self.unsupported(node, "operand is not a numeric use"))
    }

    pub(super) fn compile_arith_abs(&mut self, node: &Node, mode: ArithMode) -> Result<()> {
        let a = node.child1();
        if a.use_kind.is_int32() {
            let gpr = self.fill_speculate_int32(a)?;
            let x = self.asm.gpr(gpr);
            let wide = self.asm.builder.ins().iabs(x);
            let result = self.int32_overflow_check(wide, mode);
            return self.int32_result(result);
        }
        if a.use_kind.is_double() {
            let fpr = self.fill_speculate_double(a)?;
            let x = self.asm.fpr(fpr);
            let result = self.asm.builder.ins().fabs(x);
            return self.double_result(result);
        }
        Err(self.unsupported(node, "operand is not a numeric use"))
    }

    pub(super) fn compile_min_max(&mut self, node: &Node, is_max: bool) -> Result<()> {
        let (a, b) = (node.child1(), node.child2());
        if both_int32(a, b) {
            let (x, y) = self.int32_operands(node)?;
            let result = if is_max {
                self.asm.builder.ins().smax(x, y)
            } else {
                self.asm.builder.ins().smin(x, y)
            };
            return self.int32_result(result);
        }
        if both_number(a, b) {
            let (x, y) = self.double_operands(node)?;
            // NaN-propagating, and -0 orders below +0
            let result = if is_max {
                self.asm.builder.ins().fmax(x, y)
            } else {
                self.asm.builder.ins().fmin(x, y)
            };
            return self.double_result(result);
        }
        Err(self.unsupported(node, "operands are not numeric uses"))
    }

    pub(super) fn compile_arith_sqrt(&mut self, node: &Node) -> Result<()> {
        let fpr = self.fill_speculate_double(node.child1())?;
        let x = self.asm.fpr(fpr);
        let result = self.asm.builder.ins().sqrt(x);
        self.double_result(result)
    }

    pub(super) fn compile_value_add(&mut self, node: &Node) -> Result<()> {
        let (a, b) = (node.child1(), node.child2());
        if both_int32(a, b) {
            return self.compile_add_sub(node, ArithMode::CheckOverflow, false);
        }
        if both_number(a, b) {
            return self.compile_add_sub(node, ArithMode::Unchecked, false);
        }
        let x = self.boxed_word(a)?;
        let y = self.boxed_word(b)?;
        let ctx = self.asm.ctx();
        let word = self.call_operation(HelperKind::ValueAdd, &[ctx, x, y])?;
        self.js_word_result(word, DataFormat::Js)
    }

    // -- conversions ----------------------------------------------------------

    pub(super) fn compile_value_to_int32(&mut self, node: &Node) -> Result<()> {
        let edge = node.child1();
        match edge.use_kind {
            UseKind::Int32 | UseKind::KnownInt32 => {
                let gpr = self.fill_speculate_int32(edge)?;
                let value = self.asm.gpr(gpr);
                self.int32_result(value)
            }
            UseKind::Boolean => {
                let gpr = self.fill_speculate_boolean(edge)?;
                let value = self.asm.gpr(gpr);
                self.int32_result(value)
            }
            UseKind::Number | UseKind::RealNumber | UseKind::KnownNumber => {
                let fpr = self.fill_speculate_double(edge)?;
                let double = self.asm.fpr(fpr);
                let result = self.allocate_gpr()?;
                self.truncate_to_int32(double, result)?;
                self.gpr_result(result, DataFormat::Integer)
            }
            _ => {
                self.speculate(edge)?;
                let regs = self.fill_js_value(edge.node)?;
                let boxed = R::regs_get(&mut self.asm, regs);
                let word = R::to_word(&mut self.asm, boxed);
                let result = self.allocate_gpr()?;
                let is_int = R::is_int32(&mut self.asm, boxed);
                let slow = self.asm.branch_not(is_int);
                let payload = R::unbox_int32(&mut self.asm, boxed);
                let value = self.asm.builder.ins().sextend(types::I64, payload);
                self.asm.set_gpr(result, value);
                self.add_slow_path(
                    slow.into(),
                    HelperKind::ToInt32,
                    &[SlowPathArg::Context, SlowPathArg::Word(word)],
                    SlowPathResult::Int32(result),
                )?;
                self.gpr_result(result, DataFormat::Integer)
            }
        }
    }

    /// ECMAScript ToInt32 of a double into `result`; huge magnitudes call the helper.
    pub(super) fn truncate_to_int32(&mut self, double: Value, result: Gpr) -> Result<()> {
        let magnitude = self.asm.builder.ins().fabs(double);
        let limit = self.asm.f64const(TWO_TO_THE_63);
        let fits = self
            .asm
            .builder
            .ins()
            .fcmp(FloatCC::LessThan, magnitude, limit);
        let slow = self.asm.branch_not(fits);
        let truncated = self.asm.builder.ins().fcvt_to_sint_sat(types::I64, double);
        let wrapped = self.int32_overflow_check(truncated, ArithMode::Unchecked);
        self.asm.set_gpr(result, wrapped);
        self.add_slow_path(
            slow.into(),
            HelperKind::ToInt32,
            &[SlowPathArg::Context, SlowPathArg::BoxedDouble(double)],
            SlowPathResult::Int32(result),
        )
    }

    pub(super) fn compile_uint32_to_number(&mut self, node: &Node, mode: ArithMode) -> Result<()> {
        let gpr = self.fill_speculate_int32(node.child1())?;
        let value = self.asm.gpr(gpr);
        if mode.checks_overflow() {
            let negative = self.asm.branch_icmp_imm(IntCC::SignedLessThan, value, 0);
            self.speculation_check(ExitKind::Overflow, negative);
            return self.int32_result(value);
        }
        let unsigned = self.asm.builder.ins().band_imm(value, 0xFFFF_FFFF);
        let double = self.asm.builder.ins().fcvt_from_uint(types::F64, unsigned);
        self.double_result(double)
    }

    // -- bit operations -------------------------------------------------------

    pub(super) fn compile_bit_op(&mut self, node: &Node) -> Result<()> {
        let (x, y) = self.int32_operands(node)?;
        let x32 = self.asm.builder.ins().ireduce(types::I32, x);
        let y32 = self.asm.builder.ins().ireduce(types::I32, y);
        let ins = self.asm.builder.ins();
        // Shift amounts are masked to the operand width.
        let result = match node.op {
            NodeOp::BitAnd => ins.band(x32, y32),
            NodeOp::BitOr => ins.bor(x32, y32),
            NodeOp::BitXor => ins.bxor(x32, y32),
            NodeOp::BitLShift => ins.ishl(x32, y32),
            NodeOp::BitRShift => ins.sshr(x32, y32),
            NodeOp::BitURShift => ins.ushr(x32, y32),
            _ => return Err(self.unsupported(node, "not a bit operation")),
        };
        let value = self.asm.builder.ins().sextend(types::I64, result);
        self.int32_result(value)
    }

    // -- comparisons ----------------------------------------------------------

    pub(super) fn compile_compare(&mut self, node: &Node) -> Result<()> {
        let (int_cc, float_cc, helper) = match node.op {
            NodeOp::CompareLess => (IntCC::SignedLessThan, FloatCC::LessThan, HelperKind::CompareLess),
            NodeOp::CompareLessEq => (
                IntCC::SignedLessThanOrEqual,
                FloatCC::LessThanOrEqual,
                HelperKind::CompareLessEq,
            ),
            NodeOp::CompareGreater => (
                IntCC::SignedGreaterThan,
                FloatCC::GreaterThan,
                HelperKind::CompareGreater,
            ),
            NodeOp::CompareGreaterEq => (
                IntCC::SignedGreaterThanOrEqual,
                FloatCC::GreaterThanOrEqual,
                HelperKind::CompareGreaterEq,
            ),
            NodeOp::CompareEq => (IntCC::Equal, FloatCC::Equal, HelperKind::CompareEq),
            NodeOp::CompareStrictEq => (IntCC::Equal, FloatCC::Equal, HelperKind::CompareStrictEq),
            _ => return Err(self.unsupported(node, "not a comparison")),
        };
        let equality = matches!(node.op, NodeOp::CompareEq | NodeOp::CompareStrictEq);
        let (a, b) = (node.child1(), node.child2());

        let condition = if both_int32(a, b) {
            let (x, y) = self.int32_operands(node)?;
            self.asm.builder.ins().icmp(int_cc, x, y)
        } else if both_number(a, b) {
            let (x, y) = self.double_operands(node)?;
            self.asm.builder.ins().fcmp(float_cc, x, y)
        } else if equality
            && a.use_kind == UseKind::Boolean
            && b.use_kind == UseKind::Boolean
        {
            let x = self.fill_speculate_boolean(a)?;
            let y = self.fill_speculate_boolean(b)?;
            let (x, y) = (self.asm.gpr(x), self.asm.gpr(y));
            self.asm.builder.ins().icmp(IntCC::Equal, x, y)
        } else if equality && a.use_kind == UseKind::Object && b.use_kind == UseKind::Object {
            let x = self.fill_speculate_cell(a)?;
            let y = self.fill_speculate_cell(b)?;
            let (x, y) = (self.asm.gpr(x), self.asm.gpr(y));
            self.asm.builder.ins().icmp(IntCC::Equal, x, y)
        } else {
            let x = self.boxed_word(a)?;
            let y = self.boxed_word(b)?;
            let ctx = self.asm.ctx();
            let word = self.call_operation(helper, &[ctx, x, y])?;
            return self.js_word_result(word, DataFormat::JsBoolean);
        };
        let value = self.asm.builder.ins().uextend(types::I64, condition);
        self.boolean_result(value)
    }

    pub(super) fn compile_logical_not(&mut self, node: &Node) -> Result<()> {
        let truthy = self.truthiness(node.child1())?;
        let falsy = self.asm.builder.ins().icmp_imm(IntCC::Equal, truthy, 0);
        let value = self.asm.builder.ins().uextend(types::I64, falsy);
        self.boolean_result(value)
    }

    /// Truthiness of an operand as an integer, non-zero meaning true.
    pub(super) fn truthiness(&mut self, edge: Edge) -> Result<Value> {
        match edge.use_kind {
            UseKind::Int32 | UseKind::KnownInt32 => {
                let gpr = self.fill_speculate_int32(edge)?;
                let value = self.asm.gpr(gpr);
                Ok(self.asm.builder.ins().icmp_imm(IntCC::NotEqual, value, 0))
            }
            UseKind::Number | UseKind::RealNumber | UseKind::KnownNumber => {
                let fpr = self.fill_speculate_double(edge)?;
                let value = self.asm.fpr(fpr);
                let zero = self.asm.f64const(0.0);
                // NaN is unordered and therefore falsy
                Ok(self
                    .asm
                    .builder
                    .ins()
                    .fcmp(FloatCC::OrderedNotEqual, value, zero))
            }
            UseKind::Boolean => {
                let gpr = self.fill_speculate_boolean(edge)?;
                Ok(self.asm.gpr(gpr))
            }
            UseKind::Object => {
                self.fill_speculate_cell(edge)?;
                Ok(self.asm.iconst(1))
            }
            UseKind::String | UseKind::KnownString => {
                let gpr = self.fill_speculate_cell(edge)?;
                let pointer = self.asm.gpr(gpr);
                let length = self.asm.load_u32(pointer, string::LENGTH);
                Ok(self.asm.builder.ins().icmp_imm(IntCC::NotEqual, length, 0))
            }
            UseKind::ObjectOrOther => {
                self.speculate(edge)?;
                let regs = self.fill_js_value(edge.node)?;
                let boxed = R::regs_get(&mut self.asm, regs);
                Ok(R::is_cell(&mut self.asm, boxed))
            }
            UseKind::Other => {
                self.speculate(edge)?;
                Ok(self.asm.iconst(0))
            }
            _ => self.untyped_truthiness(edge),
        }
    }

    fn untyped_truthiness(&mut self, edge: Edge) -> Result<Value> {
        self.speculate(edge)?;
        let regs = self.fill_js_value(edge.node)?;
        let boxed = R::regs_get(&mut self.asm, regs);
        let word = R::to_word(&mut self.asm, boxed);
        let result = self.allocate_gpr()?;
        let mut done = JumpList::new();
        let mut slow = JumpList::new();

        let is_boolean = R::is_boolean(&mut self.asm, boxed);
        let not_boolean = self.asm.branch_not(is_boolean);
        let value = R::unbox_boolean(&mut self.asm, boxed);
        self.asm.set_gpr(result, value);
        done.push(self.asm.jump());
        self.asm.link_here(not_boolean);

        let is_int = R::is_int32(&mut self.asm, boxed);
        let not_int = self.asm.branch_not(is_int);
        let payload = R::unbox_int32(&mut self.asm, boxed);
        let nonzero = self.asm.builder.ins().icmp_imm(IntCC::NotEqual, payload, 0);
        let value = self.asm.builder.ins().uextend(types::I64, nonzero);
        self.asm.set_gpr(result, value);
        done.push(self.asm.jump());
        self.asm.link_here(not_int);

        let is_other = R::is_other(&mut self.asm, boxed);
        slow.push(self.asm.branch_not(is_other));
        let zero = self.asm.iconst(0);
        self.asm.set_gpr(result, zero);
        done.link_here(&mut self.asm);

        self.add_slow_path(
            slow,
            HelperKind::ToBoolean,
            &[SlowPathArg::Context, SlowPathArg::Word(word)],
            SlowPathResult::Boolean(result),
        )?;
        Ok(self.asm.gpr(result))
    }
}
