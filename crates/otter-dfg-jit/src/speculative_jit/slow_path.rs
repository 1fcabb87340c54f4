//! Out-of-line helper calls
//!
//! A slow path is queued while the fast path is emitted and written after the
//! last block. Around the call it silently spills every register-resident
//! value to its slot and fills it back afterwards, without touching the
//! generation tracker: the fast path's view of registers is what the code
//! after the continuation label sees.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{FuncRef, InstBuilder, MemFlags, Value, types};
use otter_dfg_graph::{JsValue, NodeIndex, VirtualRegister};
use smallvec::SmallVec;

use super::SpeculativeJit;
use crate::assembler::{JumpList, Label};
use crate::encoding::ValueRepresentation;
use crate::error::{JitError, Result};
use crate::generation_info::{DataFormat, RegisterLocation};
use crate::layout::FrameLayout;
use crate::platform::Platform;
use crate::registers::{Gpr, JsRegs};
use crate::runtime_helpers::HelperKind;

/// One helper argument, converted to a word when the call is emitted.
#[derive(Debug, Clone, Copy)]
pub(super) enum SlowPathArg {
    /// The execution context.
    Context,
    Imm(i64),
    /// A boxed word, passed as is.
    Word(Value),
    /// Sign-extended int32 in an `I64`, boxed for the call.
    BoxedInt32(Value),
    BoxedDouble(Value),
    BoxedCell(Value),
    /// An `F64` passed as its raw bits.
    DoubleBits(Value),
}

/// Where the helper's return word goes.
#[derive(Debug, Clone, Copy)]
pub(super) enum SlowPathResult {
    None,
    /// A boxed value.
    Js(JsRegs),
    /// An int32, sign-extended into the register.
    Int32(Gpr),
    /// A 0/1 word.
    Boolean(Gpr),
    /// A boxed boolean, unboxed into 0/1.
    BooleanFromBoxed(Gpr),
}

impl SlowPathResult {
    fn gprs(self) -> SmallVec<[Gpr; 2]> {
        match self {
            Self::None => SmallVec::new(),
            Self::Js(regs) => regs.gprs().collect(),
            Self::Int32(gpr) | Self::Boolean(gpr) | Self::BooleanFromBoxed(gpr) => {
                SmallVec::from_slice(&[gpr])
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SilentSave {
    vreg: VirtualRegister,
    location: RegisterLocation,
    register_format: DataFormat,
    spill_format: DataFormat,
    constant: Option<JsValue>,
}

impl SilentSave {
    fn needs_store(&self) -> bool {
        self.constant.is_none() && self.spill_format == DataFormat::None
    }

    /// Format the slot holds once the spill has run.
    fn slot_format(&self) -> DataFormat {
        if self.needs_store() {
            self.register_format
        } else {
            self.spill_format
        }
    }
}

pub(super) struct SlowPathRecord {
    node: NodeIndex,
    entry: JumpList,
    helper: HelperKind,
    func: FuncRef,
    args: SmallVec<[SlowPathArg; 4]>,
    result: SlowPathResult,
    done: Label,
    saves: Vec<SilentSave>,
}

impl<R: ValueRepresentation, P: Platform> SpeculativeJit<'_, '_, R, P> {
    /// Queue a helper call reached through `entry`; execution continues here afterwards.
    pub(super) fn add_slow_path(
        &mut self,
        entry: JumpList,
        helper: HelperKind,
        args: &[SlowPathArg],
        result: SlowPathResult,
    ) -> Result<()> {
        if entry.is_empty() {
            return Ok(());
        }
        let func = self.helpers.require(helper, self.current_node)?;
        let result_gprs = result.gprs();
        let mut saves: Vec<SilentSave> = Vec::new();
        let owners = self
            .gprs
            .owned()
            .filter(|(gpr, _)| !result_gprs.contains(gpr))
            .map(|(_, vreg)| vreg)
            .chain(self.fprs.owned().map(|(_, vreg)| vreg));
        for vreg in owners {
            if saves.iter().any(|save| save.vreg == vreg) {
                continue;
            }
            let info = &self.infos[vreg.index()];
            saves.push(SilentSave {
                vreg,
                location: info.location(),
                register_format: info.register_format(),
                spill_format: info.spill_format(),
                constant: info.constant_value(),
            });
        }
        let done = self.asm.label();
        self.slow_paths.push(SlowPathRecord {
            node: self.current_node,
            entry,
            helper,
            func,
            args: args.iter().copied().collect(),
            result,
            done,
            saves,
        });
        Ok(())
    }

    /// Whether slow path `index` finds every live value already in the frame,
    /// so it spills nothing around its call.
    pub(super) fn slow_path_is_flushed(&self, index: u32) -> bool {
        self.slow_paths
            .get(index as usize)
            .is_none_or(|record| !record.saves.iter().any(SilentSave::needs_store))
    }

    /// Call a helper inline. Every live value is flushed to its slot first.
    pub(super) fn call_operation(&mut self, helper: HelperKind, args: &[Value]) -> Result<Value> {
        let func = self.helpers.require(helper, self.current_node)?;
        self.flush_registers();
        let result = self.asm.call(func, args);
        if helper.can_throw() {
            self.asm.exception_check();
            self.state.clobber_heap();
        }
        Ok(result)
    }

    pub(super) fn emit_slow_paths(&mut self) -> Result<()> {
        let records = std::mem::take(&mut self.slow_paths);
        for record in &records {
            self.current_node = record.node;
            let label = self.asm.begin_out_of_line();
            record.entry.clone().link(&mut self.asm, label);

            for save in &record.saves {
                if save.needs_store() {
                    self.store_to_spill_slot(save.vreg, save.location);
                }
            }

            let mut args: SmallVec<[Value; 4]> = SmallVec::new();
            for arg in &record.args {
                args.push(self.slow_path_arg(*arg));
            }
            let returned = self.asm.call(record.func, &args);
            if record.helper.can_throw() {
                self.asm.exception_check();
            }
            self.write_slow_path_result(record.result, returned);

            for save in &record.saves {
                self.silent_fill(save)?;
            }
            self.asm.jump_to(record.done);
        }
        self.slow_paths = records;
        Ok(())
    }

    fn slow_path_arg(&mut self, arg: SlowPathArg) -> Value {
        match arg {
            SlowPathArg::Context => self.asm.ctx(),
            SlowPathArg::Imm(value) => self.asm.iconst(value),
            SlowPathArg::Word(word) => word,
            SlowPathArg::BoxedInt32(value) => {
                let narrow = self.asm.builder.ins().ireduce(types::I32, value);
                let boxed = R::box_int32(&mut self.asm, narrow);
                R::to_word(&mut self.asm, boxed)
            }
            SlowPathArg::BoxedDouble(value) => {
                let boxed = R::box_double(&mut self.asm, value);
                R::to_word(&mut self.asm, boxed)
            }
            SlowPathArg::BoxedCell(pointer) => {
                let boxed = R::box_cell(&mut self.asm, pointer);
                R::to_word(&mut self.asm, boxed)
            }
            SlowPathArg::DoubleBits(value) => {
                self.asm
                    .builder
                    .ins()
                    .bitcast(types::I64, MemFlags::new(), value)
            }
        }
    }

    fn write_slow_path_result(&mut self, result: SlowPathResult, word: Value) {
        match result {
            SlowPathResult::None => {}
            SlowPathResult::Js(regs) => {
                let boxed = R::from_word(&mut self.asm, word);
                R::regs_set(&mut self.asm, regs, boxed);
            }
            SlowPathResult::Int32(gpr) => {
                let narrow = self.asm.builder.ins().ireduce(types::I32, word);
                let value = self.asm.builder.ins().sextend(types::I64, narrow);
                self.asm.set_gpr(gpr, value);
            }
            SlowPathResult::Boolean(gpr) => self.asm.set_gpr(gpr, word),
            SlowPathResult::BooleanFromBoxed(gpr) => {
                let is_true = self
                    .asm
                    .builder
                    .ins()
                    .icmp_imm(IntCC::Equal, word, R::TRUE as i64);
                let value = self.asm.builder.ins().uextend(types::I64, is_true);
                self.asm.set_gpr(gpr, value);
            }
        }
    }

    /// Put a saved value back into the registers it occupied, in their format.
    fn silent_fill(&mut self, save: &SilentSave) -> Result<()> {
        let slot = self.layout.vreg_slot(save.vreg);
        let target = save.register_format;
        match save.location {
            RegisterLocation::Fpr(fpr) => {
                let double = match save.constant {
                    Some(value) => {
                        let number = value.as_number().ok_or(self.conversion(target))?;
                        self.asm.f64const(number)
                    }
                    None => self.double_from_slot(slot, save.slot_format())?,
                };
                self.asm.set_fpr(fpr, double);
            }
            RegisterLocation::Pair { tag, payload } => {
                let boxed = self.boxed_from_save(save, slot)?;
                R::regs_set(&mut self.asm, JsRegs::pair(tag, payload), boxed);
            }
            RegisterLocation::Gpr(gpr) if target.is_js() => {
                let boxed = self.boxed_from_save(save, slot)?;
                R::regs_set(&mut self.asm, JsRegs::single(gpr), boxed);
            }
            RegisterLocation::Gpr(gpr) => {
                let raw = match save.constant {
                    Some(JsValue::Int32(i)) => self.asm.iconst(i64::from(i)),
                    Some(JsValue::Cell(pointer)) => self.asm.iconst(pointer as i64),
                    Some(JsValue::Boolean(b)) => self.asm.iconst(i64::from(b)),
                    Some(_) => return Err(self.conversion(target)),
                    None => self.unboxed_from_slot(slot, save.slot_format(), target)?,
                };
                self.asm.set_gpr(gpr, raw);
            }
            RegisterLocation::None => {}
        }
        Ok(())
    }

    fn boxed_from_save(&mut self, save: &SilentSave, slot: u32) -> Result<R::Boxed> {
        match save.constant {
            Some(value) => Ok(self.constant_boxed(value)),
            None => {
                let word = self.asm.load_slot(slot);
                self.boxed_from_word(word, save.slot_format())
            }
        }
    }

    fn double_from_slot(&mut self, slot: u32, format: DataFormat) -> Result<Value> {
        Ok(match format {
            DataFormat::Double => {
                let fp = self.asm.fp();
                self.asm.load_f64(fp, FrameLayout::slot_offset(slot))
            }
            DataFormat::Integer => {
                let raw = self.asm.load_slot(slot);
                self.asm.builder.ins().fcvt_from_sint(types::F64, raw)
            }
            format if format.is_js() => {
                let word = self.asm.load_slot(slot);
                let boxed = R::from_word(&mut self.asm, word);
                R::number_to_double(&mut self.asm, boxed)
            }
            _ => return Err(self.conversion(DataFormat::Double)),
        })
    }

    fn unboxed_from_slot(
        &mut self,
        slot: u32,
        format: DataFormat,
        target: DataFormat,
    ) -> Result<Value> {
        let word = self.asm.load_slot(slot);
        if format == target {
            return Ok(word);
        }
        if !format.is_js() {
            return Err(self.conversion(target));
        }
        let boxed = R::from_word(&mut self.asm, word);
        Ok(match target {
            DataFormat::Integer => {
                let payload = R::unbox_int32(&mut self.asm, boxed);
                self.asm.builder.ins().sextend(types::I64, payload)
            }
            DataFormat::Cell => R::unbox_cell(&mut self.asm, boxed),
            DataFormat::Boolean => R::unbox_boolean(&mut self.asm, boxed),
            _ => return Err(self.conversion(target)),
        })
    }

    fn conversion(&self, requested: DataFormat) -> JitError {
        JitError::FormatConversion {
            node: self.current_node,
            current: DataFormat::None,
            requested,
        }
    }
}
