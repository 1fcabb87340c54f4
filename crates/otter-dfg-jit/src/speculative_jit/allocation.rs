//! Register ownership, spilling and operand fills
//!
//! Every fill returns a locked register; locks are dropped when the node
//! finishes. A typed fill checks through the speculation gate before it
//! touches the value's tracked state, so the exit sees the value where it
//! was before the conversion.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value, types};
use otter_dfg_graph::{Edge, JsValue, NodeIndex, SpeculatedType, UseKind, VirtualRegister};
use smallvec::SmallVec;

use super::SpeculativeJit;
use super::abstract_state::{CheckDecision, check_decision};
use crate::assembler::JumpList;
use crate::encoding::ValueRepresentation;
use crate::error::{JitError, Result};
use crate::generation_info::{DataFormat, GenerationInfo, RegisterLocation};
use crate::layout::{CellType, FrameLayout, cell};
use crate::osr_exit::ExitKind;
use crate::platform::Platform;
use crate::registers::{Fpr, Gpr, JsRegs};

/// Format of a boxed constant.
pub(super) fn constant_format(value: JsValue) -> DataFormat {
    match value {
        JsValue::Int32(_) => DataFormat::JsInteger,
        JsValue::Double(_) => DataFormat::JsDouble,
        JsValue::Cell(_) => DataFormat::JsCell,
        JsValue::Boolean(_) => DataFormat::JsBoolean,
        _ => DataFormat::Js,
    }
}

impl<R: ValueRepresentation, P: Platform> SpeculativeJit<'_, '_, R, P> {
    pub(super) fn vreg_of(&self, node: NodeIndex) -> Result<VirtualRegister> {
        self.graph
            .node(node)
            .virtual_register
            .ok_or(JitError::DeadValue { node })
    }

    pub(super) fn result_vreg(&self) -> Result<VirtualRegister> {
        self.vreg_of(self.current_node)
    }

    // -- register banks -------------------------------------------------------

    pub(super) fn allocate_gpr(&mut self) -> Result<Gpr> {
        let allocation = self.gprs.allocate().ok_or(JitError::RegisterExhausted {
            node: self.current_node,
        })?;
        if let Some(evicted) = allocation.spill {
            self.spill(evicted);
        }
        Ok(allocation.reg)
    }

    pub(super) fn allocate_fpr(&mut self) -> Result<Fpr> {
        let allocation = self.fprs.allocate().ok_or(JitError::RegisterExhausted {
            node: self.current_node,
        })?;
        if let Some(evicted) = allocation.spill {
            self.spill(evicted);
        }
        Ok(allocation.reg)
    }

    pub(super) fn allocate_js_regs(&mut self) -> Result<JsRegs> {
        let payload = self.allocate_gpr()?;
        if R::TWO_REGISTER {
            let tag = self.allocate_gpr()?;
            Ok(JsRegs::pair(tag, payload))
        } else {
            Ok(JsRegs::single(payload))
        }
    }

    /// A scratch register holding `value`, free again once the node finishes.
    pub(super) fn temporary_gpr(&mut self, value: Value) -> Result<Gpr> {
        let gpr = self.allocate_gpr()?;
        self.asm.set_gpr(gpr, value);
        Ok(gpr)
    }

    pub(super) fn temporary_fpr(&mut self, value: Value) -> Result<Fpr> {
        let fpr = self.allocate_fpr()?;
        self.asm.set_fpr(fpr, value);
        Ok(fpr)
    }

    /// Drop bank ownership of every register the value occupies.
    pub(super) fn release_bank(&mut self, vreg: VirtualRegister) {
        let info = &self.infos[vreg.index()];
        for gpr in info.gprs() {
            if self.gprs.owner(gpr) == Some(vreg) {
                self.gprs.release(gpr);
            }
        }
        if let Some(fpr) = info.fpr()
            && self.fprs.owner(fpr) == Some(vreg)
        {
            self.fprs.release(fpr);
        }
    }

    fn retain_bank(&mut self, vreg: VirtualRegister) {
        let info = &self.infos[vreg.index()];
        let order = info.spill_order();
        for gpr in info.gprs() {
            self.gprs.retain(gpr, vreg, order);
        }
        if let Some(fpr) = info.fpr() {
            self.fprs.retain(fpr, vreg, order);
        }
    }

    /// Value now lives unboxed in `gpr`; the old registers are released.
    fn fill_info_gpr(&mut self, vreg: VirtualRegister, gpr: Gpr, format: DataFormat) {
        self.release_bank(vreg);
        self.infos[vreg.index()].fill_gpr(gpr, format);
        self.retain_bank(vreg);
    }

    // -- spilling -------------------------------------------------------------

    /// Write the registers of a value to its spill slot, in their current format.
    pub(super) fn store_to_spill_slot(
        &mut self,
        vreg: VirtualRegister,
        location: RegisterLocation,
    ) {
        let slot = self.layout.vreg_slot(vreg);
        match location {
            RegisterLocation::Gpr(gpr) => {
                let value = self.asm.gpr(gpr);
                self.asm.store_slot(value, slot);
            }
            RegisterLocation::Pair { tag, payload } => {
                let boxed = R::regs_get(&mut self.asm, JsRegs::pair(tag, payload));
                let word = R::to_word(&mut self.asm, boxed);
                self.asm.store_slot(word, slot);
            }
            RegisterLocation::Fpr(fpr) => {
                let value = self.asm.fpr(fpr);
                let fp = self.asm.fp();
                self.asm.store_f64(value, fp, FrameLayout::slot_offset(slot));
            }
            RegisterLocation::None => {}
        }
    }

    /// Evict a value from its registers, storing it first when the slot is stale.
    pub(super) fn spill(&mut self, vreg: VirtualRegister) {
        let info = &self.infos[vreg.index()];
        let needs_store = info.needs_spill();
        let format = info.register_format();
        let location = info.location();
        if needs_store {
            self.store_to_spill_slot(vreg, location);
        }
        self.release_bank(vreg);
        let info = &mut self.infos[vreg.index()];
        if needs_store {
            info.spill(format);
        } else {
            info.release_registers();
        }
    }

    /// Make the spill slot valid while keeping the registers.
    pub(super) fn spill_in_place(&mut self, vreg: VirtualRegister) {
        let info = &self.infos[vreg.index()];
        if !info.needs_spill() {
            return;
        }
        let format = info.register_format();
        let location = info.location();
        self.store_to_spill_slot(vreg, location);
        self.infos[vreg.index()].record_spill(format);
        self.retain_bank(vreg);
    }

    /// Spill every register-resident value, ahead of a call that may inspect the frame.
    pub(super) fn flush_registers(&mut self) {
        let mut owners: SmallVec<[VirtualRegister; 16]> = self
            .gprs
            .owned()
            .map(|(_, vreg)| vreg)
            .chain(self.fprs.owned().map(|(_, vreg)| vreg))
            .collect();
        owners.sort_unstable();
        owners.dedup();
        for vreg in owners {
            self.spill(vreg);
        }
    }

    // -- results --------------------------------------------------------------

    fn install(&mut self, info: GenerationInfo) -> Result<()> {
        let vreg = self.result_vreg()?;
        self.infos[vreg.index()] = info;
        self.retain_bank(vreg);
        self.block_vregs.push(vreg);
        Ok(())
    }

    fn result_uses(&self) -> u32 {
        self.graph.node(self.current_node).ref_count
    }

    fn unboxed_result(&mut self, value: Value, format: DataFormat) -> Result<()> {
        let gpr = self.allocate_gpr()?;
        self.asm.set_gpr(gpr, value);
        self.gpr_result(gpr, format)
    }

    /// Define the current node as the unboxed value already held in `gpr`.
    pub(super) fn gpr_result(&mut self, gpr: Gpr, format: DataFormat) -> Result<()> {
        let info = GenerationInfo::in_gpr(self.current_node, self.result_uses(), gpr, format);
        self.install(info)
    }

    /// Define the current node as an int32, sign-extended in an `I64`.
    pub(super) fn int32_result(&mut self, value: Value) -> Result<()> {
        self.unboxed_result(value, DataFormat::Integer)
    }

    /// Define the current node as a boolean `I64` (0 or 1).
    pub(super) fn boolean_result(&mut self, value: Value) -> Result<()> {
        self.unboxed_result(value, DataFormat::Boolean)
    }

    pub(super) fn storage_result(&mut self, value: Value) -> Result<()> {
        self.unboxed_result(value, DataFormat::Storage)
    }

    pub(super) fn double_result(&mut self, value: Value) -> Result<()> {
        let fpr = self.allocate_fpr()?;
        self.asm.set_fpr(fpr, value);
        let info = GenerationInfo::in_fpr(self.current_node, self.result_uses(), fpr);
        self.install(info)
    }

    /// Define the current node as the boxed value already held in `regs`.
    pub(super) fn js_result(&mut self, regs: JsRegs, format: DataFormat) -> Result<()> {
        let info = GenerationInfo::in_js_regs(self.current_node, self.result_uses(), regs, format);
        self.install(info)
    }

    pub(super) fn js_boxed_result(&mut self, boxed: R::Boxed, format: DataFormat) -> Result<()> {
        let regs = self.allocate_js_regs()?;
        R::regs_set(&mut self.asm, regs, boxed);
        self.js_result(regs, format)
    }

    pub(super) fn js_word_result(&mut self, word: Value, format: DataFormat) -> Result<()> {
        let boxed = R::from_word(&mut self.asm, word);
        self.js_boxed_result(boxed, format)
    }

    // -- boxing ---------------------------------------------------------------

    pub(super) fn constant_boxed(&mut self, value: JsValue) -> R::Boxed {
        match value {
            JsValue::Cell(pointer) => {
                let pointer = self.asm.iconst(pointer as i64);
                R::box_cell(&mut self.asm, pointer)
            }
            other => R::constant(&mut self.asm, R::encode(other, 0)),
        }
    }

    /// Box a raw register or slot word stored in `format`.
    pub(super) fn boxed_from_word(&mut self, word: Value, format: DataFormat) -> Result<R::Boxed> {
        Ok(match format {
            DataFormat::Integer => {
                let narrow = self.asm.builder.ins().ireduce(types::I32, word);
                R::box_int32(&mut self.asm, narrow)
            }
            DataFormat::Boolean => R::box_boolean(&mut self.asm, word),
            DataFormat::Cell => R::box_cell(&mut self.asm, word),
            DataFormat::Double => {
                let double = self
                    .asm
                    .builder
                    .ins()
                    .bitcast(types::F64, MemFlags::new(), word);
                R::box_double(&mut self.asm, double)
            }
            format if format.is_js() => R::from_word(&mut self.asm, word),
            current => {
                return Err(JitError::FormatConversion {
                    node: self.current_node,
                    current,
                    requested: DataFormat::Js,
                });
            }
        })
    }

    /// The boxed value of a vreg whose current location is boxed.
    fn current_boxed(&mut self, vreg: VirtualRegister) -> R::Boxed {
        match self.infos[vreg.index()].js_regs() {
            Some(regs) => R::regs_get(&mut self.asm, regs),
            None => {
                let word = self.asm.load_slot(self.layout.vreg_slot(vreg));
                R::from_word(&mut self.asm, word)
            }
        }
    }

    /// Materialise a value boxed in registers.
    pub(super) fn fill_js_value(&mut self, node: NodeIndex) -> Result<JsRegs> {
        let vreg = self.vreg_of(node)?;
        let info = self.infos[vreg.index()].clone();
        if let Some(regs) = info.js_regs() {
            for gpr in regs.gprs() {
                self.gprs.lock(gpr);
            }
            return Ok(regs);
        }

        let (boxed, format) = if let Some(value) = info.constant_value() {
            (self.constant_boxed(value), constant_format(value))
        } else {
            match info.location() {
                RegisterLocation::Gpr(gpr) => {
                    let raw = self.asm.gpr(gpr);
                    let format = info.register_format();
                    (self.boxed_from_word(raw, format)?, format.boxed())
                }
                RegisterLocation::Fpr(fpr) => {
                    let double = self.asm.fpr(fpr);
                    (R::box_double(&mut self.asm, double), DataFormat::JsDouble)
                }
                RegisterLocation::None if info.is_spilled() => {
                    let word = self.asm.load_slot(self.layout.vreg_slot(vreg));
                    let format = info.spill_format();
                    (self.boxed_from_word(word, format)?, format.boxed())
                }
                _ => return Err(JitError::DeadValue { node }),
            }
        };

        self.release_bank(vreg);
        let regs = self.allocate_js_regs()?;
        R::regs_set(&mut self.asm, regs, boxed);
        self.infos[vreg.index()].fill_js(regs, format);
        self.retain_bank(vreg);
        Ok(regs)
    }

    /// Boxed operand, after the edge's speculation.
    pub(super) fn boxed_value(&mut self, edge: Edge) -> Result<R::Boxed> {
        self.speculate(edge)?;
        let regs = self.fill_js_value(edge.node)?;
        Ok(R::regs_get(&mut self.asm, regs))
    }

    pub(super) fn boxed_word(&mut self, edge: Edge) -> Result<Value> {
        let boxed = self.boxed_value(edge)?;
        Ok(R::to_word(&mut self.asm, boxed))
    }

    // -- speculative fills ----------------------------------------------------

    fn dead_gpr(&mut self, kind: ExitKind) -> Result<Gpr> {
        self.terminate_speculative_execution(kind);
        let zero = self.asm.iconst(0);
        self.temporary_gpr(zero)
    }

    fn dead_fpr(&mut self, kind: ExitKind) -> Result<Fpr> {
        self.terminate_speculative_execution(kind);
        let zero = self.asm.f64const(0.0);
        self.temporary_fpr(zero)
    }

    /// Unboxed int32, sign-extended to `I64`.
    pub(super) fn fill_speculate_int32(&mut self, edge: Edge) -> Result<Gpr> {
        let use_kind = match edge.use_kind {
            UseKind::Untyped => UseKind::Int32,
            other => other,
        };
        let gpr = self.fill_speculate_gpr(edge.node, use_kind, DataFormat::Integer)?;
        self.state.filter(edge.node, SpeculatedType::INT32);
        Ok(gpr)
    }

    /// Unboxed boolean, 0 or 1 in an `I64`.
    pub(super) fn fill_speculate_boolean(&mut self, edge: Edge) -> Result<Gpr> {
        let gpr = self.fill_speculate_gpr(edge.node, UseKind::Boolean, DataFormat::Boolean)?;
        self.state.filter(edge.node, SpeculatedType::BOOLEAN);
        Ok(gpr)
    }

    /// Cell pointer; object and string uses also check the cell type.
    pub(super) fn fill_speculate_cell(&mut self, edge: Edge) -> Result<Gpr> {
        let use_kind = match edge.use_kind {
            kind if kind.is_cell() => kind,
            _ => UseKind::Cell,
        };
        let cell_kind = if use_kind.is_known() {
            UseKind::KnownCell
        } else {
            UseKind::Cell
        };
        let gpr = self.fill_speculate_gpr(edge.node, cell_kind, DataFormat::Cell)?;

        let proven = self.state.proven(edge.node);
        let failure = match check_decision(proven, use_kind) {
            CheckDecision::NotNeeded => None,
            CheckDecision::Contradiction => {
                self.terminate_speculative_execution(ExitKind::BadType);
                None
            }
            CheckDecision::Needed => {
                let pointer = self.asm.gpr(gpr);
                let ty = self.asm.load_u8(pointer, cell::TYPE);
                let string = CellType::String as i64;
                match use_kind {
                    UseKind::Object => Some(self.asm.branch_icmp_imm(IntCC::Equal, ty, string)),
                    UseKind::String => Some(self.asm.branch_icmp_imm(IntCC::NotEqual, ty, string)),
                    _ => None,
                }
            }
        };
        if let Some(jump) = failure {
            self.speculation_check(ExitKind::BadType, jump);
        }
        self.state.filter(edge.node, use_kind.type_filter());
        Ok(gpr)
    }

    fn fill_speculate_gpr(
        &mut self,
        node: NodeIndex,
        use_kind: UseKind,
        target: DataFormat,
    ) -> Result<Gpr> {
        let vreg = self.vreg_of(node)?;
        let info = self.infos[vreg.index()].clone();

        if let RegisterLocation::Gpr(gpr) = info.location()
            && info.register_format() == target
        {
            self.gprs.lock(gpr);
            return Ok(gpr);
        }

        if let Some(value) = info.constant_value() {
            let raw = match (target, value) {
                (DataFormat::Integer, JsValue::Int32(i)) => i64::from(i),
                (DataFormat::Cell, JsValue::Cell(pointer)) => pointer as i64,
                (DataFormat::Boolean, JsValue::Boolean(b)) => i64::from(b),
                _ => return self.dead_gpr(ExitKind::BadType),
            };
            let gpr = self.allocate_gpr()?;
            let constant = self.asm.iconst(raw);
            self.asm.set_gpr(gpr, constant);
            self.fill_info_gpr(vreg, gpr, target);
            return Ok(gpr);
        }

        let format = if info.in_register() {
            info.register_format()
        } else {
            info.spill_format()
        };
        if format == target {
            let gpr = self.allocate_gpr()?;
            let raw = self.asm.load_slot(self.layout.vreg_slot(vreg));
            self.asm.set_gpr(gpr, raw);
            self.fill_info_gpr(vreg, gpr, target);
            return Ok(gpr);
        }
        if format == DataFormat::None {
            return Err(JitError::DeadValue { node });
        }
        let boxed_target = target.boxed();
        if format != DataFormat::Js && format != boxed_target {
            return self.dead_gpr(ExitKind::BadType);
        }

        let decision = if format == boxed_target {
            CheckDecision::NotNeeded
        } else {
            check_decision(self.state.proven(node), use_kind)
        };
        if decision == CheckDecision::Contradiction {
            return self.dead_gpr(ExitKind::BadType);
        }

        let boxed = self.current_boxed(vreg);
        if decision == CheckDecision::Needed {
            let passes = match target {
                DataFormat::Integer => R::is_int32(&mut self.asm, boxed),
                DataFormat::Cell => R::is_cell(&mut self.asm, boxed),
                _ => R::is_boolean(&mut self.asm, boxed),
            };
            let jump = self.asm.branch_not(passes);
            self.speculation_check(ExitKind::BadType, jump);
        }
        let raw = match target {
            DataFormat::Integer => {
                let payload = R::unbox_int32(&mut self.asm, boxed);
                self.asm.builder.ins().sextend(types::I64, payload)
            }
            DataFormat::Cell => R::unbox_cell(&mut self.asm, boxed),
            _ => R::unbox_boolean(&mut self.asm, boxed),
        };

        let gpr = self.allocate_gpr()?;
        self.asm.set_gpr(gpr, raw);
        self.infos[vreg.index()].narrow_js_format(boxed_target);
        self.fill_info_gpr(vreg, gpr, target);
        Ok(gpr)
    }

    /// Unboxed double. Int32 sources are converted into a scratch register.
    pub(super) fn fill_speculate_double(&mut self, edge: Edge) -> Result<Fpr> {
        let node = edge.node;
        let use_kind = match edge.use_kind {
            UseKind::Untyped => UseKind::Number,
            other => other,
        };
        let real = use_kind == UseKind::RealNumber;
        let vreg = self.vreg_of(node)?;
        let info = self.infos[vreg.index()].clone();
        let proven = self.state.proven(node);
        let decision = check_decision(proven, use_kind);
        if decision == CheckDecision::Contradiction {
            return self.dead_fpr(ExitKind::BadType);
        }
        let filter = use_kind.type_filter();

        if let Some(fpr) = info.fpr() {
            self.fprs.lock(fpr);
            if real && decision == CheckDecision::Needed {
                let value = self.asm.fpr(fpr);
                self.nan_check(value);
            }
            self.state.filter(node, filter);
            return Ok(fpr);
        }

        if let Some(value) = info.constant_value() {
            let Some(number) = value.as_number() else {
                return self.dead_fpr(ExitKind::BadType);
            };
            if real && number.is_nan() {
                return self.dead_fpr(ExitKind::BadType);
            }
            let fpr = self.allocate_fpr()?;
            let constant = self.asm.f64const(number);
            self.asm.set_fpr(fpr, constant);
            self.release_bank(vreg);
            self.infos[vreg.index()].fill_fpr(fpr);
            self.retain_bank(vreg);
            return Ok(fpr);
        }

        let format = if info.in_register() {
            info.register_format()
        } else {
            info.spill_format()
        };
        let fpr = match format {
            DataFormat::Integer => {
                let raw = match info.gpr() {
                    Some(gpr) => self.asm.gpr(gpr),
                    None => self.asm.load_slot(self.layout.vreg_slot(vreg)),
                };
                let double = self.asm.builder.ins().fcvt_from_sint(types::F64, raw);
                self.temporary_fpr(double)?
            }
            DataFormat::Double => {
                let fp = self.asm.fp();
                let offset = FrameLayout::slot_offset(self.layout.vreg_slot(vreg));
                let double = self.asm.load_f64(fp, offset);
                if real && decision == CheckDecision::Needed {
                    self.nan_check(double);
                }
                let fpr = self.allocate_fpr()?;
                self.asm.set_fpr(fpr, double);
                self.infos[vreg.index()].fill_fpr(fpr);
                self.retain_bank(vreg);
                fpr
            }
            DataFormat::Js | DataFormat::JsInteger | DataFormat::JsDouble => {
                let boxed = self.current_boxed(vreg);
                let double = if format == DataFormat::JsInteger {
                    let payload = R::unbox_int32(&mut self.asm, boxed);
                    self.asm.builder.ins().fcvt_from_sint(types::F64, payload)
                } else {
                    if format == DataFormat::Js && decision == CheckDecision::Needed {
                        let is_number = R::is_number(&mut self.asm, boxed);
                        let jump = self.asm.branch_not(is_number);
                        self.speculation_check(ExitKind::BadType, jump);
                    }
                    let double = if format == DataFormat::JsDouble {
                        R::unbox_double(&mut self.asm, boxed)
                    } else {
                        R::number_to_double(&mut self.asm, boxed)
                    };
                    if real && decision == CheckDecision::Needed {
                        self.nan_check(double);
                    }
                    double
                };
                self.temporary_fpr(double)?
            }
            DataFormat::None => return Err(JitError::DeadValue { node }),
            _ => return self.dead_fpr(ExitKind::BadType),
        };
        self.state.filter(node, filter);
        Ok(fpr)
    }

    fn nan_check(&mut self, value: Value) {
        let jump = self.asm.branch_fcmp(FloatCC::Unordered, value, value);
        self.speculation_check(ExitKind::BadType, jump);
    }

    /// Butterfly pointer produced by `GetButterfly`.
    pub(super) fn fill_storage(&mut self, node: NodeIndex) -> Result<Gpr> {
        let vreg = self.vreg_of(node)?;
        let info = self.infos[vreg.index()].clone();
        if let RegisterLocation::Gpr(gpr) = info.location()
            && info.register_format() == DataFormat::Storage
        {
            self.gprs.lock(gpr);
            return Ok(gpr);
        }
        if !info.in_register() && info.spill_format() == DataFormat::Storage {
            let gpr = self.allocate_gpr()?;
            let raw = self.asm.load_slot(self.layout.vreg_slot(vreg));
            self.asm.set_gpr(gpr, raw);
            self.fill_info_gpr(vreg, gpr, DataFormat::Storage);
            return Ok(gpr);
        }
        Err(JitError::FormatConversion {
            node,
            current: info.register_format(),
            requested: DataFormat::Storage,
        })
    }

    /// Emit whatever check the edge's use kind requires, discarding the operand.
    pub(super) fn speculate(&mut self, edge: Edge) -> Result<()> {
        match edge.use_kind {
            UseKind::Untyped => {}
            UseKind::Int32 | UseKind::KnownInt32 => {
                self.fill_speculate_int32(edge)?;
            }
            UseKind::Number | UseKind::RealNumber | UseKind::KnownNumber => {
                self.fill_speculate_double(edge)?;
            }
            UseKind::Boolean => {
                self.fill_speculate_boolean(edge)?;
            }
            UseKind::Cell
            | UseKind::KnownCell
            | UseKind::Object
            | UseKind::String
            | UseKind::KnownString => {
                self.fill_speculate_cell(edge)?;
            }
            UseKind::ObjectOrOther => self.speculate_object_or_other(edge)?,
            UseKind::Other => self.speculate_other(edge)?,
        }
        Ok(())
    }

    fn speculate_object_or_other(&mut self, edge: Edge) -> Result<()> {
        match check_decision(self.state.proven(edge.node), edge.use_kind) {
            CheckDecision::NotNeeded => return Ok(()),
            CheckDecision::Contradiction => {
                self.terminate_speculative_execution(ExitKind::BadType);
                return Ok(());
            }
            CheckDecision::Needed => {}
        }
        let regs = self.fill_js_value(edge.node)?;
        let boxed = R::regs_get(&mut self.asm, regs);
        let mut failures = JumpList::new();

        let is_cell = R::is_cell(&mut self.asm, boxed);
        let cell_case = self.asm.branch(is_cell);
        let is_other = R::is_other(&mut self.asm, boxed);
        failures.push(self.asm.branch_not(is_other));
        let done = self.asm.jump();

        self.asm.link_here(cell_case);
        let pointer = R::unbox_cell(&mut self.asm, boxed);
        let ty = self.asm.load_u8(pointer, cell::TYPE);
        failures.push(
            self.asm
                .branch_icmp_imm(IntCC::Equal, ty, CellType::String as i64),
        );
        self.asm.link_here(done);

        self.speculation_check_list(ExitKind::BadType, failures);
        self.state.filter(edge.node, edge.use_kind.type_filter());
        Ok(())
    }

    fn speculate_other(&mut self, edge: Edge) -> Result<()> {
        match check_decision(self.state.proven(edge.node), edge.use_kind) {
            CheckDecision::NotNeeded => return Ok(()),
            CheckDecision::Contradiction => {
                self.terminate_speculative_execution(ExitKind::BadType);
                return Ok(());
            }
            CheckDecision::Needed => {}
        }
        let regs = self.fill_js_value(edge.node)?;
        let boxed = R::regs_get(&mut self.asm, regs);
        let is_other = R::is_other(&mut self.asm, boxed);
        let jump = self.asm.branch_not(is_other);
        self.speculation_check(ExitKind::BadType, jump);
        self.state.filter(edge.node, SpeculatedType::OTHER);
        Ok(())
    }

    // -- end of node ----------------------------------------------------------

    /// Consume one use of every operand and drop all locks.
    pub(super) fn finish_node(&mut self, node: &otter_dfg_graph::Node) {
        for edge in &node.children {
            let Some(vreg) = self.graph.node(edge.node).virtual_register else {
                continue;
            };
            if self.infos[vreg.index()].use_once() {
                self.release_bank(vreg);
                self.infos[vreg.index()].release_registers();
            }
        }
        if let Some(vreg) = node.virtual_register
            && node.has_result()
            && self.infos[vreg.index()].use_count() == 0
        {
            self.release_bank(vreg);
            self.infos[vreg.index()].release_registers();
        }
        self.gprs.unlock_all();
        self.fprs.unlock_all();
    }
}
