//! Speculation gate: exit recording, exit stubs, and the check nodes

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{InstBuilder, Value};
use otter_dfg_graph::{
    ArrayClass, ArrayMode, ArrayType, Edge, JsValue, Node, SpeculatedType, StructureId,
    StructureSet, UseKind, VirtualRegister,
};
use tracing::debug;

use super::SpeculativeJit;
use crate::assembler::{Jump, JumpList};
use crate::encoding::ValueRepresentation;
use crate::error::Result;
use crate::generation_info::{DataFormat, RegisterLocation};
use crate::layout::{CellType, IndexingShape, cell};
use crate::osr_exit::{ExitKind, OsrExitRecord, SlotRecovery, ValueRecovery};
use crate::platform::Platform;
use crate::registers::{Gpr, JsRegs};
use crate::runtime_helpers::HelperKind;
use crate::watchpoint::WatchedFact;

impl<R: ValueRepresentation, P: Platform> SpeculativeJit<'_, '_, R, P> {
    // -- exits ----------------------------------------------------------------

    /// Route `jump` to a new OSR exit of `kind` at the current node.
    pub(super) fn speculation_check(&mut self, kind: ExitKind, jump: Jump) {
        self.speculation_check_list(kind, JumpList::from(jump));
    }

    pub(super) fn speculation_check_list(&mut self, kind: ExitKind, jumps: JumpList) {
        if !self.compile_okay || jumps.is_empty() {
            // Code after a certain exit is never reached; its jumps trap.
            return;
        }
        let record = OsrExitRecord {
            index: self.exits.len() as u32,
            kind,
            node: self.current_node,
            block: self.current_block,
            position: self.index_in_block,
            recoveries: self.compute_recoveries(),
        };
        self.exits.push(record);
        self.exit_jumps.push(jumps);
    }

    /// Exit unconditionally and stop compiling the block.
    pub(super) fn terminate_speculative_execution(&mut self, kind: ExitKind) {
        if !self.compile_okay {
            return;
        }
        debug!(node = self.current_node.0, %kind, "speculation cannot succeed");
        let jump = self.asm.jump();
        self.speculation_check(kind, jump);
        self.compile_okay = false;
    }

    fn compute_recoveries(&self) -> Vec<SlotRecovery> {
        let mut recoveries = Vec::with_capacity(self.local_sources.len() + self.block_vregs.len());
        for &(operand, vreg) in &self.local_sources {
            let slot = self.layout.operand_slot(operand);
            recoveries.push(SlotRecovery {
                slot,
                recovery: self.recovery_of(vreg, slot),
            });
        }
        for &vreg in &self.block_vregs {
            if !self.infos[vreg.index()].is_alive() {
                continue;
            }
            let slot = self.layout.vreg_slot(vreg);
            recoveries.push(SlotRecovery {
                slot,
                recovery: self.recovery_of(vreg, slot),
            });
        }
        recoveries
    }

    /// Where a value can be found right now, for a frame slot that wants it boxed.
    fn recovery_of(&self, vreg: VirtualRegister, target_slot: u32) -> ValueRecovery {
        let info = &self.infos[vreg.index()];
        if let Some(value) = info.constant_value() {
            return ValueRecovery::Constant(value);
        }
        let own_slot = self.layout.vreg_slot(vreg);
        let spill_format = info.spill_format();
        if spill_format.is_js() {
            return if target_slot == own_slot {
                ValueRecovery::AlreadyInFrame
            } else {
                ValueRecovery::Displaced {
                    slot: own_slot,
                    format: spill_format,
                }
            };
        }
        match info.location() {
            RegisterLocation::Gpr(_) if info.register_format() == DataFormat::Storage => {
                ValueRecovery::Dead
            }
            RegisterLocation::Gpr(gpr) => ValueRecovery::InGpr {
                gpr,
                format: info.register_format(),
            },
            RegisterLocation::Pair { tag, payload } => ValueRecovery::InPair { tag, payload },
            RegisterLocation::Fpr(fpr) => ValueRecovery::InFpr(fpr),
            RegisterLocation::None => match spill_format {
                DataFormat::None | DataFormat::Storage => ValueRecovery::Dead,
                format => ValueRecovery::Displaced {
                    slot: own_slot,
                    format,
                },
            },
        }
    }

    fn recovered_word(&mut self, recovery: ValueRecovery) -> Result<Option<Value>> {
        let boxed = match recovery {
            ValueRecovery::Constant(value) => self.constant_boxed(value),
            ValueRecovery::InGpr { gpr, format } => {
                let raw = self.asm.gpr(gpr);
                self.boxed_from_word(raw, format)?
            }
            ValueRecovery::InPair { tag, payload } => {
                R::regs_get(&mut self.asm, JsRegs::pair(tag, payload))
            }
            ValueRecovery::InFpr(fpr) => {
                let double = self.asm.fpr(fpr);
                R::box_double(&mut self.asm, double)
            }
            ValueRecovery::Displaced { slot, format } => {
                let word = self.asm.load_slot(slot);
                self.boxed_from_word(word, format)?
            }
            ValueRecovery::AlreadyInFrame | ValueRecovery::Dead => return Ok(None),
        };
        Ok(Some(R::to_word(&mut self.asm, boxed)))
    }

    /// One out-of-line stub per exit: box every recovery into its slot, then
    /// hand the frame to the baseline tier.
    pub(super) fn emit_exit_stubs(&mut self) -> Result<()> {
        if self.exits.is_empty() {
            return Ok(());
        }
        let osr_exit = self.helpers.require(HelperKind::OsrExit, self.exits[0].node)?;
        let exits = std::mem::take(&mut self.exits);
        let jumps = std::mem::take(&mut self.exit_jumps);
        for (exit, jumps) in exits.iter().zip(jumps) {
            let label = self.asm.begin_out_of_line();
            jumps.link(&mut self.asm, label);

            let mut writes = Vec::with_capacity(exit.recoveries.len());
            for recovery in &exit.recoveries {
                if let Some(word) = self.recovered_word(recovery.recovery)? {
                    writes.push((recovery.slot, word));
                }
            }
            for (slot, word) in writes {
                self.asm.store_slot(word, slot);
            }

            let ctx = self.asm.ctx();
            let fp = self.asm.fp();
            let unit = self.asm.iconst(self.resources.unit_id as i64);
            let index = self.asm.iconst(i64::from(exit.index));
            let result = self.asm.call(osr_exit, &[ctx, fp, unit, index]);
            self.asm.ret(result);
        }
        self.exits = exits;
        Ok(())
    }

    // -- watchpoints ----------------------------------------------------------

    /// Depend on `fact`; the site exits once the unit has been invalidated.
    pub(super) fn watch(&mut self, fact: WatchedFact) {
        if !self.watched.contains(&fact) {
            debug!(?fact, "registering watchpoint");
            self.watched.push(fact);
        }
        let flag_address = self.asm.iconst(self.resources.invalidated as i64);
        let flag = self.asm.load_u8(flag_address, 0);
        let fired = self.asm.branch_icmp_imm(IntCC::NotEqual, flag, 0);
        self.speculation_check(ExitKind::WatchpointFired, fired);
    }

    // -- check nodes ----------------------------------------------------------

    pub(super) fn compile_check_structure(&mut self, node: &Node, set: &StructureSet) -> Result<()> {
        let base = node.child1();
        if let Some(proven) = self.state.structures(base.node)
            && !proven.is_empty()
            && proven.is_subset_of(set)
        {
            self.speculate(base)?;
            return Ok(());
        }
        if set.is_empty() {
            self.terminate_speculative_execution(ExitKind::BadCache);
            return Ok(());
        }
        let gpr = self.fill_speculate_cell(base)?;
        self.emit_structure_check(gpr, set);
        self.state.filter_structures(base.node, set);
        Ok(())
    }

    fn emit_structure_check(&mut self, cell_gpr: Gpr, set: &StructureSet) {
        let pointer = self.asm.gpr(cell_gpr);
        let actual = self.asm.load_u32(pointer, cell::STRUCTURE_ID);
        let mut matched = JumpList::new();
        let structures: Vec<StructureId> = set.iter().collect();
        let (last, rest) = match structures.split_last() {
            Some(split) => split,
            None => return,
        };
        for structure in rest {
            matched.push(
                self.asm
                    .branch_icmp_imm(IntCC::Equal, actual, i64::from(structure.0)),
            );
        }
        let mismatch = self
            .asm
            .branch_icmp_imm(IntCC::NotEqual, actual, i64::from(last.0));
        self.speculation_check(ExitKind::BadCache, mismatch);
        matched.link_here(&mut self.asm);
    }

    pub(super) fn compile_structure_transition_watchpoint(
        &mut self,
        node: &Node,
        structure: StructureId,
    ) -> Result<()> {
        let base = node.child1();
        let singleton = StructureSet::singleton(structure);
        if self.config.use_watchpoints && self.oracle.is_structure_watchable(structure) {
            self.fill_speculate_cell(base)?;
            self.watch(WatchedFact::StructureTransition(structure));
            self.state.filter_structures(base.node, &singleton);
            return Ok(());
        }
        debug!(structure = structure.0, "structure not watchable; checking instead");
        self.compile_check_structure(node, &singleton)
    }

    pub(super) fn compile_check_array(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        if mode.array_type == ArrayType::Generic {
            self.speculate(node.child1())?;
            return Ok(());
        }
        self.array_base(node.child1(), mode)?;
        Ok(())
    }

    /// Cell operand of an indexed access, with its storage shape checked once per block.
    pub(super) fn array_base(&mut self, edge: Edge, mode: ArrayMode) -> Result<Gpr> {
        let edge = Edge::new(
            edge.node,
            if edge.use_kind.is_cell() {
                edge.use_kind
            } else {
                UseKind::Cell
            },
        );
        let gpr = self.fill_speculate_cell(edge)?;
        if mode.array_type != ArrayType::Generic
            && !self.state.is_array_checked(edge.node, mode.array_type)
        {
            let pointer = self.asm.gpr(gpr);
            let failures = self.array_type_failures(pointer, mode);
            self.speculation_check_list(ExitKind::BadIndexingType, failures);
            self.state.mark_array_checked(edge.node, mode.array_type);
            let filter = match mode.array_type {
                ArrayType::String => SpeculatedType::STRING,
                ArrayType::Arguments => SpeculatedType::ARGUMENTS,
                ty if ty.is_typed_array() => SpeculatedType::TYPED_ARRAY,
                _ if mode.class == ArrayClass::Array => SpeculatedType::ARRAY,
                _ => SpeculatedType::OBJECT,
            };
            self.state.filter(edge.node, filter);
        }
        Ok(gpr)
    }

    /// Branches taken when the cell does not have the storage `mode` expects.
    fn array_type_failures(&mut self, pointer: Value, mode: ArrayMode) -> JumpList {
        let mut failures = JumpList::new();
        let array_type = mode.array_type;

        if let Some(shape) = IndexingShape::for_array_type(array_type) {
            let indexing = self.asm.load_u8(pointer, cell::INDEXING);
            if array_type == ArrayType::SlowPutArrayStorage {
                let below = self
                    .asm
                    .builder
                    .ins()
                    .iadd_imm(indexing, -(IndexingShape::ArrayStorage as i64));
                failures.push(self.asm.branch_icmp_imm(
                    IntCC::UnsignedGreaterThan,
                    below,
                    (IndexingShape::SlowPutArrayStorage as i64) - (IndexingShape::ArrayStorage as i64),
                ));
            } else {
                failures.push(
                    self.asm
                        .branch_icmp_imm(IntCC::NotEqual, indexing, shape as i64),
                );
            }
            let ty = self.asm.load_u8(pointer, cell::TYPE);
            match mode.class {
                ArrayClass::Array => failures.push(self.asm.branch_icmp_imm(
                    IntCC::NotEqual,
                    ty,
                    CellType::Array as i64,
                )),
                ArrayClass::NonArray => failures.push(self.asm.branch_icmp_imm(
                    IntCC::Equal,
                    ty,
                    CellType::Array as i64,
                )),
                ArrayClass::PossiblyArray => {}
            }
            return failures;
        }

        let expected = match array_type {
            ArrayType::String => Some(CellType::String),
            ArrayType::Arguments => Some(CellType::Arguments),
            ty => CellType::for_typed_array(ty),
        };
        if let Some(expected) = expected {
            let ty = self.asm.load_u8(pointer, cell::TYPE);
            failures.push(
                self.asm
                    .branch_icmp_imm(IntCC::NotEqual, ty, expected as i64),
            );
        }
        failures
    }

    pub(super) fn compile_check_function(&mut self, node: &Node, expected: JsValue) -> Result<()> {
        let callee = node.child1();
        let word = self.boxed_word(callee)?;
        let expected_boxed = self.constant_boxed(expected);
        let expected_word = R::to_word(&mut self.asm, expected_boxed);
        let mismatch = self.asm.branch_icmp(IntCC::NotEqual, word, expected_word);
        self.speculation_check(ExitKind::BadFunction, mismatch);
        self.state.filter(callee.node, SpeculatedType::FUNCTION);
        Ok(())
    }

    pub(super) fn compile_global_var_watchpoint(&mut self, index: u32) -> Result<()> {
        if self.config.use_watchpoints && self.oracle.is_global_watchable(index) {
            self.watch(WatchedFact::GlobalVar(index));
        } else {
            self.terminate_speculative_execution(ExitKind::WatchpointFired);
        }
        Ok(())
    }
}
