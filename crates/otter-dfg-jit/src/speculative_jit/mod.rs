//! Node-by-node speculative code generation
//!
//! [`SpeculativeJit`] walks the graph one block at a time and emits each
//! node's fast path inline:
//!
//! ```text
//!   entry ─► block 0 ─► block 1 ─► ... ─► block n
//!              │  │
//!              │  └─ slow path ──► helper call ──► continuation
//!              └──── OSR exit ───► stub: box recoveries, call OsrExit, return
//! ```
//!
//! Operands are materialised through the generation tracker
//! (`allocation.rs`), type checks go through the speculation gate
//! (`speculation.rs`), and each operation family has its own handler module.
//! Slow paths and exit stubs are queued while the fast path is emitted and
//! written out of line after the last block.

mod abstract_state;
mod allocation;
mod arithmetic;
mod call;
mod indexed;
mod property;
mod slow_path;
mod speculation;

use std::marker::PhantomData;

use cranelift_codegen::ir::{FuncRef, SigRef};
use otter_dfg_graph::{
    BlockIndex, Graph, Node, NodeIndex, NodeOp, Operand, VirtualRegister,
};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::assembler::{Jump, JumpList, Label, MacroAssembler};
use crate::call_link::{CallLinkInfo, CallSiteRecord, CallType};
use crate::config::JitConfig;
use crate::encoding::ValueRepresentation;
use crate::error::Result;
use crate::generation_info::{DataFormat, GenerationInfo};
use crate::inline_cache::{AccessKind, InlineCacheRecord, PropertyCacheEntry};
use crate::layout::FrameLayout;
use crate::osr_exit::{ExitKind, OsrExitRecord};
use crate::platform::{HostPlatform, Platform};
use crate::registers::{FprBank, GprBank};
use crate::runtime_helpers::HelperRefs;
use crate::watchpoint::{WatchedFact, WatchpointOracle};

use abstract_state::AbstractState;
use slow_path::SlowPathRecord;

/// Patchable sites of a graph, numbered before code generation so their
/// cells can be allocated up front.
#[derive(Debug, Default)]
pub(crate) struct SitePlan {
    /// Property access sites in graph order.
    pub caches: Vec<(NodeIndex, otter_dfg_graph::Identifier, AccessKind)>,
    /// Call sites in graph order, with their argument count including `this`.
    pub calls: Vec<(NodeIndex, CallType, u32)>,
    /// Outgoing slots needed past the frame: call frames and array literals.
    pub outgoing_slots: u32,
    cache_index: FxHashMap<NodeIndex, u32>,
    call_index: FxHashMap<NodeIndex, u32>,
}

impl SitePlan {
    pub fn scan(graph: &Graph) -> Self {
        let mut plan = Self::default();
        for block in graph.block_indices() {
            for &index in &graph.block(block).nodes {
                let node = graph.node(index);
                if !node.should_generate() {
                    continue;
                }
                let cache = match node.op {
                    NodeOp::GetById(id) => Some((id, AccessKind::Get)),
                    NodeOp::PutById(id) => Some((id, AccessKind::Put)),
                    NodeOp::PutByIdDirect(id) => Some((id, AccessKind::PutDirect)),
                    _ => None,
                };
                if let Some((id, kind)) = cache {
                    plan.cache_index.insert(index, plan.caches.len() as u32);
                    plan.caches.push((index, id, kind));
                }
                let call = match node.op {
                    NodeOp::Call => Some((CallType::Call, node.children.len() as u32 - 1)),
                    NodeOp::Construct => Some((CallType::Construct, node.children.len() as u32)),
                    _ => None,
                };
                if let Some((call_type, argument_count)) = call {
                    plan.call_index.insert(index, plan.calls.len() as u32);
                    plan.calls.push((index, call_type, argument_count));
                    // callee, argument count, then `this` and the arguments
                    plan.outgoing_slots = plan.outgoing_slots.max(2 + argument_count);
                }
                if let NodeOp::NewArray(_) = node.op {
                    plan.outgoing_slots = plan.outgoing_slots.max(node.children.len() as u32);
                }
            }
        }
        plan
    }

    pub fn cache_index(&self, node: NodeIndex) -> Option<u32> {
        self.cache_index.get(&node).copied()
    }

    pub fn call_index(&self, node: NodeIndex) -> Option<u32> {
        self.call_index.get(&node).copied()
    }
}

/// Runtime-visible memory a unit's code refers to.
pub(crate) struct UnitResources<'g> {
    pub unit_id: u64,
    pub plan: &'g SitePlan,
    pub cache_entries: &'g [PropertyCacheEntry],
    pub call_links: &'g [CallLinkInfo],
    /// Address of the unit's invalidation byte.
    pub invalidated: usize,
}

/// Everything code generation produces besides the instruction stream.
#[derive(Debug, Default)]
pub(crate) struct CodegenOutput {
    pub exits: Vec<OsrExitRecord>,
    pub inline_caches: Vec<InlineCacheRecord>,
    pub call_sites: Vec<CallSiteRecord>,
    pub watched: Vec<WatchedFact>,
    pub slow_paths: usize,
}

/// Code generator for one unit.
pub(crate) struct SpeculativeJit<'a, 'g, R: ValueRepresentation, P: Platform = HostPlatform> {
    asm: MacroAssembler<'a>,
    graph: &'g Graph,
    layout: FrameLayout,
    config: &'g JitConfig,
    oracle: &'g dyn WatchpointOracle,
    helpers: &'g HelperRefs,
    resources: UnitResources<'g>,

    infos: Vec<GenerationInfo>,
    gprs: GprBank,
    fprs: FprBank,
    state: AbstractState,

    current_node: NodeIndex,
    current_block: BlockIndex,
    index_in_block: u32,
    compile_okay: bool,

    block_heads: Vec<Label>,
    /// Virtual registers defined so far in the current block.
    block_vregs: Vec<VirtualRegister>,
    /// Frame variables whose value is only in a virtual register's slot.
    local_sources: Vec<(Operand, VirtualRegister)>,

    exits: Vec<OsrExitRecord>,
    exit_jumps: Vec<JumpList>,
    slow_paths: Vec<SlowPathRecord>,
    inline_caches: Vec<InlineCacheRecord>,
    call_sites: Vec<CallSiteRecord>,
    watched: Vec<WatchedFact>,
    stack_overflow: Option<(Jump, FuncRef)>,
    call_signature: Option<SigRef>,

    _encoding: PhantomData<(R, P)>,
}

impl<'a, 'g, R: ValueRepresentation, P: Platform> SpeculativeJit<'a, 'g, R, P> {
    pub fn new(
        mut asm: MacroAssembler<'a>,
        graph: &'g Graph,
        config: &'g JitConfig,
        oracle: &'g dyn WatchpointOracle,
        helpers: &'g HelperRefs,
        resources: UnitResources<'g>,
    ) -> Self {
        let block_heads = graph.blocks.iter().map(|_| asm.forward_label()).collect();
        Self {
            asm,
            graph,
            layout: FrameLayout::of(graph),
            config,
            oracle,
            helpers,
            resources,
            infos: vec![GenerationInfo::default(); graph.virtual_register_count as usize],
            gprs: GprBank::new(),
            fprs: FprBank::new(),
            state: AbstractState::new(graph),
            current_node: NodeIndex(0),
            current_block: BlockIndex(0),
            index_in_block: 0,
            compile_okay: true,
            block_heads,
            block_vregs: Vec::new(),
            local_sources: Vec::new(),
            exits: Vec::new(),
            exit_jumps: Vec::new(),
            slow_paths: Vec::new(),
            inline_caches: Vec::new(),
            call_sites: Vec::new(),
            watched: Vec::new(),
            stack_overflow: None,
            call_signature: None,
            _encoding: PhantomData,
        }
    }

    /// Emit the whole unit and finish the function.
    pub fn generate(mut self) -> Result<CodegenOutput> {
        self.emit_entry()?;
        for block in self.graph.block_indices() {
            self.compile_block(block)?;
        }
        self.emit_slow_paths()?;
        self.emit_exit_stubs()?;
        self.emit_stack_overflow();

        let slow_paths = self.slow_paths.len();
        let Self {
            asm,
            exits,
            inline_caches,
            call_sites,
            watched,
            ..
        } = self;
        asm.finalize(R::UNDEFINED);
        Ok(CodegenOutput {
            exits,
            inline_caches,
            call_sites,
            watched,
            slow_paths,
        })
    }

    fn compile_block(&mut self, block: BlockIndex) -> Result<()> {
        let graph = self.graph;
        self.asm.bind(self.block_heads[block.index()]);
        self.current_block = block;
        self.gprs.reset();
        self.fprs.reset();
        self.block_vregs.clear();
        self.local_sources.clear();
        self.state.begin_block();
        self.compile_okay = true;

        for (position, &index) in graph.block(block).nodes.iter().enumerate() {
            let node = graph.node(index);
            if !node.should_generate() {
                continue;
            }
            self.current_node = index;
            self.index_in_block = position as u32;
            trace!(node = index.0, op = node.op.name(), "emitting node");

            self.compile_node(node)?;
            self.finish_node(node);

            if !self.compile_okay {
                debug!(
                    block = block.0,
                    node = index.0,
                    "speculation always fails; rest of block is unreachable"
                );
                break;
            }
        }
        self.asm.terminate_unreachable();
        Ok(())
    }

    fn compile_node(&mut self, node: &'g Node) -> Result<()> {
        match &node.op {
            NodeOp::JsConstant(value) => self.compile_constant(node, *value),
            NodeOp::GetLocal(operand) => self.compile_get_local(*operand),
            NodeOp::SetLocal(operand) => self.compile_set_local(node, *operand),
            NodeOp::MovHint(operand) => self.compile_mov_hint(node, *operand),
            NodeOp::Phantom => self.compile_phantom(node),

            NodeOp::ValueToInt32 => self.compile_value_to_int32(node),
            NodeOp::UInt32ToNumber(mode) => self.compile_uint32_to_number(node, *mode),
            NodeOp::ArithAdd(mode) => self.compile_add_sub(node, *mode, false),
            NodeOp::ArithSub(mode) => self.compile_add_sub(node, *mode, true),
            NodeOp::ArithMul(mode) => self.compile_arith_mul(node, *mode),
            NodeOp::ArithDiv(mode) => self.compile_arith_div(node, *mode),
            NodeOp::ArithMod(mode) => self.compile_arith_mod(node, *mode),
            NodeOp::ArithNegate(mode) => self.compile_arith_negate(node, *mode),
            NodeOp::ArithAbs(mode) => self.compile_arith_abs(node, *mode),
            NodeOp::ArithMin => self.compile_min_max(node, false),
            NodeOp::ArithMax => self.compile_min_max(node, true),
            NodeOp::ArithSqrt => self.compile_arith_sqrt(node),
            NodeOp::ValueAdd => self.compile_value_add(node),
            NodeOp::BitAnd
            | NodeOp::BitOr
            | NodeOp::BitXor
            | NodeOp::BitLShift
            | NodeOp::BitRShift
            | NodeOp::BitURShift => self.compile_bit_op(node),
            NodeOp::CompareLess
            | NodeOp::CompareLessEq
            | NodeOp::CompareGreater
            | NodeOp::CompareGreaterEq
            | NodeOp::CompareEq
            | NodeOp::CompareStrictEq => self.compile_compare(node),
            NodeOp::LogicalNot => self.compile_logical_not(node),

            NodeOp::CheckStructure(set) => self.compile_check_structure(node, set),
            NodeOp::StructureTransitionWatchpoint(structure) => {
                self.compile_structure_transition_watchpoint(node, *structure)
            }
            NodeOp::CheckArray(mode) => self.compile_check_array(node, *mode),
            NodeOp::CheckFunction(expected) => self.compile_check_function(node, *expected),
            NodeOp::ForceOsrExit => {
                self.terminate_speculative_execution(ExitKind::InadequateCoverage);
                Ok(())
            }

            NodeOp::GetButterfly => self.compile_get_butterfly(node),
            NodeOp::GetByOffset { offset, .. } => self.compile_get_by_offset(node, *offset),
            NodeOp::PutByOffset { offset, .. } => self.compile_put_by_offset(node, *offset),
            NodeOp::GetById(identifier) => self.compile_get_by_id(node, *identifier),
            NodeOp::PutById(identifier) => {
                self.compile_put_by_id(node, *identifier, AccessKind::Put)
            }
            NodeOp::PutByIdDirect(identifier) => {
                self.compile_put_by_id(node, *identifier, AccessKind::PutDirect)
            }

            NodeOp::GetByVal(mode) => self.compile_get_by_val(node, *mode),
            NodeOp::PutByVal(mode) => self.compile_put_by_val(node, *mode),
            NodeOp::GetArrayLength(mode) => self.compile_get_array_length(node, *mode),
            NodeOp::StringCharCodeAt => self.compile_string_char_code_at(node),

            NodeOp::GetGlobalVar(index) => self.compile_get_global_var(*index),
            NodeOp::PutGlobalVar(index) => self.compile_put_global_var(node, *index),
            NodeOp::GlobalVarWatchpoint(index) => self.compile_global_var_watchpoint(*index),

            NodeOp::NewObject(structure) => self.compile_new_object(*structure),
            NodeOp::NewArray(array_type) => self.compile_new_array(node, *array_type),
            NodeOp::CreateThis => self.compile_create_this(),
            NodeOp::CreateArguments => self.compile_create_arguments(),
            NodeOp::Call => self.compile_call(node, CallType::Call),
            NodeOp::Construct => self.compile_call(node, CallType::Construct),

            NodeOp::Jump(target) => self.compile_jump(*target),
            NodeOp::Branch { taken, not_taken } => {
                self.compile_branch(node, *taken, *not_taken)
            }
            NodeOp::Return => self.compile_return(node),
        }
    }

    // -- frame entry ----------------------------------------------------------

    /// Stack check, `undefined` for missing parameters, then local initialisation.
    fn emit_entry(&mut self) -> Result<()> {
        use crate::layout::{ARGUMENT_COUNT_SLOT, SLOT_SIZE, context};
        use cranelift_codegen::ir::InstBuilder;
        use cranelift_codegen::ir::condcodes::IntCC;

        let throw = self
            .helpers
            .require(crate::runtime_helpers::HelperKind::ThrowStackOverflow, NodeIndex(0))?;
        let frame_size = (self.layout.register_count() + self.resources.plan.outgoing_slots)
            as i64
            * i64::from(SLOT_SIZE);
        let fp = self.asm.fp();
        let frame_end = self.asm.builder.ins().iadd_imm(fp, frame_size);
        let limit = self.asm.load_context(context::STACK_LIMIT);
        let overflow = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThan, frame_end, limit);
        self.stack_overflow = Some((overflow, throw));

        let undefined = self.asm.iconst(R::UNDEFINED as i64);
        if self.layout.parameter_count > 0 {
            let argument_count = self.asm.load_slot(ARGUMENT_COUNT_SLOT);
            for i in 1..=self.layout.parameter_count {
                let slot = self.layout.operand_slot(Operand::Argument(i));
                let passed = self.asm.load_slot(slot);
                let missing = self.asm.builder.ins().icmp_imm(
                    IntCC::UnsignedLessThanOrEqual,
                    argument_count,
                    i64::from(i),
                );
                let value = self.asm.builder.ins().select(missing, undefined, passed);
                self.asm.store_slot(value, slot);
            }
        }
        let first_local = self.layout.first_local_slot();
        for local in 0..self.layout.local_count {
            self.asm.store_slot(undefined, first_local + local);
        }
        Ok(())
    }

    fn emit_stack_overflow(&mut self) {
        if let Some((jump, throw)) = self.stack_overflow.take() {
            let label = self.asm.begin_out_of_line();
            self.asm.link(jump, label);
            let ctx = self.asm.ctx();
            self.asm.call(throw, &[ctx]);
            let undefined = self.asm.iconst(R::UNDEFINED as i64);
            self.asm.ret(undefined);
        }
    }

    // -- locals and control ---------------------------------------------------

    fn compile_constant(&mut self, node: &Node, value: otter_dfg_graph::JsValue) -> Result<()> {
        let vreg = self.result_vreg()?;
        self.infos[vreg.index()] = GenerationInfo::constant(self.current_node, node.ref_count, value);
        self.block_vregs.push(vreg);
        Ok(())
    }

    fn compile_get_local(&mut self, operand: Operand) -> Result<()> {
        self.flush_local_source(operand)?;
        let word = self.asm.load_slot(self.layout.operand_slot(operand));
        let format = self.js_format_for(self.current_node);
        self.js_word_result(word, format)
    }

    fn compile_set_local(&mut self, node: &Node, operand: Operand) -> Result<()> {
        let word = self.boxed_word(node.child1())?;
        self.asm.store_slot(word, self.layout.operand_slot(operand));
        self.local_sources.retain(|(op, _)| *op != operand);
        Ok(())
    }

    /// The frame variable now lives in the child's spill slot until flushed.
    fn compile_mov_hint(&mut self, node: &Node, operand: Operand) -> Result<()> {
        let vreg = self.vreg_of(node.child1().node)?;
        self.spill_in_place(vreg);
        self.local_sources.retain(|(op, _)| *op != operand);
        self.local_sources.push((operand, vreg));
        Ok(())
    }

    fn compile_phantom(&mut self, node: &Node) -> Result<()> {
        for edge in &node.children {
            self.speculate(*edge)?;
        }
        Ok(())
    }

    fn compile_jump(&mut self, target: BlockIndex) -> Result<()> {
        self.flush_local_sources()?;
        self.asm.jump_to(self.block_heads[target.index()]);
        Ok(())
    }

    fn compile_branch(&mut self, node: &Node, taken: BlockIndex, not_taken: BlockIndex) -> Result<()> {
        let condition = self.truthiness(node.child1())?;
        self.flush_local_sources()?;
        let jump = self.asm.branch(condition);
        self.asm.link(jump, self.block_heads[taken.index()]);
        self.asm.jump_to(self.block_heads[not_taken.index()]);
        Ok(())
    }

    fn compile_return(&mut self, node: &Node) -> Result<()> {
        let word = self.boxed_word(node.child1())?;
        self.asm.ret(word);
        Ok(())
    }

    /// Store every pending hinted value into its frame variable.
    fn flush_local_sources(&mut self) -> Result<()> {
        for (operand, vreg) in std::mem::take(&mut self.local_sources) {
            self.store_local_source(operand, vreg)?;
        }
        Ok(())
    }

    fn flush_local_source(&mut self, operand: Operand) -> Result<()> {
        if let Some(position) = self.local_sources.iter().position(|(op, _)| *op == operand) {
            let (operand, vreg) = self.local_sources.remove(position);
            self.store_local_source(operand, vreg)?;
        }
        Ok(())
    }

    fn store_local_source(&mut self, operand: Operand, vreg: VirtualRegister) -> Result<()> {
        let info = self.infos[vreg.index()].clone();
        let boxed = match info.constant_value() {
            Some(value) => self.constant_boxed(value),
            None => {
                let word = self.asm.load_slot(self.layout.vreg_slot(vreg));
                self.boxed_from_word(word, info.spill_format())?
            }
        };
        let word = R::to_word(&mut self.asm, boxed);
        self.asm.store_slot(word, self.layout.operand_slot(operand));
        Ok(())
    }

    /// Most specific boxed format the proven type allows.
    fn js_format_for(&self, node: NodeIndex) -> DataFormat {
        use otter_dfg_graph::SpeculatedType;
        let proven = self.state.proven(node);
        if proven.is_int32() {
            DataFormat::JsInteger
        } else if proven.is_cell() {
            DataFormat::JsCell
        } else if proven.is_boolean() {
            DataFormat::JsBoolean
        } else if !proven.is_empty() && proven.is_subset_of(SpeculatedType::DOUBLE) {
            DataFormat::JsDouble
        } else {
            DataFormat::Js
        }
    }
}
