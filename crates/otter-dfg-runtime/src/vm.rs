//! The VM: function registry, tiering and the compiled-code boundary
//!
//! Graph functions start in the baseline tier ([`crate::interpreter`]) and
//! are compiled once they have been called `hot_call_threshold` times. A
//! compiled unit runs on the same frame layout as the baseline tier, so an
//! OSR exit only has to hand the reconstructed frame back to the interpreter.
//!
//! Units are never freed: their code lives in the compiler's module and their
//! side tables are referenced by emitted code, so an invalidated or jettisoned
//! unit just stops being entered.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use otter_dfg_graph::{Graph, Identifier, JsValue, NodeIndex, NodeOp, Operand};
use otter_dfg_jit::layout::{
    ARGUMENT_COUNT_SLOT, CALLEE_SLOT, CellType, FrameLayout, GLOBAL_INVALIDATED,
    GLOBAL_UNWATCHED, GLOBAL_WATCHED, THIS_SLOT, function,
};
use otter_dfg_jit::{
    ActiveEncoding, CallLinkInfo, CallType, CompiledUnit, ExitKind, JitCompiler,
    OsrExitRecord, ValueRepresentation, WatchedFact,
};

use crate::config::VmConfig;
use crate::context::JitContext;
use crate::error::{VmError, VmResult};
use crate::frame::{RegisterFile, frame_extent};
use crate::heap::{self, Heap};
use crate::helpers::runtime_helpers;
use crate::structure::{Identifiers, StructureTable};
use crate::watchpoint::{Dependents, VmOracle, WatchpointSet};

/// Index of a function in the VM's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

/// Native function callable like a graph function: `(vm, this, arguments)`.
pub type HostFunction<R> = fn(&mut Vm<R>, JsValue, &[JsValue]) -> VmResult<JsValue>;

pub(crate) enum FunctionKind<R: ValueRepresentation> {
    Graph {
        graph: Arc<Graph>,
        /// Frame slots including the outgoing area.
        extent: u32,
        /// The graph allocates its own receiver when constructed.
        creates_this: bool,
    },
    Host(HostFunction<R>),
}

pub(crate) struct FunctionInfo<R: ValueRepresentation> {
    pub(crate) name: String,
    pub(crate) kind: FunctionKind<R>,
    pub(crate) cell: usize,
    pub(crate) unit: Option<Arc<CompiledUnit>>,
    pub(crate) calls: u32,
    pub(crate) baseline_only: bool,
    pub(crate) compile_failed: bool,
}

struct InstalledUnit {
    function: FunctionId,
    unit: Arc<CompiledUnit>,
    exit_count: u32,
}

/// Names the runtime looks up itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WellKnownNames {
    pub(crate) length: Identifier,
    pub(crate) prototype: Identifier,
}

/// Counters for tiering and inline-cache activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmStats {
    /// Units compiled and installed.
    pub compiles: u64,
    /// Graphs the compiler rejected.
    pub compile_failures: u64,
    /// Units dropped because a watched fact failed before installation.
    pub discarded_units: u64,
    /// Entries into compiled code from the runtime.
    pub compiled_calls: u64,
    /// Entries into the baseline tier.
    pub interpreted_calls: u64,
    /// OSR exits taken.
    pub osr_exits: u64,
    /// Units dropped after too many exits.
    pub jettisons: u64,
    /// Units invalidated by a fired watchpoint.
    pub invalidations: u64,
    /// Inline-cache entries repatched.
    pub ic_repatches: u64,
    /// Cache sites that gave up repatching.
    pub megamorphic_sites: u64,
    /// Call sites linked to a compiled callee.
    pub call_links: u64,
}

/// One OSR exit with the frame the baseline tier resumed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitRecord {
    /// Exiting unit.
    pub unit: u64,
    /// Function name.
    pub function: String,
    /// Index in the unit's exit table.
    pub exit_index: u32,
    /// Why the speculation failed.
    pub kind: ExitKind,
    /// Node the baseline tier re-executes.
    pub node: NodeIndex,
    /// `this` followed by the declared parameters.
    pub arguments: Vec<JsValue>,
    /// Locals after reconstruction.
    pub locals: Vec<JsValue>,
    /// Operands of the exiting node.
    pub operands: Vec<JsValue>,
}

/// A heap, an object model, a baseline tier and a speculative compiler.
pub struct Vm<R: ValueRepresentation = ActiveEncoding> {
    pub(crate) config: VmConfig,
    pub(crate) context: Box<JitContext>,
    pub(crate) heap: Heap,
    pub(crate) structures: StructureTable,
    pub(crate) identifiers: Identifiers,
    pub(crate) names: WellKnownNames,
    pub(crate) globals: Box<[Cell<u64>]>,
    pub(crate) global_states: Box<[u8]>,
    pub(crate) global_sets: Vec<WatchpointSet>,
    pub(crate) array_chain: WatchpointSet,
    pub(crate) single_character_strings: Box<[u64]>,
    pub(crate) sparse_maps: Vec<BTreeMap<u32, JsValue>>,
    pub(crate) functions: Vec<FunctionInfo<R>>,
    units: FxHashMap<u64, InstalledUnit>,
    compiler: Option<JitCompiler<R>>,
    pub(crate) register_file: RegisterFile,
    pub(crate) stack_top: usize,
    call_depth: u32,
    pub(crate) object_prototype: usize,
    pub(crate) array_prototype: usize,
    pub(crate) stats: VmStats,
    exit_log: Vec<ExitRecord>,
    pending_error: Option<VmError>,
    _encoding: PhantomData<R>,
}

impl<R: ValueRepresentation> Vm<R> {
    /// Create a VM with its heap, prototypes and (if enabled) compiler.
    pub fn new(config: VmConfig) -> VmResult<Self> {
        let heap = Heap::new(config.heap_size)?;
        let register_file = RegisterFile::new(config.register_file_slots);
        let global_count = config.global_count as usize;
        let compiler = if config.jit_enabled {
            match JitCompiler::<R>::new(&runtime_helpers::<R>(), config.jit.clone()) {
                Ok(compiler) => Some(compiler),
                Err(error) => {
                    warn!(%error, "JIT unavailable; running baseline tier only");
                    None
                }
            }
        } else {
            None
        };
        let mut identifiers = Identifiers::default();
        let names = WellKnownNames {
            length: identifiers.intern("length"),
            prototype: identifiers.intern("prototype"),
        };

        let mut vm = Self {
            config,
            context: Box::default(),
            heap,
            structures: StructureTable::new(),
            identifiers,
            names,
            globals: (0..global_count).map(|_| Cell::new(R::UNDEFINED)).collect(),
            global_states: vec![GLOBAL_UNWATCHED; global_count].into_boxed_slice(),
            global_sets: vec![WatchpointSet::default(); global_count],
            array_chain: WatchpointSet::default(),
            single_character_strings: Box::default(),
            sparse_maps: Vec::new(),
            functions: Vec::new(),
            units: FxHashMap::default(),
            compiler,
            register_file,
            stack_top: 0,
            call_depth: 0,
            object_prototype: 0,
            array_prototype: 0,
            stats: VmStats::default(),
            exit_log: Vec::new(),
            pending_error: None,
            _encoding: PhantomData,
        };

        vm.object_prototype = vm.new_object_cell(0)?;
        vm.array_prototype = vm.new_object_cell(vm.object_prototype)?;
        // Both sit on every array's chain before the first array exists.
        vm.mark_prototype(vm.object_prototype);
        vm.mark_prototype(vm.array_prototype);
        vm.single_character_strings = vm.build_single_character_strings()?;
        vm.sync_context();

        info!(
            encoding = R::NAME,
            heap = vm.heap.size(),
            slots = vm.register_file.len(),
            jit = vm.compiler.is_some(),
            "VM created"
        );
        Ok(vm)
    }

    /// Point the execution context at the VM's tables. Every table is boxed,
    /// so the addresses stay put when the VM moves.
    fn sync_context(&mut self) {
        let ctx = &mut self.context;
        ctx.heap_base = self.heap.base() as u64;
        ctx.card_table = self.heap.cards().base_address() as u64;
        ctx.card_count = self.heap.cards().len() as u64;
        ctx.stack_limit = self.register_file.end_address() as u64;
        ctx.single_character_strings = self.single_character_strings.as_ptr() as u64;
        ctx.globals = self.globals.as_ptr() as u64;
        ctx.global_watch_states = self.global_states.as_ptr() as u64;
    }

    /// Context pointer for compiled code, with the back pointer refreshed.
    fn context_ptr(&mut self) -> *mut u8 {
        let vm = self as *mut Self as u64;
        self.context.vm = vm;
        self.context.as_mut_ptr()
    }

    /// Configuration the VM was created with.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Name of the value encoding.
    pub fn encoding_name(&self) -> &'static str {
        R::NAME
    }

    /// Heap arena.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Structure table.
    pub fn structures(&self) -> &StructureTable {
        &self.structures
    }

    /// Tiering counters.
    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    /// Logged exits; empty unless `record_exits` is set.
    pub fn exit_log(&self) -> &[ExitRecord] {
        &self.exit_log
    }

    /// Drain the exit log.
    pub fn take_exit_log(&mut self) -> Vec<ExitRecord> {
        std::mem::take(&mut self.exit_log)
    }

    /// Whether a compiler is available.
    pub fn has_jit(&self) -> bool {
        self.compiler.is_some()
    }

    /// Id of a property name.
    pub fn identifier(&mut self, name: &str) -> Identifier {
        self.identifiers.intern(name)
    }

    /// The object prototype.
    pub fn object_prototype(&self) -> JsValue {
        JsValue::Cell(self.object_prototype)
    }

    /// The array prototype.
    pub fn array_prototype(&self) -> JsValue {
        JsValue::Cell(self.array_prototype)
    }

    #[inline]
    pub(crate) fn encode(&self, value: JsValue) -> u64 {
        R::encode(value, self.heap.base())
    }

    #[inline]
    pub(crate) fn decode(&self, bits: u64) -> JsValue {
        R::decode(bits, self.heap.base())
    }

    #[inline]
    pub(crate) fn slot_value(&self, slot: usize) -> JsValue {
        self.decode(self.register_file.get(slot))
    }

    #[inline]
    pub(crate) fn set_slot_value(&self, slot: usize, value: JsValue) {
        self.register_file.set(slot, self.encode(value));
    }

    // -- functions -------------------------------------------------------------

    /// Register a graph as a callable function.
    pub fn define_function(&mut self, graph: Graph) -> VmResult<JsValue> {
        graph.validate()?;
        let extent = frame_extent(&graph);
        let creates_this = graph
            .nodes
            .iter()
            .any(|node| matches!(node.op, NodeOp::CreateThis) && node.should_generate());
        let name = graph.name.clone();
        self.register_function(
            name,
            FunctionKind::Graph {
                graph: Arc::new(graph),
                extent,
                creates_this,
            },
        )
    }

    /// Register a native function.
    pub fn define_host_function(
        &mut self,
        name: &str,
        host: HostFunction<R>,
    ) -> VmResult<JsValue> {
        self.register_function(name.to_string(), FunctionKind::Host(host))
    }

    fn register_function(&mut self, name: String, kind: FunctionKind<R>) -> VmResult<JsValue> {
        let id = FunctionId(self.functions.len() as u32);
        let cell = self.new_function_cell(id)?;
        debug!(function = id.0, name = %name, "function defined");
        self.functions.push(FunctionInfo {
            name,
            kind,
            cell,
            unit: None,
            calls: 0,
            baseline_only: false,
            compile_failed: false,
        });
        let prototype = self.new_object_cell(self.object_prototype)?;
        self.put_property_direct(cell, self.names.prototype, JsValue::Cell(prototype))?;
        Ok(JsValue::Cell(cell))
    }

    /// Registry id of a function value.
    pub fn function_id(&self, value: JsValue) -> Option<FunctionId> {
        let cell = value.as_cell()?;
        if self.cell_type(cell) != Some(CellType::Function) {
            return None;
        }
        // SAFETY: function cells are `function::SIZE` bytes.
        let id = unsafe { heap::read_u64(cell, function::FUNCTION_ID) };
        ((id as usize) < self.functions.len()).then_some(FunctionId(id as u32))
    }

    fn function(&self, value: JsValue) -> VmResult<FunctionId> {
        self.function_id(value)
            .ok_or_else(|| VmError::type_error(format!("{} is not a function", self.type_name(value))))
    }

    /// Installed unit of a function.
    pub fn compiled_unit(&self, function: JsValue) -> Option<Arc<CompiledUnit>> {
        let id = self.function_id(function)?;
        self.functions[id.0 as usize].unit.clone()
    }

    /// Whether the function was jettisoned back to the baseline tier for good.
    pub fn is_baseline_only(&self, function: JsValue) -> bool {
        self.function_id(function)
            .is_some_and(|id| self.functions[id.0 as usize].baseline_only)
    }

    /// Compile a function now, regardless of its call count.
    ///
    /// Returns the installed unit, or `None` when the compiler declined the
    /// graph or the function may not be compiled.
    pub fn compile(&mut self, function: JsValue) -> VmResult<Option<Arc<CompiledUnit>>> {
        let id = self.function(function)?;
        let info = &self.functions[id.0 as usize];
        if !matches!(info.kind, FunctionKind::Graph { .. }) {
            return Err(VmError::type_error(format!("{} has no graph", info.name)));
        }
        if let Some(unit) = &info.unit {
            return Ok(Some(Arc::clone(unit)));
        }
        if info.baseline_only {
            return Ok(None);
        }
        Ok(self.compile_function(id))
    }

    /// Unit to run for a call, compiling the function once it is hot.
    fn tier_up(&mut self, id: FunctionId) -> Option<Arc<CompiledUnit>> {
        let info = &self.functions[id.0 as usize];
        if let Some(unit) = &info.unit {
            return Some(Arc::clone(unit));
        }
        if self.compiler.is_none()
            || info.baseline_only
            || info.compile_failed
            || info.calls <= self.config.hot_call_threshold
        {
            return None;
        }
        self.compile_function(id)
    }

    fn compile_function(&mut self, id: FunctionId) -> Option<Arc<CompiledUnit>> {
        let FunctionKind::Graph { graph, .. } = &self.functions[id.0 as usize].kind else {
            return None;
        };
        let graph = Arc::clone(graph);
        let compiler = self.compiler.as_mut()?;
        let oracle = VmOracle {
            structures: &self.structures,
            global_states: &self.global_states,
            array_chain_sane: self.array_chain.is_valid(),
        };
        match compiler.compile(&graph, &oracle) {
            Ok(unit) => self.install(id, unit),
            Err(error) => {
                self.stats.compile_failures += 1;
                self.functions[id.0 as usize].compile_failed = true;
                warn!(function = %graph.name, %error, "compilation failed; staying in baseline tier");
                None
            }
        }
    }

    fn install(&mut self, id: FunctionId, unit: CompiledUnit) -> Option<Arc<CompiledUnit>> {
        if !unit.watched().iter().all(|fact| self.fact_holds(*fact)) {
            self.stats.discarded_units += 1;
            debug!(unit = unit.id(), name = unit.name(), "watched fact failed during compilation; unit discarded");
            return None;
        }
        let unit = Arc::new(unit);
        let unit_id = unit.id();
        for fact in unit.watched() {
            match *fact {
                WatchedFact::StructureTransition(structure) => {
                    if let Some(structure) = self.structures.get_mut(structure) {
                        structure.transition_set_mut().add(unit_id);
                    }
                }
                WatchedFact::GlobalVar(index) => {
                    let index = index as usize;
                    self.global_sets[index].add(unit_id);
                    self.global_states[index] = GLOBAL_WATCHED;
                }
                WatchedFact::SaneArrayChain => self.array_chain.add(unit_id),
            }
        }

        let info = &mut self.functions[id.0 as usize];
        let creates_this = matches!(info.kind, FunctionKind::Graph { creates_this: true, .. });
        info.unit = Some(Arc::clone(&unit));
        let cell = info.cell;
        let code = unit.code_address() as u64;
        // SAFETY: function cells are `function::SIZE` bytes.
        unsafe {
            heap::write_u64(cell, function::CALL_ENTRY, code);
            heap::write_u64(cell, function::CONSTRUCT_ENTRY, if creates_this { code } else { 0 });
        }
        self.units.insert(
            unit_id,
            InstalledUnit {
                function: id,
                unit: Arc::clone(&unit),
                exit_count: 0,
            },
        );
        self.stats.compiles += 1;
        info!(
            unit = unit_id,
            name = unit.name(),
            exits = unit.exits().len(),
            caches = unit.inline_caches().len(),
            watched = unit.watched().len(),
            "unit installed"
        );
        Some(unit)
    }

    fn fact_holds(&self, fact: WatchedFact) -> bool {
        match fact {
            WatchedFact::StructureTransition(structure) => self
                .structures
                .get(structure)
                .is_some_and(|s| s.transition_set().is_valid()),
            WatchedFact::GlobalVar(index) => self
                .global_states
                .get(index as usize)
                .is_some_and(|state| *state != GLOBAL_INVALIDATED),
            WatchedFact::SaneArrayChain => self.array_chain.is_valid(),
        }
    }

    /// Stop entering `unit`: detach it from its function and unlink every
    /// call site that jumps straight to it.
    fn detach(&mut self, id: FunctionId, unit: &Arc<CompiledUnit>) {
        let info = &mut self.functions[id.0 as usize];
        if info.unit.as_ref().is_some_and(|current| Arc::ptr_eq(current, unit)) {
            info.unit = None;
            let cell = info.cell;
            // SAFETY: function cells are `function::SIZE` bytes.
            unsafe {
                heap::write_u64(cell, function::CALL_ENTRY, 0);
                heap::write_u64(cell, function::CONSTRUCT_ENTRY, 0);
            }
        }
        let code = unit.code_address();
        for installed in self.units.values() {
            for index in 0..installed.unit.call_sites().len() as u32 {
                if let Some(link) = installed.unit.call_link(index).filter(|l| l.targets(code)) {
                    link.unlink();
                }
            }
        }
    }

    /// Invalidate the units that relied on a fired watchpoint set.
    pub(crate) fn invalidate_units(&mut self, dependents: Dependents) {
        for unit_id in dependents {
            let Some(installed) = self.units.get(&unit_id) else {
                continue;
            };
            let (function, unit) = (installed.function, Arc::clone(&installed.unit));
            if unit.is_invalidated() {
                continue;
            }
            unit.invalidate();
            self.detach(function, &unit);
            self.stats.invalidations += 1;
        }
    }

    /// Fire the watchpoint of a global that is being written.
    pub(crate) fn notify_global_write(&mut self, index: u32) {
        let index = index as usize;
        if self.global_states.get(index) != Some(&GLOBAL_WATCHED) {
            return;
        }
        self.global_states[index] = GLOBAL_INVALIDATED;
        let fired = self.global_sets[index].fire();
        debug!(global = index, units = fired.len(), "global watchpoint fired");
        self.invalidate_units(fired);
    }

    /// Fire the set guarding prototype chains free of indexed properties.
    pub(crate) fn break_array_chain(&mut self) {
        let fired = self.array_chain.fire();
        if !fired.is_empty() {
            debug!(units = fired.len(), "array chain watchpoint fired");
        }
        self.invalidate_units(fired);
    }

    // -- globals ---------------------------------------------------------------

    /// Value of a global variable.
    pub fn global(&self, index: u32) -> Option<JsValue> {
        self.globals
            .get(index as usize)
            .map(|slot| self.decode(slot.get()))
    }

    /// Write a global variable, firing its watchpoint.
    pub fn set_global(&mut self, index: u32, value: JsValue) -> VmResult<()> {
        let bits = self.encode(value);
        let slot = self
            .globals
            .get(index as usize)
            .ok_or_else(|| VmError::range_error(format!("global {index} out of range")))?;
        slot.set(bits);
        self.notify_global_write(index);
        Ok(())
    }

    // -- calls -----------------------------------------------------------------

    /// Call `callee` with `this` and `args`.
    pub fn call(&mut self, callee: JsValue, this: JsValue, args: &[JsValue]) -> VmResult<JsValue> {
        let fp = self.push_frame(callee, this, args)?;
        self.call_frame(fp, CallType::Call)
    }

    /// Call `callee` as a constructor.
    pub fn construct(&mut self, callee: JsValue, args: &[JsValue]) -> VmResult<JsValue> {
        let fp = self.push_frame(callee, JsValue::Empty, args)?;
        let result = self.call_frame(fp, CallType::Construct)?;
        Ok(self.construct_result(fp, result))
    }

    fn push_frame(&mut self, callee: JsValue, this: JsValue, args: &[JsValue]) -> VmResult<usize> {
        let fp = self.stack_top;
        if fp + THIS_SLOT as usize + 1 + args.len() > self.register_file.len() {
            return Err(VmError::StackOverflow);
        }
        self.set_slot_value(fp + CALLEE_SLOT as usize, callee);
        self.register_file
            .set(fp + ARGUMENT_COUNT_SLOT as usize, args.len() as u64 + 1);
        self.set_slot_value(fp + THIS_SLOT as usize, this);
        for (i, arg) in args.iter().enumerate() {
            self.set_slot_value(fp + THIS_SLOT as usize + 1 + i, *arg);
        }
        Ok(fp)
    }

    /// Result of a construct: a returned object, else the receiver.
    pub(crate) fn construct_result(&self, fp: usize, result: JsValue) -> JsValue {
        if self.is_object(result) {
            result
        } else {
            self.slot_value(fp + THIS_SLOT as usize)
        }
    }

    /// Run the frame at `fp`, whose header and arguments are already written.
    pub(crate) fn call_frame(&mut self, fp: usize, call_type: CallType) -> VmResult<JsValue> {
        let callee = self.slot_value(fp + CALLEE_SLOT as usize);
        let Some(id) = self.function_id(callee) else {
            let what = match call_type {
                CallType::Call => "function",
                CallType::Construct => "constructor",
            };
            return Err(VmError::type_error(format!(
                "{} is not a {what}",
                self.type_name(callee)
            )));
        };
        if self.call_depth >= self.config.max_call_depth {
            return Err(VmError::StackOverflow);
        }
        self.call_depth += 1;
        let saved_top = self.stack_top;
        let result = self.dispatch(id, callee, fp, call_type);
        self.stack_top = saved_top;
        self.call_depth -= 1;
        result
    }

    fn dispatch(
        &mut self,
        id: FunctionId,
        callee: JsValue,
        fp: usize,
        call_type: CallType,
    ) -> VmResult<JsValue> {
        let this_slot = fp + THIS_SLOT as usize;
        let info = &mut self.functions[id.0 as usize];
        info.calls = info.calls.saturating_add(1);
        match &info.kind {
            FunctionKind::Host(host) => {
                let host = *host;
                let argc = (self.register_file.get(fp + ARGUMENT_COUNT_SLOT as usize) as usize).max(1);
                if call_type == CallType::Construct {
                    let this = self.create_this(callee)?;
                    self.set_slot_value(this_slot, this);
                }
                let this = self.slot_value(this_slot);
                let args: Vec<JsValue> = (1..argc).map(|i| self.slot_value(this_slot + i)).collect();
                self.stack_top = this_slot + argc;
                host(self, this, &args)
            }
            FunctionKind::Graph {
                graph,
                extent,
                creates_this,
            } => {
                let (graph, extent, creates_this) = (Arc::clone(graph), *extent as usize, *creates_this);
                if fp + extent > self.register_file.len() {
                    return Err(VmError::StackOverflow);
                }
                if call_type == CallType::Construct && !creates_this {
                    let this = self.create_this(callee)?;
                    self.set_slot_value(this_slot, this);
                }
                self.stack_top = fp + extent;
                match self.tier_up(id) {
                    Some(unit) => self.run_compiled(&unit, fp),
                    None => {
                        self.stats.interpreted_calls += 1;
                        self.interpret(&graph, fp)
                    }
                }
            }
        }
    }

    fn run_compiled(&mut self, unit: &CompiledUnit, fp: usize) -> VmResult<JsValue> {
        self.stats.compiled_calls += 1;
        let ctx = self.context_ptr();
        let frame = self.register_file.address_of(fp);
        // SAFETY: the context and frame are live, the frame has room for the
        // unit's extent, and the unit's compiler is owned by this VM.
        let word = unsafe { unit.execute(ctx, frame) };
        if self.context.take_exception().is_some() {
            return Err(self
                .pending_error
                .take()
                .unwrap_or_else(|| VmError::internal("exception flagged without an error")));
        }
        Ok(self.decode(word))
    }

    /// Slow path of a call site in compiled code: run the callee and link the
    /// site to the callee's unit.
    pub(crate) fn link_and_call(&mut self, fp: usize, link: &CallLinkInfo) -> VmResult<JsValue> {
        let callee_word = self.register_file.get(fp + CALLEE_SLOT as usize);
        let result = self.call_frame(fp, link.call_type())?;
        if !self.config.jit.link_direct_calls {
            return Ok(result);
        }
        let Some(id) = self.function_id(self.decode(callee_word)) else {
            return Ok(result);
        };
        let info = &self.functions[id.0 as usize];
        let linkable = match link.call_type() {
            CallType::Call => true,
            CallType::Construct => matches!(info.kind, FunctionKind::Graph { creates_this: true, .. }),
        };
        if let Some(unit) = info.unit.as_ref().filter(|u| linkable && !u.is_invalidated()) {
            if link.linked() != Some((callee_word, unit.code_address())) {
                link.link(callee_word, unit.code_address());
                self.stats.call_links += 1;
                debug!(callee = %info.name, unit = unit.id(), "call site linked");
            }
        }
        Ok(result)
    }

    // -- exits and exceptions --------------------------------------------------

    /// Continue a compiled frame in the baseline tier after an OSR exit.
    pub(crate) fn handle_osr_exit(
        &mut self,
        frame_address: usize,
        unit_id: u64,
        exit_index: u32,
    ) -> VmResult<JsValue> {
        let fp = self
            .register_file
            .index_of(frame_address)
            .ok_or_else(|| VmError::internal("exit frame outside the register file"))?;
        let installed = self
            .units
            .get_mut(&unit_id)
            .ok_or_else(|| VmError::internal(format!("exit from unknown unit {unit_id}")))?;
        installed.exit_count += 1;
        let (id, unit, exit_count) = (installed.function, Arc::clone(&installed.unit), installed.exit_count);
        let record = unit
            .exit(exit_index)
            .cloned()
            .ok_or_else(|| VmError::internal(format!("unit {unit_id} has no exit {exit_index}")))?;
        let FunctionKind::Graph { graph, extent, .. } = &self.functions[id.0 as usize].kind else {
            return Err(VmError::internal("exit from a host function"));
        };
        let (graph, extent) = (Arc::clone(graph), *extent as usize);
        self.stats.osr_exits += 1;
        debug!(unit = unit_id, kind = %record.kind, node = record.node.0, count = exit_count, "osr exit");

        if self.config.record_exits {
            let entry = self.capture_exit(&graph, fp, &unit, &record);
            self.exit_log.push(entry);
        }
        if exit_count >= self.config.deopt_threshold
            && self.functions[id.0 as usize]
                .unit
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &unit))
        {
            self.functions[id.0 as usize].baseline_only = true;
            self.detach(id, &unit);
            self.stats.jettisons += 1;
            info!(unit = unit_id, name = unit.name(), exits = exit_count, "unit jettisoned");
        }

        self.stack_top = fp + extent;
        self.resume(&graph, fp, record.block, record.position as usize)
    }

    fn capture_exit(
        &self,
        graph: &Graph,
        fp: usize,
        unit: &CompiledUnit,
        record: &OsrExitRecord,
    ) -> ExitRecord {
        let layout = FrameLayout::of(graph);
        let operand = |operand| self.slot_value(fp + layout.operand_slot(operand) as usize);
        ExitRecord {
            unit: unit.id(),
            function: graph.name.clone(),
            exit_index: record.index,
            kind: record.kind,
            node: record.node,
            arguments: (0..=graph.parameter_count)
                .map(|i| operand(Operand::Argument(i)))
                .collect(),
            locals: (0..graph.local_count)
                .map(|i| operand(Operand::Local(i)))
                .collect(),
            operands: graph
                .node(record.node)
                .children
                .iter()
                .map(|edge| self.node_value(graph, &layout, fp, edge.node))
                .collect(),
        }
    }

    /// Raise `error` into compiled code; returns the word the helper hands back.
    pub(crate) fn throw(&mut self, error: VmError) -> u64 {
        debug!(%error, "exception raised into compiled code");
        let value = self
            .new_string(&error.to_string())
            .map_or(R::UNDEFINED, |message| self.encode(message));
        self.context.raise(value);
        self.pending_error = Some(error);
        R::UNDEFINED
    }

    /// Box a helper's result, raising its error instead.
    pub(crate) fn complete(&mut self, result: VmResult<JsValue>) -> u64 {
        match result {
            Ok(value) => self.encode(value),
            Err(error) => self.throw(error),
        }
    }
}

impl<R: ValueRepresentation> std::fmt::Debug for Vm<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("encoding", &R::NAME)
            .field("heap", &self.heap)
            .field("structures", &self.structures.len())
            .field("functions", &self.functions.len())
            .field("units", &self.units.len())
            .field("stats", &self.stats)
            .finish()
    }
}
