//! Unit compiler: Cranelift module ownership and side-table allocation

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

use cranelift_codegen::ir::UserFuncName;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module, default_libcall_names};
use otter_dfg_graph::Graph;
use tracing::{debug, info, trace};

use crate::assembler::MacroAssembler;
use crate::call_link::{CallLinkInfo, CallSiteRecord};
use crate::config::JitConfig;
use crate::encoding::{ActiveEncoding, ValueRepresentation};
use crate::error::{JitError, Result};
use crate::inline_cache::{InlineCacheRecord, PropertyCacheEntry};
use crate::osr_exit::OsrExitRecord;
use crate::platform::{HostPlatform, Platform};
use crate::runtime_helpers::{HelperFuncIds, HelperRefs, RuntimeHelpers};
use crate::speculative_jit::{SitePlan, SpeculativeJit, UnitResources};
use crate::watchpoint::{WatchedFact, WatchpointOracle};

/// Native entry of a compiled unit: `(ctx, fp) -> boxed result`.
pub type UnitEntry = unsafe extern "C" fn(*mut u8, *mut u64) -> u64;

/// A compiled graph and its side tables.
///
/// The code lives in the [`JitCompiler`]'s module; a unit must not be entered
/// after its compiler is dropped.
pub struct CompiledUnit {
    id: u64,
    name: String,
    code: *const u8,
    encoding: &'static str,
    exits: Vec<OsrExitRecord>,
    inline_caches: Vec<InlineCacheRecord>,
    call_sites: Vec<CallSiteRecord>,
    cache_entries: Box<[PropertyCacheEntry]>,
    call_links: Box<[CallLinkInfo]>,
    invalidated: Box<AtomicU8>,
    watched: Vec<WatchedFact>,
    slow_paths: usize,
}

// SAFETY: `code` points at finalized, immutable machine code; every mutable
// side table is made of atomics.
unsafe impl Send for CompiledUnit {}
unsafe impl Sync for CompiledUnit {}

impl std::fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("encoding", &self.encoding)
            .field("exits", &self.exits.len())
            .field("inline_caches", &self.inline_caches.len())
            .field("call_sites", &self.call_sites.len())
            .field("watched", &self.watched)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

impl CompiledUnit {
    /// Identifier passed to the exit helper.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the compiled function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value encoding the code was generated for.
    pub fn encoding(&self) -> &'static str {
        self.encoding
    }

    /// Address of the machine code; also the target stored in call link cells.
    pub fn code_address(&self) -> usize {
        self.code as usize
    }

    /// Typed entry point.
    pub fn entry(&self) -> UnitEntry {
        // SAFETY: the function was declared with `MacroAssembler::function_signature`.
        unsafe { std::mem::transmute::<*const u8, UnitEntry>(self.code) }
    }

    /// Run the unit on a prepared frame.
    ///
    /// # Safety
    ///
    /// `ctx` must point at a live execution context and `fp` at a frame laid
    /// out as the graph's [`FrameLayout`](crate::layout::FrameLayout), with
    /// room for the outgoing call frame. The compiler must still be alive.
    pub unsafe fn execute(&self, ctx: *mut u8, fp: *mut u64) -> u64 {
        // SAFETY: upheld by the caller.
        unsafe { (self.entry())(ctx, fp) }
    }

    /// Deoptimization-point table.
    pub fn exits(&self) -> &[OsrExitRecord] {
        &self.exits
    }

    /// One deoptimization point.
    pub fn exit(&self, index: u32) -> Option<&OsrExitRecord> {
        self.exits.get(index as usize)
    }

    /// Inline-cache table.
    pub fn inline_caches(&self) -> &[InlineCacheRecord] {
        &self.inline_caches
    }

    /// Patchable cache entry of one cache site.
    pub fn cache_entry(&self, index: u32) -> Option<&PropertyCacheEntry> {
        self.cache_entries.get(index as usize)
    }

    /// Call-site table.
    pub fn call_sites(&self) -> &[CallSiteRecord] {
        &self.call_sites
    }

    /// Patchable link cell of one call site.
    pub fn call_link(&self, index: u32) -> Option<&CallLinkInfo> {
        self.call_links.get(index as usize)
    }

    /// Facts the unit relies on.
    pub fn watched(&self) -> &[WatchedFact] {
        &self.watched
    }

    /// Number of out-of-line slow paths.
    pub fn slow_path_count(&self) -> usize {
        self.slow_paths
    }

    /// Make every watchpoint site of the unit exit.
    pub fn invalidate(&self) {
        if self.invalidated.swap(1, Ordering::AcqRel) == 0 {
            debug!(unit = self.id, name = %self.name, "unit invalidated");
        }
    }

    /// Whether a watched fact stopped holding.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire) != 0
    }
}

/// Speculative compiler for one value encoding and target platform.
pub struct JitCompiler<R: ValueRepresentation = ActiveEncoding, P: Platform = HostPlatform> {
    module: JITModule,
    function_builder_ctx: FunctionBuilderContext,
    context: cranelift_codegen::Context,
    helper_func_ids: HelperFuncIds,
    config: JitConfig,
    next_unit_id: u64,
    _encoding: PhantomData<(R, P)>,
}

impl<R: ValueRepresentation, P: Platform> JitCompiler<R, P> {
    /// Create a compiler whose code calls into `helpers`.
    pub fn new(helpers: &RuntimeHelpers, config: JitConfig) -> Result<Self> {
        let mut flags = settings::builder();
        for (name, value) in [("use_colocated_libcalls", "false"), ("is_pic", "false"), ("opt_level", "speed")] {
            flags
                .set(name, value)
                .map_err(|e| JitError::Builder(e.to_string()))?;
        }
        let isa = cranelift_native::builder()
            .map_err(|e| JitError::Builder(e.to_string()))?
            .finish(settings::Flags::new(flags))
            .map_err(|e| JitError::Builder(e.to_string()))?;
        let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
        helpers.register_symbols(&mut builder);
        let mut module = JITModule::new(builder);
        let helper_func_ids = HelperFuncIds::declare(helpers, &mut module)?;
        debug!(
            encoding = R::NAME,
            platform = P::NAME,
            "speculative compiler ready"
        );
        Ok(Self {
            module,
            function_builder_ctx: FunctionBuilderContext::new(),
            context: cranelift_codegen::Context::new(),
            helper_func_ids,
            config,
            next_unit_id: 0,
            _encoding: PhantomData,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Compile a graph into a unit.
    ///
    /// On error nothing is installed; the caller keeps running the graph in
    /// the tier it was already in.
    pub fn compile(&mut self, graph: &Graph, oracle: &dyn WatchpointOracle) -> Result<CompiledUnit> {
        graph.validate()?;
        let id = self.next_unit_id;
        self.next_unit_id = self.next_unit_id.saturating_add(1);

        let plan = SitePlan::scan(graph);
        let cache_entries: Box<[PropertyCacheEntry]> = plan
            .caches
            .iter()
            .map(|&(_, identifier, kind)| PropertyCacheEntry::new(identifier, kind))
            .collect();
        let call_links: Box<[CallLinkInfo]> = plan
            .calls
            .iter()
            .map(|&(_, call_type, argument_count)| CallLinkInfo::new(call_type, argument_count))
            .collect();
        let invalidated = Box::new(AtomicU8::new(0));

        let call_conv = self.module.isa().default_call_conv();
        let signature = MacroAssembler::function_signature(call_conv);
        let name = format!(
            "otter_dfg_{}_{}",
            graph.name.replace(|c: char| !c.is_ascii_alphanumeric(), "_"),
            id
        );
        let func_id = self
            .module
            .declare_function(&name, Linkage::Local, &signature)?;
        self.context.func = cranelift_codegen::ir::Function::with_name_signature(
            UserFuncName::user(0, func_id.as_u32()),
            signature,
        );
        let helper_refs =
            HelperRefs::declare(&self.helper_func_ids, &mut self.module, &mut self.context.func);

        let generated = {
            let builder =
                FunctionBuilder::new(&mut self.context.func, &mut self.function_builder_ctx);
            let asm = MacroAssembler::new(builder, call_conv);
            let resources = UnitResources {
                unit_id: id,
                plan: &plan,
                cache_entries: &cache_entries,
                call_links: &call_links,
                invalidated: invalidated.as_ptr() as usize,
            };
            SpeculativeJit::<R, P>::new(asm, graph, &self.config, oracle, &helper_refs, resources)
                .generate()
        };
        let output = match generated {
            Ok(output) => output,
            Err(error) => {
                debug!(unit = id, name = %graph.name, %error, "code generation failed");
                self.module.clear_context(&mut self.context);
                return Err(error);
            }
        };

        if self.config.dump_ir {
            trace!(unit = id, ir = %self.context.func.display(), "generated IR");
        }
        if let Err(error) = self.module.define_function(func_id, &mut self.context) {
            self.module.clear_context(&mut self.context);
            return Err(error.into());
        }
        self.module.clear_context(&mut self.context);
        self.module.finalize_definitions()?;
        let code = self.module.get_finalized_function(func_id);

        info!(
            unit = id,
            name = %graph.name,
            exits = output.exits.len(),
            caches = output.inline_caches.len(),
            calls = output.call_sites.len(),
            watchpoints = output.watched.len(),
            "compiled unit"
        );
        Ok(CompiledUnit {
            id,
            name: graph.name.clone(),
            code,
            encoding: R::NAME,
            exits: output.exits,
            inline_caches: output.inline_caches,
            call_sites: output.call_sites,
            cache_entries,
            call_links,
            invalidated,
            watched: output.watched,
            slow_paths: output.slow_paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use otter_dfg_graph::{ArithMode, Edge, GraphBuilder, Identifier, JsValue, NodeOp, Operand};

    use super::*;
    use crate::encoding::Unified;
    use crate::layout::context;
    use crate::osr_exit::ExitKind;
    use crate::runtime_helpers::HelperKind;
    use crate::watchpoint::NoWatchpoints;

    static LAST_EXIT: AtomicU32 = AtomicU32::new(u32::MAX);

    extern "C" fn throw_stack_overflow(_ctx: i64) -> i64 {
        0
    }

    extern "C" fn record_exit(_ctx: i64, _fp: i64, _unit: i64, index: i64) -> i64 {
        LAST_EXIT.store(index as u32, Ordering::SeqCst);
        Unified::UNDEFINED as i64
    }

    extern "C" fn get_by_id(_ctx: i64, _base: i64, _entry: i64) -> i64 {
        Unified::UNDEFINED as i64
    }

    fn helpers() -> RuntimeHelpers {
        let mut helpers = RuntimeHelpers::new();
        // SAFETY: each stub matches its helper's signature.
        unsafe {
            helpers.set(HelperKind::ThrowStackOverflow, throw_stack_overflow as *const () as *const u8);
            helpers.set(HelperKind::OsrExit, record_exit as *const () as *const u8);
            helpers.set(HelperKind::GetById, get_by_id as *const () as *const u8);
        }
        helpers
    }

    fn test_context() -> Vec<u64> {
        let mut ctx = vec![0u64; context::SIZE / 8];
        ctx[context::STACK_LIMIT as usize / 8] = u64::MAX;
        ctx
    }

    fn add_graph() -> Graph {
        let mut b = GraphBuilder::new("add").parameters(2);
        let x = b.get_local(Operand::Argument(1));
        let y = b.get_local(Operand::Argument(2));
        let sum = b.add(
            NodeOp::ArithAdd(ArithMode::CheckOverflow),
            &[Edge::int32(x), Edge::int32(y)],
        );
        b.ret(sum);
        b.build().expect("build should succeed")
    }

    fn run(unit: &CompiledUnit, args: &[JsValue]) -> JsValue {
        let mut ctx = test_context();
        let mut frame = vec![0u64; 64];
        frame[1] = args.len() as u64 + 1;
        frame[2] = Unified::UNDEFINED;
        for (i, arg) in args.iter().enumerate() {
            frame[3 + i] = Unified::encode(*arg, 0);
        }
        // SAFETY: the context and frame outlive the call and are large enough.
        let bits = unsafe { unit.execute(ctx.as_mut_ptr().cast(), frame.as_mut_ptr()) };
        Unified::decode(bits, 0)
    }

    #[test]
    fn int32_add_runs() {
        let mut compiler = JitCompiler::<Unified>::new(&helpers(), JitConfig::default())
            .expect("compiler creation should succeed");
        let unit = compiler
            .compile(&add_graph(), &NoWatchpoints)
            .expect("compile should succeed");
        assert_eq!(unit.encoding(), "unified");
        assert_eq!(run(&unit, &[JsValue::Int32(20), JsValue::Int32(22)]), JsValue::Int32(42));
    }

    #[test]
    fn overflow_takes_an_exit() {
        let mut compiler = JitCompiler::<Unified>::new(&helpers(), JitConfig::default())
            .expect("compiler creation should succeed");
        let unit = compiler
            .compile(&add_graph(), &NoWatchpoints)
            .expect("compile should succeed");
        let result = run(&unit, &[JsValue::Int32(i32::MAX), JsValue::Int32(1)]);
        assert_eq!(result, JsValue::Undefined);
        let index = LAST_EXIT.load(Ordering::SeqCst);
        let exit = unit.exit(index).expect("exit should be recorded");
        assert_eq!(exit.kind, ExitKind::Overflow);
    }

    #[test]
    fn missing_helper_aborts_the_unit() {
        let mut compiler = JitCompiler::<Unified>::new(&RuntimeHelpers::new(), JitConfig::default())
            .expect("compiler creation should succeed");
        let error = compiler
            .compile(&add_graph(), &NoWatchpoints)
            .expect_err("compile should fail");
        assert!(matches!(
            error,
            JitError::MissingHelper {
                helper: HelperKind::ThrowStackOverflow,
                ..
            }
        ));
    }

    #[test]
    fn cache_sites_get_entries() {
        let mut b = GraphBuilder::new("get").parameters(1);
        let o = b.get_local(Operand::Argument(1));
        let value = b.add(NodeOp::GetById(Identifier(4)), &[Edge::untyped(o)]);
        b.ret(value);
        let graph = b.build().expect("build should succeed");

        let mut compiler = JitCompiler::<Unified>::new(&helpers(), JitConfig::default())
            .expect("compiler creation should succeed");
        let unit = compiler
            .compile(&graph, &NoWatchpoints)
            .expect("compile should succeed");
        assert_eq!(unit.inline_caches().len(), 1);
        assert_eq!(unit.inline_caches()[0].identifier, Identifier(4));
        let entry = unit.cache_entry(0).expect("entry should exist");
        assert!(entry.cached().is_none());
        assert_eq!(unit.slow_path_count(), 1);

        // A non-cell base goes to the helper, which answers undefined.
        assert_eq!(run(&unit, &[JsValue::Int32(1)]), JsValue::Undefined);
    }

    #[test]
    fn invalidation_is_sticky() {
        let mut compiler = JitCompiler::<Unified>::new(&helpers(), JitConfig::default())
            .expect("compiler creation should succeed");
        let unit = compiler
            .compile(&add_graph(), &NoWatchpoints)
            .expect("compile should succeed");
        assert!(!unit.is_invalidated());
        unit.invalidate();
        unit.invalidate();
        assert!(unit.is_invalidated());
    }
}
