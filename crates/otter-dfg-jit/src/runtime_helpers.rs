//! Runtime helper ABI for slow paths.
//!
//! Slow paths call `extern "C"` helpers ("operations") implemented by the
//! runtime. The compiler only knows their stable signatures.
//!
//! # Architecture
//!
//! ```text
//! otter-dfg-jit (defines kinds + signatures)
//!       ↑
//! otter-dfg-runtime (implements helpers, fills RuntimeHelpers)
//! ```
//!
//! # ABI
//!
//! Every helper takes the execution context pointer first, then 64-bit
//! operands (boxed words unless noted), and returns one 64-bit word.
//! Helpers never unwind: a thrown exception is stored in the context and the
//! emitted code checks the pending flag after every helper that can throw.

use cranelift_codegen::ir::{self, AbiParam, types};
use cranelift_codegen::isa::CallConv;
use cranelift_jit::JITBuilder;
use cranelift_module::{FuncId, Linkage, Module};
use otter_dfg_graph::NodeIndex;

use crate::error::{JitError, Result};

// ---------------------------------------------------------------------------
// Helper kind enumeration
// ---------------------------------------------------------------------------

/// Identifies a runtime helper function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HelperKind {
    /// `(ctx, fp, unit_id, exit_index) -> result` - resume the baseline tier
    OsrExit = 0,
    /// `(ctx) -> 0`
    ThrowStackOverflow = 1,
    /// `(ctx, base, entry_ptr) -> value`
    GetById = 2,
    /// `(ctx, base, value, entry_ptr) -> 0`
    PutById = 3,
    /// `(ctx, base, value, entry_ptr) -> 0`
    PutByIdDirect = 4,
    /// `(ctx, base, index) -> value`
    GetByVal = 5,
    /// `(ctx, base, index, value) -> 0`
    PutByVal = 6,
    /// `(ctx, base, index, value) -> 0` - append past capacity
    PutByValBeyondArrayBounds = 7,
    /// `(ctx, lhs, rhs) -> value` - generic `+`
    ValueAdd = 8,
    /// `(ctx, lhs, rhs) -> boolean`
    CompareLess = 9,
    /// `(ctx, lhs, rhs) -> boolean`
    CompareLessEq = 10,
    /// `(ctx, lhs, rhs) -> boolean`
    CompareGreater = 11,
    /// `(ctx, lhs, rhs) -> boolean`
    CompareGreaterEq = 12,
    /// `(ctx, lhs, rhs) -> boolean`
    CompareEq = 13,
    /// `(ctx, lhs, rhs) -> boolean`
    CompareStrictEq = 14,
    /// `(ctx, value) -> raw int32`
    ToInt32 = 15,
    /// `(ctx, value) -> 0 or 1`
    ToBoolean = 16,
    /// `(ctx, raw f64, raw f64) -> raw f64`
    FMod = 17,
    /// `(ctx, raw int32, raw int32) -> raw int32`
    Int32Divide = 18,
    /// `(ctx, raw int32, raw int32) -> raw int32`
    Int32Modulo = 19,
    /// `(ctx, raw f64) -> 0..=255`
    ClampDoubleToByte = 20,
    /// `(ctx, structure_id) -> object`
    NewObject = 21,
    /// `(ctx, indexing_shape, values_ptr, count) -> array`
    NewArray = 22,
    /// `(ctx, callee) -> object`
    CreateThis = 23,
    /// `(ctx, fp) -> arguments object`
    CreateArguments = 24,
    /// `(ctx, callee_fp, link_info_ptr) -> result` - call and link
    LinkCall = 25,
    /// `(ctx, global_index) -> 0`
    NotifyGlobalWrite = 26,
}

/// Number of helper kinds.
pub const HELPER_COUNT: usize = 27;

impl HelperKind {
    /// Every helper kind, in discriminant order.
    pub const ALL: [HelperKind; HELPER_COUNT] = [
        Self::OsrExit,
        Self::ThrowStackOverflow,
        Self::GetById,
        Self::PutById,
        Self::PutByIdDirect,
        Self::GetByVal,
        Self::PutByVal,
        Self::PutByValBeyondArrayBounds,
        Self::ValueAdd,
        Self::CompareLess,
        Self::CompareLessEq,
        Self::CompareGreater,
        Self::CompareGreaterEq,
        Self::CompareEq,
        Self::CompareStrictEq,
        Self::ToInt32,
        Self::ToBoolean,
        Self::FMod,
        Self::Int32Divide,
        Self::Int32Modulo,
        Self::ClampDoubleToByte,
        Self::NewObject,
        Self::NewArray,
        Self::CreateThis,
        Self::CreateArguments,
        Self::LinkCall,
        Self::NotifyGlobalWrite,
    ];

    /// Symbol name used for Cranelift import resolution.
    pub fn symbol_name(self) -> &'static str {
        match self {
            Self::OsrExit => "otter_dfg_osr_exit",
            Self::ThrowStackOverflow => "otter_dfg_throw_stack_overflow",
            Self::GetById => "otter_dfg_get_by_id",
            Self::PutById => "otter_dfg_put_by_id",
            Self::PutByIdDirect => "otter_dfg_put_by_id_direct",
            Self::GetByVal => "otter_dfg_get_by_val",
            Self::PutByVal => "otter_dfg_put_by_val",
            Self::PutByValBeyondArrayBounds => "otter_dfg_put_by_val_beyond_array_bounds",
            Self::ValueAdd => "otter_dfg_value_add",
            Self::CompareLess => "otter_dfg_compare_less",
            Self::CompareLessEq => "otter_dfg_compare_less_eq",
            Self::CompareGreater => "otter_dfg_compare_greater",
            Self::CompareGreaterEq => "otter_dfg_compare_greater_eq",
            Self::CompareEq => "otter_dfg_compare_eq",
            Self::CompareStrictEq => "otter_dfg_compare_strict_eq",
            Self::ToInt32 => "otter_dfg_to_int32",
            Self::ToBoolean => "otter_dfg_to_boolean",
            Self::FMod => "otter_dfg_fmod",
            Self::Int32Divide => "otter_dfg_int32_divide",
            Self::Int32Modulo => "otter_dfg_int32_modulo",
            Self::ClampDoubleToByte => "otter_dfg_clamp_double_to_byte",
            Self::NewObject => "otter_dfg_new_object",
            Self::NewArray => "otter_dfg_new_array",
            Self::CreateThis => "otter_dfg_create_this",
            Self::CreateArguments => "otter_dfg_create_arguments",
            Self::LinkCall => "otter_dfg_link_call",
            Self::NotifyGlobalWrite => "otter_dfg_notify_global_write",
        }
    }

    /// Number of `i64` parameters, including the context.
    pub fn param_count(self) -> usize {
        match self {
            Self::ThrowStackOverflow => 1,
            Self::ToInt32
            | Self::ToBoolean
            | Self::ClampDoubleToByte
            | Self::NewObject
            | Self::CreateThis
            | Self::CreateArguments
            | Self::NotifyGlobalWrite => 2,
            Self::GetById
            | Self::GetByVal
            | Self::ValueAdd
            | Self::CompareLess
            | Self::CompareLessEq
            | Self::CompareGreater
            | Self::CompareGreaterEq
            | Self::CompareEq
            | Self::CompareStrictEq
            | Self::FMod
            | Self::Int32Divide
            | Self::Int32Modulo
            | Self::LinkCall => 3,
            Self::OsrExit
            | Self::PutById
            | Self::PutByIdDirect
            | Self::PutByVal
            | Self::PutByValBeyondArrayBounds
            | Self::NewArray => 4,
        }
    }

    /// Whether the helper may leave an exception pending.
    pub fn can_throw(self) -> bool {
        !matches!(
            self,
            Self::OsrExit
                | Self::FMod
                | Self::Int32Divide
                | Self::Int32Modulo
                | Self::ClampDoubleToByte
                | Self::ToBoolean
                | Self::CompareStrictEq
                | Self::NotifyGlobalWrite
        )
    }

    /// Build a Cranelift signature: `i64` params, one `i64` return.
    pub fn make_signature(self, call_conv: CallConv) -> ir::Signature {
        let mut sig = ir::Signature::new(call_conv);
        for _ in 0..self.param_count() {
            sig.params.push(AbiParam::new(types::I64));
        }
        sig.returns.push(AbiParam::new(types::I64));
        sig
    }
}

// ---------------------------------------------------------------------------
// RuntimeHelpers - function pointer table
// ---------------------------------------------------------------------------

/// Table of runtime helper function pointers, filled by the runtime.
///
/// A unit that needs a helper missing from the table fails to compile with
/// [`JitError::MissingHelper`].
#[derive(Clone)]
pub struct RuntimeHelpers {
    ptrs: [Option<*const u8>; HELPER_COUNT],
}

// SAFETY: the table only holds addresses of `extern "C"` functions.
unsafe impl Send for RuntimeHelpers {}
unsafe impl Sync for RuntimeHelpers {}

impl Default for RuntimeHelpers {
    fn default() -> Self {
        Self {
            ptrs: [None; HELPER_COUNT],
        }
    }
}

impl std::fmt::Debug for RuntimeHelpers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHelpers")
            .field("registered", &self.ptrs.iter().filter(|p| p.is_some()).count())
            .finish()
    }
}

impl RuntimeHelpers {
    /// Create an empty helper table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a helper function pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be an `extern "C"` function with the signature described by
    /// [`HelperKind::make_signature`] for `kind`.
    pub unsafe fn set(&mut self, kind: HelperKind, ptr: *const u8) {
        self.ptrs[kind as usize] = Some(ptr);
    }

    /// Get a helper function pointer.
    pub fn get(&self, kind: HelperKind) -> Option<*const u8> {
        self.ptrs[kind as usize]
    }

    /// Register every set helper as a symbol in a JIT builder.
    pub fn register_symbols(&self, builder: &mut JITBuilder) {
        for kind in HelperKind::ALL {
            if let Some(ptr) = self.ptrs[kind as usize] {
                builder.symbol(kind.symbol_name(), ptr);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HelperFuncIds - module-level function declarations
// ---------------------------------------------------------------------------

/// Module-level function IDs for declared helper imports.
pub(crate) struct HelperFuncIds {
    ids: [Option<FuncId>; HELPER_COUNT],
}

impl HelperFuncIds {
    /// Declare every available helper as an imported function.
    pub fn declare<M: Module>(helpers: &RuntimeHelpers, module: &mut M) -> Result<Self> {
        let call_conv = module.isa().default_call_conv();
        let mut ids = [None; HELPER_COUNT];
        for kind in HelperKind::ALL {
            if helpers.get(kind).is_some() {
                let sig = kind.make_signature(call_conv);
                ids[kind as usize] =
                    Some(module.declare_function(kind.symbol_name(), Linkage::Import, &sig)?);
            }
        }
        Ok(Self { ids })
    }
}

// ---------------------------------------------------------------------------
// HelperRefs - per-function FuncRefs for calling helpers from IR
// ---------------------------------------------------------------------------

/// Helper references declared into one function being compiled.
pub(crate) struct HelperRefs {
    refs: [Option<ir::FuncRef>; HELPER_COUNT],
}

impl HelperRefs {
    /// Declare every available helper into a function's IR.
    pub fn declare<M: Module>(
        func_ids: &HelperFuncIds,
        module: &mut M,
        func: &mut ir::Function,
    ) -> Self {
        let mut refs = [None; HELPER_COUNT];
        for (i, id) in func_ids.ids.iter().enumerate() {
            if let Some(func_id) = id {
                refs[i] = Some(module.declare_func_in_func(*func_id, func));
            }
        }
        Self { refs }
    }

    /// The FuncRef for a helper, or [`JitError::MissingHelper`].
    pub fn require(&self, kind: HelperKind, node: NodeIndex) -> Result<ir::FuncRef> {
        self.refs[kind as usize].ok_or(JitError::MissingHelper { node, helper: kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_dense() {
        for (i, kind) in HelperKind::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, i);
        }
    }

    #[test]
    fn symbol_names_are_unique() {
        let mut names: Vec<_> = HelperKind::ALL.iter().map(|k| k.symbol_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), HELPER_COUNT);
    }

    #[test]
    fn signatures_take_context_first() {
        let sig = HelperKind::PutByVal.make_signature(CallConv::SystemV);
        assert_eq!(sig.params.len(), 4);
        assert_eq!(sig.returns.len(), 1);
        assert!(HelperKind::GetById.can_throw());
        assert!(!HelperKind::OsrExit.can_throw());
    }
}
