//! Runtime helper implementations for compiled code.
//!
//! These `extern "C"` functions are called from slow paths and exit stubs of
//! units produced by [`otter_dfg_jit::JitCompiler`]. Each one recovers the VM
//! from the execution context, does the generic operation and boxes the
//! result. Errors never unwind across the boundary: they are raised into the
//! context and the emitted code checks the pending flag after the call.
//!
//! # Safety
//!
//! Every helper receives the `JitContext` pointer handed to
//! [`otter_dfg_jit::CompiledUnit::execute`] by [`Vm`]. Its `vm` field points
//! at the VM that entered compiled code, which stays alive and is not touched
//! through any other path until the unit returns.

use otter_dfg_graph::{JsValue, StructureId};
use otter_dfg_jit::layout::IndexingShape;
use otter_dfg_jit::{CallLinkInfo, HelperKind, PropertyCacheEntry, RuntimeHelpers, ValueRepresentation};

use crate::context::JitContext;
use crate::error::{VmError, VmResult};
use crate::operations::{Relation, clamp_to_byte, to_int32};
use crate::vm::Vm;

/// VM behind a context pointer.
///
/// # Safety
///
/// `ctx` must be the context of a live `Vm<R>` currently running compiled code.
#[allow(unsafe_code)]
unsafe fn vm_from<'a, R: ValueRepresentation>(ctx: i64) -> &'a mut Vm<R> {
    unsafe { &mut *((*(ctx as *const JitContext)).vm as *mut Vm<R>) }
}

/// Register-file index of a frame address.
fn frame_index<R: ValueRepresentation>(vm: &Vm<R>, fp: i64) -> VmResult<usize> {
    vm.register_file
        .index_of(fp as usize)
        .ok_or_else(|| VmError::internal("frame pointer outside the register file"))
}

/// Structure of `value` if it is a live cell.
fn structure_before<R: ValueRepresentation>(vm: &Vm<R>, value: JsValue) -> Option<(usize, StructureId)> {
    let address = value.as_cell()?;
    vm.cell_type(address)?;
    Some((address, vm.structure_of(address)))
}

/// OsrExit: resume the exiting frame in the baseline tier.
///
/// Signature: `(ctx, fp, unit_id, exit_index) -> result`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_osr_exit<R: ValueRepresentation>(ctx: i64, fp: i64, unit: i64, exit: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let result = vm.handle_osr_exit(fp as usize, unit as u64, exit as u32);
    vm.complete(result) as i64
}

#[allow(unsafe_code)]
extern "C" fn otter_dfg_throw_stack_overflow<R: ValueRepresentation>(ctx: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    vm.throw(VmError::StackOverflow);
    0
}

/// GetById: generic named read, then repatch the site's cache entry.
///
/// Signature: `(ctx, base, entry_ptr) -> value`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_get_by_id<R: ValueRepresentation>(ctx: i64, base: i64, entry: i64) -> i64 {
    // SAFETY: see module docs; `entry` points into the running unit's cache table.
    let (vm, entry) = unsafe { (vm_from::<R>(ctx), &*(entry as *const PropertyCacheEntry)) };
    let base = vm.decode(base as u64);
    let before = structure_before(vm, base);
    let result = vm.get_property(base, entry.identifier());
    if let (Ok(_), Some((address, structure))) = (&result, before) {
        vm.update_cache(entry, address, structure);
    }
    vm.complete(result) as i64
}

/// PutById: assignment, then repatch the site's cache entry.
///
/// Signature: `(ctx, base, value, entry_ptr) -> 0`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_put_by_id<R: ValueRepresentation>(ctx: i64, base: i64, value: i64, entry: i64) -> i64 {
    // SAFETY: see `otter_dfg_get_by_id`.
    let (vm, entry) = unsafe { (vm_from::<R>(ctx), &*(entry as *const PropertyCacheEntry)) };
    let base = vm.decode(base as u64);
    let value = vm.decode(value as u64);
    let before = structure_before(vm, base);
    match vm.put_property(base, entry.identifier(), value) {
        Ok(()) => {
            if let Some((address, structure)) = before {
                vm.update_cache(entry, address, structure);
            }
            0
        }
        Err(error) => vm.throw(error) as i64,
    }
}

/// PutByIdDirect: own-property definition, then repatch.
///
/// Signature: `(ctx, base, value, entry_ptr) -> 0`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_put_by_id_direct<R: ValueRepresentation>(
    ctx: i64,
    base: i64,
    value: i64,
    entry: i64,
) -> i64 {
    // SAFETY: see `otter_dfg_get_by_id`.
    let (vm, entry) = unsafe { (vm_from::<R>(ctx), &*(entry as *const PropertyCacheEntry)) };
    let base = vm.decode(base as u64);
    let value = vm.decode(value as u64);
    let Some((address, structure)) = structure_before(vm, base).filter(|_| vm.is_object(base)) else {
        let error = VmError::type_error(format!("cannot define a property on {}", vm.type_name(base)));
        return vm.throw(error) as i64;
    };
    match vm.put_property_direct(address, entry.identifier(), value) {
        Ok(()) => {
            vm.update_cache(entry, address, structure);
            0
        }
        Err(error) => vm.throw(error) as i64,
    }
}

/// Signature: `(ctx, base, index) -> value`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_get_by_val<R: ValueRepresentation>(ctx: i64, base: i64, index: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let (base, index) = (vm.decode(base as u64), vm.decode(index as u64));
    let result = vm.get_by_value(base, index);
    vm.complete(result) as i64
}

/// Signature: `(ctx, base, index, value) -> 0`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_put_by_val<R: ValueRepresentation>(ctx: i64, base: i64, index: i64, value: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let (base, index, value) = (vm.decode(base as u64), vm.decode(index as u64), vm.decode(value as u64));
    match vm.put_by_value(base, index, value) {
        Ok(()) => 0,
        Err(error) => vm.throw(error) as i64,
    }
}

/// Append or hole write the fast path could not do in place.
///
/// Signature: `(ctx, base, index, value) -> 0`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_put_by_val_beyond_array_bounds<R: ValueRepresentation>(
    ctx: i64,
    base: i64,
    index: i64,
    value: i64,
) -> i64 {
    otter_dfg_put_by_val::<R>(ctx, base, index, value)
}

/// Generic `+`.
///
/// Signature: `(ctx, lhs, rhs) -> value`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_value_add<R: ValueRepresentation>(ctx: i64, lhs: i64, rhs: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let (lhs, rhs) = (vm.decode(lhs as u64), vm.decode(rhs as u64));
    let result = vm.add(lhs, rhs);
    vm.complete(result) as i64
}

#[allow(unsafe_code)]
fn compare<R: ValueRepresentation>(ctx: i64, lhs: i64, rhs: i64, relation: Relation) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let (lhs, rhs) = (vm.decode(lhs as u64), vm.decode(rhs as u64));
    vm.encode(JsValue::Boolean(vm.compare(relation, lhs, rhs))) as i64
}

extern "C" fn otter_dfg_compare_less<R: ValueRepresentation>(ctx: i64, lhs: i64, rhs: i64) -> i64 {
    compare::<R>(ctx, lhs, rhs, Relation::Less)
}

extern "C" fn otter_dfg_compare_less_eq<R: ValueRepresentation>(ctx: i64, lhs: i64, rhs: i64) -> i64 {
    compare::<R>(ctx, lhs, rhs, Relation::LessEq)
}

extern "C" fn otter_dfg_compare_greater<R: ValueRepresentation>(ctx: i64, lhs: i64, rhs: i64) -> i64 {
    compare::<R>(ctx, lhs, rhs, Relation::Greater)
}

extern "C" fn otter_dfg_compare_greater_eq<R: ValueRepresentation>(ctx: i64, lhs: i64, rhs: i64) -> i64 {
    compare::<R>(ctx, lhs, rhs, Relation::GreaterEq)
}

#[allow(unsafe_code)]
extern "C" fn otter_dfg_compare_eq<R: ValueRepresentation>(ctx: i64, lhs: i64, rhs: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let (lhs, rhs) = (vm.decode(lhs as u64), vm.decode(rhs as u64));
    vm.encode(JsValue::Boolean(vm.loose_equals(lhs, rhs))) as i64
}

#[allow(unsafe_code)]
extern "C" fn otter_dfg_compare_strict_eq<R: ValueRepresentation>(ctx: i64, lhs: i64, rhs: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let (lhs, rhs) = (vm.decode(lhs as u64), vm.decode(rhs as u64));
    vm.encode(JsValue::Boolean(vm.strict_equals(lhs, rhs))) as i64
}

/// Signature: `(ctx, value) -> raw int32`, sign-extended.
#[allow(unsafe_code)]
extern "C" fn otter_dfg_to_int32<R: ValueRepresentation>(ctx: i64, value: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let value = vm.decode(value as u64);
    i64::from(to_int32(vm.to_number(value)))
}

/// Signature: `(ctx, value) -> 0 or 1`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_to_boolean<R: ValueRepresentation>(ctx: i64, value: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let value = vm.decode(value as u64);
    i64::from(vm.to_boolean(value))
}

extern "C" fn otter_dfg_fmod(_ctx: i64, lhs: i64, rhs: i64) -> i64 {
    (f64::from_bits(lhs as u64) % f64::from_bits(rhs as u64)).to_bits() as i64
}

/// Truncating division; the divisor is never zero.
extern "C" fn otter_dfg_int32_divide(_ctx: i64, lhs: i64, rhs: i64) -> i64 {
    i64::from((lhs as i32).wrapping_div(rhs as i32))
}

/// Remainder with the dividend's sign; the divisor is never zero.
extern "C" fn otter_dfg_int32_modulo(_ctx: i64, lhs: i64, rhs: i64) -> i64 {
    i64::from((lhs as i32).wrapping_rem(rhs as i32))
}

extern "C" fn otter_dfg_clamp_double_to_byte(_ctx: i64, value: i64) -> i64 {
    i64::from(clamp_to_byte(f64::from_bits(value as u64)))
}

/// Signature: `(ctx, structure_id) -> object`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_new_object<R: ValueRepresentation>(ctx: i64, structure: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let result = vm
        .new_object_with_structure(StructureId(structure as u32))
        .map(JsValue::Cell);
    vm.complete(result) as i64
}

/// Signature: `(ctx, indexing_shape, values_ptr, count) -> array`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_new_array<R: ValueRepresentation>(
    ctx: i64,
    shape: i64,
    values: i64,
    count: i64,
) -> i64 {
    // SAFETY: see module docs; `values` points at `count` boxed words in the
    // caller's frame.
    let vm = unsafe { vm_from::<R>(ctx) };
    let words = unsafe { std::slice::from_raw_parts(values as *const u64, count as usize) };
    let elements: Vec<JsValue> = words.iter().map(|word| vm.decode(*word)).collect();
    let result = vm
        .new_array_with_shape(IndexingShape::from_byte(shape as u8), &elements)
        .map(JsValue::Cell);
    vm.complete(result) as i64
}

/// Signature: `(ctx, callee) -> object`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_create_this<R: ValueRepresentation>(ctx: i64, callee: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let callee = vm.decode(callee as u64);
    let result = vm.create_this(callee);
    vm.complete(result) as i64
}

/// Signature: `(ctx, fp) -> arguments object`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_create_arguments<R: ValueRepresentation>(ctx: i64, fp: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    let result = frame_index(vm, fp).and_then(|fp| vm.create_arguments(fp));
    vm.complete(result) as i64
}

/// Call through the runtime and link the site to the callee's unit.
///
/// Signature: `(ctx, callee_fp, link_info_ptr) -> result`
#[allow(unsafe_code)]
extern "C" fn otter_dfg_link_call<R: ValueRepresentation>(ctx: i64, fp: i64, link: i64) -> i64 {
    // SAFETY: see module docs; `link` points into the running unit's call
    // link table.
    let (vm, link) = unsafe { (vm_from::<R>(ctx), &*(link as *const CallLinkInfo)) };
    let result = frame_index(vm, fp).and_then(|fp| vm.link_and_call(fp, link));
    vm.complete(result) as i64
}

#[allow(unsafe_code)]
extern "C" fn otter_dfg_notify_global_write<R: ValueRepresentation>(ctx: i64, index: i64) -> i64 {
    // SAFETY: see module docs.
    let vm = unsafe { vm_from::<R>(ctx) };
    vm.notify_global_write(index as u32);
    0
}

/// Table of every helper, instantiated for encoding `R`.
#[allow(unsafe_code)]
pub fn runtime_helpers<R: ValueRepresentation>() -> RuntimeHelpers {
    let mut helpers = RuntimeHelpers::new();
    // SAFETY: each function has the `i64` signature its kind declares.
    unsafe {
        helpers.set(HelperKind::OsrExit, otter_dfg_osr_exit::<R> as *const () as *const u8);
        helpers.set(
            HelperKind::ThrowStackOverflow,
            otter_dfg_throw_stack_overflow::<R> as *const () as *const u8,
        );
        helpers.set(HelperKind::GetById, otter_dfg_get_by_id::<R> as *const () as *const u8);
        helpers.set(HelperKind::PutById, otter_dfg_put_by_id::<R> as *const () as *const u8);
        helpers.set(
            HelperKind::PutByIdDirect,
            otter_dfg_put_by_id_direct::<R> as *const () as *const u8,
        );
        helpers.set(HelperKind::GetByVal, otter_dfg_get_by_val::<R> as *const () as *const u8);
        helpers.set(HelperKind::PutByVal, otter_dfg_put_by_val::<R> as *const () as *const u8);
        helpers.set(
            HelperKind::PutByValBeyondArrayBounds,
            otter_dfg_put_by_val_beyond_array_bounds::<R> as *const () as *const u8,
        );
        helpers.set(HelperKind::ValueAdd, otter_dfg_value_add::<R> as *const () as *const u8);
        helpers.set(HelperKind::CompareLess, otter_dfg_compare_less::<R> as *const () as *const u8);
        helpers.set(
            HelperKind::CompareLessEq,
            otter_dfg_compare_less_eq::<R> as *const () as *const u8,
        );
        helpers.set(
            HelperKind::CompareGreater,
            otter_dfg_compare_greater::<R> as *const () as *const u8,
        );
        helpers.set(
            HelperKind::CompareGreaterEq,
            otter_dfg_compare_greater_eq::<R> as *const () as *const u8,
        );
        helpers.set(HelperKind::CompareEq, otter_dfg_compare_eq::<R> as *const () as *const u8);
        helpers.set(
            HelperKind::CompareStrictEq,
            otter_dfg_compare_strict_eq::<R> as *const () as *const u8,
        );
        helpers.set(HelperKind::ToInt32, otter_dfg_to_int32::<R> as *const () as *const u8);
        helpers.set(HelperKind::ToBoolean, otter_dfg_to_boolean::<R> as *const () as *const u8);
        helpers.set(HelperKind::FMod, otter_dfg_fmod as *const () as *const u8);
        helpers.set(HelperKind::Int32Divide, otter_dfg_int32_divide as *const () as *const u8);
        helpers.set(HelperKind::Int32Modulo, otter_dfg_int32_modulo as *const () as *const u8);
        helpers.set(
            HelperKind::ClampDoubleToByte,
            otter_dfg_clamp_double_to_byte as *const () as *const u8,
        );
        helpers.set(HelperKind::NewObject, otter_dfg_new_object::<R> as *const () as *const u8);
        helpers.set(HelperKind::NewArray, otter_dfg_new_array::<R> as *const () as *const u8);
        helpers.set(HelperKind::CreateThis, otter_dfg_create_this::<R> as *const () as *const u8);
        helpers.set(
            HelperKind::CreateArguments,
            otter_dfg_create_arguments::<R> as *const () as *const u8,
        );
        helpers.set(HelperKind::LinkCall, otter_dfg_link_call::<R> as *const () as *const u8);
        helpers.set(
            HelperKind::NotifyGlobalWrite,
            otter_dfg_notify_global_write::<R> as *const () as *const u8,
        );
    }
    helpers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_helpers_match_js_semantics() {
        assert_eq!(otter_dfg_int32_divide(0, -7, 2), -3);
        assert_eq!(otter_dfg_int32_modulo(0, -7, 2), -1);
        assert_eq!(otter_dfg_int32_divide(0, i32::MIN as i64, -1), i32::MIN as i64);
        assert_eq!(otter_dfg_int32_modulo(0, i32::MIN as i64, -1), 0);
        let rem = otter_dfg_fmod(0, 5.5f64.to_bits() as i64, 2.0f64.to_bits() as i64);
        assert_eq!(f64::from_bits(rem as u64), 1.5);
        assert_eq!(otter_dfg_clamp_double_to_byte(0, 254.5f64.to_bits() as i64), 254);
    }
}
