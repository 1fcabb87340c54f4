//! By-value access against every storage shape

#[macro_use]
mod common;

use common::*;
use otter_dfg_graph::{ArrayMode, ArrayType, Edge, GraphBuilder, JsValue, NodeOp, Operand};
use otter_dfg_jit::{ExitKind, SlowPutHoleWrites, ValueRepresentation, WatchedFact};
use otter_dfg_runtime::{IndexingShape, Vm, VmConfig};

encoding_tests!(
    test_reads_past_the_capacity_exit_out_of_bounds,
    test_out_of_bounds_reads_take_the_slow_path,
    test_holes_exit_unless_the_chain_is_sane,
    test_double_storage_reads_and_holes,
    test_to_hole_puts_append_within_capacity,
    test_in_bounds_puts_exit_past_the_length,
    test_puts_that_do_not_fit_the_shape_exit,
    test_array_storage_reads_and_hole_fills,
    test_slow_put_hole_writes_follow_the_policy,
    test_typed_array_elements_convert_on_store,
    test_typed_array_bounds,
    test_string_characters,
    test_arguments_object,
);

fn ints<R: ValueRepresentation>(vm: &mut Vm<R>, values: &[i32]) -> JsValue {
    let values: Vec<JsValue> = values.iter().map(|v| JsValue::Int32(*v)).collect();
    vm.new_array(&values).expect("allocation should succeed")
}

fn get<R: ValueRepresentation>(vm: &mut Vm<R>, function: JsValue, base: JsValue, index: i32) -> JsValue {
    call(vm, function, &[base, JsValue::Int32(index)])
}

fn put<R: ValueRepresentation>(vm: &mut Vm<R>, function: JsValue, base: JsValue, index: i32, value: JsValue) {
    call(vm, function, &[base, JsValue::Int32(index), value]);
}

fn test_reads_past_the_capacity_exit_out_of_bounds<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let (read, _) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(ArrayType::Int32)));
    let array = ints(&mut vm, &[1, 2, 3]);

    assert_eq!(get(&mut vm, read, array, 0), JsValue::Int32(1));
    assert_eq!(get(&mut vm, read, array, 2), JsValue::Int32(3));
    assert!(vm.take_exit_log().is_empty());

    // Index 3 is past the length but inside the vector, so it reads a hole.
    assert_eq!(vm.array_length(array), Some(3));
    assert_eq!(get(&mut vm, read, array, 3), JsValue::Undefined);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::LoadFromHole]);
    for index in [1_000_000, -1] {
        assert_eq!(get(&mut vm, read, array, index), JsValue::Undefined);
        assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);
    }

    // With a sane chain the same hole reads undefined without leaving.
    let sane = ArrayMode::new(ArrayType::Int32).sane_chain();
    let (sane_read, _) = compiled(&mut vm, get_by_val_graph(sane));
    assert_eq!(get(&mut vm, sane_read, array, 3), JsValue::Undefined);
    assert!(vm.take_exit_log().is_empty());
    assert_eq!(get(&mut vm, sane_read, array, 4), JsValue::Undefined);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);

    // A contiguous array fails the storage check before any bounds check.
    let mixed = vm
        .new_array(&[JsValue::Int32(1), JsValue::Null])
        .expect("allocation should succeed");
    assert_eq!(get(&mut vm, read, mixed, 1), JsValue::Null);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::BadIndexingType]);
}

fn test_out_of_bounds_reads_take_the_slow_path<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let mode = ArrayMode::new(ArrayType::Int32).out_of_bounds();
    let (read, unit) = compiled(&mut vm, get_by_val_graph(mode));
    assert!(unit.slow_path_count() >= 1);
    let array = ints(&mut vm, &[1, 2, 3]);

    assert_eq!(get(&mut vm, read, array, 1), JsValue::Int32(2));
    assert_eq!(get(&mut vm, read, array, 3), JsValue::Undefined);
    assert_eq!(get(&mut vm, read, array, 1_000_000), JsValue::Undefined);
    assert!(vm.take_exit_log().is_empty());

    // Indices up the prototype chain are found by the slow path.
    let prototype = vm.array_prototype();
    let holey = vm
        .new_array(&[JsValue::Int32(1), JsValue::Empty, JsValue::Int32(3)])
        .expect("allocation should succeed");
    assert_eq!(get(&mut vm, read, holey, 1), JsValue::Undefined);
    vm.set_index(prototype, 1, JsValue::Int32(77)).expect("put should succeed");
    assert_eq!(get(&mut vm, read, holey, 1), JsValue::Int32(77));
    assert_eq!(vm.get_index(holey, 1).expect("get should succeed"), JsValue::Int32(77));
}

fn test_holes_exit_unless_the_chain_is_sane<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let (in_bounds, unit) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(ArrayType::Int32)));
    assert!(unit.watched().is_empty());
    let holey = vm
        .new_array(&[JsValue::Int32(1), JsValue::Empty, JsValue::Int32(3)])
        .expect("allocation should succeed");
    assert_eq!(vm.indexing_type(holey), Some(IndexingShape::Int32));

    assert_eq!(get(&mut vm, in_bounds, holey, 2), JsValue::Int32(3));
    assert_eq!(get(&mut vm, in_bounds, holey, 1), JsValue::Undefined);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::LoadFromHole]);

    let sane = ArrayMode::new(ArrayType::Int32).sane_chain();
    let (sane_read, unit) = compiled(&mut vm, get_by_val_graph(sane));
    assert!(unit.watched().contains(&WatchedFact::SaneArrayChain));
    assert_eq!(get(&mut vm, sane_read, holey, 1), JsValue::Undefined);
    assert_eq!(get(&mut vm, sane_read, holey, 0), JsValue::Int32(1));
    assert!(vm.take_exit_log().is_empty());

    // Without watchpoints the sane-chain mode is just in-bounds.
    let mut vm = jit_vm_with::<R>(VmConfig {
        jit: otter_dfg_jit::JitConfig {
            use_watchpoints: false,
            ..Default::default()
        },
        ..config()
    });
    let (sane_read, unit) = compiled(&mut vm, get_by_val_graph(sane));
    assert!(unit.watched().is_empty());
    let holey = vm
        .new_array(&[JsValue::Empty, JsValue::Int32(2)])
        .expect("allocation should succeed");
    assert_eq!(get(&mut vm, sane_read, holey, 0), JsValue::Undefined);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::LoadFromHole]);
}

fn test_double_storage_reads_and_holes<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let (read, _) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(ArrayType::Double)));
    let array = vm
        .new_array(&[JsValue::Double(1.5), JsValue::Empty, JsValue::Double(-0.25)])
        .expect("allocation should succeed");
    assert_eq!(vm.indexing_type(array), Some(IndexingShape::Double));

    assert_eq!(get(&mut vm, read, array, 0), JsValue::Double(1.5));
    assert_eq!(get(&mut vm, read, array, 2), JsValue::Double(-0.25));
    assert!(vm.take_exit_log().is_empty());
    assert_eq!(get(&mut vm, read, array, 1), JsValue::Undefined);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::LoadFromHole]);
    assert_eq!(get(&mut vm, read, array, 3), JsValue::Undefined);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::LoadFromHole]);

    let sane = ArrayMode::new(ArrayType::Double).sane_chain();
    let (sane_read, _) = compiled(&mut vm, get_by_val_graph(sane));
    assert_eq!(get(&mut vm, sane_read, array, 1), JsValue::Undefined);
    assert_eq!(get(&mut vm, sane_read, array, 0), JsValue::Double(1.5));
    assert!(vm.take_exit_log().is_empty());

    let out_of_bounds = ArrayMode::new(ArrayType::Double).out_of_bounds();
    let (loose_read, _) = compiled(&mut vm, get_by_val_graph(out_of_bounds));
    assert_eq!(get(&mut vm, loose_read, array, 1), JsValue::Undefined);
    assert_eq!(get(&mut vm, loose_read, array, 9), JsValue::Undefined);
    assert_eq!(get(&mut vm, loose_read, array, 2), JsValue::Double(-0.25));
    assert!(vm.take_exit_log().is_empty());
}

fn test_to_hole_puts_append_within_capacity<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let (write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(ArrayType::Int32).to_hole()));
    let array = ints(&mut vm, &[1, 2, 3]);

    put(&mut vm, write, array, 3, JsValue::Int32(4));
    assert_eq!(vm.array_length(array), Some(4));
    assert_eq!(vm.get_index(array, 3).expect("get should succeed"), JsValue::Int32(4));
    assert!(vm.take_exit_log().is_empty());

    // The vector is full; growing it is the baseline tier's job.
    put(&mut vm, write, array, 4, JsValue::Int32(5));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);
    assert_eq!(vm.array_length(array), Some(5));
    assert_eq!(vm.get_index(array, 4).expect("get should succeed"), JsValue::Int32(5));

    // Holes inside the length are filled in place.
    let holey = vm
        .new_array(&[JsValue::Int32(1), JsValue::Empty, JsValue::Int32(3)])
        .expect("allocation should succeed");
    put(&mut vm, write, holey, 1, JsValue::Int32(2));
    assert_eq!(vm.get_index(holey, 1).expect("get should succeed"), JsValue::Int32(2));
    assert_eq!(vm.array_length(holey), Some(3));
    assert!(vm.take_exit_log().is_empty());

    let (grow, _) = compiled(
        &mut vm,
        put_by_val_graph(ArrayMode::new(ArrayType::Int32).out_of_bounds()),
    );
    let array = ints(&mut vm, &[1, 2, 3, 4]);
    for index in 4..10 {
        put(&mut vm, grow, array, index, JsValue::Int32(index + 1));
    }
    assert!(vm.take_exit_log().is_empty());
    assert_eq!(vm.array_length(array), Some(10));
    assert_eq!(vm.indexing_type(array), Some(IndexingShape::Int32));
    assert_eq!(vm.get_index(array, 9).expect("get should succeed"), JsValue::Int32(10));
}

fn test_in_bounds_puts_exit_past_the_length<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let (write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(ArrayType::Contiguous)));
    let array = vm
        .new_array(&[JsValue::Null, JsValue::Boolean(true)])
        .expect("allocation should succeed");
    assert_eq!(vm.indexing_type(array), Some(IndexingShape::Contiguous));

    let object = vm.new_object().expect("allocation should succeed");
    put(&mut vm, write, array, 0, object);
    assert_eq!(vm.get_index(array, 0).expect("get should succeed"), object);
    assert!(vm.take_exit_log().is_empty());

    put(&mut vm, write, array, 2, JsValue::Int32(3));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::StoreToHoleOrOutOfBounds]);
    assert_eq!(vm.array_length(array), Some(3));
    assert_eq!(vm.get_index(array, 2).expect("get should succeed"), JsValue::Int32(3));
}

fn test_puts_that_do_not_fit_the_shape_exit<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let (int_write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(ArrayType::Int32)));
    let array = ints(&mut vm, &[1, 2, 3]);
    put(&mut vm, int_write, array, 1, JsValue::Int32(20));
    assert!(vm.take_exit_log().is_empty());

    put(&mut vm, int_write, array, 1, JsValue::Double(2.5));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::BadType]);
    assert_eq!(vm.indexing_type(array), Some(IndexingShape::Double));
    assert_eq!(vm.get_index(array, 1).expect("get should succeed"), JsValue::Double(2.5));
    assert_eq!(vm.get_index(array, 0).expect("get should succeed"), JsValue::Double(1.0));

    // The widened array no longer passes the Int32 storage check.
    put(&mut vm, int_write, array, 0, JsValue::Int32(7));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::BadIndexingType]);

    let (double_write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(ArrayType::Double)));
    put(&mut vm, double_write, array, 2, JsValue::Int32(9));
    assert!(vm.take_exit_log().is_empty());
    assert_eq!(vm.get_index(array, 2).expect("get should succeed"), JsValue::Double(9.0));

    // NaN is the double hole, so storing one needs a contiguous vector.
    put(&mut vm, double_write, array, 2, JsValue::Double(f64::NAN));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::BadType]);
    assert_eq!(vm.indexing_type(array), Some(IndexingShape::Contiguous));
    assert!(matches!(vm.get_index(array, 2), Ok(JsValue::Double(d)) if d.is_nan()));
    assert_eq!(vm.get_index(array, 1).expect("get should succeed"), JsValue::Double(2.5));
}

/// `[1]` whose element 1000000 lives in the sparse map.
fn sparse_array<R: ValueRepresentation>(vm: &mut Vm<R>) -> JsValue {
    let array = ints(vm, &[1]);
    vm.set_index(array, 1_000_000, JsValue::Int32(7))
        .expect("put should succeed");
    assert_eq!(vm.indexing_type(array), Some(IndexingShape::ArrayStorage));
    assert_eq!(vm.array_length(array), Some(1_000_001));
    assert_eq!(vm.array_storage_value_count(array), Some(1));
    array
}

fn test_array_storage_reads_and_hole_fills<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let array = sparse_array(&mut vm);

    let loose = ArrayMode::new(ArrayType::ArrayStorage).out_of_bounds();
    let (read, _) = compiled(&mut vm, get_by_val_graph(loose));
    assert_eq!(get(&mut vm, read, array, 0), JsValue::Int32(1));
    assert_eq!(get(&mut vm, read, array, 2), JsValue::Undefined);
    assert_eq!(get(&mut vm, read, array, 1_000_000), JsValue::Int32(7));
    assert_eq!(get(&mut vm, read, array, 999_999), JsValue::Undefined);
    assert!(vm.take_exit_log().is_empty());

    let (strict_read, _) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(ArrayType::ArrayStorage)));
    assert_eq!(get(&mut vm, strict_read, array, 0), JsValue::Int32(1));
    assert_eq!(get(&mut vm, strict_read, array, 2), JsValue::Undefined);
    assert_eq!(get(&mut vm, strict_read, array, 1_000_000), JsValue::Int32(7));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::LoadFromHole, ExitKind::OutOfBounds]);

    let (strict_write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(ArrayType::ArrayStorage)));
    put(&mut vm, strict_write, array, 0, JsValue::Int32(10));
    assert!(vm.take_exit_log().is_empty());
    put(&mut vm, strict_write, array, 3, JsValue::Int32(13));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::StoreToHole]);
    assert_eq!(vm.array_storage_value_count(array), Some(2));

    let (fill, _) = compiled(
        &mut vm,
        put_by_val_graph(ArrayMode::new(ArrayType::ArrayStorage).to_hole()),
    );
    put(&mut vm, fill, array, 2, JsValue::Int32(12));
    assert!(vm.take_exit_log().is_empty());
    assert_eq!(vm.array_storage_value_count(array), Some(3));
    assert_eq!(vm.array_length(array), Some(1_000_001));
    assert_eq!(vm.get_index(array, 2).expect("get should succeed"), JsValue::Int32(12));

    put(&mut vm, fill, array, 500, JsValue::Int32(0));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);
    assert_eq!(vm.get_index(array, 500).expect("get should succeed"), JsValue::Int32(0));
}

fn test_slow_put_hole_writes_follow_the_policy<R: ValueRepresentation>() {
    for policy in [SlowPutHoleWrites::SlowPath, SlowPutHoleWrites::Store] {
        let mut vm = jit_vm_with::<R>(VmConfig {
            jit: otter_dfg_jit::JitConfig {
                slow_put_hole_writes: policy,
                ..Default::default()
            },
            ..config()
        });
        let array = sparse_array(&mut vm);
        let mode = ArrayMode::new(ArrayType::SlowPutArrayStorage).to_hole();
        let (fill, _) = compiled(&mut vm, put_by_val_graph(mode));

        put(&mut vm, fill, array, 1, JsValue::Int32(11));
        put(&mut vm, fill, array, 0, JsValue::Int32(10));
        assert!(vm.take_exit_log().is_empty(), "{policy:?}");
        assert_eq!(vm.array_storage_value_count(array), Some(2), "{policy:?}");
        assert_eq!(vm.get_index(array, 0).expect("get should succeed"), JsValue::Int32(10));
        assert_eq!(vm.get_index(array, 1).expect("get should succeed"), JsValue::Int32(11));
    }
}

fn test_typed_array_elements_convert_on_store<R: ValueRepresentation>() {
    let cases: [(ArrayType, JsValue, JsValue); 9] = [
        (ArrayType::Int8Array, JsValue::Int32(200), JsValue::Int32(-56)),
        (ArrayType::Int16Array, JsValue::Int32(-40000), JsValue::Int32(25536)),
        (ArrayType::Uint8Array, JsValue::Double(-1.0), JsValue::Int32(255)),
        (ArrayType::Uint8ClampedArray, JsValue::Int32(300), JsValue::Int32(255)),
        (ArrayType::Uint8ClampedArray, JsValue::Int32(-5), JsValue::Int32(0)),
        (ArrayType::Uint8ClampedArray, JsValue::Double(2.5), JsValue::Int32(2)),
        (ArrayType::Int32Array, JsValue::Double(4294967297.0), JsValue::Int32(1)),
        (ArrayType::Float32Array, JsValue::Double(1.1), JsValue::Double(f64::from(1.1f32))),
        (ArrayType::Float64Array, JsValue::Int32(3), JsValue::Double(3.0)),
    ];
    for (array_type, stored, expected) in cases {
        let mut vm = jit_vm::<R>();
        let (write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(array_type)));
        let (read, _) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(array_type)));
        let array = vm
            .new_typed_array(array_type, 4)
            .expect("allocation should succeed");
        assert_eq!(vm.array_length(array), Some(4));

        put(&mut vm, write, array, 2, stored);
        let via_jit = get(&mut vm, read, array, 2);
        let via_runtime = vm.get_index(array, 2).expect("get should succeed");
        assert!(vm.take_exit_log().is_empty(), "{array_type:?}");
        assert_eq!(via_runtime, expected, "{array_type:?} <- {stored:?}");
        assert!(via_jit.same_value(expected), "{array_type:?}: {via_jit:?} != {expected:?}");
        assert!(get(&mut vm, read, array, 1).same_value(JsValue::Int32(0)));
    }

    // Uint32 elements beyond int32 range come back as doubles.
    let mut vm = jit_vm::<R>();
    let (write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(ArrayType::Uint32Array)));
    let (read, _) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(ArrayType::Uint32Array)));
    let array = vm
        .new_typed_array(ArrayType::Uint32Array, 2)
        .expect("allocation should succeed");
    put(&mut vm, write, array, 0, JsValue::Double(3e9));
    assert_eq!(get(&mut vm, read, array, 0), JsValue::Double(3e9));
    assert_eq!(vm.get_index(array, 0).expect("get should succeed"), JsValue::Double(3e9));
}

fn test_typed_array_bounds<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let ty = ArrayType::Int32Array;
    let array = vm.new_typed_array(ty, 3).expect("allocation should succeed");

    let (strict_read, _) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(ty)));
    assert_eq!(get(&mut vm, strict_read, array, 3), JsValue::Undefined);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);

    let (loose_read, _) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(ty).out_of_bounds()));
    assert_eq!(get(&mut vm, loose_read, array, 3), JsValue::Undefined);
    assert_eq!(get(&mut vm, loose_read, array, -1), JsValue::Undefined);
    assert!(vm.take_exit_log().is_empty());

    let (strict_write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(ty)));
    put(&mut vm, strict_write, array, 3, JsValue::Int32(1));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);

    let (loose_write, _) = compiled(&mut vm, put_by_val_graph(ArrayMode::new(ty).out_of_bounds()));
    put(&mut vm, loose_write, array, 3, JsValue::Int32(1));
    put(&mut vm, loose_write, array, 2, JsValue::Int32(-9));
    assert!(vm.take_exit_log().is_empty());
    assert_eq!(vm.array_length(array), Some(3));
    assert_eq!(vm.get_index(array, 3).expect("get should succeed"), JsValue::Undefined);
    assert_eq!(vm.get_index(array, 2).expect("get should succeed"), JsValue::Int32(-9));

    // A plain array fails the typed-array check.
    let plain = ints(&mut vm, &[1]);
    assert_eq!(get(&mut vm, strict_read, plain, 0), JsValue::Int32(1));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::BadIndexingType]);
}

fn test_string_characters<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let (read, _) = compiled(&mut vm, get_by_val_graph(ArrayMode::new(ArrayType::String)));
    let latin = vm.new_string("héllo").expect("allocation should succeed");
    let wide = vm.new_string("aπb").expect("allocation should succeed");

    let e_acute = get(&mut vm, read, latin, 1);
    assert_eq!(vm.string_value(e_acute).as_deref(), Some("é"));
    assert_eq!(e_acute, vm.get_index(latin, 1).expect("get should succeed"));
    let pi = get(&mut vm, read, wide, 1);
    assert_eq!(vm.string_value(pi).as_deref(), Some("π"));
    assert!(vm.take_exit_log().is_empty());

    assert_eq!(get(&mut vm, read, latin, 5), JsValue::Undefined);
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);

    // (s, i) => s.charCodeAt(i)
    let mut b = GraphBuilder::new("char_code_at").parameters(2);
    let s = b.get_local(Operand::Argument(1));
    let i = b.get_local(Operand::Argument(2));
    let code = b.add(NodeOp::StringCharCodeAt, &[Edge::cell(s), Edge::int32(i)]);
    b.ret(code);
    let (char_code_at, _) = compiled(&mut vm, b.build().expect("build should succeed"));
    assert_eq!(get(&mut vm, char_code_at, latin, 1), JsValue::Int32(0xE9));
    assert_eq!(get(&mut vm, char_code_at, wide, 1), JsValue::Int32(0x3C0));
    assert_eq!(get(&mut vm, char_code_at, wide, 2), JsValue::Int32('b' as i32));
    assert!(vm.take_exit_log().is_empty());
    assert!(matches!(get(&mut vm, char_code_at, wide, 3), JsValue::Double(d) if d.is_nan()));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);
}

fn test_arguments_object<R: ValueRepresentation>() {
    // (a, b, i) => arguments[i] + arguments.length
    let mut b = GraphBuilder::new("arguments").parameters(3);
    let arguments = b.add(NodeOp::CreateArguments, &[]);
    let i = b.get_local(Operand::Argument(3));
    let mode = ArrayMode::new(ArrayType::Arguments);
    let element = b.add(NodeOp::GetByVal(mode), &[Edge::cell(arguments), Edge::int32(i)]);
    let length = b.add(NodeOp::GetArrayLength(mode), &[Edge::cell(arguments)]);
    let sum = b.add(NodeOp::ValueAdd, &[Edge::untyped(element), Edge::untyped(length)]);
    b.ret(sum);
    let graph = b.build().expect("build should succeed");

    let mut vm = jit_vm::<R>();
    let (function, _) = compiled(&mut vm, graph.clone());
    let args = |i: i32| [JsValue::Int32(10), JsValue::Int32(20), JsValue::Int32(i)];
    assert_eq!(call(&mut vm, function, &args(0)), JsValue::Int32(13));
    assert_eq!(call(&mut vm, function, &args(1)), JsValue::Int32(23));
    assert_eq!(call(&mut vm, function, &args(2)), JsValue::Int32(5));
    assert!(vm.take_exit_log().is_empty());

    // undefined + 3
    assert!(matches!(call(&mut vm, function, &args(3)), JsValue::Double(d) if d.is_nan()));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::OutOfBounds]);

    let inputs: Vec<Vec<JsValue>> = (0..4).map(|i| args(i).to_vec()).collect();
    assert_matches_baseline::<R>(&graph, &inputs);

    let standalone = vm
        .new_arguments(&[JsValue::Boolean(true)])
        .expect("allocation should succeed");
    assert_eq!(vm.array_length(standalone), Some(1));
    assert_eq!(vm.get_index(standalone, 0).expect("get should succeed"), JsValue::Boolean(true));
}
