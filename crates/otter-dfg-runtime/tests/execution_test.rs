//! Compiled execution against the baseline tier
//!
//! Arithmetic, comparisons, calls, construction and stack limits, each run
//! compiled and interpreted under both value encodings.

#[macro_use]
mod common;

use common::*;
use otter_dfg_graph::{ArithMode, Edge, GraphBuilder, JsValue, NodeOp, Operand};
use otter_dfg_jit::{CallType, ExitKind, ValueRepresentation};
use otter_dfg_runtime::{VmConfig, VmError};

encoding_tests!(
    test_int32_arithmetic_matches_baseline,
    test_double_arithmetic_matches_baseline,
    test_int32_speculation_exits_on_every_other_tag,
    test_generic_add_and_compare_use_helpers,
    test_recursive_calls_link_their_sites,
    test_construct_allocates_from_prototype,
    test_stack_overflow_from_register_file,
    test_stack_overflow_from_call_depth,
    test_live_values_survive_slow_paths,
    test_compile_failure_stays_in_baseline,
);

fn test_int32_arithmetic_matches_baseline<R: ValueRepresentation>() {
    let ops = [
        NodeOp::ArithAdd(ArithMode::CheckOverflow),
        NodeOp::ArithSub(ArithMode::CheckOverflow),
        NodeOp::ArithMul(ArithMode::CheckOverflowAndNegativeZero),
        NodeOp::ArithDiv(ArithMode::CheckOverflowAndNegativeZero),
        NodeOp::ArithMod(ArithMode::CheckOverflowAndNegativeZero),
        NodeOp::ArithMul(ArithMode::Unchecked),
        NodeOp::BitAnd,
        NodeOp::BitOr,
        NodeOp::BitXor,
        NodeOp::BitLShift,
        NodeOp::BitRShift,
        NodeOp::BitURShift,
    ];
    let pairs = [
        (7, 3),
        (-7, 2),
        (0, -5),
        (i32::MAX, 1),
        (i32::MIN, -1),
        (6, 0),
        (-6, 3),
        (1 << 20, 1 << 12),
    ];
    let inputs: Vec<Vec<JsValue>> = pairs
        .iter()
        .map(|(a, b)| vec![JsValue::Int32(*a), JsValue::Int32(*b)])
        .collect();

    for op in ops {
        let mut b = GraphBuilder::new(op.name()).parameters(2);
        let x = b.get_local(Operand::Argument(1));
        let y = b.get_local(Operand::Argument(2));
        let result = b.add(op, &[Edge::int32(x), Edge::int32(y)]);
        b.ret(result);
        let graph = b.build().expect("build should succeed");
        assert_matches_baseline::<R>(&graph, &inputs);
    }

    let results = assert_matches_baseline::<R>(
        &int32_add_graph(),
        &[
            vec![JsValue::Int32(20), JsValue::Int32(22)],
            vec![JsValue::Int32(i32::MAX), JsValue::Int32(1)],
        ],
    );
    assert_eq!(results[0], JsValue::Int32(42));
    assert_eq!(results[1], JsValue::Double(2147483648.0));
}

fn test_double_arithmetic_matches_baseline<R: ValueRepresentation>() {
    let binary = [
        NodeOp::ArithAdd(ArithMode::CheckOverflow),
        NodeOp::ArithSub(ArithMode::CheckOverflow),
        NodeOp::ArithMul(ArithMode::CheckOverflow),
        NodeOp::ArithDiv(ArithMode::CheckOverflow),
        NodeOp::ArithMod(ArithMode::CheckOverflow),
        NodeOp::ArithMin,
        NodeOp::ArithMax,
        NodeOp::CompareLess,
        NodeOp::CompareGreaterEq,
        NodeOp::CompareEq,
    ];
    let pairs = [
        (1.5, 2.25),
        (-0.0, 0.0),
        (f64::NAN, 1.0),
        (f64::INFINITY, -1.0),
        (5.5, -0.0),
        (1e308, 1e308),
    ];
    let inputs: Vec<Vec<JsValue>> = pairs
        .iter()
        .map(|(a, b)| vec![JsValue::Double(*a), JsValue::Double(*b)])
        .collect();

    for op in binary {
        let mut b = GraphBuilder::new(op.name()).parameters(2);
        let x = b.get_local(Operand::Argument(1));
        let y = b.get_local(Operand::Argument(2));
        let result = b.add(op, &[Edge::number(x), Edge::number(y)]);
        b.ret(result);
        let graph = b.build().expect("build should succeed");
        assert_matches_baseline::<R>(&graph, &inputs);
    }

    let unary_inputs: Vec<Vec<JsValue>> = [2.0, -0.0, -9.5, f64::NAN, 0.25]
        .iter()
        .map(|v| vec![JsValue::Double(*v)])
        .collect();
    for op in [
        NodeOp::ArithSqrt,
        NodeOp::ArithAbs(ArithMode::CheckOverflow),
        NodeOp::ArithNegate(ArithMode::CheckOverflow),
    ] {
        let mut b = GraphBuilder::new(op.name()).parameters(1);
        let x = b.get_local(Operand::Argument(1));
        let result = b.add(op, &[Edge::number(x)]);
        b.ret(result);
        let graph = b.build().expect("build should succeed");
        assert_matches_baseline::<R>(&graph, &unary_inputs);
    }
}

fn test_int32_speculation_exits_on_every_other_tag<R: ValueRepresentation>() {
    let mut b = GraphBuilder::new("to_int").parameters(1);
    let x = b.get_local(Operand::Argument(1));
    let zero = b.constant(JsValue::Int32(0));
    let result = b.add(NodeOp::BitOr, &[Edge::int32(x), Edge::int32(zero)]);
    b.ret(result);
    let graph = b.build().expect("build should succeed");

    let mut vm = jit_vm::<R>();
    let mut baseline = baseline_vm::<R>();
    let (function, _) = compiled(&mut vm, graph.clone());
    let reference = baseline.define_function(graph).expect("graph should validate");

    let int32s = [0, 1, -1, i32::MIN, i32::MAX];
    for value in int32s {
        assert_eq!(call(&mut vm, function, &[JsValue::Int32(value)]), JsValue::Int32(value));
    }
    assert!(exit_kinds(&mut vm).is_empty(), "int32 inputs should stay on the fast path");

    // Every tag next to int32, plus the double bit patterns closest to it.
    let others = [
        JsValue::Double(1.0),
        JsValue::Double(-0.0),
        JsValue::Double(2147483648.0),
        JsValue::Double(f64::NAN),
        JsValue::Double(f64::from_bits(0x7FFC_0000_0000_0000)),
        JsValue::Double(f64::from_bits(0xFFF8_0000_0000_0000)),
        JsValue::Double(f64::INFINITY),
        JsValue::Double(f64::MIN_POSITIVE),
        JsValue::Undefined,
        JsValue::Null,
        JsValue::Boolean(true),
        JsValue::Boolean(false),
    ];
    for value in others {
        let fast = call(&mut vm, function, &[value]);
        let slow = call(&mut baseline, reference, &[value]);
        assert_eq!(fast, slow, "{value:?}");
        assert_eq!(exit_kinds(&mut vm), vec![ExitKind::BadType], "{value:?}");
    }

    let object = vm.new_object().expect("allocation should succeed");
    let text = vm.new_string("12").expect("allocation should succeed");
    assert_eq!(call(&mut vm, function, &[object]), JsValue::Int32(0));
    assert_eq!(call(&mut vm, function, &[text]), JsValue::Int32(12));
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::BadType, ExitKind::BadType]);
}

fn test_generic_add_and_compare_use_helpers<R: ValueRepresentation>() {
    let mut b = GraphBuilder::new("concat").parameters(2);
    let x = b.get_local(Operand::Argument(1));
    let y = b.get_local(Operand::Argument(2));
    let sum = b.add(NodeOp::ValueAdd, &[Edge::untyped(x), Edge::untyped(y)]);
    b.ret(sum);
    let add = b.build().expect("build should succeed");

    let mut vm = jit_vm::<R>();
    let (function, _) = compiled(&mut vm, add);

    let hello = vm.new_string("hello ").expect("allocation should succeed");
    let world = vm.new_string("world").expect("allocation should succeed");
    let joined = call(&mut vm, function, &[hello, world]);
    assert_eq!(vm.string_value(joined).as_deref(), Some("hello world"));

    let mixed = call(&mut vm, function, &[hello, JsValue::Int32(4)]);
    assert_eq!(vm.string_value(mixed).as_deref(), Some("hello 4"));
    assert_eq!(
        call(&mut vm, function, &[JsValue::Double(0.5), JsValue::Int32(2)]),
        JsValue::Double(2.5)
    );
    assert_eq!(
        call(&mut vm, function, &[JsValue::Boolean(true), JsValue::Null]),
        JsValue::Int32(1)
    );

    let mut b = GraphBuilder::new("less").parameters(2);
    let x = b.get_local(Operand::Argument(1));
    let y = b.get_local(Operand::Argument(2));
    let less = b.add(NodeOp::CompareLess, &[Edge::untyped(x), Edge::untyped(y)]);
    b.ret(less);
    let (less, _) = compiled(&mut vm, b.build().expect("build should succeed"));
    let a = vm.new_string("a").expect("allocation should succeed");
    let b = vm.new_string("b").expect("allocation should succeed");
    assert_eq!(call(&mut vm, less, &[a, b]), JsValue::Boolean(true));
    assert_eq!(call(&mut vm, less, &[b, a]), JsValue::Boolean(false));
    assert_eq!(
        call(&mut vm, less, &[JsValue::Int32(1), JsValue::Double(1.5)]),
        JsValue::Boolean(true)
    );
    assert_eq!(
        call(&mut vm, less, &[JsValue::Undefined, JsValue::Int32(1)]),
        JsValue::Boolean(false)
    );
    assert!(exit_kinds(&mut vm).is_empty());
}

fn test_recursive_calls_link_their_sites<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let (fib, unit) = compiled(&mut vm, fib_graph(0));
    vm.set_global(0, fib).expect("global should exist");

    assert_eq!(unit.call_sites().len(), 2);
    assert!(unit.call_sites().iter().all(|site| site.call_type == CallType::Call));
    assert!((0..2).all(|i| unit.call_link(i).is_some_and(|link| link.linked().is_none())));

    assert_eq!(call(&mut vm, fib, &[JsValue::Int32(10)]), JsValue::Int32(55));
    for index in 0..2 {
        let link = unit.call_link(index).expect("link cell should exist");
        let (_, target) = link.linked().expect("site should be linked");
        assert_eq!(target, unit.code_address());
    }
    let links = vm.stats().call_links;
    assert_eq!(links, 2);

    // Linked sites call straight into the unit; the runtime only sees the outer call.
    let compiled_calls = vm.stats().compiled_calls;
    assert_eq!(call(&mut vm, fib, &[JsValue::Int32(15)]), JsValue::Int32(610));
    assert_eq!(vm.stats().compiled_calls, compiled_calls + 1);
    assert_eq!(vm.stats().call_links, links);

    let mut baseline = baseline_vm::<R>();
    let reference = baseline.define_function(fib_graph(0)).expect("graph should validate");
    baseline.set_global(0, reference).expect("global should exist");
    assert_eq!(call(&mut baseline, reference, &[JsValue::Int32(15)]), JsValue::Int32(610));
    assert!(baseline.stats().interpreted_calls > 600);
}

fn test_construct_allocates_from_prototype<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let x = vm.identifier("x");

    // function Point(x) { this.x = x }
    let mut b = GraphBuilder::new("Point").parameters(1);
    let this = b.add(NodeOp::CreateThis, &[]);
    let value = b.get_local(Operand::Argument(1));
    b.add(NodeOp::PutByIdDirect(x), &[Edge::cell(this), Edge::untyped(value)]);
    let undefined = b.constant(JsValue::Undefined);
    b.ret(undefined);
    let (point, _) = compiled(&mut vm, b.build().expect("build should succeed"));

    // (ctor, v) => new ctor(v).x
    let mut b = GraphBuilder::new("make").parameters(2);
    let ctor = b.get_local(Operand::Argument(1));
    let value = b.get_local(Operand::Argument(2));
    let object = b.add(NodeOp::Construct, &[Edge::untyped(ctor), Edge::untyped(value)]);
    let read = b.add(NodeOp::GetById(x), &[Edge::untyped(object)]);
    b.ret(read);
    let (make, unit) = compiled(&mut vm, b.build().expect("build should succeed"));
    assert_eq!(unit.call_sites()[0].call_type, CallType::Construct);

    let prototype = vm.get(point, "prototype").expect("get should succeed");
    let object = vm.construct(point, &[JsValue::Int32(3)]).expect("construct should succeed");
    assert_eq!(vm.get(object, "x").expect("get should succeed"), JsValue::Int32(3));
    assert!(vm.is_object(prototype));

    for i in 0..4 {
        assert_eq!(call(&mut vm, make, &[point, JsValue::Int32(i)]), JsValue::Int32(i));
    }
    assert!(unit.call_link(0).is_some_and(|link| link.linked().is_some()));

    // A host constructor that returns a primitive still yields the receiver.
    let host = vm
        .define_host_function("Host", |vm, this, args| {
            let value = args.first().copied().unwrap_or(JsValue::Undefined);
            vm.set(this, "x", value)?;
            Ok(JsValue::Int32(99))
        })
        .expect("function should be defined");
    assert_eq!(call(&mut vm, make, &[host, JsValue::Int32(8)]), JsValue::Int32(8));

    let error = vm
        .call(make, JsValue::Undefined, &[JsValue::Int32(1), JsValue::Int32(2)])
        .expect_err("constructing a number should throw");
    assert!(matches!(error, VmError::TypeError(_)), "{error}");
}

/// `() => self()`, finding itself in global 0.
fn runaway_graph() -> otter_dfg_graph::Graph {
    let mut b = GraphBuilder::new("runaway").parameters(0);
    let callee = b.add(NodeOp::GetGlobalVar(0), &[]);
    let this = b.constant(JsValue::Undefined);
    let result = b.add(NodeOp::Call, &[Edge::untyped(callee), Edge::untyped(this)]);
    b.ret(result);
    b.build().expect("build should succeed")
}

fn assert_overflows<R: ValueRepresentation>(config: VmConfig) {
    for jit_enabled in [true, false] {
        let mut vm = otter_dfg_runtime::Vm::<R>::new(VmConfig {
            jit_enabled,
            ..config.clone()
        })
        .expect("vm should be created");
        let runaway = vm.define_function(runaway_graph()).expect("graph should validate");
        vm.set_global(0, runaway).expect("global should exist");
        let error = vm
            .call(runaway, JsValue::Undefined, &[])
            .expect_err("unbounded recursion should overflow");
        assert!(matches!(error, VmError::StackOverflow), "{error}");
        assert!(error.is_exception());

        // The VM unwinds cleanly and keeps running.
        let add = vm.define_function(int32_add_graph()).expect("graph should validate");
        assert_eq!(
            call(&mut vm, add, &[JsValue::Int32(1), JsValue::Int32(2)]),
            JsValue::Int32(3)
        );
    }
}

fn test_stack_overflow_from_register_file<R: ValueRepresentation>() {
    assert_overflows::<R>(VmConfig {
        register_file_slots: 512,
        max_call_depth: 100_000,
        ..config()
    });
}

fn test_stack_overflow_from_call_depth<R: ValueRepresentation>() {
    assert_overflows::<R>(VmConfig {
        max_call_depth: 32,
        ..config()
    });
}

fn test_live_values_survive_slow_paths<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let field = vm.identifier("field");

    // (n, o) => (n + 1) + (n * 2) + (n - 3) + (n ^ 5) + o.field
    let mut b = GraphBuilder::new("pressure").parameters(2);
    let n = b.get_local(Operand::Argument(1));
    let o = b.get_local(Operand::Argument(2));
    let one = b.constant(JsValue::Int32(1));
    let two = b.constant(JsValue::Int32(2));
    let three = b.constant(JsValue::Int32(3));
    let five = b.constant(JsValue::Int32(5));
    let checked = ArithMode::CheckOverflow;
    let a = b.add(NodeOp::ArithAdd(checked), &[Edge::int32(n), Edge::int32(one)]);
    let m = b.add(NodeOp::ArithMul(checked), &[Edge::int32(n), Edge::int32(two)]);
    let s = b.add(NodeOp::ArithSub(checked), &[Edge::int32(n), Edge::int32(three)]);
    let x = b.add(NodeOp::BitXor, &[Edge::int32(n), Edge::int32(five)]);
    let d = b.add(NodeOp::ArithSqrt, &[Edge::number(n)]);
    let loaded = b.add(NodeOp::GetById(field), &[Edge::untyped(o)]);
    let t1 = b.add(NodeOp::ArithAdd(checked), &[Edge::int32(a), Edge::int32(m)]);
    let t2 = b.add(NodeOp::ArithAdd(checked), &[Edge::int32(t1), Edge::int32(s)]);
    let t3 = b.add(NodeOp::ArithAdd(checked), &[Edge::int32(t2), Edge::int32(x)]);
    let t4 = b.add(NodeOp::ArithAdd(checked), &[Edge::int32(t3), Edge::int32(loaded)]);
    let total = b.add(NodeOp::ArithAdd(checked), &[Edge::number(t4), Edge::number(d)]);
    b.ret(total);
    let (function, unit) = compiled(&mut vm, b.build().expect("build should succeed"));
    let site = &unit.inline_caches()[0];
    assert_eq!(site.identifier, field);

    for n in [4, 9, 16] {
        let object = vm.new_object().expect("allocation should succeed");
        vm.set(object, "field", JsValue::Int32(100)).expect("set should succeed");
        let expected = (n + 1) + n * 2 + (n - 3) + (n ^ 5) + 100;
        let expected = f64::from(expected) + f64::from(n).sqrt();
        let result = call(&mut vm, function, &[JsValue::Int32(n), object]);
        assert_eq!(result.as_number(), Some(expected), "n = {n}");
    }
    // A primitive base reads undefined through the helper, which then fails the int32 use.
    let result = vm
        .call(function, JsValue::Undefined, &[JsValue::Int32(4), JsValue::Int32(0)])
        .expect("call should succeed");
    assert_eq!(exit_kinds(&mut vm), vec![ExitKind::BadType]);
    assert!(result.as_number().is_some_and(f64::is_nan));
}

fn test_compile_failure_stays_in_baseline<R: ValueRepresentation>() {
    // Arithmetic on untyped operands is rewritten upstream; the compiler refuses it.
    let mut b = GraphBuilder::new("untyped_mul").parameters(2);
    let x = b.get_local(Operand::Argument(1));
    let y = b.get_local(Operand::Argument(2));
    let product = b.add(
        NodeOp::ArithMul(ArithMode::CheckOverflow),
        &[Edge::untyped(x), Edge::untyped(y)],
    );
    b.ret(product);
    let graph = b.build().expect("build should succeed");

    let mut vm = jit_vm::<R>();
    let function = vm.define_function(graph).expect("graph should validate");
    assert_eq!(
        call(&mut vm, function, &[JsValue::Int32(6), JsValue::Int32(7)]),
        JsValue::Int32(42)
    );
    assert!(vm.compiled_unit(function).is_none());
    assert_eq!(vm.stats().compile_failures, 1);
    assert_eq!(
        call(&mut vm, function, &[JsValue::Double(1.5), JsValue::Int32(2)]),
        JsValue::Int32(3)
    );
    assert_eq!(vm.stats().compile_failures, 1, "a failed graph is not retried");
    assert_eq!(vm.stats().interpreted_calls, 2);
}
