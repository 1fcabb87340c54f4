//! Speculative Compiler Benchmarks
//!
//! Compile throughput for representative graphs, and steady-state execution
//! of compiled units against the baseline tier.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use otter_dfg_graph::{ArithMode, Edge, Graph, GraphBuilder, JsValue, NodeOp, Operand};
use otter_dfg_jit::{ActiveEncoding, JitCompiler, JitConfig, NoWatchpoints};
use otter_dfg_runtime::{Vm, VmConfig, runtime_helpers};
use std::hint::black_box;

fn add_graph() -> Graph {
    let mut b = GraphBuilder::new("add").parameters(2);
    let x = b.get_local(Operand::Argument(1));
    let y = b.get_local(Operand::Argument(2));
    let sum = b.add(
        NodeOp::ArithAdd(ArithMode::CheckOverflow),
        &[Edge::int32(x), Edge::int32(y)],
    );
    b.ret(sum);
    b.build().unwrap()
}

fn fib_graph(global: u32) -> Graph {
    let mut b = GraphBuilder::new("fib").parameters(1);
    let base_case = b.new_block();
    let recurse = b.new_block();

    let n = b.get_local(Operand::Argument(1));
    let two = b.constant(JsValue::Int32(2));
    let small = b.add(NodeOp::CompareLess, &[Edge::int32(n), Edge::int32(two)]);
    b.branch(Edge::boolean(small), base_case, recurse);

    b.switch_to_block(base_case);
    let n = b.get_local(Operand::Argument(1));
    b.ret(n);

    b.switch_to_block(recurse);
    let n = b.get_local(Operand::Argument(1));
    let callee = b.add(NodeOp::GetGlobalVar(global), &[]);
    let this = b.constant(JsValue::Undefined);
    let one = b.constant(JsValue::Int32(1));
    let n1 = b.add(
        NodeOp::ArithSub(ArithMode::CheckOverflow),
        &[Edge::int32(n), Edge::int32(one)],
    );
    let n2 = b.add(
        NodeOp::ArithSub(ArithMode::CheckOverflow),
        &[Edge::int32(n), Edge::int32(two)],
    );
    let a = b.add(
        NodeOp::Call,
        &[Edge::untyped(callee), Edge::untyped(this), Edge::untyped(n1)],
    );
    let c = b.add(
        NodeOp::Call,
        &[Edge::untyped(callee), Edge::untyped(this), Edge::untyped(n2)],
    );
    let sum = b.add(
        NodeOp::ArithAdd(ArithMode::CheckOverflow),
        &[Edge::int32(a), Edge::int32(c)],
    );
    b.ret(sum);
    b.build().unwrap()
}

/// `(o) => o.x + o.y`
fn property_sum_graph(x: otter_dfg_graph::Identifier, y: otter_dfg_graph::Identifier) -> Graph {
    let mut b = GraphBuilder::new("property_sum").parameters(1);
    let o = b.get_local(Operand::Argument(1));
    let a = b.add(NodeOp::GetById(x), &[Edge::cell(o)]);
    let c = b.add(NodeOp::GetById(y), &[Edge::cell(o)]);
    let sum = b.add(
        NodeOp::ArithAdd(ArithMode::CheckOverflow),
        &[Edge::int32(a), Edge::int32(c)],
    );
    b.ret(sum);
    b.build().unwrap()
}

fn vm(jit_enabled: bool) -> Vm {
    Vm::new(VmConfig {
        jit_enabled,
        deopt_threshold: u32::MAX,
        ..VmConfig::default()
    })
    .unwrap()
}

fn bench_compile(c: &mut Criterion) {
    let helpers = runtime_helpers::<ActiveEncoding>();
    let mut compiler = JitCompiler::<ActiveEncoding>::new(&helpers, JitConfig::default()).unwrap();
    let graphs = [add_graph(), fib_graph(0)];

    let mut group = c.benchmark_group("compile");
    for graph in &graphs {
        group.bench_with_input(BenchmarkId::from_parameter(&graph.name), graph, |b, graph| {
            b.iter(|| black_box(compiler.compile(black_box(graph), &NoWatchpoints).unwrap()));
        });
    }
    group.finish();
}

fn bench_fib(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_20");
    for (tier, jit_enabled) in [("compiled", true), ("baseline", false)] {
        let mut vm = vm(jit_enabled);
        let fib = vm.define_function(fib_graph(0)).unwrap();
        vm.set_global(0, fib).unwrap();
        if jit_enabled {
            vm.compile(fib).unwrap();
        }
        group.bench_function(tier, |b| {
            b.iter(|| {
                vm.call(fib, JsValue::Undefined, &[black_box(JsValue::Int32(20))])
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_int32_add(c: &mut Criterion) {
    let mut vm = vm(true);
    let add = vm.define_function(add_graph()).unwrap();
    vm.compile(add).unwrap();
    c.bench_function("int32_add_call", |b| {
        b.iter(|| {
            vm.call(
                add,
                JsValue::Undefined,
                &[black_box(JsValue::Int32(20)), black_box(JsValue::Int32(22))],
            )
            .unwrap()
        });
    });
}

fn bench_get_by_id(c: &mut Criterion) {
    let mut vm = vm(true);
    let x = vm.identifier("x");
    let y = vm.identifier("y");
    let sum = vm.define_function(property_sum_graph(x, y)).unwrap();
    vm.compile(sum).unwrap();
    let object = vm.new_object().unwrap();
    vm.set(object, "x", JsValue::Int32(1)).unwrap();
    vm.set(object, "y", JsValue::Int32(2)).unwrap();
    // First call patches both caches.
    vm.call(sum, JsValue::Undefined, &[object]).unwrap();

    c.bench_function("get_by_id_monomorphic", |b| {
        b.iter(|| vm.call(sum, JsValue::Undefined, &[black_box(object)]).unwrap());
    });
}

criterion_group!(
    benches,
    bench_compile,
    bench_fib,
    bench_int32_add,
    bench_get_by_id
);
criterion_main!(benches);
