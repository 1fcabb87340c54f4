//! Shared fixtures for the end-to-end tests.
//!
//! Every scenario is written once as a function generic over the value
//! encoding; `encoding_tests!` instantiates it for both.

#![allow(dead_code)]

use std::sync::Arc;

use otter_dfg_graph::{
    ArithMode, ArrayMode, Edge, Graph, GraphBuilder, JsValue, NodeOp, Operand,
};
use otter_dfg_jit::{CompiledUnit, ExitKind, ValueRepresentation};
use otter_dfg_runtime::{Vm, VmConfig};

/// Emit one `#[test]` per encoding for each generic scenario.
macro_rules! encoding_tests {
    ($($scenario:ident),* $(,)?) => {
        mod unified {
            $(
                #[test]
                fn $scenario() {
                    super::$scenario::<otter_dfg_jit::Unified>();
                }
            )*
        }

        mod split {
            $(
                #[test]
                fn $scenario() {
                    super::$scenario::<otter_dfg_jit::Split>();
                }
            )*
        }
    };
}

/// Small VM that compiles on first call and logs every exit.
pub fn config() -> VmConfig {
    VmConfig {
        heap_size: 8 << 20,
        register_file_slots: 16 * 1024,
        record_exits: true,
        deopt_threshold: 1000,
        ..VmConfig::default()
    }
}

pub fn jit_vm<R: ValueRepresentation>() -> Vm<R> {
    jit_vm_with(config())
}

pub fn jit_vm_with<R: ValueRepresentation>(config: VmConfig) -> Vm<R> {
    let vm = Vm::<R>::new(config).expect("vm should be created");
    assert!(vm.has_jit(), "compiler should be available");
    vm
}

pub fn baseline_vm<R: ValueRepresentation>() -> Vm<R> {
    Vm::<R>::new(VmConfig {
        jit_enabled: false,
        ..config()
    })
    .expect("vm should be created")
}

/// Define `graph` and compile it up front.
pub fn compiled<R: ValueRepresentation>(vm: &mut Vm<R>, graph: Graph) -> (JsValue, Arc<CompiledUnit>) {
    let function = vm.define_function(graph).expect("graph should validate");
    let unit = vm
        .compile(function)
        .expect("compile should succeed")
        .expect("unit should be installed");
    (function, unit)
}

pub fn call<R: ValueRepresentation>(vm: &mut Vm<R>, function: JsValue, args: &[JsValue]) -> JsValue {
    vm.call(function, JsValue::Undefined, args)
        .expect("call should succeed")
}

/// Exit kinds logged since the last drain.
pub fn exit_kinds<R: ValueRepresentation>(vm: &mut Vm<R>) -> Vec<ExitKind> {
    vm.take_exit_log().into_iter().map(|exit| exit.kind).collect()
}

/// Run `graph` compiled and in the baseline tier on primitive `inputs`,
/// asserting both tiers agree; returns the compiled results.
pub fn assert_matches_baseline<R: ValueRepresentation>(graph: &Graph, inputs: &[Vec<JsValue>]) -> Vec<JsValue> {
    let mut jit = jit_vm::<R>();
    let mut baseline = baseline_vm::<R>();
    let (compiled_fn, _) = compiled(&mut jit, graph.clone());
    let interpreted_fn = baseline
        .define_function(graph.clone())
        .expect("graph should validate");
    inputs
        .iter()
        .map(|args| {
            let fast = call(&mut jit, compiled_fn, args);
            let slow = call(&mut baseline, interpreted_fn, args);
            assert!(
                fast.same_value(slow) || fast == slow,
                "{}: compiled {fast:?} != baseline {slow:?} for {args:?}",
                graph.name
            );
            fast
        })
        .collect()
}

// ============================================================================
// Graphs
// ============================================================================

/// `(a, b) => a + b` speculated int32 with overflow checks.
pub fn int32_add_graph() -> Graph {
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

/// `(n) => n < 2 ? n : fib(n - 1) + fib(n - 2)`, finding itself in `global`.
pub fn fib_graph(global: u32) -> Graph {
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
    let two = b.constant(JsValue::Int32(2));
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
    b.build().expect("build should succeed")
}

/// `(base, i) => base[i]`
pub fn get_by_val_graph(mode: ArrayMode) -> Graph {
    let mut b = GraphBuilder::new("get_by_val").parameters(2);
    let base = b.get_local(Operand::Argument(1));
    let index = b.get_local(Operand::Argument(2));
    let value = b.add(NodeOp::GetByVal(mode), &[Edge::cell(base), Edge::int32(index)]);
    b.ret(value);
    b.build().expect("build should succeed")
}

/// `(base, i, v) => { base[i] = v }`
pub fn put_by_val_graph(mode: ArrayMode) -> Graph {
    let mut b = GraphBuilder::new("put_by_val").parameters(3);
    let base = b.get_local(Operand::Argument(1));
    let index = b.get_local(Operand::Argument(2));
    let value = b.get_local(Operand::Argument(3));
    b.add(
        NodeOp::PutByVal(mode),
        &[Edge::cell(base), Edge::int32(index), Edge::untyped(value)],
    );
    let undefined = b.constant(JsValue::Undefined);
    b.ret(undefined);
    b.build().expect("build should succeed")
}
