//! Independent VMs compiling and running on separate threads

#[macro_use]
mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use otter_dfg_graph::JsValue;
use otter_dfg_jit::{CompiledUnit, ExitKind, Split, Unified, ValueRepresentation};

const THREADS: usize = 4;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn compiled_units_are_shareable() {
    assert_send_sync::<CompiledUnit>();
    assert_send_sync::<Arc<CompiledUnit>>();
}

/// Compile and run fib plus an overflowing add; returns the fib result.
fn run_worker<R: ValueRepresentation>(seed: i32) -> (JsValue, Vec<ExitKind>, u64) {
    let mut vm = jit_vm::<R>();
    let (fib, unit) = compiled(&mut vm, fib_graph(0));
    vm.set_global(0, fib).expect("global should exist");
    let result = call(&mut vm, fib, &[JsValue::Int32(20)]);
    assert!(!unit.is_invalidated());

    let (add, _) = compiled(&mut vm, int32_add_graph());
    assert_eq!(
        call(&mut vm, add, &[JsValue::Int32(seed), JsValue::Int32(1)]),
        JsValue::Int32(seed + 1)
    );
    call(&mut vm, add, &[JsValue::Int32(i32::MAX), JsValue::Int32(seed)]);
    (result, exit_kinds(&mut vm), vm.stats().compiles)
}

fn spawn_workers<R: ValueRepresentation>(barrier: Arc<Barrier>, offset: usize) -> Vec<thread::JoinHandle<(JsValue, Vec<ExitKind>, u64)>> {
    (0..THREADS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                run_worker::<R>((offset + i) as i32 + 1)
            })
        })
        .collect()
}

#[test]
fn independent_units_compile_concurrently() {
    let barrier = Arc::new(Barrier::new(THREADS * 2));
    let mut handles = spawn_workers::<Unified>(Arc::clone(&barrier), 0);
    handles.extend(spawn_workers::<Split>(barrier, THREADS));

    for handle in handles {
        let (fib, exits, compiles) = handle.join().expect("worker should not panic");
        assert_eq!(fib, JsValue::Int32(6765));
        assert_eq!(exits, vec![ExitKind::Overflow]);
        assert_eq!(compiles, 2);
    }
}

#[test]
fn units_from_parallel_compilers_get_their_own_ids() {
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            thread::spawn(|| {
                let mut vm = jit_vm::<Unified>();
                let ids: Vec<u64> = (0..3)
                    .map(|_| compiled(&mut vm, int32_add_graph()).1.id())
                    .collect();
                ids
            })
        })
        .collect();

    for handle in handles {
        let ids = handle.join().expect("worker should not panic");
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "{ids:?}");
    }
}
