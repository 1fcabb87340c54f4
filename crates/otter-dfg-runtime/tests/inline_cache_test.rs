//! Named property caches: repatching, transitions and megamorphic sites

#[macro_use]
mod common;

use common::*;
use otter_dfg_graph::{
    ArithMode, Edge, Graph, GraphBuilder, Identifier, JsValue, NodeOp, Operand, PropertyOffset,
};
use otter_dfg_jit::inline_cache::MEGAMORPHIC_MISS_LIMIT;
use otter_dfg_jit::layout::PropertyStorage;
use otter_dfg_jit::{AccessKind, ValueRepresentation};
use otter_dfg_runtime::Vm;

encoding_tests!(
    test_monomorphic_get_repatches_once,
    test_out_of_line_slots_are_cached,
    test_prototype_reads_are_not_cached,
    test_polymorphic_site_goes_megamorphic,
    test_replacing_put_is_cached,
    test_direct_put_caches_the_transition,
    test_read_only_put_is_ignored_and_not_cached,
    test_sites_record_whether_registers_need_spilling,
    test_put_by_offset_checks_the_owner_before_storing,
);

/// `(o) => o[name]`
fn get_by_id_graph(name: Identifier) -> Graph {
    let mut b = GraphBuilder::new("get_by_id").parameters(1);
    let base = b.get_local(Operand::Argument(1));
    let value = b.add(NodeOp::GetById(name), &[Edge::cell(base)]);
    b.ret(value);
    b.build().expect("build should succeed")
}

/// `(o, v) => { o[name] = v }`, as an assignment or a definition.
fn put_by_id_graph(name: Identifier, direct: bool) -> Graph {
    let mut b = GraphBuilder::new("put_by_id").parameters(2);
    let base = b.get_local(Operand::Argument(1));
    let value = b.get_local(Operand::Argument(2));
    let op = if direct {
        NodeOp::PutByIdDirect(name)
    } else {
        NodeOp::PutById(name)
    };
    b.add(op, &[Edge::cell(base), Edge::untyped(value)]);
    let undefined = b.constant(JsValue::Undefined);
    b.ret(undefined);
    b.build().expect("build should succeed")
}

fn object_with<R: ValueRepresentation>(vm: &mut Vm<R>, properties: &[(&str, JsValue)]) -> JsValue {
    let object = vm.new_object().expect("allocation should succeed");
    for (name, value) in properties {
        vm.set(object, name, *value).expect("put should succeed");
    }
    object
}

fn test_monomorphic_get_repatches_once<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let x = vm.identifier("x");
    let (get_x, unit) = compiled(&mut vm, get_by_id_graph(x));
    let record = unit.inline_caches()[0].clone();
    assert_eq!(record.kind, AccessKind::Get);
    assert_eq!(record.identifier, x);
    let entry = unit.cache_entry(record.entry_index).expect("site should have an entry");
    assert!(entry.cached().is_none());

    let objects: Vec<JsValue> = (0..5)
        .map(|i| object_with(&mut vm, &[("x", JsValue::Int32(i)), ("y", JsValue::Null)]))
        .collect();
    for (i, object) in objects.iter().enumerate() {
        assert_eq!(call(&mut vm, get_x, &[*object]), JsValue::Int32(i as i32));
    }
    assert_eq!(vm.stats().ic_repatches, 1);
    assert_eq!(entry.miss_count(), 1);
    let cached = entry.cached().expect("site should be patched");
    assert_eq!(Some(cached.structure), vm.structure_id(objects[0]));
    assert_eq!(cached.new_structure, None);
    assert_eq!(cached.storage, PropertyStorage::Inline);

    // The fast path agrees with the runtime after the value changes.
    vm.set(objects[2], "x", JsValue::Double(0.5)).expect("put should succeed");
    assert_eq!(call(&mut vm, get_x, &[objects[2]]), JsValue::Double(0.5));
    assert_eq!(vm.get(objects[2], "x").expect("get should succeed"), JsValue::Double(0.5));
    assert_eq!(vm.stats().ic_repatches, 1);
    assert!(vm.exit_log().is_empty());
}

fn test_out_of_line_slots_are_cached<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let x = vm.identifier("x");
    let (get_x, unit) = compiled(&mut vm, get_by_id_graph(x));
    let filler = ["a", "b", "c", "d", "e", "f"];
    let make = |vm: &mut Vm<R>, value: i32| {
        let mut properties: Vec<(&str, JsValue)> = filler.iter().map(|n| (*n, JsValue::Undefined)).collect();
        properties.push(("x", JsValue::Int32(value)));
        object_with(vm, &properties)
    };
    let first = make(&mut vm, 1);
    let second = make(&mut vm, 2);
    assert_eq!(vm.structure_id(first), vm.structure_id(second));

    assert_eq!(call(&mut vm, get_x, &[first]), JsValue::Int32(1));
    assert_eq!(call(&mut vm, get_x, &[second]), JsValue::Int32(2));
    let entry = unit.cache_entry(0).expect("site should have an entry");
    let cached = entry.cached().expect("site should be patched");
    assert_eq!(cached.storage, PropertyStorage::OutOfLine);
    assert_eq!(entry.miss_count(), 1);
}

fn test_prototype_reads_are_not_cached<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let x = vm.identifier("x");
    let (get_x, unit) = compiled(&mut vm, get_by_id_graph(x));
    let prototype = object_with(&mut vm, &[("x", JsValue::Int32(5))]);
    let object = vm
        .new_object_with_prototype(prototype)
        .expect("allocation should succeed");

    for _ in 0..3 {
        assert_eq!(call(&mut vm, get_x, &[object]), JsValue::Int32(5));
    }
    let entry = unit.cache_entry(0).expect("site should have an entry");
    assert!(entry.cached().is_none());
    assert_eq!(entry.miss_count(), 3);
    assert_eq!(vm.stats().ic_repatches, 0);

    // Missing everywhere reads undefined.
    let bare = vm.new_object().expect("allocation should succeed");
    assert_eq!(call(&mut vm, get_x, &[bare]), JsValue::Undefined);
}

fn test_polymorphic_site_goes_megamorphic<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let x = vm.identifier("x");
    let (get_x, unit) = compiled(&mut vm, get_by_id_graph(x));
    let names: Vec<String> = (0..10).map(|i| format!("pad{i}")).collect();

    // Object i has i padding properties before `x`; the later ones keep it out of line.
    let objects: Vec<JsValue> = (0..10)
        .map(|i| {
            let mut properties: Vec<(&str, JsValue)> =
                names[..i].iter().map(|n| (n.as_str(), JsValue::Int32(-1))).collect();
            properties.push(("x", JsValue::Int32(i as i32 * 10)));
            object_with(&mut vm, &properties)
        })
        .collect();

    for (i, object) in objects.iter().enumerate() {
        assert_eq!(call(&mut vm, get_x, &[*object]), JsValue::Int32(i as i32 * 10));
    }
    let entry = unit.cache_entry(0).expect("site should have an entry");
    assert!(entry.is_megamorphic());
    assert!(entry.cached().is_none());
    assert_eq!(entry.miss_count(), MEGAMORPHIC_MISS_LIMIT);
    assert_eq!(vm.stats().ic_repatches, u64::from(MEGAMORPHIC_MISS_LIMIT) - 1);
    assert_eq!(vm.stats().megamorphic_sites, 1);

    // Every later access takes the generic path and stays correct.
    for (i, object) in objects.iter().enumerate().rev() {
        assert_eq!(call(&mut vm, get_x, &[*object]), JsValue::Int32(i as i32 * 10));
    }
    assert_eq!(vm.stats().ic_repatches, u64::from(MEGAMORPHIC_MISS_LIMIT) - 1);
    assert_eq!(vm.stats().megamorphic_sites, 1);
    assert!(vm.exit_log().is_empty());
}

fn test_replacing_put_is_cached<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let x = vm.identifier("x");
    let (set_x, unit) = compiled(&mut vm, put_by_id_graph(x, false));
    assert_eq!(unit.inline_caches()[0].kind, AccessKind::Put);
    let first = object_with(&mut vm, &[("x", JsValue::Int32(0))]);
    let second = object_with(&mut vm, &[("x", JsValue::Int32(0))]);
    let structure = vm.structure_id(first);

    call(&mut vm, set_x, &[first, JsValue::Int32(1)]);
    let string = vm.new_string("two").expect("allocation should succeed");
    call(&mut vm, set_x, &[second, string]);
    assert_eq!(vm.stats().ic_repatches, 1);
    assert_eq!(vm.structure_id(second), structure);
    assert_eq!(vm.get(first, "x").expect("get should succeed"), JsValue::Int32(1));
    let stored = vm.get(second, "x").expect("get should succeed");
    assert_eq!(vm.string_value(stored).as_deref(), Some("two"));

    // Adding the property is a transition, which assignments do not cache.
    let empty = vm.new_object().expect("allocation should succeed");
    call(&mut vm, set_x, &[empty, JsValue::Boolean(false)]);
    assert_eq!(vm.get(empty, "x").expect("get should succeed"), JsValue::Boolean(false));
    assert_eq!(vm.stats().ic_repatches, 1);
}

fn test_direct_put_caches_the_transition<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let z = vm.identifier("z");
    let (define_z, unit) = compiled(&mut vm, put_by_id_graph(z, true));
    assert_eq!(unit.inline_caches()[0].kind, AccessKind::PutDirect);

    let first = vm.new_object().expect("allocation should succeed");
    let empty_structure = vm.structure_id(first);
    call(&mut vm, define_z, &[first, JsValue::Int32(1)]);
    let with_z = vm.structure_id(first);
    assert_ne!(with_z, empty_structure);

    let entry = unit.cache_entry(0).expect("site should have an entry");
    let cached = entry.cached().expect("transition should be cached");
    assert_eq!(Some(cached.structure), empty_structure);
    assert_eq!(cached.new_structure, with_z);
    assert_eq!(vm.stats().ic_repatches, 1);

    let others: Vec<JsValue> = (0..4)
        .map(|_| vm.new_object().expect("allocation should succeed"))
        .collect();
    for (i, object) in others.iter().enumerate() {
        call(&mut vm, define_z, &[*object, JsValue::Int32(i as i32 + 2)]);
        assert_eq!(vm.structure_id(*object), with_z);
        assert_eq!(vm.get(*object, "z").expect("get should succeed"), JsValue::Int32(i as i32 + 2));
    }
    assert_eq!(vm.stats().ic_repatches, 1);
    assert_eq!(entry.miss_count(), 1);
}

fn test_read_only_put_is_ignored_and_not_cached<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let r = vm.identifier("r");
    let (set_r, unit) = compiled(&mut vm, put_by_id_graph(r, false));
    let object = vm.new_object().expect("allocation should succeed");
    vm.define_property(object, "r", JsValue::Int32(1), true)
        .expect("definition should succeed");

    for value in [2, 3] {
        call(&mut vm, set_r, &[object, JsValue::Int32(value)]);
        assert_eq!(vm.get(object, "r").expect("get should succeed"), JsValue::Int32(1));
    }
    let entry = unit.cache_entry(0).expect("site should have an entry");
    assert!(entry.cached().is_none());
    assert_eq!(entry.miss_count(), 2);
    assert_eq!(vm.stats().ic_repatches, 0);
}

fn test_sites_record_whether_registers_need_spilling<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let x = vm.identifier("x");

    // (o, a) => { let d = a * a; return d + o.x }, with `d` live in a register across the access.
    let mut b = GraphBuilder::new("live_double").parameters(2);
    let o = b.get_local(Operand::Argument(1));
    let a = b.get_local(Operand::Argument(2));
    let d = b.add(
        NodeOp::ArithMul(ArithMode::CheckOverflow),
        &[Edge::number(a), Edge::number(a)],
    );
    let value = b.add(NodeOp::GetById(x), &[Edge::cell(o)]);
    let sum = b.add(
        NodeOp::ArithAdd(ArithMode::CheckOverflow),
        &[Edge::number(d), Edge::number(value)],
    );
    b.ret(sum);
    let (live_double, unit) = compiled(&mut vm, b.build().expect("build should succeed"));
    assert!(!unit.inline_caches()[0].registers_flushed);

    let object = object_with(&mut vm, &[("x", JsValue::Int32(2))]);
    for _ in 0..2 {
        assert_eq!(
            call(&mut vm, live_double, &[object, JsValue::Double(1.5)]),
            JsValue::Double(4.25)
        );
    }
    assert_eq!(vm.stats().ic_repatches, 1);

    // A constant base is rematerialized, so nothing needs saving.
    let mut b = GraphBuilder::new("constant_base");
    let base = b.constant(object);
    let value = b.add(NodeOp::GetById(x), &[Edge::cell(base)]);
    b.ret(value);
    let (constant_base, unit) = compiled(&mut vm, b.build().expect("build should succeed"));
    assert!(unit.inline_caches()[0].registers_flushed);
    assert_eq!(call(&mut vm, constant_base, &[]), JsValue::Int32(2));
}

fn test_put_by_offset_checks_the_owner_before_storing<R: ValueRepresentation>() {
    let mut vm = jit_vm::<R>();
    let e = vm.identifier("e");
    let properties: Vec<(&str, JsValue)> = ["a", "b", "c", "d", "e"]
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, JsValue::Int32(i as i32)))
        .collect();
    let holder = object_with(&mut vm, &properties);

    // (storage_of, owner, v) => owner.e = v, storing through the first object's butterfly.
    let mut b = GraphBuilder::new("put_out_of_line").parameters(3);
    let storage_of = b.get_local(Operand::Argument(1));
    let owner = b.get_local(Operand::Argument(2));
    let value = b.get_local(Operand::Argument(3));
    let storage = b.add(NodeOp::GetButterfly, &[Edge::cell(storage_of)]);
    b.add(
        NodeOp::PutByOffset {
            identifier: e,
            offset: PropertyOffset(4),
        },
        &[Edge::untyped(storage), Edge::cell(owner), Edge::untyped(value)],
    );
    let undefined = b.constant(JsValue::Undefined);
    b.ret(undefined);
    let (put, _) = compiled(&mut vm, b.build().expect("build should succeed"));

    call(&mut vm, put, &[holder, holder, JsValue::Int32(40)]);
    assert_eq!(vm.get(holder, "e").expect("get should succeed"), JsValue::Int32(40));

    // A non-cell owner leaves before anything is written.
    let result = vm.call(put, JsValue::Undefined, &[holder, JsValue::Int32(5), JsValue::Int32(99)]);
    assert!(result.is_err());
    assert_eq!(vm.get(holder, "e").expect("get should succeed"), JsValue::Int32(40));
}
