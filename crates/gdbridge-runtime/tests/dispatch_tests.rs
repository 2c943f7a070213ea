//! End-to-end virtual dispatch through a bridge backed by the mock engine.

use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;

use gdbridge_runtime::{
    Bridge, BridgeConfig, ClassRegistry, ClassRegistryBuilder, DispatchOutcome, Handle,
    InitLevel, InstanceCell, StringKind,
};
use gdbridge_sdk::{
    BridgeError, EngineInterface, InstanceId, RawObject, RawString, Variant, Wire, Word,
};
use gdbridge_test::MockEngine;

// ============================================================================
// Fixture classes
// ============================================================================

#[derive(Default)]
struct Enemy {
    health: i64,
    ticks: u32,
}

fn enemy(_object: RawObject) -> Box<dyn Any> {
    Box::new(Enemy {
        health: 100,
        ticks: 0,
    })
}

fn damage(e: &mut Enemy, (amount,): (i64,)) -> i64 {
    e.health -= amount;
    e.health
}

fn process(e: &mut Enemy, (_delta,): (f64,)) {
    e.ticks += 1;
}

fn health_variant(e: &mut Enemy, _args: ()) -> Variant {
    Variant::Int(e.health)
}

fn self_ref(_e: &mut Enemy, (id, ptr): (InstanceId, RawObject)) -> Variant {
    Variant::object(id, ptr)
}

fn title(_e: &mut Enemy, (prefix,): (String,)) -> String {
    format!("{} Enemy", prefix)
}

fn owned_label(_e: &mut Enemy, (label,): (Handle<StringKind>,)) -> Handle<StringKind> {
    label
}

fn crash(_e: &mut Enemy, _args: ()) -> Variant {
    panic!("enemy logic failed")
}

fn classes() -> ClassRegistryBuilder {
    let mut builder = ClassRegistry::builder();
    builder.engine_class("Object", None).unwrap();
    builder
        .engine_class("Node", Some("Object"))
        .unwrap()
        .declare_virtual("_process", &[1], 0)
        .declare_virtual("_to_string", &[], 3);
    builder
        .engine_class("Node2D", Some("Node"))
        .unwrap()
        .declare_virtual("_draw", &[], 0);
    builder
        .register("Enemy", "Node2D", enemy)
        .unwrap()
        .virtual_fn("damage", damage)
        .virtual_fn("_process", process)
        .virtual_fn("health_variant", health_variant)
        .virtual_fn("self_ref", self_ref)
        .virtual_fn("title", title)
        .virtual_fn("owned_label", owned_label)
        .virtual_fn("crash", crash);
    builder.register("Boss", "Enemy", enemy).unwrap();
    builder.register("FinalBoss", "Boss", enemy).unwrap();
    builder
}

fn ready_bridge() -> (Arc<MockEngine>, Bridge) {
    let engine = MockEngine::shared();
    let bridge = Bridge::new(engine.clone(), classes(), BridgeConfig::default()).unwrap();
    bridge.initialize(InitLevel::Core);
    bridge.initialize(InitLevel::Servers);
    bridge.initialize(InitLevel::Scene);
    (engine, bridge)
}

fn spawn(engine: &MockEngine, bridge: &Bridge, class: &str) -> (RawObject, *mut InstanceCell) {
    let object = bridge.create_instance(class).unwrap();
    let (_, instance) = engine.instance_of(object).unwrap();
    (object, instance as *mut InstanceCell)
}

fn call(
    bridge: &Bridge,
    instance: *mut InstanceCell,
    method: &str,
    args: &[&[Word]],
    ret: &mut [Word],
) -> DispatchOutcome {
    let pointers: Vec<*const c_void> = args.iter().map(|a| a.as_ptr() as *const c_void).collect();
    unsafe {
        bridge.call_virtual(
            instance,
            method,
            pointers.as_ptr(),
            ret.as_mut_ptr() as *mut c_void,
        )
    }
}

// ============================================================================
// Variant back-buffer
// ============================================================================

#[test]
fn test_variant_override_writes_tagged_words() {
    let (engine, bridge) = ready_bridge();
    let (object, instance) = spawn(&engine, &bridge, "Enemy");
    let id = engine.instance_id(object);

    let mut ret = [0xFFFF_FFFF_FFFF_FFFF as Word; 3];
    let outcome = call(&bridge, instance, "self_ref", &[&[id.0], &object.words()], &mut ret);
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(ret, [24, id.0, object.words()[0]]);

    let outcome = call(&bridge, instance, "health_variant", &[], &mut ret);
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(ret, [2, 100, 0]);
    assert_eq!(Variant::from_slot(ret), Variant::Int(100));

    unsafe { bridge.free_instance(instance) };
}

#[test]
fn test_string_argument_and_return() {
    let (engine, bridge) = ready_bridge();
    let (_, instance) = spawn(&engine, &bridge, "Enemy");
    let prefix = engine.string_new("Elite");

    let mut ret = [0 as Word; 2];
    let outcome = call(&bridge, instance, "title", &[&prefix.words()], &mut ret);
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(
        engine.string(RawString::from_words(ret)).as_deref(),
        Some("Elite Enemy")
    );
    // The argument stays engine-owned; only the returned string is new.
    assert_eq!(engine.release_count(), 0);
    assert_eq!(engine.live_strings(), 2);
    unsafe { bridge.free_instance(instance) };
}

#[test]
fn test_returned_handle_is_not_released() {
    let (engine, bridge) = ready_bridge();
    let (_, instance) = spawn(&engine, &bridge, "Enemy");
    let label = engine.string_new("label");

    let mut ret = [0 as Word; 2];
    let outcome = call(&bridge, instance, "owned_label", &[&label.words()], &mut ret);
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(ret, label.words());
    assert_eq!(engine.release_count(), 0);
    bridge.with_registry(|registry| assert_eq!(registry.live_count(), 0));
    unsafe { bridge.free_instance(instance) };
}

// ============================================================================
// Ancestor fallback
// ============================================================================

#[test]
fn test_inherited_override_and_engine_defaults() {
    let (engine, bridge) = ready_bridge();
    let (_, instance) = spawn(&engine, &bridge, "FinalBoss");

    let mut ret = [0 as Word; 1];
    let outcome = call(&bridge, instance, "damage", &[&[30]], &mut ret);
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(ret, [70]);

    let delta = 0.016f64.to_bits();
    assert_eq!(
        call(&bridge, instance, "_process", &[&[delta]], &mut []),
        DispatchOutcome::Handled
    );
    assert_eq!(call(&bridge, instance, "_draw", &[], &mut []), DispatchOutcome::Defaulted);

    let mut ret = [9 as Word; 3];
    assert_eq!(
        call(&bridge, instance, "_to_string", &[], &mut ret),
        DispatchOutcome::Defaulted
    );
    assert_eq!(ret, [0, 0, 0]);

    let mut ret = [9 as Word; 3];
    assert_eq!(
        call(&bridge, instance, "_input", &[], &mut ret),
        DispatchOutcome::Unimplemented
    );
    assert_eq!(ret, [9, 9, 9]);

    let cell = unsafe { &*instance };
    let data = cell.data::<Enemy>().unwrap();
    assert_eq!((data.health, data.ticks), (70, 1));
    unsafe { bridge.free_instance(instance) };
}

#[test]
fn test_fallback_bounded_by_configured_depth() {
    let engine = MockEngine::shared();
    let config = BridgeConfig {
        max_fallback_depth: 1,
        ..BridgeConfig::default()
    };
    let bridge = Bridge::new(engine.clone(), classes(), config).unwrap();
    bridge.initialize(InitLevel::Scene);
    let (_, instance) = spawn(&engine, &bridge, "FinalBoss");

    // FinalBoss -> Boss is as far as the walk goes; Enemy is out of reach.
    let mut ret = [5 as Word; 1];
    assert_eq!(
        call(&bridge, instance, "damage", &[&[1]], &mut ret),
        DispatchOutcome::Unimplemented
    );
    assert_eq!(ret, [5]);
    assert!(!bridge.has_virtual("FinalBoss", "damage"));
    unsafe { bridge.free_instance(instance) };
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_panic_is_reported_and_bridge_stays_usable() {
    let (engine, bridge) = ready_bridge();
    let (_, instance) = spawn(&engine, &bridge, "Boss");

    let mut ret = [7 as Word; 3];
    let outcome = call(&bridge, instance, "crash", &[], &mut ret);
    assert_eq!(
        outcome,
        DispatchOutcome::Failed(BridgeError::Panic("enemy logic failed".into()))
    );
    assert_eq!(ret, [0, 0, 0]);
    assert_eq!(engine.errors().len(), 1);

    let mut ret = [0 as Word; 1];
    assert_eq!(
        call(&bridge, instance, "damage", &[&[1]], &mut ret),
        DispatchOutcome::Handled
    );
    assert_eq!(ret, [99]);
    unsafe { bridge.free_instance(instance) };
}

#[test]
fn test_unknown_class_and_uninitialized_bridge() {
    let engine = MockEngine::shared();
    let bridge = Bridge::new(engine.clone(), classes(), BridgeConfig::default()).unwrap();
    assert_eq!(bridge.create_instance("Enemy"), Err(BridgeError::NotInitialized));
    bridge.initialize(InitLevel::Editor);
    assert_eq!(
        bridge.create_instance("Ghost"),
        Err(BridgeError::UnknownClass("Ghost".into()))
    );
}
