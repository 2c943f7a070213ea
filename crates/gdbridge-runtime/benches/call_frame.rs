use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gdbridge_runtime::{
    CallFrame, EncodedArg, HandleRegistry, Invoker, MethodSpec, MethodTable, ObjectKind,
};
use gdbridge_sdk::{Variant, Vector2, Wire, Word};
use gdbridge_test::MockEngine;

fn bench_frame_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    group.bench_function("scalars", |b| {
        b.iter(|| {
            let mut frame = CallFrame::<i64>::for_args::<(i64, f64, bool)>();
            frame.push_arg(black_box(42i64));
            frame.push_arg(black_box(1.5f64));
            frame.push_arg(black_box(true));
            let (pointers, ret) = frame.pointers();
            black_box((pointers.len(), ret));
            frame.read_ret()
        });
    });

    group.bench_function("variant_args", |b| {
        let value = Variant::Vector2(Vector2 { x: 1.0, y: 2.0 });
        b.iter(|| {
            let mut frame = CallFrame::<Variant>::for_args::<(Variant, Variant)>();
            frame.push_arg(black_box(value));
            frame.push_arg(black_box(Variant::Int(7)));
            let (pointers, _) = frame.pointers();
            black_box(pointers.len());
            frame.read_ret()
        });
    });

    group.bench_function("variant_slot", |b| {
        b.iter(|| {
            let slot = black_box(Variant::Float(0.25)).to_slot();
            Variant::from_slot(black_box(slot))
        });
    });

    group.finish();
}

fn bench_invoke(c: &mut Criterion) {
    const SCALE: MethodSpec = MethodSpec::new("Node", "scale", 1, &[1, 1], 1);

    let engine = MockEngine::shared();
    engine.define_method("Node", "scale", 1, &[1, 1], 1, |call| {
        vec![(f64::from_bits(call.word(0)) * call.word(1) as f64).to_bits()]
    });
    let (object, _) = engine.spawn_object("Node");
    let registry = HandleRegistry::new(engine.clone());
    let table = MethodTable::resolve(engine.as_ref(), &[SCALE]).unwrap();
    let slot = table.slot("Node", "scale").unwrap();
    let invoker = Invoker::new(&registry, &table);
    let receiver = registry.borrow::<ObjectKind>(object);

    let mut group = c.benchmark_group("invoke");
    group.bench_function("typed", |b| {
        b.iter(|| {
            let out: f64 = invoker
                .call(slot, &receiver, (black_box(2.0f64), black_box(3i64)))
                .unwrap();
            out
        });
    });

    for count in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::new("dynamic", count), &count, |b, &count| {
            let args = [EncodedArg::new(2.0f64), EncodedArg::new(3i64)];
            b.iter(|| {
                for _ in 0..count {
                    let out = invoker.invoke(slot, Some(&receiver), black_box(&args)).unwrap();
                    black_box(out.words()[0] as Word);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_frame_encoding, bench_invoke);
criterion_main!(benches);
