//! Benchmarks for mediabridge-core event paths
//!
//! Run with: cargo bench -p mediabridge-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mediabridge_core::{
    Event, EventBridge, EventKind, RawHandle, Settlement, SimulatedEngine, StateProjector, UnitOfWork,
};

// ============================================================================
// Event Bridge
// ============================================================================

fn bench_dispatch_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_fan_out");

    for handlers in [1usize, 4, 16, 64] {
        let bridge = EventBridge::new(Arc::new(SimulatedEngine::new()));
        let hits = Arc::new(AtomicU64::new(0));
        for _ in 0..handlers {
            let hits = hits.clone();
            bridge
                .subscribe(RawHandle(1), EventKind::PlayerTimeChanged, move |_| {
                    hits.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
        let event = Event::TimeChanged { time_ms: 1_000 };

        group.bench_with_input(BenchmarkId::from_parameter(handlers), &handlers, |b, _| {
            b.iter(|| bridge.dispatch(black_box(RawHandle(1)), EventKind::PlayerTimeChanged, &event))
        });
    }
    group.finish();
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let bridge = EventBridge::new(Arc::new(SimulatedEngine::new()));
    // Keep the native callback registered so only the handler list changes
    let _anchor = bridge.subscribe(RawHandle(7), EventKind::PlayerBuffering, |_| {}).unwrap();

    c.bench_function("subscribe_unsubscribe", |b| {
        b.iter(|| {
            let sub = bridge
                .subscribe(RawHandle(7), EventKind::PlayerBuffering, |_| {})
                .unwrap();
            black_box(bridge.unsubscribe(&sub))
        })
    });
}

fn bench_native_round_trip(c: &mut Criterion) {
    let engine = SimulatedEngine::new();
    let bridge = EventBridge::new(Arc::new(engine.clone()));
    bridge.subscribe(RawHandle(3), EventKind::PlayerPositionChanged, |_| {}).unwrap();

    c.bench_function("native_fire_to_handler", |b| {
        b.iter(|| engine.fire(RawHandle(3), Event::PositionChanged { position: black_box(0.5) }))
    });
}

// ============================================================================
// Settlement and Projection
// ============================================================================

fn bench_settlement(c: &mut Criterion) {
    c.bench_function("settle_once", |b| {
        b.iter(|| {
            let slot = Settlement::new();
            black_box(slot.try_settle(1u32));
            black_box(slot.try_settle(2u32))
        })
    });
}

fn bench_projector_event(c: &mut Criterion) {
    let engine = Arc::new(SimulatedEngine::new());
    let projector = StateProjector::builder(engine.clone())
        .scheduler(|work: UnitOfWork| work())
        .build()
        .unwrap();
    projector.observe(|property| {
        black_box(property);
    });
    let player = projector.session().handle().raw();

    c.bench_function("projector_buffering_event", |b| {
        b.iter(|| engine.fire(player, Event::Buffering { cache: black_box(50.0) }))
    });
}

criterion_group!(
    benches,
    bench_dispatch_fan_out,
    bench_subscribe_unsubscribe,
    bench_native_round_trip,
    bench_settlement,
    bench_projector_event,
);
criterion_main!(benches);
