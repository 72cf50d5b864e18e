//! Criterion benchmarks for the exchange layer's hot paths.
//!
//! The dispatch loop calls [`ExchangeDriver::on_byte_received`] once per
//! received byte, and every call fans the resulting event out to all
//! subscribers, so both paths sit directly on the per-byte delivery budget.
//!
//! Run with:
//! ```bash
//! cargo bench --package bytelink-core --bench exchange_bench
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use bytelink_core::{EventBus, ExchangeDriver, LinkAddr, LinkEvent, Subscription};

fn bench_addr() -> LinkAddr {
    LinkAddr::new(
        "127.0.0.1:4444".parse().unwrap(),
        "127.0.0.1:50000".parse().unwrap(),
    )
}

/// Drains a subscription so queued events do not accumulate across iterations.
fn drain(rx: &mut Subscription) {
    while rx.try_recv().is_ok() {}
}

// ── Event bus fan-out ─────────────────────────────────────────────────────────

fn bench_bus_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus_publish");

    for subscribers in [1usize, 4, 16] {
        let bus = EventBus::new();
        let mut receivers: Vec<Subscription> = (0..subscribers).map(|_| bus.subscribe()).collect();
        let event = LinkEvent::DataReceived {
            data: vec![0xAB],
            link: bench_addr(),
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    bus.publish(black_box(event.clone()));
                    for rx in &mut receivers {
                        drain(rx);
                    }
                });
            },
        );
    }

    group.finish();
}

// ── Driver byte dispatch ──────────────────────────────────────────────────────

fn bench_driver_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("driver_dispatch");

    for trace in [false, true] {
        let (writer, _reader) = tokio::io::duplex(64);
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let driver = ExchangeDriver::new(
            writer,
            bench_addr(),
            Arc::clone(&bus),
            Arc::new(AtomicBool::new(trace)),
        );

        let name = if trace { "traced" } else { "untraced" };
        group.bench_function(name, |b| {
            b.iter(|| {
                driver.on_byte_received(black_box(0x42));
                drain(&mut rx);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_bus_publish, bench_driver_dispatch);
criterion_main!(benches);
