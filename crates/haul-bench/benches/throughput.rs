//! Throughput benchmarks for Haul channels.
//!
//! These benchmarks measure how fast build notifications and relayed
//! messages fan out to in-memory connections.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use haul_core::{DebuggerRelay, LiveUpdateChannel};
use haul_protocol::{codec, LiveUpdateMessage, ModuleUpdate};
use haul_transport::memory::{self, MemoryPeer};
use std::time::{Duration, Instant};

fn update_message(modules: usize) -> LiveUpdateMessage {
    LiveUpdateMessage::Update {
        hash: "5f2c9a1d".to_string(),
        modules: (0..modules)
            .map(|i| ModuleUpdate::new(i.to_string(), format!("./src/components/Module{i}.js")))
            .collect(),
        errors: Vec::new(),
        warnings: Vec::new(),
    }
}

fn drain(peers: &mut [MemoryPeer]) {
    for peer in peers {
        peer.drain_texts();
    }
}

/// Benchmark live-update message encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for modules in [1, 50, 500] {
        let message = update_message(modules);
        let encoded = codec::encode(&message).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("update", modules), &message, |b, message| {
            b.iter(|| codec::encode(black_box(message)))
        });
    }

    group.bench_function("building", |b| {
        b.iter(|| codec::encode(black_box(&LiveUpdateMessage::building(true))))
    });

    group.finish();
}

/// Benchmark live-update fan-out.
fn bench_live_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_fanout");
    let message = update_message(10);

    for size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let channel = LiveUpdateChannel::new("hot");
            let mut peers: Vec<MemoryPeer> = (0..size)
                .map(|_| {
                    let (conn, peer) = memory::pair();
                    channel.add(conn.outbox());
                    peer
                })
                .collect();

            b.iter_custom(|iters| {
                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    channel.broadcast(black_box(&message)).unwrap();
                    elapsed += start.elapsed();
                    drain(&mut peers);
                }
                elapsed
            });
        });
    }

    group.finish();
}

/// Benchmark relay routing in both directions.
fn bench_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay");

    let relay = DebuggerRelay::new("debugger-proxy");
    let (debugger_conn, mut debugger) = memory::pair();
    relay.attach_debugger(debugger_conn.outbox()).unwrap();
    let mut clients: Vec<MemoryPeer> = (0..100)
        .map(|_| {
            let (conn, peer) = memory::pair();
            relay.join_client(conn.outbox());
            peer
        })
        .collect();
    debugger.drain_texts();

    let client_id = clients[0].id().clone();
    let debugger_id = debugger.id().clone();
    let from_client = r#"{"type":"console","payload":{"level":"log","data":["render"]}}"#;
    let addressed = serde_json::json!({
        "type": "evaluate",
        "payload": { "expression": "__DEV__" },
        "client": client_id.as_str(),
    })
    .to_string();
    let broadcast = r#"{"type":"resume","payload":null}"#;

    group.throughput(Throughput::Elements(1));
    group.bench_function("client_to_debugger", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                relay.from_client(black_box(&client_id), black_box(from_client));
            }
            let elapsed = start.elapsed();
            debugger.drain_texts();
            elapsed
        });
    });

    group.bench_function("debugger_to_client", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                relay.from_debugger(black_box(&debugger_id), black_box(&addressed));
            }
            let elapsed = start.elapsed();
            clients[0].drain_texts();
            elapsed
        });
    });

    group.throughput(Throughput::Elements(clients.len() as u64));
    group.bench_function("debugger_broadcast_100", |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::ZERO;
            for _ in 0..iters {
                let start = Instant::now();
                relay.from_debugger(black_box(&debugger_id), black_box(broadcast));
                elapsed += start.elapsed();
                drain(&mut clients);
            }
            elapsed
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_live_fanout, bench_relay);
criterion_main!(benches);
