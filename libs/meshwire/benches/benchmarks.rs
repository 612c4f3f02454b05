//! Benchmarks for the meshwire library
//!
//! Run with: cargo bench -p meshwire

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use std::time::Duration;

use meshwire::core::connection_state::{AtomicConnectionState, ConnectionState};
use meshwire::core::queue::BoundedQueue;
use meshwire::core::retry::RetryPolicy;
use meshwire::metrics::{Registry, DEFAULT_LATENCY_BUCKETS};
use meshwire::protocol::{decode_message, encode_message, MessageRecovery, DEFAULT_MAX_FRAME_SIZE};
use meshwire::transport::{CompressionStream, DecompressionStream};
use meshwire::{CompressionAlgorithm, CompressionConfig, Message, Payload, ValidatorRegistry};

fn state_vector() -> Message {
    Message::new(
        "node-1",
        "hub",
        Payload::StateVector {
            amplitude: 0.5,
            phase: 1.0,
            energy: 0.25,
            coherence: 0.8,
        },
    )
}

fn pattern_update() -> Message {
    Message::new(
        "node-1",
        "hub",
        Payload::PatternUpdate {
            pattern_id: "pattern-42".into(),
            confidence: 0.9,
            weights: (0..256).map(|i| i as f64 / 256.0).collect(),
        },
    )
}

/// Benchmark atomic state operations
fn bench_atomic_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic_state");

    group.bench_function("get", |b| {
        let state = AtomicConnectionState::new(ConnectionState::Ready);
        b.iter(|| black_box(state.get()))
    });

    group.bench_function("is_connected", |b| {
        let state = AtomicConnectionState::new(ConnectionState::Ready);
        b.iter(|| black_box(state.is_connected()))
    });

    group.finish();
}

/// Benchmark the send queue without contention
fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("enqueue_dequeue", |b| {
        let queue = BoundedQueue::new(1024);
        b.iter(|| {
            queue.try_enqueue(black_box(42u64)).ok();
            black_box(queue.try_dequeue())
        })
    });

    group.finish();
}

/// Benchmark JSON encoding and decoding of message bodies
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for (name, message) in [("state_vector", state_vector()), ("pattern_update", pattern_update())] {
        let body = encode_message(&message).unwrap();
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", name), &message, |b, message| {
            b.iter(|| black_box(encode_message(message).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("decode", name), &body, |b, body| {
            b.iter(|| black_box(decode_message(body).unwrap()))
        });
    }

    group.finish();
}

/// Benchmark one compressed frame out and back in per algorithm
fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let body = encode_message(&pattern_update()).unwrap();
    group.throughput(Throughput::Bytes(body.len() as u64));

    for (algorithm, level) in [
        (CompressionAlgorithm::None, 0),
        (CompressionAlgorithm::Deflate, 6),
        (CompressionAlgorithm::Gzip, 6),
        (CompressionAlgorithm::Zstd, 3),
    ] {
        group.bench_function(BenchmarkId::new("frame", format!("{:?}", algorithm)), |b| {
            b.iter(|| {
                let mut writer =
                    CompressionStream::new(Vec::new(), CompressionConfig::new(algorithm, level), DEFAULT_MAX_FRAME_SIZE);
                writer.write(&body).unwrap();
                writer.finish().unwrap();
                let wire = writer.release();

                let mut reader = DecompressionStream::new(Cursor::new(wire), algorithm, DEFAULT_MAX_FRAME_SIZE);
                black_box(reader.next_frame().unwrap())
            })
        });
    }

    group.finish();
}

/// Benchmark validation and the repair path
fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");
    let validators = std::sync::Arc::new(ValidatorRegistry::standard());

    group.bench_function("validate_state_vector", |b| {
        let message = state_vector();
        b.iter(|| black_box(validators.validate(&message).is_ok()))
    });

    group.bench_function("repair_out_of_range", |b| {
        let mut recovery = MessageRecovery::new(std::sync::Arc::clone(&validators), 3);
        let mut message = state_vector();
        message.payload = Payload::StateVector {
            amplitude: 1.5,
            phase: 7.0,
            energy: 2.25,
            coherence: -0.1,
        };
        b.iter(|| black_box(recovery.process(message.clone()).is_ok()))
    });

    group.finish();
}

/// Benchmark backoff delay calculation
fn bench_retry(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry");

    group.bench_function("delay_for", |b| {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(30), 2.0).with_jitter(0.1);
        let mut attempt = 0u32;
        b.iter(|| {
            attempt = attempt % 10 + 1;
            black_box(policy.delay_for(attempt))
        })
    });

    group.finish();
}

/// Benchmark metric updates and text export
fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");
    let registry = Registry::new();
    let counter = registry.register_counter("bench_messages_total", "Messages").unwrap();
    let histogram = registry
        .register_histogram("bench_latency_seconds", "Latency", DEFAULT_LATENCY_BUCKETS)
        .unwrap();

    group.bench_function("counter_inc", |b| b.iter(|| counter.inc(black_box(1))));
    group.bench_function("histogram_observe", |b| b.iter(|| histogram.observe(black_box(0.0042))));
    group.bench_function("export", |b| b.iter(|| black_box(registry.export())));

    group.finish();
}

criterion_group!(
    benches,
    bench_atomic_state,
    bench_queue,
    bench_codec,
    bench_compression,
    bench_validation,
    bench_retry,
    bench_metrics,
);
criterion_main!(benches);
