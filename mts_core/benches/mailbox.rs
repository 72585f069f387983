//! Mailbox and invocation path benchmarks
//!
//! Run with: cargo bench --bench mailbox

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mts_core::command::{Command, CommandWrite, Invocation, QueuedCommand};
use mts_core::proxy::codec;
use mts_core::{DrainPolicy, ExecutionResult, Mailbox};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BATCH_SIZES: &[usize] = &[1, 16, 64];

/// Enqueue a batch through a queued Write command, then drain it
fn bench_queued_write_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("queued_write_drain");

    for &batch in BATCH_SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let mailbox = Arc::new(Mailbox::new("bench", batch));
            let sum = Arc::new(AtomicU64::new(0));
            let sink = sum.clone();
            let inner: Arc<dyn Command> = Arc::new(CommandWrite::new("Add", "bench", move |v: &u64| {
                sink.fetch_add(*v, Ordering::Relaxed);
            }));
            let queued = QueuedCommand::new(inner, mailbox.clone(), Duration::from_millis(10));
            let value = 3u64;

            b.iter(|| {
                for _ in 0..batch {
                    let result = queued.execute(Invocation::Write(black_box(&value)));
                    debug_assert_eq!(result, ExecutionResult::Queued);
                }
                black_box(mailbox.drain(DrainPolicy::AllQueued));
            });
        });
    }

    group.finish();
}

/// Direct (same-thread) Write for comparison
fn bench_direct_write(c: &mut Criterion) {
    let sum = Arc::new(AtomicU64::new(0));
    let sink = sum.clone();
    let command = CommandWrite::new("Add", "bench", move |v: &u64| {
        sink.fetch_add(*v, Ordering::Relaxed);
    });
    let value = 3u64;
    c.bench_function("direct_write", |b| {
        b.iter(|| black_box(command.execute(Invocation::Write(black_box(&value)))));
    });
}

/// Type-tagged argument encoding used on the proxy path
fn bench_codec(c: &mut Criterion) {
    let pose = vec![0.25f64; 7];
    c.bench_function("codec_encode_decode_pose", |b| {
        b.iter(|| {
            let bytes = codec::encode(black_box(&pose)).unwrap();
            black_box(codec::decode::<Vec<f64>>(&bytes).unwrap())
        });
    });
}

criterion_group!(benches, bench_queued_write_drain, bench_direct_write, bench_codec);
criterion_main!(benches);
