//! Sample Decode Benchmarks
//!
//! The trampoline decodes every USB buffer on the driver's thread, so decode
//! throughput bounds the sustainable sample rate.
//!
//! Run with:
//!   cargo bench -p rtlsdr-bind --bench decode_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crossbeam::queue::SegQueue;
use rtlsdr_bind::sample::{decode, decode_to_vec};
use rtlsdr_bind::IqSample;

fn raw_buffer(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7) as u8).collect()
}

/// Decode into a vector, as a synchronous read does.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for bytes in [512usize, 16_384, 32_768, 262_144] {
        let raw = raw_buffer(bytes);
        group.throughput(Throughput::Elements((bytes / 2) as u64));

        group.bench_with_input(BenchmarkId::new("to_vec", bytes), &raw, |b, raw| {
            b.iter(|| decode_to_vec(black_box(raw)));
        });
    }

    group.finish();
}

/// Decode and push into a queue, as the async callback does.
fn bench_decode_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_enqueue");

    for bytes in [16_384usize, 32_768] {
        let raw = raw_buffer(bytes);
        group.throughput(Throughput::Elements((bytes / 2) as u64));

        group.bench_with_input(BenchmarkId::new("segqueue", bytes), &raw, |b, raw| {
            let queue: SegQueue<IqSample> = SegQueue::new();
            b.iter(|| {
                for s in decode(black_box(raw)) {
                    queue.push(s);
                }
                while queue.pop().is_some() {}
            });
        });
    }

    group.finish();
}

/// Normalising to complex floats, the usual next step for consumers.
fn bench_to_complex(c: &mut Criterion) {
    let samples = decode_to_vec(&raw_buffer(32_768));
    let mut group = c.benchmark_group("to_complex");
    group.throughput(Throughput::Elements(samples.len() as u64));

    group.bench_function("16384", |b| {
        b.iter(|| {
            black_box(&samples)
                .iter()
                .map(|s| s.to_complex())
                .collect::<Vec<_>>()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_decode_enqueue, bench_to_complex);
criterion_main!(benches);
