// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 linkmem contributors
//
// Chunk-transfer benchmarks.
//
// Run with:
//   cargo bench --bench chunk_transfer
//
// Groups:
//   chunk_codec      — ChunkResponse header encode/decode + CRC-32 payload
//                       tail compute/verify, at three chunk sizes
//   full_transfer     — a complete master/slave transfer end to end over a
//                       LoopbackTransport, at three block sizes

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use linkmem::frame::{payload_tail, verify_payload, ChunkResponse};
use linkmem::{BlockRole, CallOutcome, Config, LinkSystem, LoopbackTransport};

// ---------------------------------------------------------------------------
// Workload sizes (mirrors the default available_buffer_size ceiling of 4096)
// ---------------------------------------------------------------------------

const SMALL: usize = 64;
const MEDIUM: usize = 1024;
const LARGE: usize = 4096;

const SIZES: &[(&str, usize)] = &[
    ("small_64", SMALL),
    ("medium_1024", MEDIUM),
    ("large_4096", LARGE),
];

// ---------------------------------------------------------------------------
// chunk_codec: header round trip plus CRC-32 payload tail compute/verify
// ---------------------------------------------------------------------------

fn bench_chunk_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_codec");

    for &(label, size) in SIZES {
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("header_roundtrip", label), &size, |b, &sz| {
            let resp = ChunkResponse { size: sz as u16, count: 1 };
            b.iter(|| {
                let wire = resp.encode();
                black_box(ChunkResponse::decode(&wire))
            });
        });

        group.bench_with_input(BenchmarkId::new("payload_tail", label), &payload, |b, payload| {
            b.iter(|| black_box(payload_tail(payload)));
        });

        group.bench_with_input(BenchmarkId::new("verify_payload", label), &payload, |b, payload| {
            let tail = payload_tail(payload);
            b.iter(|| black_box(verify_payload(payload, &tail)));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// full_transfer: a complete master/slave transfer over a loopback pair
// ---------------------------------------------------------------------------

fn trig(tag: &str) -> [u8; 8] {
    let mut t = [0u8; 8];
    let bytes = tag.as_bytes();
    let n = bytes.len().min(8);
    t[..n].copy_from_slice(&bytes[..n]);
    t
}

fn run_one_transfer(block_len: usize, chunk_size: u16) {
    let (near, far) = LoopbackTransport::pair();
    let cfg = Config {
        legacy_buffer_size: 64,
        available_buffer_size: 4096,
        default_timeout: Duration::from_secs(5),
        step_interval: Duration::from_millis(1),
        event_queue_size: 16,
        call_queue_length: 1,
    };
    let master = LinkSystem::init(Arc::new(near), cfg.clone(), |_| {});
    let slave = LinkSystem::init(Arc::new(far), cfg, |_| {});

    master.new_blob("bench", block_len, BlockRole::MasterConsumer, trig("benchtr"), trig("benchpt"));
    slave.new_blob("bench", block_len, BlockRole::SlaveOwned, trig("benchtr"), trig("benchpt"));

    {
        let access = slave.registry().grab("bench", Duration::from_secs(1)).unwrap();
        access.with_bytes_mut(|b| b.iter_mut().enumerate().for_each(|(i, byte)| *byte = i as u8));
        slave.registry().release(access).unwrap();
    }

    assert_eq!(master.call("bench", 2_000, chunk_size), CallOutcome::Enqueued);

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(access) = master.registry().grab("bench", Duration::from_millis(20)) {
            let done = access.with_bytes(|b| b[0] == 0 && block_len <= 1 || b.last() == Some(&((block_len - 1) as u8)));
            master.registry().release(access).unwrap();
            if done {
                break;
            }
        }
        if std::time::Instant::now() > deadline {
            break;
        }
    }
}

fn bench_full_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_transfer");
    group.sample_size(10);

    for &(label, size) in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            b.iter(|| run_one_transfer(sz, 256));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunk_codec, bench_full_transfer);
criterion_main!(benches);
