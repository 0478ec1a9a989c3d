//! Benchmarks for the worker wire format using criterion.
//!
//! These benchmarks measure:
//! - Instruction encode and decode
//! - Result decode on the collector side
//! - Output normalization for small and large CBOM documents

#![allow(missing_docs)]

use std::hint::black_box;
use std::time::Duration;

use cbom_bench::{normalize_json, JobId, JobInstruction, JobResult, RepoRef};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

fn instruction() -> JobInstruction {
    JobInstruction::new(
        JobId::new(),
        "cdxgen",
        RepoRef::new("apache/commons-crypto").with_branch("master"),
    )
}

/// CycloneDX-shaped document with `components` crypto assets.
fn cbom(components: usize) -> String {
    let components: Vec<_> = (0..components)
        .map(|i| {
            json!({
                "type": "cryptographic-asset",
                "name": format!("AES-{i}"),
                "bom-ref": format!("crypto/algorithm/aes-{i}"),
                "cryptoProperties": {
                    "assetType": "algorithm",
                    "algorithmProperties": { "primitive": "ae", "mode": "gcm" },
                },
            })
        })
        .collect();
    serde_json::to_string_pretty(&json!({
        "specVersion": "1.6",
        "bomFormat": "CycloneDX",
        "components": components,
        "metadata": { "component": { "name": "commons-crypto" } },
    }))
    .expect("document serializes")
}

/// Benchmark: instruction round trip through the queue encoding.
fn bench_instruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("instruction");
    group.sample_size(100);

    let instruction = instruction();
    let encoded = instruction.encode().expect("encode should succeed");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode", |b| {
        b.iter(|| black_box(black_box(&instruction).encode().expect("encode should succeed")));
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(JobInstruction::decode(black_box(&encoded)).expect("decode should succeed")));
    });

    group.finish();
}

/// Benchmark: collector-side result decode for growing payloads.
fn bench_result_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("result_decode");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    for components in [1, 100, 1000] {
        let payload = normalize_json(&cbom(components)).expect("document normalizes");
        let size = payload.len() as u64;
        let raw = JobResult::ok(&instruction(), "cdxgen", payload, size, Duration::from_secs(12))
            .encode()
            .expect("encode should succeed");
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(components), &raw, |b, raw| {
            b.iter(|| black_box(JobResult::decode(black_box(raw)).expect("decode should succeed")));
        });
    }

    group.finish();
}

/// Benchmark: normalization of raw tool output.
fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_json");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    for components in [1, 100, 1000] {
        let raw = cbom(components);
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(components), &raw, |b, raw| {
            b.iter(|| black_box(normalize_json(black_box(raw)).expect("document normalizes")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_instruction, bench_result_decode, bench_normalize);
criterion_main!(benches);
