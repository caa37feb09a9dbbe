//! Control codec throughput benchmark.
//!
//! Measures command decoding and line framing using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use iz_supervisor::ipc::codec::{read_line, write_document, Command};
use serde_json::json;

const MAX_LINE: usize = 64 * 1024;

fn bench_decode(c: &mut Criterion) {
    let relay = format!(
        "iz.relay {}",
        json!({"role": "Broker", "name": "alpha", "pid": 4242, "port": 24002, "dependents": []})
    );
    let lines = [
        ("ping", "iz.ping".to_string()),
        ("stop", "iz.stop 24001".to_string()),
        ("relay", relay),
    ];

    let mut group = c.benchmark_group("decode");
    for (name, line) in &lines {
        group.bench_with_input(BenchmarkId::from_parameter(name), line, |b, l| {
            b.iter(|| Command::decode(black_box(l)).unwrap());
        });
    }
    group.finish();
}

fn bench_read_line(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let line_sizes: &[usize] = &[16, 1024, 16 * 1024];

    let mut group = c.benchmark_group("read_line");
    for &size in line_sizes {
        let mut wire = vec![b'x'; size];
        wire.push(b'\n');
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, w| {
            b.iter(|| {
                rt.block_on(async {
                    let mut reader = black_box(w.as_slice());
                    read_line(&mut reader, MAX_LINE).await.unwrap()
                })
            });
        });
    }
    group.finish();
}

fn bench_status_reply(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let status = json!({
        "Controller": {
            "name": "alpha",
            "pid": 4242,
            "port": 24001,
            "status": "Running",
            "managed": ["beta", "gamma"],
            "pidUsage": {"cpu": 0.5, "memory": 1048576, "ctime": 0, "elapsed": 1000},
        }
    });

    c.bench_function("write_status_reply", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut buf = Vec::with_capacity(512);
                write_document(&mut buf, black_box(&status)).await.unwrap();
                buf
            })
        });
    });
}

criterion_group!(benches, bench_decode, bench_read_line, bench_status_reply);
criterion_main!(benches);
