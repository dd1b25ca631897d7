//! 데이터패스 벤치마크
//!
//! 헤더 검사, 루프백 배치 전달, 테이블 프로비저닝 처리량을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use xids_core::config::{DatapathConfig, ProvisionPolicy};
use xids_dfa::{Dfa, PerCpuSerializer, SignatureSet, TableSerializer};
use xids_xdp_engine::{DatapathOptions, MemoryStore, inspect, loopback, provision};

fn udp_frame(payload_len: usize) -> Vec<u8> {
    let mut f = vec![0u8; 14 + 20 + 8];
    f[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    f[14] = 0x45;
    f[14 + 9] = 17;
    f.resize(f.len() + payload_len, b'x');
    f
}

fn bench_inspect(c: &mut Criterion) {
    let frame = udp_frame(1400);
    let truncated = &frame[..30];

    let mut group = c.benchmark_group("inspect");
    group.bench_function("ipv4_udp", |b| b.iter(|| inspect(black_box(&frame))));
    group.bench_function("truncated", |b| b.iter(|| inspect(black_box(truncated))));
    group.finish();
}

fn bench_loopback_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("loopback_forward");

    for batch in [16u32, 64] {
        let config = DatapathConfig {
            frame_count: 1024,
            frame_size: 2048,
            rx_ring_size: 512,
            tx_ring_size: 512,
            fill_ring_size: 1024,
            comp_ring_size: 1024,
            batch_size: batch,
            poll_timeout_ms: 100,
        };
        let options = DatapathOptions {
            batch_size: batch,
            ..DatapathOptions::default()
        };
        let (mut dp, mut peer) = loopback::pair(&config, options).expect("loopback pair");
        let frame = udp_frame(256);

        group.throughput(Throughput::Elements(u64::from(batch)));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                for _ in 0..batch {
                    peer.inject(&frame);
                }
                dp.process_batch().expect("batch");
                black_box(peer.drain_tx());
            });
        });
    }

    group.finish();
}

fn bench_provision(c: &mut Criterion) {
    let set: SignatureSet = (0..100).map(|i| format!("signature-{i:03}")).collect();
    let dfa = Dfa::compile(&set).expect("compile");
    let table = PerCpuSerializer::new(8).serialize(&dfa);

    let mut group = c.benchmark_group("provision");
    group.throughput(Throughput::Elements(table.len() as u64));
    group.bench_function("memory_store", |b| {
        b.iter(|| {
            let mut store = MemoryStore::with_capacity(table.len());
            provision(&mut store, &table, ProvisionPolicy::StopOnFirstError).expect("provision")
        });
    });
    group.finish();
}

criterion_group!(benches, bench_inspect, bench_loopback_forward, bench_provision);
criterion_main!(benches);
