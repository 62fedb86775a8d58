//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use portscope::{codec, TextEncoding};

fn codec_benchmark(c: &mut Criterion) {
    let text = "温度=25.4 湿度=61% status=OK\n".repeat(64);
    let bytes = codec::encode(&text, TextEncoding::Gbk).unwrap();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("gbk_encode", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&text), TextEncoding::Gbk).unwrap();
            black_box(encoded)
        })
    });

    group.bench_function("gbk_decode", |b| {
        b.iter(|| {
            let decoded = codec::decode(black_box(&bytes), TextEncoding::Gbk).unwrap();
            black_box(decoded)
        })
    });

    group.bench_function("hex_render", |b| {
        b.iter(|| {
            let rendered: String = black_box(&bytes).iter().map(|&byte| codec::to_hex(byte)).collect();
            black_box(rendered)
        })
    });

    group.finish();
}

criterion_group!(benches, codec_benchmark);
criterion_main!(benches);
