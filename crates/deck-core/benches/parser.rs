//! Frame parser benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deck_core::{timecode_to_millis, FrameParser};

fn clip_catalog(rows: usize) -> String {
    let mut out = format!("205 clips info:\r\nclip count: {}\r\n", rows);
    for i in 1..=rows {
        out.push_str(&format!("{}: Clip number {}.mov 00:00:00:00 00:01:{:02}:00\r\n", i, i, i % 60));
    }
    out.push_str("\r\n");
    out
}

fn ack_benchmark(c: &mut Criterion) {
    c.bench_function("parse_ack", |b| {
        b.iter(|| {
            let mut parser = FrameParser::new();
            parser.push(black_box(b"200 ok\r\n"));
            black_box(parser.next_message())
        })
    });
}

fn catalog_benchmark(c: &mut Criterion) {
    let catalog = clip_catalog(200);

    c.bench_function("parse_clip_catalog_200", |b| {
        b.iter(|| {
            let mut parser = FrameParser::new();
            parser.push(black_box(catalog.as_bytes()));
            black_box(parser.next_message())
        })
    });
}

fn chunked_benchmark(c: &mut Criterion) {
    let catalog = clip_catalog(50);

    c.bench_function("parse_clip_catalog_chunked", |b| {
        b.iter(|| {
            let mut parser = FrameParser::new();
            let mut count = 0;
            for chunk in catalog.as_bytes().chunks(64) {
                parser.push(chunk);
                count += parser.messages().count();
            }
            black_box(count)
        })
    });
}

fn timecode_benchmark(c: &mut Criterion) {
    c.bench_function("timecode_to_millis", |b| {
        b.iter(|| black_box(timecode_to_millis(black_box("01:02:03:30"), None)))
    });
}

criterion_group!(
    benches,
    ack_benchmark,
    catalog_benchmark,
    chunked_benchmark,
    timecode_benchmark
);
criterion_main!(benches);
