use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use crate::{
    chunks::{
        decode_chunks, load_block_aligned_chunks, load_chunks, run_frame_parser, run_text_pipeline,
    },
    consts::{
        CRLF_BLOCK, KEEPALIVE_BLOCK, LIVE_BLOCK, MULTILINE_BLOCK, STATUS_BLOCK, big_live_block,
        generate_live, generate_one_of_each,
    },
};


/// One complete block through the pure parser
fn bench_parse_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_block");

    let big = big_live_block();
    let blocks: &[(&str, &str)] = &[
        ("live", LIVE_BLOCK),
        ("crlf", CRLF_BLOCK),
        ("keepalive", KEEPALIVE_BLOCK),
        ("multiline", MULTILINE_BLOCK),
        ("status", STATUS_BLOCK),
        ("big_live", big.as_str()),
    ];

    for &(name, block) in blocks {
        group.bench_with_input(BenchmarkId::new("parse", name), block, |b, input| {
            b.iter(|| {
                let _ = black_box(livefeed::parser::parse(black_box(input)));
            });
        });
    }

    group.finish();
}

fn bench_stream(c: &mut Criterion) {
    let mixed = generate_one_of_each(128);
    let live = generate_live(512, false);
    let big_live = generate_live(64, true);

    let mut group = c.benchmark_group("stream");

    for (name, text) in [("mixed", &mixed), ("live", &live), ("big_live", &big_live)] {
        for (alignment, chunks) in [
            ("unaligned", load_chunks(text.as_bytes())),
            ("block-aligned", load_block_aligned_chunks(text)),
        ] {
            let name = format!("{name}_{alignment}");
            let decoded = decode_chunks(&chunks);
            group.bench_with_input(
                BenchmarkId::new("frame_parser", &name),
                &decoded,
                |b, decoded| {
                    b.iter(|| run_frame_parser(decoded));
                },
            );

            group.bench_with_input(
                BenchmarkId::new("text_pipeline", &name),
                &chunks,
                |b, chunks| {
                    b.iter(|| run_text_pipeline(chunks));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_parse_block, bench_stream);
criterion_main!(benches);
