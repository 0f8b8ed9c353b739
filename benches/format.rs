//! Performance benchmarks for a3s-bridge
//!
//! Run with: cargo bench

use a3s_bridge::consumer::{decode_frame, FrameDecoder};
use a3s_bridge::{convert_markup, split_content, BridgeConfig, MemoryPresenter, StreamingRenderer};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn sample_markdown(paragraphs: usize) -> String {
    let mut text = String::from("# Summary\n\n");
    for i in 0..paragraphs {
        text.push_str(&format!(
            "Paragraph {} has **bold**, _italic_, `code` and a [link](https://example.com/{}).\n",
            i, i
        ));
        text.push_str("- first item\n- second item with <angle> & ampersand\n\n");
        if i % 5 == 0 {
            text.push_str("```rust\nfn main() {\n    println!(\"hi\");\n}\n```\n\n");
        }
    }
    text
}

fn bench_convert(c: &mut Criterion) {
    let short = sample_markdown(1);
    let long = sample_markdown(100);

    c.bench_function("convert_markup (short)", |b| {
        b.iter(|| convert_markup(&short));
    });

    c.bench_function("convert_markup (long)", |b| {
        b.iter(|| convert_markup(&long));
    });
}

fn bench_split(c: &mut Criterion) {
    let html = convert_markup(&sample_markdown(200));

    let mut group = c.benchmark_group("split_content");
    for limit in [512, 4096] {
        group.bench_function(format!("limit {}", limit), |b| {
            b.iter(|| split_content(&html, limit));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = r#"{"type":"message.part.updated","properties":{"part":{"id":"prt_1","sessionID":"ses_1","messageID":"msg_1","type":"text","text":"Hello"},"delta":"Hello"}}"#;
    let chunk = format!("data: {}\n\n", frame).repeat(100);

    c.bench_function("decode 100 frames", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder
                .push(chunk.as_bytes())
                .iter()
                .filter_map(|f| decode_frame(f).ok())
                .count()
        });
    });
}

fn bench_streaming(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = BridgeConfig::default();

    c.bench_function("stream 200 deltas + complete", |b| {
        b.to_async(&rt).iter(|| async {
            let renderer = StreamingRenderer::new(Arc::new(MemoryPresenter::new()), &config);
            for i in 0..200 {
                renderer
                    .on_delta("chat1", &format!("word{} ", i))
                    .await
                    .unwrap();
            }
            renderer.on_complete("chat1", None).await.unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_convert,
    bench_split,
    bench_decode,
    bench_streaming,
);
criterion_main!(benches);
