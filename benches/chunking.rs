use criterion::{Criterion, criterion_group, criterion_main};
use pdf_rag::embeddings::chunking::{ChunkingConfig, PageText, chunk_pages, split_text};
use std::hint::black_box;

const SENTENCES: [&str; 6] = [
    "The pump must be inspected every twelve months by a certified technician.",
    "Replace the inlet filter whenever the pressure drop exceeds the rated value",
    "Operating temperatures above 80 degrees shorten seal life considerably.",
    "See the wiring diagram on the following page before servicing the controller!",
    "Warranty claims require the original invoice and the serial number",
    "Is the bearing noisy? Check lubrication first, then alignment.",
];

/// A page of manual-like prose, roughly `chars` characters long
fn page_text(seed: usize, chars: usize) -> String {
    let mut text = String::with_capacity(chars + 100);
    let mut i = seed;
    while text.len() < chars {
        text.push_str(SENTENCES[i % SENTENCES.len()]);
        text.push(if i % 7 == 0 { '\n' } else { ' ' });
        i += 1;
    }
    text
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let config = ChunkingConfig::default();

    let single = page_text(0, 4_000);
    c.bench_function("split_text_page", |b| {
        b.iter(|| split_text(black_box(&single), black_box(&config)))
    });

    let pages: Vec<PageText> = (1..=50)
        .map(|n| PageText {
            page_number: n,
            text: page_text(n as usize, 3_000),
        })
        .collect();
    c.bench_function("chunk_pages_50", |b| {
        b.iter(|| chunk_pages(black_box(&pages), black_box(&config)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
