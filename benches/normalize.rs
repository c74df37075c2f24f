//! Row normalization and end-to-end staging throughput.
//!
//! ```sh
//! cargo bench --bench normalize
//! ```

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sheet_ingest::ingestion::{IngestionPipeline, PipelineOptions, normalize_row};
use sheet_ingest::store::{IngestionStore, MemoryStore};
use sheet_ingest::types::{NewUpload, RawCell, RawSheet, UserId};

const COLUMNS: [&str; 6] = ["id", "region", "amount", "booked", "note", "flag"];

fn header() -> Vec<String> {
    COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// A mix of typed cells and text that has to be sniffed.
fn generate_rows(count: usize) -> Vec<Vec<RawCell>> {
    (0..count)
        .map(|i| {
            vec![
                RawCell::Int(i as i64),
                RawCell::Text(["North", "South", "East", "West"][i % 4].to_string()),
                if i % 3 == 0 {
                    RawCell::Text(format!("{},{:03}.50", i / 1000 + 1, i % 1000))
                } else {
                    RawCell::Float(i as f64 * 1.25)
                },
                RawCell::Text(format!("2024-{:02}-{:02}", i % 12 + 1, i % 28 + 1)),
                if i % 10 == 0 { RawCell::Empty } else { RawCell::Text(format!("  memo {i}  ")) },
                RawCell::Bool(i % 2 == 0),
            ]
        })
        .collect()
}

fn bench_normalize_row(c: &mut Criterion) {
    let header = header();
    let rows = generate_rows(10_000);

    let mut group = c.benchmark_group("normalize_row");
    group.throughput(Throughput::Elements(rows.len() as u64));
    group.bench_function("mixed_10k", |b| {
        b.iter(|| {
            for row in &rows {
                black_box(normalize_row(&header, row).ok());
            }
        })
    });
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_sheets");
    group.sample_size(20);
    for parallel in [false, true] {
        let rows = generate_rows(20_000);
        group.throughput(Throughput::Elements(rows.len() as u64));
        group.bench_with_input(BenchmarkId::new("parallel_rows", parallel), &rows, |b, rows| {
            b.iter(|| {
                let store = Arc::new(MemoryStore::new());
                let pipeline = IngestionPipeline::new(
                    store.clone(),
                    PipelineOptions {
                        parallel_rows: parallel,
                        ..Default::default()
                    },
                );
                let id = store
                    .save_upload(NewUpload {
                        owner: UserId::from("bench"),
                        original_filename: "bench.xlsx".to_string(),
                        content_handle: "bench.xlsx".to_string(),
                        byte_size: 1,
                    })
                    .unwrap();
                let sheet = RawSheet::new("Data", header(), rows.clone());
                black_box(pipeline.ingest_sheets(id, vec![Ok(sheet)]).ok())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_normalize_row, bench_pipeline);
criterion_main!(benches);
