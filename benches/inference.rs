use std::fs::File;
use std::hint::black_box;
use std::io::Write;
use std::path::PathBuf;

use criterion::{Criterion, criterion_group, criterion_main};
use csv_refresh::infer::{ColumnSample, classify, resolve, sample_size};
use csv_refresh::source::CsvSource;
use encoding_rs::UTF_8;
use tempfile::TempDir;

fn mixed_values(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match i % 6 {
            0 => i.to_string(),
            1 => format!("{}.{:02}", i, i % 100),
            2 => format!("2024-01-{:02}", (i % 28) + 1),
            3 => format!("2024-01-{:02} {:02}:15:00", (i % 28) + 1, i % 24),
            4 => if i % 2 == 0 { "true" } else { "f" }.to_string(),
            _ => format!("0{i}"),
        })
        .collect()
}

fn generate_claims(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let csv_path = temp_dir.path().join("claims.csv");
    let mut file = File::create(&csv_path).expect("create csv");
    writeln!(file, "claim_id,member_code,amount,service_date,paid").expect("header");
    for i in 0..rows {
        let day = (i % 28) + 1;
        let paid = if i % 3 == 0 { "t" } else { "f" };
        writeln!(file, "{i},{:06},{}.{:02},2024-02-{day:02},{paid}", i % 7919, i % 500, i % 100)
            .expect("row");
    }
    (temp_dir, csv_path)
}

fn bench_inference(c: &mut Criterion) {
    let values = mixed_values(1000);
    let sample = ColumnSample::from_values(values.clone());
    let (_dir, csv_path) = generate_claims(20_000);
    let source = CsvSource::new(csv_path, b',', UTF_8);

    let mut group = c.benchmark_group("inference");
    group.bench_function("classify_mixed_1000", |b| {
        b.iter(|| {
            for value in &values {
                black_box(classify(value));
            }
        })
    });
    group.bench_function("resolve_sample_1000", |b| {
        b.iter(|| black_box(resolve(black_box(&sample))))
    });
    group.bench_function("probe_claims_20000", |b| {
        b.iter(|| {
            let (rows, mut samples) = source.sample_columns(1000).expect("sample columns");
            let limit = sample_size(rows) as usize;
            for sample in &mut samples {
                sample.truncate(limit);
                black_box(resolve(sample));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_inference);
criterion_main!(benches);
