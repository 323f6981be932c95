// In: benches/codec_bench.rs

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, DictionaryArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Int32Type, Schema};
use arrow::record_batch::RecordBatch;

use arrow_interop::codec::{encode_dataset, read_dataset};
use arrow_interop::compare::compare_datasets;
use arrow_interop::config::{BodyCompression, CodecOptions, ComparePolicy};
use arrow_interop::orchestrator::read_with_arrow_rs;
use arrow_interop::types::DecodedDataset;

// --- Mock data generation ---

const ROWS_PER_BATCH: usize = 16 * 1024;
const BATCHES: usize = 8;

/// A few batches of mixed primitive, string and dictionary columns.
fn generate_dataset() -> DecodedDataset {
    let tags: DictionaryArray<Int32Type> = ["red", "green", "blue", "cyan"]
        .iter()
        .cycle()
        .take(ROWS_PER_BATCH)
        .copied()
        .collect();
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("value", DataType::Float64, true),
        Field::new("label", DataType::Utf8, true),
        Field::new("tag", tags.data_type().clone(), false),
    ]));
    let batches = (0..BATCHES)
        .map(|b| {
            let base = (b * ROWS_PER_BATCH) as i64;
            let ids = Int64Array::from_iter_values(base..base + ROWS_PER_BATCH as i64);
            let values: Float64Array = (0..ROWS_PER_BATCH)
                .map(|i| (i % 7 != 0).then(|| i as f64 * 0.5))
                .collect();
            let labels: StringArray = (0..ROWS_PER_BATCH)
                .map(|i| (i % 11 != 0).then(|| format!("row-{i}")))
                .collect();
            RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(ids) as ArrayRef,
                    Arc::new(values) as ArrayRef,
                    Arc::new(labels) as ArrayRef,
                    Arc::new(tags.clone()) as ArrayRef,
                ],
            )
            .unwrap()
        })
        .collect();
    DecodedDataset::new(schema, batches)
}

// --- Benchmark Suite ---

fn bench_codec(c: &mut Criterion) {
    let dataset = generate_dataset();
    let plain = CodecOptions::default();
    let zstd = CodecOptions::default().with_compression(BodyCompression::Zstd);
    let lz4 = CodecOptions::default().with_compression(BodyCompression::Lz4Frame);

    let encoded_plain = encode_dataset(&dataset, &plain).unwrap();
    let encoded_zstd = encode_dataset(&dataset, &zstd).unwrap();
    let encoded_lz4 = encode_dataset(&dataset, &lz4).unwrap();

    let mut group = c.benchmark_group("Stream Codec");
    group.throughput(criterion::Throughput::Bytes(encoded_plain.len() as u64));

    group.bench_function("Encode (uncompressed)", |b| {
        b.iter(|| black_box(encode_dataset(black_box(&dataset), &plain)))
    });
    group.bench_function("Encode (zstd)", |b| {
        b.iter(|| black_box(encode_dataset(black_box(&dataset), &zstd)))
    });
    group.bench_function("Encode (lz4 frame)", |b| {
        b.iter(|| black_box(encode_dataset(black_box(&dataset), &lz4)))
    });

    group.bench_function("Decode (uncompressed)", |b| {
        b.iter(|| black_box(read_dataset(black_box(&encoded_plain))))
    });
    group.bench_function("Decode (zstd)", |b| {
        b.iter(|| black_box(read_dataset(black_box(&encoded_zstd))))
    });
    group.bench_function("Decode (lz4 frame)", |b| {
        b.iter(|| black_box(read_dataset(black_box(&encoded_lz4))))
    });

    // The arrow-rs reader on the same bytes, for reference.
    group.bench_function("Decode (arrow-rs reader)", |b| {
        b.iter(|| black_box(read_with_arrow_rs(black_box(&encoded_plain))))
    });

    group.finish();
}

fn bench_compare(c: &mut Criterion) {
    let dataset = generate_dataset();
    let decoded = read_dataset(&encode_dataset(&dataset, &CodecOptions::default()).unwrap()).unwrap();
    let policy = ComparePolicy::default();

    c.bench_function("Compare equivalent datasets", |b| {
        b.iter(|| black_box(compare_datasets(black_box(&dataset), black_box(&decoded), &policy)))
    });
}

criterion_group!(benches, bench_codec, bench_compare);
criterion_main!(benches);
