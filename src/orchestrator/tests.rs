// In: src/orchestrator/tests.rs

use super::*;
use crate::codec;
use crate::compare::DivergenceKind;
use crate::config::{builtin_implementations, CodecOptions, ImplementationSpec};
use crate::types::{DecodedDataset, Feature, FeatureSet};
use arrow::array::{Array, ArrayRef, AsArray, Int32Array};
use arrow::datatypes::Int32Type;
use arrow::record_batch::RecordBatch;
use std::path::PathBuf;
use std::time::Duration;

/// Writes the expectation with every non-null int32 value shifted by one.
#[derive(Debug)]
struct OffByOne {
    features: FeatureSet,
}

impl Implementation for OffByOne {
    fn name(&self) -> &str {
        "off-by-one"
    }
    fn writes(&self) -> &FeatureSet {
        &self.features
    }
    fn reads(&self) -> &FeatureSet {
        &self.features
    }
    fn emits(&self) -> &FeatureSet {
        &EMPTY
    }
    fn produce(&self, case: &GoldenCase) -> Result<Vec<u8>> {
        let mut batches = Vec::new();
        for batch in &case.expected.batches {
            let columns: Vec<ArrayRef> = batch
                .columns()
                .iter()
                .map(|c| match c.as_primitive_opt::<Int32Type>() {
                    Some(ints) => Arc::new(ints.iter().map(|v| v.map(|v| v.wrapping_add(1))).collect::<Int32Array>()) as ArrayRef,
                    None => c.clone(),
                })
                .collect();
            batches.push(RecordBatch::try_new(batch.schema(), columns)?);
        }
        let dataset = DecodedDataset::new(case.expected.schema.clone(), batches);
        codec::encode_dataset(&dataset, &CodecOptions::default())
    }
    fn consume(&self, bytes: &[u8]) -> Result<DecodedDataset> {
        codec::read_dataset(bytes)
    }
}

/// Produces fine, panics on every consume.
#[derive(Debug)]
struct Panicky {
    features: FeatureSet,
}

impl Implementation for Panicky {
    fn name(&self) -> &str {
        "panicky"
    }
    fn writes(&self) -> &FeatureSet {
        &self.features
    }
    fn reads(&self) -> &FeatureSet {
        &self.features
    }
    fn emits(&self) -> &FeatureSet {
        &EMPTY
    }
    fn produce(&self, case: &GoldenCase) -> Result<Vec<u8>> {
        codec::encode_dataset(&case.expected, &CodecOptions::default())
    }
    fn consume(&self, _bytes: &[u8]) -> Result<DecodedDataset> {
        panic!("decoder blew up")
    }
}

static EMPTY: FeatureSet = FeatureSet::new();

fn native() -> Arc<dyn Implementation> {
    Arc::new(NativeImplementation::new("native", CodecOptions::default()).unwrap())
}

fn scenario_corpus() -> Corpus {
    Corpus::generated(42).unwrap().filter("generated/scenario")
}

fn serial() -> MatrixOptions {
    MatrixOptions {
        jobs: Some(2),
        ..MatrixOptions::default()
    }
}

#[test]
fn test_builtin_matrix_passes_on_generated_corpus() {
    // 1. Arrange
    let corpus = Corpus::generated(42).unwrap();
    let registry = ImplementationRegistry::from_specs(&builtin_implementations()).unwrap();

    // 2. Act
    let report = run_matrix(&corpus, &registry, &MatrixOptions::default()).unwrap();

    // 3. Assert
    let problems: Vec<&PairResult> = report.problems().collect();
    assert!(problems.is_empty(), "{}", report.render_table());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.summary.total, corpus.len() * registry.len() * registry.len());
    assert!(report.summary.passed > 0);
}

#[test]
fn test_deltas_producer_is_skipped_for_readers_without_deltas() {
    let corpus = scenario_corpus();
    let registry = ImplementationRegistry::from_specs(&builtin_implementations()).unwrap();

    let report = run_matrix(&corpus, &registry, &serial()).unwrap();
    let skipped = report
        .find("generated/scenario", "native-a64-zstd-deltas", "arrow-rs")
        .unwrap();
    let ran = report
        .find("generated/scenario", "native-a64-zstd-deltas", "native")
        .unwrap();

    assert_eq!(skipped.status, PairStatus::Skipped);
    assert!(skipped.detail.as_deref().unwrap().contains("dictionary_deltas"));
    assert_eq!(ran.status, PairStatus::Pass);
}

#[test]
fn test_producer_missing_a_required_feature_is_skipped() {
    let corpus = Corpus::generated(5).unwrap().filter("union_dense");
    let limited: FeatureSet = Feature::all()
        .into_iter()
        .filter(|f| *f != Feature::Union)
        .collect();
    let mut registry = ImplementationRegistry::new();
    registry.register(native()).unwrap();
    registry
        .register(Arc::new(OffByOne { features: limited }))
        .unwrap();

    let report = run_matrix(&corpus, &registry, &serial()).unwrap();

    let from_limited = report
        .find("generated/union_dense", "off-by-one", "native")
        .unwrap();
    let into_limited = report
        .find("generated/union_dense", "native", "off-by-one")
        .unwrap();
    assert_eq!(from_limited.status, PairStatus::Skipped);
    assert!(from_limited.detail.as_deref().unwrap().contains("cannot write union"));
    assert_eq!(into_limited.status, PairStatus::Skipped);
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn test_divergent_producer_is_a_fail_with_location() {
    let corpus = scenario_corpus();
    let mut registry = ImplementationRegistry::new();
    registry.register(native()).unwrap();
    registry
        .register(Arc::new(OffByOne {
            features: Feature::all(),
        }))
        .unwrap();

    let report = run_matrix(&corpus, &registry, &serial()).unwrap();
    let failed = report
        .find("generated/scenario", "off-by-one", "native")
        .unwrap();

    assert_eq!(failed.status, PairStatus::Fail);
    let divergence = failed.divergence.as_ref().unwrap();
    assert_eq!(divergence.kind, DivergenceKind::ValueMismatch);
    assert_eq!(divergence.column_index, Some(0));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_panicking_consumer_is_an_error_and_the_run_continues() {
    let corpus = Corpus::generated(9).unwrap().filter("primitive");
    let mut registry = ImplementationRegistry::new();
    registry.register(native()).unwrap();
    registry
        .register(Arc::new(Panicky {
            features: Feature::all(),
        }))
        .unwrap();

    let report = run_matrix(&corpus, &registry, &serial()).unwrap();

    let crashed = report
        .find("generated/primitive", "native", "panicky")
        .unwrap();
    assert_eq!(crashed.status, PairStatus::Error);
    assert!(crashed.detail.as_deref().unwrap().contains("decoder blew up"));
    let fine = report
        .find("generated/primitive", "panicky", "native")
        .unwrap();
    assert_eq!(fine.status, PairStatus::Pass);
    assert_eq!(report.summary.total, corpus.len() * 4);
}

#[test]
fn test_exclude_self_pairs() {
    let corpus = scenario_corpus();
    let registry = ImplementationRegistry::from_specs(&builtin_implementations()).unwrap();
    let options = MatrixOptions {
        exclude_self_pairs: true,
        ..serial()
    };

    let report = run_matrix(&corpus, &registry, &options).unwrap();

    let n = registry.len();
    assert_eq!(report.summary.total, n * (n - 1));
    assert!(report.results.iter().all(|r| r.producer != r.consumer));
}

#[test]
fn test_golden_stream_runs_as_its_own_producer() {
    // 1. Arrange: a corpus whose case carries a compressed golden stream.
    let generated = scenario_corpus();
    let case = generated.cases()[0].as_ref().clone();
    let stream = codec::encode_dataset(
        &case.expected,
        &CodecOptions::default().with_compression(crate::config::BodyCompression::Lz4Frame),
    )
    .unwrap();
    let corpus = Corpus::new(vec![case.with_golden_stream(stream).unwrap()]);
    let registry = ImplementationRegistry::from_specs(&builtin_implementations()).unwrap();

    // 2. Act
    let report = run_matrix(&corpus, &registry, &serial()).unwrap();

    // 3. Assert
    let golden: Vec<&PairResult> = report
        .results
        .iter()
        .filter(|r| r.producer == GOLDEN_FILE_PRODUCER)
        .collect();
    assert_eq!(golden.len(), registry.len());
    assert!(golden.iter().all(|r| r.status == PairStatus::Pass));
}

#[test]
fn test_duplicate_names_are_rejected() {
    let specs = vec![
        ImplementationSpec::CData {
            name: "twin".to_string(),
        },
        ImplementationSpec::CData {
            name: "twin".to_string(),
        },
    ];
    let res = ImplementationRegistry::from_specs(&specs);
    assert!(matches!(res, Err(IntegrityError::InvalidOptions(_))));
}

#[test]
fn test_reserved_names_are_rejected() {
    for reserved in [GOLDEN_FILE_PRODUCER, CORPUS_LOADER] {
        let specs = vec![ImplementationSpec::CData {
            name: reserved.to_string(),
        }];
        let res = ImplementationRegistry::from_specs(&specs);
        assert!(matches!(res, Err(IntegrityError::InvalidOptions(_))), "{reserved}");
    }
}

#[test]
fn test_case_that_failed_to_load_is_an_error_row() {
    // 1. Arrange: a good written case and an unparseable description.
    let dir = tempfile::tempdir().unwrap();
    scenario_corpus()
        .write_corpus(dir.path(), &CodecOptions::default())
        .unwrap();
    std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    let corpus = Corpus::load_dir(dir.path()).unwrap();
    let mut registry = ImplementationRegistry::new();
    registry.register(native()).unwrap();

    // 2. Act
    let report = run_matrix(&corpus, &registry, &serial()).unwrap();

    // 3. Assert: the good case still ran, the broken one is reported.
    assert_eq!(report.cases, 2);
    let good = report.find("generated/scenario", "native", "native").unwrap();
    assert_eq!(good.status, PairStatus::Pass);
    let broken = report.find("broken", CORPUS_LOADER, CORPUS_LOADER).unwrap();
    assert_eq!(broken.status, PairStatus::Error);
    assert!(broken.detail.as_deref().unwrap().starts_with("load:"));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_missing_external_command_is_an_error_row() {
    let corpus = scenario_corpus();
    let mut registry = ImplementationRegistry::new();
    registry.register(native()).unwrap();
    registry
        .register(Arc::new(ExternalImplementation::new(
            "ghost",
            PathBuf::from("/nonexistent/arrow-interop-ghost"),
            Vec::new(),
            Feature::all(),
            FeatureSet::new(),
            Duration::from_secs(5),
        )))
        .unwrap();

    let report = run_matrix(&corpus, &registry, &serial()).unwrap();
    let row = report
        .find("generated/scenario", "ghost", "native")
        .unwrap();

    assert_eq!(row.status, PairStatus::Error);
    assert!(row.detail.as_deref().unwrap().contains("cannot start"));
}

#[cfg(unix)]
#[test]
fn test_hanging_external_is_killed_at_the_timeout() {
    let case = scenario_corpus().cases()[0].clone();
    let hanging = ExternalImplementation::new(
        "hang",
        PathBuf::from("sh"),
        vec!["-c".to_string(), "sleep 10".to_string()],
        Feature::all(),
        FeatureSet::new(),
        Duration::from_millis(200),
    );

    let started = std::time::Instant::now();
    let res = hanging.produce(&case);

    assert!(matches!(res, Err(IntegrityError::Implementation { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_report_json_round_trip_and_table() {
    let corpus = scenario_corpus();
    let mut registry = ImplementationRegistry::new();
    registry.register(native()).unwrap();
    let report = run_matrix(&corpus, &registry, &serial()).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let path = report.write_json(&dir.path().join("nested")).unwrap();
    let back = MatrixReport::read_json(&path).unwrap();
    let table = report.render_table();

    assert!(path.ends_with(report::REPORT_FILE_NAME));
    assert_eq!(back, report);
    assert!(table.contains("generated/scenario"));
    assert!(table.contains("1 pairs: "));
}

#[test]
fn test_run_from_config_writes_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = InteropConfig::default();
    config.orchestrator.report_dir = dir.path().to_path_buf();
    config.orchestrator.jobs = Some(2);
    config.orchestrator.implementations = vec![ImplementationSpec::Native {
        name: "native".to_string(),
        codec: CodecOptions::default(),
    }];

    let report = run_from_config(&config).unwrap();

    assert_eq!(report.exit_code(), 0);
    assert!(dir.path().join(report::REPORT_FILE_NAME).is_file());
    assert!(report.results.iter().all(|r| r.stream_bytes.is_some()));
}

#[test]
fn test_cdata_consumer_reads_every_column_through_the_boundary() {
    let corpus = Corpus::generated(1).unwrap().filter("dictionary");
    let case = corpus.get("generated/dictionary").unwrap();
    let cdata = CDataImplementation::new("c-data");

    let bytes = native().produce(case).unwrap();
    let decoded = cdata.consume(&bytes).unwrap();

    assert_eq!(decoded.num_rows(), case.expected.num_rows());
    assert!(decoded.batches.iter().all(|b| b.column(0).len() == b.num_rows()));
}
