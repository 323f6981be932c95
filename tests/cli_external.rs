// In: tests/cli_external.rs

//! Drives the `arrow-interop` binary the way the orchestrator drives any
//! external implementation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use arrow_interop::codec::{encode_dataset, read_dataset};
use arrow_interop::compare::compare_datasets;
use arrow_interop::config::{BodyCompression, CodecOptions, ComparePolicy};
use arrow_interop::golden::Corpus;
use arrow_interop::orchestrator::report::REPORT_FILE_NAME;
use arrow_interop::orchestrator::{
    run_matrix, ExternalImplementation, ImplementationRegistry, MatrixOptions, MatrixReport,
    NativeImplementation, PairStatus,
};
use arrow_interop::types::{Feature, FeatureSet};

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_arrow-interop"))
}

fn testdata() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/corpus")
}

fn external(name: &str, args: &[&str]) -> ExternalImplementation {
    ExternalImplementation::new(
        name,
        binary(),
        args.iter().map(|a| a.to_string()).collect(),
        Feature::all(),
        FeatureSet::new(),
        Duration::from_secs(30),
    )
}

#[test]
fn test_binary_as_external_implementation_passes_the_matrix() {
    // 1. Arrange: checked-in cases plus a slice of the generated ones.
    let mut corpus = Corpus::load_dir(&testdata()).unwrap();
    corpus.extend(Corpus::generated(3).unwrap().filter("dictionary"));
    let mut registry = ImplementationRegistry::new();
    registry
        .register(Arc::new(
            NativeImplementation::new("native", CodecOptions::default()).unwrap(),
        ))
        .unwrap();
    // Protocol arguments follow these, so codec settings go through a config.
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("zstd.json");
    std::fs::write(&config, r#"{ "codec": { "compression": "zstd", "alignment": 64 } }"#).unwrap();
    let config = config.to_string_lossy().into_owned();
    registry
        .register(Arc::new(external("cli-zstd", &["--quiet", "--config", &config])))
        .unwrap();

    // 2. Act
    let report = run_matrix(&corpus, &registry, &MatrixOptions::default()).unwrap();

    // 3. Assert
    assert!(corpus.get("1.0.0/scenario").is_some());
    assert_eq!(report.problems().count(), 0, "{}", report.render_table());
    assert!(report
        .results
        .iter()
        .any(|r| r.producer == "cli-zstd" && r.status == PairStatus::Pass));
}

#[test]
fn test_consume_re_encodes_what_it_read() {
    let case = Corpus::generated(8).unwrap();
    let case = case.get("generated/nested").unwrap();
    let input = encode_dataset(
        &case.expected,
        &CodecOptions::default().with_compression(BodyCompression::Lz4Frame),
    )
    .unwrap();

    let mut child = Command::new(binary())
        .args(["consume", "--alignment", "64"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(&input).unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let echoed = read_dataset(&output.stdout).unwrap();
    assert!(compare_datasets(&case.expected, &echoed, &ComparePolicy::default()).is_equivalent());
}

#[test]
fn test_consume_rejects_garbage_with_a_diagnostic() {
    let mut child = Command::new(binary())
        .arg("consume")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(&[0xff, 0xff, 0xff, 0xff, 0x10, 0, 0, 0, 1, 2, 3])
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}

#[test]
fn test_run_subcommand_writes_report_and_exit_code() {
    let out = tempfile::tempdir().unwrap();

    let status = Command::new(binary())
        .args(["--quiet", "run", "--no-generated", "--jobs", "2"])
        .arg("--corpus")
        .arg(testdata())
        .arg("--report-dir")
        .arg(out.path())
        .stdout(Stdio::null())
        .status()
        .unwrap();

    assert!(status.success());
    let report = MatrixReport::read_json(&out.path().join(REPORT_FILE_NAME)).unwrap();
    assert_eq!(report.cases, Corpus::load_dir(&testdata()).unwrap().len());
    assert_eq!(report.exit_code(), 0);
}
