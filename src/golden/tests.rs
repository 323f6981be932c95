// In: src/golden/tests.rs

use super::*;
use crate::compare::compare_datasets;
use crate::config::{BodyCompression, ComparePolicy};
use arrow::array::{ArrayRef, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

const SCENARIO_JSON: &str = r#"{
    "schema": {
        "fields": [
            { "name": "id", "type": { "name": "int", "bit_width": 32, "is_signed": true } },
            { "name": "name", "type": { "name": "utf8" } }
        ]
    },
    "batches": [
        { "count": 3, "columns": [[1, null, 3], ["a", "b", null]] }
    ]
}"#;

fn scenario_dataset() -> DecodedDataset {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, true),
        Field::new("name", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])) as ArrayRef,
            Arc::new(StringArray::from(vec![Some("a"), Some("b"), None])) as ArrayRef,
        ],
    )
    .unwrap();
    DecodedDataset::new(schema, vec![batch])
}

#[test]
fn test_load_dir_names_cases_by_version_path() {
    // 1. Arrange: one description under a version directory.
    let dir = tempfile::tempdir().unwrap();
    let version = dir.path().join("1.0.0");
    fs::create_dir_all(&version).unwrap();
    fs::write(version.join("scenario.json"), SCENARIO_JSON).unwrap();
    fs::write(dir.path().join("README.md"), "not a case").unwrap();

    // 2. Act
    let corpus = Corpus::load_dir(dir.path()).unwrap();

    // 3. Assert
    assert_eq!(corpus.len(), 1);
    let case = corpus.get("1.0.0/scenario").unwrap();
    assert_eq!(case.origin, CaseOrigin::Description);
    assert!(case.golden_stream.is_none());
    assert!(compare_datasets(&scenario_dataset(), &case.expected, &ComparePolicy::default())
        .is_equivalent());
}

#[test]
fn test_stream_only_case_is_decoded_by_reference_reader() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = codec::encode_dataset(&scenario_dataset(), &CodecOptions::default()).unwrap();
    fs::write(dir.path().join("scenario.arrow_stream"), &bytes).unwrap();

    let corpus = Corpus::load_dir(dir.path()).unwrap();
    let case = corpus.get("scenario").unwrap();

    assert_eq!(case.origin, CaseOrigin::GoldenStream);
    assert_eq!(case.golden_stream.as_deref(), Some(bytes.as_slice()));
    assert_eq!(case.expected.num_rows(), 3);
}

#[test]
fn test_unreadable_stream_only_case_is_a_load_error() {
    // 1. Arrange: one broken golden stream beside a good case.
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.arrow_stream"), [0xff, 0xff, 0xff, 0xff, 0x10]).unwrap();
    fs::write(dir.path().join("scenario.json"), SCENARIO_JSON).unwrap();

    // 2. Act
    let corpus = Corpus::load_dir(dir.path()).unwrap();

    // 3. Assert
    assert_eq!(corpus.len(), 1);
    assert!(corpus.get("scenario").is_some());
    let errors = corpus.load_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].case, "broken");
    assert!(errors[0].message.contains("reference reader"));
}

#[test]
fn test_bad_description_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bad.json"), "{ \"schema\": 3 }").unwrap();
    fs::write(dir.path().join("good.json"), SCENARIO_JSON).unwrap();

    let corpus = Corpus::load_dir(dir.path()).unwrap();

    assert!(corpus.get("good").is_some());
    assert_eq!(corpus.load_errors().len(), 1);
    assert_eq!(corpus.load_errors()[0].case, "bad");
    assert!(corpus.filter("good").load_errors().is_empty());
}

#[test]
fn test_missing_directory_is_a_corpus_error() {
    let dir = tempfile::tempdir().unwrap();
    let res = Corpus::load_dir(&dir.path().join("nope"));
    assert!(matches!(res, Err(IntegrityError::Corpus(_))));
}

#[test]
fn test_dotted_case_names_keep_their_stem() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("scenario.v2.json"), SCENARIO_JSON).unwrap();
    fs::write(dir.path().join("scenario.json"), SCENARIO_JSON).unwrap();

    let corpus = Corpus::load_dir(dir.path()).unwrap();
    let names: Vec<&str> = corpus.cases().iter().map(|c| c.name.as_str()).collect();

    assert_eq!(names, vec!["scenario", "scenario.v2"]);
}

#[test]
fn test_written_corpus_loads_back_equivalent() {
    // 1. Arrange
    let generated = Corpus::generated(7).unwrap();
    let dir = tempfile::tempdir().unwrap();

    // 2. Act
    let written = generated
        .write_corpus(dir.path(), &CodecOptions::default())
        .unwrap();
    let loaded = Corpus::load_dir(dir.path()).unwrap();

    // 3. Assert: same cases, same expectations, streams attached.
    assert_eq!(written, generated.len());
    assert_eq!(loaded.len(), generated.len());
    for original in generated.cases() {
        let reloaded = loaded
            .get(&original.name)
            .unwrap_or_else(|| panic!("case {} not reloaded", original.name));
        assert_eq!(reloaded.requires, original.requires, "{}", original.name);
        assert!(reloaded.golden_stream.is_some());
        let res = compare_datasets(
            &original.expected,
            &reloaded.expected,
            &ComparePolicy::default(),
        );
        assert!(res.is_equivalent(), "{}: {:?}", original.name, res);
    }
}

#[test]
fn test_stream_features_detect_deltas_and_compression() {
    let generated = Corpus::generated(3).unwrap();
    let case = generated.get("generated/dictionary_deltas").unwrap();

    let plain = codec::encode_dataset(&case.expected, &CodecOptions::default()).unwrap();
    let deltas = codec::encode_dataset(
        &case.expected,
        &CodecOptions::default()
            .with_dictionary_deltas(true)
            .with_compression(BodyCompression::Lz4Frame),
    )
    .unwrap();

    assert!(stream_features(&plain).unwrap().is_empty());
    let features = stream_features(&deltas).unwrap();
    assert!(features.contains(&Feature::DictionaryDeltas));
    assert!(features.contains(&Feature::CompressedBodies));
}

#[test]
fn test_golden_stream_features_are_recorded_on_the_case() {
    let bytes = codec::encode_dataset(
        &scenario_dataset(),
        &CodecOptions::default().with_compression(BodyCompression::Zstd),
    )
    .unwrap();

    let case = GoldenCase::new("scenario", CaseOrigin::Description, scenario_dataset())
        .with_golden_stream(bytes)
        .unwrap();

    assert!(case.stream_features.contains(&Feature::CompressedBodies));
    assert!(!case.requires.contains(&Feature::CompressedBodies));
}

#[test]
fn test_filter_and_config_selection() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("scenario.json"), SCENARIO_JSON).unwrap();
    let config = OrchestratorConfig {
        corpus_dir: Some(dir.path().to_path_buf()),
        include_generated: true,
        seed: 11,
        ..OrchestratorConfig::default()
    };

    let corpus = Corpus::from_config(&config).unwrap();
    let unions = corpus.filter("union");

    assert_eq!(corpus.cases()[0].name, "scenario");
    assert!(corpus.len() > 1);
    assert_eq!(unions.len(), 2);
    assert!(unions.cases().iter().all(|c| c.requires.contains(&Feature::Union)));

    let narrowed = Corpus::from_config(&OrchestratorConfig {
        case_filter: Some("union".to_string()),
        ..config
    })
    .unwrap();
    assert_eq!(narrowed.len(), unions.len());
}
