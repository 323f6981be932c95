// In: src/golden/mod.rs

//! The golden corpus: the fixed set of cases every implementation pair runs.
//!
//! A corpus directory holds, per case, an expected-value description
//! (`<name>.json`), a golden encoded stream (`<name>.arrow_stream`), or both.
//! Subdirectories are corpus versions and become part of the case name, so
//! `corpus/1.0.0/primitive.json` is the case `1.0.0/primitive`. Generated
//! cases live beside the loaded ones under `generated/`.

pub mod generate;
pub mod json;

#[cfg(test)]
mod tests;

use arrow::datatypes::SchemaRef;
use arrow::ipc::{root_as_message, MessageHeader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::envelope::read_envelope;
use crate::codec::{self, MessageKind};
use crate::config::{CodecOptions, OrchestratorConfig};
use crate::error::{IntegrityError, Result};
use crate::orchestrator::builtin::read_with_arrow_rs;
use crate::types::{DecodedDataset, Feature, FeatureSet};

pub use generate::CaseGenerator;
pub use json::CaseDescription;

pub const DESCRIPTION_EXTENSION: &str = "json";
pub const STREAM_EXTENSION: &str = "arrow_stream";

/// Where a case's expectation came from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseOrigin {
    /// An expected-value description, optionally with a golden stream.
    Description,
    /// A golden stream alone, decoded by the trusted reference reader.
    GoldenStream,
    Generated,
}

/// One immutable test case.
#[derive(Debug, Clone)]
pub struct GoldenCase {
    pub name: String,
    pub origin: CaseOrigin,
    /// Features a producer must write and a consumer must read to run it.
    pub requires: FeatureSet,
    pub expected: DecodedDataset,
    pub golden_stream: Option<Vec<u8>>,
    /// Features the golden stream itself uses beyond `requires`.
    pub stream_features: FeatureSet,
}

impl GoldenCase {
    pub fn new(name: impl Into<String>, origin: CaseOrigin, expected: DecodedDataset) -> Self {
        Self {
            name: name.into(),
            origin,
            requires: Feature::required_by_schema(&expected.schema),
            expected,
            golden_stream: None,
            stream_features: FeatureSet::new(),
        }
    }

    pub fn with_requirements(mut self, extra: impl IntoIterator<Item = Feature>) -> Self {
        self.requires.extend(extra);
        self
    }

    pub fn with_golden_stream(mut self, bytes: Vec<u8>) -> Result<Self> {
        self.stream_features = stream_features(&bytes)?;
        self.golden_stream = Some(bytes);
        Ok(self)
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.expected.schema
    }

    pub fn from_description(name: impl Into<String>, description: &CaseDescription) -> Result<Self> {
        let expected = json::description_to_dataset(description)?;
        Ok(Self::new(name, CaseOrigin::Description, expected)
            .with_requirements(description.requires.iter().copied()))
    }

    pub fn to_description(&self) -> Result<CaseDescription> {
        let implied = Feature::required_by_schema(&self.expected.schema);
        let extra = self.requires.difference(&implied).copied().collect();
        json::dataset_to_description(extra, &self.expected)
    }
}

/// Scans a stream's envelopes for features that are properties of the
/// encoding rather than of the schema.
pub fn stream_features(bytes: &[u8]) -> Result<FeatureSet> {
    let mut features = FeatureSet::new();
    let mut cursor = Cursor::new(bytes);
    while let Some(raw) = read_envelope(&mut cursor)? {
        if raw.kind == MessageKind::EndOfStream {
            break;
        }
        let message = root_as_message(&raw.metadata)?;
        match message.header_type() {
            MessageHeader::DictionaryBatch => {
                if let Some(dictionary) = message.header_as_dictionary_batch() {
                    if dictionary.isDelta() {
                        features.insert(Feature::DictionaryDeltas);
                    }
                    if dictionary.data().and_then(|d| d.compression()).is_some() {
                        features.insert(Feature::CompressedBodies);
                    }
                }
            }
            MessageHeader::RecordBatch => {
                if let Some(batch) = message.header_as_record_batch() {
                    if batch.compression().is_some() {
                        features.insert(Feature::CompressedBodies);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(features)
}

/// A case file that could not be turned into a case. The rest of the
/// corpus still loads; the orchestrator reports it as an `Error` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseLoadError {
    pub case: String,
    pub message: String,
}

/// An ordered, read-only set of cases.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    cases: Vec<Arc<GoldenCase>>,
    load_errors: Vec<CaseLoadError>,
}

impl Corpus {
    pub fn new(cases: Vec<GoldenCase>) -> Self {
        Self {
            cases: cases.into_iter().map(Arc::new).collect(),
            load_errors: Vec::new(),
        }
    }

    pub fn cases(&self) -> &[Arc<GoldenCase>] {
        &self.cases
    }

    /// Cases below the corpus directory that failed to load.
    pub fn load_errors(&self) -> &[CaseLoadError] {
        &self.load_errors
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<GoldenCase>> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn extend(&mut self, other: Corpus) {
        self.cases.extend(other.cases);
        self.load_errors.extend(other.load_errors);
    }

    /// Keeps the cases whose name contains `pattern`.
    pub fn filter(&self, pattern: &str) -> Corpus {
        Corpus {
            cases: self
                .cases
                .iter()
                .filter(|c| c.name.contains(pattern))
                .cloned()
                .collect(),
            load_errors: self
                .load_errors
                .iter()
                .filter(|e| e.case.contains(pattern))
                .cloned()
                .collect(),
        }
    }

    /// The generated cases for `seed`.
    pub fn generated(seed: u64) -> Result<Self> {
        Ok(Self::new(CaseGenerator::new(seed).generate_all()?))
    }

    /// The corpus an orchestrator run uses: the corpus directory, if any,
    /// followed by the generated cases, if enabled, narrowed by the case
    /// filter.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let mut corpus = match &config.corpus_dir {
            Some(dir) => Self::load_dir(dir)?,
            None => Self::default(),
        };
        if config.include_generated {
            corpus.extend(Self::generated(config.seed)?);
        }
        Ok(match &config.case_filter {
            Some(pattern) => corpus.filter(pattern),
            None => corpus,
        })
    }

    /// Loads every case below `dir`, in name order.
    ///
    /// Only a missing or unreadable directory fails the load. A case whose
    /// files cannot be read or parsed is kept in `load_errors`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(IntegrityError::Corpus(format!(
                "corpus directory {} does not exist",
                dir.display()
            )));
        }
        let mut files = Vec::new();
        collect_files(dir, &mut files)?;

        // 1. Group files by case name.
        let stems: BTreeSet<PathBuf> = files
            .iter()
            .filter(|p| is_case_file(p))
            .map(|p| p.with_extension(""))
            .collect();

        // 2. Build one case per stem.
        let mut corpus = Self::default();
        for stem in stems {
            let name = case_name(dir, &stem)?;
            match load_case(&name, &stem) {
                Ok(case) => {
                    log::debug!("loaded case '{}' ({:?})", case.name, case.origin);
                    corpus.cases.push(Arc::new(case));
                }
                Err(e) => {
                    log::warn!("case '{name}' failed to load: {e}");
                    corpus.load_errors.push(CaseLoadError {
                        case: name,
                        message: e.to_string(),
                    });
                }
            }
        }
        log::info!(
            "loaded {} cases from {} ({} failed)",
            corpus.cases.len(),
            dir.display(),
            corpus.load_errors.len()
        );
        Ok(corpus)
    }

    /// Writes a description and a natively encoded golden stream for every
    /// case. Returns the number of cases written.
    pub fn write_corpus(&self, dir: &Path, options: &CodecOptions) -> Result<usize> {
        for case in &self.cases {
            let stem = dir.join(&case.name);
            if let Some(parent) = stem.parent() {
                fs::create_dir_all(parent)?;
            }
            let description = case.to_description()?;
            fs::write(
                sibling(&stem, DESCRIPTION_EXTENSION),
                serde_json::to_string_pretty(&description)?,
            )?;
            let stream = match &case.golden_stream {
                Some(bytes) => bytes.clone(),
                None => codec::encode_dataset(&case.expected, options)?,
            };
            fs::write(sibling(&stem, STREAM_EXTENSION), stream)?;
        }
        log::info!("wrote {} cases to {}", self.cases.len(), dir.display());
        Ok(self.cases.len())
    }
}

/// Builds the case `name` from the description and/or golden stream at `stem`.
fn load_case(name: &str, stem: &Path) -> Result<GoldenCase> {
    let description_path = sibling(stem, DESCRIPTION_EXTENSION);
    let stream_path = sibling(stem, STREAM_EXTENSION);
    let stream = if stream_path.is_file() {
        Some(fs::read(&stream_path)?)
    } else {
        None
    };

    let case = if description_path.is_file() {
        let text = fs::read_to_string(&description_path)?;
        let description: CaseDescription = serde_json::from_str(&text).map_err(|e| {
            IntegrityError::Corpus(format!("{}: {e}", description_path.display()))
        })?;
        GoldenCase::from_description(name, &description)?
    } else {
        let bytes = stream.as_deref().unwrap_or_default();
        let expected = read_with_arrow_rs(bytes).map_err(|e| {
            IntegrityError::Corpus(format!(
                "golden stream {} is not readable by the reference reader: {e}",
                stream_path.display()
            ))
        })?;
        GoldenCase::new(name, CaseOrigin::GoldenStream, expected)
    };
    match stream {
        Some(bytes) => case.with_golden_stream(bytes),
        None => Ok(case),
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// `stem` plus `.extension`, keeping any dots already in the stem.
fn sibling(stem: &Path, extension: &str) -> PathBuf {
    let mut path = stem.as_os_str().to_owned();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

fn is_case_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(DESCRIPTION_EXTENSION) | Some(STREAM_EXTENSION)
    )
}

/// `root/1.0.0/primitive` -> `1.0.0/primitive`, with `/` on every platform.
fn case_name(root: &Path, stem: &Path) -> Result<String> {
    let relative = stem.strip_prefix(root).map_err(|_| {
        IntegrityError::Corpus(format!("{} is outside the corpus", stem.display()))
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
