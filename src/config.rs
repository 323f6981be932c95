// In: src/config.rs

//! The single source of truth for all verifier configuration.
//!
//! This module defines the unified `InteropConfig` struct, which is designed to
//! be created once at the application boundary (from a JSON file and/or CLI
//! flags) and then passed down through the system via a shared, read-only
//! `Arc<InteropConfig>`.
//!
//! Every section is `#[serde(default)]`, so a config file only needs to name
//! the settings it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IntegrityError, Result};
use crate::types::{Feature, FeatureSet};

//==================================================================================
// I. Codec Configuration
//==================================================================================

/// Per-buffer body compression applied to record and dictionary batches.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BodyCompression {
    /// **Default:** buffers are written as-is.
    #[default]
    None,
    /// LZ4 frame format.
    Lz4Frame,
    /// Zstandard.
    Zstd,
}

/// Options that change the bytes a `StreamEncoder` produces.
///
/// Two encoders with equal options produce identical bytes for equal input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CodecOptions {
    /// Body buffer and metadata alignment in bytes. Must be 8 or 64.
    #[serde(default = "default_alignment")]
    pub alignment: usize,

    #[serde(default)]
    pub compression: BodyCompression,

    /// When a batch's dictionary extends the one already sent for its id,
    /// send only the new tail as a delta dictionary batch.
    #[serde(default)]
    pub emit_dictionary_deltas: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            alignment: default_alignment(),
            compression: BodyCompression::None,
            emit_dictionary_deltas: false,
        }
    }
}

impl CodecOptions {
    pub fn validate(&self) -> Result<()> {
        if self.alignment != 8 && self.alignment != 64 {
            return Err(IntegrityError::InvalidOptions(format!(
                "alignment must be 8 or 64, got {}",
                self.alignment
            )));
        }
        Ok(())
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_compression(mut self, compression: BodyCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_dictionary_deltas(mut self, enabled: bool) -> Self {
        self.emit_dictionary_deltas = enabled;
        self
    }
}

fn default_alignment() -> usize {
    8
}

//==================================================================================
// II. Comparator Configuration
//==================================================================================

/// How floating point values are matched.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FloatPolicy {
    /// Bit patterns must be identical, including NaN payloads.
    BitExact,
    /// **Default:** any NaN equals any NaN; everything else is bit-exact, so
    /// `-0.0` and `0.0` differ.
    #[default]
    NanInsensitive,
    /// NaN equals NaN, and finite values may differ by at most `epsilon`.
    Epsilon { epsilon: f64 },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ComparePolicy {
    #[serde(default)]
    pub float: FloatPolicy,

    /// Compare field-level key/value metadata.
    #[serde(default = "default_true")]
    pub check_field_metadata: bool,

    /// Compare schema-level key/value metadata.
    #[serde(default = "default_true")]
    pub check_schema_metadata: bool,
}

impl Default for ComparePolicy {
    fn default() -> Self {
        Self {
            float: FloatPolicy::default(),
            check_field_metadata: true,
            check_schema_metadata: true,
        }
    }
}

//==================================================================================
// III. Orchestrator Configuration
//==================================================================================

/// One implementation under test, as named in the config file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImplementationSpec {
    /// This crate's own codec.
    Native {
        name: String,
        #[serde(default)]
        codec: CodecOptions,
    },
    /// The `arrow` crate's IPC stream reader and writer.
    ArrowRs {
        name: String,
        #[serde(default)]
        compression: BodyCompression,
    },
    /// The native codec with every column round-tripped through the C data
    /// interface before it is compared.
    CData { name: String },
    /// A separately built executable speaking the produce/consume protocol.
    External {
        name: String,
        command: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        /// Features both written and read by the executable.
        #[serde(default = "default_external_features")]
        features: FeatureSet,
        /// Features the executable puts into every stream it writes.
        #[serde(default)]
        emits: FeatureSet,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl ImplementationSpec {
    pub fn name(&self) -> &str {
        match self {
            ImplementationSpec::Native { name, .. }
            | ImplementationSpec::ArrowRs { name, .. }
            | ImplementationSpec::CData { name }
            | ImplementationSpec::External { name, .. } => name,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Worker threads for the pair matrix. `None` uses all cores.
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Skip pairs whose producer and consumer are the same implementation.
    #[serde(default)]
    pub exclude_self_pairs: bool,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Directory of `<case>.json` / `<case>.arrow_stream` files.
    #[serde(default)]
    pub corpus_dir: Option<PathBuf>,

    /// Include the generated corpus alongside the files on disk.
    #[serde(default = "default_true")]
    pub include_generated: bool,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Only run cases whose name contains this substring.
    #[serde(default)]
    pub case_filter: Option<String>,

    /// The implementations under test. Empty means the built-in set.
    #[serde(default)]
    pub implementations: Vec<ImplementationSpec>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            exclude_self_pairs: false,
            report_dir: default_report_dir(),
            corpus_dir: None,
            include_generated: true,
            seed: default_seed(),
            case_filter: None,
            implementations: Vec::new(),
        }
    }
}

/// The implementations used when the config names none.
pub fn builtin_implementations() -> Vec<ImplementationSpec> {
    vec![
        ImplementationSpec::Native {
            name: "native".to_string(),
            codec: CodecOptions::default(),
        },
        ImplementationSpec::Native {
            name: "native-a64-zstd-deltas".to_string(),
            codec: CodecOptions::default()
                .with_alignment(64)
                .with_compression(BodyCompression::Zstd)
                .with_dictionary_deltas(true),
        },
        ImplementationSpec::ArrowRs {
            name: "arrow-rs".to_string(),
            compression: BodyCompression::None,
        },
        ImplementationSpec::CData {
            name: "c-data".to_string(),
        },
    ]
}

//==================================================================================
// IV. RPC Configuration
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RpcConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret expected in the handshake. `None` disables auth.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Messages buffered per outbound call before the producer blocks.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub codec: CodecOptions,

    /// Load the generated corpus into the dataset store at startup.
    #[serde(default = "default_true")]
    pub preload_generated: bool,

    /// Finished calls the server remembers for the `calls` action.
    #[serde(default = "default_call_history")]
    pub call_history: usize,

    /// Live handshake sessions; the oldest is evicted beyond this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_token: None,
            channel_capacity: default_channel_capacity(),
            codec: CodecOptions::default(),
            preload_generated: true,
            call_history: default_call_history(),
            max_sessions: default_max_sessions(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl RpcConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

//==================================================================================
// V. The Unified InteropConfig
//==================================================================================

/// The single, unified configuration for a verifier run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct InteropConfig {
    #[serde(default)]
    pub codec: CodecOptions,

    #[serde(default)]
    pub compare: ComparePolicy,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub rpc: RpcConfig,
}

impl InteropConfig {
    /// Reads a JSON config file and validates it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: InteropConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.codec.validate()?;
        self.rpc.codec.validate()?;
        for spec in &self.orchestrator.implementations {
            if let ImplementationSpec::Native { codec, .. } = spec {
                codec.validate()?;
            }
        }
        if let FloatPolicy::Epsilon { epsilon } = self.compare.float {
            if !(epsilon >= 0.0) {
                return Err(IntegrityError::InvalidOptions(format!(
                    "float epsilon must be a non-negative number, got {epsilon}"
                )));
            }
        }
        if self.rpc.channel_capacity == 0 {
            return Err(IntegrityError::InvalidOptions(
                "rpc channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.rpc.call_history == 0 || self.rpc.max_sessions == 0 {
            return Err(IntegrityError::InvalidOptions(
                "rpc call_history and max_sessions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The implementations to run: the configured list, or the built-ins.
    pub fn implementations(&self) -> Vec<ImplementationSpec> {
        if self.orchestrator.implementations.is_empty() {
            builtin_implementations()
        } else {
            self.orchestrator.implementations.clone()
        }
    }
}

/// Helper for `serde` to default a boolean field to true.
fn default_true() -> bool {
    true
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("target/interop-report")
}

fn default_seed() -> u64 {
    0x5eed_a770
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_channel_capacity() -> usize {
    2
}

fn default_call_history() -> usize {
    1024
}

fn default_max_sessions() -> usize {
    1024
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_timeout_secs() -> u64 {
    60
}

/// External executables are assumed to cover everything but deltas and
/// compressed bodies unless the config says otherwise.
fn default_external_features() -> FeatureSet {
    Feature::all()
        .into_iter()
        .filter(|f| !matches!(f, Feature::DictionaryDeltas | Feature::CompressedBodies))
        .collect()
}
