// In: src/orchestrator/implementation.rs

//! The capability interface every implementation under test is driven
//! through, and the registry that dispatches to them by name.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::builtin::{
    ArrowRsImplementation, CDataImplementation, NativeImplementation, GOLDEN_FILE_PRODUCER,
};
use super::CORPUS_LOADER;
use super::external::ExternalImplementation;
use crate::config::ImplementationSpec;
use crate::error::{IntegrityError, Result};
use crate::golden::GoldenCase;
use crate::types::{DecodedDataset, FeatureSet};

/// One implementation of the format, as seen by the orchestrator.
///
/// Implementations hold no per-run state, so one instance is shared by every
/// pair that runs concurrently.
pub trait Implementation: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Features it can put into a stream it produces.
    fn writes(&self) -> &FeatureSet;

    /// Features it can decode.
    fn reads(&self) -> &FeatureSet;

    /// Features every stream it produces uses, whatever the case.
    fn emits(&self) -> &FeatureSet;

    /// Encodes the case's expected dataset.
    fn produce(&self, case: &GoldenCase) -> Result<Vec<u8>>;

    /// Decodes a stream into the dataset it understood.
    fn consume(&self, bytes: &[u8]) -> Result<DecodedDataset>;
}

/// Why a producer/consumer pair cannot run a case, if it cannot.
///
/// The producer must write everything the case requires. The consumer must
/// read everything the case requires plus everything the stream will carry.
pub fn skip_reason(
    requires: &FeatureSet,
    producer: &dyn Implementation,
    stream_emits: &FeatureSet,
    consumer: &dyn Implementation,
) -> Option<String> {
    let unwritten: Vec<String> = requires
        .difference(producer.writes())
        .map(|f| f.to_string())
        .collect();
    if !unwritten.is_empty() {
        return Some(format!(
            "{} cannot write {}",
            producer.name(),
            unwritten.join(", ")
        ));
    }
    let unread: Vec<String> = requires
        .union(stream_emits)
        .filter(|f| !consumer.reads().contains(f))
        .map(|f| f.to_string())
        .collect();
    if !unread.is_empty() {
        return Some(format!("{} cannot read {}", consumer.name(), unread.join(", ")));
    }
    None
}

/// The uniform dispatch table of implementations, in configuration order.
#[derive(Debug, Default, Clone)]
pub struct ImplementationRegistry {
    implementations: Vec<Arc<dyn Implementation>>,
}

impl ImplementationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one implementation per spec. Names must be unique.
    pub fn from_specs(specs: &[ImplementationSpec]) -> Result<Self> {
        let mut registry = Self::new();
        for spec in specs {
            let implementation: Arc<dyn Implementation> = match spec {
                ImplementationSpec::Native { name, codec } => {
                    Arc::new(NativeImplementation::new(name, codec.clone())?)
                }
                ImplementationSpec::ArrowRs { name, compression } => {
                    Arc::new(ArrowRsImplementation::new(name, *compression))
                }
                ImplementationSpec::CData { name } => Arc::new(CDataImplementation::new(name)),
                ImplementationSpec::External {
                    name,
                    command,
                    args,
                    features,
                    emits,
                    timeout_secs,
                } => Arc::new(ExternalImplementation::new(
                    name,
                    command.clone(),
                    args.clone(),
                    features.clone(),
                    emits.clone(),
                    Duration::from_secs(*timeout_secs),
                )),
            };
            registry.register(implementation)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, implementation: Arc<dyn Implementation>) -> Result<()> {
        // Both names label rows the matrix adds on its own.
        if [GOLDEN_FILE_PRODUCER, CORPUS_LOADER].contains(&implementation.name()) {
            return Err(IntegrityError::InvalidOptions(format!(
                "implementation name '{}' is reserved",
                implementation.name()
            )));
        }
        if self.get(implementation.name()).is_some() {
            return Err(IntegrityError::InvalidOptions(format!(
                "implementation '{}' is registered twice",
                implementation.name()
            )));
        }
        log::debug!("registered implementation '{}'", implementation.name());
        self.implementations.push(implementation);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Implementation>> {
        self.implementations.iter().find(|i| i.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Implementation>> {
        self.implementations.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.implementations
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.implementations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementations.is_empty()
    }
}
