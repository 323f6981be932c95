// In: src/orchestrator/mod.rs

//! The cross-implementation test matrix.
//!
//! Every case of the corpus is produced by every registered implementation
//! and consumed by every registered implementation, and the consumer's
//! reading is compared against the case's expectation:
//!
//! ```text
//!   case ──producer.produce──> bytes ──consumer.consume──> dataset
//!                                                             │
//!               case.expected ──────── compare_datasets ──────┘──> PairResult
//! ```
//!
//! Pairs share nothing mutable and run on a rayon pool. A failing or
//! panicking pair becomes one `Error` row; it never stops the run.

pub mod builtin;
pub mod external;
pub mod implementation;
pub mod report;

#[cfg(test)]
mod tests;

use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::compare::{compare_datasets, ComparisonResult};
use crate::config::{ComparePolicy, InteropConfig};
use crate::error::{IntegrityError, Result};
use crate::golden::{Corpus, GoldenCase};

pub use builtin::{
    read_with_arrow_rs, write_with_arrow_rs, ArrowRsImplementation, CDataImplementation,
    GoldenFileProducer, NativeImplementation, GOLDEN_FILE_PRODUCER,
};
pub use external::ExternalImplementation;
pub use implementation::{skip_reason, Implementation, ImplementationRegistry};
pub use report::{MatrixReport, PairResult, PairStatus, ReportSummary};

/// Producer and consumer named on the row of a case that failed to load.
pub const CORPUS_LOADER: &str = "corpus";

/// Run-wide settings for `run_matrix`.
#[derive(Debug, Clone, Default)]
pub struct MatrixOptions {
    /// Worker threads. `None` uses all cores.
    pub jobs: Option<usize>,
    pub exclude_self_pairs: bool,
    pub policy: ComparePolicy,
}

impl MatrixOptions {
    pub fn from_config(config: &InteropConfig) -> Self {
        Self {
            jobs: config.orchestrator.jobs,
            exclude_self_pairs: config.orchestrator.exclude_self_pairs,
            policy: config.compare.clone(),
        }
    }
}

struct PairJob {
    case: Arc<GoldenCase>,
    producer: Arc<dyn Implementation>,
    consumer: Arc<dyn Implementation>,
}

/// Lists every (case, producer, consumer) triple to run, in report order.
fn plan_jobs(corpus: &Corpus, registry: &ImplementationRegistry, exclude_self_pairs: bool) -> Vec<PairJob> {
    let golden_file: Arc<dyn Implementation> = Arc::new(GoldenFileProducer::default());
    let mut jobs = Vec::new();
    for case in corpus.cases() {
        let mut producers: Vec<Arc<dyn Implementation>> = registry.iter().cloned().collect();
        if case.golden_stream.is_some() {
            producers.push(golden_file.clone());
        }
        for producer in &producers {
            for consumer in registry.iter() {
                if exclude_self_pairs && producer.name() == consumer.name() {
                    continue;
                }
                jobs.push(PairJob {
                    case: case.clone(),
                    producer: producer.clone(),
                    consumer: consumer.clone(),
                });
            }
        }
    }
    jobs
}

/// Runs every pair on every case and collects one result per pair.
pub fn run_matrix(
    corpus: &Corpus,
    registry: &ImplementationRegistry,
    options: &MatrixOptions,
) -> Result<MatrixReport> {
    let jobs = plan_jobs(corpus, registry, options.exclude_self_pairs);
    log::info!(
        "running {} pairs over {} cases and {} implementations",
        jobs.len(),
        corpus.len(),
        registry.len()
    );

    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("interop-pair-{i}"));
    if let Some(jobs) = options.jobs {
        builder = builder.num_threads(jobs);
    }
    let pool = builder
        .build()
        .map_err(|e| IntegrityError::InternalError(format!("cannot build worker pool: {e}")))?;

    let mut results: Vec<PairResult> =
        pool.install(|| jobs.par_iter().map(|job| run_pair(job, &options.policy)).collect());
    results.extend(corpus.load_errors().iter().map(|e| PairResult {
        case: e.case.clone(),
        producer: CORPUS_LOADER.to_string(),
        consumer: CORPUS_LOADER.to_string(),
        status: PairStatus::Error,
        detail: Some(format!("load: {}", e.message)),
        divergence: None,
        duration_ms: 0,
        stream_bytes: None,
    }));

    let cases = corpus.len() + corpus.load_errors().len();
    let report = MatrixReport::new(registry.names(), cases, results);
    log_event!(
        "matrix_finished",
        pairs = report.summary.total,
        passed = report.summary.passed,
        failed = report.summary.failed,
        errors = report.summary.errors,
        skipped = report.summary.skipped
    );
    Ok(report)
}

/// Loads the corpus and implementations named by `config`, runs the matrix
/// and writes the JSON report.
pub fn run_from_config(config: &InteropConfig) -> Result<MatrixReport> {
    let corpus = Corpus::from_config(&config.orchestrator)?;
    let registry = ImplementationRegistry::from_specs(&config.implementations())?;
    let report = run_matrix(&corpus, &registry, &MatrixOptions::from_config(config))?;
    report.write_json(&config.orchestrator.report_dir)?;
    Ok(report)
}

fn run_pair(job: &PairJob, policy: &ComparePolicy) -> PairResult {
    let case = job.case.as_ref();
    let producer = job.producer.as_ref();
    let consumer = job.consumer.as_ref();
    let mut result = PairResult {
        case: case.name.clone(),
        producer: producer.name().to_string(),
        consumer: consumer.name().to_string(),
        status: PairStatus::Pass,
        detail: None,
        divergence: None,
        duration_ms: 0,
        stream_bytes: None,
    };

    // 1. Capability check.
    let stream_emits = if producer.name() == GOLDEN_FILE_PRODUCER {
        &case.stream_features
    } else {
        producer.emits()
    };
    if let Some(reason) = skip_reason(&case.requires, producer, stream_emits, consumer) {
        result.status = PairStatus::Skipped;
        result.detail = Some(reason);
        return result;
    }

    let started = Instant::now();

    // 2. Produce.
    let bytes = match guarded(|| producer.produce(case)) {
        Ok(bytes) => bytes,
        Err(message) => {
            result.status = PairStatus::Error;
            result.detail = Some(format!("produce: {message}"));
            result.duration_ms = elapsed_ms(started);
            log_pair(&result);
            return result;
        }
    };
    result.stream_bytes = Some(bytes.len());

    // 3. Consume.
    let actual = match guarded(|| consumer.consume(&bytes)) {
        Ok(actual) => actual,
        Err(message) => {
            result.status = PairStatus::Error;
            result.detail = Some(format!("consume: {message}"));
            result.duration_ms = elapsed_ms(started);
            log_pair(&result);
            return result;
        }
    };

    // 4. Compare.
    match compare_datasets(&case.expected, &actual, policy) {
        ComparisonResult::Equivalent { rows } => {
            result.detail = Some(format!("{rows} rows"));
        }
        ComparisonResult::Divergent(divergence) => {
            result.status = PairStatus::Fail;
            result.detail = Some(divergence.to_string());
            result.divergence = Some(divergence);
        }
    }
    result.duration_ms = elapsed_ms(started);
    log_pair(&result);
    result
}

/// Runs `f`, turning both errors and panics into a diagnostic string.
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> std::result::Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn log_pair(result: &PairResult) {
    match result.status {
        PairStatus::Pass | PairStatus::Skipped => log::debug!(
            "{} {} -> {}: {:?}",
            result.case,
            result.producer,
            result.consumer,
            result.status
        ),
        PairStatus::Fail | PairStatus::Error => log::warn!(
            "{} {} -> {}: {:?} {}",
            result.case,
            result.producer,
            result.consumer,
            result.status,
            result.detail.as_deref().unwrap_or("")
        ),
    }
}
