// In: src/rpc/scenarios.rs

//! End-to-end checks of a Flight server, driven through `IntegrationClient`.

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::client::IntegrationClient;
use super::state::{CallKind, CallState, FailureReason};
use super::transport::FlightMessage;
use crate::compare::{compare_datasets, ComparisonResult};
use crate::config::ComparePolicy;
use crate::error::{IntegrityError, Result};
use crate::golden::{Corpus, GoldenCase};
use crate::orchestrator::report::PairStatus;
use crate::types::DecodedDataset;

pub const ROUND_TRIP: &str = "put_get_round_trip";
pub const EXCHANGE_ECHO: &str = "exchange_echo";
pub const CANCELLATION: &str = "mid_stream_cancellation";
pub const AUTH_REJECTION: &str = "auth_rejection";

/// Shape of the dataset streamed by the cancellation scenario. Large enough
/// that the transport's flow-control window cannot absorb all of it.
const CANCEL_BATCHES: usize = 16;
const CANCEL_BATCH_ROWS: usize = 64 * 1024;
const CANCEL_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioResult {
    pub scenario: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    pub status: PairStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

impl ScenarioResult {
    fn from_outcome(
        scenario: &str,
        case: Option<&str>,
        started: Instant,
        outcome: Result<Outcome>,
    ) -> Self {
        let (status, detail) = match outcome {
            Ok(Outcome::Pass(detail)) => (PairStatus::Pass, Some(detail)),
            Ok(Outcome::Skip(detail)) => (PairStatus::Skipped, Some(detail)),
            Err(IntegrityError::ComparisonDivergence(d)) => (PairStatus::Fail, Some(d.to_string())),
            Err(e) => (PairStatus::Error, Some(e.to_string())),
        };
        Self {
            scenario: scenario.to_string(),
            case: case.map(str::to_string),
            status,
            detail,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

enum Outcome {
    Pass(String),
    Skip(String),
}

/// Runs every scenario against the server `client` is connected to.
///
/// The round trip and the exchange run once per case; cancellation and auth
/// rejection run once. `client` must already have shaken hands when the
/// server requires it.
pub async fn run_scenarios(
    client: &mut IntegrationClient,
    cases: &Corpus,
    policy: &ComparePolicy,
) -> Vec<ScenarioResult> {
    let mut results = Vec::new();
    for case in cases.cases() {
        let started = Instant::now();
        let outcome = put_get_round_trip(client, case, policy).await;
        results.push(ScenarioResult::from_outcome(
            ROUND_TRIP,
            Some(&case.name),
            started,
            outcome,
        ));

        let started = Instant::now();
        let outcome = exchange_echo(client, case, policy).await;
        results.push(ScenarioResult::from_outcome(
            EXCHANGE_ECHO,
            Some(&case.name),
            started,
            outcome,
        ));
    }

    let started = Instant::now();
    let outcome = mid_stream_cancellation(client).await;
    results.push(ScenarioResult::from_outcome(CANCELLATION, None, started, outcome));

    let started = Instant::now();
    let outcome = auth_rejection(client).await;
    results.push(ScenarioResult::from_outcome(AUTH_REJECTION, None, started, outcome));

    let failed = results
        .iter()
        .filter(|r| matches!(r.status, PairStatus::Fail | PairStatus::Error))
        .count();
    log_event!("scenarios_finished", total = results.len(), failed = failed);
    results
}

fn equivalent(
    expected: &DecodedDataset,
    actual: &DecodedDataset,
    policy: &ComparePolicy,
) -> Result<usize> {
    match compare_datasets(expected, actual, policy) {
        ComparisonResult::Equivalent { rows } => Ok(rows),
        ComparisonResult::Divergent(d) => Err(d.into()),
    }
}

async fn put_get_round_trip(
    client: &mut IntegrationClient,
    case: &GoldenCase,
    policy: &ComparePolicy,
) -> Result<Outcome> {
    let name = format!("round-trip/{}", case.name);
    let acks = client.do_put(&name, &case.expected).await?;
    if acks.len() != case.expected.num_batches() {
        return Err(IntegrityError::Transport(format!(
            "{} acks for {} batches",
            acks.len(),
            case.expected.num_batches()
        )));
    }
    let acked_rows = acks.last().map_or(0, |a| a.rows_received);
    if acked_rows != case.expected.num_rows() {
        return Err(IntegrityError::Transport(format!(
            "server acknowledged {acked_rows} of {} rows",
            case.expected.num_rows()
        )));
    }

    let fetched = client.do_get(&name).await?.collect().await?;
    client.do_action("drop", Bytes::from(name.into_bytes())).await?;
    let rows = equivalent(&case.expected, &fetched, policy)?;
    Ok(Outcome::Pass(format!("{rows} rows")))
}

async fn exchange_echo(
    client: &mut IntegrationClient,
    case: &GoldenCase,
    policy: &ComparePolicy,
) -> Result<Outcome> {
    let mut call = client.do_exchange(&case.expected.schema).await?;
    let mut echoed = Vec::with_capacity(case.expected.num_batches());

    // One batch in flight at a time, so neither side's queue can fill up.
    for (i, batch) in case.expected.batches.iter().enumerate() {
        let tag = format!("batch={i}");
        call.send_batch(batch, Bytes::from(tag.clone())).await?;
        loop {
            match call.next_message().await? {
                Some(FlightMessage::Batch {
                    batch,
                    app_metadata,
                }) => {
                    if app_metadata.as_ref() != tag.as_bytes() {
                        return Err(IntegrityError::Transport(format!(
                            "batch {i} came back with app metadata {:?}",
                            String::from_utf8_lossy(&app_metadata)
                        )));
                    }
                    echoed.push(batch);
                    break;
                }
                Some(_) => continue,
                None => {
                    return Err(IntegrityError::Transport(format!(
                        "exchange ended before batch {i} was echoed"
                    )))
                }
            }
        }
    }

    call.send_metadata(Bytes::from_static(b"ping")).await?;
    let pong = loop {
        match call.next_message().await? {
            Some(FlightMessage::Metadata(m)) => break m,
            Some(_) => continue,
            None => {
                return Err(IntegrityError::Transport(
                    "exchange ended before metadata was echoed".to_string(),
                ))
            }
        }
    };
    if pong.as_ref() != b"ping" {
        return Err(IntegrityError::Transport("metadata echo differs".to_string()));
    }

    call.half_close()?;
    while call.next_message().await?.is_some() {}
    if *call.state() != CallState::Completed {
        return Err(IntegrityError::Transport(format!(
            "exchange ended in state {}",
            call.state()
        )));
    }

    let actual = DecodedDataset::new(case.expected.schema.clone(), echoed);
    let rows = equivalent(&case.expected, &actual, policy)?;
    Ok(Outcome::Pass(format!("{rows} rows echoed")))
}

/// Enough data that the transport cannot buffer all of it ahead of a reader.
pub(crate) fn cancellation_dataset() -> Result<DecodedDataset> {
    let schema = Arc::new(Schema::new(vec![Field::new("seq", DataType::Int64, false)]));
    let batches = (0..CANCEL_BATCHES)
        .map(|b| {
            let start = (b * CANCEL_BATCH_ROWS) as i64;
            let values = Int64Array::from_iter_values(start..start + CANCEL_BATCH_ROWS as i64);
            RecordBatch::try_new(schema.clone(), vec![Arc::new(values) as ArrayRef])
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(DecodedDataset::new(schema, batches))
}

async fn mid_stream_cancellation(client: &mut IntegrationClient) -> Result<Outcome> {
    let name = format!("cancel/{:016x}", rand::random::<u64>());
    let dataset = cancellation_dataset()?;
    client.do_put(&name, &dataset).await?;

    let mut call = client.do_get(&name).await?;
    let first = call.next_batch().await?;
    if first.is_none() {
        return Err(IntegrityError::Transport("stream ended before its first batch".to_string()));
    }
    call.cancel();

    // The server notices at its next send and records the call.
    let deadline = Instant::now() + CANCEL_DEADLINE;
    let outcome = loop {
        let calls = client.server_calls().await?;
        let record = calls
            .iter()
            .rev()
            .find(|r| r.kind == CallKind::DoGet && r.dataset.as_deref() == Some(name.as_str()));
        match record.map(|r| (&r.state, r.batches_sent)) {
            Some((CallState::Failed(FailureReason::Cancelled), sent)) => {
                break Ok(Outcome::Pass(format!(
                    "server stopped after {sent} of {} batches",
                    dataset.num_batches()
                )));
            }
            Some((state, _)) if state.is_terminal() => {
                break Err(IntegrityError::Transport(format!(
                    "cancelled call ended as {state}"
                )));
            }
            _ if Instant::now() >= deadline => {
                break Err(IntegrityError::Transport(
                    "server never observed the cancellation".to_string(),
                ));
            }
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    };
    client.do_action("drop", Bytes::from(name.into_bytes())).await?;
    outcome
}

async fn auth_rejection(client: &mut IntegrationClient) -> Result<Outcome> {
    let mut stranger = client.without_session();
    match stranger.handshake(Some("not-the-token")).await {
        Ok(()) => return Ok(Outcome::Skip("server has authentication disabled".to_string())),
        Err(IntegrityError::Unauthenticated(_)) => {}
        Err(e) => return Err(e),
    }
    match stranger.list_flights().await {
        Err(IntegrityError::Unauthenticated(_)) => {
            Ok(Outcome::Pass("bad token and missing session rejected".to_string()))
        }
        Ok(_) => Err(IntegrityError::Transport(
            "call without a session was accepted".to_string(),
        )),
        Err(e) => Err(e),
    }
}

/// The scenario results as a colored table followed by a summary line.
pub fn render_scenarios(results: &[ScenarioResult]) -> String {
    let width = results
        .iter()
        .map(|r| r.scenario.len())
        .chain(["scenario".len()])
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    let mut passed = 0;
    for r in results {
        let status = match r.status {
            PairStatus::Pass => {
                passed += 1;
                "PASS ".green()
            }
            PairStatus::Fail => "FAIL ".red().bold(),
            PairStatus::Error => "ERROR".magenta().bold(),
            PairStatus::Skipped => "SKIP ".yellow(),
        };
        let _ = writeln!(
            out,
            "{:<width$}  {}  {}  {}",
            r.scenario,
            status,
            r.case.as_deref().unwrap_or("-"),
            r.detail.as_deref().unwrap_or("")
        );
    }
    let _ = writeln!(out, "{passed}/{} scenarios passed", results.len());
    out
}

/// Nonzero when any scenario failed or errored.
pub fn exit_code(results: &[ScenarioResult]) -> i32 {
    let bad = results
        .iter()
        .any(|r| matches!(r.status, PairStatus::Fail | PairStatus::Error));
    i32::from(bad)
}
