// In: src/rpc/state.rs

//! Per-call lifecycle tracking.
//!
//! ```text
//!   Idle ──> Handshaking ──> SchemaSent ──> Streaming ──> HalfClosed ──> Completed
//!     │            │              │             │  ↺           │  ↺
//!     └────────────┴──────────────┴─────────────┴──────────────┴──> Failed(reason)
//! ```
//!
//! Calls that need no handshake start at `SchemaSent`; a handshake call ends
//! at `Completed` straight from `Handshaking`. `Completed` and `Failed` are
//! terminal.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{IntegrityError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Transport(String),
    Decode(String),
    Cancelled,
    Unauthenticated,
}

impl FailureReason {
    /// The reason a call failed with `err`.
    pub fn of(err: &IntegrityError) -> Self {
        match err {
            IntegrityError::CallCancelled => FailureReason::Cancelled,
            IntegrityError::Unauthenticated(_) => FailureReason::Unauthenticated,
            e if e.is_codec_error() => FailureReason::Decode(e.to_string()),
            e => FailureReason::Transport(e.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", content = "failure", rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Handshaking,
    SchemaSent,
    Streaming,
    HalfClosed,
    Completed,
    Failed(FailureReason),
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed(_))
    }

    fn may_become(&self, next: &CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Completed | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Idle, Handshaking | SchemaSent) => true,
            (Handshaking, SchemaSent | Completed) => true,
            (SchemaSent, Streaming | HalfClosed) => true,
            (Streaming, Streaming | HalfClosed) => true,
            (HalfClosed, HalfClosed | Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "Idle"),
            CallState::Handshaking => write!(f, "Handshaking"),
            CallState::SchemaSent => write!(f, "SchemaSent"),
            CallState::Streaming => write!(f, "Streaming"),
            CallState::HalfClosed => write!(f, "HalfClosed"),
            CallState::Completed => write!(f, "Completed"),
            CallState::Failed(reason) => write!(f, "Failed({reason:?})"),
        }
    }
}

/// The state of one call. Each call owns its own machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStateMachine {
    state: CallState,
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStateMachine {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn transition(&mut self, next: CallState) -> Result<()> {
        if !self.state.may_become(&next) {
            return Err(IntegrityError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Moves to `Failed`. Failing a finished call is an invalid transition.
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        self.transition(CallState::Failed(reason))
    }
}

//==================================================================================
// Call registry
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Handshake,
    DoGet,
    DoPut,
    DoExchange,
}

/// What the registry knows about one call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub id: u64,
    pub kind: CallKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    pub state: CallState,
    pub batches_sent: usize,
    pub batches_received: usize,
}

/// Finished calls kept by a registry built with `CallRegistry::new`.
pub const DEFAULT_CALL_HISTORY: usize = 1024;

#[derive(Debug, Default)]
struct RegistryInner {
    active: BTreeMap<u64, CallRecord>,
    finished: VecDeque<CallRecord>,
}

/// Active and finished calls of one server or client. Only the most recent
/// `history` finished calls are kept.
#[derive(Debug)]
pub struct CallRegistry {
    next_id: AtomicU64,
    history: usize,
    inner: Mutex<RegistryInner>,
}

impl CallRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_history(DEFAULT_CALL_HISTORY)
    }

    pub fn with_history(history: usize) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            history: history.max(1),
            inner: Mutex::new(RegistryInner::default()),
        })
    }

    /// Registers a new call and returns the guard that drives it.
    pub fn begin(self: &Arc<Self>, kind: CallKind, dataset: Option<String>) -> CallGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = CallRecord {
            id,
            kind,
            dataset,
            state: CallState::Idle,
            batches_sent: 0,
            batches_received: 0,
        };
        self.inner.lock().active.insert(id, record.clone());
        log::debug!("call {id} ({kind:?}) started");
        CallGuard {
            registry: self.clone(),
            machine: CallStateMachine::new(),
            record,
        }
    }

    pub fn active(&self) -> Vec<CallRecord> {
        self.inner.lock().active.values().cloned().collect()
    }

    /// Finished calls, oldest first.
    pub fn finished(&self) -> Vec<CallRecord> {
        self.inner.lock().finished.iter().cloned().collect()
    }

    /// Every call, active ones first, each group in start order.
    pub fn snapshot(&self) -> Vec<CallRecord> {
        let inner = self.inner.lock();
        let mut all: Vec<CallRecord> = inner.active.values().cloned().collect();
        let mut finished: Vec<CallRecord> = inner.finished.iter().cloned().collect();
        finished.sort_by_key(|r| r.id);
        all.extend(finished);
        all
    }

    fn update(&self, record: &CallRecord) {
        let mut inner = self.inner.lock();
        if record.state.is_terminal() {
            inner.active.remove(&record.id);
            if inner.finished.len() == self.history {
                inner.finished.pop_front();
            }
            inner.finished.push_back(record.clone());
        } else if let Some(slot) = inner.active.get_mut(&record.id) {
            *slot = record.clone();
        }
    }
}

/// Drives one call's state machine and mirrors it into the registry.
///
/// A guard dropped before its call reached a terminal state records the call
/// as `Failed(Cancelled)`: the task running it went away.
#[derive(Debug)]
pub struct CallGuard {
    registry: Arc<CallRegistry>,
    machine: CallStateMachine,
    record: CallRecord,
}

impl CallGuard {
    pub fn id(&self) -> u64 {
        self.record.id
    }

    pub fn state(&self) -> &CallState {
        self.machine.state()
    }

    pub fn transition(&mut self, next: CallState) -> Result<()> {
        self.machine.transition(next)?;
        self.record.state = self.machine.state().clone();
        self.registry.update(&self.record);
        Ok(())
    }

    /// Records a failure unless the call already finished.
    pub fn fail(&mut self, reason: FailureReason) {
        if self.machine.is_terminal() {
            return;
        }
        log::warn!("call {} failed: {reason:?}", self.record.id);
        // Every non-terminal state may fail.
        let _ = self.transition(CallState::Failed(reason));
    }

    /// Counts one batch sent and enters `Streaming` if not there yet.
    pub fn record_sent(&mut self) -> Result<()> {
        self.record.batches_sent += 1;
        self.enter_streaming()
    }

    pub fn record_received(&mut self) -> Result<()> {
        self.record.batches_received += 1;
        self.enter_streaming()
    }

    fn enter_streaming(&mut self) -> Result<()> {
        match self.machine.state() {
            // One direction already closed; batches keep flowing the other way.
            CallState::HalfClosed => self.transition(CallState::HalfClosed),
            _ => self.transition(CallState::Streaming),
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if !self.machine.is_terminal() {
            self.fail(FailureReason::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle_is_accepted() {
        let mut machine = CallStateMachine::new();
        for next in [
            CallState::Handshaking,
            CallState::SchemaSent,
            CallState::Streaming,
            CallState::Streaming,
            CallState::HalfClosed,
            CallState::Completed,
        ] {
            machine.transition(next).unwrap();
        }
        assert!(machine.is_terminal());
    }

    #[test]
    fn test_illegal_and_post_terminal_transitions_are_rejected() {
        let mut machine = CallStateMachine::new();
        let skip = machine.transition(CallState::Completed);
        machine.fail(FailureReason::Cancelled).unwrap();
        let after = machine.transition(CallState::SchemaSent);

        assert!(matches!(skip, Err(IntegrityError::InvalidTransition { .. })));
        assert!(matches!(after, Err(IntegrityError::InvalidTransition { .. })));
        assert_eq!(*machine.state(), CallState::Failed(FailureReason::Cancelled));
    }

    #[test]
    fn test_dropped_guard_records_cancellation() {
        // 1. Arrange
        let registry = CallRegistry::new();
        let mut guard = registry.begin(CallKind::DoGet, Some("numbers".to_string()));
        guard.transition(CallState::SchemaSent).unwrap();
        guard.record_sent().unwrap();
        assert_eq!(registry.active().len(), 1);

        // 2. Act
        drop(guard);

        // 3. Assert
        assert!(registry.active().is_empty());
        let record = registry.finished().pop().unwrap();
        assert_eq!(record.state, CallState::Failed(FailureReason::Cancelled));
        assert_eq!(record.batches_sent, 1);
    }

    #[test]
    fn test_finished_history_is_bounded() {
        // 1. Arrange
        let registry = CallRegistry::with_history(3);

        // 2. Act
        for _ in 0..10 {
            let mut guard = registry.begin(CallKind::DoPut, None);
            guard.transition(CallState::SchemaSent).unwrap();
            guard.transition(CallState::HalfClosed).unwrap();
            guard.transition(CallState::Completed).unwrap();
        }

        // 3. Assert: only the three most recent calls remain.
        let ids: Vec<u64> = registry.finished().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
        assert_eq!(registry.snapshot().len(), 3);
    }

    #[test]
    fn test_failure_reason_follows_the_error() {
        assert_eq!(FailureReason::of(&IntegrityError::CallCancelled), FailureReason::Cancelled);
        assert_eq!(
            FailureReason::of(&IntegrityError::Unauthenticated("no".to_string())),
            FailureReason::Unauthenticated
        );
        assert!(matches!(
            FailureReason::of(&IntegrityError::MalformedStream("bad".to_string())),
            FailureReason::Decode(_)
        ));
    }
}
