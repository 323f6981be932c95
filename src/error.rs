// In: src/error.rs

//! This module defines the single, unified error type for the entire verifier.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

use thiserror::Error;

use crate::compare::Divergence;

pub type Result<T> = std::result::Result<T, IntegrityError>;

#[derive(Error, Debug)]
pub enum IntegrityError {
    // =========================================================================
    // === Codec Errors (fatal to the stream being decoded)
    // =========================================================================
    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Record batch references unknown dictionary id {0}")]
    UnknownDictionaryId(i64),

    #[error("Unsupported data type for this operation: {0}")]
    UnsupportedType(String),

    #[error("Invalid codec options: {0}")]
    InvalidOptions(String),

    // =========================================================================
    // === Comparator Errors
    // =========================================================================
    #[error("Datasets diverge: {0}")]
    ComparisonDivergence(Box<Divergence>),

    // =========================================================================
    // === RPC Errors
    // =========================================================================
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Call was cancelled by the peer")]
    CallCancelled,

    #[error("Invalid call state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // =========================================================================
    // === Foreign-Memory Errors
    // =========================================================================
    #[error("Lifetime violation: {0}")]
    LifetimeViolation(String),

    // =========================================================================
    // === Orchestrator Errors
    // =========================================================================
    #[error("Implementation '{name}' failed: {message}")]
    Implementation { name: String, message: String },

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Internal logic error (this is a bug): {0}")]
    InternalError(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error originating from the underlying I/O subsystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically while loading corpus
    /// descriptions, configuration or reports.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A gRPC status returned by the remote side of a Flight call.
    #[error("RPC status: {0}")]
    Status(#[from] tonic::Status),

    #[error("RPC transport error: {0}")]
    TonicTransport(#[from] tonic::transport::Error),
}

impl IntegrityError {
    /// True for the three error kinds a decoder raises on bad input.
    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            IntegrityError::MalformedStream(_)
                | IntegrityError::SchemaMismatch(_)
                | IntegrityError::UnknownDictionaryId(_)
                | IntegrityError::UnsupportedType(_)
        )
    }
}

// =============================================================================
// === Manual `From` Implementations ===
// =============================================================================

impl From<Divergence> for IntegrityError {
    fn from(divergence: Divergence) -> Self {
        IntegrityError::ComparisonDivergence(Box::new(divergence))
    }
}

impl From<flatbuffers::InvalidFlatbuffer> for IntegrityError {
    fn from(err: flatbuffers::InvalidFlatbuffer) -> Self {
        IntegrityError::MalformedStream(format!("unable to parse message metadata: {err}"))
    }
}

impl From<IntegrityError> for tonic::Status {
    fn from(err: IntegrityError) -> tonic::Status {
        match err {
            IntegrityError::Status(status) => status,
            IntegrityError::Unauthenticated(msg) => tonic::Status::unauthenticated(msg),
            IntegrityError::Unsupported(msg) => tonic::Status::failed_precondition(msg),
            IntegrityError::CallCancelled => tonic::Status::cancelled("call cancelled"),
            other if other.is_codec_error() => tonic::Status::invalid_argument(other.to_string()),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

impl IntegrityError {
    /// Maps a status received from a peer back onto the error it stands for.
    pub fn from_status(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unauthenticated => {
                IntegrityError::Unauthenticated(status.message().to_string())
            }
            tonic::Code::FailedPrecondition => {
                IntegrityError::Unsupported(status.message().to_string())
            }
            tonic::Code::Cancelled => IntegrityError::CallCancelled,
            _ => IntegrityError::Status(status),
        }
    }
}
