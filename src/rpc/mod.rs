// In: src/rpc/mod.rs

//! The streaming RPC contract, carried over Arrow Flight.
//!
//! ```text
//!   IntegrationClient ──gRPC──> IntegrationService ──> DatasetStore
//!          │                           │
//!     CallRegistry                CallRegistry
//!   (one CallStateMachine       (one CallStateMachine
//!        per call)                   per call)
//! ```
//!
//! Every codec envelope travels as one `FlightData`. Server calls run in
//! their own tokio task and push through a bounded queue, so a slow reader
//! slows the writer down. Dropping a call on either side cancels it.

pub mod auth;
pub mod client;
pub mod scenarios;
pub mod service;
pub mod state;
pub mod transport;


pub use auth::Authenticator;
pub use client::{DoGetCall, ExchangeCall, IntegrationClient};
pub use scenarios::{run_scenarios, ScenarioResult};
pub use service::{serve, spawn_server, DatasetStore, IntegrationService, PutAck, ServerHandle};
pub use state::{
    CallGuard, CallKind, CallRecord, CallRegistry, CallState, CallStateMachine, FailureReason,
};
pub use transport::{FlightDecoder, FlightMessage};
