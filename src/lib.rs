//! This file is the root of the `arrow_interop` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of the verifier (`codec`, `compare`,
//!     `orchestrator`, `rpc`, `ffi`, etc.) so the Rust compiler knows they exist.
//! 2.  Re-exporting the handful of entry points the CLI and integration tests
//!     reach for.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
#[macro_use]
pub mod observability; // Make macros available throughout the crate

pub mod codec;
pub mod compare;
pub mod config;
pub mod error;
pub mod ffi;
pub mod golden;
pub mod orchestrator;
pub mod rpc;
pub mod types;

//==================================================================================
// 2. Re-exports
//==================================================================================
pub use compare::{compare_datasets, ComparisonResult, Divergence, DivergenceKind};
pub use config::{CodecOptions, ComparePolicy, InteropConfig};
pub use error::{IntegrityError, Result};
pub use golden::{Corpus, GoldenCase};
pub use orchestrator::{run_from_config, run_matrix, MatrixOptions, MatrixReport};
pub use types::{DecodedDataset, Feature, FeatureSet, StreamItem};
