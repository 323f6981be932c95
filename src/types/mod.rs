//! This module defines the core, strongly-typed data representations shared by
//! the codec, the comparator, the orchestrator and the RPC layer.
//!
//! It includes the `StreamItem` model of one logical stream element, the
//! `DecodedDataset` produced by every consumer, and the `Feature` enum that
//! implementations use to advertise which parts of the format they handle.

pub mod feature;
pub mod stream;

// Re-export the main type(s) for easier access.
pub use feature::{Feature, FeatureSet};
pub use stream::{DecodedDataset, DictionaryUpdate, StreamItem};
