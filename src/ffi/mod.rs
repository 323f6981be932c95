// In: src/ffi/mod.rs

//! The foreign-memory boundary: arrays handed out through the Arrow C data
//! interface and imported back as zero-copy views.
//!
//! ```text
//!   export_array ──> ExportedArray ──import_array──> ImportedArray (n views)
//!                         │                              │ drop
//!                         │ token() ──> LifetimeToken ───┴──> release()
//!                         └──────────── reclaim() (after release, 0 views)
//! ```

mod c_data;

#[cfg(test)]
mod tests;

pub use c_data::{
    export_array, export_batch, import_array, import_batch, round_trip_batch, ArrayDescriptor,
    ExportedArray, ImportedArray, LifetimeToken,
};
