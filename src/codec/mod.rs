// In: src/codec/mod.rs

//! The columnar stream codec.
//!
//! This module is the bridge between in-memory Arrow data and the streaming
//! interchange format that every implementation under test must agree on.
//!
//! ```text
//!   Schema + [RecordBatch | DictionaryUpdate]*
//!                 |
//!                 v
//!         StreamEncoder ----(Envelope)----> StreamWriter<W: Write> --> bytes
//!                 |                                                      |
//!                 |                  RPC transport (FlightData)          |
//!                 v                                                      v
//!         StreamDecoder <---(metadata, body)---- StreamReader<R: Read> <-+
//!                 |
//!                 v
//!   Schema, then StreamItem::{Dictionary, Batch}, lazily
//! ```
//!
//! - `format`: framing constants and padding helpers.
//! - `envelope`: continuation-marker framing of one message.
//! - `message`: flatbuffer metadata builders and parsers.
//! - `layout` / `array_reader`: array <-> field nodes + body buffers.
//! - `compression`: per-buffer LZ4 frame / ZSTD body compression.
//! - `dictionary`: id assignment, encoder tracker, decoder session.

pub mod array_reader;
pub mod compression;
pub mod dictionary;
pub mod envelope;
pub mod format;
pub mod layout;
pub mod message;
pub mod reader;
pub mod writer;

#[cfg(test)]
mod tests;

use arrow::datatypes::Schema;

pub use envelope::{Envelope, MessageKind};
pub use reader::{decode, read_dataset, Decoded, StreamDecoder, StreamReader};
pub use writer::{StreamEncoder, StreamWriter};

use crate::config::CodecOptions;
use crate::error::Result;
use crate::types::{DecodedDataset, StreamItem};

/// Encodes a complete stream: schema, then every item in order, then the
/// end-of-stream marker.
pub fn encode(schema: &Schema, items: &[StreamItem], options: &CodecOptions) -> Result<Vec<u8>> {
    let mut writer = StreamWriter::try_new(Vec::new(), schema, options.clone())?;
    for item in items {
        writer.write_item(item)?;
    }
    writer.into_inner()
}

/// Encodes a materialized dataset.
pub fn encode_dataset(dataset: &DecodedDataset, options: &CodecOptions) -> Result<Vec<u8>> {
    let mut writer = StreamWriter::try_new(Vec::new(), &dataset.schema, options.clone())?;
    for batch in &dataset.batches {
        writer.write(batch)?;
    }
    writer.into_inner()
}
