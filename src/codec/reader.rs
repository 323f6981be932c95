// In: src/codec/reader.rs

//! The decoding half of the codec.
//!
//! `StreamDecoder` interprets one envelope at a time and owns the dictionary
//! session; it knows nothing about where envelopes come from, so the same
//! decoder serves byte streams and Flight messages. `StreamReader` pulls
//! envelopes from any `std::io::Read` source and exposes the stream as a lazy,
//! single-pass iterator.

use arrow::buffer::Buffer;
use arrow::datatypes::SchemaRef;
use arrow::ipc::{convert::fb_to_schema, root_as_message, MessageHeader, MetadataVersion};
use arrow::record_batch::RecordBatch;
use std::io::{Cursor, Read};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::array_reader::{read_dictionary_values, read_record_batch};
use super::dictionary::DictionarySession;
use super::envelope::{read_envelope, MessageKind};
use super::message::BatchHeader;
use super::writer::check_supported;
use crate::error::{IntegrityError, Result};
use crate::types::{DecodedDataset, DictionaryUpdate, StreamItem};

/// The outcome of feeding one envelope to a `StreamDecoder`.
#[derive(Debug)]
pub enum Decoded {
    Schema(SchemaRef),
    Item(StreamItem),
    /// An envelope of a kind this decoder does not interpret.
    Skipped,
    EndOfStream,
}

/// Envelope-level decoder for a single stream.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    schema: Option<SchemaRef>,
    dictionaries: DictionarySession,
    batches_decoded: usize,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    pub fn batches_decoded(&self) -> usize {
        self.batches_decoded
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn require_schema(&self, what: &str) -> Result<SchemaRef> {
        self.schema.clone().ok_or_else(|| {
            IntegrityError::MalformedStream(format!("{what} received before the schema"))
        })
    }

    /// Interprets one envelope. An empty `metadata` is the end-of-stream marker.
    pub fn decode(&mut self, metadata: &[u8], body: Buffer) -> Result<Decoded> {
        if self.finished {
            return Err(IntegrityError::MalformedStream(
                "message received after end of stream".to_string(),
            ));
        }
        if metadata.is_empty() {
            self.finished = true;
            return Ok(Decoded::EndOfStream);
        }

        let message = root_as_message(metadata)?;
        let version = message.version();
        if version < MetadataVersion::V4 {
            return Err(IntegrityError::MalformedStream(format!(
                "unsupported metadata version {}",
                version.0
            )));
        }
        let legacy_union_validity = version < MetadataVersion::V5;
        if message.bodyLength() > body.len() as i64 {
            return Err(IntegrityError::MalformedStream(format!(
                "message declares a {} byte body, {} bytes received",
                message.bodyLength(),
                body.len()
            )));
        }

        match message.header_type() {
            MessageHeader::Schema => {
                if self.schema.is_some() {
                    return Err(IntegrityError::MalformedStream(
                        "stream carries a second schema".to_string(),
                    ));
                }
                let fb = message.header_as_schema().ok_or_else(|| {
                    IntegrityError::MalformedStream("schema message without schema".to_string())
                })?;
                // The flatbuffer converter panics on some invalid type tables.
                let schema = catch_unwind(AssertUnwindSafe(|| fb_to_schema(fb))).map_err(|_| {
                    IntegrityError::MalformedStream("schema message is not valid".to_string())
                })?;
                for field in schema.fields().iter() {
                    check_supported(field.data_type())?;
                }
                self.dictionaries = DictionarySession::for_schema(&schema)?;
                let schema = Arc::new(schema);
                self.schema = Some(schema.clone());
                log::debug!("decoded schema with {} fields", schema.fields().len());
                Ok(Decoded::Schema(schema))
            }
            MessageHeader::DictionaryBatch => {
                self.require_schema("dictionary batch")?;
                let fb = message.header_as_dictionary_batch().ok_or_else(|| {
                    IntegrityError::MalformedStream("dictionary message without header".to_string())
                })?;
                let id = fb.id();
                let is_delta = fb.isDelta();
                let data = fb.data().ok_or_else(|| {
                    IntegrityError::MalformedStream(format!("dictionary {id} has no data"))
                })?;
                let header = BatchHeader::from_fb(data)?;
                let value_type = self.dictionaries.value_type(id)?.clone();
                let values = read_dictionary_values(
                    &value_type,
                    &header,
                    &body,
                    &self.dictionaries,
                    legacy_union_validity,
                )?;
                self.dictionaries.apply(id, values.clone(), is_delta)?;
                log::debug!(
                    "applied dictionary {id} ({} values, delta: {is_delta})",
                    values.len()
                );
                Ok(Decoded::Item(StreamItem::Dictionary(DictionaryUpdate {
                    id,
                    values,
                    is_delta,
                })))
            }
            MessageHeader::RecordBatch => {
                let schema = self.require_schema("record batch")?;
                let fb = message.header_as_record_batch().ok_or_else(|| {
                    IntegrityError::MalformedStream("record batch message without header".to_string())
                })?;
                let header = BatchHeader::from_fb(fb)?;
                let batch = read_record_batch(
                    &schema,
                    &header,
                    &body,
                    &self.dictionaries,
                    legacy_union_validity,
                )?;
                self.batches_decoded += 1;
                Ok(Decoded::Item(StreamItem::Batch(batch)))
            }
            other => {
                log::warn!("skipping envelope with unknown header type {}", other.0);
                Ok(Decoded::Skipped)
            }
        }
    }
}

/// Lazy, pull-based reader over an encoded stream.
///
/// The schema is read on construction. Items are decoded one envelope at a
/// time as the caller pulls them; the reader is single pass and stops for
/// good after the first error or the end-of-stream marker. Dropping the
/// reader releases the source and the dictionary session.
pub struct StreamReader<R: Read> {
    source: R,
    decoder: StreamDecoder,
    schema: SchemaRef,
    done: bool,
}

impl<R: Read> StreamReader<R> {
    pub fn try_new(mut source: R) -> Result<Self> {
        let mut decoder = StreamDecoder::new();
        loop {
            let raw = read_envelope(&mut source)?.ok_or_else(|| {
                IntegrityError::MalformedStream("stream ends before its schema".to_string())
            })?;
            if raw.kind == MessageKind::EndOfStream {
                return Err(IntegrityError::MalformedStream(
                    "end of stream before the schema".to_string(),
                ));
            }
            match decoder.decode(&raw.metadata, Buffer::from_vec(raw.body))? {
                Decoded::Schema(schema) => {
                    return Ok(Self {
                        source,
                        decoder,
                        schema,
                        done: false,
                    })
                }
                Decoded::Skipped => continue,
                Decoded::Item(_) | Decoded::EndOfStream => {
                    return Err(IntegrityError::MalformedStream(
                        "first message of the stream is not a schema".to_string(),
                    ))
                }
            }
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_item(&mut self) -> Result<Option<StreamItem>> {
        loop {
            let raw = match read_envelope(&mut self.source)? {
                Some(raw) => raw,
                None => return Ok(None),
            };
            if raw.kind == MessageKind::EndOfStream {
                return Ok(None);
            }
            match self.decoder.decode(&raw.metadata, Buffer::from_vec(raw.body))? {
                Decoded::Item(item) => return Ok(Some(item)),
                Decoded::Skipped => continue,
                Decoded::EndOfStream => return Ok(None),
                Decoded::Schema(_) => {
                    return Err(IntegrityError::InternalError(
                        "decoder accepted a second schema".to_string(),
                    ))
                }
            }
        }
    }

    /// Pulls the next record batch, applying dictionary batches on the way.
    pub fn next_batch(&mut self) -> Option<Result<RecordBatch>> {
        for item in self.by_ref() {
            match item {
                Ok(StreamItem::Batch(batch)) => return Some(Ok(batch)),
                Ok(StreamItem::Dictionary(_)) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    /// Drains the reader into memory.
    pub fn into_dataset(mut self) -> Result<DecodedDataset> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch() {
            batches.push(batch?);
        }
        Ok(DecodedDataset::new(self.schema.clone(), batches))
    }
}

impl<R: Read> Iterator for StreamReader<R> {
    type Item = Result<StreamItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Opens a lazy reader over an in-memory stream.
pub fn decode(bytes: &[u8]) -> Result<StreamReader<Cursor<&[u8]>>> {
    StreamReader::try_new(Cursor::new(bytes))
}

/// Decodes a whole in-memory stream.
pub fn read_dataset(bytes: &[u8]) -> Result<DecodedDataset> {
    decode(bytes)?.into_dataset()
}
