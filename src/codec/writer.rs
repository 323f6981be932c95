// In: src/codec/writer.rs

//! The encoding half of the codec.
//!
//! `StreamEncoder` turns a schema and a sequence of batches into envelopes and
//! keeps the dictionary state between batches. `StreamWriter` frames those
//! envelopes onto any `std::io::Write` sink.

use arrow::array::ArrayRef;
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::io::Write;
use std::sync::Arc;

use super::dictionary::{
    assign_dictionary_ids, collect_dictionaries, dictionary_value_types, DictionaryAction,
    DictionaryTracker,
};
use super::envelope::{Envelope, MessageKind};
use super::layout::{layout_dictionary_values, BodyBuilder};
use super::message::{dictionary_message, record_batch_message, schema_message};
use crate::config::CodecOptions;
use crate::error::{IntegrityError, Result};
use crate::types::{DictionaryUpdate, StreamItem};

/// Rejects types the codec cannot carry before any byte is written.
pub fn check_supported(data_type: &DataType) -> Result<()> {
    match data_type {
        DataType::Null
        | DataType::Boolean
        | DataType::Utf8
        | DataType::LargeUtf8
        | DataType::Binary
        | DataType::LargeBinary
        | DataType::FixedSizeBinary(_) => Ok(()),
        DataType::List(child)
        | DataType::LargeList(child)
        | DataType::FixedSizeList(child, _)
        | DataType::Map(child, _) => check_supported(child.data_type()),
        DataType::Struct(fields) => fields
            .iter()
            .try_for_each(|f| check_supported(f.data_type())),
        DataType::Union(fields, _) => fields
            .iter()
            .try_for_each(|(_, f)| check_supported(f.data_type())),
        DataType::Dictionary(key, value) => {
            if !key.is_dictionary_key_type() {
                return Err(IntegrityError::UnsupportedType(format!(
                    "dictionary key type {key}"
                )));
            }
            if contains_dictionary(value) {
                return Err(IntegrityError::UnsupportedType(
                    "dictionary values that are themselves dictionary encoded".to_string(),
                ));
            }
            check_supported(value)
        }
        other if other.primitive_width().is_some() => Ok(()),
        other => Err(IntegrityError::UnsupportedType(other.to_string())),
    }
}

fn contains_dictionary(data_type: &DataType) -> bool {
    match data_type {
        DataType::Dictionary(_, _) => true,
        DataType::List(child)
        | DataType::LargeList(child)
        | DataType::FixedSizeList(child, _)
        | DataType::Map(child, _) => contains_dictionary(child.data_type()),
        DataType::Struct(fields) => fields.iter().any(|f| contains_dictionary(f.data_type())),
        DataType::Union(fields, _) => fields
            .iter()
            .any(|(_, f)| contains_dictionary(f.data_type())),
        _ => false,
    }
}

/// Incremental, transport-agnostic encoder for one stream.
pub struct StreamEncoder {
    schema: SchemaRef,
    options: CodecOptions,
    tracker: DictionaryTracker,
    batches_encoded: usize,
}

impl StreamEncoder {
    pub fn try_new(schema: &Schema, options: CodecOptions) -> Result<Self> {
        options.validate()?;
        for field in schema.fields().iter() {
            check_supported(field.data_type())?;
        }
        Ok(Self {
            schema: Arc::new(assign_dictionary_ids(schema)),
            tracker: DictionaryTracker::new(options.emit_dictionary_deltas),
            options,
            batches_encoded: 0,
        })
    }

    /// The schema as written, with dictionary ids assigned.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn batches_encoded(&self) -> usize {
        self.batches_encoded
    }

    pub fn schema_envelope(&self) -> Envelope {
        Envelope::new(MessageKind::Schema, schema_message(&self.schema), Vec::new())
    }

    pub fn end_of_stream(&self) -> Envelope {
        Envelope::end_of_stream()
    }

    fn dictionary_envelope(&self, id: i64, values: &ArrayRef, is_delta: bool) -> Result<Envelope> {
        let layout =
            layout_dictionary_values(values, self.options.alignment, self.options.compression)?;
        let metadata = dictionary_message(id, is_delta, values.len(), &layout);
        Ok(Envelope::new(MessageKind::DictionaryBatch, metadata, layout.body))
    }

    fn check_batch(&self, batch: &RecordBatch) -> Result<()> {
        if batch.num_columns() != self.schema.fields().len() {
            return Err(IntegrityError::SchemaMismatch(format!(
                "batch has {} columns, stream schema has {}",
                batch.num_columns(),
                self.schema.fields().len()
            )));
        }
        for (field, column) in self.schema.fields().iter().zip(batch.columns()) {
            if column.data_type() != field.data_type() {
                return Err(IntegrityError::SchemaMismatch(format!(
                    "column '{}' is {}, stream schema declares {}",
                    field.name(),
                    column.data_type(),
                    field.data_type()
                )));
            }
        }
        Ok(())
    }

    /// Encodes one record batch, preceded by whatever dictionary batches are
    /// needed to interpret it.
    pub fn encode_batch(&mut self, batch: &RecordBatch) -> Result<Vec<Envelope>> {
        // 1. The batch must match the stream schema column for column.
        self.check_batch(batch)?;

        // 2. Bring every dictionary the batch references up to date.
        let mut dictionaries = Vec::new();
        for (field, column) in self.schema.fields().iter().zip(batch.columns()) {
            collect_dictionaries(field, column.as_ref(), &mut dictionaries)?;
        }
        let mut envelopes = Vec::with_capacity(dictionaries.len() + 1);
        for (id, values) in &dictionaries {
            match self.tracker.plan(*id, values) {
                DictionaryAction::Unchanged => {}
                DictionaryAction::Replace(values) => {
                    envelopes.push(self.dictionary_envelope(*id, &values, false)?)
                }
                DictionaryAction::Delta(tail) => {
                    envelopes.push(self.dictionary_envelope(*id, &tail, true)?)
                }
            }
        }

        // 3. The record batch itself.
        let mut body = BodyBuilder::new(self.options.alignment, self.options.compression);
        for column in batch.columns() {
            body.write_array(column.as_ref())?;
        }
        let layout = body.finish();
        let metadata = record_batch_message(batch.num_rows(), &layout);
        envelopes.push(Envelope::new(MessageKind::RecordBatch, metadata, layout.body));

        self.batches_encoded += 1;
        log::debug!(
            "encoded batch {} ({} rows, {} envelopes)",
            self.batches_encoded,
            batch.num_rows(),
            envelopes.len()
        );
        Ok(envelopes)
    }

    /// Encodes an explicit dictionary batch.
    pub fn encode_dictionary(&mut self, update: &DictionaryUpdate) -> Result<Envelope> {
        let expected = dictionary_value_types(&self.schema)?
            .remove(&update.id)
            .ok_or(IntegrityError::UnknownDictionaryId(update.id))?;
        if update.values.data_type() != &expected {
            return Err(IntegrityError::SchemaMismatch(format!(
                "dictionary {} values are {}, schema declares {expected}",
                update.id,
                update.values.data_type()
            )));
        }
        self.tracker.record(update)?;
        self.dictionary_envelope(update.id, &update.values, update.is_delta)
    }

    pub fn encode_item(&mut self, item: &StreamItem) -> Result<Vec<Envelope>> {
        match item {
            StreamItem::Batch(batch) => self.encode_batch(batch),
            StreamItem::Dictionary(update) => Ok(vec![self.encode_dictionary(update)?]),
        }
    }
}

/// Frames a stream onto a byte sink.
///
/// The schema is written on construction; `finish` writes the end-of-stream
/// marker. Dropping the writer without `finish` leaves a stream without the
/// marker, which readers accept as a truncated-but-clean end.
pub struct StreamWriter<W: Write> {
    writer: W,
    encoder: StreamEncoder,
    bytes_written: usize,
    finished: bool,
}

impl<W: Write> StreamWriter<W> {
    pub fn try_new(mut writer: W, schema: &Schema, options: CodecOptions) -> Result<Self> {
        let encoder = StreamEncoder::try_new(schema, options)?;
        let bytes_written = encoder
            .schema_envelope()
            .write_to(&mut writer, encoder.options().alignment)?;
        Ok(Self {
            writer,
            encoder,
            bytes_written,
            finished: false,
        })
    }

    fn write_envelopes(&mut self, envelopes: Vec<Envelope>) -> Result<()> {
        if self.finished {
            return Err(IntegrityError::InternalError(
                "write after the stream was finished".to_string(),
            ));
        }
        let alignment = self.encoder.options().alignment;
        for envelope in envelopes {
            self.bytes_written += envelope.write_to(&mut self.writer, alignment)?;
        }
        Ok(())
    }

    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        let envelopes = self.encoder.encode_batch(batch)?;
        self.write_envelopes(envelopes)
    }

    pub fn write_dictionary(&mut self, update: &DictionaryUpdate) -> Result<()> {
        let envelope = self.encoder.encode_dictionary(update)?;
        self.write_envelopes(vec![envelope])
    }

    pub fn write_item(&mut self, item: &StreamItem) -> Result<()> {
        let envelopes = self.encoder.encode_item(item)?;
        self.write_envelopes(envelopes)
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let alignment = self.encoder.options().alignment;
        self.bytes_written += self.encoder.end_of_stream().write_to(&mut self.writer, alignment)?;
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn schema(&self) -> &SchemaRef {
        self.encoder.schema()
    }

    /// Finishes the stream if needed and hands back the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.writer)
    }
}
