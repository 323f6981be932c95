// In: src/codec/array_reader.rs

//! Rebuilds Arrow arrays from a received message body.
//!
//! The reader walks the schema depth-first, consuming one field node and the
//! type's buffers at each step, exactly mirroring `layout::BodyBuilder`. Every
//! buffer location is bounds-checked against the body before it is sliced, and
//! every rebuilt `ArrayData` is fully validated, so a hostile stream produces a
//! `MalformedStream` error rather than a panic or an invalid array.

use arrow::array::{make_array, ArrayData, ArrayRef};
use arrow::buffer::{BooleanBuffer, Buffer, NullBuffer};
use arrow::datatypes::{DataType, Field, SchemaRef, UnionMode};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

use super::compression::decompress_buffer;
use super::dictionary::DictionarySession;
use super::message::BatchHeader;
use crate::config::BodyCompression;
use crate::error::{IntegrityError, Result};

pub struct ArrayReader<'a> {
    header: &'a BatchHeader,
    body: &'a Buffer,
    dictionaries: &'a DictionarySession,
    /// Streams written with metadata V4 still carry a validity buffer for
    /// unions.
    legacy_union_validity: bool,
    next_node: usize,
    next_buffer: usize,
}

impl<'a> ArrayReader<'a> {
    pub fn new(
        header: &'a BatchHeader,
        body: &'a Buffer,
        dictionaries: &'a DictionarySession,
        legacy_union_validity: bool,
    ) -> Self {
        Self {
            header,
            body,
            dictionaries,
            legacy_union_validity,
            next_node: 0,
            next_buffer: 0,
        }
    }

    /// Fails unless every node and buffer of the header was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.next_node != self.header.nodes.len() {
            return Err(IntegrityError::SchemaMismatch(format!(
                "batch has {} field nodes, schema accounts for {}",
                self.header.nodes.len(),
                self.next_node
            )));
        }
        if self.next_buffer != self.header.buffers.len() {
            return Err(IntegrityError::SchemaMismatch(format!(
                "batch has {} buffers, schema accounts for {}",
                self.header.buffers.len(),
                self.next_buffer
            )));
        }
        Ok(())
    }

    fn next_node(&mut self, field: &Field) -> Result<(usize, usize)> {
        let (length, null_count) = *self.header.nodes.get(self.next_node).ok_or_else(|| {
            IntegrityError::SchemaMismatch(format!(
                "batch ran out of field nodes at field '{}'",
                field.name()
            ))
        })?;
        self.next_node += 1;
        if length < 0 || null_count < 0 || null_count > length {
            return Err(IntegrityError::MalformedStream(format!(
                "invalid field node (length {length}, null_count {null_count}) for '{}'",
                field.name()
            )));
        }
        Ok((length as usize, null_count as usize))
    }

    fn next_buffer(&mut self) -> Result<Buffer> {
        let (offset, length) = *self.header.buffers.get(self.next_buffer).ok_or_else(|| {
            IntegrityError::SchemaMismatch("batch ran out of buffers".to_string())
        })?;
        self.next_buffer += 1;

        let in_bounds = offset >= 0
            && length >= 0
            && (offset as u64).saturating_add(length as u64) <= self.body.len() as u64;
        if !in_bounds {
            return Err(IntegrityError::MalformedStream(format!(
                "buffer at offset {offset} with length {length} lies outside a body of {} bytes",
                self.body.len()
            )));
        }

        let raw = self.body.slice_with_length(offset as usize, length as usize);
        match self.header.compression {
            BodyCompression::None => Ok(raw),
            codec => Ok(Buffer::from_vec(decompress_buffer(codec, raw.as_slice())?)),
        }
    }

    fn validity(buffer: Buffer, len: usize, null_count: usize) -> Result<Option<NullBuffer>> {
        if null_count == 0 {
            return Ok(None);
        }
        if buffer.len() * 8 < len {
            return Err(IntegrityError::MalformedStream(format!(
                "validity bitmap of {} bytes cannot cover {len} slots",
                buffer.len()
            )));
        }
        let nulls = NullBuffer::new(BooleanBuffer::new(buffer, 0, len));
        if nulls.null_count() != null_count {
            return Err(IntegrityError::MalformedStream(format!(
                "validity bitmap has {} nulls, field node declares {null_count}",
                nulls.null_count()
            )));
        }
        Ok(Some(nulls))
    }

    pub fn read_column(&mut self, field: &Field) -> Result<ArrayRef> {
        Ok(make_array(self.read_data(field, field.data_type())?))
    }

    fn read_data(&mut self, field: &Field, data_type: &DataType) -> Result<ArrayData> {
        let (len, null_count) = self.next_node(field)?;

        let builder = match data_type {
            DataType::Null => return Ok(ArrayData::new_null(&DataType::Null, len)),
            DataType::Union(fields, mode) => {
                if self.legacy_union_validity {
                    self.next_buffer()?;
                }
                let mut builder = ArrayData::builder(data_type.clone())
                    .len(len)
                    .add_buffer(self.next_buffer()?);
                if *mode == UnionMode::Dense {
                    builder = builder.add_buffer(self.next_buffer()?);
                }
                for (_, child) in fields.iter() {
                    builder = builder.add_child_data(self.read_data(child, child.data_type())?);
                }
                builder
            }
            DataType::Dictionary(_, value_type) => {
                let validity = self.next_buffer()?;
                let keys = self.next_buffer()?;
                let id = field.dict_id().ok_or_else(|| {
                    IntegrityError::SchemaMismatch(format!(
                        "dictionary field '{}' has no id",
                        field.name()
                    ))
                })?;
                let values = self.dictionaries.get(id)?;
                if values.data_type() != value_type.as_ref() {
                    return Err(IntegrityError::SchemaMismatch(format!(
                        "dictionary {id} holds {} values, field '{}' expects {value_type}",
                        values.data_type(),
                        field.name()
                    )));
                }
                ArrayData::builder(data_type.clone())
                    .len(len)
                    .nulls(Self::validity(validity, len, null_count)?)
                    .add_buffer(keys)
                    .add_child_data(values.to_data())
            }
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary | DataType::LargeBinary => {
                let validity = self.next_buffer()?;
                let offsets = self.next_buffer()?;
                let values = self.next_buffer()?;
                ArrayData::builder(data_type.clone())
                    .len(len)
                    .nulls(Self::validity(validity, len, null_count)?)
                    .add_buffer(offsets)
                    .add_buffer(values)
            }
            DataType::List(child) | DataType::LargeList(child) | DataType::Map(child, _) => {
                let validity = self.next_buffer()?;
                let offsets = self.next_buffer()?;
                let child_data = self.read_data(child, child.data_type())?;
                ArrayData::builder(data_type.clone())
                    .len(len)
                    .nulls(Self::validity(validity, len, null_count)?)
                    .add_buffer(offsets)
                    .add_child_data(child_data)
            }
            DataType::FixedSizeList(child, _) => {
                let validity = self.next_buffer()?;
                let child_data = self.read_data(child, child.data_type())?;
                ArrayData::builder(data_type.clone())
                    .len(len)
                    .nulls(Self::validity(validity, len, null_count)?)
                    .add_child_data(child_data)
            }
            DataType::Struct(fields) => {
                let validity = self.next_buffer()?;
                let mut builder = ArrayData::builder(data_type.clone())
                    .len(len)
                    .nulls(Self::validity(validity, len, null_count)?);
                for child in fields.iter() {
                    builder = builder.add_child_data(self.read_data(child, child.data_type())?);
                }
                builder
            }
            other if is_fixed_width(other) => {
                let validity = self.next_buffer()?;
                let values = self.next_buffer()?;
                ArrayData::builder(data_type.clone())
                    .len(len)
                    .nulls(Self::validity(validity, len, null_count)?)
                    .add_buffer(values)
            }
            other => return Err(IntegrityError::UnsupportedType(other.to_string())),
        };

        builder.align_buffers(true).build().map_err(|e| {
            IntegrityError::MalformedStream(format!(
                "invalid {data_type} data for field '{}': {e}",
                field.name()
            ))
        })
    }
}

/// Types stored as one validity buffer plus one buffer of fixed-size slots.
fn is_fixed_width(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Boolean | DataType::FixedSizeBinary(_))
        || data_type.primitive_width().is_some()
}

/// Decodes the body of a record batch against `schema`.
pub fn read_record_batch(
    schema: &SchemaRef,
    header: &BatchHeader,
    body: &Buffer,
    dictionaries: &DictionarySession,
    legacy_union_validity: bool,
) -> Result<RecordBatch> {
    let mut reader = ArrayReader::new(header, body, dictionaries, legacy_union_validity);
    let columns = schema
        .fields()
        .iter()
        .map(|field| reader.read_column(field))
        .collect::<Result<Vec<_>>>()?;
    reader.finish()?;

    for (field, column) in schema.fields().iter().zip(&columns) {
        if column.len() != header.length {
            return Err(IntegrityError::SchemaMismatch(format!(
                "column '{}' has {} rows, batch declares {}",
                field.name(),
                column.len(),
                header.length
            )));
        }
    }

    let options = RecordBatchOptions::new().with_row_count(Some(header.length));
    RecordBatch::try_new_with_options(schema.clone(), columns, &options)
        .map_err(|e| IntegrityError::SchemaMismatch(e.to_string()))
}

/// Decodes the single-column body of a dictionary batch.
pub fn read_dictionary_values(
    value_type: &DataType,
    header: &BatchHeader,
    body: &Buffer,
    dictionaries: &DictionarySession,
    legacy_union_validity: bool,
) -> Result<ArrayRef> {
    let field = Field::new("values", value_type.clone(), true);
    let mut reader = ArrayReader::new(header, body, dictionaries, legacy_union_validity);
    let values = reader.read_column(&field)?;
    reader.finish()?;
    if values.len() != header.length {
        return Err(IntegrityError::SchemaMismatch(format!(
            "dictionary batch has {} values, header declares {}",
            values.len(),
            header.length
        )));
    }
    Ok(values)
}
