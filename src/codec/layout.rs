// In: src/codec/layout.rs

//! Flattens Arrow arrays into the field-node and buffer lists of a message
//! body.
//!
//! Nodes and buffers are emitted in depth-first pre-order. Sliced input is
//! normalized on the way out: offsets are rebased to start at zero, bitmaps
//! are re-aligned to bit zero, and only the referenced range of each child is
//! written. The validity buffer is written empty when a node has no nulls.

use arrow::array::{
    Array, ArrayData, AsArray, GenericByteArray, GenericListArray, OffsetSizeTrait,
};
use arrow::buffer::Buffer;
use arrow::datatypes::{ArrowNativeType, ByteArrayType, DataType, UnionMode};
use arrow::ipc;
use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

use super::compression::compress_buffer;
use super::format::padding_for;
use super::message::BodyLayout;
use crate::config::BodyCompression;
use crate::error::{IntegrityError, Result};

/// Accumulates the body of one record or dictionary batch.
pub struct BodyBuilder {
    alignment: usize,
    layout: BodyLayout,
}

impl BodyBuilder {
    pub fn new(alignment: usize, compression: BodyCompression) -> Self {
        Self {
            alignment,
            layout: BodyLayout {
                compression,
                ..BodyLayout::default()
            },
        }
    }

    pub fn finish(self) -> BodyLayout {
        self.layout
    }

    fn push_node(&mut self, length: usize, null_count: usize) {
        self.layout
            .nodes
            .push(ipc::FieldNode::new(length as i64, null_count as i64));
    }

    fn push_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        let data: Cow<'_, [u8]> = match self.layout.compression {
            BodyCompression::None => Cow::Borrowed(bytes),
            codec => Cow::Owned(compress_buffer(codec, bytes)?),
        };
        let offset = self.layout.body.len();
        self.layout.body.extend_from_slice(&data);
        let padding = padding_for(data.len(), self.alignment);
        self.layout.body.resize(self.layout.body.len() + padding, 0);
        self.layout
            .buffers
            .push(ipc::Buffer::new(offset as i64, data.len() as i64));
        Ok(())
    }

    fn push_validity(&mut self, array: &dyn Array) -> Result<()> {
        match array.nulls() {
            Some(nulls) if nulls.null_count() > 0 => {
                let bits = nulls.inner().sliced();
                self.push_buffer(bits.as_slice())
            }
            _ => self.push_buffer(&[]),
        }
    }

    /// Writes `width` bytes per slot of the first data buffer, honoring the
    /// array offset.
    fn push_fixed_width(&mut self, data: &ArrayData, width: usize) -> Result<()> {
        let start = data.offset() * width;
        let end = start + data.len() * width;
        let bytes = data
            .buffers()
            .first()
            .and_then(|b| b.as_slice().get(start..end))
            .ok_or_else(|| {
                IntegrityError::InternalError(format!(
                    "{} array buffer is shorter than {} slots of {width} bytes",
                    data.data_type(),
                    data.len()
                ))
            })?;
        self.push_buffer(bytes)
    }

    /// Writes offsets rebased to zero and returns the child range they cover.
    fn push_offsets<O: OffsetSizeTrait>(&mut self, offsets: &[O]) -> Result<Range<usize>> {
        let (first, last) = match (offsets.first(), offsets.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                let zero = Buffer::from_vec(vec![O::usize_as(0)]);
                self.push_buffer(zero.as_slice())?;
                return Ok(0..0);
            }
        };
        let rebased: Vec<O> = offsets.iter().map(|o| *o - first).collect();
        let rebased = Buffer::from_vec(rebased);
        self.push_buffer(rebased.as_slice())?;
        Ok(first.as_usize()..last.as_usize())
    }

    fn write_bytes<T: ByteArrayType>(&mut self, array: &GenericByteArray<T>) -> Result<()> {
        self.push_validity(array)?;
        let range = self.push_offsets(array.value_offsets())?;
        let values = array.values().as_slice().get(range.clone()).ok_or_else(|| {
            IntegrityError::InternalError(format!(
                "value range {range:?} lies outside a {} byte values buffer",
                array.values().len()
            ))
        })?;
        self.push_buffer(values)
    }

    fn write_list<O: OffsetSizeTrait>(&mut self, list: &GenericListArray<O>) -> Result<()> {
        self.push_validity(list)?;
        let range = self.push_offsets(list.value_offsets())?;
        let child = list.values().slice(range.start, range.len());
        self.write_array(child.as_ref())
    }

    /// Appends `array` (node, buffers, then children) to the body.
    pub fn write_array(&mut self, array: &dyn Array) -> Result<()> {
        let len = array.len();
        let data_type = array.data_type();

        // Null arrays report every slot as null and carry no buffers.
        if matches!(data_type, DataType::Null) {
            self.push_node(len, len);
            return Ok(());
        }
        self.push_node(len, array.null_count());

        match data_type {
            DataType::Boolean => {
                self.push_validity(array)?;
                let values = array.as_boolean().values().sliced();
                self.push_buffer(values.as_slice())
            }
            DataType::Utf8 => self.write_bytes(array.as_string::<i32>()),
            DataType::LargeUtf8 => self.write_bytes(array.as_string::<i64>()),
            DataType::Binary => self.write_bytes(array.as_binary::<i32>()),
            DataType::LargeBinary => self.write_bytes(array.as_binary::<i64>()),
            DataType::FixedSizeBinary(width) => {
                self.push_validity(array)?;
                self.push_fixed_width(&array.to_data(), *width as usize)
            }
            DataType::List(_) => self.write_list(array.as_list::<i32>()),
            DataType::LargeList(_) => self.write_list(array.as_list::<i64>()),
            DataType::FixedSizeList(_, size) => {
                self.push_validity(array)?;
                let list = array.as_fixed_size_list();
                let size = *size as usize;
                let start = if len == 0 {
                    0
                } else {
                    list.value_offset(0) as usize
                };
                let child = list.values().slice(start, len * size);
                self.write_array(child.as_ref())
            }
            DataType::Map(_, _) => {
                self.push_validity(array)?;
                let map = array.as_map();
                let range = self.push_offsets(map.value_offsets())?;
                let entries = map.entries().slice(range.start, range.len());
                self.write_array(&entries)
            }
            DataType::Struct(_) => {
                self.push_validity(array)?;
                for column in array.as_struct().columns() {
                    self.write_array(column.as_ref())?;
                }
                Ok(())
            }
            DataType::Union(fields, mode) => {
                // No validity buffer for unions from metadata V5 on.
                let union = array.as_union();
                let type_ids: &[i8] = union.type_ids();
                let type_id_bytes: Vec<u8> = type_ids.iter().map(|id| *id as u8).collect();
                self.push_buffer(&type_id_bytes)?;

                match mode {
                    UnionMode::Dense => {
                        let offsets: &[i32] = union.offsets().map(|o| &o[..]).unwrap_or(&[]);
                        let offsets = Buffer::from_slice_ref(offsets);
                        self.push_buffer(offsets.as_slice())?;
                        for (type_id, _) in fields.iter() {
                            self.write_array(union.child(type_id).as_ref())?;
                        }
                    }
                    UnionMode::Sparse => {
                        let start = if len == 0 { 0 } else { union.value_offset(0) };
                        for (type_id, _) in fields.iter() {
                            let child = union.child(type_id).slice(start, len);
                            self.write_array(child.as_ref())?;
                        }
                    }
                }
                Ok(())
            }
            DataType::Dictionary(key_type, _) => {
                self.push_validity(array)?;
                let width = key_type.primitive_width().ok_or_else(|| {
                    IntegrityError::UnsupportedType(format!("dictionary key type {key_type}"))
                })?;
                let keys = array.as_any_dictionary().keys().to_data();
                self.push_fixed_width(&keys, width)
            }
            other => match other.primitive_width() {
                Some(width) => {
                    self.push_validity(array)?;
                    self.push_fixed_width(&array.to_data(), width)
                }
                None => Err(IntegrityError::UnsupportedType(other.to_string())),
            },
        }
    }
}

/// Lays out a single column as the body of a dictionary batch.
pub fn layout_dictionary_values(
    values: &Arc<dyn Array>,
    alignment: usize,
    compression: BodyCompression,
) -> Result<BodyLayout> {
    let mut builder = BodyBuilder::new(alignment, compression);
    builder.write_array(values.as_ref())?;
    Ok(builder.finish())
}
