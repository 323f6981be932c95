// In: src/codec/message.rs

//! Builders and parsers for the flatbuffer `Message` metadata of each
//! envelope kind.

use arrow::datatypes::Schema;
use arrow::ipc::{
    self, convert::schema_to_fb_offset, BodyCompressionBuilder, BodyCompressionMethod,
    DictionaryBatchBuilder, MessageBuilder, MessageHeader, MetadataVersion, RecordBatchBuilder,
};
use flatbuffers::{FlatBufferBuilder, UnionWIPOffset, WIPOffset};

use super::compression::{from_wire_codec, wire_codec};
use crate::config::BodyCompression;
use crate::error::{IntegrityError, Result};

/// The metadata version every message is written with.
pub const WRITE_VERSION: MetadataVersion = MetadataVersion::V5;

/// The physical layout of one record batch body: field nodes and buffer
/// locations in depth-first order, plus the body bytes.
#[derive(Debug, Default)]
pub struct BodyLayout {
    pub nodes: Vec<ipc::FieldNode>,
    pub buffers: Vec<ipc::Buffer>,
    pub body: Vec<u8>,
    pub compression: BodyCompression,
}

/// The parts of a received record batch header the array reader needs,
/// copied out of the flatbuffer so the reader does not borrow the metadata.
#[derive(Debug, Clone)]
pub struct BatchHeader {
    pub length: usize,
    /// `(length, null_count)` per field node.
    pub nodes: Vec<(i64, i64)>,
    /// `(offset, length)` per buffer, relative to the body start.
    pub buffers: Vec<(i64, i64)>,
    pub compression: BodyCompression,
}

impl BatchHeader {
    pub fn from_fb(batch: ipc::RecordBatch<'_>) -> Result<Self> {
        let length = batch.length();
        if length < 0 {
            return Err(IntegrityError::MalformedStream(format!(
                "negative record batch length {length}"
            )));
        }
        let nodes = batch
            .nodes()
            .map(|nodes| nodes.iter().map(|n| (n.length(), n.null_count())).collect())
            .unwrap_or_default();
        let buffers = batch
            .buffers()
            .map(|buffers| buffers.iter().map(|b| (b.offset(), b.length())).collect())
            .unwrap_or_default();
        let compression = match batch.compression() {
            Some(c) => {
                if c.method() != BodyCompressionMethod::BUFFER {
                    return Err(IntegrityError::MalformedStream(format!(
                        "unknown body compression method {}",
                        c.method().0
                    )));
                }
                from_wire_codec(c.codec())?
            }
            None => BodyCompression::None,
        };
        Ok(Self {
            length: length as usize,
            nodes,
            buffers,
            compression,
        })
    }
}

fn record_batch_offset<'a>(
    fbb: &mut FlatBufferBuilder<'a>,
    length: usize,
    layout: &BodyLayout,
) -> WIPOffset<ipc::RecordBatch<'a>> {
    let nodes = fbb.create_vector(&layout.nodes);
    let buffers = fbb.create_vector(&layout.buffers);
    let compression = match wire_codec(layout.compression) {
        Some(codec) => {
            let mut builder = BodyCompressionBuilder::new(fbb);
            builder.add_codec(codec);
            builder.add_method(BodyCompressionMethod::BUFFER);
            Some(builder.finish())
        }
        None => None,
    };

    let mut batch = RecordBatchBuilder::new(fbb);
    batch.add_length(length as i64);
    batch.add_nodes(nodes);
    batch.add_buffers(buffers);
    if let Some(compression) = compression {
        batch.add_compression(compression);
    }
    batch.finish()
}

fn finish_message(
    mut fbb: FlatBufferBuilder<'_>,
    header_type: MessageHeader,
    header: WIPOffset<UnionWIPOffset>,
    body_len: usize,
) -> Vec<u8> {
    let mut message = MessageBuilder::new(&mut fbb);
    message.add_version(WRITE_VERSION);
    message.add_header_type(header_type);
    message.add_bodyLength(body_len as i64);
    message.add_header(header);
    let root = message.finish();
    fbb.finish(root, None);
    fbb.finished_data().to_vec()
}

/// Serializes a schema message. Dictionary fields must already carry their ids.
pub fn schema_message(schema: &Schema) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::new();
    let fb_schema = schema_to_fb_offset(&mut fbb, schema);
    finish_message(fbb, MessageHeader::Schema, fb_schema.as_union_value(), 0)
}

/// Serializes the header of a record batch whose body is described by `layout`.
pub fn record_batch_message(length: usize, layout: &BodyLayout) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::new();
    let batch = record_batch_offset(&mut fbb, length, layout);
    finish_message(
        fbb,
        MessageHeader::RecordBatch,
        batch.as_union_value(),
        layout.body.len(),
    )
}

/// Serializes the header of a dictionary batch for dictionary `id`.
pub fn dictionary_message(id: i64, is_delta: bool, length: usize, layout: &BodyLayout) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::new();
    let data = record_batch_offset(&mut fbb, length, layout);
    let mut dictionary = DictionaryBatchBuilder::new(&mut fbb);
    dictionary.add_id(id);
    dictionary.add_data(data);
    dictionary.add_isDelta(is_delta);
    let dictionary = dictionary.finish();
    finish_message(
        fbb,
        MessageHeader::DictionaryBatch,
        dictionary.as_union_value(),
        layout.body.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field};
    use arrow::ipc::root_as_message;

    #[test]
    fn test_schema_message_round_trip() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, false),
        ]);
        let bytes = schema_message(&schema);
        let message = root_as_message(&bytes).unwrap();
        assert_eq!(message.version(), MetadataVersion::V5);
        assert_eq!(message.header_type(), MessageHeader::Schema);
        assert_eq!(message.bodyLength(), 0);
        let decoded = ipc::convert::fb_to_schema(message.header_as_schema().unwrap());
        assert_eq!(decoded, schema);
    }

    #[test]
    fn test_record_batch_header_is_copied_out() {
        let layout = BodyLayout {
            nodes: vec![ipc::FieldNode::new(3, 1)],
            buffers: vec![ipc::Buffer::new(0, 1), ipc::Buffer::new(8, 12)],
            body: vec![0u8; 24],
            compression: BodyCompression::Zstd,
        };
        let bytes = record_batch_message(3, &layout);
        let message = root_as_message(&bytes).unwrap();
        assert_eq!(message.bodyLength(), 24);

        let header = BatchHeader::from_fb(message.header_as_record_batch().unwrap()).unwrap();
        assert_eq!(header.length, 3);
        assert_eq!(header.nodes, vec![(3, 1)]);
        assert_eq!(header.buffers, vec![(0, 1), (8, 12)]);
        assert_eq!(header.compression, BodyCompression::Zstd);
    }

    #[test]
    fn test_dictionary_message_carries_id_and_delta_flag() {
        let layout = BodyLayout::default();
        let bytes = dictionary_message(7, true, 0, &layout);
        let message = root_as_message(&bytes).unwrap();
        let dictionary = message.header_as_dictionary_batch().unwrap();
        assert_eq!(dictionary.id(), 7);
        assert!(dictionary.isDelta());
        assert_eq!(dictionary.data().unwrap().length(), 0);
    }
}
