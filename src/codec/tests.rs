// In: src/codec/tests.rs

use super::*;
use crate::config::{BodyCompression, CodecOptions};
use crate::error::IntegrityError;
use crate::types::{DictionaryUpdate, StreamItem};

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Decimal128Array, DictionaryArray,
    FixedSizeListArray, Int32Array, Int64Builder, LargeStringArray, ListArray,
    MapBuilder, NullArray, StringArray, StringBuilder, StructArray, TimestampMicrosecondArray,
    UnionBuilder,
};
use arrow::datatypes::{DataType, Field, Float64Type, Int32Type, Schema};
use arrow::ipc::{MessageBuilder, MessageHeader, MetadataVersion};
use arrow::record_batch::RecordBatch;
use std::io::Cursor;
use std::sync::Arc;

//==================================================================================
// Helpers
//==================================================================================

fn scenario_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, true),
        Field::new("name", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])),
            Arc::new(StringArray::from(vec![Some("a"), Some("b"), None])),
        ],
    )
    .unwrap()
}

fn round_trip(batches: &[RecordBatch], options: &CodecOptions) -> Vec<RecordBatch> {
    let schema = batches[0].schema();
    let items: Vec<StreamItem> = batches.iter().cloned().map(StreamItem::Batch).collect();
    let bytes = encode(&schema, &items, options).unwrap();
    read_dataset(&bytes).unwrap().batches
}

fn nested_batch() -> RecordBatch {
    let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
        Some(vec![Some(1), None]),
        None,
        Some(vec![]),
        Some(vec![Some(4)]),
    ]);
    let fixed = FixedSizeListArray::from_iter_primitive::<Int32Type, _, _>(
        vec![
            Some(vec![Some(1), Some(2)]),
            None,
            Some(vec![Some(5), None]),
            Some(vec![Some(7), Some(8)]),
        ],
        2,
    );
    let structs = StructArray::from(vec![
        (
            Arc::new(Field::new("x", DataType::Int32, true)),
            Arc::new(Int32Array::from(vec![Some(1), None, Some(3), Some(4)])) as ArrayRef,
        ),
        (
            Arc::new(Field::new("y", DataType::Utf8, true)),
            Arc::new(StringArray::from(vec![Some("p"), Some("q"), None, Some("s")])) as ArrayRef,
        ),
    ]);
    let mut map = MapBuilder::new(None, StringBuilder::new(), Int64Builder::new());
    map.keys().append_value("k1");
    map.values().append_value(10);
    map.keys().append_value("k2");
    map.values().append_null();
    map.append(true).unwrap();
    map.append(false).unwrap();
    map.append(true).unwrap();
    map.keys().append_value("k3");
    map.values().append_value(30);
    map.append(true).unwrap();
    let map = map.finish();

    RecordBatch::try_from_iter(vec![
        ("list", Arc::new(list) as ArrayRef),
        ("fixed", Arc::new(fixed) as ArrayRef),
        ("struct", Arc::new(structs) as ArrayRef),
        ("map", Arc::new(map) as ArrayRef),
    ])
    .unwrap()
}

fn union_batch(dense: bool) -> RecordBatch {
    let mut builder = if dense {
        UnionBuilder::new_dense()
    } else {
        UnionBuilder::new_sparse()
    };
    builder.append::<Int32Type>("i", 1).unwrap();
    builder.append::<Float64Type>("f", 2.5).unwrap();
    builder.append_null::<Int32Type>("i").unwrap();
    builder.append::<Float64Type>("f", f64::NAN).unwrap();
    let union = builder.build().unwrap();
    RecordBatch::try_from_iter(vec![("u", Arc::new(union) as ArrayRef)]).unwrap()
}

fn dictionary_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![Field::new(
        "color",
        DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
        true,
    )]))
}

fn dictionary_batch(schema: &Arc<Schema>, keys: Vec<Option<i32>>, values: &[&str]) -> RecordBatch {
    let values: ArrayRef = Arc::new(StringArray::from(values.to_vec()));
    let array = DictionaryArray::<Int32Type>::try_new(Int32Array::from(keys), values).unwrap();
    RecordBatch::try_new(schema.clone(), vec![Arc::new(array)]).unwrap()
}

/// Writes a bare message with the given header type and no header table.
fn bare_message(header_type: MessageHeader) -> Vec<u8> {
    let mut fbb = flatbuffers::FlatBufferBuilder::new();
    let mut message = MessageBuilder::new(&mut fbb);
    message.add_version(MetadataVersion::V5);
    message.add_header_type(header_type);
    message.add_bodyLength(0);
    let root = message.finish();
    fbb.finish(root, None);
    fbb.finished_data().to_vec()
}

//==================================================================================
// Round trips
//==================================================================================

#[test]
fn test_scenario_rows_round_trip_exactly() {
    // 1. Arrange
    let batch = scenario_batch();

    // 2. Act
    let decoded = round_trip(&[batch.clone()], &CodecOptions::default());

    // 3. Assert
    assert_eq!(decoded.len(), 1);
    let decoded = &decoded[0];
    assert_eq!(decoded, &batch);
    let ids = decoded.column(0).as_primitive::<Int32Type>();
    assert_eq!(ids.value(0), 1);
    assert!(ids.is_null(1));
    assert_eq!(ids.value(2), 3);
    let names = decoded.column(1).as_string::<i32>();
    assert_eq!(names.value(0), "a");
    assert_eq!(names.value(1), "b");
    assert!(names.is_null(2));
}

#[test]
fn test_nested_types_round_trip() {
    let batch = nested_batch();
    let decoded = round_trip(&[batch.clone()], &CodecOptions::default());
    assert_eq!(decoded, vec![batch]);
}

#[test]
fn test_dense_and_sparse_unions_round_trip() {
    for dense in [true, false] {
        let batch = union_batch(dense);
        let decoded = round_trip(&[batch.clone()], &CodecOptions::default());
        assert_eq!(decoded.len(), 1);
        let expected = batch.column(0).as_union();
        let actual = decoded[0].column(0).as_union();
        assert_eq!(actual.len(), expected.len());
        for i in 0..expected.len() {
            assert_eq!(actual.type_id(i), expected.type_id(i));
        }
        let floats = actual.child(1).as_primitive::<Float64Type>();
        assert!(floats.values().iter().any(|v| v.is_nan()));
    }
}

#[test]
fn test_temporal_decimal_boolean_and_null_round_trip() {
    let decimals = Decimal128Array::from(vec![Some(12_345), None, Some(-1)])
        .with_precision_and_scale(10, 2)
        .unwrap();
    let timestamps =
        TimestampMicrosecondArray::from(vec![Some(1_700_000_000_000_000), None, Some(0)])
            .with_timezone("UTC");
    let booleans = BooleanArray::from(vec![Some(true), None, Some(false), Some(true), None]);
    let batch = RecordBatch::try_from_iter(vec![
        ("decimal", Arc::new(decimals) as ArrayRef),
        ("ts", Arc::new(timestamps) as ArrayRef),
        ("flag", Arc::new(booleans.slice(1, 3)) as ArrayRef),
        ("nothing", Arc::new(NullArray::new(3)) as ArrayRef),
        (
            "large",
            Arc::new(LargeStringArray::from(vec!["x", "", "zzz"])) as ArrayRef,
        ),
    ])
    .unwrap();

    let decoded = round_trip(&[batch.clone()], &CodecOptions::default());
    assert_eq!(decoded, vec![batch]);
}

#[test]
fn test_sliced_batches_round_trip() {
    let batch = nested_batch().slice(1, 3);
    let decoded = round_trip(&[batch.clone()], &CodecOptions::default());
    assert_eq!(decoded, vec![batch]);
}

#[test]
fn test_compression_and_alignment_variants_round_trip() {
    let batch = nested_batch();
    for compression in [BodyCompression::None, BodyCompression::Lz4Frame, BodyCompression::Zstd] {
        for alignment in [8, 64] {
            let options = CodecOptions::default()
                .with_alignment(alignment)
                .with_compression(compression);
            let decoded = round_trip(&[batch.clone(), scenario_like(&batch)], &options);
            assert_eq!(decoded[0], batch, "{compression:?} / {alignment}");
        }
    }
}

fn scenario_like(batch: &RecordBatch) -> RecordBatch {
    batch.slice(0, 2)
}

#[test]
fn test_empty_stream_round_trip() {
    let schema = scenario_batch().schema();
    let bytes = encode(&schema, &[], &CodecOptions::default()).unwrap();
    let dataset = read_dataset(&bytes).unwrap();
    assert_eq!(dataset.schema.fields().len(), 2);
    assert!(dataset.batches.is_empty());
}

#[test]
fn test_encoding_is_deterministic() {
    let batch = nested_batch();
    let items = vec![StreamItem::Batch(batch.clone())];
    let options = CodecOptions::default().with_compression(BodyCompression::Zstd);
    let first = encode(&batch.schema(), &items, &options).unwrap();
    let second = encode(&batch.schema(), &items, &options).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_alignment_is_validated() {
    let options = CodecOptions::default().with_alignment(12);
    let res = encode(&scenario_batch().schema(), &[], &options);
    assert!(matches!(res, Err(IntegrityError::InvalidOptions(_))));
}

//==================================================================================
// Interoperability with the arrow crate's IPC implementation
//==================================================================================

#[test]
fn test_arrow_rs_reads_native_streams() {
    let batch = nested_batch();
    let bytes = encode(
        &batch.schema(),
        &[StreamItem::Batch(batch.clone())],
        &CodecOptions::default(),
    )
    .unwrap();

    let reader = arrow::ipc::reader::StreamReader::try_new(Cursor::new(bytes), None).unwrap();
    let decoded: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
    assert_eq!(decoded, vec![batch]);
}

#[test]
fn test_native_reads_arrow_rs_streams() {
    let batch = nested_batch();
    let mut bytes = Vec::new();
    {
        let mut writer = arrow::ipc::writer::StreamWriter::try_new(&mut bytes, &batch.schema())
            .unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }
    let dataset = read_dataset(&bytes).unwrap();
    assert_eq!(dataset.batches, vec![batch]);
}

#[test]
fn test_native_reads_arrow_rs_dictionary_streams() {
    let schema = dictionary_schema();
    let first = dictionary_batch(&schema, vec![Some(0), Some(1), None], &["red", "green"]);
    let second = dictionary_batch(&schema, vec![Some(0)], &["blue"]);
    let mut bytes = Vec::new();
    {
        let mut writer = arrow::ipc::writer::StreamWriter::try_new(&mut bytes, &schema).unwrap();
        writer.write(&first).unwrap();
        writer.write(&second).unwrap();
        writer.finish().unwrap();
    }

    let dataset = read_dataset(&bytes).unwrap();
    assert_eq!(dataset.batches, vec![first, second]);
}

//==================================================================================
// Dictionaries
//==================================================================================

#[test]
fn test_replacement_dictionaries_are_sent_only_when_values_change() {
    let schema = dictionary_schema();
    let batches = vec![
        dictionary_batch(&schema, vec![Some(0), Some(1)], &["a", "b"]),
        dictionary_batch(&schema, vec![Some(1), None], &["a", "b"]),
        dictionary_batch(&schema, vec![Some(0)], &["z"]),
    ];
    let items: Vec<StreamItem> = batches.iter().cloned().map(StreamItem::Batch).collect();
    let bytes = encode(&schema, &items, &CodecOptions::default()).unwrap();

    let decoded: Vec<StreamItem> = decode(&bytes).unwrap().map(|i| i.unwrap()).collect();
    let dictionary_count = decoded
        .iter()
        .filter(|i| matches!(i, StreamItem::Dictionary(_)))
        .count();
    assert_eq!(dictionary_count, 2);

    let decoded_batches: Vec<RecordBatch> =
        decoded.iter().filter_map(|i| i.as_batch().cloned()).collect();
    assert_eq!(decoded_batches, batches);
}

#[test]
fn test_delta_dictionaries_resolve_like_cumulative_replacement() {
    // 1. Arrange: the second batch's dictionary extends the first.
    let schema = dictionary_schema();
    let first = dictionary_batch(&schema, vec![Some(0), Some(1)], &["a", "b"]);
    let second = dictionary_batch(&schema, vec![Some(2), Some(0), None], &["a", "b", "c"]);
    let items = vec![StreamItem::Batch(first.clone()), StreamItem::Batch(second.clone())];

    // 2. Act
    let options = CodecOptions::default().with_dictionary_deltas(true);
    let bytes = encode(&schema, &items, &options).unwrap();
    let decoded: Vec<StreamItem> = decode(&bytes).unwrap().map(|i| i.unwrap()).collect();

    // 3. Assert: replacement, batch, delta with only "c", batch.
    let deltas: Vec<&DictionaryUpdate> = decoded
        .iter()
        .filter_map(|i| match i {
            StreamItem::Dictionary(d) => Some(d),
            _ => None,
        })
        .collect();
    assert_eq!(deltas.len(), 2);
    assert!(!deltas[0].is_delta);
    assert!(deltas[1].is_delta);
    assert_eq!(deltas[1].values.len(), 1);

    let batches: Vec<RecordBatch> = decoded.iter().filter_map(|i| i.as_batch().cloned()).collect();
    assert_eq!(batches, vec![first, second]);
}

#[test]
fn test_explicit_dictionary_items_are_encoded() {
    let schema = dictionary_schema();
    let base: ArrayRef = Arc::new(StringArray::from(vec!["a", "b"]));
    let tail: ArrayRef = Arc::new(StringArray::from(vec!["c"]));
    let full = dictionary_batch(&schema, vec![Some(2)], &["a", "b", "c"]);

    let items = vec![
        StreamItem::Dictionary(DictionaryUpdate::replacement(0, base)),
        StreamItem::Dictionary(DictionaryUpdate::delta(0, tail)),
        StreamItem::Batch(full.clone()),
    ];
    let bytes = encode(&schema, &items, &CodecOptions::default()).unwrap();
    let decoded: Vec<StreamItem> = decode(&bytes).unwrap().map(|i| i.unwrap()).collect();

    // The batch's dictionary equals the cumulative one, so nothing is re-sent.
    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[2].as_batch(), Some(&full));
}

#[test]
fn test_record_batch_with_unsent_dictionary_is_rejected() {
    let schema = dictionary_schema();
    let batch = dictionary_batch(&schema, vec![Some(0)], &["a"]);
    let mut encoder = StreamEncoder::try_new(&schema, CodecOptions::default()).unwrap();

    let mut bytes = encoder.schema_envelope().to_bytes(8).unwrap();
    for envelope in encoder.encode_batch(&batch).unwrap() {
        if envelope.kind == MessageKind::RecordBatch {
            bytes.extend(envelope.to_bytes(8).unwrap());
        }
    }

    let mut reader = decode(&bytes).unwrap();
    let res = reader.next().unwrap();
    assert!(matches!(res, Err(IntegrityError::UnknownDictionaryId(0))));
    assert!(reader.next().is_none());
}

#[test]
fn test_explicit_delta_for_unknown_id_is_rejected() {
    let schema = dictionary_schema();
    let items = vec![StreamItem::Dictionary(DictionaryUpdate::delta(
        5,
        Arc::new(StringArray::from(vec!["a"])),
    ))];
    let res = encode(&schema, &items, &CodecOptions::default());
    assert!(matches!(res, Err(IntegrityError::UnknownDictionaryId(5))));
}

//==================================================================================
// Malformed input
//==================================================================================

#[test]
fn test_truncated_stream_is_malformed() {
    let batch = scenario_batch();
    let bytes = encode(
        &batch.schema(),
        &[StreamItem::Batch(batch)],
        &CodecOptions::default(),
    )
    .unwrap();
    let truncated = &bytes[..bytes.len() - 20];

    let mut reader = decode(truncated).unwrap();
    let res = reader.next().unwrap();
    assert!(matches!(res, Err(IntegrityError::MalformedStream(_))));
}

#[test]
fn test_stream_without_schema_is_malformed() {
    let batch = scenario_batch();
    let mut encoder = StreamEncoder::try_new(&batch.schema(), CodecOptions::default()).unwrap();
    let mut bytes = Vec::new();
    for envelope in encoder.encode_batch(&batch).unwrap() {
        bytes.extend(envelope.to_bytes(8).unwrap());
    }
    assert!(matches!(decode(&bytes), Err(IntegrityError::MalformedStream(_))));
}

#[test]
fn test_batch_of_other_schema_is_schema_mismatch() {
    let batch = scenario_batch();
    let other_schema = Schema::new(vec![Field::new("only", DataType::Int32, true)]);

    let mut bytes = StreamEncoder::try_new(&other_schema, CodecOptions::default())
        .unwrap()
        .schema_envelope()
        .to_bytes(8)
        .unwrap();
    let mut encoder = StreamEncoder::try_new(&batch.schema(), CodecOptions::default()).unwrap();
    for envelope in encoder.encode_batch(&batch).unwrap() {
        bytes.extend(envelope.to_bytes(8).unwrap());
    }

    let res = decode(&bytes).unwrap().next().unwrap();
    assert!(matches!(res, Err(IntegrityError::SchemaMismatch(_))));
}

#[test]
fn test_encoder_rejects_batches_of_other_schema() {
    let other_schema = Schema::new(vec![Field::new("only", DataType::Int32, true)]);
    let mut encoder = StreamEncoder::try_new(&other_schema, CodecOptions::default()).unwrap();
    let res = encoder.encode_batch(&scenario_batch());
    assert!(matches!(res, Err(IntegrityError::SchemaMismatch(_))));
}

#[test]
fn test_unknown_envelopes_are_skipped() {
    let batch = scenario_batch();
    let mut encoder = StreamEncoder::try_new(&batch.schema(), CodecOptions::default()).unwrap();
    let mut bytes = encoder.schema_envelope().to_bytes(8).unwrap();
    let unknown = Envelope::new(
        MessageKind::Unknown(MessageHeader::Tensor.0),
        bare_message(MessageHeader::Tensor),
        Vec::new(),
    );
    bytes.extend(unknown.to_bytes(8).unwrap());
    for envelope in encoder.encode_batch(&batch).unwrap() {
        bytes.extend(envelope.to_bytes(8).unwrap());
    }
    bytes.extend(encoder.end_of_stream().to_bytes(8).unwrap());

    let dataset = read_dataset(&bytes).unwrap();
    assert_eq!(dataset.batches, vec![batch]);
}

#[test]
fn test_legacy_prefix_without_continuation_marker() {
    let batch = scenario_batch();
    let mut encoder = StreamEncoder::try_new(&batch.schema(), CodecOptions::default()).unwrap();

    // Rewrite every envelope without the 0xFFFFFFFF marker.
    let mut envelopes = vec![encoder.schema_envelope()];
    envelopes.extend(encoder.encode_batch(&batch).unwrap());
    let mut bytes = Vec::new();
    for envelope in envelopes {
        let framed = envelope.to_bytes(8).unwrap();
        bytes.extend_from_slice(&framed[4..]);
    }
    bytes.extend_from_slice(&[0, 0, 0, 0]);

    let dataset = read_dataset(&bytes).unwrap();
    assert_eq!(dataset.batches, vec![batch]);
}

#[test]
fn test_reader_is_lazy_and_single_pass() {
    let batch = scenario_batch();
    let items: Vec<StreamItem> = (0..3).map(|_| StreamItem::Batch(batch.clone())).collect();
    let bytes = encode(&batch.schema(), &items, &CodecOptions::default()).unwrap();

    let mut reader = decode(&bytes).unwrap();
    assert_eq!(reader.schema().fields().len(), 2);
    assert!(reader.next_batch().unwrap().is_ok());
    let rest: Vec<_> = reader.by_ref().collect();
    assert_eq!(rest.len(), 2);
    assert!(reader.next().is_none());
}
