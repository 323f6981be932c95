// In: src/golden/generate.rs

//! Deterministic generation of the dynamic part of the corpus.
//!
//! Given the same seed, `CaseGenerator` always produces identical datasets,
//! so a failure seen once can be replayed exactly.

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Date64Array, Decimal128Array,
    Decimal256Array, DictionaryArray, DurationMillisecondArray, FixedSizeBinaryArray,
    FixedSizeListArray, Float16Array, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, IntervalDayTimeArray, IntervalMonthDayNanoArray,
    IntervalYearMonthArray, LargeBinaryArray, LargeListArray, LargeStringArray, ListArray,
    NullArray, StringArray, StructArray, Time32MillisecondArray, Time32SecondArray,
    Time64MicrosecondArray, Time64NanosecondArray, TimestampMicrosecondArray,
    TimestampNanosecondArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{
    i256, ArrowPrimitiveType, DataType, Field, Fields, Float16Type, Float64Type, Int16Type,
    Int32Type, Int8Type, IntervalDayTimeType, IntervalMonthDayNanoType, Schema, SchemaRef,
    UnionFields, UnionMode,
};
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::json::build_array;
use super::{CaseOrigin, GoldenCase};
use crate::error::Result;
use crate::types::DecodedDataset;

type F16 = <Float16Type as ArrowPrimitiveType>::Native;

const NULL_PROBABILITY: f64 = 0.2;
const VOCABULARY: [&str; 8] = ["", "a", "hello", "naïve", "日本語", "emoji 🦀", "tab\tsep", "zz"];

/// A deterministic corpus generator backed by a seeded PRNG.
#[derive(Debug)]
pub struct CaseGenerator {
    rng: StdRng,
    seed: u64,
    /// Rows in a full-size batch.
    pub rows: usize,
}

impl CaseGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            rows: 64,
        }
    }

    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows.max(4);
        self
    }

    /// Generates every dynamic case.
    pub fn generate_all(&mut self) -> Result<Vec<GoldenCase>> {
        let cases = vec![
            self.scenario()?,
            self.primitives("primitive", true)?,
            self.primitives("primitive_no_nulls", false)?,
            self.special_floats()?,
            self.strings_and_binary()?,
            self.large_offsets()?,
            self.temporal_and_decimal()?,
            self.decimal256()?,
            self.nested()?,
            self.union("union_sparse", UnionMode::Sparse)?,
            self.union("union_dense", UnionMode::Dense)?,
            self.map()?,
            self.dictionary()?,
            self.dictionary_deltas()?,
            self.null_type()?,
            self.sliced()?,
            self.empty_stream()?,
            self.metadata()?,
            self.multi_batch()?,
        ];
        log::info!("generated {} cases from seed {}", cases.len(), self.seed);
        Ok(cases)
    }

    fn case(name: &str, schema: SchemaRef, batches: Vec<RecordBatch>) -> GoldenCase {
        GoldenCase::new(
            format!("generated/{name}"),
            CaseOrigin::Generated,
            DecodedDataset::new(schema, batches),
        )
    }

    //==============================================================================
    // Value helpers
    //==============================================================================

    fn column<T>(&mut self, rows: usize, nullable: bool, mut f: impl FnMut(&mut StdRng) -> T) -> Vec<Option<T>> {
        (0..rows)
            .map(|_| {
                if nullable && self.rng.random_bool(NULL_PROBABILITY) {
                    None
                } else {
                    Some(f(&mut self.rng))
                }
            })
            .collect()
    }

    fn word(rng: &mut StdRng) -> String {
        VOCABULARY[rng.random_range(0..VOCABULARY.len())].to_string()
    }

    fn bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
        (0..len).map(|_| rng.random::<u8>()).collect()
    }

    fn validity(&mut self, rows: usize) -> Option<NullBuffer> {
        let bits: Vec<bool> = (0..rows)
            .map(|_| !self.rng.random_bool(NULL_PROBABILITY))
            .collect();
        Some(NullBuffer::from(bits))
    }

    fn int_list(&mut self, rows: usize) -> ListArray {
        let values: Vec<Option<Vec<Option<i32>>>> = (0..rows)
            .map(|_| {
                if self.rng.random_bool(NULL_PROBABILITY) {
                    return None;
                }
                let len = self.rng.random_range(0..5);
                Some(self.column(len, true, |r| r.random_range(-100..100)))
            })
            .collect();
        ListArray::from_iter_primitive::<Int32Type, _, _>(values)
    }

    //==============================================================================
    // Cases
    //==============================================================================

    /// Two nullable columns, three rows with a null in each column.
    fn scenario(&mut self) -> Result<GoldenCase> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])),
                Arc::new(StringArray::from(vec![Some("a"), Some("b"), None])),
            ],
        )?;
        Ok(Self::case("scenario", schema, vec![batch]))
    }

    fn primitive_batch(&mut self, schema: &SchemaRef, rows: usize, nullable: bool) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int8Array::from(self.column(rows, nullable, |r| r.random::<i8>()))),
            Arc::new(Int16Array::from(self.column(rows, nullable, |r| r.random::<i16>()))),
            Arc::new(Int32Array::from(self.column(rows, nullable, |r| r.random::<i32>()))),
            Arc::new(Int64Array::from(self.column(rows, nullable, |r| r.random::<i64>()))),
            Arc::new(UInt8Array::from(self.column(rows, nullable, |r| r.random::<u8>()))),
            Arc::new(UInt16Array::from(self.column(rows, nullable, |r| r.random::<u16>()))),
            Arc::new(UInt32Array::from(self.column(rows, nullable, |r| r.random::<u32>()))),
            Arc::new(UInt64Array::from(self.column(rows, nullable, |r| r.random::<u64>()))),
            Arc::new(Float32Array::from(
                self.column(rows, nullable, |r| r.random_range(-1.0e6f32..1.0e6)),
            )),
            Arc::new(Float64Array::from(
                self.column(rows, nullable, |r| r.random_range(-1.0e12..1.0e12)),
            )),
            Arc::new(BooleanArray::from(self.column(rows, nullable, |r| r.random_bool(0.5)))),
        ];
        Ok(RecordBatch::try_new(schema.clone(), columns)?)
    }

    fn primitives(&mut self, name: &str, nullable: bool) -> Result<GoldenCase> {
        let types = [
            ("i8", DataType::Int8),
            ("i16", DataType::Int16),
            ("i32", DataType::Int32),
            ("i64", DataType::Int64),
            ("u8", DataType::UInt8),
            ("u16", DataType::UInt16),
            ("u32", DataType::UInt32),
            ("u64", DataType::UInt64),
            ("f32", DataType::Float32),
            ("f64", DataType::Float64),
            ("bool", DataType::Boolean),
        ];
        let schema = Arc::new(Schema::new(
            types
                .into_iter()
                .map(|(n, t)| Field::new(n, t, nullable))
                .collect::<Vec<_>>(),
        ));
        let batches = vec![
            self.primitive_batch(&schema, self.rows, nullable)?,
            self.primitive_batch(&schema, self.rows / 2 + 1, nullable)?,
        ];
        Ok(Self::case(name, schema, batches))
    }

    fn special_floats(&mut self) -> Result<GoldenCase> {
        let specials = vec![
            Some(0.0),
            Some(-0.0),
            Some(f64::NAN),
            Some(f64::INFINITY),
            Some(f64::NEG_INFINITY),
            Some(f64::MIN_POSITIVE),
            Some(5e-324),
            Some(f64::MAX),
            None,
            Some(f64::EPSILON),
        ];
        let singles: Vec<Option<f32>> = specials.iter().map(|v| v.map(|v| v as f32)).collect();
        let halves: Vec<Option<F16>> = specials.iter().map(|v| v.map(F16::from_f64)).collect();
        let schema = Arc::new(Schema::new(vec![
            Field::new("f64", DataType::Float64, true),
            Field::new("f32", DataType::Float32, true),
            Field::new("f16", DataType::Float16, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Float64Array::from(specials)),
                Arc::new(Float32Array::from(singles)),
                Arc::new(Float16Array::from(halves)),
            ],
        )?;
        Ok(Self::case("special_floats", schema, vec![batch]))
    }

    fn strings_and_binary(&mut self) -> Result<GoldenCase> {
        let rows = self.rows;
        let words = self.column(rows, true, Self::word);
        let blobs = self.column(rows, true, |r| {
            let len = r.random_range(0..24);
            Self::bytes(r, len)
        });
        let fixed = self.column(rows, true, |r| Self::bytes(r, 4));
        let schema = Arc::new(Schema::new(vec![
            Field::new("utf8", DataType::Utf8, true),
            Field::new("binary", DataType::Binary, true),
            Field::new("fixed", DataType::FixedSizeBinary(4), true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(words)),
                Arc::new(BinaryArray::from_iter(blobs)),
                Arc::new(FixedSizeBinaryArray::try_from_sparse_iter_with_size(
                    fixed.into_iter(),
                    4,
                )?),
            ],
        )?;
        Ok(Self::case("strings_binary", schema, vec![batch]))
    }

    fn large_offsets(&mut self) -> Result<GoldenCase> {
        let rows = self.rows;
        let words = self.column(rows, true, Self::word);
        let blobs = self.column(rows, true, |r| {
            let len = r.random_range(0..16);
            Self::bytes(r, len)
        });
        let lists: Vec<Option<Vec<Option<i32>>>> = (0..rows)
            .map(|i| (i % 5 != 0).then(|| (0..(i % 4) as i32).map(Some).collect()))
            .collect();
        let large_list = LargeListArray::from_iter_primitive::<Int32Type, _, _>(lists);
        let schema = Arc::new(Schema::new(vec![
            Field::new("large_utf8", DataType::LargeUtf8, true),
            Field::new("large_binary", DataType::LargeBinary, true),
            Field::new("large_list", large_list.data_type().clone(), true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(LargeStringArray::from(words)),
                Arc::new(LargeBinaryArray::from_iter(blobs)),
                Arc::new(large_list),
            ],
        )?;
        Ok(Self::case("large_offsets", schema, vec![batch]))
    }

    fn temporal_and_decimal(&mut self) -> Result<GoldenCase> {
        let rows = self.rows;
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Date32Array::from(self.column(rows, true, |r| r.random_range(-20_000..40_000)))),
            Arc::new(Date64Array::from(
                self.column(rows, true, |r| r.random_range(-20_000i64..40_000) * 86_400_000),
            )),
            Arc::new(Time32SecondArray::from(self.column(rows, true, |r| r.random_range(0..86_400)))),
            Arc::new(Time32MillisecondArray::from(
                self.column(rows, true, |r| r.random_range(0..86_400_000)),
            )),
            Arc::new(Time64MicrosecondArray::from(
                self.column(rows, true, |r| r.random_range(0..86_400_000_000i64)),
            )),
            Arc::new(Time64NanosecondArray::from(
                self.column(rows, true, |r| r.random_range(0..86_400_000_000_000i64)),
            )),
            Arc::new(
                TimestampMicrosecondArray::from(self.column(rows, true, |r| r.random::<i32>() as i64 * 1_000_000))
                    .with_timezone("UTC"),
            ),
            Arc::new(TimestampNanosecondArray::from(self.column(rows, true, |r| r.random::<i64>()))),
            Arc::new(DurationMillisecondArray::from(self.column(rows, true, |r| r.random::<i64>()))),
            Arc::new(IntervalYearMonthArray::from(self.column(rows, true, |r| r.random_range(-240..240)))),
            Arc::new(IntervalDayTimeArray::from(self.column(rows, true, |r| {
                IntervalDayTimeType::make_value(r.random_range(-400..400), r.random_range(0..86_400_000))
            }))),
            Arc::new(IntervalMonthDayNanoArray::from(self.column(rows, true, |r| {
                IntervalMonthDayNanoType::make_value(
                    r.random_range(-24..24),
                    r.random_range(-31..31),
                    r.random::<i64>(),
                )
            }))),
            Arc::new(
                Decimal128Array::from(self.column(rows, true, |r| {
                    r.random_range(-99_999_999_999_999i128..99_999_999_999_999)
                }))
                .with_precision_and_scale(20, 4)?,
            ),
        ];
        let fields: Vec<Field> = [
            "date32", "date64", "time32_s", "time32_ms", "time64_us", "time64_ns", "ts_us_utc",
            "ts_ns", "duration_ms", "interval_ym", "interval_dt", "interval_mdn", "decimal128",
        ]
        .into_iter()
        .zip(&columns)
        .map(|(name, column)| Field::new(name, column.data_type().clone(), true))
        .collect();
        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema.clone(), columns)?;
        Ok(Self::case("temporal_decimal", schema, vec![batch]))
    }

    fn decimal256(&mut self) -> Result<GoldenCase> {
        let values = self.column(self.rows, true, |r| {
            i256::from_i128(r.random_range(-10i128.pow(30)..10i128.pow(30)))
        });
        let array = Decimal256Array::from(values).with_precision_and_scale(50, 10)?;
        let schema = Arc::new(Schema::new(vec![Field::new(
            "decimal256",
            array.data_type().clone(),
            true,
        )]));
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(array)])?;
        Ok(Self::case("decimal256", schema, vec![batch]))
    }

    fn nested_batch(&mut self, schema: &SchemaRef, rows: usize) -> Result<RecordBatch> {
        let list = self.int_list(rows);

        let triples: Vec<Option<Vec<Option<f64>>>> = (0..rows)
            .map(|_| {
                if self.rng.random_bool(NULL_PROBABILITY) {
                    None
                } else {
                    Some(self.column(3, true, |r| r.random_range(-1.0..1.0)))
                }
            })
            .collect();
        let fixed = FixedSizeListArray::from_iter_primitive::<Float64Type, _, _>(triples, 3);

        let struct_fields = match schema.field(2).data_type() {
            DataType::Struct(fields) => fields.clone(),
            _ => Fields::empty(),
        };
        let a = Int32Array::from(self.column(rows, true, |r| r.random_range(0..1000)));
        let b = StringArray::from(self.column(rows, true, Self::word));
        let c = self.int_list(rows);
        let validity = self.validity(rows);
        let record = StructArray::try_new(
            struct_fields.clone(),
            vec![Arc::new(a), Arc::new(b), Arc::new(c)],
            validity,
        )?;

        // list<struct>: each row holds up to three records.
        let lengths: Vec<usize> = (0..rows).map(|_| self.rng.random_range(0..4)).collect();
        let total: usize = lengths.iter().sum();
        let inner = StructArray::try_new(
            struct_fields.clone(),
            vec![
                Arc::new(Int32Array::from(self.column(total, true, |r| r.random_range(0..1000)))),
                Arc::new(StringArray::from(self.column(total, true, Self::word))),
                Arc::new(self.int_list(total)),
            ],
            None,
        )?;
        let list_validity = self.validity(rows);
        let records = ListArray::try_new(
            Arc::new(Field::new("item", DataType::Struct(struct_fields), true)),
            OffsetBuffer::<i32>::from_lengths(lengths),
            Arc::new(inner),
            list_validity,
        )?;

        Ok(RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(list), Arc::new(fixed), Arc::new(record), Arc::new(records)],
        )?)
    }

    fn nested(&mut self) -> Result<GoldenCase> {
        let item = Arc::new(Field::new("item", DataType::Int32, true));
        let struct_fields = Fields::from(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, true),
            Field::new("c", DataType::List(item.clone()), true),
        ]);
        let schema = Arc::new(Schema::new(vec![
            Field::new("list", DataType::List(item), true),
            Field::new(
                "fixed",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float64, true)), 3),
                true,
            ),
            Field::new("record", DataType::Struct(struct_fields.clone()), true),
            Field::new(
                "records",
                DataType::List(Arc::new(Field::new("item", DataType::Struct(struct_fields), true))),
                true,
            ),
        ]));
        let batches = vec![
            self.nested_batch(&schema, self.rows)?,
            self.nested_batch(&schema, self.rows / 3 + 1)?,
        ];
        Ok(Self::case("nested", schema, batches))
    }

    fn union(&mut self, name: &str, mode: UnionMode) -> Result<GoldenCase> {
        let fields = UnionFields::new(
            vec![3, 5, 9],
            vec![
                Field::new("int", DataType::Int32, true),
                Field::new("text", DataType::Utf8, true),
                Field::new("real", DataType::Float64, true),
            ],
        );
        let field = Field::new("u", DataType::Union(fields, mode), false);
        let values: Vec<Value> = (0..self.rows)
            .map(|_| match self.rng.random_range(0..4) {
                0 => json!({ "type_id": 3, "value": self.rng.random::<i32>() }),
                1 => json!({ "type_id": 5, "value": Self::word(&mut self.rng) }),
                2 => json!({ "type_id": 9, "value": self.rng.random_range(-1.0e3..1.0e3) }),
                _ => json!({ "type_id": 5, "value": null }),
            })
            .collect();
        let array = build_array(&field, &values)?;
        let schema = Arc::new(Schema::new(vec![field]));
        let batch = RecordBatch::try_new(schema.clone(), vec![array])?;
        Ok(Self::case(name, schema, vec![batch]))
    }

    fn map(&mut self) -> Result<GoldenCase> {
        let entries = Field::new(
            "entries",
            DataType::Struct(Fields::from(vec![
                Field::new("key", DataType::Utf8, false),
                Field::new("value", DataType::Int64, true),
            ])),
            false,
        );
        let field = Field::new("m", DataType::Map(Arc::new(entries), false), true);
        let values: Vec<Value> = (0..self.rows)
            .map(|_| {
                if self.rng.random_bool(NULL_PROBABILITY) {
                    return Value::Null;
                }
                let len = self.rng.random_range(0..4);
                let pairs: Vec<Value> = (0..len)
                    .map(|k| {
                        let value = if self.rng.random_bool(NULL_PROBABILITY) {
                            Value::Null
                        } else {
                            json!(self.rng.random::<i64>())
                        };
                        json!([format!("k{k}"), value])
                    })
                    .collect();
                Value::Array(pairs)
            })
            .collect();
        let array = build_array(&field, &values)?;
        let schema = Arc::new(Schema::new(vec![field]));
        let batch = RecordBatch::try_new(schema.clone(), vec![array])?;
        Ok(Self::case("map", schema, vec![batch]))
    }

    fn keys<K>(&mut self, rows: usize, dictionary_len: usize) -> Vec<Option<K>>
    where
        K: TryFrom<usize>,
    {
        self.column(rows, true, |r| r.random_range(0..dictionary_len))
            .into_iter()
            .map(|k| k.and_then(|k| K::try_from(k).ok()))
            .collect()
    }

    fn dictionary_batch(&mut self, schema: &SchemaRef, rows: usize, palette: &[&str]) -> Result<RecordBatch> {
        let colours: DictionaryArray<Int32Type> = DictionaryArray::try_new(
            self.keys::<i32>(rows, palette.len()).into(),
            Arc::new(StringArray::from(palette.to_vec())),
        )?;
        let codes: DictionaryArray<Int8Type> = DictionaryArray::try_new(
            self.keys::<i8>(rows, 3).into(),
            Arc::new(Int64Array::from(vec![
                self.rng.random::<i64>(),
                self.rng.random::<i64>(),
                self.rng.random::<i64>(),
            ])),
        )?;
        let tags = self.keys::<i16>(rows * 2, VOCABULARY.len());
        let tag_values: DictionaryArray<Int16Type> = DictionaryArray::try_new(
            tags.into(),
            Arc::new(StringArray::from(VOCABULARY.to_vec())),
        )?;
        let tag_item = match schema.field(2).data_type() {
            DataType::List(item) => item.clone(),
            _ => Arc::new(Field::new("item", tag_values.data_type().clone(), true)),
        };
        let tag_lists = ListArray::try_new(
            tag_item,
            OffsetBuffer::<i32>::from_lengths(vec![2; rows]),
            Arc::new(tag_values),
            None,
        )?;
        Ok(RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(colours), Arc::new(codes), Arc::new(tag_lists)],
        )?)
    }

    fn dictionary_schema() -> SchemaRef {
        let utf8_dict = |key: DataType| DataType::Dictionary(Box::new(key), Box::new(DataType::Utf8));
        Arc::new(Schema::new(vec![
            Field::new("colour", utf8_dict(DataType::Int32), true),
            Field::new(
                "code",
                DataType::Dictionary(Box::new(DataType::Int8), Box::new(DataType::Int64)),
                true,
            ),
            Field::new(
                "tags",
                DataType::List(Arc::new(Field::new("item", utf8_dict(DataType::Int16), true))),
                true,
            ),
        ]))
    }

    /// Dictionaries replaced between batches, including one inside a list.
    fn dictionary(&mut self) -> Result<GoldenCase> {
        let schema = Self::dictionary_schema();
        let batches = vec![
            self.dictionary_batch(&schema, self.rows, &["red", "green", "blue"])?,
            self.dictionary_batch(&schema, self.rows / 2 + 1, &["cyan", "magenta"])?,
        ];
        Ok(Self::case("dictionary", schema, batches))
    }

    /// A dictionary that only ever grows, so delta-capable writers can send
    /// just the new tail.
    fn dictionary_deltas(&mut self) -> Result<GoldenCase> {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "word",
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
            true,
        )]));
        let mut batches = Vec::new();
        for size in [2, 4, 5, 8] {
            let keys = self.keys::<i32>(self.rows / 4 + 1, size);
            let array: DictionaryArray<Int32Type> = DictionaryArray::try_new(
                keys.into(),
                Arc::new(StringArray::from(VOCABULARY[..size].to_vec())),
            )?;
            batches.push(RecordBatch::try_new(schema.clone(), vec![Arc::new(array)])?);
        }
        Ok(Self::case("dictionary_deltas", schema, batches))
    }

    fn null_type(&mut self) -> Result<GoldenCase> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("nothing", DataType::Null, true),
            Field::new("id", DataType::Int32, true),
        ]));
        let mut batches = Vec::new();
        for rows in [self.rows, 3] {
            batches.push(RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(NullArray::new(rows)),
                    Arc::new(Int32Array::from(self.column(rows, true, |r| r.random::<i32>()))),
                ],
            )?);
        }
        Ok(Self::case("null_type", schema, batches))
    }

    /// Batches that are slices of a larger batch, so every buffer starts at a
    /// non-zero offset.
    fn sliced(&mut self) -> Result<GoldenCase> {
        let rows = self.rows * 2;
        let list = self.int_list(rows);
        let schema = Arc::new(Schema::new(vec![
            Field::new("flag", DataType::Boolean, true),
            Field::new("text", DataType::Utf8, true),
            Field::new("list", list.data_type().clone(), true),
        ]));
        let flags = BooleanArray::from(self.column(rows, true, |r| r.random_bool(0.5)));
        let words = StringArray::from(self.column(rows, true, Self::word));
        let whole = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(flags), Arc::new(words), Arc::new(list)],
        )?;
        let batches = vec![
            whole.slice(3, self.rows / 2),
            whole.slice(self.rows / 2 + 5, self.rows / 3),
            whole.slice(rows - 7, 7),
        ];
        Ok(Self::case("sliced", schema, batches))
    }

    fn empty_stream(&mut self) -> Result<GoldenCase> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        Ok(Self::case("empty", schema, vec![]))
    }

    fn metadata(&mut self) -> Result<GoldenCase> {
        let field_metadata = HashMap::from([("unit".to_string(), "metres".to_string())]);
        let schema_metadata = HashMap::from([
            ("origin".to_string(), "generated".to_string()),
            ("seed".to_string(), self.seed.to_string()),
        ]);
        let schema = Arc::new(
            Schema::new(vec![
                Field::new("distance", DataType::Float64, false).with_metadata(field_metadata),
                Field::new("label", DataType::Utf8, true),
            ])
            .with_metadata(schema_metadata),
        );
        let rows = self.rows;
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Float64Array::from(
                    (0..rows).map(|_| self.rng.random_range(0.0..1.0e4)).collect::<Vec<f64>>(),
                )),
                Arc::new(StringArray::from(self.column(rows, true, Self::word))),
            ],
        )?;
        Ok(Self::case("metadata", schema, vec![batch]))
    }

    fn multi_batch(&mut self) -> Result<GoldenCase> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let mut next_id = 0i64;
        let mut batches = Vec::new();
        for rows in [1, 0, 7, self.rows, 2] {
            let ids: Vec<i64> = (next_id..next_id + rows as i64).collect();
            next_id += rows as i64;
            batches.push(RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(Int64Array::from(ids)),
                    Arc::new(StringArray::from(self.column(rows, true, Self::word))),
                ],
            )?);
        }
        Ok(Self::case("multi_batch", schema, batches))
    }
}
