// In: src/golden/json.rs

//! The out-of-band expected-value description of a golden case.
//!
//! A description names the schema in a small JSON type vocabulary and lists
//! every column as logical JSON values, one per row:
//!
//! ```json
//! {
//!   "schema": { "fields": [
//!     { "name": "id", "nullable": true, "type": { "name": "int", "bit_width": 32, "is_signed": true } },
//!     { "name": "name", "nullable": true, "type": { "name": "utf8" } }
//!   ] },
//!   "batches": [ { "count": 3, "columns": [ [1, null, 3], ["a", "b", null] ] } ]
//! }
//! ```
//!
//! Value conventions: `null` is a null slot, floats accept `"NaN"`,
//! `"Infinity"` and `"-Infinity"`, binary is lower-case hex, 64-bit integers
//! and decimals may be strings, unions are `{"type_id": n, "value": v}` and
//! maps are `[[key, value], ...]`. Dictionary-encoded fields list their
//! resolved values.

use arrow::array::{
    make_array, Array, ArrayData, ArrayRef, AsArray, BinaryArray, BooleanArray,
    FixedSizeBinaryArray, FixedSizeListArray, LargeBinaryArray, LargeListArray,
    LargeStringArray, ListArray, MapArray, NullArray, PrimitiveArray, StringArray, StructArray,
};
use arrow::buffer::{Buffer, NullBuffer, OffsetBuffer};
use arrow::datatypes::*;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::compare::values::dictionary_key;
use crate::error::{IntegrityError, Result};
use crate::types::{DecodedDataset, FeatureSet};

type F16 = <Float16Type as ArrowPrimitiveType>::Native;

//==================================================================================
// I. Description Types
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CaseDescription {
    /// Features required beyond what the schema implies.
    #[serde(default, skip_serializing_if = "FeatureSet::is_empty")]
    pub requires: FeatureSet,
    pub schema: SchemaDescription,
    pub batches: Vec<BatchDescription>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescription {
    pub fields: Vec<FieldDescription>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(rename = "type")]
    pub data_type: TypeDescription,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldDescription>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Present when the field is dictionary encoded; `type` is then the
    /// type of the dictionary values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictionary: Option<DictionaryDescription>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DictionaryDescription {
    pub index_type: IntDescription,
    #[serde(default)]
    pub is_ordered: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntDescription {
    pub bit_width: u8,
    pub is_signed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum TypeDescription {
    Null,
    Bool,
    Int {
        bit_width: u8,
        is_signed: bool,
    },
    FloatingPoint {
        precision: FloatPrecision,
    },
    Utf8,
    LargeUtf8,
    Binary,
    LargeBinary,
    FixedSizeBinary {
        byte_width: i32,
    },
    Decimal {
        precision: u8,
        scale: i8,
        #[serde(default = "default_decimal_width")]
        bit_width: u16,
    },
    Date {
        unit: DateUnitDescription,
    },
    Time {
        unit: TimeUnitDescription,
    },
    Timestamp {
        unit: TimeUnitDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    Duration {
        unit: TimeUnitDescription,
    },
    Interval {
        unit: IntervalUnitDescription,
    },
    List,
    LargeList,
    FixedSizeList {
        list_size: i32,
    },
    Struct,
    Map {
        #[serde(default)]
        keys_sorted: bool,
    },
    Union {
        mode: UnionModeDescription,
        /// Defaults to `0..children.len()`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        type_ids: Vec<i8>,
    },
}

fn default_decimal_width() -> u16 {
    128
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FloatPrecision {
    Half,
    Single,
    Double,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DateUnitDescription {
    Day,
    Millisecond,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnitDescription {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntervalUnitDescription {
    YearMonth,
    DayTime,
    MonthDayNano,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnionModeDescription {
    Sparse,
    Dense,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BatchDescription {
    pub count: usize,
    pub columns: Vec<Vec<Value>>,
}

fn corpus_err(msg: impl Into<String>) -> IntegrityError {
    IntegrityError::Corpus(msg.into())
}

//==================================================================================
// II. Types: description <-> Arrow
//==================================================================================

impl From<TimeUnitDescription> for TimeUnit {
    fn from(unit: TimeUnitDescription) -> Self {
        match unit {
            TimeUnitDescription::Second => TimeUnit::Second,
            TimeUnitDescription::Millisecond => TimeUnit::Millisecond,
            TimeUnitDescription::Microsecond => TimeUnit::Microsecond,
            TimeUnitDescription::Nanosecond => TimeUnit::Nanosecond,
        }
    }
}

impl From<&TimeUnit> for TimeUnitDescription {
    fn from(unit: &TimeUnit) -> Self {
        match unit {
            TimeUnit::Second => TimeUnitDescription::Second,
            TimeUnit::Millisecond => TimeUnitDescription::Millisecond,
            TimeUnit::Microsecond => TimeUnitDescription::Microsecond,
            TimeUnit::Nanosecond => TimeUnitDescription::Nanosecond,
        }
    }
}

impl IntDescription {
    fn to_data_type(self) -> Result<DataType> {
        Ok(match (self.bit_width, self.is_signed) {
            (8, true) => DataType::Int8,
            (16, true) => DataType::Int16,
            (32, true) => DataType::Int32,
            (64, true) => DataType::Int64,
            (8, false) => DataType::UInt8,
            (16, false) => DataType::UInt16,
            (32, false) => DataType::UInt32,
            (64, false) => DataType::UInt64,
            (width, _) => return Err(corpus_err(format!("invalid integer bit width {width}"))),
        })
    }

    fn from_data_type(data_type: &DataType) -> Option<Self> {
        let (bit_width, is_signed) = match data_type {
            DataType::Int8 => (8, true),
            DataType::Int16 => (16, true),
            DataType::Int32 => (32, true),
            DataType::Int64 => (64, true),
            DataType::UInt8 => (8, false),
            DataType::UInt16 => (16, false),
            DataType::UInt32 => (32, false),
            DataType::UInt64 => (64, false),
            _ => return None,
        };
        Some(Self {
            bit_width,
            is_signed,
        })
    }
}

impl SchemaDescription {
    pub fn to_schema(&self) -> Result<Schema> {
        let fields = self
            .fields
            .iter()
            .map(FieldDescription::to_field)
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields).with_metadata(self.metadata.clone()))
    }

    pub fn from_schema(schema: &Schema) -> Result<Self> {
        Ok(Self {
            fields: schema
                .fields()
                .iter()
                .map(|f| FieldDescription::from_field(f))
                .collect::<Result<Vec<_>>>()?,
            metadata: schema.metadata().clone(),
        })
    }
}

impl FieldDescription {
    pub fn to_field(&self) -> Result<Field> {
        let value_type = self.value_type()?;
        let field = match &self.dictionary {
            Some(dictionary) => Field::new_dict(
                &self.name,
                DataType::Dictionary(
                    Box::new(dictionary.index_type.to_data_type()?),
                    Box::new(value_type),
                ),
                self.nullable,
                0,
                dictionary.is_ordered,
            ),
            None => Field::new(&self.name, value_type, self.nullable),
        };
        Ok(field.with_metadata(self.metadata.clone()))
    }

    fn child(&self, what: &str) -> Result<FieldRef> {
        match self.children.as_slice() {
            [child] => Ok(Arc::new(child.to_field()?)),
            _ => Err(corpus_err(format!(
                "{what} field '{}' needs exactly one child, found {}",
                self.name,
                self.children.len()
            ))),
        }
    }

    fn child_fields(&self) -> Result<Fields> {
        Ok(self
            .children
            .iter()
            .map(FieldDescription::to_field)
            .collect::<Result<Vec<_>>>()?
            .into())
    }

    /// The Arrow type of the values, before any dictionary encoding.
    fn value_type(&self) -> Result<DataType> {
        use TypeDescription as T;
        Ok(match &self.data_type {
            T::Null => DataType::Null,
            T::Bool => DataType::Boolean,
            T::Int {
                bit_width,
                is_signed,
            } => IntDescription {
                bit_width: *bit_width,
                is_signed: *is_signed,
            }
            .to_data_type()?,
            T::FloatingPoint { precision } => match precision {
                FloatPrecision::Half => DataType::Float16,
                FloatPrecision::Single => DataType::Float32,
                FloatPrecision::Double => DataType::Float64,
            },
            T::Utf8 => DataType::Utf8,
            T::LargeUtf8 => DataType::LargeUtf8,
            T::Binary => DataType::Binary,
            T::LargeBinary => DataType::LargeBinary,
            T::FixedSizeBinary { byte_width } => {
                if *byte_width < 0 {
                    return Err(corpus_err(format!(
                        "field '{}' has negative byte width {byte_width}",
                        self.name
                    )));
                }
                DataType::FixedSizeBinary(*byte_width)
            }
            T::Decimal {
                precision,
                scale,
                bit_width: 128,
            } => DataType::Decimal128(*precision, *scale),
            T::Decimal {
                precision,
                scale,
                bit_width: 256,
            } => DataType::Decimal256(*precision, *scale),
            T::Decimal { bit_width, .. } => {
                return Err(corpus_err(format!("invalid decimal bit width {bit_width}")))
            }
            T::Date { unit } => match unit {
                DateUnitDescription::Day => DataType::Date32,
                DateUnitDescription::Millisecond => DataType::Date64,
            },
            T::Time { unit } => match unit {
                TimeUnitDescription::Second | TimeUnitDescription::Millisecond => {
                    DataType::Time32((*unit).into())
                }
                _ => DataType::Time64((*unit).into()),
            },
            T::Timestamp { unit, timezone } => {
                DataType::Timestamp((*unit).into(), timezone.as_deref().map(Into::into))
            }
            T::Duration { unit } => DataType::Duration((*unit).into()),
            T::Interval { unit } => DataType::Interval(match unit {
                IntervalUnitDescription::YearMonth => IntervalUnit::YearMonth,
                IntervalUnitDescription::DayTime => IntervalUnit::DayTime,
                IntervalUnitDescription::MonthDayNano => IntervalUnit::MonthDayNano,
            }),
            T::List => DataType::List(self.child("list")?),
            T::LargeList => DataType::LargeList(self.child("large list")?),
            T::FixedSizeList { list_size } => {
                if *list_size < 0 {
                    return Err(corpus_err(format!(
                        "field '{}' has negative list size {list_size}",
                        self.name
                    )));
                }
                DataType::FixedSizeList(self.child("fixed size list")?, *list_size)
            }
            T::Struct => DataType::Struct(self.child_fields()?),
            T::Map { keys_sorted } => DataType::Map(self.child("map")?, *keys_sorted),
            T::Union { mode, type_ids } => {
                let fields = self.child_fields()?;
                let ids: Vec<i8> = if type_ids.is_empty() {
                    (0..fields.len())
                        .map(i8::try_from)
                        .collect::<std::result::Result<_, _>>()
                        .map_err(|_| {
                            corpus_err(format!(
                                "union field '{}' has {} children, at most 128 are allowed",
                                self.name,
                                fields.len()
                            ))
                        })?
                } else {
                    type_ids.clone()
                };
                if ids.len() != fields.len() {
                    return Err(corpus_err(format!(
                        "union field '{}' has {} type ids for {} children",
                        self.name,
                        ids.len(),
                        fields.len()
                    )));
                }
                let mode = match mode {
                    UnionModeDescription::Sparse => UnionMode::Sparse,
                    UnionModeDescription::Dense => UnionMode::Dense,
                };
                DataType::Union(UnionFields::new(ids, fields.iter().cloned()), mode)
            }
        })
    }

    pub fn from_field(field: &Field) -> Result<Self> {
        let (value_type, dictionary) = match field.data_type() {
            DataType::Dictionary(key, value) => {
                let index_type = IntDescription::from_data_type(key).ok_or_else(|| {
                    corpus_err(format!("dictionary index type {key} is not an integer"))
                })?;
                (
                    value.as_ref(),
                    Some(DictionaryDescription {
                        index_type,
                        is_ordered: field.dict_is_ordered().unwrap_or(false),
                    }),
                )
            }
            other => (other, None),
        };
        let (data_type, children) = describe_type(value_type)?;
        Ok(Self {
            name: field.name().clone(),
            nullable: field.is_nullable(),
            data_type,
            children,
            metadata: field.metadata().clone(),
            dictionary,
        })
    }
}

fn describe_type(data_type: &DataType) -> Result<(TypeDescription, Vec<FieldDescription>)> {
    use TypeDescription as T;
    let one = |f: &Field| -> Result<Vec<FieldDescription>> { Ok(vec![FieldDescription::from_field(f)?]) };
    Ok(match data_type {
        DataType::Null => (T::Null, vec![]),
        DataType::Boolean => (T::Bool, vec![]),
        DataType::Float16 => (T::FloatingPoint { precision: FloatPrecision::Half }, vec![]),
        DataType::Float32 => (T::FloatingPoint { precision: FloatPrecision::Single }, vec![]),
        DataType::Float64 => (T::FloatingPoint { precision: FloatPrecision::Double }, vec![]),
        DataType::Utf8 => (T::Utf8, vec![]),
        DataType::LargeUtf8 => (T::LargeUtf8, vec![]),
        DataType::Binary => (T::Binary, vec![]),
        DataType::LargeBinary => (T::LargeBinary, vec![]),
        DataType::FixedSizeBinary(width) => (T::FixedSizeBinary { byte_width: *width }, vec![]),
        DataType::Decimal128(precision, scale) => (
            T::Decimal { precision: *precision, scale: *scale, bit_width: 128 },
            vec![],
        ),
        DataType::Decimal256(precision, scale) => (
            T::Decimal { precision: *precision, scale: *scale, bit_width: 256 },
            vec![],
        ),
        DataType::Date32 => (T::Date { unit: DateUnitDescription::Day }, vec![]),
        DataType::Date64 => (T::Date { unit: DateUnitDescription::Millisecond }, vec![]),
        DataType::Time32(unit) | DataType::Time64(unit) => (T::Time { unit: unit.into() }, vec![]),
        DataType::Timestamp(unit, tz) => (
            T::Timestamp {
                unit: unit.into(),
                timezone: tz.as_ref().map(|tz| tz.to_string()),
            },
            vec![],
        ),
        DataType::Duration(unit) => (T::Duration { unit: unit.into() }, vec![]),
        DataType::Interval(unit) => (
            T::Interval {
                unit: match unit {
                    IntervalUnit::YearMonth => IntervalUnitDescription::YearMonth,
                    IntervalUnit::DayTime => IntervalUnitDescription::DayTime,
                    IntervalUnit::MonthDayNano => IntervalUnitDescription::MonthDayNano,
                },
            },
            vec![],
        ),
        DataType::List(child) => (T::List, one(child)?),
        DataType::LargeList(child) => (T::LargeList, one(child)?),
        DataType::FixedSizeList(child, size) => (T::FixedSizeList { list_size: *size }, one(child)?),
        DataType::Map(entries, sorted) => (T::Map { keys_sorted: *sorted }, one(entries)?),
        DataType::Struct(fields) => (
            T::Struct,
            fields
                .iter()
                .map(|f| FieldDescription::from_field(f))
                .collect::<Result<Vec<_>>>()?,
        ),
        DataType::Union(fields, mode) => (
            T::Union {
                mode: match mode {
                    UnionMode::Sparse => UnionModeDescription::Sparse,
                    UnionMode::Dense => UnionModeDescription::Dense,
                },
                type_ids: fields.iter().map(|(id, _)| id).collect(),
            },
            fields
                .iter()
                .map(|(_, f)| FieldDescription::from_field(f))
                .collect::<Result<Vec<_>>>()?,
        ),
        other => {
            if let Some(int) = IntDescription::from_data_type(other) {
                (T::Int { bit_width: int.bit_width, is_signed: int.is_signed }, vec![])
            } else {
                return Err(IntegrityError::UnsupportedType(format!(
                    "{other} has no JSON description"
                )));
            }
        }
    })
}

//==================================================================================
// III. Values: JSON -> Arrow
//==================================================================================

fn validity(values: &[Value]) -> Option<NullBuffer> {
    if values.iter().any(Value::is_null) {
        Some(NullBuffer::from(
            values.iter().map(|v| !v.is_null()).collect::<Vec<bool>>(),
        ))
    } else {
        None
    }
}

fn parse_integer(value: &Value) -> Result<Option<i128>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(<i128 as From<i64>>::from)
            .or_else(|| n.as_u64().map(<i128 as From<u64>>::from))
            .map(Some)
            .ok_or_else(|| corpus_err(format!("{n} is not an integer"))),
        Value::String(s) => s
            .parse::<i128>()
            .map(Some)
            .map_err(|_| corpus_err(format!("'{s}' is not an integer"))),
        other => Err(corpus_err(format!("expected an integer, found {other}"))),
    }
}

fn parse_float(value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| corpus_err(format!("{n} is not a float"))),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(Some(f64::NAN)),
            "Infinity" => Ok(Some(f64::INFINITY)),
            "-Infinity" => Ok(Some(f64::NEG_INFINITY)),
            other => other
                .parse::<f64>()
                .map(Some)
                .map_err(|_| corpus_err(format!("'{other}' is not a float"))),
        },
        other => Err(corpus_err(format!("expected a float, found {other}"))),
    }
}

fn parse_str(value: &Value) -> Result<Option<&str>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.as_str())),
        other => Err(corpus_err(format!("expected a string, found {other}"))),
    }
}

fn parse_bytes(value: &Value) -> Result<Option<Vec<u8>>> {
    parse_str(value)?.map(decode_hex).transpose()
}

fn parse_i32_member(value: &Value, key: &str) -> Result<i32> {
    value
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| corpus_err(format!("interval value {value} needs an i32 '{key}'")))
}

pub fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(corpus_err(format!("hex string '{hex}' has odd length")));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| corpus_err(format!("invalid hex string '{hex}'")))
        })
        .collect()
}

pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn integers<T>(values: &[Value], data_type: &DataType) -> Result<ArrayRef>
where
    T: ArrowPrimitiveType,
    T::Native: NumCast,
{
    let parsed = values
        .iter()
        .map(|v| match parse_integer(v)? {
            None => Ok(None),
            Some(n) => <T::Native as NumCast>::from(n)
                .map(Some)
                .ok_or_else(|| corpus_err(format!("{n} does not fit in {data_type}"))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(
        PrimitiveArray::<T>::from_iter(parsed).with_data_type(data_type.clone()),
    ))
}

fn floats<T, F>(values: &[Value], convert: F) -> Result<ArrayRef>
where
    T: ArrowPrimitiveType,
    F: Fn(f64) -> T::Native,
{
    let parsed = values
        .iter()
        .map(|v| Ok(parse_float(v)?.map(&convert)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(PrimitiveArray::<T>::from_iter(parsed)))
}

/// Splits list rows into per-row lengths and the flattened child values.
fn list_parts(values: &[Value]) -> Result<(Vec<usize>, Vec<Value>)> {
    let mut lengths = Vec::with_capacity(values.len());
    let mut flat = Vec::new();
    for value in values {
        match value {
            Value::Null => lengths.push(0),
            Value::Array(items) => {
                lengths.push(items.len());
                flat.extend(items.iter().cloned());
            }
            other => return Err(corpus_err(format!("expected a list, found {other}"))),
        }
    }
    Ok((lengths, flat))
}

/// Builds the array for one column of a description.
pub fn build_array(field: &Field, values: &[Value]) -> Result<ArrayRef> {
    if let DataType::Dictionary(_, value_type) = field.data_type() {
        let plain_field = Field::new(field.name(), value_type.as_ref().clone(), true);
        let plain = build_array(&plain_field, values)?;
        return Ok(arrow::compute::cast(&plain, field.data_type())?);
    }
    build_typed(field.data_type(), values)
}

fn build_typed(data_type: &DataType, values: &[Value]) -> Result<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Null => {
            if let Some(v) = values.iter().find(|v| !v.is_null()) {
                return Err(corpus_err(format!("null column holds {v}")));
            }
            Arc::new(NullArray::new(values.len()))
        }
        DataType::Boolean => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::Bool(b) => Ok(Some(*b)),
                    other => Err(corpus_err(format!("expected a bool, found {other}"))),
                })
                .collect::<Result<BooleanArray>>()?,
        ),
        DataType::Int8 => integers::<Int8Type>(values, data_type)?,
        DataType::Int16 => integers::<Int16Type>(values, data_type)?,
        DataType::Int32 => integers::<Int32Type>(values, data_type)?,
        DataType::Int64 => integers::<Int64Type>(values, data_type)?,
        DataType::UInt8 => integers::<UInt8Type>(values, data_type)?,
        DataType::UInt16 => integers::<UInt16Type>(values, data_type)?,
        DataType::UInt32 => integers::<UInt32Type>(values, data_type)?,
        DataType::UInt64 => integers::<UInt64Type>(values, data_type)?,
        DataType::Float16 => floats::<Float16Type, _>(values, F16::from_f64)?,
        DataType::Float32 => floats::<Float32Type, _>(values, |v| v as f32)?,
        DataType::Float64 => floats::<Float64Type, _>(values, |v| v)?,
        DataType::Decimal128(_, _) => integers::<Decimal128Type>(values, data_type)?,
        DataType::Decimal256(_, _) => {
            let parsed = values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    Value::String(s) => i256::from_string(s)
                        .map(Some)
                        .ok_or_else(|| corpus_err(format!("'{s}' is not a decimal"))),
                    other => Ok(parse_integer(other)?.map(i256::from_i128)),
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(PrimitiveArray::<Decimal256Type>::from_iter(parsed).with_data_type(data_type.clone()))
        }
        DataType::Date32 => integers::<Date32Type>(values, data_type)?,
        DataType::Date64 => integers::<Date64Type>(values, data_type)?,
        DataType::Time32(TimeUnit::Second) => integers::<Time32SecondType>(values, data_type)?,
        DataType::Time32(_) => integers::<Time32MillisecondType>(values, data_type)?,
        DataType::Time64(TimeUnit::Microsecond) => {
            integers::<Time64MicrosecondType>(values, data_type)?
        }
        DataType::Time64(_) => integers::<Time64NanosecondType>(values, data_type)?,
        DataType::Timestamp(unit, _) => match unit {
            TimeUnit::Second => integers::<TimestampSecondType>(values, data_type)?,
            TimeUnit::Millisecond => integers::<TimestampMillisecondType>(values, data_type)?,
            TimeUnit::Microsecond => integers::<TimestampMicrosecondType>(values, data_type)?,
            TimeUnit::Nanosecond => integers::<TimestampNanosecondType>(values, data_type)?,
        },
        DataType::Duration(unit) => match unit {
            TimeUnit::Second => integers::<DurationSecondType>(values, data_type)?,
            TimeUnit::Millisecond => integers::<DurationMillisecondType>(values, data_type)?,
            TimeUnit::Microsecond => integers::<DurationMicrosecondType>(values, data_type)?,
            TimeUnit::Nanosecond => integers::<DurationNanosecondType>(values, data_type)?,
        },
        DataType::Interval(IntervalUnit::YearMonth) => {
            integers::<IntervalYearMonthType>(values, data_type)?
        }
        DataType::Interval(IntervalUnit::DayTime) => {
            let parsed = values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    v => Ok(Some(IntervalDayTimeType::make_value(
                        parse_i32_member(v, "days")?,
                        parse_i32_member(v, "milliseconds")?,
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(PrimitiveArray::<IntervalDayTimeType>::from_iter(parsed))
        }
        DataType::Interval(IntervalUnit::MonthDayNano) => {
            let parsed = values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    v => {
                        let nanos = v.get("nanoseconds").map(parse_integer).transpose()?.flatten();
                        let nanos = nanos
                            .and_then(|n| i64::try_from(n).ok())
                            .ok_or_else(|| corpus_err(format!("interval value {v} needs 'nanoseconds'")))?;
                        Ok(Some(IntervalMonthDayNanoType::make_value(
                            parse_i32_member(v, "months")?,
                            parse_i32_member(v, "days")?,
                            nanos,
                        )))
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            Arc::new(PrimitiveArray::<IntervalMonthDayNanoType>::from_iter(parsed))
        }
        DataType::Utf8 => Arc::new(
            values
                .iter()
                .map(parse_str)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .collect::<StringArray>(),
        ),
        DataType::LargeUtf8 => Arc::new(
            values
                .iter()
                .map(parse_str)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .collect::<LargeStringArray>(),
        ),
        DataType::Binary => Arc::new(BinaryArray::from_iter(
            values.iter().map(parse_bytes).collect::<Result<Vec<_>>>()?,
        )),
        DataType::LargeBinary => Arc::new(LargeBinaryArray::from_iter(
            values.iter().map(parse_bytes).collect::<Result<Vec<_>>>()?,
        )),
        DataType::FixedSizeBinary(width) => {
            let size = usize::try_from(*width)
                .map_err(|_| corpus_err(format!("negative fixed size binary width {width}")))?;
            let parsed = values.iter().map(parse_bytes).collect::<Result<Vec<_>>>()?;
            let capacity = parsed
                .len()
                .checked_mul(size)
                .ok_or_else(|| corpus_err(format!("fixed size binary of width {width} overflows")))?;
            let mut data = Vec::with_capacity(capacity);
            for value in &parsed {
                match value {
                    Some(bytes) if bytes.len() == size => data.extend_from_slice(bytes),
                    Some(bytes) => {
                        return Err(corpus_err(format!(
                            "fixed size binary value of {} bytes, expected {width}",
                            bytes.len()
                        )))
                    }
                    None => data.resize(data.len() + size, 0),
                }
            }
            Arc::new(FixedSizeBinaryArray::try_new(
                *width,
                Buffer::from_vec(data),
                validity(values),
            )?)
        }
        DataType::List(child) => {
            let (lengths, flat) = list_parts(values)?;
            Arc::new(ListArray::try_new(
                child.clone(),
                OffsetBuffer::<i32>::from_lengths(lengths),
                build_array(child, &flat)?,
                validity(values),
            )?)
        }
        DataType::LargeList(child) => {
            let (lengths, flat) = list_parts(values)?;
            Arc::new(LargeListArray::try_new(
                child.clone(),
                OffsetBuffer::<i64>::from_lengths(lengths),
                build_array(child, &flat)?,
                validity(values),
            )?)
        }
        DataType::FixedSizeList(child, size) => {
            let size_usize = usize::try_from(*size)
                .map_err(|_| corpus_err(format!("negative fixed size list size {size}")))?;
            let capacity = values
                .len()
                .checked_mul(size_usize)
                .ok_or_else(|| corpus_err(format!("fixed size list of size {size} overflows")))?;
            let mut flat = Vec::with_capacity(capacity);
            for value in values {
                match value {
                    Value::Null => flat.extend(std::iter::repeat(Value::Null).take(size_usize)),
                    Value::Array(items) if items.len() == size_usize => {
                        flat.extend(items.iter().cloned())
                    }
                    other => {
                        return Err(corpus_err(format!(
                            "expected a list of {size} values, found {other}"
                        )))
                    }
                }
            }
            Arc::new(FixedSizeListArray::try_new(
                child.clone(),
                *size,
                build_array(child, &flat)?,
                validity(values),
            )?)
        }
        DataType::Struct(fields) => {
            let columns = fields
                .iter()
                .map(|f| {
                    let column: Vec<Value> = values
                        .iter()
                        .map(|row| row.get(f.name()).cloned().unwrap_or(Value::Null))
                        .collect();
                    build_array(f, &column)
                })
                .collect::<Result<Vec<_>>>()?;
            if fields.is_empty() {
                return Err(corpus_err("struct columns need at least one child field"));
            }
            Arc::new(StructArray::try_new(fields.clone(), columns, validity(values))?)
        }
        DataType::Map(entries, sorted) => {
            let DataType::Struct(kv) = entries.data_type() else {
                return Err(corpus_err(format!("map entries must be a struct, found {}", entries.data_type())));
            };
            if kv.len() != 2 {
                return Err(corpus_err("map entries must have a key and a value field"));
            }
            let (lengths, flat) = list_parts(values)?;
            let mut keys = Vec::with_capacity(flat.len());
            let mut items = Vec::with_capacity(flat.len());
            for pair in flat {
                match pair {
                    Value::Array(mut kv_pair) if kv_pair.len() == 2 => {
                        items.push(kv_pair.pop().unwrap_or(Value::Null));
                        keys.push(kv_pair.pop().unwrap_or(Value::Null));
                    }
                    other => {
                        return Err(corpus_err(format!("expected a [key, value] pair, found {other}")))
                    }
                }
            }
            let entries_array = StructArray::try_new(
                kv.clone(),
                vec![build_array(&kv[0], &keys)?, build_array(&kv[1], &items)?],
                None,
            )?;
            Arc::new(MapArray::try_new(
                entries.clone(),
                OffsetBuffer::<i32>::from_lengths(lengths),
                entries_array,
                validity(values),
                *sorted,
            )?)
        }
        DataType::Union(fields, mode) => build_union(data_type, fields, *mode, values)?,
        other => {
            return Err(IntegrityError::UnsupportedType(format!(
                "{other} cannot be built from JSON"
            )))
        }
    };
    Ok(array)
}

fn build_union(
    data_type: &DataType,
    fields: &UnionFields,
    mode: UnionMode,
    values: &[Value],
) -> Result<ArrayRef> {
    let ids: Vec<i8> = fields.iter().map(|(id, _)| id).collect();
    let first = *ids
        .first()
        .ok_or_else(|| corpus_err("union without members"))?;

    let mut type_ids = Vec::with_capacity(values.len());
    let mut offsets = Vec::with_capacity(values.len());
    let mut per_child: Vec<Vec<Value>> = vec![Vec::new(); ids.len()];

    for value in values {
        // A null row is stored as a null in the first member.
        let (id, member_value) = match value {
            Value::Null => (first, Value::Null),
            other => {
                let id = other
                    .get("type_id")
                    .and_then(Value::as_i64)
                    .and_then(|id| i8::try_from(id).ok())
                    .ok_or_else(|| corpus_err(format!("union value {other} needs a 'type_id'")))?;
                (id, other.get("value").cloned().unwrap_or(Value::Null))
            }
        };
        let position = ids
            .iter()
            .position(|candidate| *candidate == id)
            .ok_or_else(|| corpus_err(format!("union has no member with type id {id}")))?;
        type_ids.push(id);
        match mode {
            UnionMode::Sparse => {
                for (k, child) in per_child.iter_mut().enumerate() {
                    child.push(if k == position {
                        member_value.clone()
                    } else {
                        Value::Null
                    });
                }
            }
            UnionMode::Dense => {
                offsets.push(per_child[position].len() as i32);
                per_child[position].push(member_value);
            }
        }
    }

    let children = fields
        .iter()
        .zip(per_child.iter())
        .map(|((_, field), column)| build_array(field, column).map(|a| a.to_data()))
        .collect::<Result<Vec<_>>>()?;

    let mut builder = ArrayData::builder(data_type.clone())
        .len(values.len())
        .add_buffer(Buffer::from_vec(type_ids));
    if mode == UnionMode::Dense {
        builder = builder.add_buffer(Buffer::from_vec(offsets));
    }
    let data = builder.child_data(children).build()?;
    Ok(make_array(data))
}

/// Builds a dataset from a parsed description.
pub fn description_to_dataset(description: &CaseDescription) -> Result<DecodedDataset> {
    let schema = Arc::new(description.schema.to_schema()?);
    let mut batches = Vec::with_capacity(description.batches.len());
    for (index, batch) in description.batches.iter().enumerate() {
        if batch.columns.len() != schema.fields().len() {
            return Err(corpus_err(format!(
                "batch {index} has {} columns, schema has {} fields",
                batch.columns.len(),
                schema.fields().len()
            )));
        }
        let columns = schema
            .fields()
            .iter()
            .zip(&batch.columns)
            .map(|(field, values)| {
                if values.len() != batch.count {
                    return Err(corpus_err(format!(
                        "batch {index} column '{}' has {} values, count is {}",
                        field.name(),
                        values.len(),
                        batch.count
                    )));
                }
                build_array(field, values)
            })
            .collect::<Result<Vec<_>>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(batch.count));
        batches.push(RecordBatch::try_new_with_options(
            schema.clone(),
            columns,
            &options,
        )?);
    }
    Ok(DecodedDataset::new(schema, batches))
}

//==================================================================================
// IV. Values: Arrow -> JSON
//==================================================================================

fn float_json(v: f64) -> Value {
    if v.is_nan() {
        json!("NaN")
    } else if v == f64::INFINITY {
        json!("Infinity")
    } else if v == f64::NEG_INFINITY {
        json!("-Infinity")
    } else {
        json!(v)
    }
}

/// The logical JSON value of slot `i`.
pub fn value_to_json(array: &dyn Array, i: usize) -> Result<Value> {
    if array.data_type() == &DataType::Null || array.is_null(i) {
        return Ok(Value::Null);
    }
    if let Some(key) = dictionary_key(array, i) {
        return value_to_json(array.as_any_dictionary().values().as_ref(), key);
    }

    macro_rules! num {
        ($t:ty) => {
            json!(array.as_primitive::<$t>().value(i))
        };
    }
    let value = match array.data_type() {
        DataType::Boolean => json!(array.as_boolean().value(i)),
        DataType::Int8 => num!(Int8Type),
        DataType::Int16 => num!(Int16Type),
        DataType::Int32 => num!(Int32Type),
        DataType::Int64 => num!(Int64Type),
        DataType::UInt8 => num!(UInt8Type),
        DataType::UInt16 => num!(UInt16Type),
        DataType::UInt32 => num!(UInt32Type),
        DataType::UInt64 => num!(UInt64Type),
        DataType::Float16 => float_json(array.as_primitive::<Float16Type>().value(i).to_f64()),
        DataType::Float32 => float_json(array.as_primitive::<Float32Type>().value(i) as f64),
        DataType::Float64 => float_json(array.as_primitive::<Float64Type>().value(i)),
        DataType::Decimal128(_, _) => {
            json!(array.as_primitive::<Decimal128Type>().value(i).to_string())
        }
        DataType::Decimal256(_, _) => {
            json!(array.as_primitive::<Decimal256Type>().value(i).to_string())
        }
        DataType::Date32 => num!(Date32Type),
        DataType::Date64 => num!(Date64Type),
        DataType::Time32(TimeUnit::Second) => num!(Time32SecondType),
        DataType::Time32(_) => num!(Time32MillisecondType),
        DataType::Time64(TimeUnit::Microsecond) => num!(Time64MicrosecondType),
        DataType::Time64(_) => num!(Time64NanosecondType),
        DataType::Timestamp(TimeUnit::Second, _) => num!(TimestampSecondType),
        DataType::Timestamp(TimeUnit::Millisecond, _) => num!(TimestampMillisecondType),
        DataType::Timestamp(TimeUnit::Microsecond, _) => num!(TimestampMicrosecondType),
        DataType::Timestamp(TimeUnit::Nanosecond, _) => num!(TimestampNanosecondType),
        DataType::Duration(TimeUnit::Second) => num!(DurationSecondType),
        DataType::Duration(TimeUnit::Millisecond) => num!(DurationMillisecondType),
        DataType::Duration(TimeUnit::Microsecond) => num!(DurationMicrosecondType),
        DataType::Duration(TimeUnit::Nanosecond) => num!(DurationNanosecondType),
        DataType::Interval(IntervalUnit::YearMonth) => num!(IntervalYearMonthType),
        DataType::Interval(IntervalUnit::DayTime) => {
            let (days, milliseconds) =
                IntervalDayTimeType::to_parts(array.as_primitive::<IntervalDayTimeType>().value(i));
            json!({ "days": days, "milliseconds": milliseconds })
        }
        DataType::Interval(IntervalUnit::MonthDayNano) => {
            let (months, days, nanoseconds) = IntervalMonthDayNanoType::to_parts(
                array.as_primitive::<IntervalMonthDayNanoType>().value(i),
            );
            json!({ "months": months, "days": days, "nanoseconds": nanoseconds })
        }
        DataType::Utf8 => json!(array.as_string::<i32>().value(i)),
        DataType::LargeUtf8 => json!(array.as_string::<i64>().value(i)),
        DataType::Binary => json!(encode_hex(array.as_binary::<i32>().value(i))),
        DataType::LargeBinary => json!(encode_hex(array.as_binary::<i64>().value(i))),
        DataType::FixedSizeBinary(_) => json!(encode_hex(array.as_fixed_size_binary().value(i))),
        DataType::List(_) => Value::Array(column_to_json(array.as_list::<i32>().value(i).as_ref())?),
        DataType::LargeList(_) => {
            Value::Array(column_to_json(array.as_list::<i64>().value(i).as_ref())?)
        }
        DataType::FixedSizeList(_, _) => {
            Value::Array(column_to_json(array.as_fixed_size_list().value(i).as_ref())?)
        }
        DataType::Struct(fields) => {
            let columns = array.as_struct();
            let mut object = serde_json::Map::with_capacity(fields.len());
            for (index, field) in fields.iter().enumerate() {
                object.insert(
                    field.name().clone(),
                    value_to_json(columns.column(index).as_ref(), i)?,
                );
            }
            Value::Object(object)
        }
        DataType::Map(_, _) => {
            let entries = array.as_map().value(i);
            let (keys, items) = (entries.column(0), entries.column(1));
            let pairs = (0..entries.len())
                .map(|k| {
                    Ok(json!([
                        value_to_json(keys.as_ref(), k)?,
                        value_to_json(items.as_ref(), k)?
                    ]))
                })
                .collect::<Result<Vec<_>>>()?;
            Value::Array(pairs)
        }
        DataType::Union(_, _) => {
            let union = array.as_union();
            let type_id = union.type_id(i);
            let value = value_to_json(union.child(type_id).as_ref(), union.value_offset(i))?;
            json!({ "type_id": type_id, "value": value })
        }
        other => {
            return Err(IntegrityError::UnsupportedType(format!(
                "{other} has no JSON value form"
            )))
        }
    };
    Ok(value)
}

pub fn column_to_json(array: &dyn Array) -> Result<Vec<Value>> {
    (0..array.len()).map(|i| value_to_json(array, i)).collect()
}

/// Describes a dataset so that `description_to_dataset` rebuilds an
/// equivalent one.
pub fn dataset_to_description(
    requires: FeatureSet,
    dataset: &DecodedDataset,
) -> Result<CaseDescription> {
    let batches = dataset
        .batches
        .iter()
        .map(|batch| {
            Ok(BatchDescription {
                count: batch.num_rows(),
                columns: batch
                    .columns()
                    .iter()
                    .map(|c| column_to_json(c.as_ref()))
                    .collect::<Result<Vec<_>>>()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CaseDescription {
        requires,
        schema: SchemaDescription::from_schema(&dataset.schema)?,
        batches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare_datasets;
    use crate::config::ComparePolicy;

    const SCENARIO: &str = r#"{
        "schema": { "fields": [
            { "name": "id", "type": { "name": "int", "bit_width": 32, "is_signed": true } },
            { "name": "name", "type": { "name": "utf8" } }
        ] },
        "batches": [ { "count": 3, "columns": [ [1, null, 3], ["a", "b", null] ] } ]
    }"#;

    #[test]
    fn test_scenario_description_builds_expected_rows() {
        let description: CaseDescription = serde_json::from_str(SCENARIO).unwrap();
        let dataset = description_to_dataset(&description).unwrap();

        assert_eq!(dataset.num_rows(), 3);
        let ids = dataset.batches[0].column(0).as_primitive::<Int32Type>();
        assert_eq!(ids.value(0), 1);
        assert!(ids.is_null(1));
        let names = dataset.batches[0].column(1).as_string::<i32>();
        assert_eq!(names.value(1), "b");
        assert!(names.is_null(2));
    }

    #[test]
    fn test_nested_union_and_map_values() {
        let text = r#"{
            "schema": { "fields": [
                { "name": "u", "type": { "name": "union", "mode": "DENSE", "type_ids": [5, 7] },
                  "children": [
                    { "name": "i", "type": { "name": "int", "bit_width": 64, "is_signed": true } },
                    { "name": "s", "type": { "name": "utf8" } } ] },
                { "name": "m", "type": { "name": "map" }, "children": [
                    { "name": "entries", "nullable": false, "type": { "name": "struct" }, "children": [
                        { "name": "key", "nullable": false, "type": { "name": "utf8" } },
                        { "name": "value", "type": { "name": "floatingpoint", "precision": "DOUBLE" } } ] } ] }
            ] },
            "batches": [ { "count": 3, "columns": [
                [ {"type_id": 5, "value": "9007199254740993"}, {"type_id": 7, "value": "x"}, null ],
                [ [["a", 1.5], ["b", "NaN"]], null, [] ]
            ] } ]
        }"#;
        let description: CaseDescription = serde_json::from_str(text).unwrap();
        let dataset = description_to_dataset(&description).unwrap();

        let union = dataset.batches[0].column(0).as_union();
        assert_eq!(union.type_id(1), 7);
        assert_eq!(
            union.child(5).as_primitive::<Int64Type>().value(0),
            9_007_199_254_740_993
        );
        let map = dataset.batches[0].column(1).as_map();
        assert!(map.is_null(1));
        assert_eq!(map.value_length(0), 2);
    }

    #[test]
    fn test_dataset_description_round_trip_is_equivalent() {
        // 1. Arrange
        let text = r#"{
            "schema": { "fields": [
                { "name": "d", "type": { "name": "utf8" },
                  "dictionary": { "index_type": { "bit_width": 16, "is_signed": true } } },
                { "name": "t", "type": { "name": "timestamp", "unit": "MICROSECOND", "timezone": "UTC" } },
                { "name": "b", "type": { "name": "fixedsizebinary", "byte_width": 2 } },
                { "name": "iv", "type": { "name": "interval", "unit": "MONTH_DAY_NANO" } },
                { "name": "dec", "type": { "name": "decimal", "precision": 40, "scale": 2, "bit_width": 256 } }
            ], "metadata": { "origin": "test" } },
            "batches": [ { "count": 2, "columns": [
                ["x", null],
                [1700000000000000, null],
                ["beef", null],
                [{"months": 1, "days": -2, "nanoseconds": 3}, null],
                ["-123456789012345678901234567890", "5"]
            ] } ]
        }"#;
        let description: CaseDescription = serde_json::from_str(text).unwrap();
        let dataset = description_to_dataset(&description).unwrap();

        // 2. Act
        let again = dataset_to_description(FeatureSet::new(), &dataset).unwrap();
        let rebuilt = description_to_dataset(&again).unwrap();

        // 3. Assert
        assert_eq!(again.schema, description.schema);
        assert!(compare_datasets(&dataset, &rebuilt, &ComparePolicy::default()).is_equivalent());
    }

    #[test]
    fn test_bad_descriptions_are_corpus_errors() {
        let wrong_count = r#"{
            "schema": { "fields": [ { "name": "a", "type": { "name": "bool" } } ] },
            "batches": [ { "count": 2, "columns": [ [true] ] } ]
        }"#;
        let description: CaseDescription = serde_json::from_str(wrong_count).unwrap();
        let res = description_to_dataset(&description);
        assert!(matches!(res, Err(IntegrityError::Corpus(_))));

        assert!(matches!(decode_hex("abc"), Err(IntegrityError::Corpus(_))));
        assert_eq!(decode_hex("00ff").unwrap(), vec![0x00, 0xff]);
    }

    #[test]
    fn test_negative_widths_are_corpus_errors() {
        let binary = r#"{
            "schema": { "fields": [
                { "name": "b", "type": { "name": "fixedsizebinary", "byte_width": -1 } } ] },
            "batches": [ { "count": 1, "columns": [ ["beef"] ] } ]
        }"#;
        let list = r#"{
            "schema": { "fields": [
                { "name": "l", "type": { "name": "fixedsizelist", "list_size": -1 }, "children": [
                    { "name": "item", "type": { "name": "bool" } } ] } ] },
            "batches": [ { "count": 1, "columns": [ [null] ] } ]
        }"#;

        for text in [binary, list] {
            let description: CaseDescription = serde_json::from_str(text).unwrap();
            let res = description_to_dataset(&description);
            assert!(matches!(res, Err(IntegrityError::Corpus(_))), "{text}");
        }
        let field = Field::new("b", DataType::FixedSizeBinary(-1), true);
        assert!(matches!(
            build_array(&field, &[Value::Null]),
            Err(IntegrityError::Corpus(_))
        ));
    }

    #[test]
    fn test_union_with_too_many_children_is_a_corpus_error() {
        // 1. Arrange: 129 children cannot all get a default i8 type id.
        let children: Vec<Value> = (0..129)
            .map(|i| json!({ "name": format!("c{i}"), "type": { "name": "bool" } }))
            .collect();
        let text = json!({
            "schema": { "fields": [
                { "name": "u", "type": { "name": "union", "mode": "SPARSE" }, "children": children }
            ] },
            "batches": []
        });

        // 2. Act
        let description: CaseDescription = serde_json::from_value(text).unwrap();
        let res = description_to_dataset(&description);

        // 3. Assert
        assert!(matches!(res, Err(IntegrityError::Corpus(_))));
    }
}
