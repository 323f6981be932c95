//! This module defines the canonical, type-safe list of format features an
//! implementation may or may not handle.
//!
//! Features are derived from Arrow `DataType`s so that a golden case can work
//! out what it requires without any hand-written annotations.

use arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A part of the columnar format that some implementations do not support.
///
/// Everything not listed here (primitives, strings, lists, structs, ...) is
/// treated as baseline and every implementation must handle it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Null,
    Float16,
    Decimal256,
    LargeOffsets,
    Map,
    Union,
    Dictionary,
    DictionaryDeltas,
    CompressedBodies,
}

pub type FeatureSet = BTreeSet<Feature>;

impl Feature {
    /// Every feature, in declaration order.
    pub const ALL: [Feature; 9] = [
        Feature::Null,
        Feature::Float16,
        Feature::Decimal256,
        Feature::LargeOffsets,
        Feature::Map,
        Feature::Union,
        Feature::Dictionary,
        Feature::DictionaryDeltas,
        Feature::CompressedBodies,
    ];

    pub fn all() -> FeatureSet {
        Self::ALL.iter().copied().collect()
    }

    /// Collects the features needed to carry a value of `data_type`.
    pub fn collect_from_type(data_type: &DataType, out: &mut FeatureSet) {
        match data_type {
            DataType::Null => {
                out.insert(Feature::Null);
            }
            DataType::Float16 => {
                out.insert(Feature::Float16);
            }
            DataType::Decimal256(_, _) => {
                out.insert(Feature::Decimal256);
            }
            DataType::LargeUtf8 | DataType::LargeBinary => {
                out.insert(Feature::LargeOffsets);
            }
            DataType::LargeList(child) => {
                out.insert(Feature::LargeOffsets);
                Self::collect_from_field(child, out);
            }
            DataType::List(child) | DataType::FixedSizeList(child, _) => {
                Self::collect_from_field(child, out);
            }
            DataType::Struct(fields) => {
                for field in fields.iter() {
                    Self::collect_from_field(field, out);
                }
            }
            DataType::Map(entries, _) => {
                out.insert(Feature::Map);
                Self::collect_from_field(entries, out);
            }
            DataType::Union(fields, _) => {
                out.insert(Feature::Union);
                for (_, field) in fields.iter() {
                    Self::collect_from_field(field, out);
                }
            }
            DataType::Dictionary(_, value) => {
                out.insert(Feature::Dictionary);
                Self::collect_from_type(value, out);
            }
            _ => {}
        }
    }

    pub fn collect_from_field(field: &Field, out: &mut FeatureSet) {
        Self::collect_from_type(field.data_type(), out);
    }

    /// The features a whole schema requires.
    pub fn required_by_schema(schema: &Schema) -> FeatureSet {
        let mut out = FeatureSet::new();
        for field in schema.fields().iter() {
            Self::collect_from_field(field, &mut out);
        }
        out
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::Null => "null",
            Feature::Float16 => "float16",
            Feature::Decimal256 => "decimal256",
            Feature::LargeOffsets => "large_offsets",
            Feature::Map => "map",
            Feature::Union => "union",
            Feature::Dictionary => "dictionary",
            Feature::DictionaryDeltas => "dictionary_deltas",
            Feature::CompressedBodies => "compressed_bodies",
        };
        write!(f, "{}", name)
    }
}
