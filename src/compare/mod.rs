// In: src/compare/mod.rs

//! The golden-corpus comparator.
//!
//! Compares an expected dataset with the dataset a consumer decoded and
//! reports the first divergence found, walking both sides as one logical
//! row sequence so that batch boundaries carry no meaning.
//!
//! Equality rules:
//! - null equals null, whatever bytes sit behind the slot;
//! - floats follow the configured `FloatPolicy`;
//! - dictionary columns compare by resolved value, never by index;
//! - schema names, types, nullability and (optionally) metadata must match,
//!   except that dictionary index widths may differ.

mod schema;
pub(crate) mod values;


use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec;
use crate::config::ComparePolicy;
use crate::error::{IntegrityError, Result};
use crate::types::DecodedDataset;

pub use schema::compare_schemas;

/// What kind of difference was found.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    FieldCount,
    FieldName,
    FieldType,
    Nullability,
    FieldMetadata,
    SchemaMetadata,
    NullMismatch,
    ValueMismatch,
    RowCountMismatch,
}

impl DivergenceKind {
    pub fn is_schema_level(&self) -> bool {
        matches!(
            self,
            DivergenceKind::FieldCount
                | DivergenceKind::FieldName
                | DivergenceKind::FieldType
                | DivergenceKind::Nullability
                | DivergenceKind::FieldMetadata
                | DivergenceKind::SchemaMetadata
        )
    }
}

/// The first point at which two datasets disagree.
///
/// Positions refer to the actual (consumed) side: `batch_index` and
/// `row_index` locate the row inside that side's batches, `global_row` is the
/// position in the logical row sequence shared by both sides.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub kind: DivergenceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_row: Option<usize>,
    /// Dotted path to the field, e.g. `points.item.x`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    pub detail: String,
}

impl Divergence {
    pub fn schema(kind: DivergenceKind, column_index: Option<usize>, path: Option<String>, detail: String) -> Self {
        Self {
            kind,
            batch_index: None,
            column_index,
            row_index: None,
            global_row: None,
            field_path: path,
            detail,
        }
    }
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(path) = &self.field_path {
            write!(f, " at '{path}'")?;
        }
        if let Some(column) = self.column_index {
            write!(f, " column {column}")?;
        }
        if let Some(batch) = self.batch_index {
            write!(f, " batch {batch}")?;
        }
        if let Some(row) = self.row_index {
            write!(f, " row {row}")?;
        }
        if let Some(global) = self.global_row {
            write!(f, " (logical row {global})")?;
        }
        write!(f, ": {}", self.detail)
    }
}

/// The outcome of one comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonResult {
    Equivalent { rows: usize },
    Divergent(Divergence),
}

impl ComparisonResult {
    pub fn is_equivalent(&self) -> bool {
        matches!(self, ComparisonResult::Equivalent { .. })
    }

    pub fn divergence(&self) -> Option<&Divergence> {
        match self {
            ComparisonResult::Divergent(d) => Some(d),
            ComparisonResult::Equivalent { .. } => None,
        }
    }
}

/// A position in one side's sequence of batches. Empty batches are skipped.
struct RowCursor<'a> {
    batches: &'a [RecordBatch],
    batch: usize,
    row: usize,
    consumed: usize,
}

impl<'a> RowCursor<'a> {
    fn new(batches: &'a [RecordBatch]) -> Self {
        let mut cursor = Self {
            batches,
            batch: 0,
            row: 0,
            consumed: 0,
        };
        cursor.settle();
        cursor
    }

    /// Moves past exhausted and empty batches.
    fn settle(&mut self) {
        while self.batch < self.batches.len() && self.row >= self.batches[self.batch].num_rows() {
            self.batch += 1;
            self.row = 0;
        }
    }

    fn current(&self) -> Option<&'a RecordBatch> {
        self.batches.get(self.batch)
    }

    fn remaining_in_batch(&self) -> usize {
        self.current().map(|b| b.num_rows() - self.row).unwrap_or(0)
    }

    fn advance(&mut self, rows: usize) {
        self.row += rows;
        self.consumed += rows;
        self.settle();
    }

    fn remaining_total(&self) -> usize {
        self.batches[self.batch.min(self.batches.len())..]
            .iter()
            .map(|b| b.num_rows())
            .sum::<usize>()
            - self.row
    }
}

/// Compares `actual` against `expected` and returns the first divergence.
pub fn compare_datasets(
    expected: &DecodedDataset,
    actual: &DecodedDataset,
    policy: &ComparePolicy,
) -> ComparisonResult {
    // 1. Schemas must agree before any value is looked at.
    if let Some(divergence) = compare_schemas(&expected.schema, &actual.schema, policy) {
        return ComparisonResult::Divergent(divergence);
    }

    // 2. Walk both sides in lockstep, one overlapping chunk at a time.
    let mut left = RowCursor::new(&expected.batches);
    let mut right = RowCursor::new(&actual.batches);
    let num_columns = expected.schema.fields().len();

    while let (Some(e_batch), Some(a_batch)) = (left.current(), right.current()) {
        let chunk = left.remaining_in_batch().min(right.remaining_in_batch());
        for column in 0..num_columns {
            let outcome = values::compare_range(
                e_batch.column(column).as_ref(),
                left.row,
                a_batch.column(column).as_ref(),
                right.row,
                chunk,
                policy,
            );
            if let Err((offset, diff)) = outcome {
                return ComparisonResult::Divergent(Divergence {
                    kind: diff.kind,
                    batch_index: Some(right.batch),
                    column_index: Some(column),
                    row_index: Some(right.row + offset),
                    global_row: Some(right.consumed + offset),
                    field_path: Some(expected.schema.field(column).name().clone()),
                    detail: diff.detail,
                });
            }
        }
        left.advance(chunk);
        right.advance(chunk);
    }

    // 3. Whatever is left over on either side is a row count divergence.
    let expected_rows = expected.num_rows();
    let actual_rows = actual.num_rows();
    if expected_rows != actual_rows {
        let missing_side = if left.current().is_some() {
            format!("{} expected rows were not produced", left.remaining_total())
        } else {
            format!("{} unexpected extra rows", right.remaining_total())
        };
        return ComparisonResult::Divergent(Divergence {
            kind: DivergenceKind::RowCountMismatch,
            batch_index: Some(right.batch),
            column_index: None,
            row_index: None,
            global_row: Some(left.consumed.min(right.consumed)),
            field_path: None,
            detail: format!("expected {expected_rows} rows, got {actual_rows}; {missing_side}"),
        });
    }

    ComparisonResult::Equivalent {
        rows: expected_rows,
    }
}

/// Like [`compare_datasets`], but a divergence becomes an error.
pub fn ensure_equivalent(
    expected: &DecodedDataset,
    actual: &DecodedDataset,
    policy: &ComparePolicy,
) -> Result<usize> {
    match compare_datasets(expected, actual, policy) {
        ComparisonResult::Equivalent { rows } => Ok(rows),
        ComparisonResult::Divergent(divergence) => Err(IntegrityError::from(divergence)),
    }
}

/// Decodes two encoded streams with the native codec and compares them.
pub fn compare_streams(
    expected: &[u8],
    actual: &[u8],
    policy: &ComparePolicy,
) -> Result<ComparisonResult> {
    let expected = codec::read_dataset(expected)?;
    let actual = codec::read_dataset(actual)?;
    Ok(compare_datasets(&expected, &actual, policy))
}
