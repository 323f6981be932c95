//! The logical elements of one columnar stream, independent of any encoding.

use arrow::array::ArrayRef;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

/// One dictionary batch: the values bound to a dictionary id from this point
/// of the stream onwards.
///
/// A replacement (`is_delta == false`) discards whatever was bound before;
/// a delta appends `values` to the current dictionary for `id`.
#[derive(Debug, Clone)]
pub struct DictionaryUpdate {
    pub id: i64,
    pub values: ArrayRef,
    pub is_delta: bool,
}

impl DictionaryUpdate {
    pub fn replacement(id: i64, values: ArrayRef) -> Self {
        Self {
            id,
            values,
            is_delta: false,
        }
    }

    pub fn delta(id: i64, values: ArrayRef) -> Self {
        Self {
            id,
            values,
            is_delta: true,
        }
    }
}

/// One element pulled from a stream after the schema.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A dictionary batch. Decoders hand these out as they are applied so that
    /// callers can observe delta and replacement traffic.
    Dictionary(DictionaryUpdate),
    /// A record batch with every dictionary column already resolved.
    Batch(RecordBatch),
}

impl StreamItem {
    pub fn as_batch(&self) -> Option<&RecordBatch> {
        match self {
            StreamItem::Batch(batch) => Some(batch),
            StreamItem::Dictionary(_) => None,
        }
    }
}

/// A fully materialized stream: the schema plus every record batch in order.
///
/// This is what every consumer returns to the orchestrator and what the
/// comparator reads. Batch boundaries are kept but carry no meaning.
#[derive(Debug, Clone)]
pub struct DecodedDataset {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl DecodedDataset {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    /// Total number of logical rows across all batches.
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }
}
