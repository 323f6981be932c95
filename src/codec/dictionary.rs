// In: src/codec/dictionary.rs

//! Dictionary bookkeeping for both directions of the codec.
//!
//! - `assign_dictionary_ids` gives every dictionary field of a schema a stable
//!   id, depth-first in schema order.
//! - `DictionaryTracker` lives in the encoder and decides, per batch, whether a
//!   dictionary must be sent again, sent as a delta, or skipped.
//! - `DictionarySession` lives in the decoder and owns the dictionaries that
//!   are currently bound to each id. It is dropped with the decoder.

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::concat;
use arrow::datatypes::{DataType, Field, FieldRef, Fields, Schema, UnionFields};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{IntegrityError, Result};
use crate::types::DictionaryUpdate;

//==================================================================================
// 1. Id assignment
//==================================================================================

fn assign_field(field: &Field, next_id: &mut i64) -> Field {
    let data_type = assign_type(field.data_type(), next_id);
    let rebuilt = match &data_type {
        DataType::Dictionary(_, _) => {
            let id = *next_id;
            *next_id += 1;
            Field::new_dict(
                field.name(),
                data_type.clone(),
                field.is_nullable(),
                id,
                field.dict_is_ordered().unwrap_or(false),
            )
        }
        _ => Field::new(field.name(), data_type.clone(), field.is_nullable()),
    };
    rebuilt.with_metadata(field.metadata().clone())
}

fn assign_ref(field: &FieldRef, next_id: &mut i64) -> FieldRef {
    Arc::new(assign_field(field, next_id))
}

fn assign_type(data_type: &DataType, next_id: &mut i64) -> DataType {
    match data_type {
        DataType::List(child) => DataType::List(assign_ref(child, next_id)),
        DataType::LargeList(child) => DataType::LargeList(assign_ref(child, next_id)),
        DataType::FixedSizeList(child, size) => {
            DataType::FixedSizeList(assign_ref(child, next_id), *size)
        }
        DataType::Map(entries, sorted) => DataType::Map(assign_ref(entries, next_id), *sorted),
        DataType::Struct(fields) => DataType::Struct(
            fields
                .iter()
                .map(|f| assign_ref(f, next_id))
                .collect::<Fields>(),
        ),
        DataType::Union(fields, mode) => {
            let (ids, children): (Vec<i8>, Vec<FieldRef>) = fields
                .iter()
                .map(|(id, f)| (id, assign_ref(f, next_id)))
                .unzip();
            DataType::Union(UnionFields::new(ids, children), *mode)
        }
        other => other.clone(),
    }
}

/// Returns a copy of `schema` whose dictionary fields carry ids `0..n`,
/// assigned depth-first in field order.
pub fn assign_dictionary_ids(schema: &Schema) -> Schema {
    let mut next_id = 0;
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| assign_field(f, &mut next_id))
        .collect();
    Schema::new_with_metadata(fields, schema.metadata().clone())
}

/// Visits every dictionary field of `schema`, depth-first.
pub fn dictionary_value_types(schema: &Schema) -> Result<HashMap<i64, DataType>> {
    fn visit(field: &Field, out: &mut HashMap<i64, DataType>) -> Result<()> {
        match field.data_type() {
            DataType::Dictionary(_, value_type) => {
                let id = field.dict_id().ok_or_else(|| {
                    IntegrityError::SchemaMismatch(format!(
                        "dictionary field '{}' has no id",
                        field.name()
                    ))
                })?;
                if let Some(existing) = out.insert(id, value_type.as_ref().clone()) {
                    if existing != **value_type {
                        return Err(IntegrityError::SchemaMismatch(format!(
                            "dictionary id {id} is used with both {existing} and {value_type}"
                        )));
                    }
                }
            }
            DataType::List(child)
            | DataType::LargeList(child)
            | DataType::FixedSizeList(child, _)
            | DataType::Map(child, _) => visit(child, out)?,
            DataType::Struct(fields) => {
                for f in fields.iter() {
                    visit(f, out)?;
                }
            }
            DataType::Union(fields, _) => {
                for (_, f) in fields.iter() {
                    visit(f, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    let mut out = HashMap::new();
    for field in schema.fields().iter() {
        visit(field, &mut out)?;
    }
    Ok(out)
}

/// Collects `(id, values)` for every dictionary column reachable from
/// `array`, in the same depth-first order as `assign_dictionary_ids`.
pub fn collect_dictionaries(
    field: &Field,
    array: &dyn Array,
    out: &mut Vec<(i64, ArrayRef)>,
) -> Result<()> {
    match field.data_type() {
        DataType::Dictionary(_, _) => {
            let id = field.dict_id().ok_or_else(|| {
                IntegrityError::InternalError(format!("field '{}' lost its dictionary id", field.name()))
            })?;
            out.push((id, array.as_any_dictionary().values().clone()));
        }
        DataType::List(child) => {
            collect_dictionaries(child, array.as_list::<i32>().values().as_ref(), out)?
        }
        DataType::LargeList(child) => {
            collect_dictionaries(child, array.as_list::<i64>().values().as_ref(), out)?
        }
        DataType::FixedSizeList(child, _) => {
            collect_dictionaries(child, array.as_fixed_size_list().values().as_ref(), out)?
        }
        DataType::Map(entries, _) => collect_dictionaries(entries, array.as_map().entries(), out)?,
        DataType::Struct(fields) => {
            for (f, column) in fields.iter().zip(array.as_struct().columns()) {
                collect_dictionaries(f, column.as_ref(), out)?;
            }
        }
        DataType::Union(fields, _) => {
            let union = array.as_union();
            for (type_id, f) in fields.iter() {
                collect_dictionaries(f, union.child(type_id).as_ref(), out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

//==================================================================================
// 2. Encoder side
//==================================================================================

/// What the encoder must send for one dictionary before the next batch.
#[derive(Debug)]
pub enum DictionaryAction {
    /// Same values as last time.
    Unchanged,
    /// Send all values, replacing whatever the reader holds.
    Replace(ArrayRef),
    /// Send only these values, appended to what the reader holds.
    Delta(ArrayRef),
}

#[derive(Debug, Default)]
pub struct DictionaryTracker {
    sent: HashMap<i64, ArrayRef>,
    emit_deltas: bool,
}

impl DictionaryTracker {
    pub fn new(emit_deltas: bool) -> Self {
        Self {
            sent: HashMap::new(),
            emit_deltas,
        }
    }

    /// Decides how to bring the reader's dictionary `id` up to `values`, and
    /// records `values` as sent.
    pub fn plan(&mut self, id: i64, values: &ArrayRef) -> DictionaryAction {
        let action = match self.sent.get(&id) {
            Some(previous) if Arc::ptr_eq(previous, values) => DictionaryAction::Unchanged,
            Some(previous) if previous.to_data() == values.to_data() => {
                DictionaryAction::Unchanged
            }
            Some(previous)
                if self.emit_deltas
                    && values.len() > previous.len()
                    && values.slice(0, previous.len()).to_data() == previous.to_data() =>
            {
                DictionaryAction::Delta(values.slice(previous.len(), values.len() - previous.len()))
            }
            _ => DictionaryAction::Replace(values.clone()),
        };
        if !matches!(action, DictionaryAction::Unchanged) {
            self.sent.insert(id, values.clone());
        }
        action
    }

    /// Records an explicitly written dictionary batch.
    pub fn record(&mut self, update: &DictionaryUpdate) -> Result<()> {
        let values = if update.is_delta {
            let previous = self
                .sent
                .get(&update.id)
                .ok_or(IntegrityError::UnknownDictionaryId(update.id))?;
            concat(&[previous.as_ref(), update.values.as_ref()])?
        } else {
            update.values.clone()
        };
        self.sent.insert(update.id, values);
        Ok(())
    }
}

//==================================================================================
// 3. Decoder side
//==================================================================================

/// The dictionaries currently bound in one decoding session.
#[derive(Debug, Default)]
pub struct DictionarySession {
    value_types: HashMap<i64, DataType>,
    values: HashMap<i64, ArrayRef>,
}

impl DictionarySession {
    pub fn for_schema(schema: &Schema) -> Result<Self> {
        Ok(Self {
            value_types: dictionary_value_types(schema)?,
            values: HashMap::new(),
        })
    }

    /// The value type the schema declares for `id`.
    pub fn value_type(&self, id: i64) -> Result<&DataType> {
        self.value_types
            .get(&id)
            .ok_or(IntegrityError::UnknownDictionaryId(id))
    }

    /// The dictionary currently bound to `id`.
    pub fn get(&self, id: i64) -> Result<&ArrayRef> {
        self.values
            .get(&id)
            .ok_or(IntegrityError::UnknownDictionaryId(id))
    }

    /// Binds or extends dictionary `id`.
    pub fn apply(&mut self, id: i64, values: ArrayRef, is_delta: bool) -> Result<()> {
        let expected = self.value_type(id)?;
        if values.data_type() != expected {
            return Err(IntegrityError::SchemaMismatch(format!(
                "dictionary {id} carries {} values, schema declares {expected}",
                values.data_type()
            )));
        }
        let bound = if is_delta {
            let previous = self.get(id)?;
            concat(&[previous.as_ref(), values.as_ref()])?
        } else {
            values
        };
        self.values.insert(id, bound);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
