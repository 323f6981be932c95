// In: src/compare/schema.rs

use arrow::datatypes::{DataType, Field, Schema};

use super::{Divergence, DivergenceKind};
use crate::config::ComparePolicy;

type FieldDiff = (DivergenceKind, String, String);

/// Compares two schemas field by field, returning the first difference.
pub fn compare_schemas(
    expected: &Schema,
    actual: &Schema,
    policy: &ComparePolicy,
) -> Option<Divergence> {
    if expected.fields().len() != actual.fields().len() {
        return Some(Divergence::schema(
            DivergenceKind::FieldCount,
            None,
            None,
            format!(
                "expected {} fields, got {}",
                expected.fields().len(),
                actual.fields().len()
            ),
        ));
    }

    for (index, (e, a)) in expected.fields().iter().zip(actual.fields()).enumerate() {
        if let Some((kind, path, detail)) = compare_fields(e, a, e.name(), policy) {
            return Some(Divergence::schema(kind, Some(index), Some(path), detail));
        }
    }

    if policy.check_schema_metadata && expected.metadata() != actual.metadata() {
        return Some(Divergence::schema(
            DivergenceKind::SchemaMetadata,
            None,
            None,
            format!("expected {:?}, got {:?}", expected.metadata(), actual.metadata()),
        ));
    }
    None
}

fn compare_fields(e: &Field, a: &Field, path: &str, policy: &ComparePolicy) -> Option<FieldDiff> {
    if e.name() != a.name() {
        return Some((
            DivergenceKind::FieldName,
            path.to_string(),
            format!("expected name '{}', got '{}'", e.name(), a.name()),
        ));
    }
    if e.is_nullable() != a.is_nullable() {
        return Some((
            DivergenceKind::Nullability,
            path.to_string(),
            format!("expected nullable={}, got nullable={}", e.is_nullable(), a.is_nullable()),
        ));
    }
    if policy.check_field_metadata && e.metadata() != a.metadata() {
        return Some((
            DivergenceKind::FieldMetadata,
            path.to_string(),
            format!("expected {:?}, got {:?}", e.metadata(), a.metadata()),
        ));
    }
    compare_types(e.data_type(), a.data_type(), path, policy)
}

fn type_mismatch(e: &DataType, a: &DataType, path: &str) -> Option<FieldDiff> {
    Some((
        DivergenceKind::FieldType,
        path.to_string(),
        format!("expected {e}, got {a}"),
    ))
}

fn compare_types(
    e: &DataType,
    a: &DataType,
    path: &str,
    policy: &ComparePolicy,
) -> Option<FieldDiff> {
    let child = |ef: &Field, af: &Field| {
        compare_fields(ef, af, &format!("{path}.{}", ef.name()), policy)
    };

    match (e, a) {
        // Index width is an encoding choice; the value type is not.
        (DataType::Dictionary(_, ev), DataType::Dictionary(_, av)) => {
            compare_types(ev, av, path, policy)
        }
        (DataType::Dictionary(_, _), _) | (_, DataType::Dictionary(_, _)) => Some((
            DivergenceKind::FieldType,
            path.to_string(),
            format!("dictionary encoding differs: expected {e}, got {a}"),
        )),
        (DataType::List(ef), DataType::List(af))
        | (DataType::LargeList(ef), DataType::LargeList(af)) => child(ef, af),
        (DataType::FixedSizeList(ef, en), DataType::FixedSizeList(af, an)) => {
            if en != an {
                return type_mismatch(e, a, path);
            }
            child(ef, af)
        }
        (DataType::Map(ef, es), DataType::Map(af, as_)) => {
            if es != as_ {
                return type_mismatch(e, a, path);
            }
            child(ef, af)
        }
        (DataType::Struct(ef), DataType::Struct(af)) => {
            if ef.len() != af.len() {
                return type_mismatch(e, a, path);
            }
            ef.iter().zip(af.iter()).find_map(|(ef, af)| child(ef, af))
        }
        (DataType::Union(ef, em), DataType::Union(af, am)) => {
            if em != am || !ef.iter().map(|(id, _)| id).eq(af.iter().map(|(id, _)| id)) {
                return type_mismatch(e, a, path);
            }
            ef.iter()
                .zip(af.iter())
                .find_map(|((_, ef), (_, af))| child(ef, af))
        }
        (e, a) if e == a => None,
        (e, a) => type_mismatch(e, a, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn schema(fields: Vec<Field>) -> Schema {
        Schema::new(fields)
    }

    #[test]
    fn test_dictionary_index_width_is_ignored() {
        let e = schema(vec![Field::new(
            "d",
            DataType::Dictionary(Box::new(DataType::Int8), Box::new(DataType::Utf8)),
            true,
        )]);
        let a = schema(vec![Field::new(
            "d",
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
            true,
        )]);
        assert!(compare_schemas(&e, &a, &ComparePolicy::default()).is_none());
    }

    #[test]
    fn test_dictionary_versus_plain_is_a_type_divergence() {
        let e = schema(vec![Field::new(
            "d",
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
            true,
        )]);
        let a = schema(vec![Field::new("d", DataType::Utf8, true)]);
        let d = compare_schemas(&e, &a, &ComparePolicy::default()).unwrap();
        assert_eq!(d.kind, DivergenceKind::FieldType);
        assert_eq!(d.column_index, Some(0));
    }

    #[test]
    fn test_nested_field_path_is_reported() {
        let inner_e = Field::new("x", DataType::Int32, true);
        let inner_a = Field::new("x", DataType::Int32, false);
        let e = schema(vec![Field::new(
            "points",
            DataType::List(Arc::new(Field::new_struct("item", vec![inner_e], true))),
            true,
        )]);
        let a = schema(vec![Field::new(
            "points",
            DataType::List(Arc::new(Field::new_struct("item", vec![inner_a], true))),
            true,
        )]);
        let d = compare_schemas(&e, &a, &ComparePolicy::default()).unwrap();
        assert_eq!(d.kind, DivergenceKind::Nullability);
        assert_eq!(d.field_path.as_deref(), Some("points.item.x"));
    }

    #[test]
    fn test_metadata_check_can_be_disabled() {
        let e = schema(vec![Field::new("a", DataType::Int32, true)])
            .with_metadata(HashMap::from([("k".to_string(), "v".to_string())]));
        let a = schema(vec![Field::new("a", DataType::Int32, true)]);

        let strict = compare_schemas(&e, &a, &ComparePolicy::default()).unwrap();
        assert_eq!(strict.kind, DivergenceKind::SchemaMetadata);

        let lenient = ComparePolicy {
            check_schema_metadata: false,
            ..ComparePolicy::default()
        };
        assert!(compare_schemas(&e, &a, &lenient).is_none());
    }
}
