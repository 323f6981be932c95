// In: src/ffi/tests.rs

use super::*;
use crate::error::IntegrityError;
use arrow::array::{Array, ArrayRef, DictionaryArray, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Int8Type, Schema};
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;
use std::sync::Arc;

fn ints() -> ArrayRef {
    Arc::new(Int32Array::from(vec![Some(1), None, Some(3), Some(4)]))
}

#[test]
fn test_descriptor_reports_the_exported_layout() {
    // 1. Arrange
    let array = ints();

    // 2. Act
    let exported = export_array(&array).unwrap();
    let descriptor = exported.descriptor();

    // 3. Assert
    assert_eq!(descriptor.format, "i");
    assert_eq!(descriptor.length, 4);
    assert_eq!(descriptor.null_count, 1);
    assert_eq!(descriptor.n_buffers, 2);
    assert!(descriptor.validity_ptr.is_some());
    assert!(descriptor.data_ptr.is_some());
}

#[test]
fn test_import_is_zero_copy() {
    let array = ints();
    let exported = export_array(&array).unwrap();

    let imported = import_array(&exported).unwrap();
    let data_ptr = imported.array().to_data().buffers()[0].as_ptr() as usize;

    assert_eq!(imported.array().as_ref(), array.as_ref());
    assert_eq!(Some(data_ptr), exported.descriptor().data_ptr);
}

#[test]
fn test_concurrent_imports_share_one_view() {
    let exported = export_array(&ints()).unwrap();

    let sums: Vec<i64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let view = import_array(&exported).unwrap();
                    let values = view.array().as_any().downcast_ref::<Int32Array>().unwrap();
                    values.iter().flatten().map(i64::from).sum::<i64>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(sums.iter().all(|&s| s == 8));
    assert_eq!(exported.live_views(), 0);
}

#[test]
fn test_release_twice_is_a_lifetime_violation() {
    let exported = export_array(&ints()).unwrap();
    let token = exported.token();

    assert!(token.release().is_ok());
    let res = token.release();

    assert!(matches!(res, Err(IntegrityError::LifetimeViolation(_))));
}

#[test]
fn test_import_after_release_is_a_lifetime_violation() {
    let exported = export_array(&ints()).unwrap();
    exported.token().release().unwrap();

    let res = import_array(&exported);

    assert!(matches!(res, Err(IntegrityError::LifetimeViolation(_))));
    assert_eq!(exported.live_views(), 0);
}

#[test]
fn test_reclaim_requires_release_and_no_live_views() {
    // 1. Arrange
    let mut exported = export_array(&ints()).unwrap();
    let token = exported.token();
    let view = import_array(&exported).unwrap();

    // 2. Act / 3. Assert: not yet released.
    assert!(matches!(
        exported.reclaim(),
        Err(IntegrityError::LifetimeViolation(_))
    ));

    // Released, but a view is still alive.
    token.release().unwrap();
    assert!(matches!(
        exported.reclaim(),
        Err(IntegrityError::LifetimeViolation(_))
    ));

    drop(view);
    assert!(exported.reclaim().is_ok());
    assert!(matches!(
        exported.reclaim(),
        Err(IntegrityError::LifetimeViolation(_))
    ));
}

#[test]
fn test_two_exports_of_one_array_are_independent() {
    let array = ints();
    let first = export_array(&array).unwrap();
    let second = export_array(&array).unwrap();

    first.token().release().unwrap();
    let view = import_array(&second).unwrap();

    assert!(!second.token().is_released());
    assert_eq!(view.array().len(), 4);
}

#[test]
fn test_batch_round_trip_keeps_schema_metadata() {
    let dictionary: DictionaryArray<Int8Type> =
        vec![Some("x"), None, Some("y"), Some("x")].into_iter().collect();
    let schema = Arc::new(
        Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("tag", dictionary.data_type().clone(), true),
            Field::new("note", DataType::Utf8, true),
        ])
        .with_metadata(HashMap::from([("origin".to_string(), "ffi".to_string())])),
    );
    let batch = RecordBatch::try_new(
        schema,
        vec![
            ints(),
            Arc::new(dictionary),
            Arc::new(StringArray::from(vec![None, Some("b"), Some("c"), None])),
        ],
    )
    .unwrap();

    let back = round_trip_batch(&batch).unwrap();

    assert_eq!(back, batch);
    assert_eq!(back.schema().metadata()["origin"], "ffi");
}
