// In: src/compare/values.rs

//! Value-level equality between two arrays of the same logical type.
//!
//! Every check works on one slot of each side at a time so that the two
//! sides may be sliced, batched and dictionary encoded differently.

use arrow::array::{downcast_primitive_array, Array, AsArray, PrimitiveArray};
use arrow::datatypes::{
    ArrowNativeType, ArrowPrimitiveType, DataType, Float16Type, Float32Type, Float64Type, Int16Type, Int32Type,
    Int64Type, Int8Type, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use num_traits::Float;
use std::fmt::Debug;

use super::DivergenceKind;
use crate::config::{ComparePolicy, FloatPolicy};

/// Why two slots are not equal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ValueDiff {
    pub kind: DivergenceKind,
    pub detail: String,
}

impl ValueDiff {
    fn value(detail: String) -> Self {
        Self {
            kind: DivergenceKind::ValueMismatch,
            detail,
        }
    }

    fn nulls(detail: String) -> Self {
        Self {
            kind: DivergenceKind::NullMismatch,
            detail,
        }
    }

    /// Prefixes the detail with the nested position it was found at.
    fn within(mut self, location: String) -> Self {
        self.detail = format!("{location}: {}", self.detail);
        self
    }
}

type SlotResult = std::result::Result<(), ValueDiff>;

/// Compares `len` slots starting at `e_start` / `a_start`. On failure returns
/// the offset of the first divergent slot.
pub(crate) fn compare_range(
    expected: &dyn Array,
    e_start: usize,
    actual: &dyn Array,
    a_start: usize,
    len: usize,
    policy: &ComparePolicy,
) -> std::result::Result<(), (usize, ValueDiff)> {
    for offset in 0..len {
        value_eq(expected, e_start + offset, actual, a_start + offset, policy)
            .map_err(|diff| (offset, diff))?;
    }
    Ok(())
}

/// The key stored at slot `i` of a dictionary array, or `None` for any other
/// array.
pub(crate) fn dictionary_key(array: &dyn Array, i: usize) -> Option<usize> {
    macro_rules! key {
        ($t:ty) => {
            array.as_dictionary::<$t>().keys().value(i).as_usize()
        };
    }
    let DataType::Dictionary(key_type, _) = array.data_type() else {
        return None;
    };
    let key = match key_type.as_ref() {
        DataType::Int8 => key!(Int8Type),
        DataType::Int16 => key!(Int16Type),
        DataType::Int32 => key!(Int32Type),
        DataType::Int64 => key!(Int64Type),
        DataType::UInt8 => key!(UInt8Type),
        DataType::UInt16 => key!(UInt16Type),
        DataType::UInt32 => key!(UInt32Type),
        DataType::UInt64 => key!(UInt64Type),
        _ => return None,
    };
    Some(key)
}

fn is_null_slot(array: &dyn Array, i: usize) -> bool {
    match array.data_type() {
        DataType::Null => true,
        _ => array.is_null(i),
    }
}

/// Compares slot `i` of `e` with slot `j` of `a`.
pub(crate) fn value_eq(
    e: &dyn Array,
    i: usize,
    a: &dyn Array,
    j: usize,
    policy: &ComparePolicy,
) -> SlotResult {
    // 1. Nulls first: what lies behind a null slot is never looked at.
    match (is_null_slot(e, i), is_null_slot(a, j)) {
        (true, true) => return Ok(()),
        (true, false) => return Err(ValueDiff::nulls("expected null, got a value".to_string())),
        (false, true) => return Err(ValueDiff::nulls("expected a value, got null".to_string())),
        (false, false) => {}
    }

    // 2. Dictionaries resolve to their values, independently on each side.
    if let Some(key) = dictionary_key(e, i) {
        return value_eq(e.as_any_dictionary().values().as_ref(), key, a, j, policy);
    }
    if let Some(key) = dictionary_key(a, j) {
        return value_eq(e, i, a.as_any_dictionary().values().as_ref(), key, policy);
    }

    if e.data_type() != a.data_type() && !is_nested(e.data_type()) {
        return Err(ValueDiff::value(format!(
            "type {} cannot be compared with {}",
            e.data_type(),
            a.data_type()
        )));
    }

    // 3. Dispatch on the physical type.
    match e.data_type() {
        DataType::Float16 => {
            let l = e.as_primitive::<Float16Type>().value(i).to_f32();
            let r = a.as_primitive::<Float16Type>().value(j).to_f32();
            float_eq(l, r, policy.float)
        }
        DataType::Float32 => float_eq(
            e.as_primitive::<Float32Type>().value(i),
            a.as_primitive::<Float32Type>().value(j),
            policy.float,
        ),
        DataType::Float64 => float_eq(
            e.as_primitive::<Float64Type>().value(i),
            a.as_primitive::<Float64Type>().value(j),
            policy.float,
        ),
        DataType::Boolean => {
            let (l, r) = (e.as_boolean().value(i), a.as_boolean().value(j));
            scalar_eq(&l, &r)
        }
        DataType::Utf8 => scalar_eq(&e.as_string::<i32>().value(i), &a.as_string::<i32>().value(j)),
        DataType::LargeUtf8 => {
            scalar_eq(&e.as_string::<i64>().value(i), &a.as_string::<i64>().value(j))
        }
        DataType::Binary => bytes_eq(e.as_binary::<i32>().value(i), a.as_binary::<i32>().value(j)),
        DataType::LargeBinary => {
            bytes_eq(e.as_binary::<i64>().value(i), a.as_binary::<i64>().value(j))
        }
        DataType::FixedSizeBinary(_) => bytes_eq(
            e.as_fixed_size_binary().value(i),
            a.as_fixed_size_binary().value(j),
        ),
        DataType::List(_) => {
            let (l, r) = (e.as_list::<i32>().value(i), a.as_list::<i32>().value(j));
            elements_eq(l.as_ref(), r.as_ref(), policy)
        }
        DataType::LargeList(_) => {
            let (l, r) = (e.as_list::<i64>().value(i), a.as_list::<i64>().value(j));
            elements_eq(l.as_ref(), r.as_ref(), policy)
        }
        DataType::FixedSizeList(_, _) => {
            let (l, r) = (e.as_fixed_size_list().value(i), a.as_fixed_size_list().value(j));
            elements_eq(l.as_ref(), r.as_ref(), policy)
        }
        DataType::Map(_, _) => {
            let (l, r) = (e.as_map().value(i), a.as_map().value(j));
            elements_eq(&l, &r, policy)
        }
        DataType::Struct(fields) => {
            let (l, r) = (e.as_struct(), a.as_struct());
            for (index, field) in fields.iter().enumerate() {
                value_eq(l.column(index).as_ref(), i, r.column(index).as_ref(), j, policy)
                    .map_err(|d| d.within(format!(".{}", field.name())))?;
            }
            Ok(())
        }
        DataType::Union(_, _) => {
            let (l, r) = (e.as_union(), a.as_union());
            let (l_id, r_id) = (l.type_id(i), r.type_id(j));
            if l_id != r_id {
                return Err(ValueDiff::value(format!(
                    "expected union member {l_id}, got member {r_id}"
                )));
            }
            value_eq(
                l.child(l_id).as_ref(),
                l.value_offset(i),
                r.child(r_id).as_ref(),
                r.value_offset(j),
                policy,
            )
            .map_err(|d| d.within(format!("<{l_id}>")))
        }
        _ => primitive_eq(e, i, a, j),
    }
}

fn is_nested(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::List(_)
            | DataType::LargeList(_)
            | DataType::FixedSizeList(_, _)
            | DataType::Map(_, _)
            | DataType::Struct(_)
            | DataType::Union(_, _)
    )
}

/// Element-wise comparison of two list values.
fn elements_eq(l: &dyn Array, r: &dyn Array, policy: &ComparePolicy) -> SlotResult {
    if l.len() != r.len() {
        return Err(ValueDiff::value(format!(
            "expected {} elements, got {}",
            l.len(),
            r.len()
        )));
    }
    for k in 0..l.len() {
        value_eq(l, k, r, k, policy).map_err(|d| d.within(format!("[{k}]")))?;
    }
    Ok(())
}

fn scalar_eq<T: PartialEq + Debug + ?Sized>(l: &T, r: &T) -> SlotResult {
    if l == r {
        Ok(())
    } else {
        Err(ValueDiff::value(format!("expected {l:?}, got {r:?}")))
    }
}

fn bytes_eq(l: &[u8], r: &[u8]) -> SlotResult {
    if l == r {
        return Ok(());
    }
    Err(ValueDiff::value(format!(
        "expected 0x{}, got 0x{}",
        hex_preview(l),
        hex_preview(r)
    )))
}

fn hex_preview(bytes: &[u8]) -> String {
    const PREVIEW: usize = 32;
    let mut out: String = bytes.iter().take(PREVIEW).map(|b| format!("{b:02x}")).collect();
    if bytes.len() > PREVIEW {
        out.push_str(&format!("... ({} bytes)", bytes.len()));
    }
    out
}

/// Integers, decimals, temporal and interval types: the native values must
/// be identical.
fn primitive_eq(e: &dyn Array, i: usize, a: &dyn Array, j: usize) -> SlotResult {
    fn typed<T: ArrowPrimitiveType>(
        e: &PrimitiveArray<T>,
        i: usize,
        a: &dyn Array,
        j: usize,
    ) -> SlotResult {
        match a.as_primitive_opt::<T>() {
            Some(a) => scalar_eq(&e.value(i), &a.value(j)),
            None => Err(ValueDiff::value(format!(
                "actual column is not {}",
                e.data_type()
            ))),
        }
    }

    downcast_primitive_array!(
        e => typed(e, i, a, j),
        t => Err(ValueDiff::value(format!("values of type {t} cannot be compared")))
    )
}

/// Float equality under the configured policy.
fn float_eq<F: Float + Debug + FloatBits>(l: F, r: F, policy: FloatPolicy) -> SlotResult {
    let equal = match policy {
        FloatPolicy::BitExact => l.bits() == r.bits(),
        FloatPolicy::NanInsensitive => (l.is_nan() && r.is_nan()) || l.bits() == r.bits(),
        FloatPolicy::Epsilon { epsilon } => {
            (l.is_nan() && r.is_nan())
                || l.bits() == r.bits()
                || match (l.to_f64(), r.to_f64()) {
                    (Some(l), Some(r)) => (l - r).abs() <= epsilon,
                    _ => false,
                }
        }
    };
    if equal {
        Ok(())
    } else {
        Err(ValueDiff::value(format!(
            "expected {l:?} (0x{:x}), got {r:?} (0x{:x})",
            l.bits(),
            r.bits()
        )))
    }
}

trait FloatBits {
    fn bits(self) -> u64;
}

impl FloatBits for f32 {
    fn bits(self) -> u64 {
        self.to_bits() as u64
    }
}

impl FloatBits for f64 {
    fn bits(self) -> u64 {
        self.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int32Array};

    fn policy(float: FloatPolicy) -> ComparePolicy {
        ComparePolicy {
            float,
            ..ComparePolicy::default()
        }
    }

    #[test]
    fn test_nan_policies() {
        let quiet = f64::NAN;
        let payload = f64::from_bits(0x7ff8_0000_0000_0001);
        let e = Float64Array::from(vec![quiet]);
        let a = Float64Array::from(vec![payload]);

        assert!(value_eq(&e, 0, &a, 0, &policy(FloatPolicy::NanInsensitive)).is_ok());
        assert!(value_eq(&e, 0, &a, 0, &policy(FloatPolicy::BitExact)).is_err());
    }

    #[test]
    fn test_negative_zero_is_not_zero_by_default() {
        let e = Float64Array::from(vec![0.0]);
        let a = Float64Array::from(vec![-0.0]);
        let res = value_eq(&e, 0, &a, 0, &ComparePolicy::default());
        assert!(matches!(res, Err(ValueDiff { kind: DivergenceKind::ValueMismatch, .. })));
    }

    #[test]
    fn test_epsilon_policy_accepts_close_values() {
        let e = Float64Array::from(vec![1.0]);
        let a = Float64Array::from(vec![1.0 + 1e-12]);
        assert!(value_eq(&e, 0, &a, 0, &policy(FloatPolicy::Epsilon { epsilon: 1e-9 })).is_ok());
        assert!(value_eq(&e, 0, &a, 0, &policy(FloatPolicy::NanInsensitive)).is_err());
    }

    #[test]
    fn test_null_mismatch_kind() {
        let e = Int32Array::from(vec![Some(1)]);
        let a = Int32Array::from(vec![None]);
        let res = value_eq(&e, 0, &a, 0, &ComparePolicy::default());
        assert!(matches!(res, Err(ValueDiff { kind: DivergenceKind::NullMismatch, .. })));
    }

    #[test]
    fn test_compare_range_reports_offset() {
        let e = Int32Array::from(vec![1, 2, 3, 4]);
        let a = Int32Array::from(vec![0, 2, 3, 5]);
        let res = compare_range(&e, 1, &a, 1, 3, &ComparePolicy::default());
        match res {
            Err((offset, diff)) => {
                assert_eq!(offset, 2);
                assert_eq!(diff.kind, DivergenceKind::ValueMismatch);
            }
            Ok(()) => panic!("expected a divergence"),
        }
    }

    #[test]
    fn test_hex_preview_truncates() {
        let preview = hex_preview(&[0xab; 40]);
        assert!(preview.starts_with("abab"));
        assert!(preview.ends_with("(40 bytes)"));
    }
}
