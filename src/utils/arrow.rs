//! Arrow utility functions for value extraction and row selection
//!
//! This module provides utility functions for working with Arrow arrays and
//! record batches, with a focus on extracting individual values in a form
//! that can be compared across differently-typed columns. Identifier values
//! in clinical schemas are stored inconsistently (Int64 in one table, Utf8 in
//! another), so all grouping and joining in the engine goes through the
//! canonical string rendering defined here.

use crate::error::{AssemblerError, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Date64Array, Float32Array, Float64Array,
    Int32Array, Int64Array, StringArray, UInt32Array, new_null_array,
};
use arrow::compute::take as arrow_take;
use arrow::compute::filter as arrow_filter;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Render a float as a canonical identifier string
///
/// Integral values lose their fractional part, so an id stored as `3004501.0`
/// compares equal to the same id stored as `3004501` or `"3004501"`.
fn render_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Render the value at `index` as a canonical string, handling nulls
///
/// # Arguments
/// * `array` - The Arrow array
/// * `index` - The index of the value to render
///
/// # Returns
/// `Some(String)` if the value exists and is not null, otherwise `None`
pub fn render_value(array: &ArrayRef, index: usize) -> Option<String> {
    if array.is_null(index) {
        return None;
    }

    match array.data_type() {
        DataType::Utf8 => {
            let string_array = array.as_any().downcast_ref::<StringArray>()?;
            Some(string_array.value(index).trim().to_string())
        }
        DataType::Int32 => {
            let int_array = array.as_any().downcast_ref::<Int32Array>()?;
            Some(int_array.value(index).to_string())
        }
        DataType::Int64 => {
            let int_array = array.as_any().downcast_ref::<Int64Array>()?;
            Some(int_array.value(index).to_string())
        }
        DataType::Float32 => {
            let float_array = array.as_any().downcast_ref::<Float32Array>()?;
            Some(render_float(f64::from(float_array.value(index))))
        }
        DataType::Float64 => {
            let float_array = array.as_any().downcast_ref::<Float64Array>()?;
            Some(render_float(float_array.value(index)))
        }
        DataType::Boolean => {
            let bool_array = array.as_any().downcast_ref::<BooleanArray>()?;
            Some(bool_array.value(index).to_string())
        }
        DataType::Date32 => {
            let date_array = array.as_any().downcast_ref::<Date32Array>()?;
            date_array.value_as_date(index).map(|d| d.to_string())
        }
        DataType::Date64 => {
            let date_array = array.as_any().downcast_ref::<Date64Array>()?;
            date_array.value_as_date(index).map(|d| d.to_string())
        }
        _ => None,
    }
}

/// Extract a date value from an Arrow array at the specified index, handling nulls
///
/// String-typed columns are parsed against each of the supplied formats in
/// order; the first one that parses wins.
///
/// # Returns
/// `Some(NaiveDate)` if the value exists, is not null, and is parseable,
/// otherwise `None`
pub fn render_date(array: &ArrayRef, index: usize, formats: &[String]) -> Option<NaiveDate> {
    if array.is_null(index) {
        return None;
    }

    match array.data_type() {
        DataType::Date32 => {
            let date_array = array.as_any().downcast_ref::<Date32Array>()?;
            date_array.value_as_date(index)
        }
        DataType::Date64 => {
            let date_array = array.as_any().downcast_ref::<Date64Array>()?;
            date_array.value_as_date(index)
        }
        DataType::Utf8 => {
            let string_array = array.as_any().downcast_ref::<StringArray>()?;
            let date_str = string_array.value(index);

            for format in formats {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, format) {
                    return Some(date);
                }
            }

            None
        }
        _ => None,
    }
}

/// Get the column index by name from a record batch
///
/// # Errors
/// Returns an error if the column does not exist
pub fn get_column_index(batch: &RecordBatch, column_name: &str) -> Result<usize> {
    batch
        .schema()
        .index_of(column_name)
        .map_err(|_| AssemblerError::not_found(column_name))
}

/// Get a column from a record batch by name
///
/// # Errors
/// Returns an error if the column does not exist
pub fn get_column(batch: &RecordBatch, column_name: &str) -> Result<ArrayRef> {
    let idx = get_column_index(batch, column_name)?;
    Ok(batch.column(idx).clone())
}

/// Filter a record batch based on a boolean mask
///
/// # Errors
/// Returns an error if the mask length does not match the batch, or if
/// filtering fails
pub fn filter_record_batch(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    if batch.num_rows() != mask.len() {
        return Err(AssemblerError::store(format!(
            "Mask length ({}) doesn't match batch row count ({})",
            mask.len(),
            batch.num_rows()
        )));
    }

    let filtered_columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|col| arrow_filter(col, mask))
        .collect::<arrow::error::Result<_>>()?;

    Ok(RecordBatch::try_new(batch.schema(), filtered_columns)?)
}

/// Select rows of an array by optional index, producing nulls for `None`
///
/// The output has one entry per element of `indices`, preserving the input
/// array's data type. This is the building block for both the long-to-wide
/// pivot and the left merge: missing contributions become explicit nulls.
///
/// # Errors
/// Returns an error if an index is out of bounds
pub fn take_optional(array: &ArrayRef, indices: &[Option<usize>]) -> Result<ArrayRef> {
    if array.is_empty() || indices.iter().all(Option::is_none) {
        return Ok(new_null_array(array.data_type(), indices.len()));
    }
    let index_array = UInt32Array::from(
        indices
            .iter()
            .map(|idx| idx.map(|i| i as u32))
            .collect::<Vec<_>>(),
    );
    Ok(arrow_take(array, &index_array, None)?)
}

/// Reorder the rows of a record batch by a permutation of row indices
///
/// # Errors
/// Returns an error if an index is out of bounds
pub fn take_record_batch(batch: &RecordBatch, indices: &[usize]) -> Result<RecordBatch> {
    let index_array = UInt32Array::from(indices.iter().map(|i| *i as u32).collect::<Vec<_>>());
    let columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|col| arrow_take(col, &index_array, None))
        .collect::<arrow::error::Result<_>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

/// Count the distinct non-null values of a column, by canonical rendering
#[must_use]
pub fn distinct_count(array: &ArrayRef) -> usize {
    let mut seen = FxHashSet::default();
    for i in 0..array.len() {
        if let Some(value) = render_value(array, i) {
            seen.insert(value);
        }
    }
    seen.len()
}

/// Distinct non-null values of a column in first-appearance order
#[must_use]
pub fn distinct_values(array: &ArrayRef) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut values = Vec::new();
    for i in 0..array.len() {
        if let Some(value) = render_value(array, i) {
            if seen.insert(value.clone()) {
                values.push(value);
            }
        }
    }
    values
}

/// Whether a column contains no non-null values
#[must_use]
pub fn is_all_null(array: &ArrayRef) -> bool {
    array.null_count() == array.len()
}

/// Build a nullable Utf8 array from owned optional strings
#[must_use]
pub fn string_array(values: Vec<Option<String>>) -> ArrayRef {
    Arc::new(StringArray::from(values))
}

/// Build a record batch from named columns
///
/// # Errors
/// Returns an error if the columns have inconsistent lengths
pub fn batch_from_columns(columns: Vec<(String, ArrayRef)>) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(name.clone(), array.data_type().clone(), true))
        .collect();
    let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, array)| array).collect();
    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(fields)),
        arrays,
    )?)
}

/// Replace one column of a batch, keeping all others in place
///
/// # Errors
/// Returns an error if the column does not exist or lengths mismatch
pub fn replace_column(batch: &RecordBatch, column_name: &str, array: ArrayRef) -> Result<RecordBatch> {
    let idx = get_column_index(batch, column_name)?;
    let mut columns: Vec<(String, ArrayRef)> = Vec::with_capacity(batch.num_columns());
    for (i, field) in batch.schema().fields().iter().enumerate() {
        if i == idx {
            columns.push((field.name().clone(), array.clone()));
        } else {
            columns.push((field.name().clone(), batch.column(i).clone()));
        }
    }
    batch_from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};

    #[test]
    fn render_value_is_canonical_across_types() {
        let as_int: ArrayRef = Arc::new(Int64Array::from(vec![Some(3004501), None]));
        let as_float: ArrayRef = Arc::new(Float64Array::from(vec![Some(3004501.0), None]));
        let as_text: ArrayRef = Arc::new(StringArray::from(vec![Some(" 3004501 "), None]));

        assert_eq!(render_value(&as_int, 0).as_deref(), Some("3004501"));
        assert_eq!(render_value(&as_float, 0).as_deref(), Some("3004501"));
        assert_eq!(render_value(&as_text, 0).as_deref(), Some("3004501"));
        assert_eq!(render_value(&as_int, 1), None);
        assert_eq!(render_value(&as_float, 1), None);
        assert_eq!(render_value(&as_text, 1), None);
    }

    #[test]
    fn take_optional_produces_nulls_for_missing_rows() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![10, 20, 30]));
        let taken = take_optional(&array, &[Some(2), None, Some(0)]).unwrap();
        assert_eq!(render_value(&taken, 0).as_deref(), Some("30"));
        assert_eq!(render_value(&taken, 1), None);
        assert_eq!(render_value(&taken, 2).as_deref(), Some("10"));
    }

    #[test]
    fn distinct_counts_ignore_nulls() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), Some(1), None, Some(2)]));
        assert_eq!(distinct_count(&array), 2);
        assert_eq!(distinct_values(&array), vec!["1", "2"]);
    }
}
