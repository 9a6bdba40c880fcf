//! Shared fixtures: a small synthetic OMOP CDM instance in a memory store
#![allow(dead_code)]

use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use cdm_assembler::MemoryConnection;
use cdm_assembler::utils::{batch_from_columns, get_column, render_value};
use chrono::NaiveDate;
use std::sync::Arc;

pub fn int_col(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(Int64Array::from(values))
}

pub fn float_col(values: Vec<Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

pub fn str_col(values: Vec<Option<&str>>) -> ArrayRef {
    Arc::new(StringArray::from(values))
}

pub fn date_col(values: Vec<Option<&str>>) -> ArrayRef {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    Arc::new(Date32Array::from(
        values
            .into_iter()
            .map(|v| {
                v.map(|s| {
                    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
                    (date - epoch).num_days() as i32
                })
            })
            .collect::<Vec<_>>(),
    ))
}

pub fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    batch_from_columns(
        columns
            .into_iter()
            .map(|(name, array)| (name.to_string(), array))
            .collect(),
    )
    .unwrap()
}

/// Rendered values of a named column, null-aware
pub fn column(batch: &RecordBatch, name: &str) -> Vec<Option<String>> {
    let array = get_column(batch, name).unwrap();
    (0..array.len()).map(|i| render_value(&array, i)).collect()
}

pub fn column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}

/// Person, measurement, gender lookup and concept vocabulary
pub fn cdm_connection() -> MemoryConnection {
    let conn = MemoryConnection::new();

    conn.add_table(
        "person",
        batch(vec![
            ("person_id", int_col(vec![Some(1), Some(2), Some(3)])),
            (
                "gender_concept_id",
                int_col(vec![Some(8532), Some(8507), Some(8532)]),
            ),
            ("gender_id", int_col(vec![Some(21), Some(22), Some(21)])),
            (
                "year_of_birth",
                int_col(vec![Some(1961), Some(1979), Some(2001)]),
            ),
            (
                "person_source_value",
                str_col(vec![Some("p-01"), Some("p-02"), Some("p-03")]),
            ),
        ]),
    );

    // Person 1 has two glucose measurements on different dates, seeded out
    // of chronological order on purpose.
    conn.add_table(
        "measurement",
        batch(vec![
            (
                "measurement_id",
                int_col(vec![Some(11), Some(10), Some(12), Some(13)]),
            ),
            ("person_id", int_col(vec![Some(1), Some(1), Some(2), Some(3)])),
            (
                "measurement_concept_id",
                int_col(vec![Some(3004501), Some(3004501), Some(3004501), Some(3025315)]),
            ),
            (
                "measurement_date",
                date_col(vec![
                    Some("2021-09-01"),
                    Some("2021-03-01"),
                    Some("2021-03-04"),
                    Some("2021-05-12"),
                ]),
            ),
            (
                "value_as_number",
                float_col(vec![Some(6.1), Some(5.4), Some(5.0), Some(82.0)]),
            ),
        ]),
    );

    conn.add_table(
        "gender",
        batch(vec![
            ("gender_id", int_col(vec![Some(21), Some(22)])),
            ("gender_name", str_col(vec![Some("female"), Some("male")])),
        ]),
    );

    conn.add_table(
        "concept",
        batch(vec![
            (
                "concept_id",
                int_col(vec![Some(3004501), Some(3025315), Some(8507), Some(8532)]),
            ),
            (
                "concept_name",
                str_col(vec![
                    Some("Glucose"),
                    Some("Body weight"),
                    Some("MALE"),
                    Some("FEMALE"),
                ]),
            ),
        ]),
    );

    conn
}
