use anyhow::Result;
use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use cdm_assembler::utils::batch_from_columns;
use cdm_assembler::{Assembler, AssemblyConfig, FixedPolicy, MemoryConnection};
use chrono::NaiveDate;
use log::info;
use std::sync::Arc;
use std::time::Instant;

fn days(date: NaiveDate) -> i32 {
    (date - NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()).num_days() as i32
}

/// Populate the store with a small synthetic OMOP CDM instance
fn seed(conn: &MemoryConnection) -> Result<()> {
    let person = batch_from_columns(vec![
        (
            "person_id".to_string(),
            Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
        ),
        (
            "gender_concept_id".to_string(),
            Arc::new(Int64Array::from(vec![8532, 8507, 8532])) as ArrayRef,
        ),
        (
            "year_of_birth".to_string(),
            Arc::new(Int64Array::from(vec![1961, 1979, 2001])) as ArrayRef,
        ),
        (
            "person_source_value".to_string(),
            Arc::new(StringArray::from(vec!["p-01", "p-02", "p-03"])) as ArrayRef,
        ),
    ])?;

    let measurement = batch_from_columns(vec![
        (
            "measurement_id".to_string(),
            Arc::new(Int64Array::from(vec![10, 11, 12, 13, 14, 15])) as ArrayRef,
        ),
        (
            "person_id".to_string(),
            Arc::new(Int64Array::from(vec![1, 1, 2, 2, 3, 3])) as ArrayRef,
        ),
        (
            "measurement_concept_id".to_string(),
            Arc::new(Int64Array::from(vec![
                3004501, 3004501, 3004501, 3025315, 3004501, 3025315,
            ])) as ArrayRef,
        ),
        (
            "measurement_date".to_string(),
            Arc::new(Date32Array::from(vec![
                days(NaiveDate::from_ymd_opt(2021, 3, 1).unwrap()),
                days(NaiveDate::from_ymd_opt(2021, 9, 1).unwrap()),
                days(NaiveDate::from_ymd_opt(2021, 3, 4).unwrap()),
                days(NaiveDate::from_ymd_opt(2021, 3, 4).unwrap()),
                days(NaiveDate::from_ymd_opt(2021, 5, 12).unwrap()),
                days(NaiveDate::from_ymd_opt(2021, 5, 12).unwrap()),
            ])) as ArrayRef,
        ),
        (
            "value_as_number".to_string(),
            Arc::new(Float64Array::from(vec![5.4, 6.1, 5.0, 82.0, 4.7, 67.5])) as ArrayRef,
        ),
    ])?;

    let concept = batch_from_columns(vec![
        (
            "concept_id".to_string(),
            Arc::new(Int64Array::from(vec![3004501, 3025315, 8507, 8532])) as ArrayRef,
        ),
        (
            "concept_name".to_string(),
            Arc::new(StringArray::from(vec![
                "Glucose [Mass/volume] in Serum",
                "Body weight",
                "MALE",
                "FEMALE",
            ])) as ArrayRef,
        ),
    ])?;

    conn.add_table("person", person);
    conn.add_table("measurement", measurement);
    conn.add_table("concept", concept);
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let conn = MemoryConnection::new();
    seed(&conn)?;

    let config = AssemblyConfig::default();
    info!(
        "Assembly configuration: {}",
        serde_json::to_string_pretty(&config)?
    );

    let policy = FixedPolicy(1);
    let assembler = Assembler::with_config(&conn, &policy, config)?;

    info!("Tables: {:?}", assembler.list_tables());
    for table in assembler.list_tables() {
        info!("  {table}: {:?}", assembler.list_columns(&table)?);
    }

    let start = Instant::now();
    let wide = assembler.create_full_assembly()?;
    info!(
        "Assembled {} rows x {} columns in {:?}",
        wide.num_rows(),
        wide.num_columns(),
        start.elapsed()
    );
    for field in wide.schema().fields() {
        info!("  column: {}", field.name());
    }

    Ok(())
}
