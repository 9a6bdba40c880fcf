//! Longitudinal sequencing and long-to-wide reshaping
//!
//! A long table holds one row per event; the wide table holds one row per
//! entity with concept-qualified columns. Two things make this more than a
//! plain pivot: repeated measurements of the same concept for the same
//! entity must be disambiguated first (otherwise the pivot silently
//! collapses rows), and the resulting composite column names must carry the
//! concept token first so downstream consumers read "what" before "which
//! field of it".

use crate::error::{AssemblerError, Result};
use crate::utils::{
    batch_from_columns, get_column, render_date, render_value, replace_column, string_array,
    take_optional, take_record_batch,
};
use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use itertools::Itertools;
use rustc_hash::FxHashMap;

fn rendered(array: &ArrayRef) -> Vec<Option<String>> {
    (0..array.len()).map(|i| render_value(array, i)).collect()
}

/// Stable chronological sort by a date column, nulls last
///
/// String-typed date columns are parsed with the supplied formats.
pub fn sort_by_date(
    batch: &RecordBatch,
    date_column: &str,
    formats: &[String],
) -> Result<RecordBatch> {
    let array = get_column(batch, date_column)?;
    let dates: Vec<Option<NaiveDate>> = (0..array.len())
        .map(|i| render_date(&array, i, formats))
        .collect();

    let mut indices: Vec<usize> = (0..batch.num_rows()).collect();
    indices.sort_by_key(|&i| match dates[i] {
        Some(date) => (0, date),
        None => (1, NaiveDate::MAX),
    });
    take_record_batch(batch, &indices)
}

/// Disambiguate repeated (key, concept) observations
///
/// Every member of a duplicate group gets a 1-based `.<index>` appended to
/// its concept label, in original row order; the first occurrence is
/// indexed too, so an indexed label always means "this concept repeats".
/// Unique observations keep their label untouched. The concept column
/// comes out as Utf8 regardless of its input type.
pub fn sequence_duplicates(
    batch: &RecordBatch,
    concept_column: &str,
    key_column: &str,
) -> Result<RecordBatch> {
    if batch.schema().index_of(key_column).is_err() {
        return Err(AssemblerError::MissingDependency {
            column: key_column.to_string(),
        });
    }
    let concepts = rendered(&get_column(batch, concept_column)?);
    let keys = rendered(&get_column(batch, key_column)?);

    let mut group_sizes: FxHashMap<(String, String), usize> = FxHashMap::default();
    for (key, concept) in keys.iter().zip(&concepts) {
        if let (Some(key), Some(concept)) = (key, concept) {
            *group_sizes
                .entry((key.clone(), concept.clone()))
                .or_insert(0) += 1;
        }
    }

    let mut occurrence: FxHashMap<(String, String), usize> = FxHashMap::default();
    let labels: Vec<Option<String>> = keys
        .iter()
        .zip(&concepts)
        .map(|(key, concept)| match (key, concept) {
            (Some(key), Some(concept)) => {
                let group = (key.clone(), concept.clone());
                if group_sizes[&group] > 1 {
                    let n = occurrence.entry(group).or_insert(0);
                    *n += 1;
                    Some(format!("{concept}.{n}"))
                } else {
                    Some(concept.clone())
                }
            }
            (_, concept) => concept.clone(),
        })
        .collect();

    replace_column(batch, concept_column, string_array(labels))
}

/// Rename a pivoted composite column so the concept token comes first
///
/// `value_as_number.glucose.2` becomes `glucose.2.value_as_number`: the
/// original field is a single undotted token, everything after it is the
/// (possibly sequenced) concept label.
#[must_use]
pub fn relabel_concept_first(name: &str) -> String {
    match name.split_once('.') {
        Some((field, concept)) => format!("{concept}.{field}"),
        None => name.to_string(),
    }
}

/// Pivot a long table to one row per distinct key value
///
/// For every column `v` other than the key and concept columns, and every
/// distinct concept `c`, the output carries a column `c.v` holding `v`'s
/// value from the row where the key met concept `c` (null when the entity
/// never met it). Column types are preserved. Rows with a null key or null
/// concept cannot be addressed by any output cell and are skipped. When a
/// (key, concept) pair occurs more than once (unsequenced input), the first
/// row wins.
///
/// # Errors
/// Returns `MissingDependency` if the key column is absent.
pub fn pivot_wide(
    batch: &RecordBatch,
    concept_column: &str,
    key_column: &str,
) -> Result<RecordBatch> {
    if batch.schema().index_of(key_column).is_err() {
        return Err(AssemblerError::MissingDependency {
            column: key_column.to_string(),
        });
    }
    let keys = rendered(&get_column(batch, key_column)?);
    let concepts = rendered(&get_column(batch, concept_column)?);

    // Distinct keys and concepts in first-appearance order
    let distinct_keys: Vec<String> = keys.iter().flatten().cloned().unique().collect();
    let distinct_concepts: Vec<String> = concepts.iter().flatten().cloned().unique().collect();

    let mut first_key_row: FxHashMap<&str, usize> = FxHashMap::default();
    let mut cell_row: FxHashMap<(&str, &str), usize> = FxHashMap::default();
    for i in 0..batch.num_rows() {
        let (Some(key), concept) = (&keys[i], &concepts[i]) else {
            continue;
        };
        first_key_row.entry(key.as_str()).or_insert(i);
        if let Some(concept) = concept {
            cell_row.entry((key.as_str(), concept.as_str())).or_insert(i);
        }
    }

    let key_indices: Vec<Option<usize>> = distinct_keys
        .iter()
        .map(|k| first_key_row.get(k.as_str()).copied())
        .collect();

    let mut columns: Vec<(String, ArrayRef)> = Vec::new();
    let key_array = get_column(batch, key_column)?;
    columns.push((key_column.to_string(), take_optional(&key_array, &key_indices)?));

    for field in batch.schema().fields() {
        let name = field.name();
        if name == key_column || name == concept_column {
            continue;
        }
        let source = get_column(batch, name)?;
        for concept in &distinct_concepts {
            let indices: Vec<Option<usize>> = distinct_keys
                .iter()
                .map(|k| cell_row.get(&(k.as_str(), concept.as_str())).copied())
                .collect();
            columns.push((
                relabel_concept_first(&format!("{name}.{concept}")),
                take_optional(&source, &indices)?,
            ));
        }
    }

    batch_from_columns(columns)
}

/// Expand date-stamped longitudinal data to the full observation grid
///
/// The output carries one row for every (entity, date, concept)
/// combination, where the dates and concepts are those observed anywhere in
/// the table. Rows the data never observed keep their key, date and concept
/// cells populated and every other cell null, so after sequencing the k-th
/// occurrence of a concept refers to the same date for every entity.
pub fn complete_time_points(
    batch: &RecordBatch,
    key_column: &str,
    concept_column: &str,
    date_column: &str,
    formats: &[String],
) -> Result<RecordBatch> {
    if batch.schema().index_of(key_column).is_err() {
        return Err(AssemblerError::MissingDependency {
            column: key_column.to_string(),
        });
    }
    let keys = rendered(&get_column(batch, key_column)?);
    let concepts = rendered(&get_column(batch, concept_column)?);
    let date_array = get_column(batch, date_column)?;
    let dates: Vec<Option<NaiveDate>> = (0..batch.num_rows())
        .map(|i| render_date(&date_array, i, formats))
        .collect();

    let distinct_keys: Vec<String> = keys.iter().flatten().cloned().unique().collect();
    let distinct_concepts: Vec<String> = concepts.iter().flatten().cloned().unique().collect();
    let distinct_dates: Vec<NaiveDate> = dates.iter().flatten().copied().unique().sorted().collect();

    // Representative source rows for grid cells that were never observed
    let mut key_row: FxHashMap<&str, usize> = FxHashMap::default();
    let mut concept_row: FxHashMap<&str, usize> = FxHashMap::default();
    let mut date_row: FxHashMap<NaiveDate, usize> = FxHashMap::default();
    let mut full_row: FxHashMap<(&str, NaiveDate, &str), usize> = FxHashMap::default();
    for i in 0..batch.num_rows() {
        if let Some(key) = &keys[i] {
            key_row.entry(key.as_str()).or_insert(i);
        }
        if let Some(concept) = &concepts[i] {
            concept_row.entry(concept.as_str()).or_insert(i);
        }
        if let Some(date) = dates[i] {
            date_row.entry(date).or_insert(i);
        }
        if let (Some(key), Some(date), Some(concept)) = (&keys[i], dates[i], &concepts[i]) {
            full_row
                .entry((key.as_str(), date, concept.as_str()))
                .or_insert(i);
        }
    }

    // Per-column take indices over the expanded grid
    let mut observed: Vec<Option<usize>> = Vec::new();
    let mut key_indices: Vec<Option<usize>> = Vec::new();
    let mut date_indices: Vec<Option<usize>> = Vec::new();
    let mut concept_indices: Vec<Option<usize>> = Vec::new();
    for key in &distinct_keys {
        for date in &distinct_dates {
            for concept in &distinct_concepts {
                let hit = full_row
                    .get(&(key.as_str(), *date, concept.as_str()))
                    .copied();
                observed.push(hit);
                key_indices.push(hit.or_else(|| key_row.get(key.as_str()).copied()));
                date_indices.push(hit.or_else(|| date_row.get(date).copied()));
                concept_indices.push(hit.or_else(|| concept_row.get(concept.as_str()).copied()));
            }
        }
    }

    let mut columns: Vec<(String, ArrayRef)> = Vec::new();
    for field in batch.schema().fields() {
        let name = field.name();
        let source = get_column(batch, name)?;
        let indices = if name == key_column {
            &key_indices
        } else if name == date_column {
            &date_indices
        } else if name == concept_column {
            &concept_indices
        } else {
            &observed
        };
        columns.push((name.clone(), take_optional(&source, indices)?));
    }

    batch_from_columns(columns)
}
