//! Concept translation against the vocabulary table
//!
//! Coded values (`*_concept_id`) are opaque to an analyst; the vocabulary
//! table maps them to human-readable names. Translation is fallback-safe in
//! both directions: a missing or unreachable vocabulary skips the step with
//! a warning and leaves the coded values untouched, and an individual code
//! without a vocabulary entry becomes the deterministic
//! `concept_id_<value>` label so unmapped data stays traceable instead of
//! silently disappearing.

use crate::config::AssemblyConfig;
use crate::error::{AssemblerError, Result};
use crate::store::{Connection, SchemaGuard, SelectBuilder};
use crate::utils::{distinct_values, get_column, render_value, replace_column, string_array};
use arrow::record_batch::RecordBatch;
use log::{debug, warn};
use rustc_hash::FxHashMap;

/// Normalize a concept name into a column-name-safe fragment
///
/// Lowercases, maps every non-alphanumeric run to a single underscore, and
/// trims leading/trailing underscores: `"Body Weight (kg)"` becomes
/// `"body_weight_kg"`.
#[must_use]
pub fn normalize_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_underscore = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_underscore && !out.is_empty() {
                out.push('_');
            }
            pending_underscore = false;
            out.extend(c.to_lowercase());
        } else {
            pending_underscore = true;
        }
    }
    out
}

/// Dictionary from canonical concept id to raw vocabulary name
///
/// Built per request, scoped to the ids actually present in the data being
/// translated; never assumed complete.
pub type ConceptDictionary = FxHashMap<String, String>;

fn resolve_case_insensitive(candidates: &[String], wanted: &str) -> Result<String> {
    if let Some(exact) = candidates.iter().find(|c| c.as_str() == wanted) {
        return Ok(exact.clone());
    }
    let lowered = wanted.to_lowercase();
    candidates
        .iter()
        .find(|c| c.to_lowercase() == lowered)
        .cloned()
        .ok_or_else(|| AssemblerError::not_found(wanted))
}

fn query_dictionary(
    conn: &dyn Connection,
    config: &AssemblyConfig,
    ids: &[String],
) -> Result<ConceptDictionary> {
    // The vocabulary may live in a schema the snapshot was not taken from,
    // so its table and columns are resolved against the live catalog of
    // whatever schema is active right now.
    let tables = conn.list_tables()?;
    let table = resolve_case_insensitive(&tables, &config.vocabulary_table)?;
    let columns = conn.list_columns(&table)?;
    let id_column = resolve_case_insensitive(&columns, &config.vocabulary_id_column)?;
    let name_column = resolve_case_insensitive(&columns, &config.vocabulary_name_column)?;

    let sql = SelectBuilder::new(conn.dialect(), table.as_str())
        .columns(vec![id_column.clone(), name_column.clone()])
        .where_in(id_column.as_str(), ids)
        .to_sql();
    let batch = conn.query(&sql)?;

    let id_array = get_column(&batch, &id_column)?;
    let name_array = get_column(&batch, &name_column)?;
    let mut dictionary = ConceptDictionary::default();
    for i in 0..batch.num_rows() {
        if let (Some(id), Some(name)) = (
            render_value(&id_array, i),
            render_value(&name_array, i),
        ) {
            dictionary.entry(id).or_insert(name);
        }
    }
    Ok(dictionary)
}

/// Build the concept dictionary for a set of canonical ids
///
/// Switches to the vocabulary schema for the duration of the lookup when
/// one is configured; the previous schema is restored even if the lookup
/// fails.
pub fn build_dictionary(
    conn: &dyn Connection,
    config: &AssemblyConfig,
    ids: &[String],
) -> Result<ConceptDictionary> {
    if ids.is_empty() {
        return Ok(ConceptDictionary::default());
    }
    match &config.vocabulary_schema {
        Some(schema) => {
            let _guard = SchemaGuard::switch(conn, schema)?;
            query_dictionary(conn, config, ids)
        }
        None => query_dictionary(conn, config, ids),
    }
}

/// Translate the designated concept columns of a table in place
///
/// Each listed column (skipped silently when absent from the batch) is
/// replaced by a Utf8 column: nulls stay null, mapped ids become their
/// normalized vocabulary name, unmapped ids become `concept_id_<value>`.
/// When the vocabulary table is absent or the lookup fails, the batch is
/// returned unchanged and a warning is emitted; assembly continues with
/// raw coded values.
pub fn translate_concepts(
    conn: &dyn Connection,
    config: &AssemblyConfig,
    batch: &RecordBatch,
    columns: &[String],
) -> Result<RecordBatch> {
    let present: Vec<String> = columns
        .iter()
        .filter(|c| batch.schema().index_of(c).is_ok())
        .cloned()
        .collect();
    if present.is_empty() {
        return Ok(batch.clone());
    }

    // One lookup per request, over the union of ids across all columns
    let mut ids: Vec<String> = Vec::new();
    for column in &present {
        let array = get_column(batch, column)?;
        for value in distinct_values(&array) {
            if !ids.contains(&value) {
                ids.push(value);
            }
        }
    }
    if ids.is_empty() {
        return Ok(batch.clone());
    }

    let dictionary = match build_dictionary(conn, config, &ids) {
        Ok(dictionary) => dictionary,
        Err(e) => {
            warn!(
                "Vocabulary table '{}' unavailable, passing coded values through: {e}",
                config.vocabulary_table
            );
            return Ok(batch.clone());
        }
    };
    debug!(
        "Translated {} of {} distinct concept ids",
        dictionary.len(),
        ids.len()
    );

    let mut result = batch.clone();
    for column in &present {
        let array = get_column(&result, column)?;
        let labels: Vec<Option<String>> = (0..array.len())
            .map(|i| {
                render_value(&array, i).map(|id| match dictionary.get(&id) {
                    Some(name) => normalize_label(name),
                    None => format!("concept_id_{id}"),
                })
            })
            .collect();
        result = replace_column(&result, column, string_array(labels))?;
    }
    Ok(result)
}
