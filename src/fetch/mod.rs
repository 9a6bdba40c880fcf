//! Table fetching with query-level filtering and disclosure control
//!
//! A fetch resolves the table case-insensitively, projects away raw
//! source-system columns, pushes concept and person filters into the query
//! where the filtered column exists, and enforces the minimum-subset-size
//! policy on the result before anything is handed back to the caller.

use crate::config::AssemblyConfig;
use crate::error::{AssemblerError, Result};
use crate::schema::SchemaSnapshot;
use crate::store::{Connection, DisclosurePolicy, SelectBuilder};
use crate::utils::{distinct_count, filter_record_batch, get_column, is_all_null, render_value};
use arrow::array::BooleanArray;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Row and column filters applied to a single table fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Restrict the projection to these columns (structural columns are
    /// retained regardless)
    pub columns: Option<Vec<String>>,
    /// Keep only rows whose designated concept id is in this set
    /// (ignored when the table has no concept column)
    pub concepts: Option<Vec<String>>,
    /// Keep only rows whose entity id is in this set (ignored when the
    /// table has no entity id column)
    pub persons: Option<Vec<String>>,
    /// Column that later merges this table into the accumulator; always
    /// retained in the projection
    pub merge_column: Option<String>,
    /// Drop columns with no non-null values from the result
    pub drop_empty_columns: bool,
}

/// Fetch one table with filtering and privacy enforcement
///
/// # Errors
/// Returns `NotFound` for an unknown table and `PrivacyViolation` when the
/// filtered result falls below the disclosure threshold. Filters naming a
/// column the table does not have are silently ignored.
pub fn fetch_table(
    conn: &dyn Connection,
    snapshot: &SchemaSnapshot,
    config: &AssemblyConfig,
    policy: &dyn DisclosurePolicy,
    table: &str,
    opts: &FetchOptions,
) -> Result<RecordBatch> {
    let descriptor = snapshot.descriptor(config, table)?;
    let entity_column = config.entity_id_column();

    // Structural columns survive any column filter: without them the row
    // could no longer be attributed, merged, or translated.
    let mut structural: FxHashSet<&str> = FxHashSet::default();
    if descriptor.has_column(&entity_column) {
        structural.insert(entity_column.as_str());
    }
    if let Some(merge) = &opts.merge_column {
        if descriptor.has_column(merge) {
            structural.insert(merge.as_str());
        }
    }
    if let Some(concept) = &descriptor.concept_column {
        structural.insert(concept.as_str());
    }

    let requested: Option<FxHashSet<String>> = opts.columns.as_ref().map(|cols| {
        cols.iter()
            .filter_map(|c| match snapshot.resolve_column(&descriptor.name, c) {
                Ok(resolved) => Some(resolved),
                Err(_) => {
                    warn!(
                        "Ignoring unknown column '{c}' in filter for table '{}'",
                        descriptor.name
                    );
                    None
                }
            })
            .collect()
    });

    let projection: Vec<String> = descriptor
        .columns
        .iter()
        .filter(|column| {
            if structural.contains(column.as_str()) {
                return true;
            }
            if config.is_excluded_column(column) {
                return false;
            }
            match &requested {
                Some(wanted) => wanted.contains(column.as_str()),
                None => true,
            }
        })
        .cloned()
        .collect();

    // Never widen an empty projection back to `SELECT *`: a table whose
    // every column carries a source marker stays unexposed.
    if projection.is_empty() {
        warn!(
            "No exposable columns in table '{}', returning an empty result",
            descriptor.name
        );
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let mut select = SelectBuilder::new(conn.dialect(), descriptor.name.as_str()).columns(projection);
    if let Some(concepts) = &opts.concepts {
        match &descriptor.concept_column {
            Some(concept_column) => {
                select = select.where_in(concept_column.as_str(), concepts);
            }
            None => debug!(
                "Table '{}' has no concept column, ignoring concept filter",
                descriptor.name
            ),
        }
    }
    if let Some(persons) = &opts.persons {
        if descriptor.has_column(&entity_column) {
            select = select.where_in(entity_column.as_str(), persons);
        } else {
            debug!(
                "Table '{}' has no '{entity_column}' column, ignoring person filter",
                descriptor.name
            );
        }
    }

    let batch = conn.query(&select.to_sql())?;
    let batch = enforce_policy(config, policy, &descriptor.name, &batch)?;

    if opts.drop_empty_columns {
        return drop_empty_columns(&batch, &structural);
    }
    Ok(batch)
}

/// Enforce the minimum-subset-size policy on a fetched batch
///
/// Tables without an entity id column are exempt (nothing identifying to
/// protect). With a concept column, each concept value must cover enough
/// distinct entities on its own; failing values are dropped with a warning
/// and only an emptied result is fatal. Without one, the table as a whole
/// must cover the threshold.
fn enforce_policy(
    config: &AssemblyConfig,
    policy: &dyn DisclosurePolicy,
    table: &str,
    batch: &RecordBatch,
) -> Result<RecordBatch> {
    let entity_column = config.entity_id_column();
    if batch.schema().index_of(&entity_column).is_err() {
        return Ok(batch.clone());
    }
    let threshold = policy.minimum_subset_size()?;
    if threshold == 0 {
        return Ok(batch.clone());
    }

    let entities = get_column(batch, &entity_column)?;
    let concept_column = config.designated_concept_column(table);

    if let Ok(concepts) = get_column(batch, &concept_column) {
        // Distinct entities per concept value; null concepts form their
        // own group and are held to the same bar.
        let mut groups: FxHashMap<Option<String>, FxHashSet<String>> = FxHashMap::default();
        for i in 0..batch.num_rows() {
            if let Some(entity) = render_value(&entities, i) {
                groups
                    .entry(render_value(&concepts, i))
                    .or_default()
                    .insert(entity);
            }
        }

        let failing: FxHashSet<Option<String>> = groups
            .iter()
            .filter(|(_, entities)| entities.len() < threshold)
            .map(|(concept, _)| concept.clone())
            .collect();
        if failing.is_empty() {
            return Ok(batch.clone());
        }
        for concept in &failing {
            warn!(
                "Dropping concept {} of table '{table}': below the minimum subset size of {threshold}",
                concept.as_deref().unwrap_or("<null>")
            );
        }

        let mask: BooleanArray = (0..batch.num_rows())
            .map(|i| {
                Some(
                    render_value(&entities, i).is_some()
                        && !failing.contains(&render_value(&concepts, i)),
                )
            })
            .collect();
        let filtered = filter_record_batch(batch, &mask)?;
        if filtered.num_rows() == 0 {
            return Err(AssemblerError::PrivacyViolation { threshold });
        }
        return Ok(filtered);
    }

    if distinct_count(&entities) < threshold {
        return Err(AssemblerError::PrivacyViolation { threshold });
    }
    Ok(batch.clone())
}

/// Drop all-null columns, keeping whatever is structurally required
fn drop_empty_columns(batch: &RecordBatch, structural: &FxHashSet<&str>) -> Result<RecordBatch> {
    let keep: Vec<usize> = (0..batch.num_columns())
        .filter(|&i| {
            let name = batch.schema().field(i).name().clone();
            structural.contains(name.as_str()) || !is_all_null(batch.column(i))
        })
        .collect();
    if keep.len() == batch.num_columns() {
        return Ok(batch.clone());
    }
    Ok(batch.project(&keep)?)
}
