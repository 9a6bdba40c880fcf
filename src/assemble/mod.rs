//! Assembly orchestration: from a relational schema to one wide table
//!
//! The orchestrator derives the schema snapshot and relation graph once per
//! request, fetches every table transitively related to the root entity in
//! traversal order, runs each through translation, sequencing and
//! reshaping, and left-merges the results into the root table. Any
//! per-table failure aborts the whole assembly; a partial wide table is
//! never returned.

use crate::config::AssemblyConfig;
use crate::error::{AssemblerError, Result};
use crate::fetch::{FetchOptions, fetch_table};
use crate::graph::RelationGraph;
use crate::reshape::{complete_time_points, pivot_wide, sequence_duplicates, sort_by_date};
use crate::schema::classify::classify;
use crate::schema::{SchemaSnapshot, TableDescriptor};
use crate::store::{Connection, DisclosurePolicy};
use crate::translate::{build_dictionary, translate_concepts};
use crate::utils::{
    batch_from_columns, distinct_values, get_column, is_all_null, render_value, string_array,
    take_optional,
};
use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};

/// Options for a single-table request
#[derive(Debug, Clone, Default)]
pub struct GetTableOptions {
    /// Keep only rows with these concept ids (canonical string form)
    pub concepts: Option<Vec<String>>,
    /// Restrict the projection to these columns
    pub columns: Option<Vec<String>>,
    /// Keep only rows for these entity ids
    pub persons: Option<Vec<String>>,
    /// Merge/pivot key; defaults to the root entity id column
    pub merge_column: Option<String>,
    /// Drop all-null columns from the result
    pub drop_empty_columns: bool,
    /// Reshape longitudinal tables to wide format instead of returning
    /// them one-row-per-event
    pub wide_longitudinal: bool,
    /// Expand date-stamped data to the full (entity, date) grid before
    /// reshaping, so occurrence indices align across entities
    pub complete_time_points: bool,
}

/// Schema-traversal and wide-table assembly engine over one connection
///
/// Holds the per-request schema snapshot and relation graph; nothing is
/// cached across instances.
pub struct Assembler<'a> {
    conn: &'a dyn Connection,
    policy: &'a dyn DisclosurePolicy,
    config: AssemblyConfig,
    snapshot: SchemaSnapshot,
    graph: RelationGraph,
}

impl<'a> Assembler<'a> {
    /// Create an assembler with the default OMOP CDM conventions
    pub fn new(conn: &'a dyn Connection, policy: &'a dyn DisclosurePolicy) -> Result<Self> {
        Self::with_config(conn, policy, AssemblyConfig::default())
    }

    /// Create an assembler with explicit conventions
    ///
    /// Loads the schema snapshot and derives the relation graph up front;
    /// the catalog is not consulted again during traversal.
    pub fn with_config(
        conn: &'a dyn Connection,
        policy: &'a dyn DisclosurePolicy,
        config: AssemblyConfig,
    ) -> Result<Self> {
        let snapshot = SchemaSnapshot::load(conn)?;
        let categories = classify(&snapshot, &config.id_suffix);
        let graph = RelationGraph::from_categories(&categories, &config.id_suffix);
        Ok(Self {
            conn,
            policy,
            config,
            snapshot,
            graph,
        })
    }

    /// The schema snapshot this assembler was built from
    #[must_use]
    pub fn snapshot(&self) -> &SchemaSnapshot {
        &self.snapshot
    }

    /// The derived relation graph
    #[must_use]
    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    /// Tables available in the schema
    #[must_use]
    pub fn list_tables(&self) -> Vec<String> {
        self.snapshot.table_names().map(String::from).collect()
    }

    /// Visible columns of a table (raw source-system columns excluded)
    pub fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let descriptor = self.snapshot.descriptor(&self.config, table)?;
        Ok(descriptor
            .columns
            .iter()
            .filter(|c| !self.config.is_excluded_column(c))
            .cloned()
            .collect())
    }

    /// Catalog of concepts present in a table's designated concept column
    ///
    /// Returns a two-column table (`concept_id`, `concept_name`). Unmapped
    /// ids fall back to `concept_id_<value>`; a table without a concept
    /// column yields an empty catalog. Disclosure control applies, so
    /// below-threshold concepts never appear here either.
    pub fn list_concepts(&self, table: &str) -> Result<RecordBatch> {
        let descriptor = self.snapshot.descriptor(&self.config, table)?;
        let Some(concept_column) = descriptor.concept_column.clone() else {
            return batch_from_columns(vec![
                ("concept_id".to_string(), string_array(Vec::new())),
                ("concept_name".to_string(), string_array(Vec::new())),
            ]);
        };

        let opts = FetchOptions {
            columns: Some(vec![concept_column.clone()]),
            ..FetchOptions::default()
        };
        let batch = fetch_table(
            self.conn,
            &self.snapshot,
            &self.config,
            self.policy,
            &descriptor.name,
            &opts,
        )?;
        let ids = distinct_values(&get_column(&batch, &concept_column)?);
        let dictionary = match build_dictionary(self.conn, &self.config, &ids) {
            Ok(dictionary) => dictionary,
            Err(e) => {
                warn!("Vocabulary unavailable for concept catalog: {e}");
                Default::default()
            }
        };

        let names: Vec<Option<String>> = ids
            .iter()
            .map(|id| {
                Some(
                    dictionary
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| format!("concept_id_{id}")),
                )
            })
            .collect();
        batch_from_columns(vec![
            (
                "concept_id".to_string(),
                string_array(ids.into_iter().map(Some).collect()),
            ),
            ("concept_name".to_string(), string_array(names)),
        ])
    }

    /// Fetch one table, translated and optionally reshaped wide
    ///
    /// The single-table entry point: fetch with filters, translate every
    /// concept-suffixed column, and (for longitudinal tables, when
    /// requested) date-sort, sequence and pivot against the merge column.
    pub fn get_table(&self, table: &str, opts: &GetTableOptions) -> Result<RecordBatch> {
        let descriptor = self.snapshot.descriptor(&self.config, table)?;
        let merge_column = opts
            .merge_column
            .clone()
            .unwrap_or_else(|| self.config.entity_id_column());

        let fetch_opts = FetchOptions {
            columns: opts.columns.clone(),
            concepts: opts.concepts.clone(),
            persons: opts.persons.clone(),
            merge_column: Some(merge_column.clone()),
            drop_empty_columns: opts.drop_empty_columns,
        };
        let batch = fetch_table(
            self.conn,
            &self.snapshot,
            &self.config,
            self.policy,
            &descriptor.name,
            &fetch_opts,
        )?;
        let batch = translate_concepts(self.conn, &self.config, &batch, &descriptor.concept_columns)?;

        if !opts.wide_longitudinal {
            return Ok(batch);
        }
        let wide =
            self.reshape_longitudinal(&descriptor, batch, &merge_column, opts.complete_time_points)?;
        if opts.drop_empty_columns {
            return drop_empty(&wide);
        }
        Ok(wide)
    }

    /// Assemble the full wide table for the configured root entity
    ///
    /// Equivalent to fetching the root table and merging every transitively
    /// related table into it, then extending with reference tables and
    /// normalizing the column order.
    pub fn create_full_assembly(&self) -> Result<RecordBatch> {
        let root = &self.config.root_table;
        let root_descriptor = self.snapshot.descriptor(&self.config, root)?;
        info!("Assembling wide table rooted at '{}'", root_descriptor.name);

        let fetch_opts = FetchOptions::default();
        let batch = fetch_table(
            self.conn,
            &self.snapshot,
            &self.config,
            self.policy,
            &root_descriptor.name,
            &fetch_opts,
        )?;
        let mut accumulator =
            translate_concepts(self.conn, &self.config, &batch, &root_descriptor.concept_columns)?;

        let mut merged: FxHashSet<String> = FxHashSet::default();
        merged.insert(root_descriptor.name.clone());

        for table in self.graph.reachable_set(&root_descriptor.name) {
            let Some(path) = self.graph.relation_path(&table, &root_descriptor.name) else {
                warn!("No relation path from '{table}' to '{root}', skipping");
                continue;
            };
            let Some(first_hop) = path.first() else {
                continue;
            };

            let descriptor = self.snapshot.descriptor(&self.config, &table)?;
            let fetch_opts = FetchOptions {
                merge_column: Some(self.config.primary_id_column(first_hop)),
                ..FetchOptions::default()
            };
            let mut batch = fetch_table(
                self.conn,
                &self.snapshot,
                &self.config,
                self.policy,
                &table,
                &fetch_opts,
            )?;

            // Bridge intermediate hops until the rows carry the root's key,
            // so indirect tables merge like direct ones.
            for hop in path.windows(2) {
                let via_key = self.config.primary_id_column(&hop[0]);
                let next_key = self.config.primary_id_column(&hop[1]);
                if batch.schema().index_of(&next_key).is_ok() {
                    continue;
                }
                if batch.schema().index_of(&via_key).is_err() {
                    break;
                }
                debug!("Bridging '{table}' through '{}' on '{via_key}'", hop[0]);
                let bridge = self.bridge_keys(&hop[0], &via_key, &next_key)?;
                batch = merge_left(&batch, &bridge, &via_key)?;
            }

            let join_key = self
                .config
                .primary_id_column(path.last().unwrap_or(first_hop));
            if batch.schema().index_of(&join_key).is_err() {
                warn!("Rows of '{table}' cannot be keyed by '{join_key}', skipping");
                continue;
            }
            if accumulator.schema().index_of(&join_key).is_err() {
                warn!(
                    "Accumulator lacks join key '{join_key}' for table '{table}', skipping"
                );
                continue;
            }

            debug!("Merging '{table}' on '{join_key}'");
            let batch =
                translate_concepts(self.conn, &self.config, &batch, &descriptor.concept_columns)?;
            let batch = if descriptor.concept_column.is_some() {
                self.reshape_longitudinal(&descriptor, batch, &join_key, false)?
            } else {
                batch
            };

            accumulator = merge_left(&accumulator, &batch, &join_key)?;
            merged.insert(table);
        }

        accumulator = self.extend_reference_tables(accumulator, &mut merged, 0)?;
        reorder_columns(&accumulator)
    }

    /// Fetch the key pairs of an intermediate table: its own primary id and
    /// the next hop's id, nothing else
    fn bridge_keys(&self, table: &str, own_key: &str, next_key: &str) -> Result<RecordBatch> {
        let opts = FetchOptions {
            columns: Some(vec![own_key.to_string(), next_key.to_string()]),
            merge_column: Some(own_key.to_string()),
            ..FetchOptions::default()
        };
        let batch = fetch_table(
            self.conn,
            &self.snapshot,
            &self.config,
            self.policy,
            table,
            &opts,
        )?;
        // Structural columns ride along in any fetch; project them away so
        // the bridge contributes keys only.
        let keep: Vec<usize> = batch
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| {
                field.name().as_str() == own_key || field.name().as_str() == next_key
            })
            .map(|(i, _)| i)
            .collect();
        Ok(batch.project(&keep)?)
    }

    /// Date-sort, sequence and pivot a longitudinal table
    fn reshape_longitudinal(
        &self,
        descriptor: &TableDescriptor,
        batch: RecordBatch,
        key_column: &str,
        complete: bool,
    ) -> Result<RecordBatch> {
        let Some(concept_column) = descriptor.concept_column.clone() else {
            return Ok(batch);
        };
        if batch.schema().index_of(&concept_column).is_err() {
            return Ok(batch);
        }

        let date_column = descriptor
            .date_column
            .as_ref()
            .filter(|c| batch.schema().index_of(c).is_ok());

        let mut batch = batch;
        if let Some(date_column) = date_column {
            batch = sort_by_date(&batch, date_column, &self.config.date_formats)?;
            if complete {
                batch = complete_time_points(
                    &batch,
                    key_column,
                    &concept_column,
                    date_column,
                    &self.config.date_formats,
                )?;
            }
        }
        let batch = sequence_duplicates(&batch, &concept_column, key_column)?;
        pivot_wide(&batch, &concept_column, key_column)
    }

    /// Merge small reference tables referenced by remaining id columns
    ///
    /// An un-dotted `<table>_id` column left in the accumulator points at a
    /// dictionary table (a "gender" lookup and the like) that is not part
    /// of the root's reachable set. Each is fetched and left-merged on its
    /// primary id; recursion is bounded so lookup chains cannot extend the
    /// table indefinitely.
    fn extend_reference_tables(
        &self,
        accumulator: RecordBatch,
        merged: &mut FxHashSet<String>,
        depth: usize,
    ) -> Result<RecordBatch> {
        if depth >= self.config.max_extension_depth {
            return Ok(accumulator);
        }

        let candidates: Vec<(String, String)> = accumulator
            .schema()
            .fields()
            .iter()
            .filter(|field| !field.name().contains('.'))
            .filter_map(|field| {
                let column = field.name();
                let table = column.strip_suffix(self.config.id_suffix.as_str())?;
                if merged.contains(table) || table == self.config.root_table {
                    return None;
                }
                self.snapshot
                    .resolve_table(table)
                    .ok()
                    .map(|resolved| (resolved, column.clone()))
            })
            .collect();

        let mut accumulator = accumulator;
        let mut extended = false;
        for (table, join_key) in candidates {
            if merged.contains(&table) {
                continue;
            }
            debug!("Extending with reference table '{table}' on '{join_key}'");
            let descriptor = self.snapshot.descriptor(&self.config, &table)?;
            let fetch_opts = FetchOptions {
                merge_column: Some(join_key.clone()),
                ..FetchOptions::default()
            };
            let batch = fetch_table(
                self.conn,
                &self.snapshot,
                &self.config,
                self.policy,
                &table,
                &fetch_opts,
            )?;
            let batch =
                translate_concepts(self.conn, &self.config, &batch, &descriptor.concept_columns)?;
            accumulator = merge_left(&accumulator, &batch, &join_key)?;
            merged.insert(table);
            extended = true;
        }

        if extended {
            return self.extend_reference_tables(accumulator, merged, depth + 1);
        }
        Ok(accumulator)
    }
}

/// Left-merge `incoming` into `accumulator` on a shared key column
///
/// Every accumulator row is kept; rows without a match get nulls. When
/// `incoming` carries several rows for one key, the first wins. On a column
/// name collision the accumulator's column survives, so traversal order
/// decides which duplicate is kept.
pub fn merge_left(
    accumulator: &RecordBatch,
    incoming: &RecordBatch,
    join_key: &str,
) -> Result<RecordBatch> {
    let left_keys = get_column(accumulator, join_key)?;
    let right_keys = match get_column(incoming, join_key) {
        Ok(keys) => keys,
        Err(_) => {
            return Err(AssemblerError::MissingDependency {
                column: join_key.to_string(),
            });
        }
    };

    let mut right_row: FxHashMap<String, usize> = FxHashMap::default();
    for i in 0..incoming.num_rows() {
        if let Some(key) = render_value(&right_keys, i) {
            right_row.entry(key).or_insert(i);
        }
    }
    let indices: Vec<Option<usize>> = (0..accumulator.num_rows())
        .map(|i| {
            render_value(&left_keys, i).and_then(|key| right_row.get(&key).copied())
        })
        .collect();

    let existing: FxHashSet<String> = accumulator
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();

    let mut columns: Vec<(String, ArrayRef)> = Vec::new();
    for (i, field) in accumulator.schema().fields().iter().enumerate() {
        columns.push((field.name().clone(), accumulator.column(i).clone()));
    }
    for (i, field) in incoming.schema().fields().iter().enumerate() {
        let name = field.name();
        if name == join_key {
            continue;
        }
        if existing.contains(name.as_str()) {
            debug!("Column '{name}' already present, keeping the first");
            continue;
        }
        columns.push((name.clone(), take_optional(incoming.column(i), &indices)?));
    }
    batch_from_columns(columns)
}

/// Normalize the column order of an assembled wide table
///
/// Un-dotted (structural) columns come first in their current order,
/// followed by pivoted columns grouped by their concept prefix in
/// first-appearance order, so every concept's fields sit together.
pub fn reorder_columns(batch: &RecordBatch) -> Result<RecordBatch> {
    let names: Vec<String> = batch
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();

    let undotted: Vec<usize> = (0..names.len())
        .filter(|&i| !names[i].contains('.'))
        .collect();
    let prefixes: Vec<String> = names
        .iter()
        .filter(|name| name.contains('.'))
        .map(|name| name.split('.').next().unwrap_or(name).to_string())
        .unique()
        .collect();

    let mut order = undotted;
    for prefix in &prefixes {
        for (i, name) in names.iter().enumerate() {
            if name.contains('.') && name.split('.').next() == Some(prefix.as_str()) {
                order.push(i);
            }
        }
    }

    Ok(batch.project(&order)?)
}

/// Drop all-null columns from an assembled table
pub fn drop_empty(batch: &RecordBatch) -> Result<RecordBatch> {
    let keep: Vec<usize> = (0..batch.num_columns())
        .filter(|&i| !is_all_null(batch.column(i)))
        .collect();
    Ok(batch.project(&keep)?)
}
