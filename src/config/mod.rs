//! Configuration for the assembly engine.

use serde::{Deserialize, Serialize};

/// Configuration for schema traversal and wide-table assembly
///
/// All naming conventions of the relational schema (identifier suffixes,
/// concept suffixes, vocabulary table location) are carried here explicitly
/// instead of being hard-coded at the call sites, so a non-standard CDM
/// deployment can be accommodated without touching the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Root entity table; the wide table ends up with one row per row
    /// of this table
    pub root_table: String,
    /// Name of the vocabulary table used for concept translation
    pub vocabulary_table: String,
    /// Id column of the vocabulary table
    pub vocabulary_id_column: String,
    /// Name column of the vocabulary table
    pub vocabulary_name_column: String,
    /// Schema holding the vocabulary table, when different from the
    /// connection's current schema
    pub vocabulary_schema: Option<String>,
    /// Suffix marking identifier columns
    pub id_suffix: String,
    /// Suffix marking concept-coded columns
    pub concept_suffix: String,
    /// Suffix marking event date columns
    pub date_suffix: String,
    /// Columns containing any of these markers carry raw source-system
    /// values and are never exposed
    pub excluded_column_markers: Vec<String>,
    /// Maximum recursion depth when extending the wide table with
    /// reference/dictionary tables
    pub max_extension_depth: usize,
    /// Date format strings accepted when parsing string-typed date columns
    pub date_formats: Vec<String>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            root_table: "person".to_string(),
            vocabulary_table: "concept".to_string(),
            vocabulary_id_column: "concept_id".to_string(),
            vocabulary_name_column: "concept_name".to_string(),
            vocabulary_schema: None,
            id_suffix: "_id".to_string(),
            concept_suffix: "_concept_id".to_string(),
            date_suffix: "_date".to_string(),
            excluded_column_markers: vec![
                "source_value".to_string(),
                "source_concept_id".to_string(),
            ],
            max_extension_depth: 1,
            date_formats: vec![
                "%Y-%m-%d".to_string(), // ISO format: 2023-01-15
                "%d-%m-%Y".to_string(), // European: 15-01-2023
                "%Y/%m/%d".to_string(),
                "%d/%m/%Y".to_string(),
                "%Y%m%d".to_string(), // Compact: 20230115
            ],
        }
    }
}

impl AssemblyConfig {
    /// Create a config with the default OMOP CDM naming conventions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root entity table
    #[must_use]
    pub fn with_root_table(mut self, table: impl Into<String>) -> Self {
        self.root_table = table.into();
        self
    }

    /// Set the vocabulary table used for concept translation
    #[must_use]
    pub fn with_vocabulary_table(mut self, table: impl Into<String>) -> Self {
        self.vocabulary_table = table.into();
        self
    }

    /// Set the schema holding the vocabulary table
    #[must_use]
    pub fn with_vocabulary_schema(mut self, schema: impl Into<String>) -> Self {
        self.vocabulary_schema = Some(schema.into());
        self
    }

    /// Set the reference-table extension depth bound
    #[must_use]
    pub fn with_max_extension_depth(mut self, depth: usize) -> Self {
        self.max_extension_depth = depth;
        self
    }

    /// Primary identifier column of the root entity table, derived from
    /// the table name
    #[must_use]
    pub fn entity_id_column(&self) -> String {
        format!("{}{}", self.root_table, self.id_suffix)
    }

    /// Primary identifier column of an arbitrary table, derived from the
    /// table name
    #[must_use]
    pub fn primary_id_column(&self, table: &str) -> String {
        format!("{table}{}", self.id_suffix)
    }

    /// Designated concept column of a table, derived from the table name
    #[must_use]
    pub fn designated_concept_column(&self, table: &str) -> String {
        format!("{table}{}", self.concept_suffix)
    }

    /// Whether a column carries raw source-system values that must not
    /// be exposed
    #[must_use]
    pub fn is_excluded_column(&self, column: &str) -> bool {
        self.excluded_column_markers
            .iter()
            .any(|marker| column.contains(marker.as_str()))
    }
}
