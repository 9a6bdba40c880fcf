//! Schema snapshot and table descriptors
//!
//! The engine never re-queries the catalog mid-traversal: all tables and
//! columns are read once into an immutable [`SchemaSnapshot`], and every
//! later step (classification, graph building, fetch planning) is a pure
//! function over that snapshot.

pub mod classify;

use crate::config::AssemblyConfig;
use crate::error::{AssemblerError, Result};
use crate::store::Connection;
use std::collections::BTreeMap;

/// An immutable `table -> columns` snapshot of the relational schema
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, Vec<String>>,
}

impl SchemaSnapshot {
    /// Load the snapshot from a connection's catalog
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be listed
    pub fn load(conn: &dyn Connection) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for table in conn.list_tables()? {
            let columns = conn.list_columns(&table)?;
            tables.insert(table, columns);
        }
        Ok(Self { tables })
    }

    /// Build a snapshot directly from `(table, columns)` pairs
    pub fn from_tables<T, C, S>(entries: T) -> Self
    where
        T: IntoIterator<Item = (S, C)>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables = entries
            .into_iter()
            .map(|(table, columns)| {
                (
                    table.into(),
                    columns.into_iter().map(Into::into).collect(),
                )
            })
            .collect();
        Self { tables }
    }

    /// Table names in lexical order
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Columns of a table, in table order
    #[must_use]
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    /// Whether a table carries a column
    #[must_use]
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .is_some_and(|cols| cols.iter().any(|c| c == column))
    }

    /// Resolve a table name: exact match wins, else case-insensitive match,
    /// else `NotFound`
    pub fn resolve_table(&self, name: &str) -> Result<String> {
        if self.tables.contains_key(name) {
            return Ok(name.to_string());
        }
        let lowered = name.to_lowercase();
        self.tables
            .keys()
            .find(|table| table.to_lowercase() == lowered)
            .cloned()
            .ok_or_else(|| AssemblerError::not_found(name))
    }

    /// Resolve a column name within a table: exact match wins, else
    /// case-insensitive match, else `NotFound`
    pub fn resolve_column(&self, table: &str, column: &str) -> Result<String> {
        let columns = self
            .columns(table)
            .ok_or_else(|| AssemblerError::not_found(table))?;
        if let Some(found) = columns.iter().find(|c| c.as_str() == column) {
            return Ok(found.clone());
        }
        let lowered = column.to_lowercase();
        columns
            .iter()
            .find(|c| c.to_lowercase() == lowered)
            .cloned()
            .ok_or_else(|| AssemblerError::not_found(column))
    }

    /// Build the descriptor view of a table
    ///
    /// # Errors
    /// Returns `NotFound` if the table does not exist
    pub fn descriptor(&self, config: &AssemblyConfig, table: &str) -> Result<TableDescriptor> {
        let name = self.resolve_table(table)?;
        let columns = self.columns(&name).unwrap_or_default().to_vec();

        let primary_id = config.primary_id_column(&name);
        let designated = config.designated_concept_column(&name);
        let concept_column = columns.iter().find(|c| **c == designated).cloned();
        let date_column = columns
            .iter()
            .find(|c| c.ends_with(config.date_suffix.as_str()))
            .cloned();
        let concept_columns = columns
            .iter()
            .filter(|c| c.ends_with(config.concept_suffix.as_str()))
            .cloned()
            .collect();

        Ok(TableDescriptor {
            name,
            columns,
            primary_id,
            concept_column,
            concept_columns,
            date_column,
        })
    }
}

/// Derived view of one table's structure under the naming conventions
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    /// Resolved table name
    pub name: String,
    /// All columns, in table order
    pub columns: Vec<String>,
    /// Primary identifier column name, derived from the table name;
    /// not necessarily present in `columns`
    pub primary_id: String,
    /// The designated concept column (`<table>_concept_id`), if present
    pub concept_column: Option<String>,
    /// Every concept-suffixed column, in table order
    pub concept_columns: Vec<String>,
    /// First date-suffixed column, if any
    pub date_column: Option<String>,
}

impl TableDescriptor {
    /// Whether the table carries a column
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::from_tables(vec![
            (
                "measurement",
                vec![
                    "measurement_id",
                    "person_id",
                    "measurement_concept_id",
                    "measurement_date",
                    "value_as_number",
                ],
            ),
            ("person", vec!["person_id", "gender_concept_id"]),
        ])
    }

    #[test]
    fn table_resolution_is_case_insensitive() {
        let snapshot = snapshot();
        assert_eq!(snapshot.resolve_table("person").unwrap(), "person");
        assert_eq!(snapshot.resolve_table("PERSON").unwrap(), "person");
        assert!(snapshot.resolve_table("missing").is_err());
    }

    #[test]
    fn descriptor_derives_structure_from_names() {
        let snapshot = snapshot();
        let config = AssemblyConfig::default();

        let measurement = snapshot.descriptor(&config, "measurement").unwrap();
        assert_eq!(measurement.primary_id, "measurement_id");
        assert_eq!(
            measurement.concept_column.as_deref(),
            Some("measurement_concept_id")
        );
        assert_eq!(measurement.date_column.as_deref(), Some("measurement_date"));

        let person = snapshot.descriptor(&config, "person").unwrap();
        assert_eq!(person.concept_column, None);
        assert_eq!(person.concept_columns, vec!["gender_concept_id"]);
    }
}
