//! In-memory store backing the demo binary and the test suite
//!
//! [`MemoryConnection`] keeps record batches grouped by schema and table and
//! interprets the one SELECT shape emitted by [`SelectBuilder`](crate::store::sql::SelectBuilder):
//! a projection over a single table with conjunctive `IN` predicates. It is
//! the embedded stand-in for the external SQL engine the assembly core is
//! built against.

use crate::error::{AssemblerError, Result};
use crate::store::sql::Literal;
use crate::store::{Connection, Dialect};
use crate::utils::{filter_record_batch, render_value};
use arrow::array::{ArrayRef, BooleanArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default schema name used when none is given
pub const DEFAULT_SCHEMA: &str = "public";

/// A synchronous, single-threaded in-memory [`Connection`]
pub struct MemoryConnection {
    schemas: RefCell<BTreeMap<String, BTreeMap<String, RecordBatch>>>,
    current: RefCell<String>,
    dialect: Dialect,
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnection {
    /// Create an empty store with a single default schema
    #[must_use]
    pub fn new() -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert(DEFAULT_SCHEMA.to_string(), BTreeMap::new());
        Self {
            schemas: RefCell::new(schemas),
            current: RefCell::new(DEFAULT_SCHEMA.to_string()),
            dialect: Dialect::Postgres,
        }
    }

    /// Register a table in the current schema
    pub fn add_table(&self, name: impl Into<String>, batch: RecordBatch) {
        let schema = self.current.borrow().clone();
        self.add_table_in(&schema, name, batch);
    }

    /// Register a table in a specific schema, creating the schema if needed
    pub fn add_table_in(&self, schema: &str, name: impl Into<String>, batch: RecordBatch) {
        self.schemas
            .borrow_mut()
            .entry(schema.to_string())
            .or_default()
            .insert(name.into(), batch);
    }

    /// Remove a table from the current schema, if present
    pub fn remove_table(&self, name: &str) {
        let schema = self.current.borrow().clone();
        if let Some(tables) = self.schemas.borrow_mut().get_mut(&schema) {
            tables.remove(name);
        }
    }

    fn table(&self, name: &str) -> Result<RecordBatch> {
        let schema = self.current.borrow().clone();
        self.schemas
            .borrow()
            .get(&schema)
            .and_then(|tables| tables.get(name))
            .cloned()
            .ok_or_else(|| AssemblerError::not_found(name))
    }

    fn unquote(&self, ident: &str) -> String {
        let ident = ident.trim();
        match self.dialect {
            Dialect::Postgres | Dialect::Sqlite => {
                if ident.len() >= 2 && ident.starts_with('"') && ident.ends_with('"') {
                    ident[1..ident.len() - 1].replace("\"\"", "\"")
                } else {
                    ident.to_string()
                }
            }
            Dialect::MySql => {
                if ident.len() >= 2 && ident.starts_with('`') && ident.ends_with('`') {
                    ident[1..ident.len() - 1].replace("``", "`")
                } else {
                    ident.to_string()
                }
            }
        }
    }

    /// Parse the literal list between the parentheses of an `IN` clause
    fn parse_in_list(list: &str) -> Result<Vec<Literal>> {
        let mut literals = Vec::new();
        let mut chars = list.chars().peekable();

        while let Some(&c) = chars.peek() {
            match c {
                ' ' | ',' => {
                    chars.next();
                }
                '\'' => {
                    chars.next();
                    let mut text = String::new();
                    loop {
                        match chars.next() {
                            Some('\'') => {
                                if chars.peek() == Some(&'\'') {
                                    chars.next();
                                    text.push('\'');
                                } else {
                                    break;
                                }
                            }
                            Some(ch) => text.push(ch),
                            None => {
                                return Err(AssemblerError::store(
                                    "Unterminated string literal in IN list",
                                ));
                            }
                        }
                    }
                    literals.push(Literal::Text(text));
                }
                _ => {
                    let mut token = String::new();
                    while let Some(&ch) = chars.peek() {
                        if ch == ',' {
                            break;
                        }
                        token.push(ch);
                        chars.next();
                    }
                    let token = token.trim().to_string();
                    if !token.is_empty() {
                        literals.push(Literal::Number(token));
                    }
                }
            }
        }

        Ok(literals)
    }

    /// Split a WHERE clause into `(column, values)` predicates
    fn parse_predicates(&self, clause: &str) -> Result<Vec<(String, Vec<Literal>)>> {
        let mut predicates = Vec::new();
        let mut rest = clause.trim();

        while !rest.is_empty() {
            let in_pos = rest
                .find(" IN (")
                .ok_or_else(|| AssemblerError::store(format!("Unsupported predicate: {rest}")))?;
            let column = self.unquote(&rest[..in_pos]);
            let after = &rest[in_pos + " IN (".len()..];

            // Closing parenthesis of the list, honoring quoted text
            let mut depth = 0usize;
            let mut in_text = false;
            let mut close = None;
            for (i, c) in after.char_indices() {
                match c {
                    '\'' => in_text = !in_text,
                    '(' if !in_text => depth += 1,
                    ')' if !in_text => {
                        if depth == 0 {
                            close = Some(i);
                            break;
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
            }
            let close =
                close.ok_or_else(|| AssemblerError::store("Unterminated IN list"))?;

            predicates.push((column, Self::parse_in_list(&after[..close])?));

            rest = after[close + 1..].trim();
            if let Some(stripped) = rest.strip_prefix("AND ") {
                rest = stripped.trim();
            } else if !rest.is_empty() {
                return Err(AssemblerError::store(format!(
                    "Unsupported clause tail: {rest}"
                )));
            }
        }

        Ok(predicates)
    }

    fn project(&self, batch: &RecordBatch, projection: &str) -> Result<RecordBatch> {
        if projection.trim() == "*" {
            return Ok(batch.clone());
        }

        let names: Vec<String> = projection
            .split(',')
            .map(|part| self.unquote(part))
            .collect();

        let schema = batch.schema();
        let mut fields: Vec<Field> = Vec::with_capacity(names.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(names.len());
        for name in &names {
            let idx = schema
                .index_of(name)
                .map_err(|_| AssemblerError::not_found(name.clone()))?;
            fields.push(schema.field(idx).clone());
            arrays.push(batch.column(idx).clone());
        }

        Ok(RecordBatch::try_new(
            Arc::new(Schema::new(fields)),
            arrays,
        )?)
    }

    fn apply_predicates(
        &self,
        batch: &RecordBatch,
        predicates: &[(String, Vec<Literal>)],
    ) -> Result<RecordBatch> {
        let mut result = batch.clone();
        for (column, literals) in predicates {
            let idx = result
                .schema()
                .index_of(column)
                .map_err(|_| AssemblerError::not_found(column.clone()))?;
            let wanted: FxHashSet<String> = literals
                .iter()
                .map(|lit| match lit {
                    Literal::Number(n) => n.clone(),
                    Literal::Text(t) => t.trim().to_string(),
                })
                .collect();

            let column_array = result.column(idx).clone();
            let mask: BooleanArray = (0..result.num_rows())
                .map(|i| {
                    Some(
                        render_value(&column_array, i)
                            .is_some_and(|value| wanted.contains(&value)),
                    )
                })
                .collect();
            result = filter_record_batch(&result, &mask)?;
        }
        Ok(result)
    }
}

impl Connection for MemoryConnection {
    fn list_tables(&self) -> Result<Vec<String>> {
        let schema = self.current.borrow().clone();
        Ok(self
            .schemas
            .borrow()
            .get(&schema)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let batch = self.table(table)?;
        Ok(batch
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect())
    }

    fn query(&self, sql: &str) -> Result<RecordBatch> {
        let rest = sql
            .strip_prefix("SELECT ")
            .ok_or_else(|| AssemblerError::store(format!("Unsupported query: {sql}")))?;
        let (projection, rest) = rest
            .split_once(" FROM ")
            .ok_or_else(|| AssemblerError::store(format!("Unsupported query: {sql}")))?;

        let (table_part, where_part) = match rest.split_once(" WHERE ") {
            Some((table, clause)) => (table, Some(clause)),
            None => (rest, None),
        };

        let batch = self.table(&self.unquote(table_part))?;
        let filtered = match where_part {
            Some(clause) => {
                let predicates = self.parse_predicates(clause)?;
                self.apply_predicates(&batch, &predicates)?
            }
            None => batch,
        };
        self.project(&filtered, projection)
    }

    fn execute(&self, sql: &str) -> Result<()> {
        Err(AssemblerError::store(format!(
            "MemoryConnection does not execute statements: {sql}"
        )))
    }

    fn current_schema(&self) -> Result<String> {
        Ok(self.current.borrow().clone())
    }

    fn set_schema(&self, schema: &str) -> Result<()> {
        if !self.schemas.borrow().contains_key(schema) {
            return Err(AssemblerError::not_found(schema));
        }
        *self.current.borrow_mut() = schema.to_string();
        Ok(())
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sql::SelectBuilder;
    use crate::utils::batch_from_columns;
    use arrow::array::{Int64Array, StringArray};

    fn sample() -> MemoryConnection {
        let conn = MemoryConnection::new();
        let batch = batch_from_columns(vec![
            (
                "person_id".to_string(),
                Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
            ),
            (
                "gender".to_string(),
                Arc::new(StringArray::from(vec!["f", "m", "f"])) as ArrayRef,
            ),
        ])
        .unwrap();
        conn.add_table("person", batch);
        conn
    }

    #[test]
    fn interprets_projection_and_in_predicates() {
        let conn = sample();
        let sql = SelectBuilder::new(conn.dialect(), "person")
            .columns(vec!["person_id".to_string()])
            .where_in("gender", &["f".to_string()])
            .to_sql();
        let batch = conn.query(&sql).unwrap();
        assert_eq!(batch.num_columns(), 1);
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn numeric_predicates_match_across_typing() {
        let conn = sample();
        let sql = SelectBuilder::new(conn.dialect(), "person")
            .where_in("person_id", &["2".to_string()])
            .to_sql();
        let batch = conn.query(&sql).unwrap();
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn unknown_table_is_not_found() {
        let conn = sample();
        let err = conn.query("SELECT * FROM \"nope\"").unwrap_err();
        assert!(matches!(
            err,
            crate::error::AssemblerError::NotFound { .. }
        ));
    }

    #[test]
    fn schema_switch_requires_existing_schema() {
        let conn = sample();
        assert!(conn.set_schema("vocab").is_err());
        conn.add_table_in("vocab", "concept", conn.table("person").unwrap());
        assert!(conn.set_schema("vocab").is_ok());
        assert_eq!(conn.current_schema().unwrap(), "vocab");
    }
}
