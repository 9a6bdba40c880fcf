//! Store abstraction: the capability interface the engine needs from a
//! SQL-capable backend
//!
//! The engine never owns a physical database connection. It consumes a
//! [`Connection`] capability (catalog listing, query execution, schema
//! selection) and a [`DisclosurePolicy`] supplying the minimum-subset-size
//! privacy threshold. Schema-selection statements differ per DBMS, so they
//! are resolved from an explicit per-dialect template struct constructed up
//! front, not from process-wide mutable state.

pub mod memory;
pub mod sql;

use crate::error::Result;
use arrow::record_batch::RecordBatch;
use log::warn;
use serde::{Deserialize, Serialize};

pub use memory::MemoryConnection;
pub use sql::SelectBuilder;

/// Supported DBMS families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    /// `PostgreSQL` and wire-compatible engines
    Postgres,
    /// MySQL / MariaDB
    MySql,
    /// `SQLite` and embedded stores without schema selection
    Sqlite,
}

impl Dialect {
    /// Quote an identifier for this dialect
    #[must_use]
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Self::Postgres | Self::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
        }
    }
}

/// Per-dialect statement templates for schema selection
///
/// `{schema}` in the set template is replaced with the quoted target schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaStatements {
    /// Statement switching the active schema
    pub set_schema: String,
    /// Query returning the active schema
    pub current_schema: String,
}

impl SchemaStatements {
    /// Resolve the statement templates for a dialect
    ///
    /// Returns `None` for dialects without a schema concept.
    #[must_use]
    pub fn for_dialect(dialect: Dialect) -> Option<Self> {
        match dialect {
            Dialect::Postgres => Some(Self {
                set_schema: "SET search_path TO {schema}".to_string(),
                current_schema: "SHOW search_path".to_string(),
            }),
            Dialect::MySql => Some(Self {
                set_schema: "USE {schema}".to_string(),
                current_schema: "SELECT DATABASE()".to_string(),
            }),
            Dialect::Sqlite => None,
        }
    }

    /// Render the schema-switch statement for a target schema
    #[must_use]
    pub fn render_set_schema(&self, dialect: Dialect, schema: &str) -> String {
        self.set_schema
            .replace("{schema}", &dialect.quote_ident(schema))
    }
}

/// Capability interface for a SQL-capable store
///
/// Implementations are synchronous and single-threaded; the engine issues
/// one call at a time on one logical connection and never retries.
pub trait Connection {
    /// List the tables visible in the current schema
    fn list_tables(&self) -> Result<Vec<String>>;

    /// List the columns of a table, in table order
    fn list_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Execute a query and return its result rows
    fn query(&self, sql: &str) -> Result<RecordBatch>;

    /// Execute a statement without a result
    fn execute(&self, sql: &str) -> Result<()>;

    /// The currently selected schema
    fn current_schema(&self) -> Result<String>;

    /// Switch the selected schema
    fn set_schema(&self, schema: &str) -> Result<()>;

    /// The DBMS dialect of this connection
    fn dialect(&self) -> Dialect;
}

/// Scoped schema switch with guaranteed restore
///
/// Records the schema active at construction, switches to the target schema,
/// and restores the original when dropped, on both success and error paths.
/// A failed restore is logged; it cannot be propagated out of `Drop`.
pub struct SchemaGuard<'a> {
    conn: &'a dyn Connection,
    previous: String,
}

impl<'a> SchemaGuard<'a> {
    /// Switch `conn` to `schema`, restoring the current schema on drop
    ///
    /// # Errors
    /// Returns an error if the current schema cannot be read or the switch
    /// fails; in that case nothing is left to restore.
    pub fn switch(conn: &'a dyn Connection, schema: &str) -> Result<Self> {
        let previous = conn.current_schema()?;
        conn.set_schema(schema)?;
        Ok(Self { conn, previous })
    }
}

impl Drop for SchemaGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.set_schema(&self.previous) {
            warn!("Failed to restore schema '{}': {e}", self.previous);
        }
    }
}

/// External disclosure-policy collaborator
///
/// Supplies the minimum number of distinct entities any returned group must
/// contain.
pub trait DisclosurePolicy {
    /// Minimum subset size enforced on every returned table
    fn minimum_subset_size(&self) -> Result<usize>;
}

/// A disclosure policy with a fixed threshold, for embedded and test use
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub usize);

impl DisclosurePolicy for FixedPolicy {
    fn minimum_subset_size(&self) -> Result<usize> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statements_follow_the_dialect() {
        let pg = SchemaStatements::for_dialect(Dialect::Postgres).unwrap();
        assert_eq!(
            pg.render_set_schema(Dialect::Postgres, "vocab"),
            "SET search_path TO \"vocab\""
        );
        assert_eq!(pg.current_schema, "SHOW search_path");

        let my = SchemaStatements::for_dialect(Dialect::MySql).unwrap();
        assert_eq!(my.render_set_schema(Dialect::MySql, "vocab"), "USE `vocab`");
        assert!(SchemaStatements::for_dialect(Dialect::Sqlite).is_none());
    }
}
