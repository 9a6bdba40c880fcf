//! SQL generation for table fetches
//!
//! The engine emits exactly one statement shape:
//! `SELECT <cols|*> FROM <table> [WHERE col IN (...) [AND col IN (...)]]`.
//! Filters are pushed to the store whenever the filtered column exists, so
//! row narrowing happens at the query level rather than in memory.

use crate::store::Dialect;

/// A literal value in an `IN` list
#[derive(Debug, Clone)]
pub enum Literal {
    /// Rendered unquoted
    Number(String),
    /// Rendered single-quoted, with embedded quotes escaped
    Text(String),
}

impl Literal {
    /// Classify a canonical value string: integers stay numeric, anything
    /// else becomes a quoted string
    #[must_use]
    pub fn from_value(value: &str) -> Self {
        if value.parse::<i64>().is_ok() {
            Self::Number(value.to_string())
        } else {
            Self::Text(value.to_string())
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Number(n) => n.clone(),
            Self::Text(t) => format!("'{}'", t.replace('\'', "''")),
        }
    }
}

/// Builder for the single SELECT shape the engine emits
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    dialect: Dialect,
    table: String,
    columns: Option<Vec<String>>,
    predicates: Vec<(String, Vec<Literal>)>,
}

impl SelectBuilder {
    /// Start a select against a table
    #[must_use]
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            columns: None,
            predicates: Vec::new(),
        }
    }

    /// Restrict the projection to the given columns
    ///
    /// An empty list stays an empty projection; it never widens back
    /// to `*`.
    #[must_use]
    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Add a `column IN (values)` predicate
    ///
    /// Values are canonical strings; numeric-looking ones are emitted
    /// unquoted so they match numerically-typed columns.
    #[must_use]
    pub fn where_in(mut self, column: impl Into<String>, values: &[String]) -> Self {
        let literals = values.iter().map(|v| Literal::from_value(v)).collect();
        self.predicates.push((column.into(), literals));
        self
    }

    /// Render the statement
    #[must_use]
    pub fn to_sql(&self) -> String {
        let projection = match &self.columns {
            Some(cols) => cols
                .iter()
                .map(|c| self.dialect.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            None => "*".to_string(),
        };

        let mut sql = format!(
            "SELECT {projection} FROM {}",
            self.dialect.quote_ident(&self.table)
        );

        let clauses: Vec<String> = self
            .predicates
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(column, values)| {
                let list = values
                    .iter()
                    .map(Literal::render)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} IN ({list})", self.dialect.quote_ident(column))
            })
            .collect();

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_projection_and_predicates() {
        let sql = SelectBuilder::new(Dialect::Postgres, "measurement")
            .columns(vec!["person_id".to_string(), "value_as_number".to_string()])
            .where_in("measurement_concept_id", &["3004501".to_string()])
            .where_in("person_id", &["1".to_string(), "2".to_string()])
            .to_sql();
        assert_eq!(
            sql,
            "SELECT \"person_id\", \"value_as_number\" FROM \"measurement\" \
             WHERE \"measurement_concept_id\" IN (3004501) AND \"person_id\" IN (1, 2)"
        );
    }

    #[test]
    fn quotes_string_literals() {
        let sql = SelectBuilder::new(Dialect::Postgres, "concept")
            .where_in("concept_id", &["it's".to_string()])
            .to_sql();
        assert!(sql.ends_with("WHERE \"concept_id\" IN ('it''s')"));
    }

    #[test]
    fn empty_column_list_does_not_widen_to_star() {
        let sql = SelectBuilder::new(Dialect::Postgres, "person")
            .columns(Vec::new())
            .to_sql();
        assert!(!sql.contains('*'));
    }

    #[test]
    fn empty_predicates_are_omitted() {
        let sql = SelectBuilder::new(Dialect::Postgres, "person").to_sql();
        assert_eq!(sql, "SELECT * FROM \"person\"");
    }
}
