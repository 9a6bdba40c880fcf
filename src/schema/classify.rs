//! Naming-convention column classifier
//!
//! Foreign keys in the schema are not declared as constraints; they exist
//! only as a naming convention (`measurement.person_id` references
//! `person.person_id`). The classifier turns a schema snapshot into a map
//! from identifier category (`<table>_id`) to every qualified column in the
//! schema carrying that suffix.
//!
//! A column can satisfy several categories at once (`care_site_id` ends in
//! both `care_site_id` and `site_id` when both tables exist). The original
//! convention left the winner to enumeration order; here categories are
//! processed in lexical table order and each column is claimed by the first
//! category that matches it, which makes the outcome deterministic.

use crate::schema::SchemaSnapshot;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fmt;

/// A column qualified with its owning table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedColumn {
    /// Owning table
    pub table: String,
    /// Column name within the table
    pub column: String,
}

impl fmt::Display for QualifiedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Identifier category (`<table>_id`) to the qualified columns carrying it
pub type CategoryMap = BTreeMap<String, Vec<QualifiedColumn>>;

/// Classify all columns of a schema snapshot into identifier categories
///
/// A table's own primary identifier (`person.person_id`) is excluded from
/// its own category; only genuine foreign references remain. Matching is
/// case-insensitive suffix matching.
#[must_use]
pub fn classify(snapshot: &SchemaSnapshot, id_suffix: &str) -> CategoryMap {
    let mut categories = CategoryMap::new();
    let mut claimed: FxHashSet<QualifiedColumn> = FxHashSet::default();

    // BTreeMap iteration gives lexical table order on both loops, so the
    // first-match-wins claim is deterministic.
    for category_table in snapshot.table_names() {
        let category = format!("{category_table}{id_suffix}");
        let category_lower = category.to_lowercase();
        let mut matches = Vec::new();

        for table in snapshot.table_names() {
            let Some(columns) = snapshot.columns(table) else {
                continue;
            };
            for column in columns {
                let column_lower = column.to_lowercase();
                if !column_lower.ends_with(&category_lower) {
                    continue;
                }
                // A table's primary identifier does not reference itself
                if table == category_table && column_lower == category_lower {
                    continue;
                }
                let qualified = QualifiedColumn {
                    table: table.to_string(),
                    column: column.clone(),
                };
                if claimed.insert(qualified.clone()) {
                    matches.push(qualified);
                }
            }
        }

        if !matches.is_empty() {
            categories.insert(category, matches);
        }
    }

    categories
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::from_tables(vec![
            ("care_site", vec!["care_site_id", "place_of_service_concept_id"]),
            (
                "measurement",
                vec![
                    "measurement_id",
                    "person_id",
                    "associated_person_id",
                    "measurement_concept_id",
                ],
            ),
            ("person", vec!["person_id", "care_site_id"]),
        ])
    }

    #[test]
    fn excludes_a_tables_own_primary_identifier() {
        let categories = classify(&snapshot(), "_id");
        let person = &categories["person_id"];
        assert!(
            person
                .iter()
                .all(|q| !(q.table == "person" && q.column == "person_id"))
        );
        assert!(
            person
                .iter()
                .any(|q| q.table == "measurement" && q.column == "person_id")
        );
    }

    #[test]
    fn suffix_matching_catches_decorated_foreign_keys() {
        let categories = classify(&snapshot(), "_id");
        assert!(
            categories["person_id"]
                .iter()
                .any(|q| q.column == "associated_person_id")
        );
    }

    #[test]
    fn lexically_first_category_claims_ambiguous_columns() {
        // "care_site_id" in person matches only care_site here, but a
        // hypothetical "site" table would compete; the claim set keeps a
        // column out of every later category once assigned.
        let categories = classify(&snapshot(), "_id");
        assert!(
            categories["care_site_id"]
                .iter()
                .any(|q| q.table == "person" && q.column == "care_site_id")
        );
        let claimed_twice = categories
            .values()
            .flatten()
            .filter(|q| q.table == "person" && q.column == "care_site_id")
            .count();
        assert_eq!(claimed_twice, 1);
    }

    #[test]
    fn classification_is_idempotent() {
        let snapshot = snapshot();
        assert_eq!(classify(&snapshot, "_id"), classify(&snapshot, "_id"));
    }
}
