mod common;

use cdm_assembler::error::AssemblerError;
use cdm_assembler::fetch::{FetchOptions, fetch_table};
use cdm_assembler::{AssemblyConfig, FixedPolicy, SchemaSnapshot};
use common::{batch, cdm_connection, column, column_names, int_col, str_col};

/// Table names resolve case-insensitively; unknown tables fail verbatim
#[test]
fn table_resolution_is_case_insensitive() {
    let conn = cdm_connection();
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    let config = AssemblyConfig::default();
    let policy = FixedPolicy(1);

    let fetched = fetch_table(
        &conn,
        &snapshot,
        &config,
        &policy,
        "PERSON",
        &FetchOptions::default(),
    )
    .unwrap();
    assert_eq!(fetched.num_rows(), 3);

    let err = fetch_table(
        &conn,
        &snapshot,
        &config,
        &policy,
        "no_such_table",
        &FetchOptions::default(),
    )
    .unwrap_err();
    match err {
        AssemblerError::NotFound { name } => assert_eq!(name, "no_such_table"),
        other => panic!("expected NotFound, got {other}"),
    }
}

/// Raw source-system columns never appear in the default projection
#[test]
fn source_value_columns_are_excluded() {
    let conn = cdm_connection();
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    let fetched = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(1),
        "person",
        &FetchOptions::default(),
    )
    .unwrap();
    assert!(!column_names(&fetched).contains(&"person_source_value".to_string()));
}

/// An explicit column filter keeps the structural columns regardless
#[test]
fn column_filter_retains_structural_columns() {
    let conn = cdm_connection();
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    let opts = FetchOptions {
        columns: Some(vec!["value_as_number".to_string()]),
        ..FetchOptions::default()
    };
    let fetched = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(1),
        "measurement",
        &opts,
    )
    .unwrap();
    let names = column_names(&fetched);
    assert!(names.contains(&"person_id".to_string()));
    assert!(names.contains(&"measurement_concept_id".to_string()));
    assert!(names.contains(&"value_as_number".to_string()));
    assert!(!names.contains(&"measurement_date".to_string()));
}

/// Concept and person filters narrow rows at the query level
#[test]
fn concept_and_person_filters_narrow_rows() {
    let conn = cdm_connection();
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    let opts = FetchOptions {
        concepts: Some(vec!["3004501".to_string()]),
        persons: Some(vec!["1".to_string()]),
        ..FetchOptions::default()
    };
    let fetched = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(1),
        "measurement",
        &opts,
    )
    .unwrap();
    assert_eq!(fetched.num_rows(), 2);
    assert_eq!(
        column(&fetched, "person_id"),
        vec![Some("1".to_string()), Some("1".to_string())]
    );
}

/// Filters referencing columns the table lacks are silently ignored
#[test]
fn inapplicable_filters_are_ignored() {
    let conn = cdm_connection();
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    let opts = FetchOptions {
        concepts: Some(vec!["3004501".to_string()]),
        persons: Some(vec!["1".to_string()]),
        ..FetchOptions::default()
    };
    // The gender lookup has neither a person_id nor a concept column
    let fetched = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(5),
        "gender",
        &opts,
    )
    .unwrap();
    assert_eq!(fetched.num_rows(), 2);
}

/// A table whose every column carries a source marker projects to nothing,
/// never to `SELECT *`
#[test]
fn source_only_tables_yield_no_columns() {
    let conn = cdm_connection();
    conn.add_table(
        "note",
        batch(vec![("note_source_value", str_col(vec![Some("free text")]))]),
    );
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    let fetched = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(1),
        "note",
        &FetchOptions::default(),
    )
    .unwrap();
    assert_eq!(fetched.num_columns(), 0);
    assert!(!column_names(&fetched).contains(&"note_source_value".to_string()));

    // Same when an explicit filter resolves to no known column on a table
    // without structural columns
    let opts = FetchOptions {
        columns: Some(vec!["bogus".to_string()]),
        ..FetchOptions::default()
    };
    let fetched = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(1),
        "gender",
        &opts,
    )
    .unwrap();
    assert_eq!(fetched.num_columns(), 0);
}

/// A concept below the threshold is dropped, the rest of the table survives
#[test]
fn below_threshold_concepts_are_dropped_not_fatal() {
    let conn = cdm_connection();
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    // glucose covers persons {1, 2}; body weight covers only person {3}
    let fetched = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(2),
        "measurement",
        &FetchOptions::default(),
    )
    .unwrap();
    let concepts = column(&fetched, "measurement_concept_id");
    assert!(concepts.iter().all(|c| c.as_deref() == Some("3004501")));
    assert_eq!(fetched.num_rows(), 3);
}

/// Dropping every concept empties the table, which is a privacy violation
#[test]
fn emptied_table_is_a_privacy_violation() {
    let conn = cdm_connection();
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    let err = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(3),
        "measurement",
        &FetchOptions::default(),
    )
    .unwrap_err();
    match err {
        AssemblerError::PrivacyViolation { threshold } => {
            assert_eq!(threshold, 3);
        }
        other => panic!("expected PrivacyViolation, got {other}"),
    }
}

/// Without a concept column the whole table must cover the threshold
#[test]
fn overall_entity_count_is_enforced() {
    let conn = cdm_connection();
    conn.add_table(
        "death",
        batch(vec![
            ("death_id", int_col(vec![Some(1), Some(2)])),
            ("person_id", int_col(vec![Some(1), Some(1)])),
        ]),
    );
    let snapshot = SchemaSnapshot::load(&conn).unwrap();
    let err = fetch_table(
        &conn,
        &snapshot,
        &AssemblyConfig::default(),
        &FixedPolicy(2),
        "death",
        &FetchOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AssemblerError::PrivacyViolation { threshold: 2 }));
}

/// The privacy error message names the threshold and nothing else
#[test]
fn privacy_error_states_threshold_only() {
    let err = AssemblerError::PrivacyViolation { threshold: 5 };
    let message = err.to_string();
    assert!(message.contains('5'));
    assert!(!message.to_lowercase().contains("actual"));
}
