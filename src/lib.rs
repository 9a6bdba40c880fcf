//! A Rust library for assembling wide, per-person analysis tables out of a
//! relational OMOP CDM schema, with naming-convention relation inference,
//! vocabulary translation and disclosure control.

pub mod assemble;
pub mod config;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod reshape;
pub mod schema;
pub mod store;
pub mod translate;
pub mod utils;

// Re-export the most common types for easier use
// Core types
pub use assemble::{Assembler, GetTableOptions};
pub use config::AssemblyConfig;
pub use error::{AssemblerError, Result};
pub use graph::RelationGraph;
pub use schema::{SchemaSnapshot, TableDescriptor};

// Store capabilities
pub use store::{
    Connection, Dialect, DisclosurePolicy, FixedPolicy, MemoryConnection, SchemaGuard,
    SchemaStatements,
};

// Arrow types
pub use arrow::record_batch::RecordBatch;

// Fetching and reshaping building blocks
pub use fetch::{FetchOptions, fetch_table};
pub use reshape::{pivot_wide, sequence_duplicates, sort_by_date};
pub use translate::{normalize_label, translate_concepts};
