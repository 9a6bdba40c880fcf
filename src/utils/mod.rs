//! Utility functions shared across the engine

pub mod arrow;

pub use arrow::{
    batch_from_columns, distinct_count, distinct_values, filter_record_batch, get_column,
    get_column_index, is_all_null, render_date, render_value, replace_column, string_array,
    take_optional, take_record_batch,
};
