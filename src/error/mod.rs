//! Error handling for the assembly engine.

use arrow::error::ArrowError;

/// Specialized error type for schema traversal and table assembly
#[derive(Debug, thiserror::Error)]
pub enum AssemblerError {
    /// A requested table or column does not exist, even after
    /// case-insensitive lookup
    #[error("Not found: {name}")]
    NotFound {
        /// The offending table or column name, verbatim
        name: String,
    },

    /// The resulting subset contains fewer distinct entities than the
    /// disclosure policy allows. The message states the threshold only;
    /// it never reveals the actual below-threshold count.
    #[error("Privacy violation: result contains fewer than {threshold} distinct entities")]
    PrivacyViolation {
        /// Minimum number of distinct entities required
        threshold: usize,
    },

    /// A column required for a downstream step (typically the reshape
    /// key) is absent from the table
    #[error("Missing dependency: required column '{column}' is absent")]
    MissingDependency {
        /// Name of the absent column
        column: String,
    },

    /// Error reported by the underlying store while executing a query
    /// or statement
    #[error("Store error: {0}")]
    Store(String),

    /// Error while building or transforming Arrow data
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl AssemblerError {
    /// Shorthand for a [`AssemblerError::NotFound`] error
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Shorthand for a [`AssemblerError::Store`] error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

/// Result type for assembly operations
pub type Result<T> = std::result::Result<T, AssemblerError>;
