//! Error taxonomy for the replication engine. Every fallible operation in
//! `repl-source`/`repl-target`/`repl-engine` returns `Result<_, ReplError>`;
//! `anyhow::Error` is the escape hatch for contexts that don't fit a named
//! variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("configuration error in {option}: {detail}")]
    Configuration { option: String, detail: String },

    #[error("connectivity error: {detail}")]
    Connectivity { detail: String },

    #[error("schema drift on {table}.{column}")]
    SchemaDrift { table: String, column: String },

    #[error("column {column} has incompatible type {source_type}")]
    TypeIncompatibility {
        column: String,
        source_type: String,
    },

    #[error("value out of range for column {column}")]
    DataOutOfRange { column: String },

    #[error("batch insert into {table} failed: {detail}")]
    BatchInsertFailure { table: String, detail: String },

    #[error("table {table} failed: {source}")]
    TableFailure {
        table: String,
        #[source]
        source: Box<ReplError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReplError {
    /// Whether this failure is transient and worth the pipeline's retry
    /// loop, as opposed to something a retry cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReplError::Connectivity { .. })
    }

    /// Whether this failure is fatal to the whole run (as opposed to
    /// recoverable in place or scoped to a single table).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReplError::Configuration { .. } | ReplError::BatchInsertFailure { .. }
        )
    }
}

pub type ReplResult<T> = Result<T, ReplError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_is_retryable() {
        let err = ReplError::Connectivity {
            detail: "timeout".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn schema_drift_is_neither_fatal_nor_retryable() {
        let err = ReplError::SchemaDrift {
            table: "dbo.Orders".to_string(),
            column: "Notes".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn configuration_errors_are_fatal() {
        let err = ReplError::Configuration {
            option: "chunk_size".to_string(),
            detail: "must be positive".to_string(),
        };
        assert!(err.is_fatal());
    }
}
