//! Error types for the import pipeline.
//!
//! Data-shape problems (bad rows, unknown tables, unsupported statements) are
//! never errors: they are counted in the [`ConversionContext`] and the run
//! continues. Only the conditions below stop a pass.
//!
//! [`ConversionContext`]: crate::context::ConversionContext

use thiserror::Error;

/// Failure reported by a target store or schema applier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Worth retrying: timeouts, aborted transactions, unavailable backends.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// Retrying will not help: constraint violations, missing tables, bad DDL.
    #[error("store failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Fatal errors that abort an import pass.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The trailing chunk never parsed, even after every repair was tried.
    #[error("error parsing last {lines} line(s) of input (starting at line {line}, byte offset {offset})")]
    UnparsedTail { lines: usize, line: u64, offset: u64 },

    #[error("schema application failed: {0}")]
    SchemaApply(#[source] StoreError),

    #[error("flush of {rows} row(s) failed after {attempts} attempt(s): {source}")]
    Flush {
        rows: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("import cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown dialect: {0}. Valid options: mysql, postgres")]
    UnknownDialect(String),
}

impl ImportError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ImportError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;
