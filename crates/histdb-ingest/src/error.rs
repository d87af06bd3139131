//! Error types for the ingestion engine

use crate::row::Table;
use thiserror::Error;

/// Result type alias for writer operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Failures surfaced by the batch writer
///
/// Store-facing failures carry the table or operation they occurred on;
/// retry policy belongs to the caller, not to the writer.
#[derive(Error, Debug)]
pub enum IngestError {
    /// A details payload could not be serialized. The emitter call fails
    /// before anything is buffered.
    #[error("details payload could not be serialized: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Account or asset lookup/creation failed. Flush aborts with the
    /// transaction left open for the caller to roll back.
    #[error("{context}: {source}")]
    Resolution {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// An address survived resolution without a mapping. Indicates a bug
    /// in the resolution protocol rather than a store failure.
    #[error("no account id resolved for address {0}")]
    UnresolvedAddress(String),

    /// A table's batched insert failed
    #[error("error inserting into {table}: {source}")]
    Statement {
        table: Table,
        #[source]
        source: sqlx::Error,
    },

    /// A range delete failed
    #[error("error clearing {table}: {source}")]
    Clear {
        table: Table,
        #[source]
        source: sqlx::Error,
    },

    /// A table was requested that has no registered insert statement.
    /// This is a programming error, not a recoverable runtime condition,
    /// but it is reported instead of panicking so callers and tests can
    /// observe it.
    #[error("{0} insert builder does not exist")]
    ConfigurationFault(Table),

    /// An emitter or flush was invoked before `start()`
    #[error("no open transaction; call start() first")]
    NotStarted,

    /// Any other store failure (begin/commit/rollback and the like)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    pub(crate) fn resolution(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Resolution {
            context: context.into(),
            source,
        }
    }
}
