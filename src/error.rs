//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::ConnectionError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// SQL literal formatting met a value that is neither a number nor a
    /// string. Aborts the enclosing call.
    #[error("value {value} ({kind}) is not a number or string")]
    UnsupportedValue { value: String, kind: &'static str },

    #[error("table {0} does not exist, no create statement")]
    NoSuchTable(String),

    /// A query that must return a row came back empty or mis-shaped.
    #[error("statement returned no usable result: {0}")]
    UnexpectedResult(String),

    #[error("invalid constraint parameters: {0}")]
    InvalidConstraint(String),

    #[error("columns and values must be the same length to map to a row")]
    ColumnValueMismatch,

    /// The PostgreSQL swap failed after the triggers were dropped. The
    /// caller must reinstall triggers and retry; until then writes to the
    /// source are not mirrored.
    #[error("rename failed with triggers already dropped: {0}")]
    RenameFailed(#[source] ConnectionError),

    /// The MySQL rename retry loop ran out of attempts. Triggers have been
    /// reinstalled; the migration can be resumed later.
    #[error("rename abandoned after {attempts} attempts: {source}")]
    RenameRetriesExhausted {
        attempts: u32,
        #[source]
        source: ConnectionError,
    },
}
