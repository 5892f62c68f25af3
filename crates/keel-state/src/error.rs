//! Error types for the Keel state store.

use thiserror::Error;

use crate::tables::TableType;
use crate::types::RowId;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    /// Reading or writing rows failed inside redb.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to encode {table} row: {reason}")]
    Encode { table: TableType, reason: String },

    #[error("failed to decode {table} row {id}: {reason}")]
    Decode {
        table: TableType,
        id: RowId,
        reason: String,
    },

    #[error("{table} row {id} does not exist")]
    NotFound { table: TableType, id: RowId },

    /// A transaction touched a table it did not declare.
    #[error("no access to table {0}")]
    TableAccess(TableType),

    /// Raised by callers from inside a transaction closure to abort it.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}
