//! Error types for pgstmt

use std::time::Duration;
use thiserror::Error;
use tokio_postgres::error::{DbError, SqlState};

/// Result type alias for pgstmt operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for statement execution.
///
/// Variants fall into two groups. Usage errors ([`OrmError::EmptyQuery`],
/// [`OrmError::TransactionFinalized`], [`OrmError::NotATransaction`],
/// [`OrmError::TransactionBusy`]) are raised before the driver is touched and
/// never wrap a driver error. Everything else comes from the driver, a row
/// decode, or the cancellation context.
///
/// Driver errors are kept as they are in [`OrmError::Query`]; use the `is_*`
/// predicates or [`OrmError::db_error`] to inspect them.
#[derive(Debug, Error)]
pub enum OrmError {
    /// A terminal operation that needs SQL text was called without any
    #[error("you need to define a query")]
    EmptyQuery,

    /// The transaction was already committed or rolled back
    #[error("transaction is already committed, you have to start a new transaction")]
    TransactionFinalized,

    /// Commit/rollback called on a direct (non-transaction) statement
    #[error("could not {0} because the statement is not a transaction, it is a direct query")]
    NotATransaction(&'static str),

    /// Another operation on the same transaction is still running, e.g. a
    /// clone used from inside an `execute_with_rows` callback
    #[error("transaction is in use by another operation on the same transaction")]
    TransactionBusy,

    /// An earlier statement failed on the server, so the transaction can only
    /// be rolled back
    #[error("could not commit: an earlier statement failed and the transaction was rolled back")]
    TransactionAborted,

    /// Query execution error, as reported by the driver
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row width does not match the destination
    #[error("Column count mismatch: expected {expected} destination(s), row has {got} column(s)")]
    ColumnCount { expected: usize, got: usize },

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// The context deadline elapsed before the operation finished
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// The context was cancelled through its [`CancelHandle`](crate::CancelHandle)
    #[error("Query cancelled")]
    Cancelled,

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Whether this error reports caller misuse rather than a database failure.
    ///
    /// Usage errors are returned before any driver call and are never worth retrying.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyQuery
                | Self::TransactionFinalized
                | Self::NotATransaction(_)
                | Self::TransactionBusy
        )
    }

    /// The server-side error behind a [`OrmError::Query`], if there is one.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::Query(err) => err.as_db_error(),
            _ => None,
        }
    }

    /// SQLSTATE of the server-side error, if there is one.
    pub fn sql_state(&self) -> Option<&SqlState> {
        self.db_error().map(DbError::code)
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        self.sql_state() == Some(&SqlState::UNIQUE_VIOLATION)
    }

    /// Check if this is a foreign key violation error
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sql_state() == Some(&SqlState::FOREIGN_KEY_VIOLATION)
    }

    /// Check if this is a check constraint violation error
    pub fn is_check_violation(&self) -> bool {
        self.sql_state() == Some(&SqlState::CHECK_VIOLATION)
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this is a cancellation error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
