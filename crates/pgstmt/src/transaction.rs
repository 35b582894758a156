//! Transaction options and the PostgreSQL transaction handle.
//!
//! [`PgTransaction`] wraps a `tokio_postgres::Transaction` started with the
//! given [`TransactionOptions`] and tracks whether a statement inside it failed.
//!
//! # Example
//!
//! ```ignore
//! use pgstmt::{Statement, TransactionIsolation, TransactionOptions};
//!
//! let opts = TransactionOptions::new()
//!     .isolation_level(TransactionIsolation::Serializable)
//!     .read_only(true);
//! let tx = Statement::begin_with(&mut client, opts).await?;
//! ```

use crate::client::{GenericClient, PgRowCursor, TransactionClient};
use crate::error::{OrmError, OrmResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::types::ToSql;
use tokio_postgres::{IsolationLevel, Row, TransactionBuilder};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionIsolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TransactionIsolation {
    /// SQL keyword form, e.g. `REPEATABLE READ`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl From<TransactionIsolation> for IsolationLevel {
    fn from(level: TransactionIsolation) -> Self {
        match level {
            TransactionIsolation::ReadUncommitted => IsolationLevel::ReadUncommitted,
            TransactionIsolation::ReadCommitted => IsolationLevel::ReadCommitted,
            TransactionIsolation::RepeatableRead => IsolationLevel::RepeatableRead,
            TransactionIsolation::Serializable => IsolationLevel::Serializable,
        }
    }
}

/// Options applied when a transaction begins.
///
/// The default is a plain `BEGIN`: server-default isolation, read-write, not deferrable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Isolation level. `None` keeps the server default.
    pub isolation_level: Option<TransactionIsolation>,
    /// `Some(true)` for `READ ONLY`, `Some(false)` for `READ WRITE`.
    pub read_only: Option<bool>,
    /// `Some(true)` for `DEFERRABLE`, `Some(false)` for `NOT DEFERRABLE`.
    pub deferrable: Option<bool>,
}

impl TransactionOptions {
    /// Create options with defaults (plain `BEGIN`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    pub fn isolation_level(mut self, level: TransactionIsolation) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Set the access mode.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Set the deferrable mode. Only meaningful for serializable read-only transactions.
    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = Some(deferrable);
        self
    }

    /// Apply these options to a driver transaction builder.
    pub(crate) fn configure<'a>(
        &self,
        mut builder: TransactionBuilder<'a>,
    ) -> TransactionBuilder<'a> {
        if let Some(level) = self.isolation_level {
            builder = builder.isolation_level(level.into());
        }
        if let Some(read_only) = self.read_only {
            builder = builder.read_only(read_only);
        }
        if let Some(deferrable) = self.deferrable {
            builder = builder.deferrable(deferrable);
        }
        builder
    }

    /// Render the `BEGIN` command for these options.
    pub fn begin_sql(&self) -> String {
        let mut modes: Vec<String> = Vec::new();
        if let Some(level) = self.isolation_level {
            modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        match self.read_only {
            Some(true) => modes.push("READ ONLY".to_string()),
            Some(false) => modes.push("READ WRITE".to_string()),
            None => {}
        }
        match self.deferrable {
            Some(true) => modes.push("DEFERRABLE".to_string()),
            Some(false) => modes.push("NOT DEFERRABLE".to_string()),
            None => {}
        }

        if modes.is_empty() {
            "BEGIN".to_string()
        } else {
            format!("BEGIN {}", modes.join(", "))
        }
    }
}

/// An open transaction on a `tokio_postgres::Client`.
///
/// Wraps a `tokio_postgres::Transaction`, so dropping the handle without
/// [`commit`](TransactionClient::commit) or [`rollback`](TransactionClient::rollback)
/// rolls the transaction back and leaves the connection usable.
///
/// Any server error raised by a statement inside the transaction marks it
/// aborted; [`commit`](TransactionClient::commit) then fails with
/// [`OrmError::TransactionAborted`] instead of letting the server turn the
/// `COMMIT` into a silent rollback.
pub struct PgTransaction<'a> {
    inner: Option<tokio_postgres::Transaction<'a>>,
    aborted: Arc<AtomicBool>,
}

impl<'a> PgTransaction<'a> {
    pub(crate) async fn begin(
        client: &'a mut tokio_postgres::Client,
        options: &TransactionOptions,
    ) -> OrmResult<PgTransaction<'a>> {
        let tx = options
            .configure(client.build_transaction())
            .start()
            .await
            .map_err(OrmError::Query)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            target: "pgstmt.sql",
            command = %options.begin_sql(),
            "transaction started"
        );

        Ok(Self {
            inner: Some(tx),
            aborted: Arc::new(AtomicBool::new(false)),
        })
    }

    fn open(&self) -> OrmResult<&tokio_postgres::Transaction<'a>> {
        self.inner.as_ref().ok_or(OrmError::TransactionFinalized)
    }

    fn record(&self, err: tokio_postgres::Error) -> OrmError {
        if err.as_db_error().is_some() {
            self.aborted.store(true, Ordering::SeqCst);
        }
        OrmError::Query(err)
    }
}

impl GenericClient for PgTransaction<'_> {
    type Row = Row;
    type Cursor = PgRowCursor;

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        let tx = self.open()?;
        tx.execute(sql, params).await.map_err(|e| self.record(e))
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<PgRowCursor> {
        let tx = self.open()?;
        let stream = tx
            .query_raw(sql, params.iter().copied())
            .await
            .map_err(|e| self.record(e))?;
        Ok(PgRowCursor::in_transaction(stream, Arc::clone(&self.aborted)))
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        self.inner.as_ref().map(|tx| tx.cancel_token())
    }
}

impl TransactionClient for PgTransaction<'_> {
    async fn commit(&mut self) -> OrmResult<()> {
        if self.is_aborted() {
            // Leave the transaction open so the caller's rollback reaches the server.
            return Err(OrmError::TransactionAborted);
        }
        let tx = self.inner.take().ok_or(OrmError::TransactionFinalized)?;
        tx.commit().await.map_err(OrmError::Query)
    }

    /// Roll the transaction back.
    ///
    /// After a failed `COMMIT` the server has already ended the transaction and
    /// there is nothing left to roll back, so this returns `Ok(())`.
    async fn rollback(&mut self) -> OrmResult<()> {
        match self.inner.take() {
            Some(tx) => tx.rollback().await.map_err(OrmError::Query),
            None => Ok(()),
        }
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn mark_aborted(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

impl Drop for PgTransaction<'_> {
    fn drop(&mut self) {
        // The inner transaction sends ROLLBACK when it is dropped.
        if self.inner.is_some() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                target: "pgstmt.sql",
                "transaction dropped without commit or rollback; rolling back"
            );
        }
    }
}
