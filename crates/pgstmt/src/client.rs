//! Driver boundary traits for statement execution.
//!
//! [`Statement`](crate::Statement) never talks to `tokio-postgres` directly. It
//! goes through [`GenericClient`] (execute/query on either a connection or a
//! transaction), [`TransactionClient`] (commit/rollback), [`Connection`]
//! (begin) and [`RowCursor`] / [`DbRow`] (lazy row access). Implementations are
//! provided for `tokio_postgres::Client` and, with the `pool` feature,
//! `deadpool_postgres::Client`.

use crate::error::{OrmError, OrmResult};
use crate::transaction::{PgTransaction, TransactionOptions};
use futures_util::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::Row;
use tokio_postgres::types::{FromSqlOwned, ToSql};

/// A single result row.
pub trait DbRow: Send {
    /// Number of columns in the row.
    fn len(&self) -> usize;

    /// Whether the row has no columns.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the column at `idx`, if it exists.
    fn column_name(&self, idx: usize) -> Option<&str>;

    /// Decode the column at `idx`.
    fn try_get<T: FromSqlOwned>(&self, idx: usize) -> OrmResult<T>;
}

/// A lazy, forward-only sequence of rows.
///
/// A cursor must be [closed](RowCursor::close) once the caller is done with it.
/// Dropping it without closing releases the underlying stream but skips any
/// driver-side completion checks.
pub trait RowCursor: Send + Sized {
    type Row: DbRow;

    /// Advance to the next row. Returns `Ok(None)` once the result set is exhausted.
    fn next(&mut self) -> impl std::future::Future<Output = OrmResult<Option<Self::Row>>> + Send;

    /// Release the cursor.
    fn close(self) -> impl std::future::Future<Output = OrmResult<()>> + Send;
}

/// A trait that unifies database connections and transactions.
///
/// Everything a [`Statement`](crate::Statement) needs from the handle it runs
/// against, regardless of whether that handle is a shared connection or an open
/// transaction.
pub trait GenericClient: Send + Sync {
    type Row: DbRow;
    type Cursor: RowCursor<Row = Self::Row>;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<u64>> + Send;

    /// Execute a query and return a cursor over its rows.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<Self::Cursor>> + Send;

    /// Execute a query and return the **first** row, if any.
    ///
    /// Semantics:
    /// - 0 rows: returns `Ok(None)`
    /// - 1 or more rows: returns `Ok(Some(first_row))` (does **not** error)
    ///
    /// The cursor is closed before returning, on success and on failure.
    fn query_first(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = OrmResult<Option<Self::Row>>> + Send {
        async move {
            let mut cursor = self.query(sql, params).await?;
            let first = cursor.next().await;
            let closed = cursor.close().await;
            let first = first?;
            closed?;
            Ok(first)
        }
    }

    /// Return a cancellation token for the underlying connection, if supported.
    ///
    /// Used to send a best-effort server-side cancel when a
    /// [`CancelContext`](crate::CancelContext) aborts an in-flight call.
    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        None
    }
}

/// A client bound to one open transaction.
pub trait TransactionClient: GenericClient {
    /// Commit the transaction.
    fn commit(&mut self) -> impl std::future::Future<Output = OrmResult<()>> + Send;

    /// Roll the transaction back.
    fn rollback(&mut self) -> impl std::future::Future<Output = OrmResult<()>> + Send;

    /// Whether a statement inside the transaction failed on the server.
    ///
    /// PostgreSQL answers `COMMIT` on such a transaction by rolling it back
    /// without reporting an error, so callers check this before committing.
    fn is_aborted(&self) -> bool {
        false
    }

    /// Record that the transaction can no longer be committed, e.g. because a
    /// statement was interrupted while the server was still running it.
    fn mark_aborted(&self) {}
}

/// A connection that can start transactions.
///
/// Beginning a transaction borrows the connection mutably for the lifetime of
/// the transaction, so no direct statement can slip in between `BEGIN` and
/// `COMMIT` on the same connection.
pub trait Connection: GenericClient {
    type Transaction<'t>: TransactionClient<Row = Self::Row, Cursor = Self::Cursor>
    where
        Self: 't;

    /// Start a transaction with the given options.
    fn begin(
        &mut self,
        options: &TransactionOptions,
    ) -> impl std::future::Future<Output = OrmResult<Self::Transaction<'_>>> + Send;
}

// ===== tokio-postgres =====

impl DbRow for Row {
    fn len(&self) -> usize {
        Row::len(self)
    }

    fn column_name(&self, idx: usize) -> Option<&str> {
        self.columns().get(idx).map(|c| c.name())
    }

    fn try_get<T: FromSqlOwned>(&self, idx: usize) -> OrmResult<T> {
        Row::try_get(self, idx).map_err(|e| {
            let column = DbRow::column_name(self, idx)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{idx}"));
            OrmError::decode(column, e.to_string())
        })
    }
}

/// Row cursor over a `tokio_postgres::RowStream`.
#[must_use]
pub struct PgRowCursor {
    stream: Pin<Box<tokio_postgres::RowStream>>,
    aborted: Option<Arc<AtomicBool>>,
}

impl PgRowCursor {
    pub(crate) fn new(stream: tokio_postgres::RowStream) -> Self {
        Self {
            stream: Box::pin(stream),
            aborted: None,
        }
    }

    /// A cursor that raises `aborted` when the server reports an error mid-stream.
    pub(crate) fn in_transaction(
        stream: tokio_postgres::RowStream,
        aborted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stream: Box::pin(stream),
            aborted: Some(aborted),
        }
    }

    /// Number of rows affected by the statement, available once the stream is exhausted.
    pub fn rows_affected(&self) -> Option<u64> {
        self.stream.rows_affected()
    }
}

impl RowCursor for PgRowCursor {
    type Row = Row;

    async fn next(&mut self) -> OrmResult<Option<Row>> {
        match self.stream.next().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => {
                if let (Some(flag), Some(_)) = (&self.aborted, e.as_db_error()) {
                    flag.store(true, Ordering::SeqCst);
                }
                Err(OrmError::Query(e))
            }
            None => Ok(None),
        }
    }

    async fn close(self) -> OrmResult<()> {
        // tokio-postgres discards the remaining messages of a dropped stream.
        drop(self.stream);
        Ok(())
    }
}

impl GenericClient for tokio_postgres::Client {
    type Row = Row;
    type Cursor = PgRowCursor;

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        tokio_postgres::Client::execute(self, sql, params)
            .await
            .map_err(OrmError::Query)
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<PgRowCursor> {
        let stream = tokio_postgres::Client::query_raw(self, sql, params.iter().copied())
            .await
            .map_err(OrmError::Query)?;
        Ok(PgRowCursor::new(stream))
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Client::cancel_token(self))
    }
}

impl Connection for tokio_postgres::Client {
    type Transaction<'t> = PgTransaction<'t>;

    async fn begin(&mut self, options: &TransactionOptions) -> OrmResult<PgTransaction<'_>> {
        PgTransaction::begin(self, options).await
    }
}

// ===== deadpool-postgres support =====

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Client {
    type Row = Row;
    type Cursor = PgRowCursor;

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        // Delegate to the deref target (ClientWrapper / tokio_postgres::Client).
        let client: &tokio_postgres::Client = self;
        GenericClient::execute(client, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<PgRowCursor> {
        let client: &tokio_postgres::Client = self;
        GenericClient::query(client, sql, params).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        let client: &tokio_postgres::Client = self;
        GenericClient::cancel_token(client)
    }
}

#[cfg(feature = "pool")]
impl Connection for deadpool_postgres::Client {
    type Transaction<'t> = PgTransaction<'t>;

    async fn begin(&mut self, options: &TransactionOptions) -> OrmResult<PgTransaction<'_>> {
        let client: &mut tokio_postgres::Client = self;
        PgTransaction::begin(client, options).await
    }
}
