//! Fluent statement builder over a connection or a transaction.
//!
//! A [`Statement`] is either bound to an open transaction (created with
//! [`Statement::begin`] and friends) or to a shared connection
//! ([`Statement::direct`]). Both modes expose the same builder and terminal
//! operations; only transaction statements can be finalized with [`commit`] or
//! [`rollback`].
//!
//! # Example
//!
//! ```ignore
//! use pgstmt::Statement;
//!
//! let mut tx = Statement::begin(&mut client).await?;
//!
//! tx.text("UPDATE products SET name = $1 WHERE id = $2")
//!     .arguments(("shoes", 1_i32))
//!     .execute()
//!     .await?;
//!
//! let (id,): (i64,) = tx
//!     .text("INSERT INTO products (name) VALUES ($1) RETURNING id")
//!     .arguments(("boots",))
//!     .insert_returning()
//!     .await?;
//!
//! pgstmt::commit(&tx).await?;
//! ```

use crate::args::{Argument, IntoArguments};
use crate::cancel::CancelContext;
use crate::client::{Connection, GenericClient, RowCursor, TransactionClient};
use crate::error::{OrmError, OrmResult};
use crate::row::FromRow;
use crate::transaction::TransactionOptions;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;

/// Transaction slot shared by every clone of a transaction statement.
///
/// `None` once the transaction has been committed or rolled back.
type TransactionSlot<T> = Arc<Mutex<Option<T>>>;

enum Mode<'a, C: Connection + 'a> {
    Transaction(TransactionSlot<C::Transaction<'a>>),
    Direct(&'a C),
}

/// A SQL command plus its positional arguments, bound to either an open
/// transaction or a shared connection.
///
/// Cloning a transaction statement shares the transaction: once any clone
/// commits or rolls back, every clone rejects further execution with
/// [`OrmError::TransactionFinalized`].
///
/// A statement is meant to be driven from one task at a time.
#[must_use]
pub struct Statement<'a, C: Connection + 'a> {
    text: String,
    arguments: Vec<Argument>,
    mode: Mode<'a, C>,
    context: CancelContext,
}

/// Resolve the client for the statement's mode and evaluate `$body` against it.
///
/// In transaction mode the slot stays locked for the whole body. A slot that is
/// already locked fails with [`OrmError::TransactionBusy`], a finalized
/// transaction with [`OrmError::TransactionFinalized`]. An interrupted body
/// marks the transaction aborted: the server may still be running, or have
/// failed, the statement it was cut off from.
macro_rules! with_client {
    ($this:ident, $client:ident => $body:expr) => {
        match &$this.mode {
            Mode::Transaction(slot) => {
                let guard = slot.try_lock().map_err(|_| OrmError::TransactionBusy)?;
                let $client = guard.as_ref().ok_or(OrmError::TransactionFinalized)?;
                let result = async { $body }.await;
                if let Err(e) = &result {
                    if e.is_timeout() || e.is_cancelled() {
                        $client.mark_aborted();
                    }
                }
                result
            }
            Mode::Direct(conn) => {
                let $client = *conn;
                $body
            }
        }
    };
}

impl<'a, C: Connection + 'a> Statement<'a, C> {
    // ── Construction ──

    /// Start a transaction on `conn` with default options.
    pub async fn begin(conn: &'a mut C) -> OrmResult<Self> {
        Self::begin_with_options_and_context(
            conn,
            TransactionOptions::default(),
            CancelContext::background(),
        )
        .await
    }

    /// Start a transaction on `conn` with the given options.
    pub async fn begin_with(conn: &'a mut C, options: TransactionOptions) -> OrmResult<Self> {
        Self::begin_with_options_and_context(conn, options, CancelContext::background()).await
    }

    /// Start a transaction whose begin and every later operation honor `context`.
    pub async fn begin_with_context(conn: &'a mut C, context: CancelContext) -> OrmResult<Self> {
        Self::begin_with_options_and_context(conn, TransactionOptions::default(), context).await
    }

    /// Start a transaction with explicit options and cancellation context.
    pub async fn begin_with_options_and_context(
        conn: &'a mut C,
        options: TransactionOptions,
        context: CancelContext,
    ) -> OrmResult<Self> {
        let cancel_token = conn.cancel_token();
        let tx = context.run(cancel_token, conn.begin(&options)).await?;

        Ok(Self {
            text: String::new(),
            arguments: Vec::new(),
            mode: Mode::Transaction(Arc::new(Mutex::new(Some(tx)))),
            context,
        })
    }

    /// Wrap a shared connection. Statements run outside any explicit transaction.
    pub fn direct(conn: &'a C) -> Self {
        Self::direct_with_context(conn, CancelContext::background())
    }

    /// Wrap a shared connection; every operation honors `context`.
    pub fn direct_with_context(conn: &'a C, context: CancelContext) -> Self {
        Self {
            text: String::new(),
            arguments: Vec::new(),
            mode: Mode::Direct(conn),
            context,
        }
    }

    // ── Composition ──

    /// Replace the SQL text.
    pub fn text(&mut self, sql: impl Into<String>) -> &mut Self {
        self.text = sql.into();
        self
    }

    /// Replace all positional arguments.
    pub fn arguments(&mut self, values: impl IntoArguments) -> &mut Self {
        self.arguments = values.into_arguments();
        self
    }

    /// Append one positional argument.
    pub fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> &mut Self {
        self.arguments.push(Arc::new(value));
        self
    }

    // ── Inspection ──

    /// The current SQL text.
    pub fn sql(&self) -> &str {
        &self.text
    }

    /// Number of positional arguments currently bound.
    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    /// Whether this statement runs inside a transaction.
    pub fn is_transaction(&self) -> bool {
        matches!(self.mode, Mode::Transaction(_))
    }

    /// Whether the transaction behind this statement has been committed or rolled back.
    ///
    /// Always `false` for direct statements, and for a transaction that another
    /// operation is currently using.
    pub fn is_consumed(&self) -> bool {
        match &self.mode {
            Mode::Transaction(slot) => slot.try_lock().is_ok_and(|tx| tx.is_none()),
            Mode::Direct(_) => false,
        }
    }

    /// The cancellation context every operation runs under.
    pub fn context(&self) -> &CancelContext {
        &self.context
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.arguments.iter().map(|p| p.as_ref() as _).collect()
    }

    fn require_text(&self) -> OrmResult<()> {
        if self.text.is_empty() {
            return Err(OrmError::EmptyQuery);
        }
        Ok(())
    }

    // ── Terminal operations ──

    /// Run the statement as a command and return the number of affected rows.
    ///
    /// Empty text is passed straight to the driver.
    pub async fn execute(&self) -> OrmResult<u64> {
        let params = self.params();
        with_client!(self, client => {
            self.context
                .run(client.cancel_token(), client.execute(&self.text, &params))
                .await
        })
    }

    /// Run the statement as a query and hand the open cursor to `callback`.
    ///
    /// `callback` is invoked exactly once. The cursor is closed after it returns,
    /// whatever it did with the cursor. The callback's return value is passed
    /// through untouched; the error side of the result only reports query,
    /// cancellation and close failures.
    ///
    /// ```ignore
    /// let ids = stmt
    ///     .text("SELECT id FROM products")
    ///     .execute_with_rows(async |rows| {
    ///         let mut ids = Vec::new();
    ///         while let Ok(Some(row)) = rows.next().await {
    ///             ids.push(row.try_get::<i32>(0));
    ///         }
    ///         ids
    ///     })
    ///     .await?;
    /// ```
    pub async fn execute_with_rows<F, T>(&self, callback: F) -> OrmResult<T>
    where
        F: AsyncFnOnce(&mut C::Cursor) -> T,
    {
        self.require_text()?;
        let params = self.params();
        with_client!(self, client => {
            let cancel_token = client.cancel_token();
            let mut cursor = self
                .context
                .run(cancel_token.clone(), client.query(&self.text, &params))
                .await?;

            let outcome = self
                .context
                .run(cancel_token, async { Ok(callback(&mut cursor).await) })
                .await;
            let closed = cursor.close().await;

            let value = outcome?;
            closed?;
            Ok::<T, OrmError>(value)
        })
    }

    /// Run the statement as a query and map its first row into `T`.
    ///
    /// Fails with [`OrmError::NotFound`] when the query yields no rows and with
    /// [`OrmError::ColumnCount`] when the row width does not match `T`.
    pub async fn fetch_one<T: FromRow>(&self) -> OrmResult<T> {
        self.require_text()?;
        let params = self.params();
        with_client!(self, client => {
            let row = self
                .context
                .run(client.cancel_token(), client.query_first(&self.text, &params))
                .await?
                .ok_or_else(|| OrmError::not_found("Expected one row, got none"))?;
            T::from_row(&row)
        })
    }

    /// Like [`fetch_one`](Self::fetch_one), writing into `dest` only on success.
    pub async fn fetch_one_into<T: FromRow>(&self, dest: &mut T) -> OrmResult<()> {
        *dest = self.fetch_one().await?;
        Ok(())
    }

    /// Run an insert that returns nothing. Same semantics as [`execute`](Self::execute),
    /// except that empty text is rejected.
    pub async fn insert(&self) -> OrmResult<u64> {
        self.require_text()?;
        self.execute().await
    }

    /// Run an insert that yields one row, typically through `RETURNING id`.
    pub async fn insert_returning<T: FromRow>(&self) -> OrmResult<T> {
        self.fetch_one().await
    }

    /// Like [`insert_returning`](Self::insert_returning), writing into `dest` only on success.
    pub async fn insert_returning_into<T: FromRow>(&self, dest: &mut T) -> OrmResult<()> {
        self.fetch_one_into(dest).await
    }

    // ── Finalization ──

    /// Commit the transaction. See [`commit`].
    pub async fn commit(&self) -> OrmResult<()> {
        commit(self).await
    }

    /// Roll the transaction back. See [`rollback`].
    pub async fn rollback(&self) -> OrmResult<()> {
        rollback(self).await
    }
}

/// Commit the transaction behind `statement`.
///
/// If the commit fails, one rollback is attempted as cleanup. Its outcome is
/// discarded and the commit error is returned. A transaction in which a
/// statement already failed is not committed at all: it is rolled back and
/// [`OrmError::TransactionAborted`] is returned. The transaction counts as
/// finalized afterwards either way.
///
/// Fails with [`OrmError::NotATransaction`] for direct statements and with
/// [`OrmError::TransactionFinalized`] if the transaction was already finalized.
pub async fn commit<'a, C: Connection + 'a>(statement: &Statement<'a, C>) -> OrmResult<()> {
    let Mode::Transaction(slot) = &statement.mode else {
        return Err(OrmError::NotATransaction("commit"));
    };

    let mut tx = take_transaction(slot)?;

    let result = if tx.is_aborted() {
        Err(OrmError::TransactionAborted)
    } else {
        statement
            .context
            .run(tx.cancel_token(), tx.commit())
            .await
    };

    match result {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(target: "pgstmt.sql", "transaction committed");
            Ok(())
        }
        Err(err) => {
            let _ = tx.rollback().await;
            #[cfg(feature = "tracing")]
            tracing::debug!(target: "pgstmt.sql", error = %err, "commit failed, rolled back");
            Err(err)
        }
    }
}

/// Roll back the transaction behind `statement`.
///
/// Rollback ignores the statement's [`CancelContext`], so a transaction whose
/// context was cancelled or timed out can still be cleaned up. The driver's
/// error, if any, is returned as is. The transaction counts as finalized
/// afterwards either way.
pub async fn rollback<'a, C: Connection + 'a>(statement: &Statement<'a, C>) -> OrmResult<()> {
    let Mode::Transaction(slot) = &statement.mode else {
        return Err(OrmError::NotATransaction("rollback"));
    };

    let mut tx = take_transaction(slot)?;

    tx.rollback().await?;

    #[cfg(feature = "tracing")]
    tracing::debug!(target: "pgstmt.sql", "transaction rolled back");
    Ok(())
}

fn take_transaction<T>(slot: &TransactionSlot<T>) -> OrmResult<T> {
    slot.try_lock()
        .map_err(|_| OrmError::TransactionBusy)?
        .take()
        .ok_or(OrmError::TransactionFinalized)
}

impl<'a, C: Connection + 'a> Clone for Statement<'a, C> {
    fn clone(&self) -> Self {
        let mode = match &self.mode {
            Mode::Transaction(slot) => Mode::Transaction(Arc::clone(slot)),
            Mode::Direct(conn) => Mode::Direct(*conn),
        };
        Self {
            text: self.text.clone(),
            arguments: self.arguments.clone(),
            mode,
            context: self.context.clone(),
        }
    }
}

impl<'a, C: Connection + 'a> std::fmt::Debug for Statement<'a, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            Mode::Transaction(_) => "Transaction",
            Mode::Direct(_) => "Direct",
        };
        f.debug_struct("Statement")
            .field("mode", &mode)
            .field("text", &self.text)
            .field("arguments", &self.arguments)
            .field("context", &self.context)
            .finish()
    }
}
