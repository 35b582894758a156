//! # pgstmt
//!
//! A small fluent helper for running SQL against PostgreSQL, either inside an
//! explicit transaction or directly on a shared connection.
//!
//! ## Features
//!
//! - **One builder, two modes**: [`Statement::begin`] opens a transaction,
//!   [`Statement::direct`] wraps a connection; both share the same operations
//! - **SQL explicit**: you write the SQL, positional `$n` arguments are bound in order
//! - **Finalize once**: after [`commit`] or [`rollback`] every clone of the
//!   statement rejects further work with [`OrmError::TransactionFinalized`]
//! - **Safe commit**: a failed commit is followed by one cleanup rollback and
//!   the commit error is returned
//! - **Cancellation**: every driver call honors an optional [`CancelContext`]
//!   (deadline and/or cancel signal)
//! - **Driver-agnostic core**: the statement only talks to the [`Connection`] /
//!   [`GenericClient`] traits, implemented for `tokio_postgres::Client` and
//!   (with `pool`) `deadpool_postgres::Client`
//!
//! ## Example
//!
//! ```ignore
//! use pgstmt::Statement;
//!
//! let mut tx = Statement::begin(&mut client).await?;
//! tx.text("UPDATE products SET name = $1 WHERE id = $2")
//!     .arguments(("shoes", 1_i32))
//!     .execute()
//!     .await?;
//! tx.commit().await?;
//!
//! let mut stmt = Statement::direct(&client);
//! let (name,): (String,) = stmt
//!     .text("SELECT name FROM products WHERE id = $1")
//!     .arguments((1_i32,))
//!     .fetch_one()
//!     .await?;
//! ```

pub mod args;
pub mod cancel;
pub mod client;
pub mod error;
pub mod prelude;
pub mod row;
pub mod statement;
pub mod transaction;

pub use args::{Argument, IntoArguments};
pub use cancel::{CancelContext, CancelHandle};
pub use client::{Connection, DbRow, GenericClient, PgRowCursor, RowCursor, TransactionClient};
pub use error::{OrmError, OrmResult};
pub use row::FromRow;
pub use statement::{Statement, commit, rollback};
pub use transaction::{PgTransaction, TransactionIsolation, TransactionOptions};

// Re-export tokio-postgres so callers can name `ToSql`/`FromSql` without a direct dependency.
pub use tokio_postgres;
