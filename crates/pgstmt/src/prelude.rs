//! Convenient imports for typical `pgstmt` usage.
//!
//! ```ignore
//! use pgstmt::prelude::*;
//! ```

pub use crate::{
    CancelContext, DbRow, FromRow, OrmError, OrmResult, RowCursor, Statement, TransactionOptions,
    commit, rollback,
};
