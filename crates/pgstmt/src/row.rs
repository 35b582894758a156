//! Row mapping traits and utilities

use crate::client::DbRow;
use crate::error::{OrmError, OrmResult};
use tokio_postgres::types::FromSqlOwned;

/// Trait for mapping a result row into a destination value.
///
/// Implemented for tuples of up to eight `FromSql` types, which bind the row's
/// columns in order and require the row to be exactly as wide as the tuple.
///
/// # Example
///
/// ```ignore
/// use pgstmt::{DbRow, FromRow, OrmResult};
///
/// struct Product {
///     id: i64,
///     name: String,
/// }
///
/// impl FromRow for Product {
///     fn from_row<R: DbRow>(row: &R) -> OrmResult<Self> {
///         pgstmt::row::expect_columns(row, 2)?;
///         Ok(Product {
///             id: row.try_get(0)?,
///             name: row.try_get(1)?,
///         })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    /// Construct an instance from a row.
    fn from_row<R: DbRow>(row: &R) -> OrmResult<Self>;
}

/// Fail with [`OrmError::ColumnCount`] unless `row` has exactly `expected` columns.
pub fn expect_columns<R: DbRow>(row: &R, expected: usize) -> OrmResult<()> {
    let got = row.len();
    if got != expected {
        return Err(OrmError::ColumnCount { expected, got });
    }
    Ok(())
}

macro_rules! impl_from_row_tuple {
    ($len:expr => $($idx:tt $ty:ident),+) => {
        impl<$($ty: FromSqlOwned),+> FromRow for ($($ty,)+) {
            fn from_row<R: DbRow>(row: &R) -> OrmResult<Self> {
                expect_columns(row, $len)?;
                Ok(($(row.try_get::<$ty>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1 => 0 A);
impl_from_row_tuple!(2 => 0 A, 1 B);
impl_from_row_tuple!(3 => 0 A, 1 B, 2 C);
impl_from_row_tuple!(4 => 0 A, 1 B, 2 C, 3 D);
impl_from_row_tuple!(5 => 0 A, 1 B, 2 C, 3 D, 4 E);
impl_from_row_tuple!(6 => 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_from_row_tuple!(7 => 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_from_row_tuple!(8 => 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);
