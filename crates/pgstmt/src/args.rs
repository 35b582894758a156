//! Positional bind arguments.

use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// One positional bind value, shared between clones of a statement.
pub type Argument = Arc<dyn ToSql + Sync + Send>;

/// Conversion into an ordered list of bind values.
///
/// Implemented for tuples of up to twelve `ToSql` values (so mixed types can be
/// passed in one call), for `()` (no arguments) and for `Vec<Argument>`.
///
/// ```ignore
/// stmt.text("UPDATE products SET name = $1 WHERE id = $2")
///     .arguments(("shoes", 1_i32));
/// ```
pub trait IntoArguments {
    fn into_arguments(self) -> Vec<Argument>;
}

impl IntoArguments for () {
    fn into_arguments(self) -> Vec<Argument> {
        Vec::new()
    }
}

impl IntoArguments for Vec<Argument> {
    fn into_arguments(self) -> Vec<Argument> {
        self
    }
}

macro_rules! impl_into_arguments_tuple {
    ($($name:ident),+) => {
        impl<$($name),+> IntoArguments for ($($name,)+)
        where
            $($name: ToSql + Sync + Send + 'static),+
        {
            #[allow(non_snake_case)]
            fn into_arguments(self) -> Vec<Argument> {
                let ($($name,)+) = self;
                vec![$(Arc::new($name) as Argument),+]
            }
        }
    };
}

impl_into_arguments_tuple!(A);
impl_into_arguments_tuple!(A, B);
impl_into_arguments_tuple!(A, B, C);
impl_into_arguments_tuple!(A, B, C, D);
impl_into_arguments_tuple!(A, B, C, D, E);
impl_into_arguments_tuple!(A, B, C, D, E, F);
impl_into_arguments_tuple!(A, B, C, D, E, F, G);
impl_into_arguments_tuple!(A, B, C, D, E, F, G, H);
impl_into_arguments_tuple!(A, B, C, D, E, F, G, H, I);
impl_into_arguments_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_into_arguments_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_into_arguments_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);
