//! Turning a chunk of tuples into a tuple of columns.
//!
//! `[(x, y), (x, y)]` becomes `([x, x], [y, y])`: field `k` of every item, in
//! item order. Statically typed tuples go through [`combine_batches`], where
//! arity is checked by the compiler. Rows whose arity is only known at run
//! time (`Vec<V>` per item) go through [`combine_rows`], which rejects a
//! chunk whose rows differ in length.
//!
//! Array-valued fields are stacked or padded by
//! [`combine_to_arrays`](crate::combine_to_arrays) and
//! [`combine_pad`](crate::combine_pad).

use crate::error::{PipelineError, Result};

/// Tuples that can be transposed into a tuple of `Vec`s.
pub trait Transpose: Sized {
    type Columns;

    fn transpose(rows: Vec<Self>) -> Self::Columns;
}

macro_rules! impl_transpose {
    ($($T:ident $idx:tt),+) => {
        impl<$($T),+> Transpose for ($($T,)+) {
            type Columns = ($(Vec<$T>,)+);

            fn transpose(rows: Vec<Self>) -> Self::Columns {
                let mut columns = ($(Vec::<$T>::with_capacity(rows.len()),)+);
                for row in rows {
                    $(columns.$idx.push(row.$idx);)+
                }
                columns
            }
        }
    };
}

impl_transpose!(A 0);
impl_transpose!(A 0, B 1);
impl_transpose!(A 0, B 1, C 2);
impl_transpose!(A 0, B 1, C 2, D 3);
impl_transpose!(A 0, B 1, C 2, D 3, E 4);
impl_transpose!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_transpose!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_transpose!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Transpose a chunk of tuples into a tuple of per-field `Vec`s.
///
/// ```
/// use ironbatch::combine_batches;
///
/// let (xs, ys) = combine_batches(vec![(1, 'a'), (2, 'b')]);
/// assert_eq!(xs, vec![1, 2]);
/// assert_eq!(ys, vec!['a', 'b']);
/// ```
pub fn combine_batches<T: Transpose>(chunk: Vec<T>) -> T::Columns {
    T::transpose(chunk)
}

/// Transpose rows of run-time arity into per-field columns.
///
/// Fails with [`PipelineError::Shape`] if two rows have different lengths.
pub fn combine_rows<V>(chunk: Vec<Vec<V>>) -> Result<Vec<Vec<V>>> {
    let Some(arity) = chunk.first().map(Vec::len) else {
        return Ok(Vec::new());
    };
    let rows = chunk.len();
    let mut columns: Vec<Vec<V>> = (0..arity).map(|_| Vec::with_capacity(rows)).collect();
    for (i, row) in chunk.into_iter().enumerate() {
        if row.len() != arity {
            return Err(PipelineError::Shape(format!(
                "item {i} has {} fields, expected {arity}",
                row.len()
            )));
        }
        for (column, value) in columns.iter_mut().zip(row) {
            column.push(value);
        }
    }
    Ok(columns)
}
