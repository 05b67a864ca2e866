//! Stacking and padding array-valued fields into rectangular batches.
//!
//! A chunk of rows, each row holding one [`ArrayD`] per field, is first
//! transposed into per-field columns. [`combine_to_arrays`] then stacks every
//! column along a new leading axis and requires equal shapes;
//! [`combine_pad`] first pads every value of a column up to the column's
//! elementwise maximum shape.
//!
//! # Padding
//!
//! On each axis the missing length `total` is split into
//! `left = floor(total * ratio)` and `right = total - left`. With the default
//! ratio of `0.5` an odd remainder goes to the right; `1.0` pads only on the
//! left and `0.0` only on the right.
//!
//! ```
//! use ironbatch::{combine_pad, PadConfig};
//! use ndarray::{arr1, ArrayD};
//!
//! # fn main() -> ironbatch::Result<()> {
//! let short: ArrayD<i32> = arr1(&[1, 2, 3]).into_dyn();
//! let long: ArrayD<i32> = arr1(&[1, 2, 3, 4, 5]).into_dyn();
//! let fields = combine_pad(vec![vec![short], vec![long]], &PadConfig::default())?;
//! assert_eq!(fields[0].shape(), &[2, 5]);
//! let first: Vec<i32> = fields[0].iter().take(5).copied().collect();
//! assert_eq!(first, vec![0, 1, 2, 3, 0]);
//! # Ok(())
//! # }
//! ```

use crate::combine::combine_rows;
use crate::error::{PipelineError, Result};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

/// Derives a fill value from the array being padded.
pub type DeriveFill<A> = Arc<dyn Fn(&ArrayViewD<'_, A>) -> A + Send + Sync>;

/// Fill value used for one field.
pub enum PadValue<A> {
    Constant(A),
    /// Computed from each value before it is padded, e.g. its minimum.
    Derived(DeriveFill<A>),
}

impl<A: Clone> PadValue<A> {
    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&ArrayViewD<'_, A>) -> A + Send + Sync + 'static,
    {
        PadValue::Derived(Arc::new(f))
    }

    fn fill_for(&self, x: &ArrayD<A>) -> A {
        match self {
            PadValue::Constant(v) => v.clone(),
            PadValue::Derived(f) => f(&x.view()),
        }
    }
}

impl<A: Clone> Clone for PadValue<A> {
    fn clone(&self) -> Self {
        match self {
            PadValue::Constant(v) => PadValue::Constant(v.clone()),
            PadValue::Derived(f) => PadValue::Derived(Arc::clone(f)),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for PadValue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PadValue::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            PadValue::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl<A> From<A> for PadValue<A> {
    fn from(v: A) -> Self {
        PadValue::Constant(v)
    }
}

/// Per-field padding values and left ratios.
///
/// Each list holds either one entry, applied to every field, or exactly one
/// entry per field.
#[derive(Clone, Debug)]
pub struct PadConfig<A> {
    pub values: Vec<PadValue<A>>,
    pub ratios: Vec<f64>,
}

impl<A: Default> Default for PadConfig<A> {
    fn default() -> Self {
        Self {
            values: vec![PadValue::Constant(A::default())],
            ratios: vec![0.5],
        }
    }
}

impl<A: Clone> PadConfig<A> {
    /// One value for every field, default ratio.
    pub fn with_value(value: impl Into<PadValue<A>>) -> Self {
        Self {
            values: vec![value.into()],
            ratios: vec![0.5],
        }
    }

    pub fn ratio(mut self, ratio: f64) -> Self {
        self.ratios = vec![ratio];
        self
    }

    pub fn ratios(mut self, ratios: impl IntoIterator<Item = f64>) -> Self {
        self.ratios = ratios.into_iter().collect();
        self
    }

    pub fn values(mut self, values: impl IntoIterator<Item = PadValue<A>>) -> Self {
        self.values = values.into_iter().collect();
        self
    }

    fn resolve(&self, fields: usize) -> Result<Vec<(PadValue<A>, f64)>> {
        if let Some(r) = self.ratios.iter().find(|r| !(0.0..=1.0).contains(*r)) {
            return Err(PipelineError::Config(format!(
                "padding ratio {r} is outside [0, 1]"
            )));
        }
        let values = broadcast(&self.values, fields, "padding values")?;
        let ratios = broadcast(&self.ratios, fields, "padding ratios")?;
        Ok(values.into_iter().zip(ratios).collect())
    }
}

fn broadcast<T: Clone>(items: &[T], fields: usize, what: &str) -> Result<Vec<T>> {
    match items.len() {
        1 => Ok(vec![items[0].clone(); fields]),
        n if n == fields => Ok(items.to_vec()),
        n => Err(PipelineError::Config(format!(
            "{n} {what} given for {fields} fields"
        ))),
    }
}

/// Stack equally shaped arrays along a new leading axis.
pub fn stack_field<A: Clone>(values: &[ArrayD<A>]) -> Result<ArrayD<A>> {
    let Some(first) = values.first() else {
        return Err(PipelineError::Shape("cannot stack an empty field".to_string()));
    };
    if let Some(odd) = values.iter().find(|v| v.shape() != first.shape()) {
        return Err(PipelineError::Shape(format!(
            "cannot stack arrays of shapes {:?} and {:?}",
            first.shape(),
            odd.shape()
        )));
    }
    let views: Vec<ArrayViewD<'_, A>> = values.iter().map(|v| v.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| PipelineError::Shape(e.to_string()))
}

/// Pad `x` up to `shape` with `fill`, splitting each axis by `ratio`.
pub fn pad_to_shape<A: Clone>(x: &ArrayD<A>, shape: &[usize], fill: A, ratio: f64) -> Result<ArrayD<A>> {
    if x.ndim() != shape.len() {
        return Err(PipelineError::Shape(format!(
            "cannot pad an array of rank {} to shape {shape:?}",
            x.ndim()
        )));
    }
    if x.shape().iter().zip(shape).any(|(have, want)| have > want) {
        return Err(PipelineError::Shape(format!(
            "cannot pad shape {:?} down to {shape:?}",
            x.shape()
        )));
    }
    let left: Vec<usize> = x
        .shape()
        .iter()
        .zip(shape)
        .map(|(have, want)| ((want - have) as f64 * ratio).floor() as usize)
        .collect();

    let mut out = ArrayD::from_elem(IxDyn(shape), fill);
    out.slice_each_axis_mut(|ax| {
        let start = left[ax.axis.index()];
        Slice::from(start..start + x.len_of(ax.axis))
    })
    .assign(x);
    Ok(out)
}

/// Pad every value to the elementwise maximum shape, then stack.
pub fn pad_batch_equal<A>(values: &[ArrayD<A>], pad: &PadValue<A>, ratio: f64) -> Result<ArrayD<A>>
where
    A: Clone,
{
    let Some(first) = values.first() else {
        return Err(PipelineError::Shape("cannot pad an empty field".to_string()));
    };
    let rank = first.ndim();
    if let Some(odd) = values.iter().find(|v| v.ndim() != rank) {
        return Err(PipelineError::Shape(format!(
            "cannot pad arrays of ranks {rank} and {} together",
            odd.ndim()
        )));
    }
    let mut max_shape = first.shape().to_vec();
    for v in &values[1..] {
        for (m, &d) in max_shape.iter_mut().zip(v.shape()) {
            *m = (*m).max(d);
        }
    }
    let padded = values
        .iter()
        .map(|x| pad_to_shape(x, &max_shape, pad.fill_for(x), ratio))
        .collect::<Result<Vec<_>>>()?;
    stack_field(&padded)
}

/// Transpose a chunk of array rows and stack each field.
///
/// Fails with [`PipelineError::Shape`] if rows differ in arity or a field's
/// arrays differ in shape.
pub fn combine_to_arrays<A>(chunk: Vec<Vec<ArrayD<A>>>) -> Result<Vec<ArrayD<A>>>
where
    A: Clone + Send + Sync,
{
    combine_rows(chunk)?
        .par_iter()
        .map(|field| stack_field(field))
        .collect()
}

/// Transpose a chunk of array rows, pad each field to equal shapes, and stack.
pub fn combine_pad<A>(chunk: Vec<Vec<ArrayD<A>>>, config: &PadConfig<A>) -> Result<Vec<ArrayD<A>>>
where
    A: Clone + Send + Sync,
{
    let columns = combine_rows(chunk)?;
    let per_field = config.resolve(columns.len())?;
    columns
        .par_iter()
        .zip(per_field.par_iter())
        .map(|(field, (value, ratio))| pad_batch_equal(field, value, *ratio))
        .collect()
}
