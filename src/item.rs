//! Type-erased items carried between stages.
//!
//! Stages run on their own threads and are stored side by side in a
//! [`Pipeline`](crate::Pipeline), so the values flowing through buffers are
//! boxed as [`Item`]s. Typed constructors on [`Stage`](crate::Stage) box and
//! unbox at the edges; a stage that receives the wrong type fails with
//! [`PipelineError::TypeMismatch`] instead of panicking.

use crate::error::{PipelineError, Result};
use std::any::{Any, type_name};

/// An opaque value produced by one stage and consumed by the next.
pub type Item = Box<dyn Any + Send>;

pub(crate) fn box_item<T: Send + 'static>(value: T) -> Item {
    Box::new(value)
}

/// Recover a `T` from an [`Item`], reporting the consuming stage on mismatch.
pub(crate) fn unbox_item<T: 'static>(stage: &str, item: Item) -> Result<T> {
    item.downcast::<T>()
        .map(|b| *b)
        .map_err(|_| PipelineError::TypeMismatch {
            stage: stage.to_string(),
            expected: type_name::<T>(),
        })
}
