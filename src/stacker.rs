//! Batch accumulation.
//!
//! The [`Stacker`] groups an item stream into chunks. The first item of a
//! chunk is always accepted; every later item is offered to the chunk's
//! `should_add` predicate, and a rejected item closes the current chunk and
//! opens the next one. Whatever is left when the stream ends is emitted as a
//! final, possibly short, chunk. Chunks are never empty.

use crate::error::{PipelineError, Result};
use crate::stage::{Inputs, Stage};
use std::fmt;
use std::mem;
use std::sync::Arc;

/// Predicate deciding whether `item` joins the non-empty `chunk`.
pub type ShouldAdd<T> = Arc<dyn Fn(&[T], &T) -> bool + Send + Sync>;

/// How chunks are delimited.
pub enum BatchSize<T> {
    /// Chunks of exactly `k` items, except possibly the last.
    Fixed(usize),
    /// Chunks grow while the predicate accepts the next item.
    Predicate(ShouldAdd<T>),
}

impl<T> BatchSize<T> {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&[T], &T) -> bool + Send + Sync + 'static,
    {
        BatchSize::Predicate(Arc::new(f))
    }

    fn initial_capacity(&self) -> usize {
        match self {
            BatchSize::Fixed(k) => (*k).min(1024),
            BatchSize::Predicate(_) => 0,
        }
    }

    pub(crate) fn into_should_add(self) -> Result<ShouldAdd<T>>
    where
        T: 'static,
    {
        match self {
            BatchSize::Fixed(0) => Err(PipelineError::Config(
                "batch size must be greater than zero".to_string(),
            )),
            BatchSize::Fixed(k) => Ok(Arc::new(move |chunk: &[T], _: &T| chunk.len() < k)),
            BatchSize::Predicate(f) => Ok(f),
        }
    }
}

impl<T> From<usize> for BatchSize<T> {
    fn from(k: usize) -> Self {
        BatchSize::Fixed(k)
    }
}

impl<T> Clone for BatchSize<T> {
    fn clone(&self) -> Self {
        match self {
            BatchSize::Fixed(k) => BatchSize::Fixed(*k),
            BatchSize::Predicate(f) => BatchSize::Predicate(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for BatchSize<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchSize::Fixed(k) => f.debug_tuple("Fixed").field(k).finish(),
            BatchSize::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Iterator adapter yielding chunks of the wrapped iterator's items.
pub struct Stacker<I: Iterator> {
    inner: I,
    chunk: Vec<I::Item>,
    should_add: ShouldAdd<I::Item>,
}

impl<I> Stacker<I>
where
    I: Iterator,
    I::Item: 'static,
{
    pub fn new(inner: I, batch_size: BatchSize<I::Item>) -> Result<Self> {
        Ok(Self {
            inner,
            chunk: Vec::with_capacity(batch_size.initial_capacity()),
            should_add: batch_size.into_should_add()?,
        })
    }
}

impl<I: Iterator> Iterator for Stacker<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.inner.by_ref() {
            if self.chunk.is_empty() || (self.should_add)(&self.chunk, &item) {
                self.chunk.push(item);
            } else {
                let capacity = self.chunk.capacity();
                let mut next = Vec::with_capacity(capacity);
                next.push(item);
                return Some(mem::replace(&mut self.chunk, next));
            }
        }
        if self.chunk.is_empty() {
            None
        } else {
            Some(mem::take(&mut self.chunk))
        }
    }
}

/// Extension for chunking any iterator.
pub trait StackExt: Iterator + Sized {
    fn stack(self, batch_size: BatchSize<Self::Item>) -> Result<Stacker<Self>>
    where
        Self::Item: 'static,
    {
        Stacker::new(self, batch_size)
    }
}

impl<I: Iterator> StackExt for I {}

/// The stacker as a sequential pipeline stage turning `T`s into `Vec<T>`s.
pub(crate) fn stacker_stage<T: Send + 'static>(
    batch_size: BatchSize<T>,
    buffer_capacity: usize,
) -> Result<Stage> {
    let capacity = batch_size.initial_capacity();
    let should_add = batch_size.into_should_add()?;
    Stage::sequential(buffer_capacity, move |inputs: Inputs<T>| Stacker {
        inner: inputs,
        chunk: Vec::with_capacity(capacity),
        should_add,
    })
    .map(|stage| stage.named("stacker"))
}
