//! Instrumented sources.

use std::ops::RangeFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared view of how many items a [`CountingSource`] has produced.
#[derive(Clone, Debug, Default)]
pub struct DrawCounter(Arc<AtomicU64>);

impl DrawCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wraps an iterator and counts every item drawn from it.
///
/// Hand the source to a loader and keep its [`DrawCounter`] to check that
/// items are drawn lazily and never twice.
///
/// ```
/// use ironbatch::testing::CountingSource;
///
/// let mut source = CountingSource::new(vec!['a', 'b']);
/// let drawn = source.counter();
/// assert_eq!(drawn.get(), 0);
/// source.next();
/// assert_eq!(drawn.get(), 1);
/// ```
#[derive(Debug)]
pub struct CountingSource<I> {
    inner: I,
    drawn: DrawCounter,
}

impl<I: Iterator> CountingSource<I> {
    pub fn new(inner: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            inner: inner.into_iter(),
            drawn: DrawCounter::default(),
        }
    }

    pub fn counter(&self) -> DrawCounter {
        self.drawn.clone()
    }
}

impl CountingSource<RangeFrom<u64>> {
    /// The infinite source `0, 1, 2, ...`.
    pub fn naturals() -> Self {
        Self::new(0u64..)
    }
}

impl<I: Iterator> Iterator for CountingSource<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let item = self.inner.next()?;
        self.drawn.0.fetch_add(1, Ordering::SeqCst);
        Some(item)
    }
}
