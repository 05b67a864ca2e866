//! Testing utilities for ironbatch loaders.
//!
//! - **Assertions**: compare batches and chunk layouts with expected results
//! - **Sources**: a source that records how many items were drawn from it
//!
//! # Quick Start
//!
//! ```no_run
//! use ironbatch::Infinite;
//! use ironbatch::testing::*;
//!
//! #[test]
//! fn batches_follow_the_source() -> anyhow::Result<()> {
//!     let source = CountingSource::naturals();
//!     let drawn = source.counter();
//!     let mut loader = Infinite::builder(source)
//!         .batch(3, |chunk: Vec<u64>| Ok(chunk))
//!         .batches_per_epoch(2)
//!         .build()?;
//!
//!     let batches = loader.epoch()?.collect::<Result<Vec<_>, _>>()?;
//!     assert_collections_equal(&batches, &[vec![0, 1, 2], vec![3, 4, 5]]);
//!     assert!(drawn.get() >= 6);
//!     Ok(())
//! }
//! ```
//!
//! Multi-worker stages do not preserve order, so compare their output with
//! [`assert_collections_unordered_equal`].

pub mod assertions;
pub mod sources;

pub use assertions::*;
pub use sources::*;
