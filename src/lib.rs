//! # ironbatch
//!
//! A **streaming batch loader** for training loops. ironbatch draws items from a
//! (possibly infinite) source, pushes them through a chain of concurrent stages
//! connected by bounded buffers, groups them into chunks, and combines each
//! chunk into a batch. Batches are handed out in bounded **epochs**; every epoch
//! continues where the previous one stopped.
//!
//! ## Key Features
//!
//! - **Three stage kinds** - sequential generators, thread pools, and process pools
//! - **Bounded buffers everywhere** - a slow consumer applies backpressure all the way to the source
//! - **Fixed or predicate batch sizes** - the stacker never emits an empty chunk
//! - **Combine, stack, and pad** - turn chunks of tuples into columns or rectangular arrays
//! - **Deterministic teardown** - `close()`, `Drop`, and every failure join all workers
//! - **Failures surface once** - the first worker error reaches the consumer after teardown
//!
//! ## Quick Start
//!
//! ```no_run
//! use ironbatch::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut loader = Infinite::builder(0u64..)
//!     .threads(StageSpec::new(4, 16)?, |x: u64| Ok((x, x % 10)))
//!     .batch(8, |chunk: Vec<(u64, u64)>| Ok(combine_batches(chunk)))
//!     .batches_per_epoch(100)
//!     .build()?;
//!
//! for epoch in 0..10 {
//!     for batch in loader.epoch()? {
//!         let (ids, labels) = batch?;
//!         println!("epoch {epoch}: {} items, first label {}", ids.len(), labels[0]);
//!     }
//! }
//! loader.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Stages
//!
//! A [`Stage`] is a transform plus a [`StageSpec`] (worker count and input
//! buffer capacity). The kinds are listed by [`StageKind`]:
//! - [`Stage::source`] - the first stage, drawing lazily from an iterator
//! - [`Stage::sequential`] - a generator over the whole item stream, one worker
//! - [`Stage::threads`] - a per-item function on `n` threads
//! - [`Stage::processes`] - a per-item function in `n` worker processes (feature `process`)
//!
//! Stages with one worker keep item order. Stages with more workers do not.
//!
//! ### Pipeline
//!
//! A [`Pipeline`] wires the stages together and owns their workers. Its state
//! moves `Idle -> Active -> Closed` and never back; see [`PipelineState`].
//!
//! ### Batching
//!
//! The [`Stacker`] groups items into chunks by a [`BatchSize`]. Combiners turn
//! chunks into batches:
//! - [`combine_batches`] - tuples into a tuple of `Vec`s
//! - [`combine_rows`] - rows of run-time arity into columns
//! - [`combine_to_arrays`] - array rows into stacked arrays
//! - [`combine_pad`] - array rows into padded, stacked arrays (see [`PadConfig`])
//!
//! ### Epochs
//!
//! [`Infinite`] builds one pipeline from a source, transform stages, the
//! stacker, and a combiner, and yields [`Epoch`]s of at most
//! `batches_per_epoch` batches.
//!
//! ## Errors
//!
//! Everything fails with a [`PipelineError`]. Configuration problems fail at
//! build time. A worker failure shuts the whole pipeline down; the consumer's
//! next pull returns it once, and the loader is closed from then on.
//!
//! ## Logging
//!
//! ironbatch emits [`tracing`](https://docs.rs/tracing) events (pipeline
//! enter/exit, worker start/stop, captured failures, epochs) and never
//! installs a subscriber itself.
//!
//! ## Feature Flags
//!
//! - `process` (default) - process-pool stages, [`process::serve`], and the `ironbatch-worker` binary
//!
//! ## Module Overview
//!
//! - [`stage`] - stage descriptors and worker counts
//! - [`pipeline`] - lifecycle and buffer wiring
//! - [`stacker`] - batch accumulation
//! - [`combine`] / [`pad`] - chunk to batch conversion
//! - [`infinite`] - the epoch façade
//! - [`metrics`] - per-stage counters
//! - [`process`] - the process boundary
//! - [`testing`] - assertions and instrumented sources for tests

mod buffer;
pub mod combine;
pub mod error;
pub mod infinite;
mod item;
pub mod metrics;
pub mod pad;
pub mod pipeline;
#[cfg(feature = "process")]
pub mod process;
pub mod stacker;
pub mod stage;
pub mod testing;
mod workers;

pub use combine::{Transpose, combine_batches, combine_rows};
pub use error::{PipelineError, Result};
pub use infinite::{BatchedBuilder, Epoch, Infinite, InfiniteBuilder, LoaderConfig};
pub use item::Item;
pub use metrics::{PipelineStats, StageSnapshot, StageStats};
pub use pad::{PadConfig, PadValue, combine_pad, combine_to_arrays};
pub use pipeline::{Pipeline, PipelineState};
pub use stacker::{BatchSize, StackExt, Stacker};
pub use stage::{Inputs, Stage, StageKind, StageSpec, WorkerCount};

#[cfg(feature = "process")]
pub use process::WorkerCommand;
