//! The epoch façade over a [`Pipeline`].
//!
//! [`Infinite`] chains a source, any number of transform stages, the batch
//! [`Stacker`](crate::Stacker), and a combiner into exactly one pipeline, and
//! hands out bounded epochs of batches from it:
//!
//! ```no_run
//! use ironbatch::{Infinite, StageSpec};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut loader = Infinite::builder((0u64..).cycle())
//!     .map(|x: u64| Ok(x as f32 / 10.0))
//!     .threads(StageSpec::new(4, 8)?, |x: f32| Ok((x, x * x)))
//!     .batch(32, |chunk: Vec<(f32, f32)>| Ok(ironbatch::combine_batches(chunk)))
//!     .batches_per_epoch(100)
//!     .buffer_size(4)
//!     .build()?;
//!
//! for _ in 0..3 {
//!     for batch in loader.epoch()? {
//!         let (xs, squares) = batch?;
//!         assert_eq!(xs.len(), squares.len());
//!     }
//! }
//! loader.close();
//! # Ok(())
//! # }
//! ```
//!
//! The pipeline starts on the first [`Infinite::epoch`] call (or an explicit
//! [`Infinite::enter`]) and is reused afterwards, so every epoch continues
//! from the next unconsumed source item. [`Infinite::close`] tears it down;
//! dropping the loader does the same.

use crate::error::{PipelineError, Result};
use crate::item::unbox_item;
use crate::metrics::PipelineStats;
use crate::pipeline::{Pipeline, PipelineState};
use crate::stacker::{BatchSize, stacker_stage};
use crate::stage::{Inputs, Stage, StageSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

#[cfg(feature = "process")]
use crate::process::WorkerCommand;
#[cfg(feature = "process")]
use serde::de::DeserializeOwned;

/// Scalar loader settings, loadable from JSON.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub batches_per_epoch: usize,
    /// Buffer capacity for stages built without an explicit [`StageSpec`].
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    1
}

impl LoaderConfig {
    pub fn new(batches_per_epoch: usize) -> Self {
        Self {
            batches_per_epoch,
            buffer_size: default_buffer_size(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("invalid loader config: {e}")))
    }
}

/// A stage whose buffer capacity is only known once the loader is built.
type DeferredStage = Box<dyn FnOnce(usize) -> Result<Stage>>;

/// Collects the transform stages of an [`Infinite`] loader. `T` is the item
/// type produced by the last stage so far.
pub struct InfiniteBuilder<T> {
    source: Stage,
    stages: Vec<DeferredStage>,
    buffer_size: usize,
    _t: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> InfiniteBuilder<T> {
    fn then<O>(mut self, stage: DeferredStage) -> InfiniteBuilder<O> {
        self.stages.push(stage);
        InfiniteBuilder {
            source: self.source,
            stages: self.stages,
            buffer_size: self.buffer_size,
            _t: PhantomData,
        }
    }

    /// A one-worker thread stage with the loader's buffer size.
    pub fn map<O, F>(self, f: F) -> InfiniteBuilder<O>
    where
        O: Send + 'static,
        F: Fn(T) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        self.then(Box::new(move |buffer: usize| {
            Ok(Stage::threads(StageSpec::single(buffer)?, f))
        }))
    }

    /// A thread-pool stage with its own worker count and buffer capacity.
    pub fn threads<O, F>(self, spec: StageSpec, f: F) -> InfiniteBuilder<O>
    where
        O: Send + 'static,
        F: Fn(T) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let stage = Stage::threads(spec, f);
        self.then(Box::new(move |_: usize| Ok(stage)))
    }

    /// A sequential generator stage over the whole item stream.
    pub fn sequential<O, F, It>(self, f: F) -> InfiniteBuilder<O>
    where
        O: Send + 'static,
        F: FnOnce(Inputs<T>) -> It + Send + 'static,
        It: Iterator<Item = O> + 'static,
    {
        self.then(Box::new(move |buffer: usize| Stage::sequential(buffer, f)))
    }

    /// Like [`sequential`](Self::sequential), for generators that can fail.
    pub fn try_sequential<O, F, It>(self, f: F) -> InfiniteBuilder<O>
    where
        O: Send + 'static,
        F: FnOnce(Inputs<T>) -> It + Send + 'static,
        It: Iterator<Item = anyhow::Result<O>> + 'static,
    {
        self.then(Box::new(move |buffer: usize| Stage::try_sequential(buffer, f)))
    }

    /// A process-pool stage running `command` in each worker.
    #[cfg(feature = "process")]
    pub fn processes<O>(self, spec: StageSpec, command: WorkerCommand) -> InfiniteBuilder<O>
    where
        T: Serialize,
        O: DeserializeOwned + Send + 'static,
    {
        let stage = Stage::processes::<T, O>(spec, command);
        self.then(Box::new(move |_: usize| Ok(stage)))
    }

    /// Name the most recently added stage (or the source).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match self.stages.pop() {
            Some(last) => self
                .stages
                .push(Box::new(move |buffer: usize| last(buffer).map(|s| s.named(name)))),
            None => self.source = self.source.named(name),
        }
        self
    }

    /// Buffer capacity of every stage built without an explicit spec.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Close the chain with chunks of `batch_size` items and a combiner.
    pub fn batch<B, F>(self, batch_size: usize, combiner: F) -> BatchedBuilder<B>
    where
        B: Send + 'static,
        F: Fn(Vec<T>) -> anyhow::Result<B> + Send + Sync + 'static,
    {
        self.batch_with(BatchSize::Fixed(batch_size), combiner)
    }

    /// Close the chain with the stacker and a combiner.
    ///
    /// The stacker groups items into chunks per `batch_size`; the combiner
    /// turns each chunk into a batch on its own one-worker thread stage.
    pub fn batch_with<B, F>(mut self, batch_size: BatchSize<T>, combiner: F) -> BatchedBuilder<B>
    where
        B: Send + 'static,
        F: Fn(Vec<T>) -> anyhow::Result<B> + Send + Sync + 'static,
    {
        self.stages
            .push(Box::new(move |buffer: usize| stacker_stage(batch_size, buffer)));
        self.stages.push(Box::new(move |buffer: usize| {
            Ok(Stage::threads(StageSpec::single(buffer)?, combiner).named("combiner"))
        }));
        BatchedBuilder {
            source: self.source,
            stages: self.stages,
            buffer_size: self.buffer_size,
            batches_per_epoch: None,
            _b: PhantomData,
        }
    }
}

/// The last step before [`build`](BatchedBuilder::build): stages are fixed,
/// only scalar settings remain.
pub struct BatchedBuilder<B> {
    source: Stage,
    stages: Vec<DeferredStage>,
    buffer_size: usize,
    batches_per_epoch: Option<usize>,
    _b: PhantomData<fn() -> B>,
}

impl<B: Send + 'static> BatchedBuilder<B> {
    pub fn batches_per_epoch(mut self, n: usize) -> Self {
        self.batches_per_epoch = Some(n);
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn config(self, config: LoaderConfig) -> Self {
        self.batches_per_epoch(config.batches_per_epoch)
            .buffer_size(config.buffer_size)
    }

    /// Validate every setting and build the (Idle) pipeline.
    pub fn build(self) -> Result<Infinite<B>> {
        let batches_per_epoch = match self.batches_per_epoch {
            None => {
                return Err(PipelineError::Config(
                    "batches_per_epoch must be set".to_string(),
                ));
            }
            Some(0) => {
                return Err(PipelineError::Config(
                    "batches_per_epoch must be greater than zero".to_string(),
                ));
            }
            Some(n) => n,
        };
        if self.buffer_size == 0 {
            return Err(PipelineError::Config(
                "buffer_size must be at least 1".to_string(),
            ));
        }

        let mut stages = Vec::with_capacity(self.stages.len() + 1);
        stages.push(self.source);
        for stage in self.stages {
            stages.push(stage(self.buffer_size)?);
        }
        Ok(Infinite {
            pipeline: Pipeline::new(stages)?,
            batches_per_epoch,
            epochs: 0,
            closed: false,
            _b: PhantomData,
        })
    }
}

/// A restartable source of bounded epochs of batches of type `B`.
pub struct Infinite<B> {
    pipeline: Pipeline,
    batches_per_epoch: usize,
    epochs: usize,
    closed: bool,
    _b: PhantomData<fn() -> B>,
}

impl Infinite<()> {
    /// Start describing a loader drawing from `source`, which may be infinite.
    pub fn builder<S>(source: S) -> InfiniteBuilder<S::Item>
    where
        S: IntoIterator,
        S::IntoIter: Send + 'static,
        S::Item: Send + 'static,
    {
        InfiniteBuilder {
            source: Stage::source(source).named("source"),
            stages: Vec::new(),
            buffer_size: default_buffer_size(),
            _t: PhantomData,
        }
    }
}

impl<B: Send + 'static> Infinite<B> {
    /// Start the pipeline now instead of on the first epoch.
    pub fn enter(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.pipeline.enter()
    }

    /// Tear the pipeline down. Idempotent; a closed loader stays closed even
    /// if it was never started.
    pub fn close(&mut self) {
        self.closed = true;
        self.pipeline.exit();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed || self.pipeline.state() == PipelineState::Closed {
            return Err(PipelineError::Lifecycle("loader is closed".to_string()));
        }
        Ok(())
    }

    /// Enter, run `f`, and close on every path out of `f`.
    pub fn scope<R>(mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.enter()?;
        let out = f(&mut self);
        self.close();
        out
    }

    /// The next `batches_per_epoch` batches.
    ///
    /// Starts the pipeline on first use. Each call picks up where the previous
    /// epoch stopped. Fails with [`PipelineError::Lifecycle`] once the loader
    /// is closed, including after a worker failure has been returned.
    pub fn epoch(&mut self) -> Result<Epoch<'_, B>> {
        self.ensure_open()?;
        if self.pipeline.state() == PipelineState::Idle {
            self.pipeline.enter()?;
        }
        self.epochs += 1;
        debug!(epoch = self.epochs, batches = self.batches_per_epoch, "starting epoch");
        Ok(Epoch {
            pipeline: &mut self.pipeline,
            remaining: self.batches_per_epoch,
            done: false,
            _b: PhantomData,
        })
    }

    pub fn is_active(&self) -> bool {
        self.pipeline.is_active()
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.batches_per_epoch
    }

    /// Number of epochs handed out so far.
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl<B> Drop for Infinite<B> {
    fn drop(&mut self) {
        self.pipeline.exit();
    }
}

impl<B> fmt::Debug for Infinite<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Infinite")
            .field("batches_per_epoch", &self.batches_per_epoch)
            .field("epochs", &self.epochs)
            .field("closed", &self.closed)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// One epoch: at most `batches_per_epoch` batches, fewer if a finite source
/// runs dry. Ends after the first error.
pub struct Epoch<'a, B> {
    pipeline: &'a mut Pipeline,
    remaining: usize,
    done: bool,
    _b: PhantomData<fn() -> B>,
}

impl<B: Send + 'static> Iterator for Epoch<'_, B> {
    type Item = Result<B>;

    fn next(&mut self) -> Option<Result<B>> {
        if self.done || self.remaining == 0 {
            return None;
        }
        match self.pipeline.next_item() {
            None => {
                self.done = true;
                None
            }
            Some(Ok(item)) => {
                self.remaining -= 1;
                let batch = unbox_item::<B>("consumer", item);
                if batch.is_err() {
                    self.done = true;
                    self.pipeline.exit();
                }
                Some(batch)
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            (0, Some(0))
        } else {
            (0, Some(self.remaining))
        }
    }
}
