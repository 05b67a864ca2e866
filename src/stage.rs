//! Stage descriptors.
//!
//! A [`Stage`] is one unit of a [`Pipeline`](crate::Pipeline): a transform,
//! the number of workers that run it, and the capacity of the buffer feeding
//! it. The set of stage kinds is closed:
//!
//! - [`StageKind::Source`] draws items lazily from a caller iterator.
//! - [`StageKind::Sequential`] runs a generator over the whole item stream on
//!   exactly one worker. Use it for 1-to-many, many-to-1, or order-sensitive
//!   transforms; the batch [`Stacker`](crate::Stacker) is one of these.
//! - [`StageKind::ThreadPool`] applies a per-item function on `n` threads.
//! - [`StageKind::ProcessPool`] applies a per-item function in `n` worker
//!   processes (feature `process`).
//!
//! Typed constructors box and unbox items at the edges, so a stage built for
//! `u32` inputs fails with a type-mismatch error if it receives anything else.

use crate::buffer::{BufferRx, Failure, Pull};
use crate::error::{PipelineError, Result};
use crate::item::{Item, box_item, unbox_item};
use crate::metrics::StageStats;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "process")]
use crate::process::{ProcessTransform, WorkerCommand};
#[cfg(feature = "process")]
use serde::{Serialize, de::DeserializeOwned};

/// How many workers a stage runs.
///
/// Process pools accept a relative count: `AllBut(k)` means "every available
/// CPU except `k`", floored at one worker. It is resolved once, when the
/// [`StageSpec`] is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerCount {
    Exact(usize),
    AllBut(usize),
}

impl WorkerCount {
    /// Decode the signed convention: `n > 0` is exact, `n < 0` means
    /// `available_parallelism + n + 1` (so `-1` is every CPU, `-2` all but one).
    pub fn from_signed(n: i64) -> Result<Self> {
        match n {
            0 => Err(PipelineError::Config(
                "worker count must be non-zero".to_string(),
            )),
            n if n > 0 => Ok(WorkerCount::Exact(n as usize)),
            n => Ok(WorkerCount::AllBut((n.unsigned_abs() - 1) as usize)),
        }
    }

    /// Resolve against the number of logical CPUs.
    pub fn resolve(self) -> Result<usize> {
        self.resolve_with(num_cpus::get())
    }

    /// Resolve against an explicit CPU count.
    pub fn resolve_with(self, cpus: usize) -> Result<usize> {
        match self {
            WorkerCount::Exact(0) => Err(PipelineError::Config(
                "worker count must be at least 1".to_string(),
            )),
            WorkerCount::Exact(n) => Ok(n),
            WorkerCount::AllBut(k) => Ok(cpus.saturating_sub(k).max(1)),
        }
    }
}

impl From<usize> for WorkerCount {
    fn from(n: usize) -> Self {
        WorkerCount::Exact(n)
    }
}

/// Worker count and input buffer capacity of a stage.
///
/// Both are strictly positive; [`StageSpec::new`] fails before anything is
/// started otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageSpec {
    workers: usize,
    buffer_capacity: usize,
}

impl StageSpec {
    pub fn new(workers: usize, buffer_capacity: usize) -> Result<Self> {
        Self::with_workers(WorkerCount::Exact(workers), buffer_capacity)
    }

    /// Build from a [`WorkerCount`], resolving relative counts now.
    pub fn with_workers(workers: WorkerCount, buffer_capacity: usize) -> Result<Self> {
        let workers = workers.resolve()?;
        if buffer_capacity == 0 {
            return Err(PipelineError::Config(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            workers,
            buffer_capacity,
        })
    }

    /// One worker with the given buffer capacity.
    pub fn single(buffer_capacity: usize) -> Result<Self> {
        Self::new(1, buffer_capacity)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

impl Default for StageSpec {
    fn default() -> Self {
        Self {
            workers: 1,
            buffer_capacity: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    Sequential,
    ThreadPool,
    ProcessPool,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Source => "source",
            StageKind::Sequential => "sequential",
            StageKind::ThreadPool => "threads",
            StageKind::ProcessPool => "processes",
        })
    }
}

pub(crate) type SourceIter = Box<dyn Iterator<Item = Item> + Send>;
pub(crate) type GeneratorFn =
    Box<dyn FnOnce(StageInput) -> Box<dyn Iterator<Item = Result<Item>>> + Send>;
pub(crate) type MapFn = Arc<dyn Fn(&str, Item) -> Result<Item> + Send + Sync>;

pub(crate) enum StageBody {
    /// Taken on `enter`.
    Source(Option<SourceIter>),
    /// Taken on `enter`.
    Sequential(Option<GeneratorFn>),
    ThreadPool(MapFn),
    #[cfg(feature = "process")]
    ProcessPool(Arc<ProcessTransform>),
}

/// One pipeline stage: a transform plus its [`StageSpec`].
pub struct Stage {
    pub(crate) name: Option<String>,
    pub(crate) spec: StageSpec,
    pub(crate) body: StageBody,
}

impl Stage {
    /// Wrap a caller iterator (finite or infinite) as the first stage.
    ///
    /// Items are drawn one at a time by the source worker, never at
    /// construction.
    pub fn source<S>(source: S) -> Self
    where
        S: IntoIterator,
        S::IntoIter: Send + 'static,
        S::Item: Send + 'static,
    {
        let iter: SourceIter = Box::new(source.into_iter().map(box_item));
        Self {
            name: None,
            spec: StageSpec::default(),
            body: StageBody::Source(Some(iter)),
        }
    }

    /// A generator stage run by exactly one worker.
    ///
    /// `f` receives the upstream items as an iterator and returns the
    /// downstream items. It is called once, on the worker thread.
    pub fn sequential<I, O, F, It>(buffer_capacity: usize, f: F) -> Result<Self>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnOnce(Inputs<I>) -> It + Send + 'static,
        It: Iterator<Item = O> + 'static,
    {
        Self::try_sequential(buffer_capacity, move |inputs: Inputs<I>| f(inputs).map(Ok))
    }

    /// Like [`Stage::sequential`], for generators that can fail mid-stream.
    pub fn try_sequential<I, O, F, It>(buffer_capacity: usize, f: F) -> Result<Self>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnOnce(Inputs<I>) -> It + Send + 'static,
        It: Iterator<Item = anyhow::Result<O>> + 'static,
    {
        let spec = StageSpec::single(buffer_capacity)?;
        let generator: GeneratorFn = Box::new(move |input: StageInput| {
            let stage = input.stage.clone();
            let outputs = f(Inputs::new(input)).map(move |r| {
                r.map(box_item)
                    .map_err(|e| PipelineError::from_user(&stage, e))
            });
            Box::new(outputs) as Box<dyn Iterator<Item = Result<Item>>>
        });
        Ok(Self {
            name: None,
            spec,
            body: StageBody::Sequential(Some(generator)),
        })
    }

    /// A per-item transform run concurrently on `spec.workers()` threads.
    ///
    /// `f` is shared by every worker and must tolerate concurrent calls.
    pub fn threads<I, O, F>(spec: StageSpec, f: F) -> Self
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let map: MapFn = Arc::new(move |stage: &str, item: Item| {
            let input = unbox_item::<I>(stage, item)?;
            f(input)
                .map(box_item)
                .map_err(|e| PipelineError::from_user(stage, e))
        });
        Self {
            name: None,
            spec,
            body: StageBody::ThreadPool(map),
        }
    }

    /// A per-item transform run in `spec.workers()` worker processes.
    ///
    /// Each worker spawns `command`, which must serve the frame protocol of
    /// [`process::serve`](crate::process::serve) for inputs `I` and
    /// outputs `O`.
    #[cfg(feature = "process")]
    pub fn processes<I, O>(spec: StageSpec, command: WorkerCommand) -> Self
    where
        I: Serialize + Send + 'static,
        O: DeserializeOwned + Send + 'static,
    {
        Self {
            name: None,
            spec,
            body: StageBody::ProcessPool(Arc::new(ProcessTransform::new::<I, O>(command))),
        }
    }

    /// Give the stage a name for logs, errors, and stats.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn spec(&self) -> StageSpec {
        self.spec
    }

    pub fn kind(&self) -> StageKind {
        match &self.body {
            StageBody::Source(_) => StageKind::Source,
            StageBody::Sequential(_) => StageKind::Sequential,
            StageBody::ThreadPool(_) => StageKind::ThreadPool,
            #[cfg(feature = "process")]
            StageBody::ProcessPool(_) => StageKind::ProcessPool,
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("spec", &self.spec)
            .finish()
    }
}

/// Untyped input side of a sequential stage, handed to its generator.
pub(crate) struct StageInput {
    pub(crate) stage: Arc<str>,
    pub(crate) rx: BufferRx,
    pub(crate) failure: Failure,
    pub(crate) stats: Arc<StageStats>,
}

/// The upstream item stream as seen by a sequential stage's generator.
///
/// Iteration ends when upstream is exhausted or the pipeline shuts down.
pub struct Inputs<I> {
    input: StageInput,
    _t: PhantomData<fn() -> I>,
}

impl<I> Inputs<I> {
    fn new(input: StageInput) -> Self {
        Self {
            input,
            _t: PhantomData,
        }
    }
}

impl<I: 'static> Iterator for Inputs<I> {
    type Item = I;

    fn next(&mut self) -> Option<I> {
        match self.input.rx.pull() {
            Pull::Item(item) => {
                self.input.stats.record_received();
                match unbox_item::<I>(&self.input.stage, item) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        self.input.stats.record_failure();
                        self.input.failure.record(e);
                        None
                    }
                }
            }
            Pull::Exhausted | Pull::Shutdown => None,
        }
    }
}
