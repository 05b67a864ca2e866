//! Worker loops for each stage kind.
//!
//! Every worker runs on its own named thread and follows the same contract:
//! pull from the input buffer, apply the transform, push to the output
//! buffer, and stop as soon as upstream is exhausted, the pipeline shuts
//! down, or the transform fails. A failing worker records the failure (which
//! triggers shutdown) and returns; returning drops its output sender, which
//! ends the stream for the next stage.
//!
//! User code is run under `catch_unwind`, so a panicking transform becomes a
//! [`PipelineError::Panicked`] instead of tearing down a worker silently.

use crate::buffer::{BufferRx, BufferTx, Failure, Pull, Shutdown};
use crate::error::{PipelineError, Result};
use crate::metrics::StageStats;
#[cfg(feature = "process")]
use crate::process::SpawnedChild;
use crate::stage::{GeneratorFn, MapFn, SourceIter, Stage, StageBody, StageInput};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// Everything a worker needs besides its buffers.
///
/// Creating a context counts a live worker; dropping it (when the worker
/// thread ends, or when spawning fails) uncounts it.
pub(crate) struct WorkerContext {
    pub(crate) stage: Arc<str>,
    pub(crate) index: usize,
    pub(crate) failure: Failure,
    pub(crate) shutdown: Shutdown,
    pub(crate) stats: Arc<StageStats>,
    live: Arc<AtomicUsize>,
}

impl WorkerContext {
    pub(crate) fn fail(&self, err: PipelineError) {
        self.stats.record_failure();
        self.failure.record(err);
    }

    pub(crate) fn crashed(&self, message: String) -> PipelineError {
        PipelineError::WorkerCrashed {
            stage: self.stage.to_string(),
            worker: self.index,
            message,
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared handles for starting the workers of one pipeline.
pub(crate) struct Spawner<'a> {
    pub(crate) failure: &'a Failure,
    pub(crate) shutdown: &'a Shutdown,
    pub(crate) live: &'a Arc<AtomicUsize>,
    pub(crate) handles: &'a mut Vec<JoinHandle<()>>,
}

impl Spawner<'_> {
    /// Start every worker of `stage`. Handles of workers that did start are
    /// kept in `self.handles` even when a later one fails to start.
    pub(crate) fn start_stage(
        &mut self,
        stage: &mut Stage,
        name: Arc<str>,
        stats: &Arc<StageStats>,
        input: Option<BufferRx>,
        output: BufferTx,
    ) -> Result<()> {
        let workers = stage.spec.workers();
        match &mut stage.body {
            StageBody::Source(iter) => {
                let iter = iter.take().ok_or_else(|| consumed(&name))?;
                let ctx = self.context(&name, 0, stats);
                self.spawn(ctx, move |ctx| run_source(ctx, iter, output))
            }
            StageBody::Sequential(generator) => {
                let generator = generator.take().ok_or_else(|| consumed(&name))?;
                let input = input.ok_or_else(|| no_input(&name))?;
                let ctx = self.context(&name, 0, stats);
                self.spawn(ctx, move |ctx| run_sequential(ctx, generator, input, output))
            }
            StageBody::ThreadPool(map) => {
                let input = input.ok_or_else(|| no_input(&name))?;
                for index in 0..workers {
                    let (map, input, output) = (Arc::clone(map), input.clone(), output.clone());
                    let ctx = self.context(&name, index, stats);
                    self.spawn(ctx, move |ctx| run_map(ctx, map, input, output))?;
                }
                Ok(())
            }
            #[cfg(feature = "process")]
            StageBody::ProcessPool(transform) => {
                let input = input.ok_or_else(|| no_input(&name))?;
                for index in 0..workers {
                    let ctx = self.context(&name, index, stats);
                    let child = transform.command.spawn().map_err(|e| {
                        ctx.crashed(format!("could not spawn {:?}: {e}", transform.command))
                    })?;
                    let child = SpawnedChild::new(child);
                    debug!(stage = %name, worker = index, pid = ?child.id(), "spawned worker process");
                    let (transform, input, output) =
                        (Arc::clone(transform), input.clone(), output.clone());
                    self.spawn(ctx, move |ctx| {
                        crate::process::run_worker(ctx, child, &transform, input, output)
                    })?;
                }
                Ok(())
            }
        }
    }

    fn context(&self, stage: &Arc<str>, index: usize, stats: &Arc<StageStats>) -> WorkerContext {
        self.live.fetch_add(1, Ordering::SeqCst);
        WorkerContext {
            stage: Arc::clone(stage),
            index,
            failure: self.failure.clone(),
            shutdown: self.shutdown.clone(),
            stats: Arc::clone(stats),
            live: Arc::clone(self.live),
        }
    }

    fn spawn<F>(&mut self, ctx: WorkerContext, body: F) -> Result<()>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        let thread_name = format!("ironbatch-{}-{}", ctx.stage, ctx.index);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                trace!(stage = %ctx.stage, worker = ctx.index, "worker started");
                body(&ctx);
                trace!(stage = %ctx.stage, worker = ctx.index, "worker stopped");
            })
            .map_err(|e| PipelineError::Lifecycle(format!("could not start worker thread: {e}")))?;
        self.handles.push(handle);
        Ok(())
    }
}

fn consumed(stage: &str) -> PipelineError {
    PipelineError::Lifecycle(format!("stage `{stage}` was already started once"))
}

fn no_input(stage: &str) -> PipelineError {
    PipelineError::Lifecycle(format!("stage `{stage}` has no upstream buffer"))
}

fn guarded<T>(stage: &str, f: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|p| PipelineError::from_panic(stage, p))
}

fn run_source(ctx: &WorkerContext, mut iter: SourceIter, output: BufferTx) {
    while !ctx.shutdown.is_triggered() {
        match guarded(&ctx.stage, || iter.next()) {
            Ok(Some(item)) => {
                ctx.stats.record_received();
                if !output.push(item) {
                    break;
                }
                ctx.stats.record_emitted();
            }
            Ok(None) => {
                debug!(stage = %ctx.stage, "source exhausted");
                break;
            }
            Err(e) => {
                ctx.fail(e);
                break;
            }
        }
    }
}

fn run_sequential(ctx: &WorkerContext, generator: GeneratorFn, input: BufferRx, output: BufferTx) {
    let stage_input = StageInput {
        stage: Arc::clone(&ctx.stage),
        rx: input,
        failure: ctx.failure.clone(),
        stats: Arc::clone(&ctx.stats),
    };
    let mut outputs = match guarded(&ctx.stage, || generator(stage_input)) {
        Ok(outputs) => outputs,
        Err(e) => return ctx.fail(e),
    };
    loop {
        match guarded(&ctx.stage, || outputs.next()) {
            Ok(Some(Ok(item))) => {
                if !output.push(item) {
                    break;
                }
                ctx.stats.record_emitted();
            }
            Ok(None) => break,
            Ok(Some(Err(e))) | Err(e) => {
                ctx.fail(e);
                break;
            }
        }
    }
}

fn run_map(ctx: &WorkerContext, map: MapFn, input: BufferRx, output: BufferTx) {
    loop {
        let item = match input.pull() {
            Pull::Item(item) => item,
            Pull::Exhausted | Pull::Shutdown => break,
        };
        ctx.stats.record_received();
        match guarded(&ctx.stage, || map(&*ctx.stage, item)) {
            Ok(Ok(out)) => {
                if !output.push(out) {
                    break;
                }
                ctx.stats.record_emitted();
            }
            Ok(Err(e)) | Err(e) => {
                ctx.fail(e);
                break;
            }
        }
    }
}
