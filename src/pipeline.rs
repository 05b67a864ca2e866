//! The streaming pipeline engine.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s, a source first, plus a
//! lifecycle state that only ever moves forward:
//!
//! ```text
//! Idle --enter()--> Active --exit()--> Closed
//! ```
//!
//! `enter` wires one bounded buffer in front of every stage except the
//! source (sized by that stage's buffer capacity), plus one buffer between
//! the last stage and the consumer, and starts every worker. `exit` triggers
//! the shutdown sentinel, joins every worker, and releases the buffers. It is
//! idempotent, a no-op on a pipeline that was never entered, and runs from
//! `Drop` as well, so a pipeline cannot leak workers past its owner.
//!
//! The pipeline itself is an iterator of [`Item`] results. The first worker
//! failure is returned exactly once, after the pipeline has been fully torn
//! down; any explicit [`Pipeline::next_item`] after that fails with
//! [`PipelineError::Lifecycle`], while the iterator ends.

use crate::buffer::{BufferRx, Failure, Pull, Shutdown, bounded};
use crate::error::{PipelineError, Result};
use crate::item::Item;
use crate::metrics::{PipelineStats, StageSnapshot, StageStats};
use crate::stage::{Stage, StageKind};
use crate::workers::Spawner;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, nothing running.
    Idle,
    /// Every stage running, buffers wired.
    Active,
    /// Torn down; cannot be entered again.
    Closed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Idle => "idle",
            PipelineState::Active => "active",
            PipelineState::Closed => "closed",
        })
    }
}

/// An ordered chain of stages and the workers running them.
pub struct Pipeline {
    stages: Vec<Stage>,
    names: Vec<Arc<str>>,
    stats: Vec<Arc<StageStats>>,
    state: PipelineState,
    shutdown: Shutdown,
    failure: Failure,
    output: Option<BufferRx>,
    handles: Vec<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
    /// Set once the iterator has returned an error or `None`.
    fused: bool,
}

impl Pipeline {
    /// Build a pipeline. The first stage must be the only source.
    ///
    /// Unnamed stages are named `<kind>-<position>`.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        match stages.first() {
            None => {
                return Err(PipelineError::Config(
                    "a pipeline needs at least a source stage".to_string(),
                ));
            }
            Some(first) if first.kind() != StageKind::Source => {
                return Err(PipelineError::Config(format!(
                    "the first stage must be a source, not {}",
                    first.kind()
                )));
            }
            Some(_) => {}
        }
        if let Some(pos) = stages[1..]
            .iter()
            .position(|s| s.kind() == StageKind::Source)
        {
            return Err(PipelineError::Config(format!(
                "stage {} is a second source",
                pos + 1
            )));
        }

        let names = stages
            .iter()
            .enumerate()
            .map(|(i, s)| match s.name() {
                Some(name) => Arc::from(name),
                None => Arc::from(format!("{}-{i}", s.kind())),
            })
            .collect();
        let stats = stages.iter().map(|_| Arc::default()).collect();
        let shutdown = Shutdown::new();
        Ok(Self {
            stages,
            names,
            stats,
            state: PipelineState::Idle,
            failure: Failure::new(shutdown.clone()),
            shutdown,
            output: None,
            handles: Vec::new(),
            live: Arc::new(AtomicUsize::new(0)),
            fused: false,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == PipelineState::Active
    }

    /// Number of worker threads currently running.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Stage names, source first.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| &**n)
    }

    /// Idle → Active: wire the buffers and start every worker.
    ///
    /// Entering an Active or Closed pipeline fails. If any worker cannot be
    /// started, the ones already running are torn down and the pipeline is
    /// Closed before the error is returned.
    pub fn enter(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Idle => {}
            PipelineState::Active => {
                return Err(PipelineError::Lifecycle(
                    "pipeline is already active".to_string(),
                ));
            }
            PipelineState::Closed => {
                return Err(PipelineError::Lifecycle(
                    "a closed pipeline cannot be entered again; build a new one".to_string(),
                ));
            }
        }
        debug!(stages = self.stages.len(), "entering pipeline");
        self.state = PipelineState::Active;
        self.fused = false;

        if let Err(e) = self.start_workers() {
            warn!(error = %e, "pipeline failed to start");
            self.exit();
            return Err(e);
        }
        Ok(())
    }

    fn start_workers(&mut self) -> Result<()> {
        let mut spawner = Spawner {
            failure: &self.failure,
            shutdown: &self.shutdown,
            live: &self.live,
            handles: &mut self.handles,
        };

        let mut input: Option<BufferRx> = None;
        let n = self.stages.len();
        for i in 0..n {
            // Stage i writes into the buffer feeding stage i + 1; the last
            // stage writes into the consumer's buffer, sized like its own.
            let capacity = self
                .stages
                .get(i + 1)
                .unwrap_or(&self.stages[i])
                .spec
                .buffer_capacity();
            let (tx, rx) = bounded(capacity, &self.shutdown);
            spawner.start_stage(
                &mut self.stages[i],
                Arc::clone(&self.names[i]),
                &self.stats[i],
                input.take(),
                tx,
            )?;
            input = Some(rx);
        }
        self.output = input;
        Ok(())
    }

    /// Active → Closed: broadcast shutdown, join every worker, drop buffers.
    ///
    /// Safe to call any number of times, and a no-op on an Idle pipeline.
    pub fn exit(&mut self) {
        if self.state != PipelineState::Active {
            return;
        }
        debug!(workers = self.handles.len(), "exiting pipeline");
        self.shutdown.trigger();
        self.output = None;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("a pipeline worker panicked outside user code");
            }
        }
        self.state = PipelineState::Closed;
    }

    /// Pull the next item from the last stage.
    ///
    /// Returns `None` when a finite source is exhausted. A worker failure is
    /// returned once, after teardown.
    pub fn next_item(&mut self) -> Option<Result<Item>> {
        match self.state {
            PipelineState::Idle => {
                return Some(Err(PipelineError::Lifecycle(
                    "pipeline has not been entered".to_string(),
                )));
            }
            PipelineState::Closed => {
                return Some(Err(PipelineError::Lifecycle(
                    "pipeline is closed".to_string(),
                )));
            }
            PipelineState::Active => {}
        }
        if let Some(err) = self.failure.take() {
            return Some(Err(self.fail(err)));
        }
        let output = self.output.as_ref()?;
        match output.pull() {
            Pull::Item(item) => Some(Ok(item)),
            Pull::Exhausted | Pull::Shutdown => match self.failure.take() {
                Some(err) => Some(Err(self.fail(err))),
                None => {
                    self.output = None;
                    None
                }
            },
        }
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        self.exit();
        err
    }

    /// Counters for every stage, source first.
    pub fn stats(&self) -> PipelineStats {
        let stages = self
            .stages
            .iter()
            .zip(&self.names)
            .zip(&self.stats)
            .map(|((stage, name), stats)| StageSnapshot {
                name: name.to_string(),
                kind: stage.kind().to_string(),
                workers: stage.spec.workers(),
                buffer_capacity: stage.spec.buffer_capacity(),
                received: stats.received(),
                emitted: stats.emitted(),
                failures: stats.failures(),
            })
            .collect();
        PipelineStats {
            state: self.state.to_string(),
            live_workers: self.live_workers(),
            stages,
        }
    }
}

impl Iterator for Pipeline {
    type Item = Result<Item>;

    /// Like [`Pipeline::next_item`], but fused: after the first error or
    /// end of stream it returns `None` until the pipeline is entered.
    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        let next = self.next_item();
        if !matches!(next, Some(Ok(_))) {
            self.fused = true;
        }
        next
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.exit();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("stages", &self.stages)
            .finish()
    }
}
