//! Per-stage counters for a running pipeline.
//!
//! Each stage shares one [`StageStats`] between its workers. Counters are
//! plain atomics so recording never blocks a worker, and they outlive
//! [`Pipeline::exit`](crate::Pipeline::exit) so a torn-down pipeline can
//! still be inspected.
//!
//! # Example
//!
//! ```no_run
//! use ironbatch::*;
//!
//! # fn main() -> ironbatch::Result<()> {
//! let mut loader = Infinite::builder(0u32..)
//!     .map(|x: u32| Ok(x * 2))
//!     .batch(4, |chunk: Vec<u32>| Ok(chunk))
//!     .batches_per_epoch(10)
//!     .build()?;
//!
//! for batch in loader.epoch()? {
//!     let _batch = batch?;
//! }
//! println!("{}", loader.stats());
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one stage.
#[derive(Debug, Default)]
pub struct StageStats {
    received: AtomicU64,
    emitted: AtomicU64,
    failures: AtomicU64,
}

impl StageStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Items pulled from the input buffer.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Items pushed to the output buffer.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Failures recorded by this stage's workers.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of one stage.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct StageSnapshot {
    pub name: String,
    pub kind: String,
    pub workers: usize,
    pub buffer_capacity: usize,
    pub received: u64,
    pub emitted: u64,
    pub failures: u64,
}

/// Point-in-time view of a whole pipeline, source first.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PipelineStats {
    pub state: String,
    pub live_workers: usize,
    pub stages: Vec<StageSnapshot>,
}

impl PipelineStats {
    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&StageSnapshot> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// All counters as a JSON object.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Pipeline ({}, {} live workers):",
            self.state, self.live_workers
        )?;
        for s in &self.stages {
            writeln!(
                f,
                "  {:<20} {:<11} workers={:<3} in={:<8} out={:<8} failures={}",
                s.name, s.kind, s.workers, s.received, s.emitted, s.failures
            )?;
        }
        Ok(())
    }
}
