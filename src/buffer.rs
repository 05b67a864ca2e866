//! Bounded buffers and the shutdown signal shared by every stage.
//!
//! A buffer is a bounded `crossbeam-channel` queue. Pushing to a full buffer
//! blocks the producing worker and pulling from an empty one blocks the
//! consumer, so backpressure travels upstream one stage at a time.
//!
//! Every blocking push and pull also watches the pipeline's [`Shutdown`]
//! token. Triggering it wakes all blocked workers at once; each worker then
//! drops its output sender, which ends the stream for the stage below it.

use crate::error::PipelineError;
use crate::item::Item;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded as channel, select};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Broadcast shutdown sentinel.
///
/// The signal channel never carries a message: dropping its only sender
/// disconnects it, and a disconnected receiver is ready forever, so every
/// `select!` watching it fires.
#[derive(Clone)]
pub(crate) struct Shutdown {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            signal: rx,
        }
    }

    /// Idempotent.
    pub(crate) fn trigger(&self) {
        self.trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn is_triggered(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// First-failure-wins slot. Recording a failure triggers shutdown.
#[derive(Clone)]
pub(crate) struct Failure {
    slot: Arc<Mutex<Option<PipelineError>>>,
    shutdown: Shutdown,
}

impl Failure {
    pub(crate) fn new(shutdown: Shutdown) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    pub(crate) fn record(&self, err: PipelineError) {
        {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                warn!(error = %err, "pipeline failure captured, shutting down");
                *slot = Some(err);
            }
        }
        self.shutdown.trigger();
    }

    /// Take the stored failure. Returns `Some` at most once per failure.
    pub(crate) fn take(&self) -> Option<PipelineError> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Outcome of a blocking pull.
pub(crate) enum Pull {
    Item(Item),
    /// Every upstream worker finished and the buffer is drained.
    Exhausted,
    /// The pipeline is shutting down.
    Shutdown,
}

/// Producing end of a buffer. One clone per upstream worker.
#[derive(Clone)]
pub(crate) struct BufferTx {
    tx: Sender<Item>,
    shutdown: Shutdown,
}

impl BufferTx {
    /// Block until `item` is queued. Returns `false` if the pipeline shut
    /// down or the consumer went away; the caller should stop.
    pub(crate) fn push(&self, item: Item) -> bool {
        if self.shutdown.is_triggered() {
            return false;
        }
        select! {
            send(self.tx, item) -> res => res.is_ok(),
            recv(self.shutdown.signal) -> _ => false,
        }
    }
}

/// Consuming end of a buffer. One clone per downstream worker.
#[derive(Clone)]
pub(crate) struct BufferRx {
    rx: Receiver<Item>,
    shutdown: Shutdown,
}

impl BufferRx {
    pub(crate) fn pull(&self) -> Pull {
        if self.shutdown.is_triggered() {
            return Pull::Shutdown;
        }
        select! {
            recv(self.rx) -> msg => match msg {
                Ok(item) => Pull::Item(item),
                Err(_) => Pull::Exhausted,
            },
            recv(self.shutdown.signal) -> _ => Pull::Shutdown,
        }
    }
}

/// Create a buffer holding at most `capacity` items.
pub(crate) fn bounded(capacity: usize, shutdown: &Shutdown) -> (BufferTx, BufferRx) {
    let (tx, rx) = channel(capacity);
    (
        BufferTx {
            tx,
            shutdown: shutdown.clone(),
        },
        BufferRx {
            rx,
            shutdown: shutdown.clone(),
        },
    )
}
