//! Process-pool stages.
//!
//! Each worker of a process stage owns one child process and one parent-side
//! thread. The thread pulls an item from the stage's input buffer, encodes it
//! with `postcard`, sends it to the child as a [`frame`], waits for the
//! child's [`Reply`](frame::Reply), and pushes the decoded output downstream.
//! The child runs [`serve`] (see the `ironbatch-worker` binary for an
//! example).
//!
//! Failures are classified before they reach the consumer:
//! - encode/decode problems on either side are
//!   [`Serialization`](crate::PipelineError::Serialization) errors,
//! - a child that exits, or whose pipes break mid-item, is
//!   [`WorkerCrashed`](crate::PipelineError::WorkerCrashed),
//! - an error returned by the transform in the child is a
//!   [`Transform`](crate::PipelineError::Transform) error.
//!
//! Closing stdin is the child's shutdown signal; the parent then waits for it.

pub mod frame;
mod serve;

pub use serve::{serve, serve_io};

use crate::buffer::{BufferRx, BufferTx, Pull};
use crate::error::{PipelineError, Result};
use crate::item::{Item, box_item, unbox_item};
use crate::workers::WorkerContext;
use anyhow::anyhow;
use frame::{Reply, read_frame, write_frame};
use serde::{Serialize, de::DeserializeOwned};
use std::ffi::OsString;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

/// The program a process stage runs for each worker.
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<A: Into<OsString>>(mut self, args: impl IntoIterator<Item = A>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub(crate) fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

type EncodeFn = Box<dyn Fn(&str, Item) -> Result<Vec<u8>> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&str, &[u8]) -> Result<Item> + Send + Sync>;

/// Type-erased codec plus the command to run.
pub(crate) struct ProcessTransform {
    pub(crate) command: WorkerCommand,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl ProcessTransform {
    pub(crate) fn new<I, O>(command: WorkerCommand) -> Self
    where
        I: Serialize + Send + 'static,
        O: DeserializeOwned + Send + 'static,
    {
        let encode: EncodeFn = Box::new(|stage: &str, item: Item| {
            let value = unbox_item::<I>(stage, item)?;
            postcard::to_allocvec(&value).map_err(|e| PipelineError::Serialization {
                stage: stage.to_string(),
                message: format!("could not encode input: {e}"),
            })
        });
        let decode: DecodeFn = Box::new(|stage: &str, bytes: &[u8]| {
            postcard::from_bytes::<O>(bytes)
                .map(box_item)
                .map_err(|e| PipelineError::Serialization {
                    stage: stage.to_string(),
                    message: format!("could not decode output: {e}"),
                })
        });
        Self {
            command,
            encode,
            decode,
        }
    }
}

/// A spawned child not yet owned by a running worker.
///
/// Dropping it kills and reaps the process, so a worker thread that never
/// starts does not leave it behind.
pub(crate) struct SpawnedChild(Option<Child>);

impl SpawnedChild {
    pub(crate) fn new(child: Child) -> Self {
        Self(Some(child))
    }

    pub(crate) fn id(&self) -> Option<u32> {
        self.0.as_ref().map(Child::id)
    }

    fn release(mut self) -> Option<Child> {
        self.0.take()
    }
}

impl Drop for SpawnedChild {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Drive one child until upstream ends, the pipeline shuts down, or
/// something fails. Always reaps the child before returning.
pub(crate) fn run_worker(
    ctx: &WorkerContext,
    child: SpawnedChild,
    transform: &ProcessTransform,
    input: BufferRx,
    output: BufferTx,
) {
    let Some(mut child) = child.release() else {
        return;
    };
    let pid = child.id();
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        ctx.fail(ctx.crashed("worker pipes unavailable".to_string()));
        let _ = child.kill();
        let _ = child.wait();
        return;
    };
    let mut stdin = BufWriter::new(stdin);
    let mut stdout = BufReader::new(stdout);

    let result = exchange(ctx, transform, &input, &output, &mut stdin, &mut stdout);

    drop(stdin);
    drop(stdout);
    let status = child.wait();
    match &status {
        Ok(st) => debug!(stage = %ctx.stage, worker = ctx.index, pid, %st, "worker process exited"),
        Err(e) => warn!(stage = %ctx.stage, worker = ctx.index, pid, error = %e, "could not reap worker process"),
    }

    if let Err(mut err) = result {
        if let (PipelineError::WorkerCrashed { message, .. }, Ok(st)) = (&mut err, &status) {
            if !st.success() {
                message.push_str(&format!(" ({st})"));
            }
        }
        ctx.fail(err);
    }
}

fn exchange<W: Write, R: Read>(
    ctx: &WorkerContext,
    transform: &ProcessTransform,
    input: &BufferRx,
    output: &BufferTx,
    stdin: &mut W,
    stdout: &mut R,
) -> Result<()> {
    loop {
        let item = match input.pull() {
            Pull::Item(item) => item,
            Pull::Exhausted | Pull::Shutdown => return Ok(()),
        };
        ctx.stats.record_received();

        let frame = (transform.encode)(&*ctx.stage, item)?;
        write_frame(stdin, &frame)
            .map_err(|e| ctx.crashed(format!("could not send input: {e}")))?;
        let reply = match read_frame(stdout) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(ctx.crashed("worker exited before replying".to_string())),
            Err(e) => return Err(ctx.crashed(format!("could not read reply: {e}"))),
        };
        let reply: Reply =
            postcard::from_bytes(&reply).map_err(|e| PipelineError::Serialization {
                stage: ctx.stage.to_string(),
                message: format!("malformed reply frame: {e}"),
            })?;

        let value = match reply {
            Reply::Output(bytes) => (transform.decode)(&*ctx.stage, &bytes)?,
            Reply::Failed(message) => {
                return Err(PipelineError::Transform {
                    stage: ctx.stage.to_string(),
                    source: anyhow!(message),
                });
            }
            Reply::Codec(message) => {
                return Err(PipelineError::Serialization {
                    stage: ctx.stage.to_string(),
                    message,
                });
            }
        };
        if !output.push(value) {
            return Ok(());
        }
        ctx.stats.record_emitted();
    }
}
