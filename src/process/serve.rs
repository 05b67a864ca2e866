//! Worker-process side of a process-pool stage.

use super::frame::{Reply, read_frame, write_frame};
use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::io::{self, BufReader, BufWriter, Read, Write};

/// Serve `f` over stdin/stdout until the parent closes stdin.
///
/// Call this from the `main` of a worker program:
///
/// ```no_run
/// fn main() -> anyhow::Result<()> {
///     ironbatch::process::serve(|x: i64| Ok(x * x))
/// }
/// ```
///
/// Nothing else may write to stdout while serving; log to stderr instead.
pub fn serve<I, O, F>(f: F) -> Result<()>
where
    I: DeserializeOwned,
    O: Serialize,
    F: FnMut(I) -> Result<O>,
{
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    serve_io(BufReader::new(stdin), BufWriter::new(stdout), f)
}

/// Serve `f` over arbitrary streams. Returns when `input` reaches end of stream.
pub fn serve_io<R, W, I, O, F>(mut input: R, mut output: W, mut f: F) -> Result<()>
where
    R: Read,
    W: Write,
    I: DeserializeOwned,
    O: Serialize,
    F: FnMut(I) -> Result<O>,
{
    while let Some(frame) = read_frame(&mut input).context("reading input frame")? {
        let reply = match postcard::from_bytes::<I>(&frame) {
            Err(e) => Reply::Codec(format!("could not decode input: {e}")),
            Ok(value) => match f(value) {
                Ok(out) => match postcard::to_allocvec(&out) {
                    Ok(bytes) => Reply::Output(bytes),
                    Err(e) => Reply::Codec(format!("could not encode output: {e}")),
                },
                Err(e) => Reply::Failed(format!("{e:#}")),
            },
        };
        let bytes = postcard::to_allocvec(&reply).context("encoding reply")?;
        write_frame(&mut output, &bytes).context("writing reply frame")?;
    }
    Ok(())
}
