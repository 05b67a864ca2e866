//! Worker program for process-pool stages over `i64` items.
//!
//! Usage: `ironbatch-worker <transform>` where `<transform>` is one of
//! `identity`, `square`, `negate`, `fail-on=N` (the transform returns an
//! error for input `N`), or `crash-on=N` (the process exits for input `N`).
//! `garble` answers every input with a frame that is not a valid reply.

use anyhow::{Context, Result, bail};
use ironbatch::process::frame::{read_frame, write_frame};
use std::env;
use std::io;
use std::process;

enum Transform {
    Identity,
    Square,
    Negate,
    FailOn(i64),
    CrashOn(i64),
}

impl Transform {
    fn parse(arg: &str) -> Result<Self> {
        if let Some(n) = arg.strip_prefix("fail-on=") {
            return Ok(Transform::FailOn(n.parse().context("fail-on expects an integer")?));
        }
        if let Some(n) = arg.strip_prefix("crash-on=") {
            return Ok(Transform::CrashOn(n.parse().context("crash-on expects an integer")?));
        }
        match arg {
            "identity" => Ok(Transform::Identity),
            "square" => Ok(Transform::Square),
            "negate" => Ok(Transform::Negate),
            other => bail!("unknown transform `{other}`"),
        }
    }

    fn apply(&self, x: i64) -> Result<i64> {
        match *self {
            Transform::Identity => Ok(x),
            Transform::Square => x.checked_mul(x).context("square overflowed"),
            Transform::Negate => x.checked_neg().context("negate overflowed"),
            Transform::FailOn(n) if x == n => bail!("refusing input {x}"),
            Transform::CrashOn(n) if x == n => process::exit(3),
            Transform::FailOn(_) | Transform::CrashOn(_) => Ok(x),
        }
    }
}

fn garble() -> Result<()> {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    while read_frame(&mut stdin)?.is_some() {
        // Variant index 9 does not exist in `Reply`.
        write_frame(&mut stdout, &[9])?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let arg = env::args().nth(1).unwrap_or_else(|| "identity".to_string());
    if arg == "garble" {
        return garble();
    }
    let transform = Transform::parse(&arg)?;
    ironbatch::process::serve(|x: i64| transform.apply(x))
}
