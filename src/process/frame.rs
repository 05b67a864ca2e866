//! Length-prefixed frames exchanged with worker processes.
//!
//! Every message is a little-endian `u32` byte length followed by that many
//! bytes of `postcard`. The parent sends one encoded input per frame; the
//! worker answers each with exactly one encoded [`Reply`].

use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind, Read, Write};

/// Frames larger than this are rejected rather than allocated.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// A worker's answer to one input frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// The transform succeeded; payload is the `postcard` encoding of the output.
    Output(Vec<u8>),
    /// The transform returned an error.
    Failed(String),
    /// The input could not be decoded or the output could not be encoded.
    Codec(String),
}

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", payload.len()),
        ));
    }
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Read one frame. Returns `Ok(None)` on end of stream at a frame boundary.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match r.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("frame length {len} exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(Some(payload))
}
