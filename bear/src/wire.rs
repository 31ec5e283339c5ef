// SPDX-License-Identifier: GPL-3.0-or-later

//! The wire protocol spoken between the shim and the collector.
//!
//! Every message is built out of two framing primitives:
//!
//! - a **string frame**: a four-byte, host-byte-order length prefix
//!   followed by exactly that many bytes of UTF-8 payload. A length of
//!   zero is a legal frame and represents an empty string.
//! - a **string-vector frame**: a four-byte element count, followed by
//!   that many string frames, followed by one more (always-zero-length)
//!   frame that closes the vector.
//!
//! The trailing frame exists so the vector has an unambiguous end marker
//! on the wire even though it is not used to detect the end while reading
//! (the count already says how many elements to expect) — a bare
//! "stop at the first zero-length frame" reader would wrongly terminate
//! on a real argv element that happens to be the empty string, which the
//! codec is required to round-trip faithfully.
//!
//! An [`Observation`] frame is one string frame (the working directory)
//! followed by one string-vector frame (the argument vector), followed,
//! when `include_fn_name` is set, by a trailing string frame carrying the
//! name of the intercepted entry point (debug builds only).

use std::io::{self, Read, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("short read: connection closed before a complete frame was received")]
    ShortRead,
    #[error("frame payload was not valid UTF-8")]
    InvalidUtf8,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    fn from_read_error(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            WireError::ShortRead
        } else {
            WireError::Io(err)
        }
    }
}

/// One intercepted `exec*` call, captured just before the real call is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// The working directory of the calling process at the moment of the call.
    pub cwd: PathBuf,
    /// The argument vector as presented to the intercepted entry point,
    /// including `argv[0]` exactly as the caller passed it.
    pub cmd: Vec<String>,
    /// The name of the intercepted entry point (e.g. `"execve"`), present
    /// only when the debug wire variant is in use.
    pub fn_name: Option<String>,
}

impl Observation {
    pub fn new(cwd: PathBuf, cmd: Vec<String>) -> Self {
        Observation {
            cwd,
            cmd,
            fn_name: None,
        }
    }

    pub fn with_fn_name(mut self, fn_name: impl Into<String>) -> Self {
        self.fn_name = Some(fn_name.into());
        self
    }
}

pub fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    let len = bytes.len() as u32;
    writer.write_all(&len.to_ne_bytes())?;
    writer.write_all(bytes)
}

pub fn read_string<R: Read>(reader: &mut R) -> Result<String, WireError> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(WireError::from_read_error)?;
    let len = u32::from_ne_bytes(len_bytes) as usize;

    let mut buffer = vec![0u8; len];
    reader
        .read_exact(&mut buffer)
        .map_err(WireError::from_read_error)?;
    String::from_utf8(buffer).map_err(|_| WireError::InvalidUtf8)
}

pub fn write_string_vec<W: Write>(writer: &mut W, items: &[String]) -> io::Result<()> {
    writer.write_all(&(items.len() as u32).to_ne_bytes())?;
    for item in items {
        write_string(writer, item)?;
    }
    // Sentinel: always written, always consumed, never interpreted as data.
    write_string(writer, "")
}

pub fn read_string_vec<R: Read>(reader: &mut R) -> Result<Vec<String>, WireError> {
    let mut count_bytes = [0u8; 4];
    reader
        .read_exact(&mut count_bytes)
        .map_err(WireError::from_read_error)?;
    let count = u32::from_ne_bytes(count_bytes) as usize;

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_string(reader)?);
    }
    let _sentinel = read_string(reader)?;
    Ok(items)
}

pub fn write_observation<W: Write>(writer: &mut W, observation: &Observation) -> io::Result<()> {
    write_string(writer, &observation.cwd.to_string_lossy())?;
    write_string_vec(writer, &observation.cmd)?;
    if let Some(fn_name) = &observation.fn_name {
        write_string(writer, fn_name)?;
    }
    Ok(())
}

pub fn read_observation<R: Read>(
    reader: &mut R,
    include_fn_name: bool,
) -> Result<Observation, WireError> {
    let cwd = PathBuf::from(read_string(reader)?);
    let cmd = read_string_vec(reader)?;
    let fn_name = if include_fn_name {
        Some(read_string(reader)?)
    } else {
        None
    };

    Ok(Observation { cwd, cmd, fn_name })
}
