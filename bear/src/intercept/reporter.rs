// SPDX-License-Identifier: GPL-3.0-or-later

//! The client half of the wire protocol, used by the preload shim.
//!
//! Grounded on the teacher's `intercept::reporter`/`tcp` pair: a small
//! trait abstracting "send one observation", backed here by a Unix
//! domain socket instead of TCP. A fresh connection is opened and
//! closed for every observation, the same one-shot-per-event shape the
//! teacher's `ReporterOnTcp` uses.

use crate::wire::{self, Observation};
use std::os::unix::net::UnixStream;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("failed to connect to collector socket: {0}")]
    Connect(#[source] std::io::Error),
    #[error("failed to send observation: {0}")]
    Send(#[source] std::io::Error),
}

/// Sends observations to a remote collector.
pub trait Reporter {
    fn report(&self, observation: &Observation) -> Result<(), ReporterError>;
}

/// Reports observations over a Unix domain socket named by path.
pub struct UnixSocketReporter {
    socket_path: std::path::PathBuf,
}

impl UnixSocketReporter {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        UnixSocketReporter {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }
}

impl Reporter for UnixSocketReporter {
    fn report(&self, observation: &Observation) -> Result<(), ReporterError> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(ReporterError::Connect)?;
        wire::write_observation(&mut stream, observation).map_err(ReporterError::Send)
    }
}
