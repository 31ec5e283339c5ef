// SPDX-License-Identifier: GPL-3.0-or-later

//! The collector side of the interception layer: the process that forks
//! the user's build command, hands it a socket to report to, and turns
//! the stream of [`crate::wire::Observation`] frames it receives into a
//! compilation database.

pub mod collector;
pub mod reporter;

pub use collector::{Collector, CollectorError};
pub use reporter::{Reporter, ReporterError, UnixSocketReporter};
