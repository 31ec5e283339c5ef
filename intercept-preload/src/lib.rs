// SPDX-License-Identifier: GPL-3.0-or-later

//! `LD_PRELOAD`-able shim that reports every `exec*`/`posix_spawn*` call a
//! build makes to a collector listening on a Unix domain socket.
//!
//! The actual interposition only makes sense on the platforms `bear`
//! targets; everything lives behind `cfg(target_os = "linux")` the same
//! way the teacher's `intercept-preload` crate gates it.

#[cfg(target_os = "linux")]
mod implementation;

#[cfg(target_os = "linux")]
pub use implementation::*;

/// Version string embedded in the built library, readable with `strings`
/// on the compiled `.so` for support purposes.
#[no_mangle]
pub static LIBEXEC_VERSION: &[u8; 6] = b"1.0.0\0";
