// SPDX-License-Identifier: GPL-3.0-or-later

//! Captures the ambient state `bear` needs at startup, the way the
//! teacher's `context.rs` separates I/O-gathering from validation: all
//! of the environment reading happens once, up front, so the rest of
//! the program works with a plain value instead of calling back into
//! `std::env` piecemeal.

use crate::environment::{KEY_PRELOAD, KEY_SOCKET};
use anyhow::{Context as AnyhowContext, Result};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Context {
    pub current_executable: PathBuf,
    pub current_directory: PathBuf,
    pub environment: HashMap<String, String>,
}

impl Context {
    /// Captures the current application context. Performs I/O and should
    /// be called once, early in `main`.
    pub fn capture() -> Result<Self> {
        let current_executable =
            env::current_exe().with_context(|| "failed to get current executable path")?;
        let current_directory =
            env::current_dir().with_context(|| "failed to get current working directory")?;
        let environment = env::vars().collect();

        Ok(Context {
            current_executable,
            current_directory,
            environment,
        })
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bear context:")?;
        writeln!(
            f,
            "  executable: {}",
            self.current_executable.display()
        )?;
        writeln!(f, "  directory: {}", self.current_directory.display())?;
        writeln!(f, "  {} environment variables", self.environment.len())?;
        for key in [KEY_PRELOAD, KEY_SOCKET] {
            if let Some(value) = self.environment.get(key) {
                writeln!(f, "  {key}={value}")?;
            }
        }
        Ok(())
    }
}
