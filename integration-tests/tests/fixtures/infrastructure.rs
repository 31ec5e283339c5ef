// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared scaffolding for driving the real `bear` binary end to end:
//! a scratch directory, a helper to run `bear -- <command>`, and a
//! thin wrapper around the resulting compilation database.
//!
//! Follows the teacher's `TestEnvironment` shape (a temp dir plus a
//! `run_bear` helper returning the raw `Output`) scoped down to what
//! this tool's single collector invocation needs.

use super::constants::*;
use anyhow::{Context, Result};
use assert_fs::prelude::*;
use assert_fs::TempDir;
use serde_json::Value;
use std::path::PathBuf;
use std::process::{Command, Output};

pub struct TestEnvironment {
    pub dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("failed to create temp dir")?;
        Ok(TestEnvironment { dir })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.child(name).path().to_path_buf()
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let file = self.dir.child(name);
        file.write_str(contents)?;
        Ok(file.path().to_path_buf())
    }

    /// Runs `bear -o <db> -b <preload> -- <command...>` inside this
    /// environment's directory and returns the raw process output.
    pub fn run_bear(&self, output_name: &str, command: &[&str]) -> Result<Output> {
        self.run_bear_with(output_name, &[], command)
    }

    /// Like [`TestEnvironment::run_bear`], but with `extra_args` inserted
    /// between the standard `-o`/`-b` flags and the `--` build command —
    /// e.g. `&["-d"]` to run the collector in debug mode.
    pub fn run_bear_with(
        &self,
        output_name: &str,
        extra_args: &[&str],
        command: &[&str],
    ) -> Result<Output> {
        let db_path = self.path(output_name);

        let mut cmd = Command::new(BEAR_EXECUTABLE_PATH);
        cmd.current_dir(self.dir.path())
            .arg("-o")
            .arg(&db_path)
            .arg("-b")
            .arg(PRELOAD_LIBRARY_PATH)
            .args(extra_args)
            .arg("--")
            .args(command);

        cmd.output().context("failed to run bear")
    }

    pub fn load_database(&self, output_name: &str) -> Result<Vec<Value>> {
        let contents = std::fs::read_to_string(self.path(output_name))
            .context("failed to read compilation database")?;
        let value: Value =
            serde_json::from_str(&contents).context("compilation database is not valid JSON")?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }
}
