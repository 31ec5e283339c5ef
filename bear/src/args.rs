// SPDX-License-Identifier: GPL-3.0-or-later

//! The command line interface of the `bear` binary.
//!
//! Built with `clap`'s builder API and a `TryFrom<ArgMatches>` conversion
//! into a typed [`Request`], the same shape the teacher's `args.rs` uses —
//! scoped down to the single collector invocation this tool supports,
//! rather than the teacher's intercept/semantic/combined subcommand split.

use crate::environment::DEFAULT_OUTPUT_FILE;
use clap::{arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no build command was given")]
    MissingBuildCommand,
}

/// What the user asked `bear` to do on this invocation.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    /// Run the collector against a build command.
    Run(RunArguments),
    /// Print the recognised compiler-name patterns (`-c`) and stop.
    ListCompilers,
    /// Print the recognised source file extensions (`-e`) and stop.
    ListExtensions,
    /// Print version information (`-v`) and stop.
    PrintVersion,
}

/// Arguments for a collector run.
#[derive(Debug, PartialEq, Eq)]
pub struct RunArguments {
    /// Where to write the compilation database.
    pub output: PathBuf,
    /// Path of the shim library to preload, if not the platform default.
    pub preload: Option<PathBuf>,
    /// An explicit socket path, which suppresses the private-temp-directory flow.
    pub socket: Option<PathBuf>,
    /// Record compiler invocations that match no source file, omitting `file`.
    pub debug: bool,
    /// The build command and its arguments.
    pub command: Vec<String>,
}

impl TryFrom<ArgMatches> for Request {
    type Error = ParseError;

    fn try_from(matches: ArgMatches) -> Result<Self, Self::Error> {
        if matches.get_flag("list-compilers") {
            return Ok(Request::ListCompilers);
        }
        if matches.get_flag("list-extensions") {
            return Ok(Request::ListExtensions);
        }
        if matches.get_flag("version") {
            return Ok(Request::PrintVersion);
        }

        let command: Vec<String> = matches
            .get_many::<String>("COMMAND")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        if command.is_empty() {
            return Err(ParseError::MissingBuildCommand);
        }

        Ok(Request::Run(RunArguments {
            output: matches
                .get_one::<String>("output")
                .map(PathBuf::from)
                .expect("output is defaulted"),
            preload: matches.get_one::<String>("preload").map(PathBuf::from),
            socket: matches.get_one::<String>("socket").map(PathBuf::from),
            debug: matches.get_flag("debug"),
            command,
        }))
    }
}

/// Builds the `clap` command line definition.
pub fn cli() -> Command {
    Command::new("bear")
        .about("Generates a compilation database by interposing on exec calls in a build.")
        .disable_version_flag(true)
        .arg(
            arg!(-o --output <PATH> "Path of the output compilation database")
                .default_value(DEFAULT_OUTPUT_FILE),
        )
        .arg(arg!(-b --preload <PATH> "Path of the shim library to preload"))
        .arg(arg!(-s --socket <PATH> "Explicit collector socket path"))
        .arg(
            arg!(-d --debug "Record compiler invocations that match no source file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(-c --"list-compilers" "Print the recognised compiler name patterns and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(-e --"list-extensions" "Print the recognised source file extensions and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(arg!(-v --version "Print version information and exit").action(ArgAction::SetTrue))
        .arg(
            arg!([COMMAND] "Build command to run")
                .action(ArgAction::Append)
                .num_args(1..)
                .last(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_invocation() {
        let matches = cli().get_matches_from(["bear", "--", "make", "all"]);
        let request = Request::try_from(matches).unwrap();

        assert_eq!(
            request,
            Request::Run(RunArguments {
                output: PathBuf::from(DEFAULT_OUTPUT_FILE),
                preload: None,
                socket: None,
                debug: false,
                command: vec!["make".to_string(), "all".to_string()],
            })
        );
    }

    #[test]
    fn parses_all_flags() {
        let matches = cli().get_matches_from([
            "bear",
            "-o",
            "out.json",
            "-b",
            "/tmp/libexec.so",
            "-s",
            "/tmp/sock",
            "-d",
            "--",
            "make",
        ]);
        let request = Request::try_from(matches).unwrap();

        assert_eq!(
            request,
            Request::Run(RunArguments {
                output: PathBuf::from("out.json"),
                preload: Some(PathBuf::from("/tmp/libexec.so")),
                socket: Some(PathBuf::from("/tmp/sock")),
                debug: true,
                command: vec!["make".to_string()],
            })
        );
    }

    #[test]
    fn rejects_missing_build_command() {
        let matches = cli().get_matches_from(["bear"]);
        assert_eq!(
            Request::try_from(matches),
            Err(ParseError::MissingBuildCommand)
        );
    }

    #[test]
    fn list_compilers_flag_short_circuits_the_missing_command_check() {
        let matches = cli().get_matches_from(["bear", "-c"]);
        assert_eq!(Request::try_from(matches).unwrap(), Request::ListCompilers);
    }

    #[test]
    fn list_extensions_flag_short_circuits_the_missing_command_check() {
        let matches = cli().get_matches_from(["bear", "-e"]);
        assert_eq!(
            Request::try_from(matches).unwrap(),
            Request::ListExtensions
        );
    }

    #[test]
    fn version_flag_short_circuits_the_missing_command_check() {
        let matches = cli().get_matches_from(["bear", "-v"]);
        assert_eq!(Request::try_from(matches).unwrap(), Request::PrintVersion);
    }
}
