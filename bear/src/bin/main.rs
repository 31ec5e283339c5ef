// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Context as AnyhowContext;
use bear::environment::{
    DEFAULT_PRELOAD_FILE, DEFAULT_SOCKET_DIR_PREFIX, DEFAULT_SOCKET_FILE_NAME,
};
use bear::intercept::Collector;
use bear::{args, context, filter};
use std::env;
use std::fs::File;
use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();

    let pkg_name = env!("CARGO_PKG_NAME");
    let pkg_version = env!("CARGO_PKG_VERSION");
    log::info!("{pkg_name} v{pkg_version}");
    log::info!(
        "running on {}/{} {}",
        env::consts::FAMILY,
        env::consts::OS,
        env::consts::ARCH
    );

    let context = context::Context::capture()?;
    log::debug!("{context}");

    let matches = args::cli().get_matches();
    let request = match args::Request::try_from(matches) {
        Ok(request) => request,
        Err(err @ args::ParseError::MissingBuildCommand) => {
            eprintln!("error: {err}\n");
            args::cli().write_long_help(&mut std::io::stderr())?;
            return Ok(ExitCode::FAILURE);
        }
    };

    match request {
        args::Request::ListCompilers => {
            for pattern in filter::COMPILER_PATTERN_SOURCES {
                println!("{pattern}");
            }
            Ok(ExitCode::SUCCESS)
        }
        args::Request::ListExtensions => {
            for extension in filter::SOURCE_EXTENSIONS {
                println!("{extension}");
            }
            Ok(ExitCode::SUCCESS)
        }
        args::Request::PrintVersion => {
            println!("{pkg_name} {pkg_version}");
            Ok(ExitCode::SUCCESS)
        }
        args::Request::Run(run) => run_collector(context, run),
    }
}

fn run_collector(context: context::Context, run: args::RunArguments) -> anyhow::Result<ExitCode> {
    let preload_path = run.preload.unwrap_or_else(|| {
        context
            .current_executable
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(DEFAULT_PRELOAD_FILE)
    });

    // A socket path given on the command line is used as-is; otherwise a
    // private temporary directory holds it so no two concurrent runs of
    // `bear` can collide on the same path.
    let _socket_dir;
    let socket_path = match run.socket {
        Some(path) => path,
        None => {
            let dir = tempfile::Builder::new()
                .prefix(DEFAULT_SOCKET_DIR_PREFIX)
                .tempdir()
                .context("failed to create a private temp directory for the socket")?;
            let path = dir.path().join(DEFAULT_SOCKET_FILE_NAME);
            _socket_dir = dir;
            path
        }
    };

    log::info!("preload library: {}", preload_path.display());
    log::info!("collector socket: {}", socket_path.display());
    log::info!("build command: {:?}", run.command);

    // Opened before the collector forks so records can be streamed to it
    // as they're classified, rather than held in memory for the whole run.
    let file = File::create(&run.output)
        .with_context(|| format!("failed to create {}", run.output.display()))?;

    let collector = Collector::new(run.command, socket_path, preload_path).with_debug(run.debug);
    let outcome = collector.run(file)?;
    log::info!("collected compilation records into {}", run.output.display());

    Ok(ExitCode::from(outcome.exit_code.clamp(0, 255) as u8))
}
