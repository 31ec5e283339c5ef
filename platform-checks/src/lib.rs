// SPDX-License-Identifier: GPL-3.0-or-later

//! Build-time utilities for system capability detection.
//!
//! These helpers are meant to be called from `build.rs` scripts. They try to
//! compile a tiny C snippet against the host's headers and emit a
//! `cargo:rustc-cfg` flag when the compile succeeds, so the rest of the crate
//! can gate platform-specific code behind `cfg(has_symbol_*)` / `cfg(has_header_*)`.

use std::collections::HashSet;
use std::io::Write;

/// Check if a header file is available on the system.
///
/// Emits `cargo:rustc-cfg=has_header_{define}` when the header is found.
pub fn check_include_file(header: &str, define: &str) -> bool {
    let result = cc::Build::new()
        .cargo_metadata(false)
        .cargo_output(false)
        .cargo_warnings(false)
        .inherit_rustflags(true)
        .file(
            tempfile::Builder::new()
                .prefix("check_include_")
                .suffix(".c")
                .tempfile_in(std::env::var("OUT_DIR").unwrap_or_else(|_| "target".to_string()))
                .expect("failed to create temp file for include check")
                .keep()
                .expect("failed to keep temp file")
                .1,
        )
        .include(header)
        .try_compile(define);

    match result {
        Ok(_) => {
            println!("cargo:rustc-cfg=has_header_{define}");
            println!("cargo:rustc-check-cfg=cfg(has_header_{define})");
            true
        }
        Err(_) => {
            println!("cargo:warning=checking for include file: {header} ... missing");
            false
        }
    }
}

/// Check if a symbol exists in a header file.
///
/// Emits `cargo:rustc-cfg=has_symbol_{symbol}` when the symbol is found.
pub fn check_symbol_exists(symbol: &str, header: &str) -> bool {
    let check_code = format!(
        r#"
        #include <stddef.h>
        #include <{header}>

        int main() {{
            void *ptr = (void*){symbol};
            (void)ptr;
            return 0;
        }}
        "#
    );

    let (mut file, path) = tempfile::Builder::new()
        .prefix(&format!("check_{symbol}"))
        .suffix(".c")
        .tempfile_in(std::env::var("OUT_DIR").unwrap_or_else(|_| "target".to_string()))
        .expect("failed to create temp file for symbol check")
        .keep()
        .expect("failed to keep temp file");

    file.write_all(check_code.as_bytes())
        .expect("failed to write temp file");
    file.flush().expect("failed to flush temp file");

    let result = cc::Build::new()
        .cargo_metadata(false)
        .cargo_output(false)
        .cargo_warnings(false)
        .inherit_rustflags(true)
        .define("_GNU_SOURCE", "1")
        .file(path)
        .try_compile(&format!("check_{symbol}"));

    match result {
        Ok(_) => {
            println!("cargo:rustc-cfg=has_symbol_{symbol}");
            println!("cargo:rustc-check-cfg=cfg(has_symbol_{symbol})");
            true
        }
        Err(_) => {
            println!("cargo:warning=checking for symbol: {symbol} ... missing");
            false
        }
    }
}

/// Runs every check the shim and the collector depend on: `dlfcn.h`'s
/// `dlopen`/`dlsym`/`RTLD_NEXT` family, and every `exec*`/`posix_spawn*`
/// entry point in the interposed surface.
///
/// `execl`/`execlp`/`execle` are C variadic functions; the shim cannot
/// forward an arbitrary-length `...` list, so it reads the fixed-arity
/// prefix it can and dispatches into `execv`/`execvp`/`execve` (see
/// `intercept-preload/src/implementation.rs`), the same approximation
/// the teacher's own shim makes. The symbols are still probed here so
/// that approximation is only compiled in where the platform actually
/// has the entry point to shadow.
///
/// Returns the set of detected `exec*`/`posix_spawn*` symbol names.
pub fn perform_system_checks() -> HashSet<String> {
    let mut detected = HashSet::new();

    check_include_file("dlfcn.h", "dlfcn_h");
    check_symbol_exists("dlsym", "dlfcn.h");
    check_symbol_exists("RTLD_NEXT", "dlfcn.h");

    check_include_file("unistd.h", "unistd_h");
    for symbol in [
        "execve", "execv", "execvpe", "execvp", "execvP", "exect", "execl", "execlp", "execle",
    ] {
        if check_symbol_exists(symbol, "unistd.h") {
            detected.insert(symbol.to_string());
        }
    }

    check_include_file("spawn.h", "spawn_h");
    for symbol in ["posix_spawn", "posix_spawnp"] {
        if check_symbol_exists(symbol, "spawn.h") {
            detected.insert(symbol.to_string());
        }
    }

    detected
}

/// All `cfg` flag names `perform_system_checks` may emit, for use in
/// `cargo:rustc-check-cfg` directives so `rustc` does not warn about them.
pub fn get_all_cfg_flags() -> Vec<&'static str> {
    vec![
        "has_header_dlfcn_h",
        "has_symbol_dlsym",
        "has_symbol_RTLD_NEXT",
        "has_header_unistd_h",
        "has_symbol_execve",
        "has_symbol_execv",
        "has_symbol_execvpe",
        "has_symbol_execvp",
        "has_symbol_execvP",
        "has_symbol_exect",
        "has_symbol_execl",
        "has_symbol_execlp",
        "has_symbol_execle",
        "has_header_spawn_h",
        "has_symbol_posix_spawn",
        "has_symbol_posix_spawnp",
    ]
}
