// SPDX-License-Identifier: GPL-3.0-or-later

//! Locates the artifacts the integration tests drive: the `bear` binary
//! and the `libexec.so` shim built elsewhere in this workspace, plus a
//! real C compiler on `PATH` so tests can compile an actual fixture
//! file instead of faking a compiler invocation.

#[cfg(unix)]
const PRELOAD_NAME: &str = "libexec.so";
#[cfg(windows)]
const PRELOAD_NAME: &str = "exec.dll";

fn main() {
    let (bear_path, preload_path) = find_workspace_artifacts();
    println!("cargo:rustc-env=BEAR_EXECUTABLE_PATH={bear_path}");
    println!("cargo:rustc-env=PRELOAD_LIBRARY_PATH={preload_path}");

    println!("cargo:rerun-if-env-changed=CARGO_TARGET_DIR");
    println!("cargo:rerun-if-env-changed=PROFILE");
    println!("cargo:rerun-if-changed=../bear/src");
    println!("cargo:rerun-if-changed=../intercept-preload/src");

    platform_checks::perform_system_checks();
    check_one_executable_exists("compiler_c", &["cc", "gcc", "clang"]);
}

fn find_workspace_artifacts() -> (String, String) {
    let out_dir = std::env::var("OUT_DIR").unwrap();
    // OUT_DIR looks like `target/<profile>/build/<crate>-<hash>/out`; the
    // binaries from other workspace members land directly in `target/<profile>`.
    let target_dir = std::path::Path::new(&out_dir).ancestors().nth(3).unwrap();

    let bear_path = target_dir.join("bear");
    let preload_path = target_dir.join(PRELOAD_NAME);

    (
        bear_path.display().to_string(),
        preload_path.display().to_string(),
    )
}

fn check_one_executable_exists(define: &str, candidates: &[&str]) {
    for candidate in candidates {
        if let Ok(path) = which::which(candidate) {
            println!("cargo:rustc-cfg=has_executable_{define}");
            println!("cargo:rustc-check-cfg=cfg(has_executable_{define})");
            println!(
                "cargo:rustc-env={}_PATH={}",
                define.to_uppercase(),
                path.display()
            );
            return;
        }
    }
    println!("cargo:warning=no executable found for {define} ({candidates:?})");
}
