// SPDX-License-Identifier: GPL-3.0-or-later

fn main() {
    if cfg!(target_os = "linux") {
        println!("cargo:rerun-if-changed=src/lib.rs");
        println!("cargo:rerun-if-changed=src/implementation.rs");
        println!("cargo:rustc-cdylib-link-arg=-Wl,--export-dynamic");
        println!("cargo:rustc-link-arg=-Wl,-rpath,$ORIGIN");

        platform_checks::perform_system_checks();
    } else {
        println!("cargo:warning=the exec-interposition shim is only supported on Linux");
    }
}
