// SPDX-License-Identifier: GPL-3.0-or-later

#[allow(dead_code)]
pub const BEAR_EXECUTABLE_PATH: &str = env!("BEAR_EXECUTABLE_PATH");
#[allow(dead_code)]
pub const PRELOAD_LIBRARY_PATH: &str = env!("PRELOAD_LIBRARY_PATH");

#[cfg(has_executable_compiler_c)]
#[allow(dead_code)]
pub const COMPILER_C_PATH: &str = env!("COMPILER_C_PATH");
