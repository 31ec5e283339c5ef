// SPDX-License-Identifier: GPL-3.0-or-later

//! Decides which observed `exec*` calls look like a single-source
//! compilation step, and extracts the source file such a call compiles.
//!
//! The pattern tables below are carried over from the original C
//! implementation's `filter.c`, which recognised the usual GCC/Clang
//! front-end names plus the historical version-suffixed ones
//! (`gcc-4.8`, `clang-3.4`, and similar). `output.c`'s plainer
//! extension list additionally allows `.i`/`.ii` (preprocessed sources)
//! and `.m`/`.S`; both lists are folded together here since the spec
//! does not distinguish a "debug" extension set from a normal one.

use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Source patterns for [`COMPILER_PATTERNS`], also exposed as-is for `-c`.
pub static COMPILER_PATTERN_SOURCES: &[&str] = &[
    r"^([^/]*/)*cc$",
    r"^([^/]*/)*gcc$",
    r"^([^/]*/)*gcc-\d+(\.\d+)*$",
    r"^([^/]*/)*llvm-gcc$",
    r"^([^/]*/)*clang$",
    r"^([^/]*/)*clang-\d+(\.\d+)*$",
    r"^([^/]*/)*[gc]\+\+$",
    r"^([^/]*/)*g\+\+-\d+(\.\d+)*$",
    r"^([^/]*/)*llvm-g\+\+$",
    r"^([^/]*/)*clang\+\+$",
];

static COMPILER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    COMPILER_PATTERN_SOURCES
        .iter()
        .map(|pattern| Regex::new(pattern).expect("compiler pattern must compile"))
        .collect()
});

/// Recognised source file extensions, also exposed as-is for `-e`.
pub static SOURCE_EXTENSIONS: &[&str] = &[
    "c", "C", "cc", "cxx", "cpp", "cp", "c++", "C++", "i", "ii", "m", "S",
];

/// Arguments that tell the compiler to only emit a dependency file
/// (`-M`, `-MM`, `-MD`, `-MMD`, ...). A command carrying one of these is
/// not a compilation step in the sense this tool cares about: no object
/// file is produced, so it is dropped rather than recorded.
fn is_dependency_generation_flag(arg: &str) -> bool {
    let bytes = arg.as_bytes();
    bytes.len() >= 2 && bytes[0] == b'-' && bytes[1] == b'M'
}

fn looks_like_compiler(program: &str) -> bool {
    COMPILER_PATTERNS.iter().any(|re| re.is_match(program))
}

fn has_source_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

fn resolve_path(cwd: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// The source file a compilation command was invoked on, once it has
/// been classified as a genuine compile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compilation {
    pub file: PathBuf,
}

/// The outcome of classifying one observed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// `argv[0]` matched a compiler pattern and a source file was found.
    Compilation(Compilation),
    /// `argv[0]` matched a compiler pattern but no source file was found
    /// (e.g. `cc --version`, or a dependency-generation-only invocation).
    /// Surfaced only so debug mode can still record it without a `file`.
    CompilerNoSource,
    /// `argv[0]` did not match any known compiler front end.
    NotACompiler,
}

/// Classifies `cmd` (run from `cwd`) and, if it looks like a single-file
/// compilation, returns the absolute path of the source file it compiles.
///
/// Returns `None` when `cmd` is empty, `argv[0]` does not match a known
/// compiler front end, the command carries a dependency-generation flag,
/// or no argument has a recognised source extension.
pub fn classify(cwd: &Path, cmd: &[String]) -> Option<Compilation> {
    match classify_detailed(cwd, cmd) {
        Classification::Compilation(compilation) => Some(compilation),
        Classification::CompilerNoSource | Classification::NotACompiler => None,
    }
}

/// Like [`classify`], but distinguishes "not a compiler" from "a compiler,
/// but no source file was found" instead of collapsing both to `None`.
/// The collector's debug mode (`-d`) needs that distinction: it records
/// the former case too, just without a `file`.
pub fn classify_detailed(cwd: &Path, cmd: &[String]) -> Classification {
    let Some(program) = cmd.first() else {
        return Classification::NotACompiler;
    };
    let program_name = Path::new(program)
        .file_name()
        .and_then(|name| name.to_str());
    let Some(program_name) = program_name else {
        return Classification::NotACompiler;
    };
    if !looks_like_compiler(program_name) {
        return Classification::NotACompiler;
    }

    let mut found: Option<&str> = None;
    for arg in &cmd[1..] {
        if is_dependency_generation_flag(arg) {
            return Classification::CompilerNoSource;
        }
        if found.is_none() && has_source_extension(arg) {
            found = Some(arg);
        }
    }

    match found {
        Some(file) => Classification::Compilation(Compilation {
            file: resolve_path(cwd, file),
        }),
        None => Classification::CompilerNoSource,
    }
}
