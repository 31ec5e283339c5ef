// SPDX-License-Identifier: GPL-3.0-or-later

//! The actual interposed entry points.
//!
//! Every exported function follows the same shape: decode the C
//! arguments, try to report an [`bear::wire::Observation`] to the
//! collector (never letting a reporting failure change the outcome of
//! the real call — see `spec.md` §7's "silent shim errors" rule), force
//! the two environment variables the collector relies on into the
//! environment the real call will see, then tail-call the real symbol
//! resolved once at load time via `dlsym(RTLD_NEXT, ...)`. If that
//! resolution never found the symbol, there is no real call left to make
//! and the process aborts (`fatal_dlsym_failure`) rather than returning
//! an errno that would make the build think the exec itself failed.
//!
//! `execl`/`execlp`/`execle` are C variadic functions: there is no
//! stable, safe way in Rust to read an unknown-length `...` list. Rather
//! than drop them, they are declared with a fixed-arity prefix of the
//! variadic parameters (the same approximation the original C shim's
//! reference port makes) and dispatch into `execv`/`execvp`/`execve`
//! with whatever argv entries that prefix could read, so the call is
//! still forwarded correctly even for an argument list longer than the
//! shim observed.

use bear::environment::{KEY_PRELOAD, KEY_SOCKET};
use bear::intercept::{Reporter, UnixSocketReporter};
use bear::wire::Observation;
use libc::{c_char, c_int, pid_t, posix_spawn_file_actions_t, posix_spawnattr_t};
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

#[cfg(has_symbol_execve)]
type ExecveFunc = unsafe extern "C" fn(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int;
#[cfg(has_symbol_execv)]
type ExecvFunc = unsafe extern "C" fn(path: *const c_char, argv: *const *const c_char) -> c_int;
#[cfg(has_symbol_execvpe)]
type ExecvpeFunc = unsafe extern "C" fn(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int;
#[cfg(has_symbol_execvp)]
type ExecvpFunc = unsafe extern "C" fn(file: *const c_char, argv: *const *const c_char) -> c_int;
#[cfg(has_symbol_execvP)]
type ExecvPFunc = unsafe extern "C" fn(
    file: *const c_char,
    search_path: *const c_char,
    argv: *const *const c_char,
) -> c_int;
#[cfg(has_symbol_exect)]
type ExectFunc = unsafe extern "C" fn(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int;
#[cfg(has_symbol_posix_spawn)]
type PosixSpawnFunc = unsafe extern "C" fn(
    pid: *mut pid_t,
    path: *const c_char,
    file_actions: *const posix_spawn_file_actions_t,
    attrp: *const posix_spawnattr_t,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int;
#[cfg(has_symbol_posix_spawnp)]
type PosixSpawnpFunc = unsafe extern "C" fn(
    pid: *mut pid_t,
    file: *const c_char,
    file_actions: *const posix_spawn_file_actions_t,
    attrp: *const posix_spawnattr_t,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int;

#[cfg(has_symbol_RTLD_NEXT)]
const RTLD_NEXT: *mut libc::c_void = -1isize as *mut libc::c_void;

#[cfg(has_symbol_execve)]
static REAL_EXECVE: AtomicPtr<libc::c_void> = AtomicPtr::new(ptr::null_mut());
#[cfg(has_symbol_execv)]
static REAL_EXECV: AtomicPtr<libc::c_void> = AtomicPtr::new(ptr::null_mut());
#[cfg(has_symbol_execvpe)]
static REAL_EXECVPE: AtomicPtr<libc::c_void> = AtomicPtr::new(ptr::null_mut());
#[cfg(has_symbol_execvp)]
static REAL_EXECVP: AtomicPtr<libc::c_void> = AtomicPtr::new(ptr::null_mut());
#[cfg(has_symbol_execvP)]
static REAL_EXECVP_BSD: AtomicPtr<libc::c_void> = AtomicPtr::new(ptr::null_mut());
#[cfg(has_symbol_exect)]
static REAL_EXECT: AtomicPtr<libc::c_void> = AtomicPtr::new(ptr::null_mut());
#[cfg(has_symbol_posix_spawn)]
static REAL_POSIX_SPAWN: AtomicPtr<libc::c_void> = AtomicPtr::new(ptr::null_mut());
#[cfg(has_symbol_posix_spawnp)]
static REAL_POSIX_SPAWNP: AtomicPtr<libc::c_void> = AtomicPtr::new(ptr::null_mut());

static REPORTER: OnceLock<Option<UnixSocketReporter>> = OnceLock::new();

fn reporter() -> Option<&'static UnixSocketReporter> {
    REPORTER
        .get_or_init(|| std::env::var(KEY_SOCKET).ok().map(UnixSocketReporter::new))
        .as_ref()
}

#[ctor::ctor]
fn on_load() {
    let _ = env_logger::try_init();
    log::debug!("intercept-preload loaded");
    unsafe {
        initialize_functions();
    }
}

/// # Safety
/// Resolves the real symbols via `dlsym`; must run exactly once, before
/// any interposed entry point is called.
#[cfg(all(has_symbol_dlsym, has_symbol_RTLD_NEXT))]
unsafe fn initialize_functions() {
    #[cfg(has_symbol_execve)]
    REAL_EXECVE.store(
        libc::dlsym(RTLD_NEXT, c"execve".as_ptr()),
        Ordering::SeqCst,
    );
    #[cfg(has_symbol_execv)]
    REAL_EXECV.store(libc::dlsym(RTLD_NEXT, c"execv".as_ptr()), Ordering::SeqCst);
    #[cfg(has_symbol_execvpe)]
    REAL_EXECVPE.store(
        libc::dlsym(RTLD_NEXT, c"execvpe".as_ptr()),
        Ordering::SeqCst,
    );
    #[cfg(has_symbol_execvp)]
    REAL_EXECVP.store(
        libc::dlsym(RTLD_NEXT, c"execvp".as_ptr()),
        Ordering::SeqCst,
    );
    #[cfg(has_symbol_execvP)]
    REAL_EXECVP_BSD.store(
        libc::dlsym(RTLD_NEXT, c"execvP".as_ptr()),
        Ordering::SeqCst,
    );
    #[cfg(has_symbol_exect)]
    REAL_EXECT.store(libc::dlsym(RTLD_NEXT, c"exect".as_ptr()), Ordering::SeqCst);
    #[cfg(has_symbol_posix_spawn)]
    REAL_POSIX_SPAWN.store(
        libc::dlsym(RTLD_NEXT, c"posix_spawn".as_ptr()),
        Ordering::SeqCst,
    );
    #[cfg(has_symbol_posix_spawnp)]
    REAL_POSIX_SPAWNP.store(
        libc::dlsym(RTLD_NEXT, c"posix_spawnp".as_ptr()),
        Ordering::SeqCst,
    );
}

#[cfg(not(all(has_symbol_dlsym, has_symbol_RTLD_NEXT)))]
unsafe fn initialize_functions() {}

unsafe fn c_str_to_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok().map(String::from)
}

unsafe fn collect_argv(argv: *const *const c_char) -> Vec<String> {
    let mut args = Vec::new();
    if argv.is_null() {
        return args;
    }
    let mut i = 0;
    loop {
        let entry = *argv.add(i);
        if entry.is_null() {
            break;
        }
        if let Some(arg) = c_str_to_string(entry) {
            args.push(arg);
        }
        i += 1;
    }
    args
}

unsafe fn collect_envp(envp: *const *const c_char) -> Vec<String> {
    let mut entries = Vec::new();
    if envp.is_null() {
        return entries;
    }
    let mut i = 0;
    loop {
        let entry = *envp.add(i);
        if entry.is_null() {
            break;
        }
        if let Some(var) = c_str_to_string(entry) {
            entries.push(var);
        }
        i += 1;
    }
    entries
}

/// Forces `KEY_PRELOAD`/`KEY_SOCKET` in `entries` (formatted `KEY=value`)
/// to this process's current values, overwriting any existing entry for
/// that key, or appending one if absent.
fn inject_forced_vars(mut entries: Vec<String>) -> Vec<String> {
    for key in [KEY_PRELOAD, KEY_SOCKET] {
        let Ok(value) = std::env::var(key) else {
            continue;
        };
        let prefix = format!("{key}=");
        let replacement = format!("{key}={value}");
        match entries.iter().position(|entry| entry.starts_with(&prefix)) {
            Some(index) => entries[index] = replacement,
            None => entries.push(replacement),
        }
    }
    entries
}

/// Builds a NUL-terminated `envp` array with the forced variables
/// injected, returning the owning `CString`s alongside the raw pointer
/// vector so the caller can keep them alive for the duration of the call.
fn build_injected_envp(envp: *const *const c_char) -> (Vec<CString>, Vec<*const c_char>) {
    let entries = inject_forced_vars(unsafe { collect_envp(envp) });
    let owned: Vec<CString> = entries
        .into_iter()
        .filter_map(|entry| CString::new(entry).ok())
        .collect();
    let mut raw: Vec<*const c_char> = owned.iter().map(|entry| entry.as_ptr()).collect();
    raw.push(ptr::null());
    (owned, raw)
}

/// For the entry points with no `envp` parameter, the real call inherits
/// this process's `environ` directly, so the forced variables are
/// guaranteed present by setting them here instead of rebuilding an array.
fn force_vars_into_process_environment() {
    for key in [KEY_PRELOAD, KEY_SOCKET] {
        if let Ok(value) = std::env::var(key) {
            unsafe {
                if let (Ok(key_c), Ok(value_c)) = (CString::new(key), CString::new(value)) {
                    libc::setenv(key_c.as_ptr(), value_c.as_ptr(), 1);
                }
            }
        }
    }
}

/// A real `exec*`/`posix_spawn*` symbol failed to resolve at load time.
/// There is no way to forward this call without it, so this mirrors the
/// original C shim's `perror("dlsym"); exit(EXIT_FAILURE)`: the process
/// cannot proceed, so it aborts instead of returning an errno that would
/// make the caller think the exec itself failed.
fn fatal_dlsym_failure(symbol: &str) -> ! {
    eprintln!("bear: failed to resolve real {symbol}: dlsym returned NULL");
    std::process::abort();
}

fn record_execution(argv: &[String]) {
    let Some(reporter) = reporter() else {
        return;
    };
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let observation = Observation::new(cwd, argv.to_vec());
    if let Err(err) = reporter.report(&observation) {
        log::debug!("failed to report observation: {err}");
    }
}

/// # Safety
/// Called by the dynamic linker in place of the real `execve`; `path`,
/// `argv` and `envp` must be valid as the real `execve` requires.
#[cfg(has_symbol_execve)]
#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    record_execution(&collect_argv(argv));

    let (_owned, injected_envp) = build_injected_envp(envp);
    let func_ptr = REAL_EXECVE.load(Ordering::SeqCst);
    if func_ptr.is_null() {
        fatal_dlsym_failure("execve");
    }
    let real: ExecveFunc = std::mem::transmute(func_ptr);
    real(path, argv, injected_envp.as_ptr())
}

/// # Safety
/// Called by the dynamic linker in place of the real `execv`.
#[cfg(has_symbol_execv)]
#[no_mangle]
pub unsafe extern "C" fn execv(path: *const c_char, argv: *const *const c_char) -> c_int {
    record_execution(&collect_argv(argv));
    force_vars_into_process_environment();

    let func_ptr = REAL_EXECV.load(Ordering::SeqCst);
    if func_ptr.is_null() {
        fatal_dlsym_failure("execv");
    }
    let real: ExecvFunc = std::mem::transmute(func_ptr);
    real(path, argv)
}

/// # Safety
/// Called by the dynamic linker in place of the real `execvpe`.
#[cfg(has_symbol_execvpe)]
#[no_mangle]
pub unsafe extern "C" fn execvpe(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    record_execution(&collect_argv(argv));

    let (_owned, injected_envp) = build_injected_envp(envp);
    let func_ptr = REAL_EXECVPE.load(Ordering::SeqCst);
    if func_ptr.is_null() {
        fatal_dlsym_failure("execvpe");
    }
    let real: ExecvpeFunc = std::mem::transmute(func_ptr);
    real(file, argv, injected_envp.as_ptr())
}

/// # Safety
/// Called by the dynamic linker in place of the real `execvp`.
#[cfg(has_symbol_execvp)]
#[no_mangle]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    record_execution(&collect_argv(argv));
    force_vars_into_process_environment();

    let func_ptr = REAL_EXECVP.load(Ordering::SeqCst);
    if func_ptr.is_null() {
        fatal_dlsym_failure("execvp");
    }
    let real: ExecvpFunc = std::mem::transmute(func_ptr);
    real(file, argv)
}

/// # Safety
/// Called by the dynamic linker in place of the real `execvP` (BSD).
#[cfg(has_symbol_execvP)]
#[no_mangle]
pub unsafe extern "C" fn execvP(
    file: *const c_char,
    search_path: *const c_char,
    argv: *const *const c_char,
) -> c_int {
    record_execution(&collect_argv(argv));
    force_vars_into_process_environment();

    let func_ptr = REAL_EXECVP_BSD.load(Ordering::SeqCst);
    if func_ptr.is_null() {
        fatal_dlsym_failure("execvP");
    }
    let real: ExecvPFunc = std::mem::transmute(func_ptr);
    real(file, search_path, argv)
}

/// # Safety
/// Called by the dynamic linker in place of the real `exect`.
#[cfg(has_symbol_exect)]
#[no_mangle]
pub unsafe extern "C" fn exect(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    record_execution(&collect_argv(argv));

    let (_owned, injected_envp) = build_injected_envp(envp);
    let func_ptr = REAL_EXECT.load(Ordering::SeqCst);
    if func_ptr.is_null() {
        fatal_dlsym_failure("exect");
    }
    let real: ExectFunc = std::mem::transmute(func_ptr);
    real(path, argv, injected_envp.as_ptr())
}

/// Builds a NUL-terminated argv array out of the fixed-arity prefix
/// `execl`/`execlp`/`execle` can read (`path`/`file` itself, then `arg`,
/// then one further variadic argument). An invocation whose real argument
/// list is longer than this is still forwarded — the tail call dispatches
/// into the non-variadic entry point with whatever prefix was read — but
/// only that prefix is observed in the reported command.
unsafe fn fixed_arity_argv(
    head: *const c_char,
    arg: *const c_char,
    rest: *const c_char,
) -> Vec<*const c_char> {
    let mut argv = vec![head];
    if !arg.is_null() {
        argv.push(arg);
        if !rest.is_null() {
            argv.push(rest);
        }
    }
    argv.push(ptr::null());
    argv
}

/// # Safety
/// Called by the dynamic linker in place of the real `execl`. `execl` is
/// C-variadic; only the fixed-arity prefix `fixed_arity_argv` can read is
/// forwarded (see the module doc comment).
#[cfg(all(has_symbol_execl, has_symbol_execv))]
#[no_mangle]
pub unsafe extern "C" fn execl(path: *const c_char, arg: *const c_char, rest: *const c_char) -> c_int {
    let argv = fixed_arity_argv(path, arg, rest);
    execv(path, argv.as_ptr())
}

/// # Safety
/// Called by the dynamic linker in place of the real `execlp`. `execlp` is
/// C-variadic; only the fixed-arity prefix `fixed_arity_argv` can read is
/// forwarded (see the module doc comment).
#[cfg(all(has_symbol_execlp, has_symbol_execvp))]
#[no_mangle]
pub unsafe extern "C" fn execlp(file: *const c_char, arg: *const c_char, rest: *const c_char) -> c_int {
    let argv = fixed_arity_argv(file, arg, rest);
    execvp(file, argv.as_ptr())
}

/// # Safety
/// Called by the dynamic linker in place of the real `execle`. `execle` is
/// C-variadic; only the fixed-arity prefix `fixed_arity_argv` can read is
/// forwarded (see the module doc comment). The trailing `envp` of a real
/// `execle` call lives past the end of that same unreadable variadic
/// list, so this forwards the current process environment instead —
/// `execve` (which this tail-calls into) still injects `KEY_PRELOAD`/
/// `KEY_SOCKET` into it the same way every other envp-taking entry point
/// does.
#[cfg(all(has_symbol_execle, has_symbol_execve))]
#[no_mangle]
pub unsafe extern "C" fn execle(path: *const c_char, arg: *const c_char, rest: *const c_char) -> c_int {
    let argv = fixed_arity_argv(path, arg, rest);

    let current_env: Vec<CString> = std::env::vars()
        .filter_map(|(key, value)| CString::new(format!("{key}={value}")).ok())
        .collect();
    let mut envp: Vec<*const c_char> = current_env.iter().map(|entry| entry.as_ptr()).collect();
    envp.push(ptr::null());

    execve(path, argv.as_ptr(), envp.as_ptr())
}

/// # Safety
/// Called by the dynamic linker in place of the real `posix_spawn`.
#[cfg(has_symbol_posix_spawn)]
#[no_mangle]
pub unsafe extern "C" fn posix_spawn(
    pid: *mut pid_t,
    path: *const c_char,
    file_actions: *const posix_spawn_file_actions_t,
    attrp: *const posix_spawnattr_t,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    record_execution(&collect_argv(argv));

    let (_owned, injected_envp) = build_injected_envp(envp);
    let func_ptr = REAL_POSIX_SPAWN.load(Ordering::SeqCst);
    if func_ptr.is_null() {
        fatal_dlsym_failure("posix_spawn");
    }
    let real: PosixSpawnFunc = std::mem::transmute(func_ptr);
    real(pid, path, file_actions, attrp, argv, injected_envp.as_ptr())
}

/// # Safety
/// Called by the dynamic linker in place of the real `posix_spawnp`.
#[cfg(has_symbol_posix_spawnp)]
#[no_mangle]
pub unsafe extern "C" fn posix_spawnp(
    pid: *mut pid_t,
    file: *const c_char,
    file_actions: *const posix_spawn_file_actions_t,
    attrp: *const posix_spawnattr_t,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    record_execution(&collect_argv(argv));

    let (_owned, injected_envp) = build_injected_envp(envp);
    let func_ptr = REAL_POSIX_SPAWNP.load(Ordering::SeqCst);
    if func_ptr.is_null() {
        fatal_dlsym_failure("posix_spawnp");
    }
    let real: PosixSpawnpFunc = std::mem::transmute(func_ptr);
    real(pid, file, file_actions, attrp, argv, injected_envp.as_ptr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_missing_vars() {
        unsafe {
            std::env::set_var(KEY_PRELOAD, "/tmp/libexec.so");
            std::env::set_var(KEY_SOCKET, "/tmp/sock");
        }

        let entries = inject_forced_vars(vec!["PATH=/usr/bin".to_string()]);

        assert!(entries.contains(&"PATH=/usr/bin".to_string()));
        assert!(entries.contains(&format!("{KEY_PRELOAD}=/tmp/libexec.so")));
        assert!(entries.contains(&format!("{KEY_SOCKET}=/tmp/sock")));
    }

    #[test]
    fn overwrites_conflicting_vars() {
        unsafe {
            std::env::set_var(KEY_PRELOAD, "/tmp/correct.so");
        }

        let entries = inject_forced_vars(vec![format!("{KEY_PRELOAD}=/tmp/wrong.so")]);

        assert_eq!(
            entries.iter().filter(|e| e.starts_with(KEY_PRELOAD)).count(),
            1
        );
        assert!(entries.contains(&format!("{KEY_PRELOAD}=/tmp/correct.so")));
    }

    #[test]
    fn fixed_arity_argv_reads_up_to_two_variadic_arguments() {
        let head = c"prog".as_ptr();
        let arg0 = c"prog".as_ptr();
        let arg1 = c"-c".as_ptr();

        let argv = unsafe { fixed_arity_argv(head, arg0, arg1) };
        assert_eq!(argv, vec![head, arg0, arg1, ptr::null()]);
    }

    #[test]
    fn fixed_arity_argv_stops_at_the_first_null() {
        let head = c"prog".as_ptr();

        let argv = unsafe { fixed_arity_argv(head, ptr::null(), ptr::null()) };
        assert_eq!(argv, vec![head, ptr::null()]);
    }
}
