// SPDX-License-Identifier: GPL-3.0-or-later

//! Forks the user's build command, listens on a Unix domain socket for
//! observations the preload shim reports, and streams the ones that
//! look like compilations out to the output as [`crate::output::Record`]s.
//!
//! This is a direct port of the original C tool's `main.c`: a listening
//! socket created before `fork()`, a synchronization pipe so the child
//! never `exec`s before the socket is actually ready to `accept()`, and
//! `SIGCHLD`/`SIGINT` handlers installed with `SA_RESTART` left off so a
//! signal arriving during `accept()` makes it fail with `EINTR` instead
//! of silently retrying.
//!
//! `std::os::unix::net::UnixListener::accept` cannot be used here: the
//! standard library retries `EINTR` internally, which would make the
//! accept loop immune to exactly the signal it needs to notice. Every
//! socket and process primitive in this module therefore goes through
//! raw `libc` calls instead.
//!
//! Everything from signal-handler installation through releasing the
//! child to run (opening the output, writing the synchronization byte)
//! happens with every signal blocked via `sigprocmask`, mirroring the
//! original's `mask_all_signals`. The accept loop unblocks signals again
//! for the narrow duration of each `accept()` call and re-blocks them as
//! soon as it returns, so `SIGCHLD`/`SIGINT` can only ever interrupt
//! `accept()` itself, never the record-handling code around it.

use crate::environment::{KEY_PRELOAD, KEY_SOCKET};
use crate::filter::{self, Classification};
use crate::output::{Record, RecordWriter};
use crate::wire;
use std::ffi::CString;
use std::io::{self, Write};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to create the listening socket: {0}")]
    SocketCreate(#[source] io::Error),
    #[error("failed to bind socket at {path}: {source}")]
    SocketBind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale socket file at {path}: {source}")]
    SocketUnlink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),
    #[error("failed to create synchronization pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),
    #[error("the command to run was empty")]
    EmptyCommand,
    #[error("failed to write the compilation database: {0}")]
    Output(#[source] io::Error),
}

/// The result of running the user's command to completion.
pub struct Outcome {
    pub exit_code: i32,
}

/// Holds the pid of the running child, `0` once it has been reaped.
/// Written only from the `SIGCHLD` handler, read everywhere else.
static CHILD_PID: AtomicI32 = AtomicI32::new(0);
/// The raw `waitpid` status of the child, valid once `CHILD_PID` is `0`.
static CHILD_STATUS: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_sigchld(_signum: libc::c_int) {
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        CHILD_STATUS.store(status, Ordering::SeqCst);
        CHILD_PID.store(0, Ordering::SeqCst);
    }
}

extern "C" fn handle_sigint(signum: libc::c_int) {
    let pid = CHILD_PID.load(Ordering::SeqCst);
    if pid > 0 {
        unsafe {
            libc::kill(pid, signum);
        }
    }
}

fn install_handler(signum: libc::c_int, handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0; // deliberately no SA_RESTART
        if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Blocks (`SIG_BLOCK`) or unblocks (`SIG_UNBLOCK`) every signal, mirroring
/// the original tool's `mask_all_signals`. Brackets the collector's
/// non-re-entrant setup and per-connection record handling; the accept
/// loop unblocks signals again just for the `accept()` call itself.
fn mask_all_signals(how: libc::c_int) -> io::Result<()> {
    unsafe {
        let mut mask: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut mask);
        if libc::sigprocmask(how, &mask, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Removes a pre-existing socket file at `socket_path`, the way the
/// original tool's `collect_messages` does before binding: a leftover
/// file from a crashed prior run must not make `bind` fail with
/// `EADDRINUSE`, but any other removal failure is fatal.
fn unlink_stale_socket(socket_path: &Path) -> Result<(), CollectorError> {
    match std::fs::remove_file(socket_path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CollectorError::SocketUnlink {
            path: socket_path.to_path_buf(),
            source,
        }),
    }
}

fn create_unix_listener(socket_path: &Path) -> Result<libc::c_int, CollectorError> {
    unlink_stale_socket(socket_path)?;

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(CollectorError::SocketCreate(io::Error::last_os_error()));
    }

    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let path_bytes = socket_path.as_os_str().as_bytes();
    if path_bytes.len() >= addr.sun_path.len() {
        unsafe { libc::close(fd) };
        return Err(CollectorError::SocketBind {
            path: socket_path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "socket path too long"),
        });
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(path_bytes.iter()) {
        *dst = *src as libc::c_char;
    }

    let addr_len = mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
    let bind_result = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            addr_len,
        )
    };
    if bind_result != 0 {
        let source = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(CollectorError::SocketBind {
            path: socket_path.to_path_buf(),
            source,
        });
    }

    if unsafe { libc::listen(fd, 16) } != 0 {
        let source = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(CollectorError::SocketBind {
            path: socket_path.to_path_buf(),
            source,
        });
    }

    Ok(fd)
}

/// Sets an environment variable in the forked child before it execs the
/// user's command, exiting with a diagnostic on failure the same way the
/// original C tool's `collect_messages` treats a failed `setenv` as a
/// fatal startup error rather than silently continuing with a stale or
/// unset variable.
fn set_env_or_die(key: &str, value: &CString) {
    let key = CString::new(key).expect("environment variable name contains a NUL byte");
    let rc = unsafe { libc::setenv(key.as_ptr(), value.as_ptr(), 1) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        eprintln!("bear: failed to set {}: {err}", key.to_string_lossy());
        std::process::exit(1);
    }
}

/// Configuration for one run of the collector.
pub struct Collector {
    pub command: Vec<String>,
    pub socket_path: PathBuf,
    pub preload_path: PathBuf,
    /// When set, a command that matches a known compiler but has no
    /// recognisable source argument is still recorded, just without a
    /// `file` field, instead of being dropped.
    pub debug: bool,
}

impl Collector {
    pub fn new(command: Vec<String>, socket_path: PathBuf, preload_path: PathBuf) -> Self {
        Collector {
            command,
            socket_path,
            preload_path,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Forks the configured command, streams every observation reported
    /// over the socket that looks like a compilation to `output` as it
    /// runs, and returns the command's exit code once it has finished.
    pub fn run<W: Write>(&self, output: W) -> Result<Outcome, CollectorError> {
        if self.command.is_empty() {
            return Err(CollectorError::EmptyCommand);
        }

        let listen_fd = create_unix_listener(&self.socket_path)?;

        let mut pipe_fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(pipe_fds.as_mut_ptr()) } != 0 {
            unsafe { libc::close(listen_fd) };
            return Err(CollectorError::Pipe(io::Error::last_os_error()));
        }
        let (read_fd, write_fd) = (pipe_fds[0], pipe_fds[1]);

        let child_pid = unsafe { libc::fork() };
        if child_pid < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(listen_fd);
                libc::close(read_fd);
                libc::close(write_fd);
            }
            return Err(CollectorError::Fork(err));
        }

        if child_pid == 0 {
            unsafe {
                libc::close(write_fd);
                libc::close(listen_fd);
            }
            self.run_child(read_fd);
            unreachable!("run_child always replaces the process image or exits");
        }

        // Parent: from here through releasing the child, every signal is
        // blocked. Only the accept loop unblocks them, and only around
        // `accept()` itself.
        CHILD_PID.store(child_pid, Ordering::SeqCst);
        install_handler(libc::SIGCHLD, handle_sigchld).map_err(CollectorError::SignalHandler)?;
        install_handler(libc::SIGINT, handle_sigint).map_err(CollectorError::SignalHandler)?;
        mask_all_signals(libc::SIG_BLOCK).map_err(CollectorError::SignalHandler)?;

        unsafe {
            libc::close(read_fd);
        }

        let mut writer = RecordWriter::new(output).map_err(CollectorError::Output)?;

        unsafe {
            // Release the child: the listening socket is ready.
            let go = [0u8; 1];
            libc::write(write_fd, go.as_ptr() as *const libc::c_void, 1);
            libc::close(write_fd);
        }

        let accept_result = self.accept_loop(listen_fd, &mut writer);

        unsafe {
            libc::close(listen_fd);
        }
        // Best-effort: a concurrent run or manual cleanup may have already
        // removed it, and shutdown must not fail because of that.
        let _ = std::fs::remove_file(&self.socket_path);

        let finish_result = writer.finish().map_err(CollectorError::Output);
        accept_result?;
        finish_result?;

        let status = CHILD_STATUS.load(Ordering::SeqCst);
        let exit_code = if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else if libc::WIFSIGNALED(status) {
            128 + libc::WTERMSIG(status)
        } else {
            status
        };

        Ok(Outcome { exit_code })
    }

    /// Runs in the forked child: blocks until the parent signals the
    /// socket is ready, sets up the environment the shim reads, and
    /// replaces this process image with the user's command.
    ///
    /// `setenv` failure here is fatal: the child has no way to report it
    /// back to the parent except by exiting, and running the command
    /// without the shim's environment in place would silently produce an
    /// empty compilation database instead of a clear error.
    fn run_child(&self, sync_read_fd: libc::c_int) -> ! {
        let mut go = [0u8; 1];
        unsafe {
            libc::read(sync_read_fd, go.as_mut_ptr() as *mut libc::c_void, 1);
            libc::close(sync_read_fd);
        }

        let preload = CString::new(self.preload_path.as_os_str().as_bytes())
            .expect("preload path contains a NUL byte");
        let socket = CString::new(self.socket_path.as_os_str().as_bytes())
            .expect("socket path contains a NUL byte");
        set_env_or_die(KEY_PRELOAD, &preload);
        set_env_or_die(KEY_SOCKET, &socket);

        let args: Vec<CString> = self
            .command
            .iter()
            .map(|arg| CString::new(arg.as_str()).expect("argument contains a NUL byte"))
            .collect();
        let mut argv: Vec<*const libc::c_char> =
            args.iter().map(|arg| arg.as_ptr()).collect();
        argv.push(std::ptr::null());

        unsafe {
            libc::execvp(argv[0], argv.as_ptr());
        }
        // execvp only returns on failure.
        let err = io::Error::last_os_error();
        eprintln!("bear: failed to run {:?}: {err}", self.command);
        std::process::exit(127);
    }

    /// Accepts connections until the child has been reaped, writing each
    /// one that classifies as a compilation straight to `writer`.
    fn accept_loop<W: Write>(
        &self,
        listen_fd: libc::c_int,
        writer: &mut RecordWriter<W>,
    ) -> Result<(), CollectorError> {
        loop {
            mask_all_signals(libc::SIG_UNBLOCK).map_err(CollectorError::SignalHandler)?;
            let conn_fd =
                unsafe { libc::accept(listen_fd, std::ptr::null_mut(), std::ptr::null_mut()) };
            mask_all_signals(libc::SIG_BLOCK).map_err(CollectorError::SignalHandler)?;

            if conn_fd < 0 {
                if CHILD_PID.load(Ordering::SeqCst) == 0 {
                    break;
                }
                // Interrupted by some other signal; keep waiting.
                continue;
            }

            if let Some(record) = self.handle_connection(conn_fd) {
                writer.write(&record).map_err(CollectorError::Output)?;
            }
            unsafe {
                libc::close(conn_fd);
            }

            if CHILD_PID.load(Ordering::SeqCst) == 0 {
                break;
            }
        }

        Ok(())
    }

    fn handle_connection(&self, conn_fd: libc::c_int) -> Option<Record> {
        let mut stream = unsafe { FdStream::from_raw(conn_fd) };
        let observation = wire::read_observation(&mut stream, false).ok()?;

        match filter::classify_detailed(&observation.cwd, &observation.cmd) {
            Classification::Compilation(compilation) => Some(Record::new(
                observation.cwd,
                &observation.cmd,
                Some(compilation.file),
            )),
            Classification::CompilerNoSource if self.debug => {
                Some(Record::new(observation.cwd, &observation.cmd, None))
            }
            Classification::CompilerNoSource | Classification::NotACompiler => None,
        }
    }
}

/// A non-owning `Read` view over a raw file descriptor, used to feed the
/// wire codec's generic readers without pulling in `std::os::unix::net`
/// (the connection's lifetime and closing is managed by the accept loop).
struct FdStream {
    fd: libc::c_int,
}

impl FdStream {
    unsafe fn from_raw(fd: libc::c_int) -> Self {
        FdStream { fd }
    }
}

impl io::Read for FdStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_carries_exit_code() {
        let outcome = Outcome { exit_code: 0 };
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn unlink_stale_socket_ignores_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist");
        assert!(unlink_stale_socket(&path).is_ok());
    }

    #[test]
    fn unlink_stale_socket_removes_leftover_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socket");
        std::fs::write(&path, b"stale").unwrap();

        assert!(unlink_stale_socket(&path).is_ok());
        assert!(!path.exists());
    }

    #[test]
    fn set_env_or_die_applies_the_value() {
        let value = CString::new("/tmp/libexec.so").unwrap();
        set_env_or_die("BEAR_COLLECTOR_TEST_VAR", &value);
        assert_eq!(
            std::env::var("BEAR_COLLECTOR_TEST_VAR").unwrap(),
            "/tmp/libexec.so"
        );
    }

    #[test]
    fn run_rejects_empty_command() {
        let collector = Collector::new(
            vec![],
            PathBuf::from("/tmp/does-not-matter"),
            PathBuf::from("/tmp/libexec.so"),
        );
        let mut buffer = Vec::new();
        assert!(matches!(
            collector.run(&mut buffer),
            Err(CollectorError::EmptyCommand)
        ));
    }
}
