//! Forks one process per stage and replaces its image with the requested program.

use crate::error::LaunchError;
use crate::helper::syscall;
use crate::tokenizer::Stage;
use crate::topology::{StageEnds, Topology};
use nix::{
    errno::Errno,
    libc,
    sys::{
        signal::{SigHandler, Signal, kill, signal},
        wait::waitpid,
    },
    unistd::{self, ForkResult, Pid, dup2, fork},
};
use std::os::fd::RawFd;
use std::os::raw::c_char;
use std::ptr;
use tracing::{debug, warn};

/// Exit status of a child whose program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit status of a child whose program exists but could not be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit status of a child that could not install its standard streams.
pub const EXIT_SETUP_FAILED: i32 = 1;

/// A running stage, owned by the coordinator until it is waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub index: usize,
    pub pid: Pid,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Launch {
    Spawned(ProcessHandle),
    /// The whole line was the terminator; nothing was forked.
    Terminate(Option<i32>),
}

#[derive(Debug, Clone)]
pub struct Launcher {
    terminator: String,
    /// Replaces the shell's stdin for the first stage.
    source: Option<RawFd>,
    /// Replaces the shell's stdout for the last stage.
    sink: Option<RawFd>,
}

impl Launcher {
    pub fn new(terminator: &str) -> Self {
        Launcher {
            terminator: terminator.to_string(),
            source: None,
            sink: None,
        }
    }

    pub fn with_endpoints(mut self, source: Option<RawFd>, sink: Option<RawFd>) -> Self {
        self.source = source;
        self.sink = sink;
        self
    }

    fn ends(&self, index: usize, topology: &Topology) -> StageEnds {
        let mut ends = topology.ends(index);
        if index == 0 {
            ends.stdin = ends.stdin.or(self.source);
        }
        if index + 1 == topology.stages() {
            ends.stdout = ends.stdout.or(self.sink);
        }
        ends
    }

    /// Start `stage` wired into `topology`. Never blocks on the child.
    pub fn launch(&self, stage: &Stage, topology: &Topology) -> Result<Launch, LaunchError> {
        if stage.argv().is_empty() {
            return Err(LaunchError::EmptyStage { index: stage.index });
        }

        let terminator = stage.is_terminator(&self.terminator);
        if terminator && topology.stages() == 1 {
            debug!("terminator requested, not forking");
            return Ok(Launch::Terminate(stage.exit_status().unwrap_or(None)));
        }

        // Everything the child touches is prepared before fork: it must not allocate.
        let ends = self.ends(stage.index, topology);
        let pipe_fds = topology.raw_fds();
        let outer = [self.source, self.sink];
        let argv: Vec<*const c_char> = stage
            .argv()
            .iter()
            .map(|arg| arg.as_ptr())
            .chain([ptr::null()])
            .collect();

        match syscall(|| unsafe { fork() }) {
            Ok(ForkResult::Parent { child }) => {
                debug!(index = stage.index, pid = child.as_raw(), program = stage.program(), "launched");
                Ok(Launch::Spawned(ProcessHandle {
                    index: stage.index,
                    pid: child,
                }))
            }
            Ok(ForkResult::Child) => {
                if terminator {
                    // Built-ins only mean something as the whole line.
                    exit_child(0);
                }
                exec_child(stage, ends, &pipe_fds, &outer, &argv)
            }
            Err(source) => Err(LaunchError::Fork {
                index: stage.index,
                source,
            }),
        }
    }
}

/// Child side: install the stage's streams, drop every pipe end and replace
/// the image. Only async-signal-safe calls from here on.
///
/// `argv` is the null-terminated pointer array over `stage.argv()`.
fn exec_child(
    stage: &Stage,
    ends: StageEnds,
    pipe_fds: &[RawFd],
    outer: &[Option<RawFd>],
    argv: &[*const c_char],
) -> ! {
    // Rust ignores SIGPIPE; programs expect the default.
    unsafe {
        let _ = signal(Signal::SIGPIPE, SigHandler::SigDfl);
    }

    if let Some(fd) = ends.stdin {
        if syscall(|| dup2(fd, libc::STDIN_FILENO)).is_err() {
            report(b"cannot redirect stdin", None, None);
            exit_child(EXIT_SETUP_FAILED);
        }
    }
    if let Some(fd) = ends.stdout {
        if syscall(|| dup2(fd, libc::STDOUT_FILENO)).is_err() {
            report(b"cannot redirect stdout", None, None);
            exit_child(EXIT_SETUP_FAILED);
        }
    }

    // Source and sink are closed as well: the caller may not have made them close-on-exec.
    for fd in pipe_fds.iter().copied().chain(outer.iter().copied().flatten()) {
        if fd > libc::STDERR_FILENO {
            let _ = unistd::close(fd);
        }
    }

    unsafe {
        libc::execvp(argv[0], argv.as_ptr());
    }
    let err = Errno::last();
    report(b"cannot execute", Some(stage.argv()[0].as_bytes()), Some(err));
    exit_child(match err {
        Errno::ENOENT => EXIT_NOT_FOUND,
        _ => EXIT_NOT_EXECUTABLE,
    })
}

/// `pipesh: <what> '<subject>': <error>` on stderr, without allocating.
fn report(what: &[u8], subject: Option<&[u8]>, err: Option<Errno>) {
    let fd = libc::STDERR_FILENO;
    let _ = unistd::write(fd, b"pipesh: ");
    let _ = unistd::write(fd, what);
    if let Some(subject) = subject {
        let _ = unistd::write(fd, b" '");
        let _ = unistd::write(fd, subject);
        let _ = unistd::write(fd, b"'");
    }
    if let Some(err) = err {
        let _ = unistd::write(fd, b": ");
        let _ = unistd::write(fd, err.desc().as_bytes());
    }
    let _ = unistd::write(fd, b"\n");
}

fn exit_child(code: i32) -> ! {
    // Skip atexit handlers and stdio flushing inherited from the shell.
    unsafe { libc::_exit(code) }
}

/// Kill and reap stages of a pipeline that could not be completed.
pub fn terminate_all(handles: &[ProcessHandle]) {
    for handle in handles {
        if let Err(e) = kill(handle.pid, Signal::SIGKILL) {
            warn!(pid = handle.pid.as_raw(), "kill failed: {e}");
        }
    }
    for handle in handles {
        if let Err(e) = syscall(|| waitpid(handle.pid, None)) {
            warn!(pid = handle.pid.as_raw(), "reaping failed: {e}");
        }
    }
}
