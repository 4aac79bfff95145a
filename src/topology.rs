//! Pipe set connecting the stages of one pipeline.
//!
//! Every pipe end is an [`OwnedFd`], so each end is closed exactly once: in
//! the parent when the [`Topology`] is dropped, in a child explicitly right
//! before its image is replaced. Ends are also created close-on-exec, so an
//! end can never survive into a program that did not ask for it.

use crate::error::LaunchError;
use crate::helper::syscall;
use nix::unistd;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::trace;

/// One unidirectional channel between stage `i` and stage `i + 1`.
#[derive(Debug)]
pub struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    pub fn new() -> Result<Self, LaunchError> {
        let (read, write) = cloexec_pipe().map_err(LaunchError::Pipe)?;
        Ok(Pipe { read, write })
    }

    pub fn read_end(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    pub fn write_end(&self) -> RawFd {
        self.write.as_raw_fd()
    }

    pub fn into_parts(self) -> (OwnedFd, OwnedFd) {
        (self.read, self.write)
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::OFlag;

    let (r, w) = syscall(|| unistd::pipe2(OFlag::O_CLOEXEC))?;
    // SAFETY: both descriptors were just returned by pipe2 and are owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(r), OwnedFd::from_raw_fd(w)) })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};

    let (r, w) = syscall(unistd::pipe)?;
    // SAFETY: both descriptors were just returned by pipe and are owned by nobody else.
    let (r, w) = unsafe { (OwnedFd::from_raw_fd(r), OwnedFd::from_raw_fd(w)) };
    for fd in [&r, &w] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((r, w))
}

/// Descriptors a stage must install as its standard streams.
/// `None` means the stream is inherited from the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageEnds {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
}

/// The `n - 1` pipes of an `n` stage pipeline.
#[derive(Debug)]
pub struct Topology {
    stages: usize,
    pipes: Vec<Pipe>,
}

impl Topology {
    /// Create every pipe up front. If creation fails part way, the pipes
    /// already created are closed before returning.
    pub fn build(stages: usize) -> Result<Self, LaunchError> {
        let pipes = (1..stages)
            .map(|_| Pipe::new())
            .collect::<Result<Vec<_>, _>>()?;
        trace!(stages, pipes = pipes.len(), "built pipe topology");
        Ok(Topology { stages, pipes })
    }

    pub fn stages(&self) -> usize {
        self.stages
    }

    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    /// Stage `i` reads from pipe `i - 1` and writes to pipe `i`.
    pub fn ends(&self, index: usize) -> StageEnds {
        StageEnds {
            stdin: index
                .checked_sub(1)
                .and_then(|prev| self.pipes.get(prev))
                .map(Pipe::read_end),
            stdout: self.pipes.get(index).map(Pipe::write_end),
        }
    }

    /// Every pipe end, in creation order. A child closes all of them once its
    /// own two ends are installed on its standard streams.
    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.pipes
            .iter()
            .flat_map(|p| [p.read_end(), p.write_end()])
            .collect()
    }

    /// Release the parent's copy of every end. Readers see end-of-stream once
    /// the children holding the write ends exit.
    pub fn close_parent_ends(self) {
        trace!(pipes = self.pipes.len(), "closing parent pipe ends");
        drop(self);
    }
}
