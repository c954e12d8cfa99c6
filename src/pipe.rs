//! Ownership of the pipes that join the stages of one pipeline.
//!
//! Pipe `i` connects stage `i`'s stdout to stage `i + 1`'s stdin. While stages
//! are being spawned the parent holds both ends of every pipe in a
//! [`PipeArena`]; each stage receives a duplicate of the single end wired into
//! its own stdio. Once every stage is spawned the parent must drop all of its
//! ends with [`PipeArena::close_parent_ends`]: a write end left open in the
//! parent keeps the downstream reader from ever seeing end-of-stream.

use crate::error::PipeError;
use nix::unistd;
use std::io;
use std::os::fd::OwnedFd;
use tracing::{debug, warn};

/// One unidirectional pipe with independently closable ends.
#[derive(Debug)]
pub struct Pipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Pipe {
    pub fn new(read: OwnedFd, write: OwnedFd) -> Self {
        Self {
            read: Some(read),
            write: Some(write),
        }
    }

    /// Open a pipe whose ends are close-on-exec.
    pub fn open() -> io::Result<Self> {
        let (read, write) = open_cloexec()?;
        Ok(Self::new(read, write))
    }

    /// Number of ends still held.
    pub fn open_ends(&self) -> usize {
        usize::from(self.read.is_some()) + usize::from(self.write.is_some())
    }

    fn close(&mut self) -> usize {
        let closed = self.open_ends();
        self.read = None;
        self.write = None;
        closed
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn open_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::OFlag;
    Ok(unistd::pipe2(OFlag::O_CLOEXEC)?)
}

// No pipe2 here; another thread may fork between the two calls.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn open_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    use std::os::fd::AsRawFd;
    let (read, write) = unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

/// The N-1 pipes of an N-stage pipeline, indexed by stage boundary.
#[derive(Debug, Default)]
pub struct PipeArena {
    pipes: Vec<Pipe>,
}

impl PipeArena {
    /// Allocate the pipes joining `stages` stages.
    pub fn for_stages(stages: usize) -> Result<Self, PipeError> {
        Self::build(stages.saturating_sub(1), Pipe::open)
    }

    /// Allocate `count` pipes using `open`.
    ///
    /// If any call fails, every pipe created so far is closed before the error
    /// is returned.
    pub fn build<F>(count: usize, mut open: F) -> Result<Self, PipeError>
    where
        F: FnMut() -> io::Result<Pipe>,
    {
        let mut pipes = Vec::with_capacity(count);
        for index in 0..count {
            match open() {
                Ok(pipe) => pipes.push(pipe),
                Err(source) => {
                    warn!(index, created = pipes.len(), %source, "pipe creation failed, releasing");
                    drop(pipes);
                    return Err(PipeError { index, source });
                }
            }
        }
        debug!(count, "pipes created");
        Ok(Self { pipes })
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Duplicate of the read end feeding `stage`'s stdin, or `None` for the
    /// first stage.
    pub fn stdin_for(&self, stage: usize) -> io::Result<Option<OwnedFd>> {
        match stage.checked_sub(1) {
            None => Ok(None),
            Some(boundary) => duplicate(self.pipes.get(boundary).and_then(|p| p.read.as_ref()), boundary),
        }
    }

    /// Duplicate of the write end carrying `stage`'s stdout, or `None` for the
    /// last stage.
    pub fn stdout_for(&self, stage: usize) -> io::Result<Option<OwnedFd>> {
        if stage >= self.pipes.len() {
            return Ok(None);
        }
        duplicate(self.pipes[stage].write.as_ref(), stage)
    }

    /// Close every end the parent still holds and return how many were closed.
    ///
    /// Must run right after the last stage is spawned. Calling it again is a
    /// no-op.
    pub fn close_parent_ends(&mut self) -> usize {
        let closed = self.pipes.iter_mut().map(Pipe::close).sum();
        debug!(closed, "released parent pipe ends");
        closed
    }

    /// Ends the parent still holds across all pipes.
    pub fn open_ends(&self) -> usize {
        self.pipes.iter().map(Pipe::open_ends).sum()
    }
}

fn duplicate(end: Option<&OwnedFd>, boundary: usize) -> io::Result<Option<OwnedFd>> {
    match end {
        Some(fd) => fd.try_clone().map(Some),
        None => Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            format!("pipe {boundary} is already closed"),
        )),
    }
}
