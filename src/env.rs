use std::env as stdenv;
use std::io;
use std::path::{Path, PathBuf};

/// Shell state that outlives a single dispatch.
///
/// Today this is only the working directory. `cd` is the one writer; every
/// external stage gets a copy of it at spawn time, so later changes never
/// reach children that are already running.
#[derive(Debug, Clone)]
pub struct Environment {
    current_dir: PathBuf,
}

impl Environment {
    /// Capture the process's current working directory.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            current_dir: stdenv::current_dir()?,
        })
    }

    /// Environment rooted at `dir` without touching the process state.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            current_dir: dir.into(),
        }
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    /// Resolve `target` against the working directory.
    pub fn resolve(&self, target: impl AsRef<Path>) -> PathBuf {
        let target = target.as_ref();
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.current_dir.join(target)
        }
    }

    /// Change the working directory of both this environment and the process.
    ///
    /// The path is canonicalized first; on failure nothing changes.
    pub fn change_dir(&mut self, target: impl AsRef<Path>) -> io::Result<&Path> {
        let canonical = self.resolve(target).canonicalize()?;
        if !canonical.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{}: not a directory", canonical.display()),
            ));
        }
        stdenv::set_current_dir(&canonical)?;
        self.current_dir = canonical;
        Ok(&self.current_dir)
    }
}
