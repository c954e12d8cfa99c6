//! Runs a pipeline of external stages joined by OS pipes.
//!
//! Stages are spawned in order and run concurrently. A stage that cannot be
//! started is recorded and skipped, never aborting its siblings. Every stage
//! that did start is waited on before [`Executor::execute`] returns.

use crate::env::Environment;
use crate::error::{PipeError, SpawnError};
use crate::external::{ProcessHandle, StageOutcome, find_command_path};
use crate::parser::Pipeline;
use crate::pipe::PipeArena;
use std::ffi::OsString;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::Stdio;

/// Where the shell side of a pipeline's first stdin or last stdout goes.
#[derive(Debug, Default)]
pub enum Binding {
    /// Whatever the shell itself has.
    #[default]
    Inherit,
    /// `/dev/null`.
    Null,
    /// A descriptor handed over to the stage.
    Fd(OwnedFd),
}

impl Binding {
    fn into_stdio(self) -> Stdio {
        match self {
            Binding::Inherit => Stdio::inherit(),
            Binding::Null => Stdio::null(),
            Binding::Fd(fd) => Stdio::from(fd),
        }
    }
}

impl From<OwnedFd> for Binding {
    fn from(fd: OwnedFd) -> Self {
        Binding::Fd(fd)
    }
}

impl From<File> for Binding {
    fn from(file: File) -> Self {
        Binding::Fd(file.into())
    }
}

/// Stdin of the first stage and stdout of the last one.
#[derive(Debug, Default)]
pub struct StageIo {
    pub stdin: Binding,
    pub stdout: Binding,
}

impl StageIo {
    pub fn new(stdin: impl Into<Binding>, stdout: impl Into<Binding>) -> Self {
        Self {
            stdin: stdin.into(),
            stdout: stdout.into(),
        }
    }
}

/// Spawns and reaps external pipelines.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    /// Names that are shell builtins; used to explain a lookup failure.
    reserved: Vec<String>,
    /// Overrides `$PATH` when set.
    search_paths: Option<OsString>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `names` as builtins. A stage with one of these names that has no
    /// external program fails with [`SpawnError::BuiltinInPipeline`].
    pub fn reserving<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(names.into_iter().map(Into::into));
        self
    }

    /// Search these directories instead of `$PATH`.
    pub fn with_search_paths(mut self, paths: impl Into<OsString>) -> Self {
        self.search_paths = Some(paths.into());
        self
    }

    /// Run every stage of `pipeline` and wait for all of them.
    ///
    /// Returns one outcome per stage, in stage order. The only error is a pipe
    /// that could not be created, in which case nothing was spawned.
    pub fn execute(
        &self,
        pipeline: &Pipeline,
        env: &Environment,
        io: StageIo,
    ) -> Result<Vec<StageOutcome>, PipeError> {
        let handles = self.spawn_all(pipeline, env, io)?;
        Ok(wait_all(handles))
    }

    /// Create the pipes, spawn every stage and release the parent's pipe ends.
    ///
    /// The returned handles have not been waited on.
    pub fn spawn_all(
        &self,
        pipeline: &Pipeline,
        env: &Environment,
        io: StageIo,
    ) -> Result<Vec<ProcessHandle>, PipeError> {
        let count = pipeline.len();
        let mut arena = PipeArena::for_stages(count)?;
        let search_paths = self
            .search_paths
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();

        let StageIo { stdin, stdout } = io;
        let mut first_stdin = Some(stdin);
        let mut last_stdout = Some(stdout);

        let mut handles = Vec::with_capacity(count);
        for (index, stage) in pipeline.stages().iter().enumerate() {
            let wired = wire_stdin(&arena, index, &mut first_stdin)
                .and_then(|stdin| Ok((stdin, wire_stdout(&arena, index, &mut last_stdout)?)));
            let handle = match wired {
                Err(source) => ProcessHandle::failed(
                    index,
                    SpawnError::Wiring {
                        name: stage.name().to_owned(),
                        source,
                    },
                ),
                Ok((stdin, stdout)) => {
                    match find_command_path(&search_paths, env.current_dir(), Path::new(stage.name())) {
                        Some(program) => ProcessHandle::spawn(
                            index,
                            stage,
                            &program,
                            env.current_dir(),
                            stdin,
                            stdout,
                        ),
                        None => ProcessHandle::failed(index, self.not_found(stage.name())),
                    }
                }
            };
            handles.push(handle);
        }

        arena.close_parent_ends();
        Ok(handles)
    }

    fn not_found(&self, name: &str) -> SpawnError {
        let name = name.to_owned();
        if self.reserved.contains(&name) {
            SpawnError::BuiltinInPipeline { name }
        } else {
            SpawnError::NotFound { name }
        }
    }
}

fn wire_stdin(arena: &PipeArena, index: usize, first: &mut Option<Binding>) -> std::io::Result<Stdio> {
    Ok(match arena.stdin_for(index)? {
        Some(fd) => Stdio::from(fd),
        None => first.take().unwrap_or_default().into_stdio(),
    })
}

fn wire_stdout(arena: &PipeArena, index: usize, last: &mut Option<Binding>) -> std::io::Result<Stdio> {
    Ok(match arena.stdout_for(index)? {
        Some(fd) => Stdio::from(fd),
        None => last.take().unwrap_or_default().into_stdio(),
    })
}

/// Wait on every handle, including after earlier failures, so no child is
/// left unreaped.
pub fn wait_all(handles: Vec<ProcessHandle>) -> Vec<StageOutcome> {
    handles.into_iter().map(ProcessHandle::into_outcome).collect()
}
