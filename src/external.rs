use crate::ExitCode;
use crate::error::SpawnError;
use crate::parser::Stage;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{debug, warn};

/// Lifecycle of one external stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Pending,
    Exited(i32),
    Signaled(i32),
    SpawnFailed,
}

/// Final result for one stage of a pipeline.
#[derive(Debug)]
pub enum StageOutcome {
    SpawnFailed(SpawnError),
    Exited(i32),
    Signaled(i32),
}

impl StageOutcome {
    /// Shell-style status: the exit code, 128 + signal, or 126/127 when the
    /// stage never started.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            StageOutcome::Exited(code) => *code,
            StageOutcome::Signaled(signal) => 128 + signal,
            StageOutcome::SpawnFailed(err) => err.exit_code(),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, StageOutcome::Exited(0))
    }
}

/// The executor's handle on one stage: a running child, or the reason there
/// is none.
#[derive(Debug)]
pub struct ProcessHandle {
    stage: usize,
    name: String,
    child: Option<Child>,
    status: ProcessStatus,
    error: Option<SpawnError>,
}

impl ProcessHandle {
    /// Spawn `stage` running `program`.
    ///
    /// `stdin` and `stdout` are moved into the command and released as soon
    /// as the spawn attempt returns, whether it succeeded or not.
    pub(crate) fn spawn(
        index: usize,
        stage: &Stage,
        program: &Path,
        cwd: &Path,
        stdin: Stdio,
        stdout: Stdio,
    ) -> Self {
        let mut command = Command::new(program);
        command
            .arg0(stage.name())
            .args(stage.args())
            .current_dir(cwd)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::inherit());
        let spawned = command.spawn();
        // The command still owns our duplicated pipe ends.
        drop(command);

        match spawned {
            Ok(child) => {
                debug!(stage = index, pid = child.id(), program = %program.display(), "spawned");
                Self {
                    stage: index,
                    name: stage.name().to_owned(),
                    child: Some(child),
                    status: ProcessStatus::Pending,
                    error: None,
                }
            }
            Err(source) => Self::failed(
                index,
                SpawnError::Exec {
                    name: stage.name().to_owned(),
                    source,
                },
            ),
        }
    }

    pub(crate) fn failed(index: usize, error: SpawnError) -> Self {
        warn!(stage = index, %error, "stage not started");
        let name = match &error {
            SpawnError::NotFound { name }
            | SpawnError::BuiltinInPipeline { name }
            | SpawnError::Wiring { name, .. }
            | SpawnError::Exec { name, .. }
            | SpawnError::Wait { name, .. } => name.clone(),
        };
        Self {
            stage: index,
            name,
            child: None,
            status: ProcessStatus::SpawnFailed,
            error: Some(error),
        }
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// Block until the child terminates. No-op for failed or already reaped
    /// handles.
    pub fn wait(&mut self) -> ProcessStatus {
        if let Some(mut child) = self.child.take() {
            self.status = match child.wait() {
                Ok(status) => terminal_status(status),
                Err(source) => {
                    self.error = Some(SpawnError::Wait {
                        name: self.name.clone(),
                        source,
                    });
                    ProcessStatus::SpawnFailed
                }
            };
            debug!(stage = self.stage, status = ?self.status, "reaped");
        }
        self.status
    }

    /// Wait if needed and turn the handle into its stage outcome.
    pub fn into_outcome(mut self) -> StageOutcome {
        match self.wait() {
            ProcessStatus::Exited(code) => StageOutcome::Exited(code),
            ProcessStatus::Signaled(signal) => StageOutcome::Signaled(signal),
            ProcessStatus::SpawnFailed | ProcessStatus::Pending => {
                StageOutcome::SpawnFailed(self.error.take().unwrap_or_else(|| SpawnError::NotFound {
                    name: self.name.clone(),
                }))
            }
        }
    }
}

fn terminal_status(status: ExitStatus) -> ProcessStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => ProcessStatus::Exited(code),
        (None, Some(signal)) => ProcessStatus::Signaled(signal),
        (None, None) => ProcessStatus::Exited(-1),
    }
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it is a file.
/// - Path with a separator (`bin/sh`, `./foo`): resolved against `cwd`, returned if it is a file.
/// - Single path component: each directory in `search_paths` (PATH) is tried in
///   order and the first executable file wins. Empty or relative PATH entries
///   are taken relative to `cwd`.
/// - Empty path: returns `None`.
pub fn find_command_path(search_paths: &OsStr, cwd: &Path, path: &Path) -> Option<PathBuf> {
    if path.is_absolute() {
        return find_by_path(path);
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        // Empty path -> not found
        (None, _) => None,
        (Some(Component::Normal(cmd)), None) => find_in_path(search_paths, cwd, cmd),
        // Multiple components -> relative to the working directory
        _ => find_by_path(&cwd.join(path)),
    }
}

fn find_in_path(search_paths: &OsStr, cwd: &Path, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| cwd.join(dir).join(cmd))
        .find(|candidate| is_executable(candidate))
}

fn find_by_path(path: &Path) -> Option<PathBuf> {
    if path.is_file() { Some(path.to_path_buf()) } else { None }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
