//! Error types for every stage of handling one input line.
//!
//! Each error is local to a single dispatch except [`ShellError`], which is the
//! only condition that stops the interactive loop.

use std::io;
use thiserror::Error;

/// Malformed pipeline syntax.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A segment between two `|` (or at either end of the line) has no tokens.
    #[error("syntax error: empty command at position {position} of the pipeline")]
    EmptyStage { position: usize },
}

/// Failure of an in-process builtin.
#[derive(Debug, Error)]
pub enum BuiltinError {
    /// Missing, malformed or unexpected arguments.
    #[error("{command}: {message}")]
    InvalidArgument {
        command: &'static str,
        message: String,
    },
    /// The underlying OS call failed.
    #[error("{command}: {source}")]
    Os {
        command: &'static str,
        #[source]
        source: io::Error,
    },
}

impl BuiltinError {
    pub(crate) fn invalid(command: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            command,
            message: message.into(),
        }
    }

    pub(crate) fn os(command: &'static str, source: impl Into<io::Error>) -> Self {
        Self::Os {
            command,
            source: source.into(),
        }
    }
}

/// Failure to start (or reap) one external stage.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("{name}: command not found")]
    NotFound { name: String },
    /// A builtin name reached the executor and no external program carries it.
    #[error("{name}: shell builtin cannot run inside a pipeline")]
    BuiltinInPipeline { name: String },
    /// Duplicating a pipe end for the stage's stdio failed.
    #[error("{name}: cannot wire stdio: {source}")]
    Wiring {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{name}: {source}")]
    Exec {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{name}: wait failed: {source}")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    /// Status a shell conventionally reports for this failure.
    pub fn exit_code(&self) -> crate::ExitCode {
        match self {
            SpawnError::NotFound { .. } | SpawnError::BuiltinInPipeline { .. } => 127,
            _ => 126,
        }
    }
}

/// Pipe creation ran out of resources before any stage was spawned.
#[derive(Debug, Error)]
#[error("cannot create pipe {index}: {source}")]
pub struct PipeError {
    /// Boundary index of the pipe that could not be created.
    pub index: usize,
    #[source]
    pub source: io::Error,
}

/// Errors that terminate the shell loop.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("cannot read input: {0}")]
    Input(#[from] io::Error),
}
