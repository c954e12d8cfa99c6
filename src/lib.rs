//! The command-execution core of a small interactive shell.
//!
//! A line of input is parsed into a [`Pipeline`] of [`Stage`]s. A single stage
//! naming a builtin (`cd`, `pwd`, `echo`, `kill`, `ps`) runs in-process through
//! the [`Registry`]; everything else is handed to the [`Executor`], which
//! spawns one external process per stage and joins neighbours with OS pipes.
//! [`Shell`] drives that cycle line by line until end of input or the
//! termination sentinel.
//!
//! There is no quoting, redirection, globbing or expansion: `|` separates
//! stages and whitespace separates arguments.

mod builtin;
mod env;
pub mod error;
mod executor;
mod external;
mod input;
mod io_adapters;
mod parser;
mod pipe;
mod shell;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

pub use builtin::{BuiltinFn, Dispatch, Handler, Registry};
pub use env::Environment;
pub use error::{BuiltinError, ParseError, PipeError, ShellError, SpawnError};
pub use executor::{Binding, Executor, StageIo, wait_all};
pub use external::{ProcessHandle, ProcessStatus, StageOutcome, find_command_path};
pub use input::{LineSource, Script, Terminal};
pub use io_adapters::MemWriter;
pub use parser::{Pipeline, Stage, parse};
pub use pipe::{Pipe, PipeArena};
pub use shell::{Config, DEFAULT_PROMPT, DEFAULT_SENTINEL, LineOutcome, Shell, State, Stats};
