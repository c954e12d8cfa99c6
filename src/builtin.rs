use crate::ExitCode;
use crate::env::Environment;
use crate::error::BuiltinError;
use argh::{EarlyExit, FromArgs};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use sysinfo::{ProcessRefreshKind, System};

/// Entry point of a builtin: raw arguments in, exit code or error out.
pub type BuiltinFn =
    fn(&[String], &mut Environment, &mut dyn Write) -> Result<ExitCode, BuiltinError>;

/// What a command name resolves to.
#[derive(Clone, Copy)]
pub enum Handler {
    Builtin(BuiltinFn),
    External,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Builtin(_) => f.write_str("Builtin"),
            Handler::External => f.write_str("External"),
        }
    }
}

/// Result of asking the registry to run a command.
#[derive(Debug)]
pub enum Dispatch {
    Handled(Result<ExitCode, BuiltinError>),
    NotABuiltin,
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command, writing any output to `stdout`.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment)
    -> Result<ExitCode, BuiltinError>;
}

/// Parse `args` into `T` and run it.
///
/// `--help` prints usage and succeeds; any other parse failure is reported as
/// an invalid argument.
fn run<T: BuiltinCommand>(
    args: &[String],
    env: &mut Environment,
    stdout: &mut dyn Write,
) -> Result<ExitCode, BuiltinError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match T::from_args(&[T::name()], &args) {
        Ok(cmd) => cmd.execute(stdout, env),
        Err(EarlyExit {
            output,
            status: Ok(()),
        }) => {
            writeln!(stdout, "{}", output.trim_end()).map_err(|e| BuiltinError::os(T::name(), e))?;
            Ok(0)
        }
        Err(EarlyExit {
            output,
            status: Err(()),
        }) => Err(BuiltinError::invalid(T::name(), output.trim_end())),
    }
}

/// Name-to-handler table for in-process commands.
///
/// ```
/// use myshell::{Dispatch, Environment, Registry};
///
/// let registry = Registry::default();
/// let mut env = Environment::at("/");
/// let mut out = Vec::new();
/// let args = vec!["hello".to_string(), "world".to_string()];
/// match registry.dispatch("echo", &args, &mut env, &mut out) {
///     Dispatch::Handled(status) => assert_eq!(status.unwrap(), 0),
///     Dispatch::NotABuiltin => unreachable!(),
/// }
/// assert_eq!(out, b"hello world\n");
/// ```
#[derive(Clone)]
pub struct Registry {
    table: HashMap<&'static str, BuiltinFn>,
}

impl Registry {
    /// A registry with no builtins at all.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Add (or replace) a builtin.
    pub fn insert(&mut self, name: &'static str, handler: BuiltinFn) -> &mut Self {
        self.table.insert(name, handler);
        self
    }

    fn register<T: BuiltinCommand>(&mut self) -> &mut Self {
        self.insert(T::name(), run::<T>)
    }

    pub fn lookup(&self, name: &str) -> Handler {
        match self.table.get(name) {
            Some(&handler) => Handler::Builtin(handler),
            None => Handler::External,
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.table.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn dispatch(
        &self,
        name: &str,
        args: &[String],
        env: &mut Environment,
        stdout: &mut dyn Write,
    ) -> Dispatch {
        match self.lookup(name) {
            Handler::Builtin(handler) => Dispatch::Handled(handler(args, env, stdout)),
            Handler::External => Dispatch::NotABuiltin,
        }
    }
}

impl Default for Registry {
    /// `cd`, `pwd`, `echo`, `kill` and `ps`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register::<Cd>()
            .register::<Pwd>()
            .register::<Echo>()
            .register::<Kill>()
            .register::<Ps>();
        registry
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode, BuiltinError> {
        let dir = env.current_dir();
        // The directory may have been removed since `cd` entered it.
        let meta = fs::metadata(dir).map_err(|e| BuiltinError::os("pwd", e))?;
        if !meta.is_dir() {
            return Err(BuiltinError::os(
                "pwd",
                io::Error::new(io::ErrorKind::NotADirectory, dir.display().to_string()),
            ));
        }
        writeln!(stdout, "{}", dir.display()).map_err(|e| BuiltinError::os("pwd", e))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: String,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode, BuiltinError> {
        env.change_dir(&self.target)
            .map_err(|e| BuiltinError::os("cd", io::Error::new(e.kind(), format!("{}: {e}", self.target))))?;
        Ok(0)
    }
}

/// Write the arguments to standard output, separated by spaces.
///
/// Every token is printed verbatim, so `FromArgs` is implemented by hand
/// instead of derived: nothing is treated as a flag.
pub struct Echo {
    pub args: Vec<String>,
}

impl FromArgs for Echo {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Echo {
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode, BuiltinError> {
        writeln!(stdout, "{}", self.args.join(" ")).map_err(|e| BuiltinError::os("echo", e))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Send a signal to a process, SIGTERM unless told otherwise.
pub struct Kill {
    #[argh(option, short = 's', default = "Signal::SIGTERM", from_str_fn(parse_signal))]
    /// signal to send, by name (TERM, SIGKILL) or by number.
    pub signal: Signal,

    #[argh(positional)]
    /// id of the target process.
    pub pid: i32,
}

fn parse_signal(value: &str) -> Result<Signal, String> {
    if let Ok(number) = value.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| format!("invalid signal number: {value}"));
    }
    let upper = value.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    name.parse::<Signal>()
        .map_err(|_| format!("unknown signal: {value}"))
}

impl BuiltinCommand for Kill {
    fn name() -> &'static str {
        "kill"
    }

    fn execute(self, _stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode, BuiltinError> {
        // 0 and negatives address process groups, which this shell does not manage.
        if self.pid <= 0 {
            return Err(BuiltinError::invalid("kill", format!("invalid pid: {}", self.pid)));
        }
        signal::kill(Pid::from_raw(self.pid), self.signal).map_err(|errno| {
            let err = io::Error::from(errno);
            BuiltinError::os("kill", io::Error::new(err.kind(), format!("({}) - {err}", self.pid)))
        })?;
        tracing::debug!(pid = self.pid, signal = %self.signal, "signal delivered");
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Report a snapshot of the running processes.
pub struct Ps {
    #[argh(switch, short = 'f')]
    /// show the full command line instead of the process name.
    pub full: bool,
}

impl BuiltinCommand for Ps {
    fn name() -> &'static str {
        "ps"
    }

    fn execute(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode, BuiltinError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(BuiltinError::os(
                "ps",
                io::Error::new(io::ErrorKind::Unsupported, "process table not available on this platform"),
            ));
        }

        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessRefreshKind::everything());
        let mut processes: Vec<_> = sys.processes().values().collect();
        processes.sort_by_key(|process| process.pid());

        let write = |stdout: &mut dyn Write| -> io::Result<()> {
            writeln!(stdout, "{:>7} {:>7} {:<10} COMMAND", "PID", "PPID", "STAT")?;
            for process in &processes {
                let ppid = process
                    .parent()
                    .map_or_else(|| "-".to_string(), |pid| pid.to_string());
                let command = if self.full && !process.cmd().is_empty() {
                    process.cmd().join(" ")
                } else {
                    process.name().to_string()
                };
                writeln!(
                    stdout,
                    "{:>7} {:>7} {:<10} {}",
                    process.pid(),
                    ppid,
                    process.status().to_string(),
                    command
                )?;
            }
            Ok(())
        };
        write(stdout).map_err(|e| BuiltinError::os("ps", e))?;
        Ok(0)
    }
}
