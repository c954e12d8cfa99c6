use crate::ExitCode;
use crate::builtin::{Handler, Registry};
use crate::env::Environment;
use crate::error::{BuiltinError, ParseError, PipeError, ShellError};
use crate::executor::{Executor, StageIo};
use crate::external::StageOutcome;
use crate::input::LineSource;
use crate::parser::{Pipeline, parse};
use std::fmt::Display;
use std::io::{self, Write};
use tracing::trace;

pub const DEFAULT_PROMPT: &str = "myshell> ";
pub const DEFAULT_SENTINEL: &str = "\\quit";

/// Status reported after a line that failed to parse.
const PARSE_ERROR_STATUS: ExitCode = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prompt: String,
    /// A line equal to this (after trimming) ends the loop.
    pub sentinel: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    ReadingInput,
    Parsing,
    Dispatching,
    BuiltinExecuting,
    PipelineExecuting,
    Exited,
}

/// What happened to one input line.
#[derive(Debug)]
pub enum LineOutcome {
    /// Blank line, nothing dispatched.
    Skipped,
    ParseFailed(ParseError),
    Builtin(Result<ExitCode, BuiltinError>),
    Pipeline(Result<Vec<StageOutcome>, PipeError>),
}

impl LineOutcome {
    /// The status this line leaves behind, or `None` if it leaves the previous
    /// one untouched.
    pub fn exit_code(&self) -> Option<ExitCode> {
        match self {
            LineOutcome::Skipped => None,
            LineOutcome::ParseFailed(_) => Some(PARSE_ERROR_STATUS),
            LineOutcome::Builtin(result) => Some(*result.as_ref().unwrap_or(&1)),
            LineOutcome::Pipeline(Ok(outcomes)) => outcomes.last().map(StageOutcome::exit_code),
            LineOutcome::Pipeline(Err(_)) => Some(1),
        }
    }
}

/// Counters over the lifetime of a shell.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Lines handed to the parser.
    pub lines: usize,
    pub builtins: usize,
    pub pipelines: usize,
}

impl Stats {
    pub fn dispatches(&self) -> usize {
        self.builtins + self.pipelines
    }
}

/// The read-parse-dispatch loop.
///
/// Example
/// ```
/// use myshell::{Config, Environment, LineOutcome, MemWriter, Shell};
///
/// let out = MemWriter::new();
/// let mut sh = Shell::with_environment(Config::default(), Environment::at("/"))
///     .with_output(out.clone(), std::io::sink());
/// let outcome = sh.execute_line("echo hello world");
/// assert!(matches!(outcome, LineOutcome::Builtin(Ok(0))));
/// assert_eq!(out.text(), "hello world\n");
/// ```
pub struct Shell {
    config: Config,
    env: Environment,
    registry: Registry,
    executor: Executor,
    stdout: Box<dyn Write>,
    stderr: Box<dyn Write>,
    stage_io: Box<dyn FnMut() -> StageIo>,
    state: State,
    last_status: ExitCode,
    stats: Stats,
}

impl Shell {
    /// A shell in the process's current directory with the default builtins.
    pub fn new(config: Config) -> io::Result<Self> {
        Ok(Self::with_environment(config, Environment::new()?))
    }

    pub fn with_environment(config: Config, env: Environment) -> Self {
        Self::with_registry(config, env, Registry::default())
    }

    pub fn with_registry(config: Config, env: Environment, registry: Registry) -> Self {
        let executor = Executor::new().reserving(registry.names());
        Self {
            config,
            env,
            registry,
            executor,
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
            stage_io: Box::new(StageIo::default),
            state: State::ReadingInput,
            last_status: 0,
            stats: Stats::default(),
        }
    }

    /// Send builtin output and error reports somewhere other than the
    /// process's stdout and stderr.
    pub fn with_output(mut self, stdout: impl Write + 'static, stderr: impl Write + 'static) -> Self {
        self.stdout = Box::new(stdout);
        self.stderr = Box::new(stderr);
        self
    }

    /// Choose the outer stdin/stdout of every external pipeline.
    pub fn with_stage_io(mut self, stage_io: impl FnMut() -> StageIo + 'static) -> Self {
        self.stage_io = Box::new(stage_io);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Run until end of input or the sentinel line.
    ///
    /// Returns the last status. Fails only if the input itself cannot be read.
    pub fn run(&mut self, input: &mut dyn LineSource) -> Result<ExitCode, ShellError> {
        self.transition(State::ReadingInput);
        while self.state != State::Exited {
            self.step(input)?;
        }
        Ok(self.last_status)
    }

    /// Read and handle one line. Returns `None` once the loop has exited.
    pub fn step(&mut self, input: &mut dyn LineSource) -> Result<Option<LineOutcome>, ShellError> {
        let line = match input.read_line(&self.config.prompt) {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.transition(State::Exited);
                return Ok(None);
            }
            Err(err) => {
                self.transition(State::Exited);
                return Err(ShellError::Input(err));
            }
        };
        if line.trim() == self.config.sentinel {
            self.transition(State::Exited);
            return Ok(None);
        }
        Ok(Some(self.execute_line(&line)))
    }

    /// Parse and dispatch one line, then return to [`State::ReadingInput`].
    pub fn execute_line(&mut self, line: &str) -> LineOutcome {
        self.stats.lines += 1;
        self.transition(State::Parsing);
        let outcome = match parse(line) {
            Err(err) => {
                self.report(&err);
                LineOutcome::ParseFailed(err)
            }
            Ok(pipeline) if pipeline.is_empty() => LineOutcome::Skipped,
            Ok(pipeline) => {
                self.transition(State::Dispatching);
                self.dispatch(&pipeline)
            }
        };
        if let Some(status) = outcome.exit_code() {
            self.last_status = status;
        }
        self.transition(State::ReadingInput);
        outcome
    }

    fn dispatch(&mut self, pipeline: &Pipeline) -> LineOutcome {
        if let Some(stage) = pipeline.single() {
            if let Handler::Builtin(handler) = self.registry.lookup(stage.name()) {
                self.transition(State::BuiltinExecuting);
                self.stats.builtins += 1;
                let result = handler(stage.args(), &mut self.env, &mut *self.stdout);
                let _ = self.stdout.flush();
                if let Err(err) = &result {
                    self.report(err);
                }
                return LineOutcome::Builtin(result);
            }
        }

        self.transition(State::PipelineExecuting);
        self.stats.pipelines += 1;
        let _ = self.stdout.flush();
        let io = (self.stage_io)();
        let result = self.executor.execute(pipeline, &self.env, io);
        match &result {
            Err(err) => self.report(err),
            Ok(outcomes) => {
                for outcome in outcomes {
                    if let StageOutcome::SpawnFailed(err) = outcome {
                        self.report(err);
                    }
                }
            }
        }
        LineOutcome::Pipeline(result)
    }

    fn report(&mut self, err: &dyn Display) {
        let _ = writeln!(self.stderr, "{err}");
        let _ = self.stderr.flush();
    }

    fn transition(&mut self, next: State) {
        trace!(from = ?self.state, to = ?next, "state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpawnError;
    use crate::executor::Binding;
    use crate::input::Script;
    use crate::io_adapters::MemWriter;
    use crate::test_support::lock_current_dir;
    use std::io::{Cursor, Read};

    struct Harness {
        shell: Shell,
        out: MemWriter,
        err: MemWriter,
    }

    fn harness(dir: &std::path::Path) -> Harness {
        let out = MemWriter::new();
        let err = MemWriter::new();
        let shell = Shell::with_environment(Config::default(), Environment::at(dir))
            .with_output(out.clone(), err.clone())
            .with_stage_io(|| StageIo::new(Binding::Null, Binding::Null));
        Harness { shell, out, err }
    }

    fn script(text: &str) -> Script<Cursor<Vec<u8>>> {
        Script::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn echo_is_handled_in_process() {
        let mut h = harness(std::path::Path::new("/"));
        let status = h.shell.run(&mut script("echo hello world\n")).unwrap();

        assert_eq!(status, 0);
        assert_eq!(h.out.text(), "hello world\n");
        assert_eq!(h.shell.stats().builtins, 1);
        assert_eq!(h.shell.stats().pipelines, 0);
        assert_eq!(h.shell.state(), State::Exited);
    }

    #[test]
    fn blank_lines_dispatch_nothing() {
        let mut h = harness(std::path::Path::new("/"));
        assert!(matches!(h.shell.execute_line(""), LineOutcome::Skipped));
        assert!(matches!(h.shell.execute_line("   "), LineOutcome::Skipped));
        assert_eq!(h.shell.state(), State::ReadingInput);
        assert_eq!(h.shell.stats().dispatches(), 0);
        assert_eq!(h.shell.stats().lines, 2);
    }

    #[test]
    fn sentinel_exits_without_dispatching_or_reading_further() {
        let mut h = harness(std::path::Path::new("/"));
        let mut input = script("echo before\n  \\quit \necho after\n");
        h.shell.run(&mut input).unwrap();

        assert_eq!(h.out.text(), "before\n");
        assert_eq!(h.shell.stats().lines, 1);
        assert_eq!(h.shell.state(), State::Exited);

        let mut rest = String::new();
        input.into_inner().read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "echo after\n");
    }

    #[test]
    fn sentinel_must_match_the_whole_line() {
        let mut h = harness(std::path::Path::new("/"));
        let mut input = script("echo \\quit\n");
        assert!(h.shell.step(&mut input).unwrap().is_some());
        assert_eq!(h.out.text(), "\\quit\n");
        assert!(h.shell.step(&mut input).unwrap().is_none());
        assert_eq!(h.shell.state(), State::Exited);
    }

    #[test]
    fn custom_sentinel() {
        let out = MemWriter::new();
        let config = Config {
            sentinel: "bye".into(),
            ..Config::default()
        };
        let mut shell = Shell::with_environment(config, Environment::at("/")).with_output(out.clone(), io::sink());
        shell.run(&mut script("\\quit\nbye\necho unreachable\n")).unwrap();
        // `\quit` is an ordinary (unknown) command here.
        assert_eq!(shell.stats().pipelines, 1);
        assert_eq!(shell.last_status(), 127);
        assert!(out.text().is_empty());
    }

    #[test]
    fn end_of_input_exits_with_last_status() {
        let mut h = harness(std::path::Path::new("/"));
        let status = h.shell.run(&mut script("false\n")).unwrap();
        assert_eq!(status, 1);
        assert_eq!(h.shell.state(), State::Exited);
    }

    #[test]
    fn parse_errors_are_reported_and_the_loop_continues() {
        let mut h = harness(std::path::Path::new("/"));
        let outcome = h.shell.execute_line("echo a ||");
        assert!(matches!(outcome, LineOutcome::ParseFailed(ParseError::EmptyStage { position: 1 })));
        assert_eq!(h.shell.last_status(), 2);
        assert!(h.err.text().contains("syntax error"));
        assert_eq!(h.shell.stats().dispatches(), 0);

        h.shell.run(&mut script("echo ok\n")).unwrap();
        assert_eq!(h.out.text(), "ok\n");
        assert_eq!(h.shell.last_status(), 0);
    }

    #[test]
    fn builtin_errors_are_reported() {
        let mut h = harness(std::path::Path::new("/"));
        let outcome = h.shell.execute_line("cd");
        assert!(matches!(outcome, LineOutcome::Builtin(Err(BuiltinError::InvalidArgument { .. }))));
        assert_eq!(h.shell.last_status(), 1);
        assert!(h.err.text().starts_with("cd: "));
    }

    #[test]
    fn cd_then_pwd_in_the_loop() {
        let _lock = lock_current_dir();
        let orig = std::env::current_dir().unwrap();
        let tmp = std::path::Path::new("/tmp").canonicalize().unwrap();

        let mut h = harness(&orig);
        h.shell.run(&mut script("cd /tmp\npwd\n")).unwrap();
        assert_eq!(h.out.text(), format!("{}\n", tmp.display()));
        assert_eq!(h.shell.env().current_dir(), tmp);

        std::env::set_current_dir(orig).expect("failed to restore cwd");
    }

    #[test]
    fn two_stage_pipeline_reports_both_statuses() {
        let mut h = harness(std::path::Path::new("/"));
        match h.shell.execute_line("printf a | printf b") {
            LineOutcome::Pipeline(Ok(outcomes)) => {
                assert_eq!(outcomes.len(), 2);
                assert!(matches!(outcomes[1], StageOutcome::Exited(0)));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.shell.stats().pipelines, 1);
        assert_eq!(h.shell.stats().builtins, 0);
    }

    #[test]
    fn builtin_names_in_a_pipeline_never_run_in_process() {
        let temp = tempfile::tempdir().unwrap();
        let mut h = harness(temp.path());
        match h.shell.execute_line("cd / | cat") {
            LineOutcome::Pipeline(Ok(outcomes)) => match &outcomes[0] {
                // Some systems ship a `cd` program; it cannot affect us either way.
                StageOutcome::Exited(_) => {}
                StageOutcome::SpawnFailed(SpawnError::BuiltinInPipeline { name }) => assert_eq!(name, "cd"),
                other => panic!("unexpected outcome {other:?}"),
            },
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.shell.env().current_dir(), temp.path());
        assert_eq!(h.shell.stats().builtins, 0);
    }

    #[test]
    fn missing_program_is_reported_per_stage() {
        let mut h = harness(std::path::Path::new("/"));
        h.shell.execute_line("no-such-program-9c2e | cat");
        assert!(h.err.text().contains("no-such-program-9c2e: command not found"));
        assert_eq!(h.shell.last_status(), 0);

        h.shell.execute_line("cat | no-such-program-9c2e");
        assert_eq!(h.shell.last_status(), 127);
    }

    #[test]
    fn undecodable_line_does_not_end_the_session() {
        let mut h = harness(std::path::Path::new("/"));
        let mut input = Script::new(Cursor::new(b"echo a\n\xff\necho b\n".to_vec()));
        let status = h.shell.run(&mut input).unwrap();

        assert_eq!(status, 0);
        assert_eq!(h.out.text(), "a\nb\n");
        assert_eq!(h.shell.stats().lines, 3);
        assert!(h.err.text().contains("command not found"));
    }

    struct BrokenInput;

    impl LineSource for BrokenInput {
        fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
            Err(io::Error::other("terminal went away"))
        }
    }

    #[test]
    fn input_failure_ends_the_loop() {
        let mut h = harness(std::path::Path::new("/"));
        let err = h.shell.run(&mut BrokenInput).unwrap_err();
        assert!(matches!(err, ShellError::Input(_)));
        assert_eq!(h.shell.state(), State::Exited);
    }

    #[test]
    fn line_outcome_exit_codes() {
        assert_eq!(LineOutcome::Skipped.exit_code(), None);
        assert_eq!(LineOutcome::Builtin(Ok(0)).exit_code(), Some(0));
        assert_eq!(
            LineOutcome::Builtin(Err(BuiltinError::invalid("kill", "nope"))).exit_code(),
            Some(1)
        );
        assert_eq!(LineOutcome::Pipeline(Ok(vec![StageOutcome::Signaled(9)])).exit_code(), Some(137));
        let pipe_err = PipeError {
            index: 0,
            source: io::Error::from_raw_os_error(nix::libc::EMFILE),
        };
        assert_eq!(LineOutcome::Pipeline(Err(pipe_err)).exit_code(), Some(1));
    }
}
