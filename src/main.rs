use anyhow::{Context, Result};
use argh::FromArgs;
use myshell::{Config, LineSource, Script, Shell, Terminal};
use std::io::{self, IsTerminal};
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// A tiny shell: builtins (cd, pwd, echo, kill, ps) and external pipelines.
struct Args {
    #[argh(option, default = "myshell::DEFAULT_PROMPT.to_string()")]
    /// prompt shown before each interactive line.
    prompt: String,

    #[argh(option, default = "myshell::DEFAULT_SENTINEL.to_string()")]
    /// input line that ends the session.
    sentinel: String,

    #[argh(option, short = 'c')]
    /// run this one line and exit with its status.
    command: Option<String>,

    #[argh(switch)]
    /// do not keep line history.
    no_history: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("MYSHELL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args: Args = argh::from_env();
    let config = Config {
        prompt: args.prompt,
        sentinel: args.sentinel,
    };
    let mut shell = Shell::new(config).context("cannot determine the working directory")?;

    if let Some(line) = args.command {
        shell.execute_line(&line);
        std::process::exit(shell.last_status());
    }

    let mut input: Box<dyn LineSource> = if io::stdin().is_terminal() {
        Box::new(Terminal::new(!args.no_history).context("cannot set up the terminal")?)
    } else {
        Box::new(Script::new(io::stdin().lock()))
    };

    let status = shell.run(input.as_mut())?;
    std::process::exit(status);
}
