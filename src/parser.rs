//! Splits one input line into a [`Pipeline`] of [`Stage`]s.
//!
//! The grammar is deliberately flat: `|` separates stages and whitespace
//! separates tokens. There is no quoting, escaping or expansion.

use crate::error::ParseError;

const PIPE_DELIMITER: char = '|';

/// One command invocation: a program or builtin name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    argv: Vec<String>,
}

impl Stage {
    /// Build a stage from its argv. Returns `None` for an empty argv.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            None
        } else {
            Some(Self { argv })
        }
    }

    /// The command name, i.e. the first token.
    pub fn name(&self) -> &str {
        &self.argv[0]
    }

    /// Everything after the command name.
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

/// Ordered chain of stages parsed from one line.
///
/// A pipeline with zero stages is what blank input parses to; it is a no-op,
/// not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The only stage of a single-stage pipeline.
    pub fn single(&self) -> Option<&Stage> {
        match self.stages.as_slice() {
            [stage] => Some(stage),
            _ => None,
        }
    }
}

/// Parse one line of input.
///
/// ```
/// let pipeline = myshell::parse("ls -l | wc -l").unwrap();
/// assert_eq!(pipeline.len(), 2);
/// assert_eq!(pipeline.stages()[1].argv(), ["wc", "-l"]);
/// ```
pub fn parse(line: &str) -> Result<Pipeline, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Pipeline::default());
    }

    let stages = line
        .split(PIPE_DELIMITER)
        .enumerate()
        .map(|(position, segment)| {
            let argv = segment.split_whitespace().map(str::to_owned).collect();
            Stage::new(argv).ok_or(ParseError::EmptyStage { position })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Pipeline::new(stages))
}
