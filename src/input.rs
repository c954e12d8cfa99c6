//! Where the shell loop gets its lines from.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead};

/// A source of input lines.
pub trait LineSource {
    /// Read the next line, showing `prompt` if the source is interactive.
    ///
    /// `Ok(None)` means end of input. The returned line has no trailing
    /// newline.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// Interactive terminal input with line editing.
pub struct Terminal {
    editor: DefaultEditor,
    history: bool,
}

impl Terminal {
    pub fn new(history: bool) -> io::Result<Self> {
        let editor = DefaultEditor::new().map_err(readline_to_io)?;
        Ok(Self { editor, history })
    }
}

impl LineSource for Terminal {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if self.history && !line.trim().is_empty() {
                    self.editor
                        .add_history_entry(line.as_str())
                        .map_err(readline_to_io)?;
                }
                Ok(Some(line))
            }
            // Ctrl-C drops the line being edited, like other shells do.
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(readline_to_io(err)),
        }
    }
}

fn readline_to_io(err: ReadlineError) -> io::Error {
    match err {
        ReadlineError::Io(err) => err,
        other => io::Error::other(other.to_string()),
    }
}

/// Plain line-by-line input, e.g. a pipe or a file. No prompt is shown.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// failing the read.
pub struct Script<R> {
    reader: R,
}

impl<R: BufRead> Script<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: BufRead> LineSource for Script<R> {
    fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        if buf.ends_with(b"\n") {
            buf.pop();
            if buf.ends_with(b"\r") {
                buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn script_yields_lines_without_terminators() {
        let mut script = Script::new(Cursor::new("first\r\nsecond\n\nlast"));
        assert_eq!(script.read_line("> ").unwrap().as_deref(), Some("first"));
        assert_eq!(script.read_line("> ").unwrap().as_deref(), Some("second"));
        assert_eq!(script.read_line("> ").unwrap().as_deref(), Some(""));
        assert_eq!(script.read_line("> ").unwrap().as_deref(), Some("last"));
        assert_eq!(script.read_line("> ").unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mut script = Script::new(Cursor::new(b"a\xffb\nnext\n".to_vec()));
        assert_eq!(script.read_line("> ").unwrap().as_deref(), Some("a\u{fffd}b"));
        assert_eq!(script.read_line("> ").unwrap().as_deref(), Some("next"));
        assert_eq!(script.read_line("> ").unwrap(), None);
    }
}
