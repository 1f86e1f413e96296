use crate::error::{CompileError, CompileResult};
use std::collections::VecDeque;

/// Width of one indentation level.
pub const INDENT: usize = 4;

/// Where source lines come from.
pub trait LineSource {
    /// Next physical line without its terminator, or `None` once input is
    /// exhausted. `level` is the block depth the caller is reading at, which
    /// interactive sources use for prompts.
    fn read_line(&mut self, level: usize) -> Option<String>;

    /// Interactive sources end every open block on a blank line.
    fn is_interactive(&self) -> bool {
        false
    }
}

/// Lines of an in-memory string.
#[derive(Debug, Clone, Default)]
pub struct StrSource {
    lines: VecDeque<String>,
}

impl StrSource {
    pub fn new(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }
}

impl LineSource for StrSource {
    fn read_line(&mut self, _level: usize) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Look-ahead buffer over a [`LineSource`] that decides where
/// indentation-delimited blocks end.
pub struct SourceBuffer<S> {
    source: S,
    pending: VecDeque<(usize, String)>,
    lines_read: usize,
}

impl<S: LineSource> SourceBuffer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            pending: VecDeque::new(),
            lines_read: 0,
        }
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn fill(&mut self, level: usize) -> bool {
        let interactive = self.source.is_interactive();
        loop {
            let Some(line) = self.source.read_line(level) else {
                return false;
            };
            self.lines_read += 1;
            // blank lines only matter inside a block of an interactive session
            if !line.trim().is_empty() || (interactive && level > 0) {
                self.pending.push_back((self.lines_read, line));
                return true;
            }
        }
    }

    pub fn peek(&mut self, level: usize) -> Option<&str> {
        if self.pending.is_empty() && !self.fill(level) {
            return None;
        }
        self.pending.front().map(|(_, line)| line.as_str())
    }

    /// Takes the next line together with its line number.
    pub fn next_line(&mut self, level: usize) -> Option<(usize, String)> {
        if self.pending.is_empty() && !self.fill(level) {
            return None;
        }
        self.pending.pop_front()
    }

    /// Drops buffered lines, used to recover after an error.
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    /// Whether the block whose body sits at `level` ends before the next
    /// line. Also true at end of input.
    pub fn end(&mut self, level: usize) -> CompileResult<bool> {
        let interactive = self.source.is_interactive();
        let Some(next) = self.peek(level) else {
            return Ok(true);
        };
        let next = next.to_string();

        if interactive && next.trim().is_empty() {
            if level <= 1 {
                self.pending.pop_front();
            }
            return Ok(true);
        }

        let number = self.pending.front().map_or(self.lines_read, |(n, _)| *n);
        let indentation = next.len() - next.trim_start().len();
        let expected = level * INDENT;
        if indentation > expected {
            return Err(CompileError::syntax(format!(
                "too much indentation, expected {} or less",
                expected
            ))
            .with_span(0..indentation)
            .at_line(number, &next));
        }
        if indentation % INDENT != 0 {
            return Err(CompileError::syntax(format!(
                "indentation must be a multiple of {}",
                INDENT
            ))
            .with_span(0..indentation)
            .at_line(number, &next));
        }
        if indentation < expected {
            // an optional `end` at the header's indentation closes the block
            if level > 0 && indentation == expected - INDENT && next.trim() == "end" {
                self.pending.pop_front();
            }
            return Ok(true);
        }
        Ok(false)
    }
}
