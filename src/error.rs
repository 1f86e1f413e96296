use ariadne::{Color, Label, Report, ReportKind, Source};
use std::fmt::{self, Display, Formatter};
use std::ops::Range;
use yansi::Paint;

/// Category of a compile-time failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognized character run, unmatched bracket, bad literal.
    Lexical,
    /// Misplaced keyword, indentation problems, misplaced assignment.
    Syntax,
    /// Undeclared or redeclared names, return-type mismatch.
    Semantic,
    /// Missing cast path, ambiguous or missing overload.
    Type,
    /// Freeing memory the allocation ledger does not know about.
    Resource,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Lexical => "E001",
            ErrorKind::Syntax => "E002",
            ErrorKind::Semantic => "E003",
            ErrorKind::Type => "E004",
            ErrorKind::Resource => "E005",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Lexical => "Lexical",
            ErrorKind::Syntax => "Syntax",
            ErrorKind::Semantic => "Semantic",
            ErrorKind::Type => "Type",
            ErrorKind::Resource => "Resource",
        };
        write!(f, "{name}")
    }
}

/// The source line an error was raised on.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub line: usize,
    pub text: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind} error: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    /// Byte range inside the offending line.
    pub span: Option<Range<usize>>,
    pub location: Option<Location>,
}

pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            location: None,
        }
    }

    pub fn lexical(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lexical, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Semantic, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    /// Attaches the line the error came from. An existing location wins, so
    /// errors raised deeper in a block keep pointing at their own line.
    pub fn at_line(mut self, line: usize, text: &str) -> Self {
        if self.location.is_none() {
            self.location = Some(Location {
                line,
                text: text.to_string(),
            });
        }
        self
    }

    pub fn report(&self, file: &str) -> Option<Report<'static, (String, Range<usize>)>> {
        let location = self.location.as_ref()?;
        let len = location.text.len();
        let span = self
            .span
            .clone()
            .map(|s| s.start.min(len)..s.end.min(len))
            .unwrap_or(0..len);
        let id = format!("{}:{}", file, location.line);

        let report = Report::build(ReportKind::Error, (id.clone(), span.clone()))
            .with_code(self.kind.code())
            .with_message(format!("{} error", self.kind))
            .with_label(
                Label::new((id, span))
                    .with_message(self.message.clone())
                    .with_color(Color::Red),
            )
            .finish();
        Some(report)
    }

    /// Prints the error to stderr, with the offending line when one is known.
    pub fn eprint(&self, file: &str) {
        match (self.report(file), &self.location) {
            (Some(report), Some(location)) => {
                let id = format!("{}:{}", file, location.line);
                if report
                    .eprint((id, Source::from(location.text.clone())))
                    .is_err()
                {
                    eprintln!("{}", self.to_string().red());
                }
            }
            _ => eprintln!("{}", self.to_string().red()),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("backend error: {0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Top-level error type for compiling and running Tau code.
#[derive(thiserror::Error, Debug)]
pub enum TauError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TauError {
    pub fn eprint(&self, file: &str) {
        match self {
            TauError::Compile(e) => e.eprint(file),
            other => eprintln!("{}", other.to_string().red()),
        }
    }
}
