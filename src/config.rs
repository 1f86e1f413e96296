use std::path::PathBuf;
use yansi::Paint;

/// Which compiler stages print debug traces to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trace {
    pub lexer: bool,
    pub ast: bool,
    pub ir: bool,
    pub memory: bool,
}

impl Trace {
    pub fn all() -> Self {
        Self {
            lexer: true,
            ast: true,
            ir: true,
            memory: true,
        }
    }

    pub fn lexer(&self, message: impl FnOnce() -> String) {
        if self.lexer {
            eprintln!("{} {}", "LEXER:".cyan().bold(), message());
        }
    }

    pub fn ast(&self, message: impl FnOnce() -> String) {
        if self.ast {
            eprintln!("{}\n{}", "AST:".green().bold(), message());
        }
    }

    pub fn ir(&self, message: impl FnOnce() -> String) {
        if self.ir {
            eprintln!("{}", "===== BEGIN IR =====".yellow().bold());
            eprint!("{}", message());
            eprintln!("{}", "====== END IR ======".yellow().bold());
        }
    }

    pub fn memory(&self, message: impl FnOnce() -> String) {
        if self.memory {
            eprintln!("{} {}", "MEMORY:".magenta().bold(), message());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub trace: Trace,
    pub quiet: bool,
    /// Executable written in file mode.
    pub output: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            trace: Trace::default(),
            quiet: false,
            output: PathBuf::from("a.out"),
        }
    }
}
