use crate::driver::{self, LineSource, SourceBuffer};
use crate::error::{BackendError, TauError};
use crate::ir::{Entry, Unit};
use crate::session::Session;
use std::fmt::{self, Display, Formatter};
use yansi::Paint;

/// Name used for interactive input in diagnostics.
pub const STDIN: &str = "<stdin>";

/// Value returned by an interactive unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Output {
    Real(f64),
    Int(i32),
    Bool(bool),
}

impl Display for Output {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Output::Real(x) => write!(f, "{:?}", x),
            Output::Int(i) => write!(f, "{}", i),
            Output::Bool(true) => write!(f, "True"),
            Output::Bool(false) => write!(f, "False"),
        }
    }
}

/// Turns compiled units into running code.
pub trait Backend {
    /// Makes everything `unit` defines available to later units.
    fn load(&mut self, unit: &Unit) -> Result<(), BackendError>;

    /// Calls the entry function of a loaded unit.
    fn invoke(&mut self, entry: &Entry) -> Result<Option<Output>, BackendError>;
}

/// An interactive session: every unit is compiled, handed to the backend
/// and run before the next one is read.
pub struct Repl<B> {
    session: Session,
    backend: B,
}

impl<B: Backend> Repl<B> {
    pub fn new(session: Session, backend: B) -> Self {
        Self { session, backend }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Compiles and runs `text` as one unit, returning the value of its
    /// last statement. A failing unit leaves the session untouched.
    pub fn run_command(&mut self, text: &str) -> Result<Option<Output>, TauError> {
        let checkpoint = self.session.checkpoint();
        let result = driver::compile_command(&mut self.session, text)
            .map_err(TauError::from)
            .and_then(|unit| self.submit(&unit));
        if result.is_err() {
            self.session.restore(checkpoint);
        }
        result
    }

    /// Compiles and runs the next top-level construct from `source`.
    pub fn run_unit<S: LineSource>(
        &mut self,
        source: &mut SourceBuffer<S>,
    ) -> Result<Option<Output>, TauError> {
        let checkpoint = self.session.checkpoint();
        let result = driver::compile_unit(&mut self.session, source)
            .map_err(TauError::from)
            .and_then(|unit| self.submit(&unit));
        if result.is_err() {
            self.session.restore(checkpoint);
        }
        result
    }

    fn submit(&mut self, unit: &Unit) -> Result<Option<Output>, TauError> {
        self.backend.load(unit)?;
        match &unit.entry {
            Some(entry) => Ok(self.backend.invoke(entry)?),
            None => Ok(None),
        }
    }

    /// Reads units until `source` is exhausted, printing each result.
    /// Errors are reported and the rest of the offending input dropped.
    pub fn run<S: LineSource>(&mut self, source: &mut SourceBuffer<S>) {
        if !self.session.options.quiet {
            println!("{}", "Tau REPL".green().bold());
            println!("{}", "Blank line ends a block; Ctrl-D exits.".dim());
        }

        loop {
            match source.end(0) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    e.eprint(STDIN);
                    source.discard();
                    continue;
                }
            }
            match self.run_unit(source) {
                Ok(Some(output)) => println!("{}", output),
                Ok(None) => {}
                Err(e) => {
                    e.eprint(STDIN);
                    source.discard();
                }
            }
        }
    }
}
