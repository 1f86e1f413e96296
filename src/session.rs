use crate::config::Options;
use crate::module::ledger::{AllocId, Ledger};
use crate::types::Type;
use std::collections::HashMap;

/// A symbol-table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub ty: Type,
    /// The allocation this variable owns, if it holds a fresh array.
    pub alloc: Option<AllocId>,
}

/// Signature of a user-defined function.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub symbol: String,
    pub params: Vec<(String, Type)>,
    pub returns: Type,
}

/// State shared by every unit compiled in one session: globals, user
/// functions and the allocations they own.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub options: Options,
    globals: HashMap<String, Variable>,
    functions: HashMap<String, Signature>,
    ledger: Ledger,
    units: usize,
}

impl Session {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn global(&self, name: &str) -> Option<&Variable> {
        self.globals.get(name)
    }

    pub fn global_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.globals.get_mut(name)
    }

    pub fn insert_global(&mut self, name: &str, variable: Variable) {
        self.globals.insert(name.to_string(), variable);
    }

    /// Names of every global, sorted.
    pub fn global_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.globals.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn function(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name)
    }

    pub fn insert_function(&mut self, name: &str, signature: Signature) {
        self.functions.insert(name.to_string(), signature);
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    /// Name of the next interactive unit's entry function.
    pub fn next_unit_name(&mut self) -> String {
        let name = format!("__unit_{}", self.units);
        self.units += 1;
        name
    }

    /// Snapshot taken before compiling a unit so a failed unit leaves no trace.
    pub fn checkpoint(&self) -> Session {
        self.clone()
    }

    pub fn restore(&mut self, checkpoint: Session) {
        let units = self.units;
        *self = checkpoint;
        // unit names stay unique even across failed units
        self.units = units;
    }
}
