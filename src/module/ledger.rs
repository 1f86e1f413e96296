use crate::error::{CompileError, CompileResult};
use crate::ir::Value;
use std::collections::BTreeMap;

pub type AllocId = usize;

/// Where an allocation was made, which decides when it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Top-level statements of a unit or program.
    TopLevel,
    /// Body of a user function.
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ownership {
    /// Released when the scope that made it ends.
    Scope,
    /// Held by a variable; released when the variable is reassigned or freed.
    User { variable: String, ptr: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub id: AllocId,
    pub ownership: Ownership,
    pub scope: Scope,
    /// Stack cell holding the pointer returned by malloc.
    pub slot: Value,
}

impl Allocation {
    pub fn is_scope_owned(&self) -> bool {
        self.ownership == Ownership::Scope
    }
}

/// Live heap allocations, keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    entries: BTreeMap<AllocId, Allocation>,
    next_id: AllocId,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, scope: Scope, slot: Value) -> AllocId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Allocation {
                id,
                ownership: Ownership::Scope,
                scope,
                slot,
            },
        );
        id
    }

    pub fn get(&self, id: AllocId) -> Option<&Allocation> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: AllocId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hands a scope-owned allocation to a variable living in `scope`.
    pub fn transfer(
        &mut self,
        id: AllocId,
        variable: &str,
        ptr: Value,
        scope: Scope,
    ) -> CompileResult<()> {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.is_scope_owned() => {
                entry.ownership = Ownership::User {
                    variable: variable.to_string(),
                    ptr,
                };
                entry.scope = scope;
                Ok(())
            }
            Some(_) => Err(CompileError::resource(format!(
                "allocation {} already belongs to a variable",
                id
            ))),
            None => Err(CompileError::resource(format!(
                "allocation {} is not live",
                id
            ))),
        }
    }

    pub fn remove(&mut self, id: AllocId) -> CompileResult<Allocation> {
        self.entries
            .remove(&id)
            .ok_or_else(|| CompileError::resource(format!("allocation {} is not live", id)))
    }

    /// Removes and returns what must be freed when `scope` ends. A function
    /// scope releases everything it made, including allocations held by its
    /// locals; the top level only releases temporaries.
    pub fn drain_scope(&mut self, scope: Scope) -> Vec<Allocation> {
        let ids: Vec<AllocId> = self
            .entries
            .values()
            .filter(|a| a.scope == scope && (scope == Scope::Function || a.is_scope_owned()))
            .map(|a| a.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    pub fn drain_all(&mut self) -> Vec<Allocation> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}
