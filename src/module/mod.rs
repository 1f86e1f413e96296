use crate::error::{CompileError, CompileResult};
use crate::ir::{Constant, Declaration, Entry, Function, IRType, Instruction, Stream, Unit, Value};
use crate::session::{Session, Signature, Variable};
use crate::types::Type;
use std::collections::{HashMap, HashSet};

pub mod ledger;

pub use ledger::{AllocId, Allocation, Ledger, Ownership, Scope};

#[cfg(test)]
pub mod test;

/// A variable as seen by emitted code.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub ty: Type,
    /// Address of the variable's storage.
    pub ptr: Value,
    pub alloc: Option<AllocId>,
    pub global: bool,
}

/// Symbol of a user variable. Globals and locals share it; the `Value`
/// variant holding it decides between `@` and `%`.
pub fn variable_symbol(name: &str) -> String {
    format!("usr_{}", name)
}

pub fn function_symbol(name: &str) -> String {
    format!("fn_{}", name)
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// State of one compilation unit: local symbols, counters, the declaration
/// header and finished function bodies. Globals, functions and the
/// allocation ledger live in the [`Session`].
pub struct Module<'s> {
    session: &'s mut Session,
    name: String,
    scope: Scope,
    locals: HashMap<String, Variable>,
    declared: HashSet<String>,
    declarations: Vec<Declaration>,
    functions: Vec<Function>,
    register_counter: usize,
    block_counter: usize,
    slot_counter: usize,
}

impl<'s> Module<'s> {
    pub fn new(session: &'s mut Session, name: impl Into<String>) -> Self {
        Self {
            session,
            name: name.into(),
            scope: Scope::TopLevel,
            locals: HashMap::new(),
            declared: HashSet::new(),
            declarations: Vec::new(),
            functions: Vec::new(),
            register_counter: 0,
            block_counter: 0,
            slot_counter: 0,
        }
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn new_register(&mut self) -> String {
        let reg = format!("reg_{}", self.register_counter);
        self.register_counter += 1;
        reg
    }

    /// Number used to make the labels of one block construct unique.
    pub fn new_block_id(&mut self) -> usize {
        let id = self.block_counter;
        self.block_counter += 1;
        id
    }

    /// Adds `declaration` to the header unless its name is already there.
    pub fn ensure_declared(&mut self, declaration: Declaration) {
        if self.declared.insert(declaration.name().to_string()) {
            self.declarations.push(declaration);
        }
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Type of `name` without emitting anything.
    pub fn lookup(&self, name: &str) -> Option<&Variable> {
        self.locals
            .get(name)
            .or_else(|| self.session.global(name))
    }

    pub fn new_variable(
        &mut self,
        out: &mut Stream,
        name: &str,
        ty: &Type,
    ) -> CompileResult<VarRef> {
        if !is_identifier(name) || Type::is_type_name(name) {
            return Err(CompileError::semantic(format!(
                "'{}' is not a valid variable name",
                name
            )));
        }

        let global = self.scope == Scope::TopLevel;
        let exists = if global {
            self.session.global(name).is_some()
        } else {
            self.locals.contains_key(name)
        };
        if exists {
            return Err(CompileError::semantic(format!(
                "variable '{}' is already declared",
                name
            )));
        }

        let variable = Variable {
            ty: ty.clone(),
            alloc: None,
        };
        let ptr = if global {
            let symbol = variable_symbol(name);
            self.session.insert_global(name, variable);
            self.ensure_declared(Declaration::Global {
                name: symbol.clone(),
                ty: ty.ir_type(),
                init: Some(ty.zero()),
            });
            Value::Global(symbol)
        } else {
            let symbol = variable_symbol(name);
            self.locals.insert(name.to_string(), variable);
            out.add_instruction(Instruction::Alloca {
                dest: symbol.clone(),
                ty: ty.ir_type(),
            });
            Value::Register(symbol)
        };

        Ok(VarRef {
            name: name.to_string(),
            ty: ty.clone(),
            ptr,
            alloc: None,
            global,
        })
    }

    /// Resolves a variable, declaring globals defined by earlier units.
    pub fn get_variable(&mut self, name: &str) -> Option<VarRef> {
        if let Some(local) = self.locals.get(name) {
            return Some(VarRef {
                name: name.to_string(),
                ty: local.ty.clone(),
                ptr: Value::Register(variable_symbol(name)),
                alloc: local.alloc,
                global: false,
            });
        }

        let global = self.session.global(name)?.clone();
        let symbol = variable_symbol(name);
        self.ensure_declared(Declaration::Global {
            name: symbol.clone(),
            ty: global.ty.ir_type(),
            init: None,
        });
        Some(VarRef {
            name: name.to_string(),
            ty: global.ty,
            ptr: Value::Global(symbol),
            alloc: global.alloc,
            global: true,
        })
    }

    fn set_owner(&mut self, var: &VarRef, alloc: Option<AllocId>) {
        let entry = if var.global {
            self.session.global_mut(&var.name)
        } else {
            self.locals.get_mut(&var.name)
        };
        if let Some(entry) = entry {
            entry.alloc = alloc;
        }
    }

    /// Emits a heap allocation of `count` elements and records it as owned
    /// by the current scope. The pointer lives in a dedicated stack slot; a
    /// previous pointer still in that slot (from an earlier loop iteration)
    /// is freed first.
    pub fn allocate(&mut self, out: &mut Stream, element: &Type, count: Value) -> (Value, AllocId) {
        let slot = format!("alloc_{}", self.slot_counter);
        self.slot_counter += 1;
        out.add_instruction(Instruction::Alloca {
            dest: slot.clone(),
            ty: IRType::Ptr,
        });
        let previous = self.new_register();
        out.add_instruction(Instruction::Load {
            dest: previous.clone(),
            ptr: Value::Register(slot.clone()),
            ty: IRType::Ptr,
        });
        out.add_instruction(Instruction::Free {
            ptr: Value::Register(previous),
        });

        let ptr = self.new_register();
        out.add_instruction(Instruction::Malloc {
            dest: ptr.clone(),
            ty: element.ir_type(),
            count: count.clone(),
        });
        out.add_instruction(Instruction::Store {
            value: Value::Register(ptr.clone()),
            ptr: Value::Register(slot.clone()),
            ty: IRType::Ptr,
        });

        let id = self
            .session
            .ledger_mut()
            .record(self.scope, Value::Register(slot));
        self.session.options.trace.memory(|| {
            format!(
                "will allocate {} x {} ({} bytes each) as allocation {}",
                count,
                element,
                element.size(),
                id
            )
        });
        (Value::Register(ptr), id)
    }

    /// Whether `id` is a live allocation still owned by its scope.
    pub fn is_fresh(&self, id: AllocId) -> bool {
        self.session
            .ledger()
            .get(id)
            .is_some_and(Allocation::is_scope_owned)
    }

    /// Makes `var` the owner of allocation `id`.
    pub fn mark_ownership_transferred(
        &mut self,
        out: &mut Stream,
        id: AllocId,
        var: &VarRef,
    ) -> CompileResult<()> {
        let scope = if var.global {
            Scope::TopLevel
        } else {
            Scope::Function
        };
        let slot = self
            .session
            .ledger()
            .get(id)
            .map(|a| a.slot.clone())
            .ok_or_else(|| CompileError::resource(format!("allocation {} is not live", id)))?;
        self.session
            .ledger_mut()
            .transfer(id, &var.name, var.ptr.clone(), scope)?;
        out.add_instruction(Instruction::Store {
            value: Value::Constant(Constant::Null),
            ptr: slot,
            ty: IRType::Ptr,
        });
        self.set_owner(var, Some(id));
        self.session
            .options
            .trace
            .memory(|| format!("allocation {} now belongs to '{}'", id, var.name));
        Ok(())
    }

    /// Drops ownership bookkeeping for `var` without freeing anything.
    pub fn clear_owner(&mut self, var: &VarRef) {
        self.set_owner(var, None);
    }

    /// Frees allocation `id`, whose current address is `ptr`.
    pub fn free_allocation(&mut self, out: &mut Stream, id: AllocId, ptr: Value) -> CompileResult<()> {
        self.session.ledger_mut().remove(id)?;
        out.add_instruction(Instruction::Free { ptr });
        self.session
            .options
            .trace
            .memory(|| format!("will free allocation {}", id));
        Ok(())
    }

    fn emit_release(&mut self, out: &mut Stream, allocation: Allocation) {
        let holder = match allocation.ownership {
            Ownership::Scope => allocation.slot,
            Ownership::User { ptr, .. } => ptr,
        };
        let reg = self.new_register();
        out.add_instruction(Instruction::Load {
            dest: reg.clone(),
            ptr: holder,
            ty: IRType::Ptr,
        });
        out.add_instruction(Instruction::Free {
            ptr: Value::Register(reg),
        });
        self.session
            .options
            .trace
            .memory(|| format!("will free allocation {} at end of scope", allocation.id));
    }

    /// Frees what the current scope still owns.
    pub fn end_scope(&mut self, out: &mut Stream) {
        let released = self.session.ledger_mut().drain_scope(self.scope);
        for allocation in released {
            self.emit_release(out, allocation);
        }
    }

    /// Frees every remaining allocation, including those held by globals.
    pub fn end_program(&mut self, out: &mut Stream) {
        let released = self.session.ledger_mut().drain_all();
        for allocation in released {
            self.emit_release(out, allocation);
        }
    }

    pub fn begin_function(&mut self) {
        self.scope = Scope::Function;
        self.locals.clear();
    }

    pub fn end_function(&mut self, function: Function) {
        self.push_function(function);
        self.locals.clear();
        self.scope = Scope::TopLevel;
    }

    /// Registers a user function so calls (including recursive ones) resolve.
    pub fn register_function(
        &mut self,
        name: &str,
        params: Vec<(String, Type)>,
        returns: Type,
    ) -> CompileResult<Signature> {
        if self.session.function(name).is_some() {
            return Err(CompileError::semantic(format!(
                "function '{}' is already defined",
                name
            )));
        }
        let signature = Signature {
            symbol: function_symbol(name),
            params,
            returns,
        };
        // the definition is in this unit, so never emit a declaration for it
        self.declared.insert(signature.symbol.clone());
        self.session.insert_function(name, signature.clone());
        Ok(signature)
    }

    pub fn push_function(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn into_unit(self, entry: Option<Entry>) -> Unit {
        Unit {
            name: self.name,
            declarations: self.declarations,
            functions: self.functions,
            entry,
        }
    }
}
