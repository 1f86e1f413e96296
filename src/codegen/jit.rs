use crate::codegen::{CodegenResult, LLVMCodegen};
use crate::error::BackendError;
use crate::ir::{Entry, Unit};
use crate::repl::{Backend, Output};
use crate::types::Type;

use inkwell::OptimizationLevel;
use inkwell::context::Context;
use inkwell::execution_engine::{ExecutionEngine, FunctionLookupError};
use inkwell::module::Module;
use inkwell::targets::{InitializationConfig, Target, TargetMachine};

type RealEntry = unsafe extern "C" fn() -> f64;
type IntEntry = unsafe extern "C" fn() -> i32;
type VoidEntry = unsafe extern "C" fn();

/// Runs units in-process. Every unit becomes its own LLVM module inside a
/// single MCJIT engine, so globals and functions of earlier units resolve
/// from later ones.
pub struct JitBackend<'ctx> {
    context: &'ctx Context,
    engine: ExecutionEngine<'ctx>,
    modules: Vec<Module<'ctx>>,
}

impl<'ctx> JitBackend<'ctx> {
    pub fn new(context: &'ctx Context) -> CodegenResult<Self> {
        ExecutionEngine::link_in_mc_jit();
        Target::initialize_native(&InitializationConfig::default())
            .map_err(|e| BackendError::new(format!("failed to initialize native target: {}", e)))?;

        let prelude = context.create_module("prelude");
        prelude.set_triple(&TargetMachine::get_default_triple());
        let engine = prelude
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| BackendError::new(format!("failed to create JIT: {}", e)))?;

        Ok(Self {
            context,
            engine,
            modules: vec![prelude],
        })
    }

    /// Number of LLVM modules handed to the engine, the prelude included.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

impl Backend for JitBackend<'_> {
    fn load(&mut self, unit: &Unit) -> Result<(), BackendError> {
        let mut codegen = LLVMCodegen::new(self.context, &unit.name);
        codegen.generate_unit(unit)?;

        let module = codegen.into_module();
        module.set_triple(&TargetMachine::get_default_triple());
        module.set_data_layout(&self.engine.get_target_data().get_data_layout());
        module
            .verify()
            .map_err(|e| BackendError::new(format!("invalid module {}: {}", unit.name, e)))?;

        self.engine
            .add_module(&module)
            .map_err(|_| BackendError::new(format!("module {} is already loaded", unit.name)))?;
        self.modules.push(module);
        Ok(())
    }

    fn invoke(&mut self, entry: &Entry) -> Result<Option<Output>, BackendError> {
        let lookup = |e: FunctionLookupError| {
            BackendError::new(format!("entry function {} not found: {:?}", entry.name, e))
        };

        // SAFETY: the entry was generated with exactly the signature each
        // branch asks for; Bool entries return their value widened to i32.
        unsafe {
            match &entry.returns {
                Some(Type::Real) => {
                    let f = self
                        .engine
                        .get_function::<RealEntry>(&entry.name)
                        .map_err(lookup)?;
                    Ok(Some(Output::Real(f.call())))
                }
                Some(Type::Int) => {
                    let f = self
                        .engine
                        .get_function::<IntEntry>(&entry.name)
                        .map_err(lookup)?;
                    Ok(Some(Output::Int(f.call())))
                }
                Some(Type::Bool) => {
                    let f = self
                        .engine
                        .get_function::<IntEntry>(&entry.name)
                        .map_err(lookup)?;
                    Ok(Some(Output::Bool(f.call() != 0)))
                }
                Some(Type::Array(_)) | None => {
                    let f = self
                        .engine
                        .get_function::<VoidEntry>(&entry.name)
                        .map_err(lookup)?;
                    f.call();
                    Ok(None)
                }
            }
        }
    }
}
