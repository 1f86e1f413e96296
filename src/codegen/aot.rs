use crate::codegen::{CodegenResult, LLVMCodegen};
use crate::error::BackendError;
use crate::ir::Unit;

use inkwell::OptimizationLevel;
use inkwell::context::Context;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
};

use std::path::Path;
use std::process::Command;

fn native_machine() -> CodegenResult<TargetMachine> {
    Target::initialize_native(&InitializationConfig::default())
        .map_err(|e| BackendError::new(format!("failed to initialize native target: {}", e)))?;

    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple)
        .map_err(|e| BackendError::new(format!("unknown target {}: {}", triple, e)))?;
    target
        .create_target_machine(
            &triple,
            "generic",
            "",
            OptimizationLevel::Default,
            RelocMode::PIC,
            CodeModel::Default,
        )
        .ok_or_else(|| BackendError::new(format!("no target machine for {}", triple)))
}

/// Writes `unit` as a native object file.
pub fn write_object(unit: &Unit, path: &Path) -> CodegenResult<()> {
    let context = Context::create();
    let mut codegen = LLVMCodegen::new(&context, &unit.name);
    codegen.generate_unit(unit)?;

    let machine = native_machine()?;
    let module = codegen.get_module();
    module.set_triple(&machine.get_triple());
    module.set_data_layout(&machine.get_target_data().get_data_layout());
    module
        .verify()
        .map_err(|e| BackendError::new(format!("invalid module {}: {}", unit.name, e)))?;

    machine
        .write_to_file(module, FileType::Object, path)
        .map_err(|e| BackendError::new(format!("failed to write {}: {}", path.display(), e)))
}

/// Compiles a whole-program unit to an executable at `output`, linking
/// against the C library and libm with the system `cc`.
pub fn build_executable(unit: &Unit, output: &Path) -> CodegenResult<()> {
    let object = output.with_extension("o");
    write_object(unit, &object)?;

    let status = Command::new("cc")
        .arg(&object)
        .arg("-lm")
        .arg("-o")
        .arg(output)
        .status()
        .map_err(|e| BackendError::new(format!("failed to run linker: {}", e)));
    // the object is an intermediate either way
    let _ = std::fs::remove_file(&object);

    match status? {
        s if s.success() => Ok(()),
        s => Err(BackendError::new(format!("linker exited with {}", s))),
    }
}
