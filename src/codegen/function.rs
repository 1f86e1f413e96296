use crate::codegen::{CodegenResult, LLVMCodegen, builder_error};
use crate::error::BackendError;
use crate::ir::{Instruction, Terminator};

use inkwell::basic_block::BasicBlock;
use inkwell::values::FunctionValue;

use std::collections::HashMap;

impl<'ctx> LLVMCodegen<'ctx> {
    pub fn codegen_function(
        &mut self,
        function: &crate::ir::Function,
    ) -> CodegenResult<FunctionValue<'ctx>> {
        let llvm_function = self.declare_function(function)?;
        self.current_function = Some(llvm_function);

        // Clear value map for this function
        self.value_map.clear();

        for (i, (param_name, _param_type)) in function.params.iter().enumerate() {
            if let Some(param_value) = llvm_function.get_nth_param(i as u32) {
                param_value.set_name(param_name);
                self.store_value(param_name.clone(), param_value);
            }
        }

        // Create basic blocks first
        let mut block_map = HashMap::new();
        for ir_block in &function.blocks {
            let bb = self
                .context
                .append_basic_block(llvm_function, &ir_block.label);
            block_map.insert(ir_block.label.clone(), bb);
        }

        let Some(entry) = function.blocks.first() else {
            return Err(BackendError::new(format!(
                "function '{}' has no blocks",
                function.name
            )));
        };
        self.hoist_allocas(function, block_map[&entry.label])?;

        for ir_block in &function.blocks {
            let bb = block_map[&ir_block.label];
            self.builder.position_at_end(bb);

            for instr in &ir_block.instructions {
                self.codegen_instruction(instr)?;
            }

            match &ir_block.terminator {
                Some(term) => self.codegen_terminator_with_blocks(term, &block_map)?,
                None => {
                    return Err(BackendError::new(format!(
                        "block '{}' in '{}' is not terminated",
                        ir_block.label, function.name
                    )));
                }
            }
        }

        self.current_function = None;

        if !llvm_function.verify(true) {
            return Err(BackendError::new(format!(
                "function '{}' failed verification",
                function.name
            )));
        }
        Ok(llvm_function)
    }

    /// Every stack slot lives at the top of the entry block and starts out
    /// zeroed, so loops never grow the stack and a slot read before its
    /// first store holds null.
    fn hoist_allocas(
        &mut self,
        function: &crate::ir::Function,
        entry: BasicBlock<'ctx>,
    ) -> CodegenResult<()> {
        self.builder.position_at_end(entry);
        for instr in function.blocks.iter().flat_map(|b| b.instructions.iter()) {
            if let Instruction::Alloca { dest, ty } = instr {
                let llvm_type = self.get_llvm_type(ty)?;
                let slot = self
                    .builder
                    .build_alloca(llvm_type, dest)
                    .map_err(builder_error)?;
                self.builder
                    .build_store(slot, llvm_type.const_zero())
                    .map_err(builder_error)?;
                self.store_value(dest.clone(), slot.into());
            }
        }
        Ok(())
    }

    pub fn codegen_terminator_with_blocks(
        &mut self,
        term: &Terminator,
        block_map: &HashMap<String, BasicBlock<'ctx>>,
    ) -> CodegenResult<()> {
        let block = |label: &String| {
            block_map
                .get(label)
                .copied()
                .ok_or_else(|| BackendError::new(format!("label block {} not found", label)))
        };

        match term {
            Terminator::Ret {
                value: Some((_, val)),
            } => {
                let ret_val = self.codegen_value(val)?;
                self.builder
                    .build_return(Some(&ret_val))
                    .map_err(builder_error)?;
            }
            Terminator::Ret { value: None } => {
                self.builder.build_return(None).map_err(builder_error)?;
            }
            Terminator::Br { label } => {
                self.builder
                    .build_unconditional_branch(block(label)?)
                    .map_err(builder_error)?;
            }
            Terminator::CondBr {
                cond,
                then_label,
                else_label,
            } => {
                let cond_val = self.codegen_value(cond)?;
                self.builder
                    .build_conditional_branch(
                        cond_val.into_int_value(),
                        block(then_label)?,
                        block(else_label)?,
                    )
                    .map_err(builder_error)?;
            }
        }
        Ok(())
    }
}
