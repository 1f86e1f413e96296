use crate::codegen::{CodegenResult, LLVMCodegen, builder_error};
use crate::error::BackendError;
use crate::ir::{BinaryOp, CastOp, FCmpCond, ICmpCond, Instruction};

use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum};
use inkwell::{FloatPredicate, IntPredicate};

impl<'ctx> LLVMCodegen<'ctx> {
    pub fn codegen_instruction(&mut self, instr: &Instruction) -> CodegenResult<()> {
        match instr {
            // Memory operations

            // hoisted into the entry block by codegen_function
            Instruction::Alloca { .. } => {}

            Instruction::Load { dest, ptr, ty } => {
                let ptr_val = self.codegen_value(ptr)?;
                let load_type = self.get_llvm_type(ty)?;
                let loaded = self
                    .builder
                    .build_load(load_type, ptr_val.into_pointer_value(), dest)
                    .map_err(builder_error)?;
                self.store_value(dest.clone(), loaded);
            }

            Instruction::Store { value, ptr, .. } => {
                let val = self.codegen_value(value)?;
                let ptr_val = self.codegen_value(ptr)?;
                self.builder
                    .build_store(ptr_val.into_pointer_value(), val)
                    .map_err(builder_error)?;
            }

            Instruction::GetElementPtr {
                dest,
                ty,
                ptr,
                index,
            } => {
                let element_type = self.get_llvm_type(ty)?;
                let ptr_val = self.codegen_value(ptr)?.into_pointer_value();
                let index_val = self.codegen_value(index)?.into_int_value();
                let element = unsafe {
                    self.builder
                        .build_gep(element_type, ptr_val, &[index_val], dest)
                        .map_err(builder_error)?
                };
                self.store_value(dest.clone(), element.into());
            }

            Instruction::Malloc { dest, ty, count } => {
                let element_type = self.get_llvm_type(ty)?;
                let count_val = self.codegen_value(count)?.into_int_value();
                let allocated = self
                    .builder
                    .build_array_malloc(element_type, count_val, dest)
                    .map_err(builder_error)?;
                self.store_value(dest.clone(), allocated.into());
            }

            Instruction::Free { ptr } => {
                let ptr_val = self.codegen_value(ptr)?.into_pointer_value();
                self.builder.build_free(ptr_val).map_err(builder_error)?;
            }

            Instruction::Binary {
                op,
                dest,
                lhs,
                rhs,
                ..
            } => {
                let lhs_val = self.codegen_value(lhs)?;
                let rhs_val = self.codegen_value(rhs)?;
                let res = self.codegen_binary(*op, lhs_val, rhs_val, dest)?;
                self.store_value(dest.clone(), res);
            }

            Instruction::ICmp {
                dest,
                cond,
                lhs,
                rhs,
                ..
            } => {
                let lhs_val = self.codegen_value(lhs)?.into_int_value();
                let rhs_val = self.codegen_value(rhs)?.into_int_value();
                let cmp = self
                    .builder
                    .build_int_compare(int_predicate(*cond), lhs_val, rhs_val, dest)
                    .map_err(builder_error)?;
                self.store_value(dest.clone(), cmp.into());
            }

            Instruction::FCmp {
                dest,
                cond,
                lhs,
                rhs,
            } => {
                let lhs_val = self.codegen_value(lhs)?.into_float_value();
                let rhs_val = self.codegen_value(rhs)?.into_float_value();
                let cmp = self
                    .builder
                    .build_float_compare(float_predicate(*cond), lhs_val, rhs_val, dest)
                    .map_err(builder_error)?;
                self.store_value(dest.clone(), cmp.into());
            }

            Instruction::Cast {
                op,
                dest,
                value,
                to,
                ..
            } => {
                let val = self.codegen_value(value)?;
                let target = self.get_llvm_type(to)?;
                let res: BasicValueEnum = match op {
                    CastOp::FpToSi => self
                        .builder
                        .build_float_to_signed_int(
                            val.into_float_value(),
                            target.into_int_type(),
                            dest,
                        )
                        .map_err(builder_error)?
                        .into(),
                    CastOp::SiToFp => self
                        .builder
                        .build_signed_int_to_float(
                            val.into_int_value(),
                            target.into_float_type(),
                            dest,
                        )
                        .map_err(builder_error)?
                        .into(),
                    CastOp::UiToFp => self
                        .builder
                        .build_unsigned_int_to_float(
                            val.into_int_value(),
                            target.into_float_type(),
                            dest,
                        )
                        .map_err(builder_error)?
                        .into(),
                    CastOp::ZExt => self
                        .builder
                        .build_int_z_extend(val.into_int_value(), target.into_int_type(), dest)
                        .map_err(builder_error)?
                        .into(),
                };
                self.store_value(dest.clone(), res);
            }

            Instruction::Call {
                dest, func, args, ..
            } => {
                let func_val = match self.function_value_map.get(func) {
                    Some(f) => *f,
                    None => self.module.get_function(func).ok_or_else(|| {
                        BackendError::new(format!("function @{} not declared", func))
                    })?,
                };

                let llvm_args = args
                    .iter()
                    .map(|(_, arg)| self.codegen_value(arg).map(BasicMetadataValueEnum::from))
                    .collect::<CodegenResult<Vec<_>>>()?;

                let call_site = self
                    .builder
                    .build_call(func_val, &llvm_args, dest.as_deref().unwrap_or(""))
                    .map_err(builder_error)?;

                if let Some(dest_name) = dest {
                    match call_site.try_as_basic_value().left() {
                        Some(return_value) => self.store_value(dest_name.clone(), return_value),
                        None => {
                            return Err(BackendError::new(format!(
                                "call to @{} produces no value for %{}",
                                func, dest_name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn codegen_binary(
        &self,
        op: BinaryOp,
        lhs: BasicValueEnum<'ctx>,
        rhs: BasicValueEnum<'ctx>,
        dest: &str,
    ) -> CodegenResult<BasicValueEnum<'ctx>> {
        let b = &self.builder;
        let res: BasicValueEnum = match op {
            BinaryOp::Add => b
                .build_int_add(lhs.into_int_value(), rhs.into_int_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::Sub => b
                .build_int_sub(lhs.into_int_value(), rhs.into_int_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::Mul => b
                .build_int_mul(lhs.into_int_value(), rhs.into_int_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::SDiv => b
                .build_int_signed_div(lhs.into_int_value(), rhs.into_int_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::SRem => b
                .build_int_signed_rem(lhs.into_int_value(), rhs.into_int_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::FAdd => b
                .build_float_add(lhs.into_float_value(), rhs.into_float_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::FSub => b
                .build_float_sub(lhs.into_float_value(), rhs.into_float_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::FMul => b
                .build_float_mul(lhs.into_float_value(), rhs.into_float_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::FDiv => b
                .build_float_div(lhs.into_float_value(), rhs.into_float_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::FRem => b
                .build_float_rem(lhs.into_float_value(), rhs.into_float_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::And => b
                .build_and(lhs.into_int_value(), rhs.into_int_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::Or => b
                .build_or(lhs.into_int_value(), rhs.into_int_value(), dest)
                .map_err(builder_error)?
                .into(),
            BinaryOp::Xor => b
                .build_xor(lhs.into_int_value(), rhs.into_int_value(), dest)
                .map_err(builder_error)?
                .into(),
        };
        Ok(res)
    }
}

fn int_predicate(cond: ICmpCond) -> IntPredicate {
    match cond {
        ICmpCond::Eq => IntPredicate::EQ,
        ICmpCond::Ne => IntPredicate::NE,
        ICmpCond::Slt => IntPredicate::SLT,
        ICmpCond::Sle => IntPredicate::SLE,
        ICmpCond::Sgt => IntPredicate::SGT,
        ICmpCond::Sge => IntPredicate::SGE,
        ICmpCond::Ult => IntPredicate::ULT,
        ICmpCond::Ule => IntPredicate::ULE,
        ICmpCond::Ugt => IntPredicate::UGT,
        ICmpCond::Uge => IntPredicate::UGE,
    }
}

fn float_predicate(cond: FCmpCond) -> FloatPredicate {
    match cond {
        FCmpCond::Oeq => FloatPredicate::OEQ,
        FCmpCond::One => FloatPredicate::ONE,
        FCmpCond::Olt => FloatPredicate::OLT,
        FCmpCond::Ole => FloatPredicate::OLE,
        FCmpCond::Ogt => FloatPredicate::OGT,
        FCmpCond::Oge => FloatPredicate::OGE,
    }
}
