use crate::error::BackendError;
use crate::ir::{Constant, Declaration, IRType, Unit, Value};
use inkwell::AddressSpace;
use inkwell::builder::{Builder, BuilderError};
use inkwell::context::Context;
use inkwell::module::{Linkage, Module as LLVMModule};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::{BasicValueEnum, FunctionValue};
use std::collections::HashMap;

pub mod aot;
pub mod function;
pub mod instruction;
pub mod jit;


pub type CodegenResult<T> = Result<T, BackendError>;

pub(crate) fn builder_error(e: BuilderError) -> BackendError {
    BackendError::new(format!("LLVM builder error: {:?}", e))
}

/// Lowers one [`Unit`] into an LLVM module.
pub struct LLVMCodegen<'ctx> {
    context: &'ctx Context,
    module: LLVMModule<'ctx>,
    builder: Builder<'ctx>,
    function_value_map: HashMap<String, FunctionValue<'ctx>>,
    value_map: HashMap<String, BasicValueEnum<'ctx>>,
    current_function: Option<FunctionValue<'ctx>>,
}

impl<'ctx> LLVMCodegen<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        let module = context.create_module(module_name);
        let builder = context.create_builder();

        Self {
            context,
            module,
            builder,
            function_value_map: HashMap::new(),
            value_map: HashMap::new(),
            current_function: None,
        }
    }

    pub fn get_llvm_type(&self, ir_type: &IRType) -> CodegenResult<BasicTypeEnum<'ctx>> {
        Ok(match ir_type {
            IRType::I1 => self.context.bool_type().as_basic_type_enum(),
            IRType::I32 => self.context.i32_type().as_basic_type_enum(),
            IRType::F64 => self.context.f64_type().as_basic_type_enum(),
            IRType::Ptr => self
                .context
                .ptr_type(AddressSpace::default())
                .as_basic_type_enum(),
            IRType::Void => {
                return Err(BackendError::new("void is not a value type"));
            }
        })
    }

    fn fn_type(
        &self,
        return_type: &IRType,
        params: &[IRType],
        variadic: bool,
    ) -> CodegenResult<FunctionType<'ctx>> {
        let param_types = params
            .iter()
            .map(|ty| self.get_llvm_type(ty).map(BasicMetadataTypeEnum::from))
            .collect::<CodegenResult<Vec<_>>>()?;

        Ok(match return_type {
            IRType::Void => self.context.void_type().fn_type(&param_types, variadic),
            other => self.get_llvm_type(other)?.fn_type(&param_types, variadic),
        })
    }

    fn add_function(
        &mut self,
        name: &str,
        return_type: &IRType,
        params: &[IRType],
        variadic: bool,
    ) -> CodegenResult<FunctionValue<'ctx>> {
        if let Some(f) = self.module.get_function(name) {
            self.function_value_map.insert(name.to_string(), f);
            return Ok(f);
        }
        let fn_type = self.fn_type(return_type, params, variadic)?;
        let fn_val = self
            .module
            .add_function(name, fn_type, Some(Linkage::External));
        self.function_value_map.insert(name.to_string(), fn_val);
        Ok(fn_val)
    }

    pub fn declare_function(
        &mut self,
        function: &crate::ir::Function,
    ) -> CodegenResult<FunctionValue<'ctx>> {
        let params: Vec<IRType> = function.params.iter().map(|(_, ty)| ty.clone()).collect();
        self.add_function(&function.name, &function.return_type, &params, false)
    }

    pub fn declare(&mut self, declaration: &Declaration) -> CodegenResult<()> {
        match declaration {
            Declaration::Global { name, ty, init } => {
                let llvm_type = self.get_llvm_type(ty)?;
                let global = self.module.add_global(llvm_type, None, name);
                match init {
                    Some(init) => {
                        global.set_initializer(&self.codegen_constant(init));
                        global.set_linkage(Linkage::External);
                    }
                    None => global.set_linkage(Linkage::External),
                }
            }
            Declaration::Function {
                name,
                params,
                return_type,
                variadic,
            } => {
                self.add_function(name, return_type, params, *variadic)?;
            }
            Declaration::Text { name, text } => {
                let string_val = self.context.const_string(text.as_bytes(), true);
                let global = self.module.add_global(string_val.get_type(), None, name);
                global.set_initializer(&string_val);
                global.set_linkage(Linkage::Private);
                global.set_constant(true);
                global.set_unnamed_addr(true);
            }
        }
        Ok(())
    }

    fn store_value(&mut self, name: String, value: BasicValueEnum<'ctx>) {
        self.value_map.insert(name, value);
    }

    pub fn codegen_value(&self, val: &Value) -> CodegenResult<BasicValueEnum<'ctx>> {
        match val {
            Value::Constant(c) => Ok(self.codegen_constant(c)),
            Value::Register(name) | Value::Argument(name) => self
                .value_map
                .get(name)
                .copied()
                .ok_or_else(|| BackendError::new(format!("register %{} not found", name))),
            Value::Global(name) => {
                if let Some(global) = self.module.get_global(name) {
                    Ok(global.as_pointer_value().into())
                } else if let Some(func) = self.function_value_map.get(name) {
                    Ok(func.as_global_value().as_pointer_value().into())
                } else {
                    Err(BackendError::new(format!("global @{} not found", name)))
                }
            }
        }
    }

    fn codegen_constant(&self, constant: &Constant) -> BasicValueEnum<'ctx> {
        match constant {
            Constant::Int(i) => self.context.i32_type().const_int(*i as u64, true).into(),
            Constant::Bool(b) => self.context.bool_type().const_int(*b as u64, false).into(),
            Constant::Real(x) => self.context.f64_type().const_float(*x).into(),
            Constant::Null => self
                .context
                .ptr_type(AddressSpace::default())
                .const_null()
                .into(),
        }
    }

    pub fn generate_unit(&mut self, unit: &Unit) -> CodegenResult<()> {
        for declaration in &unit.declarations {
            self.declare(declaration)?;
        }

        // Declare all functions first
        for function in &unit.functions {
            self.declare_function(function)?;
        }

        for function in &unit.functions {
            self.codegen_function(function)?;
        }
        Ok(())
    }

    pub fn get_module(&self) -> &LLVMModule<'ctx> {
        &self.module
    }

    pub fn into_module(self) -> LLVMModule<'ctx> {
        self.module
    }
}
