use super::*;
use crate::ast::{Ast, NodeId, NodeKind};
use crate::builtins::{Lowering, MathFn};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{BinOp, Literal};
use crate::module::{AllocId, Module, VarRef};
use crate::types::{ConversionRule, Type};

pub const FMT_REAL: &str = "fmt_real";
pub const FMT_INT: &str = "fmt_int";

/// Result of emitting one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Emitted {
    pub value: Option<Value>,
    /// Set when the value is a heap array created by this node.
    pub alloc: Option<AllocId>,
}

impl Emitted {
    fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            alloc: None,
        }
    }

    fn register(name: String) -> Self {
        Self::value(Value::Register(name))
    }

    fn nothing() -> Self {
        Self::default()
    }
}

/// Lowers statement trees into the instruction stream of the function
/// currently being built.
pub struct IRBuilder<'a, 's> {
    module: &'a mut Module<'s>,
    out: &'a mut Stream,
}

impl<'a, 's> IRBuilder<'a, 's> {
    pub fn new(module: &'a mut Module<'s>, out: &'a mut Stream) -> Self {
        Self { module, out }
    }

    /// Emits every node of `ast` and returns what the root produced.
    pub fn emit(&mut self, ast: &Ast) -> CompileResult<Emitted> {
        let mut emitted: Vec<Emitted> = Vec::with_capacity(ast.len());
        for id in 0..ast.len() {
            let result = self
                .emit_node(ast, id, &emitted)
                .map_err(|e| e.with_span(ast.node(id).span.clone()))?;
            emitted.push(result);
        }
        Ok(emitted.get(ast.root()).cloned().unwrap_or_default())
    }

    fn new_register(&mut self) -> String {
        self.module.new_register()
    }

    fn add(&mut self, instruction: Instruction) {
        self.out.add_instruction(instruction);
    }

    fn operand(ast: &Ast, emitted: &[Emitted], child: NodeId) -> CompileResult<(Value, IRType)> {
        let node = ast.node(child);
        match (&emitted[child].value, &node.ty) {
            (Some(value), Some(ty)) => Ok((value.clone(), ty.ir_type())),
            _ => Err(CompileError::type_error("operand does not produce a value")
                .with_span(node.span.clone())),
        }
    }

    fn operands(
        ast: &Ast,
        emitted: &[Emitted],
        id: NodeId,
    ) -> CompileResult<Vec<(Value, IRType)>> {
        ast.node(id)
            .children
            .iter()
            .map(|child| Self::operand(ast, emitted, *child))
            .collect()
    }

    fn emit_node(&mut self, ast: &Ast, id: NodeId, emitted: &[Emitted]) -> CompileResult<Emitted> {
        let node = ast.node(id);
        match node.lowering {
            Lowering::Literal => match &node.kind {
                NodeKind::Literal(lit) => Ok(Emitted::value(Value::Constant(match lit {
                    Literal::Real(x) => Constant::Real(*x),
                    Literal::Int(i) => Constant::Int(*i),
                    Literal::Bool(b) => Constant::Bool(*b),
                }))),
                _ => Err(malformed(node.lowering)),
            },
            Lowering::Load => {
                let NodeKind::Load { name } = &node.kind else {
                    return Err(malformed(node.lowering));
                };
                let var = self.variable(name)?;
                let dest = self.new_register();
                self.add(Instruction::Load {
                    dest: dest.clone(),
                    ptr: var.ptr,
                    ty: var.ty.ir_type(),
                });
                Ok(Emitted::register(dest))
            }
            Lowering::Paren => {
                let inner = node.children.first().ok_or_else(|| malformed(node.lowering))?;
                Ok(emitted[*inner].clone())
            }
            Lowering::Identity => {
                let (value, _) = Self::operand(ast, emitted, node.children[0])?;
                Ok(Emitted::value(value))
            }
            Lowering::Print => {
                let (value, ty) = Self::operand(ast, emitted, node.children[0])?;
                self.print(value, ty);
                Ok(Emitted::nothing())
            }
            Lowering::Assign => self.assign(ast, id, emitted),
            Lowering::IndexAssign => {
                let args = Self::operands(ast, emitted, id)?;
                let [(array, _), (index, _), (value, ty)] = args.as_slice() else {
                    return Err(malformed(node.lowering));
                };
                let slot = self.new_register();
                self.add(Instruction::GetElementPtr {
                    dest: slot.clone(),
                    ty: ty.clone(),
                    ptr: array.clone(),
                    index: index.clone(),
                });
                self.add(Instruction::Store {
                    value: value.clone(),
                    ptr: Value::Register(slot),
                    ty: ty.clone(),
                });
                Ok(Emitted::nothing())
            }
            Lowering::IndexLoad => {
                let args = Self::operands(ast, emitted, id)?;
                let [(array, _), (index, _)] = args.as_slice() else {
                    return Err(malformed(node.lowering));
                };
                let ty = result_type(node)?;
                let slot = self.new_register();
                self.add(Instruction::GetElementPtr {
                    dest: slot.clone(),
                    ty: ty.clone(),
                    ptr: array.clone(),
                    index: index.clone(),
                });
                let dest = self.new_register();
                self.add(Instruction::Load {
                    dest: dest.clone(),
                    ptr: Value::Register(slot),
                    ty,
                });
                Ok(Emitted::register(dest))
            }
            Lowering::CreateArray => {
                let (count, _) = Self::operand(ast, emitted, node.children[0])?;
                let element = node
                    .ty
                    .as_ref()
                    .and_then(Type::element)
                    .ok_or_else(|| malformed(node.lowering))?
                    .clone();
                let (ptr, alloc) = self.module.allocate(self.out, &element, count);
                Ok(Emitted {
                    value: Some(ptr),
                    alloc: Some(alloc),
                })
            }
            Lowering::LiteralArray => {
                let args = Self::operands(ast, emitted, id)?;
                let element = node
                    .ty
                    .as_ref()
                    .and_then(Type::element)
                    .ok_or_else(|| malformed(node.lowering))?
                    .clone();
                let count = Value::Constant(Constant::Int(args.len() as i32));
                let (ptr, alloc) = self.module.allocate(self.out, &element, count);
                for (i, (value, ty)) in args.into_iter().enumerate() {
                    let slot = self.new_register();
                    self.add(Instruction::GetElementPtr {
                        dest: slot.clone(),
                        ty: ty.clone(),
                        ptr: ptr.clone(),
                        index: Value::Constant(Constant::Int(i as i32)),
                    });
                    self.add(Instruction::Store {
                        value,
                        ptr: Value::Register(slot),
                        ty,
                    });
                }
                Ok(Emitted {
                    value: Some(ptr),
                    alloc: Some(alloc),
                })
            }
            Lowering::Free => {
                let NodeKind::Free { name } = &node.kind else {
                    return Err(malformed(node.lowering));
                };
                self.free(name)?;
                Ok(Emitted::nothing())
            }
            Lowering::CallUser => {
                let NodeKind::Call { symbol, .. } = &node.kind else {
                    return Err(malformed(node.lowering));
                };
                let args = Self::operands(ast, emitted, id)?;
                let ty = result_type(node)?;
                self.module.ensure_declared(Declaration::Function {
                    name: symbol.clone(),
                    params: args.iter().map(|(_, ty)| ty.clone()).collect(),
                    return_type: ty.clone(),
                    variadic: false,
                });
                let dest = self.new_register();
                self.add(Instruction::Call {
                    dest: Some(dest.clone()),
                    func: symbol.clone(),
                    args: args.into_iter().map(|(v, t)| (t, v)).collect(),
                    ty,
                });
                Ok(Emitted::register(dest))
            }
            Lowering::Convert => {
                let NodeKind::Convert(rule) = &node.kind else {
                    return Err(malformed(node.lowering));
                };
                let (value, _) = Self::operand(ast, emitted, node.children[0])?;
                Ok(Emitted::register(self.convert(*rule, value)))
            }
            Lowering::Arithmetic(op) => {
                let (lhs, rhs, ty) = Self::binary_operands(ast, emitted, id)?;
                let op = match (op, &ty) {
                    (BinOp::Add, IRType::F64) => BinaryOp::FAdd,
                    (BinOp::Sub, IRType::F64) => BinaryOp::FSub,
                    (BinOp::Mul, IRType::F64) => BinaryOp::FMul,
                    (BinOp::Div, _) => BinaryOp::FDiv,
                    (BinOp::Add, _) => BinaryOp::Add,
                    (BinOp::Sub, _) => BinaryOp::Sub,
                    (BinOp::Mul, _) => BinaryOp::Mul,
                    _ => return Err(malformed(node.lowering)),
                };
                Ok(Emitted::register(self.binary(op, lhs, rhs, ty)))
            }
            Lowering::FloorDiv => {
                let (lhs, rhs, ty) = Self::binary_operands(ast, emitted, id)?;
                let dest = match ty {
                    IRType::F64 => {
                        let quotient = self.binary(BinaryOp::FDiv, lhs, rhs, IRType::F64);
                        self.intrinsic("llvm.floor.f64", vec![Value::Register(quotient)])
                    }
                    _ => self.floored_int(lhs, rhs, true),
                };
                Ok(Emitted::register(dest))
            }
            Lowering::Modulo => {
                let (lhs, rhs, ty) = Self::binary_operands(ast, emitted, id)?;
                let dest = match ty {
                    IRType::F64 => self.floored_real_rem(lhs, rhs),
                    _ => self.floored_int(lhs, rhs, false),
                };
                Ok(Emitted::register(dest))
            }
            Lowering::Power => {
                let (lhs, rhs, _) = Self::binary_operands(ast, emitted, id)?;
                Ok(Emitted::register(self.intrinsic("llvm.pow.f64", vec![lhs, rhs])))
            }
            Lowering::Compare(op) => {
                let (lhs, rhs, ty) = Self::binary_operands(ast, emitted, id)?;
                let dest = self.new_register();
                let instruction = match ty {
                    IRType::F64 => Instruction::FCmp {
                        dest: dest.clone(),
                        cond: fcmp_cond(op),
                        lhs,
                        rhs,
                    },
                    IRType::I1 => Instruction::ICmp {
                        dest: dest.clone(),
                        cond: icmp_cond(op, false),
                        lhs,
                        rhs,
                        ty,
                    },
                    _ => Instruction::ICmp {
                        dest: dest.clone(),
                        cond: icmp_cond(op, true),
                        lhs,
                        rhs,
                        ty,
                    },
                };
                self.add(instruction);
                Ok(Emitted::register(dest))
            }
            Lowering::Logic(op) => {
                let (lhs, rhs, _) = Self::binary_operands(ast, emitted, id)?;
                let op = match op {
                    BinOp::And => BinaryOp::And,
                    BinOp::Or => BinaryOp::Or,
                    BinOp::Xor => BinaryOp::Xor,
                    _ => return Err(malformed(node.lowering)),
                };
                Ok(Emitted::register(self.binary(op, lhs, rhs, IRType::I1)))
            }
            Lowering::Negate => {
                let (value, ty) = Self::operand(ast, emitted, node.children[0])?;
                let (op, minus_one) = match ty {
                    IRType::F64 => (BinaryOp::FMul, Constant::Real(-1.0)),
                    _ => (BinaryOp::Mul, Constant::Int(-1)),
                };
                Ok(Emitted::register(self.binary(
                    op,
                    value,
                    Value::Constant(minus_one),
                    ty,
                )))
            }
            Lowering::Math(func) => {
                let args = Self::operands(ast, emitted, id)?;
                Ok(Emitted::register(self.math(func, args)))
            }
        }
    }

    fn binary_operands(
        ast: &Ast,
        emitted: &[Emitted],
        id: NodeId,
    ) -> CompileResult<(Value, Value, IRType)> {
        let mut args = Self::operands(ast, emitted, id)?;
        match (args.pop(), args.pop()) {
            (Some((rhs, _)), Some((lhs, ty))) if args.is_empty() => Ok((lhs, rhs, ty)),
            _ => Err(malformed(ast.node(id).lowering)),
        }
    }

    fn variable(&mut self, name: &str) -> CompileResult<VarRef> {
        self.module
            .get_variable(name)
            .ok_or_else(|| CompileError::semantic(format!("variable '{}' is not declared", name)))
    }

    fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value, ty: IRType) -> String {
        let dest = self.new_register();
        self.add(Instruction::Binary {
            op,
            dest: dest.clone(),
            lhs,
            rhs,
            ty,
        });
        dest
    }

    fn cast(&mut self, op: CastOp, value: Value, from: IRType, to: IRType) -> String {
        let dest = self.new_register();
        self.add(Instruction::Cast {
            op,
            dest: dest.clone(),
            value,
            from,
            to,
        });
        dest
    }

    fn icmp(&mut self, cond: ICmpCond, lhs: Value, rhs: Value, ty: IRType) -> String {
        let dest = self.new_register();
        self.add(Instruction::ICmp {
            dest: dest.clone(),
            cond,
            lhs,
            rhs,
            ty,
        });
        dest
    }

    fn fcmp(&mut self, cond: FCmpCond, lhs: Value, rhs: Value) -> String {
        let dest = self.new_register();
        self.add(Instruction::FCmp {
            dest: dest.clone(),
            cond,
            lhs,
            rhs,
        });
        dest
    }

    fn convert(&mut self, rule: ConversionRule, value: Value) -> String {
        match rule {
            ConversionRule::RealToInt => self.cast(CastOp::FpToSi, value, IRType::F64, IRType::I32),
            ConversionRule::RealToBool => {
                self.fcmp(FCmpCond::One, value, Value::Constant(Constant::Real(0.0)))
            }
            ConversionRule::IntToReal => self.cast(CastOp::SiToFp, value, IRType::I32, IRType::F64),
            ConversionRule::IntToBool => self.icmp(
                ICmpCond::Ne,
                value,
                Value::Constant(Constant::Int(0)),
                IRType::I32,
            ),
            ConversionRule::BoolToReal => self.cast(CastOp::UiToFp, value, IRType::I1, IRType::F64),
            ConversionRule::BoolToInt => self.cast(CastOp::ZExt, value, IRType::I1, IRType::I32),
        }
    }

    /// Integer `//` and `%` rounding towards negative infinity: the
    /// truncated result is adjusted when the remainder is non-zero and its
    /// sign differs from the divisor's.
    fn floored_int(&mut self, lhs: Value, rhs: Value, quotient: bool) -> String {
        let ty = IRType::I32;
        let zero = Value::Constant(Constant::Int(0));
        let rem = self.binary(BinaryOp::SRem, lhs.clone(), rhs.clone(), ty.clone());
        let nonzero = self.icmp(ICmpCond::Ne, Value::Register(rem.clone()), zero.clone(), ty.clone());
        let rem_negative = self.icmp(ICmpCond::Slt, Value::Register(rem.clone()), zero.clone(), ty.clone());
        let rhs_negative = self.icmp(ICmpCond::Slt, rhs.clone(), zero, ty.clone());
        let signs_differ = self.binary(
            BinaryOp::Xor,
            Value::Register(rem_negative),
            Value::Register(rhs_negative),
            IRType::I1,
        );
        let adjust = self.binary(
            BinaryOp::And,
            Value::Register(nonzero),
            Value::Register(signs_differ),
            IRType::I1,
        );
        let adjust = self.cast(CastOp::ZExt, Value::Register(adjust), IRType::I1, ty.clone());

        if quotient {
            let div = self.binary(BinaryOp::SDiv, lhs, rhs, ty.clone());
            self.binary(BinaryOp::Sub, Value::Register(div), Value::Register(adjust), ty)
        } else {
            let shift = self.binary(BinaryOp::Mul, rhs, Value::Register(adjust), ty.clone());
            self.binary(BinaryOp::Add, Value::Register(rem), Value::Register(shift), ty)
        }
    }

    fn floored_real_rem(&mut self, lhs: Value, rhs: Value) -> String {
        let zero = Value::Constant(Constant::Real(0.0));
        let rem = self.binary(BinaryOp::FRem, lhs, rhs.clone(), IRType::F64);
        let nonzero = self.fcmp(FCmpCond::One, Value::Register(rem.clone()), zero.clone());
        let rem_negative = self.fcmp(FCmpCond::Olt, Value::Register(rem.clone()), zero.clone());
        let rhs_negative = self.fcmp(FCmpCond::Olt, rhs.clone(), zero);
        let signs_differ = self.binary(
            BinaryOp::Xor,
            Value::Register(rem_negative),
            Value::Register(rhs_negative),
            IRType::I1,
        );
        let adjust = self.binary(
            BinaryOp::And,
            Value::Register(nonzero),
            Value::Register(signs_differ),
            IRType::I1,
        );
        let adjust = self.cast(CastOp::UiToFp, Value::Register(adjust), IRType::I1, IRType::F64);
        let shift = self.binary(BinaryOp::FMul, rhs, Value::Register(adjust), IRType::F64);
        self.binary(BinaryOp::FAdd, Value::Register(rem), Value::Register(shift), IRType::F64)
    }

    fn call_real(&mut self, func: &str, args: Vec<Value>) -> String {
        self.module.ensure_declared(Declaration::Function {
            name: func.to_string(),
            params: vec![IRType::F64; args.len()],
            return_type: IRType::F64,
            variadic: false,
        });
        let dest = self.new_register();
        self.add(Instruction::Call {
            dest: Some(dest.clone()),
            func: func.to_string(),
            args: args.into_iter().map(|v| (IRType::F64, v)).collect(),
            ty: IRType::F64,
        });
        dest
    }

    fn intrinsic(&mut self, name: &str, args: Vec<Value>) -> String {
        self.call_real(name, args)
    }

    fn math(&mut self, func: MathFn, args: Vec<(Value, IRType)>) -> String {
        self.call_real(func.symbol(), args.into_iter().map(|(v, _)| v).collect())
    }

    fn print(&mut self, value: Value, ty: IRType) {
        self.module.ensure_declared(Declaration::Function {
            name: "printf".to_string(),
            params: vec![IRType::Ptr],
            return_type: IRType::I32,
            variadic: true,
        });
        self.module.ensure_declared(Declaration::Function {
            name: "fflush".to_string(),
            params: vec![IRType::Ptr],
            return_type: IRType::I32,
            variadic: false,
        });

        let (format, text, arg) = match ty {
            IRType::F64 => (FMT_REAL, "%f\n", (IRType::F64, value)),
            IRType::I1 => {
                let widened = self.cast(CastOp::ZExt, value, IRType::I1, IRType::I32);
                (FMT_INT, "%i\n", (IRType::I32, Value::Register(widened)))
            }
            _ => (FMT_INT, "%i\n", (IRType::I32, value)),
        };
        self.module.ensure_declared(Declaration::Text {
            name: format.to_string(),
            text: text.to_string(),
        });

        self.add(Instruction::Call {
            dest: None,
            func: "printf".to_string(),
            args: vec![(IRType::Ptr, Value::Global(format.to_string())), arg],
            ty: IRType::I32,
        });
        self.add(Instruction::Call {
            dest: None,
            func: "fflush".to_string(),
            args: vec![(IRType::Ptr, Value::Constant(Constant::Null))],
            ty: IRType::I32,
        });
    }

    fn assign(&mut self, ast: &Ast, id: NodeId, emitted: &[Emitted]) -> CompileResult<Emitted> {
        let node = ast.node(id);
        let NodeKind::Assign { name, declare } = &node.kind else {
            return Err(malformed(node.lowering));
        };
        let child = node.children[0];
        let (value, _) = Self::operand(ast, emitted, child)?;
        let fresh = emitted[child]
            .alloc
            .filter(|alloc| self.module.is_fresh(*alloc));

        let var = if *declare {
            let ty = ast
                .node(child)
                .ty
                .clone()
                .ok_or_else(|| malformed(node.lowering))?;
            let var = self.module.new_variable(self.out, name, &ty)?;
            if fresh.is_some() {
                // inside a loop the variable still holds the previous
                // iteration's array
                self.release(&var);
            }
            var
        } else {
            let var = self.variable(name)?;
            if let Some(old) = var.alloc {
                // the old array is freed on every run of this store, so only
                // an array made here may replace it
                if fresh.is_none() {
                    return Err(CompileError::resource(format!(
                        "'{}' owns an array; free it before assigning an existing array to it",
                        name
                    ))
                    .with_span(node.span.clone()));
                }
                let previous = self.new_register();
                self.add(Instruction::Load {
                    dest: previous.clone(),
                    ptr: var.ptr.clone(),
                    ty: IRType::Ptr,
                });
                self.module
                    .free_allocation(self.out, old, Value::Register(previous))?;
                self.module.clear_owner(&var);
            }
            var
        };

        self.add(Instruction::Store {
            value,
            ptr: var.ptr.clone(),
            ty: var.ty.ir_type(),
        });
        if let Some(alloc) = fresh {
            self.module.mark_ownership_transferred(self.out, alloc, &var)?;
        }
        Ok(Emitted::nothing())
    }

    fn release(&mut self, var: &VarRef) {
        let previous = self.new_register();
        self.add(Instruction::Load {
            dest: previous.clone(),
            ptr: var.ptr.clone(),
            ty: IRType::Ptr,
        });
        self.add(Instruction::Free {
            ptr: Value::Register(previous),
        });
    }

    fn free(&mut self, name: &str) -> CompileResult<()> {
        let var = self.variable(name)?;
        let Some(alloc) = var.alloc else {
            return Err(CompileError::resource(format!(
                "'{}' does not own an allocation",
                name
            )));
        };
        let ptr = self.new_register();
        self.add(Instruction::Load {
            dest: ptr.clone(),
            ptr: var.ptr.clone(),
            ty: IRType::Ptr,
        });
        self.module
            .free_allocation(self.out, alloc, Value::Register(ptr))?;
        self.add(Instruction::Store {
            value: Value::Constant(Constant::Null),
            ptr: var.ptr.clone(),
            ty: IRType::Ptr,
        });
        self.module.clear_owner(&var);
        Ok(())
    }
}

fn malformed(lowering: Lowering) -> CompileError {
    CompileError::type_error(format!("malformed {:?} node", lowering))
}

fn result_type(node: &crate::ast::Node) -> CompileResult<IRType> {
    node.ty
        .as_ref()
        .map(Type::ir_type)
        .ok_or_else(|| malformed(node.lowering))
}

fn icmp_cond(op: BinOp, signed: bool) -> ICmpCond {
    match (op, signed) {
        (BinOp::Less, true) => ICmpCond::Slt,
        (BinOp::LessEq, true) => ICmpCond::Sle,
        (BinOp::Greater, true) => ICmpCond::Sgt,
        (BinOp::GreaterEq, true) => ICmpCond::Sge,
        (BinOp::Less, false) => ICmpCond::Ult,
        (BinOp::LessEq, false) => ICmpCond::Ule,
        (BinOp::Greater, false) => ICmpCond::Ugt,
        (BinOp::GreaterEq, false) => ICmpCond::Uge,
        (BinOp::NotEq, _) => ICmpCond::Ne,
        _ => ICmpCond::Eq,
    }
}

fn fcmp_cond(op: BinOp) -> FCmpCond {
    match op {
        BinOp::Less => FCmpCond::Olt,
        BinOp::LessEq => FCmpCond::Ole,
        BinOp::Greater => FCmpCond::Ogt,
        BinOp::GreaterEq => FCmpCond::Oge,
        BinOp::NotEq => FCmpCond::One,
        _ => FCmpCond::Oeq,
    }
}
