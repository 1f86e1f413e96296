use crate::types::Type;
use std::fmt::{self, Display, Formatter};

pub mod builder;

#[cfg(test)]
pub mod test;

#[derive(Debug, Clone, PartialEq)]
pub enum IRType {
    Void,
    I1,  // Bool
    I32, // Int
    F64, // Real
    Ptr, // heap array
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Constant(Constant),
    Register(String),
    Global(String),
    Argument(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Bool(bool),
    Int(i32),
    Real(f64),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ICmpCond {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FCmpCond {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    FpToSi,
    SiToFp,
    UiToFp,
    ZExt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Memory operations
    Alloca {
        dest: String,
        ty: IRType,
    },
    Load {
        dest: String,
        ptr: Value,
        ty: IRType,
    },
    Store {
        value: Value,
        ptr: Value,
        ty: IRType,
    },
    GetElementPtr {
        dest: String,
        ty: IRType,
        ptr: Value,
        index: Value,
    },
    Malloc {
        dest: String,
        ty: IRType,
        count: Value,
    },
    Free {
        ptr: Value,
    },

    // Arithmetic, logic and comparisons
    Binary {
        op: BinaryOp,
        dest: String,
        lhs: Value,
        rhs: Value,
        ty: IRType,
    },
    ICmp {
        dest: String,
        cond: ICmpCond,
        lhs: Value,
        rhs: Value,
        ty: IRType,
    },
    FCmp {
        dest: String,
        cond: FCmpCond,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        op: CastOp,
        dest: String,
        value: Value,
        from: IRType,
        to: IRType,
    },

    Call {
        dest: Option<String>,
        func: String,
        args: Vec<(IRType, Value)>,
        ty: IRType,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Ret { value: Option<(IRType, Value)> },
    Br { label: String },
    CondBr {
        cond: Value,
        then_label: String,
        else_label: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, IRType)>,
    pub return_type: IRType,
    pub blocks: Vec<BasicBlock>,
}

/// Something a unit references or defines outside of function bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Global {
        name: String,
        ty: IRType,
        /// `None` declares a global defined by an earlier unit.
        init: Option<Constant>,
    },
    Function {
        name: String,
        params: Vec<IRType>,
        return_type: IRType,
        variadic: bool,
    },
    /// A NUL-terminated byte string such as a printf format, private to
    /// the unit that declares it.
    Text { name: String, text: String },
}

impl Declaration {
    pub fn name(&self) -> &str {
        match self {
            Declaration::Global { name, .. }
            | Declaration::Function { name, .. }
            | Declaration::Text { name, .. } => name,
        }
    }
}

/// The callable wrapping the top-level statements of an interactive unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    /// Type of the last statement's value, when the unit returns one.
    pub returns: Option<Type>,
}

/// Everything one compilation unit hands to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub name: String,
    pub declarations: Vec<Declaration>,
    pub functions: Vec<Function>,
    pub entry: Option<Entry>,
}

impl Unit {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Instruction stream of the function currently being emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    blocks: Vec<BasicBlock>,
    current: usize,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    pub fn new() -> Self {
        Self {
            blocks: vec![BasicBlock::new("entry")],
            current: 0,
        }
    }

    pub fn add_instruction(&mut self, instruction: Instruction) {
        self.blocks[self.current].instructions.push(instruction);
    }

    pub fn set_terminator(&mut self, terminator: Terminator) {
        let block = &mut self.blocks[self.current];
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    /// Opens a new block and makes it current. The previous block must
    /// already have been terminated by the caller.
    pub fn start_block(&mut self, label: impl Into<String>) {
        self.blocks.push(BasicBlock::new(label));
        self.current = self.blocks.len() - 1;
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<BasicBlock> {
        self.blocks
    }
}

impl Display for IRType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            IRType::Void => write!(f, "void"),
            IRType::I1 => write!(f, "i1"),
            IRType::I32 => write!(f, "i32"),
            IRType::F64 => write!(f, "double"),
            IRType::Ptr => write!(f, "ptr"),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(c) => write!(f, "{}", c),
            Value::Register(name) => write!(f, "%{}", name),
            Value::Global(name) => write!(f, "@{}", name),
            Value::Argument(name) => write!(f, "%{}", name),
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Real(x) => write!(f, "{:?}", x),
            Constant::Null => write!(f, "null"),
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::SRem => "srem",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
            BinaryOp::FRem => "frem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
        };
        write!(f, "{}", name)
    }
}

impl Display for ICmpCond {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ICmpCond::Eq => "eq",
            ICmpCond::Ne => "ne",
            ICmpCond::Slt => "slt",
            ICmpCond::Sle => "sle",
            ICmpCond::Sgt => "sgt",
            ICmpCond::Sge => "sge",
            ICmpCond::Ult => "ult",
            ICmpCond::Ule => "ule",
            ICmpCond::Ugt => "ugt",
            ICmpCond::Uge => "uge",
        };
        write!(f, "{}", name)
    }
}

impl Display for FCmpCond {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            FCmpCond::Oeq => "oeq",
            FCmpCond::One => "one",
            FCmpCond::Olt => "olt",
            FCmpCond::Ole => "ole",
            FCmpCond::Ogt => "ogt",
            FCmpCond::Oge => "oge",
        };
        write!(f, "{}", name)
    }
}

impl Display for CastOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            CastOp::FpToSi => "fptosi",
            CastOp::SiToFp => "sitofp",
            CastOp::UiToFp => "uitofp",
            CastOp::ZExt => "zext",
        };
        write!(f, "{}", name)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Alloca { dest, ty } => write!(f, "  %{} = alloca {}", dest, ty),
            Instruction::Load { dest, ptr, ty } => {
                write!(f, "  %{} = load {}, ptr {}", dest, ty, ptr)
            }
            Instruction::Store { value, ptr, ty } => {
                write!(f, "  store {} {}, ptr {}", ty, value, ptr)
            }
            Instruction::GetElementPtr {
                dest,
                ty,
                ptr,
                index,
            } => write!(
                f,
                "  %{} = getelementptr {}, ptr {}, i32 {}",
                dest, ty, ptr, index
            ),
            Instruction::Malloc { dest, ty, count } => {
                write!(f, "  %{} = malloc {}, i32 {}", dest, ty, count)
            }
            Instruction::Free { ptr } => write!(f, "  free ptr {}", ptr),
            Instruction::Binary {
                op,
                dest,
                lhs,
                rhs,
                ty,
            } => write!(f, "  %{} = {} {} {}, {}", dest, op, ty, lhs, rhs),
            Instruction::ICmp {
                dest,
                cond,
                lhs,
                rhs,
                ty,
            } => write!(f, "  %{} = icmp {} {} {}, {}", dest, cond, ty, lhs, rhs),
            Instruction::FCmp {
                dest,
                cond,
                lhs,
                rhs,
            } => write!(f, "  %{} = fcmp {} double {}, {}", dest, cond, lhs, rhs),
            Instruction::Cast {
                op,
                dest,
                value,
                from,
                to,
            } => write!(f, "  %{} = {} {} {} to {}", dest, op, from, value, to),
            Instruction::Call {
                dest,
                func,
                args,
                ty,
            } => {
                write!(f, "  ")?;
                if let Some(d) = dest {
                    write!(f, "%{} = ", d)?;
                }
                write!(f, "call {} @{}(", ty, func)?;
                for (i, (arg_ty, arg)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", arg_ty, arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Display for Terminator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Ret {
                value: Some((ty, val)),
            } => write!(f, "  ret {} {}", ty, val),
            Terminator::Ret { value: None } => write!(f, "  ret void"),
            Terminator::Br { label } => write!(f, "  br label %{}", label),
            Terminator::CondBr {
                cond,
                then_label,
                else_label,
            } => write!(
                f,
                "  br i1 {}, label %{}, label %{}",
                cond, then_label, else_label
            ),
        }
    }
}

impl Display for BasicBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        if let Some(term) = &self.terminator {
            writeln!(f, "{}", term)?;
        }
        Ok(())
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "define {} @{}(", self.return_type, self.name)?;
        for (i, (param_name, param_type)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} %{}", param_type, param_name)?;
        }
        writeln!(f, ") {{")?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        writeln!(f, "}}")
    }
}

impl Display for Declaration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Global {
                name,
                ty,
                init: Some(init),
            } => write!(f, "@{} = global {} {}", name, ty, init),
            Declaration::Global {
                name,
                ty,
                init: None,
            } => write!(f, "@{} = external global {}", name, ty),
            Declaration::Function {
                name,
                params,
                return_type,
                variadic,
            } => {
                write!(f, "declare {} @{}(", return_type, name)?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                if *variadic {
                    write!(f, ", ...")?;
                }
                write!(f, ")")
            }
            Declaration::Text { name, text } => write!(
                f,
                "@{} = private constant [{} x i8] c\"{}\\00\"",
                name,
                text.len() + 1,
                text.escape_default()
            ),
        }
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "; Unit: {}", self.name)?;
        writeln!(f)?;
        for declaration in &self.declarations {
            writeln!(f, "{}", declaration)?;
        }
        if !self.declarations.is_empty() {
            writeln!(f)?;
        }
        for function in &self.functions {
            writeln!(f, "{}", function)?;
        }
        Ok(())
    }
}
