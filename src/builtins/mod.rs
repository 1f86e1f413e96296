use crate::error::{CompileError, CompileResult};
use crate::lexer::{BinOp, UnaryOp};
use crate::types::{SCALARS, Type, signature};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::LazyLock;

#[cfg(test)]
pub mod test;

/// libm functions callable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathFn {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Exp,
    Log,
    Sqrt,
    Fabs,
    Floor,
    Ceil,
    Pow,
}

impl MathFn {
    pub const ALL: [MathFn; 14] = [
        MathFn::Sin,
        MathFn::Cos,
        MathFn::Tan,
        MathFn::Asin,
        MathFn::Acos,
        MathFn::Atan,
        MathFn::Atan2,
        MathFn::Exp,
        MathFn::Log,
        MathFn::Sqrt,
        MathFn::Fabs,
        MathFn::Floor,
        MathFn::Ceil,
        MathFn::Pow,
    ];

    pub fn from_name(name: &str) -> Option<MathFn> {
        Self::ALL.into_iter().find(|f| f.symbol() == name)
    }

    /// The C symbol, which is also the name used in Tau code.
    pub fn symbol(&self) -> &'static str {
        match self {
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Tan => "tan",
            MathFn::Asin => "asin",
            MathFn::Acos => "acos",
            MathFn::Atan => "atan",
            MathFn::Atan2 => "atan2",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Sqrt => "sqrt",
            MathFn::Fabs => "fabs",
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Pow => "pow",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            MathFn::Atan2 | MathFn::Pow => 2,
            _ => 1,
        }
    }
}

/// Everything that can sit at the root of an AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Print,
    Assign,
    IndexAssign,
    Paren,
    Call,
    Free,
    Literal,
    Name,
    CreateArray,
    LiteralArray,
    Binary(BinOp),
    Unary(UnaryOp),
    Index,
    Math(MathFn),
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Print => write!(f, "print"),
            Operator::Assign => write!(f, "="),
            Operator::IndexAssign => write!(f, "index="),
            Operator::Paren => write!(f, "()"),
            Operator::Call => write!(f, "call"),
            Operator::Free => write!(f, "free"),
            Operator::Literal => write!(f, "literal"),
            Operator::Name => write!(f, "name"),
            Operator::CreateArray => write!(f, "array"),
            Operator::LiteralArray => write!(f, "literal array"),
            Operator::Binary(op) => write!(f, "{}", op.symbol()),
            Operator::Unary(UnaryOp::Plus) => write!(f, "unary +"),
            Operator::Unary(UnaryOp::Minus) => write!(f, "unary -"),
            Operator::Index => write!(f, "indexing"),
            Operator::Math(func) => write!(f, "{}", func.symbol()),
        }
    }
}

/// How a node is turned into instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowering {
    Print,
    Assign,
    IndexAssign,
    Paren,
    CallUser,
    Free,
    Literal,
    Load,
    CreateArray,
    LiteralArray,
    Convert,
    /// `+ - * /` picking the integer or float opcode from the operand type.
    Arithmetic(BinOp),
    FloorDiv,
    Modulo,
    Power,
    Compare(BinOp),
    Logic(BinOp),
    Negate,
    Identity,
    IndexLoad,
    Math(MathFn),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overload {
    pub params: Vec<Type>,
    pub result: Type,
    pub lowering: Lowering,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Builtin {
    /// Accepts any argument types; the builder checks them itself.
    Untyped(Lowering),
    Typed(Vec<Overload>),
}

/// Outcome of overload resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub lowering: Lowering,
    /// Types the arguments must be cast to, for typed builtins.
    pub params: Option<Vec<Type>>,
    pub result: Option<Type>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<Operator, Builtin>,
}

static STANDARD: LazyLock<Catalog> = LazyLock::new(Catalog::standard);

/// The catalog every compilation uses.
pub fn catalog() -> &'static Catalog {
    &STANDARD
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_untyped(&mut self, op: Operator, lowering: Lowering) {
        self.entries.insert(op, Builtin::Untyped(lowering));
    }

    /// Adds one signature. Earlier registrations are tried first, which only
    /// matters for error messages: equal costs are always rejected.
    pub fn register(&mut self, op: Operator, params: Vec<Type>, result: Type, lowering: Lowering) {
        let overload = Overload {
            params,
            result,
            lowering,
        };
        match self.entries.get_mut(&op) {
            Some(Builtin::Typed(overloads)) => overloads.push(overload),
            _ => {
                self.entries.insert(op, Builtin::Typed(vec![overload]));
            }
        }
    }

    pub fn get(&self, op: &Operator) -> Option<&Builtin> {
        self.entries.get(op)
    }

    pub fn standard() -> Self {
        let mut catalog = Self::new();

        for (op, lowering) in [
            (Operator::Print, Lowering::Print),
            (Operator::Assign, Lowering::Assign),
            (Operator::IndexAssign, Lowering::IndexAssign),
            (Operator::Paren, Lowering::Paren),
            (Operator::Call, Lowering::CallUser),
            (Operator::Free, Lowering::Free),
            (Operator::Literal, Lowering::Literal),
            (Operator::Name, Lowering::Load),
            (Operator::CreateArray, Lowering::CreateArray),
            (Operator::LiteralArray, Lowering::LiteralArray),
        ] {
            catalog.register_untyped(op, lowering);
        }

        let numeric = [Type::Int, Type::Real];
        for op in [BinOp::Add, BinOp::Sub, BinOp::Mul] {
            for ty in &numeric {
                catalog.register(
                    Operator::Binary(op),
                    vec![ty.clone(), ty.clone()],
                    ty.clone(),
                    Lowering::Arithmetic(op),
                );
            }
        }
        catalog.register(
            Operator::Binary(BinOp::Div),
            vec![Type::Real, Type::Real],
            Type::Real,
            Lowering::Arithmetic(BinOp::Div),
        );
        for ty in &numeric {
            let params = vec![ty.clone(), ty.clone()];
            catalog.register(
                Operator::Binary(BinOp::FloorDiv),
                params.clone(),
                ty.clone(),
                Lowering::FloorDiv,
            );
            catalog.register(
                Operator::Binary(BinOp::Mod),
                params,
                ty.clone(),
                Lowering::Modulo,
            );
        }
        catalog.register(
            Operator::Binary(BinOp::Pow),
            vec![Type::Real, Type::Real],
            Type::Real,
            Lowering::Power,
        );

        for op in [
            BinOp::Less,
            BinOp::LessEq,
            BinOp::Greater,
            BinOp::GreaterEq,
            BinOp::Eq,
            BinOp::NotEq,
        ] {
            for ty in &SCALARS {
                catalog.register(
                    Operator::Binary(op),
                    vec![ty.clone(), ty.clone()],
                    Type::Bool,
                    Lowering::Compare(op),
                );
            }
        }
        for op in [BinOp::And, BinOp::Or, BinOp::Xor] {
            catalog.register(
                Operator::Binary(op),
                vec![Type::Bool, Type::Bool],
                Type::Bool,
                Lowering::Logic(op),
            );
        }

        for ty in &numeric {
            catalog.register(
                Operator::Unary(UnaryOp::Minus),
                vec![ty.clone()],
                ty.clone(),
                Lowering::Negate,
            );
            catalog.register(
                Operator::Unary(UnaryOp::Plus),
                vec![ty.clone()],
                ty.clone(),
                Lowering::Identity,
            );
        }

        for ty in &SCALARS {
            catalog.register(
                Operator::Index,
                vec![Type::array_of(ty.clone()), Type::Int],
                ty.clone(),
                Lowering::IndexLoad,
            );
        }

        for func in MathFn::ALL {
            catalog.register(
                Operator::Math(func),
                vec![Type::Real; func.arity()],
                Type::Real,
                Lowering::Math(func),
            );
        }

        catalog
    }

    /// Picks the signature reachable from `args` at the lowest total cast
    /// cost. Two candidates sharing the lowest cost is an error.
    pub fn resolve(&self, op: Operator, args: &[Type]) -> CompileResult<Resolution> {
        let overloads = match self.entries.get(&op) {
            None => {
                return Err(CompileError::type_error(format!(
                    "unknown operator '{}'",
                    op
                )));
            }
            Some(Builtin::Untyped(lowering)) => {
                return Ok(Resolution {
                    lowering: *lowering,
                    params: None,
                    result: None,
                });
            }
            Some(Builtin::Typed(overloads)) => overloads,
        };

        let mut best: Option<(usize, &Overload)> = None;
        let mut tied_with: Option<&Overload> = None;
        for overload in overloads.iter().filter(|o| o.params.len() == args.len()) {
            let cost = args
                .iter()
                .zip(&overload.params)
                .map(|(arg, param)| arg.cast_cost(param))
                .sum::<Option<usize>>();
            let Some(cost) = cost else {
                continue;
            };
            match best {
                Some((best_cost, _)) if cost > best_cost => {}
                Some((best_cost, _)) if cost == best_cost => tied_with = Some(overload),
                _ => {
                    best = Some((cost, overload));
                    tied_with = None;
                }
            }
        }

        match (best, tied_with) {
            (None, _) => Err(CompileError::type_error(format!(
                "no signature of '{}' accepts ({})",
                op,
                signature(args)
            ))),
            (Some((_, first)), Some(second)) => Err(CompileError::type_error(format!(
                "ambiguous call to '{}' with ({}): both ({}) and ({}) match",
                op,
                signature(args),
                signature(&first.params),
                signature(&second.params)
            ))),
            (Some((_, overload)), None) => Ok(Resolution {
                lowering: overload.lowering,
                params: Some(overload.params.clone()),
                result: Some(overload.result.clone()),
            }),
        }
    }
}
