use crate::ir::{Constant, IRType};
use std::fmt::{self, Display, Formatter};

#[cfg(test)]
pub mod test;

/// Storage type of every Tau value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Real,
    Int,
    Bool,
    Array(Box<Type>),
}

/// The scalar types, in the order the builtin catalog registers overloads.
pub const SCALARS: [Type; 3] = [Type::Int, Type::Real, Type::Bool];

/// Instruction sequence used to turn a value of one type into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionRule {
    /// `fptosi double -> i32`
    RealToInt,
    /// `fcmp one x, 0.0`
    RealToBool,
    /// `sitofp i32 -> double`
    IntToReal,
    /// `icmp ne x, 0`
    IntToBool,
    /// `uitofp i1 -> double`
    BoolToReal,
    /// `zext i1 -> i32`
    BoolToInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    /// Only allowed through a forced cast such as `Int(x)`.
    pub explicit: bool,
    pub rule: ConversionRule,
}

impl Type {
    pub fn array_of(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Resolves a type keyword. Only scalar types have names in source code.
    pub fn from_name(name: &str) -> Option<Type> {
        match name {
            "Real" => Some(Type::Real),
            "Int" => Some(Type::Int),
            "Bool" => Some(Type::Bool),
            _ => None,
        }
    }

    pub fn is_type_name(name: &str) -> bool {
        Self::from_name(name).is_some()
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Type::Array(_))
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Size in bytes of one value of this type in memory.
    pub fn size(&self) -> u64 {
        match self {
            Type::Real => 8,
            Type::Int => 4,
            Type::Bool => 1,
            Type::Array(_) => 8,
        }
    }

    pub fn ir_type(&self) -> IRType {
        match self {
            Type::Real => IRType::F64,
            Type::Int => IRType::I32,
            Type::Bool => IRType::I1,
            Type::Array(_) => IRType::Ptr,
        }
    }

    pub fn zero(&self) -> Constant {
        match self {
            Type::Real => Constant::Real(0.0),
            Type::Int => Constant::Int(0),
            Type::Bool => Constant::Bool(false),
            Type::Array(_) => Constant::Null,
        }
    }

    /// Types this one implicitly reaches, cheapest first (itself at cost 0).
    pub fn casting(&self) -> Vec<Type> {
        match self {
            Type::Real => vec![Type::Real],
            Type::Int => vec![Type::Int, Type::Real],
            Type::Bool => vec![Type::Bool, Type::Int, Type::Real],
            Type::Array(_) => vec![self.clone()],
        }
    }

    /// Position of `target` in the implicit-cast list, or `None` when no
    /// overload may rely on that conversion.
    pub fn cast_cost(&self, target: &Type) -> Option<usize> {
        self.casting().iter().position(|t| t == target)
    }

    pub fn conversion(&self, target: &Type) -> Option<Conversion> {
        use ConversionRule::*;
        let (explicit, rule) = match (self, target) {
            (Type::Real, Type::Int) => (true, RealToInt),
            (Type::Real, Type::Bool) => (true, RealToBool),
            (Type::Int, Type::Real) => (false, IntToReal),
            (Type::Int, Type::Bool) => (false, IntToBool),
            (Type::Bool, Type::Real) => (false, BoolToReal),
            (Type::Bool, Type::Int) => (false, BoolToInt),
            _ => return None,
        };
        Some(Conversion { explicit, rule })
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Type::Real => write!(f, "Real"),
            Type::Int => write!(f, "Int"),
            Type::Bool => write!(f, "Bool"),
            Type::Array(element) => write!(f, "{}[]", element),
        }
    }
}

/// Space-joined type names, the way overload signatures are written.
pub fn signature(types: &[Type]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
