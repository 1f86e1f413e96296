use crate::builtins::{Lowering, MathFn, Operator, catalog};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{AssignTarget, Associativity, Literal, Precedence, Token, TokenKind};
use crate::module::Module;
use crate::types::{ConversionRule, Type};
use std::fmt::Write;
use std::ops::Range;

#[cfg(test)]
pub mod test;

pub type NodeId = usize;

/// Deepest recursion the builder allows while splitting one statement.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Print,
    /// `declare` is set when the assignment introduces the variable.
    Assign {
        name: String,
        declare: bool,
    },
    /// Children: array, index, value.
    IndexAssign,
    Paren,
    Call {
        name: String,
        symbol: String,
    },
    Free {
        name: String,
    },
    Literal(Literal),
    Load {
        name: String,
    },
    /// Child: element count.
    CreateArray,
    LiteralArray,
    Convert(ConversionRule),
    /// Typed builtin picked by overload resolution.
    Builtin(Operator),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub lowering: Lowering,
    pub children: Vec<NodeId>,
    /// `None` for statements that produce no value.
    pub ty: Option<Type>,
    pub span: Range<usize>,
}

/// One statement's tree. Children are always stored before their parent,
/// so walking the arena in order visits operands first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Ast {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn ty(&self) -> Option<&Type> {
        self.nodes.get(self.root).and_then(|n| n.ty.as_ref())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Indented tree view used by the `ast` trace.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let label = match &node.kind {
                NodeKind::Print => "print".to_string(),
                NodeKind::Assign { name, declare } => {
                    if *declare {
                        format!("{} := (new)", name)
                    } else {
                        format!("{} :=", name)
                    }
                }
                NodeKind::IndexAssign => "index=".to_string(),
                NodeKind::Paren => "()".to_string(),
                NodeKind::Call { name, .. } => format!("call {}", name),
                NodeKind::Free { name } => format!("free {}", name),
                NodeKind::Literal(lit) => format!("{}", TokenKind::Literal(*lit)),
                NodeKind::Load { name } => name.clone(),
                NodeKind::CreateArray => "array".to_string(),
                NodeKind::LiteralArray => "literal array".to_string(),
                NodeKind::Convert(rule) => format!("convert {:?}", rule),
                NodeKind::Builtin(op) => op.to_string(),
            };
            let ty = node.ty.as_ref().map_or("-".to_string(), Type::to_string);
            let _ = writeln!(out, "{}{} : {}", "  ".repeat(depth), label, ty);
            for child in node.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        out
    }
}

fn span_of(tokens: &[Token]) -> Range<usize> {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => first.span.start..last.span.end,
        _ => 0..0,
    }
}

/// Builds a typed tree for one statement, splitting the token list at its
/// weakest operator and resolving every operator against the builtin catalog.
pub struct AstBuilder<'a, 's> {
    module: &'a Module<'s>,
    ast: Ast,
    depth: usize,
}

impl<'a, 's> AstBuilder<'a, 's> {
    pub fn new(module: &'a Module<'s>) -> Self {
        Self {
            module,
            ast: Ast::default(),
            depth: 0,
        }
    }

    pub fn build(mut self, tokens: &[Token]) -> CompileResult<Ast> {
        let root = self.expression(tokens, &span_of(tokens))?;
        self.ast.root = root;
        Ok(self.ast)
    }

    /// Builds a statement whose value must convert implicitly to `target`.
    pub fn build_as(mut self, tokens: &[Token], target: &Type) -> CompileResult<Ast> {
        let span = span_of(tokens);
        let node = self.expression(tokens, &span)?;
        let root = self.cast_to(node, target, false)?;
        self.ast.root = root;
        Ok(self.ast)
    }

    fn add(
        &mut self,
        kind: NodeKind,
        lowering: Lowering,
        children: Vec<NodeId>,
        ty: Option<Type>,
        span: Range<usize>,
    ) -> NodeId {
        self.ast.push(Node {
            kind,
            lowering,
            children,
            ty,
            span,
        })
    }

    fn ty(&self, id: NodeId) -> Option<&Type> {
        self.ast.node(id).ty.as_ref()
    }

    /// Wraps `node` in a conversion to `target` when the types differ.
    /// Explicit-only conversions need `force`.
    pub fn cast_to(&mut self, node: NodeId, target: &Type, force: bool) -> CompileResult<NodeId> {
        let span = self.ast.node(node).span.clone();
        let Some(source) = self.ty(node).cloned() else {
            return Err(
                CompileError::type_error("expression does not produce a value").with_span(span)
            );
        };
        if &source == target {
            return Ok(node);
        }
        let Some(conversion) = source.conversion(target) else {
            return Err(CompileError::type_error(format!(
                "cannot convert {} to {}",
                source, target
            ))
            .with_span(span));
        };
        if conversion.explicit && !force {
            return Err(CompileError::type_error(format!(
                "won't implicitly convert {} to {}; use {}(...)",
                source, target, target
            ))
            .with_span(span));
        }
        Ok(self.add(
            NodeKind::Convert(conversion.rule),
            Lowering::Convert,
            vec![node],
            Some(target.clone()),
            span,
        ))
    }

    fn expression(&mut self, tokens: &[Token], outer: &Range<usize>) -> CompileResult<NodeId> {
        if self.depth >= MAX_DEPTH {
            return Err(
                CompileError::syntax("expression is nested too deeply").with_span(span_of(tokens))
            );
        }
        self.depth += 1;
        let node = self.split(tokens, outer);
        self.depth -= 1;
        node
    }

    fn split(&mut self, tokens: &[Token], outer: &Range<usize>) -> CompileResult<NodeId> {
        if tokens.is_empty() {
            return Err(CompileError::syntax("expected an expression").with_span(outer.clone()));
        }

        let weakest = tokens
            .iter()
            .map(Token::precedence)
            .min()
            .unwrap_or(Precedence::Atom);
        let split = match weakest.associativity() {
            Associativity::Left => tokens.iter().rposition(|t| t.precedence() == weakest),
            Associativity::Right => tokens.iter().position(|t| t.precedence() == weakest),
        }
        .unwrap_or(0);

        let (left, rest) = tokens.split_at(split);
        let token = &rest[0];
        let right = &rest[1..];
        let span = span_of(tokens);

        match &token.kind {
            TokenKind::Def
            | TokenKind::If
            | TokenKind::While
            | TokenKind::For
            | TokenKind::End
            | TokenKind::Comma
            | TokenKind::In => Err(CompileError::syntax(format!(
                "unexpected '{}' in expression",
                token.kind
            ))
            .with_span(token.span.clone())),

            TokenKind::Print => {
                expect_nothing_before(left, token)?;
                self.print(right, span)
            }
            TokenKind::Assign(target) => {
                expect_nothing_before(left, token)?;
                self.assign(target, right, token, span)
            }
            TokenKind::Binary(_) if weakest.associativity() == Associativity::Left => {
                self.binary_chain(tokens, weakest)
            }
            TokenKind::Binary(op) => {
                let lhs = self.expression(left, &token.span)?;
                let rhs = self.expression(right, &token.span)?;
                self.builtin(Operator::Binary(*op), vec![lhs, rhs], span)
            }
            TokenKind::Unary(op) => {
                expect_nothing_before(left, token)?;
                let operand = self.expression(right, &token.span)?;
                self.builtin(Operator::Unary(*op), vec![operand], span)
            }
            TokenKind::Indexing(index) => {
                if let Some(extra) = right.first() {
                    return Err(unexpected(extra));
                }
                let array = self.expression(left, &token.span)?;
                let index = self.expression(index, &token.span)?;
                self.builtin(Operator::Index, vec![array, index], span)
            }
            _ => {
                if tokens.len() > 1 {
                    return Err(unexpected(&tokens[1]));
                }
                self.atom(token)
            }
        }
    }

    /// Folds every operator of rank `rank` from left to right, so a long
    /// flat chain costs one level of recursion.
    fn binary_chain(&mut self, tokens: &[Token], rank: Precedence) -> CompileResult<NodeId> {
        let positions: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.precedence() == rank)
            .map(|(i, _)| i)
            .collect();
        let Some(&first) = positions.first() else {
            return Err(CompileError::syntax("expected an operator").with_span(span_of(tokens)));
        };

        let mut lhs = self.expression(&tokens[..first], &tokens[first].span)?;
        for (n, &at) in positions.iter().enumerate() {
            let token = &tokens[at];
            let TokenKind::Binary(op) = &token.kind else {
                return Err(unexpected(token));
            };
            let end = positions.get(n + 1).copied().unwrap_or(tokens.len());
            let rhs = self.expression(&tokens[at + 1..end], &token.span)?;
            lhs = self.builtin(Operator::Binary(*op), vec![lhs, rhs], span_of(&tokens[..end]))?;
        }
        Ok(lhs)
    }

    fn builtin(
        &mut self,
        op: Operator,
        args: Vec<NodeId>,
        span: Range<usize>,
    ) -> CompileResult<NodeId> {
        let mut types = Vec::with_capacity(args.len());
        for arg in &args {
            match self.ty(*arg) {
                Some(ty) => types.push(ty.clone()),
                None => {
                    return Err(CompileError::type_error(format!(
                        "operand of '{}' does not produce a value",
                        op
                    ))
                    .with_span(self.ast.node(*arg).span.clone()));
                }
            }
        }

        let resolution = catalog()
            .resolve(op, &types)
            .map_err(|e| e.with_span(span.clone()))?;
        let mut children = args;
        if let Some(params) = &resolution.params {
            for (child, param) in children.iter_mut().zip(params) {
                *child = self.cast_to(*child, param, false)?;
            }
        }
        Ok(self.add(
            NodeKind::Builtin(op),
            resolution.lowering,
            children,
            resolution.result,
            span,
        ))
    }

    fn print(&mut self, operand: &[Token], span: Range<usize>) -> CompileResult<NodeId> {
        let value = self.expression(operand, &span)?;
        match self.ty(value) {
            Some(ty) if ty.is_scalar() => {}
            Some(ty) => {
                return Err(CompileError::type_error(format!("cannot print a value of type {}", ty))
                    .with_span(span));
            }
            None => {
                return Err(CompileError::type_error("nothing to print").with_span(span));
            }
        }
        let lowering = untyped(Operator::Print)?;
        Ok(self.add(NodeKind::Print, lowering, vec![value], None, span))
    }

    fn assign(
        &mut self,
        target: &AssignTarget,
        rhs: &[Token],
        token: &Token,
        span: Range<usize>,
    ) -> CompileResult<NodeId> {
        match target {
            AssignTarget::Name(name) => {
                let value = self.expression(rhs, &token.span)?;
                let (value, declare) = match self.module.lookup(name) {
                    Some(variable) => {
                        let ty = variable.ty.clone();
                        (self.cast_to(value, &ty, false)?, false)
                    }
                    None => {
                        if self.ty(value).is_none() {
                            return Err(CompileError::type_error(format!(
                                "cannot assign a statement without a value to '{}'",
                                name
                            ))
                            .with_span(span));
                        }
                        (value, true)
                    }
                };
                let lowering = untyped(Operator::Assign)?;
                Ok(self.add(
                    NodeKind::Assign {
                        name: name.clone(),
                        declare,
                    },
                    lowering,
                    vec![value],
                    None,
                    span,
                ))
            }
            AssignTarget::Index(target) => {
                let Some((last, array)) = target.split_last() else {
                    return Err(CompileError::syntax("missing assignment target").with_span(span));
                };
                let TokenKind::Indexing(index) = &last.kind else {
                    return Err(unexpected(last));
                };
                let array = self.expression(array, &token.span)?;
                let element = match self.ty(array) {
                    Some(Type::Array(element)) => element.as_ref().clone(),
                    Some(other) => {
                        return Err(CompileError::type_error(format!(
                            "cannot index into a value of type {}",
                            other
                        ))
                        .with_span(self.ast.node(array).span.clone()));
                    }
                    None => {
                        return Err(CompileError::type_error("nothing to index").with_span(span));
                    }
                };
                let index = self.expression(index, &last.span)?;
                let index = self.cast_to(index, &Type::Int, false)?;
                let value = self.expression(rhs, &token.span)?;
                let value = self.cast_to(value, &element, false)?;
                let lowering = untyped(Operator::IndexAssign)?;
                Ok(self.add(
                    NodeKind::IndexAssign,
                    lowering,
                    vec![array, index, value],
                    None,
                    span,
                ))
            }
        }
    }

    fn atom(&mut self, token: &Token) -> CompileResult<NodeId> {
        let span = token.span.clone();
        match &token.kind {
            TokenKind::Literal(lit) => {
                let lowering = untyped(Operator::Literal)?;
                Ok(self.add(NodeKind::Literal(*lit), lowering, vec![], Some(lit.ty()), span))
            }
            TokenKind::Name(name) => {
                let Some(variable) = self.module.lookup(name) else {
                    return Err(CompileError::semantic(format!(
                        "variable '{}' is not declared",
                        name
                    ))
                    .with_span(span));
                };
                let ty = variable.ty.clone();
                let lowering = untyped(Operator::Name)?;
                Ok(self.add(
                    NodeKind::Load { name: name.clone() },
                    lowering,
                    vec![],
                    Some(ty),
                    span,
                ))
            }
            TokenKind::Paren(inner) => {
                let inner = self.expression(inner, &span)?;
                let ty = self.ty(inner).cloned();
                let lowering = untyped(Operator::Paren)?;
                Ok(self.add(NodeKind::Paren, lowering, vec![inner], ty, span))
            }
            TokenKind::Call { name, args } => self.call(name, args, span),
            TokenKind::Free(inner) => self.free(inner, span),
            TokenKind::ArrayCreate { element, size } => {
                let size = self.expression(size, &span)?;
                let size = self.cast_to(size, &Type::Int, false)?;
                let lowering = untyped(Operator::CreateArray)?;
                Ok(self.add(
                    NodeKind::CreateArray,
                    lowering,
                    vec![size],
                    Some(Type::array_of(element.clone())),
                    span,
                ))
            }
            TokenKind::ArrayLiteral(elements) => self.array_literal(elements, span),
            _ => Err(unexpected(token)),
        }
    }

    fn call(
        &mut self,
        name: &str,
        args: &[Vec<Token>],
        span: Range<usize>,
    ) -> CompileResult<NodeId> {
        if name == "range" {
            return Err(CompileError::syntax(
                "range(...) may only appear in a 'for' header",
            )
            .with_span(span));
        }

        let mut nodes = Vec::with_capacity(args.len());
        for arg in args {
            nodes.push(self.expression(arg, &span)?);
        }

        if let Some(target) = Type::from_name(name) {
            let [value] = nodes.as_slice() else {
                return Err(CompileError::type_error(format!(
                    "{}(...) takes exactly one argument",
                    name
                ))
                .with_span(span));
            };
            return self.cast_to(*value, &target, true);
        }

        if let Some(func) = MathFn::from_name(name) {
            return self.builtin(Operator::Math(func), nodes, span);
        }

        let Some(signature) = self.module.session().function(name).cloned() else {
            return Err(
                CompileError::semantic(format!("function '{}' is not defined", name))
                    .with_span(span),
            );
        };
        if signature.params.len() != nodes.len() {
            return Err(CompileError::type_error(format!(
                "'{}' takes {} argument(s) but {} were given",
                name,
                signature.params.len(),
                nodes.len()
            ))
            .with_span(span));
        }
        let mut children = Vec::with_capacity(nodes.len());
        for (node, (_, ty)) in nodes.into_iter().zip(&signature.params) {
            children.push(self.cast_to(node, ty, false)?);
        }
        let lowering = untyped(Operator::Call)?;
        Ok(self.add(
            NodeKind::Call {
                name: name.to_string(),
                symbol: signature.symbol.clone(),
            },
            lowering,
            children,
            Some(signature.returns.clone()),
            span,
        ))
    }

    fn free(&mut self, inner: &[Token], span: Range<usize>) -> CompileResult<NodeId> {
        let name = match inner {
            [
                Token {
                    kind: TokenKind::Name(name),
                    ..
                },
            ] => name,
            _ => {
                return Err(
                    CompileError::syntax("free(...) takes a single variable name").with_span(span)
                );
            }
        };
        match self.module.lookup(name) {
            None => Err(
                CompileError::semantic(format!("variable '{}' is not declared", name))
                    .with_span(span),
            ),
            Some(variable) if variable.alloc.is_none() => Err(CompileError::resource(format!(
                "'{}' does not own an allocation",
                name
            ))
            .with_span(span)),
            Some(_) => {
                let lowering = untyped(Operator::Free)?;
                Ok(self.add(
                    NodeKind::Free { name: name.clone() },
                    lowering,
                    vec![],
                    None,
                    span,
                ))
            }
        }
    }

    fn array_literal(
        &mut self,
        elements: &[Vec<Token>],
        span: Range<usize>,
    ) -> CompileResult<NodeId> {
        let mut nodes = Vec::with_capacity(elements.len());
        for element in elements {
            let node = self.expression(element, &span)?;
            match self.ty(node) {
                Some(ty) if ty.is_scalar() => nodes.push(node),
                _ => {
                    return Err(CompileError::type_error(
                        "array elements must be Real, Int or Bool",
                    )
                    .with_span(self.ast.node(node).span.clone()));
                }
            }
        }

        let Some(first) = nodes.first().and_then(|n| self.ty(*n)).cloned() else {
            return Err(
                CompileError::type_error("cannot infer the type of an empty array").with_span(span)
            );
        };
        let element = first
            .casting()
            .into_iter()
            .find(|candidate| {
                nodes.iter().all(|n| {
                    self.ty(*n)
                        .is_some_and(|ty| ty.cast_cost(candidate).is_some())
                })
            })
            .ok_or_else(|| {
                CompileError::type_error("array elements have no common type").with_span(span.clone())
            })?;

        let mut children = Vec::with_capacity(nodes.len());
        for node in nodes {
            children.push(self.cast_to(node, &element, false)?);
        }
        let lowering = untyped(Operator::LiteralArray)?;
        Ok(self.add(
            NodeKind::LiteralArray,
            lowering,
            children,
            Some(Type::array_of(element)),
            span,
        ))
    }
}

fn untyped(op: Operator) -> CompileResult<Lowering> {
    Ok(catalog().resolve(op, &[])?.lowering)
}

fn unexpected(token: &Token) -> CompileError {
    CompileError::syntax(format!("unexpected tokens starting at '{}'", token.kind))
        .with_span(token.span.clone())
}

fn expect_nothing_before(left: &[Token], token: &Token) -> CompileResult<()> {
    match left.first() {
        None => Ok(()),
        Some(_) => Err(CompileError::syntax(format!(
            "'{}' cannot follow other tokens here",
            token.kind
        ))
        .with_span(span_of(left).start..token.span.end)),
    }
}
