use crate::ast::AstBuilder;
use crate::builtins::MathFn;
use crate::error::{CompileError, CompileResult};
use crate::ir::builder::IRBuilder;
use crate::ir::{
    BinaryOp, CastOp, Constant, Entry, Function, ICmpCond, IRType, Instruction, Stream,
    Terminator, Unit, Value,
};
use crate::lexer::{Token, TokenKind, lex};
use crate::module::{Module, is_identifier};
use crate::session::Session;
use crate::types::Type;

pub mod source;

pub use source::{INDENT, LineSource, SourceBuffer, StrSource};

#[cfg(test)]
pub mod test;

/// Name of the function wrapping a whole program.
pub const PROGRAM_ENTRY: &str = "main";

/// A statement's value together with its type.
pub type Output = Option<(Value, Type)>;

enum TopLevel {
    Definition,
    Statement(Output),
}

/// Compiles one interactive unit: a single statement, block or function
/// definition read from `source`.
pub fn compile_unit<S: LineSource>(
    session: &mut Session,
    source: &mut SourceBuffer<S>,
) -> CompileResult<Unit> {
    let name = session.next_unit_name();
    let mut compiler = Compiler::new(session, name.clone());
    let mut out = Stream::new();
    let last = match compiler.top_level(&mut out, source)? {
        TopLevel::Definition => None,
        TopLevel::Statement(output) => output,
    };
    Ok(compiler.finish_entry(out, name, last))
}

/// Compiles every statement of `text` into one interactive unit whose
/// entry returns the value of the last top-level statement.
pub fn compile_command(session: &mut Session, text: &str) -> CompileResult<Unit> {
    let mut source = SourceBuffer::new(StrSource::new(text));
    let name = session.next_unit_name();
    let mut compiler = Compiler::new(session, name.clone());
    let mut out = Stream::new();
    let mut last = None;
    while !source.end(0)? {
        if let TopLevel::Statement(output) = compiler.top_level(&mut out, &mut source)? {
            last = output;
        }
    }
    Ok(compiler.finish_entry(out, name, last))
}

/// Compiles a whole program into a unit with a C `main`.
pub fn compile_program<S: LineSource>(
    session: &mut Session,
    source: &mut SourceBuffer<S>,
) -> CompileResult<Unit> {
    let trace = session.options.trace;
    let mut compiler = Compiler::new(session, PROGRAM_ENTRY);
    let mut out = Stream::new();
    while !source.end(0)? {
        compiler.top_level(&mut out, source)?;
    }
    compiler.module.end_scope(&mut out);
    compiler.module.end_program(&mut out);
    out.set_terminator(Terminator::Ret {
        value: Some((IRType::I32, Value::Constant(Constant::Int(0)))),
    });
    compiler.module.push_function(Function {
        name: PROGRAM_ENTRY.to_string(),
        params: Vec::new(),
        return_type: IRType::I32,
        blocks: out.into_blocks(),
    });
    let unit = compiler.module.into_unit(None);
    trace.ir(|| unit.to_string());
    Ok(unit)
}

struct Compiler<'s> {
    module: Module<'s>,
}

impl<'s> Compiler<'s> {
    fn new(session: &'s mut Session, name: impl Into<String>) -> Self {
        Self {
            module: Module::new(session, name),
        }
    }

    fn finish_entry(mut self, mut out: Stream, name: String, last: Output) -> Unit {
        self.module.end_scope(&mut out);

        let last = last.filter(|(_, ty)| ty.is_scalar());
        let (value, return_type) = match &last {
            // i1 has no portable C return convention
            Some((value, Type::Bool)) => {
                let dest = self.module.new_register();
                out.add_instruction(Instruction::Cast {
                    op: CastOp::ZExt,
                    dest: dest.clone(),
                    value: value.clone(),
                    from: IRType::I1,
                    to: IRType::I32,
                });
                (Some((IRType::I32, Value::Register(dest))), IRType::I32)
            }
            Some((value, ty)) => (Some((ty.ir_type(), value.clone())), ty.ir_type()),
            None => (None, IRType::Void),
        };
        out.set_terminator(Terminator::Ret { value });

        self.module.push_function(Function {
            name: name.clone(),
            params: Vec::new(),
            return_type,
            blocks: out.into_blocks(),
        });
        let trace = self.module.session().options.trace;
        let unit = self.module.into_unit(Some(Entry {
            name,
            returns: last.map(|(_, ty)| ty),
        }));
        trace.ir(|| unit.to_string());
        unit
    }

    fn lex(&self, line: &str) -> CompileResult<Vec<Token>> {
        let tokens = lex(line)?;
        self.module.session().options.trace.lexer(|| {
            let kinds: Vec<String> = tokens.iter().map(|t| t.kind.to_string()).collect();
            format!("{} ===> [{}]", line.trim(), kinds.join(", "))
        });
        Ok(tokens)
    }

    fn top_level<S: LineSource>(
        &mut self,
        out: &mut Stream,
        source: &mut SourceBuffer<S>,
    ) -> CompileResult<TopLevel> {
        let is_definition = match source.peek(0) {
            Some(line) => lex(line).map(|tokens| {
                tokens
                    .first()
                    .is_some_and(|t| t.kind == TokenKind::Def)
            }),
            None => return Err(CompileError::syntax("unexpected end of input")),
        };

        match is_definition {
            Ok(true) => {
                let Some((number, text)) = source.next_line(0) else {
                    return Err(CompileError::syntax("unexpected end of input"));
                };
                self.function(source, &text)
                    .map_err(|e| e.at_line(number, &text))?;
                Ok(TopLevel::Definition)
            }
            Ok(false) => Ok(TopLevel::Statement(self.block(out, source, 0)?)),
            Err(e) => {
                // drop the bad line so the next unit starts fresh
                let location = source.next_line(0);
                Err(match location {
                    Some((number, text)) => e.at_line(number, &text),
                    None => e,
                })
            }
        }
    }

    fn statement(&mut self, out: &mut Stream, tokens: &[Token]) -> CompileResult<Output> {
        let ast = AstBuilder::new(&self.module).build(tokens)?;
        self.module.session().options.trace.ast(|| ast.dump());
        let emitted = IRBuilder::new(&mut self.module, out).emit(&ast)?;
        Ok(emitted.value.zip(ast.ty().cloned()))
    }

    /// Builds `tokens` as a condition and returns the `i1` holding it.
    fn condition(&mut self, out: &mut Stream, tokens: &[Token]) -> CompileResult<Value> {
        let ast = AstBuilder::new(&self.module).build_as(tokens, &Type::Bool)?;
        self.module.session().options.trace.ast(|| ast.dump());
        let emitted = IRBuilder::new(&mut self.module, out).emit(&ast)?;
        emitted
            .value
            .ok_or_else(|| CompileError::type_error("condition does not produce a value"))
    }

    /// Reads one line at block depth `level` and compiles it, together with
    /// its body when it opens a block.
    fn block<S: LineSource>(
        &mut self,
        out: &mut Stream,
        source: &mut SourceBuffer<S>,
        level: usize,
    ) -> CompileResult<Output> {
        let Some((number, text)) = source.next_line(level) else {
            return Err(CompileError::syntax("unexpected end of input"));
        };
        self.line(out, source, level, &text)
            .map_err(|e| e.at_line(number, &text))
    }

    fn line<S: LineSource>(
        &mut self,
        out: &mut Stream,
        source: &mut SourceBuffer<S>,
        level: usize,
        text: &str,
    ) -> CompileResult<Output> {
        let tokens = self.lex(text)?;
        let Some(head) = tokens.first() else {
            return Ok(None);
        };
        match &head.kind {
            TokenKind::If => self.if_block(out, source, level, &tokens[1..])?,
            TokenKind::While => self.while_block(out, source, level, &tokens[1..])?,
            TokenKind::For => self.for_block(out, source, level, &tokens[1..])?,
            TokenKind::Def => {
                return Err(
                    CompileError::syntax("functions may only be defined at top level")
                        .with_span(head.span.clone()),
                );
            }
            _ => return self.statement(out, &tokens),
        }
        Ok(None)
    }

    fn body<S: LineSource>(
        &mut self,
        out: &mut Stream,
        source: &mut SourceBuffer<S>,
        level: usize,
    ) -> CompileResult<Output> {
        let mut last = None;
        let mut lines = 0usize;
        while !source.end(level + 1)? {
            last = self.block(out, source, level + 1)?;
            lines += 1;
        }
        if lines == 0 {
            return Err(CompileError::syntax("expected an indented block"));
        }
        Ok(last)
    }

    fn if_block<S: LineSource>(
        &mut self,
        out: &mut Stream,
        source: &mut SourceBuffer<S>,
        level: usize,
        condition: &[Token],
    ) -> CompileResult<()> {
        let n = self.module.new_block_id();
        let then_label = format!("if{}_then", n);
        let resume = format!("if{}_resume", n);

        let cond = self.condition(out, condition)?;
        out.set_terminator(Terminator::CondBr {
            cond,
            then_label: then_label.clone(),
            else_label: resume.clone(),
        });
        out.start_block(then_label);
        self.body(out, source, level)?;
        out.set_terminator(Terminator::Br {
            label: resume.clone(),
        });
        out.start_block(resume);
        Ok(())
    }

    fn while_block<S: LineSource>(
        &mut self,
        out: &mut Stream,
        source: &mut SourceBuffer<S>,
        level: usize,
        condition: &[Token],
    ) -> CompileResult<()> {
        let n = self.module.new_block_id();
        let check = format!("while{}_condition", n);
        let then_label = format!("while{}_then", n);
        let resume = format!("while{}_resume", n);

        out.set_terminator(Terminator::Br {
            label: check.clone(),
        });
        out.start_block(check.clone());
        let cond = self.condition(out, condition)?;
        out.set_terminator(Terminator::CondBr {
            cond,
            then_label: then_label.clone(),
            else_label: resume.clone(),
        });
        out.start_block(then_label);
        self.body(out, source, level)?;
        out.set_terminator(Terminator::Br { label: check });
        out.start_block(resume);
        Ok(())
    }

    /// `for <name> in range(<limit>):` counts from 0 up to `limit`,
    /// evaluating the limit once.
    fn for_block<S: LineSource>(
        &mut self,
        out: &mut Stream,
        source: &mut SourceBuffer<S>,
        level: usize,
        header: &[Token],
    ) -> CompileResult<()> {
        let (counter, limit) = match header {
            [
                Token {
                    kind: TokenKind::Name(counter),
                    ..
                },
                Token {
                    kind: TokenKind::In,
                    ..
                },
                Token {
                    kind: TokenKind::Call { name, args },
                    ..
                },
            ] if name == "range" && args.len() == 1 => (counter, &args[0]),
            _ => {
                return Err(CompileError::syntax(
                    "only 'for <name> in range(<limit>):' loops are supported",
                ));
            }
        };

        let n = self.module.new_block_id();
        let check = format!("for{}_condition", n);
        let body_label = format!("for{}_body", n);
        let resume = format!("for{}_resume", n);

        let ast = AstBuilder::new(&self.module).build_as(limit, &Type::Int)?;
        self.module.session().options.trace.ast(|| ast.dump());
        let limit = IRBuilder::new(&mut self.module, out)
            .emit(&ast)?
            .value
            .ok_or_else(|| CompileError::type_error("range limit does not produce a value"))?;

        let var = match self.module.get_variable(counter) {
            Some(var) if var.ty == Type::Int => var,
            Some(var) => {
                return Err(CompileError::type_error(format!(
                    "loop counter '{}' is {}, expected Int",
                    counter, var.ty
                )));
            }
            None => self.module.new_variable(out, counter, &Type::Int)?,
        };
        out.add_instruction(Instruction::Store {
            value: Value::Constant(Constant::Int(0)),
            ptr: var.ptr.clone(),
            ty: IRType::I32,
        });
        out.set_terminator(Terminator::Br {
            label: check.clone(),
        });

        out.start_block(check.clone());
        let current = self.module.new_register();
        out.add_instruction(Instruction::Load {
            dest: current.clone(),
            ptr: var.ptr.clone(),
            ty: IRType::I32,
        });
        let cond = self.module.new_register();
        out.add_instruction(Instruction::ICmp {
            dest: cond.clone(),
            cond: ICmpCond::Slt,
            lhs: Value::Register(current.clone()),
            rhs: limit,
            ty: IRType::I32,
        });
        out.set_terminator(Terminator::CondBr {
            cond: Value::Register(cond),
            then_label: body_label.clone(),
            else_label: resume.clone(),
        });

        out.start_block(body_label);
        self.body(out, source, level)?;
        let next = self.module.new_register();
        out.add_instruction(Instruction::Binary {
            op: BinaryOp::Add,
            dest: next.clone(),
            lhs: Value::Register(current),
            rhs: Value::Constant(Constant::Int(1)),
            ty: IRType::I32,
        });
        out.add_instruction(Instruction::Store {
            value: Value::Register(next),
            ptr: var.ptr,
            ty: IRType::I32,
        });
        out.set_terminator(Terminator::Br { label: check });
        out.start_block(resume);
        Ok(())
    }

    /// `def <Type> <name>(<Type> <arg>, ...):` followed by an indented body
    /// whose last statement is the return value.
    fn function<S: LineSource>(
        &mut self,
        source: &mut SourceBuffer<S>,
        header: &str,
    ) -> CompileResult<()> {
        let tokens = self.lex(header)?;
        let (returns, name, args, span) = match tokens.as_slice() {
            [
                Token {
                    kind: TokenKind::Def,
                    ..
                },
                Token {
                    kind: TokenKind::Name(returns),
                    ..
                },
                Token {
                    kind: TokenKind::Call { name, args },
                    span,
                },
            ] => (returns, name, args, span.clone()),
            _ => {
                return Err(CompileError::syntax(
                    "expected 'def <Type> <name>(<Type> <arg>, ...):'",
                ));
            }
        };

        let returns = Type::from_name(returns).ok_or_else(|| {
            CompileError::type_error(format!("unknown return type '{}'", returns))
        })?;
        if !is_identifier(name)
            || Type::is_type_name(name)
            || MathFn::from_name(name).is_some()
            || name == "range"
            || name == "free"
        {
            return Err(CompileError::semantic(format!(
                "'{}' cannot be used as a function name",
                name
            ))
            .with_span(span));
        }

        let mut params: Vec<(String, Type)> = Vec::with_capacity(args.len());
        for arg in args {
            let (ty, arg_name) = match arg.as_slice() {
                [
                    Token {
                        kind: TokenKind::Name(ty),
                        ..
                    },
                    Token {
                        kind: TokenKind::Name(arg_name),
                        ..
                    },
                ] => (ty, arg_name),
                _ => {
                    return Err(CompileError::syntax(
                        "parameters must be written as '<Type> <name>'",
                    )
                    .with_span(span));
                }
            };
            let ty = Type::from_name(ty).ok_or_else(|| {
                CompileError::type_error(format!("unknown parameter type '{}'", ty))
            })?;
            if params.iter().any(|(existing, _)| existing == arg_name) {
                return Err(CompileError::semantic(format!(
                    "parameter '{}' is declared twice",
                    arg_name
                ))
                .with_span(span));
            }
            params.push((arg_name.clone(), ty));
        }

        let signature = self
            .module
            .register_function(name, params.clone(), returns.clone())?;
        self.module.begin_function();

        let mut body = Stream::new();
        let mut ir_params = Vec::with_capacity(params.len());
        for (arg_name, ty) in &params {
            let argument = format!("arg_{}", arg_name);
            let var = self.module.new_variable(&mut body, arg_name, ty)?;
            body.add_instruction(Instruction::Store {
                value: Value::Argument(argument.clone()),
                ptr: var.ptr,
                ty: ty.ir_type(),
            });
            ir_params.push((argument, ty.ir_type()));
        }

        let last = self.body(&mut body, source, 0)?;
        let value = match last {
            Some((value, ty)) if ty == returns => value,
            Some((_, ty)) => {
                return Err(CompileError::semantic(format!(
                    "return type ({}) does not match declaration ({})",
                    ty, returns
                )));
            }
            None => {
                return Err(CompileError::semantic(format!(
                    "function '{}' must end with an expression of type {}",
                    name, returns
                )));
            }
        };

        self.module.end_scope(&mut body);
        body.set_terminator(Terminator::Ret {
            value: Some((returns.ir_type(), value)),
        });
        self.module.end_function(Function {
            name: signature.symbol,
            params: ir_params,
            return_type: returns.ir_type(),
            blocks: body.into_blocks(),
        });
        Ok(())
    }
}
