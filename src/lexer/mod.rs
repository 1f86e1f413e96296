use crate::error::{CompileError, CompileResult};
use crate::types::Type;
use logos::Logos;
use std::fmt::{self, Display, Formatter};
use std::ops::Range;


/// Bracket nesting deeper than this is rejected instead of recursing further.
pub const MAX_NESTING: usize = 256;

/// Raw lexemes. Structure (brackets, unary operators, assignment targets)
/// is recovered on top of these by [`lex`].
#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\f]+")]
pub enum Lexeme {
    #[token("def")]
    Def,
    #[token("if")]
    If,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("print")]
    Print,
    #[token("end")]
    End,
    #[token("in")]
    In,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("xor")]
    Xor,

    #[token("True", |_| true)]
    #[token("False", |_| false)]
    Bool(bool),

    #[regex(r"[0-9]*\.[0-9]*", |lex| lex.slice().parse::<f64>().ok())]
    Real(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i32>().ok())]
    Int(i32),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    Power,
    #[token("/")]
    Slash,
    #[token("//")]
    SlashSlash,
    #[token("%")]
    Percent,

    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,

    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("**=")]
    PowerAssign,
    #[token("/=")]
    SlashAssign,
    #[token("//=")]
    SlashSlashAssign,
    #[token("%=")]
    PercentAssign,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Or,
    Xor,
    And,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eq,
    NotEq,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::And => "and",
            BinOp::Less => "<",
            BinOp::LessEq => "<=",
            BinOp::Greater => ">",
            BinOp::GreaterEq => ">=",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }

    pub fn precedence(&self) -> Precedence {
        match self {
            BinOp::Or => Precedence::Or,
            BinOp::Xor => Precedence::Xor,
            BinOp::And => Precedence::And,
            BinOp::Less
            | BinOp::LessEq
            | BinOp::Greater
            | BinOp::GreaterEq
            | BinOp::Eq
            | BinOp::NotEq => Precedence::Comparison,
            BinOp::Add | BinOp::Sub => Precedence::Additive,
            BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => Precedence::Multiplicative,
            BinOp::Pow => Precedence::Power,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Real(f64),
    Int(i32),
    Bool(bool),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Real(_) => Type::Real,
            Literal::Int(_) => Type::Int,
            Literal::Bool(_) => Type::Bool,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(String),
    /// Tokens of the indexed expression, ending in an `Indexing` token.
    Index(Vec<Token>),
}

/// Binding strength of a token, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Separator,
    Print,
    Assign,
    Or,
    Xor,
    And,
    Comparison,
    Additive,
    Multiplicative,
    Power,
    Unary,
    Indexing,
    Atom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

impl Precedence {
    pub fn associativity(&self) -> Associativity {
        match self {
            Precedence::Print | Precedence::Assign | Precedence::Power | Precedence::Unary => {
                Associativity::Right
            }
            _ => Associativity::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Def,
    If,
    While,
    For,
    End,
    Print,
    Assign(AssignTarget),
    Comma,
    In,
    Binary(BinOp),
    Unary(UnaryOp),
    Indexing(Vec<Token>),
    Call { name: String, args: Vec<Vec<Token>> },
    Free(Vec<Token>),
    ArrayCreate { element: Type, size: Vec<Token> },
    ArrayLiteral(Vec<Vec<Token>>),
    Paren(Vec<Token>),
    Literal(Literal),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

impl Token {
    pub fn new(kind: TokenKind, span: Range<usize>) -> Self {
        Self { kind, span }
    }

    pub fn precedence(&self) -> Precedence {
        match &self.kind {
            TokenKind::Def
            | TokenKind::If
            | TokenKind::While
            | TokenKind::For
            | TokenKind::End
            | TokenKind::Comma
            | TokenKind::In => Precedence::Separator,
            TokenKind::Print => Precedence::Print,
            TokenKind::Assign(_) => Precedence::Assign,
            TokenKind::Binary(op) => op.precedence(),
            TokenKind::Unary(_) => Precedence::Unary,
            TokenKind::Indexing(_) => Precedence::Indexing,
            TokenKind::Call { .. }
            | TokenKind::Free(_)
            | TokenKind::ArrayCreate { .. }
            | TokenKind::ArrayLiteral(_)
            | TokenKind::Paren(_)
            | TokenKind::Literal(_)
            | TokenKind::Name(_) => Precedence::Atom,
        }
    }

    /// Whether the token produces a value, which decides if a following
    /// `+`/`-` is binary and whether an infix operator may follow.
    pub fn is_value(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Call { .. }
                | TokenKind::ArrayCreate { .. }
                | TokenKind::Paren(_)
                | TokenKind::Indexing(_)
                | TokenKind::Literal(_)
                | TokenKind::Name(_)
                | TokenKind::ArrayLiteral(_)
        )
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Def => write!(f, "def"),
            TokenKind::If => write!(f, "if"),
            TokenKind::While => write!(f, "while"),
            TokenKind::For => write!(f, "for"),
            TokenKind::End => write!(f, "end"),
            TokenKind::Print => write!(f, "print"),
            TokenKind::Assign(AssignTarget::Name(name)) => write!(f, "{}=", name),
            TokenKind::Assign(AssignTarget::Index(_)) => write!(f, "index="),
            TokenKind::Comma => write!(f, ","),
            TokenKind::In => write!(f, "in"),
            TokenKind::Binary(op) => write!(f, "{}", op.symbol()),
            TokenKind::Unary(UnaryOp::Plus) => write!(f, "unary +"),
            TokenKind::Unary(UnaryOp::Minus) => write!(f, "unary -"),
            TokenKind::Indexing(_) => write!(f, "indexing"),
            TokenKind::Call { name, .. } => write!(f, "call {}", name),
            TokenKind::Free(_) => write!(f, "free"),
            TokenKind::ArrayCreate { element, .. } => write!(f, "array {}", element),
            TokenKind::ArrayLiteral(_) => write!(f, "literal array"),
            TokenKind::Paren(_) => write!(f, "()"),
            TokenKind::Literal(Literal::Real(x)) => write!(f, "{:?}", x),
            TokenKind::Literal(Literal::Int(i)) => write!(f, "{}", i),
            TokenKind::Literal(Literal::Bool(true)) => write!(f, "True"),
            TokenKind::Literal(Literal::Bool(false)) => write!(f, "False"),
            TokenKind::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Strips a trailing `#` comment.
pub fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Index of the bracket closing the one opened at `start`.
pub fn find_matching(s: &str, start: usize, open: char, close: char) -> CompileResult<usize> {
    let mut depth = 0usize;
    for (idx, c) in s[start..].char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Ok(start + idx);
            }
        }
    }
    Err(
        CompileError::lexical(format!("no matching '{}' for this '{}'", close, open))
            .with_span(start..start + open.len_utf8()),
    )
}

/// Lexes one source line into tokens.
pub fn lex(line: &str) -> CompileResult<Vec<Token>> {
    Lexer {
        src: strip_comment(line),
    }
    .lex_line()
}

struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    fn lex_line(&self) -> CompileResult<Vec<Token>> {
        let end = self.src.trim_end().len();
        let keyword = match self.next_lexeme(0, end) {
            Some((Ok(lexeme), span)) => match lexeme {
                Lexeme::Def => Some(Token::new(TokenKind::Def, span)),
                Lexeme::If => Some(Token::new(TokenKind::If, span)),
                Lexeme::While => Some(Token::new(TokenKind::While, span)),
                Lexeme::For => Some(Token::new(TokenKind::For, span)),
                _ => None,
            },
            _ => None,
        };

        match keyword {
            Some(keyword) => {
                if !self.src[..end].ends_with(':') {
                    return Err(CompileError::syntax(format!(
                        "'{}' header must end with ':'",
                        keyword.kind
                    ))
                    .with_span(keyword.span));
                }
                let body_start = keyword.span.end;
                self.lex_span(body_start, end - 1, 0, vec![keyword])
            }
            None => self.lex_span(0, end, 0, Vec::new()),
        }
    }

    fn next_lexeme(&self, pos: usize, end: usize) -> Option<(CompileResult<Lexeme>, Range<usize>)> {
        let mut lexer = Lexeme::lexer(&self.src[pos..end]);
        let result = lexer.next()?;
        let span = pos + lexer.span().start..pos + lexer.span().end;
        let result = result.map_err(|_| self.unrecognized(span.clone(), end));
        Some((result, span))
    }

    fn unrecognized(&self, span: Range<usize>, end: usize) -> CompileError {
        let slice = &self.src[span.clone()];
        let message = if !slice.is_empty() && slice.chars().all(|c| c.is_ascii_digit()) {
            format!("integer literal {} does not fit in an Int", slice)
        } else {
            format!("cannot interpret '{}'", self.src[span.start..end].trim())
        };
        CompileError::lexical(message).with_span(span)
    }

    fn lex_span(
        &self,
        start: usize,
        end: usize,
        depth: usize,
        mut tokens: Vec<Token>,
    ) -> CompileResult<Vec<Token>> {
        if depth > MAX_NESTING {
            return Err(CompileError::syntax("expression is nested too deeply")
                .with_span(start..end));
        }

        let mut pos = start;
        while let Some((lexeme, span)) = self.next_lexeme(pos, end) {
            let lexeme = lexeme?;
            pos = span.end;

            let kind = match lexeme {
                Lexeme::Def | Lexeme::If | Lexeme::While | Lexeme::For => {
                    return Err(CompileError::syntax(format!(
                        "'{}' must be the first word of the line",
                        &self.src[span.clone()]
                    ))
                    .with_span(span));
                }
                Lexeme::Print | Lexeme::End => {
                    if depth > 0 || !tokens.is_empty() {
                        return Err(CompileError::syntax(format!(
                            "'{}' must start the statement",
                            &self.src[span.clone()]
                        ))
                        .with_span(span));
                    }
                    if lexeme == Lexeme::Print {
                        TokenKind::Print
                    } else {
                        TokenKind::End
                    }
                }
                Lexeme::Colon => {
                    return Err(CompileError::syntax("unexpected ':'").with_span(span));
                }
                Lexeme::RParen | Lexeme::RBracket => {
                    return Err(
                        CompileError::lexical("unmatched closing bracket").with_span(span)
                    );
                }

                Lexeme::Assign => return self.assignment(tokens, None, span, end, depth),
                Lexeme::PlusAssign => {
                    return self.assignment(tokens, Some(BinOp::Add), span, end, depth);
                }
                Lexeme::MinusAssign => {
                    return self.assignment(tokens, Some(BinOp::Sub), span, end, depth);
                }
                Lexeme::StarAssign => {
                    return self.assignment(tokens, Some(BinOp::Mul), span, end, depth);
                }
                Lexeme::PowerAssign => {
                    return self.assignment(tokens, Some(BinOp::Pow), span, end, depth);
                }
                Lexeme::SlashAssign => {
                    return self.assignment(tokens, Some(BinOp::Div), span, end, depth);
                }
                Lexeme::SlashSlashAssign => {
                    return self.assignment(tokens, Some(BinOp::FloorDiv), span, end, depth);
                }
                Lexeme::PercentAssign => {
                    return self.assignment(tokens, Some(BinOp::Mod), span, end, depth);
                }

                Lexeme::Plus | Lexeme::Minus => {
                    let follows_value = tokens.last().is_some_and(Token::is_value);
                    match (lexeme, follows_value) {
                        (Lexeme::Plus, true) => TokenKind::Binary(BinOp::Add),
                        (Lexeme::Plus, false) => TokenKind::Unary(UnaryOp::Plus),
                        (_, true) => TokenKind::Binary(BinOp::Sub),
                        (_, false) => TokenKind::Unary(UnaryOp::Minus),
                    }
                }

                Lexeme::Comma => {
                    expect_value_before(&tokens, &span)?;
                    TokenKind::Comma
                }
                Lexeme::In => {
                    expect_value_before(&tokens, &span)?;
                    TokenKind::In
                }
                Lexeme::And
                | Lexeme::Or
                | Lexeme::Xor
                | Lexeme::Star
                | Lexeme::Power
                | Lexeme::Slash
                | Lexeme::SlashSlash
                | Lexeme::Percent
                | Lexeme::Less
                | Lexeme::LessEq
                | Lexeme::Greater
                | Lexeme::GreaterEq
                | Lexeme::EqEq
                | Lexeme::NotEq => {
                    expect_value_before(&tokens, &span)?;
                    TokenKind::Binary(binary_op(&lexeme))
                }

                Lexeme::LParen => {
                    let close = find_matching(&self.src[..end], span.start, '(', ')')?;
                    let inner = self.lex_span(span.start + 1, close, depth + 1, Vec::new())?;
                    pos = close + 1;
                    let full = span.start..pos;
                    match tokens.last() {
                        Some(Token {
                            kind: TokenKind::Name(name),
                            span: name_span,
                        }) => {
                            let name = name.clone();
                            let full = name_span.start..pos;
                            tokens.pop();
                            let kind = if name == "free" {
                                TokenKind::Free(inner)
                            } else {
                                TokenKind::Call {
                                    name,
                                    args: split_arguments(inner, &full)?,
                                }
                            };
                            tokens.push(Token::new(kind, full));
                            continue;
                        }
                        _ => {
                            tokens.push(Token::new(TokenKind::Paren(inner), full));
                            continue;
                        }
                    }
                }
                Lexeme::LBracket => {
                    let close = find_matching(&self.src[..end], span.start, '[', ']')?;
                    let inner = self.lex_span(span.start + 1, close, depth + 1, Vec::new())?;
                    pos = close + 1;
                    let full = span.start..pos;
                    let element = match tokens.last() {
                        Some(Token {
                            kind: TokenKind::Name(name),
                            ..
                        }) => Type::from_name(name),
                        _ => None,
                    };
                    if let Some(element) = element {
                        let start = tokens.pop().map_or(full.start, |t| t.span.start);
                        tokens.push(Token::new(
                            TokenKind::ArrayCreate {
                                element,
                                size: inner,
                            },
                            start..pos,
                        ));
                    } else if tokens.last().is_some_and(Token::is_value) {
                        tokens.push(Token::new(TokenKind::Indexing(inner), full));
                    } else {
                        let elements = split_arguments(inner, &full)?;
                        tokens.push(Token::new(TokenKind::ArrayLiteral(elements), full));
                    }
                    continue;
                }

                Lexeme::Real(x) => TokenKind::Literal(Literal::Real(x)),
                Lexeme::Int(i) => TokenKind::Literal(Literal::Int(i)),
                Lexeme::Bool(b) => TokenKind::Literal(Literal::Bool(b)),
                Lexeme::Ident(name) => TokenKind::Name(name),
            };
            tokens.push(Token::new(kind, span));
        }
        Ok(tokens)
    }

    /// Handles `=` and the compound forms. The rest of the span becomes the
    /// assigned value; compound forms are rewritten to `target = target OP (rest)`.
    fn assignment(
        &self,
        tokens: Vec<Token>,
        op: Option<BinOp>,
        span: Range<usize>,
        end: usize,
        depth: usize,
    ) -> CompileResult<Vec<Token>> {
        let target = match tokens.as_slice() {
            _ if depth > 0 => None,
            [
                Token {
                    kind: TokenKind::Name(name),
                    ..
                },
            ] => Some(AssignTarget::Name(name.clone())),
            [first, .., last]
                if first.kind != TokenKind::Print
                    && matches!(last.kind, TokenKind::Indexing(_)) =>
            {
                Some(AssignTarget::Index(tokens.clone()))
            }
            _ => None,
        };
        let Some(target) = target else {
            return Err(CompileError::syntax(
                "assignment must immediately follow a variable name or index expression",
            )
            .with_span(span));
        };

        let rest = self.lex_span(span.end, end, depth, Vec::new())?;
        let target_start = tokens.first().map_or(span.start, |t| t.span.start);
        let mut out = vec![Token::new(TokenKind::Assign(target), target_start..span.end)];

        match op {
            None => out.extend(rest),
            Some(op) => {
                let rest_span = match (rest.first(), rest.last()) {
                    (Some(first), Some(last)) => first.span.start..last.span.end,
                    _ => span.end..end,
                };
                out.extend(tokens);
                out.push(Token::new(TokenKind::Binary(op), span));
                out.push(Token::new(TokenKind::Paren(rest), rest_span));
            }
        }
        Ok(out)
    }
}

fn expect_value_before(tokens: &[Token], span: &Range<usize>) -> CompileResult<()> {
    match tokens.last() {
        Some(token) if token.is_value() => Ok(()),
        _ => Err(CompileError::lexical("expected a value before this operator").with_span(span.clone())),
    }
}

fn binary_op(lexeme: &Lexeme) -> BinOp {
    match lexeme {
        Lexeme::And => BinOp::And,
        Lexeme::Or => BinOp::Or,
        Lexeme::Xor => BinOp::Xor,
        Lexeme::Star => BinOp::Mul,
        Lexeme::Power => BinOp::Pow,
        Lexeme::Slash => BinOp::Div,
        Lexeme::SlashSlash => BinOp::FloorDiv,
        Lexeme::Percent => BinOp::Mod,
        Lexeme::Less => BinOp::Less,
        Lexeme::LessEq => BinOp::LessEq,
        Lexeme::Greater => BinOp::Greater,
        Lexeme::GreaterEq => BinOp::GreaterEq,
        Lexeme::EqEq => BinOp::Eq,
        _ => BinOp::NotEq,
    }
}

/// Splits a bracket payload at its top-level commas.
pub fn split_arguments(tokens: Vec<Token>, span: &Range<usize>) -> CompileResult<Vec<Vec<Token>>> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let mut args = vec![Vec::new()];
    for token in tokens {
        if token.kind == TokenKind::Comma {
            args.push(Vec::new());
        } else if let Some(current) = args.last_mut() {
            current.push(token);
        }
    }
    if args.iter().any(Vec::is_empty) {
        return Err(CompileError::syntax("empty argument in list").with_span(span.clone()));
    }
    Ok(args)
}
