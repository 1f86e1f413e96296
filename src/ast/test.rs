use super::*;
use crate::config::Options;
use crate::error::ErrorKind;
use crate::lexer::{BinOp, lex};
use crate::session::{Session, Signature, Variable};

fn session() -> Session {
    let mut session = Session::new(Options::default());
    session.insert_global(
        "x",
        Variable {
            ty: Type::Int,
            alloc: None,
        },
    );
    session.insert_global(
        "r",
        Variable {
            ty: Type::Real,
            alloc: None,
        },
    );
    session.insert_global(
        "arr",
        Variable {
            ty: Type::array_of(Type::Real),
            alloc: Some(0),
        },
    );
    session.insert_function(
        "twice",
        Signature {
            symbol: "fn_twice".to_string(),
            params: vec![("n".to_string(), Type::Real)],
            returns: Type::Real,
        },
    );
    session
}

fn build(line: &str) -> CompileResult<Ast> {
    let mut session = session();
    let module = Module::new(&mut session, "test");
    let tokens = lex(line)?;
    AstBuilder::new(&module).build(&tokens)
}

fn parse(line: &str) -> Ast {
    match build(line) {
        Ok(ast) => ast,
        Err(e) => panic!("{:?} failed: {}", line, e),
    }
}

fn error_kind(line: &str) -> ErrorKind {
    match build(line) {
        Ok(ast) => panic!("{:?} built:\n{}", line, ast.dump()),
        Err(e) => e.kind,
    }
}

fn root(ast: &Ast) -> &Node {
    ast.node(ast.root())
}

fn child(ast: &Ast, node: &Node, idx: usize) -> Node {
    ast.node(node.children[idx]).clone()
}

#[test]
fn test_multiplication_binds_tighter() {
    let ast = parse("1 + 2 * 3");
    let top = root(&ast);
    assert_eq!(top.kind, NodeKind::Builtin(Operator::Binary(BinOp::Add)));
    assert_eq!(top.ty, Some(Type::Int));
    assert_eq!(
        child(&ast, top, 1).kind,
        NodeKind::Builtin(Operator::Binary(BinOp::Mul))
    );
}

#[test]
fn test_left_associative_levels_split_at_rightmost_operator() {
    let ast = parse("8 - 4 - 2");
    let top = root(&ast);
    assert_eq!(
        child(&ast, top, 0).kind,
        NodeKind::Builtin(Operator::Binary(BinOp::Sub))
    );
    assert_eq!(child(&ast, top, 1).kind, NodeKind::Literal(Literal::Int(2)));
}

#[test]
fn test_power_is_right_associative() {
    let ast = parse("2. ** 3. ** 2.");
    let top = root(&ast);
    assert_eq!(top.lowering, Lowering::Power);
    assert_eq!(child(&ast, top, 0).kind, NodeKind::Literal(Literal::Real(2.0)));
    assert_eq!(child(&ast, top, 1).lowering, Lowering::Power);
}

#[test]
fn test_unary_minus_binds_tighter_than_power() {
    let ast = parse("-r ** 2.");
    let top = root(&ast);
    assert_eq!(top.lowering, Lowering::Power);
    assert_eq!(child(&ast, top, 0).lowering, Lowering::Negate);
}

#[test]
fn test_operands_are_widened_to_the_cheapest_overload() {
    let ast = parse("x + r");
    let top = root(&ast);
    assert_eq!(top.ty, Some(Type::Real));
    assert_eq!(
        child(&ast, top, 0).kind,
        NodeKind::Convert(ConversionRule::IntToReal)
    );
    assert_eq!(child(&ast, top, 1).kind, NodeKind::Load { name: "r".into() });

    // only Real division exists
    let ast = parse("7 / 2");
    assert_eq!(root(&ast).ty, Some(Type::Real));

    let ast = parse("True < 3.2");
    let top = root(&ast);
    assert_eq!(top.ty, Some(Type::Bool));
    assert_eq!(
        child(&ast, top, 0).kind,
        NodeKind::Convert(ConversionRule::BoolToReal)
    );
}

#[test]
fn test_children_precede_parents() {
    let ast = parse("twice(x) * (r - 1) + arr[2]");
    for (id, node) in ast.nodes().iter().enumerate() {
        assert!(node.children.iter().all(|c| *c < id), "node {}", id);
    }
    assert_eq!(ast.root(), ast.len() - 1);
}

#[test]
fn test_assignment_declares_or_converts() {
    let ast = parse("y = 3");
    assert_eq!(
        root(&ast).kind,
        NodeKind::Assign {
            name: "y".into(),
            declare: true
        }
    );
    assert_eq!(root(&ast).ty, None);

    let ast = parse("r = 3");
    let top = root(&ast);
    assert_eq!(
        top.kind,
        NodeKind::Assign {
            name: "r".into(),
            declare: false
        }
    );
    assert_eq!(
        child(&ast, top, 0).kind,
        NodeKind::Convert(ConversionRule::IntToReal)
    );

    // Real -> Int needs Int(...)
    assert_eq!(error_kind("x = 2.5"), ErrorKind::Type);
    let ast = parse("x = Int(2.5)");
    assert_eq!(
        child(&ast, root(&ast), 0).kind,
        NodeKind::Convert(ConversionRule::RealToInt)
    );
}

#[test]
fn test_compound_assignment() {
    let ast = parse("r += 1");
    let top = root(&ast);
    let value = child(&ast, top, 0);
    assert_eq!(value.kind, NodeKind::Builtin(Operator::Binary(BinOp::Add)));
    assert_eq!(value.ty, Some(Type::Real));
}

#[test]
fn test_index_assignment() {
    let ast = parse("arr[1] = 4");
    let top = root(&ast);
    assert_eq!(top.lowering, Lowering::IndexAssign);
    assert_eq!(top.children.len(), 3);
    assert_eq!(
        child(&ast, top, 2).kind,
        NodeKind::Convert(ConversionRule::IntToReal)
    );
    assert_eq!(error_kind("x[1] = 4"), ErrorKind::Type);
}

#[test]
fn test_arrays() {
    let ast = parse("Int[x * 2]");
    assert_eq!(root(&ast).lowering, Lowering::CreateArray);
    assert_eq!(root(&ast).ty, Some(Type::array_of(Type::Int)));

    let ast = parse("[1, 2., True]");
    let top = root(&ast);
    assert_eq!(top.ty, Some(Type::array_of(Type::Real)));
    assert_eq!(
        child(&ast, top, 2).kind,
        NodeKind::Convert(ConversionRule::BoolToReal)
    );

    let ast = parse("[True, False][1]");
    assert_eq!(root(&ast).lowering, Lowering::IndexLoad);
    assert_eq!(root(&ast).ty, Some(Type::Bool));
}

#[test]
fn test_calls() {
    let ast = parse("twice(x)");
    let top = root(&ast);
    assert_eq!(
        top.kind,
        NodeKind::Call {
            name: "twice".into(),
            symbol: "fn_twice".into()
        }
    );
    assert_eq!(top.ty, Some(Type::Real));

    let ast = parse("atan2(x, 1)");
    assert_eq!(root(&ast).lowering, Lowering::Math(MathFn::Atan2));

    assert_eq!(error_kind("twice(1, 2)"), ErrorKind::Type);
    assert_eq!(error_kind("nope(1)"), ErrorKind::Semantic);
    assert_eq!(error_kind("range(3)"), ErrorKind::Syntax);
    assert_eq!(error_kind("Int(1, 2)"), ErrorKind::Type);
    assert_eq!(error_kind("sin(arr)"), ErrorKind::Type);
}

#[test]
fn test_free_needs_an_owner() {
    let ast = parse("free(arr)");
    assert_eq!(root(&ast).kind, NodeKind::Free { name: "arr".into() });
    assert_eq!(error_kind("free(x)"), ErrorKind::Resource);
    assert_eq!(error_kind("free(missing)"), ErrorKind::Semantic);
    assert_eq!(error_kind("free(arr[1])"), ErrorKind::Syntax);
}

#[test]
fn test_print() {
    let ast = parse("print x + 1");
    assert_eq!(root(&ast).kind, NodeKind::Print);
    assert_eq!(root(&ast).ty, None);
    assert_eq!(error_kind("print arr"), ErrorKind::Type);
    // print must start the statement
    assert_eq!(error_kind("print print 1"), ErrorKind::Syntax);
}

#[test]
fn test_long_operator_chains() {
    let line = format!("x{}", " + 1".repeat(5_000));
    let ast = parse(&line);
    let top = root(&ast);
    assert_eq!(top.kind, NodeKind::Builtin(Operator::Binary(BinOp::Add)));
    assert_eq!(top.ty, Some(Type::Int));
    assert_eq!(child(&ast, top, 1).kind, NodeKind::Literal(Literal::Int(1)));
    assert_eq!(ast.len(), 10_001);

    let ast = parse(&format!("y = x{}", " - 2 * x".repeat(2_000)));
    assert!(matches!(root(&ast).kind, NodeKind::Assign { .. }));

    // right-associative chains still recurse and are bounded
    let line = format!("2.{}", " ** 2.".repeat(5_000));
    assert_eq!(error_kind(&line), ErrorKind::Syntax);
    let line = format!("{}1", "- ".repeat(5_000));
    assert_eq!(error_kind(&line), ErrorKind::Syntax);
}

#[test]
fn test_rejected_expressions() {
    assert_eq!(error_kind("1 2"), ErrorKind::Syntax);
    assert_eq!(error_kind("x3 = 2.43 a"), ErrorKind::Syntax);
    assert_eq!(error_kind("undefined_name"), ErrorKind::Semantic);
    assert_eq!(error_kind("True + arr"), ErrorKind::Type);
}

#[test]
fn test_build_as_casts_the_root() {
    let mut session = session();
    let module = Module::new(&mut session, "test");
    let tokens = lex("x").unwrap();
    let ast = AstBuilder::new(&module).build_as(&tokens, &Type::Bool).unwrap();
    assert_eq!(root(&ast).kind, NodeKind::Convert(ConversionRule::IntToBool));

    let tokens = lex("r").unwrap();
    let err = AstBuilder::new(&module)
        .build_as(&tokens, &Type::Bool)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_dump_indents_children() {
    let ast = parse("1 + 2");
    let dump = ast.dump();
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines, vec!["+ : Int", "  1 : Int", "  2 : Int"]);
}
