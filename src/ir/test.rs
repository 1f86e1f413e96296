use super::builder::{FMT_INT, IRBuilder};
use super::*;
use crate::ast::AstBuilder;
use crate::config::Options;
use crate::lexer::lex;
use crate::module::{Module, Ownership};
use crate::session::{Session, Variable};

fn emit_lines(module: &mut Module<'_>, out: &mut Stream, lines: &[&str]) {
    for line in lines {
        let tokens = lex(line).unwrap();
        let ast = AstBuilder::new(module).build(&tokens).unwrap();
        IRBuilder::new(module, out).emit(&ast).unwrap();
    }
}

fn compile(session: &mut Session, lines: &[&str]) -> (Vec<Instruction>, Vec<Declaration>) {
    let mut module = Module::new(session, "test");
    let mut out = Stream::new();
    emit_lines(&mut module, &mut out, lines);
    let instructions = out.instructions().cloned().collect();
    (instructions, module.declarations().to_vec())
}

fn count(instructions: &[Instruction], pred: impl Fn(&Instruction) -> bool) -> usize {
    instructions.iter().filter(|i| pred(i)).count()
}

#[test]
fn test_top_level_assignment_defines_a_global() {
    let mut session = Session::new(Options::default());
    let (instructions, declarations) = compile(&mut session, &["x = 3"]);

    assert_eq!(
        declarations,
        vec![Declaration::Global {
            name: "usr_x".into(),
            ty: IRType::I32,
            init: Some(Constant::Int(0)),
        }]
    );
    assert_eq!(
        instructions,
        vec![Instruction::Store {
            value: Value::Constant(Constant::Int(3)),
            ptr: Value::Global("usr_x".into()),
            ty: IRType::I32,
        }]
    );
    assert_eq!(session.global("x").map(|v| v.ty.clone()), Some(Type::Int));
}

#[test]
fn test_earlier_globals_are_declared_external() {
    let mut session = Session::new(Options::default());
    session.insert_global(
        "y",
        Variable {
            ty: Type::Real,
            alloc: None,
        },
    );
    let (instructions, declarations) = compile(&mut session, &["y + 1"]);

    assert_eq!(
        declarations,
        vec![Declaration::Global {
            name: "usr_y".into(),
            ty: IRType::F64,
            init: None,
        }]
    );
    assert!(matches!(
        instructions.last(),
        Some(Instruction::Binary {
            op: BinaryOp::FAdd,
            ..
        })
    ));
}

#[test]
fn test_print_declares_its_runtime() {
    let mut session = Session::new(Options::default());
    let (instructions, declarations) = compile(&mut session, &["print True", "print 2"]);

    let names: Vec<&str> = declarations.iter().map(Declaration::name).collect();
    assert_eq!(names, vec!["printf", "fflush", FMT_INT]);
    assert!(matches!(
        declarations[0],
        Declaration::Function { variadic: true, .. }
    ));
    assert_eq!(
        declarations[2],
        Declaration::Text {
            name: FMT_INT.into(),
            text: "%i\n".into()
        }
    );
    // Bool is widened before reaching printf
    assert!(matches!(
        instructions[0],
        Instruction::Cast {
            op: CastOp::ZExt,
            ..
        }
    ));
    let calls = count(&instructions, |i| matches!(i, Instruction::Call { .. }));
    assert_eq!(calls, 4);
}

#[test]
fn test_floored_integer_division() {
    let mut session = Session::new(Options::default());
    let (instructions, _) = compile(&mut session, &["7 // 2"]);

    let ops: Vec<BinaryOp> = instructions
        .iter()
        .filter_map(|i| match i {
            Instruction::Binary { op, .. } => Some(*op),
            _ => None,
        })
        .collect();
    assert!(ops.contains(&BinaryOp::SRem));
    assert!(ops.contains(&BinaryOp::SDiv));
    assert_eq!(ops.last(), Some(&BinaryOp::Sub));
}

#[test]
fn test_real_operations_call_libm() {
    let mut session = Session::new(Options::default());
    let (instructions, declarations) = compile(&mut session, &["2. ** 3", "sin(1.) // 1."]);

    let called: Vec<&str> = instructions
        .iter()
        .filter_map(|i| match i {
            Instruction::Call { func, .. } => Some(func.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(called, vec!["llvm.pow.f64", "sin", "llvm.floor.f64"]);
    assert_eq!(declarations.len(), 3);
}

#[test]
fn test_bool_comparisons_are_unsigned() {
    let mut session = Session::new(Options::default());
    let (instructions, _) = compile(&mut session, &["True > False", "1 > 2"]);

    let conds: Vec<ICmpCond> = instructions
        .iter()
        .filter_map(|i| match i {
            Instruction::ICmp { cond, .. } => Some(*cond),
            _ => None,
        })
        .collect();
    assert_eq!(conds, vec![ICmpCond::Ugt, ICmpCond::Sgt]);
}

#[test]
fn test_array_assignment_transfers_ownership() {
    let mut session = Session::new(Options::default());
    let (instructions, _) = compile(&mut session, &["a = [1, 2]"]);

    assert!(instructions.contains(&Instruction::Malloc {
        dest: "reg_1".into(),
        ty: IRType::I32,
        count: Value::Constant(Constant::Int(2)),
    }));
    let id = session.global("a").and_then(|v| v.alloc).unwrap();
    let allocation = session.ledger().get(id).unwrap();
    assert!(matches!(
        &allocation.ownership,
        Ownership::User { variable, .. } if variable == "a"
    ));
}

#[test]
fn test_reassignment_frees_the_previous_array() {
    let mut session = Session::new(Options::default());
    let (instructions, _) = compile(&mut session, &["a = Real[4]", "a = Real[8]"]);

    assert_eq!(session.ledger().len(), 1);
    let current = session.global("a").and_then(|v| v.alloc).unwrap();
    assert_eq!(current, 1);
    // each statement clears its slot and releases what `a` held before
    let frees = count(&instructions, |i| matches!(i, Instruction::Free { .. }));
    assert_eq!(frees, 4);
}

#[test]
fn test_temporaries_are_released_at_scope_end() {
    let mut session = Session::new(Options::default());
    let mut module = Module::new(&mut session, "test");
    let mut out = Stream::new();
    emit_lines(&mut module, &mut out, &["[1., 2.][0]"]);
    module.end_scope(&mut out);
    drop(module);

    assert!(session.ledger().is_empty());
}

#[test]
fn test_free_statement() {
    let mut session = Session::new(Options::default());
    let (instructions, _) = compile(&mut session, &["b = Bool[3]", "free(b)"]);

    assert!(session.ledger().is_empty());
    assert_eq!(session.global("b").and_then(|v| v.alloc), None);
    assert_eq!(
        instructions.last(),
        Some(&Instruction::Store {
            value: Value::Constant(Constant::Null),
            ptr: Value::Global("usr_b".into()),
            ty: IRType::Ptr,
        })
    );
}

#[test]
fn test_stream_keeps_the_first_terminator() {
    let mut stream = Stream::new();
    stream.set_terminator(Terminator::Br {
        label: "then".into(),
    });
    stream.set_terminator(Terminator::Ret { value: None });
    assert_eq!(
        stream.blocks()[0].terminator,
        Some(Terminator::Br {
            label: "then".into()
        })
    );

    stream.start_block("then");
    stream.add_instruction(Instruction::Free {
        ptr: Value::Constant(Constant::Null),
    });
    assert_eq!(stream.blocks().len(), 2);
    assert_eq!(stream.blocks()[1].instructions.len(), 1);
}

#[test]
fn test_textual_form() {
    let add = Instruction::Binary {
        op: BinaryOp::Add,
        dest: "reg_0".into(),
        lhs: Value::Constant(Constant::Int(1)),
        rhs: Value::Register("reg_1".into()),
        ty: IRType::I32,
    };
    assert_eq!(add.to_string(), "  %reg_0 = add i32 1, %reg_1");

    let printf = Declaration::Function {
        name: "printf".into(),
        params: vec![IRType::Ptr],
        return_type: IRType::I32,
        variadic: true,
    };
    assert_eq!(printf.to_string(), "declare i32 @printf(ptr, ...)");

    let global = Declaration::Global {
        name: "usr_x".into(),
        ty: IRType::F64,
        init: None,
    };
    assert_eq!(global.to_string(), "@usr_x = external global double");

    let ret = Terminator::Ret {
        value: Some((IRType::F64, Value::Constant(Constant::Real(1.0)))),
    };
    assert_eq!(ret.to_string(), "  ret double 1.0");
}
