use super::*;
use crate::config::Options;
use crate::error::ErrorKind;

fn frees(out: &Stream) -> usize {
    out.instructions()
        .filter(|i| matches!(i, Instruction::Free { .. }))
        .count()
}

#[test]
fn test_identifiers() {
    assert!(is_identifier("x"));
    assert!(is_identifier("_tmp2"));
    assert!(is_identifier("piApprox"));
    assert!(!is_identifier("2x"));
    assert!(!is_identifier("a-b"));
    assert!(!is_identifier(""));
}

#[test]
fn test_variable_symbols() {
    assert_eq!(variable_symbol("total"), "usr_total");
    assert_eq!(function_symbol("mean"), "fn_mean");
}

#[test]
fn test_ledger_scopes() {
    let mut ledger = Ledger::new();
    let temp = ledger.record(Scope::TopLevel, Value::Register("alloc_0".into()));
    let held = ledger.record(Scope::TopLevel, Value::Register("alloc_1".into()));
    let local = ledger.record(Scope::Function, Value::Register("alloc_2".into()));
    ledger
        .transfer(held, "a", Value::Global("usr_a".into()), Scope::TopLevel)
        .unwrap();
    ledger
        .transfer(local, "b", Value::Register("usr_b".into()), Scope::Function)
        .unwrap();

    // a second transfer of the same allocation is rejected
    let err = ledger
        .transfer(held, "c", Value::Global("usr_c".into()), Scope::TopLevel)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Resource);

    let released: Vec<AllocId> = ledger
        .drain_scope(Scope::Function)
        .iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(released, vec![local]);

    let released: Vec<AllocId> = ledger
        .drain_scope(Scope::TopLevel)
        .iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(released, vec![temp]);
    assert!(ledger.contains(held));

    assert_eq!(ledger.remove(held).unwrap().id, held);
    assert_eq!(ledger.remove(held).unwrap_err().kind, ErrorKind::Resource);
    assert!(ledger.is_empty());
}

#[test]
fn test_variable_names_are_checked() {
    let mut session = Session::new(Options::default());
    let mut module = Module::new(&mut session, "test");
    let mut out = Stream::new();

    for name in ["Int", "3d", "a.b"] {
        let err = module.new_variable(&mut out, name, &Type::Int).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Semantic, "{}", name);
    }

    module.new_variable(&mut out, "v", &Type::Real).unwrap();
    let err = module.new_variable(&mut out, "v", &Type::Int).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);
}

#[test]
fn test_locals_live_in_function_scope() {
    let mut session = Session::new(Options::default());
    let mut module = Module::new(&mut session, "test");
    let mut out = Stream::new();
    module.new_variable(&mut out, "g", &Type::Int).unwrap();

    module.begin_function();
    assert_eq!(module.scope(), Scope::Function);
    let mut body = Stream::new();
    // a local may shadow a global
    let local = module.new_variable(&mut body, "g", &Type::Real).unwrap();
    assert!(!local.global);
    assert_eq!(local.ptr, Value::Register("usr_g".into()));
    assert_eq!(
        body.instructions().next(),
        Some(&Instruction::Alloca {
            dest: "usr_g".into(),
            ty: IRType::F64,
        })
    );
    assert_eq!(module.lookup("g").map(|v| v.ty.clone()), Some(Type::Real));

    module.end_function(Function {
        name: "fn_f".into(),
        params: Vec::new(),
        return_type: IRType::Void,
        blocks: body.into_blocks(),
    });
    assert_eq!(module.scope(), Scope::TopLevel);
    assert_eq!(module.lookup("g").map(|v| v.ty.clone()), Some(Type::Int));

    module.push_function(Function {
        name: "main".into(),
        params: Vec::new(),
        return_type: IRType::I32,
        blocks: Stream::new().into_blocks(),
    });

    let unit = module.into_unit(None);
    let names: Vec<&str> = unit.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["fn_f", "main"]);
}

#[test]
fn test_globals_of_earlier_units_are_declared_once() {
    let mut session = Session::new(Options::default());
    session.insert_global(
        "old",
        Variable {
            ty: Type::Bool,
            alloc: None,
        },
    );
    let mut module = Module::new(&mut session, "test");

    let var = module.get_variable("old").unwrap();
    assert!(var.global);
    module.get_variable("old").unwrap();
    assert_eq!(
        module.declarations(),
        &[Declaration::Global {
            name: "usr_old".into(),
            ty: IRType::I1,
            init: None,
        }]
    );
    assert!(module.get_variable("missing").is_none());
}

#[test]
fn test_allocation_lifecycle() {
    let mut session = Session::new(Options::default());
    let mut module = Module::new(&mut session, "test");
    let mut out = Stream::new();

    let (_, temp) = module.allocate(&mut out, &Type::Real, Value::Constant(Constant::Int(4)));
    let (_, held) = module.allocate(&mut out, &Type::Int, Value::Constant(Constant::Int(2)));
    assert!(module.is_fresh(temp));

    let var = module
        .new_variable(&mut out, "arr", &Type::array_of(Type::Int))
        .unwrap();
    module
        .mark_ownership_transferred(&mut out, held, &var)
        .unwrap();
    assert!(!module.is_fresh(held));
    assert_eq!(module.lookup("arr").and_then(|v| v.alloc), Some(held));

    let before = frees(&out);
    module.end_scope(&mut out);
    assert_eq!(frees(&out), before + 1);

    module.end_program(&mut out);
    assert_eq!(frees(&out), before + 2);
    drop(module);
    assert!(session.ledger().is_empty());
}

#[test]
fn test_function_scope_releases_everything_it_made() {
    let mut session = Session::new(Options::default());
    let mut module = Module::new(&mut session, "test");
    module.begin_function();
    let mut body = Stream::new();

    let (_, id) = module.allocate(&mut body, &Type::Real, Value::Constant(Constant::Int(3)));
    let var = module
        .new_variable(&mut body, "local", &Type::array_of(Type::Real))
        .unwrap();
    module.mark_ownership_transferred(&mut body, id, &var).unwrap();

    module.end_scope(&mut body);
    drop(module);
    assert!(session.ledger().is_empty());
}

#[test]
fn test_functions_are_defined_once() {
    let mut session = Session::new(Options::default());
    let mut module = Module::new(&mut session, "test");

    let signature = module
        .register_function("f", vec![("n".into(), Type::Int)], Type::Real)
        .unwrap();
    assert_eq!(signature.symbol, "fn_f");
    let err = module
        .register_function("f", Vec::new(), Type::Int)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);

    // calls inside the defining unit never need a declaration
    module.ensure_declared(Declaration::Function {
        name: "fn_f".into(),
        params: vec![IRType::I32],
        return_type: IRType::F64,
        variadic: false,
    });
    assert!(module.declarations().is_empty());
    drop(module);
    assert!(session.function("f").is_some());
}

#[test]
fn test_counters() {
    let mut session = Session::new(Options::default());
    let mut module = Module::new(&mut session, "test");
    assert_eq!(module.new_register(), "reg_0");
    assert_eq!(module.new_register(), "reg_1");
    assert_eq!(module.new_block_id(), 0);
    assert_eq!(module.new_block_id(), 1);
}
