use super::*;
use crate::error::ErrorKind;

#[test]
fn test_mixed_arithmetic_promotes_to_real() {
    let resolved = catalog()
        .resolve(Operator::Binary(BinOp::Add), &[Type::Int, Type::Real])
        .unwrap();
    assert_eq!(resolved.params, Some(vec![Type::Real, Type::Real]));
    assert_eq!(resolved.result, Some(Type::Real));
    assert_eq!(resolved.lowering, Lowering::Arithmetic(BinOp::Add));
}

#[test]
fn test_cheapest_signature_wins() {
    // Bool Bool reaches Int Int at cost 2 and Real Real at cost 4
    let resolved = catalog()
        .resolve(Operator::Binary(BinOp::Add), &[Type::Bool, Type::Bool])
        .unwrap();
    assert_eq!(resolved.result, Some(Type::Int));

    let resolved = catalog()
        .resolve(Operator::Binary(BinOp::Less), &[Type::Bool, Type::Real])
        .unwrap();
    assert_eq!(resolved.params, Some(vec![Type::Real, Type::Real]));
    assert_eq!(resolved.result, Some(Type::Bool));
}

#[test]
fn test_true_division_is_real_only() {
    let resolved = catalog()
        .resolve(Operator::Binary(BinOp::Div), &[Type::Int, Type::Int])
        .unwrap();
    assert_eq!(resolved.result, Some(Type::Real));

    let resolved = catalog()
        .resolve(Operator::Binary(BinOp::FloorDiv), &[Type::Int, Type::Int])
        .unwrap();
    assert_eq!(resolved.result, Some(Type::Int));
}

#[test]
fn test_no_matching_signature() {
    let err = catalog()
        .resolve(Operator::Binary(BinOp::And), &[Type::Real, Type::Bool])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);

    let err = catalog()
        .resolve(Operator::Unary(UnaryOp::Minus), &[Type::array_of(Type::Int)])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_indexing_is_per_element_type() {
    let resolved = catalog()
        .resolve(Operator::Index, &[Type::array_of(Type::Real), Type::Bool])
        .unwrap();
    assert_eq!(resolved.result, Some(Type::Real));
    assert_eq!(
        resolved.params,
        Some(vec![Type::array_of(Type::Real), Type::Int])
    );
}

#[test]
fn test_untyped_builtins_skip_resolution() {
    let resolved = catalog()
        .resolve(Operator::Print, &[Type::Bool])
        .unwrap();
    assert_eq!(resolved.lowering, Lowering::Print);
    assert_eq!(resolved.params, None);
    assert_eq!(resolved.result, None);
}

#[test]
fn test_tie_is_an_error() {
    let mut catalog = Catalog::new();
    let op = Operator::Binary(BinOp::Add);
    catalog.register(op, vec![Type::Int, Type::Real], Type::Real, Lowering::Arithmetic(BinOp::Add));
    catalog.register(op, vec![Type::Real, Type::Int], Type::Real, Lowering::Arithmetic(BinOp::Add));

    let err = catalog.resolve(op, &[Type::Int, Type::Int]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("ambiguous"));

    // an exact match is cheaper than either, so there is no tie
    catalog.register(op, vec![Type::Int, Type::Int], Type::Int, Lowering::Arithmetic(BinOp::Add));
    let resolved = catalog.resolve(op, &[Type::Int, Type::Int]).unwrap();
    assert_eq!(resolved.result, Some(Type::Int));
}

#[test]
fn test_tie_only_counts_at_the_minimum() {
    let mut catalog = Catalog::new();
    let op = Operator::Binary(BinOp::Mul);
    catalog.register(op, vec![Type::Real, Type::Real], Type::Real, Lowering::Arithmetic(BinOp::Mul));
    catalog.register(op, vec![Type::Real, Type::Real], Type::Real, Lowering::Arithmetic(BinOp::Mul));
    catalog.register(op, vec![Type::Int, Type::Int], Type::Int, Lowering::Arithmetic(BinOp::Mul));
    assert!(catalog.resolve(op, &[Type::Int, Type::Int]).is_ok());
}

#[test]
fn test_resolution_is_stable() {
    let first = catalog()
        .resolve(Operator::Binary(BinOp::Eq), &[Type::Int, Type::Bool])
        .unwrap();
    for _ in 0..10 {
        let again = catalog()
            .resolve(Operator::Binary(BinOp::Eq), &[Type::Int, Type::Bool])
            .unwrap();
        assert_eq!(again, first);
    }
    assert_eq!(first.params, Some(vec![Type::Int, Type::Int]));
}

#[test]
fn test_math_functions() {
    assert_eq!(MathFn::from_name("atan"), Some(MathFn::Atan));
    assert_eq!(MathFn::from_name("range"), None);
    let resolved = catalog()
        .resolve(Operator::Math(MathFn::Sin), &[Type::Int])
        .unwrap();
    assert_eq!(resolved.params, Some(vec![Type::Real]));
    assert!(
        catalog()
            .resolve(Operator::Math(MathFn::Atan2), &[Type::Real])
            .is_err()
    );
}
