use super::*;

#[test]
fn test_cast_costs_follow_casting_lists() {
    assert_eq!(Type::Int.cast_cost(&Type::Int), Some(0));
    assert_eq!(Type::Int.cast_cost(&Type::Real), Some(1));
    assert_eq!(Type::Bool.cast_cost(&Type::Real), Some(2));
    assert_eq!(Type::Real.cast_cost(&Type::Int), None);
    // Int -> Bool converts, but overloads never pick it
    assert_eq!(Type::Int.cast_cost(&Type::Bool), None);
}

#[test]
fn test_array_casts_only_to_itself() {
    let ints = Type::array_of(Type::Int);
    assert_eq!(ints.cast_cost(&ints), Some(0));
    assert_eq!(ints.cast_cost(&Type::array_of(Type::Real)), None);
    assert_eq!(ints.conversion(&Type::Int), None);
}

#[test]
fn test_explicit_only_conversions() {
    let to_int = Type::Real.conversion(&Type::Int).unwrap();
    assert!(to_int.explicit);
    assert_eq!(to_int.rule, ConversionRule::RealToInt);

    let to_bool = Type::Int.conversion(&Type::Bool).unwrap();
    assert!(!to_bool.explicit);
    assert_eq!(to_bool.rule, ConversionRule::IntToBool);

    assert!(Type::Real.conversion(&Type::Bool).unwrap().explicit);
}

#[test]
fn test_sizes_and_representation() {
    assert_eq!(Type::Real.size(), 8);
    assert_eq!(Type::Int.size(), 4);
    assert_eq!(Type::Bool.size(), 1);
    assert_eq!(Type::array_of(Type::Bool).size(), 8);
    assert_eq!(Type::Int.ir_type(), IRType::I32);
    assert_eq!(Type::array_of(Type::Real).ir_type(), IRType::Ptr);
}

#[test]
fn test_names() {
    assert_eq!(Type::from_name("Real"), Some(Type::Real));
    assert_eq!(Type::from_name("real"), None);
    assert_eq!(Type::array_of(Type::Int).to_string(), "Int[]");
    assert_eq!(signature(&[Type::Int, Type::Real]), "Int Real");
}
