// tests/value_proptests.rs

//! Property-based tests for value coercion, equality and hashing.

mod test_utils;

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use linaro::Value;
use proptest::prelude::*;
use test_utils::*;

// --- Strategies ---

fn arb_finite() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("must be finite", |f| f.is_finite())
}

/// Scalars plus short strings, numeric and not.
fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        arb_finite().prop_map(Value::Number),
        (-3i32..3).prop_map(|n| Value::Number(n as f64)),
        any::<bool>().prop_map(Value::Boolean),
        Just(Value::Noll),
        "[a-c0-2]{0,3}".prop_map(|s| Value::string(&s)),
    ]
}

fn hash_of(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn noll_propagates_through_arithmetic(v in arb_value()) {
        prop_assert!(Value::Noll.add(&v).is_noll());
        prop_assert!(v.add(&Value::Noll).is_noll());
        prop_assert!(v.sub(&Value::Noll).is_noll());
        prop_assert!(Value::Noll.mul(&v).is_noll());
        prop_assert!(v.div(&Value::Noll).is_noll());
        prop_assert!(Value::Noll.pow(&v).is_noll());
    }

    #[test]
    fn strict_equality_implies_loose_equality(a in arb_value(), b in arb_value()) {
        if Value::strict_equals(&a, &b) {
            prop_assert!(Value::equal(&a, &b));
            prop_assert_eq!(a.type_name(), b.type_name());
        }
    }

    #[test]
    fn strictly_equal_values_hash_equal(a in arb_value(), b in arb_value()) {
        if Value::strict_equals(&a, &b) {
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }
    }

    #[test]
    fn equality_is_symmetric(a in arb_value(), b in arb_value()) {
        prop_assert_eq!(Value::equal(&a, &b), Value::equal(&b, &a));
    }

    #[test]
    fn printed_numbers_read_back(f in arb_finite()) {
        let text = Value::Number(f).to_string();
        prop_assert_eq!(Value::string(&text).as_number(), f);
    }

    #[test]
    fn numeric_compare_matches_f64(a in arb_finite(), b in arb_finite()) {
        prop_assert_eq!(Value::compare(&Value::Number(a), &Value::Number(b)), a.partial_cmp(&b));
    }

    #[test]
    fn noll_orders_below_positive_numbers(f in 1e-9f64..1e9) {
        prop_assert_eq!(Value::compare(&Value::Noll, &Value::Number(f)), Some(Ordering::Less));
    }

    #[test]
    fn arrays_coerce_through_first_element(first in arb_finite(), rest in prop::collection::vec(arb_finite(), 0..4)) {
        let mut values = vec![Value::Number(first)];
        values.extend(rest.into_iter().map(Value::Number));
        let array = Value::array(values);
        prop_assert_eq!(array.as_number(), first);
        prop_assert_eq!(array.as_boolean(), first != 0.0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn addition_end_to_end(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        let output = run_ok(&format!("x = {}\ny = {}\nprint x + y", a, b));
        prop_assert_eq!(output, format!("{}\n", a + b));
    }

    #[test]
    fn comparison_end_to_end(a in -100i64..100, b in -100i64..100) {
        let output = run_ok(&format!("print {} < {}", a, b));
        prop_assert_eq!(output, format!("{}\n", a < b));
    }
}
