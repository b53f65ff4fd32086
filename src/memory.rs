// src/memory.rs

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use paste::paste;

use crate::vm::closure::Closure;
use crate::vm::function::Function;

// --- Core Data Structures ---

/// The universal runtime datum.
#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    Boolean(bool),
    Noll,
    Object(Object),
}

/// Heap payloads. Each variant is a shared handle; cloning a `Value` clones the handle,
/// and the payload lives until the last handle is dropped.
#[derive(Debug, Clone)]
pub enum Object {
    String(Rc<str>),
    Array(Rc<RefCell<Array>>),
    Function(Rc<Function>),
    Closure(Rc<Closure>),
}

/// An associative array. `[a, b]` literals are keyed `0, 1, ...`; any value may be used as a key.
/// Entries keep insertion order, which is also the order used for printing and hashing.
#[derive(Debug, Clone, Default)]
pub struct Array {
    entries: Vec<(Value, Value)>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        let entries = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::Number(i as f64), v))
            .collect();
        Array { entries }
    }

    /// Missing keys read as `Noll`.
    pub fn get(&self, key: &Value) -> Value {
        self.entries
            .iter()
            .find(|(k, _)| Value::strict_equals(k, key))
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Noll)
    }

    /// Index of the entry stored under `key`.
    pub fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| Value::strict_equals(k, key))
    }

    /// Writes at a position found earlier by `position`, appending when there was none.
    /// Key comparison may display arrays, including this one, so it must not run under `borrow_mut`.
    pub fn store(&mut self, position: Option<usize>, key: Value, value: Value) {
        match position.and_then(|i| self.entries.get_mut(i)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Scalar coercions of an array forward to its element at key `0`.
    fn first(&self) -> Value {
        self.get(&Value::Number(0.0))
    }
}

/// Follows the key-`0` chain of nested arrays down to a non-array value.
/// `None` when the chain runs back into an array already visited.
fn scalar_of(array: &Rc<RefCell<Array>>) -> Option<Value> {
    let mut seen = vec![Rc::as_ptr(array)];
    let mut current = array.borrow().first();
    loop {
        let next = match &current {
            Value::Object(Object::Array(inner)) => inner.clone(),
            _ => return Some(current),
        };
        if seen.contains(&Rc::as_ptr(&next)) {
            return None;
        }
        seen.push(Rc::as_ptr(&next));
        current = next.borrow().first();
    }
}

// --- Constructors and variant checks ---

impl Value {
    pub fn string(s: &str) -> Value {
        Value::Object(Object::String(Rc::from(s)))
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Object(Object::Array(Rc::new(RefCell::new(Array::from_values(values)))))
    }

    pub fn function(function: Rc<Function>) -> Value {
        Value::Object(Object::Function(function))
    }

    pub fn closure(closure: Closure) -> Value {
        Value::Object(Object::Closure(Rc::new(closure)))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    pub fn is_noll(&self) -> bool {
        matches!(self, Value::Noll)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Noll => "null",
            Value::Object(Object::String(_)) => "string",
            Value::Object(Object::Array(_)) => "array",
            Value::Object(Object::Function(_)) => "function",
            Value::Object(Object::Closure(_)) => "closure",
        }
    }
}

macro_rules! object_accessors {
    ($(($variant:ident, $lower:ident, $payload:ty)),* $(,)?) => {
        paste! {
            impl Value {
                $(
                    pub fn [<is_ $lower>](&self) -> bool {
                        matches!(self, Value::Object(Object::$variant(_)))
                    }

                    pub fn [<as_ $lower>](&self) -> Option<&$payload> {
                        match self {
                            Value::Object(Object::$variant(inner)) => Some(inner),
                            _ => None,
                        }
                    }
                )*
            }
        }
    };
}

object_accessors! {
    (String, string, Rc<str>),
    (Array, array, Rc<RefCell<Array>>),
    (Function, function, Rc<Function>),
    (Closure, closure, Rc<Closure>),
}

// --- Conversions ---

impl Value {
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => if *b { 1.0 } else { 0.0 },
            Value::Noll => 0.0,
            Value::Object(obj) => obj.as_number(),
        }
    }

    /// Noll is falsy, a number only at exactly zero; objects decide for themselves.
    pub fn as_boolean(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Boolean(b) => *b,
            Value::Noll => false,
            Value::Object(obj) => obj.as_boolean(),
        }
    }

    pub fn can_be_number(&self) -> bool {
        match self {
            Value::Number(_) | Value::Boolean(_) => true,
            Value::Noll => false,
            Value::Object(obj) => obj.can_be_number(),
        }
    }
}

impl Object {
    fn as_number(&self) -> f64 {
        match self {
            Object::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            Object::Array(arr) => scalar_of(arr).map_or(f64::NAN, |v| v.as_number()),
            Object::Function(_) | Object::Closure(_) => f64::NAN,
        }
    }

    fn as_boolean(&self) -> bool {
        match self {
            Object::String(s) => !s.is_empty(),
            Object::Array(arr) => scalar_of(arr).map_or(true, |v| v.as_boolean()),
            Object::Function(_) | Object::Closure(_) => true,
        }
    }

    fn can_be_number(&self) -> bool {
        match self {
            Object::String(s) => s.trim().parse::<f64>().is_ok(),
            Object::Array(_) => true,
            Object::Function(_) | Object::Closure(_) => false,
        }
    }
}

// --- Equality ---

impl Value {
    fn number_equals(x: f64, y: f64) -> bool {
        !x.is_nan() && !y.is_nan() && x == y
    }

    /// Loose equality: numbers, booleans and numeric strings compare numerically,
    /// strings and arrays by their text, callables by identity.
    pub fn equal(lhs: &Value, rhs: &Value) -> bool {
        match (lhs, rhs) {
            (Value::Noll, Value::Noll) => true,
            (Value::Noll, _) | (_, Value::Noll) => false,
            (Value::Object(Object::Function(a)), Value::Object(Object::Function(b))) => Rc::ptr_eq(a, b),
            (Value::Object(Object::Closure(a)), Value::Object(Object::Closure(b))) => Rc::ptr_eq(a, b),
            (Value::Object(Object::Array(a)), Value::Object(Object::Array(b))) if Rc::ptr_eq(a, b) => true,
            (Value::Object(Object::Function(_) | Object::Closure(_)), _)
            | (_, Value::Object(Object::Function(_) | Object::Closure(_))) => false,
            (Value::Number(_) | Value::Boolean(_), _) | (_, Value::Number(_) | Value::Boolean(_)) => {
                Self::number_equals(lhs.as_number(), rhs.as_number())
            }
            _ => lhs.to_string() == rhs.to_string(),
        }
    }

    /// Equality that additionally requires identical type tags. Used for constant-pool reuse
    /// and array keys.
    pub fn strict_equals(lhs: &Value, rhs: &Value) -> bool {
        lhs.type_name() == rhs.type_name() && Self::equal(lhs, rhs)
    }

    /// `None` when the operands have no meaningful order.
    pub fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (lhs.as_string(), rhs.as_string()) {
            if !lhs.can_be_number() || !rhs.can_be_number() {
                return Some(a.cmp(b));
            }
        }
        if !lhs.can_be_number() && !rhs.can_be_number() {
            return None;
        }
        lhs.as_number().partial_cmp(&rhs.as_number())
    }
}

// --- Arithmetic ---
// Any operator with a Noll operand yields Noll: undefined propagates instead of failing.

macro_rules! numeric_binops {
    ($($name:ident => $op:expr),* $(,)?) => {
        impl Value {
            $(
                pub fn $name(&self, other: &Value) -> Value {
                    if self.is_noll() || other.is_noll() {
                        return Value::Noll;
                    }
                    let apply: fn(f64, f64) -> f64 = $op;
                    Value::Number(apply(self.as_number(), other.as_number()))
                }
            )*
        }
    };
}

numeric_binops! {
    sub => |a, b| a - b,
    mul => |a, b| a * b,
    div => |a, b| a / b,
    rem => |a, b| a % b,
    pow => f64::powf,
}

impl Value {
    /// Numeric addition, or concatenation of display forms when either side is a string.
    pub fn add(&self, other: &Value) -> Value {
        if self.is_noll() || other.is_noll() {
            return Value::Noll;
        }
        if self.is_string() || other.is_string() {
            let joined = format!("{}{}", self, other);
            return Value::string(&joined);
        }
        Value::Number(self.as_number() + other.as_number())
    }

    pub fn neg(&self) -> Value {
        if self.is_noll() {
            return Value::Noll;
        }
        Value::Number(-self.as_number())
    }

    /// Numeric `++`/`--`. Unlike `add`, never concatenates.
    pub fn step(&self, delta: f64) -> Value {
        if self.is_noll() {
            return Value::Noll;
        }
        Value::Number(self.as_number() + delta)
    }
}

// --- Hashing ---

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Number(n) => {
                // 0.0 and -0.0 compare equal, so they must hash equal.
                let n = if *n == 0.0 { 0.0 } else { *n };
                n.to_bits().hash(state);
            }
            Value::Boolean(b) => b.hash(state),
            Value::Noll => 0u8.hash(state),
            Value::Object(obj) => obj.hash(state),
        }
    }
}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Object::String(s) => s.hash(state),
            // Arrays that are not the same object compare by display form, so they hash by it too.
            Object::Array(_) => self.to_string().hash(state),
            Object::Function(function) => function.hash(state),
            Object::Closure(closure) => closure.function.hash(state),
        }
    }
}

// --- Display ---

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Noll => write!(f, "null"),
            Value::Object(obj) => write!(f, "{}", obj),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::String(s) => write!(f, "{}", s),
            Object::Array(arr) => write_array(f, arr, &mut Vec::new()),
            Object::Function(function) => write!(f, "<fn {}>", function.name),
            Object::Closure(closure) => write!(f, "<fn {}>", closure.function.name),
        }
    }
}

/// Writes `[a, b, ...]`. An element that is one of the arrays currently being written prints as `[...]`.
fn write_array(f: &mut fmt::Formatter<'_>, array: &Rc<RefCell<Array>>, open: &mut Vec<*const RefCell<Array>>) -> fmt::Result {
    open.push(Rc::as_ptr(array));
    write!(f, "[")?;
    for (i, value) in array.borrow().values().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        match value {
            Value::Object(Object::Array(inner)) if open.contains(&Rc::as_ptr(inner)) => write!(f, "[...]")?,
            Value::Object(Object::Array(inner)) => write_array(f, inner, open)?,
            other => write!(f, "{}", other)?,
        }
    }
    open.pop();
    write!(f, "]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_as_number_coercions() {
        assert_eq!(Value::Number(4.5).as_number(), 4.5);
        assert_eq!(Value::Boolean(true).as_number(), 1.0);
        assert_eq!(Value::Boolean(false).as_number(), 0.0);
        assert_eq!(Value::Noll.as_number(), 0.0);
        assert_eq!(Value::string("12.5").as_number(), 12.5);
        assert!(Value::string("twelve").as_number().is_nan());
    }

    #[test]
    fn test_array_forwards_scalar_coercion_to_first_element() {
        let arr = Value::array(vec![Value::Number(7.0), Value::Number(9.0)]);
        assert_eq!(arr.as_number(), 7.0);
        assert!(arr.as_boolean());

        let zero_first = Value::array(vec![Value::Number(0.0), Value::Number(9.0)]);
        assert!(!zero_first.as_boolean());

        let empty = Value::array(vec![]);
        assert_eq!(empty.as_number(), 0.0);
        assert!(!empty.as_boolean());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Noll.as_boolean());
        assert!(!Value::Number(0.0).as_boolean());
        assert!(Value::Number(-0.5).as_boolean());
        assert!(Value::string("x").as_boolean());
        assert!(!Value::string("").as_boolean());
    }

    #[test]
    fn test_noll_propagates_through_arithmetic() {
        let x = Value::Number(3.0);
        assert!(Value::Noll.add(&x).is_noll());
        assert!(Value::Noll.sub(&x).is_noll());
        assert!(x.mul(&Value::Noll).is_noll());
        assert!(x.div(&Value::Noll).is_noll());
        assert!(Value::Noll.rem(&x).is_noll());
        assert!(Value::Noll.pow(&x).is_noll());
        assert!(Value::Noll.neg().is_noll());
    }

    #[test]
    fn test_arithmetic() {
        let a = Value::Number(7.0);
        let b = Value::Number(2.0);
        assert_eq!(a.add(&b).as_number(), 9.0);
        assert_eq!(a.sub(&b).as_number(), 5.0);
        assert_eq!(a.mul(&b).as_number(), 14.0);
        assert_eq!(a.div(&b).as_number(), 3.5);
        assert_eq!(a.rem(&b).as_number(), 1.0);
        assert_eq!(a.pow(&b).as_number(), 49.0);
        assert_eq!(Value::Boolean(true).add(&b).as_number(), 3.0);
    }

    #[test]
    fn test_string_concatenation() {
        let joined = Value::string("n=").add(&Value::Number(3.0));
        assert_eq!(joined.to_string(), "n=3");
        assert!(joined.is_string());
    }

    #[test]
    fn test_equal_is_loose_and_strict_checks_tags() {
        let five = Value::Number(5.0);
        let five_str = Value::string("5");
        assert!(Value::equal(&five, &five_str));
        assert!(!Value::strict_equals(&five, &five_str));
        assert!(Value::strict_equals(&five, &Value::Number(5.0)));
        assert!(Value::equal(&Value::Boolean(true), &Value::Number(1.0)));
        assert!(!Value::strict_equals(&Value::Boolean(true), &Value::Number(1.0)));
        assert!(Value::equal(&Value::Noll, &Value::Noll));
        assert!(!Value::equal(&Value::Noll, &Value::Number(0.0)));
        assert!(!Value::equal(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::compare(&Value::Number(1.0), &Value::Number(2.0)), Some(Ordering::Less));
        assert_eq!(Value::compare(&Value::string("10"), &Value::Number(2.0)), Some(Ordering::Greater));
        assert_eq!(Value::compare(&Value::string("abc"), &Value::string("abd")), Some(Ordering::Less));
        assert_eq!(Value::compare(&Value::Noll, &Value::Noll), None);
    }

    #[test]
    fn test_hashing() {
        assert_eq!(hash_of(&Value::Number(0.0)), hash_of(&Value::Number(-0.0)));
        assert_eq!(hash_of(&Value::string("abc")), hash_of(&Value::string("abc")));
        let ab = Value::array(vec![Value::Number(1.0), Value::Number(2.0)]);
        let ba = Value::array(vec![Value::Number(2.0), Value::Number(1.0)]);
        assert_ne!(hash_of(&ab), hash_of(&ba));
    }

    #[test]
    fn test_array_insert_and_get() {
        let mut arr = Array::from_values(vec![Value::Number(10.0)]);
        assert_eq!(arr.get(&Value::Number(0.0)).as_number(), 10.0);
        assert!(arr.get(&Value::Number(1.0)).is_noll());
        let key = Value::string("k");
        arr.store(arr.position(&key), key, Value::Boolean(true));
        let zero = Value::Number(0.0);
        arr.store(arr.position(&zero), zero, Value::Number(11.0));
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.get(&Value::Number(0.0)).as_number(), 11.0);
        assert!(arr.get(&Value::string("k")).as_boolean());
    }

    #[test]
    fn test_array_keyed_by_itself() {
        let arr = Value::array(vec![Value::Number(0.0)]);
        let cell = arr.as_array().unwrap().clone();
        let position = cell.borrow().position(&arr);
        assert_eq!(position, None);
        cell.borrow_mut().store(position, arr.clone(), Value::Number(2.0));
        assert_eq!(cell.borrow().get(&arr).as_number(), 2.0);
        assert!(Value::strict_equals(&arr, &arr));
    }

    #[test]
    fn test_self_containing_array_coercions_terminate() {
        let arr = Value::array(vec![Value::Number(0.0)]);
        let cell = arr.as_array().unwrap().clone();
        cell.borrow_mut().store(Some(0), Value::Number(0.0), arr.clone());
        assert!(arr.as_number().is_nan());
        assert!(arr.as_boolean());
        assert_eq!(arr.to_string(), "[[...]]");
        assert_eq!(hash_of(&arr), hash_of(&arr));
        // Break the cycle so the test does not leak.
        cell.borrow_mut().store(Some(0), Value::Number(0.0), Value::Noll);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(0.25).to_string(), "0.25");
        assert_eq!(Value::Noll.to_string(), "null");
        assert_eq!(Value::Boolean(false).to_string(), "false");
        let arr = Value::array(vec![Value::Number(1.0), Value::string("a")]);
        assert_eq!(arr.to_string(), "[1, a]");
    }
}
