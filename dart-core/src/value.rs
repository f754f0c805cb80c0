//! The tagged `Value` sum type every node output carries (spec §3).

use std::fmt;
use std::sync::Arc;

use crate::tensor::Tensor;

/// A tagged union over the value kinds the graph can carry between nodes. `Tensor` and `Tuple`
/// are shared handles so assignment stays cheap even for large composite values; a value's tag
/// never changes after construction.
#[derive(Clone)]
pub enum Value {
    None,
    Tensor(Tensor),
    Int(i64),
    Float(f64),
    Bool(bool),
    String(Arc<str>),
    Tuple(Arc<Vec<Value>>),
}

macro_rules! type_check {
    ($name:ident, $variant:ident) => {
        pub fn $name(&self) -> bool {
            matches!(self, Value::$variant(..))
        }
    };
}

macro_rules! extract {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// # Panics
        /// Panics if this value is not a `Value::
        #[doc = stringify!($variant)]
        /// ` (spec §7 taxonomy item 1: wrong-tag access is a programmer error).
        pub fn $name(&self) -> $ty {
            match self {
                Value::$variant(v) => v.clone(),
                other => panic!(
                    concat!("expected Value::", stringify!($variant), ", got {:?}"),
                    other.tag()
                ),
            }
        }
    };
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    type_check!(is_tensor, Tensor);
    type_check!(is_int, Int);
    type_check!(is_float, Float);
    type_check!(is_bool, Bool);
    type_check!(is_string, String);
    type_check!(is_tuple, Tuple);

    extract!(to_tensor, Tensor, Tensor);
    extract!(to_int, Int, i64);
    extract!(to_float, Float, f64);
    extract!(to_bool, Bool, bool);
    extract!(to_string_value, String, Arc<str>);
    extract!(to_tuple, Tuple, Arc<Vec<Value>>);

    /// A short name for the active variant, used in panic messages and logging.
    pub fn tag(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Tensor(_) => "Tensor",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Bool",
            Value::String(_) => "String",
            Value::Tuple(_) => "Tuple",
        }
    }

    pub fn tuple(values: Vec<Value>) -> Self {
        Value::Tuple(Arc::new(values))
    }
}

impl PartialEq for Value {
    /// Nominal equality per variant: values of different tags are never equal, even when one
    /// could be coerced to the other's type.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Tensor(a), Value::Tensor(b)) => a.same_storage_and_view(b),
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Tensor(t) => write!(f, "{t:?}"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Tuple(v) => f.debug_tuple("Tuple").field(v).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Tensor(t) => write!(f, "Tensor({})", t.label()),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Tuple(v) => {
                write!(f, "(")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Tensor> for Value {
    fn from(v: Tensor) -> Self {
        Value::Tensor(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_laws_hold_per_variant() {
        assert_eq!(Value::Int(7).to_int(), 7);
        assert_eq!(Value::Float(1.5).to_float(), 1.5);
        assert!(Value::Bool(true).to_bool());
    }

    #[test]
    #[should_panic(expected = "expected Value::Int")]
    fn wrong_tag_access_panics() {
        Value::Bool(true).to_int();
    }

    #[test]
    fn tag_never_changes_identity_of_variant() {
        let value = Value::Int(3);
        assert!(value.is_int());
        assert!(!value.is_float());
    }

    #[test]
    fn tuple_equality_is_structural_over_values() {
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(a, b);
    }
}
