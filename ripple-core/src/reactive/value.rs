//! Dynamic values.
//!
//! Component state is a tree of dynamic values: primitives plus shared,
//! identity-carrying [`Object`] and [`Array`] handles. Only objects and
//! arrays can be observed; primitives are copied in and out.

use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Serializer};

use super::array::Array;
use super::context;
use super::object::Object;
use super::observer::Observer;

/// A dynamically typed state value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Array(Array),
}

impl Value {
    /// Whether writing `new` over `old` counts as a change.
    ///
    /// Objects and arrays compare by identity, numbers with `Object.is`
    /// semantics: `NaN` equals `NaN`, `+0` differs from `-0`.
    pub fn has_changed(old: &Value, new: &Value) -> bool {
        match (old, new) {
            (Value::Number(a), Value::Number(b)) => {
                if a == b {
                    *a == 0.0 && a.is_sign_negative() != b.is_sign_negative()
                } else {
                    !(a.is_nan() && b.is_nan())
                }
            }
            _ => old != new,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Objects and arrays: values whose contents can change behind the same
    /// identity.
    pub fn is_object_like(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64()
            .filter(|n| n.fract() == 0.0 && n.is_finite())
            .map(|n| n as i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    /// The observer attached to this value, if it has been observed.
    pub fn observer(&self) -> Option<Rc<Observer>> {
        match self {
            Value::Object(o) => o.observer(),
            Value::Array(a) => a.observer(),
            _ => None,
        }
    }

    /// Untracked deep snapshot. Cycles are cut with `null`.
    pub fn to_json(&self) -> serde_json::Value {
        context::untracked(|| self.snapshot(&mut Vec::new()))
    }

    fn snapshot(&self, ancestors: &mut Vec<usize>) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.to_string()),
            Value::Object(o) => {
                if ancestors.contains(&o.addr()) {
                    return Json::Null;
                }
                ancestors.push(o.addr());
                let map = o
                    .entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.snapshot(ancestors)))
                    .collect();
                ancestors.pop();
                Json::Object(map)
            }
            Value::Array(a) => {
                if ancestors.contains(&a.addr()) {
                    return Json::Null;
                }
                ancestors.push(a.addr());
                let items = a.to_vec().iter().map(|v| v.snapshot(ancestors)).collect();
                ancestors.pop();
                Json::Array(items)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Object(o) => o.fmt(f),
            Value::Array(a) => a.fmt(f),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}
