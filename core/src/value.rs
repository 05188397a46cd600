//! Runtime value types
//!
//! `Val` is the value currency between an engine and the session: it is what a
//! fragment produces and what bindings hold between submissions. Everything in
//! it is plain data so a submission's environment can be cloned, compared and
//! serialized without knowing which engine produced it.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Runtime value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Obj(BTreeMap<String, Val>),
    /// A user function declared by an earlier (or the current) unit
    Func(FunctionRef),
    /// A host-provided function of a module
    Native(NativeRef),
    /// A module used as a value (`math` in `math.floor`)
    Module(String),
    /// The not-yet-started result of an asynchronous native function
    Pending(Deferred),
}

/// Points at a function declaration by name and declaring unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
    pub unit: u64,
}

/// Points at a native module member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRef {
    pub module: String,
    pub name: String,
}

/// An asynchronous native call captured with its arguments, run on `await`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deferred {
    pub target: NativeRef,
    pub args: Vec<Val>,
}

impl Val {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Null => false,
            Val::Num(n) => *n != 0.0,
            Val::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Name of the value's runtime kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Num(_) => "num",
            Val::Str(_) => "str",
            Val::List(_) => "list",
            Val::Obj(_) => "object",
            Val::Func(_) | Val::Native(_) => "fn",
            Val::Module(_) => "module",
            Val::Pending(_) => "future",
        }
    }

    /// Render without quoting strings, as `print` does
    pub fn to_plain_string(&self) -> String {
        match self {
            Val::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Convert to JSON for transports that speak JSON
    ///
    /// Functions, modules and pending futures have no JSON form; they are
    /// rendered as their display string so no information is silently lost.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Val::Null => JsonValue::Null,
            Val::Bool(b) => JsonValue::Bool(*b),
            Val::Num(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Val::Str(s) => JsonValue::String(s.clone()),
            Val::List(items) => JsonValue::Array(items.iter().map(Val::to_json).collect()),
            Val::Obj(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            other => JsonValue::String(other.to_string()),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => write!(f, "null"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Num(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Val::Str(s) => write!(f, "{:?}", s),
            Val::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Val::Obj(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Val::Func(func) => write!(f, "<fn {}>", func.name),
            Val::Native(native) => write!(f, "<fn {}.{}>", native.module, native.name),
            Val::Module(name) => write!(f, "<module {}>", name),
            Val::Pending(deferred) => write!(
                f,
                "<future {}.{}>",
                deferred.target.module, deferred.target.name
            ),
        }
    }
}
