//! Static types of stanza script

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static type of an expression or binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "of")]
pub enum Type {
    Num,
    Str,
    Bool,
    Null,
    /// No value at all; the type of `print(..)` and of statements
    Void,
    List(Box<Type>),
    Future(Box<Type>),
    Fn(Box<FnSig>),
    Module(String),
    /// Statically unknown; checked at run time
    Any,
}

/// Signature of a callable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnSig {
    pub params: Vec<Type>,
    pub returns: Type,
    /// Accepts any number of arguments beyond `params`
    #[serde(default)]
    pub variadic: bool,
}

impl Type {
    pub fn list_of(item: Type) -> Type {
        Type::List(Box::new(item))
    }

    pub fn future_of(item: Type) -> Type {
        Type::Future(Box::new(item))
    }

    pub fn func(params: Vec<Type>, returns: Type) -> Type {
        Type::Fn(Box::new(FnSig {
            params,
            returns,
            variadic: false,
        }))
    }

    pub fn variadic(params: Vec<Type>, returns: Type) -> Type {
        Type::Fn(Box::new(FnSig {
            params,
            returns,
            variadic: true,
        }))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Whether a value of type `other` may flow where `self` is expected
    pub fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Any, _) | (_, Type::Any) => true,
            (Type::List(a), Type::List(b)) => a.accepts(b),
            (Type::Future(a), Type::Future(b)) => a.accepts(b),
            (Type::Fn(_), Type::Fn(_)) => true,
            (a, b) => a == b,
        }
    }

    /// Least upper bound used when two branches meet
    pub fn join(&self, other: &Type) -> Type {
        if self == other {
            self.clone()
        } else {
            Type::Any
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Num => write!(f, "num"),
            Type::Str => write!(f, "str"),
            Type::Bool => write!(f, "bool"),
            Type::Null => write!(f, "null"),
            Type::Void => write!(f, "void"),
            Type::List(item) => write!(f, "list<{}>", item),
            Type::Future(item) => write!(f, "future<{}>", item),
            Type::Fn(sig) => {
                write!(f, "fn(")?;
                for (i, param) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                if sig.variadic {
                    if !sig.params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "..")?;
                }
                write!(f, ") -> {}", sig.returns)
            }
            Type::Module(name) => write!(f, "module {}", name),
            Type::Any => write!(f, "any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Type::list_of(Type::Num).to_string(), "list<num>");
        assert_eq!(
            Type::func(vec![Type::Num, Type::Str], Type::future_of(Type::Void)).to_string(),
            "fn(num, str) -> future<void>"
        );
        assert_eq!(Type::variadic(vec![], Type::Void).to_string(), "fn(..) -> void");
    }

    #[test]
    fn test_any_is_compatible_both_ways() {
        assert!(Type::Num.accepts(&Type::Any));
        assert!(Type::Any.accepts(&Type::Str));
        assert!(!Type::Num.accepts(&Type::Str));
        assert!(Type::list_of(Type::Any).accepts(&Type::list_of(Type::Num)));
    }
}
