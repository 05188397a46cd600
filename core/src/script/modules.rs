//! Module catalog
//!
//! Every module a fragment can `#load` is described here: its functions with
//! their static signatures and native implementations, its constants and the
//! modules it depends on. Hosts register extra modules next to the standard
//! ones (the tool bridge registers its globals this way).

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::types::Type;
use crate::error::{
    RuntimeError, DIVISION_BY_ZERO, USER_ERROR, WRONG_ARG_COUNT, WRONG_ARG_TYPE,
};
use crate::references::ModuleRef;
use crate::value::Val;

/// Module bound and imported in every unit without a `#load`
pub const PRELUDE: &str = "core";

pub type NativeFuture = Pin<Box<dyn Future<Output = Result<Val, RuntimeError>> + Send>>;
pub type SyncImpl = Arc<dyn Fn(&[Val]) -> Result<Val, RuntimeError> + Send + Sync>;
pub type AsyncImpl = Arc<dyn Fn(Vec<Val>) -> NativeFuture + Send + Sync>;

/// Host implementation of a module function
#[derive(Clone)]
pub enum NativeImpl {
    Sync(SyncImpl),
    /// Called on `await`; a plain call only captures the arguments
    Async(AsyncImpl),
}

/* ===================== Definitions ===================== */

#[derive(Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub returns: Type,
    pub variadic: bool,
    pub doc: String,
    pub imp: NativeImpl,
}

impl FunctionDef {
    pub fn sync<F>(name: &str, params: &[(&str, Type)], returns: Type, doc: &str, f: F) -> Self
    where
        F: Fn(&[Val]) -> Result<Val, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            params: own_params(params),
            returns,
            variadic: false,
            doc: doc.to_string(),
            imp: NativeImpl::Sync(Arc::new(f)),
        }
    }

    /// An asynchronous function; its static return type is `future<resolves>`
    pub fn asynchronous<F, Fut>(
        name: &str,
        params: &[(&str, Type)],
        resolves: Type,
        doc: &str,
        f: F,
    ) -> Self
    where
        F: Fn(Vec<Val>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Val, RuntimeError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            params: own_params(params),
            returns: Type::future_of(resolves),
            variadic: false,
            doc: doc.to_string(),
            imp: NativeImpl::Async(Arc::new(move |args| Box::pin(f(args)))),
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn is_async(&self) -> bool {
        matches!(self.imp, NativeImpl::Async(_))
    }

    /// Static type of the function as a value
    pub fn signature(&self) -> Type {
        let params = self.params.iter().map(|(_, ty)| ty.clone()).collect();
        if self.variadic {
            Type::variadic(params, self.returns.clone())
        } else {
            Type::func(params, self.returns.clone())
        }
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("signature", &self.signature().to_string())
            .finish()
    }
}

fn own_params(params: &[(&str, Type)]) -> Vec<(String, Type)> {
    params
        .iter()
        .map(|(name, ty)| (name.to_string(), ty.clone()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ConstantDef {
    pub name: String,
    pub ty: Type,
    pub value: Val,
    pub doc: String,
}

#[derive(Debug, Clone)]
pub struct ModuleDef {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub functions: Vec<FunctionDef>,
    pub constants: Vec<ConstantDef>,
}

impl ModuleDef {
    pub fn new(name: &str, version: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            functions: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn depends_on(mut self, module: &str) -> Self {
        self.dependencies.push(module.to_string());
        self
    }

    pub fn function(mut self, def: FunctionDef) -> Self {
        self.functions.push(def);
        self
    }

    pub fn constant(mut self, name: &str, ty: Type, value: Val, doc: &str) -> Self {
        self.constants.push(ConstantDef {
            name: name.to_string(),
            ty,
            value,
            doc: doc.to_string(),
        });
        self
    }

    pub fn find_function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_constant(&self, name: &str) -> Option<&ConstantDef> {
        self.constants.iter().find(|c| c.name == name)
    }

    /// Static type of `module.name`
    pub fn member_type(&self, name: &str) -> Option<Type> {
        self.find_function(name)
            .map(FunctionDef::signature)
            .or_else(|| self.find_constant(name).map(|c| c.ty.clone()))
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.constants.iter().map(|c| c.name.as_str()))
    }

    pub fn module_ref(&self) -> ModuleRef {
        ModuleRef::new(&self.name, &self.version).with_dependencies(self.dependencies.clone())
    }
}

/* ===================== Catalog ===================== */

#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: BTreeMap<String, Arc<ModuleDef>>,
}

impl ModuleCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog with the standard modules: core, math, text, time, stats
    pub fn standard() -> Self {
        let mut catalog = Self::empty();
        catalog.register(core_module());
        catalog.register(math_module());
        catalog.register(text_module());
        catalog.register(time_module());
        catalog.register(stats_module());
        catalog
    }

    /// Add or replace a module
    pub fn register(&mut self, def: ModuleDef) {
        self.modules.insert(def.name.clone(), Arc::new(def));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModuleDef>> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModuleDef>> {
        self.modules.values()
    }

    /// The module and, depth first, everything it depends on
    pub fn with_dependencies(&self, name: &str) -> Vec<ModuleRef> {
        let mut out: Vec<ModuleRef> = Vec::new();
        let mut pending = vec![name.to_string()];
        while let Some(next) = pending.pop() {
            if out.iter().any(|m| m.name == next) {
                continue;
            }
            if let Some(def) = self.get(&next) {
                pending.extend(def.dependencies.iter().rev().cloned());
                out.push(def.module_ref());
            }
        }
        out
    }
}

/* ===================== Argument helpers ===================== */

fn expect_arity(func: &str, args: &[Val], count: usize) -> Result<(), RuntimeError> {
    if args.len() != count {
        return Err(RuntimeError::new(
            WRONG_ARG_COUNT,
            format!("{}() expects {} argument(s), got {}", func, count, args.len()),
        ));
    }
    Ok(())
}

fn num_arg(func: &str, args: &[Val], index: usize) -> Result<f64, RuntimeError> {
    match args.get(index) {
        Some(Val::Num(n)) => Ok(*n),
        Some(other) => Err(RuntimeError::new(
            WRONG_ARG_TYPE,
            format!("{}() argument {} must be num, got {}", func, index + 1, other.kind()),
        )),
        None => Err(RuntimeError::new(
            WRONG_ARG_COUNT,
            format!("{}() is missing argument {}", func, index + 1),
        )),
    }
}

fn str_arg<'a>(func: &str, args: &'a [Val], index: usize) -> Result<&'a str, RuntimeError> {
    match args.get(index) {
        Some(Val::Str(s)) => Ok(s),
        Some(other) => Err(RuntimeError::new(
            WRONG_ARG_TYPE,
            format!("{}() argument {} must be str, got {}", func, index + 1, other.kind()),
        )),
        None => Err(RuntimeError::new(
            WRONG_ARG_COUNT,
            format!("{}() is missing argument {}", func, index + 1),
        )),
    }
}

fn nums_arg(func: &str, args: &[Val], index: usize) -> Result<Vec<f64>, RuntimeError> {
    match args.get(index) {
        Some(Val::List(items)) => items
            .iter()
            .map(|item| match item {
                Val::Num(n) => Ok(*n),
                other => Err(RuntimeError::new(
                    WRONG_ARG_TYPE,
                    format!("{}() expects a list of num, found {}", func, other.kind()),
                )),
            })
            .collect(),
        Some(other) => Err(RuntimeError::new(
            WRONG_ARG_TYPE,
            format!("{}() argument {} must be a list, got {}", func, index + 1, other.kind()),
        )),
        None => Err(RuntimeError::new(
            WRONG_ARG_COUNT,
            format!("{}() is missing argument {}", func, index + 1),
        )),
    }
}

fn unary_math(name: &'static str, op: fn(f64) -> f64) -> FunctionDef {
    FunctionDef::sync(
        name,
        &[("x", Type::Num)],
        Type::Num,
        &format!("Returns {}(x)", name),
        move |args| {
            expect_arity(name, args, 1)?;
            Ok(Val::Num(op(num_arg(name, args, 0)?)))
        },
    )
}

fn text_map(name: &'static str, doc: &str, op: fn(&str) -> String) -> FunctionDef {
    FunctionDef::sync(name, &[("s", Type::Str)], Type::Str, doc, move |args| {
        expect_arity(name, args, 1)?;
        Ok(Val::Str(op(str_arg(name, args, 0)?)))
    })
}

fn delay_millis(func: &str, args: &[Val]) -> Result<Duration, RuntimeError> {
    let ms = num_arg(func, args, 0)?;
    if ms < 0.0 || !ms.is_finite() {
        return Err(RuntimeError::new(
            WRONG_ARG_TYPE,
            format!("{}() duration must be a non-negative number of milliseconds", func),
        ));
    }
    Ok(Duration::from_millis(ms as u64))
}

/* ===================== Standard modules ===================== */

fn core_module() -> ModuleDef {
    ModuleDef::new(PRELUDE, "1.0", "Printing, lengths and errors")
        .function(
            FunctionDef::sync("print", &[], Type::Void, "Writes the values to stdout", |args| {
                let line: Vec<String> = args.iter().map(Val::to_plain_string).collect();
                println!("{}", line.join(" "));
                Ok(Val::Null)
            })
            .variadic(),
        )
        .function(FunctionDef::sync(
            "len",
            &[("value", Type::Any)],
            Type::Num,
            "Length of a string, list or object",
            |args| {
                expect_arity("len", args, 1)?;
                let len = match &args[0] {
                    Val::Str(s) => s.chars().count(),
                    Val::List(items) => items.len(),
                    Val::Obj(map) => map.len(),
                    other => {
                        return Err(RuntimeError::new(
                            WRONG_ARG_TYPE,
                            format!("len() is not defined for {}", other.kind()),
                        ))
                    }
                };
                Ok(Val::Num(len as f64))
            },
        ))
        .function(FunctionDef::sync(
            "str",
            &[("value", Type::Any)],
            Type::Str,
            "Converts a value to its text form",
            |args| {
                expect_arity("str", args, 1)?;
                Ok(Val::Str(args[0].to_plain_string()))
            },
        ))
        .function(FunctionDef::sync(
            "fail",
            &[("message", Type::Str)],
            Type::Void,
            "Raises an error with the given message",
            |args| {
                expect_arity("fail", args, 1)?;
                Err(RuntimeError::new(USER_ERROR, str_arg("fail", args, 0)?))
            },
        ))
}

fn math_module() -> ModuleDef {
    ModuleDef::new("math", "1.0", "Numeric functions")
        .function(unary_math("floor", f64::floor))
        .function(unary_math("ceil", f64::ceil))
        .function(unary_math("abs", f64::abs))
        .function(unary_math("round", f64::round))
        .function(FunctionDef::sync(
            "sqrt",
            &[("x", Type::Num)],
            Type::Num,
            "Square root of a non-negative number",
            |args| {
                expect_arity("sqrt", args, 1)?;
                let x = num_arg("sqrt", args, 0)?;
                if x < 0.0 {
                    return Err(RuntimeError::new(
                        WRONG_ARG_TYPE,
                        "sqrt() of a negative number",
                    ));
                }
                Ok(Val::Num(x.sqrt()))
            },
        ))
        .function(FunctionDef::sync(
            "min",
            &[("a", Type::Num), ("b", Type::Num)],
            Type::Num,
            "The smaller of two numbers",
            |args| {
                expect_arity("min", args, 2)?;
                Ok(Val::Num(num_arg("min", args, 0)?.min(num_arg("min", args, 1)?)))
            },
        ))
        .function(FunctionDef::sync(
            "max",
            &[("a", Type::Num), ("b", Type::Num)],
            Type::Num,
            "The larger of two numbers",
            |args| {
                expect_arity("max", args, 2)?;
                Ok(Val::Num(num_arg("max", args, 0)?.max(num_arg("max", args, 1)?)))
            },
        ))
        .constant("pi", Type::Num, Val::Num(std::f64::consts::PI), "Ratio of a circle's circumference to its diameter")
}

fn text_module() -> ModuleDef {
    ModuleDef::new("text", "1.0", "String functions")
        .function(text_map("upper", "Uppercase copy of s", str::to_uppercase))
        .function(text_map("lower", "Lowercase copy of s", str::to_lowercase))
        .function(text_map("trim", "s without surrounding whitespace", |s| s.trim().to_string()))
        .function(FunctionDef::sync(
            "contains",
            &[("s", Type::Str), ("needle", Type::Str)],
            Type::Bool,
            "Whether s contains needle",
            |args| {
                expect_arity("contains", args, 2)?;
                let haystack = str_arg("contains", args, 0)?;
                let needle = str_arg("contains", args, 1)?;
                Ok(Val::Bool(haystack.contains(needle)))
            },
        ))
}

fn time_module() -> ModuleDef {
    ModuleDef::new("time", "1.0", "Timers")
        .function(FunctionDef::asynchronous(
            "sleep",
            &[("ms", Type::Num)],
            Type::Void,
            "Completes after ms milliseconds",
            |args| async move {
                expect_arity("sleep", &args, 1)?;
                tokio::time::sleep(delay_millis("sleep", &args)?).await;
                Ok::<_, RuntimeError>(Val::Null)
            },
        ))
        .function(FunctionDef::asynchronous(
            "delay",
            &[("ms", Type::Num), ("value", Type::Any)],
            Type::Any,
            "Resolves to value after ms milliseconds",
            |mut args| async move {
                expect_arity("delay", &args, 2)?;
                tokio::time::sleep(delay_millis("delay", &args)?).await;
                Ok::<_, RuntimeError>(args.pop().unwrap_or(Val::Null))
            },
        ))
}

fn stats_module() -> ModuleDef {
    ModuleDef::new("stats", "1.0", "Aggregates over lists of numbers")
        .depends_on("math")
        .function(FunctionDef::sync(
            "sum",
            &[("values", Type::list_of(Type::Num))],
            Type::Num,
            "Sum of the values",
            |args| {
                expect_arity("sum", args, 1)?;
                Ok(Val::Num(nums_arg("sum", args, 0)?.iter().sum()))
            },
        ))
        .function(FunctionDef::sync(
            "mean",
            &[("values", Type::list_of(Type::Num))],
            Type::Num,
            "Arithmetic mean of the values",
            |args| {
                expect_arity("mean", args, 1)?;
                let values = nums_arg("mean", args, 0)?;
                if values.is_empty() {
                    return Err(RuntimeError::new(DIVISION_BY_ZERO, "mean() of an empty list"));
                }
                Ok(Val::Num(values.iter().sum::<f64>() / values.len() as f64))
            },
        ))
}
