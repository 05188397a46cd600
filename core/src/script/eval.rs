//! Async tree-walking evaluator
//!
//! Cancellation is cooperative: the token is checked before every statement
//! and loop iteration, and raced against every awaited native future.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use super::ast::{BinaryOp, Expr, Stmt, UnaryOp};
use super::checker::{ARGS_BINDING, RUNTIME_HELPER};
use super::engine::{FnDecl, ScriptProgram};
use super::modules::{ModuleCatalog, NativeImpl};
use crate::error::{
    Cancelled, RunError, RuntimeError, DIVISION_BY_ZERO, PROPERTY_NOT_FOUND, RECURSION_LIMIT,
    TYPE_ERROR, UNDEFINED_VARIABLE, UNKNOWN_FUNCTION, WRONG_ARG_COUNT,
};
use crate::session::{CompiledUnit, Environment};
use crate::value::{Deferred, FunctionRef, NativeRef, Val};

/// Nested blocks and expressions, across user function calls, that one run
/// may have open at once; sized for the evaluation thread's stack
pub const MAX_EVAL_DEPTH: usize = 1_000;

type Locals = BTreeMap<String, Val>;
type EvalFuture<'f> = Pin<Box<dyn Future<Output = Result<Val, RunError>> + Send + 'f>>;

pub struct Interpreter<'a> {
    catalog: &'a ModuleCatalog,
    unit: &'a CompiledUnit<ScriptProgram>,
    args: Val,
    cancel: &'a CancellationToken,
    depth: AtomicUsize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        catalog: &'a ModuleCatalog,
        unit: &'a CompiledUnit<ScriptProgram>,
        args: &[String],
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            catalog,
            unit,
            args: Val::List(args.iter().cloned().map(Val::Str).collect()),
            cancel,
            depth: AtomicUsize::new(0),
        }
    }

    /// Run the unit's statements on `env`; returns the value of the last
    /// statement when it is an expression statement, null otherwise
    pub async fn run(&self, env: &mut Environment) -> Result<Val, RunError> {
        self.exec_block(&self.unit.program().statements, env).await
    }

    fn enter(&self) -> Result<Frame<'_>, RuntimeError> {
        let open = self.depth.fetch_add(1, Ordering::Relaxed);
        let frame = Frame(&self.depth);
        if open >= MAX_EVAL_DEPTH {
            return Err(RuntimeError::new(
                RECURSION_LIMIT,
                format!("evaluation nested deeper than {} levels", MAX_EVAL_DEPTH),
            ));
        }
        Ok(frame)
    }

    fn check_cancelled(&self) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    }

    /* ===================== Statements ===================== */

    fn exec_block<'f>(&'f self, statements: &'f [Stmt], env: &'f mut Environment) -> EvalFuture<'f> {
        Box::pin(async move {
            let _frame = self.enter()?;
            let mut last = Val::Null;
            for stmt in statements {
                self.check_cancelled()?;
                last = Val::Null;
                match stmt {
                    Stmt::Load { .. } | Stmt::Use { .. } => {}
                    Stmt::Fn { name, .. } => {
                        let func = FunctionRef {
                            name: name.clone(),
                            unit: self.unit.id(),
                        };
                        env.insert(name.clone(), Val::Func(func));
                    }
                    Stmt::Let { name, value, .. } | Stmt::Assign { name, value, .. } => {
                        let value = self.eval(value, env, &Locals::new()).await?;
                        env.insert(name.clone(), value);
                    }
                    Stmt::If {
                        test,
                        then_b,
                        else_b,
                        ..
                    } => {
                        if self.eval(test, env, &Locals::new()).await?.is_truthy() {
                            self.exec_block(then_b, env).await?;
                        } else if let Some(else_b) = else_b {
                            self.exec_block(else_b, env).await?;
                        }
                    }
                    Stmt::While { test, body, .. } => loop {
                        self.check_cancelled()?;
                        tokio::task::yield_now().await;
                        if !self.eval(test, env, &Locals::new()).await?.is_truthy() {
                            break;
                        }
                        self.exec_block(body, env).await?;
                    },
                    Stmt::Expr { expr, .. } => {
                        last = self.eval(expr, env, &Locals::new()).await?;
                    }
                }
            }
            Ok(last)
        })
    }

    /* ===================== Expressions ===================== */

    fn eval<'f>(&'f self, expr: &'f Expr, env: &'f Environment, locals: &'f Locals) -> EvalFuture<'f> {
        Box::pin(async move {
            let _frame = self.enter()?;
            match expr {
                Expr::Num { value, .. } => Ok(Val::Num(*value)),
                Expr::Str { value, .. } => Ok(Val::Str(value.clone())),
                Expr::Bool { value, .. } => Ok(Val::Bool(*value)),
                Expr::Null { .. } => Ok(Val::Null),
                Expr::List { items, .. } => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, env, locals).await?);
                    }
                    Ok(Val::List(values))
                }
                Expr::Ident { name, .. } => Ok(self.lookup(name, env, locals)?),
                Expr::Member {
                    object, property, ..
                } => {
                    let object = self.eval(object, env, locals).await?;
                    Ok(self.member(&object, property)?)
                }
                Expr::Call { callee, args, .. } => {
                    let callee = self.eval(callee, env, locals).await?;
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg, env, locals).await?);
                    }
                    self.call(callee, values, env).await
                }
                Expr::Unary { op, operand, .. } => {
                    let value = self.eval(operand, env, locals).await?;
                    match op {
                        UnaryOp::Neg => match value {
                            Val::Num(n) => Ok(Val::Num(-n)),
                            other => Err(RuntimeError::new(
                                TYPE_ERROR,
                                format!("operator '-' expects num, got {}", other.kind()),
                            )
                            .into()),
                        },
                        UnaryOp::Not => Ok(Val::Bool(!value.is_truthy())),
                        UnaryOp::Await => self.await_value(value).await,
                    }
                }
                Expr::Binary {
                    op: BinaryOp::And,
                    left,
                    right,
                    ..
                } => {
                    let truthy = self.eval(left, env, locals).await?.is_truthy()
                        && self.eval(right, env, locals).await?.is_truthy();
                    Ok(Val::Bool(truthy))
                }
                Expr::Binary {
                    op: BinaryOp::Or,
                    left,
                    right,
                    ..
                } => {
                    let truthy = self.eval(left, env, locals).await?.is_truthy()
                        || self.eval(right, env, locals).await?.is_truthy();
                    Ok(Val::Bool(truthy))
                }
                Expr::Binary {
                    op, left, right, ..
                } => {
                    let l = self.eval(left, env, locals).await?;
                    let r = self.eval(right, env, locals).await?;
                    Ok(binary_op(*op, l, r)?)
                }
            }
        })
    }

    fn lookup(&self, name: &str, env: &Environment, locals: &Locals) -> Result<Val, RuntimeError> {
        if let Some(value) = locals.get(name).or_else(|| env.get(name)) {
            return Ok(value.clone());
        }
        match name {
            ARGS_BINDING => return Ok(self.args.clone()),
            RUNTIME_HELPER => return Ok(self.runtime_helper()),
            _ => {}
        }

        let program = self.unit.program();
        if program.modules.iter().any(|m| m == name) {
            return Ok(Val::Module(name.to_string()));
        }
        for import in &program.imports {
            if let Ok(value) = self.module_member(import, name) {
                return Ok(value);
            }
        }
        Err(RuntimeError::new(
            UNDEFINED_VARIABLE,
            format!("undefined variable '{}'", name),
        ))
    }

    fn runtime_helper(&self) -> Val {
        let mut helper = BTreeMap::new();
        helper.insert(
            "version".to_string(),
            Val::Str(env!("CARGO_PKG_VERSION").to_string()),
        );
        helper.insert("submission".to_string(), Val::Num(self.unit.id() as f64));
        Val::Obj(helper)
    }

    fn member(&self, object: &Val, property: &str) -> Result<Val, RuntimeError> {
        match object {
            Val::Module(module) => self.module_member(module, property),
            Val::Obj(map) => map.get(property).cloned().ok_or_else(|| {
                RuntimeError::new(
                    PROPERTY_NOT_FOUND,
                    format!("object has no property '{}'", property),
                )
            }),
            other => Err(RuntimeError::new(
                PROPERTY_NOT_FOUND,
                format!("{} has no property '{}'", other.kind(), property),
            )),
        }
    }

    fn module_member(&self, module: &str, name: &str) -> Result<Val, RuntimeError> {
        let def = self.catalog.get(module).ok_or_else(|| {
            RuntimeError::new(UNKNOWN_FUNCTION, format!("unknown module '{}'", module))
        })?;
        if def.find_function(name).is_some() {
            return Ok(Val::Native(NativeRef {
                module: module.to_string(),
                name: name.to_string(),
            }));
        }
        def.find_constant(name)
            .map(|c| c.value.clone())
            .ok_or_else(|| {
                RuntimeError::new(
                    PROPERTY_NOT_FOUND,
                    format!("module '{}' has no member '{}'", module, name),
                )
            })
    }

    /* ===================== Calls ===================== */

    async fn call(&self, callee: Val, args: Vec<Val>, env: &Environment) -> Result<Val, RunError> {
        match callee {
            Val::Func(func) => {
                let decl = self.find_function(&func)?;
                if decl.params.len() != args.len() {
                    return Err(RuntimeError::new(
                        WRONG_ARG_COUNT,
                        format!(
                            "{}() expects {} argument(s), got {}",
                            func.name,
                            decl.params.len(),
                            args.len()
                        ),
                    )
                    .into());
                }
                let locals: Locals = decl.params.iter().cloned().zip(args).collect();
                self.eval(&decl.body, env, &locals).await
            }
            Val::Native(native) => {
                let def = self
                    .catalog
                    .get(&native.module)
                    .and_then(|m| m.find_function(&native.name))
                    .ok_or_else(|| {
                        RuntimeError::new(
                            UNKNOWN_FUNCTION,
                            format!("unknown function {}.{}", native.module, native.name),
                        )
                    })?;
                match &def.imp {
                    NativeImpl::Sync(f) => Ok(f(&args)?),
                    NativeImpl::Async(_) => Ok(Val::Pending(Deferred {
                        target: native,
                        args,
                    })),
                }
            }
            other => Err(RuntimeError::new(
                TYPE_ERROR,
                format!("{} is not callable", other.kind()),
            )
            .into()),
        }
    }

    fn find_function(&self, func: &FunctionRef) -> Result<&'a FnDecl, RuntimeError> {
        let unit: &'a CompiledUnit<ScriptProgram> = self.unit;
        unit.ancestors()
            .find(|u| u.id() == func.unit)
            .and_then(|u| u.program().functions.get(&func.name))
            .ok_or_else(|| {
                RuntimeError::new(
                    UNKNOWN_FUNCTION,
                    format!("function '{}' is no longer defined", func.name),
                )
            })
    }

    async fn await_value(&self, value: Val) -> Result<Val, RunError> {
        let Val::Pending(deferred) = value else {
            return Ok(value);
        };
        let target = &deferred.target;
        let imp = self
            .catalog
            .get(&target.module)
            .and_then(|m| m.find_function(&target.name))
            .map(|def| def.imp.clone());
        let Some(NativeImpl::Async(f)) = imp else {
            return Err(RuntimeError::new(
                UNKNOWN_FUNCTION,
                format!("{}.{} is not asynchronous", target.module, target.name),
            )
            .into());
        };

        let future = f(deferred.args.clone());
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled.into()),
            result = future => Ok(result?),
        }
    }
}

/// One open evaluation level; closes on drop
struct Frame<'d>(&'d AtomicUsize);

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/* ===================== Operators ===================== */

fn binary_op(op: BinaryOp, l: Val, r: Val) -> Result<Val, RuntimeError> {
    match (op, l, r) {
        (BinaryOp::Eq, l, r) => Ok(Val::Bool(l == r)),
        (BinaryOp::Ne, l, r) => Ok(Val::Bool(l != r)),
        (BinaryOp::Add, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a + b)),
        (BinaryOp::Add, Val::List(mut a), Val::List(b)) => {
            a.extend(b);
            Ok(Val::List(a))
        }
        (BinaryOp::Add, l @ Val::Str(_), r) | (BinaryOp::Add, l, r @ Val::Str(_)) => Ok(Val::Str(
            format!("{}{}", l.to_plain_string(), r.to_plain_string()),
        )),
        (BinaryOp::Sub, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a - b)),
        (BinaryOp::Mul, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a * b)),
        (BinaryOp::Div | BinaryOp::Mod, Val::Num(_), Val::Num(b)) if b == 0.0 => {
            Err(RuntimeError::new(DIVISION_BY_ZERO, "division by zero"))
        }
        (BinaryOp::Div, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a / b)),
        (BinaryOp::Mod, Val::Num(a), Val::Num(b)) => Ok(Val::Num(a % b)),
        (BinaryOp::Lt, Val::Num(a), Val::Num(b)) => Ok(Val::Bool(a < b)),
        (BinaryOp::Lte, Val::Num(a), Val::Num(b)) => Ok(Val::Bool(a <= b)),
        (BinaryOp::Gt, Val::Num(a), Val::Num(b)) => Ok(Val::Bool(a > b)),
        (BinaryOp::Gte, Val::Num(a), Val::Num(b)) => Ok(Val::Bool(a >= b)),
        (BinaryOp::Lt, Val::Str(a), Val::Str(b)) => Ok(Val::Bool(a < b)),
        (BinaryOp::Lte, Val::Str(a), Val::Str(b)) => Ok(Val::Bool(a <= b)),
        (BinaryOp::Gt, Val::Str(a), Val::Str(b)) => Ok(Val::Bool(a > b)),
        (BinaryOp::Gte, Val::Str(a), Val::Str(b)) => Ok(Val::Bool(a >= b)),
        (op, l, r) => Err(RuntimeError::new(
            TYPE_ERROR,
            format!(
                "operator '{}' cannot be applied to {} and {}",
                op.symbol(),
                l.kind(),
                r.kind()
            ),
        )),
    }
}
