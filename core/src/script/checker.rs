//! Static checking of stanza script
//!
//! The checker types every expression of a fragment against the bindings of
//! the unit chain, the referenced modules and the imported modules. It is also
//! what types the tail expression when the session asks whether a fragment
//! produces a value.

use std::collections::BTreeMap;

use super::ast::{BinaryOp, Expr, Span, Stmt, UnaryOp};
use super::modules::ModuleCatalog;
use super::types::Type;
use crate::error::{Diagnostic, Diagnostics};

/// Extra arguments passed to `evaluate`, as `list<str>`
pub const ARGS_BINDING: &str = "args";

/// Runtime helper object bound in every unit
pub const RUNTIME_HELPER: &str = "__stanza_runtime";

pub struct Checker<'a> {
    catalog: &'a ModuleCatalog,
    modules: &'a [String],
    imports: &'a [String],
    bindings: BTreeMap<String, Type>,
    locals: Vec<BTreeMap<String, Type>>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Checker<'a> {
    pub fn new(
        catalog: &'a ModuleCatalog,
        modules: &'a [String],
        imports: &'a [String],
        bindings: BTreeMap<String, Type>,
    ) -> Self {
        Self {
            catalog,
            modules,
            imports,
            bindings,
            locals: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Bindings after the checked statements, or every problem found
    pub fn finish(self) -> Result<BTreeMap<String, Type>, Diagnostics> {
        if self.diagnostics.is_empty() {
            Ok(self.bindings)
        } else {
            Err(Diagnostics(self.diagnostics))
        }
    }

    fn report(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(message, span.line, span.col));
    }

    /* ===================== Statements ===================== */

    pub fn check_statements(&mut self, statements: &[Stmt]) {
        for stmt in statements {
            self.check_statement(stmt);
        }
    }

    fn check_statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Load { .. } => {}
            Stmt::Use { module, span } => {
                if !self.modules.contains(module) {
                    let message = self.unavailable_module(module);
                    self.report(*span, message);
                }
            }
            Stmt::Fn {
                name, params, body, ..
            } => {
                let params_ty = vec![Type::Any; params.len()];
                // Bound before the body is checked so recursion resolves
                self.bindings
                    .insert(name.clone(), Type::func(params_ty.clone(), Type::Any));
                let frame = params.iter().map(|p| (p.clone(), Type::Any)).collect();
                self.locals.push(frame);
                let returns = self.infer(body);
                self.locals.pop();
                self.bindings
                    .insert(name.clone(), Type::func(params_ty, returns));
            }
            Stmt::Let { name, value, span } => {
                let ty = self.infer_bindable(name, value, *span);
                self.bindings.insert(name.clone(), ty);
            }
            Stmt::Assign { name, value, span } => {
                let ty = self.infer_bindable(name, value, *span);
                let ty = match self.bindings.get(name) {
                    Some(existing) => existing.join(&ty),
                    None => ty,
                };
                self.bindings.insert(name.clone(), ty);
            }
            Stmt::If {
                test,
                then_b,
                else_b,
                ..
            } => {
                self.infer_value(test);
                self.check_statements(then_b);
                if let Some(else_b) = else_b {
                    self.check_statements(else_b);
                }
            }
            Stmt::While { test, body, .. } => {
                self.infer_value(test);
                self.check_statements(body);
            }
            Stmt::Expr { expr, .. } => {
                self.infer(expr);
            }
        }
    }

    fn infer_bindable(&mut self, name: &str, value: &Expr, span: Span) -> Type {
        let ty = self.infer(value);
        if ty.is_void() {
            self.report(span, format!("cannot bind a void value to '{}'", name));
            return Type::Any;
        }
        ty
    }

    /* ===================== Expressions ===================== */

    /// Infer a type that must not be void
    fn infer_value(&mut self, expr: &Expr) -> Type {
        let ty = self.infer(expr);
        if ty.is_void() {
            self.report(expr.span(), "expression has no value");
            return Type::Any;
        }
        ty
    }

    pub fn infer(&mut self, expr: &Expr) -> Type {
        match expr {
            Expr::Num { .. } => Type::Num,
            Expr::Str { .. } => Type::Str,
            Expr::Bool { .. } => Type::Bool,
            Expr::Null { .. } => Type::Null,
            Expr::List { items, .. } => {
                let mut item_ty: Option<Type> = None;
                for item in items {
                    let ty = self.infer_value(item);
                    item_ty = Some(match item_ty {
                        Some(prev) => prev.join(&ty),
                        None => ty,
                    });
                }
                Type::list_of(item_ty.unwrap_or(Type::Any))
            }
            Expr::Ident { name, span } => self.resolve_name(name, *span),
            Expr::Member {
                object,
                property,
                span,
            } => {
                let object_ty = self.infer_value(object);
                self.member_type(&object_ty, property, *span)
            }
            Expr::Call { callee, args, span } => {
                let callee_ty = self.infer_value(callee);
                let arg_tys: Vec<Type> = args.iter().map(|a| self.infer_value(a)).collect();
                self.call_type(&callee_name(callee), &callee_ty, &arg_tys, *span)
            }
            Expr::Unary { op, operand, span } => {
                let ty = self.infer_value(operand);
                match op {
                    UnaryOp::Neg => {
                        if !Type::Num.accepts(&ty) {
                            self.report(*span, format!("operator '-' expects num, got {}", ty));
                        }
                        Type::Num
                    }
                    UnaryOp::Not => Type::Bool,
                    UnaryOp::Await => match ty {
                        Type::Future(inner) => *inner,
                        Type::Any => Type::Any,
                        other => {
                            self.report(*span, format!("cannot await a value of type {}", other));
                            other
                        }
                    },
                }
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                let l = self.infer_value(left);
                let r = self.infer_value(right);
                self.binary_type(*op, &l, &r, *span)
            }
        }
    }

    fn resolve_name(&mut self, name: &str, span: Span) -> Type {
        if let Some(ty) = self.locals.last().and_then(|frame| frame.get(name)) {
            return ty.clone();
        }
        if let Some(ty) = self.bindings.get(name) {
            return ty.clone();
        }
        match name {
            ARGS_BINDING => return Type::list_of(Type::Str),
            RUNTIME_HELPER => return Type::Any,
            _ => {}
        }
        if self.modules.iter().any(|m| m == name) {
            return Type::Module(name.to_string());
        }
        for import in self.imports {
            if !self.modules.contains(import) {
                continue;
            }
            if let Some(ty) = self
                .catalog
                .get(import)
                .and_then(|module| module.member_type(name))
            {
                return ty;
            }
        }

        let message = if self.catalog.contains(name) {
            self.unavailable_module(name)
        } else {
            format!("undefined variable '{}'", name)
        };
        self.report(span, message);
        Type::Any
    }

    fn unavailable_module(&self, name: &str) -> String {
        if self.catalog.contains(name) {
            format!("module '{}' is not loaded; add #load \"{}\"", name, name)
        } else {
            format!("unknown module '{}'", name)
        }
    }

    fn member_type(&mut self, object: &Type, property: &str, span: Span) -> Type {
        match object {
            Type::Module(module) => {
                let found = self
                    .catalog
                    .get(module)
                    .and_then(|def| def.member_type(property));
                match found {
                    Some(ty) => ty,
                    None => {
                        self.report(
                            span,
                            format!("module '{}' has no member '{}'", module, property),
                        );
                        Type::Any
                    }
                }
            }
            Type::Any => Type::Any,
            other => {
                self.report(span, format!("type {} has no member '{}'", other, property));
                Type::Any
            }
        }
    }

    fn call_type(&mut self, name: &str, callee: &Type, args: &[Type], span: Span) -> Type {
        let sig = match callee {
            Type::Fn(sig) => sig,
            Type::Any => return Type::Any,
            other => {
                self.report(span, format!("'{}' of type {} is not callable", name, other));
                return Type::Any;
            }
        };

        let arity_ok = if sig.variadic {
            args.len() >= sig.params.len()
        } else {
            args.len() == sig.params.len()
        };
        if !arity_ok {
            self.report(
                span,
                format!(
                    "'{}' expects {} argument(s), got {}",
                    name,
                    sig.params.len(),
                    args.len()
                ),
            );
        }
        for (i, (expected, actual)) in sig.params.iter().zip(args).enumerate() {
            if !expected.accepts(actual) {
                self.report(
                    span,
                    format!(
                        "argument {} of '{}' expects {}, got {}",
                        i + 1,
                        name,
                        expected,
                        actual
                    ),
                );
            }
        }
        sig.returns.clone()
    }

    fn binary_type(&mut self, op: BinaryOp, l: &Type, r: &Type, span: Span) -> Type {
        match op {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => Type::Bool,
            BinaryOp::Add => match (l, r) {
                (Type::Num, Type::Num) => Type::Num,
                (Type::Str, _) | (_, Type::Str) => Type::Str,
                (Type::List(a), Type::List(b)) => Type::list_of(a.join(b)),
                (Type::Any, _) | (_, Type::Any) => Type::Any,
                _ => {
                    self.report_operands(op, l, r, span);
                    Type::Any
                }
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                if !Type::Num.accepts(l) || !Type::Num.accepts(r) {
                    self.report_operands(op, l, r, span);
                }
                Type::Num
            }
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                let comparable = matches!(
                    (l, r),
                    (Type::Num, Type::Num) | (Type::Str, Type::Str) | (Type::Any, _) | (_, Type::Any)
                );
                if !comparable {
                    self.report_operands(op, l, r, span);
                }
                Type::Bool
            }
        }
    }

    fn report_operands(&mut self, op: BinaryOp, l: &Type, r: &Type, span: Span) {
        self.report(
            span,
            format!(
                "operator '{}' cannot be applied to {} and {}",
                op.symbol(),
                l,
                r
            ),
        );
    }
}

fn callee_name(callee: &Expr) -> String {
    match callee {
        Expr::Ident { name, .. } => name.clone(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{}", callee_name(object), property),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;

    fn check(source: &str, modules: &[&str]) -> Result<BTreeMap<String, Type>, Diagnostics> {
        let catalog = ModuleCatalog::standard();
        let mut modules: Vec<String> = modules.iter().map(|m| m.to_string()).collect();
        modules.push("core".to_string());
        let imports = vec!["core".to_string()];
        let mut checker = Checker::new(&catalog, &modules, &imports, BTreeMap::new());
        checker.check_statements(&parse_program(source).unwrap());
        checker.finish()
    }

    fn first_error(source: &str, modules: &[&str]) -> String {
        check(source, modules).unwrap_err().0[0].message.clone()
    }

    #[test]
    fn test_bindings_are_typed() {
        let bindings = check("x = 5\nlet s = \"a\" + x\nfn twice(n) = n * 2", &[]).unwrap();
        assert_eq!(bindings["x"], Type::Num);
        assert_eq!(bindings["s"], Type::Str);
        assert_eq!(bindings["twice"].to_string(), "fn(any) -> num");
    }

    #[test]
    fn test_undefined_variable() {
        assert_eq!(first_error("y + 1", &[]), "undefined variable 'y'");
    }

    #[test]
    fn test_module_must_be_loaded() {
        assert_eq!(
            first_error("math.floor(1.5)", &[]),
            "module 'math' is not loaded; add #load \"math\""
        );
        assert!(check("math.floor(1.5)", &["math"]).is_ok());
    }

    #[test]
    fn test_arity_and_argument_types() {
        assert_eq!(
            first_error("math.min(1)", &["math"]),
            "'math.min' expects 2 argument(s), got 1"
        );
        assert_eq!(
            first_error("math.floor(\"x\")", &["math"]),
            "argument 1 of 'math.floor' expects num, got str"
        );
    }

    #[test]
    fn test_void_cannot_be_bound() {
        assert_eq!(first_error("x = print(1)", &[]), "cannot bind a void value to 'x'");
    }

    #[test]
    fn test_await_requires_future() {
        assert_eq!(first_error("await 1", &[]), "cannot await a value of type num");
        assert!(check("await time.sleep(1)", &["time"]).is_ok());
    }

    #[test]
    fn test_runtime_helper_and_args_are_builtin() {
        assert!(check("__stanza_runtime.version\nlen(args)", &[]).is_ok());
    }
}
