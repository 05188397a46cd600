//! `Engine` implementation for stanza script

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::ast::{Expr, Stmt};
use super::checker::Checker;
use super::eval::Interpreter;
use super::modules::{ModuleCatalog, PRELUDE};
use super::parser::parse_program;
use super::types::Type;
use crate::error::{Diagnostics, ResolveError, RunError, RuntimeError, HOST_ERROR};
use crate::references::{ModuleRef, ReferenceResolver, ReferenceSet};
use crate::session::{CompileContext, CompiledUnit, Engine, Environment, Outcome, RunContext};

/// Stack of the thread each run evaluates on; deep enough for
/// `MAX_EVAL_DEPTH` open levels in unoptimized builds
pub const EVAL_STACK_SIZE: usize = 64 * 1024 * 1024;

/// A user function declared by a unit
#[derive(Debug, Clone, Serialize)]
pub struct FnDecl {
    pub params: Vec<String>,
    pub body: Expr,
}

/// Compiled form of one fragment
#[derive(Debug, Clone, Serialize)]
pub struct ScriptProgram {
    pub statements: Vec<Stmt>,
    /// Every name visible after this unit ran, with its static type
    pub bindings: BTreeMap<String, Type>,
    /// Modules usable by name, the prelude and dependencies included
    pub modules: Vec<String>,
    /// Modules whose members are in unqualified scope, in lookup order
    pub imports: Vec<String>,
    /// Functions declared by this unit
    pub functions: BTreeMap<String, FnDecl>,
}

impl ScriptProgram {
    /// Checker positioned after this unit, for typing expressions against it
    pub fn checker<'a>(&'a self, catalog: &'a ModuleCatalog) -> Checker<'a> {
        Checker::new(catalog, &self.modules, &self.imports, self.bindings.clone())
    }
}

#[derive(Debug, Clone)]
pub struct ScriptEngine {
    catalog: Arc<ModuleCatalog>,
}

impl ScriptEngine {
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn standard() -> Self {
        Self::new(ModuleCatalog::standard())
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Primary resolver for `#load` targets naming catalog modules
    pub fn resolver(&self) -> CatalogResolver {
        CatalogResolver {
            catalog: self.catalog.clone(),
        }
    }

    /// Modules visible to a unit compiled against `references`
    pub(crate) fn visible_modules(&self, references: &ReferenceSet) -> Vec<ModuleRef> {
        let mut visible: Vec<ModuleRef> = Vec::new();
        for module in references.modules() {
            for dep in self.catalog.with_dependencies(&module.name) {
                if !visible.iter().any(|m| m.name == dep.name) {
                    visible.push(dep);
                }
            }
        }
        visible
    }
}

impl Engine for ScriptEngine {
    type Program = ScriptProgram;
    type Tail = Expr;

    fn compile(
        &self,
        text: &str,
        ctx: &CompileContext<'_, ScriptProgram>,
    ) -> Result<CompiledUnit<ScriptProgram>, Diagnostics> {
        let statements = parse_program(text).map_err(|e| Diagnostics::single(e.to_diagnostic()))?;

        let visible = self.visible_modules(ctx.references);
        let mut modules = vec![PRELUDE.to_string()];
        modules.extend(visible.iter().map(|m| m.name.clone()));
        let mut imports = vec![PRELUDE.to_string()];
        imports.extend(ctx.references.imports().iter().cloned());

        let previous_bindings = ctx
            .previous
            .as_ref()
            .map(|unit| unit.program().bindings.clone())
            .unwrap_or_default();

        let mut checker = Checker::new(&self.catalog, &modules, &imports, previous_bindings);
        checker.check_statements(&statements);
        let bindings = checker.finish()?;

        let mut functions = BTreeMap::new();
        collect_functions(&statements, &mut functions);

        // The previous unit is referenced too, under its synthetic name
        let mut references = visible;
        if let Some(previous) = &ctx.previous {
            references.push(ModuleRef::new(previous.name(), "0"));
        }

        trace!(unit = ctx.id, modules = ?modules, "compiled fragment");

        let program = ScriptProgram {
            statements,
            bindings,
            modules,
            imports,
            functions,
        };
        Ok(CompiledUnit::new(
            ctx.id,
            text,
            program,
            references,
            ctx.previous.clone(),
        ))
    }

    fn tail_expression(&self, text: &str) -> Option<Expr> {
        match parse_program(text).ok()?.pop()? {
            Stmt::Expr {
                expr,
                terminated: false,
                ..
            } => Some(expr),
            _ => None,
        }
    }

    fn tail_is_value(&self, unit: &CompiledUnit<ScriptProgram>, tail: &Expr) -> bool {
        !unit.program().checker(&self.catalog).infer(tail).is_void()
    }

    fn run(
        &self,
        unit: &Arc<CompiledUnit<ScriptProgram>>,
        env: Environment,
        ctx: RunContext<'_>,
    ) -> impl Future<Output = Result<Outcome, RunError>> + Send {
        let catalog = self.catalog.clone();
        let unit = unit.clone();
        let args = ctx.args.to_vec();
        let cancel = ctx.cancel.child_token();

        async move {
            // Dropping this future stops the evaluation thread as well
            let _stop = cancel.clone().drop_guard();

            let (tx, rx) = oneshot::channel();
            std::thread::Builder::new()
                .name(format!("stanza-eval-{}", unit.id()))
                .stack_size(EVAL_STACK_SIZE)
                .spawn(move || {
                    let outcome = run_unit(&catalog, &unit, env, &args, &cancel);
                    // The receiver is gone only when the caller stopped waiting
                    let _ = tx.send(outcome);
                })
                .map_err(|e| {
                    RuntimeError::new(HOST_ERROR, "failed to start the evaluation thread")
                        .with_source(e)
                })?;

            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(RuntimeError::new(
                    HOST_ERROR,
                    "evaluation thread stopped without a result",
                )
                .into()),
            }
        }
    }
}

/// Evaluate `unit` to completion on the calling thread
fn run_unit(
    catalog: &ModuleCatalog,
    unit: &CompiledUnit<ScriptProgram>,
    mut env: Environment,
    args: &[String],
    cancel: &CancellationToken,
) -> Result<Outcome, RunError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            RuntimeError::new(HOST_ERROR, "failed to start the evaluation runtime").with_source(e)
        })?;
    runtime.block_on(async {
        let interpreter = Interpreter::new(catalog, unit, args, cancel);
        let value = interpreter.run(&mut env).await?;
        Ok(Outcome { env, value })
    })
}

fn collect_functions(statements: &[Stmt], out: &mut BTreeMap<String, FnDecl>) {
    for stmt in statements {
        match stmt {
            Stmt::Fn {
                name, params, body, ..
            } => {
                out.insert(
                    name.clone(),
                    FnDecl {
                        params: params.clone(),
                        body: body.clone(),
                    },
                );
            }
            Stmt::If { then_b, else_b, .. } => {
                collect_functions(then_b, out);
                if let Some(else_b) = else_b {
                    collect_functions(else_b, out);
                }
            }
            Stmt::While { body, .. } => collect_functions(body, out),
            _ => {}
        }
    }
}

/* ===================== Primary resolver ===================== */

/// Resolves `#load "<module>"` against the module catalog
pub struct CatalogResolver {
    catalog: Arc<ModuleCatalog>,
}

#[async_trait]
impl ReferenceResolver for CatalogResolver {
    async fn resolve(&self, target: &str) -> Result<Vec<ModuleRef>, ResolveError> {
        Ok(self
            .catalog
            .get(target)
            .map(|def| vec![def.module_ref()])
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(engine: &ScriptEngine, text: &str, refs: &ReferenceSet) -> Result<CompiledUnit<ScriptProgram>, Diagnostics> {
        engine.compile(
            text,
            &CompileContext {
                id: 0,
                references: refs,
                previous: None,
            },
        )
    }

    #[test]
    fn test_tail_expression_requires_missing_terminator() {
        let engine = ScriptEngine::standard();
        assert!(engine.tail_expression("1 + 1").is_some());
        assert!(engine.tail_expression("1 + 1;").is_none());
        assert!(engine.tail_expression("x = 1").is_none());
        assert!(engine.tail_expression("1 +").is_none());
    }

    #[test]
    fn test_void_tail_is_not_a_value() {
        let engine = ScriptEngine::standard();
        let refs = ReferenceSet::new();
        let unit = compile(&engine, "print(1)", &refs).unwrap();
        let tail = engine.tail_expression("print(1)").unwrap();
        assert!(!engine.tail_is_value(&unit, &tail));

        let unit = compile(&engine, "null", &refs).unwrap();
        let tail = engine.tail_expression("null").unwrap();
        assert!(engine.tail_is_value(&unit, &tail));
    }

    #[test]
    fn test_unit_references_include_dependencies() {
        let engine = ScriptEngine::standard();
        let mut refs = ReferenceSet::new();
        refs.insert_module(engine.catalog().get("stats").unwrap().module_ref());
        let unit = compile(&engine, "stats.mean([1, 2]) + math.floor(1.5)", &refs).unwrap();
        let names: Vec<_> = unit.references().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["stats", "math"]);
    }

    #[test]
    fn test_program_serializes() {
        let engine = ScriptEngine::standard();
        let unit = compile(&engine, "let x = [1, 2]", &ReferenceSet::new()).unwrap();
        let json = serde_json::to_value(unit.program()).unwrap();
        assert_eq!(json["statements"][0]["t"], "Let");
        assert_eq!(json["bindings"]["x"]["t"], "List");
    }

    #[tokio::test]
    async fn test_run_returns_environment_and_value() {
        let engine = ScriptEngine::standard();
        let unit = Arc::new(
            compile(&engine, "fn sq(n) = n * n\ny = sq(4)\ny + 1", &ReferenceSet::new()).unwrap(),
        );
        let cancel = CancellationToken::new();
        let outcome = engine
            .run(&unit, Environment::new(), RunContext { args: &[], cancel: &cancel })
            .await
            .unwrap();
        assert_eq!(outcome.value, crate::value::Val::Num(17.0));
        assert_eq!(outcome.env["y"], crate::value::Val::Num(16.0));
    }

    #[tokio::test]
    async fn test_catalog_resolver() {
        let engine = ScriptEngine::standard();
        let resolver = engine.resolver();
        let found = resolver.resolve("stats").await.unwrap();
        assert_eq!(found[0].display, "stats, version=1.0");
        assert_eq!(found[0].dependencies, vec!["math"]);
        assert!(resolver.resolve("nope").await.unwrap().is_empty());
    }
}
