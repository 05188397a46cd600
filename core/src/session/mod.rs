//! Incremental evaluation session
//!
//! A `Session` owns the chain of committed submissions and the reference
//! tracker. `evaluate` resolves what a fragment references, compiles it onto
//! the current unit, decides whether its tail produces a value, runs it, and
//! commits only when the run completed cleanly. Faults and cancellations
//! leave the session exactly as it was.

mod engine;
mod state;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::completion::Document;
use crate::error::{is_cancellation, Diagnostics, Fault, RunError};
use crate::references::{load_directives, ReferenceSet, ReferenceTracker};
use crate::result::EvaluationResult;

pub use engine::{CompileContext, CompiledUnit, Engine, Environment, Outcome, RunContext};
pub use state::{History, Submission};

pub struct Session<E: Engine> {
    id: Uuid,
    engine: Arc<E>,
    tracker: ReferenceTracker,
    state: Option<Arc<Submission<E::Program>>>,
    next_unit: u64,
}

impl<E: Engine> Session<E> {
    pub fn new(engine: Arc<E>, tracker: ReferenceTracker) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, "session created");
        Self {
            id,
            engine,
            tracker,
            state: None,
            next_unit: 1,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// References and imports accumulated by committed fragments
    pub fn references(&self) -> &ReferenceSet {
        self.tracker.references()
    }

    /// The most recent submission; `None` before the first commit
    pub fn state(&self) -> Option<&Arc<Submission<E::Program>>> {
        self.state.as_ref()
    }

    pub fn current_unit(&self) -> Option<&Arc<CompiledUnit<E::Program>>> {
        self.state.as_ref().map(|s| s.unit())
    }

    /// Committed submissions, newest first
    pub fn history(&self) -> History<'_, E::Program> {
        History::new(self.state.as_ref())
    }

    /// Snapshot of the editing context for completion
    pub fn document(&self, name: impl Into<String>) -> Document<E::Program> {
        Document::new(
            name,
            self.current_unit().cloned(),
            self.tracker.references().clone(),
        )
    }

    /// Evaluate one fragment against the session
    ///
    /// Never fails: every outcome is one of the `EvaluationResult` variants,
    /// and only `Success` advances the session.
    pub async fn evaluate(
        &mut self,
        text: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> EvaluationResult {
        let unit_id = self.next_unit;
        debug!(session = %self.id, unit = unit_id, "evaluating fragment");

        // References and imports the fragment implies
        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session = %self.id, unit = unit_id, "cancelled during reference resolution");
                return EvaluationResult::Cancelled;
            }
            resolved = self.tracker.scan_for_references(text) => resolved,
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!(session = %self.id, unit = unit_id, error = %err, "reference resolution failed");
                return EvaluationResult::Fault {
                    cause: Fault::Resolve(err),
                };
            }
        };

        let mut incoming = ReferenceSet::new();
        for target in load_directives(text) {
            incoming.mark_target(target);
        }
        incoming.extend_modules(resolved);
        for import in self.tracker.scan_for_imports(text) {
            incoming.insert_import(import);
        }

        // Tentative context: nothing is committed until the run succeeds
        let mut context = self.tracker.references().clone();
        context.merge(&incoming);

        let compiled = self.engine.compile(
            text,
            &CompileContext {
                id: unit_id,
                references: &context,
                previous: self.current_unit().cloned(),
            },
        );
        let unit = match compiled {
            Ok(unit) => Arc::new(unit),
            Err(diagnostics) => {
                debug!(session = %self.id, unit = unit_id, errors = diagnostics.0.len(), "compilation failed");
                return EvaluationResult::Fault {
                    cause: Fault::Compile(diagnostics),
                };
            }
        };
        if cancel.is_cancelled() {
            debug!(session = %self.id, unit = unit_id, "cancelled after compilation");
            return EvaluationResult::Cancelled;
        }

        // Syntactic tail first, then its static type against the new unit
        let captures_value = self
            .engine
            .tail_expression(text)
            .map_or(false, |tail| self.engine.tail_is_value(&unit, &tail));

        let env = self
            .state
            .as_ref()
            .map(|s| s.env().clone())
            .unwrap_or_default();
        let outcome = match self.engine.run(&unit, env, RunContext { args, cancel }).await {
            Ok(outcome) => outcome,
            Err(RunError::Cancelled(_)) => {
                debug!(session = %self.id, unit = unit_id, "cancelled during execution");
                return EvaluationResult::Cancelled;
            }
            Err(RunError::Runtime(err)) if is_cancellation(&err) => {
                debug!(session = %self.id, unit = unit_id, "cancelled during execution (inner cause)");
                return EvaluationResult::Cancelled;
            }
            Err(RunError::Runtime(err)) => {
                debug!(session = %self.id, unit = unit_id, error = %err, "execution faulted");
                return EvaluationResult::Fault {
                    cause: Fault::Runtime(err),
                };
            }
        };

        // Commit: fold the unit's own references back, then advance
        for module in unit.references() {
            incoming.insert_module(module.clone());
        }
        let loaded_modules = self.tracker.merge(&incoming);
        let return_value = captures_value.then(|| outcome.value);

        self.state = Some(Arc::new(Submission::new(
            unit,
            outcome.env,
            return_value.clone(),
            self.state.take(),
        )));
        self.next_unit += 1;

        if !loaded_modules.is_empty() {
            info!(
                session = %self.id,
                modules = ?loaded_modules.iter().map(|m| m.display.as_str()).collect::<Vec<_>>(),
                "modules loaded"
            );
        }
        debug!(session = %self.id, unit = unit_id, has_value = return_value.is_some(), "fragment committed");

        EvaluationResult::Success {
            source_text: text.to_string(),
            return_value,
            loaded_modules,
        }
    }

    /// Compile against the accumulated references without touching the session
    pub fn compile_only(&self, text: &str) -> Result<CompiledUnit<E::Program>, Diagnostics> {
        self.engine.compile(
            text,
            &CompileContext {
                id: self.next_unit,
                references: self.tracker.references(),
                previous: self.current_unit().cloned(),
            },
        )
    }

    /// Load configured references and imports, then run an optional script
    ///
    /// Returns one result per evaluated fragment; an empty configuration
    /// evaluates nothing.
    pub async fn preload(
        &mut self,
        references: &[String],
        imports: &[String],
        script: Option<&str>,
        cancel: &CancellationToken,
    ) -> Vec<EvaluationResult> {
        let mut results = Vec::new();

        let mut prelude = String::new();
        for reference in references {
            prelude.push_str(&format!("#load \"{}\"\n", reference));
        }
        for import in imports {
            prelude.push_str(&format!("use {}\n", import));
        }
        if !prelude.is_empty() {
            results.push(self.evaluate(&prelude, &[], cancel).await);
        }
        if let Some(script) = script.filter(|s| !s.trim().is_empty()) {
            results.push(self.evaluate(script, &[], cancel).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Cancelled, Diagnostic, ResolveError, RuntimeError, HOST_ERROR, USER_ERROR};
    use crate::references::{ModuleRef, ReferenceResolver};
    use crate::value::Val;
    use async_trait::async_trait;
    use std::future::Future;

    /// Engine whose behaviour is chosen by the fragment text
    struct ScriptedEngine;

    impl Engine for ScriptedEngine {
        type Program = String;
        type Tail = ();

        fn compile(
            &self,
            text: &str,
            ctx: &CompileContext<'_, String>,
        ) -> Result<CompiledUnit<String>, Diagnostics> {
            if text.contains("syntax error") {
                return Err(Diagnostics::single(Diagnostic::new("bad syntax", 0, 0)));
            }
            let mut references = ctx.references.modules().to_vec();
            references.push(ModuleRef::new("*generated*", "0"));
            Ok(CompiledUnit::new(
                ctx.id,
                text,
                text.to_string(),
                references,
                ctx.previous.clone(),
            ))
        }

        fn tail_expression(&self, text: &str) -> Option<()> {
            (!text.ends_with(';')).then_some(())
        }

        fn tail_is_value(&self, unit: &CompiledUnit<String>, _tail: &()) -> bool {
            !unit.program().starts_with("void")
        }

        fn run(
            &self,
            unit: &Arc<CompiledUnit<String>>,
            env: Environment,
            ctx: RunContext<'_>,
        ) -> impl Future<Output = Result<Outcome, RunError>> + Send {
            let action = unit.program().lines().last().unwrap_or_default().to_string();
            let cancel = ctx.cancel.clone();
            async move {
                let result: Result<Outcome, RunError> = match action.as_str() {
                    "boom" => Err(RuntimeError::new(USER_ERROR, "boom").into()),
                    "hang" => {
                        cancel.cancelled().await;
                        Err(Cancelled.into())
                    }
                    "wrapped" => Err(RuntimeError::new(HOST_ERROR, "timer")
                        .with_source(Cancelled)
                        .into()),
                    _ => {
                        let mut env = env;
                        env.insert(action.clone(), Val::Num(action.len() as f64));
                        Ok(Outcome {
                            env,
                            value: Val::Str(action),
                        })
                    }
                };
                result
            }
        }
    }

    struct Modules;

    #[async_trait]
    impl ReferenceResolver for Modules {
        async fn resolve(&self, target: &str) -> Result<Vec<ModuleRef>, ResolveError> {
            Ok(vec![ModuleRef::new(target, "1.0")])
        }
    }

    fn session() -> Session<ScriptedEngine> {
        Session::new(
            Arc::new(ScriptedEngine),
            ReferenceTracker::new(Arc::new(Modules), vec![]),
        )
    }

    #[tokio::test]
    async fn test_terminator_suppresses_value() {
        let mut session = session();
        let cancel = CancellationToken::new();

        let result = session.evaluate("a", &[], &cancel).await;
        assert_eq!(result.return_value(), Some(&Val::Str("a".into())));

        let result = session.evaluate("b;", &[], &cancel).await;
        assert!(result.is_success());
        assert_eq!(result.return_value(), None);

        let result = session.evaluate("void c", &[], &cancel).await;
        assert!(result.is_success());
        assert_eq!(result.return_value(), None);
    }

    #[tokio::test]
    async fn test_fault_leaves_state_untouched() {
        let mut session = session();
        let cancel = CancellationToken::new();
        session.evaluate("#load \"a\"", &[], &cancel).await;
        let before = session.state().cloned().unwrap();
        let refs_before = session.references().len();

        let result = session.evaluate("#load \"b\"\nboom", &[], &cancel).await;
        assert!(matches!(result.fault(), Some(Fault::Runtime(_))));

        let result = session.evaluate("syntax error", &[], &cancel).await;
        assert!(matches!(result.fault(), Some(Fault::Compile(_))));

        assert!(Arc::ptr_eq(session.state().unwrap(), &before));
        assert_eq!(session.references().len(), refs_before);
    }

    #[tokio::test]
    async fn test_cancellation_direct_and_inner() {
        let mut session = session();
        let cancel = CancellationToken::new();
        session.evaluate("x", &[], &cancel).await;
        let before = session.state().cloned().unwrap();

        let result = session.evaluate("wrapped", &[], &cancel).await;
        assert!(matches!(result, EvaluationResult::Cancelled));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result = session.evaluate("hang", &[], &cancel).await;
        assert!(matches!(result, EvaluationResult::Cancelled));
        assert!(Arc::ptr_eq(session.state().unwrap(), &before));
    }

    #[tokio::test]
    async fn test_loaded_modules_and_synthetic_filter() {
        let mut session = session();
        let cancel = CancellationToken::new();

        let result = session.evaluate("#load \"a\"\nx", &[], &cancel).await;
        let EvaluationResult::Success { loaded_modules, .. } = result else {
            panic!("expected success");
        };
        assert_eq!(loaded_modules.len(), 1);
        assert_eq!(loaded_modules[0].display, "a, version=1.0");

        let result = session.evaluate("#load \"a\"\ny", &[], &cancel).await;
        let EvaluationResult::Success { loaded_modules, .. } = result else {
            panic!("expected success");
        };
        assert!(loaded_modules.is_empty());
        assert!(session.references().modules().iter().all(|m| !m.is_synthetic()));
    }

    #[tokio::test]
    async fn test_history_and_compile_only() {
        let mut session = session();
        let cancel = CancellationToken::new();
        session.evaluate("first", &[], &cancel).await;
        session.evaluate("second", &[], &cancel).await;

        let unit = session.compile_only("third").unwrap();
        assert_eq!(unit.previous().unwrap().source(), "second");

        let sources: Vec<_> = session.history().map(|s| s.unit().source().to_string()).collect();
        assert_eq!(sources, vec!["second", "first"]);
        assert_eq!(session.state().unwrap().env().len(), 2);
    }
}
