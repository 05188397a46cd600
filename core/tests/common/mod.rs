//! Test helpers shared by the integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use stanza_core::references::{ManifestResolver, ReferenceResolver, ReferenceTracker};
use stanza_core::script::ScriptEngine;
use stanza_core::session::Session;
use stanza_core::{EvaluationResult, Val};
use tokio_util::sync::CancellationToken;

/// A session over the standard catalog with no preloaded references
pub fn new_session() -> Session<ScriptEngine> {
    session_with_paths(Vec::new())
}

/// A session whose manifest resolver searches `paths`
pub fn session_with_paths(paths: Vec<PathBuf>) -> Session<ScriptEngine> {
    let engine = Arc::new(ScriptEngine::standard());
    let primary: Arc<dyn ReferenceResolver> = Arc::new(engine.resolver());
    let manifests: Arc<dyn ReferenceResolver> = Arc::new(ManifestResolver::new(paths, primary.clone()));
    Session::new(engine, ReferenceTracker::new(primary, vec![manifests]))
}

/// Evaluate with no arguments and a token nobody cancels
pub async fn eval(session: &mut Session<ScriptEngine>, text: &str) -> EvaluationResult {
    session.evaluate(text, &[], &CancellationToken::new()).await
}

/// Evaluate and return the captured value, panicking on anything but success
pub async fn eval_value(session: &mut Session<ScriptEngine>, text: &str) -> Option<Val> {
    match eval(session, text).await {
        EvaluationResult::Success { return_value, .. } => return_value,
        other => panic!("Expected success for {:?}, got {:?}", text, other),
    }
}

/// Names of the modules bound to the session, in binding order
pub fn bound_modules(session: &Session<ScriptEngine>) -> Vec<String> {
    session
        .references()
        .modules()
        .iter()
        .map(|m| m.name.clone())
        .collect()
}
