//! The outcome of evaluating one fragment

use crate::error::Fault;
use crate::references::ModuleRef;
use crate::value::Val;

/// Result of `Session::evaluate`
///
/// Exactly one of the three outcomes; callers match exhaustively.
#[derive(Debug)]
pub enum EvaluationResult {
    /// The fragment ran to completion and the session advanced
    Success {
        source_text: String,
        /// `None` when the tail statement has no expression value (terminated
        /// or void-typed); `Some(Val::Null)` when the tail evaluated to null
        return_value: Option<Val>,
        /// Modules that became bound to the session during this call
        loaded_modules: Vec<ModuleRef>,
    },
    /// Compilation or execution failed; the session did not advance
    Fault { cause: Fault },
    /// The cancellation signal fired; the session did not advance
    Cancelled,
}

impl EvaluationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, EvaluationResult::Success { .. })
    }

    /// The captured value of a successful evaluation, if any
    pub fn return_value(&self) -> Option<&Val> {
        match self {
            EvaluationResult::Success { return_value, .. } => return_value.as_ref(),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            EvaluationResult::Fault { cause } => Some(cause),
            _ => None,
        }
    }
}
