//! Committed submissions
//!
//! The session's state is a linked chain of immutable submissions. Advancing
//! the session allocates a new head that points at the old one, so a failed
//! or cancelled fragment can never leave a partially-updated state behind.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::engine::{CompiledUnit, Environment};
use crate::value::Val;

pub struct Submission<P> {
    unit: Arc<CompiledUnit<P>>,
    env: Environment,
    value: Option<Val>,
    evaluated_at: DateTime<Utc>,
    previous: Option<Arc<Submission<P>>>,
}

impl<P> Submission<P> {
    pub(crate) fn new(
        unit: Arc<CompiledUnit<P>>,
        env: Environment,
        value: Option<Val>,
        previous: Option<Arc<Submission<P>>>,
    ) -> Self {
        Self {
            unit,
            env,
            value,
            evaluated_at: Utc::now(),
            previous,
        }
    }

    pub fn unit(&self) -> &Arc<CompiledUnit<P>> {
        &self.unit
    }

    /// Bindings visible after this submission
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// The captured value, when the fragment produced one
    pub fn value(&self) -> Option<&Val> {
        self.value.as_ref()
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    pub fn previous(&self) -> Option<&Arc<Submission<P>>> {
        self.previous.as_ref()
    }
}

/// Iterator over a submission chain, newest first
pub struct History<'a, P> {
    next: Option<&'a Arc<Submission<P>>>,
}

impl<'a, P> History<'a, P> {
    pub(crate) fn new(head: Option<&'a Arc<Submission<P>>>) -> Self {
        Self { next: head }
    }
}

impl<'a, P> Iterator for History<'a, P> {
    type Item = &'a Arc<Submission<P>>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.previous.as_ref();
        Some(current)
    }
}
