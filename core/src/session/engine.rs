//! The compile/run capability a session drives
//!
//! The session knows nothing about the language it evaluates. An `Engine`
//! compiles fragment text into a unit chained onto the previous one, says
//! whether the fragment's tail statement produces a value, and runs units.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Diagnostics, RunError};
use crate::references::{ModuleRef, ReferenceSet};
use crate::value::Val;

/// Bindings visible after a unit ran, by name
pub type Environment = BTreeMap<String, Val>;

/* ===================== Compiled units ===================== */

/// One compiled fragment, chained onto the unit it was compiled against
///
/// Units are immutable once built; the chain is shared through `Arc`.
pub struct CompiledUnit<P> {
    id: u64,
    source: String,
    program: P,
    references: Vec<ModuleRef>,
    previous: Option<Arc<CompiledUnit<P>>>,
}

impl<P> CompiledUnit<P> {
    pub fn new(
        id: u64,
        source: impl Into<String>,
        program: P,
        references: Vec<ModuleRef>,
        previous: Option<Arc<CompiledUnit<P>>>,
    ) -> Self {
        Self {
            id,
            source: source.into(),
            program,
            references,
            previous,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display name of the unit itself; synthetic, never a loadable module
    pub fn name(&self) -> String {
        format!("<submission#{}>", self.id)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> &P {
        &self.program
    }

    /// Modules this unit references, transitively, as reported by the engine
    pub fn references(&self) -> &[ModuleRef] {
        &self.references
    }

    pub fn previous(&self) -> Option<&Arc<CompiledUnit<P>>> {
        self.previous.as_ref()
    }

    /// This unit, then each earlier unit back to the first
    pub fn ancestors(&self) -> impl Iterator<Item = &CompiledUnit<P>> {
        std::iter::successors(Some(self), |unit| unit.previous.as_deref())
    }
}

impl<P: fmt::Debug> fmt::Debug for CompiledUnit<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("program", &self.program)
            .field("references", &self.references)
            .field("previous", &self.previous.as_ref().map(|p| p.id))
            .finish()
    }
}

/* ===================== Contexts ===================== */

/// What a fragment compiles against
pub struct CompileContext<'a, P> {
    /// Id the new unit must carry
    pub id: u64,
    /// Accumulated references and imports, including the fragment's own
    pub references: &'a ReferenceSet,
    /// The unit to chain onto; `None` for the first fragment
    pub previous: Option<Arc<CompiledUnit<P>>>,
}

/// What a unit runs with
pub struct RunContext<'a> {
    /// Extra arguments exposed to the fragment
    pub args: &'a [String],
    pub cancel: &'a CancellationToken,
}

/// A completed run: the bindings after the unit and the tail statement's value
#[derive(Debug, Clone)]
pub struct Outcome {
    pub env: Environment,
    pub value: Val,
}

/* ===================== Engine ===================== */

pub trait Engine: Send + Sync + 'static {
    /// Engine-specific compiled form of a fragment
    type Program: fmt::Debug + Send + Sync + 'static;
    /// The syntactic tail expression found by `tail_expression`
    type Tail: Send;

    /// Compile `text` into a unit chained onto `ctx.previous`
    fn compile(
        &self,
        text: &str,
        ctx: &CompileContext<'_, Self::Program>,
    ) -> Result<CompiledUnit<Self::Program>, Diagnostics>;

    /// Syntactic check: the last top-level statement, when it is an
    /// expression statement without a terminator
    fn tail_expression(&self, text: &str) -> Option<Self::Tail>;

    /// Semantic check: whether `tail`'s static type in `unit` is not void
    fn tail_is_value(&self, unit: &CompiledUnit<Self::Program>, tail: &Self::Tail) -> bool;

    /// Run a compiled unit on top of `env`
    ///
    /// Cancellation must surface as `RunError::Cancelled`, or as a runtime
    /// error with `Cancelled` somewhere in its source chain. The unit is
    /// shared so an engine may move the run off the caller's thread.
    fn run(
        &self,
        unit: &Arc<CompiledUnit<Self::Program>>,
        env: Environment,
        ctx: RunContext<'_>,
    ) -> impl Future<Output = Result<Outcome, RunError>> + Send;
}
