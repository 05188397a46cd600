//! Error types shared by the session, the tracker, the completion cache and
//! the tool bridge.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/* ===================== Runtime error codes ===================== */

pub const UNDEFINED_VARIABLE: &str = "UndefinedVariable";
pub const TYPE_ERROR: &str = "TypeError";
pub const WRONG_ARG_COUNT: &str = "WrongArgCount";
pub const WRONG_ARG_TYPE: &str = "WrongArgType";
pub const PROPERTY_NOT_FOUND: &str = "PropertyNotFound";
pub const DIVISION_BY_ZERO: &str = "DivisionByZero";
pub const UNKNOWN_FUNCTION: &str = "UnknownFunction";
pub const USER_ERROR: &str = "Error";
pub const HOST_ERROR: &str = "HostError";
pub const RECURSION_LIMIT: &str = "RecursionLimit";

/* ===================== Cancellation ===================== */

/// Marker error for a cooperative cancellation observed by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("evaluation was cancelled")]
pub struct Cancelled;

/// Whether `err` is a cancellation, or has one anywhere in its source chain
pub fn is_cancellation(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<Cancelled>().is_some() {
            return true;
        }
        current = e.source();
    }
    false
}

/* ===================== Compile diagnostics ===================== */

/// One compile-time problem, located by 0-indexed line and column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{}): error: {}",
            self.line + 1,
            self.col + 1,
            self.message
        )
    }
}

/// All diagnostics reported for a fragment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn single(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl StdError for Diagnostics {}

/* ===================== Runtime faults ===================== */

/// An error raised while a compiled unit runs
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct RuntimeError {
    pub code: &'static str,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl RuntimeError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// What an engine's `run` reports when it does not complete normally
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// The cause carried by `EvaluationResult::Fault`
#[derive(Debug, Error)]
pub enum Fault {
    #[error("compilation failed\n{0}")]
    Compile(#[source] Diagnostics),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("reference resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

impl Fault {
    /// Full rendering including the source chain, for callers that print faults
    pub fn detail(&self) -> String {
        let mut out = self.to_string();
        let mut source = match self {
            Fault::Compile(_) => None,
            Fault::Runtime(err) => err.source(),
            Fault::Resolve(err) => err.source(),
        };
        while let Some(err) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

/* ===================== Reference resolution ===================== */

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("module '{0}' not found")]
    UnknownModule(String),
    #[error("reference '{0}' could not be resolved")]
    Unresolved(String),
}

/* ===================== Completion ===================== */

#[derive(Debug, Error)]
pub enum CompletionError {
    /// The candidate source reached a state it cannot compute from; known to
    /// be transient and never surfaced to callers of the cache
    #[error("completion source is in an inconsistent state: {0}")]
    InconsistentState(String),
    #[error("caret {caret} is past the end of the text ({len} bytes)")]
    CaretOutOfRange { caret: usize, len: usize },
    #[error("caret {caret} is inside a multi-byte character")]
    CaretNotOnCharBoundary { caret: usize },
}

/* ===================== Tool bridge ===================== */

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Missing required argument '{0}'")]
    MissingArgument(&'static str),
    #[error("Argument '{0}' must be a string")]
    InvalidArgument(&'static str),
    #[error("Unknown tool: '{0}'")]
    UnknownTool(String),
    #[error("Type not found: '{0}'")]
    TypeNotFound(String),
    #[error("Evaluation cancelled")]
    Cancelled,
}
