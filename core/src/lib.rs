pub mod bridge;
pub mod cli;
pub mod completion;
pub mod config;
pub mod error;
pub mod init;
pub mod introspect;
pub mod references;
pub mod result;
pub mod script;
pub mod session;
pub mod value;

// Re-export main types
pub use error::{Fault, RuntimeError};
pub use result::EvaluationResult;
pub use session::{Engine, Session};
pub use value::Val;

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions, Stanza};
