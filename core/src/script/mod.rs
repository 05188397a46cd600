//! stanza script
//!
//! A small dynamically valued, statically checked language used as the
//! session's engine: pest grammar, checker, async evaluator, module catalog,
//! completion source and type shapes for member listing.

pub mod ast;
pub mod checker;
pub mod complete;
pub mod engine;
pub mod eval;
pub mod modules;
pub mod parser;
pub mod shapes;
pub mod types;

pub use engine::{CatalogResolver, FnDecl, ScriptEngine, ScriptProgram};
pub use modules::{FunctionDef, ModuleCatalog, ModuleDef, PRELUDE};
pub use shapes::{module_type_name, MODULES_NAMESPACE};
pub use types::Type;
