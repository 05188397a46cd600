//! Reference and import tracking
//!
//! A session accumulates two things across fragments: the modules bound to it
//! (`#load "<target>"` directives plus whatever those modules pull in) and the
//! modules imported into unqualified scope (`use <module>`). Both live in a
//! `ReferenceSet`, deduplicated by display key, which only ever grows.
//!
//! # Example
//!
//! ```ignore
//! let mut tracker = ReferenceTracker::new(primary, vec![manifest_resolver]);
//! let found = tracker.scan_for_references("#load \"stats\"\nstats.mean([1, 2])").await?;
//! let mut incoming = ReferenceSet::default();
//! incoming.extend_modules(found);
//! let added = tracker.merge(&incoming);
//! ```

pub mod resolvers;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ResolveError;

pub use resolvers::{CompositeResolver, ManifestResolver, ReferenceResolver};

/// Characters that only appear in the display names of generated units
/// (`<submission#3>`, `*dynamic*`), never in loadable modules
pub const SYNTHETIC_MARKERS: &[char] = &['<', '>', '*'];

/* ===================== Module references ===================== */

/// A resolved handle to an external module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub version: String,
    /// Stable display key, also the deduplication key
    pub display: String,
    /// Names of the modules this one needs at run time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl ModuleRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        let display = format!("{}, version={}", name, version);
        Self {
            name,
            version,
            display,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Whether this entry names a generated unit rather than a real module
    pub fn is_synthetic(&self) -> bool {
        self.display.contains(SYNTHETIC_MARKERS)
    }
}

/// Name of a module imported into unqualified scope
pub type ImportName = String;

/* ===================== Reference set ===================== */

/// Deduplicated, insertion-ordered module references and imports
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    modules: Vec<ModuleRef>,
    module_keys: HashSet<String>,
    imports: Vec<ImportName>,
    import_keys: HashSet<String>,
    /// `#load` targets already resolved, so they are never resolved twice
    targets: HashSet<String>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module; returns false for duplicates and synthetic entries
    pub fn insert_module(&mut self, module: ModuleRef) -> bool {
        if module.is_synthetic() {
            trace!(display = %module.display, "skipping synthetic reference");
            return false;
        }
        if !self.module_keys.insert(module.display.clone()) {
            return false;
        }
        self.modules.push(module);
        true
    }

    pub fn extend_modules(&mut self, modules: impl IntoIterator<Item = ModuleRef>) {
        for module in modules {
            self.insert_module(module);
        }
    }

    /// Insert an import; returns false for duplicates
    pub fn insert_import(&mut self, import: impl Into<ImportName>) -> bool {
        let import = import.into();
        if !self.import_keys.insert(import.clone()) {
            return false;
        }
        self.imports.push(import);
        true
    }

    pub fn mark_target(&mut self, target: impl Into<String>) {
        self.targets.insert(target.into());
    }

    /// Whether a `#load` target needs no resolution: it was resolved before,
    /// or it names a module that is already bound
    pub fn is_bound_target(&self, target: &str) -> bool {
        self.targets.contains(target) || self.contains_module(target)
    }

    pub fn contains_module(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name == name)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleRef> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn is_imported(&self, name: &str) -> bool {
        self.import_keys.contains(name)
    }

    pub fn modules(&self) -> &[ModuleRef] {
        &self.modules
    }

    pub fn imports(&self) -> &[ImportName] {
        &self.imports
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.imports.is_empty()
    }

    /// Merge `other` into self, returning the modules that were new
    pub fn merge(&mut self, other: &ReferenceSet) -> Vec<ModuleRef> {
        let mut added = Vec::new();
        for module in &other.modules {
            if self.insert_module(module.clone()) {
                added.push(module.clone());
            }
        }
        for import in &other.imports {
            self.insert_import(import.clone());
        }
        self.targets.extend(other.targets.iter().cloned());
        added
    }
}

/* ===================== Tracker ===================== */

/// Finds the references and imports a fragment implies and owns the
/// session's accumulated `ReferenceSet`
pub struct ReferenceTracker {
    references: ReferenceSet,
    primary: Arc<dyn ReferenceResolver>,
    alternatives: CompositeResolver,
}

impl ReferenceTracker {
    pub fn new(
        primary: Arc<dyn ReferenceResolver>,
        alternatives: Vec<Arc<dyn ReferenceResolver>>,
    ) -> Self {
        Self {
            references: ReferenceSet::default(),
            primary,
            alternatives: CompositeResolver::new(alternatives),
        }
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    /// Resolve the `#load` targets of `text` that are not bound yet
    ///
    /// The primary resolver's errors propagate; alternative resolvers are a
    /// best-effort fallback chain whose failures are skipped. A target nothing
    /// resolved is reported as `ResolveError::Unresolved`.
    pub async fn scan_for_references(&self, text: &str) -> Result<Vec<ModuleRef>, ResolveError> {
        let mut found = Vec::new();
        for target in load_directives(text) {
            if self.references.is_bound_target(&target) {
                trace!(target = %target, "reference already bound");
                continue;
            }
            let mut resolved = self.primary.resolve(&target).await?;
            resolved.extend(self.alternatives.resolve_all(&target).await);
            if resolved.is_empty() {
                return Err(ResolveError::Unresolved(target));
            }
            found.extend(resolved);
        }
        Ok(found)
    }

    /// The `use <module>` imports of `text`, in order of appearance
    pub fn scan_for_imports(&self, text: &str) -> Vec<ImportName> {
        import_statements(text)
    }

    /// Merge new references into the session's set; returns the modules added
    pub fn merge(&mut self, new: &ReferenceSet) -> Vec<ModuleRef> {
        self.references.merge(new)
    }
}

/* ===================== Directive scanning ===================== */

/// Targets of `#load "<target>"` directives, one per line
pub fn load_directives(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("#load"))
        .filter_map(|rest| {
            let target = rest.trim().trim_end_matches(';').trim();
            let target = target
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .unwrap_or(target);
            (!target.is_empty()).then(|| target.to_string())
        })
        .collect()
}

/// Module names of `use <module>` statements
///
/// Statements are split on newlines and `;`, so `use math; floor(2.5)` works.
pub fn import_statements(text: &str) -> Vec<ImportName> {
    text.split(|c: char| c == '\n' || c == ';')
        .filter_map(|stmt| stmt.trim().strip_prefix("use "))
        .map(|rest| {
            rest.trim()
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
                .collect::<String>()
        })
        .filter(|name| !name.is_empty())
        .collect()
}
