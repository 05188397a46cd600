//! Reference resolvers
//!
//! A resolver maps one `#load` target to zero or more modules. The session's
//! tracker consults one primary resolver and a chain of alternatives; the
//! alternatives' results are unioned and their failures are never fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use super::ModuleRef;
use crate::error::ResolveError;

/// Resolves a `#load` target to module references
///
/// Returning an empty list means "not mine"; errors mean the resolver
/// recognized the target but failed to resolve it.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    async fn resolve(&self, target: &str) -> Result<Vec<ModuleRef>, ResolveError>;
}

/* ===================== Composite ===================== */

/// Fallback chain of alternative resolvers
pub struct CompositeResolver {
    resolvers: Vec<Arc<dyn ReferenceResolver>>,
}

impl CompositeResolver {
    pub fn new(resolvers: Vec<Arc<dyn ReferenceResolver>>) -> Self {
        Self { resolvers }
    }

    /// Union of every resolver's result; failing resolvers are skipped
    pub async fn resolve_all(&self, target: &str) -> Vec<ModuleRef> {
        let mut resolved = Vec::new();
        for resolver in &self.resolvers {
            match resolver.resolve(target).await {
                Ok(modules) => resolved.extend(modules),
                Err(e) => {
                    trace!(target = %target, error = %e, "alternative resolver failed; skipping");
                }
            }
        }
        resolved
    }
}

/* ===================== Project manifests ===================== */

/// Project manifest read by `ManifestResolver`
///
/// ```toml
/// [project]
/// name = "reports"
/// references = ["stats", "text"]
/// ```
#[derive(Debug, Deserialize)]
struct Manifest {
    project: ProjectSection,
}

#[derive(Debug, Deserialize)]
struct ProjectSection {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    references: Vec<String>,
}

/// Resolves `#load "<path>.toml"` to every module the project manifest lists
///
/// Relative paths are tried against the working directory first, then each
/// configured search directory. Listed modules go through `modules`.
pub struct ManifestResolver {
    search_dirs: Vec<PathBuf>,
    modules: Arc<dyn ReferenceResolver>,
}

impl ManifestResolver {
    pub fn new(search_dirs: Vec<PathBuf>, modules: Arc<dyn ReferenceResolver>) -> Self {
        Self {
            search_dirs,
            modules,
        }
    }

    fn locate(&self, target: &str) -> PathBuf {
        let path = Path::new(target);
        if path.is_absolute() || path.exists() {
            return path.to_path_buf();
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| path.to_path_buf())
    }
}

#[async_trait]
impl ReferenceResolver for ManifestResolver {
    async fn resolve(&self, target: &str) -> Result<Vec<ModuleRef>, ResolveError> {
        if !target.ends_with(".toml") {
            return Ok(Vec::new());
        }

        let path = self.locate(target);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ResolveError::Io {
                path: path.clone(),
                source,
            })?;
        let manifest: Manifest =
            toml::from_str(&content).map_err(|source| ResolveError::Manifest {
                path: path.clone(),
                source,
            })?;

        debug!(
            manifest = %path.display(),
            project = manifest.project.name.as_deref().unwrap_or("<unnamed>"),
            references = manifest.project.references.len(),
            "resolving project manifest"
        );

        let mut modules = Vec::new();
        for name in &manifest.project.references {
            let resolved = self.modules.resolve(name).await?;
            if resolved.is_empty() {
                return Err(ResolveError::UnknownModule(name.clone()));
            }
            modules.extend(resolved);
        }
        Ok(modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct NamedModules;

    #[async_trait]
    impl ReferenceResolver for NamedModules {
        async fn resolve(&self, target: &str) -> Result<Vec<ModuleRef>, ResolveError> {
            match target {
                "stats" | "text" => Ok(vec![ModuleRef::new(target, "1.0")]),
                _ => Ok(vec![]),
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl ReferenceResolver for Failing {
        async fn resolve(&self, target: &str) -> Result<Vec<ModuleRef>, ResolveError> {
            Err(ResolveError::UnknownModule(target.to_string()))
        }
    }

    fn write_manifest(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_manifest_lists_modules() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "reports.toml",
            "[project]\nname = \"reports\"\nreferences = [\"stats\", \"text\"]\n",
        );

        let resolver = ManifestResolver::new(vec![dir.path().to_path_buf()], Arc::new(NamedModules));
        let modules = resolver.resolve("reports.toml").await.unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["stats", "text"]);
    }

    #[tokio::test]
    async fn test_manifest_ignores_other_targets() {
        let resolver = ManifestResolver::new(vec![], Arc::new(NamedModules));
        assert!(resolver.resolve("stats").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_io_error() {
        let resolver = ManifestResolver::new(vec![], Arc::new(NamedModules));
        let err = resolver.resolve("does/not/exist.toml").await.unwrap_err();
        assert!(matches!(err, ResolveError::Io { .. }));
    }

    #[tokio::test]
    async fn test_malformed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), "bad.toml", "[project\nreferences = 3");
        let resolver = ManifestResolver::new(vec![], Arc::new(NamedModules));
        let err = resolver
            .resolve(path.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Manifest { .. }));
    }

    #[tokio::test]
    async fn test_composite_skips_failures() {
        let composite = CompositeResolver::new(vec![Arc::new(Failing), Arc::new(NamedModules)]);
        let modules = composite.resolve_all("stats").await;
        assert_eq!(modules.len(), 1);
    }
}
