//! Initialization for stanza
//!
//! Builds the services a front end needs from configuration: an evaluation
//! session, a completion cache over the same engine, and a tool bridge with
//! its own session. Nothing is global; each `Stanza` is independent.
//!
//! # Example
//!
//! ```ignore
//! use stanza_core::init::InitBuilder;
//!
//! // Configuration from stanza.toml and STANZA_* variables
//! let mut stanza = InitBuilder::new().init().await?;
//!
//! // Explicit configuration file and an extra host module
//! let mut stanza = InitBuilder::new()
//!     .config_path("repl.toml")
//!     .module(ModuleDef::new("host", "1.0", "Host functions"))
//!     .init()
//!     .await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bridge::{BridgeConfig, ToolBridge};
use crate::completion::CompletionCache;
use crate::config::Config;
use crate::references::{ManifestResolver, ReferenceResolver, ReferenceTracker};
use crate::result::EvaluationResult;
use crate::script::{ModuleCatalog, ModuleDef, ScriptEngine};
use crate::session::Session;

/// Options for initializing stanza
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Use this configuration instead of loading one
    pub config: Option<Config>,

    /// Host modules registered next to the standard ones
    pub modules: Vec<ModuleDef>,

    /// Skip the configured references and load script
    pub skip_preload: bool,
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    /// Create a new builder with default options
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    /// Set the config file path
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Use an already loaded configuration
    pub fn config(mut self, config: Config) -> Self {
        self.options.config = Some(config);
        self
    }

    /// Register a host module
    pub fn module(mut self, module: ModuleDef) -> Self {
        self.options.modules.push(module);
        self
    }

    /// Set whether to skip the configured preload
    pub fn skip_preload(mut self, skip: bool) -> Self {
        self.options.skip_preload = skip;
        self
    }

    /// Initialize stanza with the configured options
    pub async fn init(self) -> Result<Stanza> {
        initialize(self.options).await
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a front end works with
pub struct Stanza {
    pub config: Config,
    pub engine: Arc<ScriptEngine>,
    pub session: Session<ScriptEngine>,
    pub completions: CompletionCache<ScriptEngine>,
    pub bridge: ToolBridge,
    /// Results of the preload, in evaluation order
    pub preload: Vec<EvaluationResult>,
}

/// Initialize stanza with the given options
///
/// Loads configuration (unless given), builds the engine with the standard
/// and host modules, then evaluates the configured references, imports and
/// load script. Preload faults are logged and kept in `Stanza::preload`;
/// they do not fail initialization.
pub async fn initialize(options: InitOptions) -> Result<Stanza> {
    dotenvy::dotenv().ok();

    let config = match options.config {
        Some(config) => config,
        None => Config::builder()
            .config_path(options.config_path)
            .build()
            .context("Failed to load configuration")?,
    };

    let mut catalog = ModuleCatalog::standard();
    for module in options.modules {
        debug!(module = %module.name, "registering host module");
        catalog.register(module);
    }
    let engine = Arc::new(ScriptEngine::new(catalog));

    let mut session = Session::new(engine.clone(), tracker(&engine, &config));
    let mut bridge_session = Session::new(engine.clone(), tracker(&engine, &config));

    let mut preload = Vec::new();
    if !options.skip_preload {
        let script = match &config.load_script {
            Some(path) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read load script {}", path.display()))?,
            ),
            None => None,
        };
        let cancel = CancellationToken::new();
        preload = session
            .preload(&config.references, &config.imports, script.as_deref(), &cancel)
            .await;
        for result in &preload {
            if let Some(fault) = result.fault() {
                warn!(error = %fault, "preload failed");
            }
        }
        for result in bridge_session
            .preload(&config.references, &config.imports, None, &cancel)
            .await
        {
            if let Some(fault) = result.fault() {
                warn!(error = %fault, "bridge preload failed");
            }
        }
    }

    let completions = CompletionCache::new(engine.as_ref().clone())
        .with_ttl(config.completion_ttl())
        .with_rich_display(config.rich_display);

    let bridge = ToolBridge::new(
        BridgeConfig {
            server_name: config.server_name.clone(),
            globals_module: config.globals_module.clone(),
        },
        bridge_session,
    );

    Ok(Stanza {
        config,
        engine,
        session,
        completions,
        bridge,
        preload,
    })
}

/// Catalog resolver first, then project manifests on the module paths
fn tracker(engine: &Arc<ScriptEngine>, config: &Config) -> ReferenceTracker {
    let primary: Arc<dyn ReferenceResolver> = Arc::new(engine.resolver());
    let manifests: Arc<dyn ReferenceResolver> =
        Arc::new(ManifestResolver::new(config.module_paths.clone(), primary.clone()));
    ReferenceTracker::new(primary, vec![manifests])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{FunctionDef, Type};
    use crate::value::Val;

    fn config() -> Config {
        Config {
            references: vec!["stats".to_string()],
            imports: vec!["math".to_string()],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_preload_binds_references_and_imports() {
        let mut stanza = InitBuilder::new().config(config()).init().await.unwrap();
        assert_eq!(stanza.preload.len(), 1);
        assert!(stanza.preload[0].is_success());

        let names: Vec<_> = stanza
            .session
            .references()
            .modules()
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["stats", "math"]);

        let cancel = CancellationToken::new();
        let result = stanza.session.evaluate("floor(stats.mean([1, 2]))", &[], &cancel).await;
        assert_eq!(result.return_value(), Some(&Val::Num(1.0)));
    }

    #[tokio::test]
    async fn test_host_module_reaches_bridge() {
        let host = ModuleDef::new("host", "1.0", "Host functions").function(FunctionDef::sync(
            "answer",
            &[],
            Type::Num,
            "The answer",
            |_| Ok(Val::Num(42.0)),
        ));
        let stanza = InitBuilder::new()
            .config(Config {
                references: vec!["host".to_string()],
                globals_module: "host".to_string(),
                ..Config::default()
            })
            .module(host)
            .init()
            .await
            .unwrap();

        let response = stanza
            .bridge
            .call("invoke", &serde_json::json!({ "command": "answer()" }))
            .await
            .unwrap();
        assert!(response.content[0].text.contains("42"));
        assert_eq!(stanza.bridge.globals_type(), "script.modules.host");
    }

    #[tokio::test]
    async fn test_bridge_globals_bound_without_preload() {
        let host = ModuleDef::new("host", "1.0", "Host functions").function(FunctionDef::sync(
            "answer",
            &[],
            Type::Num,
            "The answer",
            |_| Ok(Val::Num(42.0)),
        ));
        let stanza = InitBuilder::new()
            .config(Config {
                globals_module: "host".to_string(),
                ..Config::default()
            })
            .module(host)
            .init()
            .await
            .unwrap();
        let response = stanza
            .bridge
            .call("invoke", &serde_json::json!({ "command": "answer()" }))
            .await
            .unwrap();
        assert!(!response.is_error, "{}", response.content[0].text);
        let body: serde_json::Value = serde_json::from_str(&response.content[0].text).unwrap();
        assert_eq!(body["result"], 42.0);

        let stanza = InitBuilder::new()
            .config(Config {
                globals_module: "math".to_string(),
                ..Config::default()
            })
            .skip_preload(true)
            .init()
            .await
            .unwrap();
        for _ in 0..2 {
            let response = stanza
                .bridge
                .call("invoke", &serde_json::json!({ "command": "floor(1.5)" }))
                .await
                .unwrap();
            assert!(!response.is_error, "{}", response.content[0].text);
            let body: serde_json::Value = serde_json::from_str(&response.content[0].text).unwrap();
            assert_eq!(body["result"], 1.0);
        }
    }

    #[tokio::test]
    async fn test_missing_load_script_fails_init() {
        let result = InitBuilder::new()
            .config(Config {
                load_script: Some(PathBuf::from("/nonexistent/init.stz")),
                ..Config::default()
            })
            .init()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_skip_preload() {
        let stanza = InitBuilder::new().config(config()).skip_preload(true).init().await.unwrap();
        assert!(stanza.preload.is_empty());
        assert!(stanza.session.references().is_empty());
    }
}
