//! Configuration
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `STANZA_*` environment variables. The file is
//! `stanza.toml` in the working directory unless `STANZA_CONFIG_PATH` or an
//! explicit path names another one.
//!
//! ```toml
//! rich_display = true
//! completion_ttl_secs = 30
//! references = ["math", "stats"]
//! imports = ["math"]
//! module_paths = ["./project"]
//! load_script = "init.stz"
//! globals_module = "core"
//! server_name = "stanza"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "STANZA_CONFIG_PATH";

const DEFAULT_FILE: &str = "stanza";
const ENV_PREFIX: &str = "STANZA";
const LIST_KEYS: &[&str] = &["references", "imports", "module_paths"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix completion items with a symbol for their kind
    pub rich_display: bool,
    pub completion_ttl_secs: u64,
    /// Modules loaded before the first prompt
    pub references: Vec<String>,
    /// Modules imported into unqualified scope before the first prompt
    pub imports: Vec<String>,
    /// Directories searched for `#load "<manifest>.toml"` targets
    pub module_paths: Vec<PathBuf>,
    /// Script evaluated after the references are loaded
    pub load_script: Option<PathBuf>,
    /// Module whose members tool callers use unqualified
    pub globals_module: String,
    pub server_name: String,
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rich_display: false,
            completion_ttl_secs: 60,
            references: vec!["math".to_string(), "text".to_string(), "time".to_string()],
            imports: Vec::new(),
            module_paths: Vec::new(),
            load_script: None,
            globals_module: "core".to_string(),
            server_name: "stanza".to_string(),
            trace: false,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default file location and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn completion_ttl(&self) -> Duration {
        Duration::from_secs(self.completion_ttl_secs)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigBuilder {
    /// Explicit configuration file; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Skip `STANZA_*` environment variables
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let ConfigBuilder {
            config_path,
            skip_env,
        } = self;
        let use_env = !skip_env;

        let explicit = config_path.or_else(|| {
            if use_env {
                std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from)
            } else {
                None
            }
        });

        let mut builder = config::Config::builder();
        builder = match &explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.clone()));
                }
                builder.add_source(config::File::from(path.as_path()).required(true))
            }
            None => builder.add_source(config::File::with_name(DEFAULT_FILE).required(false)),
        };
        if use_env {
            let mut env = config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",");
            for key in LIST_KEYS {
                env = env.with_list_parse_key(key);
            }
            builder = builder.add_source(env);
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.references, vec!["math", "text", "time"]);
        assert_eq!(config.completion_ttl(), Duration::from_secs(60));
        assert_eq!(config.globals_module, "core");
        assert!(!config.rich_display);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "rich_display = true\ncompletion_ttl_secs = 5\nreferences = [\"stats\"]\nload_script = \"init.stz\""
        )
        .unwrap();

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .without_env()
            .build()
            .unwrap();
        assert!(config.rich_display);
        assert_eq!(config.completion_ttl(), Duration::from_secs(5));
        assert_eq!(config.references, vec!["stats"]);
        assert_eq!(config.load_script, Some(PathBuf::from("init.stz")));
        // Untouched keys keep their defaults
        assert_eq!(config.server_name, "stanza");
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/stanza.toml")))
            .without_env()
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "completion_ttl_secs = \"soon\"").unwrap();
        let err = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .without_env()
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
