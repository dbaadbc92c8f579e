//! Server configuration.
//!
//! [`ServerConfig`] aggregates the tunables of every component. It is read
//! from an optional JSON file named by `GRAPHMEND_CONFIG`, after which the
//! environment overrides apply:
//!
//! - `GRAPHMEND_DB_PATH`: SQLite database file path (default: "graphmend.db")
//! - `GRAPHMEND_PORT`: Server listen port (default: 3000)
//! - `GRAPHMEND_GENERATOR_URL`, `GRAPHMEND_GENERATOR_MODEL`,
//!   `GRAPHMEND_GENERATOR_API_KEY`: OpenAI-compatible fix generator
//! - `GRAPHMEND_VALIDATOR_URL`: sandbox validation endpoint

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use graphmend_memory::MemoryConfig;
use graphmend_retrieval::RetrievalConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables of the orchestration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Refinement rounds before a session escalates.
    pub max_iterations: usize,
    pub generator_timeout_ms: u64,
    pub validator_timeout_ms: u64,
    /// Fix templates from memory passed to the generator per attempt.
    pub template_hints: usize,
    /// How long a finished session stays queryable.
    pub session_retention_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            max_iterations: 10,
            generator_timeout_ms: 60_000,
            validator_timeout_ms: 300_000,
            template_hints: 3,
            session_retention_secs: 3_600,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid("max_iterations must be positive".into()));
        }
        if self.generator_timeout_ms == 0 || self.validator_timeout_ms == 0 {
            return Err(ConfigError::Invalid("collaborator timeouts must be positive".into()));
        }
        if self.session_retention_secs == 0 {
            return Err(ConfigError::Invalid("session_retention_secs must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub api_base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub db_path: String,
    pub port: u16,
    /// Dimension of the query embedder; must match the ingested nodes.
    pub embedding_dimension: usize,
    pub retrieval: RetrievalConfig,
    pub memory: MemoryConfig,
    pub controller: ControllerConfig,
    pub generator: Option<GeneratorConfig>,
    pub validator: Option<ValidatorConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            db_path: "graphmend.db".to_string(),
            port: 3000,
            embedding_dimension: 256,
            retrieval: RetrievalConfig::default(),
            memory: MemoryConfig::default(),
            controller: ControllerConfig::default(),
            generator: None,
            validator: None,
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration using `lookup` to read variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("GRAPHMEND_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => ServerConfig::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(path) = lookup("GRAPHMEND_DB_PATH") {
            self.db_path = path;
        }
        if let Some(port) = lookup("GRAPHMEND_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "GRAPHMEND_PORT".to_string(),
                value: port.clone(),
            })?;
        }

        if let Some(url) = lookup("GRAPHMEND_GENERATOR_URL") {
            let generator = self.generator.get_or_insert_with(|| GeneratorConfig {
                api_base_url: String::new(),
                model: String::new(),
                api_key: None,
                system_prompt: None,
            });
            generator.api_base_url = url;
        }
        if let Some(generator) = self.generator.as_mut() {
            if let Some(model) = lookup("GRAPHMEND_GENERATOR_MODEL") {
                generator.model = model;
            }
            if let Some(key) = lookup("GRAPHMEND_GENERATOR_API_KEY") {
                generator.api_key = Some(key);
            }
        }

        if let Some(url) = lookup("GRAPHMEND_VALIDATOR_URL") {
            self.validator = Some(ValidatorConfig { url });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Invalid("embedding_dimension must be positive".into()));
        }
        self.retrieval
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        self.memory
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        self.controller.validate()?;
        if let Some(generator) = &self.generator {
            if generator.api_base_url.trim().is_empty() {
                return Err(ConfigError::Invalid("generator api_base_url is empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.db_path, "graphmend.db");
        assert_eq!(config.port, 3000);
        assert_eq!(config.controller.max_iterations, 10);
        assert!(config.generator.is_none());
        assert!(config.validator.is_none());
    }

    #[test]
    fn environment_overrides_apply() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("GRAPHMEND_DB_PATH", "/tmp/x.db"),
            ("GRAPHMEND_PORT", "8080"),
            ("GRAPHMEND_GENERATOR_URL", "http://localhost:9000/v1"),
            ("GRAPHMEND_GENERATOR_MODEL", "fixer"),
            ("GRAPHMEND_VALIDATOR_URL", "http://localhost:9100/validate"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, "/tmp/x.db");
        assert_eq!(config.port, 8080);
        let generator = config.generator.unwrap();
        assert_eq!(generator.api_base_url, "http://localhost:9000/v1");
        assert_eq!(generator.model, "fixer");
        assert!(generator.api_key.is_none());
        assert_eq!(config.validator.unwrap().url, "http://localhost:9100/validate");
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("GRAPHMEND_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn json_file_is_merged_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphmend.json");
        std::fs::write(
            &path,
            r#"{ "port": 4000, "controller": { "max_iterations": 3 } }"#,
        )
        .unwrap();

        let config = ServerConfig::from_lookup(lookup(&[(
            "GRAPHMEND_CONFIG",
            path.to_str().unwrap(),
        )]))
        .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.controller.max_iterations, 3);
        assert_eq!(config.controller.template_hints, 3);
        assert_eq!(config.db_path, "graphmend.db");
    }

    #[test]
    fn zero_iterations_is_invalid() {
        let config = ServerConfig {
            controller: ControllerConfig {
                max_iterations: 0,
                ..ControllerConfig::default()
            },
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
