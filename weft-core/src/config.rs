//! Engine configuration.
//!
//! Resolution order (lowest to highest priority):
//! 1. `weft.yaml` (base)
//! 2. `weft-{profile}.yaml` (profile override)
//! 3. `.env` file (loaded into the process environment, never overwriting)
//! 4. Environment variables (`WEFT_ENGINE_WORKERS` overrides `engine.workers`)
//!
//! Profile is `WEFT_PROFILE` if set, otherwise `"dev"`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// A single flattened configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ConfigValue {
    fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Bool(b) => ConfigValue::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ConfigValue::Int(i)
                } else {
                    ConfigValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_yaml::Value::String(s) => ConfigValue::String(s.clone()),
            other => ConfigValue::String(format!("{other:?}")),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O or YAML parsing error occurred while loading config files.
    Load(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Flatten a YAML tree into dot-separated keys.
fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, out: &mut HashMap<String, ConfigValue>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => format!("{other:?}"),
                };
                let full = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_yaml(&full, v, out);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for (i, item) in seq.iter().enumerate() {
                flatten_yaml(&format!("{prefix}.{i}"), item, out);
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), ConfigValue::from_yaml(leaf));
            }
        }
    }
}

fn load_yaml_file(
    path: &Path,
    values: &mut HashMap<String, ConfigValue>,
) -> Result<(), ConfigError> {
    if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Load(e.to_string()))?;
        flatten_yaml("", &yaml, values);
    }
    Ok(())
}

/// Configuration loaded from YAML files, `.env` files and the environment.
#[derive(Debug, Clone)]
pub struct WeftConfig {
    values: HashMap<String, ConfigValue>,
    profile: String,
}

impl WeftConfig {
    /// Load configuration from `dir`, resolving the profile from
    /// `WEFT_PROFILE` (default `"dev"`).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let profile = std::env::var("WEFT_PROFILE").unwrap_or_else(|_| "dev".to_string());
        Self::load_with_profile(dir, &profile)
    }

    pub fn load_with_profile(
        dir: impl AsRef<Path>,
        profile: &str,
    ) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let mut values = HashMap::new();
        load_yaml_file(&dir.join("weft.yaml"), &mut values)?;
        load_yaml_file(&dir.join(format!("weft-{profile}.yaml")), &mut values)?;

        // .env never overwrites already-set environment variables.
        let _ = dotenvy::from_path(dir.join(".env"));

        let mut config = Self {
            values,
            profile: profile.to_string(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Build a config from already-flattened values, for tests.
    pub fn from_values(values: HashMap<String, ConfigValue>) -> Self {
        Self {
            values,
            profile: "test".to_string(),
        }
    }

    /// Environment variables override file values: `WEFT_ENGINE_WORKERS`
    /// overrides `engine.workers`.
    fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(rest) = key.strip_prefix("WEFT_") {
                if rest == "PROFILE" {
                    continue;
                }
                let dotted = rest.to_lowercase().replace('_', ".");
                self.values.insert(dotted, ConfigValue::String(value));
            }
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConfigValue::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ConfigValue::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ConfigValue::as_bool)
    }
}

/// Typed engine settings, with spec'd defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline covering one reconcile, all function calls included.
    pub reconcile_timeout: Duration,
    /// Workers per controller pool.
    pub workers: usize,
    /// Cap on the work queue's exponential backoff.
    pub max_backoff: Duration,
    /// Permit plaintext calls to functions without a server TLS secret.
    pub allow_insecure_functions: bool,
    /// Registry prefix for package images named without one.
    pub default_registry: String,
    /// Namespace holding package runtimes and TLS secrets.
    pub namespace: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(60),
            workers: 4,
            max_backoff: Duration::from_secs(600),
            allow_insecure_functions: false,
            default_registry: "xpkg.crossplane.io".to_string(),
            namespace: "crossplane-system".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &WeftConfig) -> Self {
        let defaults = Self::default();
        Self {
            reconcile_timeout: config
                .get_i64("engine.timeout")
                .map(|s| Duration::from_secs(s.max(1) as u64))
                .unwrap_or(defaults.reconcile_timeout),
            workers: config
                .get_i64("engine.workers")
                .map(|w| w.max(1) as usize)
                .unwrap_or(defaults.workers),
            max_backoff: config
                .get_i64("engine.backoff")
                .map(|s| Duration::from_secs(s.max(1) as u64))
                .unwrap_or(defaults.max_backoff),
            allow_insecure_functions: config
                .get_bool("functions.insecure")
                .unwrap_or(defaults.allow_insecure_functions),
            default_registry: config
                .get_str("packages.registry")
                .map(str::to_string)
                .unwrap_or(defaults.default_registry),
            namespace: config
                .get_str("packages.namespace")
                .map(str::to_string)
                .unwrap_or(defaults.namespace),
        }
    }
}
