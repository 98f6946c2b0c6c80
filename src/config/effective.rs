//! Effective configuration with full provenance
//!
//! The merged configuration plus information about where each layer came
//! from, so `batchd check` can show exactly which files were applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use batchd_protocol::Priority;
use batchd_worker::{local_host_name, WorkerConfig};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "batchd/effective_config@1";

/// Project config file, looked up in the current directory
pub const PROJECT_CONFIG_FILE: &str = ".batchd.toml";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Project,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    /// Origin of this source
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

/// Host config path under `$HOME`, if `HOME` is set
pub fn default_host_config_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config/batchd/config.toml"))
}

impl EffectiveConfig {
    /// Build effective config from layers
    pub fn build(
        host_config_path: Option<&Path>,
        project_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: Built-in defaults
        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        // Layers 2 and 3: files, skipped when absent
        for (origin, path) in [
            (ConfigOrigin::Host, host_config_path),
            (ConfigOrigin::Project, project_config_path),
        ] {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        // Layer 4: CLI overrides
        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        Self::validate_config(&merged)?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
        })
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    /// Convert TOML Value to JSON Value
    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Validate configuration values
    fn validate_config(config: &Value) -> Result<(), ConfigError> {
        let get = |path: &str| lookup(config, path);

        match get("cache.folder").and_then(Value::as_str) {
            Some(folder) if !folder.is_empty() => {}
            _ => {
                return Err(ConfigError::ValidationError(
                    "cache.folder must be a non-empty string".to_string(),
                ))
            }
        }

        match get("cache.max_folders").and_then(Value::as_u64) {
            Some(n) if n > 0 => {}
            _ => {
                return Err(ConfigError::ValidationError(
                    "cache.max_folders must be a positive integer".to_string(),
                ))
            }
        }

        // output_timeout_seconds must be in (0, 86400]
        match get("wait.output_timeout_seconds").and_then(Value::as_u64) {
            Some(n) if n > 0 && n <= 86400 => {}
            _ => {
                return Err(ConfigError::ValidationError(
                    "wait.output_timeout_seconds must be in (0, 86400]".to_string(),
                ))
            }
        }

        // poll_interval_ms must be in (0, 60000]
        match get("wait.poll_interval_ms").and_then(Value::as_u64) {
            Some(n) if n > 0 && n <= 60000 => {}
            _ => {
                return Err(ConfigError::ValidationError(
                    "wait.poll_interval_ms must be in (0, 60000]".to_string(),
                ))
            }
        }

        if get("dispatch.priority")
            .and_then(Value::as_i64)
            .and_then(|p| Priority::try_from(p).ok())
            .is_none()
        {
            return Err(ConfigError::ValidationError(
                "dispatch.priority must be an integer".to_string(),
            ));
        }

        Ok(())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.config, path)
    }

    /// Get a config value as u64
    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    /// Get a config value as string
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    /// Root of the result cache
    pub fn cache_folder(&self) -> PathBuf {
        PathBuf::from(self.get_str("cache.folder").unwrap_or_default())
    }

    /// Dispatch priority for submitted work
    pub fn priority(&self) -> Priority {
        self.get("dispatch.priority")
            .and_then(Value::as_i64)
            .and_then(|p| Priority::try_from(p).ok())
            .unwrap_or(batchd_protocol::DEFAULT_PRIORITY)
    }

    /// Settings for the caching worker. Values were validated by `build`.
    pub fn worker_config(&self) -> WorkerConfig {
        let defaults = BuiltinDefaults::default();
        WorkerConfig {
            cache_folder: self.cache_folder(),
            max_cache_folders: self
                .get_u64("cache.max_folders")
                .unwrap_or(defaults.cache_max_folders) as usize,
            output_wait_timeout: Duration::from_secs(
                self.get_u64("wait.output_timeout_seconds")
                    .unwrap_or(defaults.output_timeout_seconds),
            ),
            output_poll_interval: Duration::from_millis(
                self.get_u64("wait.poll_interval_ms")
                    .unwrap_or(defaults.poll_interval_ms),
            ),
            host_name: local_host_name(),
        }
    }
}

fn lookup<'a>(config: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = config;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_build_with_defaults_only() {
        let config = EffectiveConfig::build(None, None, None).unwrap();

        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.get_u64("cache.max_folders"), Some(10_000));
        assert_eq!(config.get_str("cache.folder"), Some("var/cache/batchd"));
        assert_eq!(config.priority(), 5);
    }

    #[test]
    fn test_build_with_cli_override() {
        let cli = serde_json::json!({"cache": {"folder": "/tmp/batchd-cache"}});

        let config = EffectiveConfig::build(None, None, Some(cli)).unwrap();

        assert_eq!(config.cache_folder(), PathBuf::from("/tmp/batchd-cache"));
        assert_eq!(config.get_u64("cache.max_folders"), Some(10_000));
    }

    #[test]
    fn test_validation_output_timeout() {
        let cli = serde_json::json!({"wait": {"output_timeout_seconds": 0}});

        let result = EffectiveConfig::build(None, None, Some(cli));
        assert!(result.unwrap_err().to_string().contains("output_timeout_seconds"));
    }

    #[test]
    fn test_validation_poll_interval() {
        let cli = serde_json::json!({"wait": {"poll_interval_ms": 120000}});

        let result = EffectiveConfig::build(None, None, Some(cli));
        assert!(result.unwrap_err().to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_validation_max_folders() {
        let cli = serde_json::json!({"cache": {"max_folders": 0}});

        let result = EffectiveConfig::build(None, None, Some(cli));
        assert!(result.unwrap_err().to_string().contains("max_folders"));
    }

    #[test]
    fn test_load_toml_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[cache]").unwrap();
        writeln!(temp, "max_folders = 20").unwrap();
        writeln!(temp, "[wait]").unwrap();
        writeln!(temp, "output_timeout_seconds = 5").unwrap();

        let config = EffectiveConfig::build(None, Some(temp.path()), None).unwrap();

        assert_eq!(config.get_u64("cache.max_folders"), Some(20));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].origin, ConfigOrigin::Project);
        assert_eq!(config.sources[1].digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[cache").unwrap();

        let result = EffectiveConfig::build(Some(temp.path()), None, None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let config = EffectiveConfig::build(
            Some(Path::new("/nonexistent/batchd/config.toml")),
            None,
            None,
        )
        .unwrap();

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_worker_config() {
        let cli = serde_json::json!({
            "cache": {"folder": "/data/cache", "max_folders": 7},
            "wait": {"output_timeout_seconds": 3, "poll_interval_ms": 20}
        });

        let worker = EffectiveConfig::build(None, None, Some(cli))
            .unwrap()
            .worker_config();

        assert_eq!(worker.cache_folder, PathBuf::from("/data/cache"));
        assert_eq!(worker.max_cache_folders, 7);
        assert_eq!(worker.output_wait_timeout, Duration::from_secs(3));
        assert_eq!(worker.output_poll_interval, Duration::from_millis(20));
    }
}
