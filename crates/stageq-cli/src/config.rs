//! Configuration loading for the stageq binary
//!
//! Settings come from an optional YAML file, then environment variables
//! override individual fields.

use serde::{Deserialize, Serialize};
use stageq_engine::{ExecutorOptions, FailurePolicy};
use stageq_render::{FieldAccess, RenderOptions};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub render: RenderOptions,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `abort` or `skip`
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stderr".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

impl Config {
    /// Load from a YAML file, applying environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Config::default();
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason,
        };

        if let Some(policy) = lookup("STAGEQ_FAILURE_POLICY") {
            self.engine.failure_policy = policy
                .parse::<FailurePolicy>()
                .map_err(|e| invalid("STAGEQ_FAILURE_POLICY", e))?;
        }
        if let Some(access) = lookup("STAGEQ_FIELD_ACCESS") {
            self.render.field_access = access
                .parse::<FieldAccess>()
                .map_err(|e| invalid("STAGEQ_FIELD_ACCESS", e))?;
        }
        if let Some(table) = lookup("STAGEQ_SOURCE_TABLE") {
            // empty or "none" reads every relation as its own table
            let table = table.trim();
            self.render.source_table = if table.is_empty() || table.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(table.to_string())
            };
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }

        Ok(())
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            failure_policy: self.engine.failure_policy,
        }
    }

    /// Export logging settings for [`crate::logging::init`].
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.render.field_access, FieldAccess::Json);
        assert_eq!(config.render.source_table.as_deref(), Some("DefaultStagingData"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stderr");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
engine:
  failure_policy: skip
render:
  field_access: column
  batch_filter: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.engine.failure_policy, FailurePolicy::SkipStep);
        assert_eq!(config.render.field_access, FieldAccess::Column);
        assert!(!config.render.batch_filter);
        assert_eq!(config.render.content_column, "Content");
        assert_eq!(config.logging.directory, "./logs");
    }

    #[test]
    fn test_env_var_override() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("STAGEQ_FAILURE_POLICY", "skip_step"),
                ("STAGEQ_FIELD_ACCESS", "column"),
                ("STAGEQ_SOURCE_TABLE", "none"),
                ("LOG_FORMAT", "json"),
            ]))
            .unwrap();

        assert_eq!(config.engine.failure_policy, FailurePolicy::SkipStep);
        assert_eq!(config.render.field_access, FieldAccess::Column);
        assert_eq!(config.render.source_table, None);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_env_var_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("STAGEQ_FAILURE_POLICY", "retry")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref var, .. } if var == "STAGEQ_FAILURE_POLICY"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_file = std::env::temp_dir().join(format!("stageq_config_{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&temp_file, "render:\n  source_table: Staging\n").unwrap();

        let config = Config::load(&temp_file).unwrap();
        std::fs::remove_file(&temp_file).ok();

        // STAGEQ_SOURCE_TABLE is not set by any test
        assert_eq!(config.render.source_table.as_deref(), Some("Staging"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("stageq_no_such_config.yaml");
        let config = Config::load_or_default(&path).unwrap();
        assert!(config.render.batch_filter);
    }
}
