// src/config.rs
//! Runtime configuration for the statistics core
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields the stock behaviour.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskboardError};
use crate::logging::{self, LogLevel};

/// Settings for the project statistics pipelines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Task types whose execution time counts towards `total_runtime`
    pub runtime_task_types: Vec<String>,
    /// Tag that moves a task into the archived section
    pub archived_tag: String,
    /// Timestamp units per second (`started`/`completed` are milliseconds)
    pub time_units_per_second: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            runtime_task_types: vec![
                "training".to_string(),
                "testing".to_string(),
                "annotation".to_string(),
            ],
            archived_tag: "archived".to_string(),
            time_units_per_second: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// One of error, warn, info, debug, trace
    pub log_level: Option<String>,
    pub stats: StatsConfig,
}

impl CoreConfig {
    /// Load from a JSON file; missing keys take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: CoreConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        crate::log_debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.stats.time_units_per_second > 0.0) {
            return Err(TaskboardError::Config(format!(
                "time_units_per_second must be positive, got {}",
                self.stats.time_units_per_second
            )));
        }
        if self.stats.archived_tag.is_empty() {
            return Err(TaskboardError::Config("archived_tag must not be empty".to_string()));
        }
        if let Some(level) = &self.log_level {
            level.parse::<LogLevel>().map_err(TaskboardError::Config)?;
        }
        Ok(())
    }

    /// Effective log level: `TASKBOARD_LOG` beats the configured value
    pub fn resolved_log_level(&self) -> Result<Option<LogLevel>> {
        if let Ok(env_level) = std::env::var(logging::LOG_ENV_VAR) {
            return env_level.parse::<LogLevel>().map(Some).map_err(TaskboardError::Config);
        }
        self.log_level
            .as_deref()
            .map(|level| level.parse::<LogLevel>().map_err(TaskboardError::Config))
            .transpose()
    }

    /// Install the effective log level globally
    pub fn apply_logging(&self) -> Result<()> {
        if let Some(level) = self.resolved_log_level()? {
            logging::set_log_level(level);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.log_level, None);
        assert_eq!(config.stats.archived_tag, "archived");
        assert_eq!(config.stats.runtime_task_types.len(), 3);
        assert_eq!(config.stats.time_units_per_second, 1000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"stats": {{"archived_tag": "hidden"}}}}"#).unwrap();

        let config = CoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.stats.archived_tag, "hidden");
        assert_eq!(config.stats.time_units_per_second, 1000.0);
        assert_eq!(config.stats.runtime_task_types, StatsConfig::default().runtime_task_types);
    }

    #[test]
    fn test_from_file_rejects_bad_values() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"stats": {{"time_units_per_second": 0}}}}"#).unwrap();
        assert!(matches!(
            CoreConfig::from_file(file.path()),
            Err(TaskboardError::Config(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"log_level": "loud"}}"#).unwrap();
        assert!(matches!(
            CoreConfig::from_file(file.path()),
            Err(TaskboardError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_missing_and_malformed() {
        assert!(matches!(
            CoreConfig::from_file("/nonexistent/taskboard.json"),
            Err(TaskboardError::Io(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            CoreConfig::from_file(file.path()),
            Err(TaskboardError::Serialization(_))
        ));
    }
}
