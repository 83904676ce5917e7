//! Configuration management for RoboBus
//!
//! This module provides configuration loading and saving. Configuration is
//! loaded from `~/.robobus/config.json` with environment variable overrides,
//! then validated.

mod types;

pub use types::*;

use crate::error::{Result, RoboError};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the RoboBus configuration directory path (~/.robobus)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".robobus")
    }

    /// Returns the path to the config file (~/.robobus/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `ROBOBUS_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: ROBOBUS_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Logging
        if let Ok(val) = std::env::var("ROBOBUS_LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("ROBOBUS_LOGGING_FORMAT") {
            if let Ok(format) = serde_json::from_value(serde_json::Value::String(val)) {
                self.logging.format = format;
            }
        }

        // Bus
        if let Ok(val) = std::env::var("ROBOBUS_BUS_AWAIT_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.bus.await_timeout_ms = v;
            }
        }

        // Agent
        if let Ok(val) = std::env::var("ROBOBUS_AGENT_ACTIVITY_CAPACITY") {
            if let Ok(v) = val.parse() {
                self.agent.activity_capacity = v;
            }
        }
        if let Ok(val) = std::env::var("ROBOBUS_AGENT_WORKER_THREADS") {
            if let Ok(v) = val.parse() {
                self.agent.worker_threads = v;
            }
        }

        // Scheduler
        if let Ok(val) = std::env::var("ROBOBUS_SCHEDULER_THREADS") {
            if let Ok(v) = val.parse() {
                self.scheduler.threads = v;
            }
        }
        if let Ok(val) = std::env::var("ROBOBUS_SCHEDULER_TERMINATION_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.scheduler.termination_timeout_secs = v;
            }
        }
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.bus.await_timeout_ms == 0 {
            return Err(RoboError::Config(
                "bus.await_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.agent.activity_capacity == 0 {
            return Err(RoboError::Config(
                "agent.activity_capacity must be greater than 0".to_string(),
            ));
        }
        if self.agent.worker_threads == 0 {
            return Err(RoboError::Config(
                "agent.worker_threads must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.threads == 0 {
            return Err(RoboError::Config(
                "scheduler.threads must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.bus.await_timeout_ms, 500);
        assert_eq!(config.agent.activity_capacity, 10);
        assert_eq!(config.agent.worker_threads, 2);
        assert_eq!(config.scheduler.threads, 2);
        assert_eq!(config.scheduler.termination_timeout_secs, 4);
        assert_eq!(config.logging.format, LogFormat::Component);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{ "scheduler": { "threads": 4 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.scheduler.threads, 4);
        assert_eq!(config.scheduler.thread_name, "robo-scheduler");
        assert_eq!(config.agent.activity_capacity, 10);
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::dir();
        let home = dirs::home_dir().unwrap();
        assert_eq!(dir, home.join(".robobus"));
    }

    #[test]
    fn test_config_path() {
        let path = Config::path();
        let home = dirs::home_dir().unwrap();
        assert_eq!(path, home.join(".robobus/config.json"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.scheduler.threads = 0;
        assert!(matches!(config.validate(), Err(RoboError::Config(_))));

        let mut config = Config::default();
        config.agent.activity_capacity = 0;
        assert!(matches!(config.validate(), Err(RoboError::Config(_))));

        let mut config = Config::default();
        config.bus.await_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(RoboError::Config(_))));
    }

    #[test]
    fn test_env_override() {
        env::set_var("ROBOBUS_AGENT_WORKER_THREADS", "6");
        env::set_var("ROBOBUS_LOGGING_FORMAT", "json");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.agent.worker_threads, 6);
        assert_eq!(config.logging.format, LogFormat::Json);

        env::remove_var("ROBOBUS_AGENT_WORKER_THREADS");
        env::remove_var("ROBOBUS_LOGGING_FORMAT");
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("config.json");

        let mut config = Config::default();
        config.bus.await_timeout_ms = 50;
        config.scheduler.thread_name = "timer".to_string();
        config.save_to_path(&config_path).unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.bus.await_timeout_ms, 50);
        assert_eq!(loaded.scheduler.thread_name, "timer");
    }

    #[test]
    fn test_load_invalid_file_fails_validation() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("config.json");
        std::fs::write(&config_path, r#"{ "agent": { "activity_capacity": 0 } }"#).unwrap();

        let result = Config::load_from_path(&config_path);
        assert!(matches!(result, Err(RoboError::Config(_))));
    }

    #[test]
    fn test_load_nonexistent() {
        let path = PathBuf::from("/nonexistent/path/config.json");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.agent.activity_capacity, 10);
    }
}
