use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use log::info;

pub const DEFAULT_CONFIG_FILE: &str = "collector.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("could not parse {}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the collector needs, fixed for the lifetime of the process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Base URL of the participant gateway.
    pub api_base: String,
    pub api_id: String,
    pub api_hash: String,
    /// Channel username, without the leading `@`.
    pub channel: String,
    pub output_dir: PathBuf,
    /// Seconds between two searches.
    pub delay_between_requests: u64,
    /// Searches per batch; the table is flushed after every batch.
    pub batch_size: u32,
    /// Seconds to rest after a batch.
    pub batch_pause: u64,
    /// Searches allowed per 24 hour window.
    pub daily_limit: u32,
    /// Upper bound on random seconds added to every pause.
    pub jitter_secs: u64,
    pub search_limit: u32,
    pub confirm_before_run: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8081/api/".to_string(),
            api_id: String::new(),
            api_hash: String::new(),
            channel: String::new(),
            output_dir: PathBuf::from("telegram_safe_collector"),
            delay_between_requests: 10,
            batch_size: 3,
            batch_pause: 120,
            daily_limit: 80,
            jitter_secs: 0,
            search_limit: 200,
            confirm_before_run: true,
        }
    }
}

impl CollectorConfig {
    /// Reads `COLLECTOR_CONFIG` (or `collector.toml`) when present, then
    /// applies `COLLECTOR_*` environment overrides and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("COLLECTOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            info!("No {} found, using defaults and environment.", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COLLECTOR_API_BASE") { self.api_base = v; }
        if let Some(v) = lookup("COLLECTOR_API_ID") { self.api_id = v; }
        if let Some(v) = lookup("COLLECTOR_API_HASH") { self.api_hash = v; }
        if let Some(v) = lookup("COLLECTOR_CHANNEL") { self.channel = v; }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.trim().trim_start_matches('@').is_empty() {
            return Err(ConfigError::Invalid("channel is not set".to_string()));
        }
        if self.api_id.trim().is_empty() || self.api_hash.trim().is_empty() {
            return Err(ConfigError::Invalid("api_id and api_hash are required".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        if self.daily_limit == 0 {
            return Err(ConfigError::Invalid("daily_limit must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn channel_name(&self) -> &str {
        self.channel.trim().trim_start_matches('@')
    }

    pub fn photos_dir(&self) -> PathBuf {
        self.output_dir.join("photos")
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_between_requests)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.batch_pause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.delay_between_requests, 10);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.batch_pause, 120);
        assert_eq!(config.daily_limit, 80);
        assert_eq!(config.search_limit, 200);
        assert!(config.confirm_before_run);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CollectorConfig::from_toml(
            r#"
            channel = "rust_ru"
            daily_limit = 40
            output_dir = "out"
            "#,
        )
        .unwrap();
        assert_eq!(config.channel, "rust_ru");
        assert_eq!(config.daily_limit, 40);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.photos_dir(), PathBuf::from("out").join("photos"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = CollectorConfig::from_toml(r#"channel = "from_file""#).unwrap();
        let env: HashMap<&str, &str> = [
            ("COLLECTOR_CHANNEL", "from_env"),
            ("COLLECTOR_API_ID", "123"),
            ("COLLECTOR_API_HASH", "abc"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.channel, "from_env");
        assert_eq!(config.api_id, "123");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_channel_and_zero_batch() {
        let mut config = CollectorConfig {
            api_id: "1".to_string(),
            api_hash: "h".to_string(),
            channel: "@".to_string(),
            ..CollectorConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.channel = "@rust_ru".to_string();
        assert_eq!(config.channel_name(), "rust_ru");
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
