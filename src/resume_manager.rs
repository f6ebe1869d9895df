use std::fs;
use std::path::Path;
use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use log::{info, error};

use crate::store::{write_atomic, StoreError};

/// Resumption state persisted after every processed token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub processed_letters: Vec<String>,
    #[serde(default)]
    pub requests_today: u32,
    #[serde(default, with = "iso_timestamp")]
    pub last_run: Option<DateTime<Local>>,
}

impl Checkpoint {
    /// Reads the checkpoint at `path`. Missing, unreadable or corrupt files
    /// yield a fresh checkpoint.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("No progress file found. Starting fresh.");
            return Checkpoint::default();
        }
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to read progress file: {}", e);
                return Checkpoint::default();
            }
        };
        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(state) => {
                info!("Resumed previous session: {} letters processed.", state.processed_letters.len());
                state
            },
            Err(e) => {
                error!("Failed to parse progress file: {}. Starting fresh.", e);
                Checkpoint::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }

    /// Zeroes the request counter once a full day has passed since the last
    /// run. Returns true when the counter was reset.
    pub fn roll_window(&mut self, now: DateTime<Local>) -> bool {
        match self.last_run {
            Some(last) if now - last >= Duration::hours(24) => {
                self.requests_today = 0;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.processed_letters.iter().any(|t| t == token)
    }

    pub fn mark_processed(&mut self, token: &str) {
        if !self.contains(token) {
            self.processed_letters.push(token.to_string());
        }
        self.requests_today += 1;
    }
}

/// RFC 3339 on write. Reads also accept the naive local form
/// `2024-05-01T12:30:00.123456` older progress files carry.
mod iso_timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Local>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Local>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Local>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Local));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
    }
}
