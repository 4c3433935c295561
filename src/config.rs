//! Configuration management for Offpeak
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. A configuration describes one or more
//! off-peak trackers, each bound to a source meter entity and a daily peak
//! window with `peak_start < peak_end`.

use crate::error::{OffpeakError, Result};
use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Accepts 24h wall-clock times like "11:00"; rejects "9:00" and "24:00"
static TIME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("time pattern is valid"));

fn default_name() -> String {
    "Energy Import Off-Peak".to_string()
}

fn default_source_entity() -> String {
    "sensor.today_energy_import".to_string()
}

fn default_peak_start() -> String {
    "11:00".to_string()
}

fn default_peak_end() -> String {
    "14:00".to_string()
}

fn default_storage_dir() -> String {
    "/data/offpeak".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory holding per-tracker snapshot files
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Optional registry snapshot file used to restore published values
    /// across restarts
    #[serde(default)]
    pub restore_file: Option<String>,

    /// Configured trackers
    #[serde(default)]
    pub trackers: Vec<TrackerConfig>,
}

/// Configuration for a single off-peak tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Display name for the published entity
    #[serde(default = "default_name")]
    pub name: String,

    /// Entity id of the upstream cumulative meter
    #[serde(default = "default_source_entity")]
    pub source_entity: String,

    /// Daily peak window open boundary in HH:MM
    #[serde(default = "default_peak_start")]
    pub peak_start: String,

    /// Daily peak window close boundary in HH:MM
    #[serde(default = "default_peak_end")]
    pub peak_end: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/offpeak.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            source_entity: default_source_entity(),
            peak_start: default_peak_start(),
            peak_end: default_peak_end(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            storage_dir: default_storage_dir(),
            restore_file: None,
            trackers: vec![TrackerConfig::default()],
        }
    }
}

/// Parsed daily peak window with minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakWindow {
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
}

impl PeakWindow {
    /// Minutes since midnight of the window open boundary
    pub fn start_minutes(&self) -> u32 {
        self.start_hour * 60 + self.start_minute
    }

    /// Minutes since midnight of the window close boundary
    pub fn end_minutes(&self) -> u32 {
        self.end_hour * 60 + self.end_minute
    }

    /// Whether a time of day falls inside `[peak_start, peak_end)`
    pub fn contains(&self, time: NaiveTime) -> bool {
        use chrono::Timelike;
        let minutes = time.hour() * 60 + time.minute();
        self.start_minutes() <= minutes && minutes < self.end_minutes()
    }

    /// Window open boundary formatted as HH:MM
    pub fn start_hhmm(&self) -> String {
        format!("{:02}:{:02}", self.start_hour, self.start_minute)
    }

    /// Window close boundary formatted as HH:MM
    pub fn end_hhmm(&self) -> String {
        format!("{:02}:{:02}", self.end_hour, self.end_minute)
    }
}

/// Parse "HH:MM" into (hour, minute) after validating the format
fn parse_hhmm(field: &str, value: &str) -> Result<(u32, u32)> {
    if !TIME_PATTERN.is_match(value) {
        return Err(OffpeakError::validation(
            field,
            "Invalid time format. Use HH:MM (e.g. 11:00)",
        ));
    }
    let (hh, mm) = value.split_at(2);
    let hour = hh
        .parse::<u32>()
        .map_err(|e| OffpeakError::validation(field, &e.to_string()))?;
    let minute = mm[1..]
        .parse::<u32>()
        .map_err(|e| OffpeakError::validation(field, &e.to_string()))?;
    Ok((hour, minute))
}

impl TrackerConfig {
    /// Identity used for duplicate detection
    pub fn unique_id(&self) -> String {
        format!("{}_{}_{}", self.source_entity, self.peak_start, self.peak_end)
    }

    /// Parse and validate the peak window boundaries
    pub fn window(&self) -> Result<PeakWindow> {
        let (start_hour, start_minute) = parse_hhmm("peak_start", &self.peak_start)?;
        let (end_hour, end_minute) = parse_hhmm("peak_end", &self.peak_end)?;
        let window = PeakWindow {
            start_hour,
            start_minute,
            end_hour,
            end_minute,
        };
        if window.start_minutes() >= window.end_minutes() {
            return Err(OffpeakError::validation(
                "peak_start",
                "peak_start must be before peak_end",
            ));
        }
        Ok(window)
    }

    /// Validate a single tracker entry
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OffpeakError::validation("name", "Name cannot be empty"));
        }

        if self.source_entity.trim().is_empty() {
            return Err(OffpeakError::validation(
                "source_entity",
                "Source entity cannot be empty",
            ));
        }

        self.window()?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "offpeak_config.yaml",
            "/data/offpeak_config.yaml",
            "/etc/offpeak/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.trim().is_empty() {
            return Err(OffpeakError::validation(
                "storage_dir",
                "Storage directory cannot be empty",
            ));
        }

        let mut seen = HashSet::new();
        for tracker in &self.trackers {
            tracker.validate()?;

            // Same source and window means the same tracker
            if !seen.insert(tracker.unique_id()) {
                return Err(OffpeakError::duplicate(tracker.unique_id()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.trackers.len(), 1);
        assert_eq!(config.trackers[0].peak_start, "11:00");
        assert_eq!(config.trackers[0].peak_end, "14:00");
        assert_eq!(config.trackers[0].source_entity, "sensor.today_energy_import");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_time_format_validation() {
        let mut tracker = TrackerConfig::default();
        assert!(tracker.validate().is_ok());

        tracker.peak_start = "9:00".to_string();
        assert!(tracker.validate().is_err());

        tracker.peak_start = "24:00".to_string();
        assert!(tracker.validate().is_err());

        tracker.peak_start = "11:60".to_string();
        assert!(tracker.validate().is_err());

        tracker.peak_start = "23:59".to_string();
        tracker.peak_end = "23:59".to_string();
        assert!(tracker.validate().is_err());
    }

    #[test]
    fn test_window_ordering() {
        let tracker = TrackerConfig {
            peak_start: "14:00".to_string(),
            peak_end: "11:00".to_string(),
            ..Default::default()
        };
        let err = tracker.window().unwrap_err();
        assert!(matches!(
            err,
            OffpeakError::Validation { ref field, .. } if field == "peak_start"
        ));
    }

    #[test]
    fn test_window_contains() {
        let tracker = TrackerConfig::default();
        let window = tracker.window().unwrap();
        assert_eq!(window.start_minutes(), 660);
        assert_eq!(window.end_minutes(), 840);

        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(!window.contains(t(10, 59)));
        assert!(window.contains(t(11, 0)));
        assert!(window.contains(t(13, 59)));
        assert!(!window.contains(t(14, 0)));
    }

    #[test]
    fn test_duplicate_tracker_rejected() {
        let config = Config {
            trackers: vec![TrackerConfig::default(), TrackerConfig::default()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OffpeakError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_unique_id() {
        let tracker = TrackerConfig::default();
        assert_eq!(
            tracker.unique_id(),
            "sensor.today_energy_import_11:00_14:00"
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            config.trackers[0].unique_id(),
            deserialized.trackers[0].unique_id()
        );
    }
}
