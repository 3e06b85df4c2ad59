use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A process whose lifetime is reported as feature usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedProcess {
    /// Executable name, matched case-insensitively (e.g. `magnify.exe`)
    pub name: String,
    pub start_event: String,
    #[serde(default)]
    pub stop_event: Option<String>,
}

impl WatchedProcess {
    fn new(name: &str, start_event: &str, stop_event: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            start_event: start_event.to_string(),
            stop_event: stop_event.map(str::to_string),
        }
    }

    pub fn matches(&self, process_name: &str) -> bool {
        self.name.eq_ignore_ascii_case(process_name)
    }
}

/// Daemon configuration, read from `config.toml`. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cursor_debounce_secs: u64,
    pub night_light_timeout_ms: u64,
    pub process_poll_ms: u64,
    pub shutdown_flush_secs: u64,
    pub control_addr: String,
    pub event_addr: String,
    pub watched_processes: Vec<WatchedProcess>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cursor_debounce_secs: 10,
            night_light_timeout_ms: 500,
            process_poll_ms: 2000,
            shutdown_flush_secs: 2,
            control_addr: "127.0.0.1:47301".to_string(),
            event_addr: "127.0.0.1:47302".to_string(),
            watched_processes: vec![
                WatchedProcess::new("magnify.exe", "magnifierStarted", Some("magnifierStopped")),
                WatchedProcess::new("narrator.exe", "narratorStarted", Some("narratorStopped")),
                WatchedProcess::new("osk.exe", "onScreenKeyboardStarted", None),
            ],
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("a11ypulse").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("a11ypulse.toml"))
    }

    /// Load from the default location, falling back to defaults when the file is absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn cursor_debounce(&self) -> Duration {
        Duration::from_secs(self.cursor_debounce_secs)
    }

    pub fn night_light_timeout(&self) -> Duration {
        Duration::from_millis(self.night_light_timeout_ms)
    }

    pub fn process_poll_interval(&self) -> Duration {
        Duration::from_millis(self.process_poll_ms.max(100))
    }

    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_flush_secs)
    }

    pub fn watched_process(&self, process_name: &str) -> Option<&WatchedProcess> {
        self.watched_processes
            .iter()
            .find(|p| p.matches(process_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cursor_debounce(), Duration::from_secs(10));
        assert_eq!(config.shutdown_flush_timeout(), Duration::from_secs(2));
        assert_eq!(config.watched_processes.len(), 3);
    }

    #[test]
    fn test_parse_partial_overrides() {
        let config = Config::parse(
            r#"
            cursor_debounce_secs = 3
            event_addr = "127.0.0.1:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.cursor_debounce(), Duration::from_secs(3));
        assert_eq!(config.event_addr, "127.0.0.1:9000");
        assert_eq!(config.control_addr, "127.0.0.1:47301");
        assert_eq!(config.watched_processes.len(), 3);
    }

    #[test]
    fn test_parse_watched_processes() {
        let config = Config::parse(
            r#"
            [[watched_processes]]
            name = "Zoomit.exe"
            start_event = "zoomItStarted"
            "#,
        )
        .unwrap();
        assert_eq!(config.watched_processes.len(), 1);
        let zoomit = config.watched_process("ZOOMIT.EXE").unwrap();
        assert_eq!(zoomit.start_event, "zoomItStarted");
        assert_eq!(zoomit.stop_event, None);
        assert!(config.watched_process("magnify.exe").is_none());
    }

    #[test]
    fn test_parse_error() {
        assert!(Config::parse("cursor_debounce_secs = \"ten\"").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("a11ypulse-test-missing").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.process_poll_ms, 2000);
    }

    #[test]
    fn test_poll_interval_has_floor() {
        let config = Config {
            process_poll_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.process_poll_interval(), Duration::from_millis(100));
    }
}
