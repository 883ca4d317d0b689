//! Configuration loading for Majordomo.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the Majordomo home directory (~/.majordomo).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".majordomo"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.majordomo/settings.json, falling back to defaults
/// when no file exists.
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&get_settings_path()?)
}

/// Load settings from an explicit path. Missing file means defaults;
/// unreadable or invalid content is an error.
pub fn load_settings_from(path: &std::path::Path) -> Result<Settings> {
    if !path.exists() {
        tracing::debug!("No settings file at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    settings.validate()?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Runtime settings.
///
/// All intervals are carried in milliseconds so short-lived test setups can
/// shrink them without touching the reference defaults (10s heartbeat with a
/// 30s TTL, 100ms fan-in poll bounded by a 10s timeout).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub heartbeat: HeartbeatSettings,
    pub director: DirectorSettings,
    pub synthesis: SynthesisSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatSettings::default(),
            director: DirectorSettings::default(),
            synthesis: SynthesisSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.ttl_ms <= self.heartbeat.interval_ms {
            return Err(Error::Config(format!(
                "heartbeat ttl ({}ms) must be greater than the interval ({}ms)",
                self.heartbeat.ttl_ms, self.heartbeat.interval_ms
            )));
        }
        if self.director.poll_interval_ms == 0 {
            return Err(Error::Config(
                "director poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Liveness heartbeat timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// How often the liveness record is refreshed.
    pub interval_ms: u64,
    /// TTL written with each refresh. Must exceed the interval so a couple
    /// of missed ticks are tolerated before observers treat the agent as down.
    pub ttl_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            ttl_ms: 30_000,
        }
    }
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Director fan-in timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorSettings {
    /// How often the correlation table is polled while collecting responses.
    pub poll_interval_ms: u64,
    /// Wall-clock bound on response collection. Expiry is a normal
    /// termination, not an error.
    pub response_timeout_ms: u64,
}

impl Default for DirectorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            response_timeout_ms: 10_000,
        }
    }
}

impl DirectorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Synthesis service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub base_url: String,
    pub model: String,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.heartbeat.interval(), Duration::from_secs(10));
        assert_eq!(settings.heartbeat.ttl(), Duration::from_secs(30));
        assert_eq!(settings.director.poll_interval(), Duration::from_millis(100));
        assert_eq!(settings.director.response_timeout(), Duration::from_secs(10));
        settings.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_ttl_at_or_below_interval() {
        let mut settings = Settings::default();
        settings.heartbeat.ttl_ms = settings.heartbeat.interval_ms;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_settings_file() {
        // Missing sections fall back to defaults.
        let settings: Settings =
            serde_json::from_str(r#"{"heartbeat": {"interval_ms": 5000, "ttl_ms": 15000}}"#)
                .unwrap();
        assert_eq!(settings.heartbeat.interval_ms, 5000);
        assert_eq!(settings.director.response_timeout_ms, 10_000);
    }

    #[test]
    fn test_load_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        // Absent file means defaults.
        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.heartbeat.interval_ms, 10_000);

        std::fs::write(&path, r#"{"director": {"response_timeout_ms": 2500}}"#).unwrap();
        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.director.response_timeout_ms, 2500);

        // Invalid content is an error, not a silent fallback.
        std::fs::write(&path, "not json").unwrap();
        assert!(load_settings_from(&path).is_err());

        // A file that parses but violates validation is also rejected.
        std::fs::write(
            &path,
            r#"{"heartbeat": {"interval_ms": 1000, "ttl_ms": 1000}}"#,
        )
        .unwrap();
        assert!(load_settings_from(&path).is_err());
    }
}
