//! YAML configuration for the monitoring runtime.
//!
//! # Storage layout
//!
//! ```text
//! ~/.safetynet/
//!   config.yaml   (optional; defaults apply when absent)
//! ```
//!
//! # API pattern
//!
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkin;
use crate::error::{io_err, ConfigError};

pub const DEFAULT_ARRIVAL_RADIUS_M: f64 = 200.0;
pub const DEFAULT_CHECK_IN_HOURS: f64 = 1.0;
pub const DEFAULT_CAPTURE_INTERVAL_SECS: u64 = 5 * 60;
pub const DEFAULT_CAPTURE_DISTANCE_M: f64 = 50.0;
pub const DEFAULT_COUNTDOWN_TICK_MS: u64 = 1000;
pub const EXPO_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

/// Background capture trigger thresholds. Either one fires a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureParams {
    pub interval_secs: u64,
    pub distance_m: f64,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_CAPTURE_INTERVAL_SECS,
            distance_m: DEFAULT_CAPTURE_DISTANCE_M,
        }
    }
}

impl CaptureParams {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub arrival_title: String,
    pub sos_title: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: EXPO_PUSH_ENDPOINT.to_string(),
            arrival_title: "Arrival confirmed".to_string(),
            sos_title: "SOS".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Great-circle distance under which a destination counts as reached.
    pub arrival_radius_m: f64,
    /// Check-in window used when the stored duration is missing or invalid.
    pub default_check_in_hours: f64,
    pub capture: CaptureParams,
    /// Cadence of countdown and overdue re-evaluation.
    pub countdown_tick_ms: u64,
    pub push: PushConfig,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            arrival_radius_m: DEFAULT_ARRIVAL_RADIUS_M,
            default_check_in_hours: DEFAULT_CHECK_IN_HOURS,
            capture: CaptureParams::default(),
            countdown_tick_ms: DEFAULT_COUNTDOWN_TICK_MS,
            push: PushConfig::default(),
        }
    }
}

impl SafetyConfig {
    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms.max(1))
    }

    /// Replace values that would disable a safety mechanism with defaults.
    fn sanitized(mut self) -> Self {
        if !self.arrival_radius_m.is_finite() || self.arrival_radius_m <= 0.0 {
            tracing::warn!(
                value = self.arrival_radius_m,
                "invalid arrival_radius_m in config; using default"
            );
            self.arrival_radius_m = DEFAULT_ARRIVAL_RADIUS_M;
        }
        if !checkin::is_valid_duration(self.default_check_in_hours) {
            tracing::warn!(
                value = self.default_check_in_hours,
                "invalid default_check_in_hours in config; using default"
            );
            self.default_check_in_hours = DEFAULT_CHECK_IN_HOURS;
        }
        self
    }
}

/// `<home>/.safetynet/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".safetynet").join("config.yaml")
}

/// Load the config, returning defaults when the file does not exist.
pub fn load_at(home: &Path) -> Result<SafetyConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SafetyConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: SafetyConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    Ok(config.sanitized())
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SafetyConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the config: serialize → `.yaml.tmp` sibling → `rename`.
pub fn save_at(home: &Path, config: &SafetyConfig) -> Result<(), ConfigError> {
    let path = config_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid config path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &SafetyConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
