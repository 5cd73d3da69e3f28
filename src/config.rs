use crate::sink::DEFAULT_FILE_NAME;
use crate::{PrintwatchError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// What the acquisition loop does when a tick's fetch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// End the session; the error is returned when the session stops.
    #[default]
    Abort,
    /// Log the failure, leave the buffer untouched and keep ticking.
    SkipTick,
}

impl FailurePolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "abort" => Some(FailurePolicy::Abort),
            "skip" | "skip_tick" => Some(FailurePolicy::SkipTick),
            _ => None,
        }
    }
}

/// Acquisition loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    /// Tick period.
    pub interval: Duration,
    /// Buffered rows that trigger a flush; `push_lines - 1` rows are exported
    /// and the freshest row stays buffered.
    pub push_lines: usize,
    pub save_dir: PathBuf,
    pub file_name: String,
    pub failure_policy: FailurePolicy,
    /// Start in append mode instead of replace mode.
    pub record_from_start: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            push_lines: 10,
            save_dir: PathBuf::from("record"),
            file_name: DEFAULT_FILE_NAME.to_string(),
            failure_policy: FailurePolicy::Abort,
            record_from_start: false,
        }
    }
}

impl AcquisitionConfig {
    /// Defaults overridden by `PRINTWATCH_*` environment variables.
    ///
    /// - `PRINTWATCH_INTERVAL` (seconds)
    /// - `PRINTWATCH_PUSH_LINES`
    /// - `PRINTWATCH_SAVE_DIR`
    /// - `PRINTWATCH_FAILURE_POLICY` (`abort` | `skip`)
    /// - `PRINTWATCH_RECORD` (`1` to record from the first tick)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: read_env_secs("PRINTWATCH_INTERVAL").unwrap_or(defaults.interval),
            push_lines: read_env_parse("PRINTWATCH_PUSH_LINES").unwrap_or(defaults.push_lines),
            save_dir: read_env_string("PRINTWATCH_SAVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.save_dir),
            file_name: defaults.file_name,
            failure_policy: read_env_string("PRINTWATCH_FAILURE_POLICY")
                .and_then(|v| FailurePolicy::parse(&v.to_ascii_lowercase()))
                .unwrap_or(defaults.failure_policy),
            record_from_start: read_env_bool("PRINTWATCH_RECORD")
                .unwrap_or(defaults.record_from_start),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(PrintwatchError::InvalidConfig(
                "interval must be positive".into(),
            ));
        }
        if self.push_lines < 2 {
            return Err(PrintwatchError::InvalidConfig(format!(
                "push_lines must be at least 2, got {}",
                self.push_lines
            )));
        }
        if self.file_name.is_empty() {
            return Err(PrintwatchError::InvalidConfig("file_name is empty".into()));
        }
        Ok(())
    }
}

/// Progress monitor thresholds and series names.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Layer height [mm].
    pub layer_pitch: f64,
    /// Hotend temperature is reached when within this band [C].
    pub temperature_tolerance: f64,
    /// Smallest z change counted as a new layer [mm].
    pub height_epsilon: f64,
    /// Pause after printing starts, while the printer finishes its purge.
    pub settle_delay: Duration,
    /// Upper bound on each wait for fresh data. `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    pub status_series: String,
    pub height_series: String,
    pub temperature_series: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            layer_pitch: 0.2,
            temperature_tolerance: 2.0,
            height_epsilon: 1e-4,
            settle_delay: Duration::from_secs(6),
            read_timeout: None,
            status_series: "state".to_string(),
            height_series: "z".to_string(),
            temperature_series: "hotendtemp_current".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by `PRINTWATCH_LAYER_PITCH`,
    /// `PRINTWATCH_TEMP_TOLERANCE`, `PRINTWATCH_SETTLE_SECS` and
    /// `PRINTWATCH_READ_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            layer_pitch: read_env_parse("PRINTWATCH_LAYER_PITCH").unwrap_or(defaults.layer_pitch),
            temperature_tolerance: read_env_parse("PRINTWATCH_TEMP_TOLERANCE")
                .unwrap_or(defaults.temperature_tolerance),
            settle_delay: read_env_secs("PRINTWATCH_SETTLE_SECS").unwrap_or(defaults.settle_delay),
            read_timeout: read_env_secs("PRINTWATCH_READ_TIMEOUT_SECS").or(defaults.read_timeout),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.layer_pitch > 0.0) {
            return Err(PrintwatchError::InvalidConfig(
                "layer_pitch must be positive".into(),
            ));
        }
        if !(self.temperature_tolerance > 0.0) {
            return Err(PrintwatchError::InvalidConfig(
                "temperature_tolerance must be positive".into(),
            ));
        }
        if !(self.height_epsilon >= 0.0) {
            return Err(PrintwatchError::InvalidConfig(
                "height_epsilon must not be negative".into(),
            ));
        }
        Ok(())
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    read_env_string(name).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn read_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    read_env_string(name).and_then(|v| v.parse().ok())
}

fn read_env_secs(name: &str) -> Option<Duration> {
    read_env_parse::<f64>(name)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AcquisitionConfig::default().validate().is_ok());
        assert!(MonitorConfig::default().validate().is_ok());
        assert_eq!(AcquisitionConfig::default().push_lines, 10);
        assert_eq!(MonitorConfig::default().settle_delay, Duration::from_secs(6));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = AcquisitionConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let one_line = AcquisitionConfig {
            push_lines: 1,
            ..Default::default()
        };
        assert!(one_line.validate().is_err());

        let flat = MonitorConfig {
            layer_pitch: 0.0,
            ..Default::default()
        };
        assert!(flat.validate().is_err());

        let nan = MonitorConfig {
            temperature_tolerance: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("PRINTWATCH_PUSH_LINES", "25");
        std::env::set_var("PRINTWATCH_INTERVAL", "0.5");
        std::env::set_var("PRINTWATCH_FAILURE_POLICY", "Skip");
        std::env::set_var("PRINTWATCH_LAYER_PITCH", "not-a-number");
        std::env::set_var("PRINTWATCH_RECORD", "yes");
        let acq = AcquisitionConfig::from_env();
        let mon = MonitorConfig::from_env();
        std::env::remove_var("PRINTWATCH_PUSH_LINES");
        std::env::remove_var("PRINTWATCH_INTERVAL");
        std::env::remove_var("PRINTWATCH_FAILURE_POLICY");
        std::env::remove_var("PRINTWATCH_LAYER_PITCH");
        std::env::remove_var("PRINTWATCH_RECORD");

        assert_eq!(acq.push_lines, 25);
        assert_eq!(acq.interval, Duration::from_millis(500));
        assert_eq!(acq.failure_policy, FailurePolicy::SkipTick);
        assert!(acq.record_from_start);
        assert_eq!(mon.layer_pitch, 0.2);
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!(FailurePolicy::parse("abort"), Some(FailurePolicy::Abort));
        assert_eq!(FailurePolicy::parse("skip_tick"), Some(FailurePolicy::SkipTick));
        assert_eq!(FailurePolicy::parse("retry"), None);
    }
}
