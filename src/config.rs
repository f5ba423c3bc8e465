//! Scanner configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/scanner.toml` by default)
//! 2. environment variables prefixed with `SCAN_DAQ_`, nested keys separated by
//!    `__`, e.g. `SCAN_DAQ_APPLICATION__LOG_LEVEL=debug` or
//!    `SCAN_DAQ_POLLING__QUERY_INTERVAL_MS=50`
//!
//! # Example
//! ```no_run
//! use scan_daq::config::ScannerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ScannerConfig::load()?;
//! config.validate()?;
//! let constraints = config.constraints();
//! println!("{} axes", constraints.axes().len());
//! # Ok(())
//! # }
//! ```

use crate::error::{ScanError, ScanResult};
use crate::executor::MovePolicy;
use crate::logging::LogFormat;
use crate::model::{AxisConstraint, ChannelSource, ChannelSpec, SampleType, ScanConstraints};
use crate::poll::PollConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/scanner.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SCAN_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// `[application]`
    pub application: ApplicationConfig,
    /// `[polling]`, optional
    #[serde(default)]
    pub polling: PollingConfig,
    /// `[scanner]`
    pub scanner: ScannerSection,
}

/// Application-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Display name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Timing of the poll loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval of the position and count monitors
    #[serde(default = "default_query_interval")]
    pub query_interval_ms: u64,
    /// Delay after a failed tick
    #[serde(default = "default_recovery_interval")]
    pub recovery_interval_ms: u64,
    /// Pause between two scan lines
    #[serde(default)]
    pub scan_line_interval_ms: u64,
}

/// Scanner hardware description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerSection {
    /// Blocking split of the moves within a line
    #[serde(default)]
    pub move_policy: MovePolicy,
    /// `[[scanner.axes]]`
    pub axes: Vec<AxisConfig>,
    /// `[[scanner.channels]]`
    pub channels: Vec<ChannelConfig>,
}

/// One scannable axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Unique axis name
    pub name: String,
    /// Physical unit, "m" if omitted
    #[serde(default = "default_axis_unit")]
    pub unit: String,
    /// Travel `[min, max]`
    pub position_range: (f64, f64),
    /// Min/max samples per axis
    pub resolution_range: (usize, usize),
    /// Min/max fast-axis sample rate in Hz
    pub frequency_range: (f64, f64),
}

/// One detector channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Unique channel name
    pub name: String,
    /// Physical unit, "c/s" if omitted
    #[serde(default = "default_channel_unit")]
    pub unit: String,
    /// Sample element type
    #[serde(default)]
    pub sample_type: SampleType,
    /// `{ detector = <id> }` or `"sum"`
    pub source: ChannelSource,
}

fn default_query_interval() -> u64 {
    100
}

fn default_recovery_interval() -> u64 {
    3000
}

fn default_axis_unit() -> String {
    "m".to_string()
}

fn default_channel_unit() -> String {
    "c/s".to_string()
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            query_interval_ms: default_query_interval(),
            recovery_interval_ms: default_recovery_interval(),
            scan_line_interval_ms: 0,
        }
    }
}

impl PollingConfig {
    /// Timing of the monitors.
    pub fn query_poll(&self) -> PollConfig {
        PollConfig::new(Duration::from_millis(self.query_interval_ms))
            .with_recovery_interval(Duration::from_millis(self.recovery_interval_ms))
    }

    /// Timing of the scan runner.
    pub fn scan_poll(&self) -> PollConfig {
        PollConfig::new(Duration::from_millis(self.scan_line_interval_ms))
            .with_recovery_interval(Duration::from_millis(self.recovery_interval_ms))
    }
}

impl Default for ScannerConfig {
    /// Confocal piezo stage with two counting detectors.
    fn default() -> Self {
        let piezo = |name: &str, range: (f64, f64), max_frequency: f64| AxisConfig {
            name: name.to_string(),
            unit: default_axis_unit(),
            position_range: range,
            resolution_range: (2, 1000),
            frequency_range: (1.0, max_frequency),
        };
        let channel = |name: &str, source: ChannelSource| ChannelConfig {
            name: name.to_string(),
            unit: default_channel_unit(),
            sample_type: SampleType::F64,
            source,
        };
        Self {
            application: ApplicationConfig {
                name: "Scan DAQ".to_string(),
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
            },
            polling: PollingConfig::default(),
            scanner: ScannerSection {
                move_policy: MovePolicy::FirstPointBlocking,
                axes: vec![
                    piezo("x", (0.0, 100e-6), 500.0),
                    piezo("y", (0.0, 100e-6), 500.0),
                    piezo("z", (-50e-6, 50e-6), 100.0),
                ],
                channels: vec![
                    channel("APD1", ChannelSource::Detector(0)),
                    channel("APD2", ChannelSource::Detector(1)),
                    channel("sum", ChannelSource::Sum),
                ],
            },
        }
    }
}

impl ScannerConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Load from `path` and reject semantically invalid values.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        let config = Self::load_from(path)?;
        config.validate().map_err(ScanError::Configuration)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.polling.recovery_interval_ms == 0 {
            return Err("recovery_interval_ms must be greater than 0".to_string());
        }

        if self.scanner.axes.is_empty() {
            return Err("At least one scanner axis is required".to_string());
        }
        let mut names = HashSet::new();
        for axis in &self.scanner.axes {
            if !names.insert(axis.name.as_str()) {
                return Err(format!("Duplicate axis name: {}", axis.name));
            }
            let (min, max) = axis.position_range;
            if !(min <= max) {
                return Err(format!("Axis '{}': position_range min > max", axis.name));
            }
            let (min, max) = axis.resolution_range;
            if min == 0 || min > max {
                return Err(format!(
                    "Axis '{}': resolution_range must satisfy 1 <= min <= max",
                    axis.name
                ));
            }
            let (min, max) = axis.frequency_range;
            if !(min > 0.0 && min <= max) {
                return Err(format!(
                    "Axis '{}': frequency_range must satisfy 0 < min <= max",
                    axis.name
                ));
            }
        }

        let mut names = HashSet::new();
        for channel in &self.scanner.channels {
            if !names.insert(channel.name.as_str()) {
                return Err(format!("Duplicate channel name: {}", channel.name));
            }
        }
        if !self
            .scanner
            .channels
            .iter()
            .any(|channel| matches!(channel.source, ChannelSource::Detector(_)))
        {
            return Err("At least one detector channel is required".to_string());
        }

        Ok(())
    }

    /// Constraint set described by the `[scanner]` section.
    pub fn constraints(&self) -> ScanConstraints {
        let axes = self
            .scanner
            .axes
            .iter()
            .map(|axis| {
                AxisConstraint::new(
                    &axis.name,
                    &axis.unit,
                    axis.position_range,
                    axis.resolution_range,
                    axis.frequency_range,
                )
            })
            .collect();
        let channels = self
            .scanner
            .channels
            .iter()
            .map(|channel| ChannelSpec {
                name: channel.name.clone(),
                unit: channel.unit.clone(),
                sample_type: channel.sample_type,
                source: channel.source,
            })
            .collect();
        ScanConstraints::new(axes, channels)
    }

    /// Number of detector inputs referenced by the channels.
    pub fn detector_inputs(&self) -> u32 {
        self.scanner
            .channels
            .iter()
            .filter_map(|channel| match channel.source {
                ChannelSource::Detector(id) => Some(id + 1),
                ChannelSource::Sum => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Render as TOML, e.g. to write a starting configuration file.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScannerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector_inputs(), 2);

        let constraints = config.constraints();
        assert_eq!(constraints.axes().len(), 3);
        assert_eq!(constraints.axis("z").unwrap().value_range, (-50e-6, 50e-6));
        assert_eq!(constraints.channels()[2].source, ChannelSource::Sum);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = ScannerConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_axis_names() {
        let mut config = ScannerConfig::default();
        let x = config.scanner.axes[0].clone();
        config.scanner.axes.push(x);
        assert_eq!(config.validate(), Err("Duplicate axis name: x".to_string()));
    }

    #[test]
    fn test_inverted_ranges_rejected() {
        let mut config = ScannerConfig::default();
        config.scanner.axes[1].position_range = (1.0, 0.0);
        assert!(config.validate().unwrap_err().contains("position_range"));

        let mut config = ScannerConfig::default();
        config.scanner.axes[0].frequency_range = (0.0, 10.0);
        assert!(config.validate().unwrap_err().contains("frequency_range"));
    }

    #[test]
    fn test_sum_only_channels_rejected() {
        let mut config = ScannerConfig::default();
        config
            .scanner
            .channels
            .retain(|channel| channel.source == ChannelSource::Sum);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_configs() {
        let polling = PollingConfig {
            query_interval_ms: 50,
            recovery_interval_ms: 1000,
            scan_line_interval_ms: 5,
        };
        assert_eq!(polling.query_poll().interval, Duration::from_millis(50));
        assert_eq!(polling.scan_poll().interval, Duration::from_millis(5));
        assert_eq!(
            polling.scan_poll().recovery_interval,
            Duration::from_millis(1000)
        );
    }
}
