//! Configuration management.
//!
//! Settings are loaded from TOML via the `config` crate and deserialized
//! into typed structs. A minimal bench configuration looks like:
//!
//! ```toml
//! log_level = "info"
//!
//! [controller]
//! port = "/dev/ttyUSB0"
//! baud_rate = 19200
//! envelope_limit = 56
//! poll_interval = "100ms"
//! motion_timeout = "60s"
//! backlash_steps = 100
//!
//! [axes.l1]
//! id = 1
//! module = 0
//!
//! [axes.g3]
//! id = 6
//! module = 1
//!
//! [action_groups]
//! laser_wavelength = ["l1", "l2", "l3"]
//! grating_wavelength = ["g1", "g2", "g3"]
//! monochromator_wavelength = ["g3", "mono"]
//!
//! [calibration]
//! file = "config/calibration.json"
//! override_dir = "config/autocal"
//! unit = "wl"
//!
//! [acquisition]
//! frame_timeout = "2s"
//! retry_budget = 3
//! status_dir = "status"
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub controller: ControllerSettings,
    /// Motor axes by label, e.g. "l1", "g3".
    pub axes: HashMap<String, AxisSettings>,
    /// Named action groups; an axis may appear in more than one group.
    #[serde(default)]
    pub action_groups: HashMap<String, Vec<String>>,
    pub calibration: CalibrationSettings,
    pub acquisition: AcquisitionSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControllerSettings {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Receive-buffer cap on total envelope length, delimiters included.
    #[serde(default = "default_envelope_limit")]
    pub envelope_limit: usize,
    /// Interval between running-state polls while waiting for motors.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Bound on a single wait-for-motors call.
    #[serde(with = "humantime_serde", default = "default_motion_timeout")]
    pub motion_timeout: Duration,
    /// Magnitude of the overshoot-and-return correction after reverse motion.
    #[serde(default = "default_backlash_steps")]
    pub backlash_steps: i64,
    /// Bound on a single envelope round trip.
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct AxisSettings {
    /// Low-level controller id. The wire protocol encodes ids as a single
    /// character, so ids are restricted to 0-9.
    pub id: u8,
    /// Controller module the axis hangs off, used by the home command.
    #[serde(default)]
    pub module: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationSettings {
    /// Calibration coefficient file loaded at startup.
    pub file: PathBuf,
    /// Directory holding autocal override files, applied last-write-wins.
    #[serde(default)]
    pub override_dir: Option<PathBuf>,
    /// Physical-unit tag used in coefficient keys ("wl_to_l1" etc.).
    #[serde(default = "default_unit")]
    pub unit: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionSettings {
    /// Bound on a single frame grab.
    #[serde(with = "humantime_serde", default = "default_frame_timeout")]
    pub frame_timeout: Duration,
    /// Immediate retries per frame before the step is recorded as failed.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Where `failed_steps.json` is written at session end.
    #[serde(default = "default_status_dir")]
    pub status_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    19200
}

fn default_envelope_limit() -> usize {
    56
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_motion_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_backlash_steps() -> i64 {
    100
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_unit() -> String {
    "wl".to_string()
}

fn default_frame_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_retry_budget() -> u32 {
    3
}

fn default_status_dir() -> PathBuf {
    PathBuf::from("status")
}

impl Settings {
    /// Load `config/<name>.toml`, defaulting to `config/default.toml`.
    pub fn new(config_name: Option<&str>) -> Result<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        Self::from_file(&config_path)
    }

    /// Load settings from an explicit file path (extension optional).
    pub fn from_file(path: &str) -> Result<Self> {
        let s = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        Ok(s.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const MINIMAL: &str = r#"
        [controller]
        port = "/dev/ttyUSB0"

        [axes.l1]
        id = 1

        [axes.g3]
        id = 6
        module = 1

        [action_groups]
        laser_wavelength = ["l1"]
        grating_wavelength = ["g3"]
        monochromator_wavelength = ["g3"]

        [calibration]
        file = "cal.json"

        [acquisition]
    "#;

    fn parse(toml_src: &str) -> Settings {
        config::Config::builder()
            .add_source(config::File::from_str(toml_src, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let settings = parse(MINIMAL);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.controller.baud_rate, 19200);
        assert_eq!(settings.controller.envelope_limit, 56);
        assert_eq!(settings.controller.backlash_steps, 100);
        assert_eq!(settings.controller.motion_timeout, Duration::from_secs(60));
        assert_eq!(settings.acquisition.retry_budget, 3);
        assert_eq!(settings.calibration.unit, "wl");
    }

    #[test]
    fn axes_may_share_action_groups() {
        let settings = parse(MINIMAL);
        assert!(settings.action_groups["grating_wavelength"].contains(&"g3".to_string()));
        assert!(settings.action_groups["monochromator_wavelength"].contains(&"g3".to_string()));
    }

    #[test]
    fn durations_parse_humantime() {
        let toml_src = MINIMAL.replace("[acquisition]", "[acquisition]\nframe_timeout = \"250ms\"");
        let settings = parse(&toml_src);
        assert_eq!(settings.acquisition.frame_timeout, Duration::from_millis(250));
    }
}
