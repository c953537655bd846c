//! Calibration bookkeeping for the whole bench.
//!
//! `CalibrationService` owns one forward and one inverse model per axis,
//! resolves named action groups ("laser_wavelength" etc.) to their member
//! axes, and loads persisted coefficient files.
//!
//! ## Persisted schema
//!
//! A calibration file is a JSON object whose keys name an axis and a
//! direction, `"<unit>_to_<axis>"` for forward (unit to steps) and
//! `"<axis>_to_<unit>"` for inverse. Each value is either a legacy bare
//! coefficient array (family inferred from length, see
//! [`CalibrationModel::from_legacy`]) or a tagged object:
//!
//! ```json
//! {
//!     "wl_to_l1": { "family": "linear_sinusoidal",
//!                   "coeffs": [12.1, -300.0, 4.0, 0.13, 0.0, 0.0],
//!                   "metrics": { "r_squared": 0.9998, "rmse": 1.4,
//!                                "mae": 1.1, "residual_std": 1.3 } },
//!     "l1_to_wl": [0.0024, 780.2, 0.1]
//! }
//! ```
//!
//! Autocal override files named `autocal_<axis>_<index>.json` in the
//! override directory amend the startup set; the highest index per axis
//! wins. Models are never mutated mid-scan: amendments happen between
//! sessions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use super::model::{CalibrationModel, FitMetrics, ModelFamily};
use crate::error::{BenchError, Result};

/// One fitted direction for one axis.
#[derive(Debug, Clone)]
pub struct CalibratedFn {
    pub model: CalibrationModel,
    pub metrics: Option<FitMetrics>,
}

#[derive(Serialize, Deserialize)]
struct TaggedEntry {
    family: ModelFamily,
    coeffs: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metrics: Option<FitMetrics>,
}

/// Persisted form of one model: tagged object or legacy bare array.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ModelEntry {
    Tagged(TaggedEntry),
    Legacy(Vec<f64>),
}

impl ModelEntry {
    fn into_calibrated(self) -> Result<CalibratedFn> {
        match self {
            ModelEntry::Tagged(entry) => Ok(CalibratedFn {
                model: CalibrationModel::from_tagged(entry.family, &entry.coeffs)?,
                metrics: entry.metrics,
            }),
            ModelEntry::Legacy(coeffs) => Ok(CalibratedFn {
                model: CalibrationModel::from_legacy(&coeffs)?,
                metrics: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Inverse,
}

/// Owns every axis calibration and the action-group table.
pub struct CalibrationService {
    unit: String,
    forward: HashMap<String, CalibratedFn>,
    inverse: HashMap<String, CalibratedFn>,
    groups: HashMap<String, Vec<String>>,
}

impl CalibrationService {
    pub fn new(unit: &str, groups: HashMap<String, Vec<String>>) -> Self {
        Self {
            unit: unit.to_string(),
            forward: HashMap::new(),
            inverse: HashMap::new(),
            groups,
        }
    }

    /// Load the startup coefficient set from `path`.
    pub fn load(
        path: &Path,
        unit: &str,
        groups: HashMap<String, Vec<String>>,
    ) -> Result<Self> {
        let mut service = Self::new(unit, groups);
        let touched = service.merge_file(path)?;
        info!(file = %path.display(), axes = ?touched, "calibration loaded");
        Ok(service)
    }

    /// Merge one coefficient file into the registry, replacing any models
    /// it names. Returns the axes that changed.
    pub fn merge_file(&mut self, path: &Path) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(path)?;
        let entries: BTreeMap<String, ModelEntry> = serde_json::from_str(&text)?;

        let mut touched = Vec::new();
        for (key, entry) in entries {
            let Some((axis, direction)) = self.parse_key(&key) else {
                warn!(%key, file = %path.display(), "skipping unrecognized calibration key");
                continue;
            };
            let calibrated = entry
                .into_calibrated()
                .map_err(|e| BenchError::Calibration(format!("{key}: {e}")))?;
            info!(%axis, ?direction, family = %calibrated.model.family(), "calibration model set");
            let table = match direction {
                Direction::Forward => &mut self.forward,
                Direction::Inverse => &mut self.inverse,
            };
            table.insert(axis.clone(), calibrated);
            if !touched.contains(&axis) {
                touched.push(axis);
            }
        }
        Ok(touched)
    }

    fn parse_key(&self, key: &str) -> Option<(String, Direction)> {
        let forward_prefix = format!("{}_to_", self.unit);
        let inverse_suffix = format!("_to_{}", self.unit);
        if let Some(axis) = key.strip_prefix(&forward_prefix) {
            if !axis.is_empty() {
                return Some((axis.to_string(), Direction::Forward));
            }
        }
        if let Some(axis) = key.strip_suffix(&inverse_suffix) {
            if !axis.is_empty() {
                return Some((axis.to_string(), Direction::Inverse));
            }
        }
        None
    }

    /// Member axes of a named action group, in configured order.
    pub fn group(&self, name: &str) -> Result<&[String]> {
        self.groups
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| BenchError::UnknownGroup(name.to_string()))
    }

    pub fn has_forward(&self, axis: &str) -> bool {
        self.forward.contains_key(axis)
    }

    /// Convert a physical value to motor steps for every axis in `group`.
    ///
    /// Fails with `MissingCalibration` if any member axis has no forward
    /// model; no partial map is returned.
    pub fn unit_to_steps(&self, value: f64, group: &str) -> Result<BTreeMap<String, i64>> {
        let mut steps = BTreeMap::new();
        for axis in self.group(group)? {
            let calibrated = self
                .forward
                .get(axis)
                .ok_or_else(|| BenchError::MissingCalibration(axis.clone()))?;
            steps.insert(axis.clone(), calibrated.model.evaluate(value).round() as i64);
        }
        Ok(steps)
    }

    /// Convert per-axis step counts back to physical values.
    pub fn steps_to_unit(&self, steps: &BTreeMap<String, i64>) -> Result<BTreeMap<String, f64>> {
        let mut values = BTreeMap::new();
        for (axis, count) in steps {
            let calibrated = self
                .inverse
                .get(axis)
                .ok_or_else(|| BenchError::MissingCalibration(axis.clone()))?;
            values.insert(axis.clone(), calibrated.model.evaluate(*count as f64));
        }
        Ok(values)
    }

    /// Apply autocal override files from `dir`.
    ///
    /// Files are named `autocal_<axis>_<index>.json`; for each axis only the
    /// file with the highest index is applied (last-write-wins). Returns the
    /// axes whose models changed.
    pub fn amend(&mut self, dir: &Path) -> Result<Vec<String>> {
        let mut latest: HashMap<String, (u64, std::path::PathBuf)> = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some((axis, index)) = parse_override_name(&name.to_string_lossy()) else {
                continue;
            };
            match latest.get(&axis) {
                Some((existing, _)) if *existing >= index => {}
                _ => {
                    latest.insert(axis, (index, entry.path()));
                }
            }
        }

        let mut changed = Vec::new();
        for (axis, (index, path)) in latest {
            info!(%axis, index, file = %path.display(), "applying autocal override");
            let touched = self.merge_file(&path)?;
            for axis in touched {
                if !changed.contains(&axis) {
                    changed.push(axis);
                }
            }
        }
        changed.sort();
        Ok(changed)
    }
}

fn parse_override_name(name: &str) -> Option<(String, u64)> {
    let stem = name.strip_prefix("autocal_")?.strip_suffix(".json")?;
    let (axis, index) = stem.rsplit_once('_')?;
    if axis.is_empty() {
        return None;
    }
    Some((axis.to_string(), index.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn groups() -> HashMap<String, Vec<String>> {
        let mut groups = HashMap::new();
        groups.insert(
            "laser_wavelength".to_string(),
            vec!["l1".to_string(), "l2".to_string()],
        );
        groups.insert("grating_wavelength".to_string(), vec!["g3".to_string()]);
        groups
    }

    fn write_file(dir: &Path, name: &str, json: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_legacy_and_tagged_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "cal.json",
            r#"{
                "wl_to_l1": [2.0, 100.0, -5.0],
                "l1_to_wl": { "family": "linear_sinusoidal",
                              "coeffs": [0.5, 700.0, 0.0, 1.0, 0.0, 0.0],
                              "metrics": { "r_squared": 0.999, "rmse": 0.5,
                                           "mae": 0.4, "residual_std": 0.45 } },
                "wl_to_l2": [1.0, 0.0]
            }"#,
        );

        let service = CalibrationService::load(&path, "wl", groups()).unwrap();
        assert!(service.has_forward("l1"));
        assert!(service.has_forward("l2"));

        // 2x^2 + 100x - 5 at x = 3, rounded
        let steps = service.unit_to_steps(3.0, "laser_wavelength").unwrap();
        assert_eq!(steps["l1"], 313);
        assert_eq!(steps["l2"], 3);
    }

    #[test]
    fn missing_model_is_an_error_not_a_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "cal.json", r#"{ "wl_to_l1": [1.0, 0.0] }"#);
        let service = CalibrationService::load(&path, "wl", groups()).unwrap();

        // l2 is in the group but has no model
        let err = service.unit_to_steps(500.0, "laser_wavelength").unwrap_err();
        assert!(matches!(err, BenchError::MissingCalibration(axis) if axis == "l2"));
    }

    #[test]
    fn unknown_group_is_an_error() {
        let service = CalibrationService::new("wl", groups());
        let err = service.unit_to_steps(500.0, "nope").unwrap_err();
        assert!(matches!(err, BenchError::UnknownGroup(_)));
    }

    #[test]
    fn steps_to_unit_uses_inverse_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "cal.json",
            r#"{ "g3_to_wl": [0.5, 100.0] }"#,
        );
        let service = CalibrationService::load(&path, "wl", groups()).unwrap();

        let mut steps = BTreeMap::new();
        steps.insert("g3".to_string(), 40_i64);
        let values = service.steps_to_unit(&steps).unwrap();
        assert!((values["g3"] - 120.0).abs() < 1e-12);
    }

    #[test]
    fn amend_picks_highest_index_per_axis() {
        let dir = tempfile::tempdir().unwrap();
        let cal = write_file(dir.path(), "cal.json", r#"{ "wl_to_l1": [1.0, 0.0] }"#);
        let mut service = CalibrationService::load(&cal, "wl", groups()).unwrap();

        let overrides = tempfile::tempdir().unwrap();
        write_file(
            overrides.path(),
            "autocal_l1_2.json",
            r#"{ "wl_to_l1": [2.0, 0.0] }"#,
        );
        write_file(
            overrides.path(),
            "autocal_l1_10.json",
            r#"{ "wl_to_l1": [3.0, 0.0] }"#,
        );
        write_file(overrides.path(), "notes.txt", "ignored");

        let changed = service.amend(overrides.path()).unwrap();
        assert_eq!(changed, vec!["l1".to_string()]);

        // index 10 wins over index 2 (numeric, not lexical)
        let steps = service.unit_to_steps(7.0, "grating_wavelength");
        assert!(steps.is_err()); // g3 untouched by overrides

        let mut single = HashMap::new();
        single.insert("only".to_string(), vec!["l1".to_string()]);
        let service_groups = CalibrationService {
            groups: single,
            ..service
        };
        let steps = service_groups.unit_to_steps(7.0, "only").unwrap();
        assert_eq!(steps["l1"], 21);
    }

    #[test]
    fn override_name_parsing() {
        assert_eq!(
            parse_override_name("autocal_l1_3.json"),
            Some(("l1".to_string(), 3))
        );
        assert_eq!(
            parse_override_name("autocal_mono_slit_12.json"),
            Some(("mono_slit".to_string(), 12))
        );
        assert_eq!(parse_override_name("autocal_l1.json"), None);
        assert_eq!(parse_override_name("cal.json"), None);
    }
}
