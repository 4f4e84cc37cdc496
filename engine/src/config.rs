//! Run configuration.
//!
//! Deserialised from a json file by the binaries or constructed directly
//! by embedding code. Validation happens before any host call; a rejected
//! configuration never triggers host i/o.

use crate::datastr::{LinkKey, PathKey};
use crate::error::CalibrationError;
use serde::Deserialize;
use std::path::PathBuf;

/// Distance unit of link lengths on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    Kilometers,
    Meters,
}

impl DistanceUnit {
    /// Factor converting host lengths into km.
    pub fn to_km(self) -> f64 {
        match self {
            DistanceUnit::Kilometers => 1.0,
            DistanceUnit::Meters => 1e-3,
        }
    }
}

/// Time unit of observed travel times on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Hours,
    Seconds,
}

impl TimeUnit {
    /// Factor converting host times into hours.
    pub fn to_hours(self) -> f64 {
        match self {
            TimeUnit::Hours => 1.0,
            TimeUnit::Seconds => 1.0 / 3600.0,
        }
    }
}

/// Units fixed for the whole run. Speeds are distance units per hour, so
/// only lengths and times need conversion factors.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct UnitConvention {
    pub distance: DistanceUnit,
    pub time: TimeUnit,
}

impl Default for UnitConvention {
    fn default() -> Self {
        UnitConvention {
            distance: DistanceUnit::Kilometers,
            time: TimeUnit::Hours,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    /// Keys of the links under calibration; absent means all links.
    pub link_filter: Option<Vec<LinkKey>>,
    /// Identifiers of the observed paths to use; absent means all paths.
    pub path_filter: Option<Vec<PathKey>>,
    /// Semantic names of the per-link bound attributes. When absent,
    /// `global_speed_bounds` must provide a fallback pair.
    pub speed_bounds_attr: Option<(String, String)>,
    /// Global (lower, upper) speed bounds applied to every link when no
    /// per-link bound attributes are configured.
    pub global_speed_bounds: Option<(f64, f64)>,
    /// Semantic name of a 0/1 attribute marking a link as locked.
    pub locked_attr: Option<String>,
    /// Keys of links locked at baseline regardless of `locked_attr`.
    pub locked_links: Vec<LinkKey>,
    /// Tikhonov anchor towards baseline paces; 0 disables.
    pub regularisation_lambda: f64,
    pub max_iterations: u32,
    /// Convergence test on the projected gradient norm.
    pub gradient_tolerance: f64,
    /// Fraction of unlocked links at a bound above which the
    /// `BoundsDominant` warning is raised.
    pub bounds_dominant_threshold: f64,
    /// Produce the report but skip the host write.
    pub dry_run: bool,
    /// Write the solver output even when it does not beat the baseline.
    pub force_accept: bool,
    /// Where to put the machine-readable report; stdout when absent.
    pub report_path: Option<PathBuf>,
    pub units: UnitConvention,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            link_filter: None,
            path_filter: None,
            speed_bounds_attr: Some(("speed_lower_bound".to_string(), "speed_upper_bound".to_string())),
            global_speed_bounds: None,
            locked_attr: Some("locked".to_string()),
            locked_links: Vec::new(),
            regularisation_lambda: 0.0,
            max_iterations: 100,
            gradient_tolerance: 1e-10,
            bounds_dominant_threshold: 0.25,
            dry_run: false,
            force_accept: false,
            report_path: None,
            units: UnitConvention::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let fail = |msg: String| Err(CalibrationError::Config(msg));

        if !self.regularisation_lambda.is_finite() || self.regularisation_lambda < 0.0 {
            return fail(format!("regularisation_lambda must be a non-negative real, got {}", self.regularisation_lambda));
        }
        if self.max_iterations == 0 {
            return fail("max_iterations must be positive".to_string());
        }
        if !self.gradient_tolerance.is_finite() || self.gradient_tolerance <= 0.0 {
            return fail(format!("gradient_tolerance must be a positive real, got {}", self.gradient_tolerance));
        }
        if !(0.0..=1.0).contains(&self.bounds_dominant_threshold) {
            return fail(format!("bounds_dominant_threshold must lie in [0, 1], got {}", self.bounds_dominant_threshold));
        }
        if self.speed_bounds_attr.is_none() && self.global_speed_bounds.is_none() {
            return fail("either speed_bounds_attr or global_speed_bounds must be configured".to_string());
        }
        if let Some((lower, upper)) = self.global_speed_bounds {
            if !(lower.is_finite() && upper.is_finite() && 0.0 < lower && lower <= upper) {
                return fail(format!("global_speed_bounds ({}, {}) are not a valid positive range", lower, upper));
            }
        }
        if let Some(filter) = &self.link_filter {
            if filter.is_empty() {
                return fail("link_filter selects no links".to_string());
            }
        }
        if let Some(filter) = &self.path_filter {
            if filter.is_empty() {
                return fail("path_filter selects no paths".to_string());
            }
        }
        Ok(())
    }
}
