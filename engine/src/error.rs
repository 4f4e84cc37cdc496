//! Error taxonomy of a calibration run.
//!
//! Fatal conditions are [`CalibrationError`]s and short-circuit the
//! pipeline; warnings are [`Warning`]s, accumulate in the report and never
//! abort on their own. Only the orchestrator decides run disposition.

use crate::datastr::{LinkKey, PathKey};
use crate::host::HostError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("host call failed: {0}")]
    Host(#[from] HostError),
    #[error("invalid link attributes ({reason}) for links {keys:?}")]
    InvalidLinkAttributes { reason: &'static str, keys: Vec<LinkKey> },
    #[error("paths without links: {paths:?}")]
    EmptyPath { paths: Vec<PathKey> },
    #[error("non-positive observed travel times on paths {paths:?}")]
    NonPositiveObservation { paths: Vec<PathKey> },
    #[error("paths referencing links outside the snapshot: {references:?}")]
    UnknownLink { references: Vec<(PathKey, LinkKey)> },
    #[error("solver output infeasible ({reason}) for links {keys:?}")]
    FeasibilityViolation { reason: &'static str, keys: Vec<LinkKey> },
    #[error("run cancelled")]
    Cancelled,
}

/// Non-fatal findings, recorded in the report in the order they occur.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A path of only locked links whose baseline time disagrees with the
    /// observation beyond tolerance.
    LockedPathInconsistent { path: PathKey, baseline_time: f64, observed_time: f64 },
    /// Projected gradient did not fall below tolerance within the
    /// iteration cap; the last iterate is still reported.
    SolverDivergence { gradient_norm: f64 },
    /// Calibrated residual is not better than the baseline residual; the
    /// clipped baseline is written instead unless `force_accept` is set.
    NoImprovement { calibrated_residual: f64, baseline_residual: f64 },
    /// Too many unlocked links ended pinned at a bound.
    BoundsDominant { fraction: f64, threshold: f64 },
}

impl Warning {
    pub fn code(&self) -> &'static str {
        match self {
            Warning::LockedPathInconsistent { .. } => "LockedPathInconsistent",
            Warning::SolverDivergence { .. } => "SolverDivergence",
            Warning::NoImprovement { .. } => "NoImprovement",
            Warning::BoundsDominant { .. } => "BoundsDominant",
        }
    }
}
