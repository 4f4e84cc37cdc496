//! Structured reporting.
//!
//! Two layers. The typed [`CalibrationReport`] is the machine-readable
//! result of a run with a fixed schema and deterministic row ordering
//! (links by host key ascending, paths in host order). On top of that a
//! small thread-local JSON run log in RAII style collects build and
//! timing facts of the surrounding process; binaries enable it with
//! [`enable_reporting`] and sprinkle `report!` calls, and the accumulated
//! object is emitted to stderr when the guard drops.

use crate::datastr::{LinkKey, PathKey};
use crate::error::Warning;
use crate::gate::{BoundFlag, FitSummary};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::io::Write;
use std::path::Path;

pub use serde_json::json;

/// Acceptance state of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Accepted,
    Rejected,
    Aborted,
}

/// Terminal state of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Written,
    DryRunSkipped,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub key: LinkKey,
    pub baseline_speed: f64,
    pub calibrated_speed: f64,
    pub delta: f64,
    pub bound: BoundFlag,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathReport {
    pub id: PathKey,
    pub observed_time: f64,
    pub baseline_time: f64,
    pub calibrated_time: f64,
    pub relative_error: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub terminal: TerminalState,
    pub iterations: u32,
    pub rank: usize,
    pub condition: Option<f64>,
    pub gradient_norm: f64,
    pub residual_norm: f64,
    pub baseline_residual_norm: f64,
    pub fit: Option<FitSummary>,
    pub warnings: Vec<Warning>,
    /// Human-readable description of the fatal error on abort.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub run: RunSummary,
    pub links: Vec<LinkReport>,
    pub paths: Vec<PathReport>,
}

impl CalibrationReport {
    /// Serialise to the configured destination, stdout when absent.
    pub fn write(&self, path: Option<&Path>) -> std::io::Result<()> {
        match path {
            Some(path) => {
                let file = std::fs::File::create(path)?;
                serde_json::to_writer_pretty(file, self)?;
            }
            None => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                serde_json::to_writer_pretty(&mut lock, self)?;
                writeln!(lock)?;
            }
        }
        Ok(())
    }

    /// One-line summary for stderr.
    pub fn summary_line(&self) -> String {
        let warnings: Vec<&'static str> = self.run.warnings.iter().map(Warning::code).collect();
        match &self.run.error {
            Some(error) => format!("calibration aborted: {}", error),
            None => format!(
                "calibration {:?}: {} links, {} paths, residual {:.6e} (baseline {:.6e}), warnings [{}]",
                self.run.status,
                self.links.len(),
                self.paths.len(),
                self.run.residual_norm,
                self.run.baseline_residual_norm,
                warnings.join(", ")
            ),
        }
    }
}

// --- thread-local run log in the RAII style -------------------------------

#[derive(Debug, Default)]
struct RunLog {
    current: Map<String, Value>,
    stack: Vec<(String, Map<String, Value>)>,
}

thread_local! {
    static RUN_LOG: RefCell<Option<RunLog>> = RefCell::new(None);
}

pub fn report(key: String, value: Value) {
    RUN_LOG.with(|log| {
        if let Some(log) = log.borrow_mut().as_mut() {
            log.current.insert(key, value);
        }
    });
}

/// Open a nested object under `key`; it is sealed when the guard drops.
#[must_use]
pub struct ContextGuard(());

impl Drop for ContextGuard {
    fn drop(&mut self) {
        RUN_LOG.with(|log| {
            if let Some(log) = log.borrow_mut().as_mut() {
                let (key, parent) = log.stack.pop().expect("context guard dropped without matching push");
                let child = std::mem::replace(&mut log.current, parent);
                log.current.insert(key, Value::Object(child));
            }
        });
    }
}

pub fn push_context(key: &str) -> ContextGuard {
    RUN_LOG.with(|log| {
        if let Some(log) = log.borrow_mut().as_mut() {
            let parent = std::mem::take(&mut log.current);
            log.stack.push((key.to_string(), parent));
        }
    });
    ContextGuard(())
}

/// Emits the accumulated log as one JSON object on stderr when dropped.
#[must_use]
pub struct ReportingGuard(());

impl Drop for ReportingGuard {
    fn drop(&mut self) {
        RUN_LOG.with(|log| {
            if let Some(log) = log.borrow_mut().take() {
                assert!(log.stack.is_empty(), "unclosed reporting contexts");
                eprintln!("{}", Value::Object(log.current));
            }
        });
    }
}

pub fn enable_reporting(program: &str) -> ReportingGuard {
    RUN_LOG.with(|log| log.replace(Some(RunLog::default())));

    crate::report!("program", program);
    crate::report!("args", std::env::args().collect::<Vec<String>>());

    ReportingGuard(())
}

#[macro_export]
macro_rules! report {
    ($k:expr, $($json:tt)+) => {
        $crate::report::report($k.to_string(), $crate::report::json!($($json)+))
    };
}

pub mod benchmark;
pub use benchmark::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_schema_is_stable_json() {
        let report = CalibrationReport {
            run: RunSummary {
                status: RunStatus::Accepted,
                terminal: TerminalState::DryRunSkipped,
                iterations: 2,
                rank: 1,
                condition: Some(1.0),
                gradient_norm: 0.0,
                residual_norm: 0.0,
                baseline_residual_norm: 0.1,
                fit: None,
                warnings: vec![Warning::BoundsDominant { fraction: 0.5, threshold: 0.25 }],
                error: None,
            },
            links: vec![LinkReport {
                key: 1,
                baseline_speed: 50.0,
                calibrated_speed: 60.0,
                delta: 10.0,
                bound: BoundFlag::None,
            }],
            paths: vec![],
        };
        let value: Value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["run"]["status"], "accepted");
        assert_eq!(value["run"]["terminal"], "dry_run_skipped");
        assert_eq!(value["run"]["warnings"][0]["kind"], "bounds_dominant");
        assert_eq!(value["links"][0]["bound"], "none");
    }

    #[test]
    fn run_log_nests_contexts() {
        let _guard = enable_reporting("test");
        report!("answer", 42);
        {
            let _ctx = push_context("inner");
            report!("nested", true);
        }
        RUN_LOG.with(|log| {
            let log = log.borrow();
            let log = log.as_ref().unwrap();
            assert_eq!(log.current["answer"], 42);
            assert_eq!(log.current["inner"]["nested"], true);
        });
    }
}
