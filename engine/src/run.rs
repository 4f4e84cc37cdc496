//! Orchestration of a calibration run.
//!
//! Drives the pipeline Config -> Loaded -> Assembled -> Solved ->
//! Validated -> Written | DryRunSkipped. Every transition is gated by the
//! success of the corresponding component; fatal errors short-circuit
//! into the Aborted terminal state with a partial report. Warnings only
//! accumulate. A cooperative cancellation flag is checked between stages,
//! never inside the solver.
//!
//! The host handle is passed in by the caller and only touched here and
//! in the loader; no other component ever sees it.

use crate::algo::bounded_lsq::{self, SolverSettings};
use crate::config::CalibrationConfig;
use crate::datastr::incidence::{build_incidence, AssembledSystem};
use crate::datastr::snapshot::LinkTable;
use crate::error::{CalibrationError, Warning};
use crate::gate::{self, BoundFlag, GateOutcome};
use crate::host::{attributes, Host};
use crate::load;
use crate::model;
use crate::report::benchmark::report_time_with_key;
use crate::report::{CalibrationReport, LinkReport, PathReport, RunStatus, RunSummary, TerminalState};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct RunOutcome {
    pub report: CalibrationReport,
    pub error: Option<CalibrationError>,
}

impl RunOutcome {
    /// 0 on acceptance (warnings included), non-zero on reject or abort.
    pub fn exit_code(&self) -> i32 {
        match self.report.run.status {
            RunStatus::Accepted => 0,
            RunStatus::Rejected | RunStatus::Aborted => 1,
        }
    }

    /// Emit the report to the configured destination and a one-line
    /// summary to stderr.
    pub fn emit(&self, config: &CalibrationConfig) -> std::io::Result<()> {
        eprintln!("{}", self.report.summary_line());
        self.report.write(config.report_path.as_deref())
    }
}

#[derive(Default)]
struct Progress {
    links: Option<LinkTable>,
    system: Option<AssembledSystem>,
    warnings: Vec<Warning>,
}

pub fn run(host: &mut impl Host, config: &CalibrationConfig) -> RunOutcome {
    run_cancellable(host, config, &AtomicBool::new(false))
}

pub fn run_cancellable(host: &mut impl Host, config: &CalibrationConfig, cancel: &AtomicBool) -> RunOutcome {
    let mut progress = Progress::default();
    match pipeline(host, config, cancel, &mut progress) {
        Ok(report) => RunOutcome { report, error: None },
        Err(error) => {
            let report = aborted_report(&progress, &error);
            RunOutcome { report, error: Some(error) }
        }
    }
}

fn check_cancel(cancel: &AtomicBool) -> Result<(), CalibrationError> {
    if cancel.load(Ordering::SeqCst) {
        Err(CalibrationError::Cancelled)
    } else {
        Ok(())
    }
}

fn pipeline(host: &mut impl Host, config: &CalibrationConfig, cancel: &AtomicBool, progress: &mut Progress) -> Result<CalibrationReport, CalibrationError> {
    config.validate()?;
    check_cancel(cancel)?;

    let links = report_time_with_key("loading links", "load_links_ms", || load::load_links(host, config))?;
    let paths = report_time_with_key("loading paths", "load_paths_ms", || load::load_paths(host, &links, config))?;
    progress.links = Some(links);
    let links = progress.links.as_ref().unwrap();
    check_cancel(cancel)?;

    progress.system = Some(build_incidence(links, &paths));
    let system = progress.system.as_ref().unwrap();
    let (problem, formulation_warnings) = model::formulate(links, system, config.regularisation_lambda);
    progress.warnings.extend(formulation_warnings);
    crate::report!("assembled", { "num_paths": system.matrix.num_paths(), "num_entries": system.matrix.num_entries(), "num_free_links": problem.num_cols() });
    check_cancel(cancel)?;

    let settings = SolverSettings {
        max_iterations: config.max_iterations,
        gradient_tolerance: config.gradient_tolerance,
    };
    let solution = report_time_with_key("solving", "solve_ms", || bounded_lsq::solve(&problem, &settings));
    progress.warnings.extend(solution.warnings.iter().cloned());
    check_cancel(cancel)?;

    let outcome = gate::validate(links, &problem, &solution, config)?;
    progress.warnings.extend(outcome.warnings.iter().cloned());
    check_cancel(cancel)?;

    let terminal = if config.dry_run {
        TerminalState::DryRunSkipped
    } else {
        write_back(host, links, &outcome, config)?;
        TerminalState::Written
    };

    Ok(CalibrationReport {
        run: RunSummary {
            status: RunStatus::Accepted,
            terminal,
            iterations: solution.diagnostics.iterations,
            rank: solution.diagnostics.rank,
            condition: solution.diagnostics.condition,
            gradient_norm: solution.diagnostics.gradient_norm,
            residual_norm: outcome.residual_norm,
            baseline_residual_norm: outcome.baseline_residual_norm,
            fit: Some(outcome.fit),
            warnings: progress.warnings.clone(),
            error: None,
        },
        links: link_rows(links, Some(&outcome)),
        paths: path_rows(system, Some(&outcome)),
    })
}

/// The single batched write of a run: new speeds for all unlocked links,
/// ascending by host key. Locked links are never touched.
fn write_back(host: &mut impl Host, links: &LinkTable, outcome: &GateOutcome, config: &CalibrationConfig) -> Result<(), CalibrationError> {
    let to_host_speed = 1.0 / config.units.distance.to_km();
    let batch: Vec<_> = (0..links.num_links())
        .filter(|&l| !links.locked[l])
        .map(|l| (links.key(l as u32), outcome.calibrated_speed[l] * to_host_speed))
        .collect();
    if batch.is_empty() {
        return Ok(());
    }
    report_time_with_key("writing calibrated speeds", "write_ms", || {
        host.write_link_attribute(attributes::LINK_CALIBRATED_SPEED.host_key, &batch)
    })?;
    Ok(())
}

fn link_rows(links: &LinkTable, outcome: Option<&GateOutcome>) -> Vec<LinkReport> {
    (0..links.num_links())
        .map(|l| {
            let baseline = links.baseline_speed[l];
            let (calibrated, bound) = match outcome {
                Some(outcome) => (outcome.calibrated_speed[l], outcome.bound_flag[l]),
                None => (baseline, if links.locked[l] { BoundFlag::Locked } else { BoundFlag::None }),
            };
            LinkReport {
                key: links.key(l as u32),
                baseline_speed: baseline,
                calibrated_speed: calibrated,
                delta: calibrated - baseline,
                bound,
            }
        })
        .collect()
}

fn path_rows(system: &AssembledSystem, outcome: Option<&GateOutcome>) -> Vec<PathReport> {
    (0..system.matrix.num_paths())
        .map(|p| {
            let observed = system.observed[p];
            let baseline = system.baseline_times[p];
            let (calibrated, relative_error) = match outcome {
                Some(outcome) => (outcome.calibrated_times[p], outcome.relative_errors[p]),
                None => (baseline, (baseline - observed).abs() / observed),
            };
            PathReport {
                id: system.path_ids[p],
                observed_time: observed,
                baseline_time: baseline,
                calibrated_time: calibrated,
                relative_error,
            }
        })
        .collect()
}

fn aborted_report(progress: &Progress, error: &CalibrationError) -> CalibrationReport {
    let status = match error {
        CalibrationError::FeasibilityViolation { .. } => RunStatus::Rejected,
        _ => RunStatus::Aborted,
    };
    CalibrationReport {
        run: RunSummary {
            status,
            terminal: TerminalState::Aborted,
            iterations: 0,
            rank: 0,
            condition: None,
            gradient_norm: 0.0,
            residual_norm: 0.0,
            baseline_residual_norm: 0.0,
            fit: None,
            warnings: progress.warnings.clone(),
            error: Some(error.to_string()),
        },
        links: progress.links.as_ref().map(|links| link_rows(links, None)).unwrap_or_default(),
        paths: progress.system.as_ref().map(|system| path_rows(system, None)).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{memory::MemoryHost, HostPath};

    fn chain_host() -> MemoryHost {
        MemoryHost::new(vec![1, 2])
            .with_attribute("length", vec![10.0, 20.0])
            .with_attribute("v0", vec![50.0, 50.0])
            .with_attribute("v0_min", vec![10.0, 10.0])
            .with_attribute("v0_max", vec![130.0, 130.0])
            .with_attribute("v0_locked", vec![0.0, 0.0])
            .with_paths(vec![HostPath {
                id: 1,
                segments: vec![(1, 10.0), (2, 20.0)],
                observed_time: 0.5,
                weight: 1.0,
            }])
    }

    #[test]
    fn successful_run_writes_once() {
        let mut host = chain_host();
        let outcome = run(&mut host, &CalibrationConfig::default());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.report.run.terminal, TerminalState::Written);
        assert_eq!(host.writes().len(), 1);
        assert_eq!(host.writes()[0].1.len(), 2);
    }

    #[test]
    fn dry_run_skips_the_write() {
        let mut host = chain_host();
        let config = CalibrationConfig {
            dry_run: true,
            ..Default::default()
        };
        let outcome = run(&mut host, &config);
        assert_eq!(outcome.report.run.terminal, TerminalState::DryRunSkipped);
        assert_eq!(outcome.exit_code(), 0);
        assert!(host.writes().is_empty());
    }

    #[test]
    fn invalid_config_aborts_before_any_host_io() {
        let mut host = chain_host();
        let config = CalibrationConfig {
            max_iterations: 0,
            ..Default::default()
        };
        let outcome = run(&mut host, &config);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.report.run.terminal, TerminalState::Aborted);
        assert!(outcome.report.links.is_empty());
        assert!(host.writes().is_empty());
    }

    #[test]
    fn cancellation_is_checked_between_stages() {
        let mut host = chain_host();
        let cancel = AtomicBool::new(true);
        let outcome = run_cancellable(&mut host, &CalibrationConfig::default(), &cancel);
        assert!(matches!(outcome.error, Some(CalibrationError::Cancelled)));
        assert!(host.writes().is_empty());
    }

    #[test]
    fn locked_links_are_never_written() {
        let mut host = chain_host();
        let config = CalibrationConfig {
            locked_links: vec![1],
            ..Default::default()
        };
        let outcome = run(&mut host, &config);
        assert_eq!(outcome.exit_code(), 0);
        let batch = &host.writes()[0].1;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0, 2);
        // link 1 stays at its baseline in the report, flagged locked
        let locked_row = &outcome.report.links[0];
        assert_eq!(locked_row.key, 1);
        assert_eq!(locked_row.calibrated_speed, 50.0);
        assert_eq!(locked_row.delta, 0.0);
    }
}
