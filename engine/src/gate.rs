//! Feasibility and quality gate between solver and writer.
//!
//! Inverts the solved paces back into speeds, decides whether the result
//! may be written and attaches the fit statistics. Infeasible output
//! (non-finite or outside the box beyond tolerance) is fatal; everything
//! else at worst warns.

use crate::algo::bounded_lsq::{ActiveBound, Solution};
use crate::config::CalibrationConfig;
use crate::datastr::snapshot::LinkTable;
use crate::error::{CalibrationError, Warning};
use crate::model::PaceProblem;
use serde::Serialize;

/// Feasibility tolerance on speed bounds.
pub const BOUND_TOLERANCE: f64 = 1e-9;

/// Bound state of a link at the solution, in speed space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundFlag {
    None,
    Lower,
    Upper,
    Locked,
}

/// Distribution summary of the per-path relative errors.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FitSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub rms: f64,
}

impl FitSummary {
    fn of(errors: &[f64]) -> FitSummary {
        if errors.is_empty() {
            return FitSummary {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                rms: 0.0,
            };
        }
        let n = errors.len() as f64;
        FitSummary {
            min: errors.iter().cloned().fold(f64::INFINITY, f64::min),
            max: errors.iter().cloned().fold(0.0, f64::max),
            mean: errors.iter().sum::<f64>() / n,
            rms: (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
        }
    }
}

/// The validated result of a run, ready for reporting and write-back.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    /// Per dense link; locked links carry their baseline exactly.
    pub calibrated_speed: Vec<f64>,
    /// Per dense link, speed space.
    pub bound_flag: Vec<BoundFlag>,
    /// Modelled travel time per path at the emitted speeds.
    pub calibrated_times: Vec<f64>,
    pub relative_errors: Vec<f64>,
    pub fit: FitSummary,
    pub residual_norm: f64,
    pub baseline_residual_norm: f64,
    pub warnings: Vec<Warning>,
}

/// Validate the solver output.
///
/// When the calibrated residual does not beat the baseline residual the
/// baseline speeds are emitted instead (`NoImprovement` warning) unless
/// `force_accept` keeps the solver output. A bound or finiteness
/// violation is a hard rejection via `FeasibilityViolation`.
pub fn validate(links: &LinkTable, problem: &PaceProblem, solution: &Solution, config: &CalibrationConfig) -> Result<GateOutcome, CalibrationError> {
    let mut warnings = Vec::new();

    let baseline_pace = problem.clipped_baseline();
    let baseline_residual_norm = problem.weighted_residual_norm(&baseline_pace);
    let mut residual_norm = problem.weighted_residual_norm(&solution.s);

    let mut chosen = &solution.s;
    let mut active = solution.active.clone();
    if residual_norm > baseline_residual_norm + 1e-12 * baseline_residual_norm.max(1.0) {
        warnings.push(Warning::NoImprovement {
            calibrated_residual: residual_norm,
            baseline_residual: baseline_residual_norm,
        });
        if !config.force_accept {
            chosen = &baseline_pace;
            residual_norm = baseline_residual_norm;
            for flag in &mut active {
                *flag = ActiveBound::Free;
            }
        }
    }

    // invert back to speeds over the full link table
    let mut calibrated_speed = links.baseline_speed.clone();
    let mut bound_flag: Vec<BoundFlag> = links.locked.iter().map(|&locked| if locked { BoundFlag::Locked } else { BoundFlag::None }).collect();
    let mut infeasible = Vec::new();
    for (col, &link) in problem.link_of_col.iter().enumerate() {
        let link = link as usize;
        let v = 1.0 / chosen[col];
        if !v.is_finite() {
            infeasible.push(links.key(link as u32));
            continue;
        }
        let lo = links.speed_lower[link];
        let hi = links.speed_upper[link];
        if v < lo - BOUND_TOLERANCE * lo.max(1.0) || v > hi + BOUND_TOLERANCE * hi.max(1.0) {
            infeasible.push(links.key(link as u32));
            continue;
        }
        calibrated_speed[link] = v;
        bound_flag[link] = match active[col] {
            ActiveBound::Free => BoundFlag::None,
            // pace bounds invert: pace at its lower bound pins the speed
            // at its upper bound and vice versa
            ActiveBound::Lower => BoundFlag::Upper,
            ActiveBound::Upper => BoundFlag::Lower,
        };
    }
    if !infeasible.is_empty() {
        return Err(CalibrationError::FeasibilityViolation {
            reason: "calibrated speeds non-finite or outside bounds",
            keys: infeasible,
        });
    }

    let num_unlocked = links.num_unlocked();
    if num_unlocked > 0 {
        let at_bound = bound_flag.iter().filter(|&&f| f == BoundFlag::Lower || f == BoundFlag::Upper).count();
        let fraction = at_bound as f64 / num_unlocked as f64;
        if fraction > config.bounds_dominant_threshold {
            warnings.push(Warning::BoundsDominant {
                fraction,
                threshold: config.bounds_dominant_threshold,
            });
        }
    }

    let calibrated_times = problem.modelled_times(chosen);
    let relative_errors: Vec<f64> = calibrated_times
        .iter()
        .enumerate()
        .map(|(p, &t)| {
            let observed = problem.rhs[p] + problem.offset[p];
            (t - observed).abs() / observed
        })
        .collect();
    let fit = FitSummary::of(&relative_errors);

    Ok(GateOutcome {
        calibrated_speed,
        bound_flag,
        calibrated_times,
        relative_errors,
        fit,
        residual_norm,
        baseline_residual_norm,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::bounded_lsq::SolverDiagnostics;
    use crate::datastr::incidence::build_incidence;
    use crate::datastr::snapshot::{PathList, PathObservation};
    use crate::model::formulate;

    fn single_link_problem() -> (LinkTable, PaceProblem) {
        let links = LinkTable::new(vec![1], vec![10.0], vec![50.0], vec![40.0], vec![55.0], vec![false]);
        let system = build_incidence(
            &links,
            &PathList {
                paths: vec![PathObservation {
                    id: 1,
                    segments: vec![(1, 10.0)],
                    observed_time: 0.1,
                    weight: 1.0,
                }],
            },
        );
        let (problem, _) = formulate(&links, &system, 0.0);
        (links, problem)
    }

    fn solution(s: Vec<f64>, active: Vec<ActiveBound>) -> Solution {
        Solution {
            s,
            active,
            diagnostics: SolverDiagnostics {
                iterations: 1,
                rank: 1,
                condition: Some(1.0),
                gradient_norm: 0.0,
            },
            warnings: Vec::new(),
        }
    }

    #[test]
    fn out_of_bounds_speed_is_rejected() {
        let (links, problem) = single_link_problem();
        // 100 km/h is far above the 55 km/h bound
        let result = validate(&links, &problem, &solution(vec![0.01], vec![ActiveBound::Free]), &CalibrationConfig::default());
        match result {
            Err(CalibrationError::FeasibilityViolation { keys, .. }) => assert_eq!(keys, vec![1]),
            other => panic!("expected FeasibilityViolation, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn non_finite_pace_is_rejected() {
        let (links, problem) = single_link_problem();
        assert!(validate(&links, &problem, &solution(vec![0.0], vec![ActiveBound::Free]), &CalibrationConfig::default()).is_err());
    }

    #[test]
    fn bound_flags_swap_between_pace_and_speed_space() {
        let (links, problem) = single_link_problem();
        let outcome = validate(&links, &problem, &solution(vec![1.0 / 55.0], vec![ActiveBound::Lower]), &CalibrationConfig {
            bounds_dominant_threshold: 1.0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(outcome.bound_flag, vec![BoundFlag::Upper]);
        assert!((outcome.calibrated_speed[0] - 55.0).abs() < 1e-9);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn bounds_dominant_warns_above_threshold() {
        let (links, problem) = single_link_problem();
        let outcome = validate(&links, &problem, &solution(vec![1.0 / 55.0], vec![ActiveBound::Lower]), &CalibrationConfig::default()).unwrap();
        assert!(outcome.warnings.iter().any(|w| matches!(w, Warning::BoundsDominant { .. })));
    }

    #[test]
    fn worse_residual_falls_back_to_baseline() {
        let (links, problem) = single_link_problem();
        // a "solution" that is worse than the baseline of 50 km/h
        let outcome = validate(&links, &problem, &solution(vec![1.0 / 41.0], vec![ActiveBound::Free]), &CalibrationConfig {
            bounds_dominant_threshold: 1.0,
            ..Default::default()
        })
        .unwrap();
        assert!(outcome.warnings.iter().any(|w| matches!(w, Warning::NoImprovement { .. })));
        assert_eq!(outcome.calibrated_speed, vec![50.0]);
        assert_eq!(outcome.residual_norm, outcome.baseline_residual_norm);
    }

    #[test]
    fn force_accept_keeps_the_worse_solution() {
        let (links, problem) = single_link_problem();
        let outcome = validate(&links, &problem, &solution(vec![1.0 / 41.0], vec![ActiveBound::Free]), &CalibrationConfig {
            force_accept: true,
            bounds_dominant_threshold: 1.0,
            ..Default::default()
        })
        .unwrap();
        assert!(outcome.warnings.iter().any(|w| matches!(w, Warning::NoImprovement { .. })));
        assert!((outcome.calibrated_speed[0] - 41.0).abs() < 1e-9);
    }
}
