//! Active-set solver for bounded linear least squares in pace space.
//!
//! Minimises the weighted residual (plus the optional Tikhonov anchor)
//! subject to the per-column pace box. Starting from the clipped baseline,
//! each iteration releases bound columns whose gradient points back into
//! the box, solves the unconstrained problem on the free columns with a
//! rank-revealing factorisation, projects the step into the box and
//! clamps columns that hit a bound. Steps are only accepted on strict
//! objective decrease, with step halving otherwise.
//!
//! On rank deficiency the step is minimum-norm in the length-weighted
//! metric sum of l_i * delta_i^2, which distributes a shared residual as
//! a common pace shift over the links of a path instead of biasing it
//! towards long links. Tie-breaks (release order, clamp order) are by
//! ascending column index, which makes runs reproducible.

use crate::error::Warning;
use crate::model::PaceProblem;
use nalgebra::{DMatrix, DVector};

/// Active-set state of one pace column. Note that the bounds live in pace
/// space; reporting in speed space swaps lower and upper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveBound {
    Free,
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy)]
pub struct SolverSettings {
    pub max_iterations: u32,
    pub gradient_tolerance: f64,
}

/// Diagnostic record of a solve, attached to the run report.
#[derive(Debug, Clone, Copy)]
pub struct SolverDiagnostics {
    pub iterations: u32,
    /// Numerical rank of the last factorised free-column system.
    pub rank: usize,
    /// Condition estimate of the last factorised free-column system.
    pub condition: Option<f64>,
    pub gradient_norm: f64,
}

#[derive(Debug, Clone)]
pub struct Solution {
    /// Final paces per column.
    pub s: Vec<f64>,
    pub active: Vec<ActiveBound>,
    pub diagnostics: SolverDiagnostics,
    pub warnings: Vec<Warning>,
}

fn initial_active(problem: &PaceProblem, s: &[f64]) -> Vec<ActiveBound> {
    (0..problem.num_cols())
        .map(|i| {
            if s[i] <= problem.s_lower[i] {
                ActiveBound::Lower
            } else if s[i] >= problem.s_upper[i] {
                ActiveBound::Upper
            } else {
                ActiveBound::Free
            }
        })
        .collect()
}

/// Norm of the gradient projected onto the feasible directions: bound
/// columns only count when the gradient pushes into the box.
fn projected_gradient_norm(gradient: &[f64], active: &[ActiveBound]) -> f64 {
    gradient
        .iter()
        .zip(active)
        .map(|(&g, &a)| match a {
            ActiveBound::Free => g,
            ActiveBound::Lower => g.min(0.0),
            ActiveBound::Upper => g.max(0.0),
        })
        .map(|g| g * g)
        .sum::<f64>()
        .sqrt()
}

struct FactoredStep {
    delta: Vec<f64>,
    rank: usize,
    condition: Option<f64>,
}

/// Solve the free-column subproblem for a minimum-norm step.
///
/// Columns are scaled by 1/sqrt(l_i) so that the SVD's minimum-norm
/// solution is minimum-norm in the length-weighted metric; the rhs is the
/// current residual, so the returned delta is relative to `s`.
fn free_step(problem: &PaceProblem, s: &[f64], free: &[usize]) -> FactoredStep {
    let num_rows = problem.num_rows();
    let augmented = problem.lambda > 0.0;
    let rows = num_rows + if augmented { free.len() } else { 0 };

    let mut col_of_free: Vec<Option<usize>> = vec![None; problem.num_cols()];
    for (k, &i) in free.iter().enumerate() {
        col_of_free[i] = Some(k);
    }
    let scale: Vec<f64> = free.iter().map(|&i| problem.col_length[i].sqrt()).collect();

    let mut matrix = DMatrix::zeros(rows, free.len());
    let mut rhs = DVector::zeros(rows);
    for p in 0..num_rows {
        let (cols, coeffs) = problem.row(p as u32);
        let residual = problem.rhs[p] - cols.iter().zip(coeffs).map(|(&c, &a)| a * s[c as usize]).sum::<f64>();
        let w = problem.sqrt_weight[p];
        rhs[p] = w * residual;
        for (&c, &a) in cols.iter().zip(coeffs) {
            if let Some(k) = col_of_free[c as usize] {
                matrix[(p, k)] = w * a / scale[k];
            }
        }
    }
    if augmented {
        let sqrt_lambda = problem.lambda.sqrt();
        for (k, &i) in free.iter().enumerate() {
            matrix[(num_rows + k, k)] = sqrt_lambda / scale[k];
            rhs[num_rows + k] = sqrt_lambda * (problem.s_baseline[i] - s[i]);
        }
    }

    let svd = matrix.svd(true, true);
    let sigma_max = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let eps = sigma_max * rows.max(free.len()) as f64 * f64::EPSILON;
    let rank = svd.rank(eps);
    let sigma_min = svd.singular_values.iter().cloned().filter(|&sv| sv > eps).fold(f64::INFINITY, f64::min);
    let condition = if rank > 0 { Some(sigma_max / sigma_min) } else { None };

    let z = svd.solve(&rhs, eps).expect("svd solve with computed u and v cannot fail");
    let delta = free.iter().enumerate().map(|(k, _)| z[k] / scale[k]).collect();

    FactoredStep { delta, rank, condition }
}

/// Run the active-set iteration. Never returns an iterate with a higher
/// objective than the clipped baseline it starts from.
pub fn solve(problem: &PaceProblem, settings: &SolverSettings) -> Solution {
    let mut s = problem.clipped_baseline();
    let mut active = initial_active(problem, &s);
    let mut diagnostics = SolverDiagnostics {
        iterations: 0,
        rank: 0,
        condition: None,
        gradient_norm: 0.0,
    };
    let mut warnings = Vec::new();

    if problem.num_cols() == 0 {
        return Solution { s, active, diagnostics, warnings };
    }

    let mut converged = false;
    while diagnostics.iterations < settings.max_iterations {
        diagnostics.iterations += 1;

        let gradient = problem.gradient(&s);

        // release bound columns whose gradient points into the box,
        // ascending column index order
        let mut released = false;
        for i in 0..active.len() {
            match active[i] {
                ActiveBound::Lower if gradient[i] < 0.0 => {
                    active[i] = ActiveBound::Free;
                    released = true;
                }
                ActiveBound::Upper if gradient[i] > 0.0 => {
                    active[i] = ActiveBound::Free;
                    released = true;
                }
                _ => (),
            }
        }

        diagnostics.gradient_norm = projected_gradient_norm(&gradient, &active);
        if !released && diagnostics.gradient_norm <= settings.gradient_tolerance {
            converged = true;
            break;
        }

        let free: Vec<usize> = (0..active.len()).filter(|&i| active[i] == ActiveBound::Free).collect();
        if free.is_empty() {
            converged = diagnostics.gradient_norm <= settings.gradient_tolerance;
            break;
        }

        let step = free_step(problem, &s, &free);
        diagnostics.rank = step.rank;
        diagnostics.condition = step.condition;

        // project into the box, halving the step until the objective drops
        let current = problem.objective(&s);
        let mut alpha = 1.0;
        let mut accepted = false;
        while alpha > 1e-12 {
            let mut candidate = s.clone();
            let mut clamped = Vec::new();
            for (k, &i) in free.iter().enumerate() {
                let value = s[i] + alpha * step.delta[k];
                if value <= problem.s_lower[i] {
                    candidate[i] = problem.s_lower[i];
                    clamped.push((i, ActiveBound::Lower));
                } else if value >= problem.s_upper[i] {
                    candidate[i] = problem.s_upper[i];
                    clamped.push((i, ActiveBound::Upper));
                } else {
                    candidate[i] = value;
                }
            }
            if problem.objective(&candidate) < current {
                for &(i, bound) in &clamped {
                    active[i] = bound;
                }
                s = candidate;
                accepted = true;
                break;
            }
            alpha *= 0.5;
        }

        if !accepted {
            // no descent along the step; either we are at a constrained
            // optimum or the factorisation cannot improve further
            converged = diagnostics.gradient_norm <= settings.gradient_tolerance;
            break;
        }
    }

    diagnostics.gradient_norm = projected_gradient_norm(&problem.gradient(&s), &active);
    if !converged {
        warnings.push(Warning::SolverDivergence {
            gradient_norm: diagnostics.gradient_norm,
        });
    }
    if diagnostics.condition.is_none() {
        // converged before any factorisation; factor once so the report
        // still carries rank and condition
        let free: Vec<usize> = (0..active.len()).filter(|&i| active[i] == ActiveBound::Free).collect();
        if !free.is_empty() {
            let step = free_step(problem, &s, &free);
            diagnostics.rank = step.rank;
            diagnostics.condition = step.condition;
        }
    }

    Solution { s, active, diagnostics, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastr::incidence::build_incidence;
    use crate::datastr::snapshot::{LinkTable, PathList, PathObservation};
    use crate::model::formulate;

    fn settings() -> SolverSettings {
        SolverSettings {
            max_iterations: 100,
            gradient_tolerance: 1e-12,
        }
    }

    fn solve_simple(links: LinkTable, paths: Vec<PathObservation>, lambda: f64) -> (PaceProblem, Solution) {
        let system = build_incidence(&links, &PathList { paths });
        let (problem, _) = formulate(&links, &system, lambda);
        let solution = solve(&problem, &settings());
        (problem, solution)
    }

    #[test]
    fn single_link_hits_observation_exactly() {
        let links = LinkTable::new(vec![1], vec![10.0], vec![50.0], vec![10.0], vec![130.0], vec![false]);
        let (_, solution) = solve_simple(
            links,
            vec![PathObservation {
                id: 1,
                segments: vec![(1, 10.0)],
                observed_time: 0.1,
                weight: 1.0,
            }],
            0.0,
        );
        // 10 km in 0.1 h is 100 km/h
        assert!((1.0 / solution.s[0] - 100.0).abs() < 1e-9);
        assert_eq!(solution.active, vec![ActiveBound::Free]);
        assert!(solution.warnings.is_empty());
    }

    #[test]
    fn rank_deficient_residual_spreads_as_common_pace_shift() {
        // two links on one path; the data fixes only the sum, the
        // length-weighted minimum-norm step shifts both paces equally
        let links = LinkTable::new(
            vec![1, 2],
            vec![10.0, 20.0],
            vec![50.0, 50.0],
            vec![10.0, 10.0],
            vec![130.0, 130.0],
            vec![false, false],
        );
        let (problem, solution) = solve_simple(
            links,
            vec![PathObservation {
                id: 1,
                segments: vec![(1, 10.0), (2, 20.0)],
                observed_time: 0.5,
                weight: 1.0,
            }],
            0.0,
        );
        assert!((1.0 / solution.s[0] - 60.0).abs() < 1e-9);
        assert!((1.0 / solution.s[1] - 60.0).abs() < 1e-9);
        assert!(problem.weighted_residual_norm(&solution.s) < 1e-12);
        assert_eq!(solution.diagnostics.rank, 1);
    }

    #[test]
    fn bound_clamps_and_flags() {
        // observation wants 100 km/h but the upper bound is 55
        let links = LinkTable::new(vec![1], vec![10.0], vec![50.0], vec![40.0], vec![55.0], vec![false]);
        let (problem, solution) = solve_simple(
            links,
            vec![PathObservation {
                id: 1,
                segments: vec![(1, 10.0)],
                observed_time: 0.1,
                weight: 1.0,
            }],
            0.0,
        );
        // pace pinned at its lower bound, i.e. the speed upper bound
        assert!((1.0 / solution.s[0] - 55.0).abs() < 1e-12);
        assert_eq!(solution.active, vec![ActiveBound::Lower]);
        // still an improvement over the baseline of 50
        assert!(problem.weighted_residual_norm(&solution.s) < problem.weighted_residual_norm(&problem.clipped_baseline()));
    }

    #[test]
    fn shared_link_solution_satisfies_normal_equations() {
        let links = LinkTable::new(
            vec![1, 2, 3],
            vec![10.0, 10.0, 10.0],
            vec![50.0, 50.0, 50.0],
            vec![10.0, 10.0, 10.0],
            vec![130.0, 130.0, 130.0],
            vec![false, false, false],
        );
        let (problem, solution) = solve_simple(
            links,
            vec![
                PathObservation {
                    id: 1,
                    segments: vec![(1, 10.0), (2, 10.0)],
                    observed_time: 0.3,
                    weight: 1.0,
                },
                PathObservation {
                    id: 2,
                    segments: vec![(2, 10.0), (3, 10.0)],
                    observed_time: 0.5,
                    weight: 1.0,
                },
            ],
            0.0,
        );
        // at an interior optimum the gradient A^T W r vanishes
        for g in problem.gradient(&solution.s) {
            assert!(g.abs() < 1e-9, "normal equations violated: {}", g);
        }
        assert!(problem.weighted_residual_norm(&solution.s) < 1e-9);
    }

    #[test]
    fn regularisation_anchors_at_baseline() {
        let links = LinkTable::new(vec![1], vec![10.0], vec![50.0], vec![10.0], vec![130.0], vec![false]);
        let observation = PathObservation {
            id: 1,
            segments: vec![(1, 10.0)],
            observed_time: 0.1,
            weight: 1.0,
        };
        let (_, free) = solve_simple(links.clone(), vec![observation.clone()], 0.0);
        let (_, anchored) = solve_simple(links, vec![observation], 1e3);
        let baseline_pace = 1.0 / 50.0;
        // with a strong anchor the solution stays closer to the baseline pace
        assert!((anchored.s[0] - baseline_pace).abs() < (free.s[0] - baseline_pace).abs());
    }

    #[test]
    fn restart_from_solution_terminates_immediately() {
        // feeding the calibrated speeds back as baselines must converge in
        // a single iteration with a zero step
        let links = LinkTable::new(vec![1, 2], vec![10.0, 20.0], vec![60.0, 60.0], vec![10.0, 10.0], vec![130.0, 130.0], vec![false, false]);
        let (problem, solution) = solve_simple(
            links,
            vec![PathObservation {
                id: 1,
                segments: vec![(1, 10.0), (2, 20.0)],
                observed_time: 0.5,
                weight: 1.0,
            }],
            0.0,
        );
        assert_eq!(solution.diagnostics.iterations, 1);
        assert_eq!(solution.s, problem.clipped_baseline());
        assert!(solution.warnings.is_empty());
    }

    #[test]
    fn iteration_cap_reports_divergence() {
        // the first step clamps link 1 at its speed upper bound, leaving
        // link 2 in need of a second iteration that the cap forbids
        let links = LinkTable::new(vec![1, 2], vec![10.0, 20.0], vec![50.0, 50.0], vec![10.0, 10.0], vec![60.0, 130.0], vec![false, false]);
        let paths = PathList {
            paths: vec![PathObservation {
                id: 1,
                segments: vec![(1, 10.0), (2, 20.0)],
                observed_time: 0.3,
                weight: 1.0,
            }],
        };
        let system = build_incidence(&links, &paths);
        let (problem, _) = formulate(&links, &system, 0.0);
        let solution = solve(
            &problem,
            &SolverSettings {
                max_iterations: 1,
                gradient_tolerance: 1e-12,
            },
        );
        assert_eq!(solution.diagnostics.iterations, 1);
        assert_eq!(solution.active[0], ActiveBound::Lower);
        assert!(solution.warnings.iter().any(|w| matches!(w, Warning::SolverDivergence { .. })));

        // with a sufficient budget the same problem converges cleanly
        let converged = solve(&problem, &settings());
        assert!(converged.warnings.is_empty());
    }
}
