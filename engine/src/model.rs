//! Model and residual formulation in pace space.
//!
//! Path travel time is linear in pace (reciprocal speed): with s[l] =
//! 1/v[l], t[p] = sum over A[p,l] * s[l]. Solving for s instead of v turns
//! the calibration into a bounded linear least-squares problem. Speed
//! bounds invert into pace bounds, locked links leave the decision vector
//! and contribute a constant time offset per path, and an optional
//! Tikhonov term anchors the solution at the baseline paces.
//!
//! The decision vector covers the unlocked links that appear on at least
//! one observed path; unlocked links no path touches keep their baseline
//! and are reported with a zero delta.

use crate::datastr::incidence::AssembledSystem;
use crate::datastr::snapshot::LinkTable;
use crate::datastr::{LinkIdx, PathIdx};
use crate::error::Warning;

/// Relative disagreement between baseline and observation above which a
/// fully locked path is flagged as inconsistent.
pub const LOCKED_PATH_TOLERANCE: f64 = 1e-6;

/// The bounded linear least-squares problem in pace space.
///
/// Rows are observed paths, columns are decision paces. The matrix is the
/// free-column part of the incidence matrix in compressed row storage.
/// `rhs` is the observation minus the locked-link offset, unweighted;
/// weights enter through `sqrt_weight` row scaling.
#[derive(Debug, Clone)]
pub struct PaceProblem {
    first_entry: Vec<u32>,
    col_index: Vec<u32>,
    coeff: Vec<f64>,
    /// Dense link index behind each column, ascending.
    pub link_of_col: Vec<LinkIdx>,
    /// Geometric length of the link behind each column; the metric in
    /// which rank-deficient steps are minimum-norm.
    pub col_length: Vec<f64>,
    pub s_baseline: Vec<f64>,
    pub s_lower: Vec<f64>,
    pub s_upper: Vec<f64>,
    /// observed - offset, per path.
    pub rhs: Vec<f64>,
    /// Locked-link travel time contribution, per path.
    pub offset: Vec<f64>,
    pub sqrt_weight: Vec<f64>,
    pub lambda: f64,
    /// Paths whose links are all locked; consistency checks only.
    pub locked_only_paths: Vec<PathIdx>,
}

impl PaceProblem {
    pub fn num_rows(&self) -> usize {
        self.first_entry.len() - 1
    }

    pub fn num_cols(&self) -> usize {
        self.link_of_col.len()
    }

    pub fn row(&self, path: PathIdx) -> (&[u32], &[f64]) {
        let range = self.first_entry[path as usize] as usize..self.first_entry[path as usize + 1] as usize;
        (&self.col_index[range.clone()], &self.coeff[range])
    }

    /// Modelled travel time per path: offset + A * s.
    pub fn modelled_times(&self, s: &[f64]) -> Vec<f64> {
        debug_assert_eq!(s.len(), self.num_cols());
        (0..self.num_rows())
            .map(|p| {
                let (cols, coeffs) = self.row(p as PathIdx);
                self.offset[p] + cols.iter().zip(coeffs).map(|(&c, &a)| a * s[c as usize]).sum::<f64>()
            })
            .collect()
    }

    /// Weighted data-fit residual norm sqrt(sum of w * (t - observed)^2).
    /// This is the quantity the quality gate compares; the regularisation
    /// term is deliberately not part of it.
    pub fn weighted_residual_norm(&self, s: &[f64]) -> f64 {
        self.modelled_times(s)
            .iter()
            .enumerate()
            .map(|(p, t)| {
                let r = t - (self.rhs[p] + self.offset[p]);
                self.sqrt_weight[p] * self.sqrt_weight[p] * r * r
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Solver objective: squared weighted residual plus Tikhonov term.
    pub fn objective(&self, s: &[f64]) -> f64 {
        let data: f64 = (0..self.num_rows())
            .map(|p| {
                let (cols, coeffs) = self.row(p as PathIdx);
                let r = cols.iter().zip(coeffs).map(|(&c, &a)| a * s[c as usize]).sum::<f64>() - self.rhs[p];
                let rw = self.sqrt_weight[p] * r;
                rw * rw
            })
            .sum();
        let anchor: f64 = s.iter().zip(&self.s_baseline).map(|(&si, &bi)| (si - bi) * (si - bi)).sum();
        data + self.lambda * anchor
    }

    /// Gradient of half the objective: A^T W (A s - rhs) + lambda (s - s_baseline).
    pub fn gradient(&self, s: &[f64]) -> Vec<f64> {
        let mut g: Vec<f64> = s.iter().zip(&self.s_baseline).map(|(&si, &bi)| self.lambda * (si - bi)).collect();
        for p in 0..self.num_rows() {
            let (cols, coeffs) = self.row(p as PathIdx);
            let r = cols.iter().zip(coeffs).map(|(&c, &a)| a * s[c as usize]).sum::<f64>() - self.rhs[p];
            let wr = self.sqrt_weight[p] * self.sqrt_weight[p] * r;
            for (&c, &a) in cols.iter().zip(coeffs) {
                g[c as usize] += a * wr;
            }
        }
        g
    }

    /// Baseline paces clipped into the box; the solver's starting point.
    pub fn clipped_baseline(&self) -> Vec<f64> {
        self.s_baseline
            .iter()
            .zip(self.s_lower.iter().zip(&self.s_upper))
            .map(|(&s, (&lo, &hi))| s.clamp(lo, hi))
            .collect()
    }
}

/// Build the pace problem from the assembled incidence system.
///
/// Returns the problem and the warnings for fully locked paths whose
/// baseline time disagrees with the observation.
pub fn formulate(links: &LinkTable, system: &AssembledSystem, lambda: f64) -> (PaceProblem, Vec<Warning>) {
    let num_paths = system.matrix.num_paths();

    // columns: unlocked links touched by at least one path, ascending
    let mut touched = vec![false; links.num_links()];
    for p in 0..num_paths as PathIdx {
        for (link, _) in system.matrix.row_iter(p) {
            touched[link as usize] = true;
        }
    }
    let link_of_col: Vec<LinkIdx> = (0..links.num_links() as LinkIdx)
        .filter(|&link| touched[link as usize] && !links.locked[link as usize])
        .collect();
    let mut col_of_link: Vec<Option<u32>> = vec![None; links.num_links()];
    for (col, &link) in link_of_col.iter().enumerate() {
        col_of_link[link as usize] = Some(col as u32);
    }

    let mut first_entry = Vec::with_capacity(num_paths + 1);
    first_entry.push(0u32);
    let mut col_index = Vec::new();
    let mut coeff = Vec::new();
    let mut offset = vec![0.0; num_paths];
    let mut rhs = vec![0.0; num_paths];
    let mut locked_only_paths = Vec::new();

    for p in 0..num_paths as PathIdx {
        let mut entries = 0;
        for (link, length) in system.matrix.row_iter(p) {
            match col_of_link[link as usize] {
                Some(col) => {
                    col_index.push(col);
                    coeff.push(length);
                    entries += 1;
                }
                None => offset[p as usize] += length / links.baseline_speed[link as usize],
            }
        }
        first_entry.push(first_entry.last().unwrap() + entries);
        rhs[p as usize] = system.observed[p as usize] - offset[p as usize];
        if entries == 0 {
            locked_only_paths.push(p);
        }
    }

    // pace bounds invert the speed bounds
    let s_baseline: Vec<f64> = link_of_col.iter().map(|&l| 1.0 / links.baseline_speed[l as usize]).collect();
    let s_lower: Vec<f64> = link_of_col.iter().map(|&l| 1.0 / links.speed_upper[l as usize]).collect();
    let s_upper: Vec<f64> = link_of_col.iter().map(|&l| 1.0 / links.speed_lower[l as usize]).collect();

    let warnings = locked_only_paths
        .iter()
        .filter_map(|&p| {
            let baseline_time = system.baseline_times[p as usize];
            let observed_time = system.observed[p as usize];
            if (baseline_time - observed_time).abs() > LOCKED_PATH_TOLERANCE * observed_time {
                Some(Warning::LockedPathInconsistent {
                    path: system.path_ids[p as usize],
                    baseline_time,
                    observed_time,
                })
            } else {
                None
            }
        })
        .collect();

    let col_length: Vec<f64> = link_of_col.iter().map(|&l| links.length[l as usize]).collect();
    let problem = PaceProblem {
        first_entry,
        col_index,
        coeff,
        link_of_col,
        col_length,
        s_baseline,
        s_lower,
        s_upper,
        rhs,
        offset,
        sqrt_weight: system.weight.iter().map(|&w| w.sqrt()).collect(),
        lambda,
        locked_only_paths,
    };
    (problem, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastr::incidence::build_incidence;
    use crate::datastr::snapshot::{PathList, PathObservation};

    fn chain(locked_first: bool) -> (LinkTable, AssembledSystem) {
        let links = LinkTable::new(
            vec![1, 2],
            vec![10.0, 20.0],
            vec![50.0, 50.0],
            vec![10.0, 10.0],
            vec![130.0, 130.0],
            vec![locked_first, false],
        );
        let paths = PathList {
            paths: vec![PathObservation {
                id: 1,
                segments: vec![(1, 10.0), (2, 20.0)],
                observed_time: 0.5,
                weight: 1.0,
            }],
        };
        let system = build_incidence(&links, &paths);
        (links, system)
    }

    #[test]
    fn bounds_invert_into_pace_space() {
        let (links, system) = chain(false);
        let (problem, warnings) = formulate(&links, &system, 0.0);
        assert!(warnings.is_empty());
        assert_eq!(problem.num_cols(), 2);
        assert!((problem.s_lower[0] - 1.0 / 130.0).abs() < 1e-15);
        assert!((problem.s_upper[0] - 1.0 / 10.0).abs() < 1e-15);
        assert!((problem.s_baseline[0] - 0.02).abs() < 1e-15);
        assert_eq!(problem.offset, vec![0.0]);
        assert_eq!(problem.rhs, vec![0.5]);
    }

    #[test]
    fn locked_links_become_offsets() {
        let (links, system) = chain(true);
        let (problem, _) = formulate(&links, &system, 0.0);
        assert_eq!(problem.num_cols(), 1);
        assert_eq!(problem.link_of_col, vec![1]);
        // 10 km at the locked baseline of 50 km/h
        assert!((problem.offset[0] - 0.2).abs() < 1e-12);
        assert!((problem.rhs[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn modelled_times_are_linear_in_pace() {
        let (links, system) = chain(false);
        let (problem, _) = formulate(&links, &system, 0.0);
        let times = problem.modelled_times(&[0.02, 0.02]);
        assert!((times[0] - 0.6).abs() < 1e-12);
        let times = problem.modelled_times(&[1.0 / 60.0, 1.0 / 60.0]);
        assert!((times[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fully_locked_inconsistent_path_warns() {
        let links = LinkTable::new(vec![1], vec![10.0], vec![50.0], vec![10.0], vec![130.0], vec![true]);
        let paths = PathList {
            paths: vec![PathObservation {
                id: 1,
                segments: vec![(1, 10.0)],
                observed_time: 0.5,
                weight: 1.0,
            }],
        };
        let system = build_incidence(&links, &paths);
        let (problem, warnings) = formulate(&links, &system, 0.0);
        assert_eq!(problem.num_cols(), 0);
        assert_eq!(problem.locked_only_paths, vec![0]);
        assert!(matches!(warnings[0], Warning::LockedPathInconsistent { .. }));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let (links, system) = chain(false);
        let (problem, _) = formulate(&links, &system, 0.5);
        let s = vec![0.019, 0.021];
        let g = problem.gradient(&s);
        let h = 1e-8;
        for i in 0..2 {
            let mut plus = s.clone();
            plus[i] += h;
            let mut minus = s.clone();
            minus[i] -= h;
            let fd = (problem.objective(&plus) - problem.objective(&minus)) / (4.0 * h);
            assert!((g[i] - fd).abs() < 1e-3 * g[i].abs().max(1.0), "col {}: {} vs {}", i, g[i], fd);
        }
    }
}
