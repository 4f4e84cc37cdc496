//! Sparse path-link incidence matrix in compressed row storage.
//!
//! Rows are paths, columns are links, the entry at (p, l) is the length of
//! link l contributed by path p. The layout is the usual triple of arrays:
//! `first_entry` holds the index of the first entry of each row plus one
//! entry at the end, `link_index` the column of each entry, `length` its
//! value. Column indices are strictly ascending within each row.

use super::snapshot::{LinkTable, PathList};
use super::*;

#[derive(Debug, Clone)]
pub struct IncidenceMatrix {
    // index of first entry of each path +1 entry in the end
    first_entry: Vec<u32>,
    // the dense link index of each entry
    link_index: Vec<LinkIdx>,
    // the length of the link traversed by the path, for each entry
    length: Vec<f64>,
}

impl IncidenceMatrix {
    pub fn new(first_entry: Vec<u32>, link_index: Vec<LinkIdx>, length: Vec<f64>) -> IncidenceMatrix {
        assert!(first_entry.len() < PathIdx::MAX as usize);
        assert_eq!(*first_entry.first().unwrap(), 0);
        assert_eq!(*first_entry.last().unwrap() as usize, link_index.len());
        assert_eq!(length.len(), link_index.len());
        for path in 0..first_entry.len() - 1 {
            let range = first_entry[path] as usize..first_entry[path + 1] as usize;
            assert!(link_index[range].windows(2).all(|w| w[0] < w[1]));
        }
        assert!(length.iter().all(|&l| l > 0.0));

        IncidenceMatrix { first_entry, link_index, length }
    }

    pub fn num_paths(&self) -> usize {
        self.first_entry.len() - 1
    }

    pub fn num_entries(&self) -> usize {
        self.link_index.len()
    }

    /// The (link index, length) entries of one row, ascending by link index.
    pub fn row(&self, path: PathIdx) -> (&[LinkIdx], &[f64]) {
        let range = self.entry_indices(path);
        (&self.link_index[range.clone()], &self.length[range])
    }

    pub fn row_iter(&self, path: PathIdx) -> impl Iterator<Item = (LinkIdx, f64)> + '_ {
        let (links, lengths) = self.row(path);
        links.iter().zip(lengths.iter()).map(|(&l, &len)| (l, len))
    }

    /// Geometric length of a path, i.e. the row sum.
    pub fn row_sum(&self, path: PathIdx) -> f64 {
        self.row(path).1.iter().sum()
    }

    fn entry_indices(&self, path: PathIdx) -> std::ops::Range<usize> {
        self.first_entry[path as usize] as usize..self.first_entry[(path + 1) as usize] as usize
    }

    pub fn entries_to_first_entry<I: Iterator<Item = u32>>(row_lens: I) -> impl Iterator<Item = u32> {
        std::iter::once(0).chain(row_lens.scan(0, |state, len| {
            *state += len;
            Some(*state)
        }))
    }
}

/// The incidence matrix together with the parallel per-path vectors the
/// formulation consumes.
#[derive(Debug, Clone)]
pub struct AssembledSystem {
    pub matrix: IncidenceMatrix,
    /// Host identifier per path, parallel to the rows.
    pub path_ids: Vec<PathKey>,
    pub observed: Vec<f64>,
    pub weight: Vec<f64>,
    pub baseline_times: Vec<f64>,
}

/// Convert the raw path list into CSR form, merging duplicate links within
/// a path by summing lengths.
///
/// Expects a validated snapshot; the loader has already rejected empty
/// paths, non-positive observations and unknown links. Row sums are
/// checked against the geometric path lengths to 1e-9 relative.
pub fn build_incidence(links: &LinkTable, paths: &PathList) -> AssembledSystem {
    let mut rows: Vec<Vec<(LinkIdx, f64)>> = Vec::with_capacity(paths.num_paths());

    for path in &paths.paths {
        let mut entries: Vec<(LinkIdx, f64)> = path
            .segments
            .iter()
            .map(|&(key, len)| (links.index_of(key).expect("loader admitted unknown link"), len))
            .collect();
        entries.sort_unstable_by_key(|&(link, _)| link);

        // merge repeated traversals of the same link
        let mut merged: Vec<(LinkIdx, f64)> = Vec::with_capacity(entries.len());
        for (link, len) in entries {
            match merged.last_mut() {
                Some((last, total)) if *last == link => *total += len,
                _ => merged.push((link, len)),
            }
        }

        assert!(!merged.is_empty(), "loader admitted empty path");
        let row_sum: f64 = merged.iter().map(|&(_, len)| len).sum();
        let geometric = path.geometric_length();
        assert!((row_sum - geometric).abs() <= 1e-9 * geometric, "row sum diverged from path length");

        rows.push(merged);
    }

    let first_entry = IncidenceMatrix::entries_to_first_entry(rows.iter().map(|row| row.len() as u32)).collect();
    let (link_index, length) = rows.into_iter().flatten().unzip();
    let matrix = IncidenceMatrix::new(first_entry, link_index, length);

    let baseline_times = (0..matrix.num_paths() as PathIdx)
        .map(|p| matrix.row_iter(p).map(|(link, len)| len / links.baseline_speed[link as usize]).sum())
        .collect();

    AssembledSystem {
        matrix,
        path_ids: paths.paths.iter().map(|p| p.id).collect(),
        observed: paths.paths.iter().map(|p| p.observed_time).collect(),
        weight: paths.paths.iter().map(|p| p.weight).collect(),
        baseline_times,
    }
}
