//! Immutable snapshot of the link and path data pulled from the host.
//!
//! The loader materialises these once per run. Links are stored in struct
//! of arrays layout, sorted by host key ascending, so the dense index of a
//! link is its position in the sorted key array. That ordering is the
//! reproducibility contract for everything downstream.

use super::*;

/// Link attributes in struct of arrays layout.
///
/// All vectors have the same length and are indexed by dense link index.
/// Keys are strictly ascending. Units are normalised by the loader
/// (lengths in km, speeds in km/h).
#[derive(Debug, Clone)]
pub struct LinkTable {
    keys: Vec<LinkKey>,
    pub length: Vec<f64>,
    pub baseline_speed: Vec<f64>,
    pub speed_lower: Vec<f64>,
    pub speed_upper: Vec<f64>,
    pub locked: Vec<bool>,
}

impl LinkTable {
    pub fn new(keys: Vec<LinkKey>, length: Vec<f64>, baseline_speed: Vec<f64>, speed_lower: Vec<f64>, speed_upper: Vec<f64>, locked: Vec<bool>) -> LinkTable {
        assert!(keys.len() < LinkIdx::MAX as usize);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(length.len(), keys.len());
        assert_eq!(baseline_speed.len(), keys.len());
        assert_eq!(speed_lower.len(), keys.len());
        assert_eq!(speed_upper.len(), keys.len());
        assert_eq!(locked.len(), keys.len());

        LinkTable {
            keys,
            length,
            baseline_speed,
            speed_lower,
            speed_upper,
            locked,
        }
    }

    pub fn num_links(&self) -> usize {
        self.keys.len()
    }

    pub fn key(&self, link: LinkIdx) -> LinkKey {
        self.keys[link as usize]
    }

    pub fn keys(&self) -> &[LinkKey] {
        &self.keys
    }

    /// Dense index of a host key, `None` if the key is not in the snapshot.
    pub fn index_of(&self, key: LinkKey) -> Option<LinkIdx> {
        self.keys.binary_search(&key).ok().map(|i| i as LinkIdx)
    }

    pub fn num_unlocked(&self) -> usize {
        self.locked.iter().filter(|&&l| !l).count()
    }
}

/// One observed path: an ordered sequence of (link key, traversed length)
/// segments and the observed travel time over the whole sequence.
///
/// The same link may appear more than once; the incidence builder merges
/// repeats by summing lengths.
#[derive(Debug, Clone)]
pub struct PathObservation {
    pub id: PathKey,
    pub segments: Vec<(LinkKey, f64)>,
    pub observed_time: f64,
    pub weight: f64,
}

impl PathObservation {
    pub fn geometric_length(&self) -> f64 {
        self.segments.iter().map(|&(_, len)| len).sum()
    }
}

/// Observed paths in host order. Position is identity for reporting.
#[derive(Debug, Clone)]
pub struct PathList {
    pub paths: Vec<PathObservation>,
}

impl PathList {
    pub fn num_paths(&self) -> usize {
        self.paths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_lookup_is_position_in_sorted_keys() {
        let table = LinkTable::new(
            vec![3, 7, 19],
            vec![1.0, 2.0, 3.0],
            vec![50.0, 50.0, 50.0],
            vec![10.0, 10.0, 10.0],
            vec![130.0, 130.0, 130.0],
            vec![false, true, false],
        );
        assert_eq!(table.index_of(3), Some(0));
        assert_eq!(table.index_of(7), Some(1));
        assert_eq!(table.index_of(19), Some(2));
        assert_eq!(table.index_of(4), None);
        assert_eq!(table.key(2), 19);
        assert_eq!(table.num_unlocked(), 2);
    }

    #[test]
    #[should_panic]
    fn unsorted_keys_are_rejected() {
        LinkTable::new(vec![7, 3], vec![1.0, 1.0], vec![50.0, 50.0], vec![10.0, 10.0], vec![130.0, 130.0], vec![false, false]);
    }
}
