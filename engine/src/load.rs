//! Network snapshot loader.
//!
//! The only component that talks to the host for reading. Pulls batched
//! attribute vectors (one host call per attribute), assigns dense indices
//! deterministically and validates everything before any downstream
//! component runs. Loader failures are fatal; no partial snapshot is ever
//! emitted.

use crate::config::CalibrationConfig;
use crate::datastr::snapshot::{LinkTable, PathList, PathObservation};
use crate::datastr::LinkKey;
use crate::error::CalibrationError;
use crate::host::{attributes, Host};
use std::collections::HashSet;

fn bound_attribute(semantic: &str) -> Result<&'static attributes::AttributeBinding, CalibrationError> {
    attributes::by_semantic(semantic).ok_or_else(|| CalibrationError::Config(format!("unknown semantic attribute `{}`", semantic)))
}

/// Pull the link table from the host.
///
/// Links are sorted by host key ascending; the position in the sorted
/// order is the dense index contract for the rest of the run. Lengths and
/// speeds are converted into km and km/h here, so downstream code never
/// sees host units.
pub fn load_links(host: &impl Host, config: &CalibrationConfig) -> Result<LinkTable, CalibrationError> {
    let host_keys = host.link_keys()?;

    // dense order: host keys ascending, filter applied
    let filter: Option<HashSet<LinkKey>> = config.link_filter.as_ref().map(|keys| keys.iter().copied().collect());
    let mut order: Vec<usize> = (0..host_keys.len())
        .filter(|&pos| filter.as_ref().map_or(true, |f| f.contains(&host_keys[pos])))
        .collect();
    order.sort_by_key(|&pos| host_keys[pos]);

    let select = |column: Vec<f64>| -> Vec<f64> { order.iter().map(|&pos| column[pos]).collect() };

    let to_km = config.units.distance.to_km();
    let length = select(host.read_link_attribute(attributes::LINK_LENGTH.host_key)?)
        .into_iter()
        .map(|l| l * to_km)
        .collect::<Vec<_>>();
    let baseline = select(host.read_link_attribute(attributes::LINK_BASELINE_SPEED.host_key)?)
        .into_iter()
        .map(|v| v * to_km)
        .collect::<Vec<_>>();

    let (lower, upper) = match (&config.speed_bounds_attr, config.global_speed_bounds) {
        (Some((lower_attr, upper_attr)), _) => {
            let lower = select(host.read_link_attribute(bound_attribute(lower_attr)?.host_key)?);
            let upper = select(host.read_link_attribute(bound_attribute(upper_attr)?.host_key)?);
            (
                lower.into_iter().map(|v| v * to_km).collect::<Vec<_>>(),
                upper.into_iter().map(|v| v * to_km).collect::<Vec<_>>(),
            )
        }
        (None, Some((lower, upper))) => (vec![lower * to_km; order.len()], vec![upper * to_km; order.len()]),
        (None, None) => return Err(CalibrationError::Config("no speed bounds configured".to_string())),
    };

    let mut locked = match &config.locked_attr {
        Some(attr) => select(host.read_link_attribute(bound_attribute(attr)?.host_key)?).into_iter().map(|flag| flag != 0.0).collect(),
        None => vec![false; order.len()],
    };

    let keys: Vec<LinkKey> = order.iter().map(|&pos| host_keys[pos]).collect();
    for explicit in &config.locked_links {
        if let Ok(idx) = keys.binary_search(explicit) {
            locked[idx] = true;
        }
    }

    let mut offending: Vec<LinkKey> = Vec::new();
    for i in 0..keys.len() {
        let valid = length[i].is_finite()
            && length[i] > 0.0
            && baseline[i].is_finite()
            && baseline[i] > 0.0
            && lower[i].is_finite()
            && lower[i] > 0.0
            && upper[i].is_finite()
            && upper[i] > 0.0
            && lower[i] <= baseline[i]
            && baseline[i] <= upper[i];
        if !valid {
            offending.push(keys[i]);
        }
    }
    if !offending.is_empty() {
        return Err(CalibrationError::InvalidLinkAttributes {
            reason: "length, baseline and bounds must be finite, strictly positive and satisfy lower <= baseline <= upper",
            keys: offending,
        });
    }

    Ok(LinkTable::new(keys, length, baseline, lower, upper, locked))
}

/// Pull the observed paths from the host, in host order.
///
/// Validates against the already loaded link table; any empty path,
/// non-positive observation (or weight) or reference to a link outside
/// the snapshot aborts the run with all offenders listed.
pub fn load_paths(host: &impl Host, links: &LinkTable, config: &CalibrationConfig) -> Result<PathList, CalibrationError> {
    let filter: Option<HashSet<_>> = config.path_filter.as_ref().map(|ids| ids.iter().copied().collect());
    let to_km = config.units.distance.to_km();
    let to_hours = config.units.time.to_hours();

    let mut empty = Vec::new();
    let mut non_positive = Vec::new();
    let mut unknown = Vec::new();
    let mut paths = Vec::new();

    for host_path in host.paths()? {
        if let Some(filter) = &filter {
            if !filter.contains(&host_path.id) {
                continue;
            }
        }

        if host_path.segments.is_empty() {
            empty.push(host_path.id);
        }
        if !(host_path.observed_time.is_finite() && host_path.observed_time > 0.0) || !(host_path.weight.is_finite() && host_path.weight >= 0.0) {
            non_positive.push(host_path.id);
        }
        for &(key, _) in &host_path.segments {
            if links.index_of(key).is_none() {
                unknown.push((host_path.id, key));
            }
        }

        paths.push(PathObservation {
            id: host_path.id,
            segments: host_path.segments.iter().map(|&(key, len)| (key, len * to_km)).collect(),
            observed_time: host_path.observed_time * to_hours,
            weight: host_path.weight,
        });
    }

    if !empty.is_empty() {
        return Err(CalibrationError::EmptyPath { paths: empty });
    }
    if !non_positive.is_empty() {
        return Err(CalibrationError::NonPositiveObservation { paths: non_positive });
    }
    if !unknown.is_empty() {
        return Err(CalibrationError::UnknownLink { references: unknown });
    }

    Ok(PathList { paths })
}
