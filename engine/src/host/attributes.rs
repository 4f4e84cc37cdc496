//! Central binding table for host attributes.
//!
//! The host's attribute API is string-keyed. Each attribute the core
//! touches is declared exactly once here with its semantic name, host key,
//! unit and validation predicate; a host schema change touches this file
//! and nothing else.

/// Unit carried by an attribute on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Distance,
    Speed,
    Time,
    Flag,
}

#[derive(Debug, Clone, Copy)]
pub struct AttributeBinding {
    pub semantic: &'static str,
    pub host_key: &'static str,
    pub unit: Unit,
    pub valid: fn(f64) -> bool,
}

fn strictly_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn flag(v: f64) -> bool {
    v == 0.0 || v == 1.0
}

pub const LINK_LENGTH: AttributeBinding = AttributeBinding {
    semantic: "length",
    host_key: "length",
    unit: Unit::Distance,
    valid: strictly_positive,
};

pub const LINK_BASELINE_SPEED: AttributeBinding = AttributeBinding {
    semantic: "baseline_speed",
    host_key: "v0",
    unit: Unit::Speed,
    valid: strictly_positive,
};

pub const LINK_SPEED_LOWER: AttributeBinding = AttributeBinding {
    semantic: "speed_lower_bound",
    host_key: "v0_min",
    unit: Unit::Speed,
    valid: strictly_positive,
};

pub const LINK_SPEED_UPPER: AttributeBinding = AttributeBinding {
    semantic: "speed_upper_bound",
    host_key: "v0_max",
    unit: Unit::Speed,
    valid: strictly_positive,
};

pub const LINK_LOCKED: AttributeBinding = AttributeBinding {
    semantic: "locked",
    host_key: "v0_locked",
    unit: Unit::Flag,
    valid: flag,
};

/// Write target of the run.
pub const LINK_CALIBRATED_SPEED: AttributeBinding = AttributeBinding {
    semantic: "calibrated_speed",
    host_key: "v0",
    unit: Unit::Speed,
    valid: strictly_positive,
};

pub const ALL: &[AttributeBinding] = &[LINK_LENGTH, LINK_BASELINE_SPEED, LINK_SPEED_LOWER, LINK_SPEED_UPPER, LINK_LOCKED, LINK_CALIBRATED_SPEED];

pub fn by_semantic(semantic: &str) -> Option<&'static AttributeBinding> {
    ALL.iter().find(|binding| binding.semantic == semantic)
}
