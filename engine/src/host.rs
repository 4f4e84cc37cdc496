//! Abstraction over the external process that owns the network database.
//!
//! The core consumes exactly three services from the host: link
//! enumeration, path enumeration and attribute read/write on ordered
//! collections. Attribute reads are batched; one call returns the values
//! of one attribute for all links in the host's enumeration order. The
//! single write of a run goes through [`Host::write_link_attribute`].
//!
//! Attribute names are never spelled inline in pipeline code; the binding
//! table in [`attributes`] maps semantic names to host keys in one place.

pub mod attributes;
pub mod csv;
pub mod memory;

use crate::datastr::{LinkKey, PathKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed host table: {0}")]
    Malformed(#[from] ::csv::Error),
    #[error("host does not provide attribute `{0}`")]
    MissingAttribute(String),
    #[error("attribute `{attribute}` value `{value}` is not numeric")]
    NonNumeric { attribute: String, value: String },
    #[error("write batch addresses unknown link {0}")]
    UnknownWriteTarget(LinkKey),
}

/// One path as enumerated by the host: ordered (link key, traversed
/// length) segments plus the observation attached to the path.
#[derive(Debug, Clone)]
pub struct HostPath {
    pub id: PathKey,
    pub segments: Vec<(LinkKey, f64)>,
    pub observed_time: f64,
    pub weight: f64,
}

/// The services consumed from the network host.
///
/// Implementations are trusted to return link attribute vectors in the
/// same order as `link_keys`. Blocking is acceptable; the core imposes no
/// timeout.
pub trait Host {
    /// Stable keys of all links, in the host's enumeration order.
    fn link_keys(&self) -> Result<Vec<LinkKey>, HostError>;

    /// Batched read: one value per link, ordered like `link_keys`.
    fn read_link_attribute(&self, host_attr: &str) -> Result<Vec<f64>, HostError>;

    /// All observed paths, in the host's enumeration order.
    fn paths(&self) -> Result<Vec<HostPath>, HostError>;

    /// Batched write of one attribute for the given links. Exactly one
    /// such call happens per run, after validation, and none in dry runs.
    fn write_link_attribute(&mut self, host_attr: &str, values: &[(LinkKey, f64)]) -> Result<(), HostError>;
}
