//! In-memory host backend.
//!
//! Holds link attribute columns and paths as plain vectors. Used by the
//! test suite and as the materialised form behind the csv backend. Writes
//! are recorded so tests can assert on the exact batch (or its absence in
//! dry runs).

use super::{Host, HostError, HostPath};
use crate::datastr::LinkKey;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryHost {
    link_keys: Vec<LinkKey>,
    attributes: HashMap<String, Vec<f64>>,
    paths: Vec<HostPath>,
    writes: Vec<(String, Vec<(LinkKey, f64)>)>,
}

impl MemoryHost {
    pub fn new(link_keys: Vec<LinkKey>) -> MemoryHost {
        MemoryHost {
            link_keys,
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, host_attr: &str, values: Vec<f64>) -> MemoryHost {
        assert_eq!(values.len(), self.link_keys.len());
        self.attributes.insert(host_attr.to_string(), values);
        self
    }

    pub fn with_paths(mut self, paths: Vec<HostPath>) -> MemoryHost {
        self.paths = paths;
        self
    }

    /// All write batches issued so far, in order.
    pub fn writes(&self) -> &[(String, Vec<(LinkKey, f64)>)] {
        &self.writes
    }

    /// Current value of an attribute for one link, write batches applied.
    pub fn attribute_value(&self, host_attr: &str, key: LinkKey) -> Option<f64> {
        for (attr, batch) in self.writes.iter().rev() {
            if attr == host_attr {
                if let Some(&(_, value)) = batch.iter().find(|&&(k, _)| k == key) {
                    return Some(value);
                }
            }
        }
        let pos = self.link_keys.iter().position(|&k| k == key)?;
        self.attributes.get(host_attr).map(|column| column[pos])
    }
}

impl Host for MemoryHost {
    fn link_keys(&self) -> Result<Vec<LinkKey>, HostError> {
        Ok(self.link_keys.clone())
    }

    fn read_link_attribute(&self, host_attr: &str) -> Result<Vec<f64>, HostError> {
        self.attributes
            .get(host_attr)
            .cloned()
            .ok_or_else(|| HostError::MissingAttribute(host_attr.to_string()))
    }

    fn paths(&self) -> Result<Vec<HostPath>, HostError> {
        Ok(self.paths.clone())
    }

    fn write_link_attribute(&mut self, host_attr: &str, values: &[(LinkKey, f64)]) -> Result<(), HostError> {
        for &(key, _) in values {
            if !self.link_keys.contains(&key) {
                return Err(HostError::UnknownWriteTarget(key));
            }
        }
        self.writes.push((host_attr.to_string(), values.to_vec()));
        Ok(())
    }
}
