//! Csv-file-backed host for running calibrations outside a live host.
//!
//! Expects a link table and a path table. The link table needs a `key`
//! column plus one column per bound host attribute; extra columns are
//! carried along untouched. The path table has one row per path segment:
//! `path,link,length,observed_time[,weight]`, segments of the same path
//! contiguous and in traversal order. The batched write of a run is
//! appended as write batches and flushed to an output file on demand.

use super::memory::MemoryHost;
use super::{Host, HostError, HostPath};
use crate::datastr::{LinkKey, PathKey};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug)]
pub struct CsvHost {
    inner: MemoryHost,
    write_attr_order: Vec<String>,
}

fn parse_field(attribute: &str, raw: &str) -> Result<f64, HostError> {
    raw.trim().parse().map_err(|_| HostError::NonNumeric {
        attribute: attribute.to_string(),
        value: raw.to_string(),
    })
}

impl CsvHost {
    pub fn from_files<P: AsRef<Path>>(links: P, paths: P) -> Result<CsvHost, HostError> {
        let mut reader = csv::Reader::from_path(links.as_ref())?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let key_col = headers
            .iter()
            .position(|h| h == "key")
            .ok_or_else(|| HostError::MissingAttribute("key".to_string()))?;

        let mut link_keys: Vec<LinkKey> = Vec::new();
        let mut columns: HashMap<String, Vec<f64>> = headers.iter().filter(|&h| h != "key").map(|h| (h.clone(), Vec::new())).collect();
        for record in reader.records() {
            let record = record?;
            link_keys.push(parse_field("key", &record[key_col])? as LinkKey);
            for (col, header) in record.iter().zip(&headers) {
                if header != "key" {
                    columns.get_mut(header).unwrap().push(parse_field(header, col)?);
                }
            }
        }

        let mut host = MemoryHost::new(link_keys);
        let mut write_attr_order: Vec<String> = columns.keys().cloned().collect();
        write_attr_order.sort();
        for (attr, values) in columns {
            host = host.with_attribute(&attr, values);
        }
        host = host.with_paths(Self::read_paths(paths.as_ref())?);

        Ok(CsvHost { inner: host, write_attr_order })
    }

    fn read_paths(file: &Path) -> Result<Vec<HostPath>, HostError> {
        let mut reader = csv::Reader::from_path(file)?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let col = |name: &str| headers.iter().position(|h| h == name).ok_or_else(|| HostError::MissingAttribute(name.to_string()));
        let path_col = col("path")?;
        let link_col = col("link")?;
        let length_col = col("length")?;
        let time_col = col("observed_time")?;
        let weight_col = headers.iter().position(|h| h == "weight");

        let mut paths: Vec<HostPath> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let id = parse_field("path", &record[path_col])? as PathKey;
            let link = parse_field("link", &record[link_col])? as LinkKey;
            let length = parse_field("length", &record[length_col])?;
            let observed_time = parse_field("observed_time", &record[time_col])?;
            let weight = match weight_col {
                Some(c) => parse_field("weight", &record[c])?,
                None => 1.0,
            };

            match paths.last_mut() {
                Some(path) if path.id == id => path.segments.push((link, length)),
                _ => paths.push(HostPath {
                    id,
                    segments: vec![(link, length)],
                    observed_time,
                    weight,
                }),
            }
        }
        Ok(paths)
    }

    /// Write the link table including all applied write batches.
    pub fn flush_links<P: AsRef<Path>>(&self, out: P) -> Result<(), HostError> {
        let mut writer = csv::Writer::from_path(out.as_ref())?;
        let mut header = vec!["key".to_string()];
        header.extend(self.write_attr_order.iter().cloned());
        writer.write_record(&header)?;
        for key in self.inner.link_keys()? {
            let mut row = vec![key.to_string()];
            for attr in &self.write_attr_order {
                let value = self.inner.attribute_value(attr, key).unwrap_or(f64::NAN);
                row.push(value.to_string());
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Host for CsvHost {
    fn link_keys(&self) -> Result<Vec<LinkKey>, HostError> {
        self.inner.link_keys()
    }

    fn read_link_attribute(&self, host_attr: &str) -> Result<Vec<f64>, HostError> {
        self.inner.read_link_attribute(host_attr)
    }

    fn paths(&self) -> Result<Vec<HostPath>, HostError> {
        self.inner.paths()
    }

    fn write_link_attribute(&mut self, host_attr: &str, values: &[(LinkKey, f64)]) -> Result<(), HostError> {
        self.inner.write_link_attribute(host_attr, values)
    }
}
