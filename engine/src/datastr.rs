//! Owned numeric data structures for the calibration pipeline.
//!
//! Everything here is plain arrays indexed by dense ids. The loader is the
//! only place where host keys are translated into dense indices; from then
//! on all components speak dense indices and hand their arrays forward
//! immutably.

pub mod incidence;
pub mod snapshot;

/// Stable link keys assigned by the host are 64bit unsigned ints
pub type LinkKey = u64;
/// Stable path identifiers assigned by the host are 64bit unsigned ints
pub type PathKey = u64;
/// Dense link indices are 32bit unsigned ints
pub type LinkIdx = u32;
/// Dense path indices are 32bit unsigned ints
pub type PathIdx = u32;
