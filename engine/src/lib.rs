//! Recalibration of per-link free-flow speeds from observed path travel times.
//!
//! The crate takes a snapshot of a transportation network (links with
//! lengths, baseline free-flow speeds and feasibility bounds) together with
//! a set of observed paths, and solves a bounded linear least-squares
//! problem for new free-flow speeds such that modelled travel times on the
//! observed paths match the observations as closely as the bounds allow.
//! The problem is linear because we solve in pace (reciprocal speed) space
//! and only invert back to speeds at the very end.
//!
//! The network itself lives in an external host process; [`host`] defines
//! the three services we consume from it (link enumeration, path
//! enumeration, attribute read/write) and everything downstream operates
//! on owned in-memory arrays. [`run`] wires the pipeline together.

pub mod algo;
pub mod cli;
pub mod config;
pub mod datastr;
pub mod error;
pub mod gate;
pub mod host;
pub mod load;
pub mod model;
pub mod report;
pub mod run;
