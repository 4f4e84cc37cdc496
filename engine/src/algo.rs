//! Numerical kernels of the calibration.

pub mod bounded_lsq;
