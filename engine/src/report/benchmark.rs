//! Timing helpers for the pipeline stages.

use std::time::*;

/// Measure how long the given lambda takes, print the time to stderr,
/// record it in the run log under the given key and return the result.
pub fn report_time_with_key<Out, F: FnOnce() -> Out>(name: &str, key: &'static str, f: F) -> Out {
    let start = Instant::now();
    eprintln!("starting {}", name);
    let res = f();
    let t_passed = start.elapsed().as_secs_f64() * 1000.0;
    eprintln!("{} done - took: {}ms", name, t_passed);
    crate::report!(key, t_passed);
    res
}

/// Measure how long the given lambda takes and return both the result and
/// the elapsed duration.
pub fn measure<Out, F: FnOnce() -> Out>(f: F) -> (Out, Duration) {
    let start = Instant::now();
    let res = f();
    (res, start.elapsed())
}

/// A struct to repeatedly measure the time passed since the timer was started
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Timer {
        Timer { start: Instant::now() }
    }

    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn get_passed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}
