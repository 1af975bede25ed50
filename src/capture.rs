// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The capture primitives the profiler relies on.
//!
//! The profiler does not sample anything by itself. Heap snapshots, CPU
//! captures and the named capture tables (block, mutex, live tasks) are
//! provided by the host runtime through a [`CaptureEngine`], and top-line
//! counters through a [`MetricsSource`].

use std::{io::Write, time::SystemTime};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("capture i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture engine error: {0}")]
    Engine(String),
    #[error("metrics serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Access to the runtime's native capture primitives.
///
/// CPU capture is a process-wide exclusive resource: at most one
/// [`start_cpu_profile`](Self::start_cpu_profile) may be outstanding at a time,
/// and callers are responsible for serializing CPU captures.
pub trait CaptureEngine: Send + Sync {
    /// Writes a snapshot of the current heap profile.
    fn write_heap_profile(&self, w: &mut dyn Write) -> Result<(), CaptureError>;

    /// Starts a CPU capture.
    fn start_cpu_profile(&self) -> Result<(), CaptureError>;

    /// Stops the CPU capture started by [`start_cpu_profile`](Self::start_cpu_profile)
    /// and returns its encoded profile.
    fn stop_cpu_profile(&self) -> Result<Vec<u8>, CaptureError>;

    /// Looks up the capture table called `name` and writes it with the given
    /// verbosity. `debug = 0` is the binary form; `debug = 2` is the
    /// human-readable per-task dump for the live task table.
    ///
    /// Returns [`CaptureError::NotFound`] if there is no such table.
    fn lookup_profile(&self, name: &str, w: &mut dyn Write, debug: u8)
        -> Result<(), CaptureError>;
}

/// Reports the current value of custom counters.
pub trait MetricsSource: Send + Sync {
    fn report(&self, now: SystemTime, w: &mut dyn Write) -> Result<(), CaptureError>;
}

/// A [`MetricsSource`] reading its counters from a closure, and writing them
/// as a JSON array of `[name, value]` pairs.
pub struct CounterMetrics<F> {
    counters: F,
}

impl<F> CounterMetrics<F>
where
    F: Fn() -> Vec<(String, f64)> + Send + Sync,
{
    pub fn new(counters: F) -> Self {
        CounterMetrics { counters }
    }
}

#[derive(Serialize)]
struct Point<'a>(&'a str, f64);

impl<F> MetricsSource for CounterMetrics<F>
where
    F: Fn() -> Vec<(String, f64)> + Send + Sync,
{
    fn report(&self, _now: SystemTime, w: &mut dyn Write) -> Result<(), CaptureError> {
        let counters = (self.counters)();
        let points: Vec<Point<'_>> = counters
            .iter()
            .map(|(name, value)| Point(name, *value))
            .collect();
        serde_json::to_writer(w, &points)?;
        Ok(())
    }
}

impl<F> std::fmt::Debug for CounterMetrics<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterMetrics").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::{CounterMetrics, MetricsSource};

    #[test]
    fn test_counter_metrics() {
        let metrics = CounterMetrics::new(|| {
            vec![
                ("alloc_bytes_per_sec".to_owned(), 1024.0),
                ("gc_pause_pct".to_owned(), 0.5),
            ]
        });
        let mut buf = vec![];
        metrics.report(SystemTime::now(), &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"[["alloc_bytes_per_sec",1024.0],["gc_pause_pct",0.5]]"#
        );
    }

    #[test]
    fn test_counter_metrics_empty() {
        let metrics = CounterMetrics::new(Vec::new);
        let mut buf = vec![];
        metrics.report(SystemTime::now(), &mut buf).unwrap();
        assert_eq!(buf, b"[]");
    }
}
