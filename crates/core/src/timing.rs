//! Per-request stage timing
//!
//! Accumulates named stage durations so responses can carry a timing
//! breakdown for monitoring.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Timing breakdown attached to answer metadata
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TimingBreakdown {
    /// Total wall time in milliseconds
    pub total_ms: f64,
    /// Ordered (stage, milliseconds) pairs
    pub stages: Vec<(String, f64)>,
}

/// Stage timer for one request
#[derive(Debug)]
pub struct StageTimer {
    started: Instant,
    current: Option<(String, Instant)>,
    stages: Vec<(String, f64)>,
}

impl StageTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            current: None,
            stages: Vec::new(),
        }
    }

    /// Begin a named stage, implicitly ending any open one
    pub fn start_stage(&mut self, name: &str) {
        self.end_stage();
        self.current = Some((name.to_string(), Instant::now()));
    }

    /// End the currently open stage, if any
    pub fn end_stage(&mut self) {
        if let Some((name, begun)) = self.current.take() {
            self.stages
                .push((name, begun.elapsed().as_secs_f64() * 1000.0));
        }
    }

    /// Snapshot the breakdown; ends any open stage
    pub fn breakdown(mut self) -> TimingBreakdown {
        self.end_stage();
        TimingBreakdown {
            total_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            stages: self.stages,
        }
    }

    /// Elapsed total without consuming the timer
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}
