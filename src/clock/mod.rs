//! Clock offset estimation between this client and the shared reference time
//! used for synchronized media playback.

mod playback;

pub use playback::{expected_position, needs_seek};

use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Source of wall-clock readings in milliseconds since the Unix epoch
pub trait TimeSource {
    fn now_ms(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_ms(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

/// Wall clock in ms since epoch, shifted by `offset_ms`
pub fn local_reference_time(offset_ms: f64) -> f64 {
    SystemClock.now_ms() + offset_ms
}

/// Median of a sample set; 0 for an empty set
pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Running forward/backward offset estimator.
///
/// Each direction keeps its own sample sequence; the estimate for a
/// direction is the median of its samples and the correction is the mean of
/// both estimates. Clearing samples leaves the derived values in place until
/// the next sample arrives.
#[derive(Debug, Clone)]
pub struct ClockEstimator<T: TimeSource = SystemClock> {
    clock: T,
    forward_samples: Vec<f64>,
    backward_samples: Vec<f64>,
    forward_estimate: f64,
    backward_estimate: f64,
    correction: f64,
}

impl Default for ClockEstimator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockEstimator<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<T: TimeSource> ClockEstimator<T> {
    pub fn with_clock(clock: T) -> Self {
        Self {
            clock,
            forward_samples: Vec::new(),
            backward_samples: Vec::new(),
            forward_estimate: 0.0,
            backward_estimate: 0.0,
            correction: 0.0,
        }
    }

    /// Record how far ahead the remote clock appeared, in ms
    pub fn add_forward_sample(&mut self, delta_ms: f64) {
        self.forward_samples.push(delta_ms);
        self.forward_estimate = median(&self.forward_samples);
        self.recompute();
    }

    /// Record a raw remote timestamp; the sample is its distance from now
    pub fn add_backward_sample(&mut self, remote_ts_ms: f64) {
        let delta = remote_ts_ms - self.clock.now_ms();
        self.backward_samples.push(delta);
        self.backward_estimate = median(&self.backward_samples);
        self.recompute();
    }

    fn recompute(&mut self) {
        self.correction = (self.forward_estimate + self.backward_estimate) / 2.0;
        debug!(
            forward = self.forward_estimate,
            backward = self.backward_estimate,
            correction = self.correction,
            "Clock estimate updated"
        );
    }

    /// Drop all samples. Estimates and correction stay until the next sample.
    pub fn clear_estimates(&mut self) {
        self.clear_forward();
        self.clear_backward();
    }

    /// Drop forward samples only
    pub fn clear_forward(&mut self) {
        self.forward_samples.clear();
    }

    /// Drop backward samples only
    pub fn clear_backward(&mut self) {
        self.backward_samples.clear();
    }

    /// Start a new sync session
    pub fn reset(&mut self) {
        self.clear_estimates();
    }

    /// Local reading corrected onto the shared reference time
    pub fn global_time(&self) -> f64 {
        self.clock.now_ms() + self.correction
    }

    /// Offset in ms added to the local clock
    pub fn correction(&self) -> f64 {
        self.correction
    }

    pub fn forward_estimate(&self) -> f64 {
        self.forward_estimate
    }

    pub fn backward_estimate(&self) -> f64 {
        self.backward_estimate
    }

    pub fn forward_samples(&self) -> &[f64] {
        &self.forward_samples
    }

    pub fn backward_samples(&self) -> &[f64] {
        &self.backward_samples
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }
}
