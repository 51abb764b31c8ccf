//! Fixed-window moving-average filter for sensor channels.
//!
//! Each monitored channel owns one [`MovingAverage`]. Samples land in a
//! circular buffer and a running sum is kept alongside, so an update costs
//! O(1) regardless of window size. Storage is reserved inline (no allocator),
//! bounded by [`MAX_WINDOW`].

use heapless::Vec;
use thiserror::Error;

/// Largest window any channel may request.
pub const MAX_WINDOW: usize = 100;

/// Errors reported by [`MovingAverage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FilterError {
    /// A window must hold at least one sample.
    #[error("window capacity must be at least 1")]
    ZeroCapacity,
    /// The requested window does not fit in the reserved storage.
    #[error("window capacity {requested} exceeds the {max}-sample limit")]
    CapacityExceeded { requested: usize, max: usize },
    /// No sample has been recorded since creation or the last reset.
    #[error("no samples recorded yet")]
    NoData,
}

/// Trailing-window arithmetic mean over the last `capacity` samples.
///
/// While the window is filling, the average covers only the samples seen so
/// far (divisor = filled count, not capacity).
#[derive(Debug, Clone)]
pub struct MovingAverage {
    /// Valid samples; `len()` is the filled count.
    buffer: Vec<f32, MAX_WINDOW>,
    capacity: usize,
    write_index: usize,
    /// Kept wider than the samples so long runs of add/evict do not drift.
    running_sum: f64,
}

impl MovingAverage {
    /// Create an empty filter holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Result<Self, FilterError> {
        if capacity == 0 {
            return Err(FilterError::ZeroCapacity);
        }
        if capacity > MAX_WINDOW {
            return Err(FilterError::CapacityExceeded {
                requested: capacity,
                max: MAX_WINDOW,
            });
        }
        Ok(Self {
            buffer: Vec::new(),
            capacity,
            write_index: 0,
            running_sum: 0.0,
        })
    }

    /// Record a sample and return the updated average.
    pub fn update(&mut self, sample: f32) -> f32 {
        if self.is_full() {
            // Evict the oldest sample, which sits at the write index.
            self.running_sum -= f64::from(self.buffer[self.write_index]);
            self.buffer[self.write_index] = sample;
        } else {
            // While filling, the write index always equals the filled count.
            let _ = self.buffer.push(sample);
        }

        self.running_sum += f64::from(sample);
        self.write_index = (self.write_index + 1) % self.capacity;

        self.average()
    }

    /// Current average without recording a new sample.
    pub fn current_value(&self) -> Result<f32, FilterError> {
        if self.buffer.is_empty() {
            return Err(FilterError::NoData);
        }
        Ok(self.average())
    }

    fn average(&self) -> f32 {
        (self.running_sum / self.buffer.len() as f64) as f32
    }

    /// Drop all samples, keeping the configured capacity.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.write_index = 0;
        self.running_sum = 0.0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid samples currently held.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }
}
