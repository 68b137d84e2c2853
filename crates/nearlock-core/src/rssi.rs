//! RSSI smoothing over a bounded sliding window.
//!
//! Raw readings are noisy and occasionally invalid (positive values are a
//! hardware artifact). Each tracked peripheral keeps the last N clamped
//! samples; the smoothed estimate is their arithmetic mean. A peripheral
//! with no samples reports a sentinel one unit below the presence threshold
//! so that a silent target can never count as present.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

/// Default number of samples retained per peripheral.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// A bounded window of recent RSSI samples for one peripheral.
#[derive(Debug, Clone)]
pub struct RssiWindow {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl RssiWindow {
    /// Creates an empty window holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Appends a sample, clamping positive readings to 0 and evicting the
    /// oldest sample once the window is full.
    pub fn push(&mut self, raw: i16) {
        let sample = raw.min(0);
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the window, truncated toward zero, or `None` when
    /// no samples have been recorded.
    #[must_use]
    pub fn mean(&self) -> Option<i16> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().copied().map(f64::from).sum();
        #[allow(clippy::cast_possible_truncation)]
        Some((sum / self.samples.len() as f64) as i16)
    }

    /// Discards all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Whether any samples are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of recorded samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Per-peripheral RSSI smoothing.
///
/// Windows are created on first sample and destroyed together with their
/// owning target record; they are never shared across identifiers.
#[derive(Debug)]
pub struct RssiEstimator {
    windows: HashMap<Uuid, RssiWindow>,
    capacity: usize,
    absent_rssi: i16,
}

impl RssiEstimator {
    /// Creates an estimator with the given window capacity and the sentinel
    /// returned for peripherals without samples.
    #[must_use]
    pub fn new(capacity: usize, absent_rssi: i16) -> Self {
        Self {
            windows: HashMap::new(),
            capacity,
            absent_rssi,
        }
    }

    /// Records a clamped sample into the window for `id`.
    pub fn record_sample(&mut self, id: Uuid, raw: i16) {
        self.windows
            .entry(id)
            .or_insert_with(|| RssiWindow::new(self.capacity))
            .push(raw);
    }

    /// Smoothed estimate for `id`, or the definitely-absent sentinel when
    /// the window is empty or missing.
    #[must_use]
    pub fn estimate(&self, id: Uuid) -> i16 {
        self.windows
            .get(&id)
            .and_then(RssiWindow::mean)
            .unwrap_or(self.absent_rssi)
    }

    /// Whether `id` currently has at least one recorded sample.
    #[must_use]
    pub fn has_samples(&self, id: Uuid) -> bool {
        self.windows.get(&id).is_some_and(|w| !w.is_empty())
    }

    /// Clears the window for `id`, keeping the entry.
    pub fn clear(&mut self, id: Uuid) {
        if let Some(window) = self.windows.get_mut(&id) {
            window.clear();
        }
    }

    /// Drops the window for `id` entirely.
    pub fn remove(&mut self, id: Uuid) {
        self.windows.remove(&id);
    }

    /// Updates the sentinel returned for empty windows.
    pub fn set_absent_rssi(&mut self, absent_rssi: i16) {
        self.absent_rssi = absent_rssi;
    }
}
