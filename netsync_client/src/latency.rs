//! Rolling round-trip latency statistics.

use std::collections::VecDeque;

/// Fixed-size rolling average of RTT samples (milliseconds) for one peer.
#[derive(Debug, Clone)]
pub struct LatencyAverager {
    samples: VecDeque<f32>,
    window: usize,
    sum: f64,
}

impl LatencyAverager {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            sum: 0.0,
        }
    }

    /// Adds a sample, evicting the oldest when the window is full.
    ///
    /// Negative and non-finite samples are ignored.
    pub fn push(&mut self, rtt_ms: f32) {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            return;
        }
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old as f64;
            }
        }
        self.samples.push_back(rtt_ms);
        self.sum += rtt_ms as f64;
    }

    /// Mean of the window; 0 when no samples have arrived.
    pub fn average(&self) -> f32 {
        if self.samples.is_empty() {
            0.0
        } else {
            (self.sum / self.samples.len() as f64) as f32
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
    }
}

impl Default for LatencyAverager {
    fn default() -> Self {
        Self::new(20)
    }
}
