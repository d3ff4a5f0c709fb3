//! Sliding Time Window
//!
//! A fixed-duration window over `(timestamp, cost)` samples with cached sum
//! and count. Samples arrive in non-decreasing timestamp order, so expiry is
//! a trim of the front of the deque and every query is amortized O(1).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default short window (1 second)
pub const DEFAULT_SHORT_WINDOW: Duration = Duration::from_secs(1);

/// Default long window (1 minute)
pub const DEFAULT_LONG_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Sample {
    timestamp: Instant,
    cost: f64,
}

/// Running cost and call count over the last `duration`.
///
/// Expiry is lazy: nothing happens until the counter is queried or
/// [`expire`](TimeWindowCounter::expire) is called.
#[derive(Debug, Clone)]
pub struct TimeWindowCounter {
    duration: Duration,
    samples: VecDeque<Sample>,
    sum_cost: f64,
}

impl TimeWindowCounter {
    /// Create an empty window
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            samples: VecDeque::new(),
            sum_cost: 0.0,
        }
    }

    /// Record a sample at `now`.
    ///
    /// `now` must not be earlier than the newest recorded sample.
    pub fn add(&mut self, cost: f64, now: Instant) {
        debug_assert!(
            self.samples.back().map_or(true, |s| s.timestamp <= now),
            "samples must be added in timestamp order"
        );
        self.sum_cost += cost;
        self.samples.push_back(Sample {
            timestamp: now,
            cost,
        });
    }

    /// Drop every sample older than `now - duration`.
    ///
    /// Returns the number of samples removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.timestamp) <= self.duration {
                break;
            }
            self.sum_cost -= front.cost;
            self.samples.pop_front();
            removed += 1;
        }
        if self.samples.is_empty() {
            // Clear accumulated rounding error
            self.sum_cost = 0.0;
        }
        removed
    }

    /// Sum of the costs inside the window at `now`
    pub fn current_cost(&mut self, now: Instant) -> f64 {
        self.expire(now);
        self.sum_cost
    }

    /// Number of samples inside the window at `now`
    pub fn current_calls(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.samples.len()
    }

    /// Cached sum as of the last expiry
    pub fn cached_cost(&self) -> f64 {
        self.sum_cost
    }

    /// Cached count as of the last expiry
    pub fn cached_calls(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum_cost = 0.0;
    }
}
