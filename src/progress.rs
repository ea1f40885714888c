//! Progress tracking utilities
//!
//! A thread-safe tracker that logs progress when an internal count crosses
//! interval boundaries, plus a final completion line.

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

/// Thread-safe progress tracker for logging at regular intervals.
///
/// # Example
/// ```
/// use fgqc::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Processed reads").with_interval(100);
/// for _ in 0..250 {
///     tracker.add(1); // logs at 100 and 200
/// }
/// tracker.log_final(); // logs "Processed reads 250 (complete)"
/// ```
pub struct ProgressTracker {
    /// Progress is logged when the count crosses multiples of this.
    interval: u64,
    /// Message prefix for log output.
    message: String,
    /// Items seen so far.
    count: AtomicU64,
}

impl ProgressTracker {
    /// Create a tracker with a default interval of 100,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 100_000, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Set the logging interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        assert!(interval > 0, "progress interval must be positive");
        self.interval = interval;
        self
    }

    /// Add to the count, logging once per interval boundary crossed.
    pub fn add(&self, additional: u64) {
        if additional == 0 {
            return;
        }
        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;
        for crossed in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!("{} {}", self.message, crossed * self.interval);
        }
    }

    /// The current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Log the final count with a completion marker.
    pub fn log_final(&self) {
        info!("{} {} (complete)", self.message, self.count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_accumulates() {
        let tracker = ProgressTracker::new("items").with_interval(10);
        tracker.add(4);
        tracker.add(0);
        tracker.add(26);
        assert_eq!(tracker.count(), 30);
    }

    #[test]
    fn test_shared_across_threads() {
        let tracker = std::sync::Arc::new(ProgressTracker::new("items").with_interval(1000));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let tracker = std::sync::Arc::clone(&tracker);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    tracker.add(1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.count(), 1000);
    }
}
