//! Engine configuration and validation.

use crate::errors::{FgqcError, Result};
use crate::histogram::{DEFAULT_CACHE_SIZE, DEFAULT_MAX_QUOTA};

/// Default window size in reference positions.
pub const DEFAULT_WINDOW_SIZE: u64 = 50_000;

/// Default number of reads dispatched to a worker as one task.
pub const DEFAULT_BUNCH_SIZE: usize = 2000;

/// Default worker pool size.
pub const DEFAULT_WORKER_THREADS: usize = 8;

/// Tuning and capability knobs for a [`crate::driver::WindowedDriver`] run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed window size in positions; the last window may be shorter.
    pub window_size: u64,
    /// Reads per worker task.
    pub bunch_size: usize,
    /// Worker pool size.
    pub worker_threads: usize,
    /// Dense-cache size of the histogram engines.
    pub histogram_cache_size: usize,
    /// Upper bound of the coverage quota curve.
    pub max_quota: u64,
    /// Exclude duplicate-flagged reads from accumulation (always counted).
    pub skip_duplicates: bool,
    /// Allocate per-position arrays (required for std coverage and the
    /// per-position histograms).
    pub per_position_detail: bool,
    /// Run the mirrored outside-of-regions pipeline (requires a region mask).
    pub collect_outside: bool,
    /// Progress log interval, in reads.
    pub progress_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            bunch_size: DEFAULT_BUNCH_SIZE,
            worker_threads: DEFAULT_WORKER_THREADS,
            histogram_cache_size: DEFAULT_CACHE_SIZE,
            max_quota: DEFAULT_MAX_QUOTA,
            skip_duplicates: false,
            per_position_detail: true,
            collect_outside: false,
            progress_interval: 100_000,
        }
    }
}

impl EngineConfig {
    /// Default configuration with the given window size.
    #[must_use]
    pub fn with_window_size(window_size: u64) -> Self {
        Self { window_size, ..Self::default() }
    }

    /// Check every knob, mirroring the values into error messages.
    ///
    /// # Errors
    /// Returns [`FgqcError::InvalidParameter`] for the first invalid knob.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(invalid("window_size", "must be >= 1"));
        }
        if self.bunch_size == 0 {
            return Err(invalid("bunch_size", "must be >= 1"));
        }
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads", "must be >= 1"));
        }
        if self.histogram_cache_size == 0 {
            return Err(invalid("histogram_cache_size", "must be >= 1"));
        }
        if self.max_quota == 0 {
            return Err(invalid("max_quota", "must be >= 1"));
        }
        if self.progress_interval == 0 {
            return Err(invalid("progress_interval", "must be >= 1"));
        }
        Ok(())
    }
}

fn invalid(parameter: &str, reason: &str) -> FgqcError {
    FgqcError::InvalidParameter { parameter: parameter.to_string(), reason: reason.to_string() }
}
