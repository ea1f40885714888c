//! Genome-wide aggregation of finalized windows.
//!
//! The [`GlobalAggregator`] is single-writer: the control thread hands it
//! finalized windows in index order, it folds their descriptors into running
//! totals and feeds the three histogram engines, and at the end of the run it
//! is consumed into a [`LaneReport`]. Genome-wide variance uses the online
//! sum-of-squares estimator so per-position coverage is never retained
//! beyond the window being ingested.

use serde::Serialize;

use crate::errors::{FgqcError, Result};
use crate::histogram::{FinalizedHistogram, Histogram};
use crate::window::{Window, WindowSummary};

/// Genome-wide scalar summary for one pipeline (inside or outside).
#[derive(Debug, Clone, Serialize)]
pub struct GenomeStats {
    /// Size of the coordinate space this lane covers.
    pub reference_size: u64,
    /// Number of windows in the partition.
    pub num_windows: usize,
    /// Reference positions covered by aligned cells, with multiplicity.
    pub total_mapped_bases: u64,
    /// Non-gap aligned cells.
    pub total_sequenced_bases: u64,
    /// total mapped bases / reference size.
    pub mean_coverage: f64,
    /// Online estimate: `sqrt(sum_sq / reference_size - mean^2)`.
    pub std_coverage: f64,
    /// Unweighted mean of per-window mapping-quality means.
    pub mean_mapping_quality: f64,
    /// Unweighted mean of per-window insert-size means, over windows that
    /// saw at least one valid pair (NaN when none did).
    pub mean_insert_size: f64,
    /// Unweighted mean of per-window GC content, over windows that saw at
    /// least one sequenced base.
    pub mean_gc_percent: f64,
}

/// Everything one pipeline produces: ordered summaries, histograms, scalars.
#[derive(Debug)]
pub struct LaneReport {
    /// Genome-wide scalar summary.
    pub genome: GenomeStats,
    /// Per-window summaries; index i is window i of the partition.
    pub windows: Vec<WindowSummary>,
    /// Depth-of-coverage histogram over per-position values.
    pub coverage_histogram: FinalizedHistogram,
    /// Mapping-quality histogram over per-position mean qualities.
    pub mapping_quality_histogram: FinalizedHistogram,
    /// Insert-size histogram over per-position mean insert sizes.
    pub insert_size_histogram: FinalizedHistogram,
}

/// Single-writer aggregator over finalized windows.
pub struct GlobalAggregator {
    reference_size: u64,
    num_windows: usize,
    summaries: Vec<WindowSummary>,
    total_mapped_bases: u64,
    total_sequenced_bases: u64,
    sum_sq_coverage: f64,
    mapping_quality_acc: f64,
    insert_acc: f64,
    windows_with_insert: usize,
    gc_acc: f64,
    windows_with_bases: usize,
    coverage_hist: Histogram,
    mapping_quality_hist: Histogram,
    insert_size_hist: Histogram,
    max_quota: u64,
}

impl GlobalAggregator {
    /// Create an aggregator for a lane covering `reference_size` positions
    /// split into `num_windows` windows.
    #[must_use]
    pub fn new(
        reference_size: u64,
        num_windows: usize,
        histogram_cache_size: usize,
        max_quota: u64,
    ) -> Self {
        Self {
            reference_size,
            num_windows,
            summaries: Vec::with_capacity(num_windows),
            total_mapped_bases: 0,
            total_sequenced_bases: 0,
            sum_sq_coverage: 0.0,
            mapping_quality_acc: 0.0,
            insert_acc: 0.0,
            windows_with_insert: 0,
            gc_acc: 0.0,
            windows_with_bases: 0,
            coverage_hist: Histogram::new(histogram_cache_size),
            mapping_quality_hist: Histogram::new(histogram_cache_size),
            insert_size_hist: Histogram::new(histogram_cache_size),
            max_quota,
        }
    }

    /// Number of windows ingested so far.
    #[must_use]
    pub fn windows_ingested(&self) -> usize {
        self.summaries.len()
    }

    /// Fold one finalized window into the running state.
    ///
    /// Windows must arrive exactly once each, in index order — the summary
    /// list is consumed downstream as if index i is window i.
    ///
    /// # Errors
    /// Returns [`FgqcError::WindowNotFinalized`] if [`Window::finalize`] was
    /// not called first.
    pub fn ingest(&mut self, window: &Window) -> Result<()> {
        let summary = window
            .summary()
            .ok_or(FgqcError::WindowNotFinalized { index: window.index() })?
            .clone();
        assert_eq!(
            summary.index,
            self.summaries.len(),
            "windows must be ingested in index order"
        );

        self.total_mapped_bases += summary.mapped_bases;
        self.total_sequenced_bases += summary.sequenced_bases;
        self.sum_sq_coverage += summary.sum_sq_coverage;
        self.mapping_quality_acc += summary.mean_mapping_quality;
        if !summary.mean_insert_size.is_nan() {
            self.insert_acc += summary.mean_insert_size;
            self.windows_with_insert += 1;
        }
        if summary.sequenced_bases > 0 {
            self.gc_acc += summary.gc_percent;
            self.windows_with_bases += 1;
        }

        if let Some(detail) = window.detail() {
            for rel in 0..window.len() {
                if !window.position_included(rel) {
                    continue;
                }
                let coverage = u64::from(detail.coverage[rel]);
                self.coverage_hist.add(coverage);
                if coverage > 0 {
                    self.mapping_quality_hist.add(detail.mapping_quality_sum[rel] / coverage);
                }
                let paired = u64::from(detail.paired_coverage[rel]);
                if paired > 0 {
                    self.insert_size_hist.add(detail.insert_size_sum[rel] / paired);
                }
            }
        }

        self.summaries.push(summary);
        Ok(())
    }

    /// Genome-wide scalars from the running totals.
    #[must_use]
    pub fn genome_stats(&self) -> GenomeStats {
        let mean_coverage = if self.reference_size == 0 {
            0.0
        } else {
            self.total_mapped_bases as f64 / self.reference_size as f64
        };
        let std_coverage = if self.reference_size == 0 {
            0.0
        } else {
            let variance =
                self.sum_sq_coverage / self.reference_size as f64 - mean_coverage * mean_coverage;
            variance.max(0.0).sqrt()
        };
        let windows = self.summaries.len();
        GenomeStats {
            reference_size: self.reference_size,
            num_windows: self.num_windows,
            total_mapped_bases: self.total_mapped_bases,
            total_sequenced_bases: self.total_sequenced_bases,
            mean_coverage,
            std_coverage,
            mean_mapping_quality: if windows == 0 {
                0.0
            } else {
                self.mapping_quality_acc / windows as f64
            },
            mean_insert_size: if self.windows_with_insert == 0 {
                f64::NAN
            } else {
                self.insert_acc / self.windows_with_insert as f64
            },
            mean_gc_percent: if self.windows_with_bases == 0 {
                0.0
            } else {
                self.gc_acc / self.windows_with_bases as f64
            },
        }
    }

    /// Finalize the histograms and consume the aggregator into its report.
    #[must_use]
    pub fn finish(self) -> LaneReport {
        let genome = self.genome_stats();
        LaneReport {
            genome,
            windows: self.summaries,
            coverage_histogram: self.coverage_hist.finalize(self.max_quota),
            mapping_quality_histogram: self.mapping_quality_hist.finalize(self.max_quota),
            insert_size_histogram: self.insert_size_hist.finalize(self.max_quota),
        }
    }
}
