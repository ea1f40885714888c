//! Structured metric rows and TSV writers.
//!
//! The report layer proper (charts, HTML) lives outside this crate; what the
//! engine offers is a diagnostic side channel: per-window summaries, the
//! three histograms, the coverage quota curve, and a key-value genome
//! summary, all as serde rows written through `fgoxide`'s delimited writer.

use anyhow::{Context, Result};
use fgoxide::io::DelimFile;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::aggregate::LaneReport;
use crate::driver::QcReport;
use crate::histogram::FinalizedHistogram;

/// Number of decimal places used for float metrics.
pub const FLOAT_PRECISION: usize = 6;

/// Formats a float value with the standard precision for metrics.
///
/// # Example
/// ```
/// use fgqc::metrics::format_float;
/// assert_eq!(format_float(0.9), "0.900000");
/// ```
#[must_use]
pub fn format_float(value: f64) -> String {
    format!("{value:.FLOAT_PRECISION$}")
}

/// A metric type that can be serialized to TSV files.
pub trait Metric: Serialize + for<'de> Deserialize<'de> + Clone {
    /// Human-readable name for this metric type, used in error messages.
    fn metric_name() -> &'static str;
}

/// One per-window summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowMetric {
    /// Window index within the partition.
    pub window: usize,
    /// Absolute start position.
    pub start: u64,
    /// Absolute end position.
    pub end: u64,
    /// Length after region exclusion.
    pub effective_length: u64,
    /// Covered reference positions, with multiplicity.
    pub mapped_bases: u64,
    /// Mean depth of coverage.
    pub mean_coverage: f64,
    /// Standard deviation of per-position coverage.
    pub std_coverage: f64,
    /// Mean mapping quality.
    pub mean_mapping_quality: f64,
    /// Mean insert size (NaN when the window saw no valid pairs).
    pub mean_insert_size: f64,
    /// Sample GC content, percent.
    pub gc_percent: f64,
}

impl Metric for WindowMetric {
    fn metric_name() -> &'static str {
        "window summary"
    }
}

/// One (value, frequency) histogram row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramMetric {
    /// The observed value.
    pub value: u64,
    /// Number of positions carrying it.
    pub frequency: u64,
}

impl Metric for HistogramMetric {
    fn metric_name() -> &'static str {
        "histogram"
    }
}

/// One coverage quota row: percent of positions at or above a threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaMetric {
    /// The coverage threshold.
    pub threshold: u64,
    /// Percent of counted positions with coverage >= threshold.
    pub percent: f64,
}

impl Metric for QuotaMetric {
    fn metric_name() -> &'static str {
        "coverage quota"
    }
}

/// A key-value-description row of the genome summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryKvMetric {
    /// The metric key/name.
    pub key: String,
    /// The metric value, preformatted for TSV output.
    pub value: String,
    /// Human-readable description.
    pub description: String,
}

impl SummaryKvMetric {
    fn new(key: &str, value: String, description: &str) -> Self {
        Self { key: key.to_string(), value, description: description.to_string() }
    }
}

impl Metric for SummaryKvMetric {
    fn metric_name() -> &'static str {
        "genome summary"
    }
}

/// Build the per-window rows of one lane, in window-index order.
#[must_use]
pub fn window_metrics(lane: &LaneReport) -> Vec<WindowMetric> {
    lane.windows
        .iter()
        .map(|summary| WindowMetric {
            window: summary.index,
            start: summary.start,
            end: summary.end,
            effective_length: summary.effective_length,
            mapped_bases: summary.mapped_bases,
            mean_coverage: summary.mean_coverage,
            std_coverage: summary.std_coverage,
            mean_mapping_quality: summary.mean_mapping_quality,
            mean_insert_size: summary.mean_insert_size,
            gc_percent: summary.gc_percent,
        })
        .collect()
}

/// Build the (value, frequency) rows of a finalized histogram.
#[must_use]
pub fn histogram_metrics(histogram: &FinalizedHistogram) -> Vec<HistogramMetric> {
    histogram
        .entries
        .iter()
        .map(|e| HistogramMetric { value: e.value, frequency: e.frequency })
        .collect()
}

/// Build the quota-curve rows of a finalized histogram.
#[must_use]
pub fn quota_metrics(histogram: &FinalizedHistogram) -> Vec<QuotaMetric> {
    histogram
        .quota
        .iter()
        .map(|q| QuotaMetric { threshold: q.threshold, percent: q.percent })
        .collect()
}

/// Build the key-value genome summary of a full report.
#[must_use]
pub fn summary_metrics(report: &QcReport) -> Vec<SummaryKvMetric> {
    let genome = &report.stats.genome;
    let reads = &report.reads;
    vec![
        SummaryKvMetric::new(
            "reference_size",
            genome.reference_size.to_string(),
            "Positions in the analyzed coordinate space",
        ),
        SummaryKvMetric::new(
            "number_of_windows",
            genome.num_windows.to_string(),
            "Windows in the partition",
        ),
        SummaryKvMetric::new("total_reads", reads.total.to_string(), "Reads on the input stream"),
        SummaryKvMetric::new(
            "dispatched_reads",
            reads.dispatched.to_string(),
            "Reads entering accumulation",
        ),
        SummaryKvMetric::new("unmapped_reads", reads.unmapped.to_string(), "Unmapped reads skipped"),
        SummaryKvMetric::new(
            "duplicate_reads",
            reads.duplicates.to_string(),
            "Reads flagged as duplicates",
        ),
        SummaryKvMetric::new(
            "aligned_bases",
            reads.aligned_bases.to_string(),
            "Reference-consuming cells across all reads",
        ),
        SummaryKvMetric::new(
            "mapped_bases",
            genome.total_mapped_bases.to_string(),
            "Covered reference positions, with multiplicity",
        ),
        SummaryKvMetric::new(
            "mean_coverage",
            format_float(genome.mean_coverage),
            "Genome-wide mean depth of coverage",
        ),
        SummaryKvMetric::new(
            "std_coverage",
            format_float(genome.std_coverage),
            "Genome-wide standard deviation of coverage",
        ),
        SummaryKvMetric::new(
            "mean_mapping_quality",
            format_float(genome.mean_mapping_quality),
            "Mean of per-window mapping-quality means",
        ),
        SummaryKvMetric::new(
            "mean_insert_size",
            format_float(genome.mean_insert_size),
            "Mean of per-window insert-size means",
        ),
        SummaryKvMetric::new(
            "mean_gc_percent",
            format_float(genome.mean_gc_percent),
            "Mean of per-window GC content",
        ),
    ]
}

/// Write metric rows to a TSV file with consistent error handling.
///
/// # Errors
/// Returns an error if the file cannot be created or written to.
pub fn write_metrics<P: AsRef<Path>, T: Serialize>(
    path: P,
    metrics: &[T],
    description: &str,
) -> Result<()> {
    DelimFile::default().write_tsv(&path, metrics).with_context(|| {
        format!("Failed to write {} metrics: {}", description, path.as_ref().display())
    })
}

/// Write rows implementing [`Metric`], naming them after their own type.
///
/// # Errors
/// Returns an error if the file cannot be created or written to.
pub fn write_metrics_auto<P: AsRef<Path>, T: Metric>(path: P, metrics: &[T]) -> Result<()> {
    write_metrics(path, metrics, T::metric_name())
}
