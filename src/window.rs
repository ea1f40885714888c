//! Per-window accumulators and descriptor computation.
//!
//! A [`Window`] owns the counters for one fixed span of absolute positions.
//! It is mutated only by the control thread, through merges of
//! [`PartialReadResult`]s, and finalized exactly once. The per-position
//! payload ([`WindowDetail`]) is optional, selected by a capability flag at
//! construction; no dynamic dispatch is involved.

use std::sync::Arc;

use serde::Serialize;

use crate::errors::{FgqcError, Result};
use crate::genome::ReferenceBases;
use crate::partial::{letter_index, PartialReadResult, LETTER_C, LETTER_G};
use crate::regions::RegionMask;

/// Exclusive upper bound of the valid insert-size range.
pub const VALID_INSERT_MAX: i64 = 5000;

/// True when an inferred insert size counts toward paired statistics.
#[inline]
#[must_use]
pub fn insert_size_is_valid(insert: i64) -> bool {
    insert > 0 && insert < VALID_INSERT_MAX
}

/// Region attribution for a window: which side of the mask it accumulates.
#[derive(Debug, Clone)]
pub struct WindowRegion {
    /// The shared inclusion mask over absolute positions.
    pub mask: Arc<RegionMask>,
    /// False for the inside pipeline, true for the mirrored outside one.
    pub outside: bool,
}

impl WindowRegion {
    /// True when the absolute position belongs to this window's side.
    #[inline]
    #[must_use]
    pub fn includes(&self, absolute: u64) -> bool {
        self.mask.contains(absolute) != self.outside
    }
}

/// Per-position arrays for the detailed window variant.
#[derive(Debug, Clone)]
pub struct WindowDetail {
    /// Read depth per window-relative position.
    pub coverage: Vec<u32>,
    /// Depth restricted to reads with a valid insert size.
    pub paired_coverage: Vec<u32>,
    /// Accumulated mapping quality per position.
    pub mapping_quality_sum: Vec<u64>,
    /// Accumulated insert size per position.
    pub insert_size_sum: Vec<u64>,
}

impl WindowDetail {
    fn new(len: usize) -> Self {
        Self {
            coverage: vec![0; len],
            paired_coverage: vec![0; len],
            mapping_quality_sum: vec![0; len],
            insert_size_sum: vec![0; len],
        }
    }
}

/// Finalized per-window descriptors.
///
/// Divisions by zero during finalization yield defined sentinels: means over
/// zero mapped bases are 0, the insert-size mean over zero valid pairs is NaN.
#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    /// Window index within the partition.
    pub index: usize,
    /// Absolute start (1-based, inclusive).
    pub start: u64,
    /// Absolute end (inclusive).
    pub end: u64,
    /// Raw window length.
    pub length: u64,
    /// Length after region exclusion (equals `length` without a mask, or
    /// when nothing mapped).
    pub effective_length: u64,
    /// Reference positions covered by aligned cells, with multiplicity.
    pub mapped_bases: u64,
    /// Non-gap aligned cells (actual sample bases).
    pub sequenced_bases: u64,
    /// mapped bases / effective length.
    pub mean_coverage: f64,
    /// Per-position standard deviation of coverage (0 without detail arrays).
    pub std_coverage: f64,
    /// Sum of squared per-position coverage, feeding the genome-wide variance.
    pub sum_sq_coverage: f64,
    /// Accumulated mapping quality / mapped bases.
    pub mean_mapping_quality: f64,
    /// Accumulated insert size / valid paired positions (NaN when none).
    pub mean_insert_size: f64,
    /// Relative letter content (A/C/G/T/N), renormalized to sum to 100.
    pub letter_percents: [f64; 5],
    /// C + G relative content.
    pub gc_percent: f64,
    /// Reference-derived GC content, when a base source was supplied.
    pub reference_gc_percent: Option<f64>,
}

/// Accumulator for one window of the partition.
#[derive(Debug)]
pub struct Window {
    index: usize,
    start: u64,
    end: u64,
    region: Option<WindowRegion>,
    mapped_bases: u64,
    sequenced_bases: u64,
    letter_counts: [u64; 5],
    ref_letter_counts: Option<[u64; 5]>,
    mapping_quality_sum: u64,
    insert_size_sum: u64,
    valid_pairs: u64,
    detail: Option<WindowDetail>,
    summary: Option<WindowSummary>,
}

impl Window {
    /// Create a window over `[start, end]` (absolute, inclusive).
    ///
    /// `detailed` selects the per-position payload. When a reference base
    /// source is supplied, reference letter counts over the window's included
    /// positions are taken at creation.
    #[must_use]
    pub fn new(
        index: usize,
        start: u64,
        end: u64,
        detailed: bool,
        region: Option<WindowRegion>,
        reference: Option<&dyn ReferenceBases>,
    ) -> Self {
        debug_assert!(start >= 1 && end >= start);
        let len = (end - start + 1) as usize;
        let ref_letter_counts = reference.map(|source| {
            let mut counts = [0u64; 5];
            for absolute in start..=end {
                let included = region.as_ref().map_or(true, |r| r.includes(absolute));
                if included {
                    if let Some(idx) = letter_index(source.base_at(absolute)) {
                        counts[idx] += 1;
                    }
                }
            }
            counts
        });
        Self {
            index,
            start,
            end,
            region,
            mapped_bases: 0,
            sequenced_bases: 0,
            letter_counts: [0; 5],
            ref_letter_counts,
            mapping_quality_sum: 0,
            insert_size_sum: 0,
            valid_pairs: 0,
            detail: detailed.then(|| WindowDetail::new(len)),
            summary: None,
        }
    }

    /// Window index within the partition.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Absolute start (inclusive).
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Absolute end (inclusive).
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Raw window length in positions.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Always false; windows are at least one position long.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Reference positions covered so far.
    #[must_use]
    pub fn mapped_bases(&self) -> u64 {
        self.mapped_bases
    }

    /// The per-position payload, when the window was created detailed.
    #[must_use]
    pub fn detail(&self) -> Option<&WindowDetail> {
        self.detail.as_ref()
    }

    /// The finalized descriptors, once [`Window::finalize`] has run.
    #[must_use]
    pub fn summary(&self) -> Option<&WindowSummary> {
        self.summary.as_ref()
    }

    /// True when the window-relative position belongs to this window's side
    /// of the region mask (always true without a mask).
    #[inline]
    #[must_use]
    pub fn position_included(&self, rel: usize) -> bool {
        match &self.region {
            Some(region) => region.includes(self.start + rel as u64),
            None => true,
        }
    }

    /// Merge one bunch's contributions into the accumulators.
    ///
    /// Calling this on a finalized window is a caller contract violation and
    /// aborts the process; windows are never reopened.
    pub fn apply_partial(&mut self, partial: &PartialReadResult) {
        assert!(
            self.summary.is_none(),
            "window {} received a merge after finalization",
            self.index
        );
        debug_assert_eq!(partial.window_start, self.start);

        let len = self.len();
        for &rel in &partial.coverage {
            debug_assert!((rel as usize) < len);
            self.mapped_bases += 1;
            if let Some(detail) = self.detail.as_mut() {
                detail.coverage[rel as usize] += 1;
            }
        }
        for &rel in &partial.paired_coverage {
            if let Some(detail) = self.detail.as_mut() {
                detail.paired_coverage[rel as usize] += 1;
            }
        }
        for &(rel, quality) in &partial.mapping_quality {
            self.mapping_quality_sum += quality;
            if let Some(detail) = self.detail.as_mut() {
                detail.mapping_quality_sum[rel as usize] += quality;
            }
        }
        for &(rel, insert) in &partial.insert_size {
            self.insert_size_sum += insert;
            self.valid_pairs += 1;
            if let Some(detail) = self.detail.as_mut() {
                detail.insert_size_sum[rel as usize] += insert;
            }
        }
        for (slot, count) in self.letter_counts.iter_mut().zip(partial.letter_counts) {
            *slot += count;
            self.sequenced_bases += count;
        }
    }

    /// Length after region exclusion: with an active mask and at least one
    /// mapped base, positions on the other side of the mask are excluded;
    /// otherwise the raw length.
    #[must_use]
    pub fn effective_length(&self) -> u64 {
        match &self.region {
            Some(region) if self.mapped_bases > 0 => {
                let inside = region.mask.count_inside(self.start, self.end);
                if region.outside {
                    self.end - self.start + 1 - inside
                } else {
                    inside
                }
            }
            _ => self.end - self.start + 1,
        }
    }

    /// Compute the per-window descriptors, exactly once.
    ///
    /// # Errors
    /// Returns [`FgqcError::WindowAlreadyFinalized`] on a second call.
    pub fn finalize(&mut self) -> Result<&WindowSummary> {
        if self.summary.is_some() {
            return Err(FgqcError::WindowAlreadyFinalized { index: self.index });
        }

        let length = self.end - self.start + 1;
        let effective_length = self.effective_length();
        let mean_coverage = if effective_length == 0 {
            0.0
        } else {
            self.mapped_bases as f64 / effective_length as f64
        };

        let sum_sq_coverage = self.detail.as_ref().map_or(0.0, |detail| {
            detail
                .coverage
                .iter()
                .map(|&c| {
                    let c = f64::from(c);
                    c * c
                })
                .sum()
        });
        let std_coverage = if self.detail.is_some() && effective_length > 0 {
            let variance = sum_sq_coverage / effective_length as f64 - mean_coverage * mean_coverage;
            variance.max(0.0).sqrt()
        } else {
            0.0
        };

        let mean_mapping_quality = if self.mapped_bases == 0 {
            0.0
        } else {
            self.mapping_quality_sum as f64 / self.mapped_bases as f64
        };
        let mean_insert_size = if self.valid_pairs == 0 {
            f64::NAN
        } else {
            self.insert_size_sum as f64 / self.valid_pairs as f64
        };

        let letter_percents = relative_content(&self.letter_counts);
        let gc_percent = letter_percents[LETTER_C] + letter_percents[LETTER_G];
        let reference_gc_percent = self.ref_letter_counts.map(|counts| {
            let percents = relative_content(&counts);
            percents[LETTER_C] + percents[LETTER_G]
        });

        self.summary = Some(WindowSummary {
            index: self.index,
            start: self.start,
            end: self.end,
            length,
            effective_length,
            mapped_bases: self.mapped_bases,
            sequenced_bases: self.sequenced_bases,
            mean_coverage,
            std_coverage,
            sum_sq_coverage,
            mean_mapping_quality,
            mean_insert_size,
            letter_percents,
            gc_percent,
            reference_gc_percent,
        });
        Ok(self.summary.as_ref().expect("just set"))
    }
}

/// Per-letter mean content divided by mean coverage, renormalized to sum to
/// 100%. The shared denominators cancel, leaving each letter's share of the
/// sequenced bases; zero sequenced bases yield all zeros.
fn relative_content(counts: &[u64; 5]) -> [f64; 5] {
    let total: u64 = counts.iter().sum();
    let mut percents = [0.0; 5];
    if total > 0 {
        for (slot, &count) in percents.iter_mut().zip(counts) {
            *slot = count as f64 / total as f64 * 100.0;
        }
    }
    percents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partial::LETTER_A;

    fn partial_with_positions(window_start: u64, positions: &[u32], base: u8) -> PartialReadResult {
        let mut partial = PartialReadResult::new(window_start);
        for &rel in positions {
            partial.push_cell(rel, base, 30, None);
        }
        partial
    }

    #[test]
    fn test_mean_coverage_over_flat_window() {
        // coverage {5,5,5,5} over a 4-base window
        let mut window = Window::new(0, 1, 4, true, None, None);
        for _ in 0..5 {
            window.apply_partial(&partial_with_positions(1, &[0, 1, 2, 3], b'A'));
        }
        let summary = window.finalize().unwrap();
        assert!((summary.mean_coverage - 5.0).abs() < 1e-12);
        assert!((summary.sum_sq_coverage - 100.0).abs() < 1e-12);
        assert!(summary.std_coverage.abs() < 1e-12);
        assert_eq!(summary.mapped_bases, 20);
    }

    #[test]
    fn test_finalize_twice_is_rejected() {
        let mut window = Window::new(3, 1, 10, false, None, None);
        window.finalize().unwrap();
        let second = window.finalize();
        assert!(matches!(second, Err(FgqcError::WindowAlreadyFinalized { index: 3 })));
    }

    #[test]
    #[should_panic(expected = "after finalization")]
    fn test_merge_after_finalize_panics() {
        let mut window = Window::new(0, 1, 10, false, None, None);
        window.finalize().unwrap();
        window.apply_partial(&partial_with_positions(1, &[0], b'A'));
    }

    #[test]
    fn test_empty_window_descriptors_are_defined() {
        let mut window = Window::new(0, 1, 100, true, None, None);
        let summary = window.finalize().unwrap();
        assert_eq!(summary.mean_coverage, 0.0);
        assert_eq!(summary.mean_mapping_quality, 0.0);
        assert!(summary.mean_insert_size.is_nan());
        assert_eq!(summary.letter_percents, [0.0; 5]);
    }

    #[test]
    fn test_letter_content_renormalizes_to_100() {
        let mut window = Window::new(0, 1, 10, false, None, None);
        let mut partial = PartialReadResult::new(1);
        for (rel, &base) in b"AACG".iter().enumerate() {
            partial.push_cell(rel as u32, base, 0, None);
        }
        window.apply_partial(&partial);
        let summary = window.finalize().unwrap();
        assert!((summary.letter_percents[LETTER_A] - 50.0).abs() < 1e-12);
        assert!((summary.letter_percents[LETTER_C] - 25.0).abs() < 1e-12);
        assert!((summary.gc_percent - 50.0).abs() < 1e-12);
        let total: f64 = summary.letter_percents.iter().sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_insert_and_mapq_means() {
        let mut window = Window::new(0, 1, 10, true, None, None);
        let mut partial = PartialReadResult::new(1);
        partial.push_cell(0, b'A', 20, Some(300));
        partial.push_cell(1, b'A', 40, Some(300));
        window.apply_partial(&partial);
        let summary = window.finalize().unwrap();
        assert!((summary.mean_mapping_quality - 30.0).abs() < 1e-12);
        assert!((summary.mean_insert_size - 300.0).abs() < 1e-12);
    }

    #[test]
    fn test_effective_length_with_region_mask() {
        let mask = Arc::new(RegionMask::from_intervals(100, &[(1, 6)]));
        let region = WindowRegion { mask: Arc::clone(&mask), outside: false };
        let mut window = Window::new(0, 1, 10, true, Some(region), None);

        // Nothing mapped yet: raw length
        assert_eq!(window.effective_length(), 10);

        window.apply_partial(&partial_with_positions(1, &[0, 1, 2], b'A'));
        // Mapped bases present: only the 6 inside positions count
        assert_eq!(window.effective_length(), 6);
        let summary = window.finalize().unwrap();
        assert!((summary.mean_coverage - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_outside_window_mirrors_mask() {
        let mask = Arc::new(RegionMask::from_intervals(100, &[(1, 6)]));
        let region = WindowRegion { mask, outside: true };
        let mut window = Window::new(0, 1, 10, true, Some(region), None);
        assert!(!window.position_included(0));
        assert!(window.position_included(6));
        window.apply_partial(&partial_with_positions(1, &[6, 7], b'A'));
        assert_eq!(window.effective_length(), 4);
    }

    #[test]
    fn test_reference_letter_counts_at_creation() {
        let bases = move |absolute: u64| -> u8 {
            if absolute <= 5 { b'G' } else { b'A' }
        };
        let mut window = Window::new(0, 1, 10, false, None, Some(&bases));
        window.apply_partial(&partial_with_positions(1, &[0], b'A'));
        let summary = window.finalize().unwrap();
        assert!((summary.reference_gc_percent.unwrap() - 50.0).abs() < 1e-12);
    }
}
