//! Hybrid dense/overflow histogram engine.
//!
//! Per-position values (coverage, mapping quality, insert size) are counted
//! into a fixed-size dense array for small values — an O(1) increment on the
//! hot path — with a hash map catching the long tail. Finalization merges the
//! two into a value-sorted frequency vector and derives the cumulative
//! distribution and the bounded quota curve.

use ahash::AHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Default size of the dense cache: values below this are array increments.
pub const DEFAULT_CACHE_SIZE: usize = 2000;

/// Default upper bound of the quota curve.
pub const DEFAULT_MAX_QUOTA: u64 = 50;

/// Accumulating histogram over non-negative integer values.
#[derive(Debug, Clone)]
pub struct Histogram {
    cache: Vec<u64>,
    overflow: AHashMap<u64, u64>,
}

impl Histogram {
    /// Create a histogram with the given dense-cache size.
    #[must_use]
    pub fn new(cache_size: usize) -> Self {
        Self { cache: vec![0; cache_size], overflow: AHashMap::new() }
    }

    /// Count one occurrence of `value`.
    #[inline]
    pub fn add(&mut self, value: u64) {
        self.add_n(value, 1);
    }

    /// Count `n` occurrences of `value`.
    #[inline]
    pub fn add_n(&mut self, value: u64, n: u64) {
        if (value as usize) < self.cache.len() {
            self.cache[value as usize] += n;
        } else {
            *self.overflow.entry(value).or_insert(0) += n;
        }
    }

    /// Total number of occurrences counted so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.cache.iter().sum::<u64>() + self.overflow.values().sum::<u64>()
    }

    /// Merge cache and overflow into the finalized, sorted form.
    ///
    /// Zero-frequency cache entries are skipped; both storage paths yield
    /// identical output for identical inputs.
    #[must_use]
    pub fn finalize(self, max_quota: u64) -> FinalizedHistogram {
        let mut overflow = self.overflow;
        for (value, &count) in self.cache.iter().enumerate() {
            if count > 0 {
                *overflow.entry(value as u64).or_insert(0) += count;
            }
        }

        let entries: Vec<HistogramEntry> = overflow
            .into_iter()
            .sorted_by_key(|&(value, _)| value)
            .map(|(value, frequency)| HistogramEntry { value, frequency })
            .collect();

        let total: u64 = entries.iter().map(|e| e.frequency).sum();

        let mut running = 0u64;
        let cumulative: Vec<HistogramEntry> = entries
            .iter()
            .map(|e| {
                running += e.frequency;
                HistogramEntry { value: e.value, frequency: running }
            })
            .collect();

        // quota[x] = % of counted positions whose value is >= x
        let mut quota = Vec::with_capacity(max_quota as usize);
        for threshold in 1..=max_quota {
            let at_least: u64 = entries
                .iter()
                .filter(|e| e.value >= threshold)
                .map(|e| e.frequency)
                .sum();
            let percent =
                if total == 0 { 0.0 } else { at_least as f64 / total as f64 * 100.0 };
            quota.push(QuotaPoint { threshold, percent });
        }

        FinalizedHistogram { entries, cumulative, quota, total }
    }
}

/// One (value, frequency) histogram row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramEntry {
    /// The observed value.
    pub value: u64,
    /// How many positions carried it (or, in the cumulative vector, carried
    /// it or less).
    pub frequency: u64,
}

/// One point of the quota curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaPoint {
    /// The threshold `x`.
    pub threshold: u64,
    /// Percentage of counted positions with value >= `x`.
    pub percent: f64,
}

/// A finalized histogram: sorted frequencies plus derived curves.
#[derive(Debug, Clone, Default)]
pub struct FinalizedHistogram {
    /// (value, frequency) pairs sorted ascending by value.
    pub entries: Vec<HistogramEntry>,
    /// (value, running frequency) pairs: positions with value <= entry value.
    pub cumulative: Vec<HistogramEntry>,
    /// Percentage of positions at or above each threshold in `[1, max_quota]`.
    pub quota: Vec<QuotaPoint>,
    /// Total number of counted positions.
    pub total: u64,
}

impl FinalizedHistogram {
    /// Frequency recorded for an exact value, 0 when absent.
    #[must_use]
    pub fn frequency_of(&self, value: u64) -> u64 {
        self.entries
            .binary_search_by_key(&value, |e| e.value)
            .map(|i| self.entries[i].frequency)
            .unwrap_or(0)
    }
}
