//! Centrality Binning
//!
//! Maps percentile bin edges onto index ranges of an ensemble that has
//! already been sorted by event activity (most central first). The binner
//! never sorts; see [`crate::ensemble::VariantView`].

use core::ops::Range;
use serde::{Deserialize, Serialize};

/// A `[low, high)` percentile interval, `0 <= low <= high <= 100`.
///
/// Serialized as a two-element array, e.g. `[0, 5]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct CentralityBin {
    pub low: f64,
    pub high: f64,
}

impl From<[f64; 2]> for CentralityBin {
    fn from([low, high]: [f64; 2]) -> Self {
        Self { low, high }
    }
}

impl From<CentralityBin> for [f64; 2] {
    fn from(bin: CentralityBin) -> Self {
        [bin.low, bin.high]
    }
}

/// How to treat a bin whose index range collapses to zero width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePolicy {
    /// Widen an empty range to exactly one event.
    Widen,
    /// Keep the empty range; the reduction reports a degenerate bin.
    Exact,
}

impl CentralityBin {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Bin label reported alongside results.
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.low + self.high)
    }

    pub fn is_valid(&self) -> bool {
        self.low.is_finite()
            && self.high.is_finite()
            && 0.0 <= self.low
            && self.low <= self.high
            && self.high <= 100.0
    }

    /// Event-index range `floor(low/100·n) .. floor(high/100·n)`, clamped to `n`.
    pub fn index_range(&self, n_events: usize, policy: EdgePolicy) -> Range<usize> {
        let lo = percentile_index(self.low, n_events);
        let mut hi = percentile_index(self.high, n_events).max(lo);
        if policy == EdgePolicy::Widen && hi <= lo {
            hi = lo + 1;
        }
        let hi = hi.min(n_events);
        lo.min(hi)..hi
    }
}

/// Multiplies before dividing so that integer percentiles of integer
/// ensemble sizes land exactly on their index.
fn percentile_index(percent: f64, n_events: usize) -> usize {
    (percent * n_events as f64 / 100.0).floor() as usize
}

/// Index ranges for every bin of a schedule.
pub fn index_ranges(bins: &[CentralityBin], n_events: usize, policy: EdgePolicy) -> Vec<Range<usize>> {
    bins.iter()
        .map(|bin| bin.index_range(n_events, policy))
        .collect()
}

pub fn midpoints(bins: &[CentralityBin]) -> Vec<f64> {
    bins.iter().map(CentralityBin::midpoint).collect()
}
