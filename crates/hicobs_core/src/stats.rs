//! Weighted Statistics
//!
//! Weighted mean and standard error of the mean for per-event samples.
//! Every uncertainty reported by the aggregators is produced by
//! [`weighted_mean_std`]; reductions never recompute variances themselves.
//!
//! The error uses the Kish effective sample size
//! `N_eff = (Σw)² / Σw²` as denominator (`N_eff = N` for unweighted input):
//!
//! ```text
//! err = sqrt( <(x - <x>_w)²>_w / (N_eff - 1 + ε) )
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Regulator for the effective-sample-size denominator so a single sample
/// yields a finite error.
pub const NEFF_EPSILON: f64 = 1e-9;

/// A mean together with its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Estimate {
    pub mean: f64,
    pub err: f64,
}

impl Estimate {
    /// Value reported for degenerate bins.
    pub const ZERO: Estimate = Estimate {
        mean: 0.0,
        err: 0.0,
    };

    pub fn new(mean: f64, err: f64) -> Self {
        Self { mean, err }
    }

    pub fn is_finite(&self) -> bool {
        self.mean.is_finite() && self.err.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatsError {
    /// Ragged or otherwise unusable input. Indicates a bug in the caller.
    #[error("invalid statistics input: {0}")]
    InvalidInput(String),
    /// No samples at all; callers treat this as a degenerate bin.
    #[error("empty sample")]
    EmptySample,
}

/// Weighted mean and standard error of the mean.
///
/// With `weights == None` every sample has equal weight and the result is the
/// sample mean with `std / sqrt(N - 1 + ε)` as error, `std` being the
/// population standard deviation.
pub fn weighted_mean_std(values: &[f64], weights: Option<&[f64]>) -> Result<Estimate, StatsError> {
    if values.is_empty() {
        return Err(StatsError::EmptySample);
    }

    let Some(weights) = weights else {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        return Ok(Estimate::new(
            mean,
            variance.sqrt() / (n - 1.0 + NEFF_EPSILON).sqrt(),
        ));
    };

    if weights.len() != values.len() {
        return Err(StatsError::InvalidInput(format!(
            "{} values but {} weights",
            values.len(),
            weights.len()
        )));
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(StatsError::InvalidInput(format!(
            "weight {} is negative or not finite",
            w
        )));
    }

    let sum_w: f64 = weights.iter().sum();
    if sum_w <= 0.0 {
        return Err(StatsError::InvalidInput("weights sum to zero".into()));
    }
    let sum_w2: f64 = weights.iter().map(|w| w * w).sum();
    let n_eff = sum_w * sum_w / sum_w2;

    let mean = values
        .iter()
        .zip(weights)
        .map(|(x, w)| x * w)
        .sum::<f64>()
        / sum_w;
    let variance = values
        .iter()
        .zip(weights)
        .map(|(x, w)| w * (x - mean).powi(2))
        .sum::<f64>()
        / sum_w;

    Ok(Estimate::new(
        mean,
        (variance / (n_eff - 1.0 + NEFF_EPSILON)).sqrt(),
    ))
}
