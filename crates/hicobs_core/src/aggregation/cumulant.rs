//! Two-particle cumulant reductions.
//!
//! Each event contributes a pair-normalised correlator together with its
//! number of pairs as weight. Events without pairs carry no information and
//! are left out of the sample; a bin where no event has pairs is degenerate.

use super::{ReduceError, Reduction};
use crate::record::{FlowVector, VariantRecord};
use crate::stats::{weighted_mean_std, Estimate};

/// Per-event correlators and pair weights of one bin.
#[derive(Debug, Default)]
struct WeightedSample {
    values: Vec<f64>,
    weights: Vec<f64>,
}

impl WeightedSample {
    fn with_capacity(n: usize) -> Self {
        Self {
            values: Vec::with_capacity(n),
            weights: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, value: f64, weight: f64) {
        if weight > 0.0 {
            self.values.push(value);
            self.weights.push(weight);
        }
    }

    fn estimate(&self) -> Result<Estimate, ReduceError> {
        if self.values.is_empty() {
            return Err(ReduceError::Degenerate("no particle pairs"));
        }
        Ok(weighted_mean_std(&self.values, Some(&self.weights))?)
    }
}

/// Relative dynamical mean-pT fluctuation `sqrt(<Δp Δp>) / <pT>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtFluctuation;

impl Reduction for PtFluctuation {
    fn reduce(&self, bin: &[&VariantRecord]) -> Result<Estimate, ReduceError> {
        let sum_pt: f64 = bin.iter().map(|e| e.pt_sums.sum_pt).sum();
        let n_total: f64 = bin.iter().map(|e| e.pt_sums.n as f64).sum();
        if sum_pt <= 0.0 || n_total <= 0.0 {
            return Err(ReduceError::Degenerate("no transverse momentum in bin"));
        }
        let m = sum_pt / n_total;

        let mut sample = WeightedSample::with_capacity(bin.len());
        for event in bin {
            let sums = &event.pt_sums;
            let n = sums.n as f64;
            let pairs = 0.5 * n * (n - 1.0);
            if pairs <= 0.0 {
                continue;
            }
            // Σ_{i<j} (p_i - M)(p_j - M) expressed through Σp and Σp²
            let x = (0.5 * (sums.sum_pt * sums.sum_pt - sums.sum_pt2)
                - m * (n - 1.0) * sums.sum_pt
                + m * m * pairs)
                / pairs;
            sample.push(x, pairs);
        }

        let c = sample.estimate()?;
        let root = c.mean.sqrt();
        Ok(Estimate::new(root / m, c.err * 0.5 / root / m))
    }

    fn name(&self) -> &'static str {
        "pT_fluct"
    }
}

/// Integrated two-particle flow `v_n{2} = sqrt(<<2>>)`.
///
/// A negative cumulant has no real root and is reported as NaN.
#[derive(Debug, Clone, Copy)]
pub struct IntegratedFlow {
    pub harmonic: usize,
}

impl IntegratedFlow {
    pub fn new(harmonic: usize) -> Self {
        Self { harmonic }
    }
}

impl Reduction for IntegratedFlow {
    fn reduce(&self, bin: &[&VariantRecord]) -> Result<Estimate, ReduceError> {
        let mut sample = WeightedSample::with_capacity(bin.len());
        for event in bin {
            let q = event
                .flow
                .harmonic(self.harmonic)
                .ok_or(ReduceError::MissingField("flow.Qn"))?;
            let m = event.flow.n as f64;
            let w = m * (m - 1.0);
            if w > 0.0 {
                sample.push((q.norm_sqr() - m) / w, w);
            }
        }

        let c = sample.estimate()?;
        let vn = c.mean.sqrt();
        Ok(Estimate::new(vn, c.err / 2.0 / vn))
    }

    fn name(&self) -> &'static str {
        "v_n{2}"
    }
}

/// pT-differential flow `v_n{2}(pT) = <<2'>> / v_n{2}` for one pT bin.
///
/// Particles of interest are correlated with the reference Q-vector of the
/// same event. `reference` is the integrated `v_n{2}` of the centrality bin.
#[derive(Debug, Clone, Copy)]
pub struct DifferentialFlow {
    pub harmonic: usize,
    pub pt_bin: usize,
    /// Index into the identified-flow species, `None` for charged particles.
    pub pid: Option<usize>,
    pub reference: f64,
}

impl DifferentialFlow {
    fn particles_of_interest<'a>(&self, event: &'a VariantRecord) -> Option<&'a FlowVector> {
        match self.pid {
            None => event.diff_flow_chg.get(self.pt_bin),
            Some(p) => event.diff_flow_pid.get(p)?.get(self.pt_bin),
        }
    }
}

impl Reduction for DifferentialFlow {
    fn reduce(&self, bin: &[&VariantRecord]) -> Result<Estimate, ReduceError> {
        if self.reference == 0.0 {
            return Err(ReduceError::Degenerate("vanishing reference flow"));
        }

        let mut sample = WeightedSample::with_capacity(bin.len());
        for event in bin {
            let poi = self
                .particles_of_interest(event)
                .ok_or(ReduceError::MissingField("d_flow"))?;
            let q_poi = poi
                .harmonic(self.harmonic)
                .ok_or(ReduceError::MissingField("d_flow.Qn"))?;
            let q_ref = event
                .flow
                .harmonic(self.harmonic)
                .ok_or(ReduceError::MissingField("flow.Qn"))?;
            let w = poi.n as f64 * event.flow.n as f64;
            if w > 0.0 {
                sample.push((q_poi.conj() * q_ref).re / w, w);
            }
        }

        let d = sample.estimate()?;
        Ok(Estimate::new(d.mean / self.reference, d.err / self.reference))
    }

    fn name(&self) -> &'static str {
        "v_n{2}(pT)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PtSums;
    use num_complex::Complex64;

    fn pt_event(n: i64, sum_pt: f64, sum_pt2: f64) -> VariantRecord {
        VariantRecord {
            pt_sums: PtSums {
                n,
                sum_pt,
                sum_pt2,
            },
            ..Default::default()
        }
    }

    fn flow_event(m: i64, q2: Complex64) -> VariantRecord {
        VariantRecord {
            flow: FlowVector {
                n: m,
                qn: vec![Complex64::new(0.0, 0.0), q2],
            },
            ..Default::default()
        }
    }

    // ========================================================================
    // pT fluctuation
    // ========================================================================

    #[test]
    fn test_pt_fluctuation_known_value() {
        // two-particle events with pT {1, 1} and {3, 3}: M = 2, x = 1 each
        let events = [pt_event(2, 2.0, 2.0), pt_event(2, 6.0, 18.0)];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        let est = PtFluctuation.reduce(&bin).unwrap();
        assert!((est.mean - 0.5).abs() < 1e-12);
        assert!(est.err.abs() < 1e-12);
    }

    #[test]
    fn test_pt_fluctuation_without_momentum() {
        let events = [pt_event(0, 0.0, 0.0), pt_event(5, 0.0, 0.0)];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        assert!(matches!(
            PtFluctuation.reduce(&bin),
            Err(ReduceError::Degenerate(_))
        ));
    }

    #[test]
    fn test_pt_fluctuation_skips_single_particle_events() {
        let events = [
            pt_event(1, 5.0, 25.0),
            pt_event(2, 2.0, 2.0),
            pt_event(2, 6.0, 18.0),
        ];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        let est = PtFluctuation.reduce(&bin).unwrap();
        // M = 13 / 5 shifts the correlator but the sample still has two events
        assert!(est.is_finite());
    }

    // ========================================================================
    // Integrated flow
    // ========================================================================

    #[test]
    fn test_integrated_flow_known_value() {
        let events = [flow_event(100, Complex64::new(12.0, 16.0))];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        let est = IntegratedFlow::new(2).reduce(&bin).unwrap();
        // |Q|^2 = 400, c = 300 / 9900
        assert!((est.mean - (300.0f64 / 9900.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_integrated_flow_without_pairs() {
        let events = [
            flow_event(0, Complex64::new(0.0, 0.0)),
            flow_event(1, Complex64::new(1.0, 0.0)),
        ];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        assert!(matches!(
            IntegratedFlow::new(2).reduce(&bin),
            Err(ReduceError::Degenerate(_))
        ));
    }

    #[test]
    fn test_negative_cumulant_is_nan() {
        let events = [flow_event(100, Complex64::new(0.0, 0.0))];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        let est = IntegratedFlow::new(2).reduce(&bin).unwrap();
        assert!(est.mean.is_nan());
    }

    #[test]
    fn test_harmonic_out_of_range() {
        let events = [flow_event(100, Complex64::new(1.0, 0.0))];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        assert!(matches!(
            IntegratedFlow::new(5).reduce(&bin),
            Err(ReduceError::MissingField("flow.Qn"))
        ));
    }

    // ========================================================================
    // Differential flow
    // ========================================================================

    #[test]
    fn test_differential_flow_normalised_by_reference() {
        let mut event = flow_event(50, Complex64::new(0.0, 10.0));
        event.diff_flow_chg = vec![FlowVector {
            n: 5,
            qn: vec![Complex64::new(0.0, 0.0), Complex64::new(0.0, 2.0)],
        }];
        let events = [event];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        let reduction = DifferentialFlow {
            harmonic: 2,
            pt_bin: 0,
            pid: None,
            reference: 0.1,
        };
        let est = reduction.reduce(&bin).unwrap();
        // Re(conj(2i) * 10i) / 250 = 0.08
        assert!((est.mean - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_differential_flow_zero_reference() {
        let events = [flow_event(50, Complex64::new(0.0, 10.0))];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        let reduction = DifferentialFlow {
            harmonic: 2,
            pt_bin: 0,
            pid: None,
            reference: 0.0,
        };
        assert!(matches!(
            reduction.reduce(&bin),
            Err(ReduceError::Degenerate(_))
        ));
    }

    #[test]
    fn test_differential_flow_missing_pid_species() {
        let events = [flow_event(50, Complex64::new(0.0, 10.0))];
        let bin: Vec<&VariantRecord> = events.iter().collect();
        let reduction = DifferentialFlow {
            harmonic: 2,
            pt_bin: 0,
            pid: Some(0),
            reference: 0.1,
        };
        assert!(matches!(
            reduction.reduce(&bin),
            Err(ReduceError::MissingField("d_flow"))
        ));
    }
}
