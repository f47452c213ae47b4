//! Plain per-event fields averaged without weights.

use super::{ReduceError, Reduction};
use crate::record::VariantRecord;
use crate::stats::{weighted_mean_std, Estimate};

/// Unweighted mean and standard error of one scalar per event.
///
/// The extractor returns `None` when the record has no entry for the
/// requested field, which is reported as [`ReduceError::MissingField`].
pub struct ScalarReduction<F> {
    name: &'static str,
    extract: F,
}

impl<F> ScalarReduction<F>
where
    F: Fn(&VariantRecord) -> Option<f64>,
{
    pub fn new(name: &'static str, extract: F) -> Self {
        Self { name, extract }
    }
}

impl<F> Reduction for ScalarReduction<F>
where
    F: Fn(&VariantRecord) -> Option<f64>,
{
    fn reduce(&self, bin: &[&VariantRecord]) -> Result<Estimate, ReduceError> {
        if bin.is_empty() {
            return Err(ReduceError::Degenerate("empty bin"));
        }
        let values = bin
            .iter()
            .map(|event| (self.extract)(event).ok_or(ReduceError::MissingField(self.name)))
            .collect::<Result<Vec<f64>, _>>()?;
        Ok(weighted_mean_std(&values, None)?)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

pub fn charged_multiplicity() -> impl Reduction {
    ScalarReduction::new("dNch_deta", |e: &VariantRecord| Some(e.dnch_deta))
}

pub fn transverse_energy() -> impl Reduction {
    ScalarReduction::new("dET_deta", |e: &VariantRecord| Some(e.det_deta))
}

/// `dN/dy` of the species at `index` in the configured species list.
pub fn identified_yield(index: usize) -> impl Reduction {
    ScalarReduction::new("dN_dy", move |e: &VariantRecord| e.dn_dy.get(index).copied())
}

/// Mean pT of the species at `index` in the configured species list.
pub fn identified_mean_pt(index: usize) -> impl Reduction {
    ScalarReduction::new("mean_pT", move |e: &VariantRecord| {
        e.mean_pt.get(index).copied()
    })
}
