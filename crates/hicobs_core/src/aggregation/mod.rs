//! Centrality-binned observable reductions.
//!
//! Every observable is computed the same way: slice the multiplicity-sorted
//! view of one idf over each centrality bin, then hand the slice to a
//! [`Reduction`]. Reductions differ only in how a bin is turned into an
//! [`Estimate`]:
//! - scalar fields (multiplicity, transverse energy, identified yields and
//!   mean pT) are plain unweighted averages, see [`scalar`];
//! - cumulants (pT fluctuation, integrated and differential flow) build a
//!   two-particle correlator per event and average it with pair weights,
//!   see [`cumulant`].
//!
//! Degenerate bins (no events, no pairs, vanishing reference flow) are
//! reported as `(0, 0)` by [`reduce_bin`]; genuine input errors propagate.

pub mod cumulant;
pub mod scalar;

pub use cumulant::{DifferentialFlow, IntegratedFlow, PtFluctuation};
pub use scalar::ScalarReduction;

use crate::centrality::{index_ranges, midpoints, CentralityBin, EdgePolicy};
use crate::config::AnalysisConfig;
use crate::ensemble::VariantView;
use crate::observable::{Observable, ParticleSet};
use crate::record::VariantRecord;
use crate::stats::{Estimate, StatsError};
use thiserror::Error;
use tracing::debug;

/// Trait for pluggable per-bin reductions
///
/// Implementations are stateless apart from their configuration and read a
/// single idf variant of each event in the bin.
pub trait Reduction {
    /// Reduce the events of one centrality bin
    fn reduce(&self, bin: &[&VariantRecord]) -> Result<Estimate, ReduceError>;

    /// Human-readable name for logging/debugging
    fn name(&self) -> &'static str;
}

#[derive(Debug, Error)]
pub enum ReduceError {
    /// Nothing to average in this bin; reported as a zero estimate.
    #[error("degenerate bin: {0}")]
    Degenerate(&'static str),
    #[error("event record has no entry for `{0}`")]
    MissingField(&'static str),
    #[error(transparent)]
    Stats(#[from] StatsError),
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("{observable}: species `{species}` is not part of the record layout")]
    UnknownSpecies { observable: String, species: String },
    #[error("{observable}: {source}")]
    Reduce {
        observable: String,
        source: ReduceError,
    },
}

/// Centrality-binned result of one observable.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservableSeries {
    pub observable: Observable,
    pub cen_midpoints: Vec<f64>,
    /// pT-bin midpoints, differential observables only.
    pub pt_midpoints: Option<Vec<f64>>,
    /// Row-major `[centrality bin][pT bin]`.
    pub values: Vec<Estimate>,
}

impl ObservableSeries {
    pub fn means(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.mean).collect()
    }

    pub fn errors(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.err).collect()
    }
}

/// Reduces one bin. Degenerate outcomes become [`Estimate::ZERO`].
pub fn reduce_bin(
    bin: &[&VariantRecord],
    reduction: &dyn Reduction,
) -> Result<Estimate, ReduceError> {
    let reason = match reduction.reduce(bin) {
        Ok(estimate) => return Ok(estimate),
        Err(ReduceError::Degenerate(reason)) => reason,
        Err(ReduceError::Stats(StatsError::EmptySample)) => "empty sample",
        Err(e) => return Err(e),
    };
    debug!(
        reduction = reduction.name(),
        events = bin.len(),
        reason,
        "Degenerate bin reported as zero"
    );
    Ok(Estimate::ZERO)
}

/// Runs `reduction` over every bin of a schedule.
pub fn reduce_bins(
    events: &[&VariantRecord],
    bins: &[CentralityBin],
    policy: EdgePolicy,
    reduction: &dyn Reduction,
) -> Result<Vec<Estimate>, ReduceError> {
    index_ranges(bins, events.len(), policy)
        .into_iter()
        .map(|range| reduce_bin(&events[range], reduction))
        .collect()
}

/// Aggregates `observable` over the bins of `schedule`.
pub fn aggregate_observable(
    observable: &Observable,
    view: &VariantView<'_>,
    schedule: &[CentralityBin],
    config: &AnalysisConfig,
) -> Result<ObservableSeries, AggregateError> {
    let events = view.events();
    let policy = observable.edge_policy();
    let unknown_species = |species: &str| AggregateError::UnknownSpecies {
        observable: observable.to_string(),
        species: species.to_string(),
    };

    let values = match observable {
        Observable::ChargedMultiplicity => {
            reduce_bins(events, schedule, policy, &scalar::charged_multiplicity())
        }
        Observable::TransverseEnergy => {
            reduce_bins(events, schedule, policy, &scalar::transverse_energy())
        }
        Observable::Yield(species) => {
            let index = config
                .species_index(species)
                .ok_or_else(|| unknown_species(species))?;
            reduce_bins(events, schedule, policy, &scalar::identified_yield(index))
        }
        Observable::MeanPt(species) => {
            let index = config
                .species_index(species)
                .ok_or_else(|| unknown_species(species))?;
            reduce_bins(events, schedule, policy, &scalar::identified_mean_pt(index))
        }
        Observable::PtFluctuation => reduce_bins(events, schedule, policy, &PtFluctuation),
        Observable::Flow { harmonic } => {
            reduce_bins(events, schedule, policy, &IntegratedFlow::new(*harmonic))
        }
        Observable::DifferentialFlow {
            harmonic,
            particles,
        } => {
            let pid = match particles {
                ParticleSet::Charged => None,
                ParticleSet::Identified(species) => Some(
                    config
                        .pid_flow_index(species)
                        .ok_or_else(|| unknown_species(species))?,
                ),
            };
            differential_flow(events, schedule, policy, *harmonic, pid, config.pt_bins.len())
        }
    }
    .map_err(|source| AggregateError::Reduce {
        observable: observable.to_string(),
        source,
    })?;

    Ok(ObservableSeries {
        observable: observable.clone(),
        cen_midpoints: midpoints(schedule),
        pt_midpoints: observable.is_differential().then(|| config.pt_midpoints()),
        values,
    })
}

/// `v_n{2}(pT)` for every (centrality, pT) bin, normalised by the integrated
/// `v_n{2}` of the same centrality bin.
fn differential_flow(
    events: &[&VariantRecord],
    schedule: &[CentralityBin],
    policy: EdgePolicy,
    harmonic: usize,
    pid: Option<usize>,
    n_pt_bins: usize,
) -> Result<Vec<Estimate>, ReduceError> {
    let reference = reduce_bins(events, schedule, policy, &IntegratedFlow::new(harmonic))?;
    let ranges = index_ranges(schedule, events.len(), policy);

    let mut values = Vec::with_capacity(schedule.len() * n_pt_bins);
    for (range, v_ref) in ranges.into_iter().zip(&reference) {
        for pt_bin in 0..n_pt_bins {
            let reduction = DifferentialFlow {
                harmonic,
                pt_bin,
                pid,
                reference: v_ref.mean,
            };
            values.push(reduce_bin(&events[range.clone()], &reduction)?);
        }
    }
    Ok(values)
}
