//! Design-point driver.
//!
//! Runs LOAD -> (SORT -> AGGREGATE per idf) -> SERIALIZE for every design
//! point of a design set. Design points are independent and processed with
//! a rayon parallel map; a failing design point is logged and keeps its
//! zero-filled record so the batch always produces `n_design` records.

use crate::aggregation::{aggregate_observable, AggregateError};
use crate::config::{idf_label, AnalysisConfig, DesignSet};
use crate::ensemble::{self, Ensemble, VariantView};
use crate::observable::Observable;
use crate::output::{DesignPointRecord, OutputError, OutputLayout, SystemAggregate};
use crate::record::RecordLayout;
use rayon::prelude::*;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("no system with index {0}")]
    UnknownSystem(usize),
    #[error("`{observable}` is scheduled for {system} but has no output slot")]
    MissingSlot { system: String, observable: String },
    #[error("no design set named `{0}`")]
    UnknownDesignSet(String),
}

/// Outcome of one design set.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub set: String,
    pub design_points: usize,
    /// Design points whose record was left zero-filled after an error.
    pub failed: Vec<usize>,
    pub output: PathBuf,
}

/// Records of one design set in design order.
#[derive(Debug)]
pub struct DesignSetResult {
    pub records: Vec<DesignPointRecord>,
    pub failed: Vec<usize>,
}

pub struct Driver {
    config: AnalysisConfig,
    record_layout: RecordLayout,
    output_layout: OutputLayout,
    catalogue: Vec<Observable>,
}

impl Driver {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            record_layout: RecordLayout::from_config(&config),
            output_layout: OutputLayout::from_config(&config),
            catalogue: config.catalogue(),
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn record_layout(&self) -> &RecordLayout {
        &self.record_layout
    }

    pub fn output_layout(&self) -> &OutputLayout {
        &self.output_layout
    }

    /// Aggregates every scheduled observable of one system for every idf.
    pub fn aggregate_system(
        &self,
        system: usize,
        ensemble: &Ensemble,
    ) -> Result<SystemAggregate, DriverError> {
        let layout = self
            .output_layout
            .systems
            .get(system)
            .ok_or(DriverError::UnknownSystem(system))?;
        let mut aggregate = layout.allocate(self.config.n_idf);

        for (idf, variant) in aggregate.variants.iter_mut().enumerate() {
            let view = VariantView::sorted_by_multiplicity(&ensemble.events, idf);
            info!(
                system = %layout.name,
                idf = %idf_label(idf),
                events = view.len(),
                empty_events = view.empty_events(),
                "Sorted ensemble by charged multiplicity"
            );

            for observable in &self.catalogue {
                let Some(bins) = self.config.schedule(system, observable) else {
                    debug!(system = %layout.name, observable = %observable, "No schedule, skipping");
                    continue;
                };
                let slot = self
                    .output_layout
                    .slot_index(system, observable)
                    .ok_or_else(|| DriverError::MissingSlot {
                        system: layout.name.clone(),
                        observable: observable.to_string(),
                    })?;
                let series = aggregate_observable(observable, &view, bins, &self.config)?;
                variant.observables[slot].fill(&series.values)?;
            }
        }
        Ok(aggregate)
    }

    /// Loads and aggregates one design point for every system.
    pub fn process_design_point(
        &self,
        set: &DesignSet,
        design: usize,
    ) -> Result<DesignPointRecord, DriverError> {
        let mut record = DesignPointRecord::default();
        for (index, system) in self.config.systems.iter().enumerate() {
            let path = set.design_path(&system.name, design);
            let ensemble = ensemble::load(set.source, &path, &self.record_layout);
            if system.events_per_design > 0 && ensemble.len() != system.events_per_design {
                warn!(
                    set = %set.name,
                    design,
                    system = %system.name,
                    loaded = ensemble.len(),
                    expected = system.events_per_design,
                    "Unexpected number of events"
                );
            }
            record.systems.push(self.aggregate_system(index, &ensemble)?);
        }
        info!(set = %set.name, design, "Design point aggregated");
        Ok(record)
    }

    /// Processes every design point of `set` in parallel, in design order.
    pub fn run_design_set(&self, set: &DesignSet) -> DesignSetResult {
        info!(set = %set.name, design_points = set.n_design, source = ?set.source, "Processing design set");
        self.collect_design_points(set, |design| self.process_design_point(set, design))
    }

    /// Runs `process` for every design point of `set` and replaces failures
    /// with zero records.
    fn collect_design_points<F>(&self, set: &DesignSet, process: F) -> DesignSetResult
    where
        F: Fn(usize) -> Result<DesignPointRecord, DriverError> + Sync + Send,
    {
        let results: Vec<Result<DesignPointRecord, DriverError>> =
            (0..set.n_design).into_par_iter().map(process).collect();

        let mut failed = Vec::new();
        let records = results
            .into_iter()
            .enumerate()
            .map(|(design, result)| {
                result.unwrap_or_else(|e| {
                    warn!(set = %set.name, design, error = %e, "Design point failed, keeping zero record");
                    failed.push(design);
                    self.output_layout.allocate()
                })
            })
            .collect();
        DesignSetResult { records, failed }
    }

    /// Runs `set` and writes its output blob.
    pub fn write_design_set(&self, set: &DesignSet) -> Result<BatchSummary, DriverError> {
        let result = self.run_design_set(set);
        self.output_layout.write_all(&result.records, &set.output)?;
        info!(
            set = %set.name,
            output = %set.output.display(),
            records = result.records.len(),
            failed = result.failed.len(),
            "Design set written"
        );
        Ok(BatchSummary {
            set: set.name.clone(),
            design_points: result.records.len(),
            failed: result.failed,
            output: set.output.clone(),
        })
    }

    /// Runs the named design set, or all of them when `name` is `None`.
    pub fn run(&self, name: Option<&str>) -> Result<Vec<BatchSummary>, DriverError> {
        let sets: Vec<&DesignSet> = match name {
            Some(name) => vec![self
                .config
                .design_set(name)
                .ok_or_else(|| DriverError::UnknownDesignSet(name.to_string()))?],
            None => self.config.design_sets.iter().collect(),
        };
        sets.into_iter()
            .map(|set| self.write_design_set(set))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventRecord;

    fn config() -> AnalysisConfig {
        AnalysisConfig::from_toml_str(
            r#"
n_idf = 2
n_harmonic = 2
n_harmonic_diff = 1
species = ["pion"]

[[systems]]
name = "Pb-Pb-2760"

[[systems.observables]]
name = "dNch_deta"
bins = [[0, 50], [50, 100]]

[[systems.observables]]
name = "dN_dy_pion"
bins = [[0, 100]]
"#,
        )
        .unwrap()
    }

    fn ensemble(driver: &Driver, n: usize) -> Ensemble {
        let events: Vec<EventRecord> = (0..n)
            .map(|i| {
                let mut record = driver.record_layout().empty_record();
                for (idf, v) in record.variants.iter_mut().enumerate() {
                    v.dnch_deta = (i + 1) as f64 * (idf + 1) as f64;
                    v.dn_dy[0] = 2.0;
                }
                record
            })
            .collect();
        Ensemble::from_events(events)
    }

    #[test]
    fn test_aggregate_system_per_idf() {
        let driver = Driver::new(config());
        let aggregate = driver.aggregate_system(0, &ensemble(&driver, 4)).unwrap();
        // idf 0: 4,3 | 2,1 ; idf 1: doubled
        assert_eq!(aggregate.variants[0].observables[0].mean, vec![3.5, 1.5]);
        assert_eq!(aggregate.variants[1].observables[0].mean, vec![7.0, 3.0]);
        assert_eq!(aggregate.variants[1].observables[1].mean, vec![2.0]);
    }

    #[test]
    fn test_empty_ensemble_keeps_zero_record() {
        let driver = Driver::new(config());
        let aggregate = driver
            .aggregate_system(0, &Ensemble::default())
            .unwrap();
        assert!(aggregate
            .variants
            .iter()
            .flat_map(|v| &v.observables)
            .all(|o| o.is_zero()));
    }

    #[test]
    fn test_failed_design_point_keeps_zero_record() {
        let driver = Driver::new(config());
        let set: DesignSet = toml::from_str(
            r#"
name = "main"
n_design = 3
events_dir = "unused/{system}"
output = "unused.dat"
"#,
        )
        .unwrap();
        let good = ensemble(&driver, 4);
        // records without species arrays cannot feed dN_dy_pion
        let mut bad = ensemble(&driver, 4);
        for record in &mut bad.events {
            for v in &mut record.variants {
                v.dn_dy.clear();
            }
        }

        let result = driver.collect_design_points(&set, |design| {
            let ensemble = if design == 1 { &bad } else { &good };
            Ok(DesignPointRecord {
                systems: vec![driver.aggregate_system(0, ensemble)?],
            })
        });

        assert_eq!(result.failed, vec![1]);
        assert_eq!(result.records.len(), 3);
        for design in [0, 2] {
            let multiplicity = &result.records[design].systems[0].variants[0].observables[0];
            assert_eq!(multiplicity.mean, vec![3.5, 1.5]);
        }
        assert!(result.records[1]
            .systems
            .iter()
            .flat_map(|s| &s.variants)
            .flat_map(|v| &v.observables)
            .all(|o| o.is_zero()));
    }

    #[test]
    fn test_unknown_system() {
        let driver = Driver::new(config());
        assert!(matches!(
            driver.aggregate_system(3, &Ensemble::default()),
            Err(DriverError::UnknownSystem(3))
        ));
    }

    #[test]
    fn test_unknown_design_set() {
        let driver = Driver::new(config());
        assert!(matches!(
            driver.run(Some("validation")),
            Err(DriverError::UnknownDesignSet(_))
        ));
    }
}
