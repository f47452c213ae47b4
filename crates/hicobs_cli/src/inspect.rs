//! Decoding and tabulating output blobs.

use anyhow::{Context, Result};
use hicobs_core::centrality::midpoints;
use hicobs_core::config::{idf_label, AnalysisConfig};
use hicobs_core::output::{DesignPointRecord, OutputLayout};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// One (mean, err) entry of an output record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub design: usize,
    pub system: String,
    pub idf: usize,
    pub idf_label: String,
    pub observable: String,
    pub cen_mid: f64,
    pub pt_bin: Option<usize>,
    pub pt_mid: Option<f64>,
    pub mean: f64,
    pub err: f64,
}

/// Flattens records into rows, design-major in serialization order.
pub fn rows(config: &AnalysisConfig, layout: &OutputLayout, records: &[DesignPointRecord]) -> Vec<Row> {
    let pt_mid = config.pt_midpoints();
    let mut rows = Vec::new();
    for (design, record) in records.iter().enumerate() {
        for (s, (system, aggregate)) in layout.systems.iter().zip(&record.systems).enumerate() {
            for (idf, variant) in aggregate.variants.iter().enumerate() {
                for (slot, values) in system.slots.iter().zip(&variant.observables) {
                    let cen_mid = config
                        .schedule(s, &slot.observable)
                        .map(midpoints)
                        .unwrap_or_default();
                    let differential = slot.observable.is_differential();
                    for (k, estimate) in values.estimates().enumerate() {
                        let (c, p) = (k / slot.n_pt.max(1), k % slot.n_pt.max(1));
                        rows.push(Row {
                            design,
                            system: system.name.clone(),
                            idf,
                            idf_label: idf_label(idf),
                            observable: slot.observable.to_string(),
                            cen_mid: cen_mid.get(c).copied().unwrap_or(f64::NAN),
                            pt_bin: differential.then_some(p),
                            pt_mid: if differential { pt_mid.get(p).copied() } else { None },
                            mean: estimate.mean,
                            err: estimate.err,
                        });
                    }
                }
            }
        }
    }
    rows
}

/// Per-observable health of a blob: how many design points left the slot
/// zero-filled and how many entries are not finite.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SlotSummary {
    pub system: String,
    pub observable: String,
    pub zero_filled: usize,
    pub non_finite: usize,
}

pub fn summarize(layout: &OutputLayout, records: &[DesignPointRecord]) -> Vec<SlotSummary> {
    let mut summaries = Vec::new();
    for (s, system) in layout.systems.iter().enumerate() {
        for (k, slot) in system.slots.iter().enumerate() {
            let mut summary = SlotSummary {
                system: system.name.clone(),
                observable: slot.observable.to_string(),
                ..Default::default()
            };
            for record in records {
                let variants = (0..layout.n_idf).filter_map(|idf| record.get(s, idf, k));
                let mut all_zero = true;
                for values in variants {
                    all_zero &= values.is_zero();
                    summary.non_finite += values
                        .estimates()
                        .filter(|e| !e.is_finite())
                        .count();
                }
                if all_zero {
                    summary.zero_filled += 1;
                }
            }
            summaries.push(summary);
        }
    }
    summaries
}

pub fn inspect(config_path: &Path, input: &Path, csv_path: Option<&Path>, json: bool) -> Result<()> {
    let config = crate::load_config(config_path)?;
    let layout = OutputLayout::from_config(&config);
    let records = layout
        .read_all(input)
        .with_context(|| format!("reading {}", input.display()))?;
    info!(
        input = %input.display(),
        design_points = records.len(),
        record_size = layout.record_size(),
        "Decoded output blob"
    );

    if let Some(path) = csv_path {
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        for row in rows(&config, &layout, &records) {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        info!(output = %path.display(), "CSV written");
    }

    if json {
        for row in rows(&config, &layout, &records) {
            println!("{}", serde_json::to_string(&row)?);
        }
    } else if csv_path.is_none() {
        println!("{} design points, {} bytes each", records.len(), layout.record_size());
        for s in summarize(&layout, &records) {
            println!(
                "{:<16} {:<16} zero-filled {:>5}  non-finite {:>5}",
                s.system, s.observable, s.zero_filled, s.non_finite
            );
        }
    }
    Ok(())
}
