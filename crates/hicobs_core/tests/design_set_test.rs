//! End-to-end tests: event files on disk -> driver -> output blob -> decode.

use hicobs_core::config::AnalysisConfig;
use hicobs_core::driver::Driver;
use hicobs_core::observable::Observable;
use hicobs_core::output::DesignPointRecord;
use hicobs_core::record::{EventRecord, RecordLayout};
use num_complex::Complex64;
use std::fs;
use std::path::Path;

/// Two systems; the second schedules neither flow nor pT fluctuation.
fn config(events_dir: &Path, output: &Path, n_design: usize, source: &str) -> AnalysisConfig {
    let text = format!(
        r#"
n_idf = 2
n_harmonic = 3
n_harmonic_diff = 2
species = ["pion", "kaon"]
pt_bins = [[0.0, 1.0], [1.0, 2.0]]

[[systems]]
name = "Pb-Pb-2760"
events_per_design = 100

[[systems.observables]]
name = "dNch_deta"
bins = [[0, 50], [50, 100]]

[[systems.observables]]
name = "pT_fluct"
bins = [[0, 50], [50, 100]]

[[systems.observables]]
name = "v22"
bins = [[0, 50], [50, 100]]

[[systems.observables]]
name = "v22_pT_chg"
bins = [[0, 100]]

[[systems]]
name = "Au-Au-200"

[[systems.observables]]
name = "dNch_deta"
bins = [[0, 10]]

[[systems.observables]]
name = "mean_pT_kaon"
bins = [[0, 10], [10, 20]]

[[design_sets]]
name = "main"
n_design = {n_design}
source = "{source}"
events_dir = '{dir}/{{system}}'
output = '{output}'
"#,
        n_design = n_design,
        source = source,
        dir = events_dir.display(),
        output = output.display(),
    );
    AnalysisConfig::from_toml_str(&text).unwrap()
}

/// Events with multiplicities `1..=n` in scrambled file order and no flow.
fn events(layout: &RecordLayout, n: usize) -> Vec<EventRecord> {
    (0..n)
        .map(|i| {
            let m = ((i * 37) % n + 1) as f64;
            let mut record = layout.empty_record();
            for v in record.variants.iter_mut() {
                v.dnch_deta = m;
                v.dn_dy = vec![0.8 * m, 0.2 * m];
                v.mean_pt = vec![0.5, 0.8];
            }
            record
        })
        .collect()
}

fn write_concatenated(path: &Path, layout: &RecordLayout, events: &[EventRecord]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut bytes = Vec::new();
    for e in events {
        layout.encode(e, &mut bytes).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

fn run(config: AnalysisConfig) -> (Driver, Vec<DesignPointRecord>) {
    let driver = Driver::new(config);
    let summaries = driver.run(Some("main")).unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].failed.is_empty());
    let records = driver
        .output_layout()
        .read_all(&summaries[0].output)
        .unwrap();
    (driver, records)
}

#[test]
fn test_multiplicity_bins_match_sorted_halves() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir.path().join("events"),
        &dir.path().join("obs/main.dat"),
        1,
        "concatenated",
    );
    let layout = RecordLayout::from_config(&config);
    let set = config.design_set("main").unwrap().clone();
    for system in &config.systems {
        write_concatenated(&set.design_path(&system.name, 0), &layout, &events(&layout, 100));
    }

    let (driver, records) = run(config);
    assert_eq!(records.len(), 1);

    let slot = driver
        .output_layout()
        .slot_index(0, &Observable::ChargedMultiplicity)
        .unwrap();
    for idf in 0..2 {
        let dnch = records[0].get(0, idf, slot).unwrap();
        // top 50 of 1..=100 average 75.5, bottom 50 average 25.5
        assert_eq!(dnch.mean, vec![75.5, 25.5]);
        assert!(dnch.err.iter().all(|e| *e > 0.0 && e.is_finite()));
    }
}

#[test]
fn test_degenerate_cumulants_report_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir.path().join("events"),
        &dir.path().join("main.dat"),
        1,
        "concatenated",
    );
    let layout = RecordLayout::from_config(&config);
    let set = config.design_set("main").unwrap().clone();
    // M = 0 and Σ sum_pT = 0 in every event
    for system in &config.systems {
        write_concatenated(&set.design_path(&system.name, 0), &layout, &events(&layout, 100));
    }

    let (driver, records) = run(config);
    let out = driver.output_layout();
    for name in ["pT_fluct", "v22", "v22_pT_chg"] {
        let slot = out.slot_index(0, &name.parse().unwrap()).unwrap();
        for idf in 0..2 {
            let agg = records[0].get(0, idf, slot).unwrap();
            assert!(agg.is_zero(), "{} idf {} = {:?}", name, idf, agg);
        }
    }
}

#[test]
fn test_output_roundtrip_with_nan() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir.path().join("events"),
        &dir.path().join("main.dat"),
        1,
        "concatenated",
    );
    let layout = RecordLayout::from_config(&config);
    let set = config.design_set("main").unwrap().clone();

    // Q_2 = 0 with M = 100 gives a negative cumulant and v2 = NaN
    let mut ensemble = events(&layout, 20);
    for record in ensemble.iter_mut() {
        for v in record.variants.iter_mut() {
            v.flow.n = 100;
            v.flow.qn[0] = Complex64::new(3.0, -4.0);
        }
    }
    for system in &config.systems {
        write_concatenated(&set.design_path(&system.name, 0), &layout, &ensemble);
    }

    let driver = Driver::new(config);
    let result = driver.run_design_set(&set);
    let out = driver.output_layout();
    let slot = out.slot_index(0, &Observable::Flow { harmonic: 2 }).unwrap();
    assert!(result.records[0].get(0, 0, slot).unwrap().mean[0].is_nan());

    let mut bytes = Vec::new();
    out.encode(&result.records[0], &mut bytes).unwrap();
    assert_eq!(bytes.len(), out.record_size());
    let decoded = out.decode(&bytes).unwrap();
    assert!(decoded.nan_eq(&result.records[0]));
}

#[test]
fn test_unscheduled_observables_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir.path().join("events"),
        &dir.path().join("main.dat"),
        1,
        "concatenated",
    );
    let layout = RecordLayout::from_config(&config);
    let set = config.design_set("main").unwrap().clone();
    for system in &config.systems {
        write_concatenated(&set.design_path(&system.name, 0), &layout, &events(&layout, 50));
    }

    let (driver, records) = run(config);
    let out = driver.output_layout();
    assert!(out.slot_index(1, &Observable::Flow { harmonic: 2 }).is_none());
    assert!(out.slot_index(1, &Observable::PtFluctuation).is_none());

    let system = &records[0].systems[1];
    assert_eq!(system.variants.len(), 2);
    assert_eq!(system.variants[0].observables.len(), 2);
    let mean_pt = out
        .slot_index(1, &Observable::MeanPt("kaon".into()))
        .unwrap();
    let kaon = &system.variants[0].observables[mean_pt];
    assert_eq!(kaon.mean.len(), 2);
    assert!(kaon.mean.iter().all(|m| (m - 0.8).abs() < 1e-12));
}

#[test]
fn test_missing_design_point_keeps_zero_record() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir.path().join("events"),
        &dir.path().join("main.dat"),
        3,
        "concatenated",
    );
    let layout = RecordLayout::from_config(&config);
    let set = config.design_set("main").unwrap().clone();
    for design in [0, 2] {
        for system in &config.systems {
            write_concatenated(
                &set.design_path(&system.name, design),
                &layout,
                &events(&layout, 40),
            );
        }
    }

    let (driver, records) = run(config);
    assert_eq!(records.len(), 3);
    assert!(records[1].nan_eq(&driver.output_layout().allocate()));
    let slot = driver
        .output_layout()
        .slot_index(0, &Observable::ChargedMultiplicity)
        .unwrap();
    assert!(!records[0].get(0, 0, slot).unwrap().is_zero());
    assert!(!records[2].get(0, 0, slot).unwrap().is_zero());
}

#[test]
fn test_per_event_source_skips_unreadable_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &dir.path().join("events"),
        &dir.path().join("main.dat"),
        1,
        "per_event",
    );
    let layout = RecordLayout::from_config(&config);
    let set = config.design_set("main").unwrap().clone();
    for system in &config.systems {
        let design_dir = set.design_path(&system.name, 0);
        fs::create_dir_all(&design_dir).unwrap();
        for (i, event) in events(&layout, 10).iter().enumerate() {
            let mut bytes = Vec::new();
            layout.encode(event, &mut bytes).unwrap();
            fs::write(design_dir.join(format!("{:03}.dat", i)), bytes).unwrap();
        }
        fs::write(design_dir.join("999.dat"), [0u8; 7]).unwrap();
    }

    let (driver, records) = run(config);
    let slot = driver
        .output_layout()
        .slot_index(0, &Observable::ChargedMultiplicity)
        .unwrap();
    // multiplicities 1..=10: top half averages 8, bottom half 3
    assert_eq!(records[0].get(0, 1, slot).unwrap().mean, vec![8.0, 3.0]);
}
