//! `hicobs synth`: synthetic ensembles for smoke tests of a configuration.

use anyhow::{Context, Result};
use hicobs_core::config::{AnalysisConfig, DesignSet, SourceKind};
use hicobs_sim::{write_design_set, write_manifest, SyntheticParams};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SYNTHETIC_SET: &str = "synthetic";

pub struct SynthArgs {
    pub output_dir: PathBuf,
    pub design_points: usize,
    pub events: usize,
    pub seed: Option<u64>,
    pub source: SourceKind,
    pub params: Option<PathBuf>,
}

/// `[[design_sets]]` entry matching what was generated, ready to paste
/// into the analysis configuration.
#[derive(Serialize)]
struct DesignSetsFile<'a> {
    design_sets: &'a [DesignSet],
}

fn load_params(path: Option<&Path>) -> Result<SyntheticParams> {
    let Some(path) = path else {
        return Ok(SyntheticParams::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Design set pointing at `output_dir`.
pub fn synthetic_set(output_dir: &Path, design_points: usize, source: SourceKind) -> DesignSet {
    DesignSet {
        name: SYNTHETIC_SET.to_string(),
        n_design: design_points,
        source,
        events_dir: format!("{}/{{system}}", output_dir.display()),
        output: output_dir.join("Obs").join(format!("{}.dat", SYNTHETIC_SET)),
    }
}

pub fn generate(config: &AnalysisConfig, args: &SynthArgs) -> Result<DesignSet> {
    let mut params = load_params(args.params.as_deref())?;
    if let Some(seed) = args.seed {
        params.seed = seed;
    }
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let set = synthetic_set(&args.output_dir, args.design_points, args.source);
    let rows = write_design_set(config, &set, &params, args.events)?;
    write_manifest(&args.output_dir.join("manifest.csv"), &rows)?;

    let snippet = toml::to_string_pretty(&DesignSetsFile {
        design_sets: std::slice::from_ref(&set),
    })?;
    fs::write(args.output_dir.join("design_set.toml"), snippet)?;

    info!(
        output_dir = %args.output_dir.display(),
        systems = config.systems.len(),
        design_points = args.design_points,
        events = args.events,
        seed = params.seed,
        "Synthetic design set written"
    );
    Ok(set)
}

pub fn synth(config_path: &Path, args: &SynthArgs) -> Result<()> {
    let config = crate::load_config(config_path)?;
    generate(&config, args).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect;
    use hicobs_core::driver::Driver;
    use hicobs_core::observable::Observable;

    const CONFIG: &str = r#"
n_idf = 2
n_harmonic = 3
n_harmonic_diff = 2
species = ["pion", "kaon"]
pt_bins = [[0.0, 1.0], [1.0, 3.0]]

[[systems]]
name = "Pb-Pb-2760"

[[systems.observables]]
name = "dNch_deta"
bins = [[0, 20], [20, 100]]

[[systems.observables]]
name = "v22"
bins = [[0, 100]]
"#;

    fn args(dir: &Path, source: SourceKind) -> SynthArgs {
        SynthArgs {
            output_dir: dir.to_path_buf(),
            design_points: 2,
            events: 60,
            seed: Some(3),
            source,
            params: None,
        }
    }

    #[test]
    fn test_synth_then_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AnalysisConfig::from_toml_str(CONFIG).unwrap();
        let set = generate(&config, &args(dir.path(), SourceKind::PerEvent)).unwrap();
        assert!(dir.path().join("manifest.csv").is_file());
        assert!(dir.path().join("Pb-Pb-2760/1").is_dir());

        config.design_sets.push(set);
        let driver = Driver::new(config.clone());
        let summaries = driver.run(Some(SYNTHETIC_SET)).unwrap();
        let records = driver
            .output_layout()
            .read_all(&summaries[0].output)
            .unwrap();
        assert_eq!(records.len(), 2);

        let slot = driver
            .output_layout()
            .slot_index(0, &Observable::Flow { harmonic: 2 })
            .unwrap();
        let v2 = records[0].get(0, 0, slot).unwrap();
        assert!((v2.mean[0] - 0.08).abs() < 0.03, "v2 = {}", v2.mean[0]);

        let rows = inspect::rows(&config, driver.output_layout(), &records);
        assert_eq!(rows.len(), 2 * 2 * 3);
    }

    #[test]
    fn test_design_set_snippet_parses() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig::from_toml_str(CONFIG).unwrap();
        generate(&config, &args(dir.path(), SourceKind::Concatenated)).unwrap();

        let snippet = fs::read_to_string(dir.path().join("design_set.toml")).unwrap();
        let full = format!("{}\n{}", CONFIG, snippet);
        let again = AnalysisConfig::from_toml_str(&full).unwrap();
        let set = again.design_set(SYNTHETIC_SET).unwrap();
        assert_eq!(set.n_design, 2);
        assert!(set.design_path("Pb-Pb-2760", 0).is_file());
    }
}
