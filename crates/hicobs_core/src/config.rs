//! Analysis configuration.
//!
//! One immutable [`AnalysisConfig`] is loaded at start-up and threaded into
//! the driver and every aggregation call. It carries the record extents,
//! the species list, the per-system centrality schedules and the design sets
//! to process.

use crate::centrality::CentralityBin;
use crate::observable::{Observable, ParticleSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(feature = "cli")]
use clap::ValueEnum;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Viscous-correction prescriptions selected by the model-selection index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViscousCorrection {
    Grad,
    ChapmanEnskog,
    PrattMcNelis,
    PrattBernhard,
}

impl ViscousCorrection {
    pub fn from_index(idf: usize) -> Option<Self> {
        match idf {
            0 => Some(Self::Grad),
            1 => Some(Self::ChapmanEnskog),
            2 => Some(Self::PrattMcNelis),
            3 => Some(Self::PrattBernhard),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Grad => "Grad",
            Self::ChapmanEnskog => "Chapman-Enskog R.T.A",
            Self::PrattMcNelis => "Pratt-McNelis",
            Self::PrattBernhard => "Pratt-Bernhard",
        }
    }

    pub fn short_label(&self) -> &'static str {
        match self {
            Self::Grad => "Grad",
            Self::ChapmanEnskog => "C.E.",
            Self::PrattMcNelis => "P.M.",
            Self::PrattBernhard => "P.B.",
        }
    }
}

/// Label for an idf in logs; indices beyond the known prescriptions print as numbers.
pub fn idf_label(idf: usize) -> String {
    ViscousCorrection::from_index(idf)
        .map(|v| v.short_label().to_string())
        .unwrap_or_else(|| format!("idf{}", idf))
}

/// How the event files of a design point are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// `<events_dir>/<design>.dat` holding all events back to back.
    #[default]
    Concatenated,
    /// `<events_dir>/<design>/` holding one file per event.
    PerEvent,
}

/// Centrality schedule of one observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: Observable,
    pub bins: Vec<CentralityBin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// e.g. "Pb-Pb-2760"
    pub name: String,
    /// Collaboration whose binning the schedules follow, e.g. "ALICE".
    #[serde(default)]
    pub experiment: String,
    /// Expected events per design point; 0 disables the check.
    #[serde(default)]
    pub events_per_design: usize,
    #[serde(default)]
    pub observables: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignSet {
    pub name: String,
    pub n_design: usize,
    #[serde(default)]
    pub source: SourceKind,
    /// Directory of event files; `{system}` is replaced by the system name.
    pub events_dir: String,
    /// Output blob for the whole set.
    pub output: PathBuf,
}

impl DesignSet {
    pub fn events_dir_for(&self, system: &str) -> PathBuf {
        PathBuf::from(self.events_dir.replace("{system}", system))
    }

    /// File (concatenated) or directory (per-event) holding one design point.
    pub fn design_path(&self, system: &str, design: usize) -> PathBuf {
        let dir = self.events_dir_for(system);
        match self.source {
            SourceKind::Concatenated => dir.join(format!("{}.dat", design)),
            SourceKind::PerEvent => dir.join(design.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_n_idf")]
    pub n_idf: usize,
    #[serde(default = "default_n_harmonic")]
    pub n_harmonic: usize,
    #[serde(default = "default_n_harmonic_diff")]
    pub n_harmonic_diff: usize,
    pub species: Vec<String>,
    /// Species with identified differential flow; a subset of `species`.
    #[serde(default)]
    pub pid_flow_species: Vec<String>,
    /// Transverse-momentum bin edges in GeV for differential flow.
    #[serde(default)]
    pub pt_bins: Vec<[f64; 2]>,
    /// Worker threads, 0 for the rayon default.
    #[serde(default)]
    pub threads: usize,
    pub systems: Vec<SystemConfig>,
    #[serde(default)]
    pub design_sets: Vec<DesignSet>,
}

fn default_n_idf() -> usize {
    4
}
fn default_n_harmonic() -> usize {
    8
}
fn default_n_harmonic_diff() -> usize {
    3
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.n_idf == 0 {
            return invalid("n_idf must be at least 1".into());
        }
        if self.n_harmonic_diff > self.n_harmonic {
            return invalid(format!(
                "n_harmonic_diff ({}) exceeds n_harmonic ({})",
                self.n_harmonic_diff, self.n_harmonic
            ));
        }
        if let Some(s) = self
            .pid_flow_species
            .iter()
            .find(|s| !self.species.contains(s))
        {
            return invalid(format!("pid flow species `{}` is not in `species`", s));
        }
        if let Some(bin) = self
            .pt_bins
            .iter()
            .find(|[lo, hi]| !(lo.is_finite() && hi.is_finite() && 0.0 <= *lo && lo < hi))
        {
            return invalid(format!("bad pT bin {:?}", bin));
        }

        let mut names = HashSet::new();
        for system in &self.systems {
            if !names.insert(system.name.as_str()) {
                return invalid(format!("duplicate system `{}`", system.name));
            }
            let mut seen = HashSet::new();
            for entry in &system.observables {
                if !seen.insert(&entry.name) {
                    return invalid(format!(
                        "{}: duplicate schedule for `{}`",
                        system.name, entry.name
                    ));
                }
                if let Some(bin) = entry.bins.iter().find(|b| !b.is_valid()) {
                    return invalid(format!(
                        "{}: `{}` has invalid centrality bin [{}, {}]",
                        system.name, entry.name, bin.low, bin.high
                    ));
                }
                self.check_observable(&entry.name)
                    .map_err(|msg| ConfigError::Invalid(format!("{}: {}", system.name, msg)))?;
            }
        }

        let mut sets = HashSet::new();
        for set in &self.design_sets {
            if !sets.insert(set.name.as_str()) {
                return invalid(format!("duplicate design set `{}`", set.name));
            }
        }
        Ok(())
    }

    fn check_observable(&self, obs: &Observable) -> Result<(), String> {
        if let Some(species) = obs.species() {
            // identified differential flow needs its own Q-vectors in the record
            let known = if obs.is_differential() {
                self.pid_flow_index(species)
            } else {
                self.species_index(species)
            };
            if known.is_none() {
                return Err(format!(
                    "`{}` refers to species `{}` missing from the record",
                    obs, species
                ));
            }
        }
        match obs {
            Observable::Flow { harmonic } if *harmonic > self.n_harmonic => Err(format!(
                "`{}` exceeds n_harmonic = {}",
                obs, self.n_harmonic
            )),
            Observable::DifferentialFlow { harmonic, .. } => {
                if *harmonic > self.n_harmonic_diff {
                    return Err(format!(
                        "`{}` exceeds n_harmonic_diff = {}",
                        obs, self.n_harmonic_diff
                    ));
                }
                if self.pt_bins.is_empty() {
                    return Err(format!("`{}` needs pt_bins", obs));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.species.iter().position(|s| s == name)
    }

    pub fn pid_flow_index(&self, name: &str) -> Option<usize> {
        self.pid_flow_species.iter().position(|s| s == name)
    }

    pub fn design_set(&self, name: &str) -> Option<&DesignSet> {
        self.design_sets.iter().find(|s| s.name == name)
    }

    /// Centrality schedule of `obs` for a system, `None` when not configured.
    pub fn schedule(&self, system: usize, obs: &Observable) -> Option<&[CentralityBin]> {
        self.systems
            .get(system)?
            .observables
            .iter()
            .find(|entry| &entry.name == obs)
            .map(|entry| entry.bins.as_slice())
    }

    pub fn pt_midpoints(&self) -> Vec<f64> {
        self.pt_bins.iter().map(|[lo, hi]| 0.5 * (lo + hi)).collect()
    }

    /// Every observable the record layout can support, in aggregation order.
    ///
    /// The driver requests each of these for every system; those without a
    /// schedule are skipped.
    pub fn catalogue(&self) -> Vec<Observable> {
        let mut obs = vec![Observable::ChargedMultiplicity, Observable::TransverseEnergy];
        obs.extend(self.species.iter().cloned().map(Observable::Yield));
        obs.extend(self.species.iter().cloned().map(Observable::MeanPt));
        obs.push(Observable::PtFluctuation);
        obs.extend((1..=self.n_harmonic).map(|harmonic| Observable::Flow { harmonic }));
        if !self.pt_bins.is_empty() {
            let sets = core::iter::once(ParticleSet::Charged).chain(
                self.pid_flow_species
                    .iter()
                    .cloned()
                    .map(ParticleSet::Identified),
            );
            for particles in sets {
                obs.extend((1..=self.n_harmonic_diff).map(|harmonic| {
                    Observable::DifferentialFlow {
                        harmonic,
                        particles: particles.clone(),
                    }
                }));
            }
        }
        obs
    }
}
