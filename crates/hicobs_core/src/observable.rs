//! Observable catalogue and schedule names.
//!
//! Schedules and output slots refer to observables by their experimental
//! names: `dNch_deta`, `dET_deta`, `dN_dy_<species>`, `mean_pT_<species>`,
//! `pT_fluct`, `v<n>2` for two-particle integrated flow of harmonic `n`, and
//! `v<n>2_pT_chg` / `v<n>2_pT_<species>` for differential flow.

use crate::centrality::EdgePolicy;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Particle set entering differential flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParticleSet {
    Charged,
    Identified(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Observable {
    /// Charged-particle pseudorapidity density.
    ChargedMultiplicity,
    /// Transverse-energy pseudorapidity density.
    TransverseEnergy,
    /// Identified-particle rapidity density.
    Yield(String),
    /// Identified-particle mean transverse momentum.
    MeanPt(String),
    /// Relative event-by-event mean-pT fluctuation.
    PtFluctuation,
    /// Integrated two-particle flow cumulant `v_n{2}`.
    Flow { harmonic: usize },
    /// pT-differential two-particle flow `v_n{2}(pT)`.
    DifferentialFlow {
        harmonic: usize,
        particles: ParticleSet,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown observable name `{0}`")]
pub struct ParseObservableError(pub String);

impl Observable {
    /// Only charged multiplicity widens collapsed bins; every other
    /// observable reports them as degenerate.
    pub fn edge_policy(&self) -> EdgePolicy {
        match self {
            Observable::ChargedMultiplicity => EdgePolicy::Widen,
            _ => EdgePolicy::Exact,
        }
    }

    pub fn is_differential(&self) -> bool {
        matches!(self, Observable::DifferentialFlow { .. })
    }

    /// Species the observable is keyed by, if any.
    pub fn species(&self) -> Option<&str> {
        match self {
            Observable::Yield(s) | Observable::MeanPt(s) => Some(s),
            Observable::DifferentialFlow {
                particles: ParticleSet::Identified(s),
                ..
            } => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observable::ChargedMultiplicity => f.write_str("dNch_deta"),
            Observable::TransverseEnergy => f.write_str("dET_deta"),
            Observable::Yield(s) => write!(f, "dN_dy_{}", s),
            Observable::MeanPt(s) => write!(f, "mean_pT_{}", s),
            Observable::PtFluctuation => f.write_str("pT_fluct"),
            Observable::Flow { harmonic } => write!(f, "v{}2", harmonic),
            Observable::DifferentialFlow {
                harmonic,
                particles: ParticleSet::Charged,
            } => write!(f, "v{}2_pT_chg", harmonic),
            Observable::DifferentialFlow {
                harmonic,
                particles: ParticleSet::Identified(s),
            } => write!(f, "v{}2_pT_{}", harmonic, s),
        }
    }
}

/// Parses the `<n>` out of `v<n>2`.
fn parse_harmonic(head: &str) -> Option<usize> {
    let digits = head.strip_prefix('v')?.strip_suffix('2')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n > 0)
}

impl FromStr for Observable {
    type Err = ParseObservableError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let unknown = || ParseObservableError(name.to_string());
        let species = |s: &str| {
            if s.is_empty() {
                Err(unknown())
            } else {
                Ok(s.to_string())
            }
        };

        match name {
            "dNch_deta" => return Ok(Observable::ChargedMultiplicity),
            "dET_deta" => return Ok(Observable::TransverseEnergy),
            "pT_fluct" => return Ok(Observable::PtFluctuation),
            _ => {}
        }
        if let Some(s) = name.strip_prefix("dN_dy_") {
            return species(s).map(Observable::Yield);
        }
        if let Some(s) = name.strip_prefix("mean_pT_") {
            return species(s).map(Observable::MeanPt);
        }
        if let Some((head, set)) = name.split_once("_pT_") {
            let harmonic = parse_harmonic(head).ok_or_else(unknown)?;
            let particles = match set {
                "chg" => ParticleSet::Charged,
                s => ParticleSet::Identified(species(s)?),
            };
            return Ok(Observable::DifferentialFlow {
                harmonic,
                particles,
            });
        }
        parse_harmonic(name)
            .map(|harmonic| Observable::Flow { harmonic })
            .ok_or_else(unknown)
    }
}

impl TryFrom<String> for Observable {
    type Error = ParseObservableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Observable> for String {
    fn from(obs: Observable) -> Self {
        obs.to_string()
    }
}
