//! Fixed-layout output records.
//!
//! One [`DesignPointRecord`] per design point. The on-disk form is a flat
//! little-endian `f64` blob with records back to back, design points in
//! order. Inside a record:
//!
//! ```text
//! for system in configured order
//!   for idf in 0..n_idf
//!     for observable in the system's schedule order
//!       mean[n_cen * n_pt]   (pT fastest)
//!       err[n_cen * n_pt]
//! ```
//!
//! `n_pt` is 1 except for differential flow. The layout is derived from the
//! configuration alone, so a blob can only be read back with the
//! configuration that wrote it.

use crate::config::AnalysisConfig;
use crate::observable::Observable;
use crate::stats::Estimate;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("output blob of {found} bytes is not a whole number of {record_size}-byte records")]
    Size { found: usize, record_size: usize },
    #[error("record does not match output layout: {0}")]
    Shape(String),
}

/// Extents of one observable slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotLayout {
    pub observable: Observable,
    pub n_cen: usize,
    /// pT bins per centrality bin, 1 for integrated observables.
    pub n_pt: usize,
}

impl SlotLayout {
    /// Entries in each of `mean` and `err`.
    pub fn len(&self) -> usize {
        self.n_cen * self.n_pt
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemLayout {
    pub name: String,
    pub slots: Vec<SlotLayout>,
}

impl SystemLayout {
    fn values(&self) -> usize {
        self.slots.iter().map(|s| 2 * s.len()).sum()
    }

    /// Zero-filled aggregate for `n_idf` variants.
    pub fn allocate(&self, n_idf: usize) -> SystemAggregate {
        let variant = VariantAggregate {
            observables: self
                .slots
                .iter()
                .map(|slot| ObservableAggregate::zeroed(slot.len()))
                .collect(),
        };
        SystemAggregate {
            variants: vec![variant; n_idf],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    pub n_idf: usize,
    pub systems: Vec<SystemLayout>,
}

impl OutputLayout {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let n_pt = config.pt_bins.len();
        let systems = config
            .systems
            .iter()
            .map(|system| SystemLayout {
                name: system.name.clone(),
                slots: system
                    .observables
                    .iter()
                    .map(|entry| SlotLayout {
                        observable: entry.name.clone(),
                        n_cen: entry.bins.len(),
                        n_pt: if entry.name.is_differential() { n_pt } else { 1 },
                    })
                    .collect(),
            })
            .collect();
        Self {
            n_idf: config.n_idf,
            systems,
        }
    }

    /// Number of `f64` values in one record.
    pub fn values_per_record(&self) -> usize {
        self.n_idf * self.systems.iter().map(SystemLayout::values).sum::<usize>()
    }

    /// Bytes of one record.
    pub fn record_size(&self) -> usize {
        8 * self.values_per_record()
    }

    /// Slot of `observable` within a system, `None` if it is not scheduled.
    pub fn slot_index(&self, system: usize, observable: &Observable) -> Option<usize> {
        self.systems
            .get(system)?
            .slots
            .iter()
            .position(|slot| &slot.observable == observable)
    }

    /// A zero-filled record.
    pub fn allocate(&self) -> DesignPointRecord {
        DesignPointRecord {
            systems: self
                .systems
                .iter()
                .map(|system| system.allocate(self.n_idf))
                .collect(),
        }
    }

    pub fn encode<W: Write>(&self, record: &DesignPointRecord, out: &mut W) -> Result<(), OutputError> {
        self.check_shape(record)?;
        for values in record.flat_values() {
            for &v in values {
                out.write_f64::<LittleEndian>(v)?;
            }
        }
        Ok(())
    }

    /// Decodes exactly one record from the front of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<DesignPointRecord, OutputError> {
        let record_size = self.record_size();
        if bytes.len() < record_size {
            return Err(OutputError::Size {
                found: bytes.len(),
                record_size,
            });
        }
        let mut rdr = &bytes[..record_size];
        let mut record = self.allocate();
        for values in record.flat_values_mut() {
            rdr.read_f64_into::<LittleEndian>(values)?;
        }
        Ok(record)
    }

    /// Writes `records` as one blob, creating parent directories as needed.
    pub fn write_all(&self, records: &[DesignPointRecord], path: &Path) -> Result<(), OutputError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        for record in records {
            self.encode(record, &mut out)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn read_all(&self, path: &Path) -> Result<Vec<DesignPointRecord>, OutputError> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        let record_size = self.record_size();
        if record_size == 0 {
            return if bytes.is_empty() {
                Ok(Vec::new())
            } else {
                Err(OutputError::Size {
                    found: bytes.len(),
                    record_size,
                })
            };
        }
        if bytes.len() % record_size != 0 {
            return Err(OutputError::Size {
                found: bytes.len(),
                record_size,
            });
        }
        bytes
            .chunks_exact(record_size)
            .map(|chunk| self.decode(chunk))
            .collect()
    }

    fn check_shape(&self, record: &DesignPointRecord) -> Result<(), OutputError> {
        let mismatch = |what: String| Err(OutputError::Shape(what));
        if record.systems.len() != self.systems.len() {
            return mismatch(format!(
                "{} systems, layout has {}",
                record.systems.len(),
                self.systems.len()
            ));
        }
        for (system, layout) in record.systems.iter().zip(&self.systems) {
            if system.variants.len() != self.n_idf {
                return mismatch(format!(
                    "{}: {} idf variants, layout has {}",
                    layout.name,
                    system.variants.len(),
                    self.n_idf
                ));
            }
            for variant in &system.variants {
                if variant.observables.len() != layout.slots.len() {
                    return mismatch(format!(
                        "{}: {} observables, layout has {}",
                        layout.name,
                        variant.observables.len(),
                        layout.slots.len()
                    ));
                }
                for (obs, slot) in variant.observables.iter().zip(&layout.slots) {
                    if obs.mean.len() != slot.len() || obs.err.len() != slot.len() {
                        return mismatch(format!(
                            "{}: `{}` has {}/{} entries, layout has {}",
                            layout.name,
                            slot.observable,
                            obs.mean.len(),
                            obs.err.len(),
                            slot.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// `mean` and `err` of one observable, row-major `[centrality][pT]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservableAggregate {
    pub mean: Vec<f64>,
    pub err: Vec<f64>,
}

impl ObservableAggregate {
    pub fn zeroed(len: usize) -> Self {
        Self {
            mean: vec![0.0; len],
            err: vec![0.0; len],
        }
    }

    /// Copies `values` into the slot; lengths must agree.
    pub fn fill(&mut self, values: &[Estimate]) -> Result<(), OutputError> {
        if values.len() != self.mean.len() {
            return Err(OutputError::Shape(format!(
                "{} estimates for a slot of {}",
                values.len(),
                self.mean.len()
            )));
        }
        for ((mean, err), v) in self.mean.iter_mut().zip(self.err.iter_mut()).zip(values) {
            *mean = v.mean;
            *err = v.err;
        }
        Ok(())
    }

    pub fn estimates(&self) -> impl Iterator<Item = Estimate> + '_ {
        self.mean
            .iter()
            .zip(&self.err)
            .map(|(&mean, &err)| Estimate::new(mean, err))
    }

    pub fn is_zero(&self) -> bool {
        self.mean.iter().chain(&self.err).all(|&v| v == 0.0)
    }

    /// Bitwise-tolerant equality where NaN equals NaN.
    pub fn nan_eq(&self, other: &Self) -> bool {
        slices_nan_eq(&self.mean, &other.mean) && slices_nan_eq(&self.err, &other.err)
    }
}

fn slices_nan_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
}

/// All scheduled observables of one idf, in schedule order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantAggregate {
    pub observables: Vec<ObservableAggregate>,
}

/// One [`VariantAggregate`] per idf.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SystemAggregate {
    pub variants: Vec<VariantAggregate>,
}

/// Aggregated observables of one design point, one entry per system.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesignPointRecord {
    pub systems: Vec<SystemAggregate>,
}

impl DesignPointRecord {
    pub fn get(&self, system: usize, idf: usize, slot: usize) -> Option<&ObservableAggregate> {
        self.systems
            .get(system)?
            .variants
            .get(idf)?
            .observables
            .get(slot)
    }

    pub fn nan_eq(&self, other: &Self) -> bool {
        let mine: Vec<&Vec<f64>> = self.flat_values().collect();
        let theirs: Vec<&Vec<f64>> = other.flat_values().collect();
        mine.len() == theirs.len()
            && mine
                .iter()
                .zip(&theirs)
                .all(|(a, b)| slices_nan_eq(a, b))
    }

    /// Every `mean` and `err` vector in serialization order.
    fn flat_values(&self) -> impl Iterator<Item = &Vec<f64>> {
        self.systems
            .iter()
            .flat_map(|s| &s.variants)
            .flat_map(|v| &v.observables)
            .flat_map(|o| [&o.mean, &o.err])
    }

    fn flat_values_mut(&mut self) -> impl Iterator<Item = &mut Vec<f64>> {
        self.systems
            .iter_mut()
            .flat_map(|s| &mut s.variants)
            .flat_map(|v| &mut v.observables)
            .flat_map(|o| [&mut o.mean, &mut o.err])
    }
}
