//! Per-event record schema and its fixed little-endian byte layout.
//!
//! Each record carries one [`VariantRecord`] per viscous-correction variant
//! (idf), in idf order. A variant block is laid out as:
//!
//! ```text
//! dNch_deta            f8
//! dET_deta             f8
//! dN_dy                f8[n_species]
//! mean_pT              f8[n_species]
//! pT_fluct             { N i8, sum_pT f8, sum_pT2 f8 }
//! flow                 { N i8, Qn c16[n_harmonic] }
//! d_flow_chg           { N i8, Qn c16[n_harmonic_diff] }[n_pt_bins]
//! d_flow_pid           { N i8, Qn c16[n_harmonic_diff] }[n_pt_bins][n_pid_flow]
//! ```
//!
//! `c16` is two consecutive `f8` (real, imaginary). Extents come from the
//! analysis configuration; the layout never infers them from the data.

use crate::config::AnalysisConfig;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_complex::Complex64;
use std::io::{self, Read, Write};
use thiserror::Error;

const F8: usize = 8;
const I8: usize = 8;
const C16: usize = 16;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("truncated record: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("expected exactly one record of {expected} bytes, found {found}")]
    Length { expected: usize, found: usize },
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("record does not match layout: {0}")]
    Shape(String),
}

/// Particle count and Q-vectors `Q_n = Σ exp(i n φ)` for `n = 1..`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowVector {
    pub n: i64,
    pub qn: Vec<Complex64>,
}

impl FlowVector {
    pub fn empty(n_harmonic: usize) -> Self {
        Self {
            n: 0,
            qn: vec![Complex64::new(0.0, 0.0); n_harmonic],
        }
    }

    /// `Q_n` for a 1-based harmonic order.
    pub fn harmonic(&self, order: usize) -> Option<Complex64> {
        order.checked_sub(1).and_then(|i| self.qn.get(i)).copied()
    }
}

/// Sufficient statistics for the mean-pT fluctuation cumulant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PtSums {
    pub n: i64,
    pub sum_pt: f64,
    pub sum_pt2: f64,
}

/// Fields of one event for one viscous-correction variant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantRecord {
    pub dnch_deta: f64,
    pub det_deta: f64,
    /// Indexed like the configured species list.
    pub dn_dy: Vec<f64>,
    /// Indexed like the configured species list.
    pub mean_pt: Vec<f64>,
    pub pt_sums: PtSums,
    pub flow: FlowVector,
    /// One entry per pT bin.
    pub diff_flow_chg: Vec<FlowVector>,
    /// `[pid species][pT bin]`.
    pub diff_flow_pid: Vec<Vec<FlowVector>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventRecord {
    pub variants: Vec<VariantRecord>,
}

/// Array extents of the event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub n_idf: usize,
    pub n_species: usize,
    pub n_harmonic: usize,
    pub n_harmonic_diff: usize,
    pub n_pt_bins: usize,
    pub n_pid_flow: usize,
}

impl RecordLayout {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            n_idf: config.n_idf,
            n_species: config.species.len(),
            n_harmonic: config.n_harmonic,
            n_harmonic_diff: config.n_harmonic_diff,
            n_pt_bins: config.pt_bins.len(),
            n_pid_flow: config.pid_flow_species.len(),
        }
    }

    fn flow_size(n_harmonic: usize) -> usize {
        I8 + C16 * n_harmonic
    }

    /// Bytes of one variant block.
    pub fn variant_size(&self) -> usize {
        2 * F8
            + 2 * F8 * self.n_species
            + (I8 + 2 * F8)
            + Self::flow_size(self.n_harmonic)
            + self.n_pt_bins * (1 + self.n_pid_flow) * Self::flow_size(self.n_harmonic_diff)
    }

    /// Bytes of one full event record.
    pub fn record_size(&self) -> usize {
        self.n_idf * self.variant_size()
    }

    /// An all-zero record with the right shape (a valid event without particles).
    pub fn empty_record(&self) -> EventRecord {
        let variant = VariantRecord {
            dn_dy: vec![0.0; self.n_species],
            mean_pt: vec![0.0; self.n_species],
            flow: FlowVector::empty(self.n_harmonic),
            diff_flow_chg: vec![FlowVector::empty(self.n_harmonic_diff); self.n_pt_bins],
            diff_flow_pid: vec![
                vec![FlowVector::empty(self.n_harmonic_diff); self.n_pt_bins];
                self.n_pid_flow
            ],
            ..Default::default()
        };
        EventRecord {
            variants: vec![variant; self.n_idf],
        }
    }

    /// Decodes exactly one record from the front of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<EventRecord, RecordError> {
        let expected = self.record_size();
        if bytes.len() < expected {
            return Err(RecordError::Truncated {
                expected,
                found: bytes.len(),
            });
        }
        let mut rdr = &bytes[..expected];
        let variants = (0..self.n_idf)
            .map(|_| self.read_variant(&mut rdr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventRecord { variants })
    }

    /// Decodes `bytes` as a single record with nothing before or after it.
    pub fn decode_exact(&self, bytes: &[u8]) -> Result<EventRecord, RecordError> {
        let expected = self.record_size();
        if bytes.len() > expected {
            return Err(RecordError::Length {
                expected,
                found: bytes.len(),
            });
        }
        self.decode(bytes)
    }

    /// Decodes a concatenation of records.
    ///
    /// Malformed records are dropped individually; their count is returned
    /// along with the number of trailing bytes that did not form a full record.
    pub fn decode_all(&self, bytes: &[u8]) -> DecodedBatch {
        let size = self.record_size();
        let mut batch = DecodedBatch::default();
        if size == 0 {
            batch.trailing_bytes = bytes.len();
            return batch;
        }
        let mut chunks = bytes.chunks_exact(size);
        for chunk in chunks.by_ref() {
            match self.decode(chunk) {
                Ok(record) => batch.records.push(record),
                Err(_) => batch.malformed += 1,
            }
        }
        batch.trailing_bytes = chunks.remainder().len();
        batch
    }

    /// Appends the encoding of `record` to `out`.
    pub fn encode<W: Write>(&self, record: &EventRecord, out: &mut W) -> Result<(), RecordError> {
        self.check_shape(record)?;
        for variant in &record.variants {
            out.write_f64::<LittleEndian>(variant.dnch_deta)?;
            out.write_f64::<LittleEndian>(variant.det_deta)?;
            for &v in variant.dn_dy.iter().chain(&variant.mean_pt) {
                out.write_f64::<LittleEndian>(v)?;
            }
            out.write_i64::<LittleEndian>(variant.pt_sums.n)?;
            out.write_f64::<LittleEndian>(variant.pt_sums.sum_pt)?;
            out.write_f64::<LittleEndian>(variant.pt_sums.sum_pt2)?;
            write_flow(out, &variant.flow)?;
            for flow in variant
                .diff_flow_chg
                .iter()
                .chain(variant.diff_flow_pid.iter().flatten())
            {
                write_flow(out, flow)?;
            }
        }
        Ok(())
    }

    fn check_shape(&self, record: &EventRecord) -> Result<(), RecordError> {
        let shape = |what: &str, found: usize, expected: usize| {
            if found == expected {
                Ok(())
            } else {
                Err(RecordError::Shape(format!(
                    "{} has {} entries, layout expects {}",
                    what, found, expected
                )))
            }
        };
        shape("variants", record.variants.len(), self.n_idf)?;
        for v in &record.variants {
            shape("dN_dy", v.dn_dy.len(), self.n_species)?;
            shape("mean_pT", v.mean_pt.len(), self.n_species)?;
            shape("flow.Qn", v.flow.qn.len(), self.n_harmonic)?;
            shape("d_flow_chg", v.diff_flow_chg.len(), self.n_pt_bins)?;
            shape("d_flow_pid", v.diff_flow_pid.len(), self.n_pid_flow)?;
            for flow in v.diff_flow_chg.iter().chain(v.diff_flow_pid.iter().flatten()) {
                shape("d_flow.Qn", flow.qn.len(), self.n_harmonic_diff)?;
            }
            for bins in &v.diff_flow_pid {
                shape("d_flow_pid pT bins", bins.len(), self.n_pt_bins)?;
            }
        }
        Ok(())
    }

    fn read_variant<R: Read>(&self, rdr: &mut R) -> Result<VariantRecord, RecordError> {
        let dnch_deta = rdr.read_f64::<LittleEndian>()?;
        let det_deta = rdr.read_f64::<LittleEndian>()?;
        let dn_dy = read_f64s(rdr, self.n_species)?;
        let mean_pt = read_f64s(rdr, self.n_species)?;
        let pt_sums = PtSums {
            n: read_count(rdr, "pT_fluct.N")?,
            sum_pt: rdr.read_f64::<LittleEndian>()?,
            sum_pt2: rdr.read_f64::<LittleEndian>()?,
        };
        let flow = read_flow(rdr, self.n_harmonic)?;
        let diff_flow_chg = (0..self.n_pt_bins)
            .map(|_| read_flow(rdr, self.n_harmonic_diff))
            .collect::<Result<Vec<_>, _>>()?;
        let diff_flow_pid = (0..self.n_pid_flow)
            .map(|_| {
                (0..self.n_pt_bins)
                    .map(|_| read_flow(rdr, self.n_harmonic_diff))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VariantRecord {
            dnch_deta,
            det_deta,
            dn_dy,
            mean_pt,
            pt_sums,
            flow,
            diff_flow_chg,
            diff_flow_pid,
        })
    }
}

/// Result of [`RecordLayout::decode_all`].
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub records: Vec<EventRecord>,
    pub malformed: usize,
    pub trailing_bytes: usize,
}

fn read_f64s<R: Read>(rdr: &mut R, n: usize) -> Result<Vec<f64>, RecordError> {
    (0..n)
        .map(|_| rdr.read_f64::<LittleEndian>().map_err(RecordError::from))
        .collect()
}

fn read_count<R: Read>(rdr: &mut R, field: &str) -> Result<i64, RecordError> {
    let n = rdr.read_i64::<LittleEndian>()?;
    if n < 0 {
        return Err(RecordError::Malformed(format!("{} is negative ({})", field, n)));
    }
    Ok(n)
}

fn read_flow<R: Read>(rdr: &mut R, n_harmonic: usize) -> Result<FlowVector, RecordError> {
    let n = read_count(rdr, "flow.N")?;
    let mut qn = Vec::with_capacity(n_harmonic);
    for _ in 0..n_harmonic {
        let re = rdr.read_f64::<LittleEndian>()?;
        let im = rdr.read_f64::<LittleEndian>()?;
        if !re.is_finite() || !im.is_finite() {
            return Err(RecordError::Malformed("non-finite Q-vector".into()));
        }
        qn.push(Complex64::new(re, im));
    }
    Ok(FlowVector { n, qn })
}

fn write_flow<W: Write>(out: &mut W, flow: &FlowVector) -> io::Result<()> {
    out.write_i64::<LittleEndian>(flow.n)?;
    for q in &flow.qn {
        out.write_f64::<LittleEndian>(q.re)?;
        out.write_f64::<LittleEndian>(q.im)?;
    }
    Ok(())
}
