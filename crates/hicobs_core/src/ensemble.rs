//! Event ensembles: loading from disk and multiplicity-sorted views.
//!
//! Loading is tolerant at file granularity. A missing design file, a
//! per-event file that is not exactly one record, or a short trailing record
//! only reduces the ensemble; none of them aborts the design point.

use crate::config::SourceKind;
use crate::record::{EventRecord, RecordError, RecordLayout, VariantRecord};
use std::fs;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Events of one (design point, system) pair.
#[derive(Debug, Default)]
pub struct Ensemble {
    pub events: Vec<EventRecord>,
    /// Files that could not be read or decoded.
    pub skipped_files: usize,
    /// Records inside readable files that failed to decode.
    pub skipped_records: usize,
}

impl Ensemble {
    pub fn from_events(events: Vec<EventRecord>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Loads one design point stored as `source` at `path`.
pub fn load(source: SourceKind, path: &Path, layout: &RecordLayout) -> Ensemble {
    match source {
        SourceKind::Concatenated => load_concatenated(path, layout),
        SourceKind::PerEvent => load_per_event(path, layout),
    }
}

/// All events of a design point, back to back in one file.
pub fn load_concatenated(path: &Path, layout: &RecordLayout) -> Ensemble {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable event file");
            return Ensemble {
                skipped_files: 1,
                ..Default::default()
            };
        }
    };

    let batch = layout.decode_all(&bytes);
    if batch.trailing_bytes > 0 {
        warn!(
            path = %path.display(),
            trailing_bytes = batch.trailing_bytes,
            record_size = layout.record_size(),
            "Dropping incomplete trailing record"
        );
    }
    if batch.malformed > 0 {
        warn!(path = %path.display(), malformed = batch.malformed, "Dropping malformed records");
    }
    Ensemble {
        events: batch.records,
        skipped_files: 0,
        skipped_records: batch.malformed,
    }
}

/// One event per file under `dir`, visited in path order.
pub fn load_per_event(dir: &Path, layout: &RecordLayout) -> Ensemble {
    let mut ensemble = Ensemble::default();
    if !dir.is_dir() {
        warn!(path = %dir.display(), "Event directory missing");
        return ensemble;
    }

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                ensemble.skipped_files += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let decoded = fs::read(path)
            .map_err(RecordError::from)
            .and_then(|bytes| layout.decode_exact(&bytes));
        match decoded {
            Ok(record) => ensemble.events.push(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping event file");
                ensemble.skipped_files += 1;
            }
        }
    }
    ensemble
}

/// One idf of an ensemble, sorted by charged multiplicity, most central first.
///
/// Centrality bins are index ranges into this ordering.
#[derive(Debug)]
pub struct VariantView<'a> {
    idf: usize,
    events: Vec<&'a VariantRecord>,
}

impl<'a> VariantView<'a> {
    /// Sorts descending by `dNch_deta` of variant `idf`. The sort is stable,
    /// so ties keep file order. Events lacking the variant are left out.
    pub fn sorted_by_multiplicity(events: &'a [EventRecord], idf: usize) -> Self {
        let mut view: Vec<&VariantRecord> =
            events.iter().filter_map(|e| e.variants.get(idf)).collect();
        view.sort_by(|a, b| b.dnch_deta.total_cmp(&a.dnch_deta));
        Self { idf, events: view }
    }

    pub fn idf(&self) -> usize {
        self.idf
    }

    pub fn events(&self) -> &[&'a VariantRecord] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events without any charged particle.
    pub fn empty_events(&self) -> usize {
        self.events.iter().filter(|e| e.dnch_deta == 0.0).count()
    }
}
