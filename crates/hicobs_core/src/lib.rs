//! # hicobs_core
//!
//! Reduces per-event output of a heavy-ion collision model into
//! centrality-binned experimental observables with statistical errors, one
//! fixed-layout record per design point of a parameter design.
//!
//! Data flow:
//!
//! ```text
//! event records -> sort by dNch/deta (per idf) -> centrality index ranges
//!     -> per-observable reduction -> weighted mean/err -> output record
//! ```
//!
//! Each event carries one block per viscous-correction variant ("idf");
//! every variant is sorted and binned independently.

pub mod aggregation;
pub mod centrality;
pub mod config;
pub mod driver;
pub mod ensemble;
pub mod observable;
pub mod output;
pub mod record;
pub mod stats;

pub use aggregation::{aggregate_observable, AggregateError, ObservableSeries, ReduceError, Reduction};
pub use centrality::{CentralityBin, EdgePolicy};
pub use config::{AnalysisConfig, ConfigError, DesignSet, SourceKind, ViscousCorrection};
pub use driver::{BatchSummary, Driver, DriverError};
pub use ensemble::{Ensemble, VariantView};
pub use observable::{Observable, ParticleSet};
pub use output::{DesignPointRecord, OutputError, OutputLayout};
pub use record::{EventRecord, FlowVector, PtSums, RecordError, RecordLayout, VariantRecord};
pub use stats::{weighted_mean_std, Estimate, StatsError};
