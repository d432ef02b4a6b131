//! # gridclear-io
//!
//! File formats around a clearing run:
//!
//! - [`snapshot`] - `data.json` snapshots of the market input, with
//!   migration of snapshots written by older schema versions
//! - [`manifest`] - schema version and element counts of a snapshot
//! - [`csv_sink`] - a [`ResultSink`](gridclear_algo::market::ResultSink)
//!   writing per-chunk, per-stage CSV tables

pub mod csv_sink;
pub mod manifest;
pub mod snapshot;

pub use csv_sink::{read_status, read_table, CsvSink, StageStatus};
pub use manifest::{read_manifest, ElementCounts, SnapshotManifest, CURRENT_SCHEMA_VERSION};
pub use snapshot::{load_market_data, DataSnapshot, LoadedSnapshot};
