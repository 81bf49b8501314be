//! # sidm-ntuple
//!
//! Columnar access to FireFighter-style ntuples.
//!
//! - [`branch`] / [`jagged`]: flat branch namespace with jagged columns
//! - [`io`]: reading and writing ntuples stored as Parquet
//! - [`schema`]: grouping branches into nested object collections
//! - [`record`]: the resulting per-event [`EventRecord`]
//! - [`histogram`]: weighted N-dimensional histograms

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod branch;
pub mod histogram;
pub mod jagged;
pub mod io;
pub mod record;
pub mod schema;

pub use branch::{Branch, BranchSet};
pub use histogram::{Axis, FillColumn, FlowPolicy, Hist, find_bin};
pub use jagged::JaggedCol;
pub use io::{
    NtupleIoError, read_branches, read_branches_bytes, read_event_record, write_branches,
    write_branches_bytes,
};
pub use record::{Collection, EventRecord, RecordMetadata, VectorKind, chunk_ranges};
pub use schema::{Schema, SchemaConfig, SchemaReport, build_event_record};
