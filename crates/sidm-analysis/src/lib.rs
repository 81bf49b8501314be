//! # sidm-analysis
//!
//! Object definitions, selections and histogramming for self-interacting
//! dark matter searches with lepton jets.
//!
//! - [`vector`]: 4-vector kinematics
//! - [`objects`] / [`cuts`]: physics objects and the named cuts applied to them
//! - [`selection`] / [`cutflow`]: bookkeeping of cut results and cutflow tables
//! - [`leptonjet`]: lepton-jet reconstruction by clustering
//! - [`histograms`]: histogram definitions
//! - [`config`]: YAML selection menus, histogram collections and ntuple locations
//! - [`processor`] / [`runner`]: per-chunk processing and the parallel runner

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod cutflow;
pub mod cuts;
pub mod histograms;
pub mod leptonjet;
pub mod objects;
pub mod processor;
pub mod runner;
pub mod selection;
pub mod vector;

pub use config::{
    ChannelCuts, ChannelMenu, HistMenu, NameTree, NtupleLocations, SelectionMenu, build_cuts,
    load_schema_config, load_yaml,
};
pub use cutflow::{Cutflow, CutflowElement, Fractions};
pub use cuts::CutRegistry;
pub use histograms::{AxisDef, FillValues, HistogramDef, counter_defs, hist_defs};
pub use leptonjet::{Jet, JetAlgorithm, JetDefinition, build_lepton_jets};
pub use objects::{Kinematics, Objects, primary_objects};
pub use processor::{AnalysisOutput, CutflowOutput, ProcessorConfig, ProcessorOutput, SidmProcessor};
pub use runner::{DEFAULT_CHUNK_SIZE, run_fileset, run_records};
pub use selection::{JaggedSelection, PackedSelection, Selection};
pub use vector::LorentzVector;
