//! The SIDM processor: objects, selections, histograms and cutflows for one
//! chunk of events.
//!
//! Every channel and lepton-jet reconstruction choice is treated as its own
//! selection. Outputs of separate chunks are combined with [`Accumulator`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sidm_core::{Accumulator, Error, Result};
use sidm_ntuple::{EventRecord, Hist};

use crate::config::{ChannelCuts, HistMenu, SelectionMenu, build_cuts};
use crate::cutflow::Cutflow;
use crate::cuts::CutRegistry;
use crate::histograms::{HistogramDef, counter_defs, hist_defs};
use crate::leptonjet::build_lepton_jets;
use crate::objects::{Objects, primary_objects};
use crate::selection::{JaggedSelection, Selection};

/// Per-event weight branch.
pub const WEIGHT_BRANCH: &str = "weightProduct";

/// What to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Channels (selection menu entries) to run.
    pub channel_names: Vec<String>,
    /// Histogram collections to fill.
    pub hist_collection_names: Vec<String>,
    /// Lepton-jet reconstruction choices, as written (`"0"`, `"0.4"`, `"-0.4"`).
    pub lj_reco_choices: Vec<String>,
    /// Fill histograms with unit weights.
    pub unweighted_hist: bool,
    /// Selection menu.
    pub selection_menu: SelectionMenu,
    /// Histogram collections.
    pub hist_menu: HistMenu,
}

impl ProcessorConfig {
    /// Config using the built-in menus and ntuple lepton jets.
    pub fn new(channel_names: Vec<String>, hist_collection_names: Vec<String>) -> Result<Self> {
        Ok(Self {
            channel_names,
            hist_collection_names,
            lj_reco_choices: vec!["0".to_string()],
            unweighted_hist: false,
            selection_menu: SelectionMenu::builtin()?,
            hist_menu: HistMenu::builtin()?,
        })
    }
}

/// Cutflows keyed by channel, or by lj_reco then channel when several
/// reconstruction choices are run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CutflowOutput {
    /// `channel -> cutflow`.
    ByChannel(BTreeMap<String, Cutflow>),
    /// `lj_reco -> channel -> cutflow`.
    ByLjReco(BTreeMap<String, BTreeMap<String, Cutflow>>),
}

impl CutflowOutput {
    /// Cutflow for `channel` (and `lj_reco` when keyed by it).
    pub fn get(&self, lj_reco: Option<&str>, channel: &str) -> Option<&Cutflow> {
        match (self, lj_reco) {
            (CutflowOutput::ByChannel(m), _) => m.get(channel),
            (CutflowOutput::ByLjReco(m), Some(r)) => m.get(r)?.get(channel),
            (CutflowOutput::ByLjReco(_), None) => None,
        }
    }
}

/// Counters: `lj_reco -> channel -> name -> count`.
pub type Counters = BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>>;

/// Output of one processed chunk for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorOutput {
    /// Cutflows.
    pub cutflow: CutflowOutput,
    /// Histograms by name.
    pub hists: BTreeMap<String, Hist>,
    /// Counters.
    pub counters: Counters,
}

/// Outputs by dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisOutput(pub BTreeMap<String, ProcessorOutput>);

/// Applies selections, fills histograms and builds cutflows.
#[derive(Debug, Clone)]
pub struct SidmProcessor {
    config: ProcessorConfig,
    lj_reco: Vec<(String, f64)>,
    registry: CutRegistry,
    all_obj_cuts: BTreeMap<String, Vec<String>>,
    channel_cuts: BTreeMap<String, ChannelCuts>,
    hist_templates: BTreeMap<String, HistogramDef>,
}

impl SidmProcessor {
    /// Processor with the built-in cut registry.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        Self::with_registry(config, CutRegistry::default())
    }

    /// Processor with a custom cut registry.
    ///
    /// Fails on unknown channels, histogram collections or histogram names,
    /// and on lj_reco choices that are not numbers.
    pub fn with_registry(config: ProcessorConfig, registry: CutRegistry) -> Result<Self> {
        if config.lj_reco_choices.is_empty() {
            return Err(Error::Validation("at least one lj_reco choice is required".into()));
        }
        let lj_reco = config
            .lj_reco_choices
            .iter()
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map(|r| (s.clone(), r))
                    .map_err(|_| Error::Validation(format!("lj_reco choice '{s}' is not a number")))
            })
            .collect::<Result<Vec<_>>>()?;
        let (all_obj_cuts, channel_cuts) = build_cuts(&config.selection_menu, &config.channel_names)?;

        let library = hist_defs();
        let lj_reco_axis = (config.lj_reco_choices.len() > 1).then_some(config.lj_reco_choices.as_slice());
        let mut hist_templates = BTreeMap::new();
        for name in config.hist_menu.hist_names(&config.hist_collection_names)? {
            let mut def = library
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::Validation(format!("histogram '{name}' is not defined")))?;
            def.make_hist(&name, Some(&config.channel_names), lj_reco_axis)?;
            hist_templates.insert(name, def);
        }

        tracing::debug!(
            channels = ?config.channel_names,
            lj_reco = ?config.lj_reco_choices,
            n_hists = hist_templates.len(),
            "processor configured"
        );
        Ok(Self { config, lj_reco, registry, all_obj_cuts, channel_cuts, hist_templates })
    }

    /// The configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one record; the output is keyed by the record's dataset.
    pub fn process(&self, record: &EventRecord) -> Result<AnalysisOutput> {
        let objs = primary_objects(record)?;
        let weights = match record.scalar(WEIGHT_BRANCH) {
            Some(w) => w.to_vec(),
            None => {
                tracing::warn!(dataset = %record.metadata.dataset, "no {WEIGHT_BRANCH} branch, using unit weights");
                vec![1.0; record.n_events]
            }
        };

        let mut hists = self.hist_templates.clone();
        let mut obj_selection = JaggedSelection::new(self.all_obj_cuts.clone());
        obj_selection.evaluate_obj_cuts(&objs, &self.registry);

        let mut cutflows: BTreeMap<String, BTreeMap<String, Cutflow>> = BTreeMap::new();
        let mut counters = Counters::new();

        for channel in &self.config.channel_names {
            let cuts = self
                .channel_cuts
                .get(channel)
                .ok_or_else(|| Error::Validation(format!("no cuts built for channel '{channel}'")))?;
            let channel_objs = obj_selection.make_and_apply_obj_masks(&objs, &cuts.obj)?;

            for (lj_reco_name, lj_reco) in &self.lj_reco {
                let (sel_objs, evt_selection) = self.select(&channel_objs, cuts, *lj_reco)?;

                let passing = evt_selection.passing_mask(objs.n_events())?;
                let evt_weights: Vec<f64> = if self.config.unweighted_hist {
                    vec![1.0; sel_objs.n_events()]
                } else {
                    weights.iter().zip(&passing).filter(|(_, p)| **p).map(|(w, _)| *w).collect()
                };
                for h in hists.values_mut() {
                    h.fill(&sel_objs, &evt_weights, channel, lj_reco_name);
                }

                let cutflow = Cutflow::new(&evt_selection.all_evt_cuts, &evt_selection.evt_cuts, &weights)?;
                cutflows.entry(lj_reco_name.clone()).or_default().insert(channel.clone(), cutflow);

                let channel_counters = counters
                    .entry(lj_reco_name.clone())
                    .or_default()
                    .entry(channel.clone())
                    .or_default();
                for (name, counter) in counter_defs() {
                    match counter(&sel_objs) {
                        Ok(n) => {
                            channel_counters.insert(name.to_string(), n);
                        }
                        Err(e) => tracing::warn!(counter = name, error = %e, "cannot fill counter, skipping"),
                    }
                }
            }
        }

        let cutflow = match (self.lj_reco.len(), cutflows.pop_first()) {
            (1, Some((_, by_channel))) => CutflowOutput::ByChannel(by_channel),
            (_, first) => {
                cutflows.extend(first);
                CutflowOutput::ByLjReco(cutflows)
            }
        };
        let hists = hists
            .into_iter()
            .filter_map(|(name, def)| def.into_hist().map(|h| (name, h)))
            .collect();

        tracing::info!(
            dataset = %record.metadata.dataset,
            n_events = record.n_events,
            entry_start = record.metadata.entry_start,
            "processed chunk"
        );
        let out = ProcessorOutput { cutflow, hists, counters };
        Ok(AnalysisOutput(BTreeMap::from([(record.metadata.dataset.clone(), out)])))
    }

    /// Lepton jets, lepton-jet cuts and event cuts for one channel.
    fn select(&self, channel_objs: &Objects, cuts: &ChannelCuts, lj_reco: f64) -> Result<(Objects, Selection)> {
        let mut sel_objs = channel_objs.clone();
        sel_objs.insert("ljs", build_lepton_jets(channel_objs, lj_reco)?)?;

        let mut lj_selection = JaggedSelection::new(cuts.lj.clone());
        lj_selection.evaluate_obj_cuts(&sel_objs, &self.registry);
        let sel_objs = lj_selection.make_and_apply_obj_masks(&sel_objs, &cuts.lj)?;

        let mut evt_selection = Selection::new(cuts.evt.clone());
        let sel_objs = evt_selection.apply_evt_cuts(&sel_objs, &self.registry)?;
        Ok((sel_objs, evt_selection))
    }
}

fn merge_maps<A: Accumulator + Clone>(a: &mut BTreeMap<String, A>, b: &BTreeMap<String, A>) -> Result<()> {
    for (k, v) in b {
        match a.get_mut(k) {
            Some(existing) => existing.add(v)?,
            None => {
                a.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(())
}

fn merge_nested(
    a: &mut BTreeMap<String, BTreeMap<String, Cutflow>>,
    b: &BTreeMap<String, BTreeMap<String, Cutflow>>,
) -> Result<()> {
    for (k, v) in b {
        merge_maps(a.entry(k.clone()).or_default(), v)?;
    }
    Ok(())
}

impl Accumulator for CutflowOutput {
    fn identity(&self) -> Self {
        let zero = |m: &BTreeMap<String, Cutflow>| {
            m.iter().map(|(k, c)| (k.clone(), c.identity())).collect::<BTreeMap<_, _>>()
        };
        match self {
            CutflowOutput::ByChannel(m) => CutflowOutput::ByChannel(zero(m)),
            CutflowOutput::ByLjReco(m) => {
                CutflowOutput::ByLjReco(m.iter().map(|(k, v)| (k.clone(), zero(v))).collect())
            }
        }
    }

    fn add(&mut self, other: &Self) -> Result<()> {
        match (self, other) {
            (CutflowOutput::ByChannel(a), CutflowOutput::ByChannel(b)) => merge_maps(a, b),
            (CutflowOutput::ByLjReco(a), CutflowOutput::ByLjReco(b)) => merge_nested(a, b),
            _ => Err(Error::Accumulate(
                "cannot add cutflows keyed by lj_reco to cutflows keyed by channel".into(),
            )),
        }
    }
}

impl Accumulator for ProcessorOutput {
    fn identity(&self) -> Self {
        let counters = self
            .counters
            .iter()
            .map(|(r, chans)| {
                let chans = chans
                    .iter()
                    .map(|(c, m)| (c.clone(), m.keys().map(|k| (k.clone(), 0)).collect()))
                    .collect();
                (r.clone(), chans)
            })
            .collect();
        Self {
            cutflow: self.cutflow.identity(),
            hists: self.hists.iter().map(|(k, h)| (k.clone(), h.identity())).collect(),
            counters,
        }
    }

    fn add(&mut self, other: &Self) -> Result<()> {
        self.cutflow.add(&other.cutflow)?;
        merge_maps(&mut self.hists, &other.hists)?;
        for (r, chans) in &other.counters {
            let mine = self.counters.entry(r.clone()).or_default();
            for (c, counts) in chans {
                let mine = mine.entry(c.clone()).or_default();
                for (name, n) in counts {
                    *mine.entry(name.clone()).or_default() += n;
                }
            }
        }
        Ok(())
    }
}

impl Accumulator for AnalysisOutput {
    /// The empty output: no datasets.
    fn identity(&self) -> Self {
        Self::default()
    }

    fn add(&mut self, other: &Self) -> Result<()> {
        merge_maps(&mut self.0, &other.0)
    }
}
