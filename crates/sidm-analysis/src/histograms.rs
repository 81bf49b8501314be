//! Histogram definitions: axes bundled with the functions that fill them.
//!
//! A [`HistogramDef`] describes what to plot; [`HistogramDef::make_hist`]
//! materialises the [`Hist`] once the channel and lepton-jet reconstruction
//! names are known, and [`HistogramDef::fill`] evaluates the axes on a set
//! of selected objects.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use sidm_core::{Error, Result};
use sidm_ntuple::{Axis, Collection, FillColumn, FlowPolicy, Hist, JaggedCol};

use crate::objects::{
    Kinematics, Objects, egm_ljs, matched_gen_as, matched_gen_as_mu, mu_ljs, nearest_delta_r,
};
use crate::vector::LorentzVector;

/// Values produced by an axis fill function.
#[derive(Debug, Clone, PartialEq)]
pub enum FillValues {
    /// One value per event.
    Events(Vec<f64>),
    /// Variable number of values per event.
    Jagged(JaggedCol),
}

impl FillValues {
    fn flatten(&self) -> &[f64] {
        match self {
            FillValues::Events(v) => v,
            FillValues::Jagged(j) => &j.flat,
        }
    }

    /// Per-event weights broadcast to this structure, flattened.
    fn broadcast(&self, weights: &[f64]) -> Result<Vec<f64>> {
        let n_rows = match self {
            FillValues::Events(v) => v.len(),
            FillValues::Jagged(j) => j.counts().len(),
        };
        if n_rows != weights.len() {
            return Err(Error::HistogramFill(format!(
                "cannot broadcast {} weights to {n_rows} events",
                weights.len()
            )));
        }
        Ok(match self {
            FillValues::Events(_) => weights.to_vec(),
            FillValues::Jagged(j) => j
                .counts()
                .into_iter()
                .zip(weights)
                .flat_map(|(n, &w)| std::iter::repeat_n(w, n))
                .collect(),
        })
    }
}

/// Axis fill function.
pub type FillFn = Arc<dyn Fn(&Objects) -> Result<FillValues> + Send + Sync>;

/// Event mask applied to every collection before the axes are evaluated.
pub type EvtMaskFn = Arc<dyn Fn(&Objects) -> Result<Vec<bool>> + Send + Sync>;

#[derive(Clone)]
enum AxisFill {
    Values(FillFn),
    Channel,
    LjReco,
}

/// An axis and how to fill it.
#[derive(Clone)]
pub struct AxisDef {
    /// Binning.
    pub axis: Axis,
    fill: AxisFill,
}

impl AxisDef {
    /// Axis filled by `f`.
    pub fn new(axis: Axis, f: impl Fn(&Objects) -> Result<FillValues> + Send + Sync + 'static) -> Self {
        Self { axis, fill: AxisFill::Values(Arc::new(f)) }
    }
}

impl fmt::Debug for AxisDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxisDef").field("axis", &self.axis.name()).finish()
    }
}

/// Histogram definition.
#[derive(Clone)]
pub struct HistogramDef {
    /// Content axes.
    pub axes: Vec<AxisDef>,
    /// Optional event mask.
    pub evt_mask: Option<EvtMaskFn>,
    /// Under/overflow handling of the content axes.
    pub flow: FlowPolicy,
    layout: Vec<AxisDef>,
    name: String,
    hist: Option<Hist>,
}

impl fmt::Debug for HistogramDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistogramDef")
            .field("name", &self.name)
            .field("axes", &self.axes)
            .field("evt_mask", &self.evt_mask.is_some())
            .finish()
    }
}

impl HistogramDef {
    /// Definition over `axes`, no event mask.
    pub fn new(axes: Vec<AxisDef>) -> Self {
        Self {
            axes,
            evt_mask: None,
            flow: FlowPolicy::Drop,
            layout: Vec::new(),
            name: String::new(),
            hist: None,
        }
    }

    /// Use `flow` for out-of-range values.
    pub fn with_flow(mut self, flow: FlowPolicy) -> Self {
        self.flow = flow;
        self
    }

    /// Restrict filling to events passing `mask`.
    pub fn with_evt_mask(
        mut self,
        mask: impl Fn(&Objects) -> Result<Vec<bool>> + Send + Sync + 'static,
    ) -> Self {
        self.evt_mask = Some(Arc::new(mask));
        self
    }

    /// One regular axis named `{obj}_{attr}` filled with `obj.attr`.
    ///
    /// `attr == "n"` fills the per-event multiplicity of `obj`.
    pub fn simple(
        obj: &str,
        attr: &str,
        absval: bool,
        nbins: usize,
        xmin: f64,
        xmax: f64,
        label: &str,
    ) -> Self {
        let (o, a) = (obj.to_string(), attr.to_string());
        let axis = Axis::regular(format!("{obj}_{attr}"), nbins, xmin, xmax).with_label(label);
        Self::new(vec![AxisDef::new(axis, move |objs| {
            if a == "n" {
                return multiplicity(objs, &o);
            }
            let values = objs.quantity(&o, &a)?;
            let values = if absval { values.into_iter().map(f64::abs).collect() } else { values };
            jagged(objs.get(&o)?, values)
        })])
    }

    /// Materialise the histogram, prepending `channel` and `lj_reco`
    /// category axes (lj_reco outermost) when given.
    pub fn make_hist(
        &mut self,
        name: &str,
        channels: Option<&[String]>,
        lj_reco_choices: Option<&[String]>,
    ) -> Result<()> {
        let mut layout = Vec::with_capacity(self.axes.len() + 2);
        if let Some(choices) = lj_reco_choices {
            layout.push(AxisDef { axis: Axis::str_category("lj_reco", choices), fill: AxisFill::LjReco });
        }
        if let Some(channels) = channels {
            layout.push(AxisDef { axis: Axis::str_category("channel", channels), fill: AxisFill::Channel });
        }
        layout.extend(self.axes.iter().cloned());
        self.hist = Some(Hist::with_flow(layout.iter().map(|a| a.axis.clone()).collect(), self.flow)?);
        self.layout = layout;
        self.name = name.to_string();
        Ok(())
    }

    /// The materialised histogram.
    pub fn hist(&self) -> Option<&Hist> {
        self.hist.as_ref()
    }

    /// Consume into the materialised histogram.
    pub fn into_hist(self) -> Option<Hist> {
        self.hist
    }

    /// Fill from selected objects with per-event weights.
    ///
    /// Returns `false` (after a warning) when the histogram could not be filled.
    pub fn fill(&mut self, objs: &Objects, evt_weights: &[f64], channel: &str, lj_reco: &str) -> bool {
        match self.try_fill(objs, evt_weights, channel, lj_reco) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(histogram = %self.name, error = %e, "histogram could not be filled, skipping");
                false
            }
        }
    }

    fn try_fill(&mut self, objs: &Objects, evt_weights: &[f64], channel: &str, lj_reco: &str) -> Result<()> {
        let hist = self
            .hist
            .as_mut()
            .ok_or_else(|| Error::HistogramFill("histogram has not been made".into()))?;
        if evt_weights.len() != objs.n_events() {
            return Err(Error::HistogramFill(format!(
                "{} weights for {} events",
                evt_weights.len(),
                objs.n_events()
            )));
        }
        let (objs, weights): (Cow<'_, Objects>, Cow<'_, [f64]>) = match &self.evt_mask {
            Some(mask_fn) => {
                let mask = mask_fn(objs)?;
                let weights = evt_weights.iter().zip(&mask).filter(|(_, m)| **m).map(|(w, _)| *w).collect();
                (Cow::Owned(objs.filter_events(&mask)?), Cow::Owned(weights))
            }
            None => (Cow::Borrowed(objs), Cow::Borrowed(evt_weights)),
        };

        let values = self
            .layout
            .iter()
            .map(|a| match &a.fill {
                AxisFill::Values(f) => f(&objs).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;
        let last = values
            .iter()
            .rev()
            .find_map(Option::as_ref)
            .ok_or_else(|| Error::HistogramFill("histogram has no numeric axis".into()))?;
        let weights = last.broadcast(&weights)?;

        let columns: Vec<FillColumn<'_>> = self
            .layout
            .iter()
            .zip(&values)
            .map(|(a, v)| match (&a.fill, v) {
                (AxisFill::Channel, _) => FillColumn::Category(channel),
                (AxisFill::LjReco, _) => FillColumn::Category(lj_reco),
                (_, Some(v)) => FillColumn::Numbers(v.flatten()),
                (_, None) => FillColumn::Numbers(&[]),
            })
            .collect();
        hist.fill(&columns, Some(&weights))
    }
}

fn jagged(c: &Collection, values: Vec<f64>) -> Result<FillValues> {
    Ok(FillValues::Jagged(c.to_jagged(values)?))
}

fn multiplicity(objs: &Objects, obj: &str) -> Result<FillValues> {
    Ok(FillValues::Events(objs.counts(obj)?.into_iter().map(|n| n as f64).collect()))
}

/// `attr` of the `n`-th element of `obj` in every event.
fn nth(objs: &Objects, obj: &str, n: usize, attr: &str) -> Result<FillValues> {
    let c = objs.get(obj)?;
    let values = c.quantity(attr)?;
    (0..c.n_parents())
        .map(|event| {
            let r = c.row_range(event);
            r.clone().nth(n).map(|i| values[i]).ok_or_else(|| {
                Error::HistogramFill(format!("'{obj}' has only {} elements in event {event}", r.len()))
            })
        })
        .collect::<Result<_>>()
        .map(FillValues::Events)
}

/// Four-vectors of the two leading elements of `obj` per event.
fn leading_pair(objs: &Objects, obj: &str) -> Result<Vec<(LorentzVector, LorentzVector)>> {
    let c = objs.get(obj)?;
    let p = c.lorentz_vectors()?;
    (0..c.n_parents())
        .map(|event| {
            let r = c.row_range(event);
            if r.len() < 2 {
                return Err(Error::HistogramFill(format!("'{obj}' has fewer than 2 elements in event {event}")));
            }
            Ok((p[r.start], p[r.start + 1]))
        })
        .collect()
}

fn at_least(obj: &'static str, n: usize) -> impl Fn(&Objects) -> Result<Vec<bool>> + Send + Sync {
    move |objs| Ok(objs.counts(obj)?.into_iter().map(|c| c >= n).collect())
}

fn regular(name: &str, bins: usize, start: f64, stop: f64) -> Axis {
    Axis::regular(name, bins, start, stop)
}

fn attr_axis(axis: Axis, obj: &'static str, attr: &'static str) -> AxisDef {
    AxisDef::new(axis, move |objs| jagged(objs.get(obj)?, objs.quantity(obj, attr)?))
}

fn abs_attr_axis(axis: Axis, obj: &'static str, attr: &'static str) -> AxisDef {
    AxisDef::new(axis, move |objs| {
        jagged(objs.get(obj)?, objs.quantity(obj, attr)?.into_iter().map(f64::abs).collect())
    })
}

fn count_axis(axis: Axis, obj: &'static str) -> AxisDef {
    AxisDef::new(axis, move |objs| multiplicity(objs, obj))
}

/// Multiplicity of `obj`; overflowing counts land in the last bin.
fn counted(axis: Axis, obj: &'static str) -> HistogramDef {
    HistogramDef::new(vec![count_axis(axis, obj)]).with_flow(FlowPolicy::Fold)
}

fn nth_axis(axis: Axis, obj: &'static str, n: usize, attr: &'static str) -> AxisDef {
    AxisDef::new(axis, move |objs| nth(objs, obj, n, attr))
}

fn eta_phi(obj: &'static str, prefix: &str) -> HistogramDef {
    HistogramDef::new(vec![
        attr_axis(regular(&format!("{prefix}_eta"), 50, -3.0, 3.0), obj, "eta"),
        attr_axis(regular(&format!("{prefix}_phi"), 50, -PI, PI), obj, "phi"),
    ])
}

fn derived_pt(name: &str, f: fn(&Objects) -> Result<Collection>) -> HistogramDef {
    let axis = regular(name, 100, 0.0, 100.0);
    HistogramDef::new(vec![AxisDef::new(axis, move |objs| {
        let c = f(objs)?;
        let pt = c.quantity("pt")?;
        jagged(&c, pt)
    })])
}

/// `lxy` of the dark photons selected by `f`.
fn derived_lxy(name: &str, f: fn(&Objects) -> Result<Collection>) -> HistogramDef {
    HistogramDef::new(vec![AxisDef::new(regular(name, 100, 0.0, 500.0), move |objs| {
        let c = f(objs)?;
        let lxy = c.quantity("lxy")?;
        jagged(&c, lxy)
    })])
}

fn pair_axis(axis: Axis, obj: &'static str, f: fn(&LorentzVector, &LorentzVector) -> f64) -> AxisDef {
    AxisDef::new(axis, move |objs| {
        Ok(FillValues::Events(leading_pair(objs, obj)?.iter().map(|(a, b)| f(a, b)).collect()))
    })
}

fn nearest_dr_axis(axis: Axis, obj: &'static str, to: &'static str) -> AxisDef {
    AxisDef::new(axis, move |objs| {
        let c = objs.get(obj)?;
        jagged(c, nearest_delta_r(c, objs.get(to)?)?)
    })
}

/// Built-in histogram definitions by name.
pub fn hist_defs() -> BTreeMap<String, HistogramDef> {
    let single = |axis| HistogramDef::new(vec![axis]);
    let defs: Vec<(&str, HistogramDef)> = vec![
        // pv
        ("pv_n", counted(regular("pv_n", 50, 0.0, 100.0), "pvs")),
        ("pv_ndof", single(attr_axis(regular("pv_ndof", 25, 0.0, 100.0), "pvs", "ndof"))),
        ("pv_z", single(attr_axis(regular("pv_z", 100, -50.0, 50.0), "pvs", "z"))),
        ("pv_rho", single(attr_axis(regular("pv_rho", 100, -0.5, 0.5), "pvs", "rho"))),
        // electrons, photons
        ("electron_n", counted(Axis::integer("electron_n", 0, 10), "electrons")),
        ("electron_pt", single(attr_axis(regular("electron_pt", 100, 0.0, 200.0), "electrons", "pt"))),
        ("electron_eta_phi", eta_phi("electrons", "electron")),
        ("photon_n", counted(Axis::integer("photon_n", 0, 10), "photons")),
        ("photon_pt", single(attr_axis(regular("photon_pt", 100, 0.0, 200.0), "photons", "pt"))),
        ("photon_eta_phi", eta_phi("photons", "photon")),
        // muons
        ("muon_n", counted(Axis::integer("muon_n", 0, 10), "muons")),
        ("muon_pt", single(attr_axis(regular("muon_pt", 100, 0.0, 200.0), "muons", "pt"))),
        ("muon_eta_phi", eta_phi("muons", "muon")),
        (
            "muon_absD0",
            single(abs_attr_axis(
                regular("muon_absD0", 100, 0.0, 500.0).with_label("Muon |d0| [cm]"),
                "muons",
                "d0",
            )),
        ),
        ("dsaMuon_n", counted(Axis::integer("dsaMuon_n", 0, 10), "dsaMuons")),
        ("dsaMuon_pt", single(attr_axis(regular("dsaMuon_pt", 100, 0.0, 200.0), "dsaMuons", "pt"))),
        ("dsaMuon_eta_phi", eta_phi("dsaMuons", "dsaMuon")),
        (
            "dsaMuon_absD0",
            single(abs_attr_axis(
                regular("dsaMuon_absD0", 100, 0.0, 500.0).with_label("Muon |d0| [cm]"),
                "dsaMuons",
                "d0",
            )),
        ),
        // lepton jets
        ("lj_n", counted(Axis::integer("lj_n", 0, 10), "ljs")),
        (
            "lj_pt",
            single(attr_axis(regular("lj_pt", 100, 0.0, 100.0).with_label("Lepton jet pT [GeV]"), "ljs", "pt")),
        ),
        (
            "lj0_pt",
            single(nth_axis(regular("lj0_pt", 100, 0.0, 100.0).with_label("Leading lepton jet pT [GeV]"), "ljs", 0, "pt"))
                .with_evt_mask(at_least("ljs", 1)),
        ),
        (
            "lj1_pt",
            single(nth_axis(regular("lj1_pt", 100, 0.0, 100.0).with_label("Subleading lepton jet pT [GeV]"), "ljs", 1, "pt"))
                .with_evt_mask(at_least("ljs", 2)),
        ),
        (
            "lj0_dRSpread",
            single(nth_axis(regular("lj0_dRSpread", 350, 0.0, 0.05), "ljs", 0, "dRSpread"))
                .with_evt_mask(at_least("ljs", 1)),
        ),
        (
            "lj1_dRSpread",
            single(nth_axis(regular("lj1_dRSpread", 350, 0.0, 0.05), "ljs", 1, "dRSpread"))
                .with_evt_mask(at_least("ljs", 2)),
        ),
        ("lj_eta_phi", eta_phi("ljs", "lj")),
        (
            "lj_pfIsolation05",
            single(attr_axis(
                regular("lj_pfIsolation05", 80, 0.0, 0.8).with_label("Lepton jet isolation"),
                "ljs",
                "pfIsolation05",
            )),
        ),
        ("lj_electronN", single(attr_axis(Axis::integer("lj_electronN", 0, 10), "ljs", "electron_n"))),
        ("lj_photonN", single(attr_axis(Axis::integer("lj_photonN", 0, 10), "ljs", "photon_n"))),
        ("lj_muonN", single(attr_axis(Axis::integer("lj_muonN", 0, 10), "ljs", "muon_n"))),
        ("egm_lj_pt", derived_pt("egm_lj_pt", egm_ljs)),
        ("mu_lj_pt", derived_pt("mu_lj_pt", mu_ljs)),
        ("electron_lj_dR", single(nearest_dr_axis(regular("electron_lj_dR", 50, 0.0, 2.0 * PI), "electrons", "ljs"))),
        ("muon_lj_dR", single(nearest_dr_axis(regular("muon_lj_dR", 50, 0.0, 2.0 * PI), "muons", "ljs"))),
        // lepton-jet pairs
        (
            "lj_lj_absdphi",
            single(pair_axis(regular("ljlj_absdphi", 50, 0.0, 2.0 * PI), "ljs", |a, b| (b.phi() - a.phi()).abs()))
                .with_evt_mask(at_least("ljs", 2)),
        ),
        (
            "lj_lj_invmass",
            single(pair_axis(regular("ljlj_mass", 100, 0.0, 2000.0), "ljs", |a, b| (*a + *b).mass()))
                .with_evt_mask(at_least("ljs", 2)),
        ),
        (
            "lj_lj_invmass_lowRange",
            single(pair_axis(regular("ljlj_mass", 100, 0.0, 500.0), "ljs", |a, b| (*a + *b).mass()))
                .with_evt_mask(at_least("ljs", 2)),
        ),
        // generator level
        ("gen_abspid", single(abs_attr_axis(Axis::integer("gen_abspid", 0, 40), "gens", "pid"))),
        ("genE_pt", single(abs_attr_axis(regular("genE_pt", 100, 0.0, 200.0), "genEs", "pt"))),
        (
            "genE_genE_dR",
            single(pair_axis(regular("genE_genE_dR", 50, 0.0, 1.0), "genEs", |a, b| b.delta_r(a)))
                .with_evt_mask(at_least("genEs", 2)),
        ),
        ("genMu_pt", single(abs_attr_axis(regular("genMu_pt", 100, 0.0, 200.0), "genMus", "pt"))),
        (
            "genMu0_pt",
            single(nth_axis(regular("genMu0_pt", 50, 0.0, 100.0), "genMus", 0, "pt"))
                .with_evt_mask(at_least("genMus", 1)),
        ),
        (
            "genMu1_pt",
            single(nth_axis(regular("genMu1_pt", 50, 0.0, 100.0), "genMus", 1, "pt"))
                .with_evt_mask(at_least("genMus", 2)),
        ),
        (
            "genMu_genMu_dR",
            single(pair_axis(regular("genMu_genMu_dR", 50, 0.0, 1.0), "genMus", |a, b| b.delta_r(a)))
                .with_evt_mask(at_least("genMus", 2)),
        ),
        (
            "genMu_genMu_pt",
            single(pair_axis(regular("genMu_genMu_pt", 100, 0.0, 200.0), "genMus", |a, b| (*a + *b).pt()))
                .with_evt_mask(at_least("genMus", 2)),
        ),
        ("genA_n", counted(regular("genA_n", 10, 0.0, 10.0), "genAs")),
        ("genA_pt", single(abs_attr_axis(regular("genA_pt", 100, 0.0, 200.0), "genAs", "pt"))),
        ("genA_lxy", single(attr_axis(regular("genA_lxy", 100, 0.0, 500.0), "genAs", "lxy"))),
        ("genA_lj_dR", single(nearest_dr_axis(regular("genA_lj_dR", 50, 0.0, 1.0), "genAs", "ljs"))),
        ("matched_genA_lxy", derived_lxy("matched_genA_lxy", |o| matched_gen_as(o, 0.4))),
        ("matched_genA_mu_lxy", derived_lxy("matched_genA_mu_lxy", |o| matched_gen_as_mu(o, 0.4))),
    ];
    defs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Per-sample counter: an integer computed from the selected objects.
pub type CounterFn = fn(&Objects) -> Result<u64>;

/// Built-in counters by name.
pub fn counter_defs() -> Vec<(&'static str, CounterFn)> {
    let defs: [(&'static str, CounterFn); 4] = [
        ("Selected events", |o| Ok(o.n_events() as u64)),
        ("Lepton jets", |o| Ok(o.get("ljs")?.n_elements() as u64)),
        ("Muon lepton jets", |o| Ok(mu_ljs(o)?.n_elements() as u64)),
        ("Matched dark photons", |o| Ok(matched_gen_as(o, 0.2)?.n_elements() as u64)),
    ];
    defs.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sidm_ntuple::VectorKind;

    fn objs() -> Objects {
        let mut objs = Objects::new(3);
        let ljs = Collection::from_counts("ljs", VectorKind::LorentzVector, &[2, 1, 0])
            .with_field("x", vec![50.0, -20.0, 15.0])
            .unwrap()
            .with_field("y", vec![0.0, 0.0, 0.0])
            .unwrap()
            .with_field("z", vec![0.0, 0.0, 0.0])
            .unwrap()
            .with_field("t", vec![50.0, 20.0, 15.0])
            .unwrap()
            .with_field("muon_n", vec![2.0, 0.0, 2.0])
            .unwrap();
        objs.insert("ljs", ljs).unwrap();
        objs
    }

    fn ch() -> Vec<String> {
        vec!["base".into(), "4mu".into()]
    }

    #[test]
    fn simple_hist_fills_jagged_values_with_broadcast_weights() {
        let mut def = HistogramDef::simple("ljs", "pt", false, 10, 0.0, 100.0, "pT");
        def.make_hist("lj_pt", Some(&ch()), None).unwrap();
        assert!(def.fill(&objs(), &[2.0, 3.0, 4.0], "4mu", "0.0"));
        let h = def.hist().unwrap().category_slice("channel", "4mu").unwrap();
        // bins of width 10: pt 50 -> bin 5, pt 20 -> bin 2, pt 15 -> bin 1
        let v = h.values();
        assert_eq!(v[5], 2.0);
        assert_eq!(v[2], 2.0);
        assert_eq!(v[1], 3.0);
        assert_relative_eq!(def.hist().unwrap().sum(), 7.0);
    }

    #[test]
    fn multiplicity_and_lj_reco_axis() {
        let mut def = HistogramDef::simple("ljs", "n", false, 5, 0.0, 5.0, "");
        let reco = vec!["0.0".to_string(), "0.4".to_string()];
        def.make_hist("lj_n", Some(&ch()), Some(&reco)).unwrap();
        let hist = def.hist().unwrap();
        assert_eq!(hist.axes[0].name(), "lj_reco");
        assert_eq!(hist.axes[1].name(), "channel");
        assert!(def.fill(&objs(), &[1.0; 3], "base", "0.4"));
        let h = def.hist().unwrap().category_slice("lj_reco", "0.4").unwrap();
        let h = h.category_slice("channel", "base").unwrap();
        assert_eq!(h.values(), vec![1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn evt_mask_restricts_events() {
        let defs = hist_defs();
        let mut def = defs["lj_lj_invmass"].clone();
        def.make_hist("lj_lj_invmass", None, None).unwrap();
        assert!(def.fill(&objs(), &[1.0, 5.0, 5.0], "", ""));
        let h = def.hist().unwrap();
        assert_relative_eq!(h.sum(), 1.0);
        // back-to-back 50 and 20 GeV massless pair
        let mass = (LorentzVector::new(50.0, 0.0, 0.0, 50.0) + LorentzVector::new(-20.0, 0.0, 0.0, 20.0)).mass();
        let bin = (mass / 20.0) as usize;
        assert_eq!(h.values()[bin], 1.0);
    }

    #[test]
    fn unfillable_hist_is_skipped() {
        let mut def = hist_defs()["muon_pt"].clone();
        def.make_hist("muon_pt", None, None).unwrap();
        assert!(!def.fill(&objs(), &[1.0; 3], "", ""));
        assert_eq!(def.hist().unwrap().entries, 0);
        let mut unmade = HistogramDef::simple("ljs", "pt", false, 1, 0.0, 1.0, "");
        assert!(!unmade.fill(&objs(), &[1.0; 3], "", ""));
    }

    #[test]
    fn library_contains_core_definitions() {
        let defs = hist_defs();
        for name in ["pv_n", "lj_pt", "lj0_pt", "genA_lxy", "muon_eta_phi"] {
            assert!(defs.contains_key(name), "{name}");
        }
        assert_eq!(defs["muon_eta_phi"].axes.len(), 2);
    }

    #[test]
    fn multiplicity_overflow_folds_into_last_bin() {
        let mut objs = Objects::new(2);
        let ljs = Collection::from_counts("ljs", VectorKind::LorentzVector, &[12, 1])
            .with_field("muon_n", vec![2.0; 13])
            .unwrap();
        objs.insert("ljs", ljs).unwrap();
        let mut def = hist_defs()["lj_n"].clone();
        assert_eq!(def.flow, FlowPolicy::Fold);
        def.make_hist("lj_n", None, None).unwrap();
        assert!(def.fill(&objs, &[1.0, 2.0], "", ""));
        let v = def.hist().unwrap().values();
        assert_eq!(v[1], 2.0);
        assert_eq!(v[9], 1.0);
        assert_relative_eq!(def.hist().unwrap().sum(), 3.0);
    }

    #[test]
    fn matched_dark_photon_lxy() {
        let mut objs = objs();
        // event 0: along the muon-less jet, event 1: along the muon jet
        let gen_as = Collection::from_counts("genAs", VectorKind::LorentzVector, &[1, 1, 0])
            .with_field("x", vec![-10.0, 10.0])
            .unwrap()
            .with_field("y", vec![0.0, 0.0])
            .unwrap()
            .with_field("z", vec![0.0, 0.0])
            .unwrap()
            .with_field("t", vec![10.0, 10.0])
            .unwrap()
            .with_field("vtx_x", vec![0.0, 0.0])
            .unwrap()
            .with_field("vtx_y", vec![0.0, 0.0])
            .unwrap()
            .with_field("dauvtx_x", vec![3.0, 6.0])
            .unwrap()
            .with_field("dauvtx_y", vec![4.0, 8.0])
            .unwrap();
        objs.insert("genAs", gen_as).unwrap();

        let defs = hist_defs();
        let mut all = defs["matched_genA_lxy"].clone();
        all.make_hist("matched_genA_lxy", None, None).unwrap();
        assert!(all.fill(&objs, &[1.0, 2.0, 3.0], "", ""));
        let v = all.hist().unwrap().values();
        assert_eq!(v[1], 1.0);
        assert_eq!(v[2], 2.0);

        let mut mu = defs["matched_genA_mu_lxy"].clone();
        mu.make_hist("matched_genA_mu_lxy", None, None).unwrap();
        assert!(mu.fill(&objs, &[1.0, 2.0, 3.0], "", ""));
        let h = mu.hist().unwrap();
        assert_eq!(h.values()[2], 2.0);
        assert_relative_eq!(h.sum(), 2.0);
    }

    #[test]
    fn counters() {
        let objs = objs();
        let counters = counter_defs();
        let get = |n: &str| counters.iter().find(|(k, _)| *k == n).unwrap().1;
        assert_eq!(get("Selected events")(&objs).unwrap(), 3);
        assert_eq!(get("Lepton jets")(&objs).unwrap(), 3);
        assert_eq!(get("Muon lepton jets")(&objs).unwrap(), 2);
        assert!(get("Matched dark photons")(&objs).is_err());
    }
}
