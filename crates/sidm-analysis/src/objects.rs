//! Physics object collections and derived kinematic quantities.
//!
//! [`Objects`] is the analysis-level view of an event record: named
//! collections (`muons`, `ljs`, `genAs`, ...) that selections filter and
//! histograms read. [`Kinematics::quantity`] resolves an attribute either as
//! a stored field or as a quantity derived from vector components.

use std::collections::BTreeMap;

use sidm_core::{Error, Result};
use sidm_ntuple::{Collection, EventRecord, VectorKind};

use crate::vector;

/// Named object collections over a common set of events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Objects {
    n_events: usize,
    collections: BTreeMap<String, Collection>,
}

impl Objects {
    /// Empty set of collections over `n_events` events.
    pub fn new(n_events: usize) -> Self {
        Self { n_events, collections: BTreeMap::new() }
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Add or replace a collection. It must be grouped over the same events.
    pub fn insert(&mut self, name: impl Into<String>, collection: Collection) -> Result<()> {
        let name = name.into();
        if collection.n_parents() != self.n_events {
            return Err(Error::Validation(format!(
                "object '{name}' has {} rows, expected {} events",
                collection.n_parents(),
                self.n_events
            )));
        }
        self.collections.insert(name, collection);
        Ok(())
    }

    /// Collection by name.
    pub fn get(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::Selection(format!("object '{name}' is not available")))
    }

    /// Whether a collection exists.
    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Remove a collection.
    pub fn remove(&mut self, name: &str) -> Option<Collection> {
        self.collections.remove(name)
    }

    /// Collection names.
    pub fn names(&self) -> Vec<&str> {
        self.collections.keys().map(String::as_str).collect()
    }

    /// Iterate over `(name, collection)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Collection)> {
        self.collections.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keep only the events where `mask` is true.
    pub fn filter_events(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_events {
            return Err(Error::Selection(format!(
                "event mask has length {}, expected {}",
                mask.len(),
                self.n_events
            )));
        }
        let collections = self
            .collections
            .iter()
            .map(|(k, c)| Ok((k.clone(), c.filter_parents(mask)?)))
            .collect::<Result<_>>()?;
        Ok(Self { n_events: mask.iter().filter(|&&m| m).count(), collections })
    }

    /// Number of elements per event of a collection.
    pub fn counts(&self, name: &str) -> Result<Vec<usize>> {
        Ok(self.get(name)?.counts())
    }

    /// Per-element quantity of a collection (see [`Kinematics::quantity`]).
    pub fn quantity(&self, name: &str, attr: &str) -> Result<Vec<f64>> {
        self.get(name)?.quantity(attr)
    }
}

/// Attribute access with kinematic fallbacks.
pub trait Kinematics {
    /// Stored field `name`, or a quantity derived from vector components:
    /// `pt, eta, phi, mass, energy, px, py, pz, p, rho, r, lxy`.
    fn quantity(&self, name: &str) -> Result<Vec<f64>>;

    /// Lorentz vectors of every element.
    fn lorentz_vectors(&self) -> Result<Vec<vector::LorentzVector>>;
}

/// First of `names` that is a stored field.
fn component<'a>(c: &'a Collection, names: &[&str]) -> Option<&'a [f64]> {
    names.iter().find_map(|n| c.field(n))
}

fn require<'a>(c: &'a Collection, names: &[&str], wanted: &str) -> Result<&'a [f64]> {
    component(c, names).ok_or_else(|| {
        Error::Selection(format!("collection '{}' has no attribute '{wanted}'", c.name))
    })
}

impl Kinematics for Collection {
    fn quantity(&self, name: &str) -> Result<Vec<f64>> {
        if let Some(values) = self.field(name) {
            return Ok(values.to_vec());
        }
        let x = || require(self, &["x", "px"], name);
        let y = || require(self, &["y", "py"], name);
        let z = || require(self, &["z", "pz"], name);
        let t = || require(self, &["t", "energy"], name);
        let map2 = |f: fn(f64, f64) -> f64| -> Result<Vec<f64>> {
            Ok(x()?.iter().zip(y()?).map(|(&a, &b)| f(a, b)).collect())
        };
        let map3 = |f: fn(f64, f64, f64) -> f64| -> Result<Vec<f64>> {
            Ok(x()?.iter().zip(y()?).zip(z()?).map(|((&a, &b), &c)| f(a, b, c)).collect())
        };
        match name {
            "px" => Ok(x()?.to_vec()),
            "py" => Ok(y()?.to_vec()),
            "pz" => Ok(z()?.to_vec()),
            "energy" => Ok(t()?.to_vec()),
            "pt" | "rho" => map2(vector::pt),
            "phi" => map2(vector::phi),
            "eta" => map3(vector::eta),
            "p" | "r" => map3(vector::r),
            "mass" => Ok(self.lorentz_vectors()?.iter().map(vector::LorentzVector::mass).collect()),
            "lxy" => {
                let vx = require(self, &["vtx_x"], name)?;
                let vy = require(self, &["vtx_y"], name)?;
                let dx = require(self, &["dauvtx_x"], name)?;
                let dy = require(self, &["dauvtx_y"], name)?;
                Ok((0..vx.len()).map(|i| vector::lxy((vx[i], vy[i]), (dx[i], dy[i]))).collect())
            }
            _ => Err(Error::Selection(format!(
                "collection '{}' has no attribute '{name}'",
                self.name
            ))),
        }
    }

    fn lorentz_vectors(&self) -> Result<Vec<vector::LorentzVector>> {
        let x = require(self, &["x", "px"], "x")?;
        let y = require(self, &["y", "py"], "y")?;
        let z = require(self, &["z", "pz"], "z")?;
        let t = require(self, &["t", "energy"], "t")?;
        Ok((0..x.len()).map(|i| vector::LorentzVector::new(x[i], y[i], z[i], t[i])).collect())
    }
}

/// Element mask `predicate(value)` over a quantity.
pub fn mask_by(c: &Collection, attr: &str, predicate: impl Fn(f64) -> bool) -> Result<Vec<bool>> {
    Ok(c.quantity(attr)?.into_iter().map(predicate).collect())
}

/// Order elements within each event by descending `pt` if it can be computed.
pub fn pt_ordered(c: Collection) -> Result<Collection> {
    match c.quantity("pt") {
        Ok(pt) => c.sorted_by_values(&pt, true),
        Err(_) => Ok(c),
    }
}

/// For each element of `a`, the `ΔR` to the nearest element of `b` in the
/// same event and that element's index. `NaN`/`None` when the event has no `b`.
pub fn nearest(a: &Collection, b: &Collection) -> Result<(Vec<f64>, Vec<Option<usize>>)> {
    if a.n_parents() != b.n_parents() {
        return Err(Error::Selection(format!(
            "cannot match '{}' to '{}': different event counts",
            a.name, b.name
        )));
    }
    let (a_eta, a_phi) = (a.quantity("eta")?, a.quantity("phi")?);
    let (b_eta, b_phi) = (b.quantity("eta")?, b.quantity("phi")?);
    let mut dr = Vec::with_capacity(a.n_elements());
    let mut idx = Vec::with_capacity(a.n_elements());
    for event in 0..a.n_parents() {
        let candidates = b.row_range(event);
        for i in a.row_range(event) {
            let best = candidates
                .clone()
                .map(|j| (vector::delta_r(a_eta[i], a_phi[i], b_eta[j], b_phi[j]), j))
                .min_by(|l, r| l.0.total_cmp(&r.0));
            match best {
                Some((d, j)) => {
                    dr.push(d);
                    idx.push(Some(j));
                }
                None => {
                    dr.push(f64::NAN);
                    idx.push(None);
                }
            }
        }
    }
    Ok((dr, idx))
}

/// `ΔR` from each element of `a` to the nearest element of `b` (NaN if none).
pub fn nearest_delta_r(a: &Collection, b: &Collection) -> Result<Vec<f64>> {
    Ok(nearest(a, b)?.0)
}

/// Primary objects and the event-record collections they come from.
pub const PRIMARY_SOURCES: &[(&str, &str)] = &[
    ("cosmicveto", "cosmicveto"),
    ("pvs", "pv"),
    ("electrons", "electron"),
    ("photons", "pfphoton"),
    ("muons", "muon"),
    ("dsaMuons", "dsamuon"),
    ("ntuple_ljs", "pfjet"),
    ("ljsources", "ljsource"),
    ("gens", "gen"),
];

/// Gen-particle subsets: name, `|pid|`, optional `|daupid|`.
const GEN_SUBSETS: &[(&str, f64, Option<f64>)] = &[
    ("genEs", 11.0, None),
    ("genMus", 13.0, None),
    ("genAs", 32.0, None),
    ("genAs_toMu", 32.0, Some(13.0)),
    ("genAs_toE", 32.0, Some(11.0)),
];

/// Companion vector collections merged into `gen` as prefixed fields.
const GEN_VERTICES: &[&str] = &["vtx", "dauvtx"];

/// Build the primary objects from an event record.
///
/// Missing source collections are skipped with a warning. Collections with a
/// computable `pt` are pt-ordered within each event.
pub fn primary_objects(record: &EventRecord) -> Result<Objects> {
    let mut objs = Objects::new(record.n_events);
    for &(name, source) in PRIMARY_SOURCES {
        let Some(c) = record.collection(source) else {
            tracing::warn!(object = name, source, "object not found in this sample, skipping");
            continue;
        };
        let mut c = c.clone();
        if source == "gen" {
            c = with_gen_vertices(c, record)?;
        }
        objs.insert(name, pt_ordered(c)?)?;
    }

    if let Ok(gens) = objs.get("gens") {
        let pid = gens.quantity("pid")?;
        let daupid = gens.field("daupid").map(<[f64]>::to_vec);
        let mut subsets = Vec::with_capacity(GEN_SUBSETS.len());
        for &(name, abs_pid, abs_daupid) in GEN_SUBSETS {
            let mask: Vec<bool> = match (abs_daupid, &daupid) {
                (None, _) => pid.iter().map(|p| p.abs() == abs_pid).collect(),
                (Some(d), Some(daupid)) => pid
                    .iter()
                    .zip(daupid)
                    .map(|(p, dp)| p.abs() == abs_pid && dp.abs() == d)
                    .collect(),
                (Some(_), None) => {
                    tracing::warn!(object = name, "gen daupid not available, skipping");
                    continue;
                }
            };
            subsets.push((name, gens.filter_elements(&mask)?));
        }
        for (name, c) in subsets {
            objs.insert(name, c)?;
        }
    }
    Ok(objs)
}

/// Attach `gen_vtx` / `gen_dauvtx` components as `vtx_x`, `dauvtx_y`, ... fields.
fn with_gen_vertices(mut gens: Collection, record: &EventRecord) -> Result<Collection> {
    for vtx in GEN_VERTICES {
        let Some(v) = record.collection(&format!("gen_{vtx}")) else { continue };
        if v.offsets() != gens.offsets() {
            tracing::warn!(vertex = vtx, "gen vertex collection not aligned with gen, skipping");
            continue;
        }
        for comp in VectorKind::ThreeVector.components() {
            if let Some(values) = v.field(comp) {
                gens.insert_field(format!("{vtx}_{comp}"), values.to_vec())?;
            }
        }
    }
    Ok(gens)
}

/// Lepton jets with at least two muons.
pub fn mu_ljs(objs: &Objects) -> Result<Collection> {
    let ljs = objs.get("ljs")?;
    ljs.filter_elements(&mask_by(ljs, "muon_n", |n| n >= 2.0)?)
}

/// Lepton jets without muons.
pub fn egm_ljs(objs: &Objects) -> Result<Collection> {
    let ljs = objs.get("ljs")?;
    ljs.filter_elements(&mask_by(ljs, "muon_n", |n| n == 0.0)?)
}

/// Gen dark photons with a lepton jet within `ΔR < r`.
pub fn matched_gen_as(objs: &Objects, r: f64) -> Result<Collection> {
    let gen_as = objs.get("genAs")?;
    let dr = nearest_delta_r(gen_as, objs.get("ljs")?)?;
    gen_as.filter_elements(&dr.iter().map(|&d| d < r).collect::<Vec<_>>())
}

/// Gen dark photons with a muon-type lepton jet within `ΔR < r`.
pub fn matched_gen_as_mu(objs: &Objects, r: f64) -> Result<Collection> {
    let gen_as = objs.get("genAs")?;
    let dr = nearest_delta_r(gen_as, &mu_ljs(objs)?)?;
    gen_as.filter_elements(&dr.iter().map(|&d| d < r).collect::<Vec<_>>())
}
