//! Named object-level and event-level cuts.

use std::collections::BTreeMap;

use sidm_core::{Error, Result};

use crate::objects::{Kinematics, Objects, mask_by, matched_gen_as, nearest_delta_r};

/// Object cut: one boolean per element of the target collection.
pub type ObjCutFn = fn(&Objects) -> Result<Vec<bool>>;

/// Event cut: one boolean per event.
pub type EvtCutFn = fn(&Objects) -> Result<Vec<bool>>;

/// Registry of available cuts, looked up by name.
#[derive(Debug, Clone)]
pub struct CutRegistry {
    obj: BTreeMap<String, BTreeMap<String, ObjCutFn>>,
    evt: BTreeMap<String, EvtCutFn>,
}

impl Default for CutRegistry {
    fn default() -> Self {
        let mut reg = Self::empty();
        for (obj, name, f) in builtin_obj_cuts() {
            reg.register_obj_cut(obj, name, f);
        }
        for (name, f) in builtin_evt_cuts() {
            reg.register_evt_cut(name, f);
        }
        reg
    }
}

impl CutRegistry {
    /// Registry without any cuts.
    pub fn empty() -> Self {
        Self { obj: BTreeMap::new(), evt: BTreeMap::new() }
    }

    /// Add or replace an object cut on collection `obj`.
    pub fn register_obj_cut(&mut self, obj: &str, name: &str, f: ObjCutFn) {
        self.obj.entry(obj.to_string()).or_default().insert(name.to_string(), f);
    }

    /// Add or replace an event cut.
    pub fn register_evt_cut(&mut self, name: &str, f: EvtCutFn) {
        self.evt.insert(name.to_string(), f);
    }

    /// Object cut by collection and name.
    pub fn obj_cut(&self, obj: &str, name: &str) -> Result<ObjCutFn> {
        self.obj.get(obj).and_then(|cuts| cuts.get(name)).copied().ok_or_else(|| {
            Error::Selection(format!("no object cut '{name}' defined for '{obj}'"))
        })
    }

    /// Event cut by name.
    pub fn evt_cut(&self, name: &str) -> Result<EvtCutFn> {
        self.evt
            .get(name)
            .copied()
            .ok_or_else(|| Error::Selection(format!("no event cut '{name}' defined")))
    }

    /// Names of the object cuts defined for `obj`.
    pub fn obj_cut_names(&self, obj: &str) -> Vec<&str> {
        self.obj.get(obj).map(|c| c.keys().map(String::as_str).collect()).unwrap_or_default()
    }

    /// Names of all event cuts.
    pub fn evt_cut_names(&self) -> Vec<&str> {
        self.evt.keys().map(String::as_str).collect()
    }
}

fn pt_above(objs: &Objects, obj: &str, min: f64) -> Result<Vec<bool>> {
    mask_by(objs.get(obj)?, "pt", |pt| pt > min)
}

fn abs_eta_below(objs: &Objects, obj: &str, max: f64) -> Result<Vec<bool>> {
    mask_by(objs.get(obj)?, "eta", |eta| eta.abs() < max)
}

fn builtin_obj_cuts() -> [(&'static str, &'static str, ObjCutFn); 15] {
    [
        ("pvs", "ndof > 4", |o| mask_by(o.get("pvs")?, "ndof", |v| v > 4.0)),
        ("pvs", "|z| < 24 cm", |o| mask_by(o.get("pvs")?, "z", |v| v.abs() < 24.0)),
        ("pvs", "|rho| < 0.2 mm", |o| mask_by(o.get("pvs")?, "rho", |v| v.abs() < 0.2)),
        ("ljs", "pT > 30 GeV", |o| pt_above(o, "ljs", 30.0)),
        ("ljs", "|eta| < 2.4", |o| abs_eta_below(o, "ljs", 2.4)),
        ("ljs", "dR(LJ, A) < 0.2", |o| {
            Ok(nearest_delta_r(o.get("ljs")?, o.get("genAs")?)?.iter().map(|&d| d < 0.2).collect())
        }),
        ("genAs", "dR(A, LJ) < 0.2", |o| {
            Ok(nearest_delta_r(o.get("genAs")?, o.get("ljs")?)?.iter().map(|&d| d < 0.2).collect())
        }),
        ("electrons", "pT > 10 GeV", |o| pt_above(o, "electrons", 10.0)),
        ("electrons", "|eta| < 2.4", |o| abs_eta_below(o, "electrons", 2.4)),
        ("photons", "pT > 10 GeV", |o| pt_above(o, "photons", 10.0)),
        ("photons", "|eta| < 2.4", |o| abs_eta_below(o, "photons", 2.4)),
        ("muons", "pT > 10 GeV", |o| pt_above(o, "muons", 10.0)),
        ("muons", "|eta| < 2.4", |o| abs_eta_below(o, "muons", 2.4)),
        ("dsaMuons", "pT > 10 GeV", |o| pt_above(o, "dsaMuons", 10.0)),
        ("dsaMuons", "|eta| < 2.4", |o| abs_eta_below(o, "dsaMuons", 2.4)),
    ]
}

/// Per event, how many of the two leading lepton jets satisfy `predicate(muon_n)`.
fn leading_lj_count(objs: &Objects, predicate: fn(f64) -> bool) -> Result<Vec<usize>> {
    let ljs = objs.get("ljs")?;
    let muon_n = ljs.quantity("muon_n")?;
    Ok((0..ljs.n_parents())
        .map(|event| ljs.row_range(event).take(2).filter(|&i| predicate(muon_n[i])).count())
        .collect())
}

fn builtin_evt_cuts() -> [(&'static str, EvtCutFn); 6] {
    [
        ("PV filter", |o| Ok(o.counts("pvs")?.iter().map(|&n| n >= 1).collect())),
        ("Cosmic veto", |o| {
            let veto = o.get("cosmicveto")?;
            let result = veto.quantity("result")?;
            Ok((0..veto.n_parents())
                .map(|event| veto.row_range(event).any(|i| result[i] != 0.0))
                .collect())
        }),
        (">=2 LJs", |o| Ok(o.counts("ljs")?.iter().map(|&n| n >= 2).collect())),
        (">=2 matched As", |o| {
            Ok(matched_gen_as(o, 0.2)?.counts().iter().map(|&n| n >= 2).collect())
        }),
        ("4mu", |o| Ok(leading_lj_count(o, |n| n >= 2.0)?.iter().map(|&n| n == 2).collect())),
        ("2mu2e", |o| {
            let mu = leading_lj_count(o, |n| n >= 2.0)?;
            let egm = leading_lj_count(o, |n| n == 0.0)?;
            Ok(mu.iter().zip(&egm).map(|(&m, &e)| m == 1 && e == 1).collect())
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidm_ntuple::{Collection, VectorKind};

    fn ljs(counts: &[usize], pt: Vec<f64>, muon_n: Vec<f64>) -> Collection {
        let n = pt.len();
        Collection::from_counts("ljs", VectorKind::None, counts)
            .with_field("pt", pt)
            .unwrap()
            .with_field("eta", vec![0.0; n])
            .unwrap()
            .with_field("phi", vec![0.0; n])
            .unwrap()
            .with_field("muon_n", muon_n)
            .unwrap()
    }

    #[test]
    fn channel_cuts_use_leading_two_ljs() {
        let mut objs = Objects::new(3);
        // event 0: mu, mu; event 1: mu, egm, mu; event 2: egm only
        objs.insert(
            "ljs",
            ljs(&[2, 3, 1], vec![50.0, 40.0, 60.0, 50.0, 40.0, 30.0], vec![
                2.0, 3.0, 2.0, 0.0, 2.0, 0.0,
            ]),
        )
        .unwrap();
        let reg = CutRegistry::default();
        assert_eq!(reg.evt_cut("4mu").unwrap()(&objs).unwrap(), vec![true, false, false]);
        assert_eq!(reg.evt_cut("2mu2e").unwrap()(&objs).unwrap(), vec![false, true, false]);
        assert_eq!(reg.evt_cut(">=2 LJs").unwrap()(&objs).unwrap(), vec![true, true, false]);
    }

    #[test]
    fn object_cuts_are_elementwise() {
        let mut objs = Objects::new(2);
        objs.insert("ljs", ljs(&[2, 1], vec![50.0, 20.0, 31.0], vec![2.0; 3])).unwrap();
        let reg = CutRegistry::default();
        let mask = reg.obj_cut("ljs", "pT > 30 GeV").unwrap()(&objs).unwrap();
        assert_eq!(mask, vec![true, false, true]);
    }

    #[test]
    fn unknown_cuts_are_errors() {
        let reg = CutRegistry::default();
        assert!(matches!(reg.evt_cut("nope"), Err(Error::Selection(_))));
        assert!(reg.obj_cut("muons", "nope").is_err());
        assert!(reg.obj_cut_names("pvs").contains(&"ndof > 4"));
    }

    #[test]
    fn missing_collection_fails_evaluation() {
        let objs = Objects::new(1);
        let reg = CutRegistry::default();
        assert!(reg.evt_cut("PV filter").unwrap()(&objs).is_err());
    }
}
