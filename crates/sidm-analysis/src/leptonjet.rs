//! Lepton-jet reconstruction.
//!
//! Lepton jets are either taken from the ntuple or re-clustered from lepton
//! and photon candidates with a sequential-recombination algorithm. The
//! `lj_reco` choice selects the inputs and the distance parameter:
//!
//! - `0`: ntuple lepton jets (`ntuple_ljs`),
//! - `< 0`: cluster the `ljsources` collection with `R = |lj_reco|`,
//! - `> 0`: cluster muons, DSA muons, electrons and photons with `R = lj_reco`.

use serde::{Deserialize, Serialize};
use sidm_core::{Error, Result};
use sidm_ntuple::{Collection, VectorKind};

use crate::objects::{Kinematics, Objects, pt_ordered};
use crate::vector::{LorentzVector, delta_phi};

/// Constituent type codes of the lepton-jet sources.
pub mod part_type {
    /// Electron.
    pub const ELECTRON: f64 = 2.0;
    /// PF muon.
    pub const MUON: f64 = 3.0;
    /// Photon.
    pub const PHOTON: f64 = 4.0;
    /// Displaced standalone muon.
    pub const DSA_MUON: f64 = 8.0;
}

/// Isolation fields that re-clustered lepton jets do not compute; filled with `-1`.
pub const ISOLATION_PLACEHOLDERS: [&str; 7] = [
    "pfiso",
    "pfIsolation07",
    "pfIsolation05",
    "pfIsolationPtNoPU07",
    "pfIsolationPtNoPU05",
    "pfIsolationPt07",
    "pfIsolationPt05",
];

/// Sequential-recombination algorithm.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum JetAlgorithm {
    /// `p = -1`.
    AntiKt,
    /// `p = 1`.
    Kt,
    /// `p = 0`.
    CambridgeAachen,
}

impl JetAlgorithm {
    fn exponent(self) -> i32 {
        match self {
            JetAlgorithm::AntiKt => -1,
            JetAlgorithm::Kt => 1,
            JetAlgorithm::CambridgeAachen => 0,
        }
    }
}

/// Jet algorithm, distance parameter and minimum jet `pt`.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct JetDefinition {
    /// Algorithm.
    pub algorithm: JetAlgorithm,
    /// Distance parameter `R`.
    pub radius: f64,
    /// Jets with `pt <= min_pt` are discarded (0 keeps everything).
    pub min_pt: f64,
}

/// Clustered jet: summed momentum and the indices of its input particles.
#[derive(Debug, Clone, PartialEq)]
pub struct Jet {
    /// Four-momentum (E-scheme recombination).
    pub momentum: LorentzVector,
    /// Indices into the clustered particle list, ascending.
    pub constituents: Vec<usize>,
}

struct PseudoJet {
    p: LorentzVector,
    rap: f64,
    phi: f64,
    kt2p: f64,
    constituents: Vec<usize>,
}

impl PseudoJet {
    fn new(p: LorentzVector, constituents: Vec<usize>, exponent: i32) -> Self {
        Self { rap: p.rapidity(), phi: p.phi(), kt2p: p.pt2().powi(exponent), p, constituents }
    }
}

impl JetDefinition {
    /// Anti-kt inclusive jets with radius `radius`.
    pub fn anti_kt(radius: f64) -> Self {
        Self { algorithm: JetAlgorithm::AntiKt, radius, min_pt: 0.0 }
    }

    /// Inclusive jets of `particles`, in the order they were completed.
    ///
    /// Particles without transverse momentum have no rapidity and are not
    /// clustered; constituent indices still refer to `particles`.
    pub fn cluster(&self, particles: &[LorentzVector]) -> Vec<Jet> {
        let exponent = self.algorithm.exponent();
        let r2 = self.radius * self.radius;
        let mut active: Vec<PseudoJet> = particles
            .iter()
            .enumerate()
            .filter(|(_, p)| p.pt2() > 0.0 && p.pt2().is_finite())
            .map(|(i, &p)| PseudoJet::new(p, vec![i], exponent))
            .collect();
        let mut jets = Vec::new();

        while !active.is_empty() {
            // beam distance of the first candidate, then any smaller pair distance
            let mut best = (active[0].kt2p, 0, None);
            for i in 0..active.len() {
                if active[i].kt2p < best.0 {
                    best = (active[i].kt2p, i, None);
                }
                for j in (i + 1)..active.len() {
                    let (a, b) = (&active[i], &active[j]);
                    let dphi = delta_phi(a.phi, b.phi);
                    let drap = a.rap - b.rap;
                    let dij = a.kt2p.min(b.kt2p) * (drap * drap + dphi * dphi) / r2;
                    if dij < best.0 {
                        best = (dij, i, Some(j));
                    }
                }
            }
            match best {
                (_, i, Some(j)) => {
                    let b = active.swap_remove(j);
                    let a = active.swap_remove(i);
                    let mut constituents = a.constituents;
                    constituents.extend(b.constituents);
                    active.push(PseudoJet::new(a.p + b.p, constituents, exponent));
                }
                (_, i, None) => {
                    let mut done = active.swap_remove(i);
                    done.constituents.sort_unstable();
                    jets.push(Jet { momentum: done.p, constituents: done.constituents });
                }
            }
        }

        let min_pt2 = self.min_pt * self.min_pt;
        jets.retain(|j| self.min_pt <= 0.0 || j.momentum.pt2() > min_pt2);
        jets
    }
}

/// Lepton-jet input candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    p: LorentzVector,
    part_type: f64,
    charge: f64,
}

/// Per-event candidates of a collection with a fixed type code.
fn collection_candidates(
    c: &Collection,
    part_type: Option<f64>,
    charge: bool,
    out: &mut [Vec<Candidate>],
) -> Result<()> {
    let p = c.lorentz_vectors()?;
    let types = match part_type {
        Some(_) => None,
        None => Some(c.quantity("type")?),
    };
    let charges = if charge { Some(c.quantity("charge")?) } else { None };
    for (event, cands) in out.iter_mut().enumerate() {
        for i in c.row_range(event) {
            cands.push(Candidate {
                p: p[i],
                part_type: part_type.or_else(|| types.as_ref().map(|t| t[i])).unwrap_or_default(),
                charge: charges.as_ref().map_or(0.0, |q| q[i]),
            });
        }
    }
    Ok(())
}

fn lj_candidates(objs: &Objects, lj_reco: f64) -> Result<Vec<Vec<Candidate>>> {
    let mut out = vec![Vec::new(); objs.n_events()];
    if lj_reco < 0.0 {
        collection_candidates(objs.get("ljsources")?, None, true, &mut out)?;
    } else {
        collection_candidates(objs.get("muons")?, Some(part_type::MUON), true, &mut out)?;
        collection_candidates(objs.get("dsaMuons")?, Some(part_type::DSA_MUON), true, &mut out)?;
        collection_candidates(objs.get("electrons")?, Some(part_type::ELECTRON), true, &mut out)?;
        collection_candidates(objs.get("photons")?, Some(part_type::PHOTON), false, &mut out)?;
    }
    Ok(out)
}

/// Maximum pairwise `ΔR` between constituents (0 for fewer than two).
fn dr_spread(constituents: &[LorentzVector]) -> f64 {
    let mut max = 0.0_f64;
    for (i, a) in constituents.iter().enumerate() {
        for b in &constituents[i + 1..] {
            max = max.max(a.delta_r(b));
        }
    }
    max
}

/// Cluster per-event candidates into an `ljs` collection.
fn cluster_lepton_jets(candidates: &[Vec<Candidate>], def: &JetDefinition) -> Result<Collection> {
    let mut jet_counts = Vec::with_capacity(candidates.len());
    let mut const_counts = Vec::new();
    let mut jets_p4: Vec<LorentzVector> = Vec::new();
    let mut consts: Vec<Candidate> = Vec::new();
    let (mut muon_n, mut electron_n, mut photon_n, mut spread) =
        (Vec::new(), Vec::new(), Vec::new(), Vec::new());

    for cands in candidates {
        let momenta: Vec<LorentzVector> = cands.iter().map(|c| c.p).collect();
        let jets = def.cluster(&momenta);
        jet_counts.push(jets.len());
        for jet in jets {
            let members: Vec<Candidate> = jet.constituents.iter().map(|&i| cands[i]).collect();
            let count = |codes: &[f64]| {
                members.iter().filter(|c| codes.contains(&c.part_type)).count() as f64
            };
            muon_n.push(count(&[part_type::MUON, part_type::DSA_MUON]));
            electron_n.push(count(&[part_type::ELECTRON]));
            photon_n.push(count(&[part_type::PHOTON]));
            spread.push(dr_spread(&members.iter().map(|c| c.p).collect::<Vec<_>>()));
            const_counts.push(members.len());
            consts.extend(members);
            jets_p4.push(jet.momentum);
        }
    }

    let mut constituents = Collection::from_counts("constituents", VectorKind::LorentzVector, &const_counts);
    let getters: [(&str, fn(&Candidate) -> f64); 6] = [
        ("x", |c| c.p.x),
        ("y", |c| c.p.y),
        ("z", |c| c.p.z),
        ("t", |c| c.p.t),
        ("part_type", |c| c.part_type),
        ("charge", |c| c.charge),
    ];
    for (name, get) in getters {
        constituents.insert_field(name, consts.iter().map(get).collect())?;
    }

    let n_jets = jets_p4.len();
    let mut ljs = Collection::from_counts("ljs", VectorKind::LorentzVector, &jet_counts)
        .with_field("x", jets_p4.iter().map(|p| p.x).collect())?
        .with_field("y", jets_p4.iter().map(|p| p.y).collect())?
        .with_field("z", jets_p4.iter().map(|p| p.z).collect())?
        .with_field("t", jets_p4.iter().map(|p| p.t).collect())?
        .with_field("muon_n", muon_n)?
        .with_field("electron_n", electron_n)?
        .with_field("photon_n", photon_n)?
        .with_field("dRSpread", spread)?;
    for name in ISOLATION_PLACEHOLDERS {
        ljs.insert_field(name, vec![-1.0; n_jets])?;
    }
    ljs.insert_child(constituents)?;
    pt_ordered(ljs)
}

/// Lepton jets for reconstruction choice `lj_reco`.
pub fn build_lepton_jets(objs: &Objects, lj_reco: f64) -> Result<Collection> {
    if !lj_reco.is_finite() {
        return Err(Error::NotImplemented(format!(
            "{lj_reco} is not a recognized lepton-jet reconstruction choice"
        )));
    }
    if lj_reco == 0.0 {
        let mut ljs = objs.get("ntuple_ljs")?.clone();
        ljs.name = "ljs".into();
        return Ok(ljs);
    }
    let candidates = lj_candidates(objs, lj_reco)?;
    tracing::debug!(
        lj_reco,
        n_candidates = candidates.iter().map(Vec::len).sum::<usize>(),
        "clustering lepton jets"
    );
    cluster_lepton_jets(&candidates, &JetDefinition::anti_kt(lj_reco.abs()))
}
