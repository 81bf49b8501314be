//! Event-level and object-level selections.
//!
//! [`Selection`] evaluates named event cuts and drops failing events from
//! every collection. [`JaggedSelection`] evaluates named object cuts once and
//! slims individual collections with per-channel combinations of them.

use std::collections::BTreeMap;

use sidm_core::{Error, Result};

use crate::cuts::CutRegistry;
use crate::objects::Objects;

/// Ordered named boolean masks of a common length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedSelection {
    len: Option<usize>,
    masks: Vec<(String, Vec<bool>)>,
}

impl PackedSelection {
    /// Empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named mask. Re-adding a name replaces its mask in place.
    pub fn add(&mut self, name: impl Into<String>, mask: Vec<bool>) -> Result<()> {
        let name = name.into();
        if let Some(len) = self.len
            && len != mask.len()
        {
            return Err(Error::Selection(format!(
                "mask '{name}' has length {}, expected {len}",
                mask.len()
            )));
        }
        self.len = Some(mask.len());
        match self.masks.iter_mut().find(|(n, _)| *n == name) {
            Some((_, m)) => *m = mask,
            None => self.masks.push((name, mask)),
        }
        Ok(())
    }

    /// Mask by name.
    pub fn get(&self, name: &str) -> Option<&[bool]> {
        self.masks.iter().find(|(n, _)| n == name).map(|(_, m)| m.as_slice())
    }

    /// Logical AND of the named masks. An empty list selects everything.
    pub fn all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<bool>> {
        let mut out = vec![true; self.len.unwrap_or(0)];
        for name in names {
            let name = name.as_ref();
            let mask = self
                .get(name)
                .ok_or_else(|| Error::Selection(format!("cut '{name}' has not been evaluated")))?;
            for (o, &m) in out.iter_mut().zip(mask) {
                *o &= m;
            }
        }
        Ok(out)
    }

    /// Mask names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.masks.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of entries per mask (0 if empty).
    pub fn len(&self) -> usize {
        self.len.unwrap_or(0)
    }

    /// Whether no mask has been added.
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

/// Event-level selection: an ordered list of event cut names.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Names of the cuts to apply, in order.
    pub evt_cuts: Vec<String>,
    /// Evaluated cut masks (filled by [`Selection::apply_evt_cuts`]).
    pub all_evt_cuts: PackedSelection,
}

impl Selection {
    /// Selection applying `cuts` in order.
    pub fn new(cuts: Vec<String>) -> Self {
        Self { evt_cuts: cuts, all_evt_cuts: PackedSelection::new() }
    }

    /// Evaluate every cut and return the objects of passing events.
    pub fn apply_evt_cuts(&mut self, objs: &Objects, registry: &CutRegistry) -> Result<Objects> {
        self.all_evt_cuts = PackedSelection::new();
        for cut in &self.evt_cuts {
            tracing::debug!(cut = %cut, "applying event cut");
            let mask = registry.evt_cut(cut)?(objs)?;
            self.all_evt_cuts.add(cut.clone(), mask)?;
        }
        objs.filter_events(&self.passing_mask(objs.n_events())?)
    }

    /// Events passing every cut (all true when there are no cuts).
    pub fn passing_mask(&self, n_events: usize) -> Result<Vec<bool>> {
        if self.evt_cuts.is_empty() {
            return Ok(vec![true; n_events]);
        }
        self.all_evt_cuts.all(&self.evt_cuts)
    }
}

/// Evaluated object cuts: collection -> cut name -> element mask.
pub type ObjMasks = BTreeMap<String, Vec<bool>>;

/// Object-level selection.
#[derive(Debug, Clone, Default)]
pub struct JaggedSelection {
    /// Cuts to evaluate per collection.
    pub obj_cuts: BTreeMap<String, Vec<String>>,
    evaluated: BTreeMap<String, BTreeMap<String, Vec<bool>>>,
}

impl JaggedSelection {
    /// Selection evaluating `cuts` (collection -> cut names).
    pub fn new(cuts: BTreeMap<String, Vec<String>>) -> Self {
        Self { obj_cuts: cuts, evaluated: BTreeMap::new() }
    }

    /// Evaluate every configured cut not evaluated yet.
    ///
    /// Missing collections and failing evaluations are skipped with a warning.
    pub fn evaluate_obj_cuts(&mut self, objs: &Objects, registry: &CutRegistry) {
        for (obj, cuts) in &self.obj_cuts {
            if !objs.contains(obj) {
                tracing::warn!(object = %obj, cuts = ?cuts, "object not found in sample, cuts will not be applied");
                continue;
            }
            let done = self.evaluated.entry(obj.clone()).or_default();
            for cut in cuts {
                if done.contains_key(cut) {
                    continue;
                }
                match registry.obj_cut(obj, cut).and_then(|f| f(objs)) {
                    Ok(mask) => {
                        done.insert(cut.clone(), mask);
                    }
                    Err(e) => {
                        tracing::warn!(object = %obj, cut = %cut, error = %e, "unable to apply cut, skipping")
                    }
                }
            }
        }
    }

    /// Whether `cut` on `obj` has been evaluated.
    pub fn is_evaluated(&self, obj: &str, cut: &str) -> bool {
        self.evaluated.get(obj).is_some_and(|c| c.contains_key(cut))
    }

    /// One mask per collection: AND of the requested, evaluated cuts.
    pub fn make_obj_masks(&self, channel_cuts: &BTreeMap<String, Vec<String>>) -> ObjMasks {
        let mut masks = ObjMasks::new();
        for (obj, cuts) in channel_cuts {
            let Some(evaluated) = self.evaluated.get(obj) else {
                tracing::warn!(object = %obj, cuts = ?cuts, "object not found in sample, cuts will not be applied");
                continue;
            };
            for cut in cuts {
                let Some(mask) = evaluated.get(cut) else {
                    tracing::warn!(object = %obj, cut = %cut, "cut was not evaluated, skipping");
                    continue;
                };
                match masks.get_mut(obj) {
                    Some(m) => m.iter_mut().zip(mask).for_each(|(a, &b)| *a &= b),
                    None => {
                        masks.insert(obj.clone(), mask.clone());
                    }
                }
            }
        }
        masks
    }

    /// Filter collections elementwise. Collections without a mask pass unchanged.
    pub fn apply_obj_masks(&self, objs: &Objects, masks: &ObjMasks) -> Result<Objects> {
        let mut out = Objects::new(objs.n_events());
        for (name, c) in objs.iter() {
            let c = match masks.get(name) {
                Some(mask) => c.filter_elements(mask)?,
                None => c.clone(),
            };
            out.insert(name, c)?;
        }
        for name in masks.keys() {
            if !objs.contains(name) {
                tracing::warn!(object = %name, "mask given for an unknown collection");
            }
        }
        Ok(out)
    }

    /// [`JaggedSelection::make_obj_masks`] followed by [`JaggedSelection::apply_obj_masks`].
    pub fn make_and_apply_obj_masks(
        &self,
        objs: &Objects,
        channel_cuts: &BTreeMap<String, Vec<String>>,
    ) -> Result<Objects> {
        self.apply_obj_masks(objs, &self.make_obj_masks(channel_cuts))
    }
}
