//! Schema builder: flat branch namespace -> nested object collections.
//!
//! FireFighter ntuples store every object attribute as its own branch, named
//! by convention (`muon_pt`, `pfjet_pfcand_pt`, `muon_p4/muon_p4.fCoordinates.fX`).
//! [`Schema::build`] groups those branches into an [`EventRecord`] in three
//! passes:
//!
//! 1. split vector branches (`obj/obj.fCoordinates.fX` ...) become two-,
//!    three- or Lorentz-vector collections;
//! 2. `{obj}_{sub}_{attr}` branches that share a sub-object prefix become a
//!    sub-collection, nested under `obj` when a per-element counts branch
//!    describes the grouping;
//! 3. remaining `{obj}_{attr}` branches become fields of collection `obj`,
//!    grouped by the `{obj}_n` counts branch when present.
//!
//! Special cases (trigger objects, multi-word names, irregular counts names)
//! are resolved from [`SchemaConfig`] before the generic grouping runs. Every
//! input branch ends up in exactly one place: a collection field, a per-event
//! scalar, or a consumed counts branch.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sidm_core::{Error, Result};

use crate::branch::{Branch, BranchSet};
use crate::jagged::counts_to_offsets;
use crate::record::{Collection, EventRecord, VectorKind};

/// Naming conventions used to interpret branch names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Prefixes of one-value-per-event branches whose names contain underscores.
    pub single_value_prefixes: Vec<String>,
    /// Object names that themselves contain underscores.
    pub multiword_objects: Vec<String>,
    /// Prefixes of trigger-object counts branches (`{prefix...}_n`).
    pub trigger_object_prefixes: Vec<String>,
    /// Irregular counts branch names: `{obj}` or `{obj}_{sub}` -> counts branch.
    /// `None` means the collection has no counts branch.
    pub counts_overrides: BTreeMap<String, Option<String>>,
    /// Suffixes stripped from Lorentz-vector branch groups to get the object name.
    pub lorentz_suffixes: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            single_value_prefixes: vec!["HLT".into(), "tomatchfilter".into()],
            multiword_objects: vec!["akjet_ak4PFJetsCHS".into()],
            trigger_object_prefixes: vec!["TO".into(), "L1TO".into()],
            counts_overrides: BTreeMap::from([
                ("pfjet_pfcand".to_string(), Some("pfjet_pfcands_n".to_string())),
                ("pfjet_pfcands".to_string(), None),
            ]),
            lorentz_suffixes: vec!["_p4".into(), "_rawP4".into()],
        }
    }
}

impl SchemaConfig {
    fn counts_name(&self, base: &str) -> Option<String> {
        match self.counts_overrides.get(base) {
            Some(over) => over.clone(),
            None => Some(format!("{base}_n")),
        }
    }

    fn strip_lorentz_suffix<'a>(&self, obj: &'a str) -> &'a str {
        self.lorentz_suffixes.iter().find_map(|s| obj.strip_suffix(s.as_str())).unwrap_or(obj)
    }
}

/// Result of [`Schema::build_with_report`].
#[derive(Debug, Clone)]
pub struct SchemaReport {
    /// Counts branches consumed to build offsets (not present in the record).
    pub consumed_counts: Vec<String>,
    /// Number of input branches.
    pub n_input_branches: usize,
}

/// Branch-name based schema builder.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    config: SchemaConfig,
}

impl Schema {
    /// Create a builder with the given naming conventions.
    pub fn new(config: SchemaConfig) -> Self {
        Self { config }
    }

    /// Naming conventions in use.
    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    /// Build an [`EventRecord`] from a flat branch namespace.
    pub fn build(&self, branches: BranchSet) -> Result<EventRecord> {
        self.build_with_report(branches).map(|(record, _)| record)
    }

    /// Like [`Schema::build`], also reporting which counts branches were consumed.
    pub fn build_with_report(&self, branches: BranchSet) -> Result<(EventRecord, SchemaReport)> {
        let n_input_branches = branches.len();
        let mut b = Builder {
            config: &self.config,
            n_events: branches.n_events(),
            branches: branches.into_inner(),
            collections: BTreeMap::new(),
            consumed_counts: Vec::new(),
        };

        let single_values: BTreeSet<String> = b
            .branches
            .keys()
            .filter(|n| starts_with_any(n, &self.config.single_value_prefixes))
            .cloned()
            .collect();
        let trigger_objects: Vec<String> = b
            .branches
            .keys()
            .filter(|n| starts_with_any(n, &self.config.trigger_object_prefixes))
            .filter_map(|n| n.strip_suffix("_n").map(str::to_string))
            .collect();

        b.build_vector_objects(&trigger_objects)?;

        for (obj, attributes) in b.group_object_branches(&single_values, &trigger_objects) {
            b.build_object(&obj, attributes)?;
        }

        let record = b.finish()?;
        tracing::debug!(
            n_events = record.n_events,
            collections = record.collections.len(),
            scalars = record.scalars.len(),
            "built event record"
        );
        let report = SchemaReport { consumed_counts: b.consumed_counts, n_input_branches };
        Ok((record, report))
    }
}

struct Builder<'a> {
    config: &'a SchemaConfig,
    n_events: usize,
    branches: BTreeMap<String, Branch>,
    collections: BTreeMap<String, Collection>,
    consumed_counts: Vec<String>,
}

impl Builder<'_> {
    fn take(&mut self, name: &str) -> Result<Branch> {
        self.branches
            .remove(name)
            .ok_or_else(|| Error::Schema(format!("expected branch '{name}' is missing")))
    }

    fn consume_counts(&mut self, name: &str) -> Option<Branch> {
        let branch = self.branches.remove(name)?;
        self.consumed_counts.push(name.to_string());
        Some(branch)
    }

    /// Step 1: split vector branches.
    fn build_vector_objects(&mut self, trigger_objects: &[String]) -> Result<()> {
        let vector_objects: BTreeSet<String> = self
            .branches
            .keys()
            .filter_map(|b| b.split_once('/').map(|(obj, _)| obj.to_string()))
            .collect();

        for obj in vector_objects {
            let prefix = format!("{obj}/");
            let components: BTreeSet<&str> = self
                .branches
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .map(|k| k.rsplit('.').next().unwrap_or(k.as_str()))
                .collect();
            let components: Vec<&str> = components.into_iter().collect();

            let (name, kind, sources) = match components.as_slice() {
                ["fT", "fX", "fY", "fZ"] => {
                    let name = self.config.strip_lorentz_suffix(&obj).to_string();
                    let sources = ["x", "y", "z", "t"]
                        .iter()
                        .zip(["fX", "fY", "fZ", "fT"])
                        .map(|(f, c)| (f.to_string(), format!("{obj}/{obj}.fCoordinates.{c}")))
                        .collect::<Vec<_>>();
                    (name, VectorKind::LorentzVector, sources)
                }
                ["fX", "fY", "fZ"] => {
                    let sources = ["x", "y", "z"]
                        .iter()
                        .zip(["fX", "fY", "fZ"])
                        .map(|(f, c)| (f.to_string(), format!("{obj}/{obj}.fCoordinates.{c}")))
                        .collect::<Vec<_>>();
                    (obj.clone(), VectorKind::ThreeVector, sources)
                }
                ["fX", "fY"] => {
                    let sources = ["x", "y"]
                        .iter()
                        .zip(["fX", "fY"])
                        .map(|(f, c)| (f.to_string(), format!("{obj}/fCoordinates/fCoordinates.{c}")))
                        .collect::<Vec<_>>();
                    (obj.clone(), VectorKind::TwoVector, sources)
                }
                other => {
                    return Err(Error::Schema(format!(
                        "unrecognized class with split branches '{obj}': {other:?}"
                    )));
                }
            };

            let mut fields = Vec::with_capacity(sources.len());
            for (field, source) in sources {
                let branch = self.take(&source)?;
                fields.push((field, source, branch));
            }

            let mut counts_offsets = None;
            if kind == VectorKind::LorentzVector && trigger_objects.contains(&name) {
                let counts_name = format!("{name}_n");
                if let Some(counts) = self.consume_counts(&counts_name) {
                    counts_offsets = Some(event_counts_offsets(&counts_name, counts)?);
                }
            }

            let collection = assemble(&name, kind, self.n_events, counts_offsets, fields)?;
            tracing::trace!(collection = %name, kind = ?kind, "vector collection");
            self.collections.insert(name, collection);
        }
        Ok(())
    }

    /// Step 2: identify object branches and assign each to its owning object.
    ///
    /// Returns `object -> attribute names` (suffixes after `{obj}_`).
    fn group_object_branches(
        &self,
        single_values: &BTreeSet<String>,
        trigger_objects: &[String],
    ) -> BTreeMap<String, Vec<String>> {
        let mut objects: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in self.branches.keys() {
            if single_values.contains(name) || !name.contains('_') {
                continue;
            }
            if trigger_objects.iter().any(|t| name.starts_with(t.as_str())) {
                continue;
            }
            let multiword = self
                .config
                .multiword_objects
                .iter()
                .filter(|mw| name.starts_with(mw.as_str()))
                .max_by_key(|mw| mw.len());
            let (obj, attr) = match multiword {
                Some(mw) => match name[mw.len()..].strip_prefix('_') {
                    Some(attr) if !attr.is_empty() => (mw.as_str(), attr),
                    _ => continue,
                },
                None => match name.split_once('_') {
                    Some((obj, attr)) if !obj.is_empty() && !attr.is_empty() => (obj, attr),
                    _ => continue,
                },
            };
            objects.entry(obj.to_string()).or_default().push(attr.to_string());
        }
        objects
    }

    /// Step 3: build one object, its sub-objects, and attach attributes.
    fn build_object(&mut self, obj: &str, attributes: Vec<String>) -> Result<()> {
        let mut token_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for a in &attributes {
            if let Some((tok, _)) = a.split_once('_') {
                *token_counts.entry(tok).or_default() += 1;
            }
        }
        let subobjects: Vec<String> =
            token_counts.into_iter().filter(|&(_, n)| n > 1).map(|(t, _)| t.to_string()).collect();

        let (mut plain, sub_attrs): (Vec<String>, Vec<String>) =
            attributes.into_iter().partition(|a| !starts_with_any(a, &subobjects));

        let mut children = Vec::new();
        for sub in &subobjects {
            if let Some(child) = self.build_subobject(obj, sub, &sub_attrs)? {
                children.push(child);
            }
        }
        // Sub-attributes nothing consumed (irregular counts names, lone `_n`
        // branches) stay attributes of the object itself.
        plain.extend(sub_attrs.into_iter().filter(|a| self.branches.contains_key(&format!("{obj}_{a}"))));

        let counts_offsets = match self.config.counts_name(obj) {
            Some(counts_name) => match self.consume_counts(&counts_name) {
                Some(counts) => Some(event_counts_offsets(&counts_name, counts)?),
                None => None,
            },
            None => None,
        };

        let mut fields = Vec::new();
        for attr in plain {
            if attr == "n" {
                continue;
            }
            let source = format!("{obj}_{attr}");
            if let Some(branch) = self.branches.remove(&source) {
                fields.push((attr, source, branch));
            }
        }

        let mut collection = match self.collections.remove(obj) {
            Some(existing) => {
                if let Some(offsets) = &counts_offsets
                    && offsets.as_slice() != existing.offsets()
                {
                    return Err(Error::Schema(format!(
                        "counts branch for '{obj}' disagrees with its vector branches"
                    )));
                }
                attach_fields(existing, fields)?
            }
            None => assemble(obj, VectorKind::None, self.n_events, counts_offsets, fields)?,
        };

        for child in children {
            check_child_grouping(&collection, &child.0, child.1.as_deref())?;
            collection.insert_child(child.0)?;
        }
        tracing::trace!(collection = %obj, elements = collection.n_elements(), "object collection");
        self.collections.insert(obj.to_string(), collection);
        Ok(())
    }

    /// Build sub-object `{obj}_{sub}`.
    ///
    /// Returns a child collection (with the per-event element counts of its
    /// source branches, used for a consistency check) when it is grouped by a
    /// per-element counts branch. Sub-objects without counts are registered
    /// as top-level collections and `None` is returned.
    fn build_subobject(
        &mut self,
        obj: &str,
        sub: &str,
        sub_attrs: &[String],
    ) -> Result<Option<(Collection, Option<Vec<usize>>)>> {
        let base = format!("{obj}_{sub}");
        let prefix = format!("{sub}_");

        let mut fields = Vec::new();
        for a in sub_attrs {
            let Some(field) = a.strip_prefix(&prefix) else { continue };
            if field.is_empty() || a.ends_with("_n") {
                continue;
            }
            let source = format!("{obj}_{a}");
            if let Some(branch) = self.branches.remove(&source) {
                fields.push((field.to_string(), source, branch));
            }
        }
        if fields.is_empty() {
            return Ok(None);
        }

        let counts = match self.config.counts_name(&base) {
            Some(name) => self.consume_counts(&name).map(|c| (name, c)),
            None => None,
        };

        match counts {
            Some((counts_name, counts)) => {
                let per_parent = match counts {
                    Branch::Scalar(v) => v,
                    Branch::Jagged(j) => j.flat,
                };
                let offsets = counts_to_offsets(&counts_name, &per_parent)?;
                let mut child = Collection::new(base.clone(), VectorKind::None, offsets)?;
                let mut event_counts: Option<Vec<usize>> = None;
                for (field, source, branch) in fields {
                    let values = match branch {
                        Branch::Scalar(v) => v,
                        Branch::Jagged(j) => {
                            let counts = j.counts();
                            if let Some(prev) = &event_counts
                                && *prev != counts
                            {
                                return Err(Error::Schema(format!(
                                    "branches of '{base}' disagree on per-event lengths ('{source}')"
                                )));
                            }
                            event_counts = Some(counts);
                            j.flat
                        }
                    };
                    child.insert_field(field, values).map_err(|e| {
                        Error::Schema(format!("'{source}' does not match '{counts_name}': {e}"))
                    })?;
                }
                Ok(Some((child, event_counts)))
            }
            None => {
                let collection = assemble(&base, VectorKind::None, self.n_events, None, fields)?;
                tracing::debug!(
                    collection = %base,
                    "sub-object has no counts branch; grouped per event"
                );
                self.collections.insert(base, collection);
                Ok(None)
            }
        }
    }

    /// Step 4: leftovers become per-event scalars or single-field collections.
    fn finish(&mut self) -> Result<EventRecord> {
        let mut record = EventRecord::new(self.n_events);
        for (name, branch) in std::mem::take(&mut self.branches) {
            match branch {
                Branch::Scalar(v) => {
                    record.scalars.insert(name, v);
                }
                Branch::Jagged(j) => {
                    let c = Collection::new(name.clone(), VectorKind::None, j.offsets)?
                        .with_field("value", j.flat)?;
                    record.insert_collection(c)?;
                }
            }
        }
        for (_, c) in std::mem::take(&mut self.collections) {
            record.insert_collection(c)?;
        }
        Ok(record)
    }
}

fn starts_with_any(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

/// Offsets from a per-event counts branch.
fn event_counts_offsets(name: &str, counts: Branch) -> Result<Vec<usize>> {
    match counts {
        Branch::Scalar(v) => counts_to_offsets(name, &v),
        Branch::Jagged(_) => {
            Err(Error::Schema(format!("counts branch '{name}' must have one value per event")))
        }
    }
}

/// Zip attribute branches into a collection grouped by events.
///
/// Offsets come from the counts branch if given, otherwise from the jagged
/// branches; all-scalar inputs make a singleton collection.
fn assemble(
    name: &str,
    kind: VectorKind,
    n_events: usize,
    counts_offsets: Option<Vec<usize>>,
    fields: Vec<(String, String, Branch)>,
) -> Result<Collection> {
    let jagged_offsets = fields.iter().find_map(|(_, _, b)| match b {
        Branch::Jagged(j) => Some(j.offsets.clone()),
        Branch::Scalar(_) => None,
    });

    let mut collection = match (counts_offsets, jagged_offsets) {
        (Some(offsets), _) | (None, Some(offsets)) => Collection::new(name, kind, offsets)?,
        (None, None) => Collection::singleton(name, kind, n_events),
    };
    attach(&mut collection, fields)?;
    Ok(collection)
}

fn attach_fields(mut collection: Collection, fields: Vec<(String, String, Branch)>) -> Result<Collection> {
    attach(&mut collection, fields)?;
    Ok(collection)
}

fn attach(collection: &mut Collection, fields: Vec<(String, String, Branch)>) -> Result<()> {
    for (field, source, branch) in fields {
        let values = match branch {
            Branch::Jagged(j) => {
                if j.offsets.as_slice() != collection.offsets() {
                    return Err(Error::Schema(format!(
                        "branch '{source}' is not aligned with collection '{}'",
                        collection.name
                    )));
                }
                j.flat
            }
            Branch::Scalar(v) => {
                if !collection.is_singleton() && collection.counts().iter().any(|&c| c != 1) {
                    return Err(Error::Schema(format!(
                        "per-event branch '{source}' cannot be a field of jagged collection '{}'",
                        collection.name
                    )));
                }
                v
            }
        };
        collection.insert_field(field, values)?;
    }
    Ok(())
}

/// Check that a counts-grouped child agrees, event by event, with the
/// per-event lengths of its source branches.
fn check_child_grouping(
    parent: &Collection,
    child: &Collection,
    event_counts: Option<&[usize]>,
) -> Result<()> {
    if child.n_parents() != parent.n_elements() {
        return Err(Error::Schema(format!(
            "'{}' has {} counts, parent '{}' has {} elements",
            child.name,
            child.n_parents(),
            parent.name,
            parent.n_elements()
        )));
    }
    let Some(event_counts) = event_counts else { return Ok(()) };
    if event_counts.len() != parent.n_parents() {
        return Err(Error::Schema(format!(
            "'{}' branches have {} rows, parent '{}' has {}",
            child.name,
            event_counts.len(),
            parent.name,
            parent.n_parents()
        )));
    }
    for (event, &expected) in event_counts.iter().enumerate() {
        let elems = parent.row_range(event);
        let got = child.offsets()[elems.end] - child.offsets()[elems.start];
        if got != expected {
            return Err(Error::Schema(format!(
                "'{}' event {event}: counts give {got} elements, branches hold {expected}",
                child.name
            )));
        }
    }
    Ok(())
}

/// Build an [`EventRecord`] with the default FireFighter naming conventions.
pub fn build_event_record(branches: BranchSet) -> Result<EventRecord> {
    Schema::default().build(branches)
}
