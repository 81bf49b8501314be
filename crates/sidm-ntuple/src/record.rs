//! Structured per-event records produced by the schema builder.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use sidm_core::{Error, Result};

use crate::jagged::{JaggedCol, offsets_from_counts, validate_offsets};

/// Vector behaviour attached to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorKind {
    /// Plain record.
    None,
    /// `x, y` components.
    TwoVector,
    /// `x, y, z` components.
    ThreeVector,
    /// `x, y, z, t` components.
    LorentzVector,
}

impl VectorKind {
    /// Component field names carried by this kind.
    pub fn components(self) -> &'static [&'static str] {
        match self {
            VectorKind::None => &[],
            VectorKind::TwoVector => &["x", "y"],
            VectorKind::ThreeVector => &["x", "y", "z"],
            VectorKind::LorentzVector => &["x", "y", "z", "t"],
        }
    }
}

/// A collection of objects, grouped by parent row.
///
/// For top-level collections the parent rows are events; for child
/// collections (sub-objects) the parent rows are the elements of the
/// enclosing collection. `offsets.len() == n_parents + 1` and every field has
/// exactly `n_elements` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    /// Collection name.
    pub name: String,
    /// Vector behaviour.
    pub kind: VectorKind,
    offsets: Vec<usize>,
    fields: BTreeMap<String, Vec<f64>>,
    children: BTreeMap<String, Collection>,
    singleton: bool,
}

impl Collection {
    /// Create an empty-field collection with the given grouping.
    pub fn new(name: impl Into<String>, kind: VectorKind, offsets: Vec<usize>) -> Result<Self> {
        let name = name.into();
        let n_values = offsets.last().copied().unwrap_or(0);
        validate_offsets(&offsets, n_values)
            .map_err(|e| Error::Validation(format!("collection '{name}': {e}")))?;
        Ok(Self { name, kind, offsets, fields: BTreeMap::new(), children: BTreeMap::new(), singleton: false })
    }

    /// Create a collection with exactly one element per parent row.
    pub fn singleton(name: impl Into<String>, kind: VectorKind, n_parents: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            offsets: (0..=n_parents).collect(),
            fields: BTreeMap::new(),
            children: BTreeMap::new(),
            singleton: true,
        }
    }

    /// Create from per-parent counts.
    pub fn from_counts(name: impl Into<String>, kind: VectorKind, counts: &[usize]) -> Self {
        Self {
            name: name.into(),
            kind,
            offsets: offsets_from_counts(counts),
            fields: BTreeMap::new(),
            children: BTreeMap::new(),
            singleton: false,
        }
    }

    /// Add or replace a field. Its length must equal the number of elements.
    pub fn insert_field(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.n_elements() {
            return Err(Error::Validation(format!(
                "field '{}.{}' has {} values, collection has {} elements",
                self.name,
                name,
                values.len(),
                self.n_elements()
            )));
        }
        self.fields.insert(name, values);
        Ok(())
    }

    /// Builder-style [`Collection::insert_field`].
    pub fn with_field(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        self.insert_field(name, values)?;
        Ok(self)
    }

    /// Attach a child collection grouped by this collection's elements.
    pub fn insert_child(&mut self, child: Collection) -> Result<()> {
        if child.n_parents() != self.n_elements() {
            return Err(Error::Validation(format!(
                "child '{}' is grouped over {} parents, '{}' has {} elements",
                child.name,
                child.n_parents(),
                self.name,
                self.n_elements()
            )));
        }
        let key = child.name.clone();
        self.children.insert(key, child);
        Ok(())
    }

    /// Remove a field.
    pub fn remove_field(&mut self, name: &str) -> Option<Vec<f64>> {
        self.fields.remove(name)
    }

    /// Number of parent rows.
    pub fn n_parents(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total number of elements across all parents.
    pub fn n_elements(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Offsets grouping elements by parent row.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Number of elements per parent row.
    pub fn counts(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Element index range of parent row `row`.
    pub fn row_range(&self, row: usize) -> Range<usize> {
        self.offsets[row]..self.offsets[row + 1]
    }

    /// Whether this collection has exactly one element per parent by construction.
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// Flat values of a stored field.
    pub fn field(&self, name: &str) -> Option<&[f64]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Whether a stored field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Stored field names.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Child collection by name.
    pub fn child(&self, name: &str) -> Option<&Collection> {
        self.children.get(name)
    }

    /// Child collections.
    pub fn children(&self) -> impl Iterator<Item = &Collection> {
        self.children.values()
    }

    /// Number of stored leaves, including those of child collections.
    pub fn n_leaves(&self) -> usize {
        self.fields.len() + self.children.values().map(Collection::n_leaves).sum::<usize>()
    }

    /// Group per-element values by parent row.
    pub fn to_jagged(&self, values: Vec<f64>) -> Result<JaggedCol> {
        JaggedCol::new(values, self.offsets.clone())
            .map_err(|e| Error::Validation(format!("collection '{}': {e}", self.name)))
    }

    /// Parent row index of every element.
    pub fn parent_index(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.n_elements());
        for (row, w) in self.offsets.windows(2).enumerate() {
            out.extend(std::iter::repeat_n(row, w[1] - w[0]));
        }
        out
    }

    /// Build a new collection from selected element indices.
    ///
    /// `counts[i]` is the number of selected elements that belong to new
    /// parent row `i`; `indices` lists them in order. Children follow their
    /// selected parents.
    pub fn take(&self, indices: &[usize], counts: &[usize]) -> Result<Self> {
        let total: usize = counts.iter().sum();
        if total != indices.len() {
            return Err(Error::Validation(format!(
                "take on '{}': counts sum to {total}, got {} indices",
                self.name,
                indices.len()
            )));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_elements()) {
            return Err(Error::Validation(format!(
                "take on '{}': index {bad} out of range ({} elements)",
                self.name,
                self.n_elements()
            )));
        }

        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), indices.iter().map(|&i| v[i]).collect()))
            .collect();

        let mut children = BTreeMap::new();
        for (k, child) in &self.children {
            let mut child_indices = Vec::new();
            let mut child_counts = Vec::with_capacity(indices.len());
            for &i in indices {
                let r = child.row_range(i);
                child_counts.push(r.len());
                child_indices.extend(r);
            }
            children.insert(k.clone(), child.take(&child_indices, &child_counts)?);
        }

        Ok(Self {
            name: self.name.clone(),
            kind: self.kind,
            offsets: offsets_from_counts(counts),
            fields,
            children,
            singleton: self.singleton && counts.iter().all(|&c| c == 1),
        })
    }

    /// Keep elements where `mask` is true (one mask entry per element).
    pub fn filter_elements(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_elements() {
            return Err(Error::Validation(format!(
                "element mask for '{}' has length {}, expected {}",
                self.name,
                mask.len(),
                self.n_elements()
            )));
        }
        let mut indices = Vec::new();
        let mut counts = Vec::with_capacity(self.n_parents());
        for row in 0..self.n_parents() {
            let before = indices.len();
            indices.extend(self.row_range(row).filter(|&i| mask[i]));
            counts.push(indices.len() - before);
        }
        self.take(&indices, &counts)
    }

    /// Keep parent rows where `mask` is true (one mask entry per parent row).
    pub fn filter_parents(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_parents() {
            return Err(Error::Validation(format!(
                "parent mask for '{}' has length {}, expected {}",
                self.name,
                mask.len(),
                self.n_parents()
            )));
        }
        let mut indices = Vec::new();
        let mut counts = Vec::new();
        for row in (0..self.n_parents()).filter(|&r| mask[r]) {
            let r = self.row_range(row);
            counts.push(r.len());
            indices.extend(r);
        }
        self.take(&indices, &counts)
    }

    /// Contiguous range of parent rows.
    pub fn slice_parents(&self, rows: Range<usize>) -> Result<Self> {
        if rows.end > self.n_parents() || rows.start > rows.end {
            return Err(Error::Validation(format!(
                "row range {rows:?} out of bounds for '{}' ({} rows)",
                self.name,
                self.n_parents()
            )));
        }
        let indices: Vec<usize> = (self.offsets[rows.start]..self.offsets[rows.end]).collect();
        let counts: Vec<usize> = rows.map(|r| self.row_range(r).len()).collect();
        self.take(&indices, &counts)
    }

    /// Reorder elements within each parent row by `values` (one per element).
    ///
    /// The sort is stable; NaN values are placed last.
    pub fn sorted_by_values(&self, values: &[f64], descending: bool) -> Result<Self> {
        if values.len() != self.n_elements() {
            return Err(Error::Validation(format!(
                "sort key for '{}' has length {}, expected {}",
                self.name,
                values.len(),
                self.n_elements()
            )));
        }
        let mut indices = Vec::with_capacity(self.n_elements());
        for row in 0..self.n_parents() {
            let mut idx: Vec<usize> = self.row_range(row).collect();
            idx.sort_by(|&a, &b| {
                let (va, vb) = (values[a], values[b]);
                match (va.is_nan(), vb.is_nan()) {
                    (true, true) => std::cmp::Ordering::Equal,
                    (true, false) => std::cmp::Ordering::Greater,
                    (false, true) => std::cmp::Ordering::Less,
                    _ if descending => vb.total_cmp(&va),
                    _ => va.total_cmp(&vb),
                }
            });
            indices.extend(idx);
        }
        let counts = self.counts();
        self.take(&indices, &counts)
    }

    /// Reorder elements within each parent row by a stored field.
    pub fn sorted_by(&self, field: &str, descending: bool) -> Result<Self> {
        let values = self.field(field).ok_or_else(|| {
            Error::Validation(format!("collection '{}' has no field '{field}'", self.name))
        })?;
        self.sorted_by_values(values, descending)
    }

    fn describe_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let layout = if self.singleton { "one per row" } else { "jagged" };
        let _ = writeln!(
            out,
            "{indent}{} [{:?}, {layout}, {} elements]: {}",
            self.name,
            self.kind,
            self.n_elements(),
            self.field_names().join(", ")
        );
        for child in self.children.values() {
            child.describe_into(out, depth + 1);
        }
    }
}

/// Provenance of an [`EventRecord`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Dataset (sample) name.
    pub dataset: String,
    /// Source file path, if read from disk.
    pub source: Option<String>,
    /// Index of the first event of this record within the source.
    pub entry_start: usize,
}

/// Structured per-event record: per-event scalars plus object collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    /// Number of events.
    pub n_events: usize,
    /// One-value-per-event branches.
    pub scalars: BTreeMap<String, Vec<f64>>,
    /// Object collections grouped by event.
    pub collections: BTreeMap<String, Collection>,
    /// Provenance.
    pub metadata: RecordMetadata,
}

impl EventRecord {
    /// Empty record with `n_events` events.
    pub fn new(n_events: usize) -> Self {
        Self { n_events, ..Default::default() }
    }

    /// Per-event scalar by name.
    pub fn scalar(&self, name: &str) -> Option<&[f64]> {
        self.scalars.get(name).map(Vec::as_slice)
    }

    /// Collection by name.
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Add a collection; it must be grouped over this record's events.
    pub fn insert_collection(&mut self, collection: Collection) -> Result<()> {
        if collection.n_parents() != self.n_events {
            return Err(Error::Validation(format!(
                "collection '{}' has {} rows, record has {} events",
                collection.name,
                collection.n_parents(),
                self.n_events
            )));
        }
        self.collections.insert(collection.name.clone(), collection);
        Ok(())
    }

    /// Number of stored leaves (scalars plus collection fields).
    pub fn n_leaves(&self) -> usize {
        self.scalars.len() + self.collections.values().map(Collection::n_leaves).sum::<usize>()
    }

    /// Contiguous range of events.
    pub fn slice_events(&self, rows: Range<usize>) -> Result<Self> {
        if rows.end > self.n_events || rows.start > rows.end {
            return Err(Error::Validation(format!(
                "event range {rows:?} out of bounds ({} events)",
                self.n_events
            )));
        }
        let scalars =
            self.scalars.iter().map(|(k, v)| (k.clone(), v[rows.clone()].to_vec())).collect();
        let collections = self
            .collections
            .iter()
            .map(|(k, c)| Ok((k.clone(), c.slice_parents(rows.clone())?)))
            .collect::<Result<_>>()?;
        Ok(Self {
            n_events: rows.len(),
            scalars,
            collections,
            metadata: RecordMetadata {
                entry_start: self.metadata.entry_start + rows.start,
                ..self.metadata.clone()
            },
        })
    }

    /// Split into consecutive chunks of at most `chunk_size` events.
    ///
    /// A record without events yields one empty chunk.
    pub fn chunks(&self, chunk_size: usize) -> Result<Vec<Self>> {
        if chunk_size == 0 {
            return Err(Error::Validation("chunk size must be positive".into()));
        }
        if self.n_events == 0 {
            return Ok(vec![self.clone()]);
        }
        chunk_ranges(self.n_events, chunk_size)
            .into_iter()
            .map(|r| self.slice_events(r))
            .collect()
    }

    /// Indented human-readable outline of the record structure.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "events: {}", self.n_events);
        if !self.scalars.is_empty() {
            let names: Vec<&str> = self.scalars.keys().map(String::as_str).collect();
            let _ = writeln!(out, "scalars: {}", names.join(", "));
        }
        for c in self.collections.values() {
            c.describe_into(&mut out, 0);
        }
        out
    }
}

/// Split `n` rows into consecutive ranges of at most `chunk_size`.
pub fn chunk_ranges(n: usize, chunk_size: usize) -> Vec<Range<usize>> {
    if chunk_size == 0 {
        return Vec::new();
    }
    (0..n).step_by(chunk_size).map(|start| start..(start + chunk_size).min(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn muons() -> Collection {
        Collection::from_counts("muon", VectorKind::None, &[2, 0, 1])
            .with_field("pt", vec![10.0, 30.0, 5.0])
            .unwrap()
            .with_field("charge", vec![1.0, -1.0, 1.0])
            .unwrap()
    }

    #[test]
    fn field_length_checked() {
        let err = Collection::from_counts("m", VectorKind::None, &[1]).with_field("pt", vec![]);
        assert!(err.is_err());
    }

    #[test]
    fn filter_elements_regroups() {
        let m = muons().filter_elements(&[false, true, true]).unwrap();
        assert_eq!(m.counts(), vec![1, 0, 1]);
        assert_eq!(m.field("pt").unwrap(), &[30.0, 5.0]);
    }

    #[test]
    fn filter_parents_drops_rows() {
        let m = muons().filter_parents(&[true, false, false]).unwrap();
        assert_eq!(m.n_parents(), 1);
        assert_eq!(m.field("charge").unwrap(), &[1.0, -1.0]);
    }

    #[test]
    fn sorted_descending_per_row() {
        let m = muons();
        let pt = m.field("pt").unwrap().to_vec();
        let sorted = m.sorted_by_values(&pt, true).unwrap();
        assert_eq!(sorted.field("pt").unwrap(), &[30.0, 10.0, 5.0]);
        assert_eq!(sorted.field("charge").unwrap(), &[-1.0, 1.0, 1.0]);
    }

    #[test]
    fn sort_puts_nan_last() {
        let c = Collection::from_counts("c", VectorKind::None, &[3]);
        let sorted = c
            .with_field("v", vec![f64::NAN, 1.0, 2.0])
            .unwrap()
            .sorted_by_values(&[f64::NAN, 1.0, 2.0], true)
            .unwrap();
        let v = sorted.field("v").unwrap();
        assert_eq!(&v[..2], &[2.0, 1.0]);
        assert!(v[2].is_nan());
    }

    #[test]
    fn children_follow_parents() {
        let mut jets = Collection::from_counts("pfjet", VectorKind::None, &[2, 1])
            .with_field("pt", vec![50.0, 40.0, 20.0])
            .unwrap();
        let cands = Collection::from_counts("pfjet_pfcand", VectorKind::None, &[1, 2, 3])
            .with_field("pt", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        jets.insert_child(cands).unwrap();
        assert_eq!(jets.n_leaves(), 2);

        let kept = jets.filter_elements(&[false, true, true]).unwrap();
        let child = kept.child("pfjet_pfcand").unwrap();
        assert_eq!(child.counts(), vec![2, 3]);
        assert_eq!(child.field("pt").unwrap(), &[2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn child_parent_count_checked() {
        let mut jets = Collection::from_counts("pfjet", VectorKind::None, &[1]);
        let cands = Collection::from_counts("pfjet_pfcand", VectorKind::None, &[1, 1]);
        assert!(jets.insert_child(cands).is_err());
    }

    #[test]
    fn singleton_survives_row_filter() {
        let c = Collection::singleton("cosmicveto", VectorKind::None, 3)
            .with_field("result", vec![1.0, 0.0, 1.0])
            .unwrap();
        let f = c.filter_parents(&[true, false, true]).unwrap();
        assert!(f.is_singleton());
        let e = c.filter_elements(&[true, false, true]).unwrap();
        assert!(!e.is_singleton());
    }

    #[test]
    fn record_slicing_and_chunks() {
        let mut rec = EventRecord::new(3);
        rec.scalars.insert("run".into(), vec![1.0, 2.0, 3.0]);
        rec.insert_collection(muons()).unwrap();

        let chunks = rec.chunks(2).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].n_events, 1);
        assert_eq!(chunks[1].metadata.entry_start, 2);
        assert_eq!(chunks[1].scalar("run").unwrap(), &[3.0]);
        assert_eq!(chunks[0].collection("muon").unwrap().n_elements(), 2);
    }

    #[test]
    fn chunk_ranges_cover_all() {
        assert_eq!(chunk_ranges(5, 2), vec![0..2, 2..4, 4..5]);
        assert!(chunk_ranges(0, 2).is_empty());
    }

    #[test]
    fn empty_record_is_one_chunk() {
        let mut rec = EventRecord::new(0);
        rec.metadata.dataset = "empty".into();
        let chunks = rec.chunks(10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].n_events, 0);
        assert_eq!(chunks[0].metadata.dataset, "empty");
    }

    #[test]
    fn describe_lists_collections() {
        let mut rec = EventRecord::new(3);
        rec.insert_collection(muons()).unwrap();
        let text = rec.describe();
        assert!(text.contains("events: 3"));
        assert!(text.contains("muon [None, jagged, 3 elements]: charge, pt"));
    }
}
