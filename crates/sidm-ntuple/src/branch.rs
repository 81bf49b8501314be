//! Flat branch namespace of an ntuple.

use std::collections::BTreeMap;

use sidm_core::{Error, Result};

use crate::jagged::JaggedCol;

/// Data of a single ntuple branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Branch {
    /// One value per event.
    Scalar(Vec<f64>),
    /// Variable number of values per event.
    Jagged(JaggedCol),
}

impl Branch {
    /// Number of events (rows) in this branch.
    pub fn n_rows(&self) -> usize {
        match self {
            Branch::Scalar(v) => v.len(),
            Branch::Jagged(j) => j.n_entries(),
        }
    }

    /// Whether this branch stores a variable number of values per event.
    pub fn is_jagged(&self) -> bool {
        matches!(self, Branch::Jagged(_))
    }

    /// Short type tag used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Branch::Scalar(_) => "scalar",
            Branch::Jagged(_) => "jagged",
        }
    }
}

/// Flat namespace `branch name -> data`, all branches sharing one event count.
///
/// Names are kept sorted so that schema building is deterministic regardless
/// of the column order in the source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchSet {
    n_events: Option<usize>,
    branches: BTreeMap<String, Branch>,
}

impl BranchSet {
    /// Create an empty branch set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty branch set with a fixed event count.
    pub fn with_events(n_events: usize) -> Self {
        Self { n_events: Some(n_events), branches: BTreeMap::new() }
    }

    /// Insert a branch. Fails if its row count differs from the existing branches.
    pub fn insert(&mut self, name: impl Into<String>, branch: Branch) -> Result<()> {
        let name = name.into();
        let n = branch.n_rows();
        match self.n_events {
            Some(expected) if expected != n => {
                return Err(Error::Validation(format!(
                    "branch '{name}' has {n} entries, expected {expected}"
                )));
            }
            Some(_) => {}
            None => self.n_events = Some(n),
        }
        if let Branch::Jagged(j) = &branch {
            j.validate().map_err(|e| Error::Validation(format!("branch '{name}': {e}")))?;
        }
        self.branches.insert(name, branch);
        Ok(())
    }

    /// Builder-style [`BranchSet::insert`] for scalar branches.
    pub fn scalar(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        self.insert(name, Branch::Scalar(values))?;
        Ok(self)
    }

    /// Builder-style [`BranchSet::insert`] for jagged branches given as nested rows.
    pub fn jagged<R: AsRef<[f64]>>(mut self, name: impl Into<String>, rows: &[R]) -> Result<Self> {
        self.insert(name, Branch::Jagged(JaggedCol::from_rows(rows)))?;
        Ok(self)
    }

    /// Remove and return a branch (consuming it from the namespace).
    pub fn remove(&mut self, name: &str) -> Option<Branch> {
        self.branches.remove(name)
    }

    /// Find a branch by name.
    pub fn get(&self, name: &str) -> Option<&Branch> {
        self.branches.get(name)
    }

    /// Whether a branch exists.
    pub fn contains(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    /// List all branch names (sorted).
    pub fn names(&self) -> Vec<&str> {
        self.branches.keys().map(String::as_str).collect()
    }

    /// Iterate over `(name, branch)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Branch)> {
        self.branches.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Whether there are no branches.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Number of events (0 if no branch has been inserted).
    pub fn n_events(&self) -> usize {
        self.n_events.unwrap_or(0)
    }

    /// Consume into the underlying map.
    pub fn into_inner(self) -> BTreeMap<String, Branch> {
        self.branches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let set = BranchSet::new()
            .scalar("run", vec![1.0, 1.0])
            .unwrap()
            .jagged("muon_pt", &[vec![10.0], vec![]])
            .unwrap();
        assert_eq!(set.n_events(), 2);
        assert_eq!(set.names(), vec!["muon_pt", "run"]);
        assert!(set.get("muon_pt").unwrap().is_jagged());
    }

    #[test]
    fn length_mismatch_rejected() {
        let err = BranchSet::new()
            .scalar("a", vec![1.0, 2.0])
            .unwrap()
            .scalar("b", vec![1.0])
            .unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn remove_consumes() {
        let mut set = BranchSet::new().scalar("a", vec![1.0]).unwrap();
        assert!(set.remove("a").is_some());
        assert!(set.remove("a").is_none());
        assert!(set.is_empty());
        // event count is remembered after removal
        assert_eq!(set.n_events(), 1);
    }
}
