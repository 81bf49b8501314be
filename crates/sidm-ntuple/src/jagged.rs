//! Jagged (variable-length) columns and count/offset conversions.

use sidm_core::{Error, Result};

/// A jagged (variable-length) column: flat values + per-row offsets.
///
/// `offsets` has length `n_rows + 1`. Row `i` has values
/// `flat[offsets[i]..offsets[i+1]]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JaggedCol {
    /// Flat array of all values across all rows.
    pub flat: Vec<f64>,
    /// Row boundaries: `offsets.len() == n_rows + 1`.
    pub offsets: Vec<usize>,
}

impl JaggedCol {
    /// Build from flat values and offsets, checking consistency.
    pub fn new(flat: Vec<f64>, offsets: Vec<usize>) -> Result<Self> {
        let col = Self { flat, offsets };
        col.validate()?;
        Ok(col)
    }

    /// Build from per-row element counts and the flat content.
    pub fn from_counts(counts: &[usize], flat: Vec<f64>) -> Result<Self> {
        let offsets = offsets_from_counts(counts);
        Self::new(flat, offsets)
    }

    /// Build from nested rows.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Self {
        let mut flat = Vec::new();
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0);
        for row in rows {
            flat.extend_from_slice(row.as_ref());
            offsets.push(flat.len());
        }
        Self { flat, offsets }
    }

    /// Empty column with `n_rows` empty rows.
    pub fn empty_rows(n_rows: usize) -> Self {
        Self { flat: Vec::new(), offsets: vec![0; n_rows + 1] }
    }

    /// Get element `index` of row `row`. Returns `oor` for out-of-range.
    pub fn get(&self, row: usize, index: usize, oor: f64) -> f64 {
        let start = self.offsets[row];
        let end = self.offsets[row + 1];
        if index >= end - start { oor } else { self.flat[start + index] }
    }

    /// Values of row `row`.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.flat[self.offsets[row]..self.offsets[row + 1]]
    }

    /// Number of rows.
    pub fn n_entries(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Number of elements in each row.
    pub fn counts(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Check the offset invariants.
    pub fn validate(&self) -> Result<()> {
        validate_offsets(&self.offsets, self.flat.len())
    }
}

/// Turn per-row counts into offsets (`offsets[0] == 0`).
pub fn offsets_from_counts(counts: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut total = 0usize;
    offsets.push(0);
    for &c in counts {
        total += c;
        offsets.push(total);
    }
    offsets
}

/// Turn a counts branch (e.g. `muon_n`, stored as floating point) into offsets.
///
/// Counts must be finite, non-negative integers.
pub fn counts_to_offsets(name: &str, counts: &[f64]) -> Result<Vec<usize>> {
    let mut as_usize = Vec::with_capacity(counts.len());
    for (row, &c) in counts.iter().enumerate() {
        if !c.is_finite() || c < 0.0 || c.fract() != 0.0 {
            return Err(Error::Schema(format!(
                "counts branch '{name}' has invalid count {c} at row {row}"
            )));
        }
        as_usize.push(c as usize);
    }
    Ok(offsets_from_counts(&as_usize))
}

/// Check that `offsets` starts at zero, never decreases and ends at `n_values`.
pub fn validate_offsets(offsets: &[usize], n_values: usize) -> Result<()> {
    match offsets.first() {
        Some(0) => {}
        Some(first) => {
            return Err(Error::Validation(format!("offsets must start at 0, got {first}")));
        }
        None => return Err(Error::Validation("offsets must not be empty".into())),
    }
    if let Some(pos) = offsets.windows(2).position(|w| w[1] < w[0]) {
        return Err(Error::Validation(format!("offsets decrease at position {}", pos + 1)));
    }
    let last = offsets[offsets.len() - 1];
    if last != n_values {
        return Err(Error::Validation(format!(
            "last offset {last} does not match number of values {n_values}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_and_counts() {
        let col = JaggedCol::from_rows(&[vec![1.0, 2.0], vec![], vec![3.0]]);
        assert_eq!(col.offsets, vec![0, 2, 2, 3]);
        assert_eq!(col.counts(), vec![2, 0, 1]);
        assert_eq!(col.n_entries(), 3);
        assert_eq!(col.row(0), &[1.0, 2.0]);
        assert!(col.row(1).is_empty());
    }

    #[test]
    fn get_out_of_range() {
        let col = JaggedCol::from_rows(&[vec![1.0], vec![]]);
        assert_eq!(col.get(0, 0, -1.0), 1.0);
        assert_eq!(col.get(0, 1, -1.0), -1.0);
        assert_eq!(col.get(1, 0, -1.0), -1.0);
    }

    #[test]
    fn counts_branch_to_offsets() {
        let offsets = counts_to_offsets("muon_n", &[2.0, 0.0, 3.0]).unwrap();
        assert_eq!(offsets, vec![0, 2, 2, 5]);
    }

    #[test]
    fn counts_branch_rejects_fractional() {
        let err = counts_to_offsets("muon_n", &[1.5]).unwrap_err();
        assert!(err.to_string().contains("muon_n"));
        assert!(counts_to_offsets("muon_n", &[-1.0]).is_err());
    }

    #[test]
    fn from_counts_checks_length() {
        assert!(JaggedCol::from_counts(&[1, 2], vec![1.0, 2.0, 3.0]).is_ok());
        assert!(JaggedCol::from_counts(&[1, 2], vec![1.0]).is_err());
    }

    #[test]
    fn validate_rejects_decreasing() {
        assert!(validate_offsets(&[0, 2, 1], 1).is_err());
        assert!(validate_offsets(&[1, 2], 2).is_err());
        assert!(validate_offsets(&[], 0).is_err());
    }
}
