//! Weighted N-dimensional histograms with flow bins.
//!
//! Storage is row-major over every axis slot, flow slots included: numeric
//! axes have `n_bins + 2` slots (underflow, bins, overflow), category axes
//! have `n_categories + 1` (categories, then an overflow slot for unknown
//! labels).

use serde::{Deserialize, Serialize};
use sidm_core::{Accumulator, Error, Result};

/// Under/overflow handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowPolicy {
    /// Keep out-of-range entries in the underflow/overflow slots.
    #[default]
    Drop,
    /// Fold underflow into the first bin and overflow into the last bin.
    Fold,
}

/// One histogram axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Axis {
    /// `bins` equal-width bins on `[start, stop)`.
    Regular { name: String, label: String, bins: usize, start: f64, stop: f64 },
    /// Unit-width integer bins `start, start+1, ..., stop-1`.
    Integer { name: String, label: String, start: i64, stop: i64 },
    /// Bins given by sorted edges.
    Variable { name: String, label: String, edges: Vec<f64> },
    /// Named categories.
    StrCategory { name: String, label: String, categories: Vec<String> },
}

impl Axis {
    /// Regular axis.
    pub fn regular(name: impl Into<String>, bins: usize, start: f64, stop: f64) -> Self {
        Axis::Regular { name: name.into(), label: String::new(), bins, start, stop }
    }

    /// Integer axis.
    pub fn integer(name: impl Into<String>, start: i64, stop: i64) -> Self {
        Axis::Integer { name: name.into(), label: String::new(), start, stop }
    }

    /// Variable-width axis.
    pub fn variable(name: impl Into<String>, edges: Vec<f64>) -> Self {
        Axis::Variable { name: name.into(), label: String::new(), edges }
    }

    /// Category axis.
    pub fn str_category<S: Into<String>>(
        name: impl Into<String>,
        categories: impl IntoIterator<Item = S>,
    ) -> Self {
        Axis::StrCategory {
            name: name.into(),
            label: String::new(),
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Axis::Regular { label, .. }
            | Axis::Integer { label, .. }
            | Axis::Variable { label, .. }
            | Axis::StrCategory { label, .. } => *label = text.into(),
        }
        self
    }

    /// Axis name.
    pub fn name(&self) -> &str {
        match self {
            Axis::Regular { name, .. }
            | Axis::Integer { name, .. }
            | Axis::Variable { name, .. }
            | Axis::StrCategory { name, .. } => name,
        }
    }

    /// Display label (falls back to the name).
    pub fn label(&self) -> &str {
        let label = match self {
            Axis::Regular { label, .. }
            | Axis::Integer { label, .. }
            | Axis::Variable { label, .. }
            | Axis::StrCategory { label, .. } => label,
        };
        if label.is_empty() { self.name() } else { label }
    }

    /// Whether this is a category axis.
    pub fn is_category(&self) -> bool {
        matches!(self, Axis::StrCategory { .. })
    }

    /// Number of in-range bins (categories for category axes).
    pub fn n_bins(&self) -> usize {
        match self {
            Axis::Regular { bins, .. } => *bins,
            Axis::Integer { start, stop, .. } => usize::try_from(stop - start).unwrap_or(0),
            Axis::Variable { edges, .. } => edges.len().saturating_sub(1),
            Axis::StrCategory { categories, .. } => categories.len(),
        }
    }

    /// Number of storage slots including flow.
    pub fn n_slots(&self) -> usize {
        if self.is_category() { self.n_bins() + 1 } else { self.n_bins() + 2 }
    }

    /// Storage slots of the in-range bins.
    fn in_range(&self) -> std::ops::Range<usize> {
        if self.is_category() { 0..self.n_bins() } else { 1..self.n_bins() + 1 }
    }

    /// Bin edges of numeric axes.
    pub fn edges(&self) -> Option<Vec<f64>> {
        match self {
            Axis::Regular { bins, start, stop, .. } => {
                let width = (stop - start) / *bins as f64;
                Some((0..=*bins).map(|i| start + width * i as f64).collect())
            }
            Axis::Integer { start, stop, .. } => Some((*start..=*stop).map(|v| v as f64).collect()),
            Axis::Variable { edges, .. } => Some(edges.clone()),
            Axis::StrCategory { .. } => None,
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match self {
            Axis::Regular { bins, start, stop, .. } => *bins > 0 && start < stop,
            Axis::Integer { start, stop, .. } => start < stop,
            Axis::Variable { edges, .. } => {
                edges.len() >= 2 && edges.windows(2).all(|w| w[0] < w[1])
            }
            Axis::StrCategory { .. } => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Validation(format!("invalid binning for axis '{}'", self.name())))
        }
    }

    /// Storage slot of a numeric value. NaN goes to overflow.
    pub fn slot(&self, value: f64, flow: FlowPolicy) -> usize {
        let n = self.n_bins();
        let raw = if value.is_nan() {
            n + 1
        } else {
            match self {
                Axis::Regular { bins, start, stop, .. } => {
                    if value < *start {
                        0
                    } else if value >= *stop {
                        n + 1
                    } else {
                        let i = ((value - start) / (stop - start) * *bins as f64) as usize;
                        i.min(bins - 1) + 1
                    }
                }
                Axis::Integer { start, stop, .. } => {
                    let v = value.floor();
                    if v < *start as f64 {
                        0
                    } else if v >= *stop as f64 {
                        n + 1
                    } else {
                        (v as i64 - start) as usize + 1
                    }
                }
                Axis::Variable { edges, .. } => match find_bin(edges, value) {
                    Some(i) => i + 1,
                    None if value < edges[0] => 0,
                    None => n + 1,
                },
                Axis::StrCategory { .. } => n,
            }
        };
        match flow {
            FlowPolicy::Fold if !self.is_category() => raw.clamp(1, n),
            _ => raw,
        }
    }

    /// Storage slot of a category label; unknown labels go to the overflow slot.
    pub fn category_slot(&self, value: &str) -> usize {
        match self {
            Axis::StrCategory { categories, .. } => {
                categories.iter().position(|c| c == value).unwrap_or(categories.len())
            }
            _ => self.n_slots() - 1,
        }
    }
}

/// Find the bin index for a value given sorted bin edges.
///
/// Bins are right-open. Returns `None` for underflow/overflow.
pub fn find_bin(edges: &[f64], val: f64) -> Option<usize> {
    let (first, last) = (*edges.first()?, *edges.last()?);
    if !(val >= first && val < last) {
        return None;
    }
    Some(edges.partition_point(|&e| e <= val) - 1)
}

/// Values for one axis in [`Hist::fill`].
#[derive(Debug, Clone, Copy)]
pub enum FillColumn<'a> {
    /// One value per entry.
    Numbers(&'a [f64]),
    /// One label broadcast to every entry.
    Category(&'a str),
}

/// Weighted histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist {
    /// Axes, outermost first.
    pub axes: Vec<Axis>,
    /// Under/overflow handling.
    pub flow: FlowPolicy,
    /// Sum of weights per slot.
    pub sumw: Vec<f64>,
    /// Sum of squared weights per slot.
    pub sumw2: Vec<f64>,
    /// Number of filled entries.
    pub entries: u64,
}

impl Hist {
    /// Empty histogram over `axes`.
    pub fn new(axes: Vec<Axis>) -> Result<Self> {
        Self::with_flow(axes, FlowPolicy::Drop)
    }

    /// Empty histogram with an explicit flow policy.
    pub fn with_flow(axes: Vec<Axis>, flow: FlowPolicy) -> Result<Self> {
        if axes.is_empty() {
            return Err(Error::Validation("histogram needs at least one axis".into()));
        }
        for a in &axes {
            a.validate()?;
        }
        let size = axes.iter().map(Axis::n_slots).product();
        Ok(Self { axes, flow, sumw: vec![0.0; size], sumw2: vec![0.0; size], entries: 0 })
    }

    /// Index of the axis named `name`.
    pub fn axis_index(&self, name: &str) -> Result<usize> {
        self.axes
            .iter()
            .position(|a| a.name() == name)
            .ok_or_else(|| Error::Validation(format!("histogram has no axis '{name}'")))
    }

    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.axes.len()];
        for i in (0..self.axes.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.axes[i + 1].n_slots();
        }
        strides
    }

    /// Fill with one column per axis and optional per-entry weights.
    pub fn fill(&mut self, columns: &[FillColumn<'_>], weights: Option<&[f64]>) -> Result<()> {
        if columns.len() != self.axes.len() {
            return Err(Error::HistogramFill(format!(
                "got {} fill columns for {} axes",
                columns.len(),
                self.axes.len()
            )));
        }
        let mut n: Option<usize> = weights.map(<[f64]>::len);
        for (axis, column) in self.axes.iter().zip(columns) {
            match (axis.is_category(), column) {
                (false, FillColumn::Numbers(values)) => match n {
                    Some(expected) if expected != values.len() => {
                        return Err(Error::HistogramFill(format!(
                            "axis '{}' got {} values, expected {expected}",
                            axis.name(),
                            values.len()
                        )));
                    }
                    _ => n = Some(values.len()),
                },
                (true, FillColumn::Category(_)) => {}
                _ => {
                    return Err(Error::HistogramFill(format!(
                        "fill column type does not match axis '{}'",
                        axis.name()
                    )));
                }
            }
        }
        let n = n.unwrap_or(1);

        let strides = self.strides();
        let mut base = 0;
        for ((axis, column), stride) in self.axes.iter().zip(columns).zip(&strides) {
            if let FillColumn::Category(label) = column {
                base += axis.category_slot(label) * stride;
            }
        }
        for i in 0..n {
            let mut idx = base;
            for ((axis, column), stride) in self.axes.iter().zip(columns).zip(&strides) {
                if let FillColumn::Numbers(values) = column {
                    idx += axis.slot(values[i], self.flow) * stride;
                }
            }
            let w = weights.map_or(1.0, |w| w[i]);
            self.sumw[idx] += w;
            self.sumw2[idx] += w * w;
        }
        self.entries += n as u64;
        Ok(())
    }

    /// Sum of weights over all slots, flow included.
    pub fn sum(&self) -> f64 {
        self.sumw.iter().sum()
    }

    fn in_range_indices(&self) -> Vec<usize> {
        let strides = self.strides();
        let mut out = vec![0usize];
        for (axis, stride) in self.axes.iter().zip(&strides) {
            out = out.iter().flat_map(|&b| axis.in_range().map(move |s| b + s * stride)).collect();
        }
        out
    }

    /// Sum of weights of the in-range bins, row-major.
    pub fn values(&self) -> Vec<f64> {
        self.in_range_indices().into_iter().map(|i| self.sumw[i]).collect()
    }

    /// Sum of squared weights of the in-range bins, row-major.
    pub fn variances(&self) -> Vec<f64> {
        self.in_range_indices().into_iter().map(|i| self.sumw2[i]).collect()
    }

    /// Sum over every axis except the named ones (kept in the given order).
    pub fn project(&self, keep: &[&str]) -> Result<Hist> {
        let keep_idx = keep.iter().map(|n| self.axis_index(n)).collect::<Result<Vec<_>>>()?;
        let mut out =
            Hist::with_flow(keep_idx.iter().map(|&i| self.axes[i].clone()).collect(), self.flow)?;
        let out_strides = out.strides();
        let src_strides = self.strides();
        for flat in 0..self.sumw.len() {
            let mut target = 0;
            for (k, &axis) in keep_idx.iter().enumerate() {
                let slot = (flat / src_strides[axis]) % self.axes[axis].n_slots();
                target += slot * out_strides[k];
            }
            out.sumw[target] += self.sumw[flat];
            out.sumw2[target] += self.sumw2[flat];
        }
        out.entries = self.entries;
        Ok(out)
    }

    /// Sub-histogram at one category of a category axis (the axis is removed).
    pub fn category_slice(&self, axis: &str, category: &str) -> Result<Hist> {
        let ai = self.axis_index(axis)?;
        let slot = match &self.axes[ai] {
            Axis::StrCategory { categories, .. } => categories
                .iter()
                .position(|c| c == category)
                .ok_or_else(|| Error::Validation(format!("axis '{axis}' has no category '{category}'")))?,
            _ => return Err(Error::Validation(format!("axis '{axis}' is not a category axis"))),
        };
        let axes: Vec<Axis> =
            self.axes.iter().enumerate().filter(|&(i, _)| i != ai).map(|(_, a)| a.clone()).collect();
        let mut out = Hist::with_flow(axes, self.flow)?;
        let src_strides = self.strides();
        let mut target = 0;
        for flat in 0..self.sumw.len() {
            if (flat / src_strides[ai]) % self.axes[ai].n_slots() != slot {
                continue;
            }
            out.sumw[target] += self.sumw[flat];
            out.sumw2[target] += self.sumw2[flat];
            target += 1;
        }
        out.entries = self.entries;
        Ok(out)
    }
}

impl Accumulator for Hist {
    fn identity(&self) -> Self {
        Self {
            axes: self.axes.clone(),
            flow: self.flow,
            sumw: vec![0.0; self.sumw.len()],
            sumw2: vec![0.0; self.sumw2.len()],
            entries: 0,
        }
    }

    fn add(&mut self, other: &Self) -> Result<()> {
        if self.axes != other.axes || self.flow != other.flow {
            return Err(Error::Accumulate("cannot add histograms with different axes".into()));
        }
        for (a, b) in self.sumw.iter_mut().zip(&other.sumw) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        Ok(())
    }
}
