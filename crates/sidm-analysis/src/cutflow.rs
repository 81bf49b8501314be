//! Cutflow tables: how many (weighted) events survive each cut.
//!
//! Every row records
//! - `n_ind`: events passing the cut on its own,
//! - `n_all`: events passing the AND of this and all preceding cuts,
//!
//! from which individual, marginal and cumulative fractions are derived.
//! Cutflows computed on separate event chunks combine with
//! [`Accumulator::add`].

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sidm_core::{Accumulator, Error, Result};

use crate::selection::PackedSelection;

/// Label of the first row.
pub const NO_SELECTION: &str = "No selection";

/// One cutflow row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutflowElement {
    /// Cut name.
    pub cut: String,
    /// Total events before any cut.
    pub n_evts: f64,
    /// Events passing this cut alone.
    pub n_ind: f64,
    /// Events passing this and all preceding cuts.
    pub n_all: f64,
    /// Whether this is the `No selection` row.
    pub is_first: bool,
}

/// Fractions derived from a row and its predecessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fractions {
    /// `n_ind / n_evts`.
    pub f_ind: f64,
    /// `n_all / previous n_all` (0 when the previous row is empty).
    pub f_mar: f64,
    /// `n_all / n_evts` (0 for an empty sample).
    pub f_all: f64,
}

impl CutflowElement {
    fn new(
        cut: &str,
        all_cuts: &PackedSelection,
        cumulative: &[String],
        weights: &[f64],
        is_first: bool,
    ) -> Result<Self> {
        let n_evts: f64 = weights.iter().sum();
        let (n_ind, n_all) = if is_first || n_evts == 0.0 {
            (n_evts, n_evts)
        } else {
            (
                masked_sum(weights, &all_cuts.all(&[cut])?),
                masked_sum(weights, &all_cuts.all(cumulative)?),
            )
        };
        Ok(Self { cut: cut.to_string(), n_evts, n_ind, n_all, is_first })
    }

    /// Fractions relative to the total and to `previous`.
    pub fn fractions(&self, previous: Option<&CutflowElement>) -> Fractions {
        if self.is_first {
            return Fractions { f_ind: 1.0, f_mar: 1.0, f_all: 1.0 };
        }
        let f_mar = match previous {
            Some(p) if p.n_all != 0.0 => self.n_all / p.n_all,
            _ => 0.0,
        };
        if self.n_evts == 0.0 {
            return Fractions { f_ind: 0.0, f_mar, f_all: 0.0 };
        }
        Fractions { f_ind: self.n_ind / self.n_evts, f_mar, f_all: self.n_all / self.n_evts }
    }

    fn add(&mut self, other: &Self) {
        self.n_evts += other.n_evts;
        self.n_ind += other.n_ind;
        self.n_all += other.n_all;
    }
}

fn masked_sum(weights: &[f64], mask: &[bool]) -> f64 {
    weights.iter().zip(mask).filter(|(_, m)| **m).map(|(w, _)| w).sum()
}

/// Weighted and unweighted cutflow of one selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cutflow {
    /// Cut names, in order.
    pub selection: Vec<String>,
    /// Weighted rows (first row is `No selection`).
    pub flow: Vec<CutflowElement>,
    /// Rows with unit weights.
    pub unweighted_flow: Vec<CutflowElement>,
}

impl Cutflow {
    /// Build from evaluated cut masks, the ordered cut names and per-event weights.
    pub fn new(all_cuts: &PackedSelection, selection: &[String], weights: &[f64]) -> Result<Self> {
        if !selection.is_empty() && all_cuts.len() != weights.len() {
            return Err(Error::Selection(format!(
                "cut masks have length {}, got {} weights",
                all_cuts.len(),
                weights.len()
            )));
        }
        let ones = vec![1.0; weights.len()];
        Ok(Self {
            selection: selection.to_vec(),
            flow: Self::rows_for(all_cuts, selection, weights)?,
            unweighted_flow: Self::rows_for(all_cuts, selection, &ones)?,
        })
    }

    fn rows_for(
        all_cuts: &PackedSelection,
        selection: &[String],
        weights: &[f64],
    ) -> Result<Vec<CutflowElement>> {
        let mut rows = vec![CutflowElement::new(NO_SELECTION, all_cuts, &[], weights, true)?];
        for (k, cut) in selection.iter().enumerate() {
            rows.push(CutflowElement::new(cut, all_cuts, &selection[..=k], weights, false)?);
        }
        Ok(rows)
    }

    fn flow(&self, unweighted: bool) -> &[CutflowElement] {
        if unweighted { &self.unweighted_flow } else { &self.flow }
    }

    /// Rows with their fractions.
    pub fn rows(&self, unweighted: bool) -> Vec<(&CutflowElement, Fractions)> {
        let flow = self.flow(unweighted);
        flow.iter()
            .enumerate()
            .map(|(i, e)| (e, e.fractions(i.checked_sub(1).map(|p| &flow[p]))))
            .collect()
    }

    /// Fraction of all events passing every cut (0 for an empty sample).
    pub fn efficiency(&self) -> f64 {
        match self.flow.last() {
            Some(last) if last.n_evts != 0.0 => last.n_all / last.n_evts,
            _ => 0.0,
        }
    }

    /// Row labels, starting with `No selection`.
    pub fn cut_names(&self) -> Vec<&str> {
        self.flow.iter().map(|e| e.cut.as_str()).collect()
    }

    /// Cumulative counts per row, or cumulative fractions when `fraction`.
    pub fn cut_breakdown(&self, fraction: bool, unweighted: bool) -> Vec<f64> {
        if fraction {
            self.rows(unweighted).into_iter().map(|(_, f)| f.f_all).collect()
        } else {
            self.flow(unweighted).iter().map(|e| e.n_all).collect()
        }
    }

    /// Number of events before any cut.
    pub fn n_input_evts(&self, unweighted: bool) -> f64 {
        self.flow(unweighted).first().map_or(0.0, |e| e.n_evts)
    }

    /// Plain-text table of this cutflow.
    pub fn render_table(&self, fraction: bool, unweighted: bool) -> String {
        let (headers, data): (Vec<String>, Vec<Vec<String>>) = if fraction {
            (
                vec!["cut name".into(), "individual %".into(), "marginal %".into(), "cumulative %".into()],
                self.rows(unweighted)
                    .into_iter()
                    .map(|(e, f)| {
                        vec![
                            e.cut.clone(),
                            fmt_num(100.0 * f.f_ind),
                            fmt_num(100.0 * f.f_mar),
                            fmt_num(100.0 * f.f_all),
                        ]
                    })
                    .collect(),
            )
        } else {
            (
                vec!["cut name".into(), "individual cut N".into(), "all cut N".into()],
                self.flow(unweighted)
                    .iter()
                    .map(|e| vec![e.cut.clone(), fmt_num(e.n_ind), fmt_num(e.n_all)])
                    .collect(),
            )
        };
        format_table(&headers, &data)
    }

    /// Table with this cutflow and `others` side by side, one column per sample.
    ///
    /// The first row holds the input event counts (100% in fraction mode);
    /// later rows hold cumulative counts or cumulative percentages.
    pub fn render_multi_table(
        &self,
        others: &[&Cutflow],
        samples: &[&str],
        fraction: bool,
        unweighted: bool,
        title: &str,
    ) -> String {
        let flows: Vec<&[CutflowElement]> = std::iter::once(self)
            .chain(others.iter().copied())
            .map(|c| c.flow(unweighted))
            .collect();
        let totals: Vec<f64> = flows.iter().map(|f| f.first().map_or(0.0, |e| e.n_evts)).collect();

        let mut data = Vec::with_capacity(self.flow.len());
        for (i, row) in self.flow(unweighted).iter().enumerate() {
            let mut line = vec![row.cut.clone()];
            for (flow, total) in flows.iter().zip(&totals) {
                let Some(e) = flow.get(i) else {
                    line.push("-".to_string());
                    continue;
                };
                let value = if i == 0 { e.n_evts } else { e.n_all };
                line.push(match (fraction, i) {
                    (false, _) => fmt_num(value),
                    // empty sample
                    (true, _) if *total == 0.0 => fmt_num(0.0),
                    (true, 0) => fmt_num(100.0),
                    (true, _) => fmt_num(100.0 * value / total),
                });
            }
            data.push(line);
        }

        let prefix = if fraction { "% cuts: " } else { "Total cuts: " };
        let mut headers = vec!["cut name".to_string()];
        headers.extend(samples.iter().map(|s| format!("{prefix}{s}")));

        let mut out = String::new();
        if !title.is_empty() {
            let _ = writeln!(out, "{title}");
            let rule: usize = samples.iter().map(|s| s.len() + 4).sum::<usize>() + 10;
            let _ = writeln!(out, "{}", "-".repeat(rule));
        }
        out.push_str(&format_table(&headers, &data));
        out.push('\n');
        out
    }
}

fn fmt_num(v: f64) -> String {
    format!("{v:.1}")
}

/// Left-aligned first column, right-aligned numeric columns.
fn format_table(headers: &[String], data: &[Vec<String>]) -> String {
    let n_cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in data {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }
    let mut out = String::new();
    let line = |cells: &[String], out: &mut String| {
        let rendered: Vec<String> = (0..n_cols)
            .map(|c| {
                let cell = cells.get(c).map_or("", String::as_str);
                if c == 0 {
                    format!("{cell:<w$}", w = widths[c])
                } else {
                    format!("{cell:>w$}", w = widths[c])
                }
            })
            .collect();
        let _ = writeln!(out, "{}", rendered.join("  ").trim_end());
    };
    line(headers, &mut out);
    let _ = writeln!(
        out,
        "{}",
        widths.iter().map(|&w| "-".repeat(w)).collect::<Vec<_>>().join("  ")
    );
    for row in data {
        line(row, &mut out);
    }
    out
}

impl Accumulator for Cutflow {
    fn identity(&self) -> Self {
        let zero = |flow: &[CutflowElement]| {
            flow.iter()
                .map(|e| CutflowElement { n_evts: 0.0, n_ind: 0.0, n_all: 0.0, ..e.clone() })
                .collect()
        };
        Self {
            selection: self.selection.clone(),
            flow: zero(&self.flow),
            unweighted_flow: zero(&self.unweighted_flow),
        }
    }

    fn add(&mut self, other: &Self) -> Result<()> {
        if self.selection != other.selection {
            return Err(Error::Accumulate(format!(
                "cannot add cutflows with different cuts: {:?} vs {:?}",
                self.selection, other.selection
            )));
        }
        for (a, b) in self.flow.iter_mut().zip(&other.flow) {
            a.add(b);
        }
        for (a, b) in self.unweighted_flow.iter_mut().zip(&other.unweighted_flow) {
            a.add(b);
        }
        Ok(())
    }
}
