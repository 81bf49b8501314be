//! Core traits for the SIDM analysis framework
//!
//! Partial results (histograms, cutflows, counters) are computed per event
//! chunk and then combined. [`Accumulator`] is the monoid interface that makes
//! that combination independent of how the events were split.

use crate::Result;

/// Additive accumulator.
///
/// Implementations must satisfy the monoid laws up to floating-point
/// summation order:
///
/// * `x.identity().add(&x)` leaves `x` unchanged;
/// * `add` is associative and commutative.
pub trait Accumulator: Sized {
    /// Empty value with the same structure as `self`.
    fn identity(&self) -> Self;

    /// Add `other` into `self`.
    ///
    /// Fails if the two values do not have the same structure (e.g. different
    /// histogram axes or different cut lists).
    fn add(&mut self, other: &Self) -> Result<()>;

    /// Consuming version of [`Accumulator::add`].
    fn merged(mut self, other: &Self) -> Result<Self> {
        self.add(other)?;
        Ok(self)
    }
}

/// Fold an iterator of accumulators into one. Returns `None` for an empty iterator.
pub fn merge_all<A, I>(items: I) -> Result<Option<A>>
where
    A: Accumulator,
    I: IntoIterator<Item = A>,
{
    let mut acc: Option<A> = None;
    for item in items {
        match acc.as_mut() {
            Some(a) => a.add(&item)?,
            None => acc = Some(item),
        }
    }
    Ok(acc)
}
