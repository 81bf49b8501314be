//! # sidm-core
//!
//! Shared building blocks for the SIDM analysis crates: the common error
//! type and the [`Accumulator`] trait used to merge partial results computed
//! over independent event chunks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;

pub use error::{Error, Result};
pub use traits::{Accumulator, merge_all};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
