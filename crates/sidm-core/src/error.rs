//! Error types for the SIDM analysis framework

use thiserror::Error;

/// SIDM error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Validation error (bad shapes, inconsistent lengths, bad config values)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ntuple reading error
    #[error("Ntuple error: {0}")]
    Ntuple(String),

    /// Branch names could not be arranged into a record structure
    #[error("Schema error: {0}")]
    Schema(String),

    /// Unknown or unevaluable cut
    #[error("Selection error: {0}")]
    Selection(String),

    /// Histogram could not be filled
    #[error("Histogram fill error: {0}")]
    HistogramFill(String),

    /// Merging two accumulators with incompatible structure
    #[error("Accumulator error: {0}")]
    Accumulate(String),

    /// Not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let e = Error::Schema("unrecognized components".into());
        assert_eq!(e.to_string(), "Schema error: unrecognized components");
    }

    #[test]
    fn io_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.parquet");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
