//! Domain-level errors (no external dependencies)

use thiserror::Error;

/// Domain errors represent violations in tree, calibration or report input.
/// These are independent of infrastructure concerns.
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("invalid newick at offset {offset}: {message}")]
    NewickSyntax { offset: usize, message: String },

    #[error("format of calibration is incorrect: {line}")]
    CalibrationFormat { line: String },

    #[error("duplicate calibration for node: {0}")]
    DuplicateCalibration(String),

    #[error("cannot find the haplogroup node in tree: {0}")]
    NodeNotFound(String),

    #[error("tree has {leaves} leaves after normalization, at least 2 are required")]
    DegenerateTree { leaves: usize },

    #[error("posterior summary marker 'Posterior mean' not found in estimator output")]
    PosteriorMarkerMissing,

    #[error("malformed posterior record: {line}")]
    MalformedRecord { line: String },

    #[error("tree has {expected} internal nodes but estimator reported {found} records")]
    RecordCountMismatch { expected: usize, found: usize },

    #[error("invalid calibration table: {0}")]
    CalibrationTable(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid alignment: {0}")]
    Alignment(String),
}
