use thiserror::Error;

/// Error type for invalid aggregation requests and data.
///
/// Validation errors are raised by the planner before any numeric work starts.
/// An empty reduction (every contributing cell missing under the `skip` policy)
/// is not an error: it produces a missing value in the output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggError {
    #[error("Dimension '{name}' not found. Available dimensions: {available:?}")]
    DimensionNotFound {
        name: String,
        available: Vec<String>,
    },
    #[error("Index {index} is out of range for dimension '{dimension}' of length {len}")]
    IndexOutOfRange {
        dimension: String,
        index: usize,
        len: usize,
    },
    #[error("Incompatible coordinates: {0}")]
    IncompatibleCoordinates(String),
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("Unsupported reference system transformation from {from} to {to}. Configure a reprojector or supply the geometry in the grid's reference system.")]
    UnsupportedReferenceSystem { from: String, to: String },
    #[error("Unsupported operator '{0}'. Valid operators: mean, sum, min, max, std, count, median, percentile")]
    UnsupportedOperator(String),
    #[error("Percentile must be within [0, 100], got {0}")]
    InvalidPercentile(f64),
    #[error("Unsupported missing-value policy '{0}'. Valid policies: skip, propagate, require-complete")]
    UnsupportedPolicy(String),
    #[error("Invalid window: {0}")]
    InvalidWindow(String),
    #[error("Incomplete data: {missing} contributing cell(s) are missing")]
    IncompleteData { missing: usize },
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type for `Result<T, AggError>`.
pub type AggResult<T> = Result<T, AggError>;
