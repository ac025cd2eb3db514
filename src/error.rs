/*!
Errors produced by `pricecast`
*/
use std::path::PathBuf;
use tch::TchError;
use thiserror::Error;

/// A `Result` specialized to `pricecast` errors
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong building, loading or running a model
#[derive(Error, Debug)]
pub enum Error {
    /// A tensor did not have the shape the model was configured for
    #[error("shape mismatch in {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// The tensor being checked
        what: &'static str,
        /// The expected shape
        expected: Vec<i64>,
        /// The shape actually received
        found: Vec<i64>,
    },
    /// The requested compute device could not be acquired
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A configuration value violated its invariants
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Parameters could not be loaded from a persisted blob
    #[error("failed to load parameters from {path:?}: {source}")]
    Load {
        /// Where the parameters were being loaded from
        path: PathBuf,
        /// The underlying libtorch error
        source: TchError,
    },
    /// Any other libtorch error
    #[error(transparent)]
    Torch(#[from] TchError),
    /// Market data did not contain a requested field
    #[error("market data has no field {0:?}")]
    MissingField(String),
    /// Market data series of different lengths were stacked together
    #[error("field {field:?} has {found} values, expected {expected}")]
    RaggedSeries {
        /// The offending field
        field: String,
        /// The length of the other series
        expected: usize,
        /// The length of this series
        found: usize,
    },
    /// Market data held a NaN or infinite value inside the requested window
    #[error("field {field:?} has a non-finite value at step {step}")]
    NonFinite {
        /// The offending field
        field: String,
        /// The index of the value within the field's series
        step: usize,
    },
    /// A window with no time steps or no features was requested
    #[error("cannot build an input window from empty market data")]
    EmptyWindow,
    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSV error
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// JSON error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is a `ShapeMismatch`
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, Error::ShapeMismatch { .. })
    }
}
