//! Error types for Trueno-Eval
//!
//! Per-experiment failures (`AdapterTimeout`, `AdapterExecution`, `Metric`)
//! are caught at the adapter/task boundary and turned into result rows.
//! Only `Configuration` aborts a run.

use thiserror::Error;

use crate::store::Status;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-Eval error types
#[derive(Error, Debug)]
pub enum Error {
    /// Run-fatal configuration problem (no algorithms, cluster unavailable)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Execution exceeded its wall-clock budget (message kept verbatim)
    #[error("{0}")]
    AdapterTimeout(String),

    /// Any other failure raised by the algorithm or its backend (message kept verbatim)
    #[error("{0}")]
    AdapterExecution(String),

    /// Copying a worker's result tree back to the orchestrator failed
    #[error("Reconciliation failed for host {host}: {message}")]
    Reconciliation {
        /// Worker host that could not be synchronized
        host: String,
        /// Diagnostic from the copy tool
        message: String,
    },

    /// Scoring the produced output failed
    #[error("Metric error: {0}")]
    Metric(String),

    /// Dataset catalog could not resolve or load a dataset
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// A result key was registered twice in one run
    #[error("Result for {0} already recorded")]
    DuplicateResult(String),

    /// Status change that the result lifecycle does not allow
    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        /// Experiment key
        key: String,
        /// Current status
        from: Status,
        /// Requested status
        to: Status,
    },

    /// Lookup of a key that was never registered
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    /// Results table could not be laid out
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error should be recorded as `TIMEOUT` rather than `ERROR`.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::AdapterTimeout(_))
    }

    /// Whether this error aborts a whole run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Convert an error raised by user code (algorithm function or hook).
    ///
    /// A wrapped [`Error`] keeps its kind, so user code can signal a timeout
    /// by returning `Error::AdapterTimeout`. Anything else becomes
    /// `AdapterExecution` with the formatted error chain.
    #[must_use]
    pub fn from_user(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(inner) => inner,
            Err(other) => Self::AdapterExecution(format!("{other:#}")),
        }
    }
}
