//! Execution Result - outcome of one experiment

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::{ExperimentDescriptor, ExperimentKey, ExperimentOutput};
use crate::params::Params;
use crate::{Error, Result};

/// Status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Dispatched, adapter not yet invoked.
    Waiting,
    /// Adapter invoked.
    Running,
    /// Completed successfully.
    Ok,
    /// Failed with an error.
    Error,
    /// Exceeded its wall-clock budget.
    Timeout,
}

impl Status {
    /// Terminal statuses never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Error | Self::Timeout)
    }

    /// Upper-case label used in tables and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Times {
    /// Pre-processing, if the algorithm has a pre-processing step
    pub pre: Option<f64>,
    /// Main adapter call
    pub main: f64,
    /// Post-processing, if the algorithm has a post-processing step
    pub post: Option<f64>,
}

/// Execution Result tracks one experiment from dispatch to its terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    key: ExperimentKey,
    params: Params,
    status: Status,
    times: Option<Times>,
    metrics: BTreeMap<String, f64>,
    error_message: Option<String>,
    artifact_path: PathBuf,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// Create a result in `WAITING` status.
    #[must_use]
    pub fn new(descriptor: &ExperimentDescriptor, results_root: &Path) -> Self {
        Self {
            key: descriptor.key(),
            params: descriptor.params().clone(),
            status: Status::Waiting,
            times: None,
            metrics: BTreeMap::new(),
            error_message: None,
            artifact_path: descriptor.artifact_path(results_root),
            started_at: None,
            ended_at: None,
        }
    }

    /// Get the experiment key.
    #[must_use]
    pub const fn key(&self) -> &ExperimentKey {
        &self.key
    }

    /// Get the parameter point.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Get the phase durations, present once the experiment succeeded.
    #[must_use]
    pub const fn times(&self) -> Option<&Times> {
        self.times.as_ref()
    }

    /// Get the computed metrics.
    #[must_use]
    pub const fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Get the error message, present iff status is `ERROR` or `TIMEOUT`.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Get the artifact directory.
    #[must_use]
    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Get the start timestamp, if the adapter was invoked.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp, if terminal.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Transition from `WAITING` to `RUNNING`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] from any other status.
    pub fn start(&mut self) -> Result<()> {
        if self.status != Status::Waiting {
            return Err(self.invalid(Status::Running));
        }
        self.status = Status::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the outcome, moving to `OK`, `ERROR` or `TIMEOUT`.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateResult`] if a terminal result is already held.
    pub fn complete(&mut self, outcome: Result<ExperimentOutput>) -> Result<Status> {
        if self.status.is_terminal() {
            return Err(Error::DuplicateResult(self.key.to_string()));
        }
        match outcome {
            Ok(output) => {
                self.status = Status::Ok;
                self.times = Some(output.times);
                self.metrics = output.metrics;
            }
            Err(err) => {
                self.status = if err.is_timeout() {
                    Status::Timeout
                } else {
                    Status::Error
                };
                self.error_message = Some(err.to_string());
            }
        }
        self.ended_at = Some(Utc::now());
        Ok(self.status)
    }

    fn invalid(&self, to: Status) -> Error {
        Error::InvalidTransition {
            key: self.key.to_string(),
            from: self.status,
            to,
        }
    }
}
