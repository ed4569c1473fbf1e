//! Execution Adapters
//!
//! An adapter turns a dataset payload and a parameter point into anomaly
//! scores. Two variants exist:
//!
//! - [`FunctionAdapter`]: an in-process closure, run on the blocking pool
//! - [`DockerAdapter`]: a container started through a [`ContainerRuntime`]
//!   with a wall-clock timeout

mod docker;
mod function;
mod runtime;

pub use docker::{
    DockerAdapter, DATA_MOUNT, INPUT_CSV, PARAMETERS_FILE, RESULTS_MOUNT, SCORES_FILE,
};
pub use function::{AdapterFn, FunctionAdapter};
pub use runtime::{forward_args, ContainerRuntime, ContainerSpec, DockerEngine, Mount};

pub(crate) use function::run_blocking;

use std::fmt;
use std::path::Path;

use crate::config::ResourceConstraints;
use crate::dataset::DatasetPayload;
use crate::host::Host;
use crate::params::Params;
use crate::{Error, Result};

/// Inputs of one adapter invocation.
#[derive(Debug, Clone, Copy)]
pub struct AdapterInput<'a> {
    /// Dataset as file path or loaded series
    pub payload: &'a DatasetPayload,
    /// Parameter point
    pub params: &'a Params,
    /// Experiment artifact directory (on `host`)
    pub artifact_dir: &'a Path,
    /// Host the adapter runs on
    pub host: &'a Host,
    /// Resource limits of the run
    pub constraints: &'a ResourceConstraints,
}

/// Execution adapter of an algorithm.
#[derive(Clone)]
pub enum Adapter {
    /// In-process function
    Function(FunctionAdapter),
    /// Docker container
    Docker(DockerAdapter),
}

impl Adapter {
    /// In-process adapter from a closure.
    #[must_use]
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&DatasetPayload, &Params) -> anyhow::Result<Vec<f64>> + Send + Sync + 'static,
    {
        Self::Function(FunctionAdapter::new(f))
    }

    /// Run the adapter and return one score per time step.
    ///
    /// # Errors
    /// Returns [`Error::AdapterTimeout`] when a container exceeds its
    /// budget and [`Error::AdapterExecution`] (or the user's own error) for
    /// any other failure.
    pub async fn run(&self, input: AdapterInput<'_>) -> Result<Vec<f64>> {
        match self {
            Self::Function(adapter) => adapter.run(input).await,
            Self::Docker(adapter) => adapter.run(input).await,
        }
    }

    /// Whether the adapter runs out of process on a worker host.
    #[must_use]
    pub const fn is_containerized(&self) -> bool {
        matches!(self, Self::Docker(_))
    }

    /// Short description used in logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Function(_) => "function".to_string(),
            Self::Docker(adapter) => format!("docker:{}", adapter.image_ref()),
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Adapter::Function"),
            Self::Docker(adapter) => f.debug_tuple("Adapter::Docker").field(adapter).finish(),
        }
    }
}

impl From<DockerAdapter> for Adapter {
    fn from(adapter: DockerAdapter) -> Self {
        Self::Docker(adapter)
    }
}

impl From<FunctionAdapter> for Adapter {
    fn from(adapter: FunctionAdapter) -> Self {
        Self::Function(adapter)
    }
}

/// One score per line.
pub(crate) fn format_scores(scores: &[f64]) -> String {
    let mut out = String::with_capacity(scores.len() * 8);
    for score in scores {
        out.push_str(&score.to_string());
        out.push('\n');
    }
    out
}

/// Parse a scores file; blank lines are ignored.
pub(crate) fn parse_scores(text: &str) -> Result<Vec<f64>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(idx, line)| {
            line.parse::<f64>().map_err(|e| {
                Error::AdapterExecution(format!("malformed score on line {}: {line:?} ({e})", idx + 1))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_text_roundtrip() {
        let text = format_scores(&[0.5, 1.0, -2.25]);
        assert_eq!(text, "0.5\n1\n-2.25\n");
        assert_eq!(parse_scores(&text).unwrap(), vec![0.5, 1.0, -2.25]);
    }

    #[test]
    fn test_malformed_scores() {
        let err = parse_scores("0.1\nnope\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_describe() {
        let adapter = Adapter::function(|_, _| Ok(Vec::new()));
        assert!(!adapter.is_containerized());
        assert_eq!(adapter.describe(), "function");
    }
}
