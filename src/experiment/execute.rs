//! Execution of a single experiment: pre-processing, adapter call,
//! post-processing, scoring and artifact writing.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Experiment;
use crate::adapter::{format_scores, run_blocking, AdapterInput, SCORES_FILE};
use crate::config::ResourceConstraints;
use crate::dataset::{DatasetCatalog, DatasetPayload};
use crate::host::Host;
use crate::metrics::Metric;
use crate::store::Times;
use crate::Result;

/// Per-experiment record of times and metrics in the artifact directory.
pub const EXECUTION_FILE: &str = "execution.json";

/// Everything an experiment needs besides its own descriptor.
#[derive(Clone)]
pub struct ExecutionContext {
    catalog: Arc<dyn DatasetCatalog>,
    metrics: Vec<Arc<dyn Metric>>,
    results_root: PathBuf,
    constraints: ResourceConstraints,
    host: Host,
}

impl ExecutionContext {
    /// Context running on the orchestrator with default constraints and no metrics.
    #[must_use]
    pub fn new(catalog: Arc<dyn DatasetCatalog>, results_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            metrics: Vec::new(),
            results_root: results_root.into(),
            constraints: ResourceConstraints::default(),
            host: Host::Local,
        }
    }

    /// Set the metrics computed after each successful execution.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Vec<Arc<dyn Metric>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the resource constraints.
    #[must_use]
    pub fn with_constraints(mut self, constraints: ResourceConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Copy of this context bound to another host.
    #[must_use]
    pub fn on_host(&self, host: Host) -> Self {
        Self {
            host,
            ..self.clone()
        }
    }

    /// Get the dataset catalog.
    #[must_use]
    pub fn catalog(&self) -> &dyn DatasetCatalog {
        self.catalog.as_ref()
    }

    /// Get the metrics.
    #[must_use]
    pub fn metrics(&self) -> &[Arc<dyn Metric>] {
        &self.metrics
    }

    /// Get the results root.
    #[must_use]
    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    /// Get the resource constraints.
    #[must_use]
    pub const fn constraints(&self) -> &ResourceConstraints {
        &self.constraints
    }

    /// Get the host containerized adapters run on.
    #[must_use]
    pub const fn host(&self) -> &Host {
        &self.host
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field(
                "metrics",
                &self.metrics.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("results_root", &self.results_root)
            .field("constraints", &self.constraints)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Successful outcome of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOutput {
    /// Phase durations
    pub times: Times,
    /// Metric values by metric name
    pub metrics: BTreeMap<String, f64>,
}

impl Experiment {
    /// Run the experiment to completion.
    ///
    /// In-process adapters run on the orchestrator; containerized adapters
    /// run on the context's host and leave their artifacts there.
    ///
    /// # Errors
    /// Returns [`crate::Error::AdapterTimeout`] when the adapter exceeded its
    /// budget and another error for any other failure of any phase.
    pub async fn execute(&self, ctx: &ExecutionContext) -> Result<ExperimentOutput> {
        let descriptor = self.descriptor();
        let algorithm = self.algorithm();
        let params = descriptor.params();
        let host = if algorithm.adapter().is_containerized() {
            ctx.host().clone()
        } else {
            Host::Local
        };
        let artifact_dir = descriptor.artifact_path(ctx.results_root());
        debug!(experiment = %self.key(), host = host.name(), "executing");
        host.create_dir_all(&artifact_dir).await?;

        let payload = if algorithm.wants_file() {
            DatasetPayload::File(ctx.catalog().path(descriptor.dataset_id())?)
        } else {
            DatasetPayload::Series(ctx.catalog().load(descriptor.dataset_id())?)
        };

        let (payload, pre) = match algorithm.preprocess_fn() {
            Some(hook) => {
                let hook = Arc::clone(hook);
                let hook_params = params.clone();
                let started = Instant::now();
                let payload = run_blocking(move || hook(payload, &hook_params)).await?;
                (payload, Some(started.elapsed().as_secs_f64()))
            }
            None => (payload, None),
        };

        let input = AdapterInput {
            payload: &payload,
            params,
            artifact_dir: &artifact_dir,
            host: &host,
            constraints: ctx.constraints(),
        };
        let started = Instant::now();
        let scores = algorithm.adapter().run(input).await?;
        let main = started.elapsed().as_secs_f64();

        let (scores, post) = match algorithm.postprocess_fn() {
            Some(hook) => {
                let hook = Arc::clone(hook);
                let hook_params = params.clone();
                let started = Instant::now();
                let scores = run_blocking(move || hook(scores, &hook_params)).await?;
                (scores, Some(started.elapsed().as_secs_f64()))
            }
            None => (scores, None),
        };

        host.write(&artifact_dir.join(SCORES_FILE), format_scores(&scores).as_bytes())
            .await?;

        let mut metrics = BTreeMap::new();
        if !ctx.metrics().is_empty() {
            let truth = ctx.catalog().load(descriptor.dataset_id())?;
            for metric in ctx.metrics() {
                let value = metric.score(&scores, &truth.labels)?;
                metrics.insert(metric.name().to_string(), value);
            }
        }

        let output = ExperimentOutput {
            times: Times { pre, main, post },
            metrics,
        };
        host.write(
            &artifact_dir.join(EXECUTION_FILE),
            &serde_json::to_vec_pretty(&output)?,
        )
        .await?;
        info!(experiment = %self.key(), main_time = main, "experiment finished");
        Ok(output)
    }
}
