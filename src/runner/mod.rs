//! Runners and the evaluation entry point
//!
//! [`Evaluation`] ties the pieces together:
//!
//! ```text
//! enumerate ─> register (WAITING) ─> LocalRunner | DistributedRunner ─> results.parquet
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trueno_eval::adapter::Adapter;
//! use trueno_eval::dataset::{DatasetId, InMemoryCatalog, TimeSeries};
//! use trueno_eval::experiment::Algorithm;
//! use trueno_eval::runner::EvaluationBuilder;
//!
//! # async fn demo() -> trueno_eval::Result<()> {
//! let mut catalog = InMemoryCatalog::new();
//! let id = DatasetId::new("demo", "sine");
//! catalog.insert_series(id.clone(), TimeSeries { data: vec![vec![0.0]], labels: vec![0.0] });
//!
//! let algorithm = Algorithm::new("zeros", Adapter::function(|_, _| Ok(vec![0.0])));
//! let mut evaluation = EvaluationBuilder::new(Arc::new(catalog), vec![id], vec![algorithm])
//!     .results_path("results")
//!     .build()?;
//! let summary = evaluation.run().await?;
//! assert_eq!(summary.ok, 1);
//! # Ok(())
//! # }
//! ```

mod cluster;
mod distributed;
mod local;
mod progress;
mod sync;

pub use cluster::{Cluster, ClusterProvider, SshCluster, SshClusterProvider, TaskHandle};
pub use distributed::{DistributedRunner, DEFAULT_POLL_INTERVAL};
pub use local::LocalRunner;
pub use progress::Progress;
pub use sync::{reconcile, ReconciliationReport, ResultSync, Rsync};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{EvaluationConfig, RemoteConfiguration, ResourceConstraints};
use crate::dataset::{DatasetCatalog, DatasetId};
use crate::experiment::{enumerate, Algorithm, ExecutionContext, Experiment, ExperimentKey, ExperimentOutput};
use crate::host::{HostResolver, SystemResolver};
use crate::metrics::Metric;
use crate::store::{ResultStore, Status, RESULT_COLUMNS};
use crate::{Error, Result};

/// Results table written into the results root after a run.
pub const RESULTS_FILE: &str = "results.parquet";

const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Where experiments execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// On the orchestrator with a bounded worker pool
    Local {
        /// Experiments in flight
        parallelism: usize,
    },
    /// On a cluster of workers
    Distributed(RemoteConfiguration),
}

/// Counts of a finished run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Enumerated experiments
    pub total: usize,
    /// `OK` results
    pub ok: usize,
    /// `ERROR` results
    pub errors: usize,
    /// `TIMEOUT` results
    pub timeouts: usize,
    /// Written results table, if any experiment ran
    pub results_file: Option<PathBuf>,
    /// Per-host synchronization outcome (distributed mode)
    pub reconciliation: Option<ReconciliationReport>,
}

/// Complete one experiment in the store and advance progress.
pub(crate) fn record(
    store: &mut ResultStore,
    key: &ExperimentKey,
    outcome: Result<ExperimentOutput>,
    progress: &mut Progress,
) {
    if let Err(e) = &outcome {
        warn!(experiment = %key, error = %e, timeout = e.is_timeout(), "experiment failed");
    }
    match store.complete(key, outcome) {
        Ok(status) => progress.advance(status),
        Err(e) => warn!(experiment = %key, error = %e, "result not recorded"),
    }
}

/// Builder for [`Evaluation`].
pub struct EvaluationBuilder {
    catalog: Arc<dyn DatasetCatalog>,
    datasets: Vec<DatasetId>,
    algorithms: Vec<Arc<Algorithm>>,
    repetitions: u32,
    results_path: PathBuf,
    results_root: Option<PathBuf>,
    constraints: ResourceConstraints,
    metrics: Vec<Arc<dyn Metric>>,
    mode: RunMode,
    progress_interval: Duration,
}

impl EvaluationBuilder {
    /// Evaluate `algorithms` on `datasets` with one repetition, locally and sequentially.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn DatasetCatalog>,
        datasets: Vec<DatasetId>,
        algorithms: Vec<Algorithm>,
    ) -> Self {
        let defaults = EvaluationConfig::default();
        let progress_interval = defaults.progress_interval();
        Self {
            catalog,
            datasets,
            algorithms: algorithms.into_iter().map(Arc::new).collect(),
            repetitions: defaults.repetitions,
            results_path: defaults.results_path,
            results_root: None,
            constraints: defaults.resource_constraints,
            metrics: Vec::new(),
            mode: RunMode::Local {
                parallelism: defaults.parallelism,
            },
            progress_interval,
        }
    }

    /// Apply a file-level configuration.
    #[must_use]
    pub fn from_config(mut self, config: EvaluationConfig) -> Self {
        self.repetitions = config.repetitions;
        self.progress_interval = config.progress_interval();
        self.results_path = config.results_path;
        self.constraints = config.resource_constraints;
        self.mode = match config.remote {
            Some(remote) => RunMode::Distributed(remote),
            None => RunMode::Local {
                parallelism: config.parallelism,
            },
        };
        self
    }

    /// Repetitions per configuration.
    #[must_use]
    pub const fn repetitions(mut self, repetitions: u32) -> Self {
        self.repetitions = repetitions;
        self
    }

    /// Base directory; the run writes into a timestamped subdirectory.
    #[must_use]
    pub fn results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = path.into();
        self
    }

    /// Exact results root, without a timestamped subdirectory.
    #[must_use]
    pub fn results_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.results_root = Some(root.into());
        self
    }

    /// Resource limits.
    #[must_use]
    pub fn constraints(mut self, constraints: ResourceConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Add a metric computed for every successful experiment.
    #[must_use]
    pub fn metric(mut self, metric: impl Metric + 'static) -> Self {
        self.metrics.push(Arc::new(metric));
        self
    }

    /// Run locally with `parallelism` experiments in flight.
    #[must_use]
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.mode = RunMode::Local { parallelism };
        self
    }

    /// Run on a cluster.
    #[must_use]
    pub fn distributed(mut self, remote: RemoteConfiguration) -> Self {
        self.mode = RunMode::Distributed(remote);
        self
    }

    /// Progress report interval.
    #[must_use]
    pub const fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Enumerate the experiments and fix the results root.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when no algorithms are given, two
    /// algorithms share a name, a parameter space cannot be sampled or a
    /// metric name clashes with a result column or another metric.
    pub fn build(self) -> Result<Evaluation> {
        let mut names = HashSet::new();
        for metric in &self.metrics {
            let name = metric.name();
            if RESULT_COLUMNS.contains(&name) || !names.insert(name) {
                return Err(Error::Configuration(format!(
                    "metric name {name} is already used by a result column or another metric"
                )));
            }
        }
        let experiments = enumerate(&self.algorithms, &self.datasets, self.repetitions)?;
        let results_root = self.results_root.unwrap_or_else(|| {
            let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
            self.results_path.join(stamp)
        });
        Ok(Evaluation {
            catalog: self.catalog,
            experiments,
            results_root,
            constraints: self.constraints,
            metrics: self.metrics,
            mode: self.mode,
            progress_interval: self.progress_interval,
            store: ResultStore::new(),
        })
    }
}

/// One evaluation run.
pub struct Evaluation {
    catalog: Arc<dyn DatasetCatalog>,
    experiments: Vec<Experiment>,
    results_root: PathBuf,
    constraints: ResourceConstraints,
    metrics: Vec<Arc<dyn Metric>>,
    mode: RunMode,
    progress_interval: Duration,
    store: ResultStore,
}

impl Evaluation {
    /// Enumerated experiments in dispatch order.
    #[must_use]
    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    /// Directory all artifacts of this run are written to.
    #[must_use]
    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    /// Collected results.
    #[must_use]
    pub const fn results(&self) -> &ResultStore {
        &self.store
    }

    /// Execution mode.
    #[must_use]
    pub const fn mode(&self) -> &RunMode {
        &self.mode
    }

    /// Run with the ssh cluster, `rsync` and the system resolver.
    ///
    /// # Errors
    /// See [`Evaluation::run_with`].
    pub async fn run(&mut self) -> Result<RunSummary> {
        let resolver: Arc<dyn HostResolver> = Arc::new(SystemResolver);
        let ssh = match &self.mode {
            RunMode::Distributed(remote) => remote.ssh.clone(),
            RunMode::Local { .. } => crate::host::SshOptions::default(),
        };
        let provider = SshClusterProvider::new(Arc::clone(&resolver), self.constraints.clone());
        self.run_with(provider, Rsync::new(ssh), resolver).await
    }

    /// Run with explicit cluster, synchronization and resolver collaborators.
    ///
    /// Every enumerated experiment ends with a terminal result, also when
    /// the run is aborted.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the run was already executed or
    /// the cluster cannot be provisioned, and an IO/Parquet error if the
    /// results table cannot be written.
    pub async fn run_with<P, S>(
        &mut self,
        provider: P,
        sync: S,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<RunSummary>
    where
        P: ClusterProvider,
        S: ResultSync,
    {
        if !self.store.is_empty() {
            return Err(Error::Configuration("evaluation has already been run".to_string()));
        }
        if self.experiments.is_empty() {
            info!("no experiments to run");
            return Ok(self.summary(None, None));
        }

        tokio::fs::create_dir_all(&self.results_root).await?;
        for experiment in &self.experiments {
            self.store.register(experiment.descriptor(), &self.results_root)?;
        }
        let ctx = ExecutionContext::new(Arc::clone(&self.catalog), self.results_root.clone())
            .with_metrics(self.metrics.clone())
            .with_constraints(self.constraints.clone());
        info!(
            experiments = self.experiments.len(),
            results_root = %self.results_root.display(),
            "evaluation started"
        );

        let reconciliation = match &self.mode {
            RunMode::Local { parallelism } => {
                let mut progress =
                    Progress::new("local", self.experiments.len(), self.progress_interval);
                LocalRunner::new(*parallelism)
                    .run(&self.experiments, &ctx, &mut self.store, &mut progress)
                    .await?;
                None
            }
            RunMode::Distributed(remote) => {
                let mut progress =
                    Progress::new("distributed", self.experiments.len(), self.progress_interval);
                let runner = DistributedRunner::new(provider, sync, resolver, remote.clone())
                    .poll_interval(self.progress_interval);
                match runner
                    .run(&self.experiments, &ctx, &mut self.store, &mut progress)
                    .await
                {
                    Ok(report) => Some(report),
                    Err(e) => {
                        self.store.abort_pending(&e.to_string());
                        return Err(e);
                    }
                }
            }
        };

        let aborted = self.store.abort_pending("experiment did not complete");
        if aborted > 0 {
            warn!(aborted, "experiments left without a result were marked as failed");
        }
        let results_file = self.results_root.join(RESULTS_FILE);
        self.store.write_parquet(&results_file)?;

        let summary = self.summary(Some(results_file), reconciliation);
        info!(
            total = summary.total,
            ok = summary.ok,
            errors = summary.errors,
            timeouts = summary.timeouts,
            "evaluation finished"
        );
        Ok(summary)
    }

    fn summary(
        &self,
        results_file: Option<PathBuf>,
        reconciliation: Option<ReconciliationReport>,
    ) -> RunSummary {
        RunSummary {
            total: self.store.len(),
            ok: self.store.count(Status::Ok),
            errors: self.store.count(Status::Error),
            timeouts: self.store.count(Status::Timeout),
            results_file,
            reconciliation,
        }
    }
}

impl std::fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluation")
            .field("experiments", &self.experiments.len())
            .field("results_root", &self.results_root)
            .field("mode", &self.mode)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::dataset::InMemoryCatalog;

    fn builder(algorithms: Vec<Algorithm>) -> EvaluationBuilder {
        EvaluationBuilder::new(
            Arc::new(InMemoryCatalog::new()),
            vec![DatasetId::new("c", "d")],
            algorithms,
        )
    }

    #[test]
    fn test_builder_takes_config_defaults() {
        let defaults = EvaluationConfig::default();
        let builder = builder(Vec::new());
        assert_eq!(builder.repetitions, defaults.repetitions);
        assert_eq!(builder.results_path, defaults.results_path);
        assert_eq!(builder.progress_interval, defaults.progress_interval());
        assert!(matches!(builder.mode, RunMode::Local { parallelism } if parallelism == defaults.parallelism));
    }

    struct Named(&'static str);

    impl Metric for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn score(&self, _scores: &[f64], _truth: &[f64]) -> Result<f64> {
            Ok(0.0)
        }
    }

    #[test]
    fn test_build_rejects_clashing_metric_names() {
        let algorithm = || vec![Algorithm::new("a", Adapter::function(|_, _| Ok(vec![])))];
        let column = builder(algorithm()).metric(Named("status")).build();
        assert!(column.unwrap_err().is_fatal());
        let twice = builder(algorithm()).metric(Named("AUC")).metric(Named("AUC")).build();
        assert!(twice.unwrap_err().is_fatal());
        assert!(builder(algorithm()).metric(Named("AUC")).build().is_ok());
    }

    #[test]
    fn test_build_rejects_no_algorithms() {
        assert!(builder(Vec::new()).build().unwrap_err().is_fatal());
    }

    #[test]
    fn test_results_root_is_timestamped() {
        let evaluation = builder(vec![Algorithm::new("a", Adapter::function(|_, _| Ok(vec![])))])
            .results_path("/tmp/bench")
            .build()
            .unwrap();
        let stamp = evaluation.results_root().file_name().unwrap().to_string_lossy().into_owned();
        assert!(evaluation.results_root().starts_with("/tmp/bench"));
        assert_eq!(stamp.len(), "2024_01_01_00_00_00".len());
    }

    #[test]
    fn test_config_selects_distributed_mode() {
        let config = EvaluationConfig::from_json_str(
            r#"{"repetitions": 2, "remote": {"worker_hosts": ["w1"]}}"#,
        )
        .unwrap();
        let evaluation = builder(vec![Algorithm::new("a", Adapter::function(|_, _| Ok(vec![])))])
            .from_config(config)
            .build()
            .unwrap();
        assert!(matches!(evaluation.mode(), RunMode::Distributed(_)));
        assert_eq!(evaluation.experiments().len(), 2);
    }
}
