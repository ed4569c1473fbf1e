//! Distributed Runner
//!
//! ```text
//! provision ─> prepare ─> submit all ─> gather all ─> reconcile ─> teardown
//!                                        (tick: progress)
//! ```
//!
//! Reconciliation starts only after the last task resolved, and teardown
//! runs on every path once the cluster exists.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::cluster::{Cluster, ClusterProvider};
use super::sync::{reconcile, ReconciliationReport, ResultSync};
use super::{record, Progress};
use crate::config::RemoteConfiguration;
use crate::experiment::{ExecutionContext, Experiment};
use crate::host::HostResolver;
use crate::store::ResultStore;
use crate::{Error, Result};

/// Default progress tick while gathering.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs experiments on a provisioned cluster and reconciles their artifacts.
pub struct DistributedRunner<P, S> {
    provider: P,
    sync: S,
    resolver: Arc<dyn HostResolver>,
    remote: RemoteConfiguration,
    poll_interval: Duration,
}

impl<P: ClusterProvider, S: ResultSync> DistributedRunner<P, S> {
    /// Create a runner for one topology.
    #[must_use]
    pub fn new(
        provider: P,
        sync: S,
        resolver: Arc<dyn HostResolver>,
        remote: RemoteConfiguration,
    ) -> Self {
        Self {
            provider,
            sync,
            resolver,
            remote,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the progress tick interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Execute every experiment on the cluster.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the cluster cannot be provisioned.
    /// Per-experiment failures are recorded in `store` instead.
    pub async fn run(
        &self,
        experiments: &[Experiment],
        ctx: &ExecutionContext,
        store: &mut ResultStore,
        progress: &mut Progress,
    ) -> Result<ReconciliationReport> {
        let mut cluster = self.provider.provision(&self.remote).await.map_err(|e| {
            error!(error = %e, "cluster provisioning failed");
            if e.is_fatal() {
                e
            } else {
                Error::Configuration(format!("cluster provisioning failed: {e}"))
            }
        })?;

        let outcome = self.execute(&cluster, experiments, ctx, store, progress).await;
        let report = match outcome {
            Ok(()) => Ok(reconcile(
                cluster.workers(),
                ctx.results_root(),
                &self.sync,
                self.resolver.as_ref(),
            )
            .await),
            Err(e) => Err(e),
        };

        if let Err(e) = cluster.shutdown().await {
            warn!(error = %e, "cluster teardown reported an error");
        } else {
            info!("cluster shut down");
        }
        report
    }

    async fn execute(
        &self,
        cluster: &P::Cluster,
        experiments: &[Experiment],
        ctx: &ExecutionContext,
        store: &mut ResultStore,
        progress: &mut Progress,
    ) -> Result<()> {
        if let Err(e) = cluster.prepare(ctx.results_root()).await {
            warn!(error = %e, "could not create results directory on every worker");
        }

        let mut tasks = FuturesUnordered::new();
        for experiment in experiments {
            let key = experiment.key();
            store.start(&key)?;
            let handle = cluster.submit(experiment.clone(), ctx.clone());
            tasks.push(handle.map(move |outcome| (key, outcome)));
        }
        info!(submitted = tasks.len(), workers = ?cluster.workers(), "experiments submitted");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !tasks.is_empty() {
            tokio::select! {
                Some((key, outcome)) = tasks.next() => record(store, &key, outcome, progress),
                _ = ticker.tick() => progress.report(),
            }
        }
        Ok(())
    }
}

impl<P, S> std::fmt::Debug for DistributedRunner<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedRunner")
            .field("remote", &self.remote)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
