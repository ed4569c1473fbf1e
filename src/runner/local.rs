//! Local Runner: executes experiments on the orchestrating machine

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::info;

use super::cluster::TaskHandle;
use super::{record, Progress};
use crate::experiment::{ExecutionContext, Experiment};
use crate::store::ResultStore;
use crate::Result;

/// Bounded-parallelism runner in the current process.
#[derive(Debug, Clone, Copy)]
pub struct LocalRunner {
    parallelism: usize,
}

impl LocalRunner {
    /// Runner with at most `parallelism` experiments in flight (minimum 1).
    #[must_use]
    pub const fn new(parallelism: usize) -> Self {
        Self {
            parallelism: if parallelism == 0 { 1 } else { parallelism },
        }
    }

    /// Get the worker pool size.
    #[must_use]
    pub const fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Execute every experiment and record its outcome.
    ///
    /// Experiments start in enumeration order, each on its own task. A
    /// failing or panicking experiment is recorded as `ERROR` or `TIMEOUT`
    /// and never stops the batch.
    ///
    /// # Errors
    /// Returns an error only if an experiment was not registered in `store`.
    pub async fn run(
        &self,
        experiments: &[Experiment],
        ctx: &ExecutionContext,
        store: &mut ResultStore,
        progress: &mut Progress,
    ) -> Result<()> {
        info!(
            experiments = experiments.len(),
            parallelism = self.parallelism,
            "running experiments locally"
        );
        let mut pending = experiments.iter();
        let mut in_flight = FuturesUnordered::new();
        loop {
            while in_flight.len() < self.parallelism {
                let Some(experiment) = pending.next() else {
                    break;
                };
                let key = experiment.key();
                store.start(&key)?;
                let experiment = experiment.clone();
                let ctx = ctx.clone();
                let task = TaskHandle::spawn(async move { experiment.execute(&ctx).await });
                in_flight.push(async move { (key, task.await) });
            }
            let Some((key, outcome)) = in_flight.next().await else {
                break;
            };
            record(store, &key, outcome, progress);
        }
        Ok(())
    }
}
