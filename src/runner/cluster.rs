//! Cluster seam of the Distributed Runner
//!
//! A [`ClusterProvider`] provisions a [`Cluster`] from a
//! [`RemoteConfiguration`]. The cluster accepts experiments and hands back a
//! [`TaskHandle`] per experiment. [`SshClusterProvider`] is the production
//! implementation: every worker is reached over a persistent ssh control
//! connection and tasks are balanced over `tasks_per_host` slots per worker.

use std::cmp::Reverse;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{RemoteConfiguration, ResourceConstraints};
use crate::experiment::{ExecutionContext, Experiment, ExperimentOutput};
use crate::host::{Host, HostResolver, LocalIdentity, SshOptions};
use crate::{Error, Result};

/// Handle of one submitted experiment; resolves to its outcome.
#[derive(Debug)]
pub struct TaskHandle {
    inner: JoinHandle<Result<ExperimentOutput>>,
}

impl TaskHandle {
    /// Run `task` on the tokio runtime.
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = Result<ExperimentOutput>> + Send + 'static,
    {
        Self {
            inner: tokio::spawn(task),
        }
    }
}

impl Future for TaskHandle {
    type Output = Result<ExperimentOutput>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(Error::AdapterExecution("task was cancelled".to_string())),
            Err(e) => Err(Error::AdapterExecution(format!("task failed: {e}"))),
        })
    }
}

/// A provisioned pool of workers.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Worker hosts as configured (duplicates removed).
    fn workers(&self) -> &[String];

    /// Submit one experiment; never blocks on execution.
    fn submit(&self, experiment: Experiment, ctx: ExecutionContext) -> TaskHandle;

    /// Create the results root on every worker.
    async fn prepare(&self, results_root: &Path) -> Result<()>;

    /// Release every cluster resource. Safe to call more than once.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Creates clusters.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Cluster type produced.
    type Cluster: Cluster;

    /// Bring up scheduler and workers.
    ///
    /// # Errors
    /// Any error is fatal for the run.
    async fn provision(&self, remote: &RemoteConfiguration) -> Result<Self::Cluster>;
}

struct SlotPool {
    permits: Arc<Semaphore>,
    free: Mutex<Vec<usize>>,
}

struct Slot {
    pool: Arc<SlotPool>,
    host: usize,
    _permit: OwnedSemaphorePermit,
}

impl SlotPool {
    fn new(hosts: usize, per_host: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(hosts * per_host)),
            free: Mutex::new(vec![per_host; hosts]),
        }
    }

    /// Wait for a free slot on the least loaded host.
    async fn acquire(self: Arc<Self>) -> Result<Slot> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::AdapterExecution("cluster was shut down".to_string()))?;
        let host = {
            let mut free = self
                .free
                .lock()
                .map_err(|_| Error::Other("slot pool lock poisoned".to_string()))?;
            let host = free
                .iter()
                .enumerate()
                .max_by_key(|&(idx, n)| (*n, Reverse(idx)))
                .map(|(idx, _)| idx)
                .ok_or_else(|| Error::Other("slot pool has no hosts".to_string()))?;
            free[host] = free[host].saturating_sub(1);
            host
        };
        Ok(Slot {
            pool: self,
            host,
            _permit: permit,
        })
    }

    fn close(&self) {
        self.permits.close();
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Ok(mut free) = self.pool.free.lock() {
            free[self.host] += 1;
        }
    }
}

static CLUSTER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Provisions clusters of ssh-reachable workers.
pub struct SshClusterProvider {
    resolver: Arc<dyn HostResolver>,
    constraints: ResourceConstraints,
}

impl SshClusterProvider {
    /// Provider using `resolver` to recognize the orchestrator among the hosts.
    #[must_use]
    pub fn new(resolver: Arc<dyn HostResolver>, constraints: ResourceConstraints) -> Self {
        Self {
            resolver,
            constraints,
        }
    }

    async fn open_master(ssh: &SshOptions, host: &str) -> Result<()> {
        let output = Command::new("ssh")
            .args(ssh.args())
            .args(["-o", "ControlMaster=auto", "-o", "ControlPersist=yes"])
            .arg(ssh.destination(host))
            .arg("true")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

#[async_trait]
impl ClusterProvider for SshClusterProvider {
    type Cluster = SshCluster;

    async fn provision(&self, remote: &RemoteConfiguration) -> Result<SshCluster> {
        let workers = remote.unique_workers();
        if workers.is_empty() {
            return Err(Error::Configuration("no worker hosts configured".to_string()));
        }
        let identity = LocalIdentity::detect(self.resolver.as_ref()).await;

        let control_dir = std::env::temp_dir().join(format!(
            "trueno-eval-ssh-{}-{}",
            std::process::id(),
            CLUSTER_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::create_dir_all(&control_dir).await?;
        let mut ssh = remote.ssh.clone();
        ssh.control_path = Some(control_dir.join("%C"));

        let mut cluster = SshCluster {
            workers: workers.clone(),
            hosts: Vec::with_capacity(workers.len()),
            slots: Arc::new(SlotPool::new(workers.len(), self.constraints.tasks_per_host.max(1))),
            masters: Vec::new(),
            ssh: ssh.clone(),
            control_dir: Some(control_dir),
        };

        let scheduler = remote.scheduler_host.as_str();
        let mut connect = vec![scheduler];
        connect.extend(workers.iter().map(String::as_str).filter(|w| *w != scheduler));
        for name in connect {
            let local = identity.is_local(name, self.resolver.as_ref()).await;
            if !local {
                if let Err(e) = Self::open_master(&ssh, name).await {
                    if let Err(close) = cluster.shutdown().await {
                        warn!(error = %close, "cleanup after failed provisioning");
                    }
                    return Err(Error::Configuration(format!("cannot connect to {name}: {e}")));
                }
                debug!(host = name, "ssh control connection established");
                cluster.masters.push(name.to_string());
            }
            if workers.iter().any(|w| w == name) {
                cluster.hosts.push((name.to_string(), local));
            }
        }
        // keep slot order equal to worker order
        cluster.hosts.sort_by_key(|(name, _)| workers.iter().position(|w| w == name));

        info!(
            scheduler,
            workers = ?cluster.workers,
            tasks_per_host = self.constraints.tasks_per_host,
            "cluster provisioned"
        );
        Ok(cluster)
    }
}

/// Cluster of ssh-reachable workers.
pub struct SshCluster {
    workers: Vec<String>,
    hosts: Vec<(String, bool)>,
    slots: Arc<SlotPool>,
    masters: Vec<String>,
    ssh: SshOptions,
    control_dir: Option<PathBuf>,
}

impl SshCluster {
    /// Directory holding the ssh control sockets; `None` after shutdown.
    #[must_use]
    pub fn control_dir(&self) -> Option<&Path> {
        self.control_dir.as_deref()
    }

    fn host(&self, idx: usize) -> Host {
        match self.hosts.get(idx) {
            Some((name, false)) => Host::remote(name.clone(), self.ssh.clone()),
            _ => Host::Local,
        }
    }
}

#[async_trait]
impl Cluster for SshCluster {
    fn workers(&self) -> &[String] {
        &self.workers
    }

    fn submit(&self, experiment: Experiment, ctx: ExecutionContext) -> TaskHandle {
        let pool = Arc::clone(&self.slots);
        let hosts: Vec<Host> = (0..self.hosts.len()).map(|idx| self.host(idx)).collect();
        TaskHandle::spawn(async move {
            let slot = pool.acquire().await?;
            let host = hosts.get(slot.host).cloned().unwrap_or(Host::Local);
            debug!(experiment = %experiment.key(), host = host.name(), "dispatching");
            let outcome = experiment.execute(&ctx.on_host(host)).await;
            drop(slot);
            outcome
        })
    }

    async fn prepare(&self, results_root: &Path) -> Result<()> {
        for idx in 0..self.hosts.len() {
            self.host(idx).create_dir_all(results_root).await?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.slots.close();
        let mut first_error = None;
        for name in std::mem::take(&mut self.masters) {
            let status = Command::new("ssh")
                .args(self.ssh.args())
                .args(["-O", "exit"])
                .arg(self.ssh.destination(&name))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match status {
                Ok(s) if s.success() => debug!(host = %name, "ssh control connection closed"),
                Ok(s) => warn!(host = %name, status = %s, "closing ssh control connection failed"),
                Err(e) => {
                    warn!(host = %name, error = %e, "closing ssh control connection failed");
                    first_error.get_or_insert(Error::Io(e));
                }
            }
        }
        if let Some(dir) = self.control_dir.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                debug!(dir = %dir.display(), error = %e, "control directory not removed");
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slots_balance_hosts() {
        let pool = Arc::new(SlotPool::new(2, 2));
        let a = Arc::clone(&pool).acquire().await.unwrap();
        let b = Arc::clone(&pool).acquire().await.unwrap();
        assert_ne!(a.host, b.host);
        let c = Arc::clone(&pool).acquire().await.unwrap();
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(*pool.free.lock().unwrap(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = Arc::new(SlotPool::new(1, 1));
        pool.close();
        assert!(pool.acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_task_handle_maps_panics() {
        let handle = TaskHandle::spawn(async {
            let outcome: Result<ExperimentOutput> = Err(Error::Other(String::new()));
            assert!(outcome.is_ok(), "worker died");
            outcome
        });
        let err = handle.await.unwrap_err();
        assert!(err.to_string().starts_with("task failed"));
    }
}
