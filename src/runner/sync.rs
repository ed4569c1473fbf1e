//! Result reconciliation: copy worker result trees back to the orchestrator

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::host::{shell_quote, HostResolver, LocalIdentity, SshOptions};
use crate::{Error, Result};

/// Copies one host's results root into the local results root.
#[async_trait]
pub trait ResultSync: Send + Sync {
    /// Merge `host:<results_root>/` into the local `<results_root>`.
    async fn pull(&self, host: &str, results_root: &Path) -> Result<()>;
}

/// `rsync -a` over ssh.
#[derive(Debug, Clone, Default)]
pub struct Rsync {
    ssh: SshOptions,
}

impl Rsync {
    /// Sync using the given ssh options.
    #[must_use]
    pub const fn new(ssh: SshOptions) -> Self {
        Self { ssh }
    }

    /// Arguments passed to `rsync`.
    #[must_use]
    pub fn args(&self, host: &str, results_root: &Path) -> Vec<String> {
        let mut remote_shell = String::from("ssh");
        for arg in self.ssh.args() {
            remote_shell.push(' ');
            remote_shell.push_str(&shell_quote(&arg));
        }
        let root = results_root.display().to_string();
        vec![
            "-a".to_string(),
            "-e".to_string(),
            remote_shell,
            format!("{}:{root}/", self.ssh.destination(host)),
            root,
        ]
    }
}

#[async_trait]
impl ResultSync for Rsync {
    async fn pull(&self, host: &str, results_root: &Path) -> Result<()> {
        let args = self.args(host, results_root);
        debug!(host, ?args, "rsync");
        let output = Command::new("rsync")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "rsync exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Outcome of reconciling every worker.
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    /// Hosts copied successfully
    pub synced: Vec<String>,
    /// Hosts skipped because they are the orchestrator
    pub skipped: Vec<String>,
    /// Per-host failures ([`Error::Reconciliation`])
    pub failures: Vec<Error>,
}

impl ReconciliationReport {
    /// Whether every remote host was copied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pull the results root from every distinct non-local host.
///
/// Failures are reported per host and never abort the remaining hosts.
pub async fn reconcile(
    hosts: &[String],
    results_root: &Path,
    sync: &dyn ResultSync,
    resolver: &dyn HostResolver,
) -> ReconciliationReport {
    let identity = LocalIdentity::detect(resolver).await;
    let mut report = ReconciliationReport::default();
    let mut seen = HashSet::new();
    for host in hosts {
        if !seen.insert(host.as_str()) {
            continue;
        }
        if identity.is_local(host, resolver).await {
            debug!(host = %host, "skipping local host");
            report.skipped.push(host.clone());
            continue;
        }
        match sync.pull(host, results_root).await {
            Ok(()) => report.synced.push(host.clone()),
            Err(e) => {
                warn!(host = %host, error = %e, "could not copy results");
                report.failures.push(Error::Reconciliation {
                    host: host.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    info!(
        synced = report.synced.len(),
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        "results reconciled"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsync_args() {
        let rsync = Rsync::new(SshOptions::default());
        let args = rsync.args("remote-1", Path::new("/results/2024_01_01_00_00_00"));
        assert_eq!(args[0], "-a");
        assert!(args[2].starts_with("ssh "));
        assert_eq!(args[3], "remote-1:/results/2024_01_01_00_00_00/");
        assert_eq!(args[4], "/results/2024_01_01_00_00_00");
    }

    #[test]
    fn test_rsync_uses_ssh_user() {
        let rsync = Rsync::new(SshOptions {
            user: Some("bench".to_string()),
            ..SshOptions::default()
        });
        let args = rsync.args("w1", Path::new("/r"));
        assert_eq!(args[3], "bench@w1:/r/");
    }
}
