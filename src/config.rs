//! Run configuration
//!
//! All types deserialize from JSON so a run can be described in a file and
//! handed to [`EvaluationBuilder::from_config`](crate::runner::EvaluationBuilder::from_config).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::host::SshOptions;
use crate::Result;

/// Default wall-clock budget of one containerized execution.
pub const DEFAULT_EXECUTE_TIMEOUT_SECS: u64 = 2 * 60 * 60;

/// Per-task resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConstraints {
    /// Concurrent tasks per host
    #[serde(default = "ResourceConstraints::default_tasks_per_host")]
    pub tasks_per_host: usize,
    /// Memory limit per task in bytes (default: host memory / `tasks_per_host`)
    #[serde(default)]
    pub task_memory_limit: Option<u64>,
    /// CPU limit per task in cores (default: host cores / `tasks_per_host`)
    #[serde(default)]
    pub task_cpu_limit: Option<f64>,
    /// Execution timeout in seconds
    #[serde(default = "ResourceConstraints::default_execute_timeout")]
    pub execute_timeout_secs: u64,
}

impl ResourceConstraints {
    const fn default_tasks_per_host() -> usize {
        1
    }

    const fn default_execute_timeout() -> u64 {
        DEFAULT_EXECUTE_TIMEOUT_SECS
    }

    /// Execution timeout as a [`Duration`].
    #[must_use]
    pub const fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }

    /// Memory (bytes) and CPU (cores) limits for one task.
    ///
    /// Overrides win over configured limits, which win over an even split
    /// of the host's resources.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute_limits(&self, memory_override: Option<u64>, cpu_override: Option<f64>) -> (u64, f64) {
        let tasks = self.tasks_per_host.max(1);
        let memory = memory_override.or(self.task_memory_limit).unwrap_or_else(|| {
            let mut system = sysinfo::System::new();
            system.refresh_memory();
            system.total_memory() / tasks as u64
        });
        let cpus = cpu_override.or(self.task_cpu_limit).unwrap_or_else(|| {
            let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
            cores as f64 / tasks as f64
        });
        (memory, cpus)
    }
}

impl Default for ResourceConstraints {
    fn default() -> Self {
        Self {
            tasks_per_host: Self::default_tasks_per_host(),
            task_memory_limit: None,
            task_cpu_limit: None,
            execute_timeout_secs: Self::default_execute_timeout(),
        }
    }
}

/// Scheduler and worker hosts of a distributed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfiguration {
    /// Host that owns the task queue
    #[serde(default = "RemoteConfiguration::default_scheduler")]
    pub scheduler_host: String,
    /// Hosts that execute experiments
    #[serde(default)]
    pub worker_hosts: Vec<String>,
    /// SSH options for every remote host
    #[serde(default)]
    pub ssh: SshOptions,
}

impl RemoteConfiguration {
    fn default_scheduler() -> String {
        "localhost".to_string()
    }

    /// Configuration with default ssh options.
    #[must_use]
    pub fn new<I, S>(scheduler_host: impl Into<String>, worker_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scheduler_host: scheduler_host.into(),
            worker_hosts: worker_hosts.into_iter().map(Into::into).collect(),
            ssh: SshOptions::default(),
        }
    }

    /// Worker hosts with duplicates removed, first occurrence kept.
    #[must_use]
    pub fn unique_workers(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.worker_hosts
            .iter()
            .filter(|h| seen.insert(h.as_str()))
            .cloned()
            .collect()
    }
}

impl Default for RemoteConfiguration {
    fn default() -> Self {
        Self {
            scheduler_host: Self::default_scheduler(),
            worker_hosts: vec![Self::default_scheduler()],
            ssh: SshOptions::default(),
        }
    }
}

/// File-level description of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Base directory; each run gets a timestamped subdirectory
    #[serde(default = "EvaluationConfig::default_results_path")]
    pub results_path: PathBuf,
    /// Repetitions per configuration
    #[serde(default = "EvaluationConfig::default_repetitions")]
    pub repetitions: u32,
    /// Local worker pool size
    #[serde(default = "EvaluationConfig::default_parallelism")]
    pub parallelism: usize,
    /// Progress report interval in milliseconds
    #[serde(default = "EvaluationConfig::default_progress_interval")]
    pub progress_interval_ms: u64,
    /// Resource limits
    #[serde(default)]
    pub resource_constraints: ResourceConstraints,
    /// Distributed mode when present
    #[serde(default)]
    pub remote: Option<RemoteConfiguration>,
}

impl EvaluationConfig {
    fn default_results_path() -> PathBuf {
        PathBuf::from("results")
    }

    const fn default_repetitions() -> u32 {
        1
    }

    const fn default_parallelism() -> usize {
        1
    }

    const fn default_progress_interval() -> u64 {
        500
    }

    /// Parse a JSON configuration.
    ///
    /// # Errors
    /// Returns [`crate::Error::Serde`] on malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file.
    ///
    /// # Errors
    /// Returns an IO or serialization error.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Progress interval as a [`Duration`].
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            results_path: Self::default_results_path(),
            repetitions: Self::default_repetitions(),
            parallelism: Self::default_parallelism(),
            progress_interval_ms: Self::default_progress_interval(),
            resource_constraints: ResourceConstraints::default(),
            remote: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config = EvaluationConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EvaluationConfig::default());
        assert_eq!(config.resource_constraints.tasks_per_host, 1);
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_remote_config_parses() {
        let config = EvaluationConfig::from_json_str(
            r#"{"repetitions": 3, "remote": {"scheduler_host": "s1", "worker_hosts": ["w1", "w2", "w1"], "ssh": {"user": "bench"}}}"#,
        )
        .unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(config.repetitions, 3);
        assert_eq!(remote.unique_workers(), vec!["w1".to_string(), "w2".to_string()]);
        assert_eq!(remote.ssh.user.as_deref(), Some("bench"));
        assert_eq!(remote.ssh.connect_timeout_secs, 10);
    }

    #[test]
    fn test_limit_overrides_take_precedence() {
        let constraints = ResourceConstraints {
            tasks_per_host: 2,
            task_memory_limit: Some(1024),
            task_cpu_limit: Some(2.0),
            ..ResourceConstraints::default()
        };
        assert_eq!(constraints.compute_limits(None, None), (1024, 2.0));
        assert_eq!(constraints.compute_limits(Some(10), Some(0.5)), (10, 0.5));
    }

    #[test]
    fn test_limits_split_host_resources() {
        let constraints = ResourceConstraints::default();
        let (memory, cpus) = constraints.compute_limits(None, None);
        assert!(cpus >= 1.0);
        // sysinfo may report 0 inside restricted sandboxes
        let _ = memory;
    }
}
