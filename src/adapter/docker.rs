//! Docker adapter
//!
//! Container contract:
//!
//! ```text
//! /data     read-only   directory holding the dataset file
//! /results  read-write  experiment artifact directory
//!
//! <image> execute-algorithm '{"dataInput": ..., "dataOutput": "/results/anomaly_scores.ts",
//!                             "modelInput": ..., "modelOutput": ...,
//!                             "executionType": "execute", "customParameters": {...}}'
//! ```
//!
//! The container writes one score per line to `dataOutput`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::runtime::{ContainerRuntime, ContainerSpec, DockerEngine, Mount};
use super::{parse_scores, AdapterInput};
use crate::dataset::DatasetPayload;
use crate::host::Host;
use crate::{Error, Result};

/// Scores file written by the container.
pub const SCORES_FILE: &str = "anomaly_scores.ts";
/// Copy of the container arguments kept for inspection.
pub const PARAMETERS_FILE: &str = "parameters.json";
/// Container path of the data mount.
pub const DATA_MOUNT: &str = "/data";
/// Container path of the results mount.
pub const RESULTS_MOUNT: &str = "/results";
/// File name of in-memory series staged for the container.
pub const INPUT_CSV: &str = "dataset.csv";

const MODEL_FILE: &str = "model.pkl";
const LOG_TAIL_LINES: usize = 20;

/// Adapter that runs an algorithm image.
#[derive(Clone)]
pub struct DockerAdapter {
    image_name: String,
    tag: String,
    skip_pull: bool,
    timeout: Option<Duration>,
    group_privileges: Option<String>,
    memory_limit: Option<u64>,
    cpu_limit: Option<f64>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl DockerAdapter {
    /// Adapter for `image[:tag]` driven by the Docker Engine API.
    ///
    /// The tag defaults to `latest`; a registry port is not mistaken for a tag.
    #[must_use]
    pub fn new(image: &str) -> Self {
        let (image_name, tag) = split_image(image);
        Self {
            image_name,
            tag,
            skip_pull: false,
            timeout: None,
            group_privileges: None,
            memory_limit: None,
            cpu_limit: None,
            runtime: Arc::new(DockerEngine::new()),
        }
    }

    /// Override the tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Never pull; a missing image is an error.
    #[must_use]
    pub const fn skip_pull(mut self, skip: bool) -> Self {
        self.skip_pull = skip;
        self
    }

    /// Wall-clock budget, overriding the run's execution timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Group added to the container user.
    #[must_use]
    pub fn group_privileges(mut self, group: impl Into<String>) -> Self {
        self.group_privileges = Some(group.into());
        self
    }

    /// Memory limit in bytes, overriding the run's constraints.
    #[must_use]
    pub const fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// CPU limit in cores, overriding the run's constraints.
    #[must_use]
    pub const fn cpu_limit(mut self, cores: f64) -> Self {
        self.cpu_limit = Some(cores);
        self
    }

    /// Use another container runtime.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// `name:tag`
    #[must_use]
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image_name, self.tag)
    }

    /// Run the container and read back its scores.
    ///
    /// The container is removed whatever the outcome.
    ///
    /// # Errors
    /// Returns [`Error::AdapterTimeout`] when the budget elapses and
    /// [`Error::AdapterExecution`] when the image is unavailable, the
    /// container exits non-zero or writes no readable scores.
    pub async fn run(&self, input: AdapterInput<'_>) -> Result<Vec<f64>> {
        let host = input.host;
        let image = self.image_ref();
        self.ensure_image(host, &image).await?;
        host.create_dir_all(input.artifact_dir).await?;

        let mut mounts = Vec::with_capacity(2);
        let data_input = match input.payload {
            DatasetPayload::File(path) => {
                let (dir, file) = split_file(path)?;
                mounts.push(Mount {
                    source: dir.to_path_buf(),
                    target: DATA_MOUNT.to_string(),
                    read_only: true,
                });
                format!("{DATA_MOUNT}/{file}")
            }
            DatasetPayload::Series(series) => {
                host.write(&input.artifact_dir.join(INPUT_CSV), series.to_csv().as_bytes())
                    .await?;
                format!("{RESULTS_MOUNT}/{INPUT_CSV}")
            }
        };
        mounts.push(Mount {
            source: input.artifact_dir.to_path_buf(),
            target: RESULTS_MOUNT.to_string(),
            read_only: false,
        });

        let arguments = json!({
            "dataInput": data_input,
            "dataOutput": format!("{RESULTS_MOUNT}/{SCORES_FILE}"),
            "modelInput": format!("{RESULTS_MOUNT}/{MODEL_FILE}"),
            "modelOutput": format!("{RESULTS_MOUNT}/{MODEL_FILE}"),
            "executionType": "execute",
            "customParameters": Value::Object(input.params.clone().into_iter().collect()),
        });
        host.write(
            &input.artifact_dir.join(PARAMETERS_FILE),
            &serde_json::to_vec_pretty(&arguments)?,
        )
        .await?;

        let (memory_limit, cpu_limit) = input
            .constraints
            .compute_limits(self.memory_limit, self.cpu_limit);
        let spec = ContainerSpec {
            image: image.clone(),
            args: vec!["execute-algorithm".to_string(), arguments.to_string()],
            mounts,
            env: Vec::new(),
            memory_limit,
            cpu_limit,
            group: self.group_privileges.clone(),
        };
        let budget = self
            .timeout
            .unwrap_or_else(|| input.constraints.execute_timeout());

        let id = self.runtime.start(host, &spec).await?;
        debug!(image = %image, container = %id, host = host.name(), "container started");
        let outcome = self.supervise(host, &id, &image, budget).await;
        if let Err(e) = self.runtime.remove(host, &id).await {
            warn!(container = %id, error = %e, "failed to remove container");
        }
        outcome?;

        let text = host
            .read_to_string(&input.artifact_dir.join(SCORES_FILE))
            .await
            .map_err(|e| Error::AdapterExecution(format!("{image} produced no scores: {e}")))?;
        parse_scores(&text)
    }

    async fn ensure_image(&self, host: &Host, image: &str) -> Result<()> {
        if self.runtime.image_exists(host, image).await? {
            return Ok(());
        }
        if self.skip_pull {
            return Err(Error::AdapterExecution(format!(
                "image {image} not found on {} and pulling is disabled",
                host.name()
            )));
        }
        info!(image, host = host.name(), "pulling image");
        self.runtime.pull(host, image).await.map_err(|e| {
            Error::AdapterExecution(format!("failed to pull {image} on {}: {e}", host.name()))
        })
    }

    async fn supervise(&self, host: &Host, id: &str, image: &str, budget: Duration) -> Result<()> {
        match tokio::time::timeout(budget, self.runtime.wait(host, id)).await {
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(code)) => {
                let logs = self.log_tail(host, id).await;
                Err(Error::AdapterExecution(format!(
                    "{image} exited with status {code}: {logs}"
                )))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                if let Err(e) = self.runtime.stop(host, id).await {
                    warn!(container = id, error = %e, "failed to stop timed out container");
                }
                Err(Error::AdapterTimeout(format!(
                    "{image} could not finish execution within {}s",
                    budget.as_secs_f64()
                )))
            }
        }
    }

    async fn log_tail(&self, host: &Host, id: &str) -> String {
        match self.runtime.logs(host, id).await {
            Ok(logs) => {
                let lines: Vec<&str> = logs.lines().collect();
                let start = lines.len().saturating_sub(LOG_TAIL_LINES);
                lines[start..].join("\n")
            }
            Err(e) => format!("<logs unavailable: {e}>"),
        }
    }
}

impl fmt::Debug for DockerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerAdapter")
            .field("image", &self.image_ref())
            .field("skip_pull", &self.skip_pull)
            .field("timeout", &self.timeout)
            .field("group_privileges", &self.group_privileges)
            .field("memory_limit", &self.memory_limit)
            .field("cpu_limit", &self.cpu_limit)
            .finish_non_exhaustive()
    }
}

fn split_image(image: &str) -> (String, String) {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (
            image[..name_start + i].to_string(),
            image[name_start + i + 1..].to_string(),
        ),
        None => (image.to_string(), "latest".to_string()),
    }
}

fn split_file(path: &Path) -> Result<(&Path, String)> {
    let file = path.file_name().map(|f| f.to_string_lossy().into_owned());
    match (path.parent(), file) {
        (Some(dir), Some(file)) => Ok((dir, file)),
        _ => Err(Error::AdapterExecution(format!(
            "dataset path {} has no file name",
            path.display()
        ))),
    }
}
