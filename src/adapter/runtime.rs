//! Container runtime seam
//!
//! [`DockerEngine`] talks to the Docker Engine API through `bollard`. The
//! orchestrator's daemon is reached over its local socket; a worker's daemon
//! through its socket forwarded over ssh, so bind mounts always refer to the
//! worker's filesystem. Tests substitute their own [`ContainerRuntime`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as EngineError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::host::{Host, SshOptions};
use crate::{Error, Result};

/// Daemon socket on every worker.
const REMOTE_DOCKER_SOCKET: &str = "/var/run/docker.sock";
/// Engine API request timeout in seconds.
const API_TIMEOUT_SECS: u64 = 120;

static ENGINE_SEQ: AtomicU64 = AtomicU64::new(0);
static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Bind mount of a host directory into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Directory on the host
    pub source: PathBuf,
    /// Path inside the container
    pub target: String,
    /// Mount read-only
    pub read_only: bool,
}

impl Mount {
    /// `source:target:mode` as used in a bind list.
    #[must_use]
    pub fn bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{mode}", self.source.display(), self.target)
    }
}

/// What to start.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
    /// `name:tag`
    pub image: String,
    /// Arguments passed to the entrypoint
    pub args: Vec<String>,
    /// Bind mounts
    pub mounts: Vec<Mount>,
    /// Environment variables
    pub env: Vec<(String, String)>,
    /// Memory limit in bytes (0 = unlimited)
    pub memory_limit: u64,
    /// CPU limit in cores
    pub cpu_limit: f64,
    /// Additional group for file permissions inside the container
    pub group: Option<String>,
}

impl ContainerSpec {
    /// Engine API body creating this container.
    ///
    /// Swap is capped at the memory limit; a zero limit leaves both unset.
    #[must_use]
    pub fn create_body(&self) -> ContainerCreateBody {
        let memory = (self.memory_limit > 0).then(|| i64::try_from(self.memory_limit).unwrap_or(i64::MAX));
        #[allow(clippy::cast_possible_truncation)]
        let nano_cpus = (self.cpu_limit > 0.0).then(|| (self.cpu_limit * 1e9).round() as i64);
        let host_config = HostConfig {
            binds: Some(self.mounts.iter().map(Mount::bind).collect()),
            memory,
            memory_swap: memory,
            nano_cpus,
            group_add: self.group.clone().map(|g| vec![g]),
            ..Default::default()
        };
        ContainerCreateBody {
            image: Some(self.image.clone()),
            cmd: Some(self.args.clone()),
            env: Some(self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Minimal container lifecycle used by the Docker adapter.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the image is present on the host.
    async fn image_exists(&self, host: &Host, image: &str) -> Result<bool>;

    /// Pull the image onto the host.
    async fn pull(&self, host: &Host, image: &str) -> Result<()>;

    /// Start a detached container and return its id.
    async fn start(&self, host: &Host, spec: &ContainerSpec) -> Result<String>;

    /// Wait for the container to exit and return its exit code.
    async fn wait(&self, host: &Host, id: &str) -> Result<i64>;

    /// Stop a running container.
    async fn stop(&self, host: &Host, id: &str) -> Result<()>;

    /// Container output (stdout and stderr).
    async fn logs(&self, host: &Host, id: &str) -> Result<String>;

    /// Remove the container.
    async fn remove(&self, host: &Host, id: &str) -> Result<()>;
}

fn engine_error(action: &str, host: &Host, err: impl fmt::Display) -> Error {
    Error::AdapterExecution(format!("docker {action} on {} failed: {err}", host.name()))
}

/// `ssh` arguments forwarding a worker's daemon socket to `socket`.
///
/// With a control master the forward is added to the existing connection
/// and lives as long as the master does.
#[must_use]
pub fn forward_args(ssh: &SshOptions, host: &str, socket: &Path) -> Vec<String> {
    let mut args = ssh.args();
    if ssh.control_path.is_some() {
        args.extend(["-O".to_string(), "forward".to_string()]);
    } else {
        args.extend(["-f".to_string(), "-N".to_string()]);
        args.extend(["-o".to_string(), "ExitOnForwardFailure=yes".to_string()]);
    }
    args.push("-L".to_string());
    args.push(format!("{}:{REMOTE_DOCKER_SOCKET}", socket.display()));
    args.push(ssh.destination(host));
    args
}

/// Runtime backed by the Docker Engine API.
pub struct DockerEngine {
    clients: Mutex<HashMap<String, Docker>>,
    socket_dir: PathBuf,
}

impl DockerEngine {
    /// Engine with no open connections; daemons are connected on first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            socket_dir: std::env::temp_dir().join(format!(
                "trueno-eval-docker-{}-{}",
                std::process::id(),
                ENGINE_SEQ.fetch_add(1, Ordering::Relaxed)
            )),
        }
    }

    async fn client(&self, host: &Host) -> Result<Docker> {
        let mut clients = self.clients.lock().await;
        if let Some(docker) = clients.get(host.name()) {
            return Ok(docker.clone());
        }
        let docker = match host {
            Host::Local => {
                Docker::connect_with_local_defaults().map_err(|e| engine_error("connect", host, e))?
            }
            Host::Remote { name, ssh } => self.connect_remote(host, name, ssh).await?,
        };
        clients.insert(host.name().to_string(), docker.clone());
        Ok(docker)
    }

    async fn connect_remote(&self, host: &Host, name: &str, ssh: &SshOptions) -> Result<Docker> {
        tokio::fs::create_dir_all(&self.socket_dir).await?;
        let socket = self.socket_dir.join(format!("{name}.sock"));
        if tokio::fs::try_exists(&socket).await? {
            tokio::fs::remove_file(&socket).await?;
        }
        // a backgrounded ssh keeps its stdio open, so nothing is captured
        let status = Command::new("ssh")
            .args(forward_args(ssh, name, &socket))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(engine_error("socket forward", host, format!("ssh exited with {status}")));
        }
        debug!(host = name, socket = %socket.display(), "docker socket forwarded");
        Docker::connect_with_unix(&socket.display().to_string(), API_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(|e| engine_error("connect", host, e))
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DockerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerEngine")
            .field("socket_dir", &self.socket_dir)
            .finish_non_exhaustive()
    }
}

impl Drop for DockerEngine {
    fn drop(&mut self) {
        // best effort; the directory only exists once a worker was connected
        let _ = std::fs::remove_dir_all(&self.socket_dir);
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn image_exists(&self, host: &Host, image: &str) -> Result<bool> {
        let docker = self.client(host).await?;
        match docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(EngineError::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(engine_error("image inspect", host, e)),
        }
    }

    async fn pull(&self, host: &Host, image: &str) -> Result<()> {
        let docker = self.client(host).await?;
        let mut progress = pin!(docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        ));
        while let Some(step) = progress.next().await {
            step.map_err(|e| engine_error("pull", host, e))?;
        }
        Ok(())
    }

    async fn start(&self, host: &Host, spec: &ContainerSpec) -> Result<String> {
        let docker = self.client(host).await?;
        let name = format!(
            "trueno-eval-{}-{}",
            std::process::id(),
            CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    ..Default::default()
                }),
                spec.create_body(),
            )
            .await
            .map_err(|e| engine_error("create", host, e))?;
        if let Err(e) = docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(cleanup) = self.remove(host, &name).await {
                warn!(container = %name, error = %cleanup, "container not removed");
            }
            return Err(engine_error("start", host, e));
        }
        Ok(name)
    }

    async fn wait(&self, host: &Host, id: &str) -> Result<i64> {
        let docker = self.client(host).await?;
        let mut exits = pin!(docker.wait_container(id, None::<WaitContainerOptions<String>>));
        match exits.next().await {
            Some(Ok(exit)) => Ok(exit.status_code),
            // nonzero exit codes arrive as an error
            Some(Err(EngineError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(engine_error("wait", host, e)),
            None => Err(engine_error("wait", host, "no exit status")),
        }
    }

    async fn stop(&self, host: &Host, id: &str) -> Result<()> {
        let docker = self.client(host).await?;
        docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(|e| engine_error("stop", host, e))
    }

    async fn logs(&self, host: &Host, id: &str) -> Result<String> {
        let docker = self.client(host).await?;
        let mut output = pin!(docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        ));
        let mut text = String::new();
        while let Some(chunk) = output.next().await {
            match chunk.map_err(|e| engine_error("logs", host, e))? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => text.push_str(&String::from_utf8_lossy(&message)),
                _ => {}
            }
        }
        Ok(text)
    }

    async fn remove(&self, host: &Host, id: &str) -> Result<()> {
        let docker = self.client(host).await?;
        docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| engine_error("remove", host, e))
    }
}
