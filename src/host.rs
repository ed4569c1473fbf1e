//! Execution hosts
//!
//! A [`Host`] runs commands and small file operations either on the
//! orchestrating machine or on a worker over `ssh`. Remote commands are
//! shell-quoted because `ssh` joins its arguments into one command line.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// SSH connection options shared by every remote host of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshOptions {
    /// Login user (defaults to the ssh client's choice)
    #[serde(default)]
    pub user: Option<String>,
    /// Port (defaults to 22)
    #[serde(default)]
    pub port: Option<u16>,
    /// Private key file
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Connection timeout in seconds
    #[serde(default = "SshOptions::default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Control socket path of the multiplexed master connection.
    /// Set by the cluster while it is provisioned.
    #[serde(skip)]
    pub control_path: Option<PathBuf>,
}

impl SshOptions {
    const fn default_connect_timeout() -> u64 {
        10
    }

    /// Options passed to every `ssh` invocation.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        if let Some(control) = &self.control_path {
            args.push("-o".to_string());
            args.push(format!("ControlPath={}", control.display()));
        }
        args
    }

    /// `[user@]host`
    #[must_use]
    pub fn destination(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            user: None,
            port: None,
            identity_file: None,
            connect_timeout_secs: Self::default_connect_timeout(),
            control_path: None,
        }
    }
}

/// Quote a string for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    /// The orchestrating machine
    Local,
    /// A worker reached over ssh
    Remote {
        /// Hostname or address
        name: String,
        /// Connection options
        ssh: SshOptions,
    },
}

impl Host {
    /// Remote host with the given ssh options.
    #[must_use]
    pub fn remote(name: impl Into<String>, ssh: SshOptions) -> Self {
        Self::Remote {
            name: name.into(),
            ssh,
        }
    }

    /// Display name of the host.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Local => "localhost",
            Self::Remote { name, .. } => name,
        }
    }

    /// Whether commands run without ssh.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// Build the command that runs `program args..` on this host.
    #[must_use]
    pub fn command(&self, program: &str, args: &[String]) -> Command {
        match self {
            Self::Local => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            Self::Remote { name, ssh } => {
                let mut line = shell_quote(program);
                for arg in args {
                    line.push(' ');
                    line.push_str(&shell_quote(arg));
                }
                let mut cmd = Command::new("ssh");
                cmd.args(ssh.args()).arg(ssh.destination(name)).arg(line);
                cmd
            }
        }
    }

    /// Run a command to completion, optionally feeding `stdin`.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the process cannot be spawned.
    pub async fn output(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<Output> {
        debug!(host = self.name(), program, ?args, "running command");
        let mut cmd = self.command(program, args);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await?;
                pipe.shutdown().await?;
            }
        }
        Ok(child.wait_with_output().await?)
    }

    async fn checked(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<Output> {
        let output = self.output(program, args, stdin).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(Error::Io(std::io::Error::other(format!(
                "{program} on {} failed: {}",
                self.name(),
                String::from_utf8_lossy(&output.stderr).trim()
            ))))
        }
    }

    /// `mkdir -p` on this host.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the directory cannot be created.
    pub async fn create_dir_all(&self, path: &Path) -> Result<()> {
        match self {
            Self::Local => Ok(tokio::fs::create_dir_all(path).await?),
            Self::Remote { .. } => {
                let args = vec!["-p".to_string(), path.display().to_string()];
                self.checked("mkdir", &args, None).await.map(|_| ())
            }
        }
    }

    /// Write a file on this host.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be written.
    pub async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        match self {
            Self::Local => Ok(tokio::fs::write(path, contents).await?),
            Self::Remote { .. } => {
                let script = format!("cat > {}", shell_quote(&path.display().to_string()));
                let args = vec!["-c".to_string(), script];
                self.checked("sh", &args, Some(contents)).await.map(|_| ())
            }
        }
    }

    /// Read a text file on this host.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read.
    pub async fn read_to_string(&self, path: &Path) -> Result<String> {
        match self {
            Self::Local => Ok(tokio::fs::read_to_string(path).await?),
            Self::Remote { .. } => {
                let args = vec![path.display().to_string()];
                let output = self.checked("cat", &args, None).await?;
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
        }
    }
}

/// Name resolution used to decide whether a host is the orchestrator.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Hostname of the orchestrating machine.
    fn local_hostname(&self) -> Option<String>;

    /// Addresses a hostname resolves to (empty when unresolvable).
    async fn resolve(&self, host: &str) -> Vec<IpAddr>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    fn local_hostname(&self) -> Option<String> {
        sysinfo::System::host_name()
    }

    async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        match tokio::time::timeout(RESOLVE_TIMEOUT, tokio::net::lookup_host((host, 0))).await {
            Ok(Ok(addrs)) => addrs.map(|addr| addr.ip()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Names and addresses under which the orchestrator is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    names: BTreeSet<String>,
    addrs: BTreeSet<IpAddr>,
}

impl LocalIdentity {
    /// Collect the orchestrator's hostname, `localhost` and their addresses.
    pub async fn detect(resolver: &dyn HostResolver) -> Self {
        let mut names = BTreeSet::from(["localhost".to_string()]);
        let mut addrs = BTreeSet::from([
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ]);
        if let Some(hostname) = resolver.local_hostname() {
            let hostname = hostname.to_ascii_lowercase();
            addrs.extend(resolver.resolve(&hostname).await);
            if let Some(short) = hostname.split('.').next() {
                names.insert(short.to_string());
            }
            names.insert(hostname);
        }
        Self { names, addrs }
    }

    /// Whether `host` names the orchestrating machine.
    pub async fn is_local(&self, host: &str, resolver: &dyn HostResolver) -> bool {
        let host = host.trim().to_ascii_lowercase();
        if self.names.contains(&host) {
            return true;
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return ip.is_loopback() || self.addrs.contains(&ip);
        }
        resolver
            .resolve(&host)
            .await
            .iter()
            .any(|ip| ip.is_loopback() || self.addrs.contains(ip))
    }
}
