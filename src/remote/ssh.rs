//! SSH connectivity for EC2 hosts
//!
//! Provides the SSH client that runs commands on test instances.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{CommandOutput, ConnectionProvider, DispatchError, RemoteConnection};

/// SSH client configuration
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// SSH username
    pub username: String,

    /// SSH private key path
    pub private_key_path: Option<PathBuf>,

    /// SSH port
    pub port: u16,

    /// Connection timeout in seconds
    pub timeout_secs: u64,

    /// Strict host key checking
    pub strict_host_key_checking: bool,

    /// How long to wait for a host to accept SSH, in seconds
    pub wait_secs: u64,

    /// Delay between reachability checks in seconds
    pub retry_delay_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: "ec2-user".to_string(),
            private_key_path: None,
            port: 22,
            timeout_secs: 30,
            strict_host_key_checking: false,
            wait_secs: 120,
            retry_delay_secs: 5,
        }
    }
}

impl SshConfig {
    /// Create a new SSH config
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Set private key path
    pub fn private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set connection timeout
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set how long to wait for SSH to come up
    pub fn wait(mut self, secs: u64) -> Self {
        self.wait_secs = secs;
        self
    }
}

/// SSH client for connecting to instances
#[derive(Clone, Debug)]
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    /// Create a new SSH client
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Build SSH command arguments
    fn build_ssh_args(&self, host: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.config.strict_host_key_checking {
                    "yes"
                } else {
                    "no"
                }
            ),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.timeout_secs),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
        ];

        if let Some(ref key_path) = self.config.private_key_path {
            args.push("-i".to_string());
            args.push(key_path.to_string_lossy().to_string());
        }

        args.push(format!("{}@{}", self.config.username, host));
        args
    }

    /// Test SSH connectivity
    pub async fn test_connection(&self, host: &str) -> bool {
        debug!(
            "Testing SSH connection to {}@{}",
            self.config.username, host
        );

        match self.exec(host, "echo connected", None).await {
            Ok(output) if output.is_success() => output.stdout.trim() == "connected",
            Ok(output) => {
                debug!("SSH connection test failed: {}", output.stderr.trim());
                false
            }
            Err(e) => {
                debug!("SSH connection test failed: {}", e);
                false
            }
        }
    }

    /// Wait for SSH to become available
    pub async fn wait_for_ssh(&self, host: &str) -> bool {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.wait_secs);

        info!(
            "Waiting for SSH on {}:{} (timeout: {}s)",
            host, self.config.port, self.config.wait_secs
        );

        loop {
            if self.test_connection(host).await {
                info!("SSH is available on {}", host);
                return true;
            }

            if start.elapsed() > timeout {
                warn!("Timeout waiting for SSH on {}", host);
                return false;
            }

            debug!(
                "SSH not yet available, retrying in {}s...",
                self.config.retry_delay_secs
            );
            sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
        }
    }

    /// Execute a command over SSH
    pub async fn exec(
        &self,
        host: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, DispatchError> {
        debug!("Executing SSH command on {}: {}", host, command);

        let mut args = self.build_ssh_args(host);
        args.push(command.to_string());

        let mut ssh = Command::new("ssh");
        ssh.args(&args).kill_on_drop(true);
        let child = ssh.output();

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child).await.map_err(|_| {
                DispatchError::Timeout {
                    command: command.to_string(),
                    secs: limit.as_secs(),
                }
            })?,
            None => child.await,
        }
        .map_err(|e| DispatchError::Spawn {
            program: "ssh".to_string(),
            reason: e.to_string(),
        })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Open a session bound to `host`
    pub fn connect(&self, host: &str) -> SshSession {
        SshSession {
            client: self.clone(),
            host: host.to_string(),
        }
    }
}

/// SSH session for multiple commands against one host
#[derive(Clone, Debug)]
pub struct SshSession {
    client: SshClient,
    host: String,
}

#[async_trait]
impl RemoteConnection for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, DispatchError> {
        self.client.exec(&self.host, command, timeout).await
    }
}

/// Maps instance types to reachable hosts and opens SSH sessions to them
pub struct SshConnectionProvider {
    client: SshClient,
    hosts: BTreeMap<String, String>,
    default_host: Option<String>,
}

impl SshConnectionProvider {
    pub fn new(config: SshConfig) -> Self {
        Self {
            client: SshClient::new(config),
            hosts: BTreeMap::new(),
            default_host: None,
        }
    }

    /// Host serving one instance type
    pub fn with_host(mut self, instance_type: impl Into<String>, host: impl Into<String>) -> Self {
        self.hosts.insert(instance_type.into(), host.into());
        self
    }

    /// Host used for instance types without a dedicated entry
    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = Some(host.into());
        self
    }

    pub fn resolve_host(&self, instance_type: &str) -> Result<&str, DispatchError> {
        self.hosts
            .get(instance_type)
            .or(self.default_host.as_ref())
            .map(String::as_str)
            .ok_or_else(|| DispatchError::NoHost(instance_type.to_string()))
    }
}

#[async_trait]
impl ConnectionProvider for SshConnectionProvider {
    async fn connect(
        &self,
        instance_type: &str,
    ) -> Result<Arc<dyn RemoteConnection>, DispatchError> {
        let host = self.resolve_host(instance_type)?;

        if !self.client.wait_for_ssh(host).await {
            return Err(DispatchError::Unreachable {
                host: host.to_string(),
                reason: format!("SSH did not answer within {}s", self.client.config.wait_secs),
            });
        }

        Ok(Arc::new(self.client.connect(host)))
    }
}
