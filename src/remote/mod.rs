//! Remote execution
//!
//! Connections to EC2 hosts and the dispatcher that runs scenario commands
//! inside the image under test.

mod dispatcher;
mod ssh;

pub use dispatcher::{Dispatch, DispatchOptions, Executable, TrainingDispatcher};
pub use ssh::{SshConfig, SshConnectionProvider};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Remote execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Host {host} is unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("No host configured for instance type {0}")]
    NoHost(String),

    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command path {0} does not exist inside the image")]
    CommandNotFound(String),

    #[error("Command `{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
}

/// Output of a remote command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `n` lines of stderr, for failure messages
    pub fn stderr_tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// An open connection to a remote host
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Host this connection talks to
    fn host(&self) -> &str;

    /// Run a shell command on the host, returning its output whatever the exit code
    async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, DispatchError>;
}

/// Opens connections to instances of a given type
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(
        &self,
        instance_type: &str,
    ) -> Result<Arc<dyn RemoteConnection>, DispatchError>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording doubles for remote execution

    use super::*;
    use std::sync::Mutex;

    /// Connection that records commands and answers from a script
    #[derive(Default)]
    pub struct MockConnection {
        commands: Mutex<Vec<String>>,
        responses: Vec<(String, Result<CommandOutput, DispatchError>)>,
    }

    impl MockConnection {
        pub fn new() -> Self {
            Self::default()
        }

        /// Commands containing `needle` return `output`
        pub fn respond(mut self, needle: impl Into<String>, output: CommandOutput) -> Self {
            self.responses.push((needle.into(), Ok(output)));
            self
        }

        /// Commands containing `needle` fail with `error`
        pub fn respond_err(mut self, needle: impl Into<String>, error: DispatchError) -> Self {
            self.responses.push((needle.into(), Err(error)));
            self
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteConnection for MockConnection {
        fn host(&self) -> &str {
            "mock-host"
        }

        async fn run(
            &self,
            command: &str,
            _timeout: Option<Duration>,
        ) -> Result<CommandOutput, DispatchError> {
            self.commands.lock().unwrap().push(command.to_string());
            let scripted = self
                .responses
                .iter()
                .find(|(needle, _)| command.contains(needle.as_str()))
                .map(|(_, response)| response.clone());
            scripted.unwrap_or_else(|| Ok(CommandOutput::default()))
        }
    }

    /// Provider handing out one shared mock connection
    pub struct MockProvider {
        pub connection: Arc<MockConnection>,
        pub unreachable: bool,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self {
                connection: Arc::new(MockConnection::new()),
                unreachable: false,
            }
        }
    }

    #[async_trait]
    impl ConnectionProvider for MockProvider {
        async fn connect(
            &self,
            instance_type: &str,
        ) -> Result<Arc<dyn RemoteConnection>, DispatchError> {
            if self.unreachable {
                return Err(DispatchError::Unreachable {
                    host: instance_type.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(self.connection.clone())
        }
    }
}
