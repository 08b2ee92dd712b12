//! Training test dispatcher
//!
//! Runs a scenario command inside the image under test on a remote host:
//! registry login, container start, command existence check, the command
//! itself, then container removal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CommandOutput, DispatchError, RemoteConnection};
use crate::models::{CommandPath, ImageReference};

/// Lines of stderr kept in failure messages
const STDERR_TAIL_LINES: usize = 20;

/// Timeout for the setup commands around the test itself
const SETUP_TIMEOUT: Duration = Duration::from_secs(900);

/// Interpreter used to run the command path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Executable {
    Bash,
    Python,
}

impl Executable {
    fn invocation(&self, path: &CommandPath) -> String {
        match self {
            Executable::Bash => format!("/bin/bash -c '{path}'"),
            Executable::Python => format!("python {path}"),
        }
    }
}

/// Container options for a dispatch
#[derive(Clone, Debug)]
pub struct DispatchOptions {
    /// Region used for registry login when it cannot be read from the image
    pub region: String,
    pub executable: Executable,
    pub large_shm: bool,
    pub host_network: bool,
    /// Test command timeout in seconds
    pub timeout_secs: u64,
    /// Host directory mounted at `/test` inside the container
    pub host_tests_dir: String,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_string(),
            executable: Executable::Bash,
            large_shm: false,
            host_network: false,
            timeout_secs: 3000,
            host_tests_dir: "$HOME/container_tests".to_string(),
        }
    }
}

/// Runs a command inside an image on a remote connection
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Fails on any non-zero remote exit, an unreachable host, or a command
    /// path missing from the image
    async fn execute(
        &self,
        connection: &dyn RemoteConnection,
        image: &ImageReference,
        command: &CommandPath,
    ) -> Result<CommandOutput, DispatchError>;
}

/// Docker-based dispatcher for training images
#[derive(Clone, Debug, Default)]
pub struct TrainingDispatcher {
    options: DispatchOptions,
}

impl TrainingDispatcher {
    pub fn new(options: DispatchOptions) -> Self {
        Self { options }
    }

    fn docker(image: &ImageReference) -> &'static str {
        if image.is_gpu() {
            "nvidia-docker"
        } else {
            "docker"
        }
    }

    /// Registry login command for ECR images
    fn login_command(&self, image: &ImageReference) -> Option<String> {
        let registry = image.registry()?;
        if !registry.contains(".dkr.ecr.") {
            return None;
        }

        let region = registry
            .split('.')
            .skip_while(|part| *part != "ecr")
            .nth(1)
            .unwrap_or(self.options.region.as_str());

        Some(format!(
            "aws ecr get-login-password --region {region} | docker login --username AWS --password-stdin {registry}"
        ))
    }

    fn run_command(&self, image: &ImageReference, container: &str) -> String {
        let mut parts = vec![
            format!("{} run --name {container}", Self::docker(image)),
        ];
        if self.options.host_network {
            parts.push("--network=\"host\"".to_string());
        }
        parts.push(format!("-v {}:/test", self.options.host_tests_dir));
        if self.options.large_shm {
            parts.push("--shm-size=\"1g\"".to_string());
        }
        parts.push(format!("-itd {image}"));
        parts.join(" ")
    }

    fn container_name(command: &CommandPath) -> String {
        let script = command
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or("test")
            .to_lowercase();
        let suffix: u32 = rand::random::<u32>() % 100_000;
        format!("ec2_training_{script}_{suffix:05}")
    }

    async fn run_checked(
        connection: &dyn RemoteConnection,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, DispatchError> {
        let output = connection.run(command, Some(timeout)).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(DispatchError::NonZeroExit {
                command: command.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr_tail(STDERR_TAIL_LINES),
            })
        }
    }

    /// Best-effort `rm -f`, also after a failed start
    async fn remove_container(
        connection: &dyn RemoteConnection,
        image: &ImageReference,
        container: &str,
    ) {
        let cleanup = format!("{} rm -f {container}", Self::docker(image));
        match connection.run(&cleanup, Some(SETUP_TIMEOUT)).await {
            Ok(output) if output.is_success() => debug!("Removed container {}", container),
            Ok(output) => warn!(
                "Failed to remove container {}: {}",
                container,
                output.stderr.trim()
            ),
            Err(e) => warn!("Failed to remove container {}: {}", container, e),
        }
    }

    async fn run_in_container(
        &self,
        connection: &dyn RemoteConnection,
        image: &ImageReference,
        container: &str,
        command: &CommandPath,
    ) -> Result<CommandOutput, DispatchError> {
        let docker = Self::docker(image);

        let path_check = format!("{docker} exec {container} test -e {command}");
        let exists = connection.run(&path_check, Some(SETUP_TIMEOUT)).await?;
        if !exists.is_success() {
            return Err(DispatchError::CommandNotFound(command.to_string()));
        }

        let exec = format!(
            "{docker} exec --user root {container} {}",
            self.options.executable.invocation(command)
        );
        Self::run_checked(
            connection,
            &exec,
            Duration::from_secs(self.options.timeout_secs),
        )
        .await
    }
}

#[async_trait]
impl Dispatch for TrainingDispatcher {
    async fn execute(
        &self,
        connection: &dyn RemoteConnection,
        image: &ImageReference,
        command: &CommandPath,
    ) -> Result<CommandOutput, DispatchError> {
        info!("Running {} in {} on {}", command, image, connection.host());

        if let Some(login) = self.login_command(image) {
            Self::run_checked(connection, &login, SETUP_TIMEOUT).await?;
        }

        let container = Self::container_name(command);
        let result =
            match Self::run_checked(connection, &self.run_command(image, &container), SETUP_TIMEOUT)
                .await
            {
                Ok(_) => {
                    self.run_in_container(connection, image, &container, command)
                        .await
                }
                Err(e) => Err(e),
            };

        Self::remove_container(connection, image, &container).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockConnection;

    const ECR_GPU: &str = "763104351884.dkr.ecr.us-east-1.amazonaws.com/pytorch-training:1.8.1-gpu-py36-cu111-ubuntu18.04";
    const LOCAL_CPU: &str = "pytorch-training:1.8.1-cpu-py36-ubuntu18.04";

    fn image(uri: &str) -> ImageReference {
        ImageReference::parse(uri).unwrap()
    }

    fn standalone() -> CommandPath {
        CommandPath::join("/test/bin", "pytorch_tests", "testPyTorchStandalone")
    }

    fn failed(exit_code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    #[tokio::test]
    async fn test_gpu_image_command_sequence() {
        let connection = MockConnection::new();
        let dispatcher = TrainingDispatcher::default();

        dispatcher
            .execute(&connection, &image(ECR_GPU), &standalone())
            .await
            .unwrap();

        let commands = connection.commands();
        assert_eq!(commands.len(), 5);
        assert!(commands[0].starts_with("aws ecr get-login-password --region us-east-1"));
        assert!(commands[0].ends_with("763104351884.dkr.ecr.us-east-1.amazonaws.com"));
        assert!(commands[1].starts_with("nvidia-docker run --name ec2_training_testpytorchstandalone_"));
        assert!(commands[1].contains("-v $HOME/container_tests:/test"));
        assert!(commands[1].ends_with(&format!("-itd {ECR_GPU}")));
        assert!(commands[2].ends_with("test -e /test/bin/pytorch_tests/testPyTorchStandalone"));
        assert!(commands[3]
            .ends_with("/bin/bash -c '/test/bin/pytorch_tests/testPyTorchStandalone'"));
        assert!(commands[4].starts_with("nvidia-docker rm -f ec2_training_"));
    }

    #[tokio::test]
    async fn test_local_cpu_image_skips_login() {
        let connection = MockConnection::new();
        let dispatcher = TrainingDispatcher::new(DispatchOptions {
            large_shm: true,
            host_network: true,
            ..Default::default()
        });

        dispatcher
            .execute(&connection, &image(LOCAL_CPU), &standalone())
            .await
            .unwrap();

        let commands = connection.commands();
        assert_eq!(commands.len(), 4);
        assert!(commands[0].starts_with("docker run --name "));
        assert!(commands[0].contains("--network=\"host\""));
        assert!(commands[0].contains("--shm-size=\"1g\""));
    }

    #[tokio::test]
    async fn test_non_zero_exit_propagates_and_cleans_up() {
        let connection = MockConnection::new().respond("/bin/bash -c", failed(1, "loss is nan"));
        let dispatcher = TrainingDispatcher::default();

        let err = dispatcher
            .execute(&connection, &image(LOCAL_CPU), &standalone())
            .await
            .unwrap_err();

        match err {
            DispatchError::NonZeroExit {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "loss is nan");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(connection
            .commands()
            .last()
            .unwrap()
            .starts_with("docker rm -f "));
    }

    #[tokio::test]
    async fn test_missing_command_path() {
        let connection = MockConnection::new().respond(" test -e ", failed(1, ""));
        let dispatcher = TrainingDispatcher::default();

        let err = dispatcher
            .execute(&connection, &image(LOCAL_CPU), &standalone())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DispatchError::CommandNotFound(
                "/test/bin/pytorch_tests/testPyTorchStandalone".to_string()
            )
        );
        assert!(!connection
            .commands()
            .iter()
            .any(|c| c.contains("/bin/bash -c")));
    }

    #[tokio::test]
    async fn test_container_start_failure_skips_test_command() {
        let connection = MockConnection::new().respond("docker run", failed(125, "no such image"));
        let dispatcher = TrainingDispatcher::default();

        let err = dispatcher
            .execute(&connection, &image(LOCAL_CPU), &standalone())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::NonZeroExit { exit_code: 125, .. }));
        let commands = connection.commands();
        assert_eq!(commands.len(), 2);
        assert!(!commands.iter().any(|c| c.contains("/bin/bash -c")));
        assert!(commands[1].starts_with("docker rm -f ec2_training_"));
    }

    #[tokio::test]
    async fn test_timeout_propagates_and_cleans_up() {
        let timeout = DispatchError::Timeout {
            command: "docker exec".to_string(),
            secs: 3000,
        };
        let connection = MockConnection::new().respond_err("/bin/bash -c", timeout.clone());
        let dispatcher = TrainingDispatcher::default();

        let err = dispatcher
            .execute(&connection, &image(LOCAL_CPU), &standalone())
            .await
            .unwrap_err();

        assert_eq!(err, timeout);
        assert!(connection
            .commands()
            .last()
            .unwrap()
            .starts_with("docker rm -f "));
    }

    #[test]
    fn test_python_invocation() {
        assert_eq!(
            Executable::Python.invocation(&standalone()),
            "python /test/bin/pytorch_tests/testPyTorchStandalone"
        );
    }
}
