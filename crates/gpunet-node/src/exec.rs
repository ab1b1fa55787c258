use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use gpunet_common::CommandOutput;

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Runs an arbitrary command in the context of one device.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, device_uuid: &str, command: &str) -> Result<CommandOutput, ExecError>;
}

/// Runs commands through `sh -c` with the device pinned via the CUDA/NVIDIA
/// visibility variables. Stdout and stderr are returned together.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(DEFAULT_EXEC_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, device_uuid: &str, command: &str) -> Result<CommandOutput, ExecError> {
        let run = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("CUDA_VISIBLE_DEVICES", device_uuid)
            .env("NVIDIA_VISIBLE_DEVICES", device_uuid)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ExecError::Timeout(self.timeout))??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            output: text,
            exit_status: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Echoes the command back after an optional delay.
    #[derive(Debug, Clone, Default)]
    pub struct EchoRunner {
        pub delay: Duration,
    }

    #[async_trait]
    impl CommandRunner for EchoRunner {
        async fn run(&self, device_uuid: &str, command: &str) -> Result<CommandOutput, ExecError> {
            tokio::time::sleep(self.delay).await;
            Ok(CommandOutput {
                output: format!("{device_uuid}: {command}"),
                exit_status: 0,
            })
        }
    }
}
