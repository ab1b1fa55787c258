use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use gpunet_common::{DeviceInfo, DeviceStatus};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device query timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("device {0} not reported by the query tool")]
    NotFound(String),
}

/// Vendor tooling that enumerates accelerators and reports their load.
#[async_trait]
pub trait DeviceQuery: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    async fn device_statuses(&self) -> Result<Vec<DeviceStatus>, DeviceError>;

    async fn device_status(&self, uuid: &str) -> Result<DeviceStatus, DeviceError> {
        self.device_statuses()
            .await?
            .into_iter()
            .find(|s| s.uuid == uuid)
            .ok_or_else(|| DeviceError::NotFound(uuid.to_string()))
    }
}

/// `nvidia-smi` backed device query.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    program: String,
    timeout: Duration,
}

impl NvidiaSmi {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "nvidia-smi".to_string(),
            timeout,
        }
    }

    async fn query(&self, fields: &str) -> Result<String, DeviceError> {
        let run = Command::new(&self.program)
            .arg(format!("--query-gpu={fields}"))
            .arg("--format=csv,noheader,nounits")
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| DeviceError::Timeout(self.timeout))?
            .map_err(|source| DeviceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeviceError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TIMEOUT)
    }
}

#[async_trait]
impl DeviceQuery for NvidiaSmi {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let stdout = self.query("index,uuid,name,memory.total").await?;
        Ok(parse_device_list(&stdout))
    }

    async fn device_statuses(&self) -> Result<Vec<DeviceStatus>, DeviceError> {
        let stdout = self.query("uuid,memory.used,utilization.gpu").await?;
        Ok(parse_device_statuses(&stdout))
    }
}

/// Parses `index, uuid, name, memory.total` CSV rows. Malformed rows are skipped.
pub fn parse_device_list(stdout: &str) -> Vec<DeviceInfo> {
    let mut out = Vec::new();
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() < 4 {
            continue;
        }
        let Ok(index) = parts[0].parse::<u32>() else {
            continue;
        };
        let last = parts.len() - 1;
        out.push(DeviceInfo {
            index,
            uuid: parts[1].to_string(),
            // Product names may themselves contain commas.
            name: parts[2..last].join(","),
            memory_total_mb: parts[last].parse::<u64>().unwrap_or(0),
        });
    }
    out
}

/// Parses `uuid, memory.used, utilization.gpu` CSV rows.
pub fn parse_device_statuses(stdout: &str) -> Vec<DeviceStatus> {
    let mut out = Vec::new();
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() < 3 || parts[0].is_empty() {
            continue;
        }
        out.push(DeviceStatus {
            uuid: parts[0].to_string(),
            used_memory_mb: parts[1].parse::<u64>().unwrap_or(0),
            utilization: parts[2].parse::<u32>().unwrap_or(0),
        });
    }
    out
}
