//! Link speed measurement for the local primary interface.
//!
//! The speed is read from `ethtool <iface>` output, e.g. `Speed: 25000Mb/s`,
//! and reported in Mb/s.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use gpunet_common::netif::{fallback_interface, physical_interfaces};

use crate::PeerRecord;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("link speed query timed out after {0:?}")]
    Timeout(Duration),
    #[error("cannot parse link speed {input:?}: {reason}")]
    Parse { input: String, reason: String },
    #[error("no link speed reported for {0}")]
    NotFound(String),
    #[error("failed to run link speed query: {0}")]
    Io(#[from] std::io::Error),
    #[error("link speed query exited with {code:?}: {stderr}")]
    Command { code: Option<i32>, stderr: String },
}

/// Parses an ethtool speed token such as `1Gb/s` or `100Mb/s` into Mb/s.
pub fn parse_speed(input: &str) -> Result<u64, ProbeError> {
    let lower = input.trim().to_ascii_lowercase();
    let (value, multiplier) = if let Some(v) = lower.strip_suffix("gb/s") {
        (v, 1000)
    } else if let Some(v) = lower.strip_suffix("mb/s") {
        (v, 1)
    } else {
        return Err(ProbeError::Parse {
            input: input.to_string(),
            reason: "unsupported unit".to_string(),
        });
    };

    let value: u64 = value.trim().parse().map_err(|e| ProbeError::Parse {
        input: input.to_string(),
        reason: format!("{e}"),
    })?;
    value.checked_mul(multiplier).ok_or_else(|| ProbeError::Parse {
        input: input.to_string(),
        reason: "value out of range".to_string(),
    })
}

/// Extracts the first `Speed:` line of ethtool output.
pub fn parse_link_speed(output: &str, interface: &str) -> Result<u64, ProbeError> {
    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("Speed:") else {
            continue;
        };
        let Some(token) = rest.split_whitespace().next() else {
            continue;
        };
        let mbps = parse_speed(token)?;
        if mbps == 0 {
            break;
        }
        return Ok(mbps);
    }
    Err(ProbeError::NotFound(interface.to_string()))
}

/// First physical interface under `sysfs_root`, or the architecture default.
pub fn detect_primary_interface(sysfs_root: &Path) -> String {
    physical_interfaces(sysfs_root)
        .into_iter()
        .next()
        .unwrap_or_else(|| {
            let fallback = fallback_interface();
            tracing::warn!(fallback, "no physical interface detected, using fallback");
            fallback.to_string()
        })
}

#[derive(Debug, Clone)]
pub struct BandwidthProbe {
    program: String,
    interface: String,
    timeout: Duration,
}

impl BandwidthProbe {
    pub fn new(interface: Option<String>, timeout: Option<Duration>, sysfs_root: &Path) -> Self {
        let interface = interface
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| detect_primary_interface(sysfs_root));
        Self {
            program: "ethtool".to_string(),
            interface,
            timeout: timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT),
        }
    }

    /// Runs `program <interface>` instead of ethtool.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub async fn measure(&self) -> Result<u64, ProbeError> {
        let run = Command::new(&self.program)
            .arg(&self.interface)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_link_speed(&stdout, &self.interface) {
            Err(ProbeError::NotFound(_)) if !output.status.success() => Err(ProbeError::Command {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            other => other,
        }
    }

    /// Measures and stores the result on `record`. On failure the record keeps
    /// its previous bandwidth.
    pub async fn refresh(&self, record: &PeerRecord) -> Result<u64, ProbeError> {
        let mbps = self.measure().await?;
        record.set_bandwidth_mbps(mbps);
        Ok(mbps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETHTOOL_OUTPUT: &str = "Settings for ens1f0:
	Supported ports: [ FIBRE ]
	Supported link modes:   25000baseSR/Full
	Speed: 25000Mb/s
	Duplex: Full
	Link detected: yes
";

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_speed("1Gb/s").unwrap(), 1000);
        assert_eq!(parse_speed("100Mb/s").unwrap(), 100);
        assert_eq!(parse_speed("100GB/S").unwrap(), 100_000);
        assert!(matches!(parse_speed("weird"), Err(ProbeError::Parse { .. })));
        assert!(matches!(parse_speed("2.5Gb/s"), Err(ProbeError::Parse { .. })));
        assert!(matches!(parse_speed("10Kb/s"), Err(ProbeError::Parse { .. })));
    }

    #[test]
    fn test_parse_speed_overflow() {
        assert!(matches!(
            parse_speed("18446744073709552Gb/s"),
            Err(ProbeError::Parse { reason, .. }) if reason == "value out of range"
        ));
        assert_eq!(parse_speed("18446744073709551615Mb/s").unwrap(), u64::MAX);
    }

    #[test]
    fn test_parse_link_speed() {
        assert_eq!(parse_link_speed(ETHTOOL_OUTPUT, "ens1f0").unwrap(), 25_000);
    }

    #[test]
    fn test_parse_link_speed_unknown() {
        let out = "Settings for eth0:\n\tSpeed: Unknown!\n";
        assert!(matches!(parse_link_speed(out, "eth0"), Err(ProbeError::Parse { .. })));
    }

    #[test]
    fn test_parse_link_speed_missing() {
        let out = "Settings for eth0:\n\tDuplex: Full\n";
        assert!(matches!(
            parse_link_speed(out, "eth0"),
            Err(ProbeError::NotFound(iface)) if iface == "eth0"
        ));
    }

    #[test]
    fn test_detect_primary_interface() {
        let root = tempfile::tempdir().unwrap();
        for name in ["lo", "docker0", "ens2", "ens1f0"] {
            std::fs::create_dir_all(root.path().join("class/net").join(name)).unwrap();
        }
        assert_eq!(detect_primary_interface(root.path()), "ens1f0");

        let empty = tempfile::tempdir().unwrap();
        assert_eq!(detect_primary_interface(empty.path()), fallback_interface());
    }

    #[test]
    fn test_explicit_interface_wins() {
        let root = tempfile::tempdir().unwrap();
        let probe = BandwidthProbe::new(Some("ib0".to_string()), None, root.path());
        assert_eq!(probe.interface(), "ib0");
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let root = tempfile::tempdir().unwrap();
        let probe = BandwidthProbe::new(
            Some("5".to_string()),
            Some(Duration::from_millis(100)),
            root.path(),
        )
        .with_program("sleep");

        assert!(matches!(probe.measure().await, Err(ProbeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_failed_probe_keeps_bandwidth() {
        let root = tempfile::tempdir().unwrap();
        let probe = BandwidthProbe::new(Some("gpunet-missing0".to_string()), None, root.path());
        let record = PeerRecord::new("10.0.0.1", 0);
        record.set_bandwidth_mbps(1000);

        assert!(probe.refresh(&record).await.is_err());
        assert_eq!(record.bandwidth_mbps(), 1000);
    }
}
