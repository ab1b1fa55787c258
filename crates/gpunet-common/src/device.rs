use serde::{Deserialize, Serialize};

/// One accelerator as reported by the vendor query tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub uuid: String,
    pub name: String,
    #[serde(rename = "memory_total")]
    pub memory_total_mb: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub uuid: String,
    #[serde(rename = "used_memory")]
    pub used_memory_mb: u64,
    pub utilization: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_status: i32,
}
