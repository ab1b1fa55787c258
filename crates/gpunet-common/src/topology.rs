use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Devices, interfaces and memory sharing one NUMA affinity domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NumaGroup {
    pub node_id: u32,
    pub device_ids: BTreeSet<u32>,
    pub interface_names: BTreeSet<String>,
    pub memory_bytes: u64,
}

impl NumaGroup {
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }
}
