//! NUMA topology discovery from sysfs.
//!
//! Accelerators are enumerated densely as `class/drm/card<N>` starting at 0;
//! network interfaces come from `class/net`. Each item's affinity is read from
//! its `device/numa_node` file. Hosts without NUMA report `-1`, which folds to
//! node 0, as does an unreadable file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use gpunet_common::netif::physical_interfaces;
use gpunet_common::{DeviceInfo, NumaGroup};

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("no accelerator devices found under {0}")]
    NoDevices(PathBuf),
    #[error("{item} is bound to both NUMA node {first} and NUMA node {second}")]
    Overlap { item: String, first: u32, second: u32 },
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed descriptor {path}: {reason}")]
    Descriptor { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
pub struct TopologyScanner {
    sysfs_root: PathBuf,
}

impl TopologyScanner {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }

    /// Groups devices, interfaces and memory by NUMA node, ordered by node id.
    ///
    /// Fails with [`TopologyError::NoDevices`] when no `card0` exists.
    pub fn build_topology(&self) -> Result<Vec<NumaGroup>, TopologyError> {
        let devices = self.device_affinities();
        if devices.is_empty() {
            return Err(TopologyError::NoDevices(self.sysfs_root.join("class/drm")));
        }

        let mut groups: BTreeMap<u32, NumaGroup> = BTreeMap::new();
        for (device_id, node) in devices {
            groups
                .entry(node)
                .or_insert_with(|| NumaGroup::new(node))
                .device_ids
                .insert(device_id);
        }
        for (name, node) in self.interface_affinities() {
            groups
                .entry(node)
                .or_insert_with(|| NumaGroup::new(node))
                .interface_names
                .insert(name);
        }
        for group in groups.values_mut() {
            group.memory_bytes = self.node_memory_bytes(group.node_id).unwrap_or(0);
        }

        let groups: Vec<NumaGroup> = groups.into_values().collect();
        for g in &groups {
            tracing::info!(
                node = g.node_id,
                devices = ?g.device_ids,
                interfaces = ?g.interface_names,
                memory_bytes = g.memory_bytes,
                "numa group"
            );
        }
        Ok(groups)
    }

    fn device_affinities(&self) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for id in 0u32.. {
            let path = self
                .sysfs_root
                .join(format!("class/drm/card{id}/device/numa_node"));
            match fs::read_to_string(&path) {
                Ok(raw) => out.push((id, fold_affinity(&raw))),
                Err(_) => break,
            }
        }
        out
    }

    fn interface_affinities(&self) -> Vec<(String, u32)> {
        physical_interfaces(&self.sysfs_root)
            .into_iter()
            .map(|name| {
                let path = self
                    .sysfs_root
                    .join("class/net")
                    .join(&name)
                    .join("device/numa_node");
                let node = match fs::read_to_string(&path) {
                    Ok(raw) => fold_affinity(&raw),
                    Err(e) => {
                        tracing::debug!(interface=%name, error=%e, "no numa affinity, using node 0");
                        0
                    }
                };
                (name, node)
            })
            .collect()
    }

    fn node_memory_bytes(&self, node: u32) -> Option<u64> {
        let path = self
            .sysfs_root
            .join(format!("devices/system/node/node{node}/meminfo"));
        let content = fs::read_to_string(&path).ok()?;
        parse_meminfo_total(&content)
    }
}

fn fold_affinity(raw: &str) -> u32 {
    raw.trim().parse::<i64>().ok().and_then(|n| u32::try_from(n).ok()).unwrap_or(0)
}

/// Reads the value following `MemTotal:` (in kB) and returns bytes.
pub fn parse_meminfo_total(content: &str) -> Option<u64> {
    let mut tokens = content.split_whitespace();
    while let Some(tok) = tokens.next() {
        if tok == "MemTotal:" {
            return tokens.next()?.parse::<u64>().ok()?.checked_mul(1024);
        }
    }
    None
}

/// Checks that no item appears in more than one node's set.
pub fn ensure_disjoint<'a, T>(
    sets: impl IntoIterator<Item = (u32, &'a BTreeSet<T>)>,
) -> Result<(), TopologyError>
where
    T: Ord + Display + 'a,
{
    let mut owner: BTreeMap<&T, u32> = BTreeMap::new();
    for (node, set) in sets {
        for item in set {
            if let Some(&first) = owner.get(item) {
                return Err(TopologyError::Overlap {
                    item: item.to_string(),
                    first,
                    second: node,
                });
            }
            owner.insert(item, node);
        }
    }
    Ok(())
}

/// Maps a group's device ids to the UUIDs reported by the device query.
/// Ids the query did not report are skipped.
pub fn resolve_bound_uuids(group: &NumaGroup, inventory: &[DeviceInfo]) -> BTreeSet<String> {
    group
        .device_ids
        .iter()
        .filter_map(|id| {
            let found = inventory.iter().find(|d| d.index == *id);
            if found.is_none() {
                tracing::warn!(node = group.node_id, device_id = id, "device not reported by query tool");
            }
            found.map(|d| d.uuid.clone())
        })
        .collect()
}

fn descriptor_path(dir: &Path, node: u32, kind: &str) -> PathBuf {
    dir.join(format!("numa{node}_{kind}.txt"))
}

fn write_file(path: PathBuf, content: String) -> Result<(), TopologyError> {
    fs::write(&path, content).map_err(|source| TopologyError::Io { path, source })
}

/// Writes `numa<N>_gpus.txt`, `numa<N>_iface.txt` and `numa<N>_mem_gb.txt`
/// for every group.
pub fn write_descriptors(dir: &Path, groups: &[NumaGroup]) -> Result<(), TopologyError> {
    fs::create_dir_all(dir).map_err(|source| TopologyError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for g in groups {
        let gpus = g
            .device_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let ifaces = g.interface_names.iter().cloned().collect::<Vec<_>>().join(",");
        let mem_gb = format!("{:.2}", g.memory_bytes as f64 / 1e9);

        write_file(descriptor_path(dir, g.node_id, "gpus"), gpus)?;
        write_file(descriptor_path(dir, g.node_id, "iface"), ifaces)?;
        write_file(descriptor_path(dir, g.node_id, "mem_gb"), mem_gb)?;
    }
    tracing::info!(dir=%dir.display(), groups = groups.len(), "topology descriptors written");
    Ok(())
}

/// Rebuilds groups from descriptor files. Memory is restored at the
/// descriptor's two-decimal GB precision.
pub fn load_descriptors(dir: &Path) -> Result<Vec<NumaGroup>, TopologyError> {
    let entries = fs::read_dir(dir).map_err(|source| TopologyError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut nodes: Vec<u32> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_prefix("numa")?
                .strip_suffix("_gpus.txt")?
                .parse::<u32>()
                .ok()
        })
        .collect();
    nodes.sort_unstable();

    let mut groups = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut group = NumaGroup::new(node);

        let path = descriptor_path(dir, node, "gpus");
        let raw = fs::read_to_string(&path).map_err(|source| TopologyError::Io {
            path: path.clone(),
            source,
        })?;
        for tok in raw.split([',', '\n']).map(str::trim).filter(|t| !t.is_empty()) {
            let id = tok.parse::<u32>().map_err(|e| TopologyError::Descriptor {
                path: path.clone(),
                reason: format!("device id {tok:?}: {e}"),
            })?;
            group.device_ids.insert(id);
        }

        if let Ok(raw) = fs::read_to_string(descriptor_path(dir, node, "iface")) {
            group.interface_names = raw
                .split([',', '\n'])
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
        }

        let path = descriptor_path(dir, node, "mem_gb");
        if let Ok(raw) = fs::read_to_string(&path) {
            let gb = raw.trim().parse::<f64>().map_err(|e| TopologyError::Descriptor {
                path: path.clone(),
                reason: format!("memory {:?}: {e}", raw.trim()),
            })?;
            group.memory_bytes = (gb * 1e9).round() as u64;
        }

        groups.push(group);
    }

    if groups.iter().all(|g| g.device_ids.is_empty()) {
        return Err(TopologyError::NoDevices(dir.to_path_buf()));
    }
    ensure_disjoint(groups.iter().map(|g| (g.node_id, &g.device_ids)))?;
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn card(root: &Path, id: u32, node: &str) {
        put(root, &format!("class/drm/card{id}/device/numa_node"), node);
    }

    fn iface(root: &Path, name: &str, node: Option<&str>) {
        let dir = root.join("class/net").join(name);
        fs::create_dir_all(&dir).unwrap();
        if let Some(node) = node {
            put(root, &format!("class/net/{name}/device/numa_node"), node);
        }
    }

    fn meminfo(root: &Path, node: u32, kb: u64) {
        put(
            root,
            &format!("devices/system/node/node{node}/meminfo"),
            &format!("Node {node} MemTotal:       {kb} kB\nNode {node} MemFree:        1024 kB\n"),
        );
    }

    fn two_socket_host() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        card(root.path(), 0, "0\n");
        card(root.path(), 1, "0\n");
        card(root.path(), 2, "1\n");
        card(root.path(), 3, "1\n");
        iface(root.path(), "eth0", Some("0\n"));
        iface(root.path(), "eth1", Some("1\n"));
        iface(root.path(), "lo", None);
        meminfo(root.path(), 0, 62_500_000);
        meminfo(root.path(), 1, 125_000_000);
        root
    }

    #[test]
    fn test_two_socket_grouping() {
        let root = two_socket_host();
        let groups = TopologyScanner::new(root.path()).build_topology().unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].node_id, 0);
        assert_eq!(groups[0].device_ids, BTreeSet::from([0, 1]));
        assert_eq!(groups[0].interface_names, BTreeSet::from(["eth0".to_string()]));
        assert_eq!(groups[0].memory_bytes, 64_000_000_000);
        assert_eq!(groups[1].node_id, 1);
        assert_eq!(groups[1].device_ids, BTreeSet::from([2, 3]));
        assert_eq!(groups[1].interface_names, BTreeSet::from(["eth1".to_string()]));
        assert_eq!(groups[1].memory_bytes, 128_000_000_000);
    }

    #[test]
    fn test_crossed_affinity() {
        let root = tempfile::tempdir().unwrap();
        card(root.path(), 0, "1");
        card(root.path(), 1, "0");
        iface(root.path(), "eth0", Some("1"));
        meminfo(root.path(), 0, 62_500_000);
        meminfo(root.path(), 1, 125_000_000);

        let groups = TopologyScanner::new(root.path()).build_topology().unwrap();
        assert_eq!(
            groups,
            vec![
                NumaGroup {
                    node_id: 0,
                    device_ids: BTreeSet::from([1]),
                    interface_names: BTreeSet::new(),
                    memory_bytes: 64_000_000_000,
                },
                NumaGroup {
                    node_id: 1,
                    device_ids: BTreeSet::from([0]),
                    interface_names: BTreeSet::from(["eth0".to_string()]),
                    memory_bytes: 128_000_000_000,
                },
            ]
        );
    }

    #[test]
    fn test_no_numa_folds_to_node_zero() {
        let root = tempfile::tempdir().unwrap();
        card(root.path(), 0, "-1\n");
        card(root.path(), 1, "garbage");
        iface(root.path(), "ens1f0", None);

        let groups = TopologyScanner::new(root.path()).build_topology().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].node_id, 0);
        assert_eq!(groups[0].device_ids, BTreeSet::from([0, 1]));
        assert_eq!(groups[0].interface_names, BTreeSet::from(["ens1f0".to_string()]));
        assert_eq!(groups[0].memory_bytes, 0);
    }

    #[test]
    fn test_enumeration_stops_at_first_gap() {
        let root = tempfile::tempdir().unwrap();
        card(root.path(), 0, "0");
        card(root.path(), 2, "1");

        let groups = TopologyScanner::new(root.path()).build_topology().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].device_ids, BTreeSet::from([0]));
    }

    #[test]
    fn test_no_devices_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        iface(root.path(), "eth0", Some("0"));
        assert!(matches!(
            TopologyScanner::new(root.path()).build_topology(),
            Err(TopologyError::NoDevices(_))
        ));
    }

    #[test]
    fn test_parse_meminfo_total() {
        assert_eq!(parse_meminfo_total("Node 0 MemTotal: 4 kB\n"), Some(4096));
        assert_eq!(parse_meminfo_total("Node 0 MemFree: 4 kB\n"), None);
        assert_eq!(parse_meminfo_total("Node 0 MemTotal: x kB\n"), None);
    }

    #[test]
    fn test_ensure_disjoint() {
        let a = BTreeSet::from([0u32, 1]);
        let b = BTreeSet::from([2u32]);
        let c = BTreeSet::from([1u32, 3]);
        assert!(ensure_disjoint([(0, &a), (1, &b)]).is_ok());
        assert!(matches!(
            ensure_disjoint([(0, &a), (1, &b), (2, &c)]),
            Err(TopologyError::Overlap { first: 0, second: 2, .. })
        ));
    }

    #[test]
    fn test_descriptor_files() {
        let root = two_socket_host();
        let groups = TopologyScanner::new(root.path()).build_topology().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_descriptors(out.path(), &groups).unwrap();

        let read = |name: &str| fs::read_to_string(out.path().join(name)).unwrap();
        assert_eq!(read("numa0_gpus.txt"), "0,1");
        assert_eq!(read("numa1_gpus.txt"), "2,3");
        assert_eq!(read("numa0_iface.txt"), "eth0");
        assert_eq!(read("numa0_mem_gb.txt"), "64.00");
        assert_eq!(read("numa1_mem_gb.txt"), "128.00");

        let loaded = load_descriptors(out.path()).unwrap();
        assert_eq!(loaded, groups);
    }

    #[test]
    fn test_load_descriptors_interface_lists() {
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), "numa0_gpus.txt", "0,1");
        put(dir.path(), "numa0_iface.txt", "eth0,eth1");
        put(dir.path(), "numa1_gpus.txt", "2");
        put(dir.path(), "numa1_iface.txt", "ib0\nib1\n");

        let groups = load_descriptors(dir.path()).unwrap();
        let names = |g: &NumaGroup| g.interface_names.iter().cloned().collect::<Vec<_>>();
        assert_eq!(names(&groups[0]), ["eth0", "eth1"]);
        assert_eq!(names(&groups[1]), ["ib0", "ib1"]);
    }

    #[test]
    fn test_load_descriptors_rejects_bad_ids() {
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), "numa0_gpus.txt", "0,x");
        assert!(matches!(
            load_descriptors(dir.path()),
            Err(TopologyError::Descriptor { .. })
        ));
    }

    #[test]
    fn test_resolve_bound_uuids() {
        let mut group = NumaGroup::new(1);
        group.device_ids = BTreeSet::from([1, 7]);
        let inventory = vec![
            DeviceInfo {
                index: 0,
                uuid: "GPU-a".to_string(),
                ..Default::default()
            },
            DeviceInfo {
                index: 1,
                uuid: "GPU-b".to_string(),
                ..Default::default()
            },
        ];
        assert_eq!(
            resolve_bound_uuids(&group, &inventory),
            BTreeSet::from(["GPU-b".to_string()])
        );
    }
}
