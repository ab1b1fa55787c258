use std::path::Path;

/// Name prefixes of interfaces that never carry physical link traffic.
pub const VIRTUAL_INTERFACE_PREFIXES: [&str; 7] =
    ["lo", "docker", "br", "veth", "dummy", "ip6tnl", "virbr"];

pub fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Non-virtual interfaces under `<sysfs_root>/class/net`, sorted by name.
/// An unreadable directory yields an empty list.
pub fn physical_interfaces(sysfs_root: &Path) -> Vec<String> {
    let dir = sysfs_root.join("class").join("net");
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(error=%e, path=%dir.display(), "cannot list network interfaces");
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !is_virtual_interface(name))
        .collect();
    names.sort();
    names
}

/// Interface name assumed when detection finds nothing.
pub fn fallback_interface() -> &'static str {
    if cfg!(target_arch = "powerpc64") {
        "ens1f0"
    } else {
        "eth0"
    }
}
