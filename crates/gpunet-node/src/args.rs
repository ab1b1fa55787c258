use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gpunet-node", about = "NUMA-partitioned accelerator service fronts")]
pub struct Args {
    /// Port of the first front; front N listens on base_port + N.
    #[arg(long, env = "GPUNET_BASE_PORT", default_value_t = 50051)]
    pub base_port: u16,

    #[arg(long, env = "GPUNET_BIND_HOST", default_value = "0.0.0.0")]
    pub bind_host: String,

    #[arg(long, env = "GPUNET_SYSFS_ROOT", default_value = "/sys")]
    pub sysfs_root: String,

    /// Directory for numa<N>_*.txt descriptors. Written after a sysfs scan.
    #[arg(long, env = "GPUNET_TOPOLOGY_DIR")]
    pub topology_dir: Option<String>,

    /// Read the topology from --topology-dir instead of scanning sysfs.
    #[arg(long, env = "GPUNET_FROM_DESCRIPTORS", default_value_t = false)]
    pub from_descriptors: bool,

    /// Lease ttl used when an acquire names none.
    #[arg(
        long,
        env = "GPUNET_LEASE_TTL_MS",
        default_value_t = 60_000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub lease_ttl_ms: u64,

    #[arg(long, env = "GPUNET_QUERY_TIMEOUT_MS", default_value_t = 3_000)]
    pub query_timeout_ms: u64,

    #[arg(long, env = "GPUNET_EXEC_TIMEOUT_MS", default_value_t = 5_000)]
    pub exec_timeout_ms: u64,

    /// Measure local link speed and advertise it to peers.
    #[arg(long, env = "GPUNET_ENABLE_NETBALANCE", default_value_t = false)]
    pub enable_netbalance: bool,

    /// Interface to probe. Defaults to the first physical interface.
    #[arg(long, env = "GPUNET_PROBE_INTERFACE")]
    pub probe_interface: Option<String>,

    #[arg(long, env = "GPUNET_PROBE_INTERVAL_SECS", default_value_t = 10)]
    pub probe_interval_secs: u64,

    /// Peer front addresses (host:port) that receive heartbeats.
    #[arg(long = "peer", env = "GPUNET_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Address this host is known by in peers' registries.
    #[arg(long, env = "GPUNET_ADVERTISE_ADDR", default_value = "127.0.0.1")]
    pub advertise_addr: String,

    #[arg(long, env = "GPUNET_HEARTBEAT_INTERVAL_MS", default_value_t = 3_000)]
    pub heartbeat_interval_ms: u64,

    /// OTLP collector endpoint for trace export. Disabled when unset.
    #[arg(long, env = "GPUNET_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "GPUNET_OTLP_TOKEN")]
    pub otlp_token: Option<String>,

    /// `text` or `json`.
    #[arg(long, env = "GPUNET_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}
