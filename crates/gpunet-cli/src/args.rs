use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "gpunet")]
#[command(about = "Client for gpunet service fronts", long_about = None)]
pub struct Args {
    /// Front to dial directly (host:port). Skips peer ranking.
    #[arg(long, env = "GPUNET_SERVER")]
    pub server: Option<String>,

    /// Node asked for the ranked target list when --server is not given.
    #[arg(long, env = "GPUNET_SEED", default_value = "127.0.0.1:50051")]
    pub seed: String,

    /// Front port dialed on ranked peers.
    #[arg(long, env = "GPUNET_PORT", default_value_t = 50051)]
    pub port: u16,

    /// Per-request deadline, also sent to the front as x-deadline-ms.
    #[arg(long, env = "GPUNET_TIMEOUT_MS", default_value_t = 10_000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List devices bound to the front
    List,
    /// Show memory and utilization of one device
    Status { uuid: String },
    /// Lease a device
    Acquire {
        uuid: String,
        /// Lease ttl; the front's default applies when omitted
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
    /// Give a lease back
    Release { uuid: String },
    /// Run a shell command pinned to a device
    Run {
        uuid: String,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Print the ranked dial targets the client would use
    Targets,
    /// Show peers known to the seed node
    Peers,
}
