mod args;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures_util::future::try_join_all;

use gpunet_node::device::{DeviceQuery, NvidiaSmi};
use gpunet_node::exec::ShellRunner;
use gpunet_node::handlers::routes;
use gpunet_node::heartbeat::{bandwidth_loop, heartbeat_loop};
use gpunet_node::metrics::Metrics;
use gpunet_node::topology::{
    ensure_disjoint, load_descriptors, resolve_bound_uuids, write_descriptors, TopologyScanner,
};
use gpunet_node::{AppState, FrontContext, ServiceFront};
use gpunet_peers::bandwidth::BandwidthProbe;
use gpunet_peers::{PeerRecord, PeerRegistry};
use gpunet_scheduler::LeaseScheduler;

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _otel_guard = gpunet_common::telemetry::init_tracing(
        "gpunet-node",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
        &args.log_format,
    );
    tracing::info!(base_port = args.base_port, "gpunet-node starting...");

    let sysfs_root = PathBuf::from(&args.sysfs_root);
    let groups = if args.from_descriptors {
        let dir = args
            .topology_dir
            .as_deref()
            .context("--from-descriptors requires --topology-dir")?;
        load_descriptors(Path::new(dir))?
    } else {
        let groups = TopologyScanner::new(&sysfs_root)
            .build_topology()
            .inspect_err(|e| tracing::error!(error=%e, "topology discovery failed"))?;
        if let Some(dir) = args.topology_dir.as_deref() {
            if let Err(e) = write_descriptors(Path::new(dir), &groups) {
                tracing::warn!(error=%e, "failed to persist topology descriptors");
            }
        }
        groups
    };
    ensure_disjoint(groups.iter().map(|g| (g.node_id, &g.device_ids)))?;

    let devices: Arc<dyn DeviceQuery> =
        Arc::new(NvidiaSmi::new(Duration::from_millis(args.query_timeout_ms)));
    let inventory = match devices.list_devices().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error=%e, "device inventory unavailable, fronts start with no bound devices");
            Vec::new()
        }
    };

    let ctx = FrontContext {
        scheduler: LeaseScheduler::new(),
        devices: devices.clone(),
        runner: Arc::new(ShellRunner::new(Duration::from_millis(args.exec_timeout_ms))),
        default_ttl: Duration::from_millis(args.lease_ttl_ms),
    };

    let registry = PeerRegistry::new();
    let local = Arc::new(PeerRecord::new(args.advertise_addr.clone(), 0));
    let metrics = Arc::new(Metrics::default());

    if args.enable_netbalance {
        let probe = BandwidthProbe::new(args.probe_interface.clone(), None, &sysfs_root);
        tracing::info!(interface=%probe.interface(), "bandwidth probing enabled");
        tokio::spawn(bandwidth_loop(
            probe,
            local.clone(),
            Duration::from_secs(args.probe_interval_secs),
        ));
    }

    if args.peers.is_empty() {
        tracing::info!("no peers configured, heartbeats disabled");
    } else {
        tokio::spawn(heartbeat_loop(
            local.clone(),
            devices.clone(),
            args.peers.clone(),
            Duration::from_millis(args.heartbeat_interval_ms),
        ));
    }

    let mut fronts = Vec::with_capacity(groups.len());
    let mut bound_sets: Vec<(u32, BTreeSet<String>)> = Vec::with_capacity(groups.len());
    for (ordinal, group) in groups.iter().enumerate() {
        let port = u16::try_from(ordinal)
            .ok()
            .and_then(|o| args.base_port.checked_add(o))
            .with_context(|| format!("no port left for NUMA node {}", group.node_id))?;
        let bound = resolve_bound_uuids(group, &inventory);
        bound_sets.push((group.node_id, bound.clone()));
        fronts.push(ServiceFront::new(group.node_id, port, bound, ctx.clone()));
    }
    ensure_disjoint(bound_sets.iter().map(|(node, set)| (*node, set)))?;

    let servers = fronts.into_iter().map(|front| {
        let st = AppState {
            front: Arc::new(front),
            registry: registry.clone(),
            local: local.clone(),
            metrics: metrics.clone(),
        };
        serve_front(args.bind_host.clone(), st)
    });
    try_join_all(servers).await?;
    Ok(())
}

async fn serve_front(host: String, st: AppState) -> anyhow::Result<()> {
    let node = st.front.node_id();
    let addr = format!("{host}:{}", st.front.port());
    let listener = tokio::net::TcpListener::bind(addr.as_str())
        .await
        .with_context(|| format!("failed to bind front for NUMA node {node} on {addr}"))?;
    tracing::info!(
        node,
        addr=%addr,
        devices = ?st.front.bound(),
        "service front listening"
    );
    axum::serve(listener, routes(st)).await?;
    Ok(())
}
