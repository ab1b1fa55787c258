use gpunet_common::{Ack, CommandOutput, DeviceInfo, DeviceStatus, PeerSnapshot};

pub fn print_devices(target: &str, devices: &[DeviceInfo]) {
    println!("\n=== Devices on {target} ===");
    if devices.is_empty() {
        println!("  (No devices bound to this front)");
        return;
    }
    println!("  {:<6} {:<42} {:<28} {:>10}", "Index", "UUID", "Name", "Memory");
    for d in devices {
        println!(
            "  {:<6} {:<42} {:<28} {:>7} MB",
            d.index, d.uuid, d.name, d.memory_total_mb
        );
    }
    println!();
}

pub fn print_status(status: &DeviceStatus) {
    println!("{}", status.uuid);
    println!("  memory used: {} MB", status.used_memory_mb);
    println!("  utilization: {}%", status.utilization);
}

pub fn print_ack(action: &str, ack: &Ack) {
    if ack.ok {
        println!("✓ {action}: {}", ack.msg);
    } else {
        eprintln!("✗ {action} rejected: {}", ack.msg);
    }
}

pub fn print_output(out: &CommandOutput) {
    print!("{}", out.output);
    if !out.output.is_empty() && !out.output.ends_with('\n') {
        println!();
    }
    if out.exit_status != 0 {
        eprintln!("(exit status {})", out.exit_status);
    }
}

pub fn print_targets(targets: &[String]) {
    for (rank, t) in targets.iter().enumerate() {
        println!("  {:>2}. {t}", rank + 1);
    }
}

pub fn print_peers(peers: &[PeerSnapshot]) {
    println!("\n=== Known Peers ===");
    if peers.is_empty() {
        println!("  (No peers known)");
        return;
    }
    println!("  {:<24} {:<8}", "Address", "Devices");
    for p in peers {
        println!("  {:<24} {:<8}", p.address, p.devices.len());
        for d in &p.devices {
            println!(
                "      {:<42} util {:>3}%  mem {:>7} MB",
                d.id, d.utilization_pct, d.memory_used_mb
            );
        }
    }
    println!();
}
