//! Link-Reversal Mesh Command-Line Interface
//!
//! This CLI provides tools for:
//! - Simulating mesh networks on a deterministic virtual medium
//! - Running nodes as concurrent tasks in real time
//! - Encoding and decoding link and network frames
//! - Showing protocol defaults

mod live;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lrmesh_core::mesh::simulation::{MeshSimulator, Placement, SimConfig};
use lrmesh_core::mesh::{
    AppEvent, LinkFrame, LinkFrameType, NetworkFrame, NetworkFrameType, NicAddr, NodeConfig,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "lrmesh")]
#[command(author, version, about = "Link-reversal mesh protocol CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Node configuration file (JSON); missing fields take defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a mesh network on a virtual radio medium
    Simulate {
        /// Number of nodes to simulate
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Node layout (line, grid, random)
        #[arg(long, default_value = "line")]
        placement: String,

        /// Distance between adjacent nodes in meters
        #[arg(long, default_value = "100.0")]
        spacing: f64,

        /// Radio range in meters
        #[arg(long, default_value = "150.0")]
        range: f64,

        /// Per-receiver frame loss probability (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        loss: f64,

        /// Simulation steps (1 ms each)
        #[arg(long, default_value = "5000")]
        steps: u64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Messages from the first node to the last
        #[arg(short, long, default_value = "3")]
        messages: usize,

        /// Random traffic: chance per node per step of sending a message
        #[arg(long, default_value = "0.0")]
        rate: f64,

        /// Kill this node halfway through the run
        #[arg(long)]
        kill: Option<usize>,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run every node as a concurrent task in real time
    Live {
        /// Number of nodes
        #[arg(short, long, default_value = "4")]
        nodes: usize,

        /// How many line positions a transmission reaches
        #[arg(long, default_value = "1")]
        range: usize,

        /// Run time in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Messages from the first node to the last
        #[arg(short, long, default_value = "3")]
        messages: usize,

        /// Milliseconds between messages
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },

    /// Encode a link frame, optionally carrying a network frame
    EncodeLink {
        /// Source address (xx:xx:xx:xx:xx:xx or node number)
        #[arg(long)]
        source: String,

        /// Destination address, node number, or "broadcast"
        #[arg(long, default_value = "broadcast")]
        dest: String,

        /// Link sequence number
        #[arg(long, default_value = "0")]
        seq: u32,

        /// Frame type (CONTENT, ACK, SOUND_OFF, ONE_TWO, FULL_REVERSAL, PRESENT, PULSE)
        #[arg(short = 't', long = "type", default_value = "CONTENT")]
        frame_type: String,

        /// Frame body
        #[arg(short, long, default_value = "")]
        body: String,

        /// Wrap the body in a network CONTENT frame addressed to this node
        #[arg(long)]
        network_dest: Option<String>,

        /// Hop limit for the wrapped network frame
        #[arg(long, default_value = "16")]
        hops: u8,
    },

    /// Decode a link frame (and the network frame inside CONTENT)
    Decode {
        /// Wire text of the link frame
        frame: String,
    },

    /// Show protocol defaults and frame formats
    Info,
}

fn parse_placement(placement: &str) -> Result<Placement> {
    match placement.to_lowercase().as_str() {
        "line" => Ok(Placement::Line),
        "grid" => Ok(Placement::Grid),
        "random" => Ok(Placement::Random),
        _ => anyhow::bail!("Unknown placement: {}. Use line, grid, or random", placement),
    }
}

/// Accept a full address, a node number, or "broadcast"
fn parse_addr(text: &str) -> Result<NicAddr> {
    if text.eq_ignore_ascii_case("broadcast") {
        return Ok(NicAddr::BROADCAST);
    }
    if let Ok(index) = text.parse::<u32>() {
        return Ok(NicAddr::from_index(index));
    }
    text.parse()
        .with_context(|| format!("Invalid address: {}", text))
}

fn load_node_config(path: Option<&PathBuf>) -> Result<NodeConfig> {
    let Some(path) = path else {
        return Ok(NodeConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: NodeConfig = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config.validate().context("Invalid node configuration")?;
    info!("Loaded node configuration from {}", path.display());
    Ok(config)
}

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    node_config: NodeConfig,
    nodes: usize,
    placement: String,
    spacing: f64,
    range: f64,
    loss: f64,
    steps: u64,
    seed: u64,
    messages: usize,
    rate: f64,
    kill: Option<usize>,
    json: bool,
) -> Result<()> {
    anyhow::ensure!(nodes >= 2, "Need at least two nodes");
    anyhow::ensure!((0.0..=1.0).contains(&loss), "Loss must be between 0.0 and 1.0");

    let config = SimConfig::default()
        .with_node_count(nodes)
        .with_placement(parse_placement(&placement)?)
        .with_spacing(spacing)
        .with_radio_range(range)
        .with_loss(loss)
        .with_seed(seed)
        .with_message_rate(rate)
        .with_node_config(node_config);
    let mut sim = MeshSimulator::new(config).context("Failed to create simulator")?;

    if !json {
        println!("=== Link-Reversal Mesh Simulation ===");
        println!();
        println!("Nodes:     {} ({})", nodes, placement);
        println!("Spacing:   {:.0} m", spacing);
        println!("Range:     {:.0} m", range);
        println!("Loss:      {:.1}%", loss * 100.0);
        println!("Steps:     {}", steps);
        println!("Seed:      {}", seed);
        println!("Connected: {}", sim.is_connected());
        println!();
    }

    // Spread the scripted messages over the first half of the run
    let last = nodes - 1;
    let gap = if messages > 0 { (steps / 2 / messages as u64).max(1) } else { steps };
    let mut sent = 0;
    for step in 0..steps {
        if sent < messages && step == sent as u64 * gap {
            let text = format!("Message {}", sent);
            if sim.send_message(0, &text, Some(last)).is_none() {
                println!("Node 0 refused '{}'", text);
            }
            sent += 1;
        }
        if step == steps / 2 {
            if let Some(idx) = kill {
                if sim.kill(idx) && !json {
                    println!("[{:>6}] node {} killed", step, idx);
                }
            }
        }
        sim.step();
    }

    if json {
        let report = serde_json::json!({
            "sim": sim.stats(),
            "total": sim.aggregate_stats(),
            "nodes": (0..sim.node_count()).filter_map(|i| sim.node_stats(i)).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Application events:");
    for idx in 0..sim.node_count() {
        for event in sim.app_events(idx) {
            println!("  node {:2}: {}", idx, describe_event(event));
        }
    }

    sim.print_summary();
    Ok(())
}

fn describe_event(event: &AppEvent) -> String {
    match event {
        AppEvent::Delivered { source, seq, payload } => {
            format!("delivered seq {} from {}: '{}'", seq, source, payload)
        }
        AppEvent::Nacked { destination, seq } => format!("NACK for seq {} to {}", seq, destination),
        AppEvent::TimedOut { destination, seq } => {
            format!("timeout for seq {} to {}", seq, destination)
        }
        AppEvent::Unroutable { destination, seq } => {
            format!("no route for seq {} to {}", seq, destination)
        }
    }
}

fn cmd_live(
    node_config: NodeConfig,
    nodes: usize,
    range: usize,
    seconds: u64,
    messages: usize,
    interval_ms: u64,
) -> Result<()> {
    println!("=== Live Mesh ===");
    println!();
    println!("Nodes:    {} (range {})", nodes, range);
    println!("Duration: {} s", seconds);
    println!("Messages: {}", messages);
    println!();

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(false));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping nodes...");
        r.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let config = live::LiveConfig {
        nodes,
        range,
        duration: Duration::from_secs(seconds),
        messages,
        message_interval: Duration::from_millis(interval_ms),
        node: node_config,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let report = runtime.block_on(live::run(config, running))?;

    println!("Application events:");
    for e in &report.events {
        println!(
            "  {:>8.3}s node {:2}: {}",
            e.at.as_secs_f64(),
            e.node_idx,
            describe_event(&e.event)
        );
    }
    println!();

    println!("Per-Node Statistics:");
    println!("{:<6} {:<8} {:<8} {:<8} {:<8} {:<8}", "Node", "TX", "RX", "Fwd", "Nbrs", "Routes");
    println!("{}", "-".repeat(50));
    for (idx, stats) in report.stats.iter().enumerate() {
        println!(
            "{:<6} {:<8} {:<8} {:<8} {:<8} {:<8}",
            idx,
            stats.frames_tx,
            stats.frames_rx,
            stats.forwarded,
            stats.neighbor_count,
            stats.route_count
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_encode_link(
    source: String,
    dest: String,
    seq: u32,
    frame_type: String,
    body: String,
    network_dest: Option<String>,
    hops: u8,
    max_frame_size: usize,
) -> Result<()> {
    let source = parse_addr(&source)?;
    let dest = parse_addr(&dest)?;
    let frame_type: LinkFrameType = frame_type.to_uppercase().parse()?;

    let body = match network_dest {
        Some(network_dest) => {
            let inner = NetworkFrame::new(
                source,
                seq,
                parse_addr(&network_dest)?,
                NetworkFrameType::Content,
                hops,
                body,
            );
            inner.to_wire()
        }
        None => body,
    };

    let frame = LinkFrame::new(source, seq, dest, frame_type, body);
    let bytes = frame.encode(max_frame_size)?;
    println!("{}", frame.to_wire());
    info!("{} bytes", bytes.len());
    Ok(())
}

fn cmd_decode(text: String) -> Result<()> {
    let frame = LinkFrame::decode(text.as_bytes()).context("Not a valid link frame")?;

    println!("=== Link Frame ===");
    println!("Source:      {}", frame.source);
    println!("Sequence:    {}", frame.seq);
    println!("Destination: {}", frame.destination);
    println!("Type:        {}", frame.frame_type);
    println!("Body:        {:?}", frame.body);

    if frame.frame_type == LinkFrameType::Content {
        println!();
        match NetworkFrame::decode_str(&frame.body) {
            Ok(inner) => {
                println!("=== Network Frame ===");
                println!("Source:      {}", inner.source);
                println!("Sequence:    {}", inner.seq);
                println!("Destination: {}", inner.destination);
                println!("Type:        {}", inner.frame_type);
                println!("Hop limit:   {}", inner.hop_limit);
                println!("Body:        {:?}", inner.body);
            }
            Err(e) => println!("Body is not a network frame: {}", e),
        }
    }
    Ok(())
}

fn cmd_info(node_config: &NodeConfig) -> Result<()> {
    println!("=== Link-Reversal Mesh ===");
    println!();
    println!("Frame formats ('/'-delimited text, body may contain '/'):");
    println!("  link:    source/seq/destination/TYPE/body");
    println!("  network: source/seq/destination/TYPE/hop_limit/body");
    println!();
    println!("Link types:    CONTENT ACK SOUND_OFF ONE_TWO FULL_REVERSAL PRESENT PULSE");
    println!("Network types: CONTENT ACK NACK");
    println!("Broadcast:     {}", NicAddr::BROADCAST);
    println!();
    println!("Node configuration:");
    println!("{}", serde_json::to_string_pretty(node_config)?);
    println!();
    println!("Examples:");
    println!("  lrmesh simulate --nodes 6 --messages 5");
    println!("  lrmesh simulate --nodes 9 --placement grid --loss 0.1 --json");
    println!("  lrmesh simulate --nodes 3 --kill 1 -v");
    println!("  lrmesh live --nodes 4 --seconds 5");
    println!("  lrmesh encode-link --source 1 --dest 2 --body hi --network-dest 3");
    println!("  lrmesh decode '01:00:00:00:00:01/0/ff:ff:ff:ff:ff:ff/SOUND_OFF/'");

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let node_config = load_node_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Simulate {
            nodes,
            placement,
            spacing,
            range,
            loss,
            steps,
            seed,
            messages,
            rate,
            kill,
            json,
        } => cmd_simulate(
            node_config,
            nodes,
            placement,
            spacing,
            range,
            loss,
            steps,
            seed,
            messages,
            rate,
            kill,
            json,
        ),

        Commands::Live {
            nodes,
            range,
            seconds,
            messages,
            interval_ms,
        } => cmd_live(node_config, nodes, range, seconds, messages, interval_ms),

        Commands::EncodeLink {
            source,
            dest,
            seq,
            frame_type,
            body,
            network_dest,
            hops,
        } => {
            let max_frame_size = node_config.max_frame_size;
            cmd_encode_link(source, dest, seq, frame_type, body, network_dest, hops, max_frame_size)
        }

        Commands::Decode { frame } => cmd_decode(frame),

        Commands::Info => cmd_info(&node_config),
    }
}
