//! `keeperd`: the Keeper master core daemon.
//!
//! Binary entrypoint that wires the liveness tracker, the integrity sweeper,
//! and the carry scheduler together around an in-memory cluster.
//!
//! # Usage
//!
//! ```text
//! keeperd config                         # print the effective configuration
//! keeperd -c keeper.toml config          # same, from a config file
//! keeperd simulate                       # run the built-in simulation
//! keeperd simulate -n 12 -r 5000 --seed 7
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use keeper_cluster::{ClusterState, LivenessTracker, MetaNodeView};
use keeper_repair::{ConsistencyChecker, DataPartition, IntegritySweeper, PartitionTable};
use keeper_types::events::{EventBus, IntegrityWarning, NodeInactive};
use keeper_types::{MetaNodeHeartbeat, MetaPartitionReport, PartitionId, ReplicaFileMeta, unix_now};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use config::CliConfig;

const GIB: u64 = 1 << 30;

/// How long to wait for the background loops to report.
const LOOP_WAIT: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "keeperd",
    version,
    about = "Keeper cluster master: replica integrity and write placement"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the cluster identifier.
    #[arg(long, global = true, env = "KEEPER_CLUSTER_ID")]
    cluster_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML.
    Config,

    /// Drive an in-memory master with synthetic nodes and partitions.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
struct SimulateArgs {
    /// Number of healthy meta nodes.
    #[arg(short = 'n', long, default_value = "8")]
    nodes: usize,

    /// Number of placement rounds.
    #[arg(short, long, default_value = "1000")]
    rounds: usize,

    /// Hosts selected per placement round, and replicas per data partition.
    #[arg(long, default_value = "3")]
    replicas: usize,

    /// Number of data partitions to check.
    #[arg(short, long, default_value = "16")]
    partitions: u64,

    /// Extent files per data partition.
    #[arg(long, default_value = "8")]
    files: u64,

    /// Seed for node capacities and checksums.
    #[arg(long, default_value = "42")]
    seed: u64,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    // CLI args override config file values.
    if let Some(id) = cli.cluster_id {
        config.cluster.id = id;
    }

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Simulate(args) => {
            let report = run_simulation(&config, &args).await?;
            print_report(&report);
            Ok(())
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// keeperd simulate
// -----------------------------------------------------------------------

/// Outcome of one simulation run.
#[derive(Debug)]
struct SimulationReport {
    /// Final state of every meta node, ordered by address.
    nodes: Vec<MetaNodeView>,
    /// Placement rounds that produced a full host set.
    rounds: usize,
    /// Nodes demoted by the liveness loop.
    demoted: Vec<String>,
    /// Warnings published by the integrity loop.
    warnings: Vec<IntegrityWarning>,
}

/// Address of the `i`-th synthetic meta node.
fn node_addr(i: usize) -> String {
    format!("10.0.0.{}:9021", i + 1)
}

async fn run_simulation(config: &CliConfig, args: &SimulateArgs) -> Result<SimulationReport> {
    let master = config.master_config();
    let cluster_id = config.cluster.id.clone();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let now = unix_now();

    let events = EventBus::new();
    let mut inactive_rx = events.subscribe::<NodeInactive>();
    let mut warning_rx = events.subscribe::<IntegrityWarning>();

    // --- Meta nodes ---
    let cluster = ClusterState::new(cluster_id.clone(), &master, events.clone());
    let tracker = Arc::new(LivenessTracker::new(
        cluster.clone(),
        master.liveness,
        master.capacity.node_threshold,
    ));

    for i in 0..args.nodes {
        let addr = node_addr(i);
        cluster.register_meta_node(addr.clone())?;

        let total = rng.random_range(16..=128u64) * GIB;
        let used = (total as f64 * rng.random_range(0.05..0.5)) as u64;
        let partitions = (0..rng.random_range(0..20u64))
            .map(|p| MetaPartitionReport {
                partition_id: PartitionId::new(p),
                is_leader: rng.random_bool(0.3),
            })
            .collect();
        let report = MetaNodeHeartbeat {
            total,
            used,
            rack_name: format!("rack-{}", i % 3),
            partitions,
        };
        tracker.ingest_heartbeat_at(&addr, &report, now)?;
    }

    // One node whose last heartbeat is well past the timeout.
    let silent = node_addr(args.nodes);
    cluster.register_meta_node(silent.clone())?;
    let silent_report = MetaNodeHeartbeat {
        total: 64 * GIB,
        used: GIB,
        rack_name: "rack-silent".to_string(),
        partitions: Vec::new(),
    };
    tracker.ingest_heartbeat_at(
        &silent,
        &silent_report,
        now.saturating_sub(master.liveness.node_timeout_secs + 60),
    )?;

    // --- Data partitions ---
    let table = Arc::new(PartitionTable::new());
    let stable = now.saturating_sub(master.checker.file_delay_check_crc_secs + 60);
    let replicas = args.replicas.min(args.nodes);

    for p in 0..args.partitions {
        let hosts: Vec<String> = (0..replicas)
            .map(|r| node_addr((p as usize + r) % args.nodes.max(1)))
            .collect();
        let partition =
            table.insert(DataPartition::new(PartitionId::new(p + 1), "sim", replicas, hosts.clone()))?;
        for host in &hosts {
            partition.record_replica_report(host, now);
        }
        for f in 0..args.files {
            let name = (1_000 + f).to_string();
            let size = rng.random_range(1..=64u64) * 4_096;
            let crc: u32 = rng.random();
            for host in &hosts {
                partition.record_file_meta(&name, ReplicaFileMeta::new(host.clone(), size, crc), stable);
            }
        }
    }

    // Corrupt the last replica of the first file of the first partition.
    let mut injected = false;
    if let Ok(partition) = table.get(PartitionId::new(1))
        && let Some(host) = partition.hosts().last()
        && let Some(file) = partition.file("1000")
        && let Some(meta) = file.meta_by_addr(host)
    {
        warn!(%host, file = %file.name, "injecting corrupt replica");
        let corrupt = ReplicaFileMeta::new(host.clone(), meta.size, !meta.crc);
        partition.record_file_meta(&file.name, corrupt, stable);
        injected = true;
    }

    // --- Background loops ---
    let liveness = tracker.clone().spawn();
    let checker = Arc::new(ConsistencyChecker::new(master.checker, events.clone()));
    let sweeper = Arc::new(IntegritySweeper::new(table.clone(), checker, cluster_id)).spawn();

    let mut demoted = Vec::new();
    if let Ok(Some(event)) = tokio::time::timeout(LOOP_WAIT, inactive_rx.recv()).await {
        demoted.push(event.addr);
    }
    let mut warnings = Vec::new();
    if injected
        && let Ok(Some(warning)) = tokio::time::timeout(LOOP_WAIT, warning_rx.recv()).await
    {
        warnings.push(warning);
    }

    liveness.stop().await;
    sweeper.stop().await;

    demoted.extend(inactive_rx.drain().into_iter().map(|e| e.addr));
    warnings.extend(warning_rx.drain());

    // --- Placement ---
    let mut rounds = 0;
    for _ in 0..args.rounds {
        cluster
            .select_meta_hosts(args.replicas, &[])
            .context("placement round failed")?;
        rounds += 1;
    }

    info!(
        rounds,
        demoted = demoted.len(),
        warnings = warnings.len(),
        "simulation complete"
    );

    Ok(SimulationReport {
        nodes: cluster.snapshot(),
        rounds,
        demoted,
        warnings,
    })
}

fn print_report(report: &SimulationReport) {
    println!("Keeper Simulation");
    println!("  placement rounds: {}", report.rounds);
    println!();

    let free_total: u64 = report
        .nodes
        .iter()
        .filter(|n| n.select_count > 0)
        .map(|n| n.max_available)
        .sum();
    let select_total: u64 = report.nodes.iter().map(|n| n.select_count).sum();

    println!(
        "  {:<16} {:>6} {:>8} {:>8} {:>10} {:>8} {:>8}",
        "node", "active", "total", "free", "selected", "share", "fair"
    );
    for node in &report.nodes {
        let share = ratio(node.select_count, select_total);
        let fair = if node.select_count > 0 {
            ratio(node.max_available, free_total)
        } else {
            0.0
        };
        println!(
            "  {:<16} {:>6} {:>7}G {:>7}G {:>10} {:>7.1}% {:>7.1}%",
            node.addr,
            node.is_active,
            node.total / GIB,
            node.max_available / GIB,
            node.select_count,
            share * 100.0,
            fair * 100.0,
        );
    }

    println!();
    println!("Demoted nodes: {}", report.demoted.len());
    for addr in &report.demoted {
        println!("  {addr}");
    }

    println!();
    println!("Integrity warnings: {}", report.warnings.len());
    for warning in &report.warnings {
        println!("  {warning}");
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
