use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skeen_multicast::{
    multicast::{Delivery, ProcessId},
    network::{collect_deliveries, Cluster, Simulation},
    ClusterConfig, MulticastError, Result,
};

/// Runs a cluster of processes that multicast every configured message and
/// reports the order in which each process delivered them.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML cluster description. Defaults to a three-process demo.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the seeded single-threaded simulation instead of live nodes.
    #[arg(long)]
    simulate: bool,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Seconds to wait for each process's deliveries.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::default(),
    };
    config.validate()?;

    if args.simulate {
        simulate(&config, args.seed)
    } else {
        run_cluster(&config, Duration::from_secs(args.timeout)).await
    }
}

fn simulate(config: &ClusterConfig, seed: u64) -> Result<()> {
    let mut sim = Simulation::new(config, seed)?;
    sim.request_all()?;
    let steps = sim.run_to_quiescence(1_000_000)?;
    info!("Simulation with seed {} finished after {} steps", seed, steps);

    for (process, delivered) in sim.deliveries() {
        print_order(*process, delivered);
    }
    println!("total order:       {}", sim.total_order_holds());
    println!("all delivered:     {}", sim.all_delivered());
    println!("exactly once:      {}", sim.delivered_exactly_once());
    println!("monotonic clocks:  {}", sim.clocks_monotonic());
    println!("unique timestamps: {}", sim.timestamps_unique());
    Ok(())
}

async fn run_cluster(config: &ClusterConfig, timeout: Duration) -> Result<()> {
    let mut cluster = Cluster::start(config)?;

    // Listeners drain each stream while the requests are still going in.
    let mut listeners = Vec::new();
    for process in config.process_ids() {
        let expected = config.groups.iter().filter(|g| g.members.contains(&process)).count();
        let mut deliveries = cluster
            .take_deliveries(process)
            .ok_or(MulticastError::UnknownProcess(process))?;
        listeners.push((
            process,
            tokio::spawn(async move { collect_deliveries(&mut deliveries, process, expected, timeout).await }),
        ));
    }

    for group in &config.groups {
        let payload = format!("message {}", group.id);
        cluster.handle(group.sender)?.request_multicast(group.id, payload).await?;
    }

    let mut orders = Vec::new();
    for (process, listener) in listeners {
        let delivered = listener
            .await
            .map_err(|e| MulticastError::Transport(format!("listener for process {} failed: {}", process, e)))??;
        print_order(process, &delivered);
        orders.push(delivered);
    }
    cluster.shutdown().await?;

    let agreed = orders.iter().flatten().all(|d| {
        orders
            .iter()
            .flatten()
            .filter(|other| other.id == d.id)
            .all(|other| other.global_ts == d.global_ts)
    });
    println!("global timestamps agree: {}", agreed);
    Ok(())
}

fn print_order(process: ProcessId, delivered: &[Delivery]) {
    let order: Vec<String> = delivered
        .iter()
        .map(|d| format!("{}@{}", d.id, d.global_ts))
        .collect();
    println!("process {}: {}", process, order.join(" "));
}
