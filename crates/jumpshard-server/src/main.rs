//! Jumpshard Server - Ownerless Event Ownership Scheduler

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use jumpshard_core::ResourceId;
use jumpshard_server::bus::{BusMessage, EventBus, VerificationEvent};
use jumpshard_server::config::{parse_members, DispatchIsolation, SchedulerConfig};
use jumpshard_server::dispatch::{work_fn, Work};
use jumpshard_server::membership::{NodeId, SharedMembership, StaticMembership};
use jumpshard_server::node::{start_node, NodeHandle};
use jumpshard_server::observability::{init_metrics, init_tracing, TracingConfig};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Upper bound on waiting for simulated nodes to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "jumpshard-server")]
#[command(about = "Per-node ownership scheduling over jump consistent hashing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one node, publishing newline-delimited JSON events read from stdin
    Run {
        /// Identifier of this node
        #[arg(long, env = "NODE_ID")]
        node_id: Option<String>,
        /// Cluster members (comma-separated), including this node
        #[arg(long, env = "CLUSTER_MEMBERS")]
        members: Option<String>,
        /// Simulated verification time per owned event, in milliseconds
        #[arg(long, default_value_t = 50)]
        work_ms: u64,
        /// Print Prometheus metrics on exit
        #[arg(long)]
        metrics: bool,
        /// How long to wait at end of input for outstanding events and work, in seconds
        #[arg(long, default_value_t = 30)]
        drain_timeout_secs: u64,
    },
    /// Run several nodes in one process and report how events were partitioned
    Simulate {
        /// Number of nodes
        #[arg(long, default_value_t = 3)]
        nodes: usize,
        /// Number of events to publish
        #[arg(long, default_value_t = 1000)]
        events: usize,
        /// Add one node after this many events and signal the membership change
        #[arg(long)]
        grow_at: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(TracingConfig::from_env()).map_err(|e| anyhow::anyhow!(e))?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            node_id,
            members,
            work_ms,
            metrics,
            drain_timeout_secs,
        } => {
            run(
                node_id,
                members,
                work_ms,
                metrics,
                Duration::from_secs(drain_timeout_secs),
            )
            .await
        }
        Commands::Simulate {
            nodes,
            events,
            grow_at,
        } => simulate(nodes, events, grow_at).await,
    }
}

/// Work callback standing in for real verification.
fn verification_work(node_id: NodeId, duration: Duration) -> Work {
    work_fn(move |resource: ResourceId| {
        let node_id = node_id.clone();
        async move {
            info!(node_id = %node_id, resource_id = %resource, "Verifying resource");
            tokio::time::sleep(duration).await;
            anyhow::Ok(())
        }
    })
}

/// Parse one stdin line into a bus payload.
///
/// Accepts a full event object, or a bare JSON integer or string taken as
/// the resource identifier. Anything else is published as-is and ignored by
/// the scheduler.
fn line_payload(line: &str) -> serde_json::Value {
    let value = serde_json::from_str::<serde_json::Value>(line)
        .unwrap_or_else(|_| serde_json::Value::String(line.to_string()));

    match serde_json::from_value::<ResourceId>(value.clone()) {
        Ok(resource_id) => {
            serde_json::to_value(VerificationEvent::new(resource_id)).unwrap_or(value)
        }
        Err(_) => value,
    }
}

async fn run(
    node_id: Option<String>,
    members: Option<String>,
    work_ms: u64,
    print_metrics: bool,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    let mut config = SchedulerConfig::from_env();
    if let Some(node_id) = node_id {
        config.node_id = NodeId::new(node_id);
    }
    if let Some(members) = members {
        config.cluster_members = parse_members(&members);
    }

    let metrics = if print_metrics {
        Some(init_metrics().map_err(|e| anyhow::anyhow!(e))?)
    } else {
        None
    };

    info!(
        node_id = %config.node_id,
        members = ?config.cluster_members,
        "Starting jumpshard node"
    );

    let bus = EventBus::new(config.bus_capacity);
    let source = StaticMembership::new(config.cluster_members.clone());
    let work = verification_work(config.node_id.clone(), Duration::from_millis(work_ms));
    let node = start_node(&config, source, work, &bus);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut published = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("reading stdin")? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        bus.publish(BusMessage::new(config.topic.clone(), line_payload(line.trim())));
                        published += 1;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, draining");
                break;
            }
        }
    }

    let stats = node.drain(published, drain_timeout).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Some(metrics) = metrics {
        println!("{}", metrics.prometheus_handle.render());
    }

    node.shutdown().await;
    Ok(())
}

async fn simulate(nodes: usize, events: usize, grow_at: Option<usize>) -> anyhow::Result<()> {
    anyhow::ensure!(nodes > 0, "--nodes must be at least 1");

    let topic = SchedulerConfig::default().topic;
    let bus = EventBus::new(events.max(1) + 16);
    let membership = SharedMembership::new(Vec::new());

    let mut handles = Vec::with_capacity(nodes + 1);
    for i in 0..nodes {
        handles.push(spawn_sim_node(i, &membership, &bus).await);
    }

    for i in 0..events {
        if grow_at == Some(i) {
            let handle = spawn_sim_node(handles.len(), &membership, &bus).await;
            for existing in &handles {
                existing.membership_changed().await?;
            }
            info!(node_id = %handle.node_id, after_events = i, "Node joined cluster");
            handles.push(handle);
        }

        let event = VerificationEvent::new(format!("resource-{i}"));
        bus.publish(BusMessage::verification(topic.clone(), &event));
    }

    let mut report = Vec::with_capacity(handles.len());
    for (i, handle) in handles.iter().enumerate() {
        // A node that joined late only saw the events published after it subscribed
        let expected = match grow_at {
            Some(at) if i == nodes => events.saturating_sub(at),
            _ => events,
        };
        report.push(handle.drain(expected as u64, DRAIN_TIMEOUT).await?);
    }

    let owned: u64 = report.iter().map(|s| s.owned).sum();
    if owned != events as u64 {
        warn!(owned = owned, events = events, "Events were not owned exactly once");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    for handle in handles {
        handle.shutdown().await;
    }
    Ok(())
}

async fn spawn_sim_node(
    index: usize,
    membership: &SharedMembership,
    bus: &EventBus,
) -> NodeHandle<SharedMembership> {
    let config = SchedulerConfig {
        node_id: NodeId::new(format!("node-{index:03}")),
        dispatch_isolation: DispatchIsolation::Enabled,
        ..SchedulerConfig::default()
    };
    membership.join(config.node_id.clone()).await;

    let work = work_fn(|_| async { anyhow::Ok(()) });
    start_node(&config, membership.clone(), work, bus)
}
