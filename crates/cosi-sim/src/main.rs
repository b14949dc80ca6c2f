mod config;
mod events;
mod scenario;
mod sim;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use cosi_protocol::LocalCluster;

use config::SimConfig;
use events::{emit, EventStarted, EventSummary};
use sim::{RoundPlan, VotePlan};

#[derive(Parser)]
#[command(name = "cosi-sim", about = "Simulate CoSi collective signing over an in-process tree")]
struct Cli {
    /// JSON settings file (timeouts, buffer sizes).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tree as comma-separated parent:child edges. The first parent is root.
    #[arg(long, default_value = "root:A,A:B,A:C")]
    tree: String,

    /// Make a host skip a phase, as host:phase (repeatable).
    #[arg(long)]
    dead: Vec<String>,

    /// Make a host send a corrupted response (repeatable).
    #[arg(long)]
    corrupt: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run signing rounds from the root.
    Sign {
        /// Number of rounds.
        #[arg(long, default_value = "1")]
        rounds: u32,
        /// Start every round at once instead of one after another.
        #[arg(long)]
        concurrent: bool,
        /// Announcement payload.
        #[arg(long, default_value = "Hello World")]
        data: String,
    },

    /// Re-root the tree at a host, then sign from it.
    ViewChange {
        /// Host proposing itself as root.
        #[arg(long)]
        proposer: String,
        /// View number to propose.
        #[arg(long, default_value = "1")]
        view: u64,
        /// Rounds to run under the new root.
        #[arg(long, default_value = "1")]
        rounds: u32,
    },

    /// Vote a host in or out, then sign.
    Vote {
        /// Host to add, as name:parent. It joins as a leaf.
        #[arg(long)]
        add: Option<String>,
        /// Host to remove.
        #[arg(long)]
        remove: Option<String>,
        /// Hosts that vote against (repeatable).
        #[arg(long)]
        reject: Vec<String>,
        /// Rounds to run after the vote.
        #[arg(long, default_value = "1")]
        rounds: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    let settings = SimConfig::load(cli.config.as_deref())?;
    let edges = scenario::parse_edges(&cli.tree)?;
    let root = edges
        .first()
        .map(|(parent, _)| parent.clone())
        .ok_or_else(|| anyhow!("tree has no edges"))?;
    let edge_refs: Vec<(&str, &str)> = edges
        .iter()
        .map(|(p, c)| (p.as_str(), c.as_str()))
        .collect();
    let mut cluster = LocalCluster::build(
        &root,
        &edge_refs,
        settings.node_config(),
        settings.net_config(),
    )?;

    for (host, plan) in scenario::failure_plans(&cli.dead, &cli.corrupt)? {
        let node = cluster
            .node(&host)
            .ok_or_else(|| anyhow!("unknown host '{host}'"))?;
        tracing::info!("{host}: {plan:?}");
        node.set_failures(plan).await;
    }

    eprintln!("cosi-sim v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Tree: {} ({} hosts)", cli.tree, cluster.names().len());
    eprintln!();

    let hosts = cluster.names().iter().map(|n| n.to_string()).collect();
    let (mode, result) = match cli.command {
        Command::Sign {
            rounds,
            concurrent,
            data,
        } => {
            emit(&EventStarted::new("sign", &root, hosts));
            let plan = RoundPlan {
                rounds,
                concurrent,
                data: data.into_bytes(),
            };
            ("sign", sim::sign(&mut cluster, &plan, start).await?)
        }

        Command::ViewChange {
            proposer,
            view,
            rounds,
        } => {
            emit(&EventStarted::new("view-change", &root, hosts));
            let plan = RoundPlan {
                rounds,
                concurrent: false,
                data: b"after view change".to_vec(),
            };
            (
                "view-change",
                sim::view_change(&mut cluster, &proposer, view, &plan, start).await?,
            )
        }

        Command::Vote {
            add,
            remove,
            reject,
            rounds,
        } => {
            emit(&EventStarted::new("vote", &root, hosts));
            let vote = VotePlan {
                add,
                remove,
                reject,
            };
            let plan = RoundPlan {
                rounds,
                concurrent: false,
                data: b"after vote".to_vec(),
            };
            ("vote", sim::vote(&mut cluster, &vote, &plan, start).await?)
        }
    };

    let (ok, failed) = result;
    emit(&EventSummary {
        event: "summary",
        mode: mode.to_string(),
        ok,
        failed,
        elapsed_s: start.elapsed().as_secs_f64(),
    });
    if failed > 0 {
        anyhow::bail!("{failed} step(s) failed");
    }
    Ok(())
}
