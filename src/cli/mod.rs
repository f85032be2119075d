//! CLI commands for TinyHive using clap.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use crate::agent::task_fn;
use crate::config::{get_config_path, load_config, load_config_or_default, FabricConfig};
use crate::engine::{MapReduceJob, OrchestrationEngine, PartitionStrategy};
use crate::events::EventBusError;
use crate::registry::{AgentId, AgentRegistry};
use crate::trust::{TrustValidator, Verdict};

/// TinyHive - trust-bounded master/worker agent fabric.
#[derive(Parser)]
#[command(name = "tinyhive")]
#[command(version)]
#[command(about = "TinyHive - master/worker agents with trust-gated messaging", long_about = None)]
pub struct Commands {
    /// Config file (defaults to ~/.tinyhive/config.json)
    #[arg(long, global = true, env = "TINYHIVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a numeric map-reduce job and print its report
    Run {
        /// Comma-separated integers
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        input: Vec<i64>,

        /// Number of workers
        #[arg(long, default_value_t = 2)]
        workers: usize,

        /// Partition strategy: round-robin, hash, range
        #[arg(long, default_value = "round-robin")]
        strategy: PartitionStrategy,

        /// Aggregate to compute
        #[arg(long, value_enum, default_value_t = Op::Sum)]
        op: Op,

        /// Reduce over the partitions that succeeded instead of failing the job
        #[arg(long)]
        allow_failures: bool,

        /// Stream the job's events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Print the trust matrix of a sample two-master topology
    Trust,

    /// Show the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Op {
    Sum,
    Max,
    Count,
}

impl Op {
    fn map(self, items: &[i64]) -> Option<i64> {
        match self {
            Op::Sum => Some(items.iter().sum()),
            Op::Max => items.iter().copied().max(),
            Op::Count => Some(items.len() as i64),
        }
    }

    fn reduce(self, partials: &[Option<i64>]) -> Option<i64> {
        let values = partials.iter().flatten().copied();
        match self {
            Op::Sum | Op::Count => Some(values.sum()),
            Op::Max => values.max(),
        }
    }
}

impl Commands {
    /// Resolve the configuration this invocation runs with.
    pub fn load_config(&self) -> Result<FabricConfig> {
        match &self.config {
            Some(path) => Ok(load_config(path)?),
            None => Ok(load_config_or_default()),
        }
    }

    /// Run the command.
    pub async fn run(&self, config: FabricConfig) -> Result<()> {
        match &self.command {
            Command::Run {
                input,
                workers,
                strategy,
                op,
                allow_failures,
                events,
            } => {
                cmd_run(
                    config,
                    input.clone(),
                    *workers,
                    *strategy,
                    *op,
                    *allow_failures,
                    *events,
                )
                .await
            }
            Command::Trust => cmd_trust().await,
            Command::Config => cmd_config(&self.config, &config).await,
        }
    }
}

// Command implementations

async fn cmd_run(
    config: FabricConfig,
    input: Vec<i64>,
    workers: usize,
    strategy: PartitionStrategy,
    op: Op,
    allow_failures: bool,
    events: bool,
) -> Result<()> {
    let engine = OrchestrationEngine::from_config(config);
    let mut options = engine.default_options();
    if allow_failures {
        options = options.fail_on_error(false);
    }

    let printer = if events {
        let mut receiver = engine.registry().events().subscribe();
        Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{}", line);
                        }
                        if event.is_terminal() {
                            break;
                        }
                    }
                    Err(EventBusError::Lagged(skipped)) => {
                        eprintln!("{{\"event\":\"lagged\",\"skipped\":{}}}", skipped);
                    }
                    Err(_) => break,
                }
            }
        }))
    } else {
        None
    };

    let job = MapReduceJob::new(input, workers)
        .with_strategy(strategy)
        .natural_order();
    let outcome = engine
        .map_reduce(
            job,
            options,
            move |items: Vec<i64>| async move { Ok(op.map(&items)) },
            move |partials: Vec<Option<i64>>| async move { Ok(op.reduce(&partials)) },
        )
        .await;

    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let report = outcome?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_trust() -> Result<()> {
    let registry = AgentRegistry::default();
    let noop = task_fn(|input| async move { Ok(input) });

    let alpha = registry.create_master("alpha", []);
    let beta = registry.create_master("beta", []);
    let mut agents: Vec<(String, AgentId)> = vec![
        ("alpha".to_string(), alpha.id().clone()),
        ("beta".to_string(), beta.id().clone()),
    ];
    for (parent, label) in [(&alpha, "alpha.w1"), (&alpha, "alpha.w2"), (&beta, "beta.w1")] {
        let worker = registry.create_worker(parent.id(), label, noop.clone(), [])?;
        agents.push((label.to_string(), worker.id().clone()));
    }

    let validator = TrustValidator::new(registry.clone());
    let width = agents.iter().map(|(label, _)| label.len()).max().unwrap_or(0) + 2;

    print!("{:width$}", "from \\ to", width = width);
    for (label, _) in &agents {
        print!("{:>18}", label);
    }
    println!();
    for (from_label, from) in &agents {
        print!("{:width$}", from_label, width = width);
        for (_, to) in &agents {
            let cell = match validator.can_communicate(from, to) {
                Verdict::Allowed(rule) => rule.to_string(),
                Verdict::Denied(_) => "denied".to_string(),
            };
            print!("{:>18}", cell);
        }
        println!();
    }
    Ok(())
}

async fn cmd_config(path: &Option<PathBuf>, config: &FabricConfig) -> Result<()> {
    let source = match path {
        Some(path) => path.display().to_string(),
        None => match get_config_path() {
            Ok(path) if path.exists() => path.display().to_string(),
            _ => "defaults".to_string(),
        },
    };
    println!("Config source: {}", source);
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
