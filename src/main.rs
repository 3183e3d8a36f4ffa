//! Sentinel - a self-healing SRE agent.
//!
//! Runs the incident worker, injects incidents for demos, and inspects
//! the queue.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tracing::error;

use sentinel::channel::DeliveryChannel;
use sentinel::config::{ExecutorKind, SentinelConfig};
use sentinel::context::IncidentHydrator;
use sentinel::executor::{ActionExecutor, AllowlistExecutor, NoopExecutor};
use sentinel::health::{CommandProbe, HealthProbe, NoProbe};
use sentinel::incident::{Incident, IncidentStatus, Severity, SignalType};
use sentinel::reasoning::CliReasoner;
use sentinel::store::{IncidentStore, JsonFileStore, MemoryStore};
use sentinel::worker::Worker;
use sentinel::{LoopDependencies, RunOutcome};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(version = "0.1.0")]
#[command(about = "Self-healing SRE agent", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Working directory (holds sentinel.json and the incident store)
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the incident worker until interrupted
    Worker,

    /// Process a single queued incident and exit
    Once,

    /// Inject a manual incident into the queue
    Inject {
        /// Incident title
        title: String,

        /// Incident description (the observed symptom)
        #[arg(short = 'm', long)]
        description: String,

        /// Severity level
        #[arg(short, long, value_enum, default_value = "medium")]
        severity: Severity,

        /// Associated repository id
        #[arg(short, long)]
        repo: Option<String>,
    },

    /// List incidents in the queue
    List,

    /// Show one incident as JSON
    Show {
        /// Incident id
        id: String,
    },
}

fn build_store(config: &SentinelConfig, dir: &std::path::Path) -> anyhow::Result<Arc<dyn IncidentStore>> {
    match &config.store_path {
        Some(path) => {
            let resolved = if path.is_absolute() {
                path.clone()
            } else {
                dir.join(path)
            };
            Ok(Arc::new(JsonFileStore::open(resolved)?.with_lease(config.worker.lease())))
        }
        None => Ok(Arc::new(MemoryStore::new().with_lease(config.worker.lease()))),
    }
}

fn build_dependencies(
    config: &SentinelConfig,
    store: Arc<dyn IncidentStore>,
) -> anyhow::Result<LoopDependencies> {
    let reasoner = CliReasoner::from_config(&config.reasoning)?;
    let executor: Arc<dyn ActionExecutor> = match config.executor.kind {
        ExecutorKind::Noop => Arc::new(NoopExecutor::new()),
        ExecutorKind::Allowlist => Arc::new(AllowlistExecutor::new(config.executor.allowlist.clone())),
    };
    let probe: Arc<dyn HealthProbe> = match &config.health.command {
        Some(command) => Arc::new(CommandProbe::new(command.clone())),
        None => Arc::new(NoProbe),
    };
    Ok(LoopDependencies {
        store,
        hydrator: Arc::new(IncidentHydrator::new()),
        reasoner: Arc::new(reasoner),
        executor,
        probe,
        channel: Arc::new(DeliveryChannel::default()),
    })
}

fn status_label(status: IncidentStatus) -> colored::ColoredString {
    match status {
        IncidentStatus::Queued => "queued".yellow(),
        IncidentStatus::Processing => "processing".blue(),
        IncidentStatus::Resolved => "resolved".green(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "sentinel=debug,info"
    } else {
        "sentinel=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let dir = cli.dir.canonicalize().unwrap_or(cli.dir.clone());
    if !dir.exists() {
        eprintln!(
            "{} Working directory does not exist: {}",
            "Error:".red().bold(),
            dir.display()
        );
        std::process::exit(1);
    }

    // Bad configuration fails the process loudly, never per-incident.
    let config = match SentinelConfig::load(&dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(e.exit_code());
        }
    };
    let store = build_store(&config, &dir)?;

    match cli.command {
        Commands::Worker => {
            let deps = match build_dependencies(&config, Arc::clone(&store)) {
                Ok(deps) => deps,
                Err(e) => {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    std::process::exit(1);
                }
            };
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let worker = Worker::new(deps, config, shutdown_rx);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("\n{} draining in-flight runs...", "Shutdown:".yellow().bold());
                    let _ = shutdown_tx.send(true);
                }
            });

            worker.run().await?;
            println!("{} worker stopped", "Done:".green().bold());
        }

        Commands::Once => {
            let deps = build_dependencies(&config, Arc::clone(&store))?;
            let (_tx, shutdown_rx) = watch::channel(false);
            let worker = Worker::new(deps, config, shutdown_rx);
            match worker.process_once().await {
                Ok(Some(RunOutcome::Resolved)) => {
                    println!("{} incident resolved", "Done:".green().bold());
                }
                Ok(Some(RunOutcome::Escalated { reason })) => {
                    println!("{} escalated: {reason}", "Review:".yellow().bold());
                }
                Ok(Some(RunOutcome::Cancelled)) => {
                    println!("{} run cancelled", "Stopped:".yellow().bold());
                }
                Ok(None) => println!("no queued incidents"),
                Err(e) => {
                    error!(error = %e, "run failed");
                    std::process::exit(e.exit_code());
                }
            }
        }

        Commands::Inject {
            title,
            description,
            severity,
            repo,
        } => {
            let mut incident = Incident::new(SignalType::Manual, title, description, severity);
            if let Some(repo) = repo {
                incident = incident.with_repo(repo);
            }
            let created = store.create(incident).await?;
            println!(
                "{} {} ({})",
                "Queued:".green().bold(),
                created.id,
                created.severity
            );
        }

        Commands::List => {
            let incidents = store.list().await?;
            if incidents.is_empty() {
                println!("no incidents");
            }
            for incident in incidents {
                let marker = if incident.needs_review() {
                    " needs review".red().bold().to_string()
                } else {
                    String::new()
                };
                println!(
                    "{}  {:<10}  {:<8}  {}{}",
                    incident.id,
                    status_label(incident.status),
                    incident.severity.to_string(),
                    incident.title,
                    marker
                );
            }
        }

        Commands::Show { id } => match store.get(&id).await? {
            Some(incident) => println!("{}", serde_json::to_string_pretty(&incident)?),
            None => {
                eprintln!("{} unknown incident: {id}", "Error:".red().bold());
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
