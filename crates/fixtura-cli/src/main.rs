//! Fixtura operator CLI
//!
//! Inspect and clean up what test runs left behind.
//!
//! # Usage
//! ```bash
//! fixtura probe
//! fixtura recover --project shop
//! fixtura list --project shop --json
//! fixtura audit --project shop --limit 20
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use fixtura_core::{
    ContainerStore, Supervisor, SupervisorConfig, SupervisorFactory, SupervisorScope,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fixtura - supervised containers for test fixtures
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Container runtime executable
    #[arg(long, value_name = "PATH", global = true)]
    executable: Option<PathBuf>,

    /// Directory holding the per-project stores
    #[arg(long, value_name = "DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the container runtime is usable
    Probe,

    /// Remove every container and pod recorded for a project
    Recover {
        /// Project namespace
        #[arg(short, long)]
        project: Option<String>,
    },

    /// List the records in a project's store
    List {
        /// Project namespace
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Show the most recent audit events of a project
    Audit {
        /// Project namespace
        #[arg(short, long)]
        project: Option<String>,

        /// Number of events to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Write the effective configuration to a file
    InitConfig {
        /// Destination file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Probe => {
            let config = load_config(&cli, None)?;
            match SupervisorFactory::is_supported(&config).await {
                Some(backend) => {
                    if cli.json {
                        println!("{}", serde_json::to_string(&backend)?);
                    } else {
                        println!("{} {}", backend.name, backend.version);
                    }
                }
                None => {
                    if cli.json {
                        println!("{{ \"supported\": false }}");
                    } else {
                        println!("{}: not supported on this system", config.executable_name());
                    }
                    std::process::exit(1);
                }
            }
        }

        Commands::Recover { project } => {
            let config = load_config(&cli, project.as_deref())?;
            let supervisor = Supervisor::open(config, SupervisorScope::PerSuite)
                .context("Failed to open the project store")?;
            let before = supervisor.container_records()?.len() + supervisor.pod_records()?.len();

            let recovered = supervisor.startup_recover().await;
            let remaining =
                supervisor.container_records()?.len() + supervisor.pod_records()?.len();
            supervisor.close().await?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "found": before,
                        "remaining": remaining,
                        "ok": recovered.is_ok(),
                    })
                );
            } else {
                println!("Found {} records, {} remaining", before, remaining);
            }
            recovered.context("Crash recovery incomplete")?;
        }

        Commands::List { project } => {
            let config = load_config(&cli, project.as_deref())?;
            let store = open_existing_store(&config)?;
            let pods = store.pod_list()?;
            let containers = store.container_list()?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "pods": pods,
                        "containers": containers,
                        "stats": store.stats()?,
                    }))?
                );
            } else {
                println!("STORE: {}", config.store_path().display());
                println!("PODS: {}", pods.len());
                for pod in &pods {
                    println!("  {}", pod.name);
                }
                println!("CONTAINERS: {}", containers.len());
                for container in &containers {
                    match &container.pod_name {
                        Some(pod) => println!("  {} (pod {})", container.name, pod),
                        None => println!("  {}", container.name),
                    }
                }
            }
            store.close()?;
        }

        Commands::Audit { project, limit } => {
            let config = load_config(&cli, project.as_deref())?;
            let store = open_existing_store(&config)?;
            let events = store.audit_list(*limit)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                for event in &events {
                    let time = event
                        .timestamp()
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                        .unwrap_or_else(|| event.timestamp_ms.to_string());
                    println!(
                        "{} {} {:<10} {:<20} {}",
                        time, event.instance_id, event.scope, event.code, event.text
                    );
                }
            }
            store.close()?;
        }

        Commands::InitConfig { file } => {
            let config = load_config(&cli, None)?;
            config.to_file(file)?;
            println!("Wrote configuration to {}", file.display());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

/// Open a project's store without creating one
fn open_existing_store(config: &SupervisorConfig) -> anyhow::Result<ContainerStore> {
    let path = config.store_path();
    if !path.exists() {
        anyhow::bail!(
            "No store for project {} (expected {})",
            config.project_name,
            path.display()
        );
    }
    ContainerStore::open(&path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Configuration file first, then command-line overrides
fn load_config(cli: &Cli, project: Option<&str>) -> anyhow::Result<SupervisorConfig> {
    let mut config = match &cli.config {
        Some(path) => SupervisorConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => SupervisorConfig::default(),
    };

    if let Some(project) = project {
        config.project_name = project.to_string();
    }
    if let Some(executable) = &cli.executable {
        config.executable = executable.clone();
    }
    if let Some(dir) = &cli.state_dir {
        config.state_directory = dir.clone();
    }

    config.validate()?;
    tracing::debug!(?config, "Loaded configuration");
    Ok(config)
}
