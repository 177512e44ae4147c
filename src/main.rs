//! Berth - Compose-managed container environments for integration tests
//!
//! This is the main CLI entry point for Berth.

use berth::engine::ComposeCli;
use berth::error::{BerthError, Result};
use berth::expose::EnvironmentExposer;
use berth::manifest::{sanitize_project_name, ManifestConfig, TOOL_CONFIG_FILE};
use berth::orchestrator::ComposeOrchestrator;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Berth - compose-managed container environments
#[derive(Parser)]
#[command(name = "berth")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Bring compose services up, wait for readiness, expose their endpoints", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Tool configuration file (defaults to berth.yaml in the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Compose file, repeatable; overrides files from the configuration
    #[arg(short, long, global = true)]
    file: Vec<PathBuf>,

    /// Project name scoping engine resources
    #[arg(short, long, global = true)]
    project_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start services, wait until they accept connections
    Up {
        /// Scale a service (service=replicas)
        #[arg(long)]
        scale: Vec<String>,
        /// Pull images before starting
        #[arg(long)]
        pull: bool,
        /// Skip the readiness wait
        #[arg(long)]
        no_wait: bool,
        /// Readiness timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Stop and remove services
    Down {
        /// Remove named volumes
        #[arg(short, long)]
        volumes: bool,
    },

    /// Pull images for every service
    Pull,

    /// List resolved containers
    #[command(name = "ps")]
    Ps {
        /// Print the resolved state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print endpoint variables for the running environment
    Info {
        /// Property-style names instead of environment variables
        #[arg(long)]
        properties: bool,
    },

    /// Run a command with service endpoints injected into its environment
    Run {
        /// Tear the environment down after the command exits
        #[arg(long)]
        down_after: bool,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let manifest = apply_overrides(load_manifest(&cli)?, &cli.command)?;
    let engine = Arc::new(ComposeCli::detect().await?);
    let orchestrator = ComposeOrchestrator::new(manifest, engine);

    match cli.command {
        Commands::Up { .. } => {
            let services = orchestrator.up().await?;
            println!(
                "Started project {} ({} containers ready)",
                orchestrator.manifest().project_name,
                services.containers().len()
            );
        }

        Commands::Down { .. } => {
            orchestrator.down().await?;
            println!("Stopped project {}", orchestrator.manifest().project_name);
        }

        Commands::Pull => {
            orchestrator.pull().await?;
            println!(
                "Pulled images for project {}",
                orchestrator.manifest().project_name
            );
        }

        Commands::Ps { json } => {
            let services = orchestrator.resolve_running().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&services)?);
            } else {
                println!(
                    "{:<14} {:<20} {:<14} {:<16} PORTS",
                    "SERVICE", "NAME", "CONTAINER ID", "HOST"
                );
                for (service, name, container) in services.containers() {
                    let ports: Vec<String> = container
                        .ports
                        .iter()
                        .map(|(spec, host_port)| format!("{}->{}", host_port, spec))
                        .collect();
                    println!(
                        "{:<14} {:<20} {:<14} {:<16} {}",
                        service,
                        name,
                        container.short_id(),
                        container.host,
                        ports.join(", ")
                    );
                }
            }
        }

        Commands::Info { properties } => {
            let services = orchestrator.resolve_running().await?;
            let values = EnvironmentExposer::expose(&services);

            if properties {
                print!("{}", values.render_properties());
            } else {
                for (name, value) in &values.environment {
                    println!("{}={}", name, value);
                }
            }
        }

        Commands::Run {
            down_after,
            command,
        } => {
            let services = orchestrator.up().await?;
            let values = EnvironmentExposer::expose(&services);

            let mut child = tokio::process::Command::new(&command[0]);
            child.args(&command[1..]);
            values.apply_environment(&mut child);
            let status = child.status().await?;

            if down_after {
                orchestrator.down().await?;
            }

            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
        }
    }

    Ok(())
}

/// Build the manifest from the tool configuration file and CLI options
fn load_manifest(cli: &Cli) -> Result<ManifestConfig> {
    let working_dir = std::env::current_dir()?;

    let mut manifest = if let Some(path) = &cli.config {
        ManifestConfig::from_file(path)?
    } else {
        let default_config = working_dir.join(TOOL_CONFIG_FILE);
        if default_config.exists() {
            ManifestConfig::from_file(&default_config)?
        } else {
            ManifestConfig::default()
        }
    };

    if !cli.file.is_empty() {
        manifest.files = cli.file.clone();
    }
    if manifest.files.is_empty() {
        if let Some(found) = ManifestConfig::find_manifest_file(&working_dir) {
            manifest.files.push(found);
        }
    }
    if let Some(name) = &cli.project_name {
        manifest.project_name = sanitize_project_name(name);
    }

    Ok(manifest)
}

/// Fold subcommand flags into the manifest
fn apply_overrides(mut manifest: ManifestConfig, command: &Commands) -> Result<ManifestConfig> {
    match command {
        Commands::Up {
            scale,
            pull,
            no_wait,
            timeout,
        } => {
            for pair in scale {
                match pair.split_once('=') {
                    Some((service, replicas)) => {
                        let count: u32 = replicas.trim().parse().map_err(|_| {
                            BerthError::InvalidConfig(format!(
                                "invalid replica count in '{}'",
                                pair
                            ))
                        })?;
                        manifest = manifest.scale(service.trim(), count);
                    }
                    None => {
                        return Err(BerthError::InvalidConfig(format!(
                            "scale must be service=replicas, got '{}'",
                            pair
                        )));
                    }
                }
            }
            if *pull {
                manifest.pull_before_up = true;
            }
            if *no_wait {
                manifest.wait_for_ready = false;
            }
            if let Some(secs) = timeout {
                manifest.readiness_timeout = Duration::from_secs(*secs);
            }
        }

        Commands::Down { volumes } => {
            if *volumes {
                manifest.remove_volumes = true;
            }
        }

        _ => {}
    }

    Ok(manifest)
}
