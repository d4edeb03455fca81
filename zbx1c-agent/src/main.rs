//! zbx1c-agent - Zabbix agent for 1C:Enterprise clusters
//!
//! Subcommands are meant to be wired as Zabbix UserParameters:
//! - Low-level discovery of clusters
//! - Session / job / infobase listings, per-infobase activity and metric
//!   snapshots
//! - Cluster and RAS availability checks
//! - Active push of metrics through the trapper protocol
//!
//! JSON payloads go to stdout, logs to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use zbx1c_agent::config::AgentConfig;
use zbx1c_agent::discovery::{check_ras, LldDocument};
use zbx1c_agent::logging::init_logging;
use zbx1c_agent::records::normalize_cluster_id;
use zbx1c_agent::repository::ClusterRepository;
use zbx1c_agent::trapper::snapshot_items;
use zbx1c_agent::ProcessRunner;

#[derive(Parser)]
#[command(name = "zbx1c-agent")]
#[command(
    author,
    version,
    about = "1C:Enterprise cluster monitoring for Zabbix",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/zbx1c/config.toml)
    #[arg(short, long, global = true, env = "ZBX1C_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Zabbix LLD document for all clusters, with probed status
    Discovery,
    /// Cluster list as JSON
    Clusters,
    /// Infobases of a cluster
    Infobases { cluster_id: String },
    /// Sessions of a cluster
    Sessions {
        cluster_id: String,
        /// Only sessions classified as active
        #[arg(long)]
        active: bool,
        /// Only sessions of this infobase
        #[arg(long)]
        infobase: Option<String>,
    },
    /// Per-user and per-application session counts
    SessionsSummary { cluster_id: String },
    /// Session activity per infobase
    InfobasesSummary { cluster_id: String },
    /// Background jobs of a cluster
    Jobs {
        cluster_id: String,
        #[arg(long)]
        active: bool,
        #[arg(long)]
        infobase: Option<String>,
    },
    /// Metric snapshot of one cluster, or of every cluster when omitted
    Metrics {
        cluster_id: Option<String>,
        /// Session activity window in minutes
        #[arg(long)]
        threshold: Option<i64>,
        /// Minimum calls in the last 5 minutes for an active session
        #[arg(long)]
        min_calls: Option<u64>,
        /// Minimum bytes in the last 5 minutes for an active session
        #[arg(long)]
        min_bytes: Option<u64>,
    },
    /// Cluster, infobases, sessions, jobs and statistics in one document
    All { cluster_id: String },
    /// Print available / unavailable / unknown (always exits 0)
    Status { cluster_id: String },
    /// Check that the RAS service answers (exit 1 when it does not)
    CheckRas,
    /// Validate configuration (exit 1 on problems)
    CheckConfig,
    /// Push metrics of all clusters to the Zabbix trapper
    Send {
        /// Send once and exit
        #[arg(long)]
        once: bool,
        /// Send interval in seconds (default: zabbix.send_interval_secs)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Zabbix expects a value even when everything else fails
    if let Commands::Status { cluster_id } = &cli.command {
        let status = match load_config(&cli).await {
            Ok(config) => repository(&config)
                .refresh_cluster_status(normalize_cluster_id(cluster_id))
                .await
                .to_string(),
            Err(e) => {
                eprintln!("error: {e:#}");
                "unknown".to_string()
            }
        };
        println!("{status}");
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn load_config(cli: &Cli) -> Result<AgentConfig> {
    let config = AgentConfig::load(cli.config.as_deref()).await?;
    init_logging(&config.logging, cli.verbose);
    Ok(config)
}

fn repository(config: &AgentConfig) -> ClusterRepository<ProcessRunner> {
    ClusterRepository::new(config.process_runner(), config.repository_options())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config(&cli).await?;

    match cli.command {
        Commands::CheckConfig => return check_config(&cli, &config),
        Commands::Metrics {
            threshold,
            min_calls,
            min_bytes,
            ..
        } => {
            if let Some(threshold) = threshold {
                config.activity.session_threshold_minutes = threshold;
            }
            config.activity.min_calls = min_calls.or(config.activity.min_calls);
            config.activity.min_bytes = min_bytes.or(config.activity.min_bytes);
        }
        _ => {}
    }

    config.validate().context("invalid configuration")?;
    let repo = repository(&config);

    match cli.command {
        Commands::Discovery => {
            let clusters = repo.discover_clusters_with_status(false).await;
            print_json(&LldDocument::from_clusters(&clusters))?;
        }
        Commands::Clusters => {
            print_json(&repo.discover_clusters(false).await)?;
        }
        Commands::Infobases { cluster_id } => {
            print_json(&repo.get_infobases(normalize_cluster_id(&cluster_id), false).await)?;
        }
        Commands::Sessions {
            cluster_id,
            active,
            infobase,
        } => {
            let id = normalize_cluster_id(&cluster_id);
            let sessions = if active {
                repo.get_active_sessions(id).await
            } else {
                repo.get_sessions(id).await
            };
            let sessions: Vec<_> = sessions
                .into_iter()
                .filter(|s| infobase.as_deref().map_or(true, |ib| s.infobase() == Some(ib)))
                .collect();
            print_json(&sessions)?;
        }
        Commands::SessionsSummary { cluster_id } => {
            print_json(&repo.get_sessions_summary(normalize_cluster_id(&cluster_id)).await)?;
        }
        Commands::InfobasesSummary { cluster_id } => {
            print_json(&repo.get_infobase_summary(normalize_cluster_id(&cluster_id)).await)?;
        }
        Commands::Jobs {
            cluster_id,
            active,
            infobase,
        } => {
            let id = normalize_cluster_id(&cluster_id);
            let jobs = if active {
                repo.get_active_jobs(id).await
            } else {
                repo.get_jobs(id).await
            };
            let jobs: Vec<_> = jobs
                .into_iter()
                .filter(|j| infobase.as_deref().map_or(true, |ib| j.infobase() == Some(ib)))
                .collect();
            print_json(&jobs)?;
        }
        Commands::Metrics { cluster_id, .. } => match cluster_id {
            Some(id) => print_json(&repo.get_cluster_metrics(normalize_cluster_id(&id)).await)?,
            None => print_json(&repo.get_all_metrics().await)?,
        },
        Commands::All { cluster_id } => {
            print_json(&repo.cluster_overview(normalize_cluster_id(&cluster_id)).await)?;
        }
        Commands::CheckRas => {
            let ras = check_ras(
                &config.rac.host,
                config.rac.port,
                &config.rac.path.display().to_string(),
                repo.options().probe_timeout,
            )
            .await;
            print_json(&ras)?;
            if !ras.available {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Send { once, interval } => {
            let interval =
                Duration::from_secs(interval.unwrap_or(config.zabbix.send_interval_secs));
            send_loop(&repo, &config, once, interval).await?;
        }
        // Answered before dispatch
        Commands::Status { .. } | Commands::CheckConfig => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ConfigReport {
    config_path: Option<String>,
    valid: bool,
    problems: Vec<String>,
    rac_found: bool,
    effective: String,
}

fn check_config(cli: &Cli, config: &AgentConfig) -> Result<ExitCode> {
    let mut problems: Vec<String> = config.problems().iter().map(ToString::to_string).collect();
    let rac_found = executable_exists(&config.rac.path);
    if !rac_found {
        problems.push(format!("rac executable {} not found", config.rac.path.display()));
    }

    let config_path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => AgentConfig::config_file_path().ok(),
    };
    let report = ConfigReport {
        config_path: config_path.map(|p| p.display().to_string()),
        valid: problems.is_empty(),
        problems,
        rac_found,
        effective: config.to_toml_string()?,
    };
    print_json(&report)?;

    Ok(if report.valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Absolute/relative paths are checked directly; bare names against PATH.
fn executable_exists(path: &Path) -> bool {
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(path).is_file()))
        .unwrap_or(false)
}

async fn send_loop(
    repo: &ClusterRepository<ProcessRunner>,
    config: &AgentConfig,
    once: bool,
    interval: Duration,
) -> Result<()> {
    let client = config.trapper_client();
    let mut ticker = tokio::time::interval(interval);
    info!(
        "Sending to {}:{} as host {:?} every {:?}",
        config.zabbix.server, config.zabbix.port, config.zabbix.host_name, interval
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping sender");
                return Ok(());
            }
        }

        let run_id = uuid::Uuid::new_v4();
        let cycle = async {
            // Pick up clusters added or removed since the last cycle
            repo.invalidate_clusters();
            let snapshots = repo.get_all_metrics().await;
            let items: Vec<_> = snapshots
                .iter()
                .flat_map(|s| {
                    snapshot_items(s, &config.zabbix.host_name, &config.zabbix.item_prefix)
                })
                .collect();

            match client.send(&items).await {
                Ok(summary) if summary.failed > 0 => {
                    warn!("Zabbix rejected {} of {} items", summary.failed, items.len());
                }
                Ok(_) => {}
                Err(e) => error!("Trapper send failed: {}", e),
            }
        };
        cycle.instrument(info_span!("send", %run_id)).await;

        if once {
            return Ok(());
        }
    }
}
