//! stackctl - AI 服务栈编排器
//!
//! Usage:
//! - Deploy or upgrade: `stackctl deploy`
//! - Health report: `stackctl status [--json]`
//! - Stop everything: `stackctl destroy`
//! - Wipe all data: `stackctl reset --confirm`

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stack_orchestrator::config::env::constants::{DOCKER_COMMAND_TIMEOUT_SECS, VERSION};
use stack_orchestrator::config::{OrchestratorConfig, Topology};
use stack_orchestrator::error::{exit_codes, OrchestratorError};
use stack_orchestrator::infra::DockerCli;
use stack_orchestrator::services::{DeployOptions, Supervisor};

/// AI 服务栈编排器
#[derive(Parser)]
#[command(name = "stackctl", version, about = "Deploy and supervise the self-hosted AI service stack")]
struct Cli {
    /// Service environment file (overrides $STACK_ENV_FILE)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Root directory for persisted volumes (overrides $STACK_DATA_ROOT)
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// TOML topology file replacing the built-in stack
    #[arg(long, global = true)]
    topology: Option<PathBuf>,

    /// Project name used for container names and labels
    #[arg(long, global = true)]
    project: Option<String>,

    /// Seconds to wait for each service to become ready
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    health_timeout: Option<u64>,

    /// Seconds between readiness probes
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: Option<u64>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update every service (idempotent)
    Deploy {
        /// Proceed even if required keys still hold placeholder values
        #[arg(long)]
        accept_placeholders: bool,

        /// Print the deployment report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report per-service health without changing anything
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Stop all services; containers, network and data are kept
    Destroy,

    /// Remove containers, network and ALL persisted data
    Reset {
        /// Required: confirms that persisted data will be deleted
        #[arg(long)]
        confirm: bool,
    },
}

impl Cli {
    /// 环境变量配置 + 命令行覆盖
    fn config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::from_env();
        if let Some(path) = &self.env_file {
            config.env_file = path.clone();
        }
        if let Some(path) = &self.data_root {
            config.data_root = path.clone();
        }
        if let Some(path) = &self.topology {
            config.topology_file = Some(path.clone());
        }
        if let Some(project) = &self.project {
            config.project = project.clone();
        }
        if let Some(secs) = self.health_timeout {
            config.health.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.poll_interval {
            config.health.poll_interval = Duration::from_secs(secs);
        }
        config
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "stack_orchestrator=debug,stackctl=debug"
    } else {
        "stack_orchestrator=info,stackctl=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            e.downcast_ref::<OrchestratorError>()
                .map(OrchestratorError::exit_code)
                .unwrap_or(exit_codes::RUNTIME)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config();
    info!(
        version = VERSION,
        project = %config.project,
        env_file = %config.env_file.display(),
        "stackctl starting"
    );

    let topology = Topology::load(config.topology_file.as_deref())
        .await
        .map_err(OrchestratorError::from)?;
    let runtime = Arc::new(DockerCli::new(
        config.docker_bin.clone(),
        Duration::from_secs(DOCKER_COMMAND_TIMEOUT_SECS),
    ));
    let supervisor = Supervisor::new(config, topology, runtime)?;

    match cli.command {
        Command::Deploy {
            accept_placeholders,
            json,
        } => {
            // Ctrl-C 只停止等待，已启动的容器保持运行；其它子命令保留默认的 SIGINT 行为
            let cancel = supervisor.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping readiness polling; containers keep running");
                    cancel.cancel();
                }
            });
            let run = supervisor
                .deploy(DeployOptions {
                    accept_placeholders,
                })
                .await;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&run.report)
                        .context("failed to serialize deployment report")?
                );
            } else {
                for line in run.report.render() {
                    println!("{}", line);
                }
            }
            run.into_result()?;
            Ok(exit_codes::SUCCESS)
        }
        Command::Status { json } => {
            let report = supervisor.status().await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .context("failed to serialize status report")?
                );
            } else {
                for line in report.render() {
                    println!("{}", line);
                }
            }
            Ok(if report.all_healthy() {
                exit_codes::SUCCESS
            } else {
                exit_codes::PARTIAL_FAILURE
            })
        }
        Command::Destroy => {
            let stopped = supervisor.destroy().await?;
            if stopped.is_empty() {
                println!("nothing to stop");
            } else {
                println!("stopped: {}", stopped.join(", "));
            }
            Ok(exit_codes::SUCCESS)
        }
        Command::Reset { confirm } => {
            let report = supervisor.reset(confirm).await?;
            println!(
                "removed {} container(s), network {}, {} volume(s) purged",
                report.removed_containers.len(),
                if report.network_removed { "removed" } else { "absent" },
                report.purged.len()
            );
            Ok(exit_codes::SUCCESS)
        }
    }
}
