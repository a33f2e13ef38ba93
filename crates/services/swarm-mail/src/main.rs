//! swarm-mail: coordination server for fleets of autonomous coding agents.
//!
//! Exit codes: 0 success, 1 configuration error, 2 runtime error.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use swarm_common::{AppConfig, telemetry};
use swarm_core::Engine;
use swarm_core::model::claim::ClaimBmc;
use swarm_core::model::project::ProjectBmc;
use swarm_core::model::recovery;
use swarm_core::types::now_ts;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Emit logs as JSON (for supervised deployments)
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the MCP tool surface over streamable HTTP
    ServeHttp {
        /// Bind host (overrides HTTP_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides HTTP_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Mount path for the MCP transport
        #[arg(long)]
        path: Option<String>,
    },
    /// Rebuild the index from the per-project git archives
    RebuildIndex {
        /// Only replay missing entries instead of wiping first
        #[arg(long, default_value_t = false)]
        additive: bool,
    },
    /// Sweep expired file reservations across all projects
    GcExpiredClaims,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::setup_tracing(cli.log_json);

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("runtime error: failed to start tokio: {}", e);
            return ExitCode::from(2);
        }
    };

    let result = runtime.block_on(run(cli.command, config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("runtime error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(command: Commands, mut config: AppConfig) -> Result<()> {
    match command {
        Commands::ServeHttp { host, port, path } => {
            if let Some(host) = host {
                config.http.host = host;
            }
            if let Some(port) = port {
                config.http.port = port;
            }
            if let Some(path) = path {
                config.http.path = path;
            }
            swarm_mcp::run_http(config).await
        }
        Commands::RebuildIndex { additive } => {
            let engine = Engine::new(Arc::new(config)).await?;
            let rows = if additive {
                recovery::reconcile_all(&engine).await?
            } else {
                recovery::rebuild_index(&engine).await?
            };
            println!("rebuild complete: {} row(s) restored from the archive", rows);
            Ok(())
        }
        Commands::GcExpiredClaims => {
            let engine = Engine::new(Arc::new(config)).await?;
            let now = now_ts();
            let mut swept = 0;
            for project in ProjectBmc::list_all(&engine).await? {
                swept += ClaimBmc::sweep(&engine, project.id, now).await?;
            }
            println!("gc complete: {} expired claim(s) released", swept);
            Ok(())
        }
    }
}
