//! opr-api: OPR JSON API server

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use opr_server::{run_server, AppState, Database, DbConfig, PgConnectionManager, PoolConfig, ServerConfig};

mod tracing_setup;

use tracing_setup::TracingConfig;

const PROGRAM: &str = env!("CARGO_BIN_NAME");

#[derive(Parser, Debug)]
#[command(name = "opr-api", version, about = "OPR JSON API server")]
struct Cli {
    /// Address to bind to
    #[arg(long, short = 'b', env = "OPR_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Human-readable logs instead of JSON lines
    #[arg(long)]
    develop: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment variables win
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    tracing_setup::init_tracing(&TracingConfig {
        develop: cli.develop,
    })?;

    let started = Instant::now();
    log_start();

    let result = run(cli).await;

    tracing::info!(
        program = PROGRAM,
        pid = std::process::id(),
        real_secs = started.elapsed().as_secs_f64(),
        ok = result.is_ok(),
        "exit"
    );
    result
}

fn log_start() {
    let hostname = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::info!(
        program = PROGRAM,
        version = env!("CARGO_PKG_VERSION"),
        hostname = %hostname,
        pid = std::process::id(),
        cpu_count = num_cpus::get_physical(),
        cpu_usable = num_cpus::get(),
        "start"
    );
    tracing::info!(argv = ?std::env::args().collect::<Vec<_>>(), "invoked");
}

async fn run(cli: Cli) -> Result<()> {
    let config = DbConfig::from_env().context("invalid database configuration")?;
    let manager = PgConnectionManager::new(&config).context("invalid database configuration")?;

    let tls_required = manager.tls_required();
    let db = Database::new(manager, PoolConfig::default());
    match db.probe().await {
        Ok(()) => tracing::info!(tls_required, "database reachable"),
        Err(err) => tracing::warn!(
            tls_required,
            kind = err.kind_name(),
            error = %err,
            "database not reachable at startup, continuing"
        ),
    }

    let state = AppState::new(db);
    run_server(state, ServerConfig { bind_addr: cli.bind })
        .await
        .context("server error")
}
