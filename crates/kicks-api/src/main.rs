//! # kicks-api: Binary Entry Point
//!
//! Loads engine configuration, connects to Postgres when configured,
//! hydrates the escrow store, starts the release sweeper and serves the API.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kicks_api::state::{AppConfig, AppState};
use kicks_escrow::EngineConfig;

/// Kicks escrow service.
#[derive(Parser, Debug)]
#[command(name = "kicks-api", version, about, long_about = None)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Engine configuration file (YAML). KICKS_* variables override it.
    #[arg(long, env = "KICKS_CONFIG")]
    config: Option<PathBuf>,

    /// Postgres connection URL. Omit to run in memory only.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Do not run the background release sweeper.
    #[arg(long, env = "KICKS_NO_SWEEPER")]
    no_sweeper: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "KICKS_LOG_JSON")]
    json_logs: bool,

    /// Increase log verbosity (-v, -vv). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(cli: &Cli) {
    let default = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let engine_config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config from {}", path.display()))?,
        None => EngineConfig::from_env().context("loading engine config from environment")?,
    };
    tracing::info!(
        default_fee_rate_bps = engine_config.default_fee_rate_bps,
        default_escrow_days = engine_config.default_escrow_days,
        "engine configuration loaded"
    );

    let db_pool = kicks_api::db::init_pool(cli.database_url.as_deref())
        .await
        .context("database initialization failed")?;

    let sweep_every = Duration::from_secs(engine_config.scheduler.interval_secs);
    let config = AppConfig {
        port: cli.port,
        sweep_enabled: !cli.no_sweeper,
    };
    let state = AppState::with_engine_config(engine_config, config, db_pool);

    state
        .hydrate_from_db()
        .await
        .map_err(anyhow::Error::msg)
        .context("database hydration failed")?;

    if state.config.sweep_enabled {
        kicks_api::sweeper::spawn_release_sweeper(state.clone(), sweep_every);
    } else {
        tracing::warn!("release sweeper disabled; expired escrows wait for POST /v1/escrow/sweep");
    }

    let app = kicks_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Kicks escrow API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
