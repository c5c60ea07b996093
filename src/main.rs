//! Extrusight - Extrusion Operational Intelligence
//!
//! # Usage
//!
//! ```bash
//! # Run the service (poller + API)
//! extrusight start
//!
//! # Seed a demo machine, profile, and settings
//! extrusight seed-demo
//!
//! # Destructive: delete all alarms/tickets and clear incident state
//! ALLOW_PUBLIC_SYSTEM_RESET=true extrusight reset-state
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: platform PostgreSQL connection string
//! - `MSSQL_*`: historian bootstrap configuration (see README)
//! - `AI_SERVICE_URL`: anomaly-inference service base URL (optional)
//! - `RUST_LOG`: logging filter (default: info)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use extrusight::ai::AiClient;
use extrusight::api::{self, ApiState};
use extrusight::config;
use extrusight::events::EventBus;
use extrusight::historian::ExtruderPoller;
use extrusight::incident::{IncidentManager, IncidentPolicy};
use extrusight::pipeline::TickProcessor;
use extrusight::state::DetectorRegistry;
use extrusight::storage::{self, Store};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "extrusight")]
#[command(about = "Extrusight - Extrusion Operational Intelligence")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service: historian poller plus HTTP API (default)
    Start,
    /// Seed a demo machine, profile with bands/templates, and settings
    SeedDemo,
    /// Destructive: delete all alarms and tickets, clear incident state.
    /// Gated behind ALLOW_PUBLIC_SYSTEM_RESET.
    ResetState,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut app_config = config::AppConfig::load();
    if let Some(addr) = &cli.addr {
        app_config.server_addr = addr.clone();
    }
    config::init(app_config);

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => run_service().await,
        Command::SeedDemo => run_seed_demo().await,
        Command::ResetState => run_reset_state().await,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn connect_store() -> Result<Store> {
    let cfg = config::get();
    if cfg.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is not set");
    }
    let pool = storage::create_pool(&cfg.database_url)
        .await
        .context("connecting to the platform database")?;
    storage::run_migrations(&pool)
        .await
        .context("running database migrations")?;
    Ok(Store::new(pool))
}

async fn run_service() -> Result<()> {
    let cfg = config::get();
    let store = connect_store().await?;

    let events = EventBus::default();
    let registry = Arc::new(DetectorRegistry::new());
    let ai = AiClient::from_config(&cfg.ai_service_url);
    if ai.is_none() {
        info!("AI service not configured; evaluations run without the ML signal");
    }

    let processor = Arc::new(TickProcessor::new(
        store.clone(),
        Arc::clone(&registry),
        IncidentManager::new(IncidentPolicy::default()),
        ai.clone(),
        events.clone(),
    ));

    if cfg.clean_slate_on_startup {
        warn!("CLEAN_SLATE_ON_STARTUP set: deleting all alarms and tickets");
        store.delete_all_alarms_and_tickets().await?;
        processor.reset_incident_state().await;
    }

    let poller = Arc::new(ExtruderPoller::new(
        store.clone(),
        processor.clone(),
        cfg.historian.clone(),
    ));
    poller.start().await;

    let api_state = ApiState {
        store,
        poller: Arc::clone(&poller),
        processor,
        events,
        ai,
    };
    let app = api::create_app(api_state, &cfg.admin_token);

    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server_addr))?;
    info!(addr = %cfg.server_addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutting down: stopping poller");
    poller.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn run_seed_demo() -> Result<()> {
    let store = connect_store().await?;
    extrusight::demo::seed_demo(&store).await?;
    info!("Demo data seeded; start the service and enable the historian connection");
    Ok(())
}

async fn run_reset_state() -> Result<()> {
    let cfg = config::get();
    if !cfg.allow_public_system_reset {
        anyhow::bail!(
            "reset-state is disabled; set ALLOW_PUBLIC_SYSTEM_RESET=true to allow it"
        );
    }

    let store = connect_store().await?;
    store.delete_all_alarms_and_tickets().await?;
    // In-memory incident state dies with the running service; a restarted
    // service starts clean by construction.
    warn!("All alarms and tickets deleted");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}
