//! Scan server - HTTP control surface and live event stream for batches.

mod hub;
mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use scan::io::catalog::load_catalog;
use scan::io::config::load_config;
use scan::io::executor::CommandExecutor;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "scan-ui")]
#[command(about = "HTTP API and event stream for running security test batches")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Rules directory laid out as `<category>/<name>.toml`
    #[arg(long, default_value = "rules")]
    rules_dir: PathBuf,

    /// Host configuration file
    #[arg(long, default_value = "scan.toml")]
    config: PathBuf,

    /// Working directory for the probe command
    #[arg(long)]
    probe_dir: Option<PathBuf>,

    /// Directory containing UI static files
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scan_ui=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let cfg = load_config(&args.config)?;
    let catalog = load_catalog(&args.rules_dir)?;
    info!(
        rules_dir = %args.rules_dir.display(),
        rules = catalog.len(),
        categories = catalog.categories().len(),
        "catalog loaded"
    );

    let mut executor = CommandExecutor::from_config(&cfg);
    if let Some(dir) = args.probe_dir {
        executor = executor.with_workdir(dir);
    }
    let state = AppState::new(
        catalog,
        Arc::new(executor),
        cfg.coordinator_settings(),
        cfg.reports_dir.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    let ui_dir = args.ui_dir.unwrap_or_else(|| PathBuf::from("ui").join("dist"));
    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("parse bind address")?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
