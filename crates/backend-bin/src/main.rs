use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use teleconsult_backend_lib::{
    config::Settings, records::FlatFileRecordStore, ws_router, AppState,
};

/// TeleConsult signaling server
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Config file path (defaults to teleconsult.toml in the working dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Settings::load().context("loading config")?,
    };
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }

    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let records = Arc::new(
        FlatFileRecordStore::new(&settings.records_dir).context("initializing record store")?,
    );
    let bind_addr = settings.bind_addr;
    let state = Arc::new(AppState::new(settings, records));

    let app = ws_router::create_router(state);
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(addr = %bind_addr, "signaling server listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
