mod cli;
mod config;
mod handlers;
mod storage;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    cli::{Cli, Commands},
    config::Config,
    handlers::build_router,
    storage::Storage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Send { url, text }) => return cli::run_send(url, text).await,
        Some(Commands::Peek { url }) => return cli::run_peek(url).await,
        None => {}
    }

    let config = Config::from_env();
    let storage = Arc::new(Storage::open(config.persist_path.clone()).await);
    if let Some(path) = &config.persist_path {
        info!(path = %path.display(), "persisting instructions to file");
    }

    let app = build_router(storage);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("prompt store listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("prompt store stopped");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,prompt_store=info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
