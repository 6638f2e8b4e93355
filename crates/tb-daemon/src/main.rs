//! termbridge daemon — serves the browser terminal and bridges each
//! WebSocket connection to a PTY running the configured CLI.

use std::sync::Arc;

use anyhow::{Context, Result};
use tb_bridge::http_api::{app_router, BridgeState};
use tb_core::config::{Config, LogFormat};
use tb_session::PtyPool;
use tb_telemetry::logging::{self, Format};
use tracing::info;

mod environment;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_path = environment::load_dotenv();

    let config = Config::load().context("failed to load configuration")?;

    let format = match config.general.log_format {
        LogFormat::Pretty => Format::Pretty,
        LogFormat::Json => Format::Json,
    };
    logging::init("termbridge", &config.general.log_level, format);
    if let Some(path) = dotenv_path {
        info!(path = %path.display(), "loaded environment file");
    }
    environment::log_config(&config);

    let pool = Arc::new(PtyPool::new(
        environment::command_spec(&config.cli),
        config.terminal.max_sessions,
    ));
    let state = Arc::new(BridgeState::new(pool, &config.terminal));
    let static_dir = environment::find_static_dir(config.server.static_dir.as_deref());
    let app = app_router(state, static_dir.as_deref());

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("web terminal on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Open sessions are dropped with the runtime, which kills their PTYs.
    info!("termbridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
