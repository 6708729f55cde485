mod config;
mod error;
mod handlers;
mod retention;
mod state;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("master=debug,monitor=debug,common=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    if config.automl_api_token.is_none() {
        warn!("AUTOML_API_TOKEN no configurado: los monitoreos necesitarán un token por request");
    }
    info!("config: {:?}", config);

    let state = AppState::new(config.clone());

    // router HTTP
    let app = handlers::build_router(state.clone());

    // limpieza de jobs viejos en segundo plano
    let retention = tokio::spawn(retention::run_retention_loop(
        state.supervisor.clone(),
        config.cleanup_interval,
        config.job_retention,
    ));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("no se pudo abrir {}", config.bind_addr))?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("error en el servidor HTTP")?;

    retention.abort();
    state.supervisor.shutdown().await;
    info!("master detenido");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("no se pudo escuchar Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("señal de apagado recibida");
}
