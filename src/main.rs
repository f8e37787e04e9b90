use std::sync::Arc;

use courier_dispatch::api;
use courier_dispatch::config::{Config, LogFormat};
use courier_dispatch::engine::scheduler::spawn_scheduler;
use courier_dispatch::error::AppError;
use courier_dispatch::realtime::bus::run_event_fanout;
use courier_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let http_port = config.http_port;
    let (app_state, queue_rx) = AppState::new(config);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    let fanout = tokio::spawn(run_event_fanout(shared_state.bus.clone(), queue_rx));
    let scheduled = spawn_scheduler(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")));

    for task in scheduled {
        task.abort();
    }
    fanout.abort();
    shared_state.close();
    tracing::info!("shutdown complete");

    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
