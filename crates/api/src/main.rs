//! API server entry point.

use std::error::Error;
use std::sync::Arc;

use api::{AppState, Config};
use jobs::{InMemoryJobStore, JobStore, PostgresJobStore};
use metrics_exporter_prometheus::PrometheusHandle;
use reservations::{InMemoryReservationStore, PostgresReservationStore, ReservationStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Serves `state` until a shutdown signal, then stops the background tasks.
async fn serve<R: ReservationStore + 'static, J: JobStore + 'static>(
    config: &Config,
    state: AppState<R, J>,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn Error>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = state.spawn_background_tasks(config, shutdown_rx);

    let app = api::create_app(Arc::new(state), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Receivers may already be gone if a task exited early.
    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "background task panicked");
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick storage and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(20).connect(url).await?;
            let reservation_store = PostgresReservationStore::new(pool.clone());
            reservation_store.run_migrations().await?;
            tracing::info!("using PostgreSQL storage");

            let state =
                AppState::from_config(reservation_store, PostgresJobStore::new(pool), &config)?;
            serve(&config, state, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            let state = AppState::from_config(
                InMemoryReservationStore::new(),
                InMemoryJobStore::new(),
                &config,
            )?;
            serve(&config, state, metrics_handle).await
        }
    }
}
