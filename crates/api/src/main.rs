//! Atrium API server binary entrypoint.

use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use atrium_common::config::AppConfig;
use atrium_common::db::{create_pool, run_migrations};
use atrium_engine::{Scheduler, SchedulerConfig};

use atrium_api::routes::create_router;
use atrium_api::state::AppState;

const DEFAULT_FILTER: &str =
    "atrium_api=debug,atrium_engine=debug,atrium_notifier=debug,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Atrium API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");
    run_migrations(&pool).await?;

    let scheduler = Scheduler::start(SchedulerConfig::from(&config.scheduler));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let state = AppState::new(pool, config, scheduler.clone());

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining deferred tasks");
    let report = scheduler.shutdown().await;
    if report.drained {
        tracing::info!(completed = report.stats.finished(), "Deferred tasks drained");
    } else {
        tracing::warn!(
            abandoned = report.abandoned,
            finished = report.stats.finished(),
            "Drain deadline passed, deferred tasks abandoned"
        );
    }

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
