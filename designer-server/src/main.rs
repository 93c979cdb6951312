//! # Touch Designer Server
//!
//! Local server that stores touch panel projects, compiles them to ESPHome
//! configuration and deploys the result into the ESPHome config directory.

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use designer_server::metrics;
use designer_server::{app, AppState, ServerArgs, ServerConfig};

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels
/// (default: info,designer_server=debug,designer_core=debug,tower_http=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,designer_server=debug,designer_core=debug,tower_http=debug")
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_tracing();

    let metrics_handle = metrics::init_metrics()
        .map_err(|e| anyhow::anyhow!("Failed to initialize Prometheus metrics: {}", e))?;
    tracing::info!("Prometheus metrics initialized");

    let config = ServerConfig::from(args);
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Deploy directory: {}", config.deploy_dir.display());

    let state = AppState::from_config(&config)?;
    tracing::info!(
        "Loaded {} widget schema(s) and {} device(s)",
        state.registry.len(),
        state.devices.list().len()
    );

    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    let router = app(state, config.addr.port()).merge(metrics_router);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!("Touch designer server listening on http://{}", config.addr);
    if !config.addr.ip().is_loopback() {
        tracing::warn!("Bound to a non-loopback address; the API has no authentication");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Prometheus metrics endpoint.
#[tracing::instrument(name = "metrics", skip(handle))]
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
