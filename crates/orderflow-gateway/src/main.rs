//! HTTP ingress binary (§6): wires a [`orderflow_runtime::Runtime`] behind
//! an axum router exposing order creation, lookup, cancel, queue status,
//! realtime stream, and liveness.
//!
//! Grounded on the teacher's `toka-orchestration-service::main` — a `clap`
//! CLI, `tracing-subscriber` `EnvFilter` init, a config load, a runtime
//! build, an axum app, then `tokio::select!` racing the server against a
//! shutdown signal.

mod error;
mod routes;
mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use orderflow_runtime::{AppConfig, Publisher, Runtime, Store, StoreConfig};

use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "orderflow-gateway", about = "Order fulfillment HTTP gateway")]
struct Cli {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Log level for every orderflow crate (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = AppConfig::load()?;

    match config.store.clone() {
        StoreConfig::Memory => {
            let runtime = Runtime::in_memory(config).await?;
            serve(runtime, cli.port).await
        }
        StoreConfig::Postgres { .. } => {
            let runtime = Runtime::postgres(config).await?;
            serve(runtime, cli.port).await
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "orderflow_gateway={level},orderflow_runtime={level},orderflow_saga={level},orderflow_admission={level}"
        ))
    });
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

fn build_router<S: Store + 'static, P: Publisher + 'static>(state: AppState<S, P>) -> Router {
    Router::new()
        .route("/orders", post(routes::create_order::<S, P>))
        .route("/orders/:id", get(routes::get_order::<S, P>))
        .route("/orders/:id/cancel", post(routes::cancel_order::<S, P>))
        .route("/orders/queue/status", get(routes::queue_status::<S, P>))
        .route("/orders/:id/stream", get(routes::order_stream::<S, P>))
        .route("/healthz", get(routes::healthz))
        .fallback(routes::fallback_not_found)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn serve<S: Store + 'static, P: Publisher + 'static>(runtime: Runtime<S, P>, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(runtime);
    let runtime = state.runtime.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "orderflow-gateway listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited with error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let runtime = Arc::try_unwrap(runtime).unwrap_or_else(|_| panic!("runtime still has outstanding references at shutdown"));
    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
