//! MCP surface for the swarm-mail coordination engine.
//!
//! Exposes the engine as MCP tools over the streamable-HTTP transport,
//! mounted on an axum router together with `/healthz` and a Prometheus
//! `/metrics` endpoint. Authentication is a static bearer token and/or a
//! loopback bypass (see [`auth`]).

use anyhow::Result;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use swarm_common::AppConfig;
use swarm_core::Engine;

pub mod auth;
pub mod tools;

pub use tools::CoordService;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[allow(clippy::expect_used)] // Recorder installation is one-time process setup.
fn setup_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Serve the MCP surface over streamable HTTP until SIGINT/SIGTERM.
///
/// The engine reconciles index against archive before the socket is bound,
/// so a crashed predecessor never leaks a half-applied operation into
/// serving traffic.
pub async fn run_http(config: AppConfig) -> Result<()> {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager,
        tower::{StreamableHttpServerConfig, StreamableHttpService},
    };

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    let mcp_path = config.http.path.clone();
    let auth_config = auth::AuthConfig::from_app_config(&config);
    let metrics_handle = setup_metrics();

    let engine = Arc::new(Engine::new(Arc::new(config)).await?);
    let service = CoordService::new(Arc::clone(&engine));

    let session_manager = Arc::new(LocalSessionManager::default());
    let server_config = StreamableHttpServerConfig::default();
    let service_factory =
        move || -> Result<CoordService, std::io::Error> { Ok(service.clone()) };
    let mcp_service = StreamableHttpService::new(service_factory, session_manager, server_config);

    let app = axum::Router::new()
        .route(
            "/healthz",
            get({
                let engine = Arc::clone(&engine);
                move || {
                    let engine = Arc::clone(&engine);
                    async move {
                        match engine.health_check().await {
                            Ok(true) => (axum::http::StatusCode::OK, "ok"),
                            _ => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "index unavailable"),
                        }
                    }
                }
            }),
        )
        .route(
            "/metrics",
            get({
                let handle = metrics_handle.clone();
                move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }
            }),
        )
        .route_service(&mcp_path, mcp_service)
        .layer(axum::middleware::from_fn_with_state(
            auth_config,
            auth::auth_middleware,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    tracing::info!("MCP endpoint: http://{}{}", addr, mcp_path);
    tracing::info!("Health: http://{}/healthz, metrics: http://{}/metrics", addr, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

#[allow(clippy::expect_used)] // Signal handler installation failing is unrecoverable.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Signal received, starting graceful shutdown");
}
