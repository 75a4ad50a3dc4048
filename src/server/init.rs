//! Server initialization and main run loop
//!
//! Contains the `run()` function that wires the registries, the capture
//! engine, and the collaborators, then serves the axum router.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::{Extension, Router};
use flamegate_core::{
    ArtifactStore, CaptureEngine, ConnectionRegistry, DtraceCollector, FlameRenderer,
    FsArtifactStore, HttpArtifactStore, ProcessSupervisor, PsProbe, StackvisRenderer, SystemProbe,
    TaskRegistry, TraceCollector,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::config::{AppConfig, StorageBackend};
use crate::api;
use crate::middleware::auth::require_bearer;
use crate::websocket::gateway::{self, DispatchContext};

/// Run the gateway
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting flamegate v{}", env!("CARGO_PKG_VERSION"));

    let supervisor = Arc::new(ProcessSupervisor::new());
    let store = build_store(&config)?;
    let probe: Arc<dyn SystemProbe> = Arc::new(PsProbe::new());
    let tasks = Arc::new(TaskRegistry::new());
    let connections = Arc::new(ConnectionRegistry::new());

    let collector: Arc<dyn TraceCollector> = Arc::new(DtraceCollector::new(
        config.capture.collector_command.clone(),
    ));
    let renderer: Arc<dyn FlameRenderer> = Arc::new(StackvisRenderer::with_args(
        config.capture.renderer_command.clone(),
        config.capture.renderer_args.clone(),
    ));

    let engine = Arc::new(CaptureEngine::new(
        Arc::clone(&tasks),
        Arc::clone(&connections),
        Arc::clone(&supervisor),
        collector,
        renderer,
        Arc::clone(&store),
        config.engine_config(),
    ));

    let ctx = DispatchContext {
        engine,
        connections,
        supervisor,
        store,
        probe: Arc::clone(&probe),
        snapshot: config.snapshot_config(),
        stream: config.stream_config(),
    };

    let mut app = Router::new()
        .route("/healthcheck", get(api::health::healthcheck))
        .route("/processes", get(api::processes::list))
        .route("/tasks", get(api::tasks::list))
        .route("/ws", get(gateway::ws_handler_anonymous))
        .route("/ws/:session_id", get(gateway::ws_handler))
        .layer(Extension(ctx))
        .layer(Extension(tasks))
        .layer(Extension(probe))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    match config.auth.token.clone().filter(|token| !token.is_empty()) {
        Some(token) => {
            app = app.layer(axum::middleware::from_fn_with_state(
                Arc::new(token),
                require_bearer,
            ));
        }
        None => warn!("no auth token configured; every client is trusted"),
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "flamegate gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

fn build_store(config: &AppConfig) -> Result<Arc<dyn ArtifactStore>> {
    match config.storage.backend {
        StorageBackend::Fs => {
            info!(root = %config.storage.root, "using filesystem artifact store");
            Ok(Arc::new(FsArtifactStore::new(&config.storage.root)))
        }
        StorageBackend::Http => {
            let url = config
                .storage
                .url
                .clone()
                .context("storage.url is required for the http backend")?;
            info!(url = %url, "using http artifact store");
            Ok(Arc::new(HttpArtifactStore::new(
                url,
                config.storage.token.clone(),
            )))
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
