//! MCP server: HTTP app, listener task, signals and shutdown.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderName, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use switchboard::{
    Engine, InMemoryEventStore, Lifecycle, McpState, RouterOptions, SessionRegistry,
    ShutdownReport, SESSION_HEADER,
};
use switchconf::SwitchConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Server state for the health endpoint
#[derive(Clone)]
pub struct HealthState {
    pub sessions: Arc<SessionRegistry>,
    pub start_time: Instant,
}

/// Health check endpoint. Always 200.
pub async fn handle_health(State(state): State<HealthState>) -> Json<Value> {
    let stats = state.sessions.stats();

    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": {
            "active": stats.total,
            "streaming": stats.streaming,
        }
    }))
}

/// Informational root endpoint.
pub async fn handle_root() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "endpoints": {
            "mcp": "/mcp",
            "health": "/health",
        }
    }))
}

fn cors_layer() -> CorsLayer {
    let session = HeaderName::from_static(SESSION_HEADER);

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            session.clone(),
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([session])
}

/// Build the HTTP app: `/mcp`, `/health` and `/`.
pub fn app(mcp: Arc<McpState>, start_time: Instant) -> Router {
    let health = HealthState {
        sessions: Arc::clone(&mcp.sessions),
        start_time,
    };

    Router::new()
        .route("/health", get(handle_health))
        .route("/", get(handle_root))
        .with_state(health)
        .nest("/mcp", switchboard::router(mcp))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// Router state for a configuration.
pub fn mcp_state(config: &SwitchConfig, engine: Arc<Engine>) -> McpState {
    let options = RouterOptions {
        keep_alive: config.sessions.keep_alive(),
    };
    let state = McpState::new(engine).with_options(options);

    if config.sessions.resumable {
        state.with_event_store(Arc::new(InMemoryEventStore::new(
            config.sessions.event_store_capacity,
        )))
    } else {
        state
    }
}

/// A bound, serving listener.
pub struct RunningServer {
    pub local_addr: SocketAddr,
    pub state: Arc<McpState>,
    lifecycle: Lifecycle,
    handle: Option<JoinHandle<io::Result<()>>>,
}

impl RunningServer {
    /// Resolve when the listener task ends on its own.
    ///
    /// Only ever an error: the task is meant to run until shutdown.
    pub async fn stopped(&mut self) -> anyhow::Error {
        let Some(handle) = self.handle.as_mut() else {
            return anyhow::anyhow!("listener already stopped");
        };
        let outcome = handle.await;
        self.handle = None;

        match outcome {
            Ok(Ok(())) => anyhow::anyhow!("listener exited unexpectedly"),
            Ok(Err(e)) => anyhow::Error::new(e).context("listener failed"),
            Err(e) => anyhow::Error::new(e).context("listener task panicked"),
        }
    }

    /// Drain every session, stop the listener, close the engine.
    pub async fn shutdown(mut self) -> ShutdownReport {
        self.lifecycle.shutdown(self.handle.take()).await
    }
}

/// Bind the listener and start serving in a background task.
pub async fn start(config: &SwitchConfig, engine: Engine) -> Result<RunningServer> {
    let engine = Arc::new(engine);
    let state = Arc::new(mcp_state(config, Arc::clone(&engine)));

    let addr = config.bind.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;

    let listener_token = CancellationToken::new();
    let lifecycle = Lifecycle::new(Arc::clone(&state.sessions), engine, listener_token.clone())
        .with_close_timeout(config.sessions.close_timeout());

    let router = app(Arc::clone(&state), Instant::now());
    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(listener_token.cancelled_owned())
            .await
    });

    info!(
        addr = %local_addr,
        resumable = config.sessions.resumable,
        "MCP server listening"
    );
    info!("   MCP (Streamable): POST/GET/DELETE http://{}/mcp", local_addr);
    info!("   Health: GET http://{}/health", local_addr);

    Ok(RunningServer {
        local_addr,
        state,
        lifecycle,
        handle: Some(handle),
    })
}

/// Serve until a signal arrives, then shut down.
///
/// Returns an error (exit status 1) when the listener cannot bind or stops
/// on its own before any signal.
pub async fn run(config: SwitchConfig, engine: Engine) -> Result<()> {
    let mut server = start(&config, engine).await?;

    let fault = tokio::select! {
        signal = shutdown_signal() => {
            let signal = signal?;
            info!(signal, "Received signal, shutting down");
            None
        }
        e = server.stopped() => {
            error!(error = %e, "Listener stopped before shutdown was requested");
            Some(e)
        }
    };

    let report = server.shutdown().await;
    if !report.is_clean() {
        warn!(failed = report.failed.len(), "Some sessions did not close cleanly");
    }

    match fault {
        Some(e) => Err(e),
        None => {
            info!("Shutdown complete");
            Ok(())
        }
    }
}

/// Wait for SIGINT, SIGTERM or SIGHUP. Returns the signal name.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to set up SIGHUP")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                Ok("SIGINT")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
            _ = sighup.recv() => Ok("SIGHUP"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for SIGINT")?;
        Ok("SIGINT")
    }
}
