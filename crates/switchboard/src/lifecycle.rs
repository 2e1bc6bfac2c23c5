//! Graceful shutdown.
//!
//! Order of operations:
//! 1. Snapshot the registered session ids
//! 2. Close every transport (bounded per session) and remove it from the
//!    registry, recording failures without stopping
//! 3. Cancel the listener token and wait for the server task
//! 4. Close the protocol engine
//!
//! The caller exits once [`Lifecycle::shutdown`] returns.

use futures::future::join_all;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::session::SessionRegistry;

/// Default bound on closing one session.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions closed cleanly.
    pub closed: usize,

    /// Sessions whose close failed or timed out, with the reason.
    pub failed: Vec<(String, String)>,
}

impl ShutdownReport {
    /// True when every session closed cleanly.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Close and remove every registered session.
///
/// Sessions are closed concurrently, each under `timeout`. A failing or stuck
/// close is recorded and its id is removed anyway, so the registry is empty
/// afterwards (apart from sessions created while draining).
pub async fn drain_sessions(sessions: &SessionRegistry, timeout: Duration) -> ShutdownReport {
    let ids = sessions.ids();
    info!(sessions = ids.len(), "Draining sessions");

    let closes = ids.into_iter().map(|id| async move {
        let outcome = match sessions.get(&id) {
            // Removed concurrently (DELETE or close hook); nothing to do.
            None => Ok(()),
            Some(transport) => match tokio::time::timeout(timeout, transport.close()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("close timed out after {:?}", timeout)),
            },
        };
        sessions.remove(&id);
        (id, outcome)
    });

    let mut report = ShutdownReport::default();
    for (id, outcome) in join_all(closes).await {
        match outcome {
            Ok(()) => report.closed += 1,
            Err(reason) => {
                warn!(session_id = %id, reason = %reason, "Failed to close session");
                report.failed.push((id, reason));
            }
        }
    }

    report
}

/// Drives the shutdown sequence for one server instance.
pub struct Lifecycle {
    sessions: Arc<SessionRegistry>,
    engine: Arc<Engine>,
    listener: CancellationToken,
    close_timeout: Duration,
}

impl Lifecycle {
    /// `listener` is the token the HTTP server's graceful shutdown waits on.
    pub fn new(sessions: Arc<SessionRegistry>, engine: Arc<Engine>, listener: CancellationToken) -> Self {
        Self {
            sessions,
            engine,
            listener,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Bound on closing each session, and on waiting for the listener.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Run the full shutdown sequence.
    ///
    /// `server` is the task running the HTTP listener, if any. Partial
    /// failures are logged and reported, never returned as errors.
    pub async fn shutdown(&self, server: Option<JoinHandle<io::Result<()>>>) -> ShutdownReport {
        let report = drain_sessions(&self.sessions, self.close_timeout).await;

        self.listener.cancel();
        if let Some(mut server) = server {
            match tokio::time::timeout(self.close_timeout, &mut server).await {
                Ok(Ok(Ok(()))) => info!("Listener closed"),
                Ok(Ok(Err(e))) => warn!(error = %e, "Listener exited with an error"),
                Ok(Err(e)) => warn!(error = %e, "Listener task failed"),
                Err(_) => {
                    warn!(timeout = ?self.close_timeout, "Listener did not stop in time; aborting");
                    server.abort();
                }
            }
        }

        self.engine.close().await;

        info!(
            closed = report.closed,
            failed = report.failed.len(),
            "Shutdown complete"
        );
        report
    }
}
