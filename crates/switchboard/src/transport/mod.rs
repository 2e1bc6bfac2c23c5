//! MCP Streamable HTTP Transport
//!
//! One [`StreamableTransport`] per session. It frames JSON-RPC traffic onto
//! HTTP requests:
//!
//! - POST - client-to-server messages, answered with JSON (or 202 when the
//!   body held only notifications and responses)
//! - GET - the session's standalone SSE stream for server-to-client messages,
//!   resumable with `Last-Event-ID` when an event store is configured
//! - DELETE - session termination
//!
//! The session id travels in the `mcp-session-id` header.

mod streamable;

pub use streamable::IncomingRequest;
pub(crate) use streamable::{json_rpc_error, plain_error};

use axum::http::HeaderMap;
use axum::response::sse::Event;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::event_store::{EventId, EventStore, EventStoreError};
use crate::types::jsonrpc::JsonRpcMessage;
use crate::types::logging::LogLevel;

/// Header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Header a reconnecting client uses to resume its stream.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Header carrying the negotiated protocol version.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Default SSE keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Buffered events per standalone stream before live delivery drops them.
const STREAM_BUFFER: usize = 64;

type InitHook = Box<dyn FnOnce(String, Arc<StreamableTransport>) + Send>;
type CloseHook = Box<dyn FnOnce(String) + Send>;

/// Errors raised by a transport outside the protocol error responses it
/// writes itself.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `handle_request` was called before `Engine::connect`.
    #[error("transport is not connected to an engine")]
    NotConnected,

    /// The transport was closed.
    #[error("transport is closed")]
    Closed,

    /// The event store failed.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a transport is constructed.
#[derive(Clone)]
pub struct TransportOptions {
    session_id: Option<String>,
    event_store: Option<Arc<dyn EventStore>>,
    keep_alive: Duration,
}

impl TransportOptions {
    /// The session id is generated (UUID v4) at the initialize handshake.
    pub fn generated() -> Self {
        Self {
            session_id: None,
            event_store: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// The session id is fixed up front, typically a client-supplied token.
    pub fn with_session_id(id: impl Into<String>) -> Self {
        Self {
            session_id: Some(id.into()),
            ..Self::generated()
        }
    }

    /// Store server-to-client messages for resumability.
    pub fn with_event_store(mut self, store: Option<Arc<dyn EventStore>>) -> Self {
        self.event_store = store;
        self
    }

    /// SSE keep-alive interval.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("session_id", &self.session_id)
            .field("event_store", &self.event_store.is_some())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// Per-session Streamable HTTP transport.
pub struct StreamableTransport {
    session_id: OnceLock<String>,
    fixed_id: bool,
    initialized: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    engine: OnceLock<Arc<Engine>>,
    event_store: Option<Arc<dyn EventStore>>,
    keep_alive: Duration,
    standalone: Mutex<Option<mpsc::Sender<Event>>>,
    log_level: AtomicU8,
    on_initialized: StdMutex<Option<InitHook>>,
    on_close: StdMutex<Option<CloseHook>>,
}

impl StreamableTransport {
    /// Create a transport. It must be connected with `Engine::connect`
    /// before it can handle requests.
    pub fn new(options: TransportOptions) -> Arc<Self> {
        let session_id = OnceLock::new();
        let fixed_id = match options.session_id {
            Some(id) => {
                let _ = session_id.set(id);
                true
            }
            None => false,
        };

        Arc::new(Self {
            session_id,
            fixed_id,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            engine: OnceLock::new(),
            event_store: options.event_store,
            keep_alive: options.keep_alive,
            standalone: Mutex::new(None),
            log_level: AtomicU8::new(LogLevel::default().as_u8()),
            on_initialized: StdMutex::new(None),
            on_close: StdMutex::new(None),
        })
    }

    /// The session id, once known.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.get().map(String::as_str)
    }

    /// Whether the initialize handshake has been accepted.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Called once, with the session id, when an initialize request is
    /// accepted and before it is dispatched.
    pub fn on_session_initialized<F>(&self, hook: F)
    where
        F: FnOnce(String, Arc<StreamableTransport>) + Send + 'static,
    {
        *lock_slot(&self.on_initialized) = Some(Box::new(hook));
    }

    /// Called once, with the session id, when the transport closes.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce(String) + Send + 'static,
    {
        *lock_slot(&self.on_close) = Some(Box::new(hook));
    }

    pub(crate) fn attach_engine(&self, engine: Arc<Engine>) -> bool {
        self.engine.set(engine).is_ok()
    }

    /// The engine this transport is connected to.
    pub fn engine(&self) -> Option<&Arc<Engine>> {
        self.engine.get()
    }

    /// Minimum level of `notifications/message` the client wants.
    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.log_level.load(Ordering::Relaxed))
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.log_level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Whether a message at `level` passes the client's filter.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level >= self.log_level()
    }

    /// Whether a client is currently attached to the standalone stream.
    pub fn has_live_stream(&self) -> bool {
        match self.standalone.try_lock() {
            Ok(slot) => slot.as_ref().is_some_and(|tx| !tx.is_closed()),
            // Locked means a GET or notify is mid-flight on the stream.
            Err(_) => true,
        }
    }

    /// Send a server-originated message to the client.
    ///
    /// The message is stored in the event store first (when configured),
    /// then written to the standalone stream if one is attached. Returns the
    /// event id when stored.
    pub async fn notify(&self, message: &JsonRpcMessage) -> Result<Option<EventId>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let value = serde_json::to_value(message)?;
        let mut slot = self.standalone.lock().await;

        let event_id = match (&self.event_store, self.session_id()) {
            (Some(store), Some(id)) => Some(store.store_event(id, &value).await?),
            _ => None,
        };

        match slot.as_ref() {
            Some(tx) => {
                let event = sse_event(&value, event_id.as_deref());
                match tx.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            session_id = ?self.session_id(),
                            method = %message.method,
                            "SSE buffer full; message not delivered live"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(session_id = ?self.session_id(), "SSE client went away");
                        *slot = None;
                    }
                }
            }
            None => {
                tracing::debug!(
                    session_id = ?self.session_id(),
                    method = %message.method,
                    stored = event_id.is_some(),
                    "No live stream for server message"
                );
            }
        }

        Ok(event_id)
    }

    /// Tear the transport down. Idempotent.
    ///
    /// Ends the SSE stream, fires the close hook, detaches from the engine
    /// and forgets the session's stored events. Only the last step can fail,
    /// and the hook has fired by then.
    pub async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.cancel.cancel();
        self.standalone.lock().await.take();

        // Taken first: an initialize racing this close either registered
        // already (and the close hook below removes it) or sees `closed`.
        lock_slot(&self.on_initialized).take();
        let session_id = self.session_id().map(str::to_string);
        let hook = lock_slot(&self.on_close).take();

        if let (Some(id), Some(hook)) = (session_id.clone(), hook) {
            hook(id);
        }

        if let Some(engine) = self.engine.get() {
            engine.disconnect(self);
        }

        tracing::info!(session_id = ?session_id, "Transport closed");

        if let (Some(store), Some(id)) = (&self.event_store, session_id) {
            store.forget_stream(&id).await?;
        }

        Ok(())
    }
}

impl fmt::Debug for StreamableTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableTransport")
            .field("session_id", &self.session_id())
            .field("initialized", &self.is_initialized())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// The `mcp-session-id` header, trimmed. Empty values count as absent.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn lock_slot<T>(slot: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// SSE frame for a JSON-RPC message.
fn sse_event(message: &serde_json::Value, event_id: Option<&str>) -> Event {
    let event = Event::default().event("message").data(message.to_string());
    match event_id {
        Some(id) => event.id(id),
        None => event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use axum::http::HeaderValue;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_fixed_id_known_up_front() {
        let transport = StreamableTransport::new(TransportOptions::with_session_id("client-token"));
        assert_eq!(transport.session_id(), Some("client-token"));
        assert!(!transport.is_initialized());

        let generated = StreamableTransport::new(TransportOptions::generated());
        assert_eq!(generated.session_id(), None);
    }

    #[test]
    fn test_session_token_is_trimmed() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(SESSION_HEADER, HeaderValue::from_static("  "));
        assert_eq!(session_token(&headers), None);

        headers.insert(SESSION_HEADER, HeaderValue::from_static(" abc "));
        assert_eq!(session_token(&headers), Some("abc"));
    }

    #[tokio::test]
    async fn test_close_fires_hook_once() {
        let transport = StreamableTransport::new(TransportOptions::with_session_id("s1"));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        transport.on_close(move |id| {
            assert_eq!(id, "s1");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert!(transport.is_closed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notify_after_close_fails() {
        let transport = StreamableTransport::new(TransportOptions::with_session_id("s1"));
        transport.close().await.unwrap();

        let msg = JsonRpcMessage::notification("notifications/message", json!({}));
        assert!(matches!(transport.notify(&msg).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_notify_without_stream_is_stored() {
        let store = Arc::new(InMemoryEventStore::new(8));
        let transport = StreamableTransport::new(
            TransportOptions::with_session_id("s1")
                .with_event_store(Some(store.clone() as Arc<dyn EventStore>)),
        );

        let msg = JsonRpcMessage::notification("notifications/message", json!({ "n": 1 }));
        let id = transport.notify(&msg).await.unwrap();

        assert_eq!(id.as_deref(), Some("s1_1"));
        assert_eq!(store.len().await, 1);
        assert!(!transport.has_live_stream());
    }

    #[tokio::test]
    async fn test_close_forgets_stored_events() {
        let store = Arc::new(InMemoryEventStore::new(8));
        let transport = StreamableTransport::new(
            TransportOptions::with_session_id("s1")
                .with_event_store(Some(store.clone() as Arc<dyn EventStore>)),
        );

        let msg = JsonRpcMessage::notification("notifications/message", json!({}));
        transport.notify(&msg).await.unwrap();
        transport.close().await.unwrap();

        assert!(store.is_empty().await);
    }

    #[test]
    fn test_log_level_filter() {
        let transport = StreamableTransport::new(TransportOptions::generated());
        assert!(transport.should_log(LogLevel::Info));
        assert!(!transport.should_log(LogLevel::Debug));

        transport.set_log_level(LogLevel::Error);
        assert!(!transport.should_log(LogLevel::Warning));
        assert!(transport.should_log(LogLevel::Critical));
    }
}
