//! MCP Request Router
//!
//! Decides, for every request on the MCP endpoint, which session transport
//! handles it:
//!
//! | token | registry | body         | route                              |
//! |-------|----------|--------------|------------------------------------|
//! | yes   | hit      | any          | existing transport                 |
//! | no    | -        | initialize   | new transport, id from handshake   |
//! | yes   | miss     | any          | new transport using the token      |
//! | no    | -        | other        | 400 `-32000`                       |
//!
//! GET and DELETE only ever reach existing sessions.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;

use crate::engine::{Engine, EngineError};
use crate::event_store::EventStore;
use crate::session::{Session, SessionRegistry};
use crate::transport::{
    json_rpc_error, plain_error, session_token, IncomingRequest, StreamableTransport,
    TransportOptions, DEFAULT_KEEP_ALIVE,
};
use crate::types::error::ErrorData;
use crate::types::jsonrpc::is_initialize_request;

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// SSE keep-alive interval for standalone streams.
    pub keep_alive: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

/// Shared state for MCP handlers.
pub struct McpState {
    /// Protocol engine shared by every session.
    pub engine: Arc<Engine>,

    /// Live sessions.
    pub sessions: Arc<SessionRegistry>,

    /// Event store for resumable streams, if enabled.
    pub event_store: Option<Arc<dyn EventStore>>,

    pub options: RouterOptions,
}

impl McpState {
    /// Create state with an empty registry and no event store.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            sessions: SessionRegistry::new_shared(),
            event_store: None,
            options: RouterOptions::default(),
        }
    }

    /// Use an existing registry (shared with the lifecycle controller).
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Enable resumability.
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    pub fn with_options(mut self, options: RouterOptions) -> Self {
        self.options = options;
        self
    }

    fn transport_options(&self, base: TransportOptions) -> TransportOptions {
        base.with_event_store(self.event_store.clone())
            .with_keep_alive(self.options.keep_alive)
    }

    fn install_close_hook(&self, transport: &StreamableTransport) {
        let sessions = Arc::downgrade(&self.sessions);
        transport.on_close(move |id| {
            if let Some(sessions) = sessions.upgrade() {
                sessions.remove(&id);
            }
        });
    }

    /// Build a transport whose id is assigned by the initialize handshake.
    /// It registers itself when the handshake is accepted.
    fn new_session(&self) -> Result<Arc<StreamableTransport>, EngineError> {
        let transport = StreamableTransport::new(self.transport_options(TransportOptions::generated()));

        let sessions = Arc::downgrade(&self.sessions);
        transport.on_session_initialized(move |id, transport| {
            if let Some(sessions) = sessions.upgrade() {
                sessions.insert(Session::new(id, transport));
            }
        });
        self.install_close_hook(&transport);

        self.engine.connect(&transport)?;
        Ok(transport)
    }

    /// Get or create the transport for a client-supplied token.
    fn adopt_session(&self, id: &str) -> Result<Arc<StreamableTransport>, EngineError> {
        let (transport, _created) = self.sessions.adopt(id, || {
            let transport = StreamableTransport::new(
                self.transport_options(TransportOptions::with_session_id(id)),
            );
            self.install_close_hook(&transport);
            self.engine.connect(&transport)?;
            Ok(transport)
        })?;
        Ok(transport)
    }
}

/// Routing decision for a POST.
#[derive(Debug)]
pub enum PostRoute {
    /// Token names a live session.
    Existing(Arc<StreamableTransport>),
    /// No token and an initialize body: start a new session.
    Initialize,
    /// Token names no live session: create one under that token.
    Adopt(String),
    /// No token and not an initialize body.
    Reject,
}

/// Apply the routing table to a POST.
pub fn route_post(sessions: &SessionRegistry, token: Option<&str>, body: &Value) -> PostRoute {
    match token {
        Some(token) => match sessions.get(token) {
            Some(transport) => PostRoute::Existing(transport),
            None => PostRoute::Adopt(token.to_string()),
        },
        None if is_initialize_request(body) => PostRoute::Initialize,
        None => PostRoute::Reject,
    }
}

/// Build the MCP router.
///
/// Routes (mount under `/mcp`):
/// - POST / - client messages
/// - GET / - standalone SSE stream
/// - DELETE / - session termination
pub fn router(state: Arc<McpState>) -> Router {
    Router::new()
        .route(
            "/",
            post(post_handler)
                .get(get_handler)
                .delete(delete_handler)
                .fallback(method_not_allowed),
        )
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

#[tracing::instrument(skip(state, headers, body), fields(session_id = tracing::field::Empty))]
async fn post_handler(State(state): State<Arc<McpState>>, headers: HeaderMap, body: Bytes) -> Response {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting unparseable body");
            return json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorData::parse_error("Parse error: Invalid JSON"),
            );
        }
    };

    let token = session_token(&headers).map(str::to_string);
    if let Some(ref id) = token {
        tracing::Span::current().record("session_id", id.as_str());
    }

    let transport = match route_post(&state.sessions, token.as_deref(), &parsed) {
        PostRoute::Existing(transport) => transport,
        PostRoute::Initialize => match state.new_session() {
            Ok(transport) => transport,
            Err(e) => return internal_error(&e),
        },
        PostRoute::Adopt(id) => match state.adopt_session(&id) {
            Ok(transport) => transport,
            Err(e) => return internal_error(&e),
        },
        PostRoute::Reject => {
            tracing::debug!("POST without session id or initialize body");
            return json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorData::server_error("Bad Request: No valid session ID provided"),
            );
        }
    };

    let request = IncomingRequest::new(Method::POST, headers).with_body(parsed);
    match transport.handle_request(request).await {
        Ok(response) => response,
        Err(e) => internal_error(&e),
    }
}

#[tracing::instrument(skip(state, headers), fields(session_id = tracing::field::Empty))]
async fn get_handler(State(state): State<Arc<McpState>>, headers: HeaderMap) -> Response {
    forward_to_session(&state, Method::GET, headers).await
}

#[tracing::instrument(skip(state, headers), fields(session_id = tracing::field::Empty))]
async fn delete_handler(State(state): State<Arc<McpState>>, headers: HeaderMap) -> Response {
    forward_to_session(&state, Method::DELETE, headers).await
}

/// GET and DELETE: the token must name a live session.
async fn forward_to_session(state: &McpState, method: Method, headers: HeaderMap) -> Response {
    let Some(id) = session_token(&headers).map(str::to_string) else {
        return plain_error(StatusCode::BAD_REQUEST, "Invalid or missing session ID");
    };
    tracing::Span::current().record("session_id", id.as_str());

    let Some(transport) = state.sessions.get(&id) else {
        return plain_error(StatusCode::BAD_REQUEST, "Invalid or missing session ID");
    };

    match transport.handle_request(IncomingRequest::new(method, headers)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(session_id = %id, error = %e, "Transport failed");
            plain_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn method_not_allowed() -> Response {
    let mut response = json_rpc_error(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorData::server_error("Method not allowed."),
    );
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
    response
}

fn internal_error(error: &dyn std::error::Error) -> Response {
    tracing::error!(error = %error, "Error handling MCP request");
    json_rpc_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorData::internal_error("Internal server error"),
    )
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    tracing::error!(panic = %detail, "MCP handler panicked");

    json_rpc_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorData::internal_error("Internal server error"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn init_body() -> Value {
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} })
    }

    fn call_body() -> Value {
        json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": { "name": "greet" } })
    }

    #[test]
    fn test_route_existing_session() {
        let sessions = SessionRegistry::new();
        let transport = StreamableTransport::new(TransportOptions::with_session_id("s1"));
        sessions.insert(Session::new("s1", Arc::clone(&transport)));

        // An initialize body does not override a hit.
        for body in [call_body(), init_body()] {
            match route_post(&sessions, Some("s1"), &body) {
                PostRoute::Existing(found) => assert!(Arc::ptr_eq(&found, &transport)),
                other => panic!("expected Existing, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_route_initialize_without_token() {
        let sessions = SessionRegistry::new();
        assert!(matches!(
            route_post(&sessions, None, &init_body()),
            PostRoute::Initialize
        ));
    }

    #[test]
    fn test_route_adopts_unknown_token_verbatim() {
        let sessions = SessionRegistry::new();
        match route_post(&sessions, Some("client-chosen"), &call_body()) {
            PostRoute::Adopt(id) => assert_eq!(id, "client-chosen"),
            other => panic!("expected Adopt, got {:?}", other),
        }
    }

    #[test]
    fn test_route_rejects_tokenless_non_initialize() {
        let sessions = SessionRegistry::new();
        assert!(matches!(
            route_post(&sessions, None, &call_body()),
            PostRoute::Reject
        ));
        assert!(matches!(
            route_post(&sessions, None, &json!("not even an object")),
            PostRoute::Reject
        ));
    }

    #[tokio::test]
    async fn test_adopt_after_engine_closed_fails() {
        let engine = Arc::new(Engine::new("test", "0.0.0"));
        let state = McpState::new(Arc::clone(&engine));
        engine.close().await;

        assert!(matches!(state.adopt_session("x"), Err(EngineError::Closed)));
        assert!(state.sessions.is_empty());
    }
}
