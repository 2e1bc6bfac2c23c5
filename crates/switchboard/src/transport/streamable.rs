//! Streamable HTTP request handling
//!
//! Method dispatch and header validation for one transport:
//! - POST - validate headers and body, run the initialize handshake or check
//!   the session, dispatch to the engine, answer JSON
//! - GET - open (or resume) the standalone SSE stream
//! - DELETE - close the transport

use axum::{
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{future::join_all, stream, StreamExt};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::{
    lock_slot, session_token, sse_event, StreamableTransport, TransportError, LAST_EVENT_ID_HEADER,
    PROTOCOL_VERSION_HEADER, SESSION_HEADER, STREAM_BUFFER,
};
use crate::engine::Engine;
use crate::event_store::EventStore;
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{
    ClientBatch, ClientMessage, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcResponse,
};
use crate::types::protocol::is_supported_version;

/// An HTTP request as the transport sees it.
///
/// `body` is the already-parsed JSON body for POST; `None` for GET/DELETE.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl IncomingRequest {
    pub fn new(method: Method, headers: HeaderMap) -> Self {
        Self {
            method,
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl StreamableTransport {
    /// Handle one HTTP request for this session.
    ///
    /// Protocol-level rejections are returned as `Ok` responses with the
    /// appropriate status. `Err` means the transport itself failed and the
    /// caller should answer 500.
    pub async fn handle_request(
        self: &Arc<Self>,
        request: IncomingRequest,
    ) -> Result<Response, TransportError> {
        if self.is_closed() {
            return Ok(json_rpc_error(StatusCode::NOT_FOUND, ErrorData::session_not_found()));
        }

        match request.method {
            Method::POST => self.handle_post(request).await,
            Method::GET => self.handle_get(request).await,
            Method::DELETE => self.handle_delete(request).await,
            _ => {
                let mut response = json_rpc_error(
                    StatusCode::METHOD_NOT_ALLOWED,
                    ErrorData::server_error("Method not allowed."),
                );
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
                Ok(response)
            }
        }
    }

    async fn handle_post(self: &Arc<Self>, request: IncomingRequest) -> Result<Response, TransportError> {
        let engine = self.engine.get().cloned().ok_or(TransportError::NotConnected)?;

        if let Some(accept) = request.header(header::ACCEPT.as_str()) {
            if !accepts(accept, &["application/json", "text/event-stream", "*/*"]) {
                return Ok(json_rpc_error(
                    StatusCode::NOT_ACCEPTABLE,
                    ErrorData::server_error("Not Acceptable: Client must accept application/json"),
                ));
            }
        }

        let content_type = request.header(header::CONTENT_TYPE.as_str()).unwrap_or_default();
        if !content_type.to_ascii_lowercase().starts_with("application/json") {
            return Ok(json_rpc_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ErrorData::server_error(
                    "Unsupported Media Type: Content-Type must be application/json",
                ),
            ));
        }

        let Some(body) = request.body.clone() else {
            return Ok(json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorData::parse_error("Parse error: Invalid JSON"),
            ));
        };

        let batch = match ClientBatch::parse(body) {
            Ok(batch) => batch,
            Err(e) => {
                return Ok(json_rpc_error(
                    StatusCode::BAD_REQUEST,
                    ErrorData::with_data(
                        ErrorData::PARSE_ERROR,
                        "Parse error: Invalid JSON-RPC message",
                        Value::String(e.message),
                    ),
                ));
            }
        };

        if batch.has_initialize() {
            if let Some(rejection) = self.accept_initialize(&batch) {
                return Ok(rejection);
            }
        } else {
            if let Some(rejection) = self.validate_session(&request) {
                return Ok(rejection);
            }
            if let Some(rejection) = validate_protocol_version(&request) {
                return Ok(rejection);
            }
        }

        let session_id = self.session_id().map(str::to_string);

        let mut requests = Vec::new();
        for message in batch.messages {
            match message {
                ClientMessage::Request(m) => requests.push(m),
                ClientMessage::Notification(m) => {
                    if let Err(e) = engine.dispatch(self, &m).await {
                        tracing::debug!(method = %m.method, error = %e, "Notification handler failed");
                    }
                }
                ClientMessage::Response(v) => {
                    tracing::debug!(
                        session_id = ?session_id,
                        id = %v.get("id").unwrap_or(&serde_json::Value::Null),
                        "Ignoring client response to a server request"
                    );
                }
            }
        }

        if requests.is_empty() {
            return Ok(with_session_header(StatusCode::ACCEPTED.into_response(), session_id.as_deref()));
        }

        let responses = join_all(requests.iter().map(|m| respond(&engine, self, m))).await;
        let responses = responses.into_iter().collect::<Result<Vec<_>, _>>()?;

        let body = if batch.is_batch {
            Value::Array(responses)
        } else {
            responses.into_iter().next().unwrap_or(Value::Null)
        };

        Ok(with_session_header(
            (StatusCode::OK, Json(body)).into_response(),
            session_id.as_deref(),
        ))
    }

    /// Initialize handshake checks. Fires the init hook on success.
    fn accept_initialize(self: &Arc<Self>, batch: &ClientBatch) -> Option<Response> {
        if self.is_initialized() {
            return Some(json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorData::invalid_request("Invalid Request: Server already initialized"),
            ));
        }
        if batch.messages.len() > 1 {
            return Some(json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorData::invalid_request("Invalid Request: Only one initialization request is allowed"),
            ));
        }
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Some(json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorData::invalid_request("Invalid Request: Server already initialized"),
            ));
        }

        let id = self
            .session_id
            .get_or_init(|| Uuid::new_v4().to_string())
            .clone();

        // `close` takes this slot before reading the id, so holding it while
        // the hook runs keeps registration and removal in order.
        let mut slot = lock_slot(&self.on_initialized);
        if self.is_closed() {
            tracing::debug!(session_id = %id, "Transport closed during initialize");
            return Some(json_rpc_error(StatusCode::NOT_FOUND, ErrorData::session_not_found()));
        }
        tracing::info!(session_id = %id, "Session initialized");
        if let Some(hook) = slot.take() {
            hook(id, Arc::clone(self));
        }

        None
    }

    /// Check the session header of a non-initialize request.
    fn validate_session(&self, request: &IncomingRequest) -> Option<Response> {
        if !self.fixed_id && !self.is_initialized() {
            return Some(json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorData::server_error("Bad Request: Server not initialized"),
            ));
        }

        match session_token(&request.headers) {
            None => Some(json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorData::server_error("Bad Request: Mcp-Session-Id header is required"),
            )),
            Some(id) if Some(id) != self.session_id() => Some(json_rpc_error(
                StatusCode::NOT_FOUND,
                ErrorData::session_not_found(),
            )),
            Some(_) => None,
        }
    }

    async fn handle_get(self: &Arc<Self>, request: IncomingRequest) -> Result<Response, TransportError> {
        if self.engine.get().is_none() {
            return Err(TransportError::NotConnected);
        }

        let accept = request.header(header::ACCEPT.as_str()).unwrap_or_default();
        if !accepts(accept, &["text/event-stream"]) {
            return Ok(plain_error(
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable: Client must accept text/event-stream",
            ));
        }

        if let Some(rejection) = self.validate_session(&request) {
            return Ok(rejection);
        }
        if let Some(rejection) = validate_protocol_version(&request) {
            return Ok(rejection);
        }

        let (tx, rx) = mpsc::channel::<Event>(STREAM_BUFFER);

        // Held until the sender is installed so a concurrent notify either
        // lands in the replay or goes to the new stream.
        let mut slot = self.standalone.lock().await;
        if slot.as_ref().is_some_and(|existing| !existing.is_closed()) {
            return Ok(plain_error(
                StatusCode::CONFLICT,
                "Conflict: Only one SSE stream is allowed per session",
            ));
        }

        let replayed = match (request.header(LAST_EVENT_ID_HEADER), &self.event_store) {
            (Some(last_event_id), Some(store)) => self.replay(store.as_ref(), last_event_id).await,
            _ => Vec::new(),
        };
        *slot = Some(tx);
        drop(slot);

        tracing::info!(
            session_id = ?self.session_id(),
            replayed = replayed.len(),
            "SSE stream opened"
        );

        let events = stream::iter(replayed)
            .chain(ReceiverStream::new(rx))
            .map(Ok::<_, Infallible>)
            .take_until(self.cancel.clone().cancelled_owned());

        // A zero interval would re-arm the keep-alive timer on every poll.
        let response = if self.keep_alive.is_zero() {
            Sse::new(events).into_response()
        } else {
            Sse::new(events)
                .keep_alive(KeepAlive::new().interval(self.keep_alive))
                .into_response()
        };

        Ok(with_session_header(response, self.session_id()))
    }

    async fn replay(&self, store: &dyn EventStore, last_event_id: &str) -> Vec<Event> {
        match store.replay_events_after(last_event_id).await {
            Ok(replay) if Some(replay.stream_id.as_str()) == self.session_id() => replay
                .events
                .iter()
                .map(|e| sse_event(&e.message, Some(&e.id)))
                .collect(),
            Ok(replay) => {
                tracing::warn!(
                    session_id = ?self.session_id(),
                    stream_id = %replay.stream_id,
                    "Last-Event-ID belongs to another session; not replaying"
                );
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(
                    session_id = ?self.session_id(),
                    last_event_id = %last_event_id,
                    error = %e,
                    "Cannot resume stream; starting fresh"
                );
                Vec::new()
            }
        }
    }

    async fn handle_delete(self: &Arc<Self>, request: IncomingRequest) -> Result<Response, TransportError> {
        if let Some(rejection) = self.validate_session(&request) {
            return Ok(rejection);
        }
        if let Some(rejection) = validate_protocol_version(&request) {
            return Ok(rejection);
        }

        self.close().await?;
        Ok(StatusCode::OK.into_response())
    }
}

/// Dispatch one request and wrap the outcome in a JSON-RPC envelope.
async fn respond(
    engine: &Engine,
    transport: &Arc<StreamableTransport>,
    message: &JsonRpcMessage,
) -> Result<Value, TransportError> {
    let id = message.id.clone();
    let envelope = match (engine.dispatch(transport, message).await, id) {
        (Ok(result), Some(id)) => serde_json::to_value(JsonRpcResponse::success(id, result))?,
        (Err(error), id) => serde_json::to_value(JsonRpcErrorResponse::new(id, error))?,
        (Ok(_), None) => Value::Null,
    };
    Ok(envelope)
}

fn validate_protocol_version(request: &IncomingRequest) -> Option<Response> {
    match request.header(PROTOCOL_VERSION_HEADER) {
        Some(version) if !is_supported_version(version) => Some(json_rpc_error(
            StatusCode::BAD_REQUEST,
            ErrorData::server_error("Bad Request: Unsupported protocol version"),
        )),
        _ => None,
    }
}

/// Whether an `Accept` header value allows any of `wanted`.
fn accepts(accept: &str, wanted: &[&str]) -> bool {
    accept
        .split(',')
        .map(|part| part.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .any(|media| wanted.iter().any(|w| media == *w))
}

/// JSON-RPC error response with a `null` id.
pub(crate) fn json_rpc_error(status: StatusCode, error: ErrorData) -> Response {
    (status, Json(JsonRpcErrorResponse::without_id(error))).into_response()
}

/// Plain-text error response.
pub(crate) fn plain_error(status: StatusCode, message: &'static str) -> Response {
    (status, message).into_response()
}

fn with_session_header(mut response: Response, session_id: Option<&str>) -> Response {
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::session::{Session, SessionRegistry};
    use crate::transport::TransportOptions;
    use axum::body::to_bytes;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn post(body: Value) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        IncomingRequest::new(Method::POST, headers).with_body(body)
    }

    fn with_session(mut request: IncomingRequest, id: &str) -> IncomingRequest {
        request
            .headers
            .insert(SESSION_HEADER, HeaderValue::from_str(id).unwrap());
        request
    }

    fn initialize() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0.0.0" }
            }
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn connected(options: TransportOptions) -> (Arc<Engine>, Arc<StreamableTransport>) {
        let engine = Arc::new(Engine::new("test", "0.0.0"));
        let transport = StreamableTransport::new(options);
        engine.connect(&transport).unwrap();
        (engine, transport)
    }

    #[tokio::test]
    async fn test_initialize_assigns_id_and_fires_hook() {
        let (_engine, transport) = connected(TransportOptions::generated());
        let (tx, rx) = std::sync::mpsc::channel();
        transport.on_session_initialized(move |id, _| {
            tx.send(id).unwrap();
        });

        let response = transport.handle_request(post(initialize())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let header = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert_eq!(rx.try_recv().unwrap(), header);
        assert_eq!(transport.session_id(), Some(header.as_str()));

        let json = body_json(response).await;
        assert_eq!(json["id"], 1);
        assert_eq!(json["result"]["protocolVersion"], "2025-06-18");
    }

    #[tokio::test]
    async fn test_second_initialize_rejected() {
        let (_engine, transport) = connected(TransportOptions::generated());
        transport.handle_request(post(initialize())).await.unwrap();

        let response = transport.handle_request(post(initialize())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], -32600);
        assert_eq!(json["error"]["message"], "Invalid Request: Server already initialized");
    }

    #[tokio::test]
    async fn test_batched_initialize_rejected() {
        let (_engine, transport) = connected(TransportOptions::generated());
        let body = json!([initialize(), { "jsonrpc": "2.0", "id": 2, "method": "ping" }]);

        let response = transport.handle_request(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(
            json["error"]["message"],
            "Invalid Request: Only one initialization request is allowed"
        );
        assert!(!transport.is_initialized());
    }

    #[tokio::test]
    async fn test_request_before_initialize() {
        let (_engine, transport) = connected(TransportOptions::generated());
        let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });

        let response = transport.handle_request(post(ping)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "Bad Request: Server not initialized");
    }

    #[tokio::test]
    async fn test_session_header_checks() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });

        let missing = transport.handle_request(post(ping.clone())).await.unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let wrong = transport
            .handle_request(with_session(post(ping.clone()), "other"))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(wrong).await["error"]["code"], -32001);

        let ok = transport
            .handle_request(with_session(post(ping), "s1"))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[SESSION_HEADER], "s1");
    }

    #[tokio::test]
    async fn test_content_type_and_accept() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });

        let mut request = with_session(post(ping.clone()), "s1");
        request
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let response = transport.handle_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let mut request = with_session(post(ping), "s1");
        request
            .headers
            .insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        let response = transport.handle_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_unsupported_protocol_version() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let mut request = with_session(
            post(json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" })),
            "s1",
        );
        request
            .headers
            .insert(PROTOCOL_VERSION_HEADER, HeaderValue::from_static("1999-01-01"));

        let response = transport.handle_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"]["message"],
            "Bad Request: Unsupported protocol version"
        );
    }

    #[tokio::test]
    async fn test_notifications_only_is_accepted() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let body = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });

        let response = transport
            .handle_request(with_session(post(body), "s1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_batch_response_is_array() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let body = json!([
            { "jsonrpc": "2.0", "id": 1, "method": "ping" },
            { "jsonrpc": "2.0", "method": "notifications/initialized" },
            { "jsonrpc": "2.0", "id": 2, "method": "nope" }
        ]);

        let response = transport
            .handle_request(with_session(post(body), "s1"))
            .await
            .unwrap();
        let json = body_json(response).await;
        let items = json.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], 1);
        assert_eq!(items[1]["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_unconnected_transport_errors() {
        let transport = StreamableTransport::new(TransportOptions::generated());
        let result = transport.handle_request(post(initialize())).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_delete_closes() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let request = with_session(IncomingRequest::new(Method::DELETE, HeaderMap::new()), "s1");

        let response = transport.handle_request(request.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(transport.is_closed());

        let again = transport.handle_request(request).await.unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_other_methods_not_allowed() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let response = transport
            .handle_request(IncomingRequest::new(Method::PUT, HeaderMap::new()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST, DELETE");
    }

    #[tokio::test]
    async fn test_second_stream_conflicts() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let get = with_session(IncomingRequest::new(Method::GET, headers), "s1");

        let first = transport.handle_request(get.clone()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert!(transport.has_live_stream());

        let second = transport.handle_request(get.clone()).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        // Once the first client goes away the stream can be reopened.
        drop(first);
        let third = transport.handle_request(get).await.unwrap();
        assert_eq!(third.status(), StatusCode::OK);
    }

    fn sse_get(id: &str) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        with_session(IncomingRequest::new(Method::GET, headers), id)
    }

    #[tokio::test]
    async fn test_padded_session_header_matches() {
        let (_engine, transport) = connected(TransportOptions::with_session_id("s1"));
        let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });

        let response = transport
            .handle_request(with_session(post(ping), "  s1 "))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_zero_keep_alive_sends_nothing() {
        let (_engine, transport) = connected(
            TransportOptions::with_session_id("s1").with_keep_alive(Duration::ZERO),
        );

        let response = transport.handle_request(sse_get("s1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut frames = response.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_millis(100), frames.next()).await;
        assert!(first.is_err(), "idle stream produced a frame: {:?}", first);
    }

    #[tokio::test]
    async fn test_initialize_after_close_began_is_not_registered() {
        let (_engine, transport) = connected(TransportOptions::generated());
        let registered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&registered);
        transport.on_session_initialized(move |_, _| flag.store(true, Ordering::SeqCst));

        // `close` has flipped the flag but not yet reached the hooks.
        transport.closed.store(true, Ordering::SeqCst);

        let batch = ClientBatch::parse(initialize()).unwrap();
        let rejection = transport.accept_initialize(&batch).expect("closed transport accepted initialize");
        assert_eq!(rejection.status(), StatusCode::NOT_FOUND);
        assert!(!registered.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_racing_initialize_leaves_registry_empty() {
        for _ in 0..200 {
            let sessions = SessionRegistry::new_shared();
            let (_engine, transport) = connected(TransportOptions::generated());

            let registry = Arc::downgrade(&sessions);
            transport.on_session_initialized(move |id, transport| {
                if let Some(sessions) = registry.upgrade() {
                    sessions.insert(Session::new(id, transport));
                }
            });
            let registry = Arc::downgrade(&sessions);
            transport.on_close(move |id| {
                if let Some(sessions) = registry.upgrade() {
                    sessions.remove(&id);
                }
            });

            let init = tokio::spawn({
                let transport = Arc::clone(&transport);
                async move { transport.handle_request(post(initialize())).await.map(|r| r.status()) }
            });
            let close = tokio::spawn({
                let transport = Arc::clone(&transport);
                async move { transport.close().await }
            });

            // Either outcome of the request is fine; only the registry matters.
            let _ = init.await.unwrap();
            close.await.unwrap().unwrap();
            assert!(sessions.is_empty(), "closed transport left in registry");
        }
    }

    #[test]
    fn test_accepts() {
        assert!(accepts("application/json, text/event-stream", &["text/event-stream"]));
        assert!(accepts("*/*", &["application/json", "*/*"]));
        assert!(accepts("application/json;q=0.9", &["application/json"]));
        assert!(!accepts("text/html", &["application/json"]));
    }
}
