//! JSON-RPC 2.0 envelopes and POST body classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ErrorData;

/// The `jsonrpc` member. Anything other than `"2.0"` fails to deserialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JsonRpcVersion {
    #[default]
    #[serde(rename = "2.0")]
    V2,
}

/// Request ids are opaque to the server; echo back whatever came in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_owned())
    }
}

/// A request when `id` is present, a notification otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: JsonRpcVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcMessage {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcMessage {
            jsonrpc: JsonRpcVersion::V2,
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage {
            jsonrpc: JsonRpcVersion::V2,
            id: None,
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_initialize(&self) -> bool {
        self.id.is_some() && self.method == "initialize"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse<T = Value> {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub result: T,
}

impl<T> JsonRpcResponse<T> {
    pub fn success(id: impl Into<RequestId>, result: T) -> Self {
        JsonRpcResponse {
            jsonrpc: JsonRpcVersion::V2,
            id: id.into(),
            result,
        }
    }
}

/// Error reply. A `None` id goes out as `"id": null`, which is what clients
/// get when the transport rejects a body before reading any id from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: JsonRpcVersion,
    pub error: ErrorData,
    pub id: Option<RequestId>,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: ErrorData) -> Self {
        JsonRpcErrorResponse {
            jsonrpc: JsonRpcVersion::V2,
            error,
            id,
        }
    }

    pub fn without_id(error: ErrorData) -> Self {
        Self::new(None, error)
    }
}

/// One element of a client POST, sorted by what the server owes in return.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Request(JsonRpcMessage),
    Notification(JsonRpcMessage),
    /// A reply to something the server asked. Kept raw; nothing routes it yet.
    Response(Value),
}

impl ClientMessage {
    pub fn from_value(value: Value) -> Result<Self, ErrorData> {
        let (has_method, looks_like_reply) = match &value {
            Value::Object(fields) => (
                fields.contains_key("method"),
                fields.contains_key("id")
                    && (fields.contains_key("result") || fields.contains_key("error"))
                    && fields.get("jsonrpc") == Some(&Value::from("2.0")),
            ),
            _ => {
                return Err(ErrorData::invalid_request(
                    "Invalid Request: message must be an object",
                ))
            }
        };

        if has_method {
            let message: JsonRpcMessage = serde_json::from_value(value)
                .map_err(|e| ErrorData::invalid_request(format!("Invalid Request: {e}")))?;
            Ok(match message.id {
                Some(_) => ClientMessage::Request(message),
                None => ClientMessage::Notification(message),
            })
        } else if looks_like_reply {
            Ok(ClientMessage::Response(value))
        } else {
            Err(ErrorData::invalid_request(
                "Invalid Request: not a JSON-RPC message",
            ))
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            ClientMessage::Request(m) | ClientMessage::Notification(m) => Some(m.method.as_str()),
            ClientMessage::Response(_) => None,
        }
    }

    pub fn is_initialize(&self) -> bool {
        match self {
            ClientMessage::Request(m) => m.is_initialize(),
            _ => false,
        }
    }
}

/// A parsed POST body. `is_batch` records whether it arrived as an array so
/// the reply can take the same shape.
#[derive(Debug, Clone)]
pub struct ClientBatch {
    pub messages: Vec<ClientMessage>,
    pub is_batch: bool,
}

impl ClientBatch {
    pub fn parse(body: Value) -> Result<Self, ErrorData> {
        let (items, is_batch) = match body {
            Value::Array(items) if items.is_empty() => {
                return Err(ErrorData::invalid_request("Invalid Request: empty batch"))
            }
            Value::Array(items) => (items, true),
            single => (vec![single], false),
        };

        let messages = items
            .into_iter()
            .map(ClientMessage::from_value)
            .collect::<Result<_, _>>()?;
        Ok(ClientBatch { messages, is_batch })
    }

    pub fn has_initialize(&self) -> bool {
        self.messages.iter().any(ClientMessage::is_initialize)
    }
}

/// Look for an `initialize` request in a raw body without fully parsing it.
/// The router uses this to decide whether a tokenless POST may open a session.
pub fn is_initialize_request(body: &Value) -> bool {
    let opens_session = |message: &Value| {
        message["method"] == "initialize" && !message["id"].is_null()
    };

    match body {
        Value::Array(items) => items.iter().any(opens_session),
        message => opens_session(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_is_strict() {
        assert_eq!(serde_json::to_value(JsonRpcVersion::V2).unwrap(), json!("2.0"));
        assert!(serde_json::from_value::<JsonRpcVersion>(json!("1.0")).is_err());
    }

    #[test]
    fn test_request_ids_round_trip_both_shapes() {
        let numeric: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(numeric, RequestId::from(42));
        assert_eq!(serde_json::to_string(&numeric).unwrap(), "42");

        let text: RequestId = serde_json::from_str("\"req-9\"").unwrap();
        assert_eq!(text.to_string(), "req-9");
    }

    #[test]
    fn test_unidentified_error_has_null_id() {
        let wire = serde_json::to_value(JsonRpcErrorResponse::without_id(ErrorData::server_error(
            "Bad Request: No valid session ID provided",
        )))
        .unwrap();

        assert_eq!(wire["jsonrpc"], "2.0");
        assert_eq!(wire["error"]["code"], -32000);
        assert!(wire.as_object().unwrap().contains_key("id"));
        assert!(wire["id"].is_null());
    }

    #[test]
    fn test_notification_omits_id() {
        let wire = serde_json::to_value(JsonRpcMessage::notification(
            "notifications/message",
            json!({ "level": "info" }),
        ))
        .unwrap();
        assert!(wire.get("id").is_none());
        assert_eq!(wire["params"]["level"], "info");
    }

    #[test]
    fn test_classification() {
        let classify = |v| ClientMessage::from_value(v).unwrap();

        assert!(matches!(
            classify(json!({ "jsonrpc": "2.0", "id": "a", "method": "tools/list" })),
            ClientMessage::Request(_)
        ));
        assert!(matches!(
            classify(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })),
            ClientMessage::Notification(_)
        ));

        let reply = classify(json!({ "jsonrpc": "2.0", "id": 7, "error": { "code": 1, "message": "x" } }));
        assert!(matches!(reply, ClientMessage::Response(_)));
        assert_eq!(reply.method(), None);

        for junk in [
            json!("ping"),
            json!({ "id": 1 }),
            json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }),
            json!({ "id": 1, "result": {} }),
        ] {
            assert!(ClientMessage::from_value(junk).is_err());
        }
    }

    #[test]
    fn test_batch_shape_is_remembered() {
        let batch = ClientBatch::parse(json!([
            { "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} },
            { "jsonrpc": "2.0", "method": "notifications/initialized" }
        ]))
        .unwrap();
        assert!(batch.is_batch);
        assert_eq!(batch.messages.len(), 2);
        assert!(batch.has_initialize());

        let single = ClientBatch::parse(json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" })).unwrap();
        assert!(!single.is_batch);
        assert!(!single.has_initialize());

        assert!(ClientBatch::parse(json!([])).is_err());
        assert!(ClientBatch::parse(json!([{ "jsonrpc": "2.0", "id": 1, "method": "ping" }, 3])).is_err());
    }

    #[test]
    fn test_is_initialize_request() {
        let init = json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} });

        assert!(is_initialize_request(&init));
        assert!(is_initialize_request(&json!([init])));
        assert!(!is_initialize_request(&json!({ "jsonrpc": "2.0", "method": "initialize" })));
        assert!(!is_initialize_request(&json!({ "jsonrpc": "2.0", "id": null, "method": "initialize" })));
        assert!(!is_initialize_request(&json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" })));
        assert!(!is_initialize_request(&json!("initialize")));
    }
}
