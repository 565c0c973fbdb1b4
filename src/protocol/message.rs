//! JSON-RPC 2.0 message model.
//!
//! Outbound messages are built from the typed structs and serialized with
//! `serde`. Inbound frames are classified by [`Message::from_value`], which
//! inspects the raw object so that a structurally invalid message can still
//! report the `id` it carried (when one is recoverable).

use std::fmt::{Display, Formatter};

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error, also used for domain-specific failures.
pub const INTERNAL_ERROR: i64 = -32603;
/// Local rejection: the connection closed while the request was pending.
pub const CONNECTION_CLOSED: i64 = -32000;
/// Local rejection: the request timed out.
pub const REQUEST_TIMEOUT: i64 = -32001;

// ── Version marker ────────────────────────────────────────────────────────────

/// The literal `"jsonrpc": "2.0"` member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "2.0" {
            Ok(Self)
        } else {
            Err(de::Error::custom(format!("unsupported jsonrpc version {raw}")))
        }
    }
}

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Request identifier: a number or a string, unique among in-flight requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer identifier (the engine allocates these).
    Number(i64),
    /// String identifier (accepted from peers).
    String(String),
}

impl RequestId {
    /// Convert a raw JSON value into an id, rejecting floats, objects and arrays.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// Render this id as a JSON value (used for progress tokens).
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::from(s.as_str()),
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

// ── Error object ──────────────────────────────────────────────────────────────

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Short human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build an error object with the given code and message.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a `data` member.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// `-32700` Parse error.
    #[must_use]
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, "Parse error").with_data(Value::String(detail.into()))
    }

    /// `-32600` Invalid Request.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    /// `-32601` Method not found.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found").with_data(Value::from(method))
    }

    /// `-32602` Invalid params.
    #[must_use]
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params").with_data(Value::String(detail.into()))
    }

    /// `-32603` Internal error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A request expecting exactly one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`.
    pub jsonrpc: JsonRpcVersion,
    /// Correlation identifier.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Optional structured parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Build a request.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            method: method.into(),
            params,
        }
    }
}

/// A one-way message that never produces a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Always `"2.0"`.
    pub jsonrpc: JsonRpcVersion,
    /// Method name.
    pub method: String,
    /// Optional structured parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Build a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// Exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Successful result payload.
    Result(Value),
    /// Failure payload.
    Error(ErrorObject),
}

/// A reply correlated to a request by `id`.
///
/// `id` is `None` (serialized as `null`) only when the originating request's
/// id could not be recovered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: JsonRpcVersion,
    /// Identifier of the originating request.
    pub id: Option<RequestId>,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: Some(id),
            outcome: Outcome::Result(result),
        }
    }

    /// Error response; `id` may be absent when it could not be recovered.
    #[must_use]
    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Convert the outcome into a `Result`, surfacing peer errors as [`AppError::Rpc`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Rpc`] when the response carries an `error` member.
    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(err) => Err(AppError::Rpc(err)),
        }
    }
}

/// Any single JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Request carrying `id` and `method`.
    Request(Request),
    /// Notification carrying `method` only.
    Notification(Notification),
    /// Response carrying `id` and `result`/`error`.
    Response(Response),
}

/// A message that failed structural validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Malformed {
    /// The id, when it could be recovered from the raw object.
    pub id: Option<RequestId>,
    /// Why the message was rejected.
    pub reason: String,
}

impl Malformed {
    fn new(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

impl Message {
    /// Classify a raw JSON value as a request, notification, or response.
    ///
    /// # Errors
    ///
    /// Returns [`Malformed`] (with the id when recoverable) if the value is
    /// not a structurally valid JSON-RPC 2.0 message.
    pub fn from_value(value: Value) -> std::result::Result<Self, Malformed> {
        let Value::Object(mut map) = value else {
            return Err(Malformed::new(None, "message must be a JSON object"));
        };

        let id = match map.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                RequestId::from_value(&raw)
                    .ok_or_else(|| Malformed::new(None, "id must be a string or an integer"))?,
            ),
        };

        if map.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(Malformed::new(id, "jsonrpc must be \"2.0\""));
        }

        if let Some(method) = map.remove("method") {
            let Value::String(method) = method else {
                return Err(Malformed::new(id, "method must be a string"));
            };
            let params = take_params(&mut map).map_err(|reason| Malformed::new(id.clone(), reason))?;
            return Ok(match id {
                Some(id) => Self::Request(Request::new(id, method, params)),
                None => Self::Notification(Notification::new(method, params)),
            });
        }

        let outcome = match (map.remove("result"), map.remove("error")) {
            (Some(result), None) => Outcome::Result(result),
            (None, Some(error)) => Outcome::Error(
                serde_json::from_value::<ErrorObject>(error)
                    .map_err(|err| Malformed::new(id.clone(), format!("invalid error object: {err}")))?,
            ),
            (Some(_), Some(_)) => {
                return Err(Malformed::new(id, "response carries both result and error"));
            }
            (None, None) => {
                return Err(Malformed::new(id, "message has neither method nor result/error"));
            }
        };

        Ok(Self::Response(Response {
            jsonrpc: JsonRpcVersion,
            id,
            outcome,
        }))
    }

    /// Parse a single message from text.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Parse`] for invalid JSON or an invalid message.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value).map_err(|m| AppError::Parse(m.reason))
    }

    /// The id for requests and responses.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => resp.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    /// The method for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(note) => Some(&note.method),
            Self::Response(_) => None,
        }
    }
}

fn take_params(map: &mut Map<String, Value>) -> std::result::Result<Option<Value>, String> {
    match map.remove("params") {
        None | Some(Value::Null) => Ok(None),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(Some(params)),
        Some(_) => Err("params must be an object or an array".to_owned()),
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// One wire frame: a single message or a batch array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Frame {
    /// A single message.
    Single(Message),
    /// A JSON array of messages.
    Batch(Vec<Message>),
}

impl Frame {
    /// Serialize to compact single-line JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Parse`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame, failing if any member is malformed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Parse`] for invalid JSON, an empty batch, or any
    /// structurally invalid message.
    pub fn decode(raw: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Array(items) if items.is_empty() => {
                Err(AppError::Parse("batch must not be empty".into()))
            }
            Value::Array(items) => items
                .into_iter()
                .map(|item| Message::from_value(item).map_err(|m| AppError::Parse(m.reason)))
                .collect::<Result<Vec<_>>>()
                .map(Self::Batch),
            other => Message::from_value(other)
                .map(Self::Single)
                .map_err(|m| AppError::Parse(m.reason)),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Self::Single(message)
    }
}
