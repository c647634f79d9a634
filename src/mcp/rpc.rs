//! JSON-RPC protocol representations and formatting utilities
//!
//! Provides the wire-level message model (requests, notifications and replies),
//! request identifiers and the standard error objects used across the server.

use std::fmt;

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Generic transport-level failure.
pub const SERVER_ERROR: i64 = -32000;
/// Carried by the replies synthesized when a transport is torn down.
pub const SERVER_SHUTTING_DOWN: i64 = SERVER_ERROR;
pub const UNAUTHORIZED: i64 = -32001;
pub const CAPABILITY_NOT_FOUND: i64 = -32002;
pub const REQUEST_TIMED_OUT: i64 = -32004;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    fn from_value(value: Value) -> Result<Self, MessageError> {
        match value {
            Value::String(id) => Ok(Self::String(id)),
            Value::Number(number) => number
                .as_i64()
                .map(Self::Number)
                .ok_or(MessageError::InvalidId),
            _ => Err(MessageError::InvalidId),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::String(id) => write!(f, "{id:?}"),
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
        Self::String(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request").with_data(json!({ "reason": reason.into() }))
    }

    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params").with_data(json!({ "reason": reason.into() }))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error").with_data(json!({ "message": message.into() }))
    }

    pub fn capability_not_found(name: &str) -> Self {
        Self::new(CAPABILITY_NOT_FOUND, "Capability not found").with_data(json!({ "name": name }))
    }

    pub fn unauthorized(reason: &str) -> Self {
        Self::new(UNAUTHORIZED, "Unauthorized").with_data(json!({ "reason": reason }))
    }

    pub fn server_shutting_down() -> Self {
        Self::new(SERVER_SHUTTING_DOWN, "Server shutting down")
    }

    pub fn request_timed_out() -> Self {
        Self::new(REQUEST_TIMED_OUT, "Request timed out")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// `None` only for error replies that cannot be attributed to a request.
    pub id: Option<RequestId>,
    pub outcome: Outcome,
}

impl Reply {
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message must be a JSON object")]
    NotAnObject,
    #[error("jsonrpc version must be \"2.0\"")]
    InvalidVersion,
    #[error("id must be a string or an integer")]
    InvalidId,
    #[error("method must be a non-empty string")]
    InvalidMethod,
    #[error("error member is not a valid error object")]
    InvalidError,
    #[error("reply without an id")]
    MissingId,
    #[error("message is neither a request, a notification nor a reply")]
    Unclassifiable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Reply(Reply),
}

impl Message {
    /// Classifies a decoded JSON value. An explicit `"id": null` on a message
    /// carrying a method is read as a notification.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let Value::Object(mut object) = value else {
            return Err(MessageError::NotAnObject);
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(MessageError::InvalidVersion);
        }

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(RequestId::from_value(raw)?),
        };

        match (
            object.remove("method"),
            object.remove("result"),
            object.remove("error"),
        ) {
            (Some(Value::String(method)), None, None) => {
                if method.trim().is_empty() {
                    return Err(MessageError::InvalidMethod);
                }
                let params = object.remove("params");
                Ok(match id {
                    Some(id) => Self::Request(Request { id, method, params }),
                    None => Self::Notification(Notification { method, params }),
                })
            }
            (Some(_), None, None) => Err(MessageError::InvalidMethod),
            (None, Some(result), None) => {
                let id = id.ok_or(MessageError::MissingId)?;
                Ok(Self::Reply(Reply::result(id, result)))
            }
            (None, None, Some(error)) => {
                let error: ErrorObject =
                    serde_json::from_value(error).map_err(|_| MessageError::InvalidError)?;
                Ok(Self::Reply(Reply::error(id, error)))
            }
            _ => Err(MessageError::Unclassifiable),
        }
    }

    pub fn request(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self::Request(Request {
            id: id.into(),
            method: method.to_string(),
            params,
        })
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.to_string(),
            params,
        })
    }

    pub fn error_reply(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self::Reply(Reply::error(id, error))
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(request) => Some(&request.id),
            Self::Reply(reply) => reply.id.as_ref(),
            Self::Notification(_) => None,
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        match self {
            Self::Request(request) => {
                map.serialize_entry("id", &request.id)?;
                map.serialize_entry("method", &request.method)?;
                if let Some(params) = &request.params {
                    map.serialize_entry("params", params)?;
                }
            }
            Self::Notification(notification) => {
                map.serialize_entry("method", &notification.method)?;
                if let Some(params) = &notification.params {
                    map.serialize_entry("params", params)?;
                }
            }
            Self::Reply(reply) => {
                map.serialize_entry("id", &reply.id)?;
                match &reply.outcome {
                    Outcome::Result(result) => map.serialize_entry("result", result)?,
                    Outcome::Error(error) => map.serialize_entry("error", error)?,
                }
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_request_notification_and_reply() {
        let request = Message::from_value(json!({"jsonrpc":"2.0","id":7,"method":"ping"}))
            .expect("request should parse");
        assert_eq!(request, Message::request(7, "ping", None));

        let notification =
            Message::from_value(json!({"jsonrpc":"2.0","method":"notifications/initialized"}))
                .expect("notification should parse");
        assert_eq!(
            notification,
            Message::notification("notifications/initialized", None)
        );

        let reply = Message::from_value(json!({"jsonrpc":"2.0","id":"a","result":{"ok":true}}))
            .expect("reply should parse");
        assert_eq!(
            reply,
            Message::Reply(Reply::result("a".into(), json!({"ok": true})))
        );
    }

    #[test]
    fn null_id_with_method_is_a_notification() {
        let message = Message::from_value(json!({"jsonrpc":"2.0","id":null,"method":"invoke"}))
            .expect("message should parse");
        assert!(matches!(message, Message::Notification(_)));
    }

    #[test]
    fn rejects_invalid_messages() {
        assert_eq!(
            Message::from_value(json!([1])),
            Err(MessageError::NotAnObject)
        );
        assert_eq!(
            Message::from_value(json!({"jsonrpc":"1.0","id":1,"method":"ping"})),
            Err(MessageError::InvalidVersion)
        );
        assert_eq!(
            Message::from_value(json!({"jsonrpc":"2.0","id":1.5,"method":"ping"})),
            Err(MessageError::InvalidId)
        );
        assert_eq!(
            Message::from_value(json!({"jsonrpc":"2.0","id":1,"method":""})),
            Err(MessageError::InvalidMethod)
        );
        assert_eq!(
            Message::from_value(json!({"jsonrpc":"2.0","id":1})),
            Err(MessageError::Unclassifiable)
        );
        assert_eq!(
            Message::from_value(json!({"jsonrpc":"2.0","result":{}})),
            Err(MessageError::MissingId)
        );
    }

    #[test]
    fn error_reply_serializes_null_id() {
        let message = Message::error_reply(None, ErrorObject::server_shutting_down());
        let value = serde_json::to_value(&message).expect("serialize");

        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32000, "message": "Server shutting down"}
            })
        );
    }

    #[test]
    fn result_reply_keeps_string_id() {
        let message = Message::Reply(Reply::result("abc".into(), json!({"x": 1})));
        let value = serde_json::to_value(&message).expect("serialize");

        assert_eq!(value, json!({"jsonrpc":"2.0","id":"abc","result":{"x":1}}));
    }
}
