//! Inbound envelopes and outbound payloads
//!
//! An envelope is the single JSON value carried by one physical exchange: either
//! one message or a non-empty batch of messages.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::mcp::rpc::{ErrorObject, Message, MessageError, RequestId};

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("batch must contain at least one message")]
    EmptyBatch,
    #[error("invalid message: {0}")]
    InvalidMessage(MessageError),
    #[error("invalid message at batch index {index}: {source}")]
    InvalidBatchMember {
        index: usize,
        #[source]
        source: MessageError,
    },
}

impl EnvelopeError {
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Self::Parse(_) => ErrorObject::parse_error(),
            _ => ErrorObject::invalid_request(self.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Single(Message),
    Batch(Vec<Message>),
}

impl Envelope {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(EnvelopeError::EmptyBatch);
                }
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        Message::from_value(item)
                            .map_err(|source| EnvelopeError::InvalidBatchMember { index, source })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Batch)
            }
            other => Message::from_value(other)
                .map(Self::Single)
                .map_err(EnvelopeError::InvalidMessage),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    pub fn messages(&self) -> &[Message] {
        match self {
            Self::Single(message) => std::slice::from_ref(message),
            Self::Batch(messages) => messages,
        }
    }

    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Single(message) => vec![message],
            Self::Batch(messages) => messages,
        }
    }

    /// Ids of the messages that expect a reply, in envelope order.
    pub fn request_ids(&self) -> impl Iterator<Item = &RequestId> {
        self.messages().iter().filter_map(|message| match message {
            Message::Request(request) => Some(&request.id),
            _ => None,
        })
    }

    pub fn has_requests(&self) -> bool {
        self.messages().iter().any(Message::is_request)
    }
}

/// Replies assembled for one envelope, shaped like the envelope that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Single(Message),
    Batch(Vec<Message>),
}

impl Outbound {
    pub fn replies(&self) -> &[Message] {
        match self {
            Self::Single(message) => std::slice::from_ref(message),
            Self::Batch(messages) => messages,
        }
    }
}

/// How a correlation ticket was resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Completion {
    /// Every expected reply arrived.
    Replies(Outbound),
    /// The transport was torn down first; carries the synthetic error reply.
    Aborted(Message),
}

impl Completion {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_object_is_not_a_batch() {
        let envelope =
            Envelope::from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).expect("parse");
        assert!(!envelope.is_batch());
        assert!(envelope.has_requests());
        assert_eq!(envelope.request_ids().collect::<Vec<_>>(), vec![&RequestId::Number(1)]);
    }

    #[test]
    fn batch_keeps_order_and_skips_notifications_in_request_ids() {
        let envelope = Envelope::from_value(json!([
            {"jsonrpc":"2.0","id":"a","method":"ping"},
            {"jsonrpc":"2.0","method":"notifications/initialized"},
            {"jsonrpc":"2.0","id":2,"method":"ping"}
        ]))
        .expect("parse");

        assert!(envelope.is_batch());
        assert_eq!(envelope.messages().len(), 3);
        assert_eq!(
            envelope.request_ids().cloned().collect::<Vec<_>>(),
            vec![RequestId::from("a"), RequestId::Number(2)]
        );
    }

    #[test]
    fn notification_only_envelope_has_no_requests() {
        let envelope = Envelope::from_value(json!({"jsonrpc":"2.0","method":"invoke"}))
            .expect("parse");
        assert!(!envelope.has_requests());
    }

    #[test]
    fn empty_batch_is_invalid() {
        let err = Envelope::from_slice(b"[]").expect_err("empty batch must fail");
        assert!(matches!(err, EnvelopeError::EmptyBatch));
        assert_eq!(err.to_error_object().code, -32600);
    }

    #[test]
    fn malformed_json_maps_to_parse_error() {
        let err = Envelope::from_slice(b"{not json").expect_err("must fail");
        assert!(matches!(err, EnvelopeError::Parse(_)));
        assert_eq!(err.to_error_object().code, -32700);
    }

    #[test]
    fn invalid_batch_member_reports_index() {
        let err = Envelope::from_value(json!([
            {"jsonrpc":"2.0","id":1,"method":"ping"},
            42
        ]))
        .expect_err("must fail");
        assert!(matches!(
            err,
            EnvelopeError::InvalidBatchMember {
                index: 1,
                source: MessageError::NotAnObject
            }
        ));
    }

    #[test]
    fn outbound_serializes_by_shape() {
        let reply = Message::error_reply(None, ErrorObject::server_shutting_down());
        let single = serde_json::to_value(Outbound::Single(reply.clone())).expect("serialize");
        let batch = serde_json::to_value(Outbound::Batch(vec![reply])).expect("serialize");

        assert!(single.is_object());
        assert_eq!(batch.as_array().map(Vec::len), Some(1));
    }
}
