//! Correlation transport shared by the HTTP and STDIO bindings
//!
//! Decodes envelopes, hands each message to the connected [`MessageHandler`] and
//! assembles the replies of one envelope into one outbound payload.

pub mod correlation;
pub mod envelope;

use async_trait::async_trait;
use thiserror::Error;

use crate::mcp::hooks::RequestContext;
use crate::mcp::rpc::{Message, RequestId};

pub use correlation::{CorrelationTransport, PendingReply, Submission};
pub use envelope::{Completion, Envelope, EnvelopeError, Outbound};

/// The `onmessage` extension point: produces at most one reply per inbound message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: Message, context: RequestContext) -> Option<Message>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport already started")]
    AlreadyStarted,
    #[error("transport has not been started")]
    NotStarted,
    #[error("transport has no message handler connected")]
    NotConnected,
    #[error("transport is closed")]
    Closed,
    #[error("duplicate request id {0}")]
    DuplicateRequestId(RequestId),
}
