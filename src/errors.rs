use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::mcp::rpc::{ErrorObject, Message, INTERNAL_ERROR, SERVER_ERROR};
use crate::transport::{EnvelopeError, TransportError};

/// Transport-level faults of the HTTP binding. These never reach the protocol
/// engine; each maps to one status code and a JSON-RPC error body with a null id.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("client must accept application/json")]
    NotAcceptable,
    #[error("content-type must be application/json")]
    UnsupportedMediaType,
    #[error("malformed envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error")]
    Internal { message: String },
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Envelope(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_object(&self) -> ErrorObject {
        match self {
            Self::MethodNotAllowed => ErrorObject::new(SERVER_ERROR, "Method not allowed."),
            Self::NotAcceptable => ErrorObject::new(
                SERVER_ERROR,
                "Not Acceptable: Client must accept application/json",
            ),
            Self::UnsupportedMediaType => ErrorObject::new(
                SERVER_ERROR,
                "Unsupported Media Type: Content-Type must be application/json",
            ),
            Self::Envelope(err) => err.to_error_object(),
            Self::InvalidRequest(reason) => ErrorObject::invalid_request(reason.clone()),
            Self::Internal { .. } => ErrorObject::new(INTERNAL_ERROR, "Internal error"),
        }
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::DuplicateRequestId(_) => Self::InvalidRequest(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal { message } = &self {
            tracing::error!(error = %message, "request failed with internal error");
        }

        let status = self.status();
        let body = Message::error_reply(None, self.error_object());
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST"));
        }
        response
    }
}
