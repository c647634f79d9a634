//! Axum HTTP handlers for the web server
//!
//! Provides the stateless JSON-RPC endpoint and general metadata endpoints. Every
//! call to the endpoint builds its own engine and correlation transport; both are
//! dropped with the request future, which also covers clients that disconnect.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeaderRejection,
    TypedHeader,
};
use serde::Serialize;

use crate::auth::bearer_token;
use crate::errors::AppError;
use crate::mcp::{
    hooks::{RequestContext, TransportKind},
    server::Server,
};
use crate::transport::{Completion, CorrelationTransport, Envelope, PendingReply, Submission};
use crate::AppState;

const JSON_MEDIA_TYPE: &str = "application/json";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: state.mcp_endpoint.to_string(),
    })
}

pub async fn mcp_endpoint(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    auth_header: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    body: Bytes,
) -> Result<Response, AppError> {
    if method != Method::POST {
        return Err(AppError::MethodNotAllowed);
    }
    if !accepts_json(&headers) {
        return Err(AppError::NotAcceptable);
    }
    if !is_json_content(&headers) {
        return Err(AppError::UnsupportedMediaType);
    }

    let envelope = Envelope::from_slice(&body)?;

    let server = Server::new(state.registry.clone(), state.hooks.clone());
    let transport = CorrelationTransport::new();
    transport.connect(Arc::new(server))?;

    let context = RequestContext::new(TransportKind::Http)
        .with_bearer_token(bearer_token(auth_header.as_ref().ok()));

    let pending = match transport.submit(envelope, context)? {
        Submission::Accepted => {
            transport.detach();
            return Ok(StatusCode::ACCEPTED.into_response());
        }
        Submission::Pending(pending) => pending,
    };

    Ok(match await_completion(&state, &transport, pending).await {
        Completion::Replies(outbound) => {
            // Notifications batched with the requests may still be running.
            transport.detach();
            (StatusCode::OK, Json(outbound)).into_response()
        }
        Completion::Aborted(reply) => (StatusCode::SERVICE_UNAVAILABLE, Json(reply)).into_response(),
    })
}

/// Waits for the ticket, tearing the transport down on shutdown or deadline.
async fn await_completion(
    state: &AppState,
    transport: &CorrelationTransport,
    pending: PendingReply,
) -> Completion {
    let completion = pending.wait();
    tokio::pin!(completion);

    let deadline = async {
        match state.request_timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        completion = &mut completion => return completion,
        _ = state.shutdown.cancelled() => {
            transport.close();
        }
        _ = deadline => {
            transport.expire();
        }
    }

    completion.await
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| media_type(item).eq_ignore_ascii_case(JSON_MEDIA_TYPE))
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| media_type(value).eq_ignore_ascii_case(JSON_MEDIA_TYPE))
}

/// Strips parameters such as `charset` or `q` from a media range.
fn media_type(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}
