use std::{sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use tokio_util::sync::CancellationToken;

pub mod auth;
pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod registry;
pub mod stdio;
pub mod transport;

use config::CorsConfig;
use mcp::hooks::Hooks;
use registry::CapabilityRegistry;

/// Process-wide state shared by every HTTP request. Engines and transports are
/// never stored here; each request builds its own.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CapabilityRegistry>,
    pub hooks: Arc<Hooks>,
    pub cors: Arc<CorsConfig>,
    pub mcp_endpoint: Arc<str>,
    pub request_timeout: Option<Duration>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            hooks: Arc::new(Hooks::default()),
            cors: Arc::new(CorsConfig::default()),
            mcp_endpoint: Arc::from("/mcp"),
            request_timeout: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Arc::new(cors);
        self
    }

    pub fn with_mcp_endpoint(mut self, endpoint: &str) -> Self {
        self.mcp_endpoint = Arc::from(endpoint);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

pub fn build_app(state: AppState) -> Router {
    let endpoint = state.mcp_endpoint.clone();

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route(&endpoint, any(http::handlers::mcp_endpoint))
        .layer(http::cors::cors_layer(&state.cors))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
