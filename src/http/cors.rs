//! CORS policy for the HTTP binding, built from static configuration.

use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = match &config.allow_origins {
        None => AllowOrigin::any(),
        Some(origins) => AllowOrigin::list(origins.iter().cloned()),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(config.allow_methods.clone())
        .allow_headers(config.allow_headers.clone())
        .allow_credentials(config.allow_credentials)
        .max_age(config.max_age)
}
