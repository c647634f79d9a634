//! HTTP binding of the correlation transport
//!
//! Provides the external API routing: the stateless JSON-RPC endpoint, health and
//! discovery routes, and the CORS policy applied to all of them.

pub mod cors;
pub mod handlers;
