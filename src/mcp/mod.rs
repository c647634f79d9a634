//! Model Context Protocol (MCP) engine and JSON-RPC message model
//!
//! Provides message validation, method resolution, dispatch hooks and the per-request
//! protocol engine that routes calls into the capability registry.

pub mod hooks;
pub mod methods;
pub mod rpc;
pub mod server;
