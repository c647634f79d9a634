//! Capabilities shipped with the server binary
//!
//! A small demonstration set: an `echo` tool, a `server_time` tool, a server
//! information resource and a `greeting` prompt.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use super::{handler_fn, Capability, CapabilityRegistry, HandlerError, RegistryError};

pub const SERVER_INFO_RESOURCE_URI: &str = "resource://server/info";

pub fn builtin_registry() -> Result<CapabilityRegistry, RegistryError> {
    CapabilityRegistry::builder()
        .register(echo_tool())
        .register(server_time_tool())
        .register(server_info_resource())
        .register(greeting_prompt())
        .build()
}

fn echo_tool() -> Capability {
    Capability::tool("echo", handler_fn(|arguments| async move { Ok(arguments) }))
        .with_description("Return the call arguments unchanged")
        .with_input_schema(json!({ "type": "object", "additionalProperties": true }))
}

fn server_time_tool() -> Capability {
    Capability::tool(
        "server_time",
        handler_fn(|_| async {
            let now = Utc::now();
            Ok(json!({
                "utc": now.to_rfc3339_opts(SecondsFormat::Millis, true),
                "unix_ms": now.timestamp_millis(),
            }))
        }),
    )
    .with_description("Current server time in UTC")
    .with_output_schema(json!({
        "type": "object",
        "properties": {
            "utc": { "type": "string" },
            "unix_ms": { "type": "integer" }
        },
        "required": ["utc", "unix_ms"]
    }))
}

fn server_info_resource() -> Capability {
    Capability::resource(
        "Server Info",
        SERVER_INFO_RESOURCE_URI,
        handler_fn(|_| async {
            let info = json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            });
            Ok(json!({
                "contents": [{
                    "uri": SERVER_INFO_RESOURCE_URI,
                    "mimeType": "application/json",
                    "text": info.to_string(),
                }]
            }))
        }),
    )
    .with_description("Name and version of this server")
    .with_metadata("mimeType", json!("application/json"))
}

fn greeting_prompt() -> Capability {
    Capability::prompt(
        "greeting",
        handler_fn(|arguments| async move {
            let name = arguments
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| HandlerError::invalid_arguments("`name` is required"))?;

            Ok::<_, HandlerError>(json!({
                "description": "Greet a user by name",
                "messages": [{
                    "role": "user",
                    "content": { "type": "text", "text": format!("Say hello to {name}.") }
                }]
            }))
        }),
    )
    .with_description("Greet a user by name")
    .with_input_schema(json!({
        "type": "object",
        "properties": { "name": { "type": "string" } },
        "required": ["name"]
    }))
}
