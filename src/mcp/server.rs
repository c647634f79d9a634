//! The central Model Context Protocol engine
//!
//! Provides method resolution, capabilities negotiation (`initialize`), the
//! pre/post dispatch hook chain and routing of invocations to the capability
//! registry. Handler failures are turned into error replies here and never leave
//! the engine as faults.

use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, ProtocolVersion, ServerCapabilities,
    ServerCapabilitiesPrompts, ServerCapabilitiesResources, ServerCapabilitiesTools,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::mcp::hooks::{Call, Hooks, RequestContext};
use crate::mcp::methods::{is_lifecycle_notification, Method, MethodTable};
use crate::mcp::rpc::{ErrorObject, Message, Reply, RequestId};
use crate::registry::{Capability, CapabilityKind, CapabilityRegistry};
use crate::transport::MessageHandler;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
struct InvokeParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}

pub struct Server {
    registry: Arc<CapabilityRegistry>,
    hooks: Arc<Hooks>,
    methods: MethodTable,
}

impl Server {
    pub fn new(registry: Arc<CapabilityRegistry>, hooks: Arc<Hooks>) -> Self {
        Self {
            registry,
            hooks,
            methods: MethodTable::new(),
        }
    }

    pub async fn handle_message(&self, message: Message, context: RequestContext) -> Option<Message> {
        match message {
            Message::Request(request) => {
                let outcome = self
                    .handle_call(Some(&request.id), &request.method, request.params, context)
                    .await;
                Some(Message::Reply(match outcome {
                    Ok(result) => Reply::result(request.id, result),
                    Err(error) => Reply::error(Some(request.id), error),
                }))
            }
            Message::Notification(notification) => {
                if is_lifecycle_notification(&notification.method) {
                    debug!(method = %notification.method, "notification acknowledged");
                    return None;
                }
                let _ = self
                    .handle_call(None, &notification.method, notification.params, context)
                    .await;
                None
            }
            Message::Reply(_) => {
                debug!("ignoring inbound reply; the server issues no requests");
                None
            }
        }
    }

    async fn handle_call(
        &self,
        id: Option<&RequestId>,
        method_name: &str,
        params: Option<Value>,
        mut context: RequestContext,
    ) -> Result<Value, ErrorObject> {
        let audit_params = redact_audit_params(params.as_ref());

        let outcome = match self.methods.resolve(method_name) {
            Some(method) => {
                let call = Call {
                    id: id.cloned(),
                    method,
                    params,
                };
                self.dispatch(&call, &mut context).await
            }
            None => Err(ErrorObject::method_not_found()),
        };

        info!(
            method = %method_name,
            params = %audit_params,
            notification = id.is_none(),
            outcome = if outcome.is_ok() { "success" } else { "failure" },
            "mcp action audited"
        );

        outcome
    }

    async fn dispatch(&self, call: &Call, context: &mut RequestContext) -> Result<Value, ErrorObject> {
        self.hooks.run_before(call, context).await?;
        let mut result = self.execute(call, context).await?;
        self.hooks.run_after(call, &mut result, context).await;
        Ok(result)
    }

    async fn execute(&self, call: &Call, context: &RequestContext) -> Result<Value, ErrorObject> {
        match call.method {
            Method::Initialize => initialize_result(call.params.as_ref()),
            Method::Ping => Ok(json!({})),
            Method::ListCapabilities => Ok(json!({ "capabilities": self.registry.list_all() })),
            Method::ListTools => Ok(json!({ "tools": self.registry.list(CapabilityKind::Tool) })),
            Method::ListResources => Ok(json!({
                "resources": self.registry.list(CapabilityKind::Resource)
            })),
            Method::ListPrompts => Ok(json!({
                "prompts": self.registry.list(CapabilityKind::Prompt)
            })),
            Method::Invoke | Method::CallTool | Method::GetPrompt => {
                let params: InvokeParams = parse_params(call.params.as_ref())?;
                let capability = self.find(&params.name, call.method.capability_kind())?;
                let arguments = params.arguments.unwrap_or_else(|| Value::Object(Map::new()));
                invoke(capability, arguments, context).await
            }
            Method::ReadResource => {
                let params: ReadResourceParams = parse_params(call.params.as_ref())?;
                let capability = self
                    .registry
                    .lookup_resource(&params.uri)
                    .ok_or_else(|| ErrorObject::capability_not_found(&params.uri))?;
                invoke(capability, json!({ "uri": params.uri }), context).await
            }
        }
    }

    fn find(&self, name: &str, kind: Option<CapabilityKind>) -> Result<&Capability, ErrorObject> {
        self.registry
            .lookup(name)
            .filter(|capability| kind.map_or(true, |kind| capability.kind() == kind))
            .ok_or_else(|| ErrorObject::capability_not_found(name))
    }
}

#[async_trait]
impl MessageHandler for Server {
    async fn on_message(&self, message: Message, context: RequestContext) -> Option<Message> {
        self.handle_message(message, context).await
    }
}

async fn invoke(
    capability: &Capability,
    arguments: Value,
    context: &RequestContext,
) -> Result<Value, ErrorObject> {
    capability.invoke(arguments, context).await.map_err(|err| {
        warn!(capability = capability.name(), error = %err, "capability handler failed");
        err.to_error_object()
    })
}

fn parse_params<T: DeserializeOwned>(params: Option<&Value>) -> Result<T, ErrorObject> {
    let Some(raw) = params else {
        return Err(ErrorObject::invalid_params("params are required"));
    };
    serde_json::from_value(raw.clone()).map_err(|err| ErrorObject::invalid_params(err.to_string()))
}

fn initialize_result(params: Option<&Value>) -> Result<Value, ErrorObject> {
    let protocol_version = negotiate_protocol_version(params)?;

    let initialize_result = InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            resources: Some(ServerCapabilitiesResources {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            prompts: Some(ServerCapabilitiesPrompts {
                list_changed: Some(false),
            }),
            ..Default::default()
        },
        protocol_version: protocol_version.into(),
        instructions: None,
        meta: None,
    };

    serde_json::to_value(initialize_result)
        .map_err(|err| ErrorObject::internal_error(err.to_string()))
}

/// Answers with the supported version when the client offers another one.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<ProtocolVersion, ErrorObject> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            ErrorObject::invalid_params("initialize params.protocolVersion is required")
        })?;

    if offered_version != SUPPORTED_PROTOCOL_VERSION {
        warn!(
            offered = offered_version,
            supported = SUPPORTED_PROTOCOL_VERSION,
            "client offered an unsupported protocol version"
        );
    }

    Ok(ProtocolVersion::V2024_11_05)
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey" | "payment"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::mcp::hooks::{PostDispatchHook, PreDispatchHook, TransportKind};
    use crate::mcp::rpc::{Outcome, CAPABILITY_NOT_FOUND, INTERNAL_ERROR, INVALID_PARAMS};
    use crate::registry::{handler_fn, HandlerError};

    fn registry(calls: Arc<AtomicUsize>) -> Arc<CapabilityRegistry> {
        Arc::new(
            CapabilityRegistry::builder()
                .register(Capability::tool(
                    "echo",
                    handler_fn(move |arguments| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(arguments)
                        }
                    }),
                ))
                .register(Capability::tool(
                    "explode",
                    handler_fn(|_| async { Err::<Value, _>(HandlerError::failed("kaboom")) }),
                ))
                .register(Capability::prompt(
                    "greeting",
                    handler_fn(|_| async { Ok(json!({"messages": []})) }),
                ))
                .register(Capability::resource(
                    "info",
                    "resource://info",
                    handler_fn(|arguments| async move { Ok(json!({"read": arguments["uri"]})) }),
                ))
                .build()
                .expect("registry should build"),
        )
    }

    fn server_with(hooks: Hooks) -> (Server, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Server::new(registry(calls.clone()), Arc::new(hooks)), calls)
    }

    fn context() -> RequestContext {
        RequestContext::new(TransportKind::Http)
    }

    async fn request(server: &Server, method: &str, params: Value) -> Reply {
        match server
            .handle_message(Message::request(1, method, Some(params)), context())
            .await
        {
            Some(Message::Reply(reply)) => reply,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    fn error_code(reply: &Reply) -> Option<i64> {
        match &reply.outcome {
            Outcome::Error(error) => Some(error.code),
            Outcome::Result(_) => None,
        }
    }

    fn result(reply: Reply) -> Value {
        match reply.outcome {
            Outcome::Result(value) => value,
            Outcome::Error(error) => panic!("expected a result, got {error:?}"),
        }
    }

    #[tokio::test]
    async fn invoke_returns_handler_value_with_request_id() {
        let (server, _) = server_with(Hooks::new());
        let reply = request(&server, "invoke", json!({"name": "echo", "arguments": {"x": 1}})).await;

        assert_eq!(reply.id, Some(RequestId::Number(1)));
        assert_eq!(result(reply), json!({"x": 1}));
    }

    #[tokio::test]
    async fn missing_capability_and_failing_handler_use_distinct_codes() {
        let (server, _) = server_with(Hooks::new());

        let missing = request(&server, "invoke", json!({"name": "nope"})).await;
        assert_eq!(error_code(&missing), Some(CAPABILITY_NOT_FOUND));

        let failed = request(&server, "tools/call", json!({"name": "explode"})).await;
        assert_eq!(error_code(&failed), Some(INTERNAL_ERROR));
    }

    #[tokio::test]
    async fn kind_specific_verbs_reject_other_kinds() {
        let (server, _) = server_with(Hooks::new());
        let reply = request(&server, "tools/call", json!({"name": "greeting"})).await;
        assert_eq!(error_code(&reply), Some(CAPABILITY_NOT_FOUND));

        let reply = request(&server, "prompts/get", json!({"name": "greeting"})).await;
        assert_eq!(result(reply), json!({"messages": []}));
    }

    #[tokio::test]
    async fn resources_are_read_by_uri() {
        let (server, _) = server_with(Hooks::new());
        let reply = request(&server, "resources/read", json!({"uri": "resource://info"})).await;
        assert_eq!(result(reply), json!({"read": "resource://info"}));
    }

    #[tokio::test]
    async fn unknown_method_and_bad_params() {
        let (server, _) = server_with(Hooks::new());
        let reply = request(&server, "tools/delete", json!({})).await;
        assert_eq!(error_code(&reply), Some(-32601));

        let reply = request(&server, "invoke", json!({"arguments": {}})).await;
        assert_eq!(error_code(&reply), Some(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn lists_capabilities_by_kind() {
        let (server, _) = server_with(Hooks::new());
        let all = result(request(&server, "capabilities/list", json!({})).await);
        assert_eq!(all["capabilities"].as_array().map(Vec::len), Some(4));

        let tools = result(request(&server, "tools/list", json!({})).await);
        assert_eq!(tools["tools"][0]["name"], "echo");
        assert_eq!(tools["tools"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn notifications_run_the_handler_without_replying() {
        let (server, calls) = server_with(Hooks::new());
        let reply = server
            .handle_message(
                Message::notification("invoke", Some(json!({"name": "echo"}))),
                context(),
            )
            .await;

        assert!(reply.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inbound_replies_are_ignored() {
        let (server, _) = server_with(Hooks::new());
        let reply = server
            .handle_message(Message::Reply(Reply::result(RequestId::Number(1), json!({}))), context())
            .await;
        assert!(reply.is_none());
    }

    struct DenyAll;

    #[async_trait]
    impl PreDispatchHook for DenyAll {
        async fn before(&self, _call: &Call, _context: &mut RequestContext) -> Result<(), ErrorObject> {
            Err(ErrorObject::new(402, "Payment required"))
        }
    }

    struct Stamp;

    #[async_trait]
    impl PreDispatchHook for Stamp {
        async fn before(&self, _call: &Call, context: &mut RequestContext) -> Result<(), ErrorObject> {
            context.insert("receipt", json!("r-1"));
            Ok(())
        }
    }

    #[async_trait]
    impl PostDispatchHook for Stamp {
        async fn after(&self, _call: &Call, result: &mut Value, context: &RequestContext) {
            if let (Some(object), Some(receipt)) = (result.as_object_mut(), context.get("receipt")) {
                object.insert("_meta".to_string(), json!({ "receipt": receipt }));
            }
        }
    }

    #[tokio::test]
    async fn pre_dispatch_hook_short_circuits_before_the_handler() {
        let (server, calls) = server_with(Hooks::new().with_pre(Arc::new(DenyAll)));
        let reply = request(&server, "invoke", json!({"name": "echo"})).await;

        assert_eq!(error_code(&reply), Some(402));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn post_dispatch_hook_sees_request_scoped_state() {
        let stamp = Arc::new(Stamp);
        let (server, _) = server_with(Hooks::new().with_pre(stamp.clone()).with_post(stamp));

        let reply = request(&server, "invoke", json!({"name": "echo", "arguments": {"x": 1}})).await;
        assert_eq!(result(reply), json!({"x": 1, "_meta": {"receipt": "r-1"}}));

        let failed = request(&server, "invoke", json!({"name": "explode"})).await;
        assert_eq!(error_code(&failed), Some(INTERNAL_ERROR));
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let (server, _) = server_with(Hooks::new());
        let value = result(
            request(
                &server,
                "initialize",
                json!({"protocolVersion": SUPPORTED_PROTOCOL_VERSION, "capabilities": {}}),
            )
            .await,
        );

        assert_eq!(value["protocolVersion"], SUPPORTED_PROTOCOL_VERSION);
        assert_eq!(value["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
        assert!(value["capabilities"]["tools"].is_object());
        assert!(value["capabilities"]["prompts"].is_object());
    }

    #[test]
    fn redacts_sensitive_fields_in_audit_params() {
        let params = json!({
            "name": "echo",
            "arguments": {
                "unit": "sshd.service",
                "token": "should-not-appear",
                "api_key": "should-not-appear",
                "nested": {
                    "secret": "should-not-appear"
                }
            }
        });

        let redacted = redact_audit_params(Some(&params));

        assert_eq!(redacted["name"], json!("echo"));
        assert_eq!(redacted["arguments"]["unit"], json!("sshd.service"));
        assert_eq!(redacted["arguments"]["token"], json!("[REDACTED]"));
        assert_eq!(redacted["arguments"]["api_key"], json!("[REDACTED]"));
        assert_eq!(
            redacted["arguments"]["nested"]["secret"],
            json!("[REDACTED]")
        );
    }

    #[test]
    fn negotiate_protocol_version_accepts_supported_version() {
        let params = json!({
            "protocolVersion": SUPPORTED_PROTOCOL_VERSION
        });

        let version = negotiate_protocol_version(Some(&params)).expect("supported version");
        assert_eq!(version, ProtocolVersion::V2024_11_05);
    }

    #[test]
    fn negotiate_protocol_version_falls_back_for_unknown_versions() {
        let params = json!({
            "protocolVersion": "2026-01-01"
        });

        let version = negotiate_protocol_version(Some(&params)).expect("fallback version");
        assert_eq!(version, ProtocolVersion::V2024_11_05);
    }

    #[test]
    fn negotiate_protocol_version_requires_a_version() {
        let error = negotiate_protocol_version(Some(&json!({}))).expect_err("missing version");
        assert_eq!(error.code, INVALID_PARAMS);
    }
}
