//! Capability registry consumed by the protocol engine
//!
//! Built once at startup and shared read-only (behind an `Arc`) by every
//! engine instance. Capabilities are looked up by name, resources also by URI.

pub mod builtin;

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio_util::task::AbortOnDropHandle;
use tracing::error;

use crate::mcp::hooks::RequestContext;
use crate::mcp::rpc::ErrorObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Self::InvalidArguments(reason) => ErrorObject::invalid_params(reason.clone()),
            Self::Failed(message) => ErrorObject::internal_error(message.clone()),
        }
    }
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn call(&self, arguments: Value, context: &RequestContext) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn call(&self, arguments: Value, _context: &RequestContext) -> Result<Value, HandlerError> {
        (self.0)(arguments).await
    }
}

/// Adapts an async closure that only needs the call arguments.
pub fn handler_fn<F, Fut>(handler: F) -> Arc<dyn CapabilityHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(handler))
}

#[derive(Clone)]
pub struct Capability {
    name: String,
    kind: CapabilityKind,
    description: Option<String>,
    uri: Option<String>,
    input_schema: Value,
    output_schema: Option<Value>,
    metadata: Map<String, Value>,
    handler: Arc<dyn CapabilityHandler>,
}

impl Capability {
    fn new(name: &str, kind: CapabilityKind, handler: Arc<dyn CapabilityHandler>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: None,
            uri: None,
            input_schema: json!({ "type": "object" }),
            output_schema: None,
            metadata: Map::new(),
            handler,
        }
    }

    pub fn tool(name: &str, handler: Arc<dyn CapabilityHandler>) -> Self {
        Self::new(name, CapabilityKind::Tool, handler)
    }

    pub fn resource(name: &str, uri: &str, handler: Arc<dyn CapabilityHandler>) -> Self {
        let mut capability = Self::new(name, CapabilityKind::Resource, handler);
        capability.uri = Some(uri.to_string());
        capability
    }

    pub fn prompt(name: &str, handler: Arc<dyn CapabilityHandler>) -> Self {
        Self::new(name, CapabilityKind::Prompt, handler)
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata {
            name: self.name.clone(),
            kind: self.kind,
            description: self.description.clone(),
            uri: self.uri.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            meta: self.metadata.clone(),
        }
    }

    /// Runs the handler on its own task so a panic surfaces as a failure
    /// instead of unwinding through the caller. Dropping the future aborts it.
    pub async fn invoke(
        &self,
        arguments: Value,
        context: &RequestContext,
    ) -> Result<Value, HandlerError> {
        let handler = self.handler.clone();
        let context = context.clone();
        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            handler.call(arguments, &context).await
        }));

        match task.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                error!(capability = %self.name, "capability handler panicked");
                Err(HandlerError::failed("capability handler panicked"))
            }
            Err(err) => Err(HandlerError::failed(err.to_string())),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityMetadata {
    pub name: String,
    pub kind: CapabilityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(rename = "_meta", skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capability name must not be empty")]
    EmptyName,
    #[error("capability `{0}` is registered more than once")]
    DuplicateName(String),
    #[error("resource uri `{0}` is registered more than once")]
    DuplicateUri(String),
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    capabilities: Vec<Capability>,
}

impl RegistryBuilder {
    pub fn register(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn build(self) -> Result<CapabilityRegistry, RegistryError> {
        let mut by_name = HashMap::new();
        let mut by_uri = HashMap::new();

        for (index, capability) in self.capabilities.iter().enumerate() {
            if capability.name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if by_name.insert(capability.name.clone(), index).is_some() {
                return Err(RegistryError::DuplicateName(capability.name.clone()));
            }
            if let Some(uri) = &capability.uri {
                if by_uri.insert(uri.clone(), index).is_some() {
                    return Err(RegistryError::DuplicateUri(uri.clone()));
                }
            }
        }

        Ok(CapabilityRegistry {
            capabilities: self.capabilities,
            by_name,
            by_uri,
        })
    }
}

#[derive(Debug)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
    by_name: HashMap<String, usize>,
    by_uri: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&Capability> {
        self.by_name
            .get(name)
            .and_then(|index| self.capabilities.get(*index))
    }

    pub fn lookup_resource(&self, uri: &str) -> Option<&Capability> {
        self.by_uri
            .get(uri)
            .and_then(|index| self.capabilities.get(*index))
    }

    pub fn list_all(&self) -> Vec<CapabilityMetadata> {
        self.capabilities.iter().map(Capability::metadata).collect()
    }

    pub fn list(&self, kind: CapabilityKind) -> Vec<CapabilityMetadata> {
        self.capabilities
            .iter()
            .filter(|capability| capability.kind == kind)
            .map(Capability::metadata)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
