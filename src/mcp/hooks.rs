//! Dispatch extension points
//!
//! Pre-dispatch hooks may reject a call before it reaches a capability handler;
//! post-dispatch hooks may rewrite a successful result. Both receive a
//! [`RequestContext`] that lives exactly as long as the call it describes, so
//! plugins carry state from `before` to `after` without any process-wide slots.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::mcp::methods::Method;
use crate::mcp::rpc::{ErrorObject, RequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Stdio,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    transport: TransportKind,
    bearer_token: Option<Arc<str>>,
    attributes: Map<String, Value>,
}

impl RequestContext {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            bearer_token: None,
            attributes: Map::new(),
        }
    }

    pub fn with_bearer_token(mut self, token: Option<&str>) -> Self {
        self.bearer_token = token.map(Arc::from);
        self
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }
}

/// A resolved call as seen by hooks and the engine. `id` is `None` for notifications.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: Option<RequestId>,
    pub method: Method,
    pub params: Option<Value>,
}

impl Call {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[async_trait]
pub trait PreDispatchHook: Send + Sync {
    async fn before(&self, call: &Call, context: &mut RequestContext) -> Result<(), ErrorObject>;
}

#[async_trait]
pub trait PostDispatchHook: Send + Sync {
    async fn after(&self, call: &Call, result: &mut Value, context: &RequestContext);
}

#[derive(Clone, Default)]
pub struct Hooks {
    pre: Vec<Arc<dyn PreDispatchHook>>,
    post: Vec<Arc<dyn PostDispatchHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre(mut self, hook: Arc<dyn PreDispatchHook>) -> Self {
        self.pre.push(hook);
        self
    }

    pub fn with_post(mut self, hook: Arc<dyn PostDispatchHook>) -> Self {
        self.post.push(hook);
        self
    }

    /// Runs every pre-dispatch hook in registration order; the first rejection wins.
    pub async fn run_before(
        &self,
        call: &Call,
        context: &mut RequestContext,
    ) -> Result<(), ErrorObject> {
        for hook in &self.pre {
            hook.before(call, context).await?;
        }
        Ok(())
    }

    pub async fn run_after(&self, call: &Call, result: &mut Value, context: &RequestContext) {
        for hook in &self.post {
            hook.after(call, result, context).await;
        }
    }
}
