use async_trait::async_trait;
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::mcp::{
    hooks::{Call, PreDispatchHook, RequestContext},
    methods::Method,
    rpc::ErrorObject,
};

/// Rejects calls whose context does not carry the configured bearer token.
/// `initialize` and `ping` stay open so clients can probe the server.
pub struct BearerTokenHook {
    token: Box<str>,
}

impl BearerTokenHook {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().into_boxed_str(),
        }
    }
}

#[async_trait]
impl PreDispatchHook for BearerTokenHook {
    async fn before(&self, call: &Call, context: &mut RequestContext) -> Result<(), ErrorObject> {
        if matches!(call.method, Method::Initialize | Method::Ping) {
            return Ok(());
        }

        let Some(presented) = context.bearer_token() else {
            return Err(ErrorObject::unauthorized("missing bearer token"));
        };

        if presented != self.token.as_ref() {
            return Err(ErrorObject::unauthorized("invalid bearer token"));
        }

        Ok(())
    }
}

pub fn bearer_token(header: Option<&TypedHeader<Authorization<Bearer>>>) -> Option<&str> {
    header.map(|TypedHeader(auth)| auth.token())
}
